//! Persisted parent-profile record and the Mongo connection bootstrap.
//! Generalizes the teacher's `db::User`/`db::Role`/`db::Language` (same
//! `Model` trait, same `load_database` shape) to this spec's `Parent`
//! profile created on `follow` and looked up by `CourseStore::getOrCreateParent`.

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::Display,
    strum::EnumIter,
)]
pub enum Language {
    #[strum(serialize = "zh-TW")]
    Chinese,
    #[strum(serialize = "en")]
    English,
}

impl Language {
    pub fn code(&self) -> &'static str {
        self.into()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Parent,
    Admin,
}

/// The parent profile created/updated on LINE `follow` (spec §4.9) and
/// referenced by every course a parent's children belong to.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Parent {
    #[serde(rename = "_id")]
    pub user_id: String,
    pub role: Role,
    pub language: Language,
    pub display_name: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub trait Model {
    const COLLECTION_NAME: &'static str;
}

impl Model for Parent {
    const COLLECTION_NAME: &'static str = "parents";
}

const DB_NAME: &str = "classbot";

pub async fn load_database(config: &AppConfig) -> eyre::Result<mongodb::Database> {
    let uri = config
        .mongodb_uri
        .as_deref()
        .unwrap_or("mongodb://localhost:27017");
    let client = mongodb::Client::with_uri_str(uri).await?;
    Ok(client.database(DB_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_code_round_trips() {
        assert_eq!(Language::Chinese.code(), "zh-TW");
        assert_eq!(Language::English.code(), "en");
    }
}
