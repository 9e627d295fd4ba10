use super::{check_required, clean_list, ListUpdate};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub technologies: Vec<String>,
    pub featured: bool,
    pub image_url: Option<String>,
    pub project_url: Option<String>,
    pub repository_url: Option<String>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Project {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Project {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            technologies: row.try_get::<Json<Vec<String>>, _>("technologies")?.0,
            featured: row.try_get("featured")?,
            image_url: row.try_get("image_url")?,
            project_url: row.try_get("project_url")?,
            repository_url: row.try_get("repository_url")?,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewProject {
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub technologies: Vec<String>,
    pub featured: bool,
    pub image_url: Option<String>,
    pub project_url: Option<String>,
    pub repository_url: Option<String>,
}

impl NewProject {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        NewProject {
            user_id: user_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        check_required("project.user_id", &self.user_id)?;
        check_required("project.title", &self.title)?;
        self.title = self.title.trim().to_string();
        self.technologies = clean_list(&self.technologies);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectChanges {
    pub title: Option<String>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub technologies: Option<ListUpdate>,
    pub featured: Option<bool>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub project_url: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<Option<String>>,
}

impl ProjectChanges {
    pub fn prepare(&mut self) -> Result<()> {
        if let Some(title) = self.title.as_mut() {
            check_required("project.title", title)?;
            *title = title.trim().to_string();
        }
        if let Some(technologies) = self.technologies.as_mut() {
            *technologies = technologies.cleaned();
        }
        Ok(())
    }
}
