use super::{
    check_email, check_required, normalize_email, AiConfig, Appointment, Company, ListUpdate,
    MessagingConfig, Project, Reminder,
};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub title: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub skills: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for User {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            title: row.try_get("title")?,
            bio: row.try_get("bio")?,
            avatar_url: row.try_get("avatar_url")?,
            phone: row.try_get("phone")?,
            location: row.try_get("location")?,
            website: row.try_get("website")?,
            skills: row.try_get::<Json<Vec<String>>, _>("skills")?.0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub title: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub skills: Vec<String>,
}

impl NewUser {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        NewUser {
            email: email.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    /// Validate and normalize in place.
    pub fn prepare(&mut self) -> Result<()> {
        self.email = normalize_email(&self.email);
        check_email(&self.email)?;
        check_required("user.name", &self.name)?;
        self.name = self.name.trim().to_string();
        self.skills = super::clean_list(&self.skills);
        Ok(())
    }
}

/// Partial update. `Some(None)` on a nullable column clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub title: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub bio: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub phone: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub website: Option<Option<String>>,
    pub skills: Option<ListUpdate>,
}

impl UserChanges {
    pub fn prepare(&mut self) -> Result<()> {
        if let Some(email) = self.email.as_mut() {
            *email = normalize_email(email);
            check_email(email)?;
        }
        if let Some(name) = self.name.as_mut() {
            check_required("user.name", name)?;
            *name = name.trim().to_string();
        }
        if let Some(skills) = self.skills.as_mut() {
            *skills = skills.cleaned();
        }
        Ok(())
    }
}

/// Which relations to load alongside a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Include {
    pub company: bool,
    pub projects: bool,
    pub reminders: bool,
    pub appointments: bool,
    pub ai_config: bool,
    pub messaging_config: bool,
}

impl Include {
    pub fn all() -> Self {
        Include {
            company: true,
            projects: true,
            reminders: true,
            appointments: true,
            ai_config: true,
            messaging_config: true,
        }
    }
}

/// A user with the relations requested through [`Include`]. Relations that
/// were not requested stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWithRelations {
    #[serde(flatten)]
    pub user: User,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub company: Option<Option<Company>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<Project>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<Vec<Reminder>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointments: Option<Vec<Appointment>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub ai_config: Option<Option<AiConfig>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub messaging_config: Option<Option<MessagingConfig>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_normalizes() {
        let mut u = NewUser::new(" Ana@Example.com ", " Ana ").with_skills(["rust", " ", "sql"]);
        u.prepare().unwrap();
        assert_eq!(u.email, "ana@example.com");
        assert_eq!(u.name, "Ana");
        assert_eq!(u.skills, vec!["rust", "sql"]);
    }

    #[test]
    fn prepare_rejects_blank_name() {
        let mut u = NewUser::new("ana@example.com", "   ");
        assert!(u.prepare().is_err());
    }

    #[test]
    fn changes_prepare_validates_email() {
        let mut changes = UserChanges {
            email: Some("nope".into()),
            ..Default::default()
        };
        assert!(changes.prepare().is_err());
    }

    #[test]
    fn json_null_clears_and_missing_keeps() {
        let changes: UserChanges =
            serde_json::from_str(r#"{"bio": null, "location": "Porto"}"#).unwrap();
        assert_eq!(changes.bio, Some(None));
        assert_eq!(changes.location, Some(Some("Porto".into())));
        assert_eq!(changes.title, None);

        let back = serde_json::to_value(&changes).unwrap();
        assert_eq!(back["bio"], serde_json::Value::Null);
        assert!(back.get("title").is_none());
    }
}
