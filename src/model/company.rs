use super::{check_required, clean_list, ListUpdate};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};

/// A user's company profile. At most one per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub services: Vec<String>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Company {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Company {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            industry: row.try_get("industry")?,
            website: row.try_get("website")?,
            logo_url: row.try_get("logo_url")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            address: row.try_get("address")?,
            services: row.try_get::<Json<Vec<String>>, _>("services")?.0,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewCompany {
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub services: Vec<String>,
}

impl NewCompany {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        NewCompany {
            user_id: user_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        check_required("company.user_id", &self.user_id)?;
        check_required("company.name", &self.name)?;
        self.name = self.name.trim().to_string();
        self.services = clean_list(&self.services);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyChanges {
    pub name: Option<String>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub industry: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub website: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub email: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub phone: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub address: Option<Option<String>>,
    pub services: Option<ListUpdate>,
}

impl CompanyChanges {
    pub fn prepare(&mut self) -> Result<()> {
        if let Some(name) = self.name.as_mut() {
            check_required("company.name", name)?;
            *name = name.trim().to_string();
        }
        if let Some(services) = self.services.as_mut() {
            *services = services.cleaned();
        }
        Ok(())
    }
}
