use super::{check_http_url, check_required};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-user connection settings for the Evolution messaging API. At most one
/// per user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessagingConfig {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub evolution_api_key: Option<String>,
    pub evolution_base_url: Option<String>,
    pub evolution_enabled: bool,
    pub evolution_instance_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for MessagingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingConfig")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("evolution_base_url", &self.evolution_base_url)
            .field("evolution_enabled", &self.evolution_enabled)
            .field("evolution_instance_name", &self.evolution_instance_name)
            .finish_non_exhaustive()
    }
}

impl MessagingConfig {
    /// Enabled with every connection field filled in.
    pub fn is_ready(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        self.evolution_enabled
            && filled(&self.evolution_api_key)
            && filled(&self.evolution_base_url)
            && filled(&self.evolution_instance_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewMessagingConfig {
    pub user_id: String,
    pub evolution_api_key: Option<String>,
    pub evolution_base_url: Option<String>,
    pub evolution_enabled: bool,
    pub evolution_instance_name: Option<String>,
}

impl NewMessagingConfig {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        NewMessagingConfig {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        check_required("messaging_config.user_id", &self.user_id)?;
        if let Some(url) = self.evolution_base_url.as_mut() {
            check_http_url("messaging_config.evolution_base_url", url)?;
            *url = url.trim().trim_end_matches('/').to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagingConfigChanges {
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub evolution_api_key: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub evolution_base_url: Option<Option<String>>,
    pub evolution_enabled: Option<bool>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub evolution_instance_name: Option<Option<String>>,
}

impl MessagingConfigChanges {
    pub fn prepare(&mut self) -> Result<()> {
        if let Some(Some(url)) = self.evolution_base_url.as_mut() {
            check_http_url("messaging_config.evolution_base_url", url)?;
            *url = url.trim().trim_end_matches('/').to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_trimmed() {
        let mut new = NewMessagingConfig::for_user("u1");
        new.evolution_base_url = Some(" https://evo.example.com/ ".into());
        new.prepare().unwrap();
        assert_eq!(new.evolution_base_url.as_deref(), Some("https://evo.example.com"));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let mut changes = MessagingConfigChanges {
            evolution_base_url: Some(Some("evo.example.com".into())),
            ..Default::default()
        };
        assert!(changes.prepare().is_err());
    }
}
