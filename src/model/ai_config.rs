use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Groq,
    OpenRouter,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Groq,
        Provider::OpenRouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Groq => "groq",
            Provider::OpenRouter => "openrouter",
        }
    }

    pub fn parse_provider(s: &str) -> Option<Provider> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Provider::OpenAi),
            "anthropic" => Some(Provider::Anthropic),
            "groq" => Some(Provider::Groq),
            "openrouter" => Some(Provider::OpenRouter),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Provider::parse_provider(s)
            .ok_or_else(|| StoreError::validation(format!("unknown AI provider '{s}'")))
    }
}

/// Settings for a single provider, as stored on [`AiConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub enabled: bool,
    pub model: Option<String>,
}

impl ProviderSettings {
    /// Enabled and carrying a non-blank key.
    pub fn is_usable(&self) -> bool {
        self.enabled
            && self
                .api_key
                .as_deref()
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false)
    }
}

/// Per-user AI provider credentials. At most one per user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    pub id: String,
    pub user_id: String,
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub groq: ProviderSettings,
    pub openrouter: ProviderSettings,
    pub default_provider: Option<Provider>,
    pub default_model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Keys stay out of logs.
impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("enabled", &self.enabled_providers())
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl AiConfig {
    pub fn provider(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::OpenAi => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Groq => &self.groq,
            Provider::OpenRouter => &self.openrouter,
        }
    }

    pub fn enabled_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.provider(*p).is_usable())
            .collect()
    }

    /// The default provider if it is usable, else the first usable one in
    /// declaration order. Returns the provider and the model to use, where
    /// `default_model` applies only to the default provider.
    pub fn active_provider(&self) -> Option<(Provider, Option<String>)> {
        if let Some(p) = self.default_provider {
            if self.provider(p).is_usable() {
                let model = self
                    .default_model
                    .clone()
                    .or_else(|| self.provider(p).model.clone());
                return Some((p, model));
            }
        }
        self.enabled_providers()
            .into_iter()
            .next()
            .map(|p| (p, self.provider(p).model.clone()))
    }
}

fn settings(row: &SqliteRow, prefix: &str) -> sqlx::Result<ProviderSettings> {
    Ok(ProviderSettings {
        api_key: row.try_get(format!("{prefix}_api_key").as_str())?,
        enabled: row.try_get(format!("{prefix}_enabled").as_str())?,
        model: row.try_get(format!("{prefix}_model").as_str())?,
    })
}

impl<'r> FromRow<'r, SqliteRow> for AiConfig {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let default_provider: Option<String> = row.try_get("default_provider")?;
        let default_provider = match default_provider {
            Some(raw) => Some(Provider::parse_provider(&raw).ok_or_else(|| {
                sqlx::Error::ColumnDecode {
                    index: "default_provider".into(),
                    source: format!("unknown provider '{raw}'").into(),
                }
            })?),
            None => None,
        };
        Ok(AiConfig {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            openai: settings(row, "openai")?,
            anthropic: settings(row, "anthropic")?,
            groq: settings(row, "groq")?,
            openrouter: settings(row, "openrouter")?,
            default_provider,
            default_model: row.try_get("default_model")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewAiConfig {
    pub user_id: String,
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub groq: ProviderSettings,
    pub openrouter: ProviderSettings,
    pub default_provider: Option<Provider>,
    pub default_model: Option<String>,
}

impl NewAiConfig {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        NewAiConfig {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn provider_mut(&mut self, provider: Provider) -> &mut ProviderSettings {
        match provider {
            Provider::OpenAi => &mut self.openai,
            Provider::Anthropic => &mut self.anthropic,
            Provider::Groq => &mut self.groq,
            Provider::OpenRouter => &mut self.openrouter,
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        super::check_required("ai_config.user_id", &self.user_id)?;
        for p in Provider::ALL {
            check_provider(p, self.provider_mut(p))?;
        }
        Ok(())
    }
}

/// Partial update. Provider blocks are replaced as a whole when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiConfigChanges {
    pub openai: Option<ProviderSettings>,
    pub anthropic: Option<ProviderSettings>,
    pub groq: Option<ProviderSettings>,
    pub openrouter: Option<ProviderSettings>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<Option<Provider>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub default_model: Option<Option<String>>,
}

impl AiConfigChanges {
    pub fn provider_mut(&mut self, provider: Provider) -> &mut Option<ProviderSettings> {
        match provider {
            Provider::OpenAi => &mut self.openai,
            Provider::Anthropic => &mut self.anthropic,
            Provider::Groq => &mut self.groq,
            Provider::OpenRouter => &mut self.openrouter,
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        for p in Provider::ALL {
            if let Some(s) = self.provider_mut(p).as_mut() {
                check_provider(p, s)?;
            }
        }
        Ok(())
    }
}

fn check_provider(provider: Provider, settings: &mut ProviderSettings) -> Result<()> {
    settings.api_key = settings
        .api_key
        .take()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());
    if settings.enabled && settings.api_key.is_none() {
        return Err(StoreError::validation(format!(
            "{provider} cannot be enabled without an api key"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AiConfig {
        let now = Utc::now();
        AiConfig {
            id: "c1".into(),
            user_id: "u1".into(),
            openai: ProviderSettings::default(),
            anthropic: ProviderSettings {
                api_key: Some("sk-ant".into()),
                enabled: true,
                model: Some("claude".into()),
            },
            groq: ProviderSettings {
                api_key: Some("gsk".into()),
                enabled: true,
                model: None,
            },
            openrouter: ProviderSettings::default(),
            default_provider: None,
            default_model: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn parse_provider_names() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!(Provider::OpenRouter.as_str(), "openrouter");
        assert!("mistral".parse::<Provider>().is_err());
    }

    #[test]
    fn active_provider_falls_back_to_first_enabled() {
        let mut cfg = config();
        assert_eq!(
            cfg.active_provider(),
            Some((Provider::Anthropic, Some("claude".into())))
        );

        cfg.default_provider = Some(Provider::Groq);
        cfg.default_model = Some("llama".into());
        assert_eq!(
            cfg.active_provider(),
            Some((Provider::Groq, Some("llama".into())))
        );

        // Default provider that is not usable is skipped.
        cfg.default_provider = Some(Provider::OpenAi);
        assert_eq!(cfg.active_provider().map(|(p, _)| p), Some(Provider::Anthropic));
    }

    #[test]
    fn enabling_requires_key() {
        let mut new = NewAiConfig::for_user("u1");
        new.openai.enabled = true;
        new.openai.api_key = Some("   ".into());
        assert!(matches!(new.prepare(), Err(StoreError::Validation(_))));
    }

    #[test]
    fn debug_hides_keys() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("sk-ant"));
    }
}
