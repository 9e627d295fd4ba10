use super::crud::{self, ensure_vacant, Insert, Record};
use super::query::{Assignments, Changeset, Column, Filter, Where};
use crate::error::Result;
use crate::model::{AiConfig, AiConfigChanges, NewAiConfig, Provider, ProviderSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Acquire, Sqlite, SqliteConnection};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct AiConfigFilter {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub default_provider: Option<Provider>,
    /// Has this provider enabled.
    pub enabled: Option<Provider>,
}

impl Filter for AiConfigFilter {
    fn apply(&self, w: &mut Where<'_, '_>) {
        w.eq_opt("id", &self.id);
        w.eq_opt("user_id", &self.user_id);
        if let Some(p) = self.default_provider {
            w.eq("default_provider", p.as_str().to_string());
        }
        if let Some(p) = self.enabled {
            w.raw(enabled_column(p));
        }
    }
}

fn enabled_column(p: Provider) -> &'static str {
    match p {
        Provider::OpenAi => "openai_enabled",
        Provider::Anthropic => "anthropic_enabled",
        Provider::Groq => "groq_enabled",
        Provider::OpenRouter => "openrouter_enabled",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiConfigField {
    Id,
    UserId,
    DefaultProvider,
    DefaultModel,
    CreatedAt,
}

impl Column for AiConfigField {
    fn column(&self) -> &'static str {
        match self {
            AiConfigField::Id => "id",
            AiConfigField::UserId => "user_id",
            AiConfigField::DefaultProvider => "default_provider",
            AiConfigField::DefaultModel => "default_model",
            AiConfigField::CreatedAt => "created_at",
        }
    }

    fn group_expr(&self) -> &'static str {
        match self {
            AiConfigField::CreatedAt => "date(created_at)",
            other => other.column(),
        }
    }
}

/// Row count plus how many configs enable each provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AiConfigAggregate {
    pub count: i64,
    pub openai_enabled: i64,
    pub anthropic_enabled: i64,
    pub groq_enabled: i64,
    pub openrouter_enabled: i64,
    pub first_created_at: Option<DateTime<Utc>>,
    pub last_created_at: Option<DateTime<Utc>>,
}

impl Record for AiConfig {
    const ENTITY: &'static str = "AIConfig";
    const TABLE: &'static str = "ai_configs";
    const AGGREGATE: &'static str = "COUNT(*) AS count, \
         COALESCE(SUM(openai_enabled), 0) AS openai_enabled, \
         COALESCE(SUM(anthropic_enabled), 0) AS anthropic_enabled, \
         COALESCE(SUM(groq_enabled), 0) AS groq_enabled, \
         COALESCE(SUM(openrouter_enabled), 0) AS openrouter_enabled, \
         MIN(created_at) AS first_created_at, \
         MAX(created_at) AS last_created_at";

    type Filter = AiConfigFilter;
    type Field = AiConfigField;
    type Changes = AiConfigChanges;
    type Aggregate = AiConfigAggregate;

    fn id(&self) -> &str {
        &self.id
    }
}

fn set_provider(set: &mut Assignments<'_, '_>, p: Provider, s: &ProviderSettings) {
    let prefix = p.as_str();
    set.set(&format!("{prefix}_api_key"), s.api_key.clone());
    set.set(&format!("{prefix}_enabled"), s.enabled);
    set.set(&format!("{prefix}_model"), s.model.clone());
}

impl Changeset for AiConfigChanges {
    fn prepare(&mut self) -> Result<()> {
        AiConfigChanges::prepare(self)
    }

    fn apply(&self, set: &mut Assignments<'_, '_>) {
        for (p, s) in [
            (Provider::OpenAi, &self.openai),
            (Provider::Anthropic, &self.anthropic),
            (Provider::Groq, &self.groq),
            (Provider::OpenRouter, &self.openrouter),
        ] {
            if let Some(s) = s {
                set_provider(set, p, s);
            }
        }
        if let Some(p) = self.default_provider {
            set.set("default_provider", p.map(|p| p.as_str().to_string()));
        }
        set.set_opt("default_model", &self.default_model);
    }
}

#[async_trait]
impl Insert for NewAiConfig {
    type Output = AiConfig;

    fn prepare(&mut self) -> Result<()> {
        NewAiConfig::prepare(self)
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<AiConfig> {
        ensure_vacant(conn, AiConfig::TABLE, &self.user_id).await?;
        let now = Utc::now();
        let mut q = sqlx::query_as::<_, AiConfig>(
            "INSERT INTO ai_configs (id, user_id, \
             openai_api_key, openai_enabled, openai_model, \
             anthropic_api_key, anthropic_enabled, anthropic_model, \
             groq_api_key, groq_enabled, groq_model, \
             openrouter_api_key, openrouter_enabled, openrouter_model, \
             default_provider, default_model, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(self.user_id.as_str());
        for s in [&self.openai, &self.anthropic, &self.groq, &self.openrouter] {
            q = q
                .bind(s.api_key.as_deref())
                .bind(s.enabled)
                .bind(s.model.as_deref());
        }
        let config = q
            .bind(self.default_provider.map(|p| p.as_str()))
            .bind(self.default_model.as_deref())
            .bind(now)
            .bind(now)
            .fetch_one(&mut *conn)
            .await?;
        Ok(config)
    }
}

#[instrument(skip_all)]
pub async fn find_by_user<'c, A>(db: A, user_id: &str) -> Result<Option<AiConfig>>
where
    A: Acquire<'c, Database = Sqlite>,
{
    crud::find_by_user::<AiConfig, A>(db, user_id).await
}

/// Update the AI config of `new.user_id`, or create it from `new` when absent.
#[instrument(skip_all)]
pub async fn upsert<'c, A>(
    db: A,
    new: NewAiConfig,
    changes: AiConfigChanges,
) -> Result<AiConfig>
where
    A: Acquire<'c, Database = Sqlite>,
{
    let mut tx = db.begin().await?;
    let user_id = new.user_id.clone();
    let config = match find_by_user(&mut *tx, &user_id).await? {
        Some(existing) => crud::update::<AiConfig, _>(&mut *tx, &existing.id, changes).await?,
        None => crud::create(&mut *tx, new).await?,
    };
    tx.commit().await?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::FindMany;
    use crate::db::test_pool;
    use crate::error::StoreError;
    use crate::model::NewUser;

    fn key(k: &str) -> ProviderSettings {
        ProviderSettings {
            api_key: Some(k.into()),
            enabled: true,
            model: None,
        }
    }

    #[tokio::test]
    async fn insert_reads_back_provider_blocks() {
        let pool = test_pool().await;
        let user = crud::create(&pool, NewUser::new("ana@example.com", "Ana"))
            .await
            .unwrap();
        let mut new = NewAiConfig::for_user(&user.id);
        new.anthropic = key(" sk-ant ");
        new.default_provider = Some(Provider::Anthropic);
        let config = crud::create(&pool, new).await.unwrap();

        assert_eq!(config.anthropic.api_key.as_deref(), Some("sk-ant"));
        assert!(!config.openai.enabled);
        assert_eq!(config.default_provider, Some(Provider::Anthropic));
        assert_eq!(config.active_provider().map(|(p, _)| p), Some(Provider::Anthropic));

        let found = crud::find_many::<AiConfig, _>(
            &pool,
            &FindMany::new(AiConfigFilter {
                enabled: Some(Provider::Anthropic),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);

        let err = crud::create(&pool, NewAiConfig::for_user(&user.id))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn upsert_replaces_provider_and_clears_default() {
        let pool = test_pool().await;
        let user = crud::create(&pool, NewUser::new("ana@example.com", "Ana"))
            .await
            .unwrap();
        let mut new = NewAiConfig::for_user(&user.id);
        new.groq = key("gsk");
        new.default_provider = Some(Provider::Groq);
        let created = upsert(&pool, new.clone(), AiConfigChanges::default())
            .await
            .unwrap();

        let changes = AiConfigChanges {
            groq: Some(ProviderSettings::default()),
            openai: Some(key("sk-oa")),
            default_provider: Some(None),
            ..Default::default()
        };
        let updated = upsert(&pool, new, changes).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.groq, ProviderSettings::default());
        assert_eq!(updated.default_provider, None);
        assert_eq!(updated.enabled_providers(), vec![Provider::OpenAi]);

        let agg = crud::aggregate::<AiConfig, _>(&pool, &AiConfigFilter::default())
            .await
            .unwrap();
        assert_eq!(agg.count, 1);
        assert_eq!(agg.openai_enabled, 1);
        assert_eq!(agg.groq_enabled, 0);
    }
}
