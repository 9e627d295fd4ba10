use super::crud::{self, ensure_vacant, Insert, Record};
use super::query::{Assignments, Changeset, Column, Filter, Where};
use crate::error::Result;
use crate::model::{MessagingConfig, MessagingConfigChanges, NewMessagingConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Acquire, Sqlite, SqliteConnection};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct MessagingConfigFilter {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub evolution_enabled: Option<bool>,
    pub evolution_instance_name: Option<String>,
}

impl Filter for MessagingConfigFilter {
    fn apply(&self, w: &mut Where<'_, '_>) {
        w.eq_opt("id", &self.id);
        w.eq_opt("user_id", &self.user_id);
        w.eq_opt("evolution_enabled", &self.evolution_enabled);
        w.eq_opt("evolution_instance_name", &self.evolution_instance_name);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagingConfigField {
    Id,
    UserId,
    EvolutionEnabled,
    EvolutionInstanceName,
    CreatedAt,
}

impl Column for MessagingConfigField {
    fn column(&self) -> &'static str {
        match self {
            MessagingConfigField::Id => "id",
            MessagingConfigField::UserId => "user_id",
            MessagingConfigField::EvolutionEnabled => "evolution_enabled",
            MessagingConfigField::EvolutionInstanceName => "evolution_instance_name",
            MessagingConfigField::CreatedAt => "created_at",
        }
    }

    fn group_expr(&self) -> &'static str {
        match self {
            MessagingConfigField::EvolutionEnabled => {
                "CASE WHEN evolution_enabled THEN 'true' ELSE 'false' END"
            }
            MessagingConfigField::CreatedAt => "date(created_at)",
            other => other.column(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessagingConfigAggregate {
    pub count: i64,
    pub enabled: i64,
    pub first_created_at: Option<DateTime<Utc>>,
    pub last_created_at: Option<DateTime<Utc>>,
}

impl Record for MessagingConfig {
    const ENTITY: &'static str = "MessagingConfig";
    const TABLE: &'static str = "messaging_configs";
    const AGGREGATE: &'static str = "COUNT(*) AS count, \
         COALESCE(SUM(evolution_enabled), 0) AS enabled, \
         MIN(created_at) AS first_created_at, \
         MAX(created_at) AS last_created_at";

    type Filter = MessagingConfigFilter;
    type Field = MessagingConfigField;
    type Changes = MessagingConfigChanges;
    type Aggregate = MessagingConfigAggregate;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Changeset for MessagingConfigChanges {
    fn prepare(&mut self) -> Result<()> {
        MessagingConfigChanges::prepare(self)
    }

    fn apply(&self, set: &mut Assignments<'_, '_>) {
        set.set_opt("evolution_api_key", &self.evolution_api_key);
        set.set_opt("evolution_base_url", &self.evolution_base_url);
        set.set_opt("evolution_enabled", &self.evolution_enabled);
        set.set_opt("evolution_instance_name", &self.evolution_instance_name);
    }
}

#[async_trait]
impl Insert for NewMessagingConfig {
    type Output = MessagingConfig;

    fn prepare(&mut self) -> Result<()> {
        NewMessagingConfig::prepare(self)
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<MessagingConfig> {
        ensure_vacant(conn, MessagingConfig::TABLE, &self.user_id).await?;
        let now = Utc::now();
        let config = sqlx::query_as::<_, MessagingConfig>(
            "INSERT INTO messaging_configs (id, user_id, evolution_api_key, evolution_base_url, evolution_enabled, evolution_instance_name, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(self.user_id.as_str())
        .bind(self.evolution_api_key.as_deref())
        .bind(self.evolution_base_url.as_deref())
        .bind(self.evolution_enabled)
        .bind(self.evolution_instance_name.as_deref())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        Ok(config)
    }
}

#[instrument(skip_all)]
pub async fn find_by_user<'c, A>(db: A, user_id: &str) -> Result<Option<MessagingConfig>>
where
    A: Acquire<'c, Database = Sqlite>,
{
    crud::find_by_user::<MessagingConfig, A>(db, user_id).await
}

/// Update the messaging config of `new.user_id`, or create it from `new` when absent.
#[instrument(skip_all)]
pub async fn upsert<'c, A>(
    db: A,
    new: NewMessagingConfig,
    changes: MessagingConfigChanges,
) -> Result<MessagingConfig>
where
    A: Acquire<'c, Database = Sqlite>,
{
    let mut tx = db.begin().await?;
    let user_id = new.user_id.clone();
    let config = match find_by_user(&mut *tx, &user_id).await? {
        Some(existing) => {
            crud::update::<MessagingConfig, _>(&mut *tx, &existing.id, changes).await?
        }
        None => crud::create(&mut *tx, new).await?,
    };
    tx.commit().await?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::db::test_pool;
    use crate::model::NewUser;

    #[tokio::test]
    async fn upsert_then_ready() {
        let pool = test_pool().await;
        let user = crud::create(&pool, NewUser::new("ana@example.com", "Ana"))
            .await
            .unwrap();
        let mut new = NewMessagingConfig::for_user(&user.id);
        new.evolution_base_url = Some("https://evo.example.com/".into());
        new.evolution_instance_name = Some("main".into());

        let created = upsert(&pool, new.clone(), MessagingConfigChanges::default())
            .await
            .unwrap();
        assert_eq!(created.evolution_base_url.as_deref(), Some("https://evo.example.com"));
        assert!(!created.is_ready());

        let changes = MessagingConfigChanges {
            evolution_api_key: Some(Some("evo-key".into())),
            evolution_enabled: Some(true),
            ..Default::default()
        };
        let updated = upsert(&pool, new, changes).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert!(updated.is_ready());

        let agg = crud::aggregate::<MessagingConfig, _>(&pool, &MessagingConfigFilter::default())
            .await
            .unwrap();
        assert_eq!((agg.count, agg.enabled), (1, 1));
    }

    #[tokio::test]
    async fn second_config_for_user_is_rejected() {
        let pool = test_pool().await;
        let user = crud::create(&pool, NewUser::new("ana@example.com", "Ana"))
            .await
            .unwrap();
        crud::create(&pool, NewMessagingConfig::for_user(&user.id))
            .await
            .unwrap();
        let err = crud::create(&pool, NewMessagingConfig::for_user(&user.id))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
        assert!(find_by_user(&pool, &user.id).await.unwrap().is_some());
    }
}
