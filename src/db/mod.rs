//! Database layer: pool setup, the generic delegate operations and one
//! repository module per entity.
//!
//! The delegate operations live in `crud` and are re-exported here, so
//! callers write `db::find_many::<Project, _>(&pool, &query)`. Entity
//! modules add the lookups that only make sense for that entity
//! (`db::user::find_by_email`, `db::reminder::due`, ...).

use crate::config;
use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

pub mod ai_config;
pub mod appointment;
pub mod company;
pub mod crud;
pub mod messaging_config;
pub mod project;
pub mod query;
pub mod reminder;
pub mod user;

pub use ai_config::{AiConfigAggregate, AiConfigField, AiConfigFilter};
pub use appointment::{AppointmentAggregate, AppointmentField, AppointmentFilter};
pub use company::{CompanyAggregate, CompanyField, CompanyFilter};
pub use crud::{
    aggregate, count, create, create_many, delete, delete_many, find_first, find_first_or_throw,
    find_many, find_unique, find_unique_or_throw, group_by, update, update_many, Insert, Record,
};
pub use messaging_config::{MessagingConfigAggregate, MessagingConfigField, MessagingConfigFilter};
pub use project::{ProjectAggregate, ProjectField, ProjectFilter};
pub use query::{FindMany, OrderBy, SortOrder};
pub use reminder::{ReminderAggregate, ReminderField, ReminderFilter};
pub use user::{UserAggregate, UserField, UserFilter};

pub type Pool = SqlitePool;

/// Open the pool with WAL, full sync and foreign keys on.
#[instrument(skip_all)]
pub async fn init_pool(database_url: &str, settings: &config::Database) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(settings.busy_timeout_ms));

    // Every connection to `sqlite::memory:` is its own database.
    let memory = is_memory_url(&normalized);
    let mut pool = SqlitePoolOptions::new().max_connections(if memory {
        1
    } else {
        settings.max_connections
    });
    if memory {
        pool = pool.idle_timeout(None).max_lifetime(None);
    }
    let pool = pool.connect_with(options).await?;
    info!(url = %normalized, "database pool ready");
    Ok(pool)
}

fn is_memory_url(url: &str) -> bool {
    url.starts_with("sqlite::memory") || url.contains("mode=memory")
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched.
pub(crate) fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || is_memory_url(url) {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

#[instrument(skip_all)]
pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("migrations applied");
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> Pool {
    let pool = init_pool("sqlite::memory:", &config::Database::default())
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("sqlite:file:test?mode=memory&cache=shared"),
            "sqlite:file:test?mode=memory&cache=shared"
        );
    }

    #[test]
    fn file_url_creates_parent_dir() {
        let td = tempdir().unwrap();
        let db = td.path().join("nested/dir/store.db");
        let url = format!("sqlite:{}?mode=rwc", db.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, format!("sqlite://{}?mode=rwc", db.display()));
        assert!(db.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn file_pool_enforces_foreign_keys() {
        let td = tempdir().unwrap();
        let url = format!("sqlite://{}/store.db", td.path().display());
        let pool = init_pool(&url, &config::Database::default()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let (on,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(on, 1);
    }
}
