//! Generic delegate operations shared by every entity.
//!
//! Every function takes anything that can hand out a SQLite connection: the
//! pool, a pooled connection, or an open transaction (`&mut tx`). Inside a
//! transaction, multi-statement operations nest as savepoints.

use super::query::{
    push_order_by, Assignments, Builder, Changeset, Column, Filter, FindMany, OrderBy, Where,
};
use crate::error::{Result, StoreError};
use crate::model::{BatchPayload, GroupCount};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Acquire, FromRow, Sqlite, SqliteConnection};
use tracing::{debug, info, instrument};

/// Binds an entity struct to its table and query inputs.
pub trait Record: for<'r> FromRow<'r, SqliteRow> + Send + Unpin {
    /// Name used in errors and logs.
    const ENTITY: &'static str;
    const TABLE: &'static str;
    /// Select list for [`aggregate`], aliased to `Self::Aggregate`'s fields.
    const AGGREGATE: &'static str;

    type Filter: Filter + Default;
    type Field: Column;
    type Changes: Changeset;
    type Aggregate: for<'r> FromRow<'r, SqliteRow> + Send + Unpin;

    fn id(&self) -> &str;
}

/// A create payload that knows how to insert itself.
#[async_trait]
pub trait Insert: Send + Sync {
    type Output: Record;

    /// Validate and normalize before any SQL runs.
    fn prepare(&mut self) -> Result<()>;

    /// Insert one row. Called inside a transaction.
    async fn insert(&self, conn: &mut SqliteConnection) -> Result<Self::Output>;
}

#[instrument(skip_all, fields(entity = <N::Output as Record>::ENTITY))]
pub async fn create<'c, N, A>(db: A, mut new: N) -> Result<N::Output>
where
    N: Insert,
    A: Acquire<'c, Database = Sqlite>,
{
    new.prepare()?;
    let mut tx = db.begin().await?;
    let record = new.insert(&mut *tx).await?;
    tx.commit().await?;
    info!(id = record.id(), "created");
    Ok(record)
}

/// Insert all items in one transaction. With `skip_duplicates`, rows rejected
/// by a unique constraint are skipped and not counted; any other failure
/// rolls the whole batch back.
#[instrument(skip_all, fields(entity = <N::Output as Record>::ENTITY, items = items.len()))]
pub async fn create_many<'c, N, A>(
    db: A,
    items: Vec<N>,
    skip_duplicates: bool,
) -> Result<BatchPayload>
where
    N: Insert,
    A: Acquire<'c, Database = Sqlite>,
{
    let mut items = items;
    for item in items.iter_mut() {
        item.prepare()?;
    }
    let mut tx = db.begin().await?;
    let mut count = 0;
    for item in &items {
        match item.insert(&mut *tx).await {
            Ok(_) => count += 1,
            Err(err) if skip_duplicates && err.is_unique_violation() => {
                debug!(%err, "skipping duplicate");
            }
            Err(err) => return Err(err),
        }
    }
    tx.commit().await?;
    info!(count, "created many");
    Ok(BatchPayload { count })
}

#[instrument(skip_all, fields(entity = R::ENTITY))]
pub async fn find_unique<'c, R, A>(db: A, id: &str) -> Result<Option<R>>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    let mut conn = db.acquire().await?;
    let sql = format!("SELECT * FROM {} WHERE id = ?", R::TABLE);
    let row = sqlx::query_as::<_, R>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn find_unique_or_throw<'c, R, A>(db: A, id: &str) -> Result<R>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    find_unique::<R, A>(db, id)
        .await?
        .ok_or_else(|| StoreError::not_found(R::ENTITY, id))
}

#[instrument(skip_all, fields(entity = R::ENTITY))]
pub async fn find_many<'c, R, A>(db: A, query: &FindMany<R::Filter, R::Field>) -> Result<Vec<R>>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    let mut conn = db.acquire().await?;
    let mut qb = Builder::new(format!("SELECT * FROM {}", R::TABLE));
    query.push_sql(R::TABLE, &mut qb);
    let rows = qb.build_query_as::<R>().fetch_all(&mut *conn).await?;
    debug!(rows = rows.len(), "find_many");
    Ok(rows)
}

#[instrument(skip_all, fields(entity = R::ENTITY))]
pub async fn find_first<'c, R, A>(
    db: A,
    filter: &R::Filter,
    order_by: &[OrderBy<R::Field>],
) -> Result<Option<R>>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    let mut conn = db.acquire().await?;
    let mut qb = Builder::new(format!("SELECT * FROM {}", R::TABLE));
    filter.apply(&mut Where::new(&mut qb));
    if !order_by.is_empty() {
        push_order_by(&mut qb, order_by);
    }
    qb.push(" LIMIT 1");
    let row = qb.build_query_as::<R>().fetch_optional(&mut *conn).await?;
    Ok(row)
}

pub async fn find_first_or_throw<'c, R, A>(
    db: A,
    filter: &R::Filter,
    order_by: &[OrderBy<R::Field>],
) -> Result<R>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    find_first::<R, A>(db, filter, order_by)
        .await?
        .ok_or_else(|| StoreError::not_found(R::ENTITY, "first matching row"))
}

#[instrument(skip_all, fields(entity = R::ENTITY))]
pub async fn count<'c, R, A>(db: A, filter: &R::Filter) -> Result<i64>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    let mut conn = db.acquire().await?;
    let mut qb = Builder::new(format!("SELECT COUNT(*) FROM {}", R::TABLE));
    filter.apply(&mut Where::new(&mut qb));
    let (n,): (i64,) = qb.build_query_as().fetch_one(&mut *conn).await?;
    Ok(n)
}

#[instrument(skip_all, fields(entity = R::ENTITY))]
pub async fn aggregate<'c, R, A>(db: A, filter: &R::Filter) -> Result<R::Aggregate>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    let mut conn = db.acquire().await?;
    let mut qb = Builder::new(format!("SELECT {} FROM {}", R::AGGREGATE, R::TABLE));
    filter.apply(&mut Where::new(&mut qb));
    let agg = qb
        .build_query_as::<R::Aggregate>()
        .fetch_one(&mut *conn)
        .await?;
    Ok(agg)
}

/// Row counts per distinct value of `field`, ordered by key (NULL first).
#[instrument(skip_all, fields(entity = R::ENTITY, field = field.column()))]
pub async fn group_by<'c, R, A>(db: A, field: R::Field, filter: &R::Filter) -> Result<Vec<GroupCount>>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    let mut conn = db.acquire().await?;
    let mut qb = Builder::new(format!(
        "SELECT {} AS key, COUNT(*) AS count FROM {}",
        field.group_expr(),
        R::TABLE
    ));
    filter.apply(&mut Where::new(&mut qb));
    qb.push(" GROUP BY key ORDER BY key");
    let groups = qb
        .build_query_as::<GroupCount>()
        .fetch_all(&mut *conn)
        .await?;
    Ok(groups)
}

fn push_set<C: Changeset>(qb: &mut Builder<'_>, changes: &C) {
    let mut set = Assignments::new(qb);
    changes.apply(&mut set);
    set.set("updated_at", Utc::now());
}

#[instrument(skip_all, fields(entity = R::ENTITY, id = %id))]
pub async fn update<'c, R, A>(db: A, id: &str, mut changes: R::Changes) -> Result<R>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    changes.prepare()?;
    let mut conn = db.acquire().await?;
    let mut qb = Builder::new(format!("UPDATE {} SET ", R::TABLE));
    push_set(&mut qb, &changes);
    qb.push(" WHERE id = ")
        .push_bind(id.to_string())
        .push(" RETURNING *");
    let row = qb.build_query_as::<R>().fetch_optional(&mut *conn).await?;
    let row = row.ok_or_else(|| StoreError::not_found(R::ENTITY, id))?;
    info!("updated");
    Ok(row)
}

#[instrument(skip_all, fields(entity = R::ENTITY))]
pub async fn update_many<'c, R, A>(
    db: A,
    filter: &R::Filter,
    mut changes: R::Changes,
) -> Result<BatchPayload>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    changes.prepare()?;
    let mut conn = db.acquire().await?;
    let mut qb = Builder::new(format!("UPDATE {} SET ", R::TABLE));
    push_set(&mut qb, &changes);
    filter.apply(&mut Where::new(&mut qb));
    let count = qb.build().execute(&mut *conn).await?.rows_affected();
    info!(count, "updated many");
    Ok(BatchPayload { count })
}

#[instrument(skip_all, fields(entity = R::ENTITY, id = %id))]
pub async fn delete<'c, R, A>(db: A, id: &str) -> Result<R>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    let mut conn = db.acquire().await?;
    let sql = format!("DELETE FROM {} WHERE id = ? RETURNING *", R::TABLE);
    let row = sqlx::query_as::<_, R>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::not_found(R::ENTITY, id))?;
    info!("deleted");
    Ok(row)
}

#[instrument(skip_all, fields(entity = R::ENTITY))]
pub async fn delete_many<'c, R, A>(db: A, filter: &R::Filter) -> Result<BatchPayload>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    let mut conn = db.acquire().await?;
    let mut qb = Builder::new(format!("DELETE FROM {}", R::TABLE));
    filter.apply(&mut Where::new(&mut qb));
    let count = qb.build().execute(&mut *conn).await?.rows_affected();
    info!(count, "deleted many");
    Ok(BatchPayload { count })
}

/// Fetch the row owned by `user_id` from a one-to-one table.
pub(crate) async fn find_by_user<'c, R, A>(db: A, user_id: &str) -> Result<Option<R>>
where
    R: Record,
    A: Acquire<'c, Database = Sqlite>,
{
    let mut conn = db.acquire().await?;
    let sql = format!("SELECT * FROM {} WHERE user_id = ?", R::TABLE);
    let row = sqlx::query_as::<_, R>(&sql)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

/// One-to-one tables allow a single row per user. Checked before insert so
/// the caller gets a typed error even where the constraint is missing.
pub(crate) async fn ensure_vacant(
    conn: &mut SqliteConnection,
    table: &'static str,
    user_id: &str,
) -> Result<()> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE user_id = ?)");
    let (taken,): (i64,) = sqlx::query_as(&sql)
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
    if taken != 0 {
        return Err(StoreError::unique(format!("{table}.user_id")));
    }
    Ok(())
}
