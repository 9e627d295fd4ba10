use super::crud::{self, Insert, Record};
use super::query::{Assignments, Changeset, Column, Filter, FindMany, OrderBy, Where};
use crate::error::Result;
use crate::model::{NewReminder, Reminder, ReminderChanges};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Acquire, Sqlite, SqliteConnection};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ReminderFilter {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub title_contains: Option<String>,
    pub completed: Option<bool>,
    /// Due at or after.
    pub due_from: Option<DateTime<Utc>>,
    /// Due at or before.
    pub due_until: Option<DateTime<Utc>>,
}

impl ReminderFilter {
    pub fn owned_by(user_id: &str) -> Self {
        ReminderFilter {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }
}

impl Filter for ReminderFilter {
    fn apply(&self, w: &mut Where<'_, '_>) {
        w.eq_opt("id", &self.id);
        w.eq_opt("user_id", &self.user_id);
        if let Some(s) = &self.title_contains {
            w.contains("title", s);
        }
        w.eq_opt("completed", &self.completed);
        if let Some(t) = self.due_from {
            w.cmp("due_date", ">=", t);
        }
        if let Some(t) = self.due_until {
            w.cmp("due_date", "<=", t);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderField {
    Id,
    Title,
    DueDate,
    Completed,
    UserId,
    CreatedAt,
}

impl Column for ReminderField {
    fn column(&self) -> &'static str {
        match self {
            ReminderField::Id => "id",
            ReminderField::Title => "title",
            ReminderField::DueDate => "due_date",
            ReminderField::Completed => "completed",
            ReminderField::UserId => "user_id",
            ReminderField::CreatedAt => "created_at",
        }
    }

    fn group_expr(&self) -> &'static str {
        match self {
            ReminderField::DueDate => "date(due_date)",
            ReminderField::Completed => "CASE WHEN completed THEN 'true' ELSE 'false' END",
            ReminderField::CreatedAt => "date(created_at)",
            other => other.column(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReminderAggregate {
    pub count: i64,
    pub completed: i64,
    pub earliest_due: Option<DateTime<Utc>>,
    pub latest_due: Option<DateTime<Utc>>,
}

impl Record for Reminder {
    const ENTITY: &'static str = "Reminder";
    const TABLE: &'static str = "reminders";
    const AGGREGATE: &'static str = "COUNT(*) AS count, \
         COALESCE(SUM(completed), 0) AS completed, \
         MIN(due_date) AS earliest_due, \
         MAX(due_date) AS latest_due";

    type Filter = ReminderFilter;
    type Field = ReminderField;
    type Changes = ReminderChanges;
    type Aggregate = ReminderAggregate;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Changeset for ReminderChanges {
    fn prepare(&mut self) -> Result<()> {
        ReminderChanges::prepare(self)
    }

    fn apply(&self, set: &mut Assignments<'_, '_>) {
        set.set_opt("title", &self.title);
        set.set_opt("description", &self.description);
        set.set_opt("due_date", &self.due_date);
        set.set_opt("completed", &self.completed);
    }
}

#[async_trait]
impl Insert for NewReminder {
    type Output = Reminder;

    fn prepare(&mut self) -> Result<()> {
        NewReminder::prepare(self)
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<Reminder> {
        let now = Utc::now();
        let reminder = sqlx::query_as::<_, Reminder>(
            "INSERT INTO reminders (id, title, description, due_date, completed, user_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(self.title.as_str())
        .bind(self.description.as_deref())
        .bind(self.due_date)
        .bind(self.completed)
        .bind(self.user_id.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        Ok(reminder)
    }
}

#[instrument(skip_all, fields(id = %id))]
pub async fn complete<'c, A>(db: A, id: &str) -> Result<Reminder>
where
    A: Acquire<'c, Database = Sqlite>,
{
    let changes = ReminderChanges {
        completed: Some(true),
        ..Default::default()
    };
    crud::update::<Reminder, A>(db, id, changes).await
}

/// Pending reminders of `user_id` due at or before `at`, earliest first.
#[instrument(skip_all)]
pub async fn due<'c, A>(db: A, user_id: &str, at: DateTime<Utc>) -> Result<Vec<Reminder>>
where
    A: Acquire<'c, Database = Sqlite>,
{
    let q = FindMany::new(ReminderFilter {
        user_id: Some(user_id.to_string()),
        completed: Some(false),
        due_until: Some(at),
        ..Default::default()
    })
    .order_by(OrderBy::asc(ReminderField::DueDate));
    crud::find_many::<Reminder, A>(db, &q).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::model::NewUser;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn due_skips_completed_and_future() {
        let pool = test_pool().await;
        let user = crud::create(&pool, NewUser::new("ana@example.com", "Ana"))
            .await
            .unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();

        let late = crud::create(&pool, NewReminder::new(&user.id, "late", now - Duration::hours(2)))
            .await
            .unwrap();
        let done = crud::create(&pool, NewReminder::new(&user.id, "done", now - Duration::hours(3)))
            .await
            .unwrap();
        let on_time = crud::create(&pool, NewReminder::new(&user.id, "now", now))
            .await
            .unwrap();
        crud::create(&pool, NewReminder::new(&user.id, "later", now + Duration::days(1)))
            .await
            .unwrap();

        let done = complete(&pool, &done.id).await.unwrap();
        assert!(done.completed);

        let ids: Vec<String> = due(&pool, &user.id, now)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![late.id, on_time.id]);
    }

    #[tokio::test]
    async fn group_by_due_day() {
        let pool = test_pool().await;
        let user = crud::create(&pool, NewUser::new("ana@example.com", "Ana"))
            .await
            .unwrap();
        let day = Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap();
        for offset in [0, 3, 26] {
            crud::create(&pool, NewReminder::new(&user.id, "r", day + Duration::hours(offset)))
                .await
                .unwrap();
        }
        let groups = crud::group_by::<Reminder, _>(&pool, ReminderField::DueDate, &ReminderFilter::default())
            .await
            .unwrap();
        let got: Vec<_> = groups.iter().map(|g| (g.key.clone().unwrap(), g.count)).collect();
        assert_eq!(
            got,
            vec![("2026-10-18".to_string(), 2), ("2026-10-19".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn complete_unknown_is_not_found() {
        let pool = test_pool().await;
        let err = complete(&pool, "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
