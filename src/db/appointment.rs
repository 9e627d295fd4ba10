use super::crud::{self, Insert, Record};
use super::query::{Assignments, Changeset, Column, Filter, FindMany, OrderBy, Where};
use crate::error::Result;
use crate::model::{Appointment, AppointmentChanges, NewAppointment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Acquire, Sqlite, SqliteConnection};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub title_contains: Option<String>,
    pub location: Option<String>,
    /// Starts at or after.
    pub starts_from: Option<DateTime<Utc>>,
    /// Starts strictly before.
    pub starts_before: Option<DateTime<Utc>>,
    /// Ends strictly after.
    pub ends_after: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    pub fn owned_by(user_id: &str) -> Self {
        AppointmentFilter {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }
}

impl Filter for AppointmentFilter {
    fn apply(&self, w: &mut Where<'_, '_>) {
        w.eq_opt("id", &self.id);
        w.eq_opt("user_id", &self.user_id);
        if let Some(s) = &self.title_contains {
            w.contains("title", s);
        }
        w.eq_opt("location", &self.location);
        if let Some(t) = self.starts_from {
            w.cmp("start_time", ">=", t);
        }
        if let Some(t) = self.starts_before {
            w.cmp("start_time", "<", t);
        }
        if let Some(t) = self.ends_after {
            w.cmp("end_time", ">", t);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentField {
    Id,
    Title,
    StartTime,
    EndTime,
    Location,
    UserId,
}

impl Column for AppointmentField {
    fn column(&self) -> &'static str {
        match self {
            AppointmentField::Id => "id",
            AppointmentField::Title => "title",
            AppointmentField::StartTime => "start_time",
            AppointmentField::EndTime => "end_time",
            AppointmentField::Location => "location",
            AppointmentField::UserId => "user_id",
        }
    }

    fn group_expr(&self) -> &'static str {
        match self {
            AppointmentField::StartTime => "date(start_time)",
            AppointmentField::EndTime => "date(end_time)",
            other => other.column(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentAggregate {
    pub count: i64,
    pub first_start: Option<DateTime<Utc>>,
    pub last_end: Option<DateTime<Utc>>,
}

impl Record for Appointment {
    const ENTITY: &'static str = "Appointment";
    const TABLE: &'static str = "appointments";
    const AGGREGATE: &'static str = "COUNT(*) AS count, \
         MIN(start_time) AS first_start, \
         MAX(end_time) AS last_end";

    type Filter = AppointmentFilter;
    type Field = AppointmentField;
    type Changes = AppointmentChanges;
    type Aggregate = AppointmentAggregate;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Changeset for AppointmentChanges {
    fn prepare(&mut self) -> Result<()> {
        AppointmentChanges::prepare(self)
    }

    // The table's CHECK constraint covers windows where only one end moves.
    fn apply(&self, set: &mut Assignments<'_, '_>) {
        set.set_opt("title", &self.title);
        set.set_opt("description", &self.description);
        set.set_opt("start_time", &self.start_time);
        set.set_opt("end_time", &self.end_time);
        set.set_opt("location", &self.location);
    }
}

#[async_trait]
impl Insert for NewAppointment {
    type Output = Appointment;

    fn prepare(&mut self) -> Result<()> {
        NewAppointment::prepare(self)
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<Appointment> {
        let now = Utc::now();
        let appointment = sqlx::query_as::<_, Appointment>(
            "INSERT INTO appointments (id, title, description, start_time, end_time, location, user_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(self.title.as_str())
        .bind(self.description.as_deref())
        .bind(self.start_time)
        .bind(self.end_time)
        .bind(self.location.as_deref())
        .bind(self.user_id.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        Ok(appointment)
    }
}

/// Appointments of `user_id` that intersect `[start, end)`, by start time.
#[instrument(skip_all)]
pub async fn overlapping<'c, A>(
    db: A,
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Appointment>>
where
    A: Acquire<'c, Database = Sqlite>,
{
    let q = FindMany::new(AppointmentFilter {
        user_id: Some(user_id.to_string()),
        starts_before: Some(end),
        ends_after: Some(start),
        ..Default::default()
    })
    .order_by(OrderBy::asc(AppointmentField::StartTime));
    crud::find_many::<Appointment, A>(db, &q).await
}

/// The next `take` appointments of `user_id` starting at or after `from`.
#[instrument(skip_all)]
pub async fn upcoming<'c, A>(
    db: A,
    user_id: &str,
    from: DateTime<Utc>,
    take: u32,
) -> Result<Vec<Appointment>>
where
    A: Acquire<'c, Database = Sqlite>,
{
    let q = FindMany::new(AppointmentFilter {
        user_id: Some(user_id.to_string()),
        starts_from: Some(from),
        ..Default::default()
    })
    .order_by(OrderBy::asc(AppointmentField::StartTime))
    .take(take);
    crud::find_many::<Appointment, A>(db, &q).await
}
