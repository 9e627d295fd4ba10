//! Users: the root of every ownership chain.
use super::company::CompanyFilter;
use super::crud::{self, Insert, Record};
use super::project::{ProjectField, ProjectFilter};
use super::query::{Assignments, Changeset, Column, Filter, FindMany, OrderBy, Where};
use super::{appointment::AppointmentField, appointment::AppointmentFilter};
use super::{reminder::ReminderField, reminder::ReminderFilter};
use crate::error::Result;
use crate::model::{
    normalize_email, AiConfig, Appointment, Company, Include, ListUpdate, MessagingConfig,
    NewUser, Project, Reminder, User, UserChanges, UserWithRelations,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{Acquire, Sqlite, SqliteConnection};
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub id: Option<String>,
    pub email: Option<String>,
    pub email_contains: Option<String>,
    pub name_contains: Option<String>,
    pub location: Option<String>,
    pub has_skill: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub has_company: Option<bool>,
    pub has_ai_config: Option<bool>,
    pub has_messaging_config: Option<bool>,
}

impl UserFilter {
    pub fn by_email(email: &str) -> Self {
        UserFilter {
            email: Some(normalize_email(email)),
            ..Default::default()
        }
    }
}

fn owns(w: &mut Where<'_, '_>, table: &str, wanted: Option<bool>) {
    let Some(wanted) = wanted else { return };
    let not = if wanted { "" } else { "NOT " };
    w.raw(&format!(
        "{not}EXISTS (SELECT 1 FROM {table} WHERE {table}.user_id = users.id)"
    ));
}

impl Filter for UserFilter {
    fn apply(&self, w: &mut Where<'_, '_>) {
        w.eq_opt("id", &self.id);
        w.eq_opt("email", &self.email);
        if let Some(s) = &self.email_contains {
            w.contains("email", s);
        }
        if let Some(s) = &self.name_contains {
            w.contains("name", s);
        }
        w.eq_opt("location", &self.location);
        if let Some(skill) = &self.has_skill {
            w.has("skills", skill);
        }
        if let Some(t) = self.created_after {
            w.cmp("created_at", ">=", t);
        }
        if let Some(t) = self.created_before {
            w.cmp("created_at", "<", t);
        }
        owns(w, "companies", self.has_company);
        owns(w, "ai_configs", self.has_ai_config);
        owns(w, "messaging_configs", self.has_messaging_config);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Id,
    Email,
    Name,
    Location,
    CreatedAt,
    UpdatedAt,
}

impl Column for UserField {
    fn column(&self) -> &'static str {
        match self {
            UserField::Id => "id",
            UserField::Email => "email",
            UserField::Name => "name",
            UserField::Location => "location",
            UserField::CreatedAt => "created_at",
            UserField::UpdatedAt => "updated_at",
        }
    }

    fn group_expr(&self) -> &'static str {
        match self {
            UserField::CreatedAt => "date(created_at)",
            UserField::UpdatedAt => "date(updated_at)",
            other => other.column(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserAggregate {
    pub count: i64,
    pub first_created_at: Option<DateTime<Utc>>,
    pub last_created_at: Option<DateTime<Utc>>,
}

impl Record for User {
    const ENTITY: &'static str = "User";
    const TABLE: &'static str = "users";
    const AGGREGATE: &'static str = "COUNT(*) AS count, \
         MIN(created_at) AS first_created_at, \
         MAX(created_at) AS last_created_at";

    type Filter = UserFilter;
    type Field = UserField;
    type Changes = UserChanges;
    type Aggregate = UserAggregate;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Changeset for UserChanges {
    fn prepare(&mut self) -> Result<()> {
        UserChanges::prepare(self)
    }

    fn apply(&self, set: &mut Assignments<'_, '_>) {
        set.set_opt("email", &self.email);
        set.set_opt("name", &self.name);
        set.set_opt("title", &self.title);
        set.set_opt("bio", &self.bio);
        set.set_opt("avatar_url", &self.avatar_url);
        set.set_opt("phone", &self.phone);
        set.set_opt("location", &self.location);
        set.set_opt("website", &self.website);
        set.list("skills", &self.skills);
    }
}

#[async_trait]
impl Insert for NewUser {
    type Output = User;

    fn prepare(&mut self) -> Result<()> {
        NewUser::prepare(self)
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<User> {
        let now = Utc::now();
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, email, name, title, bio, avatar_url, phone, location, website, skills, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(self.email.as_str())
        .bind(self.name.as_str())
        .bind(self.title.as_deref())
        .bind(self.bio.as_deref())
        .bind(self.avatar_url.as_deref())
        .bind(self.phone.as_deref())
        .bind(self.location.as_deref())
        .bind(self.website.as_deref())
        .bind(Json(&self.skills))
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        Ok(user)
    }
}

#[instrument(skip_all)]
pub async fn find_by_email<'c, A>(db: A, email: &str) -> Result<Option<User>>
where
    A: Acquire<'c, Database = Sqlite>,
{
    crud::find_first::<User, A>(db, &UserFilter::by_email(email), &[]).await
}

/// Update the user matching `new.email`, or create it from `new` when absent.
#[instrument(skip_all)]
pub async fn upsert<'c, A>(db: A, new: NewUser, changes: UserChanges) -> Result<User>
where
    A: Acquire<'c, Database = Sqlite>,
{
    let mut tx = db.begin().await?;
    let email = new.email.clone();
    let user = match find_by_email(&mut *tx, &email).await? {
        Some(existing) => crud::update::<User, _>(&mut *tx, &existing.id, changes).await?,
        None => crud::create(&mut *tx, new).await?,
    };
    tx.commit().await?;
    Ok(user)
}

/// Append skills, keeping the existing ones and their order.
pub async fn push_skills<'c, A, I, S>(db: A, id: &str, skills: I) -> Result<User>
where
    A: Acquire<'c, Database = Sqlite>,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let changes = UserChanges {
        skills: Some(ListUpdate::Push(skills.into_iter().map(Into::into).collect())),
        ..Default::default()
    };
    crud::update::<User, A>(db, id, changes).await
}

/// Load a user and the relations selected in `include` from one snapshot.
#[instrument(skip_all, fields(id = %id))]
pub async fn find_with_relations<'c, A>(
    db: A,
    id: &str,
    include: Include,
) -> Result<Option<UserWithRelations>>
where
    A: Acquire<'c, Database = Sqlite>,
{
    let mut tx = db.begin().await?;
    let Some(user) = crud::find_unique::<User, _>(&mut *tx, id).await? else {
        return Ok(None);
    };

    let company = if include.company {
        Some(crud::find_by_user::<Company, _>(&mut *tx, id).await?)
    } else {
        None
    };
    let projects = if include.projects {
        let q = FindMany::new(ProjectFilter::owned_by(id))
            .order_by(OrderBy::desc(ProjectField::CreatedAt));
        Some(crud::find_many::<Project, _>(&mut *tx, &q).await?)
    } else {
        None
    };
    let reminders = if include.reminders {
        let q = FindMany::new(ReminderFilter::owned_by(id))
            .order_by(OrderBy::asc(ReminderField::DueDate));
        Some(crud::find_many::<Reminder, _>(&mut *tx, &q).await?)
    } else {
        None
    };
    let appointments = if include.appointments {
        let q = FindMany::new(AppointmentFilter::owned_by(id))
            .order_by(OrderBy::asc(AppointmentField::StartTime));
        Some(crud::find_many::<Appointment, _>(&mut *tx, &q).await?)
    } else {
        None
    };
    let ai_config = if include.ai_config {
        Some(crud::find_by_user::<AiConfig, _>(&mut *tx, id).await?)
    } else {
        None
    };
    let messaging_config = if include.messaging_config {
        Some(crud::find_by_user::<MessagingConfig, _>(&mut *tx, id).await?)
    } else {
        None
    };
    tx.commit().await?;
    debug!("loaded user with relations");

    Ok(Some(UserWithRelations {
        user,
        company,
        projects,
        reminders,
        appointments,
        ai_config,
        messaging_config,
    }))
}

/// Users that own a company whose name contains `needle`.
pub async fn find_by_company_name<'c, A>(db: A, needle: &str) -> Result<Vec<User>>
where
    A: Acquire<'c, Database = Sqlite>,
{
    let mut tx = db.begin().await?;
    let companies = crud::find_many::<Company, _>(
        &mut *tx,
        &FindMany::new(CompanyFilter {
            name_contains: Some(needle.to_string()),
            ..Default::default()
        }),
    )
    .await?;
    let mut users = Vec::with_capacity(companies.len());
    for company in companies {
        if let Some(user) = crud::find_unique::<User, _>(&mut *tx, &company.user_id).await? {
            users.push(user);
        }
    }
    tx.commit().await?;
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::error::StoreError;

    #[tokio::test]
    async fn create_and_find_by_email() {
        let pool = test_pool().await;
        let created = crud::create(&pool, NewUser::new("Ana@Example.com", "Ana"))
            .await
            .unwrap();
        assert_eq!(created.email, "ana@example.com");
        assert!(created.skills.is_empty());

        let found = find_by_email(&pool, "ANA@example.com").await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(find_by_email(&pool, "nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_email_never_reaches_the_database() {
        let pool = test_pool().await;
        let err = crud::create(&pool, NewUser::new("not-an-email", "Ana"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(crud::count::<User, _>(&pool, &UserFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let pool = test_pool().await;
        let changes = UserChanges {
            name: Some("Ana Maria".into()),
            ..Default::default()
        };
        let first = upsert(&pool, NewUser::new("ana@example.com", "Ana"), changes.clone())
            .await
            .unwrap();
        assert_eq!(first.name, "Ana");

        let second = upsert(&pool, NewUser::new(" ANA@example.com", "Ana"), changes)
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.name, "Ana Maria");
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn clearing_a_nullable_field() {
        let pool = test_pool().await;
        let mut new = NewUser::new("ana@example.com", "Ana");
        new.bio = Some("hello".into());
        let user = crud::create(&pool, new).await.unwrap();

        let changes = UserChanges {
            bio: Some(None),
            ..Default::default()
        };
        let user = crud::update::<User, _>(&pool, &user.id, changes).await.unwrap();
        assert_eq!(user.bio, None);
    }

    #[tokio::test]
    async fn relation_filters() {
        let pool = test_pool().await;
        let a = crud::create(&pool, NewUser::new("a@example.com", "A")).await.unwrap();
        crud::create(&pool, NewUser::new("b@example.com", "B")).await.unwrap();
        crud::create(&pool, crate::model::NewCompany::new(&a.id, "Acme")).await.unwrap();

        let with_company = crud::find_many::<User, _>(
            &pool,
            &FindMany::new(UserFilter {
                has_company: Some(true),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(with_company.len(), 1);
        assert_eq!(with_company[0].id, a.id);

        let without = crud::count::<User, _>(
            &pool,
            &UserFilter {
                has_company: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(without, 1);

        let by_company = find_by_company_name(&pool, "acm").await.unwrap();
        assert_eq!(by_company.len(), 1);
    }
}
