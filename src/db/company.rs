use super::crud::{self, ensure_vacant, Insert, Record};
use super::query::{Assignments, Changeset, Column, Filter, Where};
use crate::error::Result;
use crate::model::{Company, CompanyChanges, ListUpdate, NewCompany};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{Acquire, Sqlite, SqliteConnection};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct CompanyFilter {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub name_contains: Option<String>,
    pub industry: Option<String>,
    pub offers_service: Option<String>,
}

impl Filter for CompanyFilter {
    fn apply(&self, w: &mut Where<'_, '_>) {
        w.eq_opt("id", &self.id);
        w.eq_opt("user_id", &self.user_id);
        if let Some(s) = &self.name_contains {
            w.contains("name", s);
        }
        w.eq_opt("industry", &self.industry);
        if let Some(s) = &self.offers_service {
            w.has("services", s);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanyField {
    Id,
    Name,
    Industry,
    CreatedAt,
}

impl Column for CompanyField {
    fn column(&self) -> &'static str {
        match self {
            CompanyField::Id => "id",
            CompanyField::Name => "name",
            CompanyField::Industry => "industry",
            CompanyField::CreatedAt => "created_at",
        }
    }

    fn group_expr(&self) -> &'static str {
        match self {
            CompanyField::CreatedAt => "date(created_at)",
            other => other.column(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CompanyAggregate {
    pub count: i64,
    pub first_created_at: Option<DateTime<Utc>>,
    pub last_created_at: Option<DateTime<Utc>>,
}

impl Record for Company {
    const ENTITY: &'static str = "Company";
    const TABLE: &'static str = "companies";
    const AGGREGATE: &'static str = "COUNT(*) AS count, \
         MIN(created_at) AS first_created_at, \
         MAX(created_at) AS last_created_at";

    type Filter = CompanyFilter;
    type Field = CompanyField;
    type Changes = CompanyChanges;
    type Aggregate = CompanyAggregate;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Changeset for CompanyChanges {
    fn prepare(&mut self) -> Result<()> {
        CompanyChanges::prepare(self)
    }

    fn apply(&self, set: &mut Assignments<'_, '_>) {
        set.set_opt("name", &self.name);
        set.set_opt("description", &self.description);
        set.set_opt("industry", &self.industry);
        set.set_opt("website", &self.website);
        set.set_opt("logo_url", &self.logo_url);
        set.set_opt("email", &self.email);
        set.set_opt("phone", &self.phone);
        set.set_opt("address", &self.address);
        set.list("services", &self.services);
    }
}

#[async_trait]
impl Insert for NewCompany {
    type Output = Company;

    fn prepare(&mut self) -> Result<()> {
        NewCompany::prepare(self)
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<Company> {
        ensure_vacant(conn, Company::TABLE, &self.user_id).await?;
        let now = Utc::now();
        let company = sqlx::query_as::<_, Company>(
            "INSERT INTO companies (id, name, description, industry, website, logo_url, email, phone, address, services, user_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(self.name.as_str())
        .bind(self.description.as_deref())
        .bind(self.industry.as_deref())
        .bind(self.website.as_deref())
        .bind(self.logo_url.as_deref())
        .bind(self.email.as_deref())
        .bind(self.phone.as_deref())
        .bind(self.address.as_deref())
        .bind(Json(&self.services))
        .bind(self.user_id.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        Ok(company)
    }
}

#[instrument(skip_all)]
pub async fn find_by_user<'c, A>(db: A, user_id: &str) -> Result<Option<Company>>
where
    A: Acquire<'c, Database = Sqlite>,
{
    crud::find_by_user::<Company, A>(db, user_id).await
}

/// Update the company owned by `new.user_id`, or create it from `new` when absent.
#[instrument(skip_all)]
pub async fn upsert<'c, A>(
    db: A,
    new: NewCompany,
    changes: CompanyChanges,
) -> Result<Company>
where
    A: Acquire<'c, Database = Sqlite>,
{
    let mut tx = db.begin().await?;
    let user_id = new.user_id.clone();
    let company = match find_by_user(&mut *tx, &user_id).await? {
        Some(existing) => crud::update::<Company, _>(&mut *tx, &existing.id, changes).await?,
        None => crud::create(&mut *tx, new).await?,
    };
    tx.commit().await?;
    Ok(company)
}

/// Append services, keeping the existing ones and their order.
pub async fn push_services<'c, A, I, S>(db: A, id: &str, services: I) -> Result<Company>
where
    A: Acquire<'c, Database = Sqlite>,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let changes = CompanyChanges {
        services: Some(ListUpdate::Push(
            services.into_iter().map(Into::into).collect(),
        )),
        ..Default::default()
    };
    crud::update::<Company, A>(db, id, changes).await
}
