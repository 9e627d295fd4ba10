use super::crud::{self, Insert, Record};
use super::query::{Assignments, Changeset, Column, Filter, FindMany, OrderBy, Where};
use crate::error::Result;
use crate::model::{ListUpdate, NewProject, Project, ProjectChanges};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{Acquire, Sqlite, SqliteConnection};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub title_contains: Option<String>,
    pub featured: Option<bool>,
    pub uses_technology: Option<String>,
}

impl ProjectFilter {
    pub fn owned_by(user_id: &str) -> Self {
        ProjectFilter {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }
}

impl Filter for ProjectFilter {
    fn apply(&self, w: &mut Where<'_, '_>) {
        w.eq_opt("id", &self.id);
        w.eq_opt("user_id", &self.user_id);
        if let Some(s) = &self.title_contains {
            w.contains("title", s);
        }
        w.eq_opt("featured", &self.featured);
        if let Some(t) = &self.uses_technology {
            w.has("technologies", t);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectField {
    Id,
    Title,
    Featured,
    UserId,
    CreatedAt,
}

impl Column for ProjectField {
    fn column(&self) -> &'static str {
        match self {
            ProjectField::Id => "id",
            ProjectField::Title => "title",
            ProjectField::Featured => "featured",
            ProjectField::UserId => "user_id",
            ProjectField::CreatedAt => "created_at",
        }
    }

    fn group_expr(&self) -> &'static str {
        match self {
            ProjectField::Featured => "CASE WHEN featured THEN 'true' ELSE 'false' END",
            ProjectField::CreatedAt => "date(created_at)",
            other => other.column(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAggregate {
    pub count: i64,
    pub featured: i64,
    pub first_created_at: Option<DateTime<Utc>>,
    pub last_created_at: Option<DateTime<Utc>>,
}

impl Record for Project {
    const ENTITY: &'static str = "Project";
    const TABLE: &'static str = "projects";
    const AGGREGATE: &'static str = "COUNT(*) AS count, \
         COALESCE(SUM(featured), 0) AS featured, \
         MIN(created_at) AS first_created_at, \
         MAX(created_at) AS last_created_at";

    type Filter = ProjectFilter;
    type Field = ProjectField;
    type Changes = ProjectChanges;
    type Aggregate = ProjectAggregate;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Changeset for ProjectChanges {
    fn prepare(&mut self) -> Result<()> {
        ProjectChanges::prepare(self)
    }

    fn apply(&self, set: &mut Assignments<'_, '_>) {
        set.set_opt("title", &self.title);
        set.set_opt("description", &self.description);
        set.list("technologies", &self.technologies);
        set.set_opt("featured", &self.featured);
        set.set_opt("image_url", &self.image_url);
        set.set_opt("project_url", &self.project_url);
        set.set_opt("repository_url", &self.repository_url);
    }
}

#[async_trait]
impl Insert for NewProject {
    type Output = Project;

    fn prepare(&mut self) -> Result<()> {
        NewProject::prepare(self)
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<Project> {
        let now = Utc::now();
        let project = sqlx::query_as::<_, Project>(
            "INSERT INTO projects (id, title, description, technologies, featured, image_url, project_url, repository_url, user_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(self.title.as_str())
        .bind(self.description.as_deref())
        .bind(Json(&self.technologies))
        .bind(self.featured)
        .bind(self.image_url.as_deref())
        .bind(self.project_url.as_deref())
        .bind(self.repository_url.as_deref())
        .bind(self.user_id.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        Ok(project)
    }
}

/// Featured projects of a user, newest first.
pub async fn featured<'c, A>(db: A, user_id: &str) -> Result<Vec<Project>>
where
    A: Acquire<'c, Database = Sqlite>,
{
    let q = FindMany::new(ProjectFilter {
        user_id: Some(user_id.to_string()),
        featured: Some(true),
        ..Default::default()
    })
    .order_by(OrderBy::desc(ProjectField::CreatedAt));
    crud::find_many::<Project, A>(db, &q).await
}

/// Append technologies, keeping the existing ones and their order.
pub async fn push_technologies<'c, A, I, S>(db: A, id: &str, technologies: I) -> Result<Project>
where
    A: Acquire<'c, Database = Sqlite>,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let changes = ProjectChanges {
        technologies: Some(ListUpdate::Push(
            technologies.into_iter().map(Into::into).collect(),
        )),
        ..Default::default()
    };
    crud::update::<Project, A>(db, id, changes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::model::NewUser;

    #[tokio::test]
    async fn push_then_set_technologies() {
        let pool = test_pool().await;
        let user = crud::create(&pool, NewUser::new("ana@example.com", "Ana"))
            .await
            .unwrap();
        let mut new = NewProject::new(&user.id, "site");
        new.technologies = vec!["rust".into(), "sqlite".into()];
        let project = crud::create(&pool, new).await.unwrap();

        let project = push_technologies(&pool, &project.id, ["axum", "htmx"])
            .await
            .unwrap();
        assert_eq!(project.technologies, vec!["rust", "sqlite", "axum", "htmx"]);

        let changes = ProjectChanges {
            technologies: Some(ListUpdate::Set(vec!["go".into()])),
            ..Default::default()
        };
        let project = crud::update::<Project, _>(&pool, &project.id, changes)
            .await
            .unwrap();
        assert_eq!(project.technologies, vec!["go"]);
    }

    #[tokio::test]
    async fn featured_and_aggregate() {
        let pool = test_pool().await;
        let user = crud::create(&pool, NewUser::new("ana@example.com", "Ana"))
            .await
            .unwrap();
        for (title, featured) in [("a", true), ("b", false), ("c", true)] {
            let mut new = NewProject::new(&user.id, title);
            new.featured = featured;
            crud::create(&pool, new).await.unwrap();
        }

        let list = featured(&pool, &user.id).await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|p| p.featured));

        let agg = crud::aggregate::<Project, _>(&pool, &ProjectFilter::owned_by(&user.id))
            .await
            .unwrap();
        assert_eq!(agg.count, 3);
        assert_eq!(agg.featured, 2);
        assert!(agg.first_created_at <= agg.last_created_at);

        let groups = crud::group_by::<Project, _>(&pool, ProjectField::Featured, &ProjectFilter::default())
            .await
            .unwrap();
        let keys: Vec<_> = groups.iter().map(|g| (g.key.as_deref(), g.count)).collect();
        assert_eq!(keys, vec![(Some("false"), 1), (Some("true"), 2)]);
    }
}
