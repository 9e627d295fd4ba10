use anyhow::{anyhow, Context, Result};
use assistant_store::config::{self, Config};
use assistant_store::db::{self, FindMany, OrderBy, Pool, ProjectField, UserField, UserFilter};
use assistant_store::model::{
    AiConfig, Appointment, Company, Include, MessagingConfig, NewUser, Project, Reminder, User,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures::{stream, StreamExt, TryStreamExt};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Users are exported in pages of this size, ordered by creation time.
const EXPORT_PAGE: u32 = 100;

#[derive(Debug, Parser)]
#[command(author, version, about = "Manage the assistant's SQLite store")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending migrations
    Migrate,
    /// Print an example config.yaml
    ExampleConfig,
    /// Manage users
    #[command(subcommand)]
    User(UserCommand),
    /// Reminder queries
    #[command(subcommand)]
    Reminders(ReminderCommand),
    /// Row counts and aggregates as JSON
    Stats,
    /// Write every user with all relations as JSON lines to stdout
    Export,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        location: Option<String>,
        /// Repeat to add several skills
        #[arg(long = "skill")]
        skills: Vec<String>,
    },
    List {
        /// Substring of the email address
        #[arg(long)]
        email_contains: Option<String>,
        #[arg(long)]
        skill: Option<String>,
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(long, default_value_t = 20)]
        take: u32,
    },
    /// Show one user, by id or email, with all relations
    Show { key: String },
    /// Delete a user and everything it owns
    Delete { id: String },
}

#[derive(Debug, Subcommand)]
enum ReminderCommand {
    /// Pending reminders of a user due at or before `--at` (default: now)
    Due {
        /// User id or email
        #[arg(long)]
        user: String,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    cfg.ensure_dirs()?;

    let pool = connect(&cfg).await?;
    match args.command {
        Command::Migrate => info!("database is up to date"),
        Command::ExampleConfig => unreachable!("handled before loading config"),
        Command::User(cmd) => run_user(&pool, cmd).await?,
        Command::Reminders(ReminderCommand::Due { user, at }) => {
            let user = resolve_user(&pool, &user).await?;
            let at = at.unwrap_or_else(Utc::now);
            for r in db::reminder::due(&pool, &user.id, at).await? {
                println!("{}\t{}\t{}", r.id, r.due_date.to_rfc3339(), r.title);
            }
        }
        Command::Stats => stats(&pool).await?,
        Command::Export => export(&pool).await?,
    }
    pool.close().await;
    Ok(())
}

async fn connect(cfg: &Config) -> Result<Pool> {
    let database_url = cfg.database_url();
    let pool = db::init_pool(&database_url, &cfg.database)
        .await
        .with_context(|| format!("failed to open {database_url}"))?;
    db::run_migrations(&pool).await?;
    Ok(pool)
}

async fn resolve_user(pool: &Pool, key: &str) -> Result<User> {
    let user = if key.contains('@') {
        db::user::find_by_email(pool, key).await?
    } else {
        db::find_unique::<User, _>(pool, key).await?
    };
    user.ok_or_else(|| anyhow!("no user matches '{key}'"))
}

async fn run_user(pool: &Pool, cmd: UserCommand) -> Result<()> {
    match cmd {
        UserCommand::Add {
            email,
            name,
            location,
            skills,
        } => {
            let mut new = NewUser::new(email, name).with_skills(skills);
            new.location = location;
            let user = db::create(pool, new).await?;
            println!("{}", user.id);
        }
        UserCommand::List {
            email_contains,
            skill,
            skip,
            take,
        } => {
            let filter = UserFilter {
                email_contains,
                has_skill: skill,
                ..Default::default()
            };
            let q = FindMany::new(filter)
                .order_by(OrderBy::asc(UserField::CreatedAt))
                .skip(skip)
                .take(take);
            for u in db::find_many::<User, _>(pool, &q).await? {
                println!("{}\t{}\t{}", u.id, u.email, u.name);
            }
        }
        UserCommand::Show { key } => {
            let user = resolve_user(pool, &key).await?;
            let full = db::user::find_with_relations(pool, &user.id, Include::all())
                .await?
                .ok_or_else(|| anyhow!("user {} disappeared", user.id))?;
            println!("{}", serde_json::to_string_pretty(&full)?);
        }
        UserCommand::Delete { id } => {
            let user = db::delete::<User, _>(pool, &id).await?;
            info!(email = %user.email, "user deleted");
        }
    }
    Ok(())
}

async fn stats(pool: &Pool) -> Result<()> {
    let users = db::aggregate::<User, _>(pool, &Default::default()).await?;
    let projects = db::aggregate::<Project, _>(pool, &Default::default()).await?;
    let featured = db::group_by::<Project, _>(pool, ProjectField::Featured, &Default::default()).await?;
    let reminders = db::aggregate::<Reminder, _>(pool, &Default::default()).await?;
    let appointments = db::aggregate::<Appointment, _>(pool, &Default::default()).await?;
    let companies = db::count::<Company, _>(pool, &Default::default()).await?;
    let ai_configs = db::aggregate::<AiConfig, _>(pool, &Default::default()).await?;
    let messaging = db::aggregate::<MessagingConfig, _>(pool, &Default::default()).await?;

    let report = json!({
        "users": users,
        "companies": companies,
        "projects": projects,
        "projectsByFeatured": featured,
        "reminders": reminders,
        "appointments": appointments,
        "aiConfigs": ai_configs,
        "messagingConfigs": messaging,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Pages through users with an inclusive cursor, skipping the cursor row
/// itself, and loads relations for up to four users at a time.
async fn export(pool: &Pool) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut cursor: Option<String> = None;
    let mut exported = 0usize;
    loop {
        let mut q = FindMany::new(UserFilter::default())
            .order_by(OrderBy::asc(UserField::CreatedAt))
            .take(EXPORT_PAGE);
        if let Some(id) = cursor.take() {
            q = q.cursor(id).skip(1);
        }
        let page = db::find_many::<User, _>(pool, &q).await?;
        let Some(last) = page.last() else { break };
        cursor = Some(last.id.clone());
        let last_page = page.len() < EXPORT_PAGE as usize;

        let mut rows = stream::iter(page)
            .map(|u| async move { db::user::find_with_relations(pool, &u.id, Include::all()).await })
            .buffered(4);
        while let Some(row) = rows.try_next().await? {
            // Rows deleted mid-export are skipped.
            if let Some(row) = row {
                serde_json::to_writer(&mut out, &row)?;
                writeln!(out)?;
                exported += 1;
            }
        }
        if last_page {
            break;
        }
    }
    out.flush()?;
    info!(exported, "export finished");
    Ok(())
}
