use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "mailsync", version, about = "Incremental Gmail mailbox sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,

    /// SQLite database path (defaults to ~/.mailsync/mailsync.db)
    #[arg(long, global = true, env = "MAILSYNC_DB")]
    db: Option<PathBuf>,

    /// Log progress at info level
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull new messages for one or more users
    Sync(SyncArgs),
    /// Show per-user sync state
    Status {
        #[arg(long)]
        user: Option<String>,
    },
    /// List stored emails
    List(ListArgs),
    /// Show one stored email
    Show {
        user: String,
        provider_message_id: String,
    },
    /// Manage the users being synced
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Sync only this user (repeatable)
    #[arg(long = "user", conflicts_with = "all")]
    users: Vec<String>,
    /// Sync every active user
    #[arg(long, default_value_t = false)]
    all: bool,
    /// Keep running and sync users as they come due
    #[arg(long, default_value_t = false)]
    watch: bool,
    /// Skip users whose next scheduled sync has not arrived
    #[arg(long, default_value_t = false)]
    due_only: bool,
    /// Users synced at the same time
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
    /// Concurrent message fetches per user
    #[arg(long, env = "MAILSYNC_FAN_OUT")]
    fan_out: Option<usize>,
    /// Gmail search query for the message listing
    #[arg(long, env = "MAILSYNC_QUERY")]
    query: Option<String>,
    /// Message ids per list page (1-500)
    #[arg(long, env = "MAILSYNC_PAGE_SIZE")]
    page_size: Option<u32>,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long)]
    user: Option<String>,
    #[arg(long, default_value_t = false)]
    unread: bool,
    #[arg(long)]
    label: Option<String>,
    /// Include messages labelled TRASH
    #[arg(long, default_value_t = false)]
    include_trash: bool,
    #[arg(long, default_value_t = 50)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Debug, Subcommand)]
enum UserCommands {
    /// List registered users
    List,
    /// Register a user, or update an existing one
    Add {
        email: String,
        #[arg(long, env = "MAILSYNC_REFRESH_TOKEN")]
        refresh_token: String,
        #[arg(long)]
        access_token: Option<String>,
        /// Seconds until the access token expires
        #[arg(long, requires = "access_token")]
        expires_in: Option<i64>,
        #[arg(long)]
        name: Option<String>,
        /// Explicit user id (defaults to the lowercased email)
        #[arg(long)]
        id: Option<String>,
    },
    /// Stop syncing a user
    Disable { user_id: String },
    /// Resume syncing a user
    Enable { user_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    commands::dispatch(cli).await
}

mod commands {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use anyhow::{anyhow, bail, Context, Result};
    use chrono::{Duration, Utc};
    use tracing::{info, warn};

    use mailsync::config::{clamp_page_size, SyncConfig};
    use mailsync::db::models::{Credentials, User};
    use mailsync::db::{Database, EmailListFilters, MailStore};
    use mailsync::gmail::auth::token_expiry;
    use mailsync::gmail::{GmailClient, TokenProvider, GMAIL_PROVIDER};
    use mailsync::output::{self, OutputFormat, SyncResultItem};
    use mailsync::sync::{timing, SyncCoordinator};

    use super::{Cli, Commands, ListArgs, SyncArgs, UserCommands};

    const WATCH_MAX_WAIT_SECS: i64 = 60;

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let format = OutputFormat::from_json_flag(cli.json);
        let db = open_database(cli.db)?;

        match cli.command {
            Commands::Sync(args) => handle_sync(db, args, format).await,
            Commands::Status { user } => handle_status(&db, user.as_deref(), format),
            Commands::List(args) => handle_list(&db, args, format),
            Commands::Show {
                user,
                provider_message_id,
            } => handle_show(&db, &user, &provider_message_id, format),
            Commands::Users { command } => handle_users(&db, command, format),
        }
    }

    fn open_database(path: Option<PathBuf>) -> Result<Database> {
        let db_path = match path {
            Some(path) => path,
            None => Database::default_db_path().context("resolve default mailsync database path")?,
        };
        Database::open(&db_path)
            .with_context(|| format!("open mailsync database at {}", db_path.display()))
    }

    fn resolve_config(args: &SyncArgs) -> Result<SyncConfig> {
        let mut config = SyncConfig::from_env().context("load sync configuration")?;
        if let Some(fan_out) = args.fan_out {
            config.fan_out = fan_out.max(1);
        }
        if let Some(query) = args.query.as_deref().filter(|q| !q.trim().is_empty()) {
            config.query = query.to_string();
        }
        if let Some(page_size) = args.page_size {
            config.page_size = clamp_page_size(page_size);
        }
        Ok(config)
    }

    async fn handle_sync(db: Database, args: SyncArgs, format: OutputFormat) -> Result<()> {
        let config = resolve_config(&args)?;
        if !config.has_client_credentials() {
            warn!("MAILSYNC_GMAIL_CLIENT_ID/SECRET not set; expired access tokens cannot be refreshed");
        }
        let db = Arc::new(db);
        let client = GmailClient::new(&config).context("build gmail client")?;
        let tokens = TokenProvider::new(&config).context("build token provider")?;
        let coordinator =
            SyncCoordinator::new(db.clone(), Arc::new(client), tokens, &config);

        if args.watch {
            return watch(&db, &coordinator, &args, format).await;
        }

        let user_ids = select_users(&db, &args, Utc::now())?;
        if user_ids.is_empty() {
            println!("{}", output::format_sync_results(format, &[])?);
            return Ok(());
        }

        let results = run_sync(&coordinator, &user_ids, args.concurrency, format).await?;
        let failed = results.iter().filter(|item| !item.ok).count();
        if failed > 0 {
            bail!("{failed} of {} user sync(s) failed", results.len());
        }
        Ok(())
    }

    async fn run_sync(
        coordinator: &SyncCoordinator,
        user_ids: &[String],
        concurrency: usize,
        format: OutputFormat,
    ) -> Result<Vec<SyncResultItem>> {
        let results = coordinator.sync_users(user_ids, concurrency).await;
        let items: Vec<SyncResultItem> = results
            .iter()
            .map(|(user_id, result)| SyncResultItem::from_result(user_id, result))
            .collect();
        println!("{}", output::format_sync_results(format, &items)?);
        Ok(items)
    }

    async fn watch(
        db: &Database,
        coordinator: &SyncCoordinator,
        args: &SyncArgs,
        format: OutputFormat,
    ) -> Result<()> {
        let max_wait = Duration::seconds(WATCH_MAX_WAIT_SECS);
        loop {
            let now = Utc::now();
            let due: Vec<String> = select_users(db, args, now)?
                .into_iter()
                .filter(|user_id| {
                    db.get_sync_state(user_id, GMAIL_PROVIDER)
                        .map(|state| timing::is_due(state.as_ref(), now))
                        .unwrap_or(true)
                })
                .collect();

            if !due.is_empty() {
                info!(users = due.len(), "syncing due users");
                run_sync(coordinator, &due, args.concurrency, format).await?;
            }

            let states = db.list_sync_states()?;
            let wait = timing::wait_until_next_due(states.iter(), Utc::now(), max_wait)
                .to_std()
                .unwrap_or(StdDuration::from_secs(WATCH_MAX_WAIT_SECS as u64))
                .max(StdDuration::from_secs(1));

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("stopping watch");
                    return Ok(());
                }
            }
        }
    }

    fn select_users(
        db: &Database,
        args: &SyncArgs,
        now: chrono::DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut user_ids = if args.all || args.users.is_empty() {
            db.list_active_users()?
                .into_iter()
                .map(|user| user.user_id)
                .collect::<Vec<_>>()
        } else {
            for user_id in &args.users {
                if db.get_user(user_id)?.is_none() {
                    return Err(anyhow!("unknown user: {user_id}"));
                }
            }
            args.users.clone()
        };

        if args.due_only {
            let mut due = Vec::with_capacity(user_ids.len());
            for user_id in user_ids {
                let state = db.get_sync_state(&user_id, GMAIL_PROVIDER)?;
                if timing::is_due(state.as_ref(), now) {
                    due.push(user_id);
                }
            }
            user_ids = due;
        }

        Ok(user_ids)
    }

    fn handle_status(db: &Database, user: Option<&str>, format: OutputFormat) -> Result<()> {
        let states = match user {
            Some(user_id) => {
                if db.get_user(user_id)?.is_none() {
                    return Err(anyhow!("unknown user: {user_id}"));
                }
                vec![db.load_state(user_id, GMAIL_PROVIDER)?]
            }
            None => db.list_sync_states()?,
        };
        println!("{}", output::format_sync_states(format, &states)?);
        Ok(())
    }

    fn handle_list(db: &Database, args: ListArgs, format: OutputFormat) -> Result<()> {
        let emails = db.list_emails(EmailListFilters {
            user_id: args.user,
            label: args.label,
            unread_only: args.unread,
            include_trash: args.include_trash,
            limit: args.limit,
            offset: args.offset,
        })?;
        println!("{}", output::format_email_list(format, &emails)?);
        Ok(())
    }

    fn handle_show(
        db: &Database,
        user_id: &str,
        provider_message_id: &str,
        format: OutputFormat,
    ) -> Result<()> {
        let email = db
            .get_email(user_id, provider_message_id)?
            .ok_or_else(|| anyhow!("email not found: {user_id}/{provider_message_id}"))?;
        println!("{}", output::format_email(format, &email)?);
        Ok(())
    }

    fn handle_users(db: &Database, command: UserCommands, format: OutputFormat) -> Result<()> {
        match command {
            UserCommands::List => {
                let users = db.list_users()?;
                println!("{}", output::format_users(format, &users)?);
            }
            UserCommands::Add {
                email,
                refresh_token,
                access_token,
                expires_in,
                name,
                id,
            } => {
                let email = email.trim().to_string();
                if email.is_empty() {
                    bail!("email must not be empty");
                }
                let user_id = id
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| email.to_ascii_lowercase());

                let expires_at = match access_token {
                    Some(_) => {
                        let expires_in = expires_in.unwrap_or(0);
                        let expires_at = token_expiry(Utc::now(), expires_in)
                            .ok_or_else(|| anyhow!("--expires-in out of range: {expires_in}"))?;
                        Some(expires_at)
                    }
                    None => None,
                };
                let user = User {
                    user_id: user_id.clone(),
                    email_address: email,
                    display_name: name,
                    is_active: true,
                    token_expires_at: expires_at,
                    created_at: Utc::now(),
                };
                let credentials = Credentials {
                    user_id: user_id.clone(),
                    access_token,
                    refresh_token: Some(refresh_token),
                    expires_at,
                    is_active: true,
                };
                db.upsert_user(&user, &credentials)?;
                println!("Saved user: {user_id}");
            }
            UserCommands::Disable { user_id } => set_active(db, &user_id, false)?,
            UserCommands::Enable { user_id } => set_active(db, &user_id, true)?,
        }
        Ok(())
    }

    fn set_active(db: &Database, user_id: &str, active: bool) -> Result<()> {
        let updated = db.set_user_active(user_id, active)?;
        if updated == 0 {
            println!("No user found: {user_id}");
        } else if active {
            println!("Enabled user: {user_id}");
        } else {
            println!("Disabled user: {user_id}");
        }
        Ok(())
    }
}
