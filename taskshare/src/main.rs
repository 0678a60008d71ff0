//! `taskshare`: command-line client for a `TaskShare` hub.
//!
//! Every subcommand connects, performs one operation, and prints the result
//! as JSON on stdout. `watch` stays connected and prints each hub event as it
//! arrives, keeping list-room subscriptions in step with what the user can
//! see. Logs go to a file so stdout stays machine-readable.
//!
//! ```bash
//! taskshare --hub-url ws://127.0.0.1:9400/ws --token t-alice create-list Groceries
//! TASKSHARE_TOKEN=t-bob taskshare lists
//! taskshare share-list <LIST_ID> bob --permission edit
//! taskshare watch
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use taskshare::client::{ClientError, HubClient};
use taskshare::config::{CliArgs, ClientConfig, ConfigError};
use taskshare::session::Session;
use taskshare_proto::access::{Access, Permission};
use taskshare_proto::ids::{ListId, TaskId, Timestamp, UserId};
use taskshare_proto::model::{ListPatch, NewList, NewTask, Priority, TaskPatch, TaskStatus};
use taskshare_proto::wire::Operation;

#[derive(Parser, Debug)]
#[command(version, about = "Shared task lists from the command line")]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every list and task you can see.
    Snapshot,
    /// Print accessible lists with your access level on each.
    Lists,
    /// Print your notifications.
    Notifications,
    /// Create a list you own.
    CreateList {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Rename or redescribe a list.
    UpdateList {
        list: ListId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Remove the description.
        #[arg(long, conflicts_with = "description")]
        clear_description: bool,
    },
    /// Delete a list and all its tasks.
    DeleteList { list: ListId },
    /// Add a task to a list.
    CreateTask {
        list: ListId,
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        #[arg(long, default_value = "pending")]
        status: TaskStatus,
        /// Due date as YYYY-MM-DD.
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        favorite: bool,
    },
    /// Change fields of a task.
    UpdateTask {
        task: TaskId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        priority: Option<Priority>,
        /// Due date as YYYY-MM-DD.
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        favorite: Option<bool>,
    },
    /// Delete a task.
    DeleteTask { task: TaskId },
    /// Grant a user access to a list.
    ShareList {
        list: ListId,
        user: String,
        #[arg(long)]
        permission: Option<Permission>,
    },
    /// Change a user's level on a list.
    UpdateListShare {
        list: ListId,
        user: String,
        permission: Permission,
    },
    /// Revoke a user's access to a list.
    UnshareList { list: ListId, user: String },
    /// Give up your own access to a list.
    LeaveList { list: ListId },
    /// Grant a user access to a single task.
    ShareTask {
        task: TaskId,
        user: String,
        #[arg(long)]
        permission: Option<Permission>,
    },
    /// Change a user's level on a task.
    UpdateTaskShare {
        task: TaskId,
        user: String,
        permission: Permission,
    },
    /// Revoke a user's access to a task.
    UnshareTask { task: TaskId, user: String },
    /// Give up your own access to a task.
    LeaveTask { task: TaskId },
    /// Stay connected and print hub events as they arrive.
    Watch,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("failed to render output: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ClientConfig::load(&cli.args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());
    tracing::info!(command = ?cli.command, "taskshare starting");

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::warn!(err = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until exit so buffered log
/// lines are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskshare.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(command: Command, config: &ClientConfig) -> Result<(), CliError> {
    let (hub_url, token) = config.hub_endpoint()?;
    let client = HubClient::connect(hub_url, token, config.to_connect_options()).await?;

    let watching = matches!(command, Command::Watch);
    let me = client.user_id().clone();

    match to_operation(command, &me)? {
        Some(op) => {
            let result = client.request(op).await;
            client.close().await;
            print_json(&result?)?;
        }
        None if watching => watch(Session::start(client).await?).await?,
        None => {
            let session = Session::start(client).await?;
            print_lists(&session)?;
            session.close().await;
        }
    }
    Ok(())
}

async fn watch(mut session: Session) -> Result<(), CliError> {
    eprintln!(
        "watching as {} ({} lists); press Ctrl-C to stop",
        session.user_id(),
        session.view().accessible_lists.len()
    );
    loop {
        let event = tokio::select! {
            event = session.next_change() => event?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let at = chrono::Local::now().format("%H:%M:%S");
        println!("{at} {} {}", event.name(), serde_json::to_string(&event)?);
    }
    session.close().await;
    Ok(())
}

fn print_lists(session: &Session) -> Result<(), CliError> {
    let view = session.view();
    let rows: Vec<serde_json::Value> = session
        .cache()
        .lists()
        .filter_map(|list| {
            let access = view.list_access.get(&list.id)?;
            Some(serde_json::json!({
                "id": list.id,
                "name": list.name,
                "owner": list.owner_id,
                "access": access_label(*access),
                "tasks": session.cache().tasks_of(list.id).count(),
            }))
        })
        .collect();
    let direct = view
        .shared_tasks
        .iter()
        .filter_map(|id| session.cache().task(*id))
        .filter(|task| !view.accessible_lists.contains(&task.list_id))
        .count();
    print_json(&serde_json::json!({ "lists": rows, "directly_shared_tasks": direct }))
}

fn access_label(access: Access) -> String {
    match access {
        Access::Owner => "OWNER".to_string(),
        Access::Shared(permission) => permission.to_string(),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The operation a one-shot subcommand performs, or `None` for subcommands
/// that run a live session.
fn to_operation(command: Command, me: &UserId) -> Result<Option<Operation>, CliError> {
    let op = match command {
        Command::Lists | Command::Watch => return Ok(None),
        Command::Snapshot => Operation::Snapshot,
        Command::Notifications => Operation::Notifications,
        Command::CreateList { name, description } => {
            Operation::CreateList(NewList { name, description })
        }
        Command::UpdateList {
            list,
            name,
            description,
            clear_description,
        } => Operation::UpdateList {
            list_id: list,
            patch: ListPatch {
                name,
                description: if clear_description {
                    Some(None)
                } else {
                    description.map(Some)
                },
            },
        },
        Command::DeleteList { list } => Operation::DeleteList { list_id: list },
        Command::CreateTask {
            list,
            name,
            description,
            priority,
            status,
            due,
            favorite,
        } => Operation::CreateTask {
            list_id: list,
            task: NewTask {
                name,
                description,
                status,
                priority,
                due_date: due.as_deref().map(parse_due_date).transpose()?,
                favorite,
            },
        },
        Command::UpdateTask {
            task,
            name,
            description,
            status,
            priority,
            due,
            favorite,
        } => Operation::UpdateTask {
            task_id: task,
            patch: TaskPatch {
                name,
                description: description.map(Some),
                status,
                priority,
                due_date: due.as_deref().map(parse_due_date).transpose()?.map(Some),
                favorite,
            },
        },
        Command::DeleteTask { task } => Operation::DeleteTask { task_id: task },
        Command::ShareList {
            list,
            user,
            permission,
        } => Operation::ShareList {
            list_id: list,
            user_id: UserId::new(user),
            permission,
        },
        Command::UpdateListShare {
            list,
            user,
            permission,
        } => Operation::UpdateListShare {
            list_id: list,
            user_id: UserId::new(user),
            permission,
        },
        Command::UnshareList { list, user } => Operation::UnshareList {
            list_id: list,
            user_id: UserId::new(user),
        },
        Command::LeaveList { list } => Operation::UnshareList {
            list_id: list,
            user_id: me.clone(),
        },
        Command::ShareTask {
            task,
            user,
            permission,
        } => Operation::ShareTask {
            task_id: task,
            user_id: UserId::new(user),
            permission,
        },
        Command::UpdateTaskShare {
            task,
            user,
            permission,
        } => Operation::UpdateTaskShare {
            task_id: task,
            user_id: UserId::new(user),
            permission,
        },
        Command::UnshareTask { task, user } => Operation::UnshareTask {
            task_id: task,
            user_id: UserId::new(user),
        },
        Command::LeaveTask { task } => Operation::UnshareTask {
            task_id: task,
            user_id: me.clone(),
        },
    };
    Ok(Some(op))
}

/// Parses `YYYY-MM-DD` as midnight UTC.
fn parse_due_date(s: &str) -> Result<Timestamp, CliError> {
    let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| CliError::InvalidDate(s.to_string()))?;
    let millis = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .and_then(|ms| u64::try_from(ms).ok())
        .ok_or_else(|| CliError::InvalidDate(s.to_string()))?;
    Ok(Timestamp::from_millis(millis))
}
