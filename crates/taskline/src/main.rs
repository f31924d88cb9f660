//! Taskline: command-line task list
//!
//! Talks to a REST task server, keeping a local copy of the full list so
//! `list` and `stats` keep working while the server is down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::Result;
use taskline_core::{
    ClientConfig, FileStore, FilterSpec, Priority, PriorityFilter, RestTaskStore, ServiceConfig, SortOrder,
    StatusFilter, TaskId, TaskService,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "taskline")]
#[command(about = "Offline-tolerant task list", long_about = None)]
struct Cli {
    /// Task server URL
    #[arg(long, env = "TASKLINE_API_URL", default_value = "http://localhost:3000", global = true)]
    api_url: String,

    /// Directory for the local task copy (default: platform data dir)
    #[arg(long, env = "TASKLINE_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30", global = true)]
    timeout: u64,

    /// Retries for failed reads
    #[arg(long, default_value = "3", global = true)]
    retries: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tasks
    List {
        /// all, completed or pending
        #[arg(long, default_value = "all")]
        status: StatusFilter,

        /// all, high, medium or low
        #[arg(long, default_value = "all")]
        priority: PriorityFilter,

        /// Case-insensitive text search
        #[arg(long, default_value = "")]
        search: String,

        /// asc (oldest first) or desc (newest first)
        #[arg(long, default_value = "desc")]
        sort: SortOrder,
    },

    /// Add a task
    Add {
        /// Task text (up to 200 characters)
        text: String,

        /// high, medium or low
        #[arg(long, default_value = "medium")]
        priority: Priority,
    },

    /// Toggle a task between pending and completed
    Toggle {
        /// Task ID
        id: String,
    },

    /// Delete a task
    Delete {
        /// Task ID
        id: String,
    },

    /// Change a task's text and priority
    Edit {
        /// Task ID
        id: String,

        /// New task text
        text: String,

        /// New priority (default: keep the current one)
        #[arg(long)]
        priority: Option<Priority>,
    },

    /// Show task counts over all tasks
    Stats,

    /// Remove the local task copy
    ClearCache,
}

impl Cli {
    fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join("taskline"))
                .ok_or_else(|| miette::miette!("could not determine data directory, pass --data-dir")),
        }
    }

    fn service(&self) -> Result<TaskService> {
        let config = ClientConfig::new(&self.api_url)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_max_retries(self.retries);
        let store = RestTaskStore::with_config(config).map_err(|e| miette::miette!("{}", e))?;
        let local = FileStore::new(self.data_dir()?);

        Ok(TaskService::new(Arc::new(store), Arc::new(local), ServiceConfig::default()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, task output to stdout
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "taskline=info,taskline_core=warn".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let service = cli.service()?;
    let mut out = std::io::stdout();

    match cli.command {
        Commands::List {
            status,
            priority,
            search,
            sort,
        } => {
            let spec = FilterSpec::base()
                .with_status(status)
                .with_priority(priority)
                .with_search(search)
                .with_sort_order(sort);
            commands::list(&service, spec, &mut out).await
        }

        Commands::Add { text, priority } => commands::add(&service, &text, priority, &mut out).await,

        Commands::Toggle { id } => commands::toggle(&service, &TaskId::from(id), &mut out).await,

        Commands::Delete { id } => commands::delete(&service, &TaskId::from(id), &mut out).await,

        Commands::Edit { id, text, priority } => {
            commands::edit(&service, &TaskId::from(id), &text, priority, &mut out).await
        }

        Commands::Stats => commands::stats(&service, &mut out).await,

        Commands::ClearCache => commands::clear_cache(&service, &mut out).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_filters() {
        let cli = Cli::try_parse_from([
            "taskline", "list", "--status", "pending", "--priority", "high", "--sort", "asc",
        ])
        .unwrap();

        match cli.command {
            Commands::List {
                status,
                priority,
                search,
                sort,
            } => {
                assert_eq!(status, StatusFilter::Pending);
                assert_eq!(priority, PriorityFilter::High);
                assert!(search.is_empty());
                assert_eq!(sort, SortOrder::Ascending);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["taskline", "add", "Buy milk"]).unwrap();
        assert_eq!(cli.api_url, "http://localhost:3000");
        assert_eq!(cli.timeout, 30);
        assert_eq!(cli.retries, 3);

        match cli.command {
            Commands::Add { text, priority } => {
                assert_eq!(text, "Buy milk");
                assert_eq!(priority, Priority::Medium);
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_parse_global_args_after_subcommand() {
        let cli = Cli::try_parse_from([
            "taskline", "stats", "--api-url", "http://tasks.test", "--data-dir", "/tmp/taskline",
        ])
        .unwrap();
        assert_eq!(cli.api_url, "http://tasks.test");
        assert_eq!(cli.data_dir().unwrap(), PathBuf::from("/tmp/taskline"));
    }

    #[test]
    fn test_parse_rejects_bad_priority() {
        assert!(Cli::try_parse_from(["taskline", "add", "x", "--priority", "urgent"]).is_err());
    }

    #[test]
    fn test_edit_priority_is_optional() {
        let cli = Cli::try_parse_from(["taskline", "edit", "17", "new text"]).unwrap();
        match cli.command {
            Commands::Edit { id, text, priority } => {
                assert_eq!(id, "17");
                assert_eq!(text, "new text");
                assert_eq!(priority, None);
            }
            _ => panic!("expected edit"),
        }
    }
}
