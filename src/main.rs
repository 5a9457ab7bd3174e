use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trackplan::config::Config;
use trackplan::events::TracingObserver;
use trackplan::models::FailedAcFilters;
use trackplan::Workspace;

#[derive(Parser)]
#[command(name = "tp")]
#[command(about = "Roadmaps, tracks, tasks and iterations for agent-driven development")]
struct Cli {
    /// Project to operate on instead of the active one
    #[arg(short, long, global = true)]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Inspect iterations
    Iteration {
        #[command(subcommand)]
        command: IterationCommands,
    },
    /// Active roadmap with per-track task counts
    Overview,
    /// Unfinished tasks not planned into any iteration
    Backlog,
    /// Failed acceptance criteria
    FailedAc {
        #[arg(long)]
        iteration: Option<i64>,
        #[arg(long)]
        track: Option<String>,
        #[arg(long)]
        task: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a project
    Create {
        name: String,
        /// Id prefix, derived from the name if omitted
        #[arg(long)]
        code: Option<String>,
    },
    /// List projects
    List,
    /// Make a project the active one
    Use { name: String },
    /// Show the resolved project
    Show,
    /// Delete a project and all its data
    Delete { name: String },
}

#[derive(Subcommand)]
enum IterationCommands {
    /// Show the current iteration
    Current,
    /// List all iterations
    List,
}

/// Logs go to stderr so stdout carries only command output.
fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_tracing(&config.log_filter);

    let root = config.workspace_root()?;
    let workspace = Workspace::new(&root)
        .with_default_project(config.default_project.clone())
        .with_busy_timeout(config.busy_timeout())
        .with_observer(Arc::new(TracingObserver));
    let project = cli.project.as_deref().or(config.project_override.as_deref());

    match cli.command {
        Commands::Project { command } => match command {
            ProjectCommands::Create { name, code } => {
                let ctx = workspace.create_project(&name, code.as_deref())?;
                print_json(&ctx)?;
            }
            ProjectCommands::List => {
                let active = workspace.resolve(None)?.name;
                let projects: Vec<_> = workspace
                    .list_projects()?
                    .into_iter()
                    .map(|name| json!({ "name": name, "active": name == active }))
                    .collect();
                print_json(&projects)?;
            }
            ProjectCommands::Use { name } => {
                let ctx = workspace.set_active_project(&name)?;
                print_json(&ctx)?;
            }
            ProjectCommands::Show => {
                let ctx = workspace.resolve(project)?;
                let repo = workspace
                    .open_project(&ctx)
                    .with_context(|| format!("Failed to open project {}", ctx.name))?;
                print_json(&json!({
                    "name": ctx.name,
                    "db_path": ctx.db_path,
                    "code": repo.project_code()?,
                }))?;
            }
            ProjectCommands::Delete { name } => {
                workspace.delete_project(&name)?;
                print_json(&json!({ "deleted": name }))?;
            }
        },
        Commands::Iteration { command } => {
            let repo = workspace.open_project(&workspace.resolve(project)?)?;
            match command {
                IterationCommands::Current => print_json(&repo.get_current_iteration()?)?,
                IterationCommands::List => print_json(&repo.list_iterations()?)?,
            }
        }
        Commands::Overview => {
            let repo = workspace.open_project(&workspace.resolve(project)?)?;
            print_json(&repo.get_roadmap_overview()?)?;
        }
        Commands::Backlog => {
            let repo = workspace.open_project(&workspace.resolve(project)?)?;
            print_json(&repo.get_backlog_tasks()?)?;
        }
        Commands::FailedAc {
            iteration,
            track,
            task,
        } => {
            let repo = workspace.open_project(&workspace.resolve(project)?)?;
            let filters = FailedAcFilters {
                iteration,
                track_id: track,
                task_id: task,
            };
            print_json(&repo.list_failed_ac(&filters)?)?;
        }
    }

    Ok(())
}
