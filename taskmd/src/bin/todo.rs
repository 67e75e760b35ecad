// todo: CLI for the Markdown task file
//
// Commands:
//   todo list [--status <s,...>] [--section <name>] [--tag <t>] [--active]
//   todo add <words> [--section <name>] [--parent <id>] [--due <date>]
//   todo update <id> [--status <s>] [--description <text>] ...
//   todo done <id> | todo rm <id>
//   todo sync <status|pull|push|run|init>

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use taskmd_lib::model::{Modifier, NewTask, Task, TaskPatch, TaskStatus};
use taskmd_lib::store::{group_by_quadrant, TaskFilter, TaskStore};
use taskmd_lib::sync::SyncOutcome;
use taskmd_lib::{InProgressPolicy, StoreConfig};

#[derive(Debug, Parser)]
#[command(name = "todo", about = "Manage a Markdown task file", version)]
struct Cli {
    /// Task file to operate on (defaults to $TASKMD_FILE or the data directory)
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Reject starting a task while another one is in progress
    #[arg(long, global = true)]
    single: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List tasks, optionally filtered
    List(ListArgs),
    /// Show one task
    Show { id: String },
    /// Add a task
    Add(AddArgs),
    /// Change fields of a task
    Update(UpdateArgs),
    /// Mark a task completed
    Done { id: String },
    /// Delete a task and its subtasks
    Rm { id: String },
    /// List section headings
    Sections,
    /// Group tasks by urgency and importance
    Quadrants(ListArgs),
    /// List backups, oldest first
    Backups,
    /// Restore the task file from a backup
    Restore(RestoreArgs),
    /// Sync the task directory with its git remote
    #[command(subcommand)]
    Sync(SyncCommand),
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Comma separated statuses, e.g. `pending,in_progress`
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    section: Option<String>,
    #[arg(long)]
    tag: Option<String>,
    #[arg(long)]
    mention: Option<String>,
    #[arg(long)]
    modifier: Option<String>,
    /// Case-insensitive text search in descriptions
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    max_level: Option<u8>,
    /// Only active tasks plus those closed or paused within the grace period
    #[arg(long)]
    active: bool,
}

#[derive(Debug, Args)]
struct AddArgs {
    /// Description; may contain #tags, @mentions, +modifiers and _due: dates
    #[arg(required = true)]
    words: Vec<String>,
    #[arg(long)]
    section: Option<String>,
    /// Nest under this task
    #[arg(long)]
    parent: Option<String>,
    #[arg(long)]
    status: Option<TaskStatus>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long = "mention")]
    mentions: Vec<String>,
    /// `name` or `name:value`
    #[arg(long = "modifier")]
    modifiers: Vec<Modifier>,
    #[arg(long)]
    due: Option<String>,
    /// Minutes spent so far
    #[arg(long)]
    spent: Option<u32>,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    id: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    status: Option<TaskStatus>,
    /// Replace all tags (comma separated, empty to clear)
    #[arg(long)]
    tags: Option<String>,
    /// Replace all mentions (comma separated, empty to clear)
    #[arg(long)]
    mentions: Option<String>,
    /// Replace all modifiers (comma separated, empty to clear)
    #[arg(long)]
    modifiers: Option<String>,
    /// Due date; empty string clears it
    #[arg(long)]
    due: Option<String>,
    /// Completion date; empty string clears it
    #[arg(long)]
    done: Option<String>,
    #[arg(long)]
    spent: Option<u32>,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    /// Backup file to restore
    #[arg(conflicts_with = "latest", required_unless_present = "latest")]
    path: Option<PathBuf>,
    /// Restore the newest backup
    #[arg(long)]
    latest: bool,
}

#[derive(Debug, Subcommand)]
enum SyncCommand {
    /// Fetch and classify local vs remote
    Status,
    /// Rebase onto the remote branch
    Pull,
    /// Commit local changes and push
    Push {
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Pull, then push
    Run {
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Create the repository if needed and set the remote URL
    Init { url: String },
}

fn main() -> ExitCode {
    let _logger = match flexi_logger::Logger::try_with_env_or_str("warn")
        .and_then(|logger| logger.log_to_stderr().start())
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Warning: failed to start logger: {}", e);
            None
        }
    };

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = StoreConfig::from_env();
    if let Some(file) = cli.file {
        config.task_file = file;
    }
    if cli.single {
        config.in_progress_policy = InProgressPolicy::Single;
    }
    let grace = config.grace_period;
    let store = TaskStore::new(config);
    let json = cli.json;

    match cli.command {
        Commands::List(args) => {
            let filter = build_filter(args, grace)?;
            let tasks = store.list_tasks(&filter).context("Failed to list tasks")?;
            if json {
                print_json(&tasks)?;
            } else if tasks.is_empty() {
                println!("No tasks");
            } else {
                for task in &tasks {
                    print_task(task);
                }
            }
        }

        Commands::Show { id } => {
            let task = store.get_task(&id)?;
            if json {
                print_json(&task)?;
            } else {
                print_task_details(&task);
            }
        }

        Commands::Add(args) => {
            let input = NewTask {
                description: args.words.join(" "),
                status: args.status,
                section: args.section,
                parent_id: args.parent,
                tags: args.tags,
                mentions: args.mentions,
                modifiers: args.modifiers,
                due: args.due,
                created: None,
                time_spent: args.spent,
            };
            let task = store.insert_task(input).context("Failed to add task")?;
            if json {
                print_json(&task)?;
            } else {
                println!("Added {}", task.id);
                print_task(&task);
            }
        }

        Commands::Update(args) => {
            let patch = TaskPatch {
                description: args.description,
                status: args.status,
                tags: args.tags.as_deref().map(split_list),
                mentions: args.mentions.as_deref().map(split_list),
                modifiers: args
                    .modifiers
                    .as_deref()
                    .map(|raw| {
                        split_list(raw)
                            .iter()
                            .map(|m| m.parse::<Modifier>().map_err(anyhow::Error::msg))
                            .collect::<Result<Vec<_>>>()
                    })
                    .transpose()?,
                due: args.due,
                done: args.done,
                created: None,
                time_spent: args.spent,
            };
            let task = store
                .update_task(&args.id, patch)
                .with_context(|| format!("Failed to update {}", args.id))?;
            if json {
                print_json(&task)?;
            } else {
                print_task(&task);
            }
        }

        Commands::Done { id } => {
            let task = store
                .update_task(&id, TaskPatch::status(TaskStatus::Completed))
                .with_context(|| format!("Failed to complete {}", id))?;
            if json {
                print_json(&task)?;
            } else {
                print_task(&task);
            }
        }

        Commands::Rm { id } => {
            let deleted = store
                .delete_task(&id)
                .with_context(|| format!("Failed to delete {}", id))?;
            if json {
                print_json(&deleted)?;
            } else {
                println!(
                    "Deleted {} task(s): {}",
                    deleted.removed_ids.len(),
                    deleted.removed_ids.join(", ")
                );
            }
        }

        Commands::Sections => {
            let sections = store.list_sections()?;
            if json {
                print_json(&sections)?;
            } else {
                for section in sections {
                    println!("{}", section);
                }
            }
        }

        Commands::Quadrants(args) => {
            let filter = build_filter(args, grace)?;
            let groups = group_by_quadrant(&store.list_tasks(&filter)?);
            if json {
                print_json(&groups)?;
            } else {
                for (title, tasks) in [
                    ("Q1 urgent + important", &groups.q1),
                    ("Q2 important", &groups.q2),
                    ("Q3 urgent", &groups.q3),
                    ("Q4 neither", &groups.q4),
                ] {
                    println!("{} ({})", title, tasks.len());
                    for task in tasks {
                        print_task(task);
                    }
                }
            }
        }

        Commands::Backups => {
            let backups = store.backups().list()?;
            if json {
                print_json(&backups)?;
            } else if backups.is_empty() {
                println!("No backups in {}", store.backups().dir().display());
            } else {
                for path in backups {
                    println!("{}", path.display());
                }
            }
        }

        Commands::Restore(args) => {
            let path = match (args.path, args.latest) {
                (Some(path), _) => path,
                (None, true) => match store.backups().latest()? {
                    Some(path) => path,
                    None => bail!("No backups to restore"),
                },
                (None, false) => bail!("Give a backup path or --latest"),
            };
            let snapshot = store
                .restore_backup(&path)
                .with_context(|| format!("Failed to restore {}", path.display()))?;
            if json {
                print_json(&serde_json::json!({
                    "restored": path,
                    "tasks": snapshot.tasks.len(),
                }))?;
            } else {
                println!(
                    "Restored {} ({} tasks)",
                    path.display(),
                    snapshot.tasks.len()
                );
            }
        }

        Commands::Sync(command) => {
            let controller = store.sync_controller();
            let outcome = match command {
                SyncCommand::Status => {
                    let state = controller.status().context("Failed to get sync status")?;
                    if json {
                        print_json(&state)?;
                    } else {
                        println!(
                            "{} ({} local, {} remote) on {}/{}",
                            state.status,
                            state.local_changes,
                            state.remote_changes,
                            state.remote,
                            state.branch
                        );
                        if let Some(last) = &state.last_sync {
                            println!("Last sync: {}", last);
                        }
                        if let Some(error) = &state.error {
                            println!("Note: {}", error);
                        }
                    }
                    return Ok(ExitCode::SUCCESS);
                }
                SyncCommand::Pull => controller.pull()?,
                SyncCommand::Push { message } => controller.push(message.as_deref())?,
                SyncCommand::Run { message } => controller.sync(message.as_deref())?,
                SyncCommand::Init { url } => controller.init(&url)?,
            };
            return report_outcome(&outcome, json);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn build_filter(args: ListArgs, grace: std::time::Duration) -> Result<TaskFilter> {
    let statuses = args
        .status
        .as_deref()
        .map(TaskFilter::parse_statuses)
        .transpose()?;
    Ok(TaskFilter {
        statuses,
        section: args.section,
        tag: args.tag,
        mention: args.mention,
        modifier: args.modifier,
        text: args.text,
        max_level: args.max_level,
        active_within: args.active.then_some(grace),
    })
}

fn report_outcome(outcome: &SyncOutcome, json: bool) -> Result<ExitCode> {
    if json {
        print_json(outcome)?;
    } else {
        println!("{}", outcome.message);
        if let Some(backup) = &outcome.backup_path {
            println!("Backup: {}", backup.display());
        }
    }
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_task(task: &Task) {
    println!("{:<14} {}", task.id, task.raw_line.trim_end());
}

fn print_task_details(task: &Task) {
    println!("{}", task.raw_line.trim_end());
    println!("  id:       {}", task.id);
    println!("  status:   {}", task.status);
    println!("  line:     {}", task.line_number);
    if let Some(section) = &task.section {
        println!("  section:  {}", section);
    }
    if let Some(parent) = &task.parent_id {
        println!("  parent:   {}", parent);
    }
    if !task.children.is_empty() {
        println!("  children: {}", task.children.join(", "));
    }
    if !task.tags.is_empty() {
        println!("  tags:     {}", task.tags.join(", "));
    }
    if !task.mentions.is_empty() {
        println!("  mentions: {}", task.mentions.join(", "));
    }
    for modifier in &task.modifiers {
        println!("  modifier: {}", modifier);
    }
    for (label, value) in [
        ("due", &task.dates.due),
        ("done", &task.dates.done),
        ("created", &task.dates.created),
        ("wip", &task.dates.wip),
    ] {
        if let Some(value) = value {
            println!("  {:<9} {}", format!("{}:", label), value);
        }
    }
    if let Some(minutes) = task.time_spent {
        println!("  spent:    {} min", minutes);
    }
}
