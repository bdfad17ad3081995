//! `foreman` command line: run the daemon, file tasks, and let agents report.
//!
//! Agent-side commands (`done`, `fail`, `help`, `heartbeat`, `cost`,
//! `task start`, `task checkpoint`) pick up `FOREMAN_AGENT_ID` and
//! `FOREMAN_TASK_ID` from the session environment.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use foreman::admission::active_workers;
use foreman::core::admission::{Admission, Usage, evaluate};
use foreman::core::readiness::{assignment_order, find_ready};
use foreman::core::types::{Event, EventKind, MessageKind, TaskStatus};
use foreman::daemon::{run_forever, run_once};
use foreman::error::LockError;
use foreman::exit_codes;
use foreman::io::event_log::EventFilter;
use foreman::io::paths::{ForemanPaths, InitOptions, init_project};
use foreman::io::runtime::TmuxRuntime;
use foreman::io::task_store::NewTask;
use foreman::io::vcs::GitVcs;
use foreman::logging;
use foreman::project::{FOREMAN_INBOX, Project};
use foreman::scheduler::Scheduler;

#[derive(Parser)]
#[command(
    name = "foreman",
    version,
    about = "Multi-agent work orchestrator",
    disable_help_subcommand = true
)]
struct Cli {
    /// Project root (default: nearest ancestor holding `.foreman/`).
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.foreman/` with a default config.
    Init {
        /// Rewrite config and .gitignore if `.foreman/` already exists.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the daemon until interrupted.
    Run,
    /// Run exactly one tick and exit.
    Tick,
    /// Manage tasks.
    #[command(subcommand)]
    Task(TaskCommand),
    /// Report the current task as done (queues its branch for merging).
    Done {
        #[command(flatten)]
        who: AgentArgs,
        /// One-line summary of what was done.
        #[arg(long)]
        result: Option<String>,
    },
    /// Report the current task as failed.
    Fail {
        #[command(flatten)]
        who: AgentArgs,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Ask the liaison for help.
    Help {
        question: String,
        #[arg(long, env = "FOREMAN_AGENT_ID", default_value = "operator")]
        agent: String,
        #[arg(long, env = "FOREMAN_TASK_ID")]
        task: Option<String>,
    },
    /// Record a heartbeat (clears any escalation).
    Heartbeat {
        #[arg(long, env = "FOREMAN_AGENT_ID")]
        agent: String,
        /// Short progress note.
        #[arg(long)]
        progress: Option<String>,
    },
    /// Record spend against the budget.
    Cost {
        amount: f64,
        #[arg(long, env = "FOREMAN_AGENT_ID")]
        agent: Option<String>,
        #[arg(long, env = "FOREMAN_TASK_ID")]
        task: Option<String>,
    },
    /// Print events as JSON lines.
    Events {
        /// Only the last N matching events.
        #[arg(long)]
        last: Option<usize>,
        #[arg(long, value_parser = parse_event_kind)]
        kind: Option<EventKind>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        task: Option<String>,
    },
    /// Summarize tasks, agents, queue and spend.
    Status,
}

#[derive(Subcommand)]
enum TaskCommand {
    /// File a new task.
    Add {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Task id this one depends on (repeatable).
        #[arg(long = "dep")]
        deps: Vec<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
    /// List tasks.
    List {
        #[arg(long, value_parser = parse_task_status)]
        status: Option<TaskStatus>,
    },
    /// List tasks ready for assignment, in assignment order.
    Ready,
    /// Print one task as JSON.
    Show { id: String },
    /// Mark the current task in progress.
    Start {
        #[arg(long, env = "FOREMAN_TASK_ID")]
        task: String,
    },
    /// Leave a progress note on the current task.
    Checkpoint {
        note: String,
        #[command(flatten)]
        who: AgentArgs,
    },
}

#[derive(clap::Args)]
struct AgentArgs {
    #[arg(long, env = "FOREMAN_AGENT_ID")]
    agent: String,
    #[arg(long, env = "FOREMAN_TASK_ID")]
    task: String,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    logging::init();

    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            if err.downcast_ref::<LockError>().is_some() {
                exit_codes::LOCKED
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Init { force } = cli.command {
        let root = match cli.root {
            Some(root) => root,
            None => env::current_dir().context("read current directory")?,
        };
        let paths = init_project(&root, &InitOptions { force })?;
        println!("initialized {}", paths.state_dir.display());
        return Ok(());
    }

    let paths = match cli.root {
        Some(root) => {
            let paths = ForemanPaths::new(root);
            if !paths.is_initialized() {
                return Err(anyhow!(
                    "{} is not a foreman project (run `foreman init`)",
                    paths.root.display()
                ));
            }
            paths
        }
        None => ForemanPaths::discover(&env::current_dir().context("read current directory")?)?,
    };
    let project = Project::open(paths);

    match cli.command {
        Command::Init { .. } => Ok(()),
        Command::Run => cmd_run(project),
        Command::Tick => cmd_tick(project),
        Command::Task(task) => cmd_task(&project, task),
        Command::Done { who, result } => {
            send(&project, MessageKind::TaskDone, &who.agent, Some(&who.task), json!({ "result": result }))
        }
        Command::Fail { who, reason } => {
            send(&project, MessageKind::TaskFailed, &who.agent, Some(&who.task), json!({ "reason": reason }))
        }
        Command::Help { question, agent, task } => send(
            &project,
            MessageKind::Help,
            &agent,
            task.as_deref(),
            json!({ "agent": agent, "reason": question }),
        ),
        Command::Heartbeat { agent, progress } => {
            project.agents.heartbeat(&agent, progress.as_deref())?;
            Ok(())
        }
        Command::Cost { amount, agent, task } => cmd_cost(&project, amount, agent, task),
        Command::Events {
            last,
            kind,
            agent,
            task,
        } => cmd_events(&project, last, EventFilter {
            kind,
            agent,
            task,
            ..EventFilter::default()
        }),
        Command::Status => cmd_status(&project),
    }
}

fn scheduler(project: Project) -> Result<Scheduler<TmuxRuntime, GitVcs>> {
    let config = project.load_config()?;
    let runtime = TmuxRuntime::new(config.command_timeout());
    let vcs = GitVcs::new(&project.paths.root, config.command_timeout());
    Ok(Scheduler::new(project, runtime, vcs))
}

fn cmd_run(project: Project) -> Result<()> {
    let scheduler = scheduler(project)?;
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    rt.block_on(run_forever(&scheduler))
}

fn cmd_tick(project: Project) -> Result<()> {
    let report = run_once(&scheduler(project)?)?;
    println!(
        "assigned {}, merged {}, conflicts {}, resolved {}, retired {}, events {}",
        report.assign.assigned.len(),
        report.merge.merged,
        report.merge.conflicts,
        report.resolved,
        report.liveness.retired,
        report.events
    );
    if let Some(denial) = report.assign.denial {
        println!("assignment paused: {denial}");
    }
    Ok(())
}

fn cmd_task(project: &Project, command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::Add {
            title,
            description,
            deps,
            tags,
            priority,
        } => {
            let task = project.tasks.create(NewTask {
                title,
                description,
                deps,
                tags,
                priority,
            })?;
            project.events.append(
                &Event::new(EventKind::TaskCreated)
                    .task(&task.id)
                    .data(json!({ "title": task.title })),
            )?;
            println!("{}", task.id);
        }
        TaskCommand::List { status } => {
            for task in project.tasks.list()? {
                if status.is_some_and(|status| task.status != status) {
                    continue;
                }
                println!(
                    "{}\t{}\t{}\t{}",
                    task.id,
                    task.status,
                    task.assigned_to.as_deref().unwrap_or("-"),
                    task.title
                );
            }
        }
        TaskCommand::Ready => {
            let tasks = project.tasks.list()?;
            for task in assignment_order(find_ready(&tasks)) {
                println!("{}\t{}\t{}", task.id, task.priority, task.title);
            }
        }
        TaskCommand::Show { id } => {
            let task = project.tasks.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&task).context("serialize task")?);
        }
        TaskCommand::Start { task } => {
            let task = project.tasks.start(&task)?;
            let mut event = Event::new(EventKind::TaskStarted).task(&task.id);
            if let Some(agent) = &task.assigned_to {
                event = event.agent(agent);
            }
            project.events.append(&event)?;
        }
        TaskCommand::Checkpoint { note, who } => {
            send(project, MessageKind::Checkpoint, &who.agent, Some(&who.task), json!({ "note": note }))?;
        }
    }
    Ok(())
}

fn send(project: &Project, kind: MessageKind, from: &str, task: Option<&str>, payload: Value) -> Result<()> {
    let message = project.messages.send(kind, from, FOREMAN_INBOX, task, payload)?;
    println!("{}", message.id);
    Ok(())
}

fn cmd_cost(project: &Project, amount: f64, agent: Option<String>, task: Option<String>) -> Result<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(anyhow!("cost must be a non-negative number, got {amount}"));
    }
    let mut event = Event::new(EventKind::Usage).data(json!({ "cost": amount }));
    if let Some(agent) = agent {
        event = event.agent(agent);
    }
    if let Some(task) = task {
        event = event.task(task);
    }
    project.events.append(&event)
}

fn cmd_events(project: &Project, last: Option<usize>, filter: EventFilter) -> Result<()> {
    let mut events = project.events.query(&filter)?;
    if let Some(n) = last {
        let skip = events.len().saturating_sub(n);
        events.drain(..skip);
    }
    for event in events {
        println!("{}", serde_json::to_string(&event).context("serialize event")?);
    }
    Ok(())
}

fn cmd_status(project: &Project) -> Result<()> {
    let config = project.load_config()?;
    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    for task in project.tasks.list()? {
        *by_status.entry(task.status.as_str()).or_default() += 1;
    }
    let tasks: Vec<String> = by_status
        .iter()
        .map(|(status, count)| format!("{status} {count}"))
        .collect();
    println!("tasks: {}", if tasks.is_empty() { "none".to_string() } else { tasks.join(", ") });

    for agent in project.agents.list()? {
        println!(
            "agent {}\t{}\t{}\t{}",
            agent.id,
            agent.role,
            agent.status,
            agent.task_id.as_deref().unwrap_or("-")
        );
    }
    let usage = Usage {
        spent: project.events.total_cost()?,
        active_workers: active_workers(project)?,
        queue_depth: project.queue.depth()?,
    };
    println!(
        "merge queue: {} of {}",
        usage.queue_depth, config.limits.max_queue_depth
    );
    println!(
        "spent: {:.2} of {:.2}",
        usage.spent, config.limits.budget_ceiling
    );
    match evaluate(&config.limits(), &usage) {
        Admission::Allowed => println!("admission: open"),
        Admission::Denied(denial) => println!("admission: paused ({denial})"),
    }
    Ok(())
}

fn parse_event_kind(raw: &str) -> Result<EventKind, String> {
    serde_json::from_value(Value::String(raw.to_string())).map_err(|_| format!("unknown event kind '{raw}'"))
}

fn parse_task_status(raw: &str) -> Result<TaskStatus, String> {
    serde_json::from_value(Value::String(raw.to_string())).map_err(|_| format!("unknown task status '{raw}'"))
}
