//! # vigil
//!
//! Operator CLI for the attention subsystem: ranked views, reminders,
//! feedback capture, replay evaluation and experiment control.
//!
//! Command output is JSON on stdout; logs go to stderr.

#![deny(unsafe_code)]

mod app;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use vigil_core::ids::{RunId, TaskId};
use vigil_core::records::{ActionEvent, ExperimentAction, FeedbackAction, TaskTransition};
use vigil_core::{AttentionView, TaskSnapshot, TaskStatus};
use vigil_ranking::{ControlUpdate, RankRequest};
use vigil_replay::ExperimentRequest;
use vigil_settings::{load_settings, load_settings_from_path};
use vigil_telemetry::{init_telemetry, TelemetryConfig};

use crate::app::App;

#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Task attention ranking and reminders")]
struct Cli {
    /// Settings file (defaults to `$VIGIL_HOME/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// History database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rank a view over the tasks in a JSON file.
    Rank {
        #[arg(long, default_value = "current")]
        view: AttentionView,
        /// JSON array of task snapshots.
        #[arg(long)]
        tasks: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Evaluate reminders and claim dedup markers.
    Reminders {
        #[arg(long)]
        tasks: PathBuf,
    },
    #[command(subcommand)]
    Feedback(FeedbackCommand),
    /// Evaluate the trailing window against the rollout gates.
    Replay {
        /// Window length; defaults to the configured replay window.
        #[arg(long)]
        days: Option<u32>,
        /// Write the report here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    #[command(subcommand)]
    Config(ConfigCommand),
    #[command(subcommand)]
    Experiment(ExperimentCommand),
    /// Show the most recent ranking decision for a task.
    Explain { task: String },
}

#[derive(Subcommand, Debug)]
enum FeedbackCommand {
    /// Record a user action.
    Record {
        #[arg(long)]
        action: FeedbackAction,
        #[arg(long)]
        task: String,
        #[arg(long)]
        snooze_minutes: Option<i64>,
    },
    /// Record a task lifecycle transition.
    Transition {
        #[arg(long)]
        task: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Interpret actions whose follow-up window has closed.
    Resolve,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Show,
    Set {
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        rationale: String,
    },
    /// Return to deterministic ordering.
    Rollback {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        rationale: String,
    },
}

#[derive(Subcommand, Debug)]
enum ExperimentCommand {
    /// Compare a candidate config against the live one. Never changes config.
    Run {
        #[arg(long)]
        mode: String,
        #[arg(long)]
        threshold: f64,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        rationale: String,
        #[arg(long)]
        days: Option<u32>,
    },
    Apply {
        run_id: RunId,
        #[arg(long, default_value = "apply")]
        action: ExperimentAction,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        rationale: String,
    },
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    Overview,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;
    init_telemetry(TelemetryConfig::from_level_name(&settings.logging.level, settings.logging.json));

    let app = App::open(settings, cli.db_path)?;
    run(&app, cli.command).await
}

async fn run(app: &App, command: Command) -> Result<()> {
    let now = Utc::now();
    match command {
        Command::Rank { view, tasks, limit } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });
            let request = RankRequest {
                view,
                tasks: read_tasks(&tasks)?,
                now,
                limit,
            };
            let response = app
                .attention()
                .rank(request, &cancel)
                .await
                .map_err(|e| anyhow!("{}: {e}", e.code()))?;
            print_json(&response)
        }
        Command::Reminders { tasks } => {
            let outcomes = app.reminders().evaluate(&read_tasks(&tasks)?, now)?;
            print_json(&outcomes)
        }
        Command::Feedback(cmd) => feedback(app, cmd, now),
        Command::Replay { days, out } => {
            let days = days.unwrap_or(app.settings.replay.window_days);
            let start = now - Duration::days(i64::from(days));
            let report = app
                .evaluator()
                .evaluate(app.history.as_ref(), start, now)
                .map_err(|e| anyhow!("{}: {e}", e.code()))?;
            if !report.rollout_ready {
                warn!("replay gates not all passed");
            }
            match out {
                Some(path) => {
                    let body = serde_json::to_string_pretty(&report)?;
                    std::fs::write(&path, body)
                        .with_context(|| format!("Failed to write report: {}", path.display()))
                }
                None => print_json(&report),
            }
        }
        Command::Config(cmd) => config(app, cmd, now).await,
        Command::Experiment(cmd) => experiment(app, cmd, now).await,
        Command::Explain { task } => {
            let decision = app
                .attention()
                .latest_decision(&TaskId::from_raw(&task))
                .map_err(|e| anyhow!("{}: {e}", e.code()))?;
            print_json(&decision)
        }
    }
}

fn feedback(app: &App, cmd: FeedbackCommand, now: chrono::DateTime<Utc>) -> Result<()> {
    let recorder = app.feedback();
    match cmd {
        FeedbackCommand::Record {
            action,
            task,
            snooze_minutes,
        } => {
            let task_id = TaskId::from_raw(&task);
            let event = match (action, snooze_minutes) {
                (FeedbackAction::Snooze, Some(minutes)) => ActionEvent::snooze(task_id, minutes, now),
                (_, Some(_)) => bail!("--snooze-minutes only applies to snooze"),
                (action, None) => ActionEvent::new(task_id, action, now),
            };
            let entry = recorder.record_action(event)?;
            print_json(&entry)
        }
        FeedbackCommand::Transition { task, from, to } => {
            let entry = recorder.record_transition(TaskTransition {
                id: vigil_core::ids::EventId::new(),
                task_id: TaskId::from_raw(&task),
                from: parse_status(&from)?,
                to: parse_status(&to)?,
                at: now,
            })?;
            print_json(&entry)
        }
        FeedbackCommand::Resolve => {
            let evidence = recorder.resolve(now)?;
            print_json(&evidence)
        }
    }
}

async fn config(app: &App, cmd: ConfigCommand, now: chrono::DateTime<Utc>) -> Result<()> {
    match cmd {
        ConfigCommand::Show => print_json(&app.controller.current()),
        ConfigCommand::Set {
            mode,
            threshold,
            actor,
            rationale,
        } => {
            let update = ControlUpdate {
                actor,
                rationale,
                mode,
                confidence_threshold: threshold,
            };
            let config = app
                .controller
                .apply(update, now)
                .await
                .map_err(|e| anyhow!("{}: {e}", e.code()))?;
            print_json(&config)
        }
        ConfigCommand::Rollback { actor, rationale } => {
            let outcome = app.controller.rollback(&actor, &rationale, now).await;
            if !outcome.audit_persisted {
                warn!("rollback applied but its audit record was not written");
            }
            print_json(&outcome.config)
        }
    }
}

async fn experiment(app: &App, cmd: ExperimentCommand, now: chrono::DateTime<Utc>) -> Result<()> {
    let lab = app.lab();
    let result = match cmd {
        ExperimentCommand::Run {
            mode,
            threshold,
            actor,
            rationale,
            days,
        } => {
            let days = days.unwrap_or(app.settings.replay.window_days);
            let request = ExperimentRequest {
                actor,
                rationale,
                candidate_mode: mode,
                candidate_threshold: threshold,
            };
            lab.run(request, now - Duration::days(i64::from(days)), now, now)
                .map(serde_json::to_value)
        }
        ExperimentCommand::Apply {
            run_id,
            action,
            actor,
            rationale,
        } => lab
            .apply(&run_id, action, &actor, &rationale, now)
            .await
            .map(serde_json::to_value),
        ExperimentCommand::History { limit } => lab.history(limit).map(serde_json::to_value),
        ExperimentCommand::Overview => lab.overview(now).map(serde_json::to_value),
    };
    let value = result.map_err(|e| anyhow!("{}: {e}", e.code()))??;
    print_json(&value)
}

fn read_tasks(path: &Path) -> Result<Vec<TaskSnapshot>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read tasks: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid task list: {}", path.display()))
}

fn parse_status(raw: &str) -> Result<TaskStatus> {
    match serde_json::from_value(serde_json::Value::String(raw.to_string()))? {
        TaskStatus::Unknown => bail!("unknown task status: {raw}"),
        status => Ok(status),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
