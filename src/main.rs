//! Habit Ledger CLI
//!
//! Track daily habits from the terminal. Everything is stored locally;
//! cloud sync kicks in once `remote set` has been run.

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use console::{style, Emoji};
use std::path::{Path, PathBuf};

use habit_ledger::app::{StatusKind, StatusMessage, Tracker};
use habit_ledger::config::{AppConfig, SyncSettings};
use habit_ledger::entries::{day_key, entry_for, parse_day, DayRecord};
use habit_ledger::report::DateRange;

static CHECK: Emoji<'_, '_> = Emoji("✓ ", "+ ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");
static INFO: Emoji<'_, '_> = Emoji("ℹ ", "i ");
static CLOUD: Emoji<'_, '_> = Emoji("☁ ", "~ ");

#[derive(Parser)]
#[command(name = "habit-ledger")]
#[command(author = "e421")]
#[command(version)]
#[command(about = "Habit Ledger - offline-first habit tracker with optional cloud sync")]
#[command(long_about = r#"
Habit Ledger records which habits you kept each day, with an optional note
per habit (minutes, pages, ...). Data lives in a local SQLite file and is
pushed to a remote document service when cloud sync is configured.

Examples:
  habit-ledger habits list                     # Show registered habits
  habit-ledger log exercise --text "30 min"    # Mark today's exercise done
  habit-ledger show --date 2024-01-05          # Show one day
  habit-ledger report --days 7                 # Stats for the last week
  habit-ledger remote set --file remote.json   # Enable cloud sync
  habit-ledger sync                            # Push and pull everything
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the habit list
    Habits {
        #[command(subcommand)]
        action: HabitsAction,
    },

    /// Record a habit for a day
    Log {
        /// Habit id
        habit: String,

        /// Day to record (default: today)
        #[arg(short, long)]
        date: Option<String>,

        /// Note for habits that take one
        #[arg(short, long)]
        text: Option<String>,

        /// Mark as not done
        #[arg(long)]
        undo: bool,
    },

    /// Show the entries of a day
    Show {
        /// Day to show (default: today)
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Completion statistics
    Report {
        /// Last N days (default from config)
        #[arg(short, long)]
        days: Option<u32>,

        /// Calendar month, YYYY-MM
        #[arg(short, long, conflicts_with = "days")]
        month: Option<String>,

        /// First day, YYYY-MM-DD
        #[arg(long, conflicts_with_all = ["days", "month"])]
        from: Option<String>,

        /// Last day, YYYY-MM-DD (default: today)
        #[arg(long, requires = "from")]
        to: Option<String>,
    },

    /// Push pending days and habits, then pull from the remote
    Sync,

    /// List days waiting to be pushed
    Pending,

    /// Cloud sync settings
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },

    /// Sign in to the remote with the stored email and password
    Signin,

    /// Create a remote account from the stored email and password
    Signup,

    /// Sign out of the remote
    Signout,

    /// Write a JSON backup
    Export {
        /// Output file (default: stdout)
        output: Option<PathBuf>,
    },

    /// Restore a JSON backup, replacing the sections it contains
    Import {
        /// Backup file
        file: PathBuf,
    },

    /// Protect the tracker with a username and password
    SetupLogin { username: String, password: String },

    /// Unlock the tracker
    Login { username: String, password: String },

    /// Lock the tracker
    Logout,
}

#[derive(Subcommand)]
pub enum HabitsAction {
    /// List registered habits
    List,

    /// Register a new habit
    Add {
        /// Display name; the id is derived from it
        name: String,

        /// Label of the per-day note, e.g. "Minutes"
        #[arg(short, long)]
        text_label: Option<String>,
    },

    /// Remove a habit (recorded entries are kept)
    Remove {
        /// Habit id
        id: String,
    },
}

#[derive(Subcommand)]
pub enum RemoteAction {
    /// Store the remote configuration
    Set {
        /// Remote configuration JSON ({"apiKey": ..., "projectId": ..., "endpoint": ...})
        #[arg(required_unless_present = "file")]
        json: Option<String>,

        /// Read the remote configuration from a file
        #[arg(short, long, conflicts_with = "json")]
        file: Option<PathBuf>,

        /// Account email for email sign-in
        #[arg(long)]
        email: Option<String>,

        /// Account password for email sign-in
        #[arg(long)]
        password: Option<String>,
    },

    /// Remove the remote configuration
    Clear,

    /// Show sync state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = AppConfig::load(cli.config.as_deref());
    let tracker = Tracker::open(config).context("Failed to open local store")?;

    match cli.command {
        Commands::SetupLogin { username, password } => {
            cmd_setup_login(&tracker, &username, &password)
        }
        Commands::Login { username, password } => cmd_login(&tracker, &username, &password),
        Commands::Logout => {
            tracker.access().logout();
            println!("{} Locked", CHECK);
            Ok(())
        }
        command => {
            tracker.access().require_unlocked()?;
            run_unlocked(&tracker, command).await
        }
    }
}

async fn run_unlocked(tracker: &Tracker, command: Commands) -> Result<()> {
    match command {
        Commands::Habits { action } => match action {
            HabitsAction::List => cmd_habits_list(tracker),
            HabitsAction::Add { name, text_label } => {
                cmd_habits_add(tracker, &name, text_label).await
            }
            HabitsAction::Remove { id } => cmd_habits_remove(tracker, &id).await,
        },
        Commands::Log {
            habit,
            date,
            text,
            undo,
        } => cmd_log(tracker, &habit, date, text, undo).await,
        Commands::Show { date } => cmd_show(tracker, date),
        Commands::Report {
            days,
            month,
            from,
            to,
        } => cmd_report(tracker, days, month, from, to),
        Commands::Sync => {
            println!("{} Syncing...", CLOUD);
            print_status(&tracker.sync_now().await);
            Ok(())
        }
        Commands::Pending => cmd_pending(tracker),
        Commands::Remote { action } => match action {
            RemoteAction::Set {
                json,
                file,
                email,
                password,
            } => cmd_remote_set(tracker, json, file, email, password),
            RemoteAction::Clear => {
                tracker.clear_remote();
                println!("{} Cloud sync disabled", CHECK);
                Ok(())
            }
            RemoteAction::Status => cmd_remote_status(tracker).await,
        },
        Commands::Signin => {
            let identity = tracker.sign_in().await?;
            println!("{} Signed in as {}", CHECK, style(identity).cyan());
            Ok(())
        }
        Commands::Signup => {
            let identity = tracker.sign_up().await?;
            println!("{} Account created for {}", CHECK, style(identity).cyan());
            Ok(())
        }
        Commands::Signout => {
            tracker.sign_out().await?;
            println!("{} Signed out", CHECK);
            Ok(())
        }
        Commands::Export { output } => cmd_export(tracker, output),
        Commands::Import { file } => cmd_import(tracker, &file),
        Commands::SetupLogin { .. } | Commands::Login { .. } | Commands::Logout => Ok(()),
    }
}

fn print_status(status: &StatusMessage) {
    match status.kind {
        StatusKind::Success => println!("{} {}", CHECK, style(&status.text).green()),
        StatusKind::Info => println!("{} {}", INFO, status.text),
        StatusKind::Failure => println!("{} {}", CROSS, style(&status.text).yellow()),
    }
}

fn today() -> String {
    day_key(Local::now().date_naive())
}

fn cmd_habits_list(tracker: &Tracker) -> Result<()> {
    println!("{}", style("Habits").bold().underlined());
    for habit in tracker.habits() {
        let label = if habit.has_text {
            format!(" ({})", habit.text_label)
        } else {
            String::new()
        };
        println!(
            "  {} {}{}",
            style(&habit.id).cyan(),
            habit.name,
            style(label).dim()
        );
    }
    Ok(())
}

async fn cmd_habits_add(tracker: &Tracker, name: &str, text_label: Option<String>) -> Result<()> {
    let has_text = text_label.is_some();
    let (_, status) = tracker
        .add_habit(name, has_text, text_label.as_deref().unwrap_or_default())
        .await?;
    print_status(&status);
    Ok(())
}

async fn cmd_habits_remove(tracker: &Tracker, id: &str) -> Result<()> {
    let (_, status) = tracker.delete_habit(id).await?;
    print_status(&status);
    Ok(())
}

async fn cmd_log(
    tracker: &Tracker,
    habit_id: &str,
    date: Option<String>,
    text: Option<String>,
    undo: bool,
) -> Result<()> {
    let date = date.unwrap_or_else(today);
    let habit = tracker
        .habits()
        .into_iter()
        .find(|h| h.id == habit_id)
        .ok_or_else(|| anyhow!("Unknown habit '{}' (see `habits list`)", habit_id))?;

    let mut entry = entry_for(&tracker.day(&date)?, &habit.id);
    entry.done = !undo;
    if let Some(text) = text {
        entry.text = text;
    }

    let patch = DayRecord::from([(habit.id.clone(), entry)]);
    let status = tracker.save_day(&date, &patch).await?;
    print_status(&status);
    Ok(())
}

fn cmd_show(tracker: &Tracker, date: Option<String>) -> Result<()> {
    let date = date.unwrap_or_else(today);
    let day = tracker.day(&date)?;

    println!("{}", style(&date).bold().underlined());
    for habit in tracker.habits() {
        let entry = entry_for(&day, &habit.id);
        let mark = if entry.done {
            style("●").green()
        } else {
            style("○").dim()
        };
        let note = if habit.has_text && !entry.text.is_empty() {
            format!("  {}: {}", habit.text_label, entry.text)
        } else {
            String::new()
        };
        println!("  {} {}{}", mark, habit.name, style(note).dim());
    }
    Ok(())
}

fn report_range(
    tracker: &Tracker,
    days: Option<u32>,
    month: Option<String>,
    from: Option<String>,
    to: Option<String>,
) -> Result<DateRange> {
    let today: NaiveDate = Local::now().date_naive();

    if let Some(month) = month {
        let first = parse_day(&format!("{}-01", month))
            .with_context(|| format!("Invalid month '{}', expected YYYY-MM", month))?;
        return Ok(DateRange::month_of(first));
    }
    if let Some(from) = from {
        let to = to.unwrap_or_else(|| day_key(today));
        return Ok(DateRange::parse(&from, &to)?);
    }
    let days = days.unwrap_or(tracker.config().default_report_days);
    Ok(DateRange::last_days(days, today)?)
}

fn cmd_report(
    tracker: &Tracker,
    days: Option<u32>,
    month: Option<String>,
    from: Option<String>,
    to: Option<String>,
) -> Result<()> {
    let range = report_range(tracker, days, month, from, to)?;
    let report = tracker.report(range);

    println!(
        "{} {} .. {} ({} days)",
        style("Report").bold().underlined(),
        range.start(),
        range.end(),
        range.day_count()
    );
    println!();

    for stats in &report.habits {
        println!(
            "  {} {}/{} days ({:.0}%)",
            style(&stats.name).white().bold(),
            stats.days_done,
            range.day_count(),
            stats.completion_rate * 100.0
        );
        println!(
            "      Streak: {} current, {} longest",
            stats.current_streak, stats.longest_streak
        );
        if let Some(average) = stats.numeric_average() {
            println!(
                "      Total: {:.1}  Average: {:.1} over {} days",
                stats.numeric_total, average, stats.numeric_count
            );
        }
    }

    println!();
    println!(
        "  {} {:.0}% of habit-days done",
        style("Overall:").bold(),
        report.overall_rate() * 100.0
    );
    Ok(())
}

fn cmd_pending(tracker: &Tracker) -> Result<()> {
    let pending = tracker.pending_days();
    if pending.is_empty() {
        println!("{} Nothing pending", CHECK);
        return Ok(());
    }

    println!("{} {} days waiting to be pushed:", INFO, pending.len());
    for date in pending {
        println!("  {}", date);
    }
    Ok(())
}

fn cmd_remote_set(
    tracker: &Tracker,
    json: Option<String>,
    file: Option<PathBuf>,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let remote_config_text = match (json, file) {
        (Some(json), _) => json,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => return Err(anyhow!("Remote configuration JSON or --file is required")),
    };

    let previous = tracker.sync_settings().unwrap_or_default();
    let settings = SyncSettings {
        remote_config_text,
        email: email.unwrap_or(previous.email),
        password: password.unwrap_or(previous.password),
    };
    tracker.configure_remote(settings)?;

    println!("{} Cloud sync configured", CHECK);
    Ok(())
}

async fn cmd_remote_status(tracker: &Tracker) -> Result<()> {
    let engine = tracker.engine();
    let Some(settings) = tracker.sync_settings() else {
        println!("{} Cloud sync is not configured", INFO);
        return Ok(());
    };

    match settings.remote_config() {
        Ok(config) => println!("  Project:  {}", style(&config.project_id).cyan()),
        Err(e) => println!("  Project:  {}", style(e).red()),
    }
    if settings.has_email_login() {
        println!("  Email:    {}", settings.email.trim());
    }

    match engine.initialize().await {
        Ok(identity) => println!("  Identity: {}", style(identity).green()),
        Err(e) => println!("  Identity: {}", style(e).yellow()),
    }
    println!("  State:    {}", engine.state());
    println!("  Pending:  {} days", engine.pending().list().len());
    Ok(())
}

fn cmd_export(tracker: &Tracker, output: Option<PathBuf>) -> Result<()> {
    let json = tracker.export_backup()?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} Backup written to {}", CHECK, style(path.display()).dim());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn cmd_import(tracker: &Tracker, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let summary = tracker.import_backup(&text)?;

    if summary.is_empty() {
        println!("{} Backup contained nothing to import", INFO);
        return Ok(());
    }
    if let Some(count) = summary.habits {
        println!("{} Restored {} habits", CHECK, count);
    }
    if let Some(count) = summary.days {
        println!("{} Restored {} days", CHECK, count);
    }
    if summary.config {
        println!("{} Restored sync settings", CHECK);
    }
    Ok(())
}

fn cmd_setup_login(tracker: &Tracker, username: &str, password: &str) -> Result<()> {
    tracker.access().setup(username, password)?;
    println!("{} Login set up. Run `login` to unlock.", CHECK);
    Ok(())
}

fn cmd_login(tracker: &Tracker, username: &str, password: &str) -> Result<()> {
    let session = tracker.access().login(username, password)?;
    let until = session
        .expires_at()
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    println!("{} Unlocked until {}", CHECK, style(until).dim());
    Ok(())
}
