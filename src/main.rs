//! Ummah client core - command-line shell
//!
//! Exercises the core without a UI: stream status, schedule, sebha and
//! preferences against the configured backend and the local data dir.

use ummah_core::bus::{self, RoomId};
use ummah_core::config::{self, Config};
use ummah_core::preferences::{Preferences, Theme};
use ummah_core::schedule::{self, CalendarView, ScheduleEvent, ScheduleStore};
use ummah_core::sebha::{Sebha, Tick};
use ummah_core::storage::LocalStore;
use ummah_core::stream::{self, HttpStreamApi, Startable, StreamApi, StreamWatcher};

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ummah")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ummah community app client core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend API base URL (overrides config)
    #[arg(long, global = true)]
    backend_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the status of a live stream once
    Status {
        /// Live stream / room id
        room: String,
    },

    /// Poll a live stream until it ends (Ctrl+C to stop)
    Watch {
        /// Live stream / room id
        room: String,
    },

    /// Personal schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Sebha counter
    Sebha {
        #[command(subcommand)]
        action: Option<SebhaAction>,
    },

    /// Show or set the theme preference
    Theme {
        /// light, dark or system
        value: Option<Theme>,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List events for a day (default: today)
    List {
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Add an event
    Add {
        /// Date (yyyy-mm-dd)
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
        /// Event title
        title: String,
        /// Time (HH:MM)
        #[arg(short, long)]
        time: String,
        /// Display color
        #[arg(short, long)]
        color: Option<String>,
    },
    /// Delete the event at INDEX (as shown by `list`)
    Delete {
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
        index: usize,
    },
    /// Print the month grid, marking days with events
    Month {
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Print the week strip with its events
    Week {
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum SebhaAction {
    /// Count one bead
    Tick,
    /// Zero the count and rounds
    Reset,
    /// Set the beads per round
    Target { value: u32 },
    /// Show the current count
    Show,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    schedule::parse_iso_date(raw).ok_or_else(|| format!("invalid date {:?}, expected yyyy-mm-dd", raw))
}

fn parse_room(raw: &str) -> Result<RoomId> {
    RoomId::parse_opt(Some(raw)).context("Missing room ID")
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout is command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ummah_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = config::load_config()?;
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
        config.validate()?;
    }

    let data_dir = config::get_data_dir();
    let store = LocalStore::open_file(&data_dir);
    tracing::debug!("Data directory: {:?}", data_dir);

    match cli.command {
        Commands::Status { room } => status(&config, parse_room(&room)?).await,
        Commands::Watch { room } => watch(&config, parse_room(&room)?).await,
        Commands::Schedule { action } => run_schedule(store, action),
        Commands::Sebha { action } => run_sebha(store, action.unwrap_or(SebhaAction::Show)),
        Commands::Theme { value } => {
            let prefs = Preferences::new(store);
            if let Some(theme) = value {
                prefs.set_theme(theme)?;
            }
            println!("{}", prefs.theme());
            Ok(())
        }
    }
}

async fn status(config: &Config, room: RoomId) -> Result<()> {
    let api = HttpStreamApi::new(config.backend_base(), config.request_timeout())?;
    let info = api.fetch_status(room).await?;
    println!("{}", info.summary());
    Ok(())
}

async fn watch(config: &Config, room: RoomId) -> Result<()> {
    let bus = bus::create_bus();
    let api = Arc::new(HttpStreamApi::new(
        config.backend_base(),
        config.request_timeout(),
    )?);
    let watcher = StreamWatcher::new(room, config.poll_interval(), api, bus.clone());

    let services: Vec<Arc<dyn Startable>> = vec![Arc::new(watcher.clone())];
    for service in &services {
        service.start().await?;
    }

    let reason = tokio::select! {
        _ = watcher.finished() => "stream ended",
        _ = stream::shutdown_signal() => "interrupted",
    };
    stream::stop_all(&bus, &services, Some(reason.to_string())).await;

    if let Some(info) = watcher.last().await {
        println!("{}", info.summary());
    }
    Ok(())
}

fn run_schedule(store: LocalStore, action: ScheduleAction) -> Result<()> {
    let mut planner = ScheduleStore::open(store);

    match action {
        ScheduleAction::List { date } => {
            let date = date.unwrap_or_else(today);
            println!("{}", schedule::calendar::title(date, CalendarView::Day));
            print_day(&planner, date);
        }
        ScheduleAction::Add {
            date,
            title,
            time,
            color,
        } => {
            let mut event = ScheduleEvent::new(title, time);
            if let Some(color) = color {
                event = event.with_color(color);
            }
            let count = planner.add(date, event)?;
            println!("Added ({} on {})", count, schedule::iso_date(date));
        }
        ScheduleAction::Delete { date, index } => {
            let removed = planner.delete(date, index)?;
            println!("Deleted {} {}", removed.time, removed.title);
        }
        ScheduleAction::Month { date } => {
            let anchor = date.unwrap_or_else(today);
            print_month(&planner, anchor);
        }
        ScheduleAction::Week { date } => {
            let anchor = date.unwrap_or_else(today);
            println!("{}", schedule::calendar::title(anchor, CalendarView::Week));
            for day in schedule::week_strip(anchor) {
                println!("{}", day.format("%a %d"));
                print_day(&planner, day);
            }
        }
    }
    Ok(())
}

fn print_day(schedule: &ScheduleStore, date: NaiveDate) {
    let events = schedule.events_on(date);
    if events.is_empty() {
        println!("  (no events)");
    }
    for (index, event) in events.iter().enumerate() {
        println!("  [{}] {} {} ({})", index, event.time, event.title, event.color);
    }
}

fn print_month(schedule: &ScheduleStore, anchor: NaiveDate) {
    let grid = schedule::month_grid(anchor);
    let (first, last) = match (grid.first(), grid.last()) {
        (Some(first), Some(last)) => (first[0], last[6]),
        _ => return,
    };
    let marked = schedule.dates_with_events(first, last);

    println!("{}", schedule::calendar::title(anchor, CalendarView::Month));
    println!(" Su  Mo  Tu  We  Th  Fr  Sa");
    for week in grid {
        let row: Vec<String> = week
            .iter()
            .map(|day| {
                if day.month() != anchor.month() {
                    "    ".to_string()
                } else {
                    let marker = if marked.contains(day) { '*' } else { ' ' };
                    format!(" {:>2}{}", day.day(), marker)
                }
            })
            .collect();
        println!("{}", row.join(""));
    }
}

fn run_sebha(store: LocalStore, action: SebhaAction) -> Result<()> {
    let mut sebha = Sebha::open(store);

    match action {
        SebhaAction::Tick => match sebha.increment()? {
            Tick::Counted(count) => println!("{}/{}", count, sebha.state().target),
            Tick::RoundComplete { rounds } => println!("Round complete ({} total)", rounds),
        },
        SebhaAction::Reset => {
            sebha.reset()?;
            println!("Reset");
        }
        SebhaAction::Target { value } => {
            sebha.set_target(value)?;
            println!("Target set to {}", value);
        }
        SebhaAction::Show => {
            let state = sebha.state();
            println!(
                "{}/{} (rounds: {})",
                state.count, state.target, state.rounds
            );
        }
    }
    Ok(())
}
