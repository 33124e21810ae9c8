//! `kitchen-timers`: interactive kitchen display backend.
//!
//! Runs the timer service against the terminal database and reads commands
//! from stdin, one per line. Lifecycle events are printed as JSON lines so
//! the output can be piped into another process.

use anyhow::Context;
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use the_small_pos_timers_lib::{
    db, diagnostics, init_logging, lifecycle_channel, progress_color, progress_label, AppState,
    Clock, EngineConfig, LifecycleSender, LogNotifier, OrderTimer, Persister, SqliteTimerStore,
    SystemClock, TimerEngine, TimerEventKind, TimerService,
};

#[derive(Parser)]
#[command(version, about = "Kitchen order timers")]
struct Args {
    /// Directory holding pos.db
    #[arg(long, env = "POS_DATA_DIR", default_value = "pos-data")]
    data_dir: PathBuf,
    #[arg(long, env = "POS_LOG_DIR")]
    log_dir: Option<PathBuf>,
    /// Also print the per-second progress updates
    #[arg(long)]
    show_updates: bool,
}

#[derive(Parser)]
#[command(about = "kitchen timer commands")]
struct Repl {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start cooking an order line
    Start {
        order_id: String,
        item_id: String,
        item_name: String,
        minutes: f64,
    },
    Pause {
        order_id: String,
        item_id: String,
    },
    Resume {
        order_id: String,
        item_id: String,
    },
    Complete {
        order_id: String,
        item_id: String,
    },
    Cancel {
        order_id: String,
        item_id: String,
    },
    Status {
        order_id: String,
        item_id: String,
    },
    /// Live timers, or every timer of one order
    List {
        #[arg(long)]
        order: Option<String>,
    },
    Stats,
    /// Forget completed timers of an order
    Clear {
        order_id: String,
    },
    /// Report an app lifecycle change: active, inactive or background
    App {
        state: String,
    },
    /// Report a delivered timer notification
    Notified {
        order_id: String,
        item_id: String,
    },
    Health,
    About,
    Exit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_dir = args.log_dir.clone().unwrap_or_else(diagnostics::get_log_dir);
    let _log_guard = init_logging(&log_dir).context("initialize logging")?;
    info!("Starting kitchen timers v{}", env!("CARGO_PKG_VERSION"));

    let db = Arc::new(db::init(&args.data_dir).context("open timer database")?);
    let config = {
        let conn = db.conn.lock().unwrap_or_else(|e| e.into_inner());
        EngineConfig::from_settings(&conn)
    };

    let (persister, persist_worker) =
        Persister::background(Arc::new(SqliteTimerStore::new(db.clone())));
    let mut engine = TimerEngine::new(
        Arc::new(SystemClock),
        Arc::new(LogNotifier::new()),
        persister,
        config,
    );
    engine.recover();

    let show_updates = args.show_updates;
    engine.subscribe_all(move |event| {
        if !show_updates && event.kind() == TimerEventKind::Update {
            return;
        }
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Failed to encode timer event"),
        }
    });

    let (lifecycle, lifecycle_rx) = lifecycle_channel();
    let service = TimerService::spawn(engine, lifecycle_rx, Some(persist_worker));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().context("flush stdout")?;

        let Some(line) = lines.next_line().await.context("read stdin")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match respond(line, &service, &lifecycle, &db) {
            Ok(true) => break,
            Ok(false) => {}
            Err(err) => println!("{err}"),
        }
    }

    service.shutdown().await;
    info!("Kitchen timers stopped");
    Ok(())
}

fn respond(
    line: &str,
    service: &TimerService,
    lifecycle: &LifecycleSender,
    db: &db::DbState,
) -> Result<bool, String> {
    let mut args = shlex::split(line).ok_or("error: Invalid quoting")?;
    args.insert(0, "kitchen-timers".to_string());
    let repl = Repl::try_parse_from(args).map_err(|e| e.to_string())?;

    match repl.command {
        Some(Command::Start {
            order_id,
            item_id,
            item_name,
            minutes,
        }) => {
            service
                .lock()
                .start_timer(&order_id, &item_id, &item_name, minutes)
                .map_err(|e| format!("error: {e}"))?;
        }
        Some(Command::Pause { order_id, item_id }) => {
            service.lock().pause_timer(&order_id, &item_id);
        }
        Some(Command::Resume { order_id, item_id }) => {
            service.lock().resume_timer(&order_id, &item_id);
        }
        Some(Command::Complete { order_id, item_id }) => {
            service.lock().complete_timer(&order_id, &item_id);
        }
        Some(Command::Cancel { order_id, item_id }) => {
            service.lock().cancel_timer(&order_id, &item_id);
        }
        Some(Command::Status { order_id, item_id }) => {
            let engine = service.lock();
            let progress = engine.timer_progress(&order_id, &item_id);
            let status = engine
                .timer_status(&order_id, &item_id)
                .map_or("inactive", |s| s.as_str());
            println!(
                "{status} {progress:.1}% {} {}",
                progress_label(progress),
                progress_color(progress)
            );
        }
        Some(Command::List { order }) => {
            let engine = service.lock();
            let timers = match order {
                Some(order_id) => engine.order_timers(&order_id),
                None => engine.active_timers(),
            };
            let now = SystemClock.now_ms();
            for timer in &timers {
                println!("{}", describe(timer, now));
            }
            if timers.is_empty() {
                println!("no timers");
            }
        }
        Some(Command::Stats) => {
            let stats = service.lock().stats();
            println!(
                "total {} | active {} | paused {} | completed {} | cancelled {}",
                stats.total, stats.active, stats.paused, stats.completed, stats.cancelled
            );
        }
        Some(Command::Clear { order_id }) => {
            let removed = service.lock().clear_completed(&order_id);
            println!("cleared {removed} completed timer(s)");
        }
        Some(Command::App { state }) => {
            let next = AppState::parse(&state)
                .ok_or_else(|| format!("error: unknown app state '{state}'"))?;
            lifecycle
                .send(next)
                .map_err(|_| "error: timer driver is not running".to_string())?;
        }
        Some(Command::Notified { order_id, item_id }) => {
            service
                .lock()
                .handle_notification_received(&order_id, &item_id);
        }
        Some(Command::Health) => {
            let health = diagnostics::get_timer_health(&service.lock(), Some(db));
            println!(
                "{}",
                serde_json::to_string_pretty(&health).map_err(|e| e.to_string())?
            );
        }
        Some(Command::About) => {
            println!("{}", diagnostics::get_about_info());
        }
        Some(Command::Exit) => {
            println!("quitting...");
            return Ok(true);
        }
        None => {}
    }
    Ok(false)
}

fn describe(timer: &OrderTimer, now_ms: i64) -> String {
    let finish = DateTime::from_timestamp_millis(timer.estimated_finish_time())
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    let remaining = if timer.status.is_live() {
        format!("{:.1} min left", timer.minutes_remaining(now_ms))
    } else {
        "done".to_string()
    };
    format!(
        "{}/{} {:<20} {:<9} {:>5.1}% {:<15} {} (ready {})",
        timer.order_id,
        timer.item_id,
        timer.item_name,
        timer.status,
        timer.current_progress,
        progress_label(timer.current_progress),
        remaining,
        finish
    )
}
