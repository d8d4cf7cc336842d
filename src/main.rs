use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use obserk_lib::{
    AlertSink, Collaborators, CommandClassifier, CommandImageSource, Database, EngineError,
    FanoutAlertSink, FileImageSource, ImageSource, LogAlertSink, MonitorEvent, RecordUpdate,
    SessionController, SessionRecord, SettingsStore, StopOutcome,
};

#[derive(Parser)]
#[command(name = "obserk")]
#[command(about = "Monitor study sessions and score focus efficiency", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "~/.obserk", global = true)]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session and monitor until Ctrl-C.
    Run(RunArgs),

    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Tag the most recent session.
    Label { text: String },

    Edit {
        id: String,

        #[arg(long, conflicts_with = "clear_label")]
        label: Option<String>,

        #[arg(long)]
        clear_label: bool,

        #[arg(long, help = "Corrected study time in minutes")]
        minutes: Option<f64>,
    },

    Labels,

    /// Print the effective engine configuration.
    Config,

    /// Time since the last finished session.
    Since,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    interval_ms: Option<u64>,

    #[arg(long)]
    threshold: Option<u32>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long)]
    min_minutes: Option<u32>,

    #[arg(long, help = "Shell command whose stdout is one encoded frame")]
    capture_cmd: Option<String>,

    #[arg(long, conflicts_with = "capture_cmd", help = "Snapshot file refreshed by a camera process")]
    frame_file: Option<PathBuf>,

    #[arg(long, help = "Shell command that reads a frame on stdin and prints a verdict")]
    classify_cmd: String,

    #[arg(long, help = "Save the overrides as the new defaults")]
    save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    obserk_lib::init_logging();

    let cli = Cli::parse();
    let data_dir = expand_home(&cli.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

    match cli.command {
        Commands::Run(args) => run_monitor(&data_dir, args).await,
        Commands::History { limit } => {
            let db = open_db(&data_dir)?;
            let records = db.list_records(limit, 0).await?;
            if records.is_empty() {
                println!("No sessions recorded yet.");
            }
            for record in &records {
                print_record_line(record);
            }
            Ok(())
        }
        Commands::Label { text } => {
            let db = open_db(&data_dir)?;
            match db.label_latest(text).await? {
                Some(record) => print_record_line(&record),
                None => println!("No sessions recorded yet."),
            }
            Ok(())
        }
        Commands::Edit {
            id,
            label,
            clear_label,
            minutes,
        } => {
            let update = RecordUpdate {
                label: if clear_label { Some(None) } else { label.map(Some) },
                duration_minutes: minutes,
            };
            if update.is_empty() {
                bail!("nothing to edit; pass --label, --clear-label or --minutes");
            }
            let db = open_db(&data_dir)?;
            let record = db.update_record(&id, update).await?;
            print_record_line(&record);
            Ok(())
        }
        Commands::Labels => {
            let db = open_db(&data_dir)?;
            for label in db.list_labels().await? {
                println!("{:>4}  {}", label.id, label.name);
            }
            Ok(())
        }
        Commands::Config => {
            let settings = SettingsStore::new(data_dir.join("settings.json"))?;
            let config = settings.engine().with_env_overrides();
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Since => {
            let db = open_db(&data_dir)?;
            match db.last_finished_at().await? {
                Some(finished) => {
                    let elapsed = (Utc::now() - finished).num_seconds().max(0);
                    println!(
                        "{:02}:{:02}:{:02}",
                        elapsed / 3600,
                        (elapsed % 3600) / 60,
                        elapsed % 60
                    );
                }
                None => println!("No sessions recorded yet."),
            }
            Ok(())
        }
    }
}

async fn run_monitor(data_dir: &std::path::Path, args: RunArgs) -> Result<()> {
    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let mut config = settings.engine();
    if let Some(interval_ms) = args.interval_ms {
        config.sample_interval_ms = interval_ms;
    }
    if let Some(threshold) = args.threshold {
        config.alert_threshold = threshold;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.cycle_timeout_ms = timeout_ms;
    }
    if let Some(min_minutes) = args.min_minutes {
        config.min_persist_minutes = min_minutes;
    }
    if args.save {
        settings.update_engine(config.clone())?;
    }
    let config = config.with_env_overrides();

    let source: Arc<dyn ImageSource> = match (args.capture_cmd, args.frame_file) {
        (Some(command), _) => Arc::new(CommandImageSource::new(command)),
        (None, Some(path)) => Arc::new(FileImageSource::new(path)),
        (None, None) => bail!("one of --capture-cmd or --frame-file is required"),
    };

    let db = open_db(data_dir)?;
    let controller = SessionController::new(
        config,
        Collaborators {
            source,
            classifier: Arc::new(CommandClassifier::new(args.classify_cmd)),
            store: Arc::new(db),
            alert_sink: alert_sink(),
        },
    )?;

    if let Some(record) = controller.recover_interrupted().await? {
        warn!("Recovered an interrupted session from {}", record.start_time);
        print_record_line(&record);
    }

    let mut events = controller.events();
    let session = controller.start().await?;
    println!(
        "Session {} started; sampling every {}s. Ctrl-C to stop.",
        session.id,
        controller.config().sample_interval_ms / 1000
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(MonitorEvent::OutcomeRecorded { tick, outcome, counters, .. }) => {
                    info!(
                        "tick {tick}: {outcome:?} | {}/{} engaged ({:.1}%)",
                        counters.effective_ticks,
                        counters.total_ticks,
                        counters.efficiency()
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {skipped} monitor events"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    match controller.stop().await {
        Ok(Some(StopOutcome::Persisted(record))) => {
            println!("Session saved.");
            print_record_line(&record);
        }
        Ok(Some(StopOutcome::Discarded(record))) => {
            println!(
                "Session too short to save ({:.1} min).",
                record.total_elapsed_minutes
            );
        }
        Ok(None) => {}
        Err(EngineError::Persist(err)) => {
            warn!("Saving failed ({err:#}); retrying once");
            for record in controller.retry_persist().await? {
                println!("Session saved.");
                print_record_line(&record);
            }
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}

fn open_db(data_dir: &std::path::Path) -> Result<Database> {
    Database::new(data_dir.join("obserk.sqlite3"))
}

#[allow(unused_mut)]
fn alert_sink() -> Arc<dyn AlertSink> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogAlertSink)];
    #[cfg(feature = "chime")]
    sinks.push(Arc::new(obserk_lib::audio::ChimeAlertSink::new(0.6)));
    Arc::new(FanoutAlertSink::new(sinks))
}

fn print_record_line(record: &SessionRecord) {
    println!(
        "{}  {}  {:>6.1} min studied / {:>6.1} min  {:>5.1}%  {:<11}  {}  {}",
        record.date,
        record.start_time.with_timezone(&Local).format("%H:%M"),
        record.duration_minutes,
        record.total_elapsed_minutes,
        record.efficiency,
        record.status.as_str(),
        record.label.as_deref().unwrap_or("-"),
        record.id
    );
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
