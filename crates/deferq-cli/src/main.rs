use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use deferq_core::FuturePublisher;
use deferq_core::app::{ScheduleCounts, SchedulerServiceBuilder};
use deferq_core::config::SchedulerConfig;
use deferq_core::domain::ExchangeKind;
use deferq_core::impls::{InMemoryBus, InMemoryScheduleStore, SqliteScheduleStore};
use deferq_core::ports::{MessageBus, ScheduleStore};
use deferq_core::typed::{Message, MessageSerializer};

#[derive(Parser)]
#[command(name = "deferq", version, about = "Durable delayed message delivery")]
struct Cli {
    /// TOML configuration file (overridden by DEFERQ_* variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and a producer in one process on an in-memory bus
    Demo(DemoArgs),
    /// Print schedule counts of a SQLite store
    Status {
        /// Database file (defaults to `database_path` from the config)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[derive(Args)]
struct DemoArgs {
    /// Number of reminders to schedule
    #[arg(long, default_value_t = 3)]
    messages: u32,

    /// Seconds between consecutive reminders
    #[arg(long, default_value_t = 2)]
    delay_secs: u32,

    /// Cancel the last reminder right after scheduling it
    #[arg(long)]
    cancel_last: bool,

    /// Keep schedules in memory instead of the configured database
    #[arg(long)]
    in_memory: bool,
}

/// デモ用のメッセージ
#[derive(Debug, Serialize, Deserialize)]
struct Reminder {
    seq: u32,
    text: String,
}

impl Message for Reminder {
    const TYPE: &'static str = "deferq.demo.reminder.v1";
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("deferq={level},deferq_core={level},warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = SchedulerConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Demo(args) => demo(config, args).await,
        Command::Status { db } => status(config, db).await,
    }
}

async fn demo(config: SchedulerConfig, args: DemoArgs) -> Result<(), Box<dyn Error>> {
    let store: Arc<dyn ScheduleStore> = if args.in_memory {
        Arc::new(InMemoryScheduleStore::new(config.delete_timeout()))
    } else {
        Arc::new(SqliteScheduleStore::open(&config.database_path, config.delete_timeout()).await?)
    };
    let bus = InMemoryBus::new();

    let mut service = SchedulerServiceBuilder::new()
        .store(store)
        .bus(Arc::new(bus.clone()))
        .config(config)
        .build()?;
    service.start().await?;

    // 配送先を先に bind しておく（未 bind のメッセージは捨てられる）
    bus.declare_exchange(Reminder::TYPE, ExchangeKind::Topic).await?;
    let mut deliveries = bus.subscribe(Reminder::TYPE, "#", "deferq-demo").await?;

    let publisher = FuturePublisher::new(Arc::new(bus.clone()));
    for seq in 1..=args.messages {
        let delay = Duration::seconds(i64::from(seq) * i64::from(args.delay_secs));
        let key = format!("reminder-{seq}");
        publisher
            .future_publish_after(
                delay,
                &Reminder {
                    seq,
                    text: format!("reminder #{seq}"),
                },
                Some(key.as_str()),
            )
            .await?;
        println!("scheduled reminder #{seq} in {}s", delay.num_seconds());
    }

    let mut expected = args.messages;
    if args.cancel_last && args.messages > 0 {
        publisher
            .cancel_future_publish(&format!("reminder-{}", args.messages))
            .await?;
        println!("cancelled reminder #{}", args.messages);
        expected -= 1;
    }

    let serializer = MessageSerializer::new();
    let mut received = 0;
    while received < expected {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            delivery = deliveries.recv() => {
                let Some(delivery) = delivery else {
                    break;
                };
                let reminder: Reminder =
                    serializer.deserialize(&delivery.body, &delivery.properties)?;
                println!("received {} (seq={})", reminder.text, reminder.seq);
                received += 1;
            }
        }
    }

    service.stop().await;
    print_counts(&service.counts().await?)?;
    Ok(())
}

async fn status(config: SchedulerConfig, db: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    print_counts(&load_counts(config, db).await?)
}

/// Counts of the SQLite store at `db`, or at the configured path.
async fn load_counts(
    config: SchedulerConfig,
    db: Option<PathBuf>,
) -> Result<ScheduleCounts, Box<dyn Error>> {
    let delete_timeout = config.delete_timeout();
    let path = db.unwrap_or(config.database_path);
    let store = SqliteScheduleStore::open(&path, delete_timeout).await?;
    let counts = store.counts().await?;
    store.close().await?;
    Ok(counts)
}

fn print_counts(counts: &ScheduleCounts) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(counts)?);
    Ok(())
}
