//! # SnackBell: Snack Deadline Reminders
//!
//! Pushes a reminder to everyone who hasn't picked a snack before the weekly deadline.
//!
//! Usage:
//!   snackbell serve                 # Scheduler loop + HTTP gateway
//!   snackbell remind                # Run the reminder once, now
//!   snackbell remind --dry-run      # Same, but only log the pushes
//!   snackbell next                  # Print the next reminder time
//!   snackbell init                  # Write a default config file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use snackbell_core::SnackBellConfig;
use snackbell_core::traits::{PushTransport, SubscriberRegistry};
use snackbell_scheduler::{DryRunTransport, ReminderScheduler, SubscriberDb};

#[derive(Parser)]
#[command(
    name = "snackbell",
    version,
    about = "🍟 SnackBell: weekly snack deadline reminders"
)]
struct Cli {
    /// Config file (default: ~/.snackbell/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reminder scheduler and the HTTP gateway until Ctrl-C
    Serve,
    /// Send the reminder now and print the run report
    Remind {
        /// Log the pushes instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the next scheduled reminder
    Next,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<SnackBellConfig> {
    match path {
        Some(path) => {
            let mut config = SnackBellConfig::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.apply_env_overrides();
            Ok(config)
        }
        None => Ok(SnackBellConfig::load()?),
    }
}

fn open_store(config: &SnackBellConfig) -> Result<Arc<SubscriberDb>> {
    let db_path = config.db_path();
    let store = SubscriberDb::open(&db_path)
        .with_context(|| format!("opening subscriber store {}", db_path.display()))?;
    tracing::info!("💾 Subscriber store: {}", db_path.display());
    Ok(Arc::new(store))
}

fn build_scheduler(
    config: &SnackBellConfig,
    store: Arc<SubscriberDb>,
    transport: Arc<dyn PushTransport>,
) -> Result<Arc<ReminderScheduler>> {
    let registry: Arc<dyn SubscriberRegistry> = store.clone();
    let scheduler = ReminderScheduler::from_config(config, store, Some(registry), transport)?;
    Ok(Arc::new(scheduler))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "snackbell=debug,snackbell_scheduler=debug,snackbell_gateway=debug,tower_http=debug"
    } else {
        "snackbell=info,snackbell_scheduler=info,snackbell_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    match cli.command {
        Command::Init { force } => {
            let path = cli.config.unwrap_or_else(SnackBellConfig::default_path);
            if path.exists() && !force {
                println!("⚠️  {} already exists (use --force to overwrite)", path.display());
                return Ok(());
            }
            SnackBellConfig::default().save_to(&path)?;
            println!("✅ Wrote default config to {}", path.display());
        }
        Command::Serve => {
            let config = load_config(cli.config.as_ref())?;
            if !config.reminder.enabled {
                tracing::warn!("⚠️ reminder.enabled = false, only the gateway will run");
            }
            let store = open_store(&config)?;
            let transport = snackbell_scheduler::transport_from_config(&config.push)?;
            let scheduler = build_scheduler(&config, store.clone(), transport)?;

            println!("🍟 SnackBell v{}", env!("CARGO_PKG_VERSION"));
            println!("   ⏰ Schedule:  {}", scheduler.schedule());
            println!(
                "   🌐 Gateway:   http://{}:{}",
                config.gateway.host, config.gateway.port
            );
            println!();

            let shutdown = scheduler.shutdown_token();
            let ticker = if config.reminder.enabled {
                let tick = std::time::Duration::from_secs(config.reminder.tick_secs);
                Some(tokio::spawn(snackbell_scheduler::spawn_scheduler(
                    scheduler.clone(),
                    tick,
                )))
            } else {
                None
            };

            let for_signal = scheduler.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("👋 Shutting down...");
                    for_signal.shutdown();
                }
            });

            let state = snackbell_gateway::AppState::new(config.clone(), scheduler.clone(), store);
            snackbell_gateway::start(&config.gateway, state, shutdown).await?;

            if let Some(ticker) = ticker {
                ticker.await?;
            }
            // Runs whose HTTP caller went away still finish and get recorded
            scheduler.drain().await;
        }
        Command::Remind { dry_run } => {
            let config = load_config(cli.config.as_ref())?;
            let store = open_store(&config)?;
            let transport: Arc<dyn PushTransport> = if dry_run {
                Arc::new(DryRunTransport)
            } else {
                snackbell_scheduler::transport_from_config(&config.push)?
            };
            let scheduler = build_scheduler(&config, store, transport)?;

            let report = scheduler
                .run_manual(None, Some("cli".to_string()))
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Next => {
            let config = load_config(cli.config.as_ref())?;
            let schedule = snackbell_scheduler::Schedule::from_config(&config.reminder)?;
            let now = chrono::Utc::now();
            let next = snackbell_scheduler::next_occurrence(now, &schedule);
            let local = next.with_timezone(&schedule.timezone());
            let wait = next - now;
            println!("⏰ {schedule}");
            println!(
                "   Next reminder: {} ({})",
                local.format("%A %Y-%m-%d %H:%M %Z"),
                next.to_rfc3339()
            );
            println!(
                "   In: {}d {}h {}m",
                wait.num_days(),
                wait.num_hours() % 24,
                wait.num_minutes() % 60
            );
        }
    }

    Ok(())
}
