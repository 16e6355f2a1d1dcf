//! # Festa — birthday & anniversary reminder bot
//!
//! Usage:
//!   festa                                   # Run the bot (same as `festa run`)
//!   festa --config ./festa.toml run         # Custom config file
//!   festa fire --chat -100123 --date 2025-06-09
//!   festa upcoming --chat -100123 --weddings

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use festa_channels::TelegramChannel;
use festa_core::config::FestaConfig;
use festa_core::types::{Destination, RecordKind};
use festa_scheduler::{FireSchedule, JsonRecordStore, RecurrenceMatcher, ReminderService};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use crate::commands::CommandRouter;

#[derive(Parser)]
#[command(
    name = "festa",
    version,
    about = "🎉 Festa — birthday & anniversary reminders for group chats"
)]
struct Cli {
    /// Config file (default: ~/.festa/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll Telegram and fire reminders daily
    Run,
    /// Send today's congratulations to one chat right now
    Fire {
        /// Chat id
        #[arg(long, allow_hyphen_values = true)]
        chat: Destination,
        /// Date to fire for (YYYY-MM-DD), defaults to today in the configured timezone
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print the next celebrations for a chat
    Upcoming {
        /// Chat id
        #[arg(long, allow_hyphen_values = true)]
        chat: Destination,
        /// Show wedding anniversaries instead of birthdays
        #[arg(long)]
        weddings: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<FestaConfig> {
    let config = match path {
        Some(path) => {
            let mut config = FestaConfig::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => FestaConfig::load()?,
    };
    config.validate()?;
    Ok(config)
}

fn telegram(config: &FestaConfig) -> Result<Arc<TelegramChannel>> {
    if config.telegram.bot_token.is_empty() {
        anyhow::bail!("No bot token configured. Set BOT_TOKEN or [telegram].bot_token.");
    }
    Ok(Arc::new(
        TelegramChannel::new(config.telegram.clone())
            .with_request_timeout(config.scheduler.request_timeout()),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "festa=debug,festa_scheduler=debug,festa_channels=debug"
    } else {
        "festa=info,festa_scheduler=info,festa_channels=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_ref())?;
    let store = Arc::new(
        JsonRecordStore::new(&config.storage.data_path()).context("Failed to open record store")?,
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, store).await,
        Command::Fire { chat, date } => {
            let messenger = telegram(&config)?;
            let service = ReminderService::from_config(&config, messenger, store)?;
            let today = date.unwrap_or_else(|| service.schedule().local_date(Utc::now()));
            let report = service.fanout().fire_for(chat, today).await;
            println!(
                "🔔 {today}: {} matched, {} sent, {} failed",
                report.matched, report.sent, report.transient_failures
            );
            if !report.deregistered.is_empty() {
                println!("🚫 Chat {chat} is unreachable");
            }
            Ok(())
        }
        Command::Upcoming { chat, weddings } => {
            let kind = if weddings { RecordKind::Wedding } else { RecordKind::Birthday };
            let today = FireSchedule::from_config(&config.scheduler)?.local_date(Utc::now());
            let records = store.records(chat, kind).await?;
            let matcher = RecurrenceMatcher::new(config.scheduler.leap_day_policy);
            let upcoming = matcher.upcoming(&records, today);
            if upcoming.is_empty() {
                println!("📅 No {kind}s for chat {chat}");
            }
            for item in upcoming {
                let years = item.years.map(|y| format!(" ({y})")).unwrap_or_default();
                println!(
                    "{:>4}d  {}  {}{years}",
                    item.days_until,
                    item.date.format("%d.%m.%Y"),
                    item.record.label
                );
            }
            Ok(())
        }
    }
}

async fn run(config: FestaConfig, store: Arc<JsonRecordStore>) -> Result<()> {
    let channel = telegram(&config)?;
    let me = channel.get_me().await.context("Telegram rejected the bot token")?;
    tracing::info!(
        "🤖 Festa v{} as @{}",
        env!("CARGO_PKG_VERSION"),
        me.username.as_deref().unwrap_or(&me.first_name)
    );

    let service = Arc::new(ReminderService::from_config(&config, channel.clone(), store.clone())?);
    let router = CommandRouter::new(service.clone(), store, me.id);

    tracing::info!(
        "⏰ Reminders at {:02}:{:02} {}",
        config.scheduler.fire_hour,
        config.scheduler.fire_minute,
        config.scheduler.timezone
    );
    service.on_start().await;

    let mut updates = channel.start_polling();
    loop {
        tokio::select! {
            event = updates.next() => match event {
                Some(event) => {
                    let router = router.clone();
                    tokio::spawn(async move { router.dispatch(event).await });
                }
                None => {
                    tracing::warn!("⚠️ Telegram polling ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("👋 Shutting down");
                break;
            }
        }
    }

    service.on_stop().await;
    Ok(())
}
