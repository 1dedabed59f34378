//! vigil command line.
//!
//! `run` drives the full pipeline from an interactive console; `history`
//! and `retry` operate on the durable record store without starting the
//! pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use vigil::dispatch::channels::{CommandChannel, ConsoleChannel, WebhookChannel};
use vigil::{
    ActivationOutcome, AlertChannel, AlertRecordStore, ChannelAckSource, ChannelClass,
    ChannelProbe, DispatchGateway, DispatchSeverity, ProbeKind, RecordStatus,
    SnapshotEvidenceCollector, StaticLocationProvider, Vigil, VigilBuilder, VigilConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file (environment variables otherwise)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. "vigil=debug"
    #[arg(long, default_value = "vigil=info")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline with an interactive console
    Run,
    /// Print the durable alert history
    History {
        /// Show only the most recent N records
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Re-attempt delivery for records that never went out
    Retry,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(args.log.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => VigilConfig::from_file(path)?,
        None => VigilConfig::from_env(),
    };

    match args.command {
        Command::Run => run(config).await,
        Command::History { limit } => history(config, limit),
        Command::Retry => retry(config).await,
    }
}

/// Build the dispatch channels a config asks for, with a console
/// fallback so a bare install still notifies somewhere.
fn build_channels(config: &VigilConfig) -> Vec<Arc<dyn AlertChannel>> {
    let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();
    for webhook in &config.webhooks {
        channels.push(Arc::new(WebhookChannel::new(webhook.clone())));
    }
    for command in &config.commands {
        channels.push(Arc::new(CommandChannel::new(command.clone())));
    }
    if channels.is_empty() {
        channels.push(Arc::new(ConsoleChannel::new(ChannelClass::Messaging)));
    }
    channels
}

async fn run(config: VigilConfig) -> Result<()> {
    let (probe, injector) = ChannelProbe::new("console-audio", ProbeKind::Audio);
    let (ack_source, ack_trigger) = ChannelAckSource::new("console");

    let mut builder = VigilBuilder::new(config.clone())
        .with_probe(Arc::new(probe))
        .with_ack_source(Box::new(ack_source));
    if let Some(location) = &config.location {
        builder = builder.with_location_provider(Arc::new(StaticLocationProvider::new(
            location.clone(),
        )));
    }
    if let Some(dir) = &config.evidence_dir {
        builder = builder.with_evidence_collector(Arc::new(SnapshotEvidenceCollector::new(dir)));
    }
    for channel in build_channels(&config) {
        builder = builder.with_channel(channel);
    }
    let service = builder.start().await?;

    println!("vigil interactive console");
    println!("  t  panic trigger (press twice within the window to confirm)");
    println!("  d  simulated distress detection (30 points)");
    println!("  b  background threat observation");
    println!("  k  acknowledge all active alerts");
    println!("  s  status");
    println!("  q  quit");

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "t" => report_activation(service.activate().await),
                    "d" => injector.inject("scream", 30.0),
                    "b" => {
                        let outcome = service
                            .ingest_observation(true, 0.45, vec!["glass_break".to_string()])
                            .await;
                        match outcome {
                            Some(consensus) => println!(
                                "threat consensus reached: {} ({} observations)",
                                consensus.tags.join(", "),
                                consensus.observations
                            ),
                            None => println!("observation recorded, no consensus yet"),
                        }
                    }
                    "k" => ack_trigger.ack_all(),
                    "s" => print_status(&service).await,
                    "q" => break,
                    "" => {}
                    other => println!("unknown command {:?}", other),
                }
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

fn report_activation(outcome: ActivationOutcome) {
    match outcome {
        ActivationOutcome::FirstActivation { remaining } => println!(
            "confirmation window open: activate again within {:.0}s to confirm",
            remaining.as_secs_f64()
        ),
        ActivationOutcome::WindowReopened { remaining } => println!(
            "previous window expired; new window open for {:.0}s",
            remaining.as_secs_f64()
        ),
        ActivationOutcome::Confirmed(confirmation) => println!(
            "emergency confirmed after {:.1}s, alert raised",
            confirmation.response_time.as_secs_f64()
        ),
    }
}

async fn print_status(service: &Vigil) {
    let status = service.status().await;
    match status.window_remaining {
        Some(remaining) => println!(
            "confirmation window open, {:.1}s to confirm",
            remaining.as_secs_f64()
        ),
        None => println!("no confirmation window open"),
    }
    if let Some(distress) = status.distress {
        println!("distress score {:.1}", distress.total);
        for (tag, delta) in &distress.contributions {
            println!("  {:+.1}  {}", delta, tag);
        }
    }
    if status.active_alerts.is_empty() {
        println!("no active alerts");
    }
    for alert in &status.active_alerts {
        println!(
            "active alert {} level {} [{}] {}",
            alert.id, alert.escalation_level, alert.kind, alert.message
        );
    }
}

fn history(config: VigilConfig, limit: Option<usize>) -> Result<()> {
    let store = AlertRecordStore::open(&config.record_path)?;
    let mut records = store.history()?;
    if records.is_empty() {
        println!("no alerts recorded");
        return Ok(());
    }
    if let Some(limit) = limit {
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
    }
    for record in records {
        println!(
            "{}  {}  [{}]  {}  retries={}  {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.id,
            record.kind,
            record.status,
            record.retry_count,
            record.message
        );
    }
    Ok(())
}

/// One redelivery pass over records that never reached anyone.
async fn retry(config: VigilConfig) -> Result<()> {
    let store = AlertRecordStore::open(&config.record_path)?;
    let gateway = DispatchGateway::new(build_channels(&config));

    let stuck: Vec<_> = store
        .history()?
        .into_iter()
        .filter(|r| matches!(r.status, RecordStatus::Pending | RecordStatus::Failed))
        .collect();
    if stuck.is_empty() {
        println!("nothing to retry");
        return Ok(());
    }

    let mut delivered = 0;
    for record in &stuck {
        match gateway
            .send(
                &[ChannelClass::Messaging],
                &record.to_alert(),
                DispatchSeverity::Initial,
            )
            .await
        {
            Ok(count) => {
                store.mark_sent(record.id)?;
                delivered += 1;
                println!("{}  delivered to {} channel(s)", record.id, count.sent);
            }
            Err(e) => {
                store.increment_retry(record.id)?;
                println!("{}  still undeliverable: {}", record.id, e);
            }
        }
    }
    println!("{}/{} records delivered", delivered, stuck.len());
    Ok(())
}
