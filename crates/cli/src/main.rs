use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use binsight_api::{DashboardApi, InProcApi};
use binsight_core::{FleetSnapshot, TruckStatus};
use binsight_feed::FeedConfig;

#[derive(Parser, Debug)]
#[command(name = "binsightctl", version, about = "binsight operations CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Feed interval override in milliseconds (default 10000)
    #[arg(long = "interval-ms", global = true)]
    interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream snapshot versions and live toasts until ctrl-c
    Watch {
        /// Stop after this many seconds instead of waiting for ctrl-c
        #[arg(long = "for")]
        for_secs: Option<u64>,
    },
    /// Run the simulated feed for a while, then print the final snapshot
    Snapshot {
        #[arg(long = "for", default_value_t = 30)]
        for_secs: u64,
    },
    /// Run the simulated feed for a while, then print aggregate fleet stats
    Stats {
        #[arg(long = "for", default_value_t = 30)]
        for_secs: u64,
    },
}

fn init_tracing() {
    let env = std::env::var("BINSIGHT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("BINSIGHT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid BINSIGHT_METRICS_ADDR; expected host:port");
        }
    }
}

fn feed_config(interval_ms: Option<u64>) -> FeedConfig {
    let mut cfg = FeedConfig::from_env();
    if let Some(ms) = interval_ms {
        cfg.interval = Duration::from_millis(ms);
    }
    cfg
}

fn print_snapshot_human(snap: &FleetSnapshot) {
    let stats = snap.stats();
    println!(
        "epoch {} • {} bins ({} critical) • {}/{} trucks active • {} alerts ({} unread)",
        snap.epoch,
        stats.bins_total,
        stats.bins_critical,
        stats.trucks_active,
        stats.trucks_total,
        snap.alerts.len(),
        stats.unread_alerts,
    );
    let mut bins: Vec<_> = snap.bins.values().collect();
    bins.sort_by(|a, b| a.id.cmp(&b.id));
    for b in bins {
        println!(
            "  {} • {:>3}% • {:?} • {:.1}°C • {}",
            b.id,
            b.fill_level,
            b.status,
            b.temperature,
            b.address.as_deref().unwrap_or("-"),
        );
    }
    let mut trucks: Vec<_> = snap.trucks.values().collect();
    trucks.sort_by(|a, b| a.id.cmp(&b.id));
    for t in trucks {
        let status = match t.status {
            TruckStatus::Idle => "idle",
            TruckStatus::EnRoute => "en-route",
            TruckStatus::Collecting => "collecting",
        };
        println!(
            "  {} • {} • {} • {}/{} kg • {} bins",
            t.id,
            status,
            t.driver.as_deref().unwrap_or("-"),
            t.current_load_kg,
            t.capacity_kg,
            t.assigned_bins.len(),
        );
    }
    for a in snap.activity.iter() {
        println!("  [{}] {}", a.timestamp.format("%H:%M:%S"), a.message);
    }
}

async fn run_for(api: &InProcApi, secs: u64) -> Result<()> {
    api.connect().await?;
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    api.disconnect().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = feed_config(cli.interval_ms);

    match cli.command {
        Commands::Watch { for_secs } => {
            let api = InProcApi::new(cfg);
            api.connect().await?;
            let mut epochs = api.subscribe_epoch();
            let deadline =
                for_secs.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
            loop {
                let cutoff = async {
                    match deadline {
                        Some(d) => tokio::time::sleep_until(d).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("interrupted");
                        break;
                    }
                    _ = cutoff => break,
                    changed = epochs.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let epoch = *epochs.borrow_and_update();
                        let stats = api.stats().await?;
                        match cli.output {
                            Output::Human => {
                                println!(
                                    "epoch {:>4} • bins {} ({} critical) • trucks {}/{} active • {} unread alerts",
                                    epoch,
                                    stats.bins_total,
                                    stats.bins_critical,
                                    stats.trucks_active,
                                    stats.trucks_total,
                                    stats.unread_alerts,
                                );
                                for toast in api.notifications() {
                                    println!(
                                        "  toast #{} [{}] {}: {}",
                                        toast.id,
                                        toast.kind.as_str(),
                                        toast.title,
                                        toast.message,
                                    );
                                }
                            }
                            Output::Json => println!("{}", serde_json::to_string(&stats)?),
                        }
                    }
                }
            }
            api.disconnect().await?;
        }
        Commands::Snapshot { for_secs } => {
            let api = InProcApi::new(cfg);
            run_for(&api, for_secs).await?;
            let snap = api.snapshot().await?;
            match cli.output {
                Output::Human => print_snapshot_human(&snap),
                Output::Json => println!("{}", serde_json::to_string_pretty(&*snap)?),
            }
        }
        Commands::Stats { for_secs } => {
            let api = InProcApi::new(cfg);
            run_for(&api, for_secs).await?;
            let stats = api.stats().await?;
            match cli.output {
                Output::Human => {
                    println!("bins:          {}", stats.bins_total);
                    println!("critical bins: {}", stats.bins_critical);
                    println!("sensors online: {}", stats.sensors_online);
                    println!("trucks:        {}", stats.trucks_total);
                    println!("active trucks: {}", stats.trucks_active);
                    println!("unread alerts: {}", stats.unread_alerts);
                    println!("activity kept: {}", stats.activity_len);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
            }
        }
    }
    Ok(())
}
