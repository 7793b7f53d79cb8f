// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS Reliable Multicast Probe
//!
//! Sends or receives test messages over a reliable multicast group and
//! reports per-session statistics.
//!
//! # Usage
//!
//! ```bash
//! # Receive until Ctrl+C
//! hdds-rmcast-probe recv
//!
//! # Send 100 messages of 4 KiB, 10 ms apart
//! hdds-rmcast-probe send --count 100 --size 4096 --interval-ms 10
//!
//! # Using configuration file
//! hdds-rmcast-probe --config rmcast.toml recv --json
//!
//! # Generate and check a configuration file
//! hdds-rmcast-probe gen-config -o rmcast.toml
//! hdds-rmcast-probe validate -c rmcast.toml
//! ```

use clap::{Parser, Subcommand};
use hdds_rmcast::{
    Endpoint, EndpointEvent, EndpointHandle, EndpointRole, EndpointStats, RmcastConfig,
    SessionMetricsSnapshot,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// HDDS Reliable Multicast Probe
#[derive(Parser, Debug)]
#[command(name = "hdds-rmcast-probe")]
#[command(about = "HDDS reliable multicast probe - send and receive test traffic")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Multicast group address (overrides the configuration file)
    #[arg(short, long, global = true)]
    group: Option<SocketAddr>,

    /// Local address used to pick the interface and port
    #[arg(short, long, global = true)]
    local: Option<SocketAddr>,

    /// Print statistics as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send messages to the group
    Send {
        /// Message text (a generated payload is used when absent)
        message: Option<String>,

        /// Number of messages
        #[arg(short = 'n', long, default_value = "1")]
        count: u64,

        /// Size of generated payloads in bytes
        #[arg(short, long, default_value = "256")]
        size: usize,

        /// Delay between messages (milliseconds)
        #[arg(short, long, default_value = "0")]
        interval_ms: u64,

        /// Keep answering NACKs this long after the last send (seconds)
        #[arg(long, default_value = "2")]
        linger: u64,
    },

    /// Receive messages from every sender on the group
    Recv {
        /// Exit after this many messages
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Print message contents
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "rmcast.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RmcastConfig::from_file(path)?,
        None => RmcastConfig::default(),
    };
    if let Some(group) = args.group {
        config.multicast_group_address = group;
    }
    if let Some(local) = args.local {
        config.local_address = local;
    }
    if let Some(level) = &args.log_level {
        config.log_level.clone_from(level);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config.log_level))
        .with_target(false)
        .init();

    match args.command {
        Commands::Send {
            message,
            count,
            size,
            interval_ms,
            linger,
        } => {
            let payload = message.map_or_else(|| generated_payload(size), String::into_bytes);
            cmd_send(
                config,
                payload,
                count,
                Duration::from_millis(interval_ms),
                Duration::from_secs(linger),
                args.json,
            )
            .await
        }
        Commands::Recv { count, verbose } => cmd_recv(config, count, verbose, args.json).await,
        Commands::GenConfig { output } => cmd_gen_config(output),
        Commands::Validate { config } => cmd_validate(config),
    }
}

/// Filter for `level`, falling back to `info` when it does not parse.
fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn generated_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

async fn cmd_send(
    config: RmcastConfig,
    payload: Vec<u8>,
    count: u64,
    interval: Duration,
    linger: Duration,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let group = config.multicast_group_address;
    let endpoint = Endpoint::bind(config)?;
    let (handle, mut events) = endpoint.spawn(EndpointRole::Sender);

    info!(version = env!("CARGO_PKG_VERSION"), %group, "sender bound");
    info!(count, size = payload.len(), "sending");

    for i in 0..count {
        if let Err(e) = handle.send(payload.clone()).await {
            error!(index = i, error = %e, "send failed");
            break;
        }
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    // Stay up so receivers can repair their tail.
    info!(linger_secs = linger.as_secs(), "lingering for repairs");
    tokio::select! {
        _ = tokio::time::sleep(linger) => {}
        _ = tokio::signal::ctrl_c() => {}
        Some(event) = events.recv() => report_event(&event),
    }

    finish(&handle, json).await
}

async fn cmd_recv(
    config: RmcastConfig,
    count: Option<u64>,
    verbose: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let group = config.multicast_group_address;
    let endpoint = Endpoint::bind(config)?;
    let (handle, mut events) = endpoint.spawn(EndpointRole::Receiver);

    info!(version = env!("CARGO_PKG_VERSION"), %group, "listening");
    println!("Press Ctrl+C to stop...");

    let mut received = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                if let EndpointEvent::Delivered { from, message } = &event {
                    received += 1;
                    if verbose {
                        println!("[{}] {} bytes: {}", from, message.len(), String::from_utf8_lossy(message));
                    } else {
                        println!("[{}] message {} ({} bytes)", from, received, message.len());
                    }
                } else {
                    report_event(&event);
                }
                if count.is_some_and(|n| received >= n) {
                    break;
                }
            }
        }
    }

    info!(received, "shutting down");
    finish(&handle, json).await
}

async fn finish(handle: &EndpointHandle, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let stats = handle.stats().await?;
    handle.shutdown().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("\nFinal Statistics:");
        print_stats(&stats);
    }
    Ok(())
}

fn report_event(event: &EndpointEvent) {
    match event {
        EndpointEvent::Delivered { from, message } => {
            println!("[{}] {} bytes", from, message.len());
        }
        EndpointEvent::Lost { from, gap } => {
            warn!(peer = %from, %gap, ids = gap.len(), "packets lost");
        }
        EndpointEvent::Defunct { peer, reason } => match peer {
            Some(peer) => error!(%peer, %reason, "receiver session defunct"),
            None => error!(%reason, "sender session defunct"),
        },
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = RmcastConfig {
        max_lost_packets: Some(1000),
        ..Default::default()
    };

    let toml_str = toml::to_string_pretty(&config)?;

    // Add comments
    let content = format!(
        r#"# HDDS Reliable Multicast Configuration
# Generated by hdds-rmcast-probe gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    info!(path = %output.display(), "generated configuration file");
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match RmcastConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Group:       {}", config.multicast_group_address);
            println!("Local:       {}", config.local_address);
            println!(
                "History:     {} packets, receive buffer {} packets",
                config.sender_history_size, config.receiver_buffer_size
            );
            println!(
                "NACK:        {} ms, x{} backoff, max {} ms, {} retries",
                config.nak_interval_ms,
                config.nak_backoff,
                config.nak_max_interval_ms,
                config.nak_max_retries
            );
            println!("Reliability: {:?}, join {:?}", config.reliability, config.join);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &EndpointStats) {
    if let Some(sender) = &stats.sender {
        println!("--- Sender ---");
        print_session(sender);
    }
    for peer in &stats.receivers {
        println!("--- Receiver for {} ({:?}) ---", peer.peer, peer.state);
        print_session(&peer.metrics);
    }
    if stats.malformed > 0 {
        println!("Malformed datagrams: {}", stats.malformed);
    }
    if stats.events_dropped > 0 {
        println!("Dropped events: {}", stats.events_dropped);
    }
}

fn print_session(m: &SessionMetricsSnapshot) {
    println!(
        "  packets: {} sent ({}), {} received ({})",
        m.packets_sent,
        format_bytes(m.bytes_sent),
        m.packets_received,
        format_bytes(m.bytes_received)
    );
    println!(
        "  messages: {} sent, {} delivered, {} discarded",
        m.messages_sent, m.messages_delivered, m.messages_discarded
    );
    println!(
        "  repair: {} gaps (max {}), {} NACKs sent, {} received, {} suppressed",
        m.gaps_detected, m.max_gap_size, m.nacks_sent, m.nacks_received, m.nacks_suppressed
    );
    println!(
        "  retransmits: {} sent, {} received, {} not available, {} lost",
        m.retransmit_sent, m.retransmit_received, m.not_available_sent, m.packets_lost
    );
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
