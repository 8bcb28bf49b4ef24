//! Test-Pattern Sender
//!
//! Generates a null transport stream at a fixed bitrate and pushes it
//! through the paced RTP output.
//!
//! Usage: `ts-rtp-send [DESTINATION] [CONFIG.toml]`

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ts_rtp_output::{
    config::{AppConfig, SourceConfig},
    constants::*,
    network::Destination,
    output::{bounded_output_queue, spawn_output, MuxedData, QueueProducer},
};

/// Units the producer may run ahead of the output
const QUEUE_CAPACITY: usize = 64;

fn main() -> Result<()> {
    // Parse arguments
    let mut config_path = None;
    let mut destination = None;
    for arg in std::env::args().skip(1) {
        if arg.ends_with(".toml") {
            config_path = Some(arg);
        } else {
            destination = Some(arg);
        }
    }

    // Load config
    let mut config = match &config_path {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => AppConfig::default(),
    };
    if let Some(destination) = destination {
        config.output.destination = destination;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting TS RTP sender");

    let destination: Destination = config
        .output
        .destination
        .parse()
        .context("invalid destination")?;
    tracing::info!("Destination: {}", destination);
    tracing::info!(
        "Source: {} bit/s, {} packets per unit, {} packets per datagram",
        config.source.bitrate,
        config.source.packets_per_unit,
        config.pacer.packets_per_datagram
    );

    // Start output
    let (producer, consumer) = bounded_output_queue(QUEUE_CAPACITY);
    let output = spawn_output(&config.output.destination, config.pacer.clone(), consumer)?;

    // Start test pattern
    let running = Arc::new(AtomicBool::new(true));
    let source = {
        let running = running.clone();
        let source_config = config.source.clone();
        let ticks_per_second = config.pacer.ticks_per_second;
        thread::Builder::new()
            .name("ts-source".to_string())
            .spawn(move || run_source(producer, &source_config, ticks_per_second, &running))?
    };

    let run_for = match config.source.duration_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    tracing::info!("Streaming - {}", match run_for {
        Some(d) => format!("stopping after {:?}", d),
        None => "running until the output stops".to_string(),
    });

    // Main loop
    let start = Instant::now();
    let mut last_stats_time = Instant::now();
    while !output.is_finished() {
        thread::sleep(Duration::from_millis(100));

        if last_stats_time.elapsed() >= Duration::from_secs(5) {
            last_stats_time = Instant::now();
            let stats = output.stats();
            tracing::info!(
                "Stats: {} units, {} datagrams, {:.1} KB sent, {} late, {} resets",
                stats.units_received,
                stats.packets_sent,
                stats.bytes_sent as f64 / 1024.0,
                stats.late_packets,
                stats.resets
            );
        }

        if run_for.is_some_and(|d| start.elapsed() >= d) {
            break;
        }
    }

    // Stop the source; the output flushes what is left and exits
    running.store(false, Ordering::Relaxed);
    match source.join() {
        Ok(Ok(units)) => tracing::info!("Source stopped after {} units", units),
        Ok(Err(e)) => tracing::warn!("Source stopped: {}", e),
        Err(_) => tracing::error!("Source thread panicked"),
    }

    let stats = output.stats();
    let exit = output.join()?;
    tracing::info!(
        "Output finished ({:?}): {} datagrams, {} bytes",
        exit,
        stats.packets_sent,
        stats.bytes_sent
    );

    Ok(())
}

/// Null packet, PID 0x1FFF, payload only
fn null_packet(continuity: u8) -> [u8; TS_PACKET_SIZE] {
    let mut packet = [0xFFu8; TS_PACKET_SIZE];
    packet[0] = 0x47;
    packet[1] = 0x1F;
    packet[2] = 0xFF;
    packet[3] = 0x10 | (continuity & 0x0F);
    packet
}

/// Produce units until `running` clears. Returns the number of units sent.
fn run_source(
    producer: QueueProducer,
    config: &SourceConfig,
    ticks_per_second: u64,
    running: &AtomicBool,
) -> ts_rtp_output::Result<u64> {
    let packet_bits = (TS_PACKET_SIZE * 8) as u128;
    let ticks_per_packet = (packet_bits * ticks_per_second as u128 / config.bitrate as u128) as i64;
    tracing::debug!("Clock reference step: {} ticks per packet", ticks_per_packet);

    let mut clock_ref: i64 = 0;
    let mut continuity: u8 = 0;
    let mut units: u64 = 0;

    while running.load(Ordering::Relaxed) {
        let mut data = Vec::with_capacity(config.packets_per_unit * TS_PACKET_SIZE);
        let mut clock_refs = Vec::with_capacity(config.packets_per_unit);

        for _ in 0..config.packets_per_unit {
            data.extend_from_slice(&null_packet(continuity));
            clock_refs.push(clock_ref);
            continuity = continuity.wrapping_add(1);
            clock_ref += ticks_per_packet;
        }

        producer.enqueue(MuxedData::new(data, clock_refs)?)?;
        units += 1;
    }

    Ok(units)
}
