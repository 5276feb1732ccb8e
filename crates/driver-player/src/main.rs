//! Driver Player: a small CLI that plays local files through the pipeline driver.
//!
//! ## Pipeline
//! 1. **Decode**: a producer thread uses Symphonia to decode each file.
//! 2. **Resample**: optional Rubato stage to `--output-rate`.
//! 3. **Drive**: the pipeline driver's animator thread pulls big-endian PCM messages and
//!    fills the output endpoint's hardware buffers.
//!
//! The producer and the driver communicate through a bounded queue sized by
//! `--starvation-ms`.

mod cli;
mod decode;
mod resample;
mod source;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use pipeline_driver::host::cpal_output::CpalEndpoint;
use pipeline_driver::host::sim::{SimClock, SimEndpoint};
use pipeline_driver::{Driver, DriverConfig, DriverDelay, DriverEvent, EndpointConfig};
use source::{FilePipeline, PipelineOptions};
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,pipeline_driver=info,driver_player=info")
        }))
        .init();

    if args.list_devices {
        pipeline_driver::device::list_devices(&cpal::default_host())?;
        return Ok(());
    }
    let paths = match &args.cmd {
        Some(cli::Command::Play { paths }) => paths.clone(),
        None => bail!("nothing to play; run `driver-player play <paths...>` or `--list-devices`"),
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Release))
            .context("install ctrl-c handler")?;
    }

    let config = DriverConfig {
        prime_buffers: args.prime,
        ..DriverConfig::default()
    };
    let endpoint_cfg = EndpointConfig {
        buffer_count: args.buffers,
        buffer_bytes: args.buffer_bytes,
    };
    let pipeline = FilePipeline::spawn(
        paths,
        PipelineOptions {
            bit_depth: args.bit_depth,
            output_rate: args.output_rate,
            chunk_frames: args.chunk_frames,
            starvation_ms: args.starvation_ms,
            delay: DriverDelay::new(config.buffering_frames),
        },
        stop.clone(),
    )?;

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let mut driver = if args.null_output {
        tracing::info!("null output");
        Driver::start_observed(
            config,
            pipeline,
            move || Ok(SimEndpoint::new(endpoint_cfg, SimClock::Realtime).with_capture(false)),
            Some(events_tx),
        )
    } else {
        let needle = args.device.clone();
        Driver::start_observed(
            config,
            pipeline,
            move || CpalEndpoint::open(needle.as_deref(), endpoint_cfg),
            Some(events_tx),
        )
    }
    .context("start pipeline driver")?;
    driver.set_volume(args.volume);

    let mut last_status = Instant::now();
    loop {
        match events_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(DriverEvent::StreamStarted(format)) => {
                tracing::info!(format = %format, "stream started");
            }
            Ok(DriverEvent::MetaText(text)) => tracing::info!(text = %text, "metadata"),
            Ok(DriverEvent::Time { seconds }) => tracing::debug!(seconds, "track time"),
            Ok(DriverEvent::Quit) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
        }
        if stop.load(Ordering::Acquire) {
            tracing::info!("stop requested");
            break;
        }
        if args.status_json && last_status.elapsed() >= STATUS_INTERVAL {
            println!("{}", serde_json::to_string(&driver.status())?);
            last_status = Instant::now();
        }
        if driver.is_finished() {
            break;
        }
    }

    stop.store(true, Ordering::Release);
    driver.stop().context("stop pipeline driver")?;
    if args.status_json {
        println!("{}", serde_json::to_string(&driver.status())?);
    }
    Ok(())
}
