// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Mock Camera Viewer
//!
//! Boots a context with the synthetic test pattern device and consumes its
//! color stream at roughly 30 fps, printing a per-second summary line.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p mock-camera
//! cargo run -p mock-camera -- --config '{"width": 320, "height": 240}'
//! RUST_LOG=debug cargo run -p mock-camera
//! ```

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};

use sensorbus::core::{
    BusError, Context, FrameTimeout, StreamDescription, StreamSubtype, StreamType,
};
use sensorbus::plugins::test_pattern::{TestPatternConfig, TestPatternPlugin, PARAM_RESOLUTION};

fn main() -> Result<()> {
    // Override with RUST_LOG env var if needed, e.g., RUST_LOG=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let config = parse_config()?;
    let uri = config.uri.clone();

    let context = Context::new();
    context.register_plugin(Box::new(TestPatternPlugin::new(config)));
    context.initialize();

    let set = context.open_stream_set(&uri)?;
    let reader = context.create_reader(set)?;
    let color = StreamDescription::new(StreamType::COLOR, StreamSubtype::DEFAULT);
    let connection = context.get_stream(reader, color)?;
    context.start_stream(connection)?;

    let mut resolution = [0u8; 8];
    context.get_parameter_data(connection, PARAM_RESOLUTION, &mut resolution)?;
    let width = u32::from_le_bytes(resolution[..4].try_into()?);
    let height = u32::from_le_bytes(resolution[4..].try_into()?);
    println!("Streaming {width}x{height} color frames from {uri} (Ctrl+C to stop)");

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("failed to install Ctrl+C handler")?;

    let mut frames_in_window = 0u64;
    let mut window = Instant::now();
    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }
        context.update();
        match context.open_frame(reader, FrameTimeout::Millis(100)) {
            Ok(()) => {
                let frame = context.get_subframe(reader, color)?;
                frames_in_window += 1;
                if window.elapsed() >= Duration::from_secs(1) {
                    println!(
                        "frame {:>6}  {} bytes  ~{} fps",
                        frame.frame_index(),
                        frame.data().len(),
                        frames_in_window
                    );
                    frames_in_window = 0;
                    window = Instant::now();
                }
                context.close_frame(reader)?;
            }
            Err(BusError::Timeout) => {
                tracing::debug!("no frame this tick");
            }
            Err(err) => return Err(err.into()),
        }
        thread::sleep(Duration::from_millis(33));
    }

    println!("Shutting down");
    context.terminate();
    Ok(())
}

fn parse_config() -> Result<TestPatternConfig> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let json = args.next().context("--config needs a JSON argument")?;
            return serde_json::from_str(&json).context("invalid --config JSON");
        }
    }
    Ok(TestPatternConfig::default())
}
