// SPDX-License-Identifier: AGPL-3.0-only

//! `rhs` - command-line utilities for the Rhythm Stim board driver.
//!
//! ```text
//! USAGE:
//!   rhs rates                         Sample-rate clock table
//!   rhs cable --meters 1.5            Cable length to delay setting (or --feet, --delay)
//!   rhs frame-size --streams 4        Frame, block and bandwidth sizes
//!   rhs simulate --blocks 100 -o run.dat
//!                                     Acquire from a simulated board
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use rhs_chip::board::{BoardPort, MAX_NUM_SPI_PORTS};
use rhs_chip::frame::{data_block_size_in_bytes, frame_size_in_bytes, frame_size_in_words};
use rhs_chip::rates::SampleRate;
use rhs_driver::calibration::{
    cable_delay_for_length, cable_length_for_delay, calibration_quantum, feet_to_meters,
    meters_to_feet,
};
use rhs_driver::transports::MockTransport;
use rhs_driver::{queue_to_file, Board, BoardConfig, DataStreamEnableMap, RateReliability};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rhs", about = "Rhythm Stim board utilities", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print every supported sample rate with its clock settings.
    Rates,
    /// Convert between cable length and delay setting.
    Cable {
        /// Sample rate in Hz.
        #[arg(long, default_value_t = 30000.0)]
        sample_rate: f64,
        /// Cable length in metres.
        #[arg(long, conflicts_with_all = ["feet", "delay"])]
        meters: Option<f64>,
        /// Cable length in feet.
        #[arg(long, conflicts_with = "delay")]
        feet: Option<f64>,
        /// Delay setting to convert back to a length.
        #[arg(long)]
        delay: Option<u32>,
    },
    /// Print frame and data-block sizes for a stream count.
    FrameSize {
        /// Enabled data streams (0-8).
        #[arg(long, default_value_t = 1)]
        streams: usize,
        /// Sample rate in Hz.
        #[arg(long, default_value_t = 30000.0)]
        sample_rate: f64,
    },
    /// Run an acquisition against a simulated board.
    Simulate {
        /// Sample rate in Hz.
        #[arg(long, default_value_t = 30000.0)]
        sample_rate: f64,
        /// Enabled data streams (0-8).
        #[arg(long, default_value_t = 2)]
        streams: usize,
        /// Data blocks to acquire.
        #[arg(long, default_value_t = 100)]
        blocks: usize,
        /// File to write recorded blocks to.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Headstage cable length in metres, all ports.
        #[arg(long, default_value_t = rhs_driver::config::DEFAULT_CABLE_LENGTH_METERS)]
        cable_meters: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Rates => cmd_rates(),
        Cmd::Cable {
            sample_rate,
            meters,
            feet,
            delay,
        } => cmd_cable(sample_rate, meters, feet, delay)?,
        Cmd::FrameSize {
            streams,
            sample_rate,
        } => cmd_frame_size(streams, sample_rate)?,
        Cmd::Simulate {
            sample_rate,
            streams,
            blocks,
            output,
            cable_meters,
        } => cmd_simulate(sample_rate, streams, blocks, output, cable_meters)?,
    }

    Ok(())
}

fn parse_rate(hz: f64) -> Result<SampleRate> {
    let rate = SampleRate::from_hz(hz).ok_or_else(|| {
        anyhow!(
            "unsupported sample rate {hz} Hz (supported: {})",
            SampleRate::ALL.map(|r| r.to_string()).join(", ")
        )
    })?;
    if !rate.is_reliable() {
        warn!("{rate} is above the rated maximum; data may be lost");
    }
    Ok(rate)
}

fn cmd_rates() {
    println!("{:>9}  {:>4}  {:>4}  {:>12}  {:>10}  reliable", "rate", "M", "D", "data clock", "quantum");
    for rate in SampleRate::ALL {
        let (m, d) = rate.dcm_multiply_divide();
        println!(
            "{:>9}  {m:>4}  {d:>4}  {:>8.3} MHz  {:>8.3} m  {}",
            rate.to_string(),
            rate.system_clock_hz() / 1.0e6,
            calibration_quantum(rate),
            if rate.is_reliable() { "yes" } else { "no" }
        );
    }
}

fn cmd_cable(hz: f64, meters: Option<f64>, feet: Option<f64>, delay: Option<u32>) -> Result<()> {
    let rate = parse_rate(hz)?;
    let quantum = calibration_quantum(rate);
    match (meters.or(feet.map(feet_to_meters)), delay) {
        (Some(m), _) => {
            let d = cable_delay_for_length(m, rate);
            println!("{m:.3} m ({:.2} ft) at {rate}: delay {d}", meters_to_feet(m));
            if d > u32::from(rhs_chip::board::MAX_CABLE_DELAY) {
                println!("  exceeds the maximum setting; the board would clamp it");
            }
            println!("  resolution {quantum:.3} m per step");
        }
        (None, Some(d)) => {
            let m = cable_length_for_delay(d, rate);
            println!("delay {d} at {rate}: {m:.3} m ({:.2} ft), +/- {quantum:.3} m", meters_to_feet(m));
        }
        (None, None) => bail!("give one of --meters, --feet or --delay"),
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn cmd_frame_size(streams: usize, hz: f64) -> Result<()> {
    let rate = parse_rate(hz)?;
    let map = DataStreamEnableMap::first(streams)?;
    let n = map.num_enabled();
    let bytes_per_second = frame_size_in_bytes(n) as f64 * rate.hz();
    let fifo_seconds = f64::from(rhs_driver::fifo_capacity_in_words())
        / (frame_size_in_words(n) as f64 * rate.hz());
    println!("streams         {n}");
    println!("frame           {} words, {} bytes", frame_size_in_words(n), frame_size_in_bytes(n));
    println!("data block      {} bytes", data_block_size_in_bytes(n));
    println!("bandwidth       {:.2} MB/s at {rate}", bytes_per_second / 1.0e6);
    println!("FIFO headroom   {fifo_seconds:.1} s");
    Ok(())
}

fn cmd_simulate(
    hz: f64,
    streams: usize,
    blocks: usize,
    output: Option<PathBuf>,
    cable_meters: f64,
) -> Result<()> {
    let rate = parse_rate(hz)?;
    let mock = MockTransport::new();
    let board = Board::open(mock.clone()).context("opening simulated board")?;
    board.initialize()?;

    let config = BoardConfig {
        sample_rate: rate,
        cable_length_meters: [cable_meters; MAX_NUM_SPI_PORTS],
        streams: DataStreamEnableMap::first(streams)?,
        ..BoardConfig::default()
    };
    if board.apply_config(&config)? == RateReliability::Unreliable {
        warn!("Acquiring at an unreliable rate");
    }

    let mut sink: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::sink()),
    };

    let mut guard = board.lock();
    info!(
        "Simulating {blocks} blocks, {} streams, cable delay {}",
        guard.num_enabled_data_streams(),
        guard.cable_delay(BoardPort::A)
    );
    guard.set_continuous_run_mode(true)?;
    guard.run()?;

    let block_frames = u32::try_from(rhs_chip::frame::SAMPLES_PER_DATA_BLOCK)?;
    let mut queue = VecDeque::new();
    let mut recorded = 0;
    let mut gaps = 0;
    let mut next_timestamp = None;
    while recorded < blocks {
        mock.advance(block_frames);
        let got = guard.read_data_blocks(blocks - recorded, &mut queue)?;
        guard.advance_sequencers(block_frames * u32::try_from(got)?);
        for block in &queue {
            if next_timestamp.is_some_and(|t| t != block.first_timestamp()) || !block.timestamps_contiguous() {
                gaps += 1;
            }
            next_timestamp = Some(block.first_timestamp().wrapping_add(block_frames));
        }
        recorded += queue_to_file(&mut queue, &mut sink)?;
    }
    guard.set_continuous_run_mode(false)?;
    let leftover = guard.flush()?;
    drop(guard);
    sink.flush()?;

    println!("recorded        {recorded} blocks ({} bytes)", recorded * data_block_size_in_bytes(streams));
    println!("timestamp gaps  {gaps}");
    println!("flushed         {leftover} bytes");
    if let Some(path) = output {
        println!("written to      {}", path.display());
    }
    Ok(())
}
