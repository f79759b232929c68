//! camprobe - capture source timing probe
//!
//! Opens a capture source, reads a batch of frames back to back and
//! reports the inter-frame gaps and effective frame rate. Useful for
//! checking what a source can sustain before configuring the daemon.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::Instant;

use camnode::capture::{open_device, CaptureSettings};

#[derive(Parser, Debug)]
#[command(
    name = "camprobe",
    about = "Read frames from a capture source and report timing"
)]
struct Args {
    /// Capture source locator, e.g. synthetic://bench
    #[arg(long, env = "CAMNODE_SOURCE", default_value = "synthetic://bench")]
    source: String,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    #[arg(long, default_value_t = 3)]
    channels: u8,

    /// Number of frames to read
    #[arg(long, default_value_t = 100)]
    frames: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.frames < 2 {
        return Err(anyhow!("--frames must be at least 2"));
    }

    let settings = CaptureSettings {
        source: args.source.clone(),
        width: args.width,
        height: args.height,
        channels: args.channels,
        // Free-running: the probe measures what the source can deliver.
        target_fps: 0,
    };
    let mut device = open_device(&settings)?;
    device.open()?;

    let mut read_at = Vec::with_capacity(args.frames as usize);
    let mut total_bytes = 0usize;
    let started = Instant::now();
    for _ in 0..args.frames {
        let frame = device.read_frame()?;
        total_bytes += frame.byte_len();
        read_at.push(Instant::now());
    }
    let elapsed = started.elapsed();
    device.close();

    let gaps_ms: Vec<f64> = read_at
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_secs_f64() * 1_000.0)
        .collect();
    let min = gaps_ms.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = gaps_ms.iter().cloned().fold(0.0f64, f64::max);
    let mean = gaps_ms.iter().sum::<f64>() / gaps_ms.len() as f64;
    let fps = f64::from(args.frames) / elapsed.as_secs_f64();

    println!("source:        {}", args.source);
    println!("frames read:   {}", args.frames);
    println!("bytes read:    {}", total_bytes);
    println!("gap min/mean/max: {:.3} / {:.3} / {:.3} ms", min, mean, max);
    println!("effective fps: {:.1}", fps);
    Ok(())
}
