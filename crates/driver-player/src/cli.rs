use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "driver-player", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Number of hardware buffers in the endpoint ring
    #[arg(long, default_value_t = 3, value_parser = parse_buffer_count)]
    pub buffers: usize,

    /// Size of each hardware buffer in bytes (rounded down to whole frames)
    #[arg(long, default_value_t = 4096)]
    pub buffer_bytes: usize,

    /// Buffers filled before the output clock starts
    #[arg(long, default_value_t = 3)]
    pub prime: usize,

    /// Linear output volume, 0.0 to 1.0
    #[arg(long, default_value_t = 1.0)]
    pub volume: f32,

    /// PCM bit depth handed to the driver (16, 24 or 32)
    #[arg(long, default_value_t = 16)]
    pub bit_depth: u16,

    /// Resample every track to this rate before it reaches the driver
    #[arg(long)]
    pub output_rate: Option<u32>,

    /// Frames per PCM message (and resampler chunk size)
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Upstream queue depth in milliseconds of audio
    #[arg(long, default_value_t = 100)]
    pub starvation_ms: u32,

    /// Play into a paced null endpoint instead of a real device
    #[arg(long)]
    pub null_output: bool,

    /// Print a JSON status line every second while playing
    #[arg(long)]
    pub status_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play local files in order
    Play {
        /// Audio files (FLAC, WAV, MP3, ...)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn parse_buffer_count(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("at least one hardware buffer is required".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}
