//! Output device discovery and exact-format stream config selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - finding a stream config that carries a decoded stream's format unchanged

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{DriverError, Result};
use crate::format::AudioFormat;

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .map_err(|e| DriverError::EndpointUnavailable(format!("no output devices: {e}")))?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(DriverError::EndpointUnavailable(format!(
            "no output device matched: {needle}"
        )));
    }

    host.default_output_device()
        .ok_or_else(|| DriverError::EndpointUnavailable("no default output device".into()))
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host
        .output_devices()
        .map_err(|e| DriverError::EndpointUnavailable(format!("no output devices: {e}")))?;
    for (i, d) in devices.enumerate() {
        match d.description() {
            Ok(desc) => println!("#{i}: {desc}"),
            Err(e) => println!("#{i}: <unavailable: {e}>"),
        }
    }
    Ok(())
}

/// Human-readable device name for logs.
pub fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "<unknown>".into())
}

/// Find a supported config with exactly `format`'s rate and channel count.
///
/// The driver performs no sample-rate or channel conversion, so a device that cannot take
/// the stream as-is is a configuration failure.
pub fn pick_stream_config(
    device: &cpal::Device,
    format: AudioFormat,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| DriverError::Configuration(format!("query output configs: {e}")))?
        .collect();

    let mut best: Option<(u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        if range.channels() != format.channels {
            continue;
        }
        if !rate_in_range(range.min_sample_rate(), range.max_sample_rate(), format.sample_rate) {
            continue;
        }
        let rank = sample_format_rank(range.sample_format(), format.bit_depth);
        let replace = best.as_ref().map(|(r, _)| rank < *r).unwrap_or(true);
        if replace {
            best = Some((rank, range.with_sample_rate(format.sample_rate)));
        }
    }

    best.map(|(_, cfg)| cfg).ok_or_else(|| {
        DriverError::Configuration(format!("device {} cannot play {format}", device_name(device)))
    })
}

fn rate_in_range(min: u32, max: u32, rate: u32) -> bool {
    rate >= min && rate <= max
}

/// Lower is better. Prefer float, then the narrowest integer format that holds `bit_depth`.
fn sample_format_rank(format: cpal::SampleFormat, bit_depth: u16) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 if bit_depth <= 16 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
