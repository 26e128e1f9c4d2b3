//! Sampling-rate derivation and timestamp checks.

use log::{debug, warn};
use ndarray::ArrayView1;

use crate::types::*;

/// Per-channel sampling rate of a uniformly interleaved stream.
///
/// A caller-supplied `override_hz` takes precedence over the derived value.
pub fn derive_sampling_rate(
    combined_rate_hz: f64,
    channel_count: usize,
    override_hz: Option<f64>,
) -> Result<f64> {
    if channel_count == 0 {
        return Err(WidefieldError::NoChannels);
    }
    if let Some(rate) = override_hz {
        return Ok(rate);
    }
    Ok(combined_rate_hz / channel_count as f64)
}

/// Estimates the combined acquisition rate from the median step between
/// consecutive timestamps. Returns `None` when no positive step exists.
pub fn estimate_combined_rate(timestamps: ArrayView1<f64>) -> Option<f64> {
    let mut steps: Vec<f64> = timestamps
        .windows(2)
        .into_iter()
        .map(|w| w[1] - w[0])
        .filter(|d| d.is_finite() && *d > 0.0)
        .collect();
    if steps.is_empty() {
        return None;
    }
    steps.sort_by(|a, b| a.total_cmp(b));
    let median = steps[steps.len() / 2];
    debug!("Median timestamp step {:.6} s", median);
    Some(1.0 / median)
}

/// Checks that a channel's timestamps never decrease.
pub fn check_timestamps(channel: ChannelId, timestamps: ArrayView1<f64>) -> Option<Warning> {
    let num_decreasing = timestamps
        .windows(2)
        .into_iter()
        .filter(|w| w[1] < w[0])
        .count();

    if num_decreasing == 0 {
        debug!("Timestamps of channel {} are monotonic", channel);
        None
    } else {
        let warning = Warning::NonMonotonicTimestamps {
            channel,
            count: num_decreasing,
        };
        warn!("{}", warning);
        Some(warning)
    }
}
