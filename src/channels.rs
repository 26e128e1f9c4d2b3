//! Channel assignment: which light source produced each sample of the
//! interleaved acquisition stream.
//!
//! Two sources can describe the assignment: a dense per-sample array of
//! channel ids (`imaging.imagingLightSource.npy`) or the camera log written
//! during acquisition (`#LED:<channel>,<frame>,<timestamp>` lines). Both are
//! resolved into the same [`ChannelAssignment`] before anything downstream
//! sees them.

use log::{debug, warn};
use ndarray::{Array1, ArrayView1};

use crate::types::*;

const LED_PREFIX: &str = "#LED";

/// One `#LED` record of the camera log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedRecord {
    pub channel_id: ChannelId,
    /// Frame number in the video, 1-based
    pub frame_id: u64,
    /// Acquisition time (s)
    pub timestamp: f64,
}

/// Parsed camera log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraLog {
    pub records: Vec<LedRecord>,
    /// Lines starting with `#LED` that did not parse
    pub malformed: usize,
}

/// Parses camera-log text.
///
/// Lines not starting with `#LED` are annotations and are ignored. Lines that
/// start with `#LED` but do not carry `channel,frame,timestamp` are counted as
/// malformed and skipped.
pub fn parse_camera_log(text: &str) -> CameraLog {
    let mut log = CameraLog::default();

    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with(LED_PREFIX) {
            continue;
        }
        match parse_led_line(line) {
            Some(record) => log.records.push(record),
            None => log.malformed += 1,
        }
    }

    debug!(
        "Parsed {} LED records from camera log ({} malformed)",
        log.records.len(),
        log.malformed
    );
    log
}

fn parse_led_line(line: &str) -> Option<LedRecord> {
    let body = line.strip_prefix("#LED:")?;
    let mut fields = body.splitn(3, ',');

    let channel = fields.next()?.trim();
    let frame = fields.next()?.trim();
    let rest = fields.next()?.trim();

    if !is_digits(channel) || !is_digits(frame) {
        return None;
    }

    // The timestamp is the leading run of digits and dots; anything after it
    // is ignored.
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let timestamp = rest[..end].parse::<f64>().ok()?;

    Some(LedRecord {
        channel_id: ChannelId(channel.parse().ok()?),
        frame_id: frame.parse().ok()?,
        timestamp,
    })
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Per-sample channel ids read from an array, with optional timestamps.
#[derive(Debug, Clone)]
pub struct ArraySource {
    pub channel_ids: Array1<i64>,
    pub timestamps: Option<Array1<f64>>,
}

/// A source of channel assignment.
#[derive(Debug, Clone)]
pub enum ChannelSource {
    /// Dense array indexed by global sample index
    Array(ArraySource),
    /// Camera log with one record per frame
    Log(CameraLog),
}

impl ChannelSource {
    fn name(&self) -> &'static str {
        match self {
            ChannelSource::Array(_) => "channel_ids",
            ChannelSource::Log(_) => "camera_log",
        }
    }

    fn resolve(&self, expected_len: Option<usize>) -> Result<ChannelAssignment> {
        match self {
            ChannelSource::Array(source) => resolve_array(source, expected_len),
            ChannelSource::Log(log) => resolve_log(log, expected_len),
        }
    }
}

/// Canonical mapping `global_index -> (channel_id, timestamp)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelAssignment {
    channel_ids: Vec<ChannelId>,
    timestamps: Option<Array1<f64>>,
    channels: Vec<ChannelId>,
}

impl ChannelAssignment {
    /// Builds an assignment, checking that timestamps (if any) are parallel
    /// to the channel ids.
    pub fn new(channel_ids: Vec<ChannelId>, timestamps: Option<Array1<f64>>) -> Result<Self> {
        if let Some(ts) = &timestamps {
            if ts.len() != channel_ids.len() {
                return Err(WidefieldError::LengthMismatch {
                    left: "channel_ids".to_string(),
                    left_len: channel_ids.len(),
                    right: "timestamps".to_string(),
                    right_len: ts.len(),
                });
            }
        }

        let mut channels = Vec::new();
        for id in &channel_ids {
            if !channels.contains(id) {
                channels.push(*id);
            }
        }

        Ok(ChannelAssignment {
            channel_ids,
            timestamps,
            channels,
        })
    }

    /// Number of samples covered.
    pub fn len(&self) -> usize {
        self.channel_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel_ids.is_empty()
    }

    /// Channel of the sample at `global_index`.
    pub fn channel_at(&self, global_index: usize) -> Option<ChannelId> {
        self.channel_ids.get(global_index).copied()
    }

    pub fn channel_ids(&self) -> &[ChannelId] {
        &self.channel_ids
    }

    pub fn timestamps(&self) -> Option<ArrayView1<'_, f64>> {
        self.timestamps.as_ref().map(|t| t.view())
    }

    /// Distinct channels in order of first appearance.
    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    /// Position of `channel` in first-appearance order.
    pub fn position(&self, channel: ChannelId) -> Option<usize> {
        self.channels.iter().position(|c| *c == channel)
    }

    /// Global indices belonging to `channel`, ascending.
    pub fn indices_of(&self, channel: ChannelId) -> Vec<usize> {
        self.channel_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| **id == channel)
            .map(|(i, _)| i)
            .collect()
    }

    /// Iterates over every sample in global order.
    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        self.channel_ids
            .iter()
            .enumerate()
            .map(move |(i, id)| Sample {
                global_index: i,
                channel_id: *id,
                timestamp: self.timestamps.as_ref().map(|t| t[i]),
            })
    }
}

/// Result of resolving the channel sources of one session.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub assignment: ChannelAssignment,
    pub warnings: Vec<Warning>,
}

/// Resolves one or more channel sources into a single assignment.
///
/// `expected_len` is the number of samples in the payload (e.g. video frames),
/// when known. When several sources are supplied they must agree on the
/// channel of every sample; the array source is canonical when present.
pub fn resolve(sources: &[ChannelSource], expected_len: Option<usize>) -> Result<Resolution> {
    if sources.is_empty() {
        return Err(WidefieldError::MissingChannelSource);
    }

    // An array fixes the sample count for the log cross-check.
    let array_len = sources.iter().find_map(|s| match s {
        ChannelSource::Array(a) => Some(a.channel_ids.len()),
        ChannelSource::Log(_) => None,
    });
    let expected_len = expected_len.or(array_len);

    let mut warnings = Vec::new();
    let mut resolved = Vec::with_capacity(sources.len());
    for source in sources {
        if let ChannelSource::Log(log) = source {
            if log.malformed > 0 {
                warn!("{} malformed LED lines skipped", log.malformed);
                warnings.push(Warning::MalformedLogLines {
                    count: log.malformed,
                });
            }
        }
        resolved.push((source, source.resolve(expected_len)?));
    }

    // Array sources first so that they become canonical.
    resolved.sort_by_key(|(source, _)| match source {
        ChannelSource::Array(_) => 0,
        ChannelSource::Log(_) => 1,
    });

    let mut iter = resolved.into_iter();
    let (canonical_source, mut canonical) = match iter.next() {
        Some(first) => first,
        None => return Err(WidefieldError::MissingChannelSource),
    };

    for (source, other) in iter {
        check_agreement(&canonical, &other)?;
        debug!(
            "'{}' agrees with '{}' on all {} samples",
            source.name(),
            canonical_source.name(),
            canonical.len()
        );
        if canonical.timestamps.is_none() {
            canonical.timestamps = other.timestamps;
        }
    }

    debug!(
        "Resolved {} samples across {} channels",
        canonical.len(),
        canonical.channels.len()
    );

    Ok(Resolution {
        assignment: canonical,
        warnings,
    })
}

fn check_agreement(canonical: &ChannelAssignment, other: &ChannelAssignment) -> Result<()> {
    if other.len() < canonical.len() {
        return Err(WidefieldError::TruncatedLog {
            resolved: other.len(),
            expected: canonical.len(),
        });
    }
    for (index, (a, b)) in canonical
        .channel_ids
        .iter()
        .zip(other.channel_ids.iter())
        .enumerate()
    {
        if a != b {
            return Err(WidefieldError::ChannelConflict {
                index,
                array_channel: *a,
                log_channel: *b,
            });
        }
    }
    Ok(())
}

fn resolve_array(source: &ArraySource, expected_len: Option<usize>) -> Result<ChannelAssignment> {
    let n = source.channel_ids.len();
    if let Some(expected) = expected_len {
        if expected != n {
            return Err(WidefieldError::LengthMismatch {
                left: "channel_ids".to_string(),
                left_len: n,
                right: "payload".to_string(),
                right_len: expected,
            });
        }
    }

    let channel_ids = source
        .channel_ids
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            u32::try_from(value)
                .map(ChannelId)
                .map_err(|_| WidefieldError::InvalidChannelId { index, value })
        })
        .collect::<Result<Vec<_>>>()?;

    ChannelAssignment::new(channel_ids, source.timestamps.clone())
}

fn resolve_log(log: &CameraLog, expected_len: Option<usize>) -> Result<ChannelAssignment> {
    // Frame ids are untrusted, so slots are built from the records themselves
    // rather than from the largest id.
    let mut records: Vec<&LedRecord> = log
        .records
        .iter()
        .filter(|r| r.frame_id > 0)
        .filter(|r| expected_len.map_or(true, |n| r.frame_id <= n as u64))
        .collect();
    let dropped = log.records.len() - records.len();
    if dropped > 0 {
        debug!("Dropped {} LED records outside the available frames", dropped);
    }

    // Stable sort: the first record of a repeated frame wins.
    records.sort_by_key(|r| r.frame_id);
    let mut frames: Vec<&LedRecord> = Vec::with_capacity(records.len());
    for record in records {
        match frames.last() {
            Some(last) if last.frame_id == record.frame_id => {
                if last.channel_id != record.channel_id {
                    return Err(WidefieldError::DuplicateFrame {
                        frame_id: record.frame_id,
                        first: last.channel_id,
                        second: record.channel_id,
                    });
                }
            }
            _ => frames.push(record),
        }
    }

    let n = expected_len.unwrap_or_else(|| {
        frames
            .last()
            .map_or(0, |r| usize::try_from(r.frame_id).unwrap_or(usize::MAX))
    });

    // Every frame must be resolved; the first hole marks the truncation point.
    let resolved = frames
        .iter()
        .enumerate()
        .take_while(|(i, r)| r.frame_id == *i as u64 + 1)
        .count();
    if resolved < n {
        return Err(WidefieldError::TruncatedLog {
            resolved,
            expected: n,
        });
    }

    let (channel_ids, timestamps): (Vec<ChannelId>, Vec<f64>) = frames
        .into_iter()
        .map(|r| (r.channel_id, r.timestamp))
        .unzip();
    ChannelAssignment::new(channel_ids, Some(Array1::from(timestamps)))
}

/// Picks the channel used for single-channel outputs.
///
/// With an explicit request the channel must exist. Without one, a session
/// with several channels defaults to the first channel in index order and
/// reports the choice as a warning.
pub fn select_default_channel(
    assignment: &ChannelAssignment,
    requested: Option<ChannelId>,
) -> Result<(ChannelId, Option<Warning>)> {
    if let Some(channel) = requested {
        if assignment.position(channel).is_none() {
            return Err(WidefieldError::UnknownChannel(channel));
        }
        return Ok((channel, None));
    }

    match assignment.channels() {
        [] => Err(WidefieldError::NoChannels),
        [only] => Ok((*only, None)),
        [first, ..] => {
            let warning = Warning::AmbiguousDefaultChannel {
                chosen: *first,
                available: assignment.channels().to_vec(),
            };
            warn!("{}", warning);
            Ok((*first, Some(warning)))
        }
    }
}
