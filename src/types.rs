use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Identifier of one light source (LED) as written by the acquisition software.
///
/// The id is opaque and only meaningful within a session; it is mapped to a
/// wavelength through the light-source properties table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physiological role of an excitation wavelength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelRole {
    /// Calcium-dependent fluorescence (e.g. GCaMP excited at 470 nm)
    Functional,
    /// Calcium-independent reference used for haemodynamic correction
    Isosbestic,
}

/// Wavelength (nm) to role lookup. The only place where this mapping lives.
const ROLE_TABLE: &[(u32, ChannelRole)] = &[
    (470, ChannelRole::Functional),
    (405, ChannelRole::Isosbestic),
];

impl ChannelRole {
    /// Returns the role of an excitation wavelength, or `None` for wavelengths
    /// that have no known role.
    pub fn for_wavelength(wavelength_nm: u32) -> Option<ChannelRole> {
        ROLE_TABLE
            .iter()
            .find(|(nm, _)| *nm == wavelength_nm)
            .map(|(_, role)| *role)
    }

    /// Short label used when naming series for this role.
    pub fn label(&self) -> &'static str {
        match self {
            ChannelRole::Functional => "calcium",
            ChannelRole::Isosbestic => "isosbestic",
        }
    }
}

/// One row of the light-source properties table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightSource {
    /// Channel id used in the per-sample light-source array and camera log
    pub channel_id: ChannelId,
    /// Display color (e.g. "Blue", "Violet")
    pub color: String,
    /// Excitation wavelength (nm)
    pub wavelength_nm: u32,
}

/// One acquired sample after channel resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Position in the raw interleaved stream (0-based)
    pub global_index: usize,
    /// Channel that produced this sample
    pub channel_id: ChannelId,
    /// Acquisition time in seconds, if known
    pub timestamp: Option<f64>,
}

/// A logical acquisition stream.
///
/// The role is not stored; it is derived from the wavelength on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id as found in the assignment source
    pub id: ChannelId,
    /// Excitation wavelength (nm), when the properties table lists this channel
    pub wavelength_nm: Option<u32>,
    /// Display color from the properties table
    pub color: Option<String>,
    /// Effective per-channel sampling rate (Hz)
    pub sampling_rate_hz: f64,
}

impl Channel {
    /// Role of this channel, derived from its wavelength.
    pub fn role(&self) -> Option<ChannelRole> {
        self.wavelength_nm.and_then(ChannelRole::for_wavelength)
    }

    /// Suffix used to name this channel's series, e.g. `calcium`.
    ///
    /// Channels without a known role fall back to their wavelength, or to
    /// their id when no wavelength is known.
    pub fn label(&self) -> String {
        match (self.role(), self.wavelength_nm) {
            (Some(role), _) => role.label().to_string(),
            (None, Some(nm)) => format!("{}nm", nm),
            (None, None) => format!("channel_{}", self.id),
        }
    }

    /// Name of the imaging series this channel is written to.
    pub fn series_name(&self) -> String {
        format!("one_photon_series_{}", self.label())
    }

    /// Name of the plane segmentation this channel's traces belong to.
    pub fn plane_segmentation_name(&self) -> String {
        format!("plane_segmentation_{}", self.label())
    }
}

/// Per-channel output of the demultiplexer.
///
/// Constructed once per (session, channel) and not modified afterwards.
/// All payloads share the frame axis with `timestamps`.
#[derive(Debug, Clone)]
pub struct ChannelBundle {
    /// Channel metadata
    pub channel: Channel,
    /// Global indices of the samples in this bundle, ascending
    pub global_indices: Vec<usize>,
    /// Timestamps (s) of the samples in this bundle
    /// - Shape: [num_samples]
    pub timestamps: Array1<f64>,
    /// Grayscale video frames
    /// - Shape: [num_samples, height, width]
    pub frames: Option<Array3<u8>>,
    /// Raw ROI traces
    /// - Shape: [num_samples, num_rois]
    pub traces: Option<Array2<f64>>,
    /// Haemodynamically corrected dF/F traces (functional channel only)
    /// - Shape: [num_samples, num_rois]
    pub dff: Option<Array2<f64>>,
    /// Mean image of this channel
    /// - Shape: [height, width]
    pub mean_image: Option<Array2<f64>>,
}

impl ChannelBundle {
    /// Number of samples in this bundle.
    pub fn len(&self) -> usize {
        self.global_indices.len()
    }

    /// Returns true when the bundle holds no samples.
    pub fn is_empty(&self) -> bool {
        self.global_indices.is_empty()
    }

    /// Number of ROIs in the trace payload, 0 when there are no traces.
    pub fn num_rois(&self) -> usize {
        self.traces.as_ref().map_or(0, |t| t.ncols())
    }

    /// Duration covered by this bundle's timestamps, in seconds.
    pub fn duration(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }
}

/// A 2-D point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Point2 { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Ordered, named 2-D points in one coordinate frame.
///
/// `names` and `colors` are index-aligned with `points` when present.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LandmarkSet {
    pub points: Vec<Point2>,
    pub names: Vec<Option<String>>,
    pub colors: Vec<Option<String>>,
}

impl LandmarkSet {
    /// Builds an unnamed, uncolored set from bare points.
    pub fn from_points(points: Vec<Point2>) -> Self {
        let n = points.len();
        LandmarkSet {
            points,
            names: vec![None; n],
            colors: vec![None; n],
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Label of landmark `i`, falling back to `landmark_<i>`.
    pub fn label(&self, i: usize) -> String {
        self.names
            .get(i)
            .cloned()
            .flatten()
            .unwrap_or_else(|| format!("landmark_{}", i))
    }
}

/// One landmark expressed in reference (atlas) space.
///
/// `z` is NaN for 2-D source data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnatomicalRow {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub region_label: String,
}

/// One row of the landmark correspondence table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandmarkPair {
    /// Coordinates in the session image
    pub source: Point2,
    /// Coordinates in the atlas image
    pub target: Point2,
    pub label: Option<String>,
    pub color: Option<String>,
}

/// Non-fatal conditions surfaced to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// Several channels were present and none was requested; the first one
    /// in index order was chosen.
    AmbiguousDefaultChannel {
        chosen: ChannelId,
        available: Vec<ChannelId>,
    },
    /// A channel appears in the assignment but not in the properties table.
    UnlabeledChannel(ChannelId),
    /// Camera-log lines that looked like LED records but could not be parsed.
    MalformedLogLines { count: usize },
    /// Timestamps decrease somewhere within a channel.
    NonMonotonicTimestamps { channel: ChannelId, count: usize },
    /// No combined rate was configured or recorded and the timestamps have
    /// no positive step; channels report 0 Hz.
    UnknownSamplingRate,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Warning::AmbiguousDefaultChannel { chosen, available } => write!(
                f,
                "no channel selected among {:?}; defaulting to first channel {}",
                available.iter().map(|c| c.0).collect::<Vec<_>>(),
                chosen
            ),
            Warning::UnlabeledChannel(id) => {
                write!(f, "channel {} has no row in the light-source table", id)
            }
            Warning::MalformedLogLines { count } => {
                write!(f, "{} malformed LED lines skipped in camera log", count)
            }
            Warning::NonMonotonicTimestamps { channel, count } => write!(
                f,
                "{} non-monotonic timestamp steps in channel {}",
                count, channel
            ),
            Warning::UnknownSamplingRate => write!(
                f,
                "sampling rate could not be determined from timestamps; reporting 0 Hz"
            ),
        }
    }
}

/// Error type for the widefield demultiplexer.
#[derive(Debug, Error)]
pub enum WidefieldError {
    /// The array-based and log-based channel sources disagree
    #[error("channel conflict at sample {index}: array says {array_channel}, camera log says {log_channel}")]
    ChannelConflict {
        index: usize,
        array_channel: ChannelId,
        log_channel: ChannelId,
    },
    /// Two arrays indexed by the same sample domain have different lengths
    #[error("length mismatch: '{left}' has {left_len} samples but '{right}' has {right_len}")]
    LengthMismatch {
        left: String,
        left_len: usize,
        right: String,
        right_len: usize,
    },
    /// Partitions do not cover every sample exactly once
    #[error("partition covers {covered} samples, expected {expected}")]
    IncompletePartition { covered: usize, expected: usize },
    /// The camera log resolves fewer samples than required
    #[error("camera log resolves {resolved} samples, expected {expected}")]
    TruncatedLog { resolved: usize, expected: usize },
    /// The camera log lists the same frame twice with different channels
    #[error("camera log lists frame {frame_id} for both channel {first} and channel {second}")]
    DuplicateFrame {
        frame_id: u64,
        first: ChannelId,
        second: ChannelId,
    },
    /// No channel source was supplied for the session
    #[error("no channel assignment source (light-source array or camera log) supplied")]
    MissingChannelSource,
    /// Neither timestamps nor a combined acquisition rate are available
    #[error("session has no timestamps and no combined acquisition rate")]
    MissingTiming,
    /// Sampling rate is undefined without channels
    #[error("channel count is zero; sampling rate is undefined")]
    NoChannels,
    /// Fewer than two landmark correspondences
    #[error("at least 2 landmark correspondences are required, got {got}")]
    InsufficientLandmarks { got: usize },
    /// Source and target landmark sets differ in length
    #[error("landmark sets differ in length: {source_len} source vs {target_len} target")]
    LandmarkCountMismatch { source_len: usize, target_len: usize },
    /// All source landmarks coincide, so rotation and scale are undefined
    #[error("source landmarks are coincident; transform is undetermined")]
    DegenerateLandmarks,
    /// A supplied rotation is not orthonormal with determinant +1
    #[error("rotation is not a proper orthonormal matrix (deviation {deviation:.3e})")]
    NonOrthonormalRotation { deviation: f64 },
    /// Scale must be finite and positive
    #[error("invalid similarity scale {0}")]
    InvalidScale(f64),
    /// Homogeneous matrix is not an affine similarity
    #[error("homogeneous transform has invalid last row {0:?}")]
    InvalidHomogeneousRow([f64; 3]),
    /// An array had the wrong number of dimensions or axis length
    #[error("'{name}' has shape {actual:?}, expected {expected}")]
    InvalidShape {
        name: String,
        expected: String,
        actual: Vec<usize>,
    },
    /// No light source with the requested wavelength
    #[error("no light source with wavelength {0} nm")]
    UnknownWavelength(u32),
    /// Requested channel is not present in the assignment
    #[error("channel {0} is not present in the session")]
    UnknownChannel(ChannelId),
    /// A channel id in an input array is negative or too large
    #[error("invalid channel id {value} at sample {index}")]
    InvalidChannelId { index: usize, value: i64 },
    /// A required column is missing from a table
    #[error("table '{table}' has no '{column}' column")]
    MissingColumn { table: String, column: String },
    /// The file format was not recognized
    #[error("unrecognized file format: {0}")]
    UnrecognizedFileFormat(String),
    /// The array dtype is not supported
    #[error("unsupported dtype '{0}'")]
    UnsupportedDtype(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("table error: {0}")]
    Csv(#[from] csv::Error),
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, WidefieldError>;
