use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info};
use ndarray::{Array, Array3, ArrayD, Dimension, IxDyn, ShapeBuilder};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::channels::{parse_camera_log, ArraySource, CameraLog, ChannelSource};
use crate::landmarks::LandmarkCorrespondence;
use crate::light_source::LightSourceTable;
use crate::session::{FramePayload, SessionInputs};
use crate::types::*;

// Constants used throughout the reader
const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
const FRAME_CACHE_META: &str = "meta.json";
const FRAME_CACHE_DATA: &str = "frames.dat";

// File names of a processed session folder
const CHANNEL_IDS_FILE: &str = "imaging.imagingLightSource.npy";
const TIMESTAMPS_FILE: &str = "imaging.times.npy";
const LIGHT_SOURCES_FILE: &str = "imagingLightSource.properties.htsv";
const TRACES_FILE: &str = "widefieldSVT.uncorrected.npy";
const DFF_FILE: &str = "widefieldSVT.haemoCorrected.npy";
const FRAME_AVERAGE_FILE: &str = "widefieldChannels.frameAverage.npy";
const SPATIAL_COMPONENTS_FILE: &str = "widefieldU.images.npy";
const LANDMARKS_FILE: &str = "landmarks.json";

/// Array read from an NPY file, widened to one of three element types.
#[derive(Debug, Clone, PartialEq)]
pub enum NpyArray {
    /// `f4` and `f8` data
    Float(ArrayD<f64>),
    /// Signed integers and unsigned integers wider than one byte
    Int(ArrayD<i64>),
    /// `u1` and `b1` data
    Byte(ArrayD<u8>),
}

impl NpyArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            NpyArray::Float(a) => a.shape(),
            NpyArray::Int(a) => a.shape(),
            NpyArray::Byte(a) => a.shape(),
        }
    }

    pub fn into_f64(self) -> ArrayD<f64> {
        match self {
            NpyArray::Float(a) => a,
            NpyArray::Int(a) => a.mapv(|v| v as f64),
            NpyArray::Byte(a) => a.mapv(f64::from),
        }
    }

    /// Integer view of the data; floats must hold integral values.
    pub fn into_i64(self) -> Result<ArrayD<i64>> {
        match self {
            NpyArray::Int(a) => Ok(a),
            NpyArray::Byte(a) => Ok(a.mapv(i64::from)),
            NpyArray::Float(a) => {
                if a.iter().all(|v| v.is_finite() && v.fract() == 0.0) {
                    Ok(a.mapv(|v| v as i64))
                } else {
                    Err(WidefieldError::UnsupportedDtype(
                        "float array with non-integral values".to_string(),
                    ))
                }
            }
        }
    }

    /// Converts to an array of fixed rank, naming the array on failure.
    pub fn into_f64_rank<D: Dimension>(self, name: &str) -> Result<Array<f64, D>> {
        with_rank(name, self.into_f64())
    }
}

/// Reads an NPY file.
///
/// Supports format versions 1 to 3 with little-endian `f4`, `f8`, `i1`..`i8`,
/// `u1`..`u8` and `b1` data in either C or Fortran order. Arrays are
/// returned in standard (C) layout.
pub fn read_npy<P: AsRef<Path>>(path: P) -> Result<NpyArray> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::with_capacity(65536, file); // 64KB buffer
    let array = parse_npy(&mut reader)?;
    debug!(
        "Read {:?} array from '{}'",
        array.shape(),
        path.as_ref().display()
    );
    Ok(array)
}

/// Parses NPY data from any reader.
pub fn parse_npy<R: Read>(reader: &mut R) -> Result<NpyArray> {
    let header = read_npy_header(reader)?;
    let (kind, size) = parse_descr(&header.descr)?;
    let count = element_count(&header.shape)?;
    let byte_len = count.checked_mul(size).ok_or_else(|| {
        WidefieldError::UnrecognizedFileFormat(format!(
            "NPY shape {:?} overflows the addressable size",
            header.shape
        ))
    })?;

    // Read what is actually there before sizing any typed buffer.
    let mut payload = Vec::new();
    reader.by_ref().take(byte_len as u64).read_to_end(&mut payload)?;
    if payload.len() < byte_len {
        return Err(WidefieldError::UnrecognizedFileFormat(format!(
            "NPY data ends after {} of {} bytes",
            payload.len(),
            byte_len
        )));
    }
    let mut data = payload.as_slice();

    let array = match (kind, size) {
        ('f', 4) => {
            let mut buf = vec![0f32; count];
            data.read_f32_into::<LittleEndian>(&mut buf)?;
            let values = buf.into_iter().map(f64::from).collect();
            NpyArray::Float(build_array(&header, values)?)
        }
        ('f', 8) => {
            let mut buf = vec![0f64; count];
            data.read_f64_into::<LittleEndian>(&mut buf)?;
            NpyArray::Float(build_array(&header, buf)?)
        }
        ('i', 1) => {
            let mut buf = vec![0i8; count];
            data.read_i8_into(&mut buf)?;
            NpyArray::Int(build_array(&header, buf.into_iter().map(i64::from).collect())?)
        }
        ('i', 2) => {
            let mut buf = vec![0i16; count];
            data.read_i16_into::<LittleEndian>(&mut buf)?;
            NpyArray::Int(build_array(&header, buf.into_iter().map(i64::from).collect())?)
        }
        ('i', 4) => {
            let mut buf = vec![0i32; count];
            data.read_i32_into::<LittleEndian>(&mut buf)?;
            NpyArray::Int(build_array(&header, buf.into_iter().map(i64::from).collect())?)
        }
        ('i', 8) => {
            let mut buf = vec![0i64; count];
            data.read_i64_into::<LittleEndian>(&mut buf)?;
            NpyArray::Int(build_array(&header, buf)?)
        }
        ('u', 1) | ('b', 1) => {
            let mut buf = vec![0u8; count];
            data.read_exact(&mut buf)?;
            NpyArray::Byte(build_array(&header, buf)?)
        }
        ('u', 2) => {
            let mut buf = vec![0u16; count];
            data.read_u16_into::<LittleEndian>(&mut buf)?;
            NpyArray::Int(build_array(&header, buf.into_iter().map(i64::from).collect())?)
        }
        ('u', 4) => {
            let mut buf = vec![0u32; count];
            data.read_u32_into::<LittleEndian>(&mut buf)?;
            NpyArray::Int(build_array(&header, buf.into_iter().map(i64::from).collect())?)
        }
        ('u', 8) => {
            let mut buf = vec![0u64; count];
            data.read_u64_into::<LittleEndian>(&mut buf)?;
            let values = buf
                .into_iter()
                .map(|v| {
                    i64::try_from(v).map_err(|_| {
                        WidefieldError::UnsupportedDtype(format!("u8 value {} exceeds i64", v))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            NpyArray::Int(build_array(&header, values)?)
        }
        _ => return Err(WidefieldError::UnsupportedDtype(header.descr)),
    };

    Ok(array)
}

#[derive(Debug)]
struct NpyHeader {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Helper function to read the magic string, version and header dictionary
fn read_npy_header<R: Read>(reader: &mut R) -> Result<NpyHeader> {
    check_magic(reader)?;

    let major = reader.read_u8()?;
    let _minor = reader.read_u8()?;
    let header_len = match major {
        1 => reader.read_u16::<LittleEndian>()? as usize,
        2 | 3 => reader.read_u32::<LittleEndian>()? as usize,
        _ => {
            return Err(WidefieldError::UnrecognizedFileFormat(format!(
                "NPY version {} is not supported",
                major
            )))
        }
    };

    let mut buf = Vec::new();
    reader.by_ref().take(header_len as u64).read_to_end(&mut buf)?;
    if buf.len() < header_len {
        return Err(WidefieldError::UnrecognizedFileFormat(format!(
            "NPY header ends after {} of {} bytes",
            buf.len(),
            header_len
        )));
    }
    let text = String::from_utf8_lossy(&buf);

    let malformed = |key: &str| {
        WidefieldError::UnrecognizedFileFormat(format!("NPY header has no valid '{}' entry", key))
    };

    let descr = dict_value(&text, "descr")
        .and_then(quoted)
        .ok_or_else(|| malformed("descr"))?
        .to_string();
    let fortran_order = match dict_value(&text, "fortran_order") {
        Some(v) if v.starts_with("True") => true,
        Some(v) if v.starts_with("False") => false,
        _ => return Err(malformed("fortran_order")),
    };
    let shape = dict_value(&text, "shape")
        .and_then(parse_shape)
        .ok_or_else(|| malformed("shape"))?;

    Ok(NpyHeader {
        descr,
        fortran_order,
        shape,
    })
}

/// Helper function to check the magic string that identifies NPY files
fn check_magic<R: Read>(reader: &mut R) -> Result<()> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != NPY_MAGIC {
        return Err(WidefieldError::UnrecognizedFileFormat(
            "missing NPY magic string".to_string(),
        ));
    }
    Ok(())
}

/// Text following `'key':` in the header dictionary
fn dict_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{}':", key);
    let start = text.find(&pattern)? + pattern.len();
    Some(text[start..].trim_start())
}

fn quoted(value: &str) -> Option<&str> {
    let rest = value.strip_prefix('\'')?;
    let end = rest.find('\'')?;
    Some(&rest[..end])
}

fn parse_shape(value: &str) -> Option<Vec<usize>> {
    let rest = value.strip_prefix('(')?;
    let end = rest.find(')')?;
    rest[..end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

/// Splits a dtype descriptor such as `<f8` into kind and item size.
fn parse_descr(descr: &str) -> Result<(char, usize)> {
    let unsupported = || WidefieldError::UnsupportedDtype(descr.to_string());
    let mut chars = descr.chars();
    let order = chars.next().ok_or_else(unsupported)?;
    let kind = chars.next().ok_or_else(unsupported)?;
    let size: usize = chars.as_str().parse().map_err(|_| unsupported())?;

    match order {
        '<' | '|' | '=' => Ok((kind, size)),
        '>' if size == 1 => Ok((kind, size)),
        _ => Err(unsupported()),
    }
}

/// Number of elements in `shape`, or an error when it overflows `usize`.
fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| {
            WidefieldError::UnrecognizedFileFormat(format!(
                "NPY shape {:?} overflows the addressable size",
                shape
            ))
        })
}

fn build_array<T: Clone>(header: &NpyHeader, values: Vec<T>) -> Result<ArrayD<T>> {
    let array = if header.fortran_order {
        ArrayD::from_shape_vec(IxDyn(&header.shape).f(), values)?
    } else {
        ArrayD::from_shape_vec(IxDyn(&header.shape), values)?
    };
    Ok(array.as_standard_layout().into_owned())
}

fn with_rank<T, D: Dimension>(name: &str, array: ArrayD<T>) -> Result<Array<T, D>> {
    let actual = array.shape().to_vec();
    array
        .into_dimensionality::<D>()
        .map_err(|_| WidefieldError::InvalidShape {
            name: name.to_string(),
            expected: format!("{}-d array", D::NDIM.unwrap_or(0)),
            actual,
        })
}

/// Reads a camera log written during acquisition.
pub fn read_camera_log<P: AsRef<Path>>(path: P) -> Result<CameraLog> {
    let text = fs::read_to_string(path.as_ref())?;
    Ok(parse_camera_log(&text))
}

/// Reads a light-source properties table.
pub fn read_light_sources<P: AsRef<Path>>(path: P) -> Result<LightSourceTable> {
    let file = File::open(path.as_ref())?;
    LightSourceTable::parse(BufReader::new(file))
}

/// Reads a landmark JSON file.
pub fn read_landmarks<P: AsRef<Path>>(path: P) -> Result<LandmarkCorrespondence> {
    let file = File::open(path.as_ref())?;
    LandmarkCorrespondence::parse(BufReader::new(file))
}

#[derive(Debug, Deserialize)]
struct FrameCacheMeta {
    total_num_samples: usize,
    height: usize,
    width: usize,
    #[serde(default = "default_cache_dtype")]
    dtype: String,
    #[serde(default)]
    fps: Option<f64>,
}

fn default_cache_dtype() -> String {
    "uint8".to_string()
}

/// Grayscale frames decoded once from the raw video.
#[derive(Debug, Clone)]
pub struct FrameCache {
    /// Shape: [num_frames, height, width]
    pub frames: Array3<u8>,
    /// Frame rate of the source video
    pub fps: Option<f64>,
}

/// Reads a frame cache folder (`meta.json` + `frames.dat`).
///
/// `frames.dat` holds raw `uint8` frames in C order. Bytes beyond the
/// declared frame count are ignored.
pub fn read_frame_cache<P: AsRef<Path>>(folder: P) -> Result<FrameCache> {
    let folder = folder.as_ref();
    let meta_file = File::open(folder.join(FRAME_CACHE_META))?;
    let meta: FrameCacheMeta = serde_json::from_reader(BufReader::new(meta_file))?;

    if meta.dtype != "uint8" {
        return Err(WidefieldError::UnsupportedDtype(meta.dtype));
    }

    let shape = [meta.total_num_samples, meta.height, meta.width];
    let expected = element_count(&shape).map_err(|_| WidefieldError::InvalidShape {
        name: FRAME_CACHE_META.to_string(),
        expected: "frame count, height and width within the addressable size".to_string(),
        actual: shape.to_vec(),
    })?;

    let data_path = folder.join(FRAME_CACHE_DATA);
    let available = fs::metadata(&data_path)?.len();
    if available < expected as u64 {
        return Err(WidefieldError::InvalidShape {
            name: FRAME_CACHE_DATA.to_string(),
            expected: format!("{} bytes", expected),
            actual: vec![usize::try_from(available).unwrap_or(usize::MAX)],
        });
    }
    let mut bytes = Vec::with_capacity(expected);
    File::open(&data_path)?
        .take(expected as u64)
        .read_to_end(&mut bytes)?;

    let frames = Array3::from_shape_vec((meta.total_num_samples, meta.height, meta.width), bytes)?;
    debug!(
        "Frame cache: {} frames of {}x{} at {:?} fps",
        meta.total_num_samples, meta.height, meta.width, meta.fps
    );

    Ok(FrameCache {
        frames,
        fps: meta.fps.filter(|f| f.is_finite()),
    })
}

/// Reads `path` with `read` when the file exists.
fn read_optional<T>(path: PathBuf, read: impl FnOnce(&Path) -> Result<T>) -> Result<Option<T>> {
    if path.exists() {
        read(&path).map(Some)
    } else {
        debug!("'{}' not present", path.display());
        Ok(None)
    }
}

/// Loads a processed session folder.
///
/// Required files are the per-frame light-source ids, their timestamps, the
/// light-source properties and the uncorrected temporal components. The
/// haemodynamically corrected components, per-channel frame averages,
/// spatial components and landmarks are read when present.
pub fn load_processed_session<P: AsRef<Path>>(folder: P) -> Result<SessionInputs> {
    let tic = Instant::now();
    let folder = folder.as_ref();
    let session_id = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| folder.display().to_string());

    let channel_ids = read_npy(folder.join(CHANNEL_IDS_FILE))?.into_i64()?;
    let channel_ids = with_rank(CHANNEL_IDS_FILE, channel_ids)?;
    let timestamps = read_npy(folder.join(TIMESTAMPS_FILE))?.into_f64_rank(TIMESTAMPS_FILE)?;
    let light_sources = read_light_sources(folder.join(LIGHT_SOURCES_FILE))?;

    let mut inputs = SessionInputs::new(
        session_id,
        vec![ChannelSource::Array(ArraySource {
            channel_ids,
            timestamps: Some(timestamps),
        })],
        light_sources,
    );

    inputs.traces = Some(read_npy(folder.join(TRACES_FILE))?.into_f64_rank(TRACES_FILE)?);
    inputs.dff = read_optional(folder.join(DFF_FILE), |p| {
        read_npy(p)?.into_f64_rank(DFF_FILE)
    })?;
    inputs.frame_average = read_optional(folder.join(FRAME_AVERAGE_FILE), |p| {
        read_npy(p)?.into_f64_rank(FRAME_AVERAGE_FILE)
    })?;
    inputs.spatial_components = read_optional(folder.join(SPATIAL_COMPONENTS_FILE), |p| {
        read_npy(p)?.into_f64_rank(SPATIAL_COMPONENTS_FILE)
    })?;
    inputs.landmarks = read_optional(folder.join(LANDMARKS_FILE), |p| read_landmarks(p))?;

    info!(
        "Loaded processed session '{}'. Elapsed time: {:.1} seconds",
        inputs.session_id,
        tic.elapsed().as_secs_f64()
    );
    Ok(inputs)
}

/// Locations of the raw acquisition files of one session.
#[derive(Debug, Clone)]
pub struct RawSessionPaths {
    /// Folder holding `meta.json` and `frames.dat`
    pub cache_folder: PathBuf,
    pub camera_log: PathBuf,
    pub light_sources: PathBuf,
    pub landmarks: Option<PathBuf>,
}

/// Loads a raw session: cached video frames with the camera log as channel
/// source. The cache frame rate is the combined acquisition rate.
pub fn load_raw_session(session_id: &str, paths: &RawSessionPaths) -> Result<SessionInputs> {
    let tic = Instant::now();

    let cache = read_frame_cache(&paths.cache_folder)?;
    let log = read_camera_log(&paths.camera_log)?;
    let light_sources = read_light_sources(&paths.light_sources)?;

    let mut inputs = SessionInputs::new(session_id, vec![ChannelSource::Log(log)], light_sources);
    inputs.frames = Some(FramePayload::Gray(cache.frames));
    inputs.combined_rate_hz = cache.fps;
    inputs.landmarks = paths.landmarks.as_ref().map(read_landmarks).transpose()?;

    info!(
        "Loaded raw session '{}'. Elapsed time: {:.1} seconds",
        session_id,
        tic.elapsed().as_secs_f64()
    );
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, Ix2};
    use std::io::{Cursor, Write};

    fn npy_bytes(major: u8, descr: &str, fortran: bool, shape: &str, data: &[u8]) -> Vec<u8> {
        let mut dict = format!(
            "{{'descr': '{}', 'fortran_order': {}, 'shape': {}, }}",
            descr,
            if fortran { "True" } else { "False" },
            shape
        );
        let prefix = if major == 1 { 10 } else { 12 };
        while (prefix + dict.len() + 1) % 64 != 0 {
            dict.push(' ');
        }
        dict.push('\n');

        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[major, 0]);
        if major == 1 {
            bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        } else {
            bytes.extend_from_slice(&(dict.len() as u32).to_le_bytes());
        }
        bytes.extend_from_slice(dict.as_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    fn f64_bytes(values: &[f64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_read_float_matrix() {
        let data = f64_bytes(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let bytes = npy_bytes(1, "<f8", false, "(2, 3)", &data);
        let array = parse_npy(&mut Cursor::new(bytes)).unwrap();
        let matrix = array.into_f64_rank::<Ix2>("m").unwrap();
        assert_eq!(matrix.dim(), (2, 3));
        assert_eq!(matrix[[1, 0]], 3.0);
    }

    #[test]
    fn test_fortran_order_is_normalized() {
        // Column-major [[1, 2], [3, 4]]
        let data: Vec<u8> = [1i32, 3, 2, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
        let bytes = npy_bytes(2, "<i4", true, "(2, 2)", &data);
        let array = parse_npy(&mut Cursor::new(bytes)).unwrap().into_i64().unwrap();
        assert_eq!(array, Array2::from(vec![[1i64, 2], [3, 4]]).into_dyn());
        assert!(array.is_standard_layout());
    }

    #[test]
    fn test_one_dimensional_bytes() {
        let bytes = npy_bytes(1, "|u1", false, "(4,)", &[1, 2, 1, 2]);
        let array = parse_npy(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(array.shape(), &[4]);
        let ids = with_rank::<_, ndarray::Ix1>("ids", array.into_i64().unwrap()).unwrap();
        assert_eq!(ids, Array1::from(vec![1i64, 2, 1, 2]));
    }

    #[test]
    fn test_float_ids_must_be_integral() {
        let bytes = npy_bytes(1, "<f8", false, "(2,)", &f64_bytes(&[1.0, 2.5]));
        let array = parse_npy(&mut Cursor::new(bytes)).unwrap();
        assert!(matches!(
            array.into_i64(),
            Err(WidefieldError::UnsupportedDtype(_))
        ));
    }

    #[test]
    fn test_rejects_bad_magic_and_big_endian() {
        let mut bytes = npy_bytes(1, "<f8", false, "(1,)", &f64_bytes(&[1.0]));
        bytes[1] = b'X';
        assert!(matches!(
            parse_npy(&mut Cursor::new(bytes)),
            Err(WidefieldError::UnrecognizedFileFormat(_))
        ));

        let bytes = npy_bytes(1, ">f8", false, "(1,)", &f64_bytes(&[1.0]));
        assert!(matches!(
            parse_npy(&mut Cursor::new(bytes)),
            Err(WidefieldError::UnsupportedDtype(_))
        ));
    }

    #[test]
    fn test_truncated_data() {
        let bytes = npy_bytes(1, "<f8", false, "(3,)", &f64_bytes(&[1.0]));
        assert!(matches!(
            parse_npy(&mut Cursor::new(bytes)),
            Err(WidefieldError::UnrecognizedFileFormat(_))
        ));
    }

    #[test]
    fn test_oversized_shape_is_rejected() {
        let shape = format!("({}, {}, 4)", usize::MAX / 2, usize::MAX / 2);
        let bytes = npy_bytes(1, "<f8", false, &shape, &f64_bytes(&[1.0]));
        assert!(matches!(
            parse_npy(&mut Cursor::new(bytes)),
            Err(WidefieldError::UnrecognizedFileFormat(_))
        ));

        // Fits in usize, but the file holds almost none of it.
        let bytes = npy_bytes(1, "<f8", false, "(1000000000000,)", &f64_bytes(&[1.0]));
        assert!(matches!(
            parse_npy(&mut Cursor::new(bytes)),
            Err(WidefieldError::UnrecognizedFileFormat(_))
        ));
    }

    #[test]
    fn test_wrong_rank_names_array() {
        let bytes = npy_bytes(1, "<f8", false, "(2,)", &f64_bytes(&[1.0, 2.0]));
        let array = parse_npy(&mut Cursor::new(bytes)).unwrap();
        match array.into_f64_rank::<Ix2>("traces") {
            Err(WidefieldError::InvalidShape { name, actual, .. }) => {
                assert_eq!(name, "traces");
                assert_eq!(actual, vec![2]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_read_frame_cache() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(FRAME_CACHE_META),
            r#"{"total_num_samples": 2, "height": 2, "width": 3, "dtype": "uint8", "fps": 30.0}"#,
        )
        .unwrap();
        let mut data = File::create(dir.path().join(FRAME_CACHE_DATA)).unwrap();
        data.write_all(&(0u8..14).collect::<Vec<_>>()).unwrap();

        let cache = read_frame_cache(dir.path()).unwrap();
        assert_eq!(cache.frames.dim(), (2, 2, 3));
        assert_eq!(cache.frames[[1, 1, 2]], 11);
        assert_eq!(cache.fps, Some(30.0));
    }

    #[test]
    fn test_short_frame_cache() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(FRAME_CACHE_META),
            r#"{"total_num_samples": 4, "height": 2, "width": 2, "dtype": "uint8"}"#,
        )
        .unwrap();
        fs::write(dir.path().join(FRAME_CACHE_DATA), [0u8; 10]).unwrap();
        assert!(matches!(
            read_frame_cache(dir.path()),
            Err(WidefieldError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_frame_cache_with_overflowing_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let meta = format!(
            r#"{{"total_num_samples": {}, "height": 1048576, "width": 1048576, "dtype": "uint8"}}"#,
            usize::MAX / 4
        );
        fs::write(dir.path().join(FRAME_CACHE_META), meta).unwrap();
        fs::write(dir.path().join(FRAME_CACHE_DATA), [0u8; 16]).unwrap();
        match read_frame_cache(dir.path()) {
            Err(WidefieldError::InvalidShape { name, .. }) => assert_eq!(name, FRAME_CACHE_META),
            other => panic!("unexpected {:?}", other),
        }
    }
}
