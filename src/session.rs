//! Per-session orchestration: channel resolution, partitioning and rate
//! derivation on one branch, landmark alignment on the other, joined into a
//! single [`SessionResult`].

use log::{debug, info, warn};
use ndarray::{Array1, Array2, Array3, Array4, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use std::time::Instant;

use crate::channels::{self, ChannelSource};
use crate::config::SessionConfig;
use crate::landmarks::{self, LandmarkCorrespondence, ResolvedTransform};
use crate::light_source::LightSourceTable;
use crate::partition::{self, Partition};
use crate::timing;
use crate::types::*;

/// Video frames of a session, in acquisition order.
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// Shape: [num_samples, height, width]
    Gray(Array3<u8>),
    /// BGR frames. Shape: [num_samples, height, width, 3]
    Color(Array4<u8>),
}

impl FramePayload {
    pub fn len(&self) -> usize {
        match self {
            FramePayload::Gray(frames) => frames.len_of(Axis(0)),
            FramePayload::Color(frames) => frames.len_of(Axis(0)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything known about one session before processing.
#[derive(Debug, Clone)]
pub struct SessionInputs {
    pub session_id: String,
    /// One or more sources of the per-sample channel assignment
    pub channel_sources: Vec<ChannelSource>,
    pub light_sources: LightSourceTable,
    /// Frame rate of the interleaved stream as recorded with the payload
    pub combined_rate_hz: Option<f64>,
    pub frames: Option<FramePayload>,
    /// Raw ROI traces. Shape: [num_rois, num_samples]
    pub traces: Option<Array2<f64>>,
    /// Haemodynamically corrected dF/F. Shape: [num_rois, num_samples]
    pub dff: Option<Array2<f64>>,
    /// Mean image per channel, in first-appearance order. Shape: [num_channels, height, width]
    pub frame_average: Option<Array3<f64>>,
    /// Spatial components, passed through unchanged. Shape: [height, width, num_rois]
    pub spatial_components: Option<Array3<f64>>,
    pub landmarks: Option<LandmarkCorrespondence>,
}

impl SessionInputs {
    pub fn new(
        session_id: impl Into<String>,
        channel_sources: Vec<ChannelSource>,
        light_sources: LightSourceTable,
    ) -> Self {
        SessionInputs {
            session_id: session_id.into(),
            channel_sources,
            light_sources,
            combined_rate_hz: None,
            frames: None,
            traces: None,
            dff: None,
            frame_average: None,
            spatial_components: None,
            landmarks: None,
        }
    }

    /// Number of samples in the payload: frames first, then trace columns.
    fn payload_len(&self) -> Option<usize> {
        self.frames
            .as_ref()
            .map(FramePayload::len)
            .or_else(|| self.traces.as_ref().map(|t| t.ncols()))
            .or_else(|| self.dff.as_ref().map(|t| t.ncols()))
    }
}

/// Landmark-driven outputs of a session.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub transform: ResolvedTransform,
    /// Default channel's mean image resampled into reference space
    pub reference_image: Option<Array2<f64>>,
    pub anatomical_rows: Vec<AnatomicalRow>,
    pub landmark_pairs: Vec<LandmarkPair>,
}

/// Output of one session, consumed by a [`SessionSink`].
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub session_id: String,
    /// One bundle per channel, in first-appearance order
    pub bundles: Vec<ChannelBundle>,
    /// Channel used for single-channel outputs
    pub default_channel: ChannelId,
    pub alignment: Option<Alignment>,
    pub spatial_components: Option<Array3<f64>>,
    pub warnings: Vec<Warning>,
}

impl SessionResult {
    /// Total number of samples across all bundles.
    pub fn num_samples(&self) -> usize {
        self.bundles.iter().map(ChannelBundle::len).sum()
    }

    pub fn bundle(&self, channel: ChannelId) -> Option<&ChannelBundle> {
        self.bundles.iter().find(|b| b.channel.id == channel)
    }

    /// Pushes every output of the session into `sink`.
    pub fn emit<S: SessionSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        for bundle in &self.bundles {
            sink.write_bundle(&self.session_id, bundle)?;
        }
        if let Some(spatial) = &self.spatial_components {
            sink.write_spatial_components(&self.session_id, spatial.view())?;
        }
        if let Some(alignment) = &self.alignment {
            if let Some(image) = &alignment.reference_image {
                sink.write_image(&self.session_id, "reference_image", image.view())?;
            }
            sink.write_anatomical_table(
                &self.session_id,
                &alignment.anatomical_rows,
                &alignment.landmark_pairs,
            )?;
        }
        Ok(())
    }
}

/// Destination for session outputs. Container encoding is up to the
/// implementor.
pub trait SessionSink {
    fn write_bundle(&mut self, session_id: &str, bundle: &ChannelBundle) -> Result<()>;

    fn write_image(&mut self, session_id: &str, name: &str, image: ArrayView2<f64>) -> Result<()>;

    fn write_anatomical_table(
        &mut self,
        session_id: &str,
        rows: &[AnatomicalRow],
        pairs: &[LandmarkPair],
    ) -> Result<()>;

    fn write_spatial_components(
        &mut self,
        _session_id: &str,
        _components: ArrayView3<f64>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Processes one session. The session either succeeds as a whole or
/// returns the first error encountered.
pub fn process_session(mut inputs: SessionInputs, config: &SessionConfig) -> Result<SessionResult> {
    let tic = Instant::now();
    let landmarks = inputs.landmarks.take();
    let spatial_components = inputs.spatial_components.take();

    info!("Processing session '{}'", inputs.session_id);

    let (demuxed, alignment) = rayon::join(
        || demultiplex(&inputs, config),
        || landmarks.as_ref().map(align_landmarks).transpose(),
    );
    let demuxed = demuxed?;
    let mut alignment = alignment?;

    if let Some(alignment) = alignment.as_mut() {
        let transform = alignment.transform.transform;
        alignment.reference_image = demuxed
            .bundles
            .iter()
            .find(|b| b.channel.id == demuxed.default_channel)
            .and_then(reference_source)
            .map(|image| {
                let shape = config.reference_shape.unwrap_or(image.dim());
                transform.warp_image(image.view(), shape)
            });
    }

    info!(
        "Session '{}' done! Elapsed time: {:.1} seconds",
        inputs.session_id,
        tic.elapsed().as_secs_f64()
    );

    Ok(SessionResult {
        session_id: inputs.session_id,
        bundles: demuxed.bundles,
        default_channel: demuxed.default_channel,
        alignment,
        spatial_components,
        warnings: demuxed.warnings,
    })
}

/// Processes independent sessions in parallel. Results keep input order.
pub fn process_sessions(
    sessions: Vec<SessionInputs>,
    config: &SessionConfig,
) -> Vec<Result<SessionResult>> {
    sessions
        .into_par_iter()
        .map(|inputs| {
            let id = inputs.session_id.clone();
            process_session(inputs, config).map_err(|e| {
                warn!("Session '{}' aborted: {}", id, e);
                e
            })
        })
        .collect()
}

struct Demuxed {
    bundles: Vec<ChannelBundle>,
    default_channel: ChannelId,
    warnings: Vec<Warning>,
}

fn demultiplex(inputs: &SessionInputs, config: &SessionConfig) -> Result<Demuxed> {
    let resolution = channels::resolve(&inputs.channel_sources, inputs.payload_len())?;
    let assignment = resolution.assignment;
    let mut warnings = resolution.warnings;
    let n = assignment.len();

    let mut parallel = vec![("channel_ids", n)];
    if let Some(frames) = &inputs.frames {
        parallel.push(("frames", frames.len()));
    }
    if let Some(traces) = &inputs.traces {
        parallel.push(("traces", traces.ncols()));
    }
    if let Some(dff) = &inputs.dff {
        parallel.push(("dff", dff.ncols()));
    }
    partition::ensure_parallel(&parallel)?;

    let partitions = partition::partition(&assignment)?;

    let combined_rate = config
        .combined_rate_hz
        .or(inputs.combined_rate_hz)
        .or_else(|| assignment.timestamps().and_then(timing::estimate_combined_rate));
    let timestamps = match (assignment.timestamps(), combined_rate) {
        (Some(ts), _) => ts.to_owned(),
        (None, Some(rate)) if rate > 0.0 => Array1::from_iter((0..n).map(|i| i as f64 / rate)),
        _ => return Err(WidefieldError::MissingTiming),
    };
    if combined_rate.is_none() && config.sampling_rate_override_hz.is_none() {
        let warning = Warning::UnknownSamplingRate;
        warn!("{}", warning);
        warnings.push(warning);
    }
    let sampling_rate = timing::derive_sampling_rate(
        combined_rate.unwrap_or(0.0),
        partitions.len(),
        config.sampling_rate_override_hz,
    )?;
    debug!(
        "{} channels at {:.3} Hz each (combined {:?} Hz)",
        partitions.len(),
        sampling_rate,
        combined_rate
    );

    let gray;
    let frames = match &inputs.frames {
        Some(FramePayload::Gray(frames)) => Some(frames.view()),
        Some(FramePayload::Color(frames)) => {
            gray = partition::grayscale_video(frames.view())?;
            Some(gray.view())
        }
        None => None,
    };

    let dff_channel = match &inputs.dff {
        Some(_) => Some(
            inputs
                .light_sources
                .channel_for_wavelength(config.dff_wavelength_nm)?,
        ),
        None => None,
    };
    if let Some(channel) = dff_channel {
        if assignment.position(channel).is_none() {
            return Err(WidefieldError::UnknownChannel(channel));
        }
    }

    let context = BundleContext {
        inputs,
        timestamps: &timestamps,
        frames,
        sampling_rate,
        dff_channel,
    };
    let built = partitions
        .par_iter()
        .enumerate()
        .map(|(position, part)| context.build(position, part))
        .collect::<Result<Vec<_>>>()?;

    let mut bundles = Vec::with_capacity(built.len());
    for (bundle, bundle_warnings) in built {
        warnings.extend(bundle_warnings);
        bundles.push(bundle);
    }

    let requested = config
        .excitation_wavelength_nm
        .map(|nm| inputs.light_sources.channel_for_wavelength(nm))
        .transpose()?;
    let (default_channel, default_warning) =
        channels::select_default_channel(&assignment, requested)?;
    warnings.extend(default_warning);

    Ok(Demuxed {
        bundles,
        default_channel,
        warnings,
    })
}

struct BundleContext<'a> {
    inputs: &'a SessionInputs,
    timestamps: &'a Array1<f64>,
    frames: Option<ArrayView3<'a, u8>>,
    sampling_rate: f64,
    dff_channel: Option<ChannelId>,
}

impl BundleContext<'_> {
    fn build(&self, position: usize, part: &Partition) -> Result<(ChannelBundle, Vec<Warning>)> {
        let mut warnings = Vec::new();
        let light_sources = &self.inputs.light_sources;

        if light_sources.get(part.channel_id).is_none() {
            let warning = Warning::UnlabeledChannel(part.channel_id);
            warn!("{}", warning);
            warnings.push(warning);
        }
        let channel = light_sources.describe(part.channel_id, self.sampling_rate);

        let timestamps = partition::take_timestamps(self.timestamps.view(), part);
        warnings.extend(timing::check_timestamps(part.channel_id, timestamps.view()));

        let mean_image = self
            .inputs
            .frame_average
            .as_ref()
            .map(|stack| partition::mean_image(stack.view(), position))
            .transpose()?;

        let dff = match (&self.inputs.dff, self.dff_channel) {
            (Some(dff), Some(channel)) if channel == part.channel_id => {
                Some(partition::take_traces(dff.view(), part))
            }
            _ => None,
        };

        debug!(
            "Channel {} ({}): {} samples",
            part.channel_id,
            channel.label(),
            part.len()
        );

        let bundle = ChannelBundle {
            channel,
            global_indices: part.indices.clone(),
            timestamps,
            frames: self.frames.map(|f| partition::take_frames(f, part)),
            traces: self
                .inputs
                .traces
                .as_ref()
                .map(|t| partition::take_traces(t.view(), part)),
            dff,
            mean_image,
        };
        Ok((bundle, warnings))
    }
}

fn align_landmarks(correspondence: &LandmarkCorrespondence) -> Result<Alignment> {
    let transform = landmarks::resolve_transform(correspondence)?;
    let anatomical_rows = landmarks::anatomical_rows(
        correspondence.source(),
        &transform.transform,
        correspondence.physical_frame(),
    );
    Ok(Alignment {
        transform,
        reference_image: None,
        anatomical_rows,
        landmark_pairs: correspondence.pairs(),
    })
}

fn reference_source(bundle: &ChannelBundle) -> Option<Array2<f64>> {
    bundle.mean_image.clone().or_else(|| {
        bundle
            .frames
            .as_ref()
            .filter(|f| !f.is_empty())
            .map(|f| partition::frame_mean(f.view()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{parse_camera_log, ArraySource};
    use ndarray::Array;

    fn light_sources() -> LightSourceTable {
        LightSourceTable::new(vec![
            LightSource {
                channel_id: ChannelId(1),
                color: "Blue".to_string(),
                wavelength_nm: 470,
            },
            LightSource {
                channel_id: ChannelId(2),
                color: "Violet".to_string(),
                wavelength_nm: 405,
            },
        ])
    }

    fn alternating_inputs(n: usize) -> SessionInputs {
        let ids = Array1::from_iter((0..n).map(|i| if i % 2 == 0 { 2 } else { 1 }));
        let ts = Array1::from_iter((0..n).map(|i| i as f64 / 60.0));
        let mut inputs = SessionInputs::new(
            "test",
            vec![ChannelSource::Array(ArraySource {
                channel_ids: ids,
                timestamps: Some(ts),
            })],
            light_sources(),
        );
        inputs.traces = Some(Array::from_shape_fn((3, n), |(roi, t)| (roi * 1000 + t) as f64));
        inputs
    }

    #[test]
    fn test_dff_only_on_functional_channel() {
        let mut inputs = alternating_inputs(20);
        inputs.dff = Some(Array2::ones((3, 20)));
        let result = process_session(inputs, &SessionConfig::default()).unwrap();

        let functional = result.bundle(ChannelId(1)).unwrap();
        let isosbestic = result.bundle(ChannelId(2)).unwrap();
        assert_eq!(functional.dff.as_ref().unwrap().dim(), (10, 3));
        assert!(isosbestic.dff.is_none());
        assert_eq!(isosbestic.traces.as_ref().unwrap()[[1, 2]], 2002.0);
    }

    #[test]
    fn test_rate_estimated_from_timestamps() {
        let result = process_session(alternating_inputs(20), &SessionConfig::default()).unwrap();
        for bundle in &result.bundles {
            assert!((bundle.channel.sampling_rate_hz - 30.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_default_channel_from_excitation_wavelength() {
        let config = SessionConfig {
            excitation_wavelength_nm: Some(470),
            ..SessionConfig::default()
        };
        let result = process_session(alternating_inputs(10), &config).unwrap();
        assert_eq!(result.default_channel, ChannelId(1));
        assert!(!result
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::AmbiguousDefaultChannel { .. })));
    }

    #[test]
    fn test_ambiguous_default_is_reported() {
        let result = process_session(alternating_inputs(10), &SessionConfig::default()).unwrap();
        assert_eq!(result.default_channel, ChannelId(2));
        assert!(result
            .warnings
            .contains(&Warning::AmbiguousDefaultChannel {
                chosen: ChannelId(2),
                available: vec![ChannelId(2), ChannelId(1)],
            }));
    }

    #[test]
    fn test_trace_length_mismatch_aborts() {
        let mut inputs = alternating_inputs(10);
        inputs.dff = Some(Array2::ones((3, 9)));
        assert!(matches!(
            process_session(inputs, &SessionConfig::default()),
            Err(WidefieldError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_unlabeled_channel_warns() {
        let mut inputs = alternating_inputs(10);
        inputs.light_sources = LightSourceTable::default();
        let result = process_session(inputs, &SessionConfig::default()).unwrap();
        assert!(result
            .warnings
            .contains(&Warning::UnlabeledChannel(ChannelId(1))));
        assert_eq!(result.bundles[0].channel.label(), "channel_2");
    }

    #[test]
    fn test_color_frames_from_camera_log() {
        let log: String = (0..6)
            .map(|i| format!("#LED:{},{},{:.4}\n", i % 2 + 1, i + 1, i as f64 * 0.02))
            .collect();
        let mut inputs = SessionInputs::new(
            "raw",
            vec![ChannelSource::Log(parse_camera_log(&log))],
            light_sources(),
        );
        inputs.frames = Some(FramePayload::Color(Array4::from_elem((6, 4, 4, 3), 200)));
        inputs.combined_rate_hz = Some(50.0);

        let result = process_session(inputs, &SessionConfig::default()).unwrap();
        assert_eq!(result.num_samples(), 6);
        let frames = result.bundles[0].frames.as_ref().unwrap();
        assert_eq!(frames.dim(), (3, 4, 4));
        assert_eq!(frames[[0, 0, 0]], 200);
        assert_eq!(result.bundles[0].channel.sampling_rate_hz, 25.0);
    }

    #[test]
    fn test_missing_timing() {
        let mut inputs = alternating_inputs(4);
        inputs.channel_sources = vec![ChannelSource::Array(ArraySource {
            channel_ids: Array1::from(vec![1, 2, 1, 2]),
            timestamps: None,
        })];
        assert!(matches!(
            process_session(inputs, &SessionConfig::default()),
            Err(WidefieldError::MissingTiming)
        ));
    }

    #[test]
    fn test_constant_timestamps_warn_about_rate() {
        let mut inputs = alternating_inputs(4);
        inputs.channel_sources = vec![ChannelSource::Array(ArraySource {
            channel_ids: Array1::from(vec![1, 2, 1, 2]),
            timestamps: Some(Array1::from_elem(4, 0.5)),
        })];
        let result = process_session(inputs, &SessionConfig::default()).unwrap();
        assert!(result.warnings.contains(&Warning::UnknownSamplingRate));
        assert_eq!(result.bundles[0].channel.sampling_rate_hz, 0.0);

        let mut inputs = alternating_inputs(4);
        inputs.channel_sources = vec![ChannelSource::Array(ArraySource {
            channel_ids: Array1::from(vec![1, 2, 1, 2]),
            timestamps: Some(Array1::from_elem(4, 0.5)),
        })];
        let config = SessionConfig {
            sampling_rate_override_hz: Some(20.0),
            ..SessionConfig::default()
        };
        let result = process_session(inputs, &config).unwrap();
        assert!(!result.warnings.contains(&Warning::UnknownSamplingRate));
        assert_eq!(result.bundles[0].channel.sampling_rate_hz, 20.0);
    }

    #[test]
    fn test_reference_image_is_warped() {
        let mut inputs = alternating_inputs(4);
        inputs.frame_average = Some(Array3::from_shape_fn((2, 4, 4), |(c, r, col)| {
            (c * 100 + r * 4 + col) as f64
        }));
        let source = LandmarkSet::from_points(vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)]);
        let target = LandmarkSet::from_points(vec![Point2::new(1.0, 0.0), Point2::new(2.0, 0.0)]);
        inputs.landmarks = Some(LandmarkCorrespondence::new(source, target, None).unwrap());

        let result = process_session(inputs, &SessionConfig::default()).unwrap();
        let alignment = result.alignment.unwrap();
        let image = alignment.reference_image.unwrap();
        // Default channel is at position 0; image shifted one column right.
        assert_eq!(image[[1, 1]], 4.0);
        assert_eq!(image[[1, 0]], 0.0);
        assert_eq!(alignment.anatomical_rows.len(), 2);
    }

    #[test]
    fn test_process_sessions_keeps_order() {
        let mut bad = alternating_inputs(6);
        bad.session_id = "bad".to_string();
        bad.channel_sources.clear();
        let results = process_sessions(
            vec![alternating_inputs(6), bad, alternating_inputs(8)],
            &SessionConfig::default(),
        );
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().num_samples(), 6);
        assert!(matches!(
            results[1],
            Err(WidefieldError::MissingChannelSource)
        ));
        assert_eq!(results[2].as_ref().unwrap().num_samples(), 8);
    }
}
