//! Splitting session arrays into per-channel sub-arrays.
//!
//! Every array indexed by the global sample index is cut with the same
//! partition, so a channel's timestamps, frames and traces stay aligned.
//! Trace matrices arrive as `(roi, frame)` and leave as `(frame, roi)`.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayView4, Axis};

use crate::channels::ChannelAssignment;
use crate::types::*;

// ITU-R BT.601 luma weights in 14-bit fixed point (sum = 1 << 14).
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;
const LUMA_ROUND: u32 = 1 << (LUMA_SHIFT - 1);

/// Global indices of one channel, ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub channel_id: ChannelId,
    pub indices: Vec<usize>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Splits the assignment into one partition per channel, in first-appearance
/// order, and checks that the partitions cover every sample exactly once.
pub fn partition(assignment: &ChannelAssignment) -> Result<Vec<Partition>> {
    let partitions: Vec<Partition> = assignment
        .channels()
        .iter()
        .map(|&channel_id| Partition {
            channel_id,
            indices: assignment.indices_of(channel_id),
        })
        .collect();

    let covered: usize = partitions.iter().map(Partition::len).sum();
    if covered != assignment.len() {
        return Err(WidefieldError::IncompletePartition {
            covered,
            expected: assignment.len(),
        });
    }

    Ok(partitions)
}

/// Checks that all named arrays have the same length along the sample axis.
pub fn ensure_parallel(arrays: &[(&str, usize)]) -> Result<()> {
    if let Some((first_name, first_len)) = arrays.first() {
        for (name, len) in &arrays[1..] {
            if len != first_len {
                return Err(WidefieldError::LengthMismatch {
                    left: first_name.to_string(),
                    left_len: *first_len,
                    right: name.to_string(),
                    right_len: *len,
                });
            }
        }
    }
    Ok(())
}

/// Timestamps of the samples in `partition`.
pub fn take_timestamps(timestamps: ArrayView1<f64>, partition: &Partition) -> Array1<f64> {
    timestamps.select(Axis(0), &partition.indices)
}

/// Traces of the samples in `partition`, converted from `(roi, frame)` to
/// `(frame, roi)`.
pub fn take_traces(traces: ArrayView2<f64>, partition: &Partition) -> Array2<f64> {
    traces
        .select(Axis(1), &partition.indices)
        .reversed_axes()
        .as_standard_layout()
        .into_owned()
}

/// Frames `(n, height, width)` of the samples in `partition`.
pub fn take_frames(frames: ArrayView3<u8>, partition: &Partition) -> Array3<u8> {
    frames.select(Axis(0), &partition.indices)
}

/// Luma of one BGR pixel.
pub fn luminance(blue: u8, green: u8, red: u8) -> u8 {
    let y = LUMA_B * blue as u32 + LUMA_G * green as u32 + LUMA_R * red as u32 + LUMA_ROUND;
    (y >> LUMA_SHIFT) as u8
}

/// Reduces one `(height, width, 3)` BGR frame to grayscale.
pub fn to_grayscale(frame: ArrayView3<u8>) -> Result<Array2<u8>> {
    let (height, width, depth) = frame.dim();
    if depth != 3 {
        return Err(WidefieldError::InvalidShape {
            name: "frame".to_string(),
            expected: "(height, width, 3)".to_string(),
            actual: frame.shape().to_vec(),
        });
    }
    Ok(Array2::from_shape_fn((height, width), |(r, c)| {
        luminance(frame[[r, c, 0]], frame[[r, c, 1]], frame[[r, c, 2]])
    }))
}

/// Reduces a `(n, height, width, 3)` BGR video to `(n, height, width)` grayscale.
pub fn grayscale_video(frames: ArrayView4<u8>) -> Result<Array3<u8>> {
    let (n, height, width, _) = frames.dim();
    let mut gray = Array3::<u8>::zeros((n, height, width));
    for (i, frame) in frames.outer_iter().enumerate() {
        gray.slice_mut(s![i, .., ..]).assign(&to_grayscale(frame)?);
    }
    Ok(gray)
}

/// Mean image of the channel at `position` in a `(channel, height, width)`
/// frame-average stack.
pub fn mean_image(frame_average: ArrayView3<f64>, position: usize) -> Result<Array2<f64>> {
    if position >= frame_average.len_of(Axis(0)) {
        return Err(WidefieldError::InvalidShape {
            name: "frame_average".to_string(),
            expected: format!("at least {} images", position + 1),
            actual: frame_average.shape().to_vec(),
        });
    }
    Ok(frame_average.index_axis(Axis(0), position).to_owned())
}

/// Pixel-wise mean over the frame axis of a grayscale stack.
pub fn frame_mean(frames: ArrayView3<u8>) -> Array2<f64> {
    let (n, height, width) = frames.dim();
    if n == 0 {
        return Array2::zeros((height, width));
    }
    frames.mapv(f64::from).sum_axis(Axis(0)) / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array4};

    fn alternating_assignment(n: usize) -> ChannelAssignment {
        let ids = (0..n).map(|i| ChannelId((i % 2) as u32)).collect();
        ChannelAssignment::new(ids, None).unwrap()
    }

    #[test]
    fn test_partition_is_exhaustive() {
        let assignment = alternating_assignment(101);
        let parts = partition(&assignment).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 51);
        assert_eq!(parts[1].len(), 50);
        assert_eq!(parts.iter().map(Partition::len).sum::<usize>(), 101);
        assert!(parts[1].indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_trace_axis_order() {
        // 5 ROIs x 100 frames, channel 7 owns 40 of the frames.
        let traces = Array::from_shape_fn((5, 100), |(roi, frame)| (roi * 1000 + frame) as f64);
        let indices: Vec<usize> = (0..100).filter(|i| i % 5 < 2).collect();
        assert_eq!(indices.len(), 40);
        let part = Partition {
            channel_id: ChannelId(7),
            indices,
        };

        let out = take_traces(traces.view(), &part);
        assert_eq!(out.dim(), (40, 5));
        assert!(out.is_standard_layout());
        // Frame 6 is the 4th selected frame.
        assert_eq!(out[[3, 3]], 3006.0);
    }

    #[test]
    fn test_take_timestamps_and_frames() {
        let part = Partition {
            channel_id: ChannelId(1),
            indices: vec![1, 3],
        };
        let ts = Array1::from(vec![0.0, 0.1, 0.2, 0.3]);
        assert_eq!(take_timestamps(ts.view(), &part), Array1::from(vec![0.1, 0.3]));

        let frames = Array3::from_shape_fn((4, 2, 2), |(i, _, _)| i as u8);
        let taken = take_frames(frames.view(), &part);
        assert_eq!(taken.dim(), (2, 2, 2));
        assert_eq!(taken[[1, 0, 0]], 3);
    }

    #[test]
    fn test_parallel_mismatch_names_arrays() {
        let err = ensure_parallel(&[("channel_ids", 100), ("timestamps", 100), ("traces", 99)])
            .unwrap_err();
        match err {
            WidefieldError::LengthMismatch {
                left,
                left_len,
                right,
                right_len,
            } => {
                assert_eq!((left.as_str(), left_len), ("channel_ids", 100));
                assert_eq!((right.as_str(), right_len), ("traces", 99));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(ensure_parallel(&[]).is_ok());
    }

    #[test]
    fn test_luminance_rule() {
        assert_eq!(luminance(0, 0, 0), 0);
        assert_eq!(luminance(255, 255, 255), 255);
        // Pure red, green, blue.
        assert_eq!(luminance(0, 0, 255), 76);
        assert_eq!(luminance(0, 255, 0), 150);
        assert_eq!(luminance(255, 0, 0), 29);
    }

    #[test]
    fn test_grayscale_is_idempotent() {
        let video = Array4::from_shape_fn((3, 4, 5, 3), |(i, r, c, k)| {
            ((i * 31 + r * 17 + c * 7 + k * 91) % 256) as u8
        });
        let gray = grayscale_video(video.view()).unwrap();
        assert_eq!(gray.dim(), (3, 4, 5));

        // Converting the grayscale frames again (as BGR triplets) is a no-op.
        let regray = Array4::from_shape_fn((3, 4, 5, 3), |(i, r, c, _)| gray[[i, r, c]]);
        assert_eq!(grayscale_video(regray.view()).unwrap(), gray);
    }

    #[test]
    fn test_grayscale_rejects_wrong_depth() {
        let frame = Array3::<u8>::zeros((2, 2, 4));
        assert!(matches!(
            to_grayscale(frame.view()),
            Err(WidefieldError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_mean_images() {
        let stack = Array3::from_shape_fn((2, 3, 3), |(c, _, _)| c as f64 + 1.0);
        assert_eq!(mean_image(stack.view(), 1).unwrap()[[0, 0]], 2.0);
        assert!(mean_image(stack.view(), 2).is_err());

        let frames = Array3::from_shape_fn((4, 2, 2), |(i, _, _)| (i * 2) as u8);
        assert_eq!(frame_mean(frames.view())[[1, 1]], 3.0);
    }
}
