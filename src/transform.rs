//! 2-D similarity transforms (rotation, isotropic scale, translation).
//!
//! A transform maps a point `p` to `s·R·p + t`. Transforms are immutable;
//! applying one to points or images always returns new values.

use log::debug;
use ndarray::{Array2, ArrayView2};

use crate::types::*;

/// Allowed deviation of `RᵗR` from identity and of `det(R)` from 1.
const ORTHONORMAL_TOLERANCE: f64 = 1e-6;

/// Allowed deviation of a homogeneous matrix's last row from `[0, 0, 1]`.
const HOMOGENEOUS_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    rotation: [[f64; 2]; 2],
    translation: [f64; 2],
    scale: f64,
}

/// Outcome of fitting or evaluating a transform against correspondences.
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    pub transform: SimilarityTransform,
    /// Distance between each mapped source point and its target
    pub residuals: Vec<f64>,
    /// Sum of squared residual distances
    pub sum_squared: f64,
    /// Root-mean-square residual distance
    pub rms: f64,
}

impl SimilarityTransform {
    pub fn identity() -> Self {
        SimilarityTransform {
            rotation: [[1.0, 0.0], [0.0, 1.0]],
            translation: [0.0, 0.0],
            scale: 1.0,
        }
    }

    /// Builds a transform from a rotation angle (radians, counter-clockwise).
    pub fn from_angle(angle: f64, translation: [f64; 2], scale: f64) -> Result<Self> {
        let (sin, cos) = angle.sin_cos();
        Self::from_parts([[cos, -sin], [sin, cos]], translation, scale)
    }

    /// Builds a transform from fully specified parts, validating that the
    /// rotation is orthonormal with determinant +1 and the scale is positive.
    pub fn from_parts(rotation: [[f64; 2]; 2], translation: [f64; 2], scale: f64) -> Result<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(WidefieldError::InvalidScale(scale));
        }
        let deviation = rotation_deviation(&rotation);
        if !(deviation <= ORTHONORMAL_TOLERANCE) {
            return Err(WidefieldError::NonOrthonormalRotation { deviation });
        }
        Ok(SimilarityTransform {
            rotation,
            translation,
            scale,
        })
    }

    /// Decomposes a 3×3 homogeneous similarity matrix `[[sR, t], [0, 0, 1]]`.
    pub fn from_homogeneous(matrix: [[f64; 3]; 3]) -> Result<Self> {
        let last = matrix[2];
        if (last[0].abs() > HOMOGENEOUS_TOLERANCE)
            || (last[1].abs() > HOMOGENEOUS_TOLERANCE)
            || ((last[2] - 1.0).abs() > HOMOGENEOUS_TOLERANCE)
        {
            return Err(WidefieldError::InvalidHomogeneousRow(last));
        }

        let det = matrix[0][0] * matrix[1][1] - matrix[0][1] * matrix[1][0];
        if !(det > 0.0) {
            return Err(WidefieldError::NonOrthonormalRotation {
                deviation: (det - 1.0).abs(),
            });
        }
        let scale = det.sqrt();
        let rotation = [
            [matrix[0][0] / scale, matrix[0][1] / scale],
            [matrix[1][0] / scale, matrix[1][1] / scale],
        ];
        Self::from_parts(rotation, [matrix[0][2], matrix[1][2]], scale)
    }

    /// The transform as a 3×3 homogeneous matrix.
    pub fn to_homogeneous(&self) -> [[f64; 3]; 3] {
        let r = &self.rotation;
        let s = self.scale;
        [
            [s * r[0][0], s * r[0][1], self.translation[0]],
            [s * r[1][0], s * r[1][1], self.translation[1]],
            [0.0, 0.0, 1.0],
        ]
    }

    pub fn rotation(&self) -> [[f64; 2]; 2] {
        self.rotation
    }

    /// Rotation angle in radians.
    pub fn rotation_angle(&self) -> f64 {
        self.rotation[1][0].atan2(self.rotation[0][0])
    }

    pub fn translation(&self) -> [f64; 2] {
        self.translation
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Maps one point.
    pub fn apply(&self, p: Point2) -> Point2 {
        let r = &self.rotation;
        Point2 {
            x: self.scale * (r[0][0] * p.x + r[0][1] * p.y) + self.translation[0],
            y: self.scale * (r[1][0] * p.x + r[1][1] * p.y) + self.translation[1],
        }
    }

    /// Maps every point of a landmark set, keeping names and colors.
    pub fn apply_set(&self, set: &LandmarkSet) -> LandmarkSet {
        LandmarkSet {
            points: set.points.iter().map(|p| self.apply(*p)).collect(),
            names: set.names.clone(),
            colors: set.colors.clone(),
        }
    }

    /// The transform mapping `s·R·p + t` back to `p`.
    pub fn inverse(&self) -> Self {
        let r = &self.rotation;
        let rt = [[r[0][0], r[1][0]], [r[0][1], r[1][1]]];
        let inv_scale = 1.0 / self.scale;
        let t = self.translation;
        SimilarityTransform {
            rotation: rt,
            translation: [
                -inv_scale * (rt[0][0] * t[0] + rt[0][1] * t[1]),
                -inv_scale * (rt[1][0] * t[0] + rt[1][1] * t[1]),
            ],
            scale: inv_scale,
        }
    }

    /// Least-squares similarity transform mapping `source` onto `target`.
    ///
    /// Closed-form orthogonal Procrustes with scale. Two correspondences give
    /// an exact fit; more give a least-squares fit whose residuals are
    /// reported.
    pub fn fit(source: &[Point2], target: &[Point2]) -> Result<FitReport> {
        check_correspondences(source, target)?;

        let n = source.len() as f64;
        let mean_source = centroid(source);
        let mean_target = centroid(target);

        let mut dot = 0.0;
        let mut cross = 0.0;
        let mut variance = 0.0;
        for (s, t) in source.iter().zip(target) {
            let (ax, ay) = (s.x - mean_source.x, s.y - mean_source.y);
            let (bx, by) = (t.x - mean_target.x, t.y - mean_target.y);
            dot += ax * bx + ay * by;
            cross += ax * by - ay * bx;
            variance += ax * ax + ay * ay;
        }

        if variance <= f64::EPSILON * n {
            return Err(WidefieldError::DegenerateLandmarks);
        }

        let angle = cross.atan2(dot);
        let scale = dot.hypot(cross) / variance;
        let rotated = Self::from_angle(angle, [0.0, 0.0], scale)?.apply(mean_source);
        let translation = [mean_target.x - rotated.x, mean_target.y - rotated.y];
        let transform = Self::from_angle(angle, translation, scale)?;

        let report = transform.evaluate(source, target)?;
        debug!(
            "Fitted similarity transform from {} landmarks: angle {:.4} rad, scale {:.4}, rms residual {:.4}",
            source.len(),
            angle,
            scale,
            report.rms
        );
        Ok(report)
    }

    /// Residuals of this transform against index-aligned correspondences.
    pub fn evaluate(&self, source: &[Point2], target: &[Point2]) -> Result<FitReport> {
        check_correspondences(source, target)?;
        let residuals: Vec<f64> = source
            .iter()
            .zip(target)
            .map(|(s, t)| self.apply(*s).distance(t))
            .collect();
        let sum_squared: f64 = residuals.iter().map(|r| r * r).sum();
        let rms = (sum_squared / residuals.len() as f64).sqrt();
        Ok(FitReport {
            transform: *self,
            residuals,
            sum_squared,
            rms,
        })
    }

    /// Resamples `image` into the target grid with nearest-neighbour
    /// interpolation. Pixel `(row, col)` is the point `(x = col, y = row)`;
    /// target pixels whose source falls outside the image are filled with
    /// `T::default()`.
    pub fn warp_image<T: Copy + Default>(
        &self,
        image: ArrayView2<T>,
        output_shape: (usize, usize),
    ) -> Array2<T> {
        let (height, width) = image.dim();
        let inverse = self.inverse();
        Array2::from_shape_fn(output_shape, |(row, col)| {
            let src = inverse.apply(Point2::new(col as f64, row as f64));
            let (x, y) = (src.x.round(), src.y.round());
            if x >= 0.0 && y >= 0.0 && (x as usize) < width && (y as usize) < height {
                image[[y as usize, x as usize]]
            } else {
                T::default()
            }
        })
    }
}

impl Default for SimilarityTransform {
    fn default() -> Self {
        Self::identity()
    }
}

fn check_correspondences(source: &[Point2], target: &[Point2]) -> Result<()> {
    if source.len() != target.len() {
        return Err(WidefieldError::LandmarkCountMismatch {
            source_len: source.len(),
            target_len: target.len(),
        });
    }
    if source.len() < 2 {
        return Err(WidefieldError::InsufficientLandmarks { got: source.len() });
    }
    Ok(())
}

fn centroid(points: &[Point2]) -> Point2 {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point2::new(sx / n, sy / n)
}

// Largest deviation of RᵗR from I, or of det(R) from 1.
fn rotation_deviation(r: &[[f64; 2]; 2]) -> f64 {
    let rtr = [
        [
            r[0][0] * r[0][0] + r[1][0] * r[1][0],
            r[0][0] * r[0][1] + r[1][0] * r[1][1],
        ],
        [
            r[0][1] * r[0][0] + r[1][1] * r[1][0],
            r[0][1] * r[0][1] + r[1][1] * r[1][1],
        ],
    ];
    let det = r[0][0] * r[1][1] - r[0][1] * r[1][0];
    [
        (rtr[0][0] - 1.0).abs(),
        rtr[0][1].abs(),
        rtr[1][0].abs(),
        (rtr[1][1] - 1.0).abs(),
        (det - 1.0).abs(),
    ]
    .into_iter()
    .fold(0.0, f64::max)
}
