//! Landmark correspondences between a session image and the atlas, and the
//! tables derived from them.

use log::{debug, info};
use serde::Deserialize;
use std::io::Read;

use crate::transform::{FitReport, SimilarityTransform};
use crate::types::*;

#[derive(Debug, Deserialize)]
struct LandmarkColumns {
    x: Vec<f64>,
    y: Vec<f64>,
    #[serde(default)]
    name: Option<Vec<Option<String>>>,
    #[serde(default)]
    color: Option<Vec<Option<String>>>,
}

impl LandmarkColumns {
    fn into_set(self, table: &str) -> Result<LandmarkSet> {
        let n = self.x.len();
        let mismatch = |column: &str, len: usize| WidefieldError::LengthMismatch {
            left: format!("{}.x", table),
            left_len: n,
            right: format!("{}.{}", table, column),
            right_len: len,
        };

        if self.y.len() != n {
            return Err(mismatch("y", self.y.len()));
        }
        let names = match self.name {
            Some(names) if names.len() != n => return Err(mismatch("name", names.len())),
            Some(names) => names,
            None => vec![None; n],
        };
        let colors = match self.color {
            Some(colors) if colors.len() != n => return Err(mismatch("color", colors.len())),
            Some(colors) => colors,
            None => vec![None; n],
        };

        Ok(LandmarkSet {
            points: self
                .x
                .into_iter()
                .zip(self.y)
                .map(|(x, y)| Point2::new(x, y))
                .collect(),
            names,
            colors,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LandmarksFile {
    landmarks_im: LandmarkColumns,
    landmarks_match: LandmarkColumns,
    #[serde(default)]
    transform: Option<[[f64; 3]; 3]>,
    #[serde(default)]
    bregma_offset: Option<[f64; 2]>,
    #[serde(default)]
    resolution: Option<f64>,
}

/// Placement of the reference image in physical space: millimetres relative
/// to bregma.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalFrame {
    /// Bregma position in reference pixels
    pub origin: Point2,
    /// Millimetres per reference pixel
    pub mm_per_pixel: f64,
}

impl PhysicalFrame {
    pub fn to_mm(&self, p: Point2) -> Point2 {
        Point2::new(
            (p.x - self.origin.x) * self.mm_per_pixel,
            (p.y - self.origin.y) * self.mm_per_pixel,
        )
    }
}

/// Index-aligned landmarks in the session image (`source`) and the
/// registered atlas image (`target`), with an optional already-fitted transform.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkCorrespondence {
    source: LandmarkSet,
    target: LandmarkSet,
    transform: Option<SimilarityTransform>,
    physical_frame: Option<PhysicalFrame>,
}

impl LandmarkCorrespondence {
    pub fn new(
        source: LandmarkSet,
        target: LandmarkSet,
        transform: Option<SimilarityTransform>,
    ) -> Result<Self> {
        if source.len() != target.len() {
            return Err(WidefieldError::LandmarkCountMismatch {
                source_len: source.len(),
                target_len: target.len(),
            });
        }
        Ok(LandmarkCorrespondence {
            source,
            target,
            transform,
            physical_frame: None,
        })
    }

    pub fn with_physical_frame(mut self, frame: PhysicalFrame) -> Self {
        self.physical_frame = Some(frame);
        self
    }

    /// Parses a landmark JSON document.
    ///
    /// `landmarks_match` holds the session-image points and `landmarks_im`
    /// the registered atlas points. A `transform` entry, when present, is a 3×3
    /// homogeneous similarity matrix and is validated before use.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let file: LandmarksFile = serde_json::from_reader(reader)?;

        let source = file.landmarks_match.into_set("landmarks_match")?;
        let target = file.landmarks_im.into_set("landmarks_im")?;
        let transform = file
            .transform
            .map(SimilarityTransform::from_homogeneous)
            .transpose()?;

        let mut correspondence = Self::new(source, target, transform)?;
        if let (Some(offset), Some(resolution)) = (file.bregma_offset, file.resolution) {
            correspondence = correspondence.with_physical_frame(PhysicalFrame {
                origin: Point2::new(offset[0], offset[1]),
                mm_per_pixel: resolution,
            });
        }

        debug!(
            "Loaded {} landmark correspondences (transform supplied: {})",
            correspondence.len(),
            correspondence.transform.is_some()
        );
        Ok(correspondence)
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn source(&self) -> &LandmarkSet {
        &self.source
    }

    pub fn target(&self) -> &LandmarkSet {
        &self.target
    }

    pub fn supplied_transform(&self) -> Option<&SimilarityTransform> {
        self.transform.as_ref()
    }

    pub fn physical_frame(&self) -> Option<&PhysicalFrame> {
        self.physical_frame.as_ref()
    }

    /// Landmark table rows pairing source and target coordinates.
    pub fn pairs(&self) -> Vec<LandmarkPair> {
        (0..self.len())
            .map(|i| LandmarkPair {
                source: self.source.points[i],
                target: self.target.points[i],
                label: first_some(&self.source.names, &self.target.names, i),
                color: first_some(&self.source.colors, &self.target.colors, i),
            })
            .collect()
    }
}

fn first_some(a: &[Option<String>], b: &[Option<String>], i: usize) -> Option<String> {
    a.get(i)
        .cloned()
        .flatten()
        .or_else(|| b.get(i).cloned().flatten())
}

/// The transform used for a session and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTransform {
    pub transform: SimilarityTransform,
    /// True when fitted from the correspondences, false when supplied
    pub fitted: bool,
    /// Residuals against the correspondences, when at least two exist
    pub report: Option<FitReport>,
}

/// Uses the supplied transform when present, otherwise fits one from the
/// correspondences.
pub fn resolve_transform(correspondence: &LandmarkCorrespondence) -> Result<ResolvedTransform> {
    let source = &correspondence.source.points;
    let target = &correspondence.target.points;

    match correspondence.transform {
        Some(transform) => {
            let report = if correspondence.len() >= 2 {
                Some(transform.evaluate(source, target)?)
            } else {
                None
            };
            if let Some(report) = &report {
                info!(
                    "Using supplied transform; rms residual against landmarks {:.4}",
                    report.rms
                );
            }
            Ok(ResolvedTransform {
                transform,
                fitted: false,
                report,
            })
        }
        None => {
            let report = SimilarityTransform::fit(source, target)?;
            info!(
                "Fitted transform from {} landmarks; rms residual {:.4}",
                correspondence.len(),
                report.rms
            );
            Ok(ResolvedTransform {
                transform: report.transform,
                fitted: true,
                report: Some(report),
            })
        }
    }
}

/// Maps each landmark of `set` into reference space.
///
/// With a physical frame the coordinates are in millimetres relative to
/// bregma, otherwise in reference pixels. `z` is NaN.
pub fn anatomical_rows(
    set: &LandmarkSet,
    transform: &SimilarityTransform,
    frame: Option<&PhysicalFrame>,
) -> Vec<AnatomicalRow> {
    set.points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mapped = transform.apply(*p);
            let mapped = frame.map_or(mapped, |f| f.to_mm(mapped));
            AnatomicalRow {
                x: mapped.x,
                y: mapped.y,
                z: f64::NAN,
                region_label: set.label(i),
            }
        })
        .collect()
}
