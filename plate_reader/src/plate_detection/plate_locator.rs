use super::PlateCrop;
use crate::error::PlateError;

use opencv::core::count_non_zero;
use opencv::core::find_non_zero;
use opencv::core::Point;
use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::core::Size;
use opencv::core::Vector;
use opencv::core::BORDER_DEFAULT;
use opencv::core::CV_8UC1;

use opencv::imgproc::approx_poly_dp;
use opencv::imgproc::arc_length;
use opencv::imgproc::bilateral_filter;
use opencv::imgproc::bounding_rect;
use opencv::imgproc::canny;
use opencv::imgproc::contour_area;
use opencv::imgproc::cvt_color;
use opencv::imgproc::fill_poly;
use opencv::imgproc::find_contours;
use opencv::imgproc::gaussian_blur;
use opencv::imgproc::CHAIN_APPROX_SIMPLE;
use opencv::imgproc::COLOR_BGR2GRAY;
use opencv::imgproc::LINE_8;
use opencv::imgproc::RETR_EXTERNAL;
use opencv::imgproc::RETR_TREE;

use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use serde::Deserialize;
use serde::Serialize;

/// Noise filter applied before edge detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Smoothing {
    Bilateral {
        diameter: i32,
        sigma_color: f64,
        sigma_space: f64,
    },
    Gaussian {
        kernel: i32,
        sigma: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContourRetrieval {
    External,
    Tree,
}

impl ContourRetrieval {
    fn mode(self) -> i32 {
        match self {
            ContourRetrieval::External => RETR_EXTERNAL,
            ContourRetrieval::Tree => RETR_TREE,
        }
    }
}

/// How the accepted quadrilateral is turned into a crop rectangle.
///
/// Both give the upright box around the quadrilateral, skewed or not. The
/// mask bounds are measured on the rasterised polygon and stay inside the
/// frame by construction; the polygon bounds come from the four vertices and
/// are clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CropPolicy {
    MaskBounds,
    PolygonBounds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub smoothing: Smoothing,
    pub canny_low: f64,
    pub canny_high: f64,
    pub retrieval: ContourRetrieval,
    /// Only the largest `candidate_pool` contours are approximated.
    pub candidate_pool: usize,
    /// Approximation tolerance as a fraction of the contour perimeter.
    pub epsilon_ratio: f64,
    pub crop_policy: CropPolicy,
    /// Contours enclosing less area than this are skipped. Off by default.
    #[serde(default, deserialize_with = "crate::config::switchable")]
    pub min_area: Option<f64>,
}

impl LocatorConfig {
    /// Bilateral smoothing, full contour tree and a mask-derived crop.
    pub fn continuous() -> Self {
        Self {
            smoothing: Smoothing::Bilateral {
                diameter: 11,
                sigma_color: 17.0,
                sigma_space: 17.0,
            },
            canny_low: 30.0,
            canny_high: 200.0,
            retrieval: ContourRetrieval::Tree,
            candidate_pool: 10,
            epsilon_ratio: 0.018,
            crop_policy: CropPolicy::MaskBounds,
            min_area: None,
        }
    }

    /// Gaussian smoothing, outer contours only and a polygon bounding rectangle.
    pub fn on_demand() -> Self {
        Self {
            smoothing: Smoothing::Gaussian {
                kernel: 5,
                sigma: 0.0,
            },
            canny_low: 50.0,
            canny_high: 150.0,
            retrieval: ContourRetrieval::External,
            candidate_pool: 10,
            epsilon_ratio: 0.02,
            crop_policy: CropPolicy::PolygonBounds,
            min_area: None,
        }
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self::continuous()
    }
}

pub enum LocateOutcome {
    Matched(PlateCrop),
    NoMatch,
    Error(String),
}

impl LocateOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            LocateOutcome::Matched(_) => "matched",
            LocateOutcome::NoMatch => "no_match",
            LocateOutcome::Error(_) => "error",
        }
    }

    pub fn into_crop(self) -> Option<PlateCrop> {
        match self {
            LocateOutcome::Matched(crop) => Some(crop),
            _ => None,
        }
    }
}

/// Finds the largest near-quadrilateral boundary in a frame.
pub struct PlateLocator {
    config: LocatorConfig,
}

impl PlateLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    /// Grayscale crop of the plate, or `None` when nothing plate-like was found.
    pub fn locate_plate(&self, frame: &Mat) -> Option<Mat> {
        self.locate(frame).into_crop().map(|crop| crop.image)
    }

    pub fn locate(&self, frame: &Mat) -> LocateOutcome {
        if frame.empty() {
            return LocateOutcome::Error("empty frame".to_string());
        }

        let grey = match self.grayscale(frame) {
            Ok(grey) => grey,
            Err(e) => return LocateOutcome::Error(e.to_string()),
        };

        match self.search(&grey) {
            Ok(Some(crop)) => LocateOutcome::Matched(crop),
            Ok(None) => LocateOutcome::NoMatch,
            Err(e) => LocateOutcome::Error(e.to_string()),
        }
    }

    fn grayscale(&self, frame: &Mat) -> Result<Mat, PlateError> {
        if frame.channels() == 1 {
            return Ok(frame.try_clone()?);
        }
        let mut grey = Mat::default();
        cvt_color(frame, &mut grey, COLOR_BGR2GRAY, 0)?;
        Ok(grey)
    }

    fn search(&self, grey: &Mat) -> Result<Option<PlateCrop>, PlateError> {
        let edges = self.edge_map(grey)?;
        let candidates = self.ranked_contours(&edges)?;

        let corners = match self.first_quadrilateral(candidates)? {
            Some(corners) => corners,
            None => return Ok(None),
        };

        let region = match self.config.crop_policy {
            CropPolicy::MaskBounds => mask_bounds(grey, &corners)?,
            CropPolicy::PolygonBounds => {
                clamp_to_frame(bounding_rect(&corners)?, grey.cols(), grey.rows())?
            }
        };

        // Own the pixels so the crop outlives the frame.
        let image = grey.apply_1(region)?.try_clone()?;
        Ok(Some(PlateCrop::new(image, region, corners)))
    }

    fn edge_map(&self, grey: &Mat) -> Result<Mat, PlateError> {
        let mut smoothed = Mat::default();
        match self.config.smoothing {
            Smoothing::Bilateral {
                diameter,
                sigma_color,
                sigma_space,
            } => bilateral_filter(
                grey,
                &mut smoothed,
                diameter,
                sigma_color,
                sigma_space,
                BORDER_DEFAULT,
            )?,
            Smoothing::Gaussian { kernel, sigma } => gaussian_blur(
                grey,
                &mut smoothed,
                Size::new(kernel, kernel),
                sigma,
                0.0,
                BORDER_DEFAULT,
            )?,
        }

        let mut edges = Mat::default();
        canny(
            &smoothed,
            &mut edges,
            self.config.canny_low,
            self.config.canny_high,
            3,
            false,
        )?;
        Ok(edges)
    }

    /// Contours sorted by enclosed area, largest first, cut to the candidate pool.
    fn ranked_contours(&self, edges: &Mat) -> Result<Vec<(f64, Vector<Point>)>, PlateError> {
        let mut contours = Vector::<Vector<Point>>::new();
        find_contours(
            edges,
            &mut contours,
            self.config.retrieval.mode(),
            CHAIN_APPROX_SIMPLE,
            Point::new(0, 0),
        )?;

        let mut ranked = Vec::with_capacity(contours.len());
        for contour in contours {
            let area = contour_area(&contour, false)?;
            if let Some(min_area) = self.config.min_area {
                if area < min_area {
                    continue;
                }
            }
            ranked.push((area, contour));
        }

        // Stable: equal areas keep discovery order.
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        ranked.truncate(self.config.candidate_pool);
        Ok(ranked)
    }

    fn first_quadrilateral(
        &self,
        candidates: Vec<(f64, Vector<Point>)>,
    ) -> Result<Option<Vector<Point>>, PlateError> {
        for (_, contour) in candidates {
            let perimeter = arc_length(&contour, true)?;
            let mut approx = Vector::<Point>::new();
            approx_poly_dp(
                &contour,
                &mut approx,
                self.config.epsilon_ratio * perimeter,
                true,
            )?;
            if approx.len() == 4 {
                return Ok(Some(approx));
            }
        }
        Ok(None)
    }
}

/// Bounding box of every pixel covered by the filled quadrilateral.
fn mask_bounds(grey: &Mat, corners: &Vector<Point>) -> Result<Rect, PlateError> {
    let mut mask =
        Mat::new_rows_cols_with_default(grey.rows(), grey.cols(), CV_8UC1, Scalar::all(0.0))?;

    let mut polygons = Vector::<Vector<Point>>::new();
    polygons.push(corners.iter().collect());
    fill_poly(&mut mask, &polygons, Scalar::all(255.0), LINE_8, 0, Point::new(0, 0))?;

    if count_non_zero(&mask)? == 0 {
        return Err(PlateError::Geometry("plate mask is empty".to_string()));
    }

    let mut covered = Vector::<Point>::new();
    find_non_zero(&mask, &mut covered)?;
    Ok(bounding_rect(&covered)?)
}

fn clamp_to_frame(rect: Rect, cols: i32, rows: i32) -> Result<Rect, PlateError> {
    let left = rect.x.max(0);
    let top = rect.y.max(0);
    let right = (rect.x + rect.width).min(cols);
    let bottom = (rect.y + rect.height).min(rows);

    if right <= left || bottom <= top {
        return Err(PlateError::Geometry(format!(
            "plate box {:?} lies outside the {}x{} frame",
            rect, cols, rows
        )));
    }
    Ok(Rect::new(left, top, right - left, bottom - top))
}
