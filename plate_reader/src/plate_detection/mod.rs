pub mod bounding_box_render;
pub mod plate_locator;
pub mod plate_text;
pub mod recognition;
pub mod serial_link;
pub mod tesseract_ocr;
pub mod video_reader;

use opencv::core::Point;
use opencv::core::Rect;
use opencv::core::Vector;
use opencv::prelude::Mat;

/// Grayscale plate region cut out of a frame.
pub struct PlateCrop {
    pub image: Mat,
    /// Bounding box of the crop in frame coordinates.
    pub region: Rect,
    /// The accepted quadrilateral, as returned by the polygon approximation.
    pub corners: Vector<Point>,
}

impl PlateCrop {
    fn new(image: Mat, region: Rect, corners: Vector<Point>) -> Self {
        return Self {
            image,
            region,
            corners,
        };
    }
}
