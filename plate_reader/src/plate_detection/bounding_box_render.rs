use crate::error::PlateError;

use log::debug;
use log::warn;

use opencv::core::Point;
use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::core::Vector;
use opencv::core::CV_8UC3;
use opencv::highgui::destroy_all_windows;
use opencv::highgui::imshow;
use opencv::highgui::wait_key;
use opencv::imgcodecs::imwrite;
use opencv::imgproc::polylines;
use opencv::imgproc::put_text;
use opencv::imgproc::FONT_HERSHEY_PLAIN;
use opencv::imgproc::FONT_HERSHEY_SIMPLEX;
use opencv::imgproc::LINE_8;
use opencv::imgproc::{rectangle, LineTypes};
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use serde::Deserialize;
use serde::Serialize;

use std::path::Path;

/// Plate box, outline and label drawn on top of the live frame.
pub struct Overlay<'a> {
    pub region: Rect,
    /// Quadrilateral the plate was accepted on, empty to skip it.
    pub outline: &'a [Point],
    pub label: Option<&'a str>,
}

pub trait FeedbackDisplay {
    fn show_frame(&mut self, frame: &Mat, overlay: Option<Overlay>) -> Result<(), PlateError>;

    /// The image that was handed to OCR.
    fn show_plate(&mut self, plate: &Mat) -> Result<(), PlateError>;

    fn show_text(&mut self, text: &str) -> Result<(), PlateError>;

    /// Key pressed since the last poll, if any.
    fn poll_key(&mut self) -> Result<Option<char>, PlateError>;

    fn release(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub headless: bool,
    pub frame_window: String,
    #[serde(default, deserialize_with = "crate::config::switchable")]
    pub plate_window: Option<String>,
    #[serde(default, deserialize_with = "crate::config::switchable")]
    pub text_window: Option<String>,
    pub key_delay_ms: i32,
}

impl DisplayConfig {
    pub fn continuous() -> Self {
        Self {
            headless: false,
            frame_window: "License Plate Recognition".to_string(),
            plate_window: None,
            text_window: None,
            key_delay_ms: 1,
        }
    }

    pub fn on_demand() -> Self {
        Self {
            headless: false,
            frame_window: "Webcam Feed".to_string(),
            plate_window: Some("Detected Plate Region".to_string()),
            text_window: Some("Detected Number Plate".to_string()),
            key_delay_ms: 1,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self::continuous()
    }
}

/// Builds the display described by `config`.
pub fn open_display(config: &DisplayConfig) -> Box<dyn FeedbackDisplay> {
    if config.headless {
        Box::new(HeadlessDisplay::default())
    } else {
        Box::new(PlateRender::new(config.clone()))
    }
}

/// highgui windows: the frame with the plate box, the OCR input and the text.
pub struct PlateRender {
    config: DisplayConfig,
    released: bool,
}

impl PlateRender {
    pub fn new(config: DisplayConfig) -> Self {
        Self {
            config,
            released: false,
        }
    }
}

pub fn draw_overlay(frame: &mut Mat, overlay: &Overlay) -> Result<(), PlateError> {
    let color = Scalar::from((0.0, 255.0, 0.0));
    let thikness_px = 2;

    rectangle(
        frame,
        overlay.region,
        color,
        thikness_px,
        LineTypes::LINE_4 as i32,
        0,
    )?;

    if !overlay.outline.is_empty() {
        let mut outline = Vector::<Vector<Point>>::new();
        outline.push(overlay.outline.iter().copied().collect());
        polylines(frame, &outline, true, Scalar::from((0.0, 0.0, 255.0)), 1, LINE_8, 0)?;
    }

    if let Some(label) = overlay.label {
        let header = Rect::new(
            overlay.region.x,
            (overlay.region.y - 20).max(0),
            overlay.region.width,
            20,
        );
        rectangle(frame, header, color, -1, LineTypes::LINE_4 as i32, 0)?;
        put_text(
            frame,
            label,
            Point::new(header.x, header.y + 16),
            FONT_HERSHEY_PLAIN,
            1.5,
            Scalar::from((0.0, 0.0, 0.0)),
            2,
            LINE_8,
            false,
        )?;
    }
    Ok(())
}

/// White 400x200 card with the recognized text on it.
pub fn text_card(text: &str) -> Result<Mat, PlateError> {
    let mut card = Mat::new_rows_cols_with_default(200, 400, CV_8UC3, Scalar::all(255.0))?;
    put_text(
        &mut card,
        text,
        Point::new(50, 100),
        FONT_HERSHEY_SIMPLEX,
        1.0,
        Scalar::from((0.0, 0.0, 0.0)),
        2,
        LINE_8,
        false,
    )?;
    Ok(card)
}

impl FeedbackDisplay for PlateRender {
    fn show_frame(&mut self, frame: &Mat, overlay: Option<Overlay>) -> Result<(), PlateError> {
        match overlay {
            Some(overlay) => {
                let mut annotated = frame.try_clone()?;
                draw_overlay(&mut annotated, &overlay)?;
                imshow(&self.config.frame_window, &annotated)?;
            }
            None => imshow(&self.config.frame_window, frame)?,
        }
        Ok(())
    }

    fn show_plate(&mut self, plate: &Mat) -> Result<(), PlateError> {
        if let Some(window) = &self.config.plate_window {
            imshow(window, plate)?;
        }
        Ok(())
    }

    fn show_text(&mut self, text: &str) -> Result<(), PlateError> {
        if let Some(window) = &self.config.text_window {
            imshow(window, &text_card(text)?)?;
        }
        Ok(())
    }

    fn poll_key(&mut self) -> Result<Option<char>, PlateError> {
        let key = wait_key(self.config.key_delay_ms)?;
        if key < 0 {
            return Ok(None);
        }
        Ok(char::from_u32((key & 0xFF) as u32))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = destroy_all_windows() {
            warn!("Could not close windows: {}", e);
        }
        self.released = true;
    }
}

impl Drop for PlateRender {
    fn drop(&mut self) {
        self.release();
    }
}

/// Shows nothing and never reports a key; the loop ends with the stream.
#[derive(Default)]
pub struct HeadlessDisplay {}

impl FeedbackDisplay for HeadlessDisplay {
    fn show_frame(&mut self, _frame: &Mat, overlay: Option<Overlay>) -> Result<(), PlateError> {
        if let Some(overlay) = overlay {
            debug!("Plate at {:?} {:?}", overlay.region, overlay.label);
        }
        Ok(())
    }

    fn show_plate(&mut self, _plate: &Mat) -> Result<(), PlateError> {
        Ok(())
    }

    fn show_text(&mut self, _text: &str) -> Result<(), PlateError> {
        Ok(())
    }

    fn poll_key(&mut self) -> Result<Option<char>, PlateError> {
        Ok(None)
    }
}

/// Writes `image` to disk for offline inspection.
pub fn save_snapshot(path: &Path, image: &Mat) -> Result<(), PlateError> {
    let written = imwrite(&path.to_string_lossy(), image, &Vector::<i32>::new())?;
    if !written {
        return Err(PlateError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("could not write {}", path.display()),
        )));
    }
    Ok(())
}
