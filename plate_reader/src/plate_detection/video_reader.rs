use crate::error::PlateError;
use crate::utils::FpsLimiter;

use log::debug;
use log::info;
use log::warn;

use opencv::core::Size;

use opencv::imgproc::resize;
use opencv::imgproc::INTER_LINEAR;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use opencv::prelude::VideoCaptureTrait;
use opencv::prelude::VideoCaptureTraitConst;
use opencv::videoio::VideoCapture;

use opencv::videoio::CAP_ANY;
use opencv::videoio::CAP_PROP_FRAME_HEIGHT;
use opencv::videoio::CAP_PROP_FRAME_WIDTH;

use serde::Deserialize;
use serde::Serialize;

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CaptureSource {
    Device { index: i32 },
    File { path: String },
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureSource::Device { index } => write!(f, "camera {index}"),
            CaptureSource::File { path } => write!(f, "file {path}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: CaptureSource,
    /// Requested from the device, and the target size when `resize` is set.
    pub width: i32,
    pub height: i32,
    pub resize: bool,
    /// Playback cap, mostly useful for file sources.
    #[serde(default, deserialize_with = "crate::config::switchable")]
    pub max_fps: Option<u32>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: CaptureSource::Device { index: 0 },
            width: 640,
            height: 480,
            resize: true,
            max_fps: None,
        }
    }
}

pub trait FrameSource {
    /// Next frame, or `None` once the source has nothing more to give.
    fn next_frame(&mut self) -> Result<Option<Mat>, PlateError>;

    fn release(&mut self) {}
}

pub struct VideoReader {
    capture: VideoCapture,
    resize_to: Option<Size>,
    fps_limiter: Option<FpsLimiter>,
    released: bool,
}

impl VideoReader {
    pub fn open(config: &CaptureConfig) -> Result<Self, PlateError> {
        let mut capture = match &config.source {
            CaptureSource::Device { index } => VideoCapture::new(*index, CAP_ANY)?,
            CaptureSource::File { path } => VideoCapture::from_file(path, CAP_ANY)?,
        };

        if !capture.is_opened()? {
            return Err(PlateError::CaptureUnavailable(config.source.to_string()));
        }

        if let CaptureSource::Device { .. } = config.source {
            capture.set(CAP_PROP_FRAME_WIDTH, config.width as f64)?;
            capture.set(CAP_PROP_FRAME_HEIGHT, config.height as f64)?;
        }
        info!("Opened {}", config.source);

        Ok(Self {
            capture,
            resize_to: config
                .resize
                .then(|| Size::new(config.width, config.height)),
            fps_limiter: config.max_fps.map(FpsLimiter::new),
            released: false,
        })
    }
}

impl FrameSource for VideoReader {
    fn next_frame(&mut self) -> Result<Option<Mat>, PlateError> {
        if let Some(limiter) = self.fps_limiter.as_mut() {
            limiter.wait();
        }

        let mut image = Mat::default();
        let grabbed = self.capture.read(&mut image)?;

        if !grabbed || image.empty() {
            debug!("Capture returned no frame");
            return Ok(None);
        }

        match self.resize_to {
            Some(size) => {
                let mut image_resized = Mat::default();
                resize(&image, &mut image_resized, size, 0.0, 0.0, INTER_LINEAR)?;
                Ok(Some(image_resized))
            }
            None => Ok(Some(image)),
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.capture.release() {
            warn!("Could not release capture: {}", e);
        }
        self.released = true;
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_video_file_is_fatal() {
        let config = CaptureConfig {
            source: CaptureSource::File {
                path: "/nonexistent/plates.mp4".to_string(),
            },
            ..CaptureConfig::default()
        };

        assert!(VideoReader::open(&config).is_err());
    }

    #[test]
    fn sources_describe_themselves() {
        assert_eq!(CaptureSource::Device { index: 1 }.to_string(), "camera 1");
        assert_eq!(
            CaptureSource::File {
                path: "cars.mp4".to_string()
            }
            .to_string(),
            "file cars.mp4"
        );
    }
}
