use crate::config::PipelineConfig;
use crate::config::Preset;
use crate::error::PlateError;
use crate::plate_detection::bounding_box_render::open_display;
use crate::plate_detection::plate_locator::CropPolicy;
use crate::plate_detection::recognition::CaptureMode;
use crate::plate_detection::recognition::Collaborators;
use crate::plate_detection::recognition::RecognitionLoop;
use crate::plate_detection::serial_link::connect;
use crate::plate_detection::serial_link::PlateSink;
use crate::plate_detection::serial_link::PortSelection;
use crate::plate_detection::tesseract_ocr::TesseractOcr;
use crate::plate_detection::video_reader::CaptureSource;
use crate::plate_detection::video_reader::VideoReader;

use anyhow::Context;

use clap::Parser;

use log::info;
use log::warn;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Reads license plates from a camera and forwards them over serial")]
pub struct Args {
    /// Deployment preset the configuration starts from.
    #[arg(long, value_enum)]
    pub preset: Option<Preset>,

    /// TOML file laid over the preset.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Camera index.
    #[arg(long, conflicts_with = "video")]
    pub camera: Option<i32>,

    /// Video file to read instead of a camera.
    #[arg(long)]
    pub video: Option<String>,

    /// Serial port to open, e.g. COM3 or /dev/ttyACM0.
    #[arg(long, conflicts_with_all = ["auto_detect", "no_serial"])]
    pub port: Option<String>,

    /// Pick the first serial port whose description contains this vendor name.
    #[arg(long, conflicts_with = "no_serial")]
    pub auto_detect: Option<String>,

    /// Detect plates without sending them anywhere.
    #[arg(long)]
    pub no_serial: bool,

    #[arg(long, value_enum)]
    pub crop: Option<CropPolicy>,

    /// Skip the windows; stop at end of stream.
    #[arg(long)]
    pub headless: bool,

    /// Print Prometheus counters on exit.
    #[arg(long)]
    pub metrics: bool,
}

impl Args {
    /// Preset, then config file, then command line flags.
    pub fn resolve(&self, default_preset: Preset) -> Result<PipelineConfig, PlateError> {
        let preset = self.preset.unwrap_or(default_preset);
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path, preset)?,
            None => PipelineConfig::preset(preset),
        };

        if let Some(index) = self.camera {
            config.capture.source = CaptureSource::Device { index };
        }
        if let Some(path) = &self.video {
            config.capture.source = CaptureSource::File { path: path.clone() };
        }

        if let Some(port) = &self.port {
            config.serial.selection = PortSelection::Fixed { port: port.clone() };
        }
        if let Some(vendor) = &self.auto_detect {
            config.serial.selection = PortSelection::AutoDetect {
                vendor: vendor.clone(),
            };
        }
        if self.no_serial {
            config.serial.selection = PortSelection::Disabled;
        }

        if let Some(crop) = self.crop {
            config.locator.crop_policy = crop;
        }
        if self.headless {
            config.display.headless = true;
        }
        Ok(config)
    }
}

/// On-demand capture waits for a key a headless display never reports.
fn trigger_unreachable(config: &PipelineConfig) -> bool {
    config.display.headless && matches!(config.recognition.mode, CaptureMode::OnDemand { .. })
}

pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Entry point shared by the capture binaries.
pub fn run(default_preset: Preset) -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    let config = args
        .resolve(default_preset)
        .context("could not load configuration")?;
    if trigger_unreachable(&config) {
        warn!("Headless on-demand capture never sees the trigger key, no plate will be read");
    }

    // Discovery misses and a dead camera stop us here; a port that fails to
    // open only disables sending.
    let sink = connect(&config.serial)
        .context("serial device discovery failed")?
        .map(|link| Box::new(link) as Box<dyn PlateSink>);
    let source = VideoReader::open(&config.capture).context("could not access the camera")?;
    let ocr = TesseractOcr::new(&config.ocr).context("could not start tesseract")?;

    let collaborators = Collaborators {
        source: Box::new(source),
        display: open_display(&config.display),
        ocr: Box::new(ocr),
        sink,
    };

    let mut pipeline = RecognitionLoop::new(collaborators, &config)?;
    pipeline.run()?;

    if args.metrics {
        print!("{}", pipeline.metrics().render());
    }
    info!("Done");
    Ok(())
}
