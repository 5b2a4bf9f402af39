use anyhow::bail;
use anyhow::Context;

use clap::Parser;

use log::info;

use opencv::imgcodecs::imread;
use opencv::imgcodecs::IMREAD_COLOR;
use opencv::prelude::MatTraitConst;

use plate_reader::cli::init_logging;
use plate_reader::config::PipelineConfig;
use plate_reader::config::Preset;
use plate_reader::plate_detection::bounding_box_render::save_snapshot;
use plate_reader::plate_detection::plate_locator::CropPolicy;
use plate_reader::plate_detection::plate_locator::LocateOutcome;
use plate_reader::plate_detection::plate_locator::PlateLocator;
use plate_reader::plate_detection::tesseract_ocr::binarize;
use plate_reader::plate_detection::tesseract_ocr::TesseractOcr;
use plate_reader::plate_detection::tesseract_ocr::TextRecognizer;

use std::path::PathBuf;

/// Reads the plate in a single picture and prints it.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    image: PathBuf,

    #[arg(long, value_enum, default_value = "on-demand")]
    preset: Preset,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    crop: Option<CropPolicy>,

    /// Where to write the plate crop.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path, args.preset)?,
        None => PipelineConfig::preset(args.preset),
    };
    if let Some(crop) = args.crop {
        config.locator.crop_policy = crop;
    }

    let path = args.image.to_string_lossy();
    let frame = imread(&path, IMREAD_COLOR)?;
    if frame.empty() {
        bail!("cannot read image {path}");
    }

    let locator = PlateLocator::new(config.locator.clone());
    let crop = match locator.locate(&frame) {
        LocateOutcome::Matched(crop) => crop,
        LocateOutcome::NoMatch => {
            info!("No plate found in {path}");
            return Ok(());
        }
        LocateOutcome::Error(reason) => bail!("plate search failed: {reason}"),
    };
    info!("Plate region {:?}", crop.region);

    if let Some(out) = &args.out {
        save_snapshot(out, &crop.image)?;
    }

    let plate = match &config.recognition.binarize {
        Some(params) => binarize(&crop.image, params)?,
        None => crop.image,
    };
    let mut ocr = TesseractOcr::new(&config.ocr).context("could not start tesseract")?;
    let raw = ocr.recognize(&plate)?;

    match config.text.format(&raw) {
        Some(text) => println!("{text}"),
        None => info!("Plate found but no text was recognized"),
    }
    Ok(())
}
