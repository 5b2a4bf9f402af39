use crate::error::PlateError;

use leptess::tesseract::TessApi;

use opencv::core::Size;

use opencv::imgproc::adaptive_threshold;
use opencv::imgproc::resize;
use opencv::imgproc::ADAPTIVE_THRESH_GAUSSIAN_C;
use opencv::imgproc::INTER_LINEAR;
use opencv::imgproc::THRESH_BINARY;

use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;

use serde::Deserialize;
use serde::Serialize;

use std::ffi::CString;

pub const PLATE_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Single uniform block of text.
const PSM_SINGLE_BLOCK: u32 = 6;
/// Whatever engine the traineddata supports.
const OEM_DEFAULT: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    #[serde(default, deserialize_with = "crate::config::switchable")]
    pub data_path: Option<String>,
    pub language: String,
    pub whitelist: String,
    pub page_seg_mode: u32,
    pub engine_mode: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            language: "eng".to_string(),
            whitelist: PLATE_WHITELIST.to_string(),
            page_seg_mode: PSM_SINGLE_BLOCK,
            engine_mode: OEM_DEFAULT,
        }
    }
}

/// Enlarge-then-threshold step that makes small plates legible to tesseract.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Binarize {
    pub scale: i32,
    pub block_size: i32,
    pub offset: f64,
}

impl Default for Binarize {
    fn default() -> Self {
        Self {
            scale: 2,
            block_size: 11,
            offset: 2.0,
        }
    }
}

pub fn binarize(plate: &Mat, params: &Binarize) -> Result<Mat, PlateError> {
    let scale = params.scale.max(1);
    let mut enlarged = Mat::default();
    resize(
        plate,
        &mut enlarged,
        Size::new(plate.cols() * scale, plate.rows() * scale),
        0.0,
        0.0,
        INTER_LINEAR,
    )?;

    let mut binary = Mat::default();
    adaptive_threshold(
        &enlarged,
        &mut binary,
        255.0,
        ADAPTIVE_THRESH_GAUSSIAN_C,
        THRESH_BINARY,
        params.block_size,
        params.offset,
    )?;
    Ok(binary)
}

pub trait TextRecognizer {
    /// Reads the text on a single-channel 8-bit plate image.
    fn recognize(&mut self, plate: &Mat) -> Result<String, PlateError>;
}

pub struct TesseractOcr {
    ocr: TessApi,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Result<Self, PlateError> {
        let mut api = TessApi::new(config.data_path.as_deref(), &config.language)
            .map_err(|e| PlateError::Ocr(format!("cannot start tesseract: {e:?}")))?;

        let data_path_cstr = config
            .data_path
            .as_deref()
            .map(CString::new)
            .transpose()
            .map_err(|e| PlateError::Ocr(format!("bad tessdata path: {e}")))?;
        let lang = CString::new(config.language.as_str())
            .map_err(|e| PlateError::Ocr(format!("bad language: {e}")))?;

        api.raw
            .init_4(data_path_cstr.as_deref(), Some(lang.as_ref()), config.engine_mode)
            .map_err(|e| PlateError::Ocr(format!("cannot select engine mode: {e:?}")))?;

        set_variable(&mut api, "tessedit_char_whitelist", &config.whitelist)?;
        set_variable(
            &mut api,
            "tessedit_pageseg_mode",
            &config.page_seg_mode.to_string(),
        )?;

        Ok(Self { ocr: api })
    }
}

fn set_variable(api: &mut TessApi, name: &str, value: &str) -> Result<(), PlateError> {
    let name_cstr = CString::new(name).map_err(|e| PlateError::Ocr(e.to_string()))?;
    let value_cstr = CString::new(value).map_err(|e| PlateError::Ocr(e.to_string()))?;
    api.raw
        .set_variable(&name_cstr, &value_cstr)
        .map_err(|e| PlateError::Ocr(format!("cannot set {name}: {e:?}")))
}

impl TextRecognizer for TesseractOcr {
    fn recognize(&mut self, plate: &Mat) -> Result<String, PlateError> {
        if plate.channels() != 1 {
            return Err(PlateError::Ocr(format!(
                "expected a single channel plate, got {} channels",
                plate.channels()
            )));
        }

        // Make it contiguous
        let plate = plate.try_clone()?;
        let cols = plate.cols();
        let rows = plate.rows();
        self.ocr
            .raw
            .set_image(plate.data_bytes()?, cols, rows, 1, cols)
            .map_err(|e| PlateError::Ocr(format!("cannot hand image to tesseract: {e:?}")))?;

        self.ocr
            .get_utf8_text()
            .map_err(|e| PlateError::Ocr(format!("tesseract returned invalid utf-8: {e}")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use opencv::core::Rect;
    use opencv::core::Scalar;
    use opencv::core::CV_8UC1;
    use opencv::imgproc::rectangle;
    use opencv::imgproc::LINE_8;

    fn plate_like() -> Mat {
        let mut plate =
            Mat::new_rows_cols_with_default(40, 120, CV_8UC1, Scalar::all(200.0)).unwrap();
        rectangle(
            &mut plate,
            Rect::new(20, 10, 15, 20),
            Scalar::all(30.0),
            -1,
            LINE_8,
            0,
        )
        .unwrap();
        plate
    }

    #[test]
    fn binarize_enlarges_by_the_scale_factor() {
        let binary = binarize(&plate_like(), &Binarize::default()).unwrap();

        assert_eq!(binary.cols(), 240);
        assert_eq!(binary.rows(), 80);
    }

    #[test]
    fn binarize_produces_only_black_and_white() {
        let binary = binarize(&plate_like(), &Binarize::default()).unwrap();

        for row in 0..binary.rows() {
            for col in 0..binary.cols() {
                let value = *binary.at_2d::<u8>(row, col).unwrap();
                assert!(value == 0 || value == 255, "pixel ({row},{col}) = {value}");
            }
        }
        // Just inside the glyph's left edge, where the background lifts the local mean.
        assert_eq!(*binary.at_2d::<u8>(40, 41).unwrap(), 0);
        assert_eq!(*binary.at_2d::<u8>(40, 10).unwrap(), 255);
    }

    #[test]
    fn default_config_restricts_to_plate_characters() {
        let config = OcrConfig::default();
        assert_eq!(config.whitelist, PLATE_WHITELIST);
        assert_eq!(config.page_seg_mode, 6);
        assert_eq!(config.engine_mode, 3);
    }
}
