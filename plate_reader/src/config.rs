//! Pipeline configuration.
//!
//! Two presets cover the supported deployments: `continuous` reads every frame
//! and sends a masked suffix to a board found by vendor name, `on_demand`
//! waits for a key press and sends the full plate to a fixed port. A TOML
//! file only needs the fields it changes; everything else comes from the
//! preset it names (or the one chosen on the command line). Optional
//! settings take `false` to switch off what the preset turns on, e.g.
//! `snapshot_path = false` or `keep_last = false`.

use crate::error::PlateError;
use crate::plate_detection::bounding_box_render::DisplayConfig;
use crate::plate_detection::plate_locator::LocatorConfig;
use crate::plate_detection::plate_text::TextPolicy;
use crate::plate_detection::recognition::RecognitionConfig;
use crate::plate_detection::serial_link::SerialConfig;
use crate::plate_detection::tesseract_ocr::OcrConfig;
use crate::plate_detection::video_reader::CaptureConfig;

use serde::de::Error as _;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Continuous,
    OnDemand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub locator: LocatorConfig,
    pub ocr: OcrConfig,
    pub text: TextPolicy,
    pub serial: SerialConfig,
    pub display: DisplayConfig,
    pub recognition: RecognitionConfig,
}

impl PipelineConfig {
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::Continuous => Self {
                capture: CaptureConfig::default(),
                locator: LocatorConfig::continuous(),
                ocr: OcrConfig::default(),
                text: TextPolicy::masked_suffix(),
                serial: SerialConfig::auto_detect(),
                display: DisplayConfig::continuous(),
                recognition: RecognitionConfig::continuous(),
            },
            Preset::OnDemand => Self {
                capture: CaptureConfig {
                    resize: false,
                    ..CaptureConfig::default()
                },
                locator: LocatorConfig::on_demand(),
                ocr: OcrConfig::default(),
                text: TextPolicy::full_line(),
                serial: SerialConfig::fixed_port(),
                display: DisplayConfig::on_demand(),
                recognition: RecognitionConfig::on_demand(),
            },
        }
    }

    /// Parses `content` on top of `fallback`. A top level `preset = "..."`
    /// key replaces the fallback.
    pub fn from_toml(content: &str, fallback: Preset) -> Result<Self, PlateError> {
        let mut overrides: toml::Table = content.parse()?;

        let preset = match overrides.remove("preset") {
            Some(value) => value.try_into::<Preset>()?,
            None => fallback,
        };

        let mut merged: toml::Table = toml::to_string(&Self::preset(preset))?.parse()?;
        merge(&mut merged, overrides);
        Ok(toml::Value::Table(merged).try_into()?)
    }

    pub fn load(path: &Path, fallback: Preset) -> Result<Self, PlateError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content, fallback)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::preset(Preset::Continuous)
    }
}

/// Reads an optional setting where `false` means off.
pub(crate) fn switchable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Switch<T> {
        Off(bool),
        On(T),
    }

    match Switch::<T>::deserialize(deserializer)? {
        Switch::Off(false) => Ok(None),
        Switch::Off(true) => Err(D::Error::custom(
            "`true` is not a setting, give its value or `false` to turn it off",
        )),
        Switch::On(value) => Ok(Some(value)),
    }
}

/// Recursively lays `overrides` over `base`. Tables merge key by key, any
/// other value replaces what was there.
fn merge(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                // Tagged enums switch variant as a whole.
                if nested.contains_key("kind") || nested.contains_key("strategy") {
                    *existing = nested;
                } else {
                    merge(existing, nested);
                }
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
