use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlateError {
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("serial: {0}")]
    Serial(#[from] serialport::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("cannot encode config: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("cannot open capture source {0}")]
    CaptureUnavailable(String),

    #[error("no serial port matches vendor '{0}'")]
    DeviceNotFound(String),

    #[error("ocr: {0}")]
    Ocr(String),

    #[error("{0}")]
    Geometry(String),
}
