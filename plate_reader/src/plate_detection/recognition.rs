use super::bounding_box_render::save_snapshot;
use super::bounding_box_render::FeedbackDisplay;
use super::bounding_box_render::Overlay;
use super::plate_locator::LocateOutcome;
use super::plate_locator::PlateLocator;
use super::plate_text::TextPolicy;
use super::serial_link::PlateSink;
use super::tesseract_ocr::binarize;
use super::tesseract_ocr::Binarize;
use super::tesseract_ocr::TextRecognizer;
use super::video_reader::FrameSource;
use crate::config::PipelineConfig;
use crate::error::PlateError;
use crate::metrics::PipelineMetrics;

use log::debug;
use log::error;
use log::info;
use log::warn;

use opencv::core::Point;
use opencv::core::Rect;
use opencv::prelude::Mat;

use serde::Deserialize;
use serde::Serialize;

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CaptureMode {
    /// Every frame goes through the locator.
    Continuous,
    /// Frames are only shown until `trigger` is pressed.
    OnDemand { trigger: char },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub mode: CaptureMode,
    pub quit_key: char,
    /// Enlarge and threshold the crop before OCR.
    #[serde(default, deserialize_with = "crate::config::switchable")]
    pub binarize: Option<Binarize>,
    /// Where the OCR input of the last processed plate is written.
    #[serde(default, deserialize_with = "crate::config::switchable")]
    pub snapshot_path: Option<PathBuf>,
}

impl RecognitionConfig {
    pub fn continuous() -> Self {
        Self {
            mode: CaptureMode::Continuous,
            quit_key: 'q',
            binarize: None,
            snapshot_path: None,
        }
    }

    pub fn on_demand() -> Self {
        Self {
            mode: CaptureMode::OnDemand { trigger: 'c' },
            quit_key: 'q',
            binarize: Some(Binarize::default()),
            snapshot_path: Some(PathBuf::from("detected_plate.jpg")),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self::continuous()
    }
}

/// What happened to one processed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub outcome: &'static str,
    pub region: Option<Rect>,
    /// Corners of the accepted quadrilateral.
    pub outline: Vec<Point>,
    pub text: Option<String>,
    pub payload: Option<String>,
    pub sent: bool,
}

impl FrameReport {
    fn without_plate(outcome: &'static str) -> Self {
        Self {
            outcome,
            region: None,
            outline: Vec::new(),
            text: None,
            payload: None,
            sent: false,
        }
    }
}

pub struct Collaborators {
    pub source: Box<dyn FrameSource>,
    pub display: Box<dyn FeedbackDisplay>,
    pub ocr: Box<dyn TextRecognizer>,
    /// `None` runs the pipeline in detect-only mode.
    pub sink: Option<Box<dyn PlateSink>>,
}

/// Single-threaded read / locate / recognize / send loop.
pub struct RecognitionLoop {
    source: Box<dyn FrameSource>,
    display: Box<dyn FeedbackDisplay>,
    ocr: Box<dyn TextRecognizer>,
    sink: Option<Box<dyn PlateSink>>,
    locator: PlateLocator,
    text: TextPolicy,
    config: RecognitionConfig,
    metrics: PipelineMetrics,
    state: PipelineState,
    released: bool,
}

impl RecognitionLoop {
    pub fn new(collaborators: Collaborators, config: &PipelineConfig) -> Result<Self, PlateError> {
        Ok(Self {
            source: collaborators.source,
            display: collaborators.display,
            ocr: collaborators.ocr,
            sink: collaborators.sink,
            locator: PlateLocator::new(config.locator.clone()),
            text: config.text.clone(),
            config: config.recognition.clone(),
            metrics: PipelineMetrics::new()?,
            state: PipelineState::Running,
            released: false,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Runs until end of stream or the quit key, then releases capture and display.
    pub fn run(&mut self) -> Result<(), PlateError> {
        info!("Starting recognition loop ({:?})", self.config.mode);
        if self.sink.is_none() {
            info!("No serial transport, plates will only be displayed");
        }

        let result = self.drive();
        if let Err(e) = &result {
            error!("Recognition loop aborted: {}", e);
        }
        self.shutdown();
        result
    }

    fn drive(&mut self) -> Result<(), PlateError> {
        while self.state == PipelineState::Running {
            self.state = self.step()?;
        }
        Ok(())
    }

    pub fn step(&mut self) -> Result<PipelineState, PlateError> {
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("End of stream");
                return Ok(PipelineState::Stopped);
            }
            Err(e) => {
                error!("Could not read from the capture source: {}", e);
                return Ok(PipelineState::Stopped);
            }
        };

        let key = match self.config.mode {
            CaptureMode::Continuous => {
                let report = self.process_frame(&frame)?;
                let overlay = report.region.map(|region| Overlay {
                    region,
                    outline: &report.outline,
                    label: report.payload.as_deref(),
                });
                self.display.show_frame(&frame, overlay)?;
                self.display.poll_key()?
            }
            CaptureMode::OnDemand { trigger } => {
                self.display.show_frame(&frame, None)?;
                let key = self.display.poll_key()?;
                if key == Some(trigger) {
                    info!("Processing image...");
                    let report = self.process_frame(&frame)?;
                    let text = report.text.unwrap_or_default();
                    info!("Extracted number plate: {}", text);
                    self.display.show_text(&text)?;
                }
                key
            }
        };

        if key == Some(self.config.quit_key) {
            info!("Quit requested");
            return Ok(PipelineState::Stopped);
        }
        Ok(PipelineState::Running)
    }

    /// Locate, read and transmit the plate in one frame.
    ///
    /// Localisation, OCR and transport failures are logged and counted; only
    /// display errors are returned.
    pub fn process_frame(&mut self, frame: &Mat) -> Result<FrameReport, PlateError> {
        let outcome = self.locator.locate(frame);
        self.metrics.observe(&outcome);

        let crop = match outcome {
            LocateOutcome::Matched(crop) => crop,
            LocateOutcome::NoMatch => {
                debug!("No number plate detected");
                return Ok(FrameReport::without_plate("no_match"));
            }
            LocateOutcome::Error(reason) => {
                warn!("Plate localisation failed: {}", reason);
                return Ok(FrameReport::without_plate("error"));
            }
        };

        let binarized = match &self.config.binarize {
            Some(params) => match binarize(&crop.image, params) {
                Ok(binary) => Some(binary),
                Err(e) => {
                    warn!("Could not binarize plate: {}", e);
                    None
                }
            },
            None => None,
        };
        let ocr_input = binarized.as_ref().unwrap_or(&crop.image);

        if let Some(path) = &self.config.snapshot_path {
            if let Err(e) = save_snapshot(path, ocr_input) {
                warn!("Could not save plate snapshot: {}", e);
            }
        }
        self.display.show_plate(ocr_input)?;

        let raw = match self.ocr.recognize(ocr_input) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("OCR failed: {}", e);
                self.metrics.ocr_failed();
                String::new()
            }
        };

        let mut report = FrameReport {
            outcome: "matched",
            region: Some(crop.region),
            outline: crop.corners.iter().collect(),
            text: None,
            payload: None,
            sent: false,
        };

        let text = match self.text.clean(&raw) {
            Some(text) => text,
            None => return Ok(report),
        };
        info!("Recognized license plate: {}", text);

        let payload = self.text.truncate(&text);
        if payload != text {
            info!("Transmitting {}", payload);
        }

        report.sent = self.transmit(&payload);
        report.text = Some(text);
        report.payload = Some(payload);
        Ok(report)
    }

    fn transmit(&mut self, payload: &str) -> bool {
        let sink = match self.sink.as_mut() {
            Some(sink) => sink,
            None => return false,
        };

        match sink.send(&self.text.payload(payload)) {
            Ok(()) => {
                self.metrics.payload_sent();
                true
            }
            Err(e) => {
                warn!("Could not send {} to the board: {}", payload, e);
                self.metrics.send_failed();
                false
            }
        }
    }

    fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.source.release();
        self.display.release();
        self.state = PipelineState::Stopped;
        self.released = true;
        self.metrics.log_summary();
    }
}

impl Drop for RecognitionLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::config::Preset;

    use opencv::core::Scalar;
    use opencv::core::CV_8UC3;
    use opencv::imgproc::rectangle;
    use opencv::imgproc::LINE_8;

    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct FakeSource {
        frames: VecDeque<Mat>,
        log: Log,
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> Result<Option<Mat>, PlateError> {
            Ok(self.frames.pop_front())
        }

        fn release(&mut self) {
            self.log.borrow_mut().push("source released".to_string());
        }
    }

    struct FakeDisplay {
        keys: VecDeque<Option<char>>,
        log: Log,
    }

    impl FeedbackDisplay for FakeDisplay {
        fn show_frame(&mut self, _frame: &Mat, overlay: Option<Overlay>) -> Result<(), PlateError> {
            let entry = if overlay.is_some() { "frame+plate" } else { "frame" };
            self.log.borrow_mut().push(entry.to_string());
            Ok(())
        }

        fn show_plate(&mut self, _plate: &Mat) -> Result<(), PlateError> {
            Ok(())
        }

        fn show_text(&mut self, text: &str) -> Result<(), PlateError> {
            self.log.borrow_mut().push(format!("text:{text}"));
            Ok(())
        }

        fn poll_key(&mut self) -> Result<Option<char>, PlateError> {
            Ok(self.keys.pop_front().flatten())
        }

        fn release(&mut self) {
            self.log.borrow_mut().push("display released".to_string());
        }
    }

    struct FakeOcr {
        replies: VecDeque<Result<String, PlateError>>,
        log: Log,
    }

    impl TextRecognizer for FakeOcr {
        fn recognize(&mut self, _plate: &Mat) -> Result<String, PlateError> {
            self.log.borrow_mut().push("ocr".to_string());
            self.replies.pop_front().unwrap_or_else(|| Ok(String::new()))
        }
    }

    struct RecordingSink {
        sent: Rc<RefCell<Vec<Vec<u8>>>>,
        fail: bool,
    }

    impl PlateSink for RecordingSink {
        fn send(&mut self, payload: &[u8]) -> Result<(), PlateError> {
            if self.fail {
                return Err(PlateError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "board unplugged",
                )));
            }
            self.sent.borrow_mut().push(payload.to_vec());
            Ok(())
        }
    }

    struct Harness {
        pipeline: RecognitionLoop,
        log: Log,
        sent: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl Harness {
        fn ocr_calls(&self) -> usize {
            self.log.borrow().iter().filter(|entry| *entry == "ocr").count()
        }
    }

    fn harness(
        config: &PipelineConfig,
        frames: Vec<Mat>,
        keys: Vec<Option<char>>,
        replies: Vec<Result<String, PlateError>>,
        sink: Option<bool>,
    ) -> Harness {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let sent = Rc::new(RefCell::new(Vec::new()));

        let collaborators = Collaborators {
            source: Box::new(FakeSource {
                frames: frames.into(),
                log: log.clone(),
            }),
            display: Box::new(FakeDisplay {
                keys: keys.into(),
                log: log.clone(),
            }),
            ocr: Box::new(FakeOcr {
                replies: replies.into(),
                log: log.clone(),
            }),
            sink: sink.map(|fail| {
                Box::new(RecordingSink {
                    sent: sent.clone(),
                    fail,
                }) as Box<dyn PlateSink>
            }),
        };

        Harness {
            pipeline: RecognitionLoop::new(collaborators, config).unwrap(),
            log,
            sent,
        }
    }

    fn black_frame() -> Mat {
        Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    fn plate_frame() -> Mat {
        let mut frame = black_frame();
        rectangle(
            &mut frame,
            Rect::new(100, 150, 300, 110),
            Scalar::all(255.0),
            -1,
            LINE_8,
            0,
        )
        .unwrap();
        frame
    }

    fn continuous() -> PipelineConfig {
        PipelineConfig::preset(Preset::Continuous)
    }

    fn on_demand(snapshot: PathBuf) -> PipelineConfig {
        let mut config = PipelineConfig::preset(Preset::OnDemand);
        config.recognition.snapshot_path = Some(snapshot);
        config
    }

    #[test]
    fn first_read_failure_stops_before_processing() {
        let mut h = harness(&continuous(), vec![], vec![], vec![], Some(false));

        h.pipeline.run().unwrap();

        assert_eq!(h.pipeline.state(), PipelineState::Stopped);
        assert_eq!(
            *h.log.borrow(),
            vec!["source released".to_string(), "display released".to_string()]
        );
        assert_eq!(h.pipeline.metrics().frames("no_match"), 0);
        assert_eq!(h.pipeline.metrics().frames("matched"), 0);
    }

    #[test]
    fn collaborators_are_released_once() {
        let mut h = harness(&continuous(), vec![], vec![], vec![], None);

        h.pipeline.run().unwrap();
        drop(h.pipeline);

        let released = h.log.borrow().iter().filter(|e| e.ends_with("released")).count();
        assert_eq!(released, 2);
    }

    #[test]
    fn recognized_plate_is_truncated_and_sent() {
        let mut h = harness(
            &continuous(),
            vec![plate_frame()],
            vec![],
            vec![Ok(" KA01AB1234 \n".to_string())],
            Some(false),
        );

        h.pipeline.run().unwrap();

        assert_eq!(*h.sent.borrow(), vec![b"1234*".to_vec()]);
        assert_eq!(h.pipeline.metrics().frames("matched"), 1);
        assert_eq!(h.pipeline.metrics().payloads_sent(), 1);
        assert!(h.log.borrow().contains(&"frame+plate".to_string()));
    }

    #[test]
    fn process_frame_reports_what_was_sent() {
        let mut h = harness(
            &continuous(),
            vec![],
            vec![],
            vec![Ok("AB12\n".to_string())],
            Some(false),
        );

        let report = h.pipeline.process_frame(&plate_frame()).unwrap();

        assert_eq!(report.outcome, "matched");
        assert_eq!(report.text.as_deref(), Some("AB12"));
        assert_eq!(report.payload.as_deref(), Some("AB12*"));
        assert!(report.sent);
        let region = report.region.unwrap();
        assert!((region.width - 300).abs() <= 3);
        assert_eq!(report.outline.len(), 4);
    }

    #[test]
    fn missing_transport_keeps_detecting() {
        let mut h = harness(
            &continuous(),
            vec![plate_frame(), plate_frame()],
            vec![],
            vec![Ok("KA01AB1234".to_string()), Ok("KA01AB1234".to_string())],
            None,
        );

        h.pipeline.run().unwrap();

        assert_eq!(h.ocr_calls(), 2);
        assert_eq!(h.pipeline.metrics().frames("matched"), 2);
        assert_eq!(h.pipeline.metrics().payloads_sent(), 0);
    }

    #[test]
    fn ocr_failure_skips_only_that_frame() {
        let mut h = harness(
            &continuous(),
            vec![plate_frame(), plate_frame()],
            vec![],
            vec![
                Err(PlateError::Ocr("engine crashed".to_string())),
                Ok("AB12".to_string()),
            ],
            Some(false),
        );

        h.pipeline.run().unwrap();

        assert_eq!(*h.sent.borrow(), vec![b"AB12*".to_vec()]);
        assert_eq!(h.pipeline.metrics().ocr_failures(), 1);
    }

    #[test]
    fn blank_text_is_not_sent() {
        let mut h = harness(
            &continuous(),
            vec![plate_frame()],
            vec![],
            vec![Ok("  \n".to_string())],
            Some(false),
        );

        h.pipeline.run().unwrap();

        assert!(h.sent.borrow().is_empty());
    }

    #[test]
    fn frames_without_plate_never_reach_ocr() {
        let mut h = harness(
            &continuous(),
            vec![black_frame(), black_frame()],
            vec![],
            vec![],
            Some(false),
        );

        h.pipeline.run().unwrap();

        assert_eq!(h.ocr_calls(), 0);
        assert_eq!(h.pipeline.metrics().frames("no_match"), 2);
    }

    #[test]
    fn failing_transport_does_not_stop_the_loop() {
        let mut h = harness(
            &continuous(),
            vec![plate_frame(), plate_frame()],
            vec![],
            vec![Ok("AB12".to_string()), Ok("CD34".to_string())],
            Some(true),
        );

        h.pipeline.run().unwrap();

        assert_eq!(h.pipeline.metrics().send_failures(), 2);
        assert_eq!(h.ocr_calls(), 2);
    }

    #[test]
    fn quit_key_stops_continuous_mode() {
        let mut h = harness(
            &continuous(),
            vec![black_frame(), black_frame(), black_frame()],
            vec![Some('q')],
            vec![],
            None,
        );

        h.pipeline.run().unwrap();

        assert_eq!(h.pipeline.metrics().frames("no_match"), 1);
        assert_eq!(h.pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn on_demand_processes_only_when_triggered() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("detected_plate.jpg");
        let mut h = harness(
            &on_demand(snapshot.clone()),
            vec![plate_frame(), plate_frame(), plate_frame(), plate_frame()],
            vec![None, Some('c'), Some('q')],
            vec![Ok("MH12DE1433\n".to_string())],
            Some(false),
        );

        h.pipeline.run().unwrap();

        assert_eq!(h.ocr_calls(), 1);
        assert_eq!(*h.sent.borrow(), vec![b"MH12DE1433\n".to_vec()]);
        assert!(h.log.borrow().contains(&"text:MH12DE1433".to_string()));
        assert!(snapshot.exists());
        // The fourth frame is never read.
        let frames_shown = h.log.borrow().iter().filter(|e| *e == "frame").count();
        assert_eq!(frames_shown, 3);
    }

    #[test]
    fn on_demand_trigger_without_plate_shows_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = harness(
            &on_demand(dir.path().join("plate.jpg")),
            vec![black_frame()],
            vec![Some('c')],
            vec![],
            Some(false),
        );

        h.pipeline.run().unwrap();

        assert!(h.log.borrow().contains(&"text:".to_string()));
        assert!(h.sent.borrow().is_empty());
    }
}
