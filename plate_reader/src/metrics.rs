use crate::plate_detection::plate_locator::LocateOutcome;

use log::info;

use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;

const OUTCOMES: [&str; 3] = ["matched", "no_match", "error"];

/// Counters for one pipeline run, kept in their own registry.
pub struct PipelineMetrics {
    registry: Registry,
    frames: IntCounterVec,
    ocr_failures: IntCounter,
    payloads_sent: IntCounter,
    send_failures: IntCounter,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("plate_reader".to_string()), None)?;

        let frames = IntCounterVec::new(
            Opts::new("frames_total", "Frames run through the plate locator"),
            &["outcome"],
        )?;
        let ocr_failures = IntCounter::new("ocr_failures_total", "OCR invocations that failed")?;
        let payloads_sent =
            IntCounter::new("payloads_sent_total", "Plates written to the serial link")?;
        let send_failures = IntCounter::new("send_failures_total", "Serial writes that failed")?;

        registry.register(Box::new(frames.clone()))?;
        registry.register(Box::new(ocr_failures.clone()))?;
        registry.register(Box::new(payloads_sent.clone()))?;
        registry.register(Box::new(send_failures.clone()))?;

        Ok(Self {
            registry,
            frames,
            ocr_failures,
            payloads_sent,
            send_failures,
        })
    }

    pub fn observe(&self, outcome: &LocateOutcome) {
        self.frames.with_label_values(&[outcome.label()]).inc();
    }

    pub fn ocr_failed(&self) {
        self.ocr_failures.inc();
    }

    pub fn payload_sent(&self) {
        self.payloads_sent.inc();
    }

    pub fn send_failed(&self) {
        self.send_failures.inc();
    }

    pub fn frames(&self, outcome: &str) -> u64 {
        self.frames.with_label_values(&[outcome]).get()
    }

    pub fn ocr_failures(&self) -> u64 {
        self.ocr_failures.get()
    }

    pub fn payloads_sent(&self) -> u64 {
        self.payloads_sent.get()
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.get()
    }

    /// Prometheus text exposition of every counter.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            return format!("# metrics unavailable: {e}\n");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn log_summary(&self) {
        let [matched, no_match, error] = OUTCOMES.map(|outcome| self.frames(outcome));
        info!(
            "Frames: {} matched, {} empty, {} failed; {} OCR failures; {} sent, {} send failures",
            matched,
            no_match,
            error,
            self.ocr_failures(),
            self.payloads_sent(),
            self.send_failures()
        );
    }
}
