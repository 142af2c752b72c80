//! Page session driver.
//! Everything reaches the detector through one mpsc channel and is handled on
//! one task, so detection stays single-threaded however the inputs are
//! produced. The session owns the live document and the settings, attaches
//! the detector when effects are switched on (retrying while the board is
//! missing) and tears it down when they are switched off.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{ControlMessage, DetectorConfig, Settings};
use crate::detector::{Detector, OVERLAY_MARKER, PageEvent};
use crate::dom::Document;
use crate::effects::EffectSink;
use crate::error::DetectResult;
use crate::reconcile::MoveEvent;

#[derive(Clone, Debug, PartialEq)]
pub enum SessionInput {
    /// The page changed: optionally a new DOM state, optionally an event to route.
    Frame {
        document: Option<Document>,
        event: Option<PageEvent>,
        at: Instant,
    },
    Control(ControlMessage),
    Shutdown,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionReport {
    pub emitted: Vec<MoveEvent>,
    pub passes: u64,
    pub suppressed: u64,
    pub throttled: u64,
    pub skipped: u64,
    pub attach_attempts: u64,
}

pub struct Session<S: EffectSink> {
    settings: Settings,
    detector: Detector,
    document: Document,
    sink: S,
    attach_retry: Duration,
    next_attach_at: Option<Instant>,
    last_at: Option<Instant>,
    report: SessionReport,
}

impl<S: EffectSink> Session<S> {
    pub fn new(settings: Settings, config: &DetectorConfig, mut sink: S) -> DetectResult<Self> {
        sink.configure(&settings);
        Ok(Self {
            settings,
            detector: Detector::new(config)?,
            document: Document::default(),
            sink,
            attach_retry: config.attach_retry(),
            next_attach_at: None,
            last_at: None,
            report: SessionReport::default(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Handles one input. Returns false once the session should stop.
    pub fn step(&mut self, input: SessionInput) -> bool {
        match input {
            SessionInput::Frame { document, event, at } => {
                self.last_at = Some(at);
                if let Some(document) = document {
                    self.replace_document(document);
                }
                self.sync_lifecycle(at);
                if let Some(event) = event {
                    if let Some(move_event) = self.detector.handle(&mut self.document, &event, at, &mut self.sink) {
                        self.report.emitted.push(move_event);
                    }
                }
                true
            }
            SessionInput::Control(message) => {
                debug!(?message, "control message");
                self.settings.handle(&message);
                self.sink.configure(&self.settings);
                let now = self.last_at.unwrap_or_else(Instant::now);
                self.sync_lifecycle(now);
                true
            }
            SessionInput::Shutdown => false,
        }
    }

    /// Consumes inputs until `Shutdown` or the channel closes, then tears down.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SessionInput>) -> SessionReport {
        while let Some(input) = rx.recv().await {
            if !self.step(input) {
                break;
            }
        }
        self.finish()
    }

    pub fn finish(mut self) -> SessionReport {
        if self.detector.is_attached() {
            info!(emitted = self.report.emitted.len(), "session finished");
        }
        self.detector.teardown(&mut self.document);
        self.sink.clear();
        let stats = self.detector.stats();
        SessionReport {
            passes: stats.passes,
            suppressed: stats.suppressed,
            throttled: stats.throttled,
            skipped: stats.skipped,
            ..self.report
        }
    }

    /// The host re-rendered. Our overlay survives a re-render only if the page kept it,
    /// so carry it over onto the new board when the board is still where we left it.
    fn replace_document(&mut self, document: Document) {
        let overlay = self.detector.board().and_then(|loc| {
            let board = self.document.get(&loc.path)?;
            board
                .children
                .iter()
                .find(|el| el.attr(OVERLAY_MARKER).is_some())
                .cloned()
                .map(|el| (loc.path.clone(), el))
        });
        self.document = document;
        if let Some((path, el)) = overlay {
            if let Some(board) = self.document.get_mut(&path) {
                if !board.children.iter().any(|c| c.attr(OVERLAY_MARKER).is_some()) {
                    board.children.push(el);
                }
            }
        }
    }

    fn sync_lifecycle(&mut self, now: Instant) {
        let active = self.settings.effects_active();
        if !active {
            if self.detector.is_attached() {
                self.detector.teardown(&mut self.document);
                self.sink.clear();
            }
            self.next_attach_at = None;
            return;
        }
        if self.detector.is_attached() {
            return;
        }
        if self.next_attach_at.is_some_and(|due| now < due) {
            return;
        }

        self.report.attach_attempts += 1;
        match self.detector.attach(&mut self.document) {
            Ok(location) => {
                self.sink.set_board_size(location.geometry.size);
                self.next_attach_at = None;
            }
            Err(e) => {
                debug!(error = %e, retry_in = ?self.attach_retry, "attach failed");
                self.next_attach_at = Some(now + self.attach_retry);
            }
        }
    }
}
