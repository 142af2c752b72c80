//! Page-session detector.
//! Owns everything that used to be ambient page state: the cached board
//! location, the last snapshot, the reconciler memory, the throttle and the
//! observer switch. One `Detector` per page session:
//!
//! 1. `attach` finds the board, drops the effect overlay in, takes a baseline.
//! 2. `handle` routes each `PageEvent` through locate -> snapshot + move log +
//!    highlights -> diff -> reconcile, and dispatches at most one effect.
//! 3. `teardown` disconnects and removes every node the detector added.
//!
//! No stage fails a pass outright: a missing board or an ambiguous diff just
//! skips the cycle and the next mutation tries again.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use crate::config::DetectorConfig;
use crate::diff::diff_snapshots;
use crate::dom::{Document, Element, MutationBatch};
use crate::effects::{Dispatch, EffectSink};
use crate::error::{DetectError, DetectResult};
use crate::locate::{BoardLocation, BoardLocator};
use crate::movelist::{HighlightReader, MoveListReader};
use crate::reconcile::{MoveEvent, Reconciler, Signals, Verdict};
use crate::snapshot::{BoardSnapshot, SnapshotBuilder, default_resolvers};
use crate::throttle::Throttle;

/// Marks every node the detector inserts into the host page.
pub const OVERLAY_MARKER: &str = "data-skinwatch";
pub const OVERLAY_ID: &str = "skinwatch-fx";

/// Inbound events routed to the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageEvent {
    Mutation(MutationBatch),
    MoveListChanged,
    Timer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObserverState {
    Detached,
    Observing,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub passes: u64,
    pub throttled: u64,
    pub skipped: u64,
    pub emitted: u64,
    pub suppressed: u64,
}

fn is_overlay(el: &Element) -> bool {
    el.attr(OVERLAY_MARKER).is_some()
}

fn overlay() -> Element {
    Element::new("canvas")
        .with_id(OVERLAY_ID)
        .with_attr(OVERLAY_MARKER, "effects")
        .with_attr(
            "style",
            "position: absolute; top: 0; left: 0; width: 100%; height: 100%; pointer-events: none; z-index: 1000;",
        )
}

pub struct Detector {
    locator: BoardLocator,
    snapshots: SnapshotBuilder,
    move_list: MoveListReader,
    highlights: HighlightReader,
    watched: Vec<String>,
    throttle: Throttle,
    reconciler: Reconciler,
    state: ObserverState,
    board: Option<BoardLocation>,
    board_stale: bool,
    last_snapshot: Option<BoardSnapshot>,
    pending: bool,
    stats: DetectorStats,
}

impl Detector {
    pub fn new(config: &DetectorConfig) -> DetectResult<Self> {
        Ok(Self {
            locator: BoardLocator::new(config.board_selectors()?),
            snapshots: SnapshotBuilder::new(config.piece_selector()?, default_resolvers()),
            move_list: MoveListReader::new(config.move_list_selectors()?),
            highlights: HighlightReader::new(config.highlight_selectors()?),
            watched: config.watched_classes.clone(),
            throttle: Throttle::new(config.throttle()),
            reconciler: Reconciler::new(),
            state: ObserverState::Detached,
            board: None,
            board_stale: false,
            last_snapshot: None,
            pending: false,
            stats: DetectorStats::default(),
        })
    }

    pub fn state(&self) -> ObserverState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.state == ObserverState::Observing
    }

    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }

    pub fn board(&self) -> Option<&BoardLocation> {
        self.board.as_ref()
    }

    pub fn last_snapshot(&self) -> Option<&BoardSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Starts observing. Fails with `BoardNotFound` while the page has no board;
    /// callers retry later. Attaching twice is a no-op.
    pub fn attach(&mut self, doc: &mut Document) -> DetectResult<BoardLocation> {
        if let (ObserverState::Observing, Some(board)) = (self.state, &self.board) {
            return Ok(board.clone());
        }

        let location = self.locator.locate(doc)?;
        self.ensure_overlay(doc, &location);

        let board = doc.get(&location.path).ok_or(DetectError::BoardNotFound)?;
        let geometry = location.geometry;
        let baseline = self.snapshots.build(board, &geometry);

        // Prime the reconciler with what the page already shows, so the move
        // that was on screen before we arrived does not fire.
        let initial = Signals {
            candidate: None,
            token: self.move_list.latest_token(doc),
            flagged: self.highlights.flagged_squares(board, &geometry, self.snapshots.resolvers()),
        };
        self.reconciler.reconcile(&initial);

        info!(
            path = ?location.path,
            orientation = %location.orientation(),
            pieces = baseline.len(),
            fen = %baseline.board_fen(),
            "detector attached"
        );
        self.last_snapshot = Some(baseline);
        self.board = Some(location.clone());
        self.board_stale = false;
        self.state = ObserverState::Observing;
        Ok(location)
    }

    /// Disconnects and removes every node the detector added. Returns the number removed.
    pub fn teardown(&mut self, doc: &mut Document) -> usize {
        let removed = doc.remove_where(is_overlay);
        if self.state == ObserverState::Observing {
            info!(removed, "detector torn down");
        }
        self.state = ObserverState::Detached;
        self.board = None;
        self.board_stale = false;
        self.last_snapshot = None;
        self.pending = false;
        self.reconciler.reset();
        self.throttle.reset();
        removed
    }

    /// Routes one event. Returns the move event if one was emitted (and dispatched).
    pub fn handle(
        &mut self,
        doc: &mut Document,
        event: &PageEvent,
        now: Instant,
        sink: &mut dyn EffectSink,
    ) -> Option<MoveEvent> {
        if self.state == ObserverState::Detached {
            return None;
        }

        match event {
            PageEvent::Mutation(batch) => {
                if batch.is_structural() {
                    self.board_stale = true;
                }
                if !batch.is_relevant(&self.watched) {
                    return None;
                }
            }
            PageEvent::MoveListChanged => {}
            PageEvent::Timer => {
                if !self.pending {
                    return None;
                }
            }
        }

        if !self.throttle.admit(now) {
            self.pending = true;
            self.stats.throttled += 1;
            return None;
        }
        self.pending = false;
        self.run_pass(doc, sink)
    }

    fn current_board(&mut self, doc: &Document) -> DetectResult<BoardLocation> {
        if !self.board_stale {
            if let Some(cached) = &self.board {
                if self.locator.is_current(doc, cached) {
                    return Ok(cached.clone());
                }
            }
        }

        let located = self.locator.locate(doc)?;
        if self.board.as_ref().is_some_and(|b| b != &located) {
            // Another element, a flip or a resize all change the square mapping.
            info!(
                path = ?located.path,
                orientation = %located.orientation(),
                size = located.geometry.size,
                "board changed, resetting baseline"
            );
            self.last_snapshot = None;
        }
        self.board = Some(located.clone());
        self.board_stale = false;
        Ok(located)
    }

    fn ensure_overlay(&self, doc: &mut Document, location: &BoardLocation) {
        if let Some(board) = doc.get_mut(&location.path) {
            if !board.children.iter().any(is_overlay) {
                board.children.push(overlay());
            }
        }
    }

    fn run_pass(&mut self, doc: &mut Document, sink: &mut dyn EffectSink) -> Option<MoveEvent> {
        self.stats.passes += 1;

        let location = match self.current_board(doc) {
            Ok(location) => location,
            Err(e) => {
                debug!(error = %e, "skipping detection cycle");
                self.stats.skipped += 1;
                return None;
            }
        };
        self.ensure_overlay(doc, &location);

        let board = doc.get(&location.path)?;
        let geometry = location.geometry;
        let snapshot = self.snapshots.build(board, &geometry);
        let flagged = self
            .highlights
            .flagged_squares(board, &geometry, self.snapshots.resolvers());
        let token = self.move_list.latest_token(doc);
        let candidate = self
            .last_snapshot
            .as_ref()
            .and_then(|prev| diff_snapshots(prev, &snapshot));

        debug!(fen = %snapshot.board_fen(), ?candidate, %token, ?flagged, "detection pass");
        self.last_snapshot = Some(snapshot);

        let signals = Signals {
            candidate,
            token,
            flagged,
        };
        match self.reconciler.reconcile(&signals) {
            Verdict::Suppress => {
                self.stats.suppressed += 1;
                None
            }
            Verdict::Emit(event) => {
                self.stats.emitted += 1;
                let position = event.destination.and_then(|sq| geometry.square_center(sq));
                info!(
                    destination = ?event.destination,
                    capture = event.is_capture,
                    key = %event.trigger_key,
                    "move detected"
                );
                sink.dispatch(&Dispatch {
                    square: event.destination,
                    is_capture: event.is_capture,
                    position,
                });
                Some(event)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{MutationRecord, Rect};
    use crate::locate::Orientation;
    use shakmaty::{Piece, Square};
    use std::time::Duration;

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    fn piece(code: &str, square: &str) -> Element {
        Element::new("div")
            .with_class("piece")
            .with_class(code)
            .with_class(&format!("square-{square}"))
    }

    fn page(pieces: &[(&str, &str)], moves: &str, highlights: &[&str]) -> Document {
        let mut board = Element::new("wc-chess-board").with_rect(Rect::new(0.0, 0.0, 480.0, 480.0));
        for sq in highlights {
            board = board.with_child(
                Element::new("div")
                    .with_class("highlight")
                    .with_class(&format!("square-{sq}")),
            );
        }
        for (code, square) in pieces {
            board = board.with_child(piece(code, square));
        }
        Document::new(
            Element::new("body")
                .with_child(board)
                .with_child(Element::new("wc-simple-move-list").with_text(moves)),
        )
    }

    /// Replaces everything under the board/move list with a new position, keeping the overlay.
    fn rerender(doc: &mut Document, next: &Document) {
        let overlay: Vec<Element> = doc.root.children[0]
            .children
            .iter()
            .filter(|el| is_overlay(el))
            .cloned()
            .collect();
        *doc = next.clone();
        doc.root.children[0].children.extend(overlay);
    }

    fn piece_moved() -> PageEvent {
        PageEvent::Mutation(MutationBatch::new(vec![MutationRecord::attributes("class", &["piece", "wp"])]))
    }

    fn detector() -> Detector {
        Detector::new(&DetectorConfig::default()).unwrap()
    }

    #[test]
    fn test_attach_fails_without_board() {
        let mut doc = Document::new(Element::new("body"));
        let mut det = detector();
        assert_eq!(det.attach(&mut doc), Err(DetectError::BoardNotFound));
        assert!(!det.is_attached());
        assert_eq!(doc, Document::new(Element::new("body")));
    }

    #[test]
    fn test_detached_detector_ignores_events() {
        let mut doc = page(&[("wp", "e2")], "", &[]);
        let mut det = detector();
        let mut sink: Vec<Dispatch> = Vec::new();
        assert!(det.handle(&mut doc, &piece_moved(), Instant::now(), &mut sink).is_none());
        assert_eq!(det.stats().passes, 0);
    }

    #[test]
    fn test_detects_move_and_dispatches_square_center() {
        let mut doc = page(&[("wp", "e2"), ("bk", "e8")], "", &[]);
        let mut det = detector();
        det.attach(&mut doc).unwrap();

        rerender(&mut doc, &page(&[("wp", "e4"), ("bk", "e8")], "1. e4", &["e2", "e4"]));
        let mut sink: Vec<Dispatch> = Vec::new();
        let event = det.handle(&mut doc, &piece_moved(), Instant::now(), &mut sink).unwrap();

        assert_eq!(event.destination, Some(sq("e4")));
        assert!(!event.is_capture);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].position, Some((270.0, 270.0)));
    }

    #[test]
    fn test_capture_detected_through_pipeline() {
        let mut doc = page(&[("wp", "e4"), ("bp", "d5")], "1. e4", &[]);
        let mut det = detector();
        det.attach(&mut doc).unwrap();

        rerender(&mut doc, &page(&[("wp", "d5")], "1. e4 d5", &[]));
        let mut sink: Vec<Dispatch> = Vec::new();
        let t0 = Instant::now();
        let event = det.handle(&mut doc, &piece_moved(), t0, &mut sink).unwrap();
        assert_eq!(event.destination, Some(sq("d5")));
        assert!(event.is_capture);
    }

    #[test]
    fn test_position_on_screen_at_attach_does_not_fire() {
        let mut doc = page(&[("wp", "e4")], "1. e4", &["e2", "e4"]);
        let mut det = detector();
        det.attach(&mut doc).unwrap();
        let mut sink: Vec<Dispatch> = Vec::new();
        assert!(det.handle(&mut doc, &piece_moved(), Instant::now(), &mut sink).is_none());
        assert!(sink.is_empty());
        assert_eq!(det.stats().suppressed, 1);
    }

    #[test]
    fn test_burst_is_throttled_and_flushed_by_timer() {
        let mut doc = page(&[("wn", "g1")], "", &[]);
        let mut det = detector();
        det.attach(&mut doc).unwrap();
        let mut sink: Vec<Dispatch> = Vec::new();
        let t0 = Instant::now();

        // First record of the burst runs a pass against the half-rendered page.
        assert!(det.handle(&mut doc, &piece_moved(), t0, &mut sink).is_none());

        // Rest of the burst lands inside the window.
        rerender(&mut doc, &page(&[("wn", "f3")], "1. Nf3", &[]));
        assert!(det.handle(&mut doc, &piece_moved(), t0 + Duration::from_millis(40), &mut sink).is_none());
        assert!(det.handle(&mut doc, &piece_moved(), t0 + Duration::from_millis(80), &mut sink).is_none());
        assert_eq!(det.stats().passes, 1);
        assert_eq!(det.stats().throttled, 2);

        // Timer inside the window still waits; after it, the pending pass runs on the current DOM.
        assert!(det.handle(&mut doc, &PageEvent::Timer, t0 + Duration::from_millis(100), &mut sink).is_none());
        let event = det
            .handle(&mut doc, &PageEvent::Timer, t0 + Duration::from_millis(300), &mut sink)
            .unwrap();
        assert_eq!(event.destination, Some(sq("f3")));
        assert_eq!(det.stats().passes, 2);

        // Nothing pending: timer is a no-op.
        assert!(det.handle(&mut doc, &PageEvent::Timer, t0 + Duration::from_millis(900), &mut sink).is_none());
        assert_eq!(det.stats().passes, 2);
    }

    #[test]
    fn test_irrelevant_mutations_are_ignored() {
        let mut doc = page(&[("wn", "g1")], "", &[]);
        let mut det = detector();
        det.attach(&mut doc).unwrap();
        let mut sink: Vec<Dispatch> = Vec::new();
        let clock = PageEvent::Mutation(MutationBatch::new(vec![MutationRecord::attributes("class", &["clock-running"])]));
        assert!(det.handle(&mut doc, &clock, Instant::now(), &mut sink).is_none());
        assert_eq!(det.stats().passes, 0);
    }

    #[test]
    fn test_board_disappears_then_returns() {
        let mut doc = page(&[("wp", "e2")], "", &[]);
        let mut det = detector();
        det.attach(&mut doc).unwrap();
        let mut sink: Vec<Dispatch> = Vec::new();
        let t0 = Instant::now();
        let removed = PageEvent::Mutation(MutationBatch::new(vec![MutationRecord::child_list()]));

        doc.root.children.remove(0);
        assert!(det.handle(&mut doc, &removed, t0, &mut sink).is_none());
        assert_eq!(det.stats().skipped, 1);

        // New board element under a wrapper: different path, fresh baseline, no bogus diff.
        let fresh = page(&[("wp", "e2"), ("wp", "d2")], "", &[]);
        doc.root.children.insert(0, Element::new("main").with_child(fresh.root.children[0].clone()));
        assert!(det.handle(&mut doc, &removed, t0 + Duration::from_secs(1), &mut sink).is_none());
        assert_eq!(det.board().unwrap().path.0, vec![0, 0]);
        assert_eq!(det.last_snapshot().unwrap().len(), 2);
        let board = doc.get(&det.board().unwrap().path).unwrap();
        assert_eq!(board.children.iter().filter(|el| is_overlay(el)).count(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_flip_or_resize_takes_fresh_baseline() {
        let placed = |code: &str, x: u32, y: u32| {
            Element::new("div")
                .with_class("piece")
                .with_class(code)
                .with_attr("style", &format!("transform: translate({x}px, {y}px)"))
        };
        let board = Element::new("wc-chess-board")
            .with_rect(Rect::new(0.0, 0.0, 480.0, 480.0))
            .with_child(placed("wk", 240, 420))
            .with_child(placed("bk", 240, 0));
        let mut doc = Document::new(Element::new("body").with_child(board));
        let mut det = detector();
        det.attach(&mut doc).unwrap();
        assert_eq!(det.last_snapshot().unwrap().get(sq("e1")), Some(Piece::from_char('K').unwrap()));

        let mut sink: Vec<Dispatch> = Vec::new();
        let t0 = Instant::now();
        doc.root.children[0].classes.push("flipped".to_string());
        assert!(det.handle(&mut doc, &piece_moved(), t0, &mut sink).is_none());
        assert_eq!(det.board().unwrap().orientation(), Orientation::Black);
        assert_eq!(det.last_snapshot().unwrap().get(sq("d8")), Some(Piece::from_char('K').unwrap()));

        doc.root.children[0].rect = Some(Rect::new(0.0, 0.0, 640.0, 640.0));
        assert!(det.handle(&mut doc, &piece_moved(), t0 + Duration::from_secs(1), &mut sink).is_none());
        assert_eq!(det.board().unwrap().geometry.size, 640.0);
        assert!(sink.is_empty());
        assert_eq!(det.stats().emitted, 0);
    }

    #[test]
    fn test_teardown_restores_page() {
        let original = page(&[("wp", "e2")], "1.", &[]);
        let mut doc = original.clone();
        let mut det = detector();
        det.attach(&mut doc).unwrap();
        assert_ne!(doc, original);
        assert!(det.attach(&mut doc).is_ok());
        assert_eq!(doc.root.children[0].children.iter().filter(|el| is_overlay(el)).count(), 1);

        assert_eq!(det.teardown(&mut doc), 1);
        assert_eq!(doc, original);
        assert_eq!(det.state(), ObserverState::Detached);
        assert!(det.last_snapshot().is_none());

        let mut sink: Vec<Dispatch> = Vec::new();
        assert!(det.handle(&mut doc, &piece_moved(), Instant::now(), &mut sink).is_none());
    }

    #[test]
    fn test_page_event_json() {
        let ev: PageEvent = serde_json::from_str(
            r#"{"mutation": {"records": [{"kind": "childList"}]}}"#,
        )
        .unwrap();
        assert_eq!(ev, PageEvent::Mutation(MutationBatch::new(vec![MutationRecord::child_list()])));
        let ev: PageEvent = serde_json::from_str(r#""timer""#).unwrap();
        assert_eq!(ev, PageEvent::Timer);
    }
}
