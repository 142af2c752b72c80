//! Move reconciler (stage 5 of the pipeline).
//! Merges the diff candidate, the move-log token and the page's last-move
//! highlights into one event, and suppresses repeats by comparing a composite
//! trigger key with the last one emitted.
//!
//! The key is a fingerprint, not a move identity: two different moves that
//! produce the same (destination, capture, token, highlights) collapse into one.

use regex::Regex;
use shakmaty::Square;
use std::sync::LazyLock;

use crate::diff::MoveCandidate;

static SQUARE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-h][1-8]").expect("static regex"));

/// Last algebraic square mentioned in a SAN-like token (`Nxe5+` -> e5, `e8=Q` -> e8).
pub fn square_in_token(token: &str) -> Option<Square> {
    SQUARE_RE
        .find_iter(token)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}

/// Everything one detection pass observed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signals {
    pub candidate: Option<MoveCandidate>,
    pub token: String,
    pub flagged: Vec<Square>,
}

impl Signals {
    pub fn is_empty(&self) -> bool {
        self.candidate.is_none() && self.token.is_empty() && self.flagged.is_empty()
    }
}

/// Composite dedup fingerprint: destination, capture flag, raw token, highlights.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TriggerKey(String);

impl TriggerKey {
    pub fn new(destination: Option<Square>, is_capture: bool, token: &str, flagged: &[Square]) -> Self {
        let destination = destination.map_or_else(|| "-".to_string(), |sq| sq.to_string());
        let flagged = flagged.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        TriggerKey(format!("{destination}|{is_capture}|{token}|{flagged}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reconciled, deduplicated move. `destination: None` means "somewhere on the board".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveEvent {
    pub destination: Option<Square>,
    pub is_capture: bool,
    pub trigger_key: TriggerKey,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Emit(MoveEvent),
    Suppress,
}

/// Carries the only state that survives between passes: last destination and last key.
#[derive(Clone, Debug, Default)]
pub struct Reconciler {
    last_destination: Option<Square>,
    last_key: Option<TriggerKey>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_key(&self) -> Option<&TriggerKey> {
        self.last_key.as_ref()
    }

    pub fn last_destination(&self) -> Option<Square> {
        self.last_destination
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Highlight > move-log square > diff candidate > last known destination.
    pub fn choose_destination(&self, signals: &Signals) -> Option<Square> {
        let token_sq = square_in_token(&signals.token);
        let candidate = signals.candidate.as_ref();
        let candidate_to = candidate.and_then(|c| c.to);

        if !signals.flagged.is_empty() {
            // Highlights usually mark both ends of the move; take the end the
            // other signals agree on, else the one that is not the origin.
            let origin = candidate.and_then(|c| c.from);
            return [token_sq, candidate_to]
                .into_iter()
                .flatten()
                .find(|sq| signals.flagged.contains(sq))
                .or_else(|| signals.flagged.iter().rev().copied().find(|sq| Some(*sq) != origin))
                .or_else(|| signals.flagged.last().copied());
        }

        token_sq.or(candidate_to).or(self.last_destination)
    }

    pub fn reconcile(&mut self, signals: &Signals) -> Verdict {
        if signals.is_empty() {
            return Verdict::Suppress;
        }

        let destination = self.choose_destination(signals);
        let is_capture = signals.token.contains('x') || signals.candidate.is_some_and(|c| c.is_capture);
        let key = TriggerKey::new(destination, is_capture, &signals.token, &signals.flagged);

        if destination.is_some() {
            self.last_destination = destination;
        }
        if self.last_key.as_ref() == Some(&key) {
            return Verdict::Suppress;
        }
        self.last_key = Some(key.clone());
        Verdict::Emit(MoveEvent {
            destination,
            is_capture,
            trigger_key: key,
        })
    }
}
