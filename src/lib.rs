//! Skinwatch: move detection for a re-skinned third-party chessboard.
//!
//! The host page exposes no move API, so moves are inferred from what it
//! renders. The pipeline, one stage per module:
//! 1. `locate` finds the board and its orientation
//! 2. `snapshot` reads square -> piece from the DOM
//! 3. `movelist` reads the newest move-log token and last-move highlights
//! 4. `diff` infers a candidate move from two snapshots
//! 5. `reconcile` merges the signals and suppresses repeats
//! 6. `effects` receives the reconciled event
//!
//! `detector` wires the stages into one per-page object; `session` drives it
//! from an event channel and the extension settings.

pub mod config;
pub mod detector;
pub mod diff;
pub mod dom;
pub mod effects;
pub mod error;
pub mod locate;
pub mod movelist;
pub mod reconcile;
pub mod replay;
pub mod session;
pub mod snapshot;
pub mod throttle;

pub use config::{ControlMessage, DetectorConfig, Settings, SettingsChange};
pub use detector::{Detector, PageEvent};
pub use diff::{MoveCandidate, diff_snapshots};
pub use effects::{Dispatch, EffectLayer, EffectSink};
pub use error::{DetectError, DetectResult};
pub use locate::{BoardGeometry, Orientation};
pub use reconcile::{MoveEvent, Reconciler, Signals, TriggerKey, Verdict};
pub use session::{Session, SessionInput, SessionReport};
pub use snapshot::BoardSnapshot;
