//! Recorded page sessions.
//! A recording is a JSON file of timed steps captured from a live page: DOM
//! states, the mutation events that accompanied them and any popup messages.
//! `feed` pushes them into a session channel, either as fast as possible
//! (timestamps still drive the throttle) or paced in real time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::config::{ControlMessage, DetectorConfig, Settings};
use crate::detector::PageEvent;
use crate::dom::Document;
use crate::session::SessionInput;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Step {
    /// Milliseconds since the start of the recording.
    pub at_ms: u64,
    pub document: Option<Document>,
    pub event: Option<PageEvent>,
    pub control: Option<ControlMessage>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Recording {
    pub settings: Option<Settings>,
    pub detector: Option<DetectorConfig>,
    pub steps: Vec<Step>,
}

impl Recording {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse recording JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recording: {}", path.display()))?;
        Self::from_json(&raw)
    }
}

/// Converts steps to session inputs anchored at `start`. Control messages go
/// before the frame of the same step.
pub fn inputs(steps: Vec<Step>, start: Instant) -> Vec<SessionInput> {
    let mut inputs = Vec::with_capacity(steps.len() + 1);
    for step in steps {
        let at = start + Duration::from_millis(step.at_ms);
        if let Some(message) = step.control {
            inputs.push(SessionInput::Control(message));
        }
        if step.document.is_some() || step.event.is_some() {
            inputs.push(SessionInput::Frame {
                document: step.document,
                event: step.event,
                at,
            });
        }
    }
    inputs.push(SessionInput::Shutdown);
    inputs
}

/// Sends every step, then `Shutdown`. With `realtime`, waits for each frame's timestamp.
pub async fn feed(steps: Vec<Step>, tx: mpsc::Sender<SessionInput>, realtime: bool) -> Result<()> {
    let start = Instant::now();
    for input in inputs(steps, start) {
        if realtime {
            if let SessionInput::Frame { at, .. } = &input {
                tokio::time::sleep_until(tokio::time::Instant::from_std(*at)).await;
            }
        }
        tx.send(input)
            .await
            .map_err(|_| anyhow::anyhow!("session closed before the recording finished"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDING: &str = r#"{
        "settings": {"enabled": true, "particlesEnabled": true},
        "steps": [
            {"atMs": 0, "document": {"root": {"tag": "body"}}},
            {"atMs": 120, "event": "timer", "control": {"action": "setGlowIntensity", "value": 0.5}},
            {"atMs": 300, "control": {"action": "setEnabled", "value": false}}
        ]
    }"#;

    #[test]
    fn test_recording_parses() {
        let rec = Recording::from_json(RECORDING).unwrap();
        assert!(rec.settings.as_ref().unwrap().particles_enabled);
        assert!(rec.detector.is_none());
        assert_eq!(rec.steps.len(), 3);
        assert_eq!(rec.steps[1].event, Some(PageEvent::Timer));
    }

    #[test]
    fn test_inputs_ordering() {
        let rec = Recording::from_json(RECORDING).unwrap();
        let start = Instant::now();
        let inputs = inputs(rec.steps, start);
        assert_eq!(inputs.len(), 5);
        assert!(matches!(inputs[0], SessionInput::Frame { event: None, .. }));
        assert!(matches!(inputs[1], SessionInput::Control(ControlMessage::SetGlowIntensity { .. })));
        match &inputs[2] {
            SessionInput::Frame { at, event, document } => {
                assert_eq!(*at, start + Duration::from_millis(120));
                assert_eq!(event, &Some(PageEvent::Timer));
                assert!(document.is_none());
            }
            other => panic!("unexpected input {other:?}"),
        }
        assert!(matches!(inputs[3], SessionInput::Control(ControlMessage::SetEnabled { value: false })));
        assert_eq!(inputs[4], SessionInput::Shutdown);
    }

    #[test]
    fn test_bad_recording_is_an_error() {
        assert!(Recording::from_json("{\"steps\": 3}").is_err());
        let missing = Recording::load(Path::new("/definitely/not/here.json"));
        assert!(missing.unwrap_err().to_string().contains("Failed to read recording"));
    }

    #[tokio::test]
    async fn test_feed_reports_closed_session() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let steps = vec![Step::default()];
        assert!(feed(steps, tx, false).await.is_err());
    }
}
