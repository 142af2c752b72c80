//! Config module.
//! Two halves:
//! - `Settings`: the extension's key-value settings as the popup stores them
//!   (camelCase JSON), partial `SettingsChange` updates mirroring storage change
//!   notifications, and `ControlMessage`s sent from the popup.
//! - `DetectorConfig`: selectors and timing for the detection pipeline.
//!
//! A missing or broken settings file is never fatal: it is logged and defaults apply.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::dom::Selector;
use crate::error::{DetectResult, SettingsError};

pub const GLOW_MIN: f64 = 0.1;
pub const GLOW_MAX: f64 = 1.5;

// *************** Settings ***************

/// Which pieces get the glow treatment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveTarget {
    #[default]
    All,
    Royal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnabledFeatures {
    pub animation: bool,
    pub particles: bool,
    pub tournament: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub enabled: bool,
    pub active_skin: Option<String>,
    pub active_effect: Option<String>,
    pub active_target: ActiveTarget,
    pub board_style: Option<String>,
    pub glow_intensity: f64,
    pub cracks_enabled: bool,
    pub particles_enabled: bool,
    pub enabled_features: EnabledFeatures,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: false,
            active_skin: None,
            active_effect: None,
            active_target: ActiveTarget::All,
            board_style: None,
            glow_intensity: 1.0,
            cracks_enabled: false,
            particles_enabled: false,
            enabled_features: EnabledFeatures::default(),
        }
    }
}

/// Partial update; `None` leaves the field alone.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsChange {
    pub enabled: Option<bool>,
    pub active_skin: Option<String>,
    pub active_effect: Option<String>,
    pub active_target: Option<ActiveTarget>,
    pub board_style: Option<String>,
    pub glow_intensity: Option<f64>,
    pub cracks_enabled: Option<bool>,
    pub particles_enabled: Option<bool>,
    pub enabled_features: Option<EnabledFeatures>,
}

/// Messages from the popup, tagged by `action`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    SetGlowIntensity { value: f64 },
    SetEnabled { value: bool },
    SettingsChanged { changes: SettingsChange },
}

pub fn clamp_glow(value: f64) -> f64 {
    if value.is_nan() {
        return 1.0;
    }
    value.clamp(GLOW_MIN, GLOW_MAX)
}

impl Settings {
    /// Reads and parses a settings file.
    pub fn try_load(path: &Path) -> Result<Settings, SettingsError> {
        let raw = std::fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&raw)?;
        settings.glow_intensity = clamp_glow(settings.glow_intensity);
        Ok(settings)
    }

    /// Like `try_load`, but logs the failure and returns defaults.
    pub fn load(path: &Path) -> Settings {
        match Self::try_load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "settings unreadable, using defaults");
                Settings::default()
            }
        }
    }

    /// The one gate the detection pipeline reads.
    pub fn effects_active(&self) -> bool {
        self.enabled && (self.cracks_enabled || self.particles_enabled || self.enabled_features.particles)
    }

    pub fn particles_on(&self) -> bool {
        self.particles_enabled || self.enabled_features.particles
    }

    pub fn apply(&mut self, change: &SettingsChange) {
        if let Some(enabled) = change.enabled {
            self.enabled = enabled;
            if !enabled {
                self.cracks_enabled = false;
                self.particles_enabled = false;
            }
        }
        if let Some(skin) = &change.active_skin {
            self.active_skin = Some(skin.clone());
        }
        if let Some(effect) = &change.active_effect {
            self.active_effect = Some(effect.clone());
        }
        if let Some(target) = change.active_target {
            self.active_target = target;
        }
        if let Some(style) = &change.board_style {
            self.board_style = Some(style.clone());
        }
        if let Some(glow) = change.glow_intensity {
            self.glow_intensity = clamp_glow(glow);
        }
        if let Some(cracks) = change.cracks_enabled {
            self.cracks_enabled = cracks;
        }
        if let Some(particles) = change.particles_enabled {
            self.particles_enabled = particles;
        }
        if let Some(features) = change.enabled_features {
            self.enabled_features = features;
        }
    }

    pub fn handle(&mut self, message: &ControlMessage) {
        match message {
            ControlMessage::SetGlowIntensity { value } => {
                self.glow_intensity = clamp_glow(*value);
            }
            ControlMessage::SetEnabled { value } => self.apply(&SettingsChange {
                enabled: Some(*value),
                ..Default::default()
            }),
            ControlMessage::SettingsChanged { changes } => self.apply(changes),
        }
    }
}

// *************** Detector config ***************

/// Selectors and timing for the detector. Selector lists are ordered: the
/// first candidate that matches wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectorConfig {
    pub board_selectors: Vec<String>,
    pub piece_selector: String,
    pub highlight_selectors: Vec<String>,
    pub move_list_selectors: Vec<String>,
    /// Attribute mutations on elements with these classes trigger a pass.
    pub watched_classes: Vec<String>,
    pub throttle_ms: u64,
    pub attach_retry_ms: u64,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            board_selectors: strings(&["wc-chess-board", "chess-board", ".board", "[class*='board-layout']"]),
            piece_selector: ".piece".to_string(),
            highlight_selectors: strings(&[".highlight", ".last-move"]),
            move_list_selectors: strings(&[
                "wc-simple-move-list",
                "vertical-move-list",
                ".move-list",
                "[class*='move-list']",
                ".moves",
            ]),
            watched_classes: strings(&["piece", "highlight", "last-move"]),
            throttle_ms: 250,
            attach_retry_ms: 2000,
        }
    }
}

impl DetectorConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn attach_retry(&self) -> Duration {
        Duration::from_millis(self.attach_retry_ms)
    }

    pub fn board_selectors(&self) -> DetectResult<Vec<Selector>> {
        Selector::parse_all(self.board_selectors.as_slice())
    }

    pub fn piece_selector(&self) -> DetectResult<Selector> {
        Selector::parse(&self.piece_selector)
    }

    pub fn highlight_selectors(&self) -> DetectResult<Vec<Selector>> {
        Selector::parse_all(self.highlight_selectors.as_slice())
    }

    pub fn move_list_selectors(&self) -> DetectResult<Vec<Selector>> {
        Selector::parse_all(self.move_list_selectors.as_slice())
    }
}
