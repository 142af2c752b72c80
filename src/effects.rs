//! Effect dispatcher seam and the particle/crack simulation behind it.
//! The detector's job ends at `EffectSink::dispatch`. `EffectLayer` is the
//! stock sink: it spawns ember particles and a spreading crack at the
//! destination and steps them frame by frame. Drawing is left to whatever
//! owns the canvas; this only tracks positions, sizes and remaining life.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shakmaty::Square;
use std::f64::consts::PI;

use crate::config::Settings;

const PARTICLES_PER_MOVE: usize = 15;
const PALETTE: [&str; 4] = ["#ff6b35", "#ff9f1c", "#ffbe0b", "#ffffff"];
const GRAVITY: f64 = 0.15;
const FRICTION: f64 = 0.98;
const SHRINK: f64 = 0.97;
const CRACK_DECAY: f64 = 0.008;

/// What the detector hands over for one emitted move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dispatch {
    pub square: Option<Square>,
    pub is_capture: bool,
    /// Board-relative pixel center of `square`, when the geometry is known.
    pub position: Option<(f64, f64)>,
}

pub trait EffectSink {
    fn dispatch(&mut self, dispatch: &Dispatch);

    /// Settings changed (toggles, glow).
    fn configure(&mut self, _settings: &Settings) {}

    /// Board edge length in pixels, for center placement.
    fn set_board_size(&mut self, _size: f64) {}

    /// Drop everything in flight (detector torn down).
    fn clear(&mut self) {}
}

/// Recording sink, handy for tests and dry runs.
impl EffectSink for Vec<Dispatch> {
    fn dispatch(&mut self, dispatch: &Dispatch) {
        self.push(*dispatch);
    }
}

// *************** Particles ***************

#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub life: f64,
    pub decay: f64,
    pub size: f64,
    pub color: &'static str,
}

impl Particle {
    fn spawn(rng: &mut StdRng, x: f64, y: f64, glow: f64) -> Self {
        Self {
            x,
            y,
            vx: (rng.random::<f64>() - 0.5) * 8.0,
            vy: (rng.random::<f64>() - 0.5) * 8.0,
            life: 1.0,
            decay: 0.02 + rng.random::<f64>() * 0.02,
            size: (2.0 + rng.random::<f64>() * 4.0) * glow,
            color: PALETTE[rng.random_range(0..PALETTE.len())],
        }
    }

    pub fn update(&mut self) {
        self.x += self.vx;
        self.y += self.vy;
        self.vy += GRAVITY;
        self.vx *= FRICTION;
        self.life -= self.decay;
        self.size *= SHRINK;
    }

    pub fn is_dead(&self) -> bool {
        self.life <= 0.0 || self.size < 0.5
    }
}

// *************** Cracks ***************

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// A few jagged branches radiating from one point, fading slowly.
#[derive(Clone, Debug, PartialEq)]
pub struct Crack {
    pub x: f64,
    pub y: f64,
    pub branches: Vec<Vec<Segment>>,
    pub life: f64,
}

impl Crack {
    fn spawn(rng: &mut StdRng, x: f64, y: f64) -> Self {
        let branch_count = rng.random_range(3..=5);
        let branches = (0..branch_count)
            .map(|b| {
                let mut angle = (2.0 * PI / branch_count as f64) * b as f64 + (rng.random::<f64>() - 0.5) * 0.5;
                let length = 30.0 + rng.random::<f64>() * 40.0;
                let seg_count = rng.random_range(3..=5);
                let seg_len = length / seg_count as f64;
                let (mut cx, mut cy) = (x, y);
                let mut segments = Vec::with_capacity(seg_count);
                for _ in 0..seg_count {
                    let (nx, ny) = (cx + angle.cos() * seg_len, cy + angle.sin() * seg_len);
                    segments.push(Segment { x1: cx, y1: cy, x2: nx, y2: ny });
                    (cx, cy) = (nx, ny);
                    angle += (rng.random::<f64>() - 0.5) * 0.8;
                }
                segments
            })
            .collect();
        Self { x, y, branches, life: 1.0 }
    }

    pub fn update(&mut self) {
        self.life -= CRACK_DECAY;
    }

    pub fn is_dead(&self) -> bool {
        self.life <= 0.0
    }
}

// *************** Layer ***************

pub struct EffectLayer {
    board_size: f64,
    particles_enabled: bool,
    cracks_enabled: bool,
    glow: f64,
    particles: Vec<Particle>,
    cracks: Vec<Crack>,
    rng: StdRng,
}

impl EffectLayer {
    pub fn new(settings: &Settings, board_size: f64) -> Self {
        Self::with_rng(settings, board_size, StdRng::from_os_rng())
    }

    /// Deterministic layer for tests and replays.
    pub fn with_seed(settings: &Settings, board_size: f64, seed: u64) -> Self {
        Self::with_rng(settings, board_size, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: &Settings, board_size: f64, rng: StdRng) -> Self {
        let mut layer = Self {
            board_size,
            particles_enabled: false,
            cracks_enabled: false,
            glow: 1.0,
            particles: Vec::new(),
            cracks: Vec::new(),
            rng,
        };
        layer.configure(settings);
        layer
    }

    pub fn spawn_at(&mut self, x: f64, y: f64) {
        if self.particles_enabled {
            for _ in 0..PARTICLES_PER_MOVE {
                let particle = Particle::spawn(&mut self.rng, x, y, self.glow);
                self.particles.push(particle);
            }
        }
        if self.cracks_enabled {
            let crack = Crack::spawn(&mut self.rng, x, y);
            self.cracks.push(crack);
        }
    }

    /// Advances one frame and drops whatever has faded out.
    pub fn tick(&mut self) {
        self.particles.iter_mut().for_each(Particle::update);
        self.particles.retain(|p| !p.is_dead());
        self.cracks.iter_mut().for_each(Crack::update);
        self.cracks.retain(|c| !c.is_dead());
    }

    pub fn is_idle(&self) -> bool {
        self.particles.is_empty() && self.cracks.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn cracks(&self) -> &[Crack] {
        &self.cracks
    }
}

impl EffectSink for EffectLayer {
    fn dispatch(&mut self, dispatch: &Dispatch) {
        let (x, y) = dispatch
            .position
            .unwrap_or((self.board_size / 2.0, self.board_size / 2.0));
        self.spawn_at(x, y);
    }

    fn configure(&mut self, settings: &Settings) {
        self.particles_enabled = settings.enabled && settings.particles_on();
        self.cracks_enabled = settings.enabled && settings.cracks_enabled;
        self.glow = settings.glow_intensity;
    }

    fn set_board_size(&mut self, size: f64) {
        self.board_size = size;
    }

    fn clear(&mut self) {
        self.particles.clear();
        self.cracks.clear();
    }
}
