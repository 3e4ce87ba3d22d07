//! Core simulation for the glyph field: the agent arena, the per-display
//! tick pipeline, and the merge/zone/remnant mechanics every interaction
//! mode is tuned from.

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::fmt;

use glyphfield_glyph::{AudioMeasure, FeatureVector, GlyphOverride, GlyphState, NameParts, clamp01};
use glyphfield_index::{NeighborIndex, UniformGridIndex};
use ordered_float::OrderedFloat;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use smallvec::SmallVec;
use thiserror::Error;

new_key_type! {
    /// Stable handle for agents backed by a generational slot map.
    pub struct AgentId;
}

/// Convenience alias for associating side data with agents.
pub type AgentMap<T> = SecondaryMap<AgentId, T>;

/// Cell edge for the proximity grid, sized for typical merge thresholds.
const PROXIMITY_CELL_SIZE: f32 = 50.0;

/// Label shown when a participant record carries no usable name.
const ANON_LABEL: &str = "anon";

/// `p5.constrain` semantics: never panics when the bounds cross, the low
/// bound simply wins.
fn constrain(value: f32, low: f32, high: f32) -> f32 {
    value.min(high).max(low)
}

/// Log-scale normalization of a voice pitch into `[0, 1]` over the spoken
/// range 80 Hz – 2 kHz. Zero and sub-audible values map to 0.
#[must_use]
pub fn pitch_norm(pitch_hz: f32) -> f32 {
    const MIN_HZ: f32 = 80.0;
    const MAX_HZ: f32 = 2_000.0;
    if !(pitch_hz > 0.0) {
        return 0.0;
    }
    clamp01((pitch_hz.ln() - MIN_HZ.ln()) / (MAX_HZ.ln() - MIN_HZ.ln()))
}

/// Errors produced when constructing or configuring a field session.
#[derive(Debug, Error)]
pub enum FieldError {
    /// Configuration values that cannot produce a runnable session.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Errors surfaced by participant record sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The backing store could not answer; the participant may still exist.
    #[error("participant record unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Identity and time
// ---------------------------------------------------------------------------

/// Externally assigned participant identifier; opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Monotonic simulation tick counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Tick(pub u64);

impl Tick {
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Display-space position in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Per-tick velocity in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

// ---------------------------------------------------------------------------
// Participant records
// ---------------------------------------------------------------------------

/// Registration payload kept for one participant: the captured name fields,
/// the optional voice measurement, and (for older records) a pre-computed
/// feature vector that takes precedence over on-the-fly derivation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationData {
    #[serde(flatten)]
    pub name: NameParts,
    pub audio: Option<AudioMeasure>,
    pub metrics: Option<FeatureVector>,
}

/// One archived participant record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    pub timestamp: u64,
    pub data: RegistrationData,
}

/// Resolves participant records at join time.
///
/// `Ok(None)` means the id is simply unknown; the agent still joins with a
/// placeholder glyph. `Err` means the lookup itself failed and the agent
/// joins without any glyph at all.
pub trait ParticipantSource: Send {
    fn fetch(&self, id: &ParticipantId) -> Result<Option<ParticipantRecord>, SourceError>;
}

/// Source that knows no participants.
#[derive(Debug, Default)]
pub struct NullSource;

impl ParticipantSource for NullSource {
    fn fetch(&self, _id: &ParticipantId) -> Result<Option<ParticipantRecord>, SourceError> {
        Ok(None)
    }
}

fn display_label(name: &NameParts) -> String {
    let first = name.first.trim();
    if !first.is_empty() {
        return first.to_owned();
    }
    let native = name.native.trim();
    if !native.is_empty() {
        return native.to_owned();
    }
    ANON_LABEL.to_owned()
}

// ---------------------------------------------------------------------------
// Control state
// ---------------------------------------------------------------------------

/// Latest control packet values for one agent. Each field keeps its last
/// written value until the next packet that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlInputs {
    /// Device tilt, left/right. Clamped to [-6, 6].
    pub tilt_x: f32,
    /// Device tilt, forward/back. Clamped to [-6, 6].
    pub tilt_y: f32,
    /// Voice or motion intensity in [0, 1].
    pub intensity: f32,
    /// Detected voice pitch in Hz, clamped to [0, 22050].
    pub pitch_hz: f32,
    /// Horizontal gaze target as a display fraction in [0, 1].
    pub gaze: f32,
    /// Camera proximity estimate in [0, 1].
    pub proximity: f32,
}

impl Default for ControlInputs {
    fn default() -> Self {
        Self {
            tilt_x: 0.0,
            tilt_y: 0.0,
            intensity: 0.0,
            pitch_hz: 0.0,
            gaze: 0.5,
            proximity: 0.35,
        }
    }
}

/// Partial control update; absent fields keep their previous value.
///
/// Per-mode controllers send only the channels they use, so every field is
/// optional and the engine merges field-by-field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlUpdate {
    pub tilt_x: Option<f32>,
    pub tilt_y: Option<f32>,
    pub intensity: Option<f32>,
    pub pitch_hz: Option<f32>,
    pub gaze: Option<f32>,
    pub proximity: Option<f32>,
    /// Occasional absolute position hint from the controller.
    pub position: Option<(f32, f32)>,
}

impl ControlUpdate {
    pub const TILT_LIMIT: f32 = 6.0;
    pub const PITCH_MAX_HZ: f32 = 22_050.0;

    /// Copy with every present field clamped to its documented range.
    /// Non-finite values are dropped rather than clamped.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            tilt_x: sanitize(self.tilt_x, -Self::TILT_LIMIT, Self::TILT_LIMIT),
            tilt_y: sanitize(self.tilt_y, -Self::TILT_LIMIT, Self::TILT_LIMIT),
            intensity: sanitize(self.intensity, 0.0, 1.0),
            pitch_hz: sanitize(self.pitch_hz, 0.0, Self::PITCH_MAX_HZ),
            gaze: sanitize(self.gaze, 0.0, 1.0),
            proximity: sanitize(self.proximity, 0.0, 1.0),
            position: self
                .position
                .filter(|(x, y)| x.is_finite() && y.is_finite()),
        }
    }

    /// True when no field is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tilt_x.is_none()
            && self.tilt_y.is_none()
            && self.intensity.is_none()
            && self.pitch_hz.is_none()
            && self.gaze.is_none()
            && self.proximity.is_none()
            && self.position.is_none()
    }
}

fn sanitize(value: Option<f32>, low: f32, high: f32) -> Option<f32> {
    value.filter(|v| v.is_finite()).map(|v| v.clamp(low, high))
}

// ---------------------------------------------------------------------------
// Per-agent state
// ---------------------------------------------------------------------------

/// Identity and cached generation results for one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub participant: ParticipantId,
    /// Simulation clock value at join time.
    pub joined_at_ms: u64,
    pub feature: FeatureVector,
    /// Absent when the record lookup failed outright.
    pub glyph: Option<GlyphState>,
    /// True when the feature vector is a stand-in rather than derived data.
    pub placeholder: bool,
    pub display_name: String,
}

/// Merge, zone, and memory bookkeeping carried per agent between ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionState {
    /// Current merge partner, if frozen inside a merge group.
    pub partner: Option<AgentId>,
    pub merge_until_ms: Option<u64>,
    pub cooldown_until_ms: u64,
    /// Completed merges; drawn as memory rings around the glyph.
    pub merge_count: u32,
    /// Current display zone, when zones are configured.
    pub zone: Option<usize>,
    /// Fading pre-crossing snapshot; 0 means no ghost.
    pub ghost_alpha: f32,
    /// Self-declared roles, original casing, case-insensitively deduplicated.
    pub roles: SmallVec<[String; 2]>,
    /// Simulation clock of the last accepted control packet.
    pub control_received_at_ms: Option<u64>,
    /// Exponential moving average of the proximity channel.
    pub smooth_proximity: f32,
    /// Pending velocity kicks accumulated from impulse-style packets.
    pub impulse_x: f32,
    pub impulse_y: f32,
    /// Center-distance distortion scalar for the display layer.
    pub distortion: f32,
}

impl Default for InteractionState {
    fn default() -> Self {
        Self {
            partner: None,
            merge_until_ms: None,
            cooldown_until_ms: 0,
            merge_count: 0,
            zone: None,
            ghost_alpha: 0.0,
            roles: SmallVec::new(),
            control_received_at_ms: None,
            smooth_proximity: 0.35,
            impulse_x: 0.0,
            impulse_y: 0.0,
            distortion: 0.0,
        }
    }
}

/// Presentation effects the system scheduler can impose on a glyph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemEffect {
    Normal,
    FadeOut,
    FadeIn,
    Glitch,
    Blur,
    Oversharp,
    Vanish,
    Reappear,
    Shrink,
    Inflate,
    Washout,
    StrokeFlash,
}

impl SystemEffect {
    pub const ALL: [Self; 12] = [
        Self::Normal,
        Self::FadeOut,
        Self::FadeIn,
        Self::Glitch,
        Self::Blur,
        Self::Oversharp,
        Self::Vanish,
        Self::Reappear,
        Self::Shrink,
        Self::Inflate,
        Self::Washout,
        Self::StrokeFlash,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::FadeOut => "fade-out",
            Self::FadeIn => "fade-in",
            Self::Glitch => "glitch",
            Self::Blur => "blur",
            Self::Oversharp => "oversharp",
            Self::Vanish => "vanish",
            Self::Reappear => "reappear",
            Self::Shrink => "shrink",
            Self::Inflate => "inflate",
            Self::Washout => "washout",
            Self::StrokeFlash => "stroke-flash",
        }
    }
}

impl fmt::Display for SystemEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation scalars driven by the system-effect scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectState {
    pub effect: SystemEffect,
    /// Simulation clock at which the next effect is rolled.
    pub next_roll_at_ms: u64,
    pub opacity: f32,
    pub glitch: f32,
    pub blur: f32,
    pub scale: f32,
}

impl EffectState {
    #[must_use]
    pub const fn scheduled(next_roll_at_ms: u64) -> Self {
        Self {
            effect: SystemEffect::Normal,
            next_roll_at_ms,
            opacity: 1.0,
            glitch: 0.0,
            blur: 0.0,
            scale: 1.0,
        }
    }
}

impl Default for EffectState {
    fn default() -> Self {
        Self::scheduled(u64::MAX)
    }
}

/// Full mutable state for one agent, in row form.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentState {
    pub profile: AgentProfile,
    pub position: Position,
    pub velocity: Velocity,
    pub control: ControlInputs,
    pub interaction: InteractionState,
    pub effect: EffectState,
}

// ---------------------------------------------------------------------------
// Columnar agent storage
// ---------------------------------------------------------------------------

/// Structure-of-arrays storage for agent state. Hot per-tick loops iterate
/// one column at a time; rows across columns share an index.
#[derive(Debug, Default)]
pub struct AgentColumns {
    profiles: Vec<AgentProfile>,
    positions: Vec<Position>,
    velocities: Vec<Velocity>,
    controls: Vec<ControlInputs>,
    interactions: Vec<InteractionState>,
    effects: Vec<EffectState>,
}

impl AgentColumns {
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    fn push(&mut self, state: AgentState) {
        self.profiles.push(state.profile);
        self.positions.push(state.position);
        self.velocities.push(state.velocity);
        self.controls.push(state.control);
        self.interactions.push(state.interaction);
        self.effects.push(state.effect);
        self.debug_assert_coherent();
    }

    fn swap_remove(&mut self, index: usize) -> AgentState {
        let state = AgentState {
            profile: self.profiles.swap_remove(index),
            position: self.positions.swap_remove(index),
            velocity: self.velocities.swap_remove(index),
            control: self.controls.swap_remove(index),
            interaction: self.interactions.swap_remove(index),
            effect: self.effects.swap_remove(index),
        };
        self.debug_assert_coherent();
        state
    }

    /// Clone one row back into struct form.
    #[must_use]
    pub fn snapshot(&self, index: usize) -> Option<AgentState> {
        if index >= self.len() {
            return None;
        }
        Some(AgentState {
            profile: self.profiles[index].clone(),
            position: self.positions[index],
            velocity: self.velocities[index],
            control: self.controls[index],
            interaction: self.interactions[index].clone(),
            effect: self.effects[index],
        })
    }

    #[must_use]
    pub fn profiles(&self) -> &[AgentProfile] {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut [AgentProfile] {
        &mut self.profiles
    }

    #[must_use]
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [Position] {
        &mut self.positions
    }

    #[must_use]
    pub fn velocities(&self) -> &[Velocity] {
        &self.velocities
    }

    pub fn velocities_mut(&mut self) -> &mut [Velocity] {
        &mut self.velocities
    }

    #[must_use]
    pub fn controls(&self) -> &[ControlInputs] {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut [ControlInputs] {
        &mut self.controls
    }

    #[must_use]
    pub fn interactions(&self) -> &[InteractionState] {
        &self.interactions
    }

    pub fn interactions_mut(&mut self) -> &mut [InteractionState] {
        &mut self.interactions
    }

    #[must_use]
    pub fn effects(&self) -> &[EffectState] {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut [EffectState] {
        &mut self.effects
    }

    fn debug_assert_coherent(&self) {
        debug_assert_eq!(self.profiles.len(), self.positions.len());
        debug_assert_eq!(self.profiles.len(), self.velocities.len());
        debug_assert_eq!(self.profiles.len(), self.controls.len());
        debug_assert_eq!(self.profiles.len(), self.interactions.len());
        debug_assert_eq!(self.profiles.len(), self.effects.len());
    }
}

/// Arena coupling stable [`AgentId`] handles with columnar rows.
///
/// Removal swaps the last row into the vacated index and patches the moved
/// handle's slot, so row order is not stable across removals but handles
/// always are.
#[derive(Debug, Default)]
pub struct AgentArena {
    slots: SlotMap<AgentId, usize>,
    handles: Vec<AgentId>,
    columns: AgentColumns,
}

impl AgentArena {
    pub fn insert(&mut self, state: AgentState) -> AgentId {
        let index = self.columns.len();
        self.columns.push(state);
        let id = self.slots.insert(index);
        self.handles.push(id);
        debug_assert_eq!(self.handles.len(), self.columns.len());
        id
    }

    pub fn remove(&mut self, id: AgentId) -> Option<AgentState> {
        let index = self.slots.remove(id)?;
        let removed = self.columns.swap_remove(index);
        self.handles.swap_remove(index);
        if index < self.handles.len() {
            let moved = self.handles[index];
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = index;
            }
        }
        Some(removed)
    }

    #[must_use]
    pub fn index_of(&self, id: AgentId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.slots.contains_key(id)
    }

    #[must_use]
    pub fn handles(&self) -> &[AgentId] {
        &self.handles
    }

    #[must_use]
    pub fn columns(&self) -> &AgentColumns {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut AgentColumns {
        &mut self.columns
    }

    #[must_use]
    pub fn snapshot(&self, id: AgentId) -> Option<AgentState> {
        self.columns.snapshot(self.index_of(id)?)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tuning
// ---------------------------------------------------------------------------

/// Interaction modes offered by the installation. Every mode runs on the
/// same engine; the mode only selects a tuning preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionMode {
    #[default]
    Relational,
    Transitory,
    Interoperable,
    Misaligned,
    Multiple,
    Legible,
}

impl InteractionMode {
    pub const ALL: [Self; 6] = [
        Self::Relational,
        Self::Transitory,
        Self::Interoperable,
        Self::Misaligned,
        Self::Multiple,
        Self::Legible,
    ];

    /// Lowercase wire label, also used as the message topic prefix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Transitory => "transitory",
            Self::Interoperable => "interoperable",
            Self::Misaligned => "misaligned",
            Self::Multiple => "multiple",
            Self::Legible => "legible",
        }
    }
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How agents move in response to control state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MotionModel {
    /// Device-tilt steering with a crowd ripple coupling: everyone's tilt
    /// leaks a little acceleration into everyone else.
    Tilt {
        speed_base: f32,
        intensity_gain: f32,
        ripple_factor: f32,
    },
    /// Audio-driven drift: a slow per-agent wander plus a push proportional
    /// to vocal intensity, scaled up at higher pitch.
    Voice {
        drift_gain: f32,
        push_x: f32,
        push_y: f32,
        rest_intensity: f32,
    },
    /// Swipe impulses applied at packet time; each kick is amplified by its
    /// own magnitude up to `kick_cap`.
    Impulse { kick_cap: f32 },
    /// Horizontal gaze steering with proximity-driven sizing and gentle
    /// mutual separation. No velocity; positions converge directly.
    Gaze {
        approach: f32,
        separation_push: f32,
        proximity_alpha: f32,
        base_scale: f32,
    },
    /// Agents are laid out on a join-ordered grid each tick.
    Grid { padding: f32 },
    /// Agents stay where they spawned.
    Stationary,
}

/// Fractional display region where new agents appear.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnArea {
    pub x_min: f32,
    pub x_span: f32,
    pub y_min: f32,
    pub y_span: f32,
}

impl SpawnArea {
    /// Deterministic center spawn; consumes no RNG draws.
    pub const CENTER: Self = Self {
        x_min: 0.5,
        x_span: 0.0,
        y_min: 0.5,
        y_span: 0.0,
    };

    #[must_use]
    pub const fn new(x_min: f32, x_span: f32, y_min: f32, y_span: f32) -> Self {
        Self {
            x_min,
            x_span,
            y_min,
            y_span,
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, width: f32, height: f32) -> Position {
        let fx = if self.x_span > 0.0 {
            self.x_min + rng.random::<f32>() * self.x_span
        } else {
            self.x_min
        };
        let fy = if self.y_span > 0.0 {
            self.y_min + rng.random::<f32>() * self.y_span
        } else {
            self.y_min
        };
        Position::new(width * fx, height * fy)
    }
}

/// Merge proximity threshold, either absolute pixels or a fraction of the
/// smaller display dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MergeDistance {
    Absolute(f32),
    DisplayFraction(f32),
}

impl MergeDistance {
    #[must_use]
    pub fn resolve(self, width: f32, height: f32) -> f32 {
        match self {
            Self::Absolute(pixels) => pixels,
            Self::DisplayFraction(fraction) => width.min(height) * fraction,
        }
    }
}

/// Merge state machine constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeTuning {
    pub distance: MergeDistance,
    pub duration_ms: u64,
    pub cooldown_ms: u64,
    /// Separation applied along the pair axis when a merge dissolves.
    pub push_apart: f32,
    /// Require both members to have sent a control packet this recently.
    pub recency_window_ms: Option<u64>,
    /// Require at least one member's intensity above this (0 disables).
    pub min_intensity: f32,
    /// Opacity multiplier applied to merged glyphs.
    pub merged_opacity: f32,
}

/// Static configuration for one display zone band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub name: Cow<'static, str>,
    pub presentation: GlyphOverride,
    /// Horizontal stretch applied to conforming glyphs (1 = none).
    pub stretch: f32,
}

/// Zone layout plus ghost fade behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneTuning {
    /// Equal-width vertical bands, left to right.
    pub table: Vec<ZoneSpec>,
    /// Ghost alpha removed per tick while an agent stays in its zone.
    pub ghost_decay: f32,
}

/// The six policy-themed bands of the zone display.
#[must_use]
pub fn default_zone_table() -> Vec<ZoneSpec> {
    fn zone(name: &'static str, sides: u32, hue_shift: f32, stretch: f32) -> ZoneSpec {
        ZoneSpec {
            name: Cow::Borrowed(name),
            presentation: GlyphOverride {
                sides_count: Some(sides),
                ring_count_max: Some(2),
                crease_bounds: Some((1, 3)),
                hue_shift_deg: hue_shift,
            },
            stretch,
        }
    }
    vec![
        zone("Welfare", 4, -10.0, 1.0),
        zone("Banking", 6, 0.0, 1.0),
        zone("Healthcare", 20, 20.0, 1.0),
        zone("Labor", 8, 40.0, 1.0),
        zone("Immigration", 4, 80.0, 1.6),
        zone("Telecom", 3, 200.0, 1.0),
    ]
}

/// Decay behaviour of the shared remnant ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemnantTuning {
    /// Per-tick geometric decay multiplier.
    pub decay: f32,
    /// Intensity never falls below this while the entry lives.
    pub floor: f32,
    pub lifetime_ms: u64,
    /// Entries older than `lifetime_ms * prune_factor` since their last
    /// bump are dropped.
    pub prune_factor: f32,
    /// Intensity added per bump, capped at 1.
    pub bump: f32,
    /// Record pair remnants whenever two glyphs touch.
    pub touch_traces: bool,
}

/// System takeover scheduling for presentation effects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectTuning {
    /// Quiet period after join before the scheduler touches an agent.
    pub takeover_ms: u64,
    pub roll_min_ms: u64,
    pub roll_span_ms: u64,
    /// Chance per tick that rolls are synchronized across the field.
    pub sync_chance: f32,
}

/// Per-mode constants configuring the shared engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineTuning {
    pub motion: MotionModel,
    pub damping: f32,
    pub wall_margin: f32,
    /// Velocity multiplier on wall contact; `None` clamps without bouncing.
    pub wall_bounce: Option<f32>,
    /// Normalized center distance beyond which distortion grows.
    pub center_falloff: Option<f32>,
    pub spawn: SpawnArea,
    pub merge: Option<MergeTuning>,
    pub zones: Option<ZoneTuning>,
    pub remnants: RemnantTuning,
    pub effects: Option<EffectTuning>,
}

impl EngineTuning {
    /// The tuning table: one preset per interaction mode.
    #[must_use]
    pub fn preset(mode: InteractionMode) -> Self {
        let remnants = RemnantTuning {
            decay: 0.995,
            floor: 0.05,
            lifetime_ms: 25_000,
            prune_factor: 1.5,
            bump: 0.35,
            touch_traces: false,
        };
        match mode {
            InteractionMode::Relational => Self {
                motion: MotionModel::Gaze {
                    approach: 0.25,
                    separation_push: 1.4,
                    proximity_alpha: 0.25,
                    base_scale: 0.10,
                },
                damping: 1.0,
                wall_margin: 40.0,
                wall_bounce: None,
                center_falloff: None,
                spawn: SpawnArea::CENTER,
                merge: None,
                zones: None,
                remnants: RemnantTuning {
                    decay: 0.99,
                    touch_traces: true,
                    ..remnants
                },
                effects: None,
            },
            InteractionMode::Transitory => Self {
                motion: MotionModel::Tilt {
                    speed_base: 1.5,
                    intensity_gain: 1.6,
                    ripple_factor: 0.10,
                },
                damping: 0.93,
                wall_margin: 30.0,
                wall_bounce: Some(0.9),
                center_falloff: Some(0.32),
                spawn: SpawnArea::new(0.25, 0.5, 0.25, 0.5),
                merge: Some(MergeTuning {
                    distance: MergeDistance::Absolute(70.0),
                    duration_ms: 30_000,
                    cooldown_ms: 6_000,
                    push_apart: 40.0,
                    recency_window_ms: None,
                    min_intensity: 0.0,
                    merged_opacity: 1.0,
                }),
                zones: None,
                remnants,
                effects: None,
            },
            InteractionMode::Interoperable => Self {
                motion: MotionModel::Voice {
                    drift_gain: 0.2,
                    push_x: 2.4,
                    push_y: 1.8,
                    rest_intensity: 0.1,
                },
                damping: 0.92,
                wall_margin: 24.0,
                wall_bounce: Some(0.6),
                center_falloff: None,
                spawn: SpawnArea::new(0.25, 0.5, 0.25, 0.5),
                merge: Some(MergeTuning {
                    distance: MergeDistance::DisplayFraction(0.08),
                    duration_ms: 30_000,
                    cooldown_ms: 0,
                    push_apart: 0.0,
                    recency_window_ms: Some(5_000),
                    min_intensity: 0.06,
                    merged_opacity: 0.4,
                }),
                zones: None,
                remnants,
                effects: None,
            },
            InteractionMode::Misaligned => Self {
                motion: MotionModel::Impulse { kick_cap: 6.0 },
                damping: 0.94,
                wall_margin: 28.0,
                wall_bounce: None,
                center_falloff: None,
                spawn: SpawnArea::new(0.2, 0.6, 0.3, 0.4),
                merge: None,
                zones: Some(ZoneTuning {
                    table: default_zone_table(),
                    ghost_decay: 0.006,
                }),
                remnants,
                effects: None,
            },
            InteractionMode::Multiple => Self {
                motion: MotionModel::Grid { padding: 0.06 },
                damping: 1.0,
                wall_margin: 0.0,
                wall_bounce: None,
                center_falloff: None,
                spawn: SpawnArea::CENTER,
                merge: None,
                zones: None,
                remnants,
                effects: None,
            },
            InteractionMode::Legible => Self {
                motion: MotionModel::Stationary,
                damping: 1.0,
                wall_margin: 0.0,
                wall_bounce: None,
                center_falloff: None,
                spawn: SpawnArea::new(0.25, 0.5, 0.3, 0.4),
                merge: None,
                zones: None,
                remnants,
                effects: Some(EffectTuning {
                    takeover_ms: 20_000,
                    roll_min_ms: 5_000,
                    roll_span_ms: 7_000,
                    sync_chance: 0.10,
                }),
            },
        }
    }

    fn validate(&self) -> Result<(), FieldError> {
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return Err(FieldError::InvalidConfig("damping must be in (0, 1]"));
        }
        if !(self.wall_margin.is_finite() && self.wall_margin >= 0.0) {
            return Err(FieldError::InvalidConfig("wall_margin must be non-negative"));
        }
        if let Some(bounce) = self.wall_bounce {
            if !(bounce >= 0.0 && bounce.is_finite()) {
                return Err(FieldError::InvalidConfig("wall_bounce must be non-negative"));
            }
        }
        let spawn_ok = |min: f32, span: f32| {
            min.is_finite() && span.is_finite() && min >= 0.0 && span >= 0.0 && min + span <= 1.0
        };
        if !spawn_ok(self.spawn.x_min, self.spawn.x_span)
            || !spawn_ok(self.spawn.y_min, self.spawn.y_span)
        {
            return Err(FieldError::InvalidConfig(
                "spawn area must lie within the unit square",
            ));
        }
        if let MotionModel::Gaze {
            approach,
            proximity_alpha,
            base_scale,
            ..
        } = self.motion
        {
            if !(approach > 0.0 && approach <= 1.0) {
                return Err(FieldError::InvalidConfig("gaze approach must be in (0, 1]"));
            }
            if !(proximity_alpha > 0.0 && proximity_alpha <= 1.0) {
                return Err(FieldError::InvalidConfig(
                    "proximity smoothing must be in (0, 1]",
                ));
            }
            if !(base_scale > 0.0 && base_scale <= 0.4) {
                return Err(FieldError::InvalidConfig(
                    "gaze base scale must be in (0, 0.4]",
                ));
            }
        }
        if let MotionModel::Impulse { kick_cap } = self.motion {
            if !(kick_cap > 0.0) {
                return Err(FieldError::InvalidConfig("impulse kick cap must be positive"));
            }
        }
        if let Some(merge) = &self.merge {
            if merge.duration_ms == 0 {
                return Err(FieldError::InvalidConfig("merge duration must be positive"));
            }
            let raw = match merge.distance {
                MergeDistance::Absolute(pixels) => pixels,
                MergeDistance::DisplayFraction(fraction) => fraction,
            };
            if !(raw > 0.0 && raw.is_finite()) {
                return Err(FieldError::InvalidConfig("merge distance must be positive"));
            }
            if !(0.0..=1.0).contains(&merge.merged_opacity) {
                return Err(FieldError::InvalidConfig(
                    "merged opacity must be in [0, 1]",
                ));
            }
            if !(merge.push_apart >= 0.0 && merge.push_apart.is_finite()) {
                return Err(FieldError::InvalidConfig("push_apart must be non-negative"));
            }
        }
        if let Some(zones) = &self.zones {
            if zones.table.is_empty() {
                return Err(FieldError::InvalidConfig("zone table must not be empty"));
            }
            if !(zones.ghost_decay > 0.0 && zones.ghost_decay <= 1.0) {
                return Err(FieldError::InvalidConfig("ghost decay must be in (0, 1]"));
            }
        }
        if !(self.remnants.decay > 0.0 && self.remnants.decay <= 1.0) {
            return Err(FieldError::InvalidConfig("remnant decay must be in (0, 1]"));
        }
        if !(0.0..1.0).contains(&self.remnants.floor) {
            return Err(FieldError::InvalidConfig("remnant floor must be in [0, 1)"));
        }
        if self.remnants.lifetime_ms == 0 {
            return Err(FieldError::InvalidConfig(
                "remnant lifetime must be positive",
            ));
        }
        if !(self.remnants.prune_factor >= 1.0) {
            return Err(FieldError::InvalidConfig(
                "remnant prune factor must be at least 1",
            ));
        }
        if !(self.remnants.bump > 0.0 && self.remnants.bump <= 1.0) {
            return Err(FieldError::InvalidConfig("remnant bump must be in (0, 1]"));
        }
        if let Some(effects) = &self.effects {
            if effects.roll_span_ms == 0 {
                return Err(FieldError::InvalidConfig(
                    "effect roll span must be positive",
                ));
            }
            if !(0.0..=1.0).contains(&effects.sync_chance) {
                return Err(FieldError::InvalidConfig("sync chance must be in [0, 1]"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Static configuration for one display session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlyphFieldConfig {
    pub display_width: f32,
    pub display_height: f32,
    pub mode: InteractionMode,
    /// Simulated milliseconds advanced per tick.
    pub tick_interval_ms: u64,
    pub history_capacity: usize,
    /// Maximum concurrent agents; the oldest join is evicted past this.
    pub roster_capacity: Option<usize>,
    /// Fixed seed for reproducible sessions; entropy-seeded when absent.
    pub rng_seed: Option<u64>,
    /// Explicit tuning override; the mode preset applies when absent.
    pub tuning: Option<EngineTuning>,
}

impl Default for GlyphFieldConfig {
    fn default() -> Self {
        Self {
            display_width: 1_280.0,
            display_height: 720.0,
            mode: InteractionMode::default(),
            tick_interval_ms: 16,
            history_capacity: 256,
            roster_capacity: None,
            rng_seed: None,
            tuning: None,
        }
    }
}

impl GlyphFieldConfig {
    /// Validate and resolve the effective tuning for this configuration.
    pub fn resolved_tuning(&self) -> Result<EngineTuning, FieldError> {
        if !(self.display_width.is_finite() && self.display_width > 0.0) {
            return Err(FieldError::InvalidConfig("display_width must be positive"));
        }
        if !(self.display_height.is_finite() && self.display_height > 0.0) {
            return Err(FieldError::InvalidConfig("display_height must be positive"));
        }
        if self.tick_interval_ms == 0 {
            return Err(FieldError::InvalidConfig(
                "tick_interval_ms must be positive",
            ));
        }
        if self.history_capacity == 0 {
            return Err(FieldError::InvalidConfig(
                "history_capacity must be positive",
            ));
        }
        if self.roster_capacity == Some(0) {
            return Err(FieldError::InvalidConfig(
                "roster_capacity must be positive when set",
            ));
        }
        let tuning = self
            .tuning
            .clone()
            .unwrap_or_else(|| EngineTuning::preset(self.mode));
        tuning.validate()?;
        if tuning.wall_margin * 2.0 >= self.display_width.min(self.display_height) {
            return Err(FieldError::InvalidConfig(
                "wall_margin must leave room inside the display",
            ));
        }
        Ok(tuning)
    }

    /// Build the session RNG from the configured seed, or from entropy
    /// when no seed was given.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Merge groups and remnants
// ---------------------------------------------------------------------------

/// An active two-member merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeGroup {
    pub a: AgentId,
    pub b: AgentId,
    pub formed_at_ms: u64,
    pub expires_at_ms: u64,
}

impl MergeGroup {
    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.a == id || self.b == id
    }
}

/// Key identifying one remembered interaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemnantKey {
    /// Case-folded role label.
    Role(String),
    /// Index into the active zone table.
    Zone(usize),
    /// Unordered participant pairing; ids are stored sorted.
    Pair(ParticipantId, ParticipantId),
}

impl RemnantKey {
    /// Role key with the label trimmed and case-folded.
    #[must_use]
    pub fn role(label: &str) -> Self {
        Self::Role(label.trim().to_lowercase())
    }

    /// Pair key; member order does not matter.
    #[must_use]
    pub fn pair(a: ParticipantId, b: ParticipantId) -> Self {
        if a <= b { Self::Pair(a, b) } else { Self::Pair(b, a) }
    }
}

/// One decaying memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemnantEntry {
    pub created_at_ms: u64,
    pub last_bump_ms: u64,
    pub intensity: f32,
    pub occurrence_count: u32,
}

/// Decaying record of past pairings, zone entries, and role declarations.
/// Entries outlive the agents that produced them; iteration order is
/// first-occurrence order so layouts stay stable across ticks.
#[derive(Debug, Default)]
pub struct RemnantLedger {
    entries: HashMap<RemnantKey, RemnantEntry>,
    order: Vec<RemnantKey>,
}

impl RemnantLedger {
    pub fn bump(&mut self, key: RemnantKey, now_ms: u64, amount: f32) {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.intensity = (entry.intensity + amount).min(1.0);
                entry.occurrence_count += 1;
                entry.last_bump_ms = now_ms;
            }
            None => {
                self.entries.insert(
                    key.clone(),
                    RemnantEntry {
                        created_at_ms: now_ms,
                        last_bump_ms: now_ms,
                        intensity: amount.min(1.0),
                        occurrence_count: 1,
                    },
                );
                self.order.push(key);
            }
        }
    }

    /// Apply one tick of geometric decay and drop entries whose last bump
    /// is older than the configured prune horizon.
    pub fn decay_tick(&mut self, now_ms: u64, tuning: &RemnantTuning) {
        let max_age_ms = (tuning.lifetime_ms as f64 * f64::from(tuning.prune_factor)) as u64;
        let entries = &mut self.entries;
        self.order.retain(|key| {
            let keep = match entries.get_mut(key) {
                Some(entry) => {
                    if now_ms.saturating_sub(entry.last_bump_ms) > max_age_ms {
                        false
                    } else {
                        entry.intensity = (entry.intensity * tuning.decay).max(tuning.floor);
                        true
                    }
                }
                None => false,
            };
            if !keep {
                entries.remove(key);
            }
            keep
        });
    }

    #[must_use]
    pub fn get(&self, key: &RemnantKey) -> Option<&RemnantEntry> {
        self.entries.get(key)
    }

    /// Entries in first-occurrence order.
    pub fn iter(&self) -> impl Iterator<Item = (&RemnantKey, &RemnantEntry)> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key).map(|entry| (key, entry)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tick output
// ---------------------------------------------------------------------------

/// Counters recorded in the history ring after every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub tick: Tick,
    pub clock_ms: u64,
    pub agent_count: usize,
    pub joins: usize,
    pub leaves: usize,
    pub evictions: usize,
    pub merges_formed: usize,
    pub merges_dissolved: usize,
    pub merges_active: usize,
    pub zone_crossings: usize,
    pub remnant_count: usize,
    pub mean_intensity: f32,
}

/// Fading pre-crossing snapshot drawn underneath a zone-conformed glyph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostGlyph {
    pub alpha: f32,
    pub glyph: GlyphState,
}

/// Per-agent draw instruction for the display layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderDescriptor {
    pub participant: ParticipantId,
    pub label: String,
    pub position: Position,
    /// Size multiplier relative to the mode's base glyph size.
    pub scale: f32,
    pub stretch_x: f32,
    pub opacity: f32,
    pub merged: bool,
    pub merge_count: u32,
    pub zone: Option<usize>,
    pub distortion: f32,
    pub effect: Option<SystemEffect>,
    pub glitch: f32,
    pub blur: f32,
    pub placeholder: bool,
    pub ghost: Option<GhostGlyph>,
    /// Zone-conformed when the agent sits in a zone; absent only when the
    /// participant's record lookup failed.
    pub glyph: Option<GlyphState>,
}

/// Decaying remnant overlay entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemnantDescriptor {
    pub key: RemnantKey,
    pub intensity: f32,
    pub occurrences: u32,
    pub age_ms: u64,
}

/// Complete draw state emitted by one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderFrame {
    pub tick: Tick,
    pub clock_ms: u64,
    pub agents: Vec<RenderDescriptor>,
    pub remnants: Vec<RemnantDescriptor>,
    /// Effect offered to every agent that rolled this tick, when the
    /// scheduler synchronized.
    pub multicast_effect: Option<SystemEffect>,
}

/// Output of one engine tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickOutput {
    pub summary: TickSummary,
    pub frame: RenderFrame,
}

#[derive(Debug, Default, Clone, Copy)]
struct PendingCounters {
    joins: usize,
    leaves: usize,
    evictions: usize,
}

// ---------------------------------------------------------------------------
// Field state
// ---------------------------------------------------------------------------

/// Simulation state for one display session.
///
/// Single-mutator: exactly one owner applies messages and steps the clock.
/// All durations are simulated milliseconds advanced by
/// [`GlyphFieldConfig::tick_interval_ms`] per tick, so identical inputs and
/// seeds replay identically regardless of wall-clock scheduling.
pub struct FieldState {
    config: GlyphFieldConfig,
    tuning: EngineTuning,
    rng: SmallRng,
    tick: Tick,
    clock_ms: u64,
    agents: AgentArena,
    by_participant: HashMap<ParticipantId, AgentId>,
    join_order: VecDeque<AgentId>,
    merge_groups: Vec<MergeGroup>,
    remnants: RemnantLedger,
    source: Box<dyn ParticipantSource>,
    index: UniformGridIndex,
    history: VecDeque<TickSummary>,
    pending: PendingCounters,
}

impl fmt::Debug for FieldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldState")
            .field("mode", &self.config.mode)
            .field("tick", &self.tick)
            .field("agents", &self.agents.len())
            .field("merges", &self.merge_groups.len())
            .field("remnants", &self.remnants.len())
            .finish_non_exhaustive()
    }
}

impl FieldState {
    /// Construct a session with no participant archive behind it.
    pub fn new(config: GlyphFieldConfig) -> Result<Self, FieldError> {
        Self::with_source(config, Box::new(NullSource))
    }

    /// Construct a session resolving joins against the given source.
    pub fn with_source(
        config: GlyphFieldConfig,
        source: Box<dyn ParticipantSource>,
    ) -> Result<Self, FieldError> {
        let tuning = config.resolved_tuning()?;
        let rng = config.seeded_rng();
        let index = UniformGridIndex::new(PROXIMITY_CELL_SIZE)
            .map_err(|_| FieldError::InvalidConfig("proximity cell size must be positive"))?;
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            tuning,
            rng,
            tick: Tick::zero(),
            clock_ms: 0,
            agents: AgentArena::default(),
            by_participant: HashMap::new(),
            join_order: VecDeque::new(),
            merge_groups: Vec::new(),
            remnants: RemnantLedger::default(),
            source,
            index,
            history: VecDeque::with_capacity(history_capacity),
            pending: PendingCounters::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &GlyphFieldConfig {
        &self.config
    }

    #[must_use]
    pub fn tuning(&self) -> &EngineTuning {
        &self.tuning
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Simulated milliseconds since session start.
    #[must_use]
    pub const fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Recorded summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    #[must_use]
    pub fn latest_summary(&self) -> Option<&TickSummary> {
        self.history.back()
    }

    #[must_use]
    pub fn remnants(&self) -> &RemnantLedger {
        &self.remnants
    }

    #[must_use]
    pub fn merge_groups(&self) -> &[MergeGroup] {
        &self.merge_groups
    }

    #[must_use]
    pub fn agent_id_of(&self, participant: &ParticipantId) -> Option<AgentId> {
        self.by_participant.get(participant).copied()
    }

    /// Clone the full state of one agent.
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<AgentState> {
        self.agents.snapshot(id)
    }

    /// Participant ids in join order, oldest first.
    pub fn participants(&self) -> impl Iterator<Item = &ParticipantId> {
        self.join_order.iter().filter_map(|&id| {
            self.agents
                .index_of(id)
                .map(|row| &self.agents.columns().profiles()[row].participant)
        })
    }

    /// Admit a participant, resolving their record through the source.
    ///
    /// Idempotent: a second join for the same id returns the existing
    /// handle. When the roster is at capacity the oldest join is evicted
    /// first.
    pub fn join(&mut self, participant: ParticipantId) -> AgentId {
        if let Some(&existing) = self.by_participant.get(&participant) {
            return existing;
        }
        if let Some(capacity) = self.config.roster_capacity {
            while self.agents.len() >= capacity {
                if !self.evict_oldest() {
                    break;
                }
            }
        }

        let now = self.clock_ms;
        let (feature, glyph, placeholder, display_name) = match self.source.fetch(&participant) {
            Ok(Some(record)) => {
                let feature = record
                    .data
                    .metrics
                    .unwrap_or_else(|| FeatureVector::derive(&record.data.name, record.data.audio));
                let glyph = GlyphState::from_feature(&feature);
                let label = display_label(&record.data.name);
                (feature, Some(glyph), false, label)
            }
            Ok(None) => {
                let feature = FeatureVector::placeholder(&mut self.rng, 0);
                let glyph = GlyphState::from_feature(&feature);
                (feature, Some(glyph), true, ANON_LABEL.to_owned())
            }
            Err(_) => {
                let feature = FeatureVector::placeholder(&mut self.rng, 0);
                (feature, None, true, ANON_LABEL.to_owned())
            }
        };

        let position =
            self.tuning
                .spawn
                .sample(&mut self.rng, self.config.display_width, self.config.display_height);
        let next_roll = match &self.tuning.effects {
            Some(effects) => now + effects.takeover_ms,
            None => u64::MAX,
        };
        let id = self.agents.insert(AgentState {
            profile: AgentProfile {
                participant: participant.clone(),
                joined_at_ms: now,
                feature,
                glyph,
                placeholder,
                display_name,
            },
            position,
            velocity: Velocity::default(),
            control: ControlInputs::default(),
            interaction: InteractionState::default(),
            effect: EffectState::scheduled(next_roll),
        });
        self.by_participant.insert(participant, id);
        self.join_order.push_back(id);
        self.pending.joins += 1;
        id
    }

    /// Remove a participant. Any merge they were in dissolves without
    /// counting for either member. Returns false for unknown ids.
    pub fn leave(&mut self, participant: &ParticipantId) -> bool {
        let Some(id) = self.by_participant.remove(participant) else {
            return false;
        };
        self.detach_merges(id);
        self.join_order.retain(|&other| other != id);
        let removed = self.agents.remove(id).is_some();
        if removed {
            self.pending.leaves += 1;
        }
        removed
    }

    /// Merge a control packet into a participant's control state.
    /// Unknown participants are dropped; returns whether it was applied.
    pub fn apply_control(&mut self, participant: &ParticipantId, update: ControlUpdate) -> bool {
        let Some(&id) = self.by_participant.get(participant) else {
            return false;
        };
        let Some(row) = self.agents.index_of(id) else {
            return false;
        };
        let update = update.clamped();
        let now = self.clock_ms;
        let kick_cap = match self.tuning.motion {
            MotionModel::Impulse { kick_cap } => Some(kick_cap),
            _ => None,
        };
        let (width, height) = (self.config.display_width, self.config.display_height);

        {
            let control = &mut self.agents.columns_mut().controls_mut()[row];
            if let Some(tilt_x) = update.tilt_x {
                control.tilt_x = tilt_x;
            }
            if let Some(tilt_y) = update.tilt_y {
                control.tilt_y = tilt_y;
            }
            if let Some(intensity) = update.intensity {
                control.intensity = intensity;
            }
            if let Some(pitch_hz) = update.pitch_hz {
                control.pitch_hz = pitch_hz;
            }
            if let Some(gaze) = update.gaze {
                control.gaze = gaze;
            }
            if let Some(proximity) = update.proximity {
                control.proximity = proximity;
            }
        }
        if let Some((x, y)) = update.position {
            let position = &mut self.agents.columns_mut().positions_mut()[row];
            position.x = constrain(x, 0.0, width);
            position.y = constrain(y, 0.0, height);
        }
        let interaction = &mut self.agents.columns_mut().interactions_mut()[row];
        interaction.control_received_at_ms = Some(now);
        if let Some(cap) = kick_cap {
            // Each swipe kick is amplified by its own magnitude, capped.
            if let Some(kick) = update.tilt_x {
                interaction.impulse_x += kick * (kick.abs() + 1.0).min(cap);
            }
            if let Some(kick) = update.tilt_y {
                interaction.impulse_y += kick * (kick.abs() + 1.0).min(cap);
            }
        }
        true
    }

    /// Attach a role to a participant, joining them first if needed.
    /// Roles deduplicate case-insensitively; each new role bumps the shared
    /// role remnant. Returns false when the role is blank.
    pub fn add_role(&mut self, participant: &ParticipantId, role: &str) -> bool {
        let label = role.trim();
        if label.is_empty() {
            return false;
        }
        let id = self.join(participant.clone());
        let Some(row) = self.agents.index_of(id) else {
            return false;
        };
        let folded = label.to_lowercase();
        let now = self.clock_ms;
        let added = {
            let roles = &mut self.agents.columns_mut().interactions_mut()[row].roles;
            if roles.iter().any(|existing| existing.to_lowercase() == folded) {
                false
            } else {
                roles.push(label.to_owned());
                true
            }
        };
        if added {
            self.remnants
                .bump(RemnantKey::Role(folded), now, self.tuning.remnants.bump);
        }
        added
    }

    /// Advance the simulation by one tick and emit the frame to draw.
    pub fn step(&mut self) -> TickOutput {
        self.clock_ms = self.clock_ms.saturating_add(self.config.tick_interval_ms);
        let now = self.clock_ms;

        let multicast = self.stage_effects(now);
        self.stage_motion();
        let (merges_formed, merges_dissolved) = self.stage_merges(now);
        let zone_crossings = self.stage_zones(now);
        self.stage_remnants(now);
        let frame = self.stage_frame(now, multicast);
        let summary = self.record_summary(now, merges_formed, merges_dissolved, zone_crossings);
        self.tick = self.tick.next();
        TickOutput { summary, frame }
    }

    // -- internals ---------------------------------------------------------

    fn evict_oldest(&mut self) -> bool {
        let Some(oldest) = self.join_order.front().copied() else {
            return false;
        };
        self.join_order.pop_front();
        let Some(row) = self.agents.index_of(oldest) else {
            return false;
        };
        let participant = self.agents.columns().profiles()[row].participant.clone();
        self.detach_merges(oldest);
        self.by_participant.remove(&participant);
        self.agents.remove(oldest);
        self.pending.evictions += 1;
        true
    }

    fn detach_merges(&mut self, id: AgentId) {
        let mut freed: SmallVec<[AgentId; 2]> = SmallVec::new();
        self.merge_groups.retain(|group| {
            if group.contains(id) {
                freed.push(if group.a == id { group.b } else { group.a });
                false
            } else {
                true
            }
        });
        for other in freed {
            if let Some(row) = self.agents.index_of(other) {
                let interaction = &mut self.agents.columns_mut().interactions_mut()[row];
                interaction.partner = None;
                interaction.merge_until_ms = None;
            }
        }
    }

    fn stage_effects(&mut self, now: u64) -> Option<SystemEffect> {
        let Some(effects) = self.tuning.effects else {
            return None;
        };
        let len = self.agents.len();
        if len == 0 {
            return None;
        }

        // One sync roll per tick; agents whose timer expires this tick all
        // adopt the same effect instead of rolling individually.
        let multicast = if self.rng.random::<f32>() < effects.sync_chance {
            Some(SystemEffect::ALL[self.rng.random_range(0..SystemEffect::ALL.len())])
        } else {
            None
        };

        for idx in 0..len {
            let due = now >= self.agents.columns().effects()[idx].next_roll_at_ms;
            if due {
                let chosen = match multicast {
                    Some(effect) => effect,
                    None => SystemEffect::ALL[self.rng.random_range(0..SystemEffect::ALL.len())],
                };
                let jitter = (self.rng.random::<f32>() * effects.roll_span_ms as f32) as u64;
                let state = &mut self.agents.columns_mut().effects_mut()[idx];
                state.effect = chosen;
                state.next_roll_at_ms = now + effects.roll_min_ms + jitter;
            }

            let glitch_draw = match self.agents.columns().effects()[idx].effect {
                SystemEffect::Glitch => self.rng.random::<f32>() * 6.0,
                _ => 0.0,
            };
            let state = &mut self.agents.columns_mut().effects_mut()[idx];
            match state.effect {
                SystemEffect::FadeOut => state.opacity = (state.opacity - 0.02).max(0.0),
                SystemEffect::FadeIn => state.opacity = (state.opacity + 0.02).min(1.0),
                SystemEffect::Vanish => state.opacity = 0.0,
                SystemEffect::Reappear => state.opacity = 1.0,
                SystemEffect::Glitch => state.glitch = glitch_draw,
                SystemEffect::Blur => state.blur = (state.blur + 0.3).min(8.0),
                SystemEffect::Oversharp => state.blur = (state.blur - 0.4).max(0.0),
                SystemEffect::Shrink => state.scale = (state.scale - 0.01).max(0.4),
                SystemEffect::Inflate => state.scale = (state.scale + 0.01).min(1.8),
                SystemEffect::Washout => {
                    state.opacity = (state.opacity - 0.01).max(0.1);
                    state.blur = (state.blur + 0.05).min(5.0);
                }
                SystemEffect::StrokeFlash => {
                    state.glitch = if (now as f32 * 0.03).sin() > 0.0 { 4.0 } else { 0.0 };
                }
                SystemEffect::Normal => {
                    state.glitch *= 0.9;
                    state.blur *= 0.95;
                    state.scale += (1.0 - state.scale) * 0.03;
                    state.opacity += (1.0 - state.opacity) * 0.02;
                }
            }
        }
        multicast
    }

    fn stage_motion(&mut self) {
        if self.agents.is_empty() {
            return;
        }
        match self.tuning.motion {
            MotionModel::Tilt {
                speed_base,
                intensity_gain,
                ripple_factor,
            } => self.motion_tilt(speed_base, intensity_gain, ripple_factor),
            MotionModel::Voice {
                drift_gain,
                push_x,
                push_y,
                rest_intensity,
            } => self.motion_voice(drift_gain, push_x, push_y, rest_intensity),
            MotionModel::Impulse { .. } => self.motion_impulse(),
            MotionModel::Gaze {
                approach,
                separation_push,
                proximity_alpha,
                base_scale,
            } => self.motion_gaze(approach, separation_push, proximity_alpha, base_scale),
            MotionModel::Grid { .. } => self.motion_grid(),
            MotionModel::Stationary => {}
        }
        if let Some(falloff) = self.tuning.center_falloff {
            self.update_center_distortion(falloff);
        }
    }

    fn motion_tilt(&mut self, speed_base: f32, intensity_gain: f32, ripple_factor: f32) {
        #[derive(Clone, Copy)]
        struct Row {
            tilt_x: f32,
            tilt_y: f32,
            intensity: f32,
            merged: bool,
        }
        let rows: Vec<Row> = {
            let columns = self.agents.columns();
            let controls = columns.controls();
            let interactions = columns.interactions();
            (0..columns.len())
                .map(|idx| Row {
                    tilt_x: controls[idx].tilt_x,
                    tilt_y: controls[idx].tilt_y,
                    intensity: controls[idx].intensity,
                    merged: interactions[idx].partner.is_some(),
                })
                .collect()
        };
        // Ripple sums run over every other agent, merged ones included.
        let total_x: f32 = rows.iter().map(|row| row.tilt_x * row.intensity).sum();
        let total_y: f32 = rows.iter().map(|row| row.tilt_y * row.intensity).sum();

        let accels: Vec<(f32, f32)> = rows
            .par_iter()
            .map(|row| {
                if row.merged {
                    return (0.0, 0.0);
                }
                let ripple_x = (total_x - row.tilt_x * row.intensity) * ripple_factor;
                let ripple_y = -(total_y - row.tilt_y * row.intensity) * ripple_factor;
                (
                    row.tilt_x * speed_base * row.intensity * intensity_gain + ripple_x,
                    -row.tilt_y * speed_base * row.intensity * intensity_gain + ripple_y,
                )
            })
            .collect();
        let frozen: Vec<bool> = rows.iter().map(|row| row.merged).collect();
        self.integrate(&accels, &frozen);
    }

    fn motion_voice(&mut self, drift_gain: f32, push_x: f32, push_y: f32, rest_intensity: f32) {
        #[derive(Clone, Copy)]
        struct Row {
            intensity: f32,
            pitch: f32,
            phase: f32,
            merged: bool,
        }
        let rows: Vec<Row> = {
            let columns = self.agents.columns();
            let controls = columns.controls();
            let interactions = columns.interactions();
            let profiles = columns.profiles();
            (0..columns.len())
                .map(|idx| Row {
                    intensity: controls[idx].intensity,
                    pitch: pitch_norm(controls[idx].pitch_hz),
                    phase: (profiles[idx].feature.seed % 7) as f32,
                    merged: interactions[idx].partner.is_some(),
                })
                .collect()
        };
        let t = self.tick.0 as f32;
        let accels: Vec<(f32, f32)> = rows
            .par_iter()
            .map(|row| {
                if row.merged {
                    return (0.0, 0.0);
                }
                let nudge_x = ((t + row.phase * 7.0) * 0.01 + row.phase).sin() * 0.3;
                let nudge_y = ((t + row.phase * 11.0) * 0.009 + row.phase).cos() * 0.2;
                let push = row.intensity - rest_intensity;
                (
                    nudge_x * drift_gain + push * push_x * (0.5 + row.pitch),
                    nudge_y * drift_gain + push * push_y * (0.5 + row.pitch),
                )
            })
            .collect();
        let frozen: Vec<bool> = rows.iter().map(|row| row.merged).collect();
        self.integrate(&accels, &frozen);
    }

    fn motion_impulse(&mut self) {
        let len = self.agents.len();
        let mut accels = vec![(0.0f32, 0.0f32); len];
        let mut frozen = vec![false; len];
        {
            let interactions = self.agents.columns_mut().interactions_mut();
            for idx in 0..len {
                let interaction = &mut interactions[idx];
                accels[idx] = (interaction.impulse_x, interaction.impulse_y);
                interaction.impulse_x = 0.0;
                interaction.impulse_y = 0.0;
                frozen[idx] = interaction.partner.is_some();
            }
        }
        self.integrate(&accels, &frozen);
    }

    /// Euler step shared by the velocity-based motion models: accelerate,
    /// damp, translate, then handle walls (flip first, clamp second).
    fn integrate(&mut self, accels: &[(f32, f32)], frozen: &[bool]) {
        let damping = self.tuning.damping;
        let margin = self.tuning.wall_margin;
        let bounce = self.tuning.wall_bounce;
        let (width, height) = (self.config.display_width, self.config.display_height);
        let columns = self.agents.columns_mut();
        for idx in 0..accels.len() {
            if frozen[idx] {
                continue;
            }
            let (ax, ay) = accels[idx];
            let velocity = {
                let vel = &mut columns.velocities_mut()[idx];
                vel.x = (vel.x + ax) * damping;
                vel.y = (vel.y + ay) * damping;
                *vel
            };
            {
                let pos = &mut columns.positions_mut()[idx];
                pos.x += velocity.x;
                pos.y += velocity.y;
            }
            let pos = columns.positions()[idx];
            if let Some(scale) = bounce {
                let vel = &mut columns.velocities_mut()[idx];
                if pos.x < margin || pos.x > width - margin {
                    vel.x *= -scale;
                }
                if pos.y < margin || pos.y > height - margin {
                    vel.y *= -scale;
                }
            }
            let pos = &mut columns.positions_mut()[idx];
            pos.x = constrain(pos.x, margin, width - margin);
            pos.y = constrain(pos.y, margin, height - margin);
        }
    }

    /// Sequential in-place pass: each agent sees the already-updated
    /// positions of agents processed before it, which keeps the settling
    /// behaviour stable.
    fn motion_gaze(
        &mut self,
        approach: f32,
        separation_push: f32,
        proximity_alpha: f32,
        base_scale: f32,
    ) {
        let len = self.agents.len();
        let (width, height) = (self.config.display_width, self.config.display_height);
        let base = width.min(height) * base_scale;
        for idx in 0..len {
            let render_size = {
                let proximity = self.agents.columns().controls()[idx].proximity;
                let interaction = &mut self.agents.columns_mut().interactions_mut()[idx];
                interaction.smooth_proximity = interaction.smooth_proximity
                    * (1.0 - proximity_alpha)
                    + proximity * proximity_alpha;
                base * (0.8 + clamp01(interaction.smooth_proximity))
            };

            let (mut dx_sum, mut dy_sum, mut count) = (0.0f32, 0.0f32, 0usize);
            {
                let positions = self.agents.columns().positions();
                let own = positions[idx];
                let min_dist = render_size * 1.4;
                for (other, pos) in positions.iter().enumerate() {
                    if other == idx {
                        continue;
                    }
                    let dx = own.x - pos.x;
                    let dy = own.y - pos.y;
                    let dist = (dx * dx + dy * dy).sqrt();
                    if dist > 0.0 && dist < min_dist {
                        dx_sum += dx / dist;
                        dy_sum += dy / dist;
                        count += 1;
                    }
                }
            }

            let gaze = clamp01(self.agents.columns().controls()[idx].gaze);
            let pos = &mut self.agents.columns_mut().positions_mut()[idx];
            if count > 0 {
                pos.x += (dx_sum / count as f32) * separation_push;
                pos.y += (dy_sum / count as f32) * separation_push;
            }
            // Gaze runs after separation so it wins the frame.
            pos.x += (width * gaze - pos.x) * approach;
            pos.y = constrain(pos.y, render_size * 1.2, height - render_size * 1.2);
            let pad = (render_size * 0.8).max(40.0);
            pos.x = constrain(pos.x, pad, width - pad);
        }
    }

    /// Join-ordered grid: rows as close to square as the count allows.
    fn motion_grid(&mut self) {
        let count = self.join_order.len();
        if count == 0 {
            return;
        }
        let rows = (count as f32).sqrt().ceil() as usize;
        let cols = count.div_ceil(rows);
        let cell_w = self.config.display_width / cols as f32;
        let cell_h = self.config.display_height / rows as f32;
        let order: Vec<AgentId> = self.join_order.iter().copied().collect();
        for (slot, id) in order.iter().enumerate() {
            let Some(row_idx) = self.agents.index_of(*id) else {
                continue;
            };
            let position = &mut self.agents.columns_mut().positions_mut()[row_idx];
            position.x = (slot % cols) as f32 * cell_w + cell_w * 0.5;
            position.y = (slot / cols) as f32 * cell_h + cell_h * 0.5;
        }
    }

    fn update_center_distortion(&mut self, falloff: f32) {
        let (width, height) = (self.config.display_width, self.config.display_height);
        let (cx, cy) = (width * 0.5, height * 0.5);
        let len = self.agents.len();
        for idx in 0..len {
            let pos = self.agents.columns().positions()[idx];
            let nx = (pos.x - cx) / width;
            let ny = (pos.y - cy) / height;
            let dist_norm = (nx * nx + ny * ny).sqrt();
            let interaction = &mut self.agents.columns_mut().interactions_mut()[idx];
            interaction.distortion = ((dist_norm - falloff) * 2.0).max(0.0);
        }
    }

    fn stage_merges(&mut self, now: u64) -> (usize, usize) {
        let Some(merge) = self.tuning.merge else {
            return (0, 0);
        };

        // Expiry first, so freed agents can pair again this tick.
        let mut dissolved = 0;
        let expired: Vec<MergeGroup> = {
            let (done, live): (Vec<_>, Vec<_>) = self
                .merge_groups
                .drain(..)
                .partition(|group| now >= group.expires_at_ms);
            self.merge_groups = live;
            done
        };
        for group in expired {
            self.dissolve_group(&group, now, &merge);
            dissolved += 1;
        }

        let len = self.agents.len();
        if len < 2 {
            return (0, dissolved);
        }
        let threshold = merge
            .distance
            .resolve(self.config.display_width, self.config.display_height);
        let radius_sq = threshold * threshold;

        let points: Vec<(f32, f32)> = self
            .agents
            .columns()
            .positions()
            .iter()
            .map(|pos| (pos.x, pos.y))
            .collect();
        self.index.rebuild(&points);

        let mut formed = 0;
        let mut claimed = vec![false; len];
        for idx in 0..len {
            if claimed[idx] || !self.merge_eligible(idx, now, &merge) {
                continue;
            }
            // Closest eligible candidate wins; ties break on row index.
            let mut candidates: SmallVec<[(OrderedFloat<f32>, usize); 4]> = SmallVec::new();
            self.index.neighbors_within(idx, radius_sq, &mut |other, dist_sq| {
                if other > idx {
                    candidates.push((dist_sq, other));
                }
            });
            candidates.sort_unstable();
            for &(_, other) in &candidates {
                if claimed[other] || !self.merge_eligible(other, now, &merge) {
                    continue;
                }
                if merge.min_intensity > 0.0 {
                    let controls = self.agents.columns().controls();
                    if controls[idx].intensity <= merge.min_intensity
                        && controls[other].intensity <= merge.min_intensity
                    {
                        continue;
                    }
                }
                let a = self.agents.handles()[idx];
                let b = self.agents.handles()[other];
                let until = now + merge.duration_ms;
                {
                    let interactions = self.agents.columns_mut().interactions_mut();
                    interactions[idx].partner = Some(b);
                    interactions[idx].merge_until_ms = Some(until);
                    interactions[other].partner = Some(a);
                    interactions[other].merge_until_ms = Some(until);
                }
                self.merge_groups.push(MergeGroup {
                    a,
                    b,
                    formed_at_ms: now,
                    expires_at_ms: until,
                });
                claimed[idx] = true;
                claimed[other] = true;
                formed += 1;
                break;
            }
        }
        (formed, dissolved)
    }

    fn merge_eligible(&self, row: usize, now: u64, merge: &MergeTuning) -> bool {
        let interaction = &self.agents.columns().interactions()[row];
        if interaction.partner.is_some() || now < interaction.cooldown_until_ms {
            return false;
        }
        if let Some(window) = merge.recency_window_ms {
            match interaction.control_received_at_ms {
                Some(at) if now.saturating_sub(at) < window => {}
                _ => return false,
            }
        }
        true
    }

    fn dissolve_group(&mut self, group: &MergeGroup, now: u64, merge: &MergeTuning) {
        let (Some(row_a), Some(row_b)) = (
            self.agents.index_of(group.a),
            self.agents.index_of(group.b),
        ) else {
            // A member left mid-merge; nothing to unwind.
            return;
        };
        {
            let interactions = self.agents.columns_mut().interactions_mut();
            for row in [row_a, row_b] {
                let interaction = &mut interactions[row];
                interaction.partner = None;
                interaction.merge_until_ms = None;
                interaction.merge_count += 1;
                interaction.cooldown_until_ms = now + merge.cooldown_ms;
            }
        }
        if merge.push_apart > 0.0 {
            let positions = self.agents.columns_mut().positions_mut();
            let (ax, ay) = (positions[row_a].x, positions[row_a].y);
            let (bx, by) = (positions[row_b].x, positions[row_b].y);
            let dx = bx - ax;
            let dy = by - ay;
            let raw = (dx * dx + dy * dy).sqrt();
            let dist = if raw > 0.0 { raw } else { 1.0 };
            let (ux, uy) = (dx / dist, dy / dist);
            positions[row_a].x = ax - ux * merge.push_apart;
            positions[row_a].y = ay - uy * merge.push_apart;
            positions[row_b].x = bx + ux * merge.push_apart;
            positions[row_b].y = by + uy * merge.push_apart;
        }
        let pair = {
            let profiles = self.agents.columns().profiles();
            RemnantKey::pair(
                profiles[row_a].participant.clone(),
                profiles[row_b].participant.clone(),
            )
        };
        self.remnants.bump(pair, now, self.tuning.remnants.bump);
    }

    fn stage_zones(&mut self, now: u64) -> usize {
        let Some(zones) = self.tuning.zones.as_ref() else {
            return 0;
        };
        let columns_count = zones.table.len();
        let decay = zones.ghost_decay;
        let width = self.config.display_width;
        let bump = self.tuning.remnants.bump;

        let mut crossings = 0;
        let len = self.agents.len();
        for idx in 0..len {
            let x = self.agents.columns().positions()[idx].x;
            let zone_idx = zone_for_x(x, width, columns_count);
            let previous = self.agents.columns().interactions()[idx].zone;
            if previous != Some(zone_idx) {
                {
                    let interaction = &mut self.agents.columns_mut().interactions_mut()[idx];
                    interaction.zone = Some(zone_idx);
                    interaction.ghost_alpha = 1.0;
                }
                crossings += 1;
                self.remnants.bump(RemnantKey::Zone(zone_idx), now, bump);
            } else {
                let interaction = &mut self.agents.columns_mut().interactions_mut()[idx];
                interaction.ghost_alpha = (interaction.ghost_alpha - decay).max(0.0);
            }
        }
        crossings
    }

    fn stage_remnants(&mut self, now: u64) {
        if self.tuning.remnants.touch_traces {
            self.record_touch_traces(now);
        }
        let tuning = self.tuning.remnants;
        self.remnants.decay_tick(now, &tuning);
    }

    /// Pair remnants for touching glyphs. The touch radius depends on both
    /// parties' render sizes, so pairs are scanned directly.
    fn record_touch_traces(&mut self, now: u64) {
        let len = self.agents.len();
        if len < 2 {
            return;
        }
        let base = match self.tuning.motion {
            MotionModel::Gaze { base_scale, .. } => {
                self.config.display_width.min(self.config.display_height) * base_scale
            }
            _ => return,
        };
        let (scales, positions, participants): (Vec<f32>, Vec<Position>, Vec<ParticipantId>) = {
            let columns = self.agents.columns();
            let interactions = columns.interactions();
            let profiles = columns.profiles();
            (
                (0..len)
                    .map(|idx| base * (0.8 + clamp01(interactions[idx].smooth_proximity)))
                    .collect(),
                columns.positions().to_vec(),
                (0..len).map(|idx| profiles[idx].participant.clone()).collect(),
            )
        };
        let bump = self.tuning.remnants.bump;
        for i in 0..len {
            for j in (i + 1)..len {
                let touch = scales[i] + scales[j];
                if positions[i].distance_squared(positions[j]) < touch * touch {
                    self.remnants.bump(
                        RemnantKey::pair(participants[i].clone(), participants[j].clone()),
                        now,
                        bump,
                    );
                }
            }
        }
    }

    fn stage_frame(&self, now: u64, multicast: Option<SystemEffect>) -> RenderFrame {
        let columns = self.agents.columns();
        let zone_table = self.tuning.zones.as_ref().map(|zones| &zones.table);
        let merged_opacity = self.tuning.merge.as_ref().map_or(1.0, |m| m.merged_opacity);
        let effects_enabled = self.tuning.effects.is_some();
        let gaze_sizing = matches!(self.tuning.motion, MotionModel::Gaze { .. });
        let grid_scale = self.grid_scale_multiplier();

        let mut agents = Vec::with_capacity(columns.len());
        for row in 0..columns.len() {
            let profile = &columns.profiles()[row];
            let interaction = &columns.interactions()[row];
            let effect_state = columns.effects()[row];
            let merged = interaction.partner.is_some();

            let mut scale = effect_state.scale;
            if gaze_sizing {
                scale *= 0.8 + clamp01(interaction.smooth_proximity);
            }
            if let Some(multiplier) = grid_scale {
                scale *= multiplier;
            }
            let mut opacity = effect_state.opacity;
            if merged {
                opacity *= merged_opacity;
            }

            let (glyph, stretch_x) = match (&profile.glyph, interaction.zone, zone_table) {
                (Some(base), Some(zone_idx), Some(table)) => match table.get(zone_idx) {
                    Some(spec) => (Some(base.with_override(&spec.presentation)), spec.stretch),
                    None => (Some(base.clone()), 1.0),
                },
                (Some(base), _, _) => (Some(base.clone()), 1.0),
                (None, _, _) => (None, 1.0),
            };
            let ghost = (interaction.ghost_alpha > 0.0)
                .then(|| {
                    profile.glyph.clone().map(|glyph| GhostGlyph {
                        alpha: interaction.ghost_alpha,
                        glyph,
                    })
                })
                .flatten();

            agents.push(RenderDescriptor {
                participant: profile.participant.clone(),
                label: profile.display_name.clone(),
                position: columns.positions()[row],
                scale,
                stretch_x,
                opacity,
                merged,
                merge_count: interaction.merge_count,
                zone: interaction.zone,
                distortion: interaction.distortion,
                effect: effects_enabled.then_some(effect_state.effect),
                glitch: effect_state.glitch,
                blur: effect_state.blur,
                placeholder: profile.placeholder,
                ghost,
                glyph,
            });
        }

        let remnants = self
            .remnants
            .iter()
            .map(|(key, entry)| RemnantDescriptor {
                key: key.clone(),
                intensity: entry.intensity,
                occurrences: entry.occurrence_count,
                age_ms: now.saturating_sub(entry.last_bump_ms),
            })
            .collect();

        RenderFrame {
            tick: self.tick,
            clock_ms: now,
            agents,
            remnants,
            multicast_effect: multicast,
        }
    }

    /// Grid cells shrink as the roster grows; scale follows the cell.
    fn grid_scale_multiplier(&self) -> Option<f32> {
        let MotionModel::Grid { padding } = self.tuning.motion else {
            return None;
        };
        let count = self.join_order.len();
        if count == 0 {
            return None;
        }
        let rows = (count as f32).sqrt().ceil() as usize;
        let cols = count.div_ceil(rows);
        let cell_w = self.config.display_width / cols as f32;
        let cell_h = self.config.display_height / rows as f32;
        let inner = cell_w.min(cell_h) * (1.0 - 2.0 * padding);
        Some(inner / self.config.display_width.min(self.config.display_height))
    }

    fn record_summary(
        &mut self,
        now: u64,
        merges_formed: usize,
        merges_dissolved: usize,
        zone_crossings: usize,
    ) -> TickSummary {
        let agent_count = self.agents.len();
        let mean_intensity = if agent_count == 0 {
            0.0
        } else {
            self.agents
                .columns()
                .controls()
                .iter()
                .map(|control| control.intensity)
                .sum::<f32>()
                / agent_count as f32
        };
        let summary = TickSummary {
            tick: self.tick,
            clock_ms: now,
            agent_count,
            joins: self.pending.joins,
            leaves: self.pending.leaves,
            evictions: self.pending.evictions,
            merges_formed,
            merges_dissolved,
            merges_active: self.merge_groups.len(),
            zone_crossings,
            remnant_count: self.remnants.len(),
            mean_intensity,
        };
        self.pending = PendingCounters::default();
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
        summary
    }
}

/// Zone column index for an x coordinate, clamped to the table.
fn zone_for_x(x: f32, width: f32, columns: usize) -> usize {
    let idx = ((x / width) * columns as f32).floor() as i64;
    idx.clamp(0, columns as i64 - 1) as usize
}
