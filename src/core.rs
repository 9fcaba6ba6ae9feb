// Core traits and types: the environment contract, its metadata and the error taxonomy.

use crate::frame::{Frame, FrameShape};
use crate::kv::{KeyValues, Slots};
use crate::lifecycle::{LifecycleState, Operation};
use crate::options::{OptionSpec, Options};
use crate::spaces::SpaceMap;
use crate::value::{Value, ValueKind};

/// Render mode every environment accepts: render into the frame buffer only
/// when asked, never display anything.
pub const RENDER_MODE_NONE: &str = "none";

/// Environment specification metadata, fixed per environment type.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvSpec {
    /// Unique identifier like "SineWave-v0".
    pub id: String,
    /// Content version reported by `cgym_get_env_version`.
    pub version: i32,
    /// Render modes accepted by `make`. `"none"` is always accepted.
    pub render_modes: Vec<String>,
    /// Whether the same seed and action sequence reproduce the same episode.
    pub deterministic: bool,
    /// Suggested step limit for the `TimeLimit` wrapper.
    pub max_episode_steps: Option<u32>,
    /// Kind of the scalar reward produced by every step.
    pub reward_kind: ValueKind,
}

impl EnvSpec {
    pub fn new<S: Into<String>>(id: S, version: i32) -> Self {
        Self {
            id: id.into(),
            version,
            render_modes: vec![RENDER_MODE_NONE.to_string()],
            deterministic: true,
            max_episode_steps: None,
            reward_kind: ValueKind::Float,
        }
    }

    pub fn with_render_modes<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for mode in modes {
            let mode = mode.into();
            if !self.render_modes.contains(&mode) {
                self.render_modes.push(mode);
            }
        }
        self
    }

    /// Whether `mode` is accepted by `make`. An empty string means `"none"`.
    pub fn supports_render_mode(&self, mode: &str) -> bool {
        mode.is_empty() || mode == RENDER_MODE_NONE || self.render_modes.iter().any(|m| m == mode)
    }
}

/// Scalar outcome of one step. Observations and infos are written in place.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    pub reward: Value,
    pub terminated: bool,
    pub truncated: bool,
}

impl Transition {
    pub fn new(reward: impl Into<Value>, terminated: bool, truncated: bool) -> Self {
        Self { reward: reward.into(), terminated, truncated }
    }
}

/// Errors surfaced by every operation of the contract.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GymError {
    /// Unsupported render mode, unknown, missing or mistyped option.
    #[error("configuration error: {0}")]
    Config(String),
    /// A collection entry does not match its declared kind and length.
    #[error("shape mismatch for `{key}`: expected {expected}, found {found}")]
    ShapeMismatch { key: String, expected: String, found: String },
    /// A key that was never declared for this collection.
    #[error("unknown key `{0}`")]
    UnknownKey(String),
    /// Correctly shaped action outside its declared space.
    #[error("invalid action: {0}")]
    InvalidAction(String),
    /// A space descriptor violating the Box or Multi-discrete invariants.
    #[error("invalid space: {0}")]
    InvalidSpace(String),
    /// Operation called from a state where it is not legal.
    #[error("`{op}` is not allowed in state {state}")]
    Lifecycle { op: Operation, state: LifecycleState },
    /// Setup could not allocate or initialise the instance.
    #[error("resource error: {0}")]
    Resource(String),
    /// Malformed input at the ABI boundary.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Host-side load check failed.
    #[error("{what} version mismatch: expected {expected}, found {found}")]
    Version { what: &'static str, expected: i32, found: i32 },
    /// A module broke the contract while being checked by the conformance harness.
    #[error("conformance violation: {0}")]
    Conformance(String),
    /// Feature compiled out, e.g. PNG encoding without `image`.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// Non-zero status returned by a loaded module, with its last error message.
    #[error("module returned status {code}: {message}")]
    Module { code: i32, message: String },
    /// Environment code panicked.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GymError {
    pub fn shape_mismatch(key: &str, expected: impl std::fmt::Display, found: impl std::fmt::Display) -> Self {
        GymError::ShapeMismatch { key: key.to_string(), expected: expected.to_string(), found: found.to_string() }
    }
}

/// Convenience alias for results using GymError.
pub type Result<T> = std::result::Result<T, GymError>;

/// An environment that can be driven through the module contract.
///
/// Implementations describe their spaces once, at `make`, and afterwards only
/// write into buffers handed to them by the owning [`Instance`](crate::Instance).
/// They never see the lifecycle: the instance rejects out-of-order calls and
/// mis-shaped actions before the environment is reached.
pub trait Env: Sized {
    /// Static metadata: id, content version, render modes, reward kind.
    fn spec() -> EnvSpec;

    /// Options accepted by `make`.
    fn make_options() -> Vec<OptionSpec> { Vec::new() }

    /// Options accepted by `reset`.
    fn reset_options() -> Vec<OptionSpec> { Vec::new() }

    /// Construct the environment. `options` has already been validated
    /// against [`Env::make_options`] and carries defaults for absent entries.
    fn make(render_mode: &str, options: &Options) -> Result<Self>;

    fn observation_spaces(&self) -> SpaceMap;

    fn action_spaces(&self) -> SpaceMap;

    /// Info channels with their initial contents. Allocated once and then
    /// overwritten in place on every reset and step.
    fn infos(&self) -> KeyValues { KeyValues::new() }

    fn frame_shape(&self) -> FrameShape;

    /// Reinitialise the simulation and write the initial observation.
    fn reset(&mut self, seed: i32, options: &Options, observations: Slots<'_>, infos: Slots<'_>) -> Result<()>;

    /// Advance by one step. `actions` holds exactly the declared action keys
    /// in declaration order, each already shape checked.
    fn step(&mut self, actions: &KeyValues, observations: Slots<'_>, infos: Slots<'_>) -> Result<Transition>;

    /// Draw the current state into `frame`.
    fn render(&self, frame: &mut Frame) -> Result<()>;

    /// Release external resources. Buffers are freed by the instance.
    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_and_empty_render_modes_are_always_supported() {
        let spec = EnvSpec::new("Test-v0", 1).with_render_modes(["rgb_array"]);
        assert!(spec.supports_render_mode(""));
        assert!(spec.supports_render_mode("none"));
        assert!(spec.supports_render_mode("rgb_array"));
        assert!(!spec.supports_render_mode("human"));
        assert_eq!(spec.render_modes, vec!["none".to_string(), "rgb_array".to_string()]);
    }

    #[test]
    fn errors_render_their_context() {
        let e = GymError::Lifecycle { op: Operation::Step, state: LifecycleState::Made };
        assert_eq!(e.to_string(), "`step` is not allowed in state Made");
        let e = GymError::shape_mismatch("act1", "int32[1]", "float32[1]");
        assert_eq!(e.to_string(), "shape mismatch for `act1`: expected int32[1], found float32[1]");
    }
}
