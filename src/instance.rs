//! One live environment instance: lifecycle enforcement plus the buffer arena.
//!
//! Every buffer an instance hands out is allocated in [`Instance::make`] and
//! only overwritten afterwards. Results of `reset`, `step` and `render` borrow
//! from the instance, so a view cannot outlive the next mutating call.

use tracing::{debug, trace, warn};

use crate::core::{Env, EnvSpec, GymError, Result, RENDER_MODE_NONE};
use crate::frame::Frame;
use crate::kv::{KeyValues, Slots, MAX_COLLECTION_LEN, MAX_KEY_LEN};
use crate::lifecycle::{LifecycleState, Operation};
use crate::options::Options;
use crate::spaces::SpaceMap;
use crate::value::{BufferRef, Value};

/// Space declarations returned by `make`. Immutable for the life of the instance.
#[derive(Clone, Debug, PartialEq)]
pub struct MakeResult {
    pub observation_spaces: SpaceMap,
    pub action_spaces: SpaceMap,
}

/// Borrowed output of `reset`.
#[derive(Clone, Copy, Debug)]
pub struct ResetResult<'a> {
    pub observations: &'a KeyValues,
    pub infos: &'a KeyValues,
}

/// Borrowed output of `step`.
#[derive(Clone, Copy, Debug)]
pub struct StepResult<'a> {
    pub observations: &'a KeyValues,
    pub reward: Value,
    pub terminated: bool,
    pub truncated: bool,
    pub infos: &'a KeyValues,
}

impl StepResult<'_> {
    /// Terminated or truncated.
    pub fn done(&self) -> bool { self.terminated || self.truncated }
}

/// Owned copy of one `reset` or `step` result, plus where the observation
/// buffers lived. Used by drivers that must outlive the borrowed views.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub observations: KeyValues,
    pub infos: KeyValues,
    /// `None` for a reset.
    pub reward: Option<Value>,
    pub terminated: bool,
    pub truncated: bool,
    pub observation_addrs: Vec<usize>,
}

impl Snapshot {
    pub fn done(&self) -> bool { self.terminated || self.truncated }
}

impl From<ResetResult<'_>> for Snapshot {
    fn from(r: ResetResult<'_>) -> Self {
        Self {
            observations: r.observations.clone(),
            infos: r.infos.clone(),
            reward: None,
            terminated: false,
            truncated: false,
            observation_addrs: r.observations.data_addrs(),
        }
    }
}

impl From<StepResult<'_>> for Snapshot {
    fn from(s: StepResult<'_>) -> Self {
        Self {
            observations: s.observations.clone(),
            infos: s.infos.clone(),
            reward: Some(s.reward),
            terminated: s.terminated,
            truncated: s.truncated,
            observation_addrs: s.observations.data_addrs(),
        }
    }
}

/// Drives one environment through `make -> reset -> step* -> close`.
pub struct Instance<E: Env> {
    env: E,
    spec: EnvSpec,
    state: LifecycleState,
    render_mode: String,
    make: MakeResult,
    // Shared by reset and step: both write the same observation memory.
    observations: KeyValues,
    infos: KeyValues,
    actions: KeyValues,
    action_seen: Vec<bool>,
    frame: Frame,
    episode_over: bool,
    warned_after_done: bool,
    steps: u64,
}

fn check_keys<'a>(what: &str, count: usize, keys: impl Iterator<Item = &'a str>) -> Result<()> {
    if count > MAX_COLLECTION_LEN {
        return Err(GymError::Resource(format!(
            "{what} declares {count} entries, limit is {MAX_COLLECTION_LEN}"
        )));
    }
    for key in keys {
        if key.is_empty() || key.len() > MAX_KEY_LEN || key.contains('\0') {
            return Err(GymError::InvalidArgument(format!(
                "{what} key `{}` must be 1..={MAX_KEY_LEN} bytes without NUL",
                key.escape_debug()
            )));
        }
    }
    Ok(())
}

impl<E: Env> Instance<E> {
    /// Validate the request, construct the environment and allocate every buffer.
    ///
    /// An empty `render_mode` means `"none"`. On failure nothing stays allocated.
    pub fn make(render_mode: &str, options: &Options) -> Result<Self> {
        let state = LifecycleState::Unmade.transition(Operation::Make)?;
        let spec = E::spec();
        let render_mode = if render_mode.is_empty() { RENDER_MODE_NONE } else { render_mode };
        if !spec.supports_render_mode(render_mode) {
            let err = GymError::Config(format!(
                "unsupported render mode `{render_mode}` for {} (supported: {})",
                spec.id,
                spec.render_modes.join(", ")
            ));
            warn!(env = %spec.id, error = %err, "make rejected");
            return Err(err);
        }
        let options = options.resolve(&E::make_options()).inspect_err(|err| {
            warn!(env = %spec.id, error = %err, "make rejected");
        })?;

        let env = E::make(render_mode, &options)?;
        let observation_spaces = env.observation_spaces();
        let action_spaces = env.action_spaces();
        let infos = env.infos();
        check_keys("observation", observation_spaces.len(), observation_spaces.iter().map(|(k, _)| k))?;
        check_keys("action", action_spaces.len(), action_spaces.iter().map(|(k, _)| k))?;
        check_keys("info", infos.len(), infos.keys())?;
        let frame = Frame::new(env.frame_shape())?;

        let observations = observation_spaces.zeros();
        let actions = action_spaces.zeros();
        debug!(
            env = %spec.id,
            version = spec.version,
            render_mode,
            observations = observations.len(),
            actions = actions.len(),
            infos = infos.len(),
            "made environment"
        );
        Ok(Self {
            env,
            state,
            render_mode: render_mode.to_string(),
            make: MakeResult { observation_spaces, action_spaces },
            action_seen: vec![false; actions.len()],
            observations,
            infos,
            actions,
            frame,
            spec,
            episode_over: false,
            warned_after_done: false,
            steps: 0,
        })
    }

    fn guard(&self, op: Operation) -> Result<LifecycleState> {
        self.state.transition(op).inspect_err(|err| {
            warn!(env = %self.spec.id, error = %err, "call rejected");
        })
    }

    /// Start a new episode and write the initial observations in place.
    pub fn reset(&mut self, seed: i32, options: &Options) -> Result<ResetResult<'_>> {
        let next = self.guard(Operation::Reset)?;
        let options = options.resolve(&E::reset_options()).inspect_err(|err| {
            warn!(env = %self.spec.id, error = %err, "reset rejected");
        })?;
        self.env.reset(seed, &options, Slots::new(&mut self.observations), Slots::new(&mut self.infos))?;
        self.state = next;
        self.episode_over = false;
        self.warned_after_done = false;
        self.steps = 0;
        debug!(env = %self.spec.id, seed, "reset");
        Ok(ResetResult { observations: &self.observations, infos: &self.infos })
    }

    /// Advance one step with owned actions.
    pub fn step(&mut self, actions: &KeyValues) -> Result<StepResult<'_>> {
        self.step_with(actions.iter().map(|kv| Ok((kv.key(), kv.buffer().view()))))
    }

    /// Advance one step with borrowed actions, possibly read straight from host memory.
    ///
    /// Every declared action key must appear exactly once, with its declared
    /// kind and length and inside its space. Rejected actions never reach the
    /// environment. A reward of the wrong kind is caught only after the
    /// environment has stepped and written its buffers; that step is not counted.
    pub fn step_with<'a, I>(&mut self, actions: I) -> Result<StepResult<'_>>
    where
        I: IntoIterator<Item = Result<(&'a str, BufferRef<'a>)>>,
    {
        let next = self.guard(Operation::Step)?;
        self.stage_actions(actions).inspect_err(|err| {
            warn!(env = %self.spec.id, error = %err, "step rejected");
        })?;
        if self.episode_over && !self.warned_after_done {
            warn!(env = %self.spec.id, steps = self.steps, "stepping a finished episode without reset");
            self.warned_after_done = true;
        }

        let transition = self.env.step(&self.actions, Slots::new(&mut self.observations), Slots::new(&mut self.infos))?;
        if transition.reward.kind() != self.spec.reward_kind {
            return Err(GymError::shape_mismatch("reward", self.spec.reward_kind, transition.reward.kind()));
        }
        self.state = next;
        self.steps += 1;
        self.episode_over |= transition.terminated || transition.truncated;
        trace!(
            env = %self.spec.id,
            step = self.steps,
            reward = transition.reward.as_f64(),
            terminated = transition.terminated,
            truncated = transition.truncated,
            "step"
        );
        Ok(StepResult {
            observations: &self.observations,
            reward: transition.reward,
            terminated: transition.terminated,
            truncated: transition.truncated,
            infos: &self.infos,
        })
    }

    fn stage_actions<'a, I>(&mut self, actions: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<(&'a str, BufferRef<'a>)>>,
    {
        self.action_seen.fill(false);
        for item in actions {
            let (key, buffer) = item?;
            let index = self
                .make
                .action_spaces
                .index_of(key)
                .ok_or_else(|| GymError::UnknownKey(key.to_string()))?;
            if std::mem::replace(&mut self.action_seen[index], true) {
                return Err(GymError::InvalidArgument(format!("action `{key}` given more than once")));
            }
            let space = self
                .make
                .action_spaces
                .at(index)
                .map(|(_, s)| s)
                .ok_or_else(|| GymError::UnknownKey(key.to_string()))?;
            if !space.matches_shape(buffer) {
                return Err(GymError::shape_mismatch(
                    key,
                    space.shape_string(),
                    format!("{}[{}]", buffer.kind(), buffer.len()),
                ));
            }
            if !space.contains_ref(buffer) {
                return Err(GymError::InvalidAction(format!("`{key}` lies outside its declared space")));
            }
            self.actions
                .at_mut(index)
                .ok_or_else(|| GymError::UnknownKey(key.to_string()))?
                .buffer_mut()
                .copy_from(buffer)?;
        }
        if let Some(missing) = self.action_seen.iter().position(|seen| !seen) {
            if let Some((key, space)) = self.make.action_spaces.at(missing) {
                return Err(GymError::shape_mismatch(key, space.shape_string(), "missing"));
            }
        }
        Ok(())
    }

    /// Draw the current state into the instance's frame.
    pub fn render(&mut self) -> Result<&Frame> {
        self.guard(Operation::Render)?;
        self.env.render(&mut self.frame)?;
        Ok(&self.frame)
    }

    /// Release every buffer. Later calls fail with a lifecycle error.
    pub fn close(&mut self) -> Result<()> {
        let next = self.guard(Operation::Close)?;
        self.env.close();
        self.observations.release();
        self.infos.release();
        self.actions.release();
        self.frame.release();
        self.state = next;
        debug!(env = %self.spec.id, steps = self.steps, "closed environment");
        Ok(())
    }

    pub fn state(&self) -> LifecycleState { self.state }
    pub fn spec(&self) -> &EnvSpec { &self.spec }
    pub fn render_mode(&self) -> &str { &self.render_mode }
    pub fn make_result(&self) -> &MakeResult { &self.make }
    pub fn observations(&self) -> &KeyValues { &self.observations }
    pub fn infos(&self) -> &KeyValues { &self.infos }
    pub fn env(&self) -> &E { &self.env }

    /// Steps taken since the last reset.
    pub fn elapsed_steps(&self) -> u64 { self.steps }
}

impl<E: Env> Drop for Instance<E> {
    fn drop(&mut self) {
        if !self.state.is_closed() {
            self.env.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transition;
    use crate::frame::FrameShape;
    use crate::options::OptionSpec;
    use crate::spaces::{BoxSpace, MultiDiscrete};
    use crate::value::{ValueBuffer, ValueKind};

    /// Counts up by its action; terminates at `goal`.
    struct Counter {
        count: i32,
        goal: i32,
    }

    impl Env for Counter {
        fn spec() -> EnvSpec { EnvSpec::new("Counter-v0", 7).with_render_modes(["rgb_array"]) }

        fn make_options() -> Vec<OptionSpec> { vec![OptionSpec::optional("goal", 3)] }

        fn make(_render_mode: &str, options: &Options) -> Result<Self> {
            Ok(Self { count: 0, goal: options.get_i32("goal")? })
        }

        fn observation_spaces(&self) -> SpaceMap {
            SpaceMap::new().with("count", BoxSpace::uniform_f32(1, 0.0, 100.0).unwrap()).unwrap()
        }

        fn action_spaces(&self) -> SpaceMap {
            SpaceMap::new().with("inc", MultiDiscrete::new(vec![3]).unwrap()).unwrap()
        }

        fn infos(&self) -> KeyValues { KeyValues::new().with("raw", vec![0i32]).unwrap() }

        fn frame_shape(&self) -> FrameShape { FrameShape::new(ValueKind::Byte, 2, 1, 1) }

        fn reset(&mut self, _seed: i32, _options: &Options, mut obs: Slots<'_>, mut infos: Slots<'_>) -> Result<()> {
            self.count = 0;
            obs.f32_mut("count")?[0] = 0.0;
            infos.i32_mut("raw")?[0] = 0;
            Ok(())
        }

        fn step(&mut self, actions: &KeyValues, mut obs: Slots<'_>, mut infos: Slots<'_>) -> Result<Transition> {
            let inc = actions.get("inc").and_then(ValueBuffer::as_i32).map_or(0, |v| v[0]);
            self.count += inc;
            obs.f32_mut("count")?[0] = self.count as f32;
            infos.i32_mut("raw")?[0] = self.count;
            Ok(Transition::new(inc as f32, self.count >= self.goal, false))
        }

        fn render(&self, frame: &mut Frame) -> Result<()> {
            frame.fill(&[Value::Byte(self.count as u8)])
        }
    }

    fn inc(n: i32) -> KeyValues {
        KeyValues::new().with("inc", vec![n]).unwrap()
    }

    /// Declares an int32 reward but steps like `Counter`, which yields float32.
    struct WrongReward(Counter);

    impl Env for WrongReward {
        fn spec() -> EnvSpec { EnvSpec { reward_kind: ValueKind::Int, ..Counter::spec() } }
        fn make_options() -> Vec<OptionSpec> { Counter::make_options() }
        fn make(render_mode: &str, options: &Options) -> Result<Self> { Counter::make(render_mode, options).map(Self) }
        fn observation_spaces(&self) -> SpaceMap { self.0.observation_spaces() }
        fn action_spaces(&self) -> SpaceMap { self.0.action_spaces() }
        fn infos(&self) -> KeyValues { self.0.infos() }
        fn frame_shape(&self) -> FrameShape { self.0.frame_shape() }

        fn reset(&mut self, seed: i32, options: &Options, obs: Slots<'_>, infos: Slots<'_>) -> Result<()> {
            self.0.reset(seed, options, obs, infos)
        }

        fn step(&mut self, actions: &KeyValues, obs: Slots<'_>, infos: Slots<'_>) -> Result<Transition> {
            self.0.step(actions, obs, infos)
        }

        fn render(&self, frame: &mut Frame) -> Result<()> { self.0.render(frame) }
    }

    #[test]
    fn full_episode_reuses_buffers() {
        let mut inst = Instance::<Counter>::make("", &Options::new()).unwrap();
        assert_eq!(inst.render_mode(), "none");
        assert_eq!(inst.state(), LifecycleState::Made);
        let reset_addrs = inst.reset(0, &Options::new()).unwrap().observations.data_addrs();

        let s = inst.step(&inc(2)).unwrap();
        assert_eq!(s.reward, Value::Float(2.0));
        assert!(!s.done());
        assert_eq!(s.observations.data_addrs(), reset_addrs);

        let s = inst.step(&inc(1)).unwrap();
        assert!(s.terminated);
        assert_eq!(s.infos.get("raw").and_then(ValueBuffer::as_i32), Some(&[3][..]));
        assert_eq!(inst.elapsed_steps(), 2);
        inst.close().unwrap();
        assert!(inst.observations().is_empty());
    }

    #[test]
    fn make_rejects_bad_render_mode_and_options() {
        assert!(matches!(Instance::<Counter>::make("human", &Options::new()), Err(GymError::Config(_))));
        let bad = Options::new().with("goal", 3.0f32);
        assert!(matches!(Instance::<Counter>::make("rgb_array", &bad), Err(GymError::Config(_))));
        let unknown = Options::new().with("speed", 1);
        assert!(matches!(Instance::<Counter>::make("none", &unknown), Err(GymError::Config(_))));
    }

    #[test]
    fn step_before_reset_is_a_lifecycle_error() {
        let mut inst = Instance::<Counter>::make("none", &Options::new()).unwrap();
        let err = inst.step(&inc(1)).unwrap_err();
        assert_eq!(err, GymError::Lifecycle { op: Operation::Step, state: LifecycleState::Made });
        assert!(inst.render().is_ok());
    }

    #[test]
    fn malformed_actions_are_rejected_before_the_env_runs() {
        let mut inst = Instance::<Counter>::make("none", &Options::new()).unwrap();
        inst.reset(0, &Options::new()).unwrap();

        let wrong_kind = KeyValues::new().with("inc", vec![1.0f32]).unwrap();
        assert!(matches!(inst.step(&wrong_kind), Err(GymError::ShapeMismatch { .. })));
        let wrong_len = KeyValues::new().with("inc", vec![1, 1]).unwrap();
        assert!(matches!(inst.step(&wrong_len), Err(GymError::ShapeMismatch { .. })));
        let unknown = inc(1).with("jump", vec![1]).unwrap();
        assert_eq!(inst.step(&unknown).unwrap_err(), GymError::UnknownKey("jump".into()));
        assert!(matches!(inst.step(&KeyValues::new()), Err(GymError::ShapeMismatch { .. })));
        assert!(matches!(inst.step(&inc(3)), Err(GymError::InvalidAction(_))));

        let dup = [Ok(("inc", BufferRef::Int(&[1]))), Ok(("inc", BufferRef::Int(&[1])))];
        assert!(matches!(inst.step_with(dup), Err(GymError::InvalidArgument(_))));

        assert_eq!(inst.elapsed_steps(), 0);
        assert_eq!(inst.observations().get("count").and_then(ValueBuffer::as_f32), Some(&[0.0][..]));
    }

    #[test]
    fn reward_of_the_wrong_kind_fails_the_step() {
        let mut inst = Instance::<WrongReward>::make("none", &Options::new()).unwrap();
        inst.reset(0, &Options::new()).unwrap();
        let err = inst.step(&inc(1)).unwrap_err();
        assert!(matches!(err, GymError::ShapeMismatch { ref key, .. } if key == "reward"));
        assert_eq!(inst.elapsed_steps(), 0);
        assert_eq!(inst.state(), LifecycleState::Ready);
        // The environment had already stepped and written its buffers.
        assert_eq!(inst.observations().get("count").and_then(ValueBuffer::as_f32), Some(&[1.0][..]));
    }

    #[test]
    fn everything_fails_after_close() {
        let mut inst = Instance::<Counter>::make("none", &Options::new()).unwrap();
        inst.close().unwrap();
        assert!(matches!(inst.reset(0, &Options::new()), Err(GymError::Lifecycle { .. })));
        assert!(matches!(inst.render(), Err(GymError::Lifecycle { .. })));
        assert!(matches!(inst.close(), Err(GymError::Lifecycle { .. })));
    }

    #[test]
    fn render_is_idempotent() {
        let mut inst = Instance::<Counter>::make("rgb_array", &Options::new().with("goal", 10)).unwrap();
        inst.reset(1, &Options::new()).unwrap();
        inst.step(&inc(2)).unwrap();
        let first = inst.render().unwrap().clone();
        let second = inst.render().unwrap();
        assert_eq!(&first, second);
        assert_eq!(second.as_bytes(), Some(&[2, 2][..]));
    }
}
