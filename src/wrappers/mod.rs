// Wrappers: environments composed around another environment.
//
// Provided:
// - TimeLimit

use crate::core::{Env, EnvSpec, GymError, Result, Transition};
use crate::frame::{Frame, FrameShape};
use crate::kv::{KeyValues, Slots};
use crate::options::{OptionSpec, Options};
use crate::spaces::SpaceMap;
use crate::value::ValueKind;

/// Make option consumed by [`TimeLimit`].
pub const MAX_EPISODE_STEPS: &str = "max_episode_steps";

/// A wrapper that enforces a maximum number of steps per episode, marking truncation when exceeded.
///
/// The limit is the `max_episode_steps` make option. It defaults to the inner
/// environment's [`EnvSpec::max_episode_steps`] and is required when that is unset.
pub struct TimeLimit<E: Env> {
    inner: E,
    max_steps: u32,
    steps: u32,
}

impl<E: Env> TimeLimit<E> {
    pub fn new(inner: E, max_steps: u32) -> Self {
        Self { inner, max_steps, steps: 0 }
    }

    pub fn inner(&self) -> &E { &self.inner }
    pub fn inner_mut(&mut self) -> &mut E { &mut self.inner }
    pub fn into_inner(self) -> E { self.inner }

    pub fn max_steps(&self) -> u32 { self.max_steps }

    /// Steps taken since the last reset.
    pub fn elapsed_steps(&self) -> u32 { self.steps }
}

impl<E: Env> Env for TimeLimit<E> {
    fn spec() -> EnvSpec { E::spec() }

    fn make_options() -> Vec<OptionSpec> {
        let mut options = E::make_options();
        options.push(match E::spec().max_episode_steps {
            Some(n) => OptionSpec::optional(MAX_EPISODE_STEPS, i32::try_from(n).unwrap_or(i32::MAX)),
            None => OptionSpec::required(MAX_EPISODE_STEPS, ValueKind::Int),
        });
        options
    }

    fn reset_options() -> Vec<OptionSpec> { E::reset_options() }

    fn make(render_mode: &str, options: &Options) -> Result<Self> {
        let max_steps = options.get_i32(MAX_EPISODE_STEPS)?;
        let max_steps = u32::try_from(max_steps)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| GymError::Config(format!("`{MAX_EPISODE_STEPS}` must be positive, got {max_steps}")))?;
        let inner = E::make(render_mode, &options.without(MAX_EPISODE_STEPS))?;
        Ok(Self::new(inner, max_steps))
    }

    fn observation_spaces(&self) -> SpaceMap { self.inner.observation_spaces() }
    fn action_spaces(&self) -> SpaceMap { self.inner.action_spaces() }
    fn infos(&self) -> KeyValues { self.inner.infos() }
    fn frame_shape(&self) -> FrameShape { self.inner.frame_shape() }

    fn reset(&mut self, seed: i32, options: &Options, observations: Slots<'_>, infos: Slots<'_>) -> Result<()> {
        self.steps = 0;
        self.inner.reset(seed, options, observations, infos)
    }

    fn step(&mut self, actions: &KeyValues, observations: Slots<'_>, infos: Slots<'_>) -> Result<Transition> {
        let mut t = self.inner.step(actions, observations, infos)?;
        self.steps = self.steps.saturating_add(1);
        if !t.terminated && !t.truncated && self.steps >= self.max_steps {
            t.truncated = true;
        }
        Ok(t)
    }

    fn render(&self, frame: &mut Frame) -> Result<()> { self.inner.render(frame) }
    fn close(&mut self) { self.inner.close() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envs::sine_wave::{SineWaveEnv, ACTION_KEY};
    use crate::instance::Instance;

    fn act() -> KeyValues {
        KeyValues::new().with(ACTION_KEY, vec![0]).unwrap()
    }

    #[test]
    fn time_limit_truncates() {
        let options = Options::new().with(MAX_EPISODE_STEPS, 5);
        let mut inst = Instance::<TimeLimit<SineWaveEnv>>::make("none", &options).unwrap();
        assert_eq!(inst.env().max_steps(), 5);
        inst.reset(0, &Options::new()).unwrap();
        let mut done = false;
        for i in 0..10 {
            let s = inst.step(&act()).unwrap();
            if s.done() {
                assert!(s.truncated);
                assert!(!s.terminated);
                assert_eq!(i, 4);
                done = true;
                break;
            }
        }
        assert!(done);

        inst.reset(1, &Options::new()).unwrap();
        assert_eq!(inst.env().elapsed_steps(), 0);
    }

    #[test]
    fn limit_defaults_to_spec_and_is_validated() {
        let inst = Instance::<TimeLimit<SineWaveEnv>>::make("none", &Options::new()).unwrap();
        assert_eq!(inst.env().max_steps(), 200);

        let zero = Options::new().with(MAX_EPISODE_STEPS, 0);
        assert!(matches!(Instance::<TimeLimit<SineWaveEnv>>::make("none", &zero), Err(GymError::Config(_))));
    }

    #[test]
    fn inner_options_pass_through() {
        let options = Options::new().with("timer_step", 0.5f32).with(MAX_EPISODE_STEPS, 100);
        let inst = Instance::<TimeLimit<SineWaveEnv>>::make("none", &options).unwrap();
        assert_eq!(inst.env().inner().timer_step(), 0.5);
    }

    #[test]
    fn termination_wins_over_truncation() {
        // SineWave terminates on its 40th step.
        let options = Options::new().with(MAX_EPISODE_STEPS, 40);
        let mut inst = Instance::<TimeLimit<SineWaveEnv>>::make("none", &options).unwrap();
        inst.reset(0, &Options::new()).unwrap();
        for _ in 0..39 {
            assert!(!inst.step(&act()).unwrap().done());
        }
        let last = inst.step(&act()).unwrap();
        assert!(last.terminated);
        assert!(!last.truncated);
    }
}
