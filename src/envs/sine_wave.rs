use rand::distributions::{Distribution, Uniform};

use crate::core::{Env, EnvSpec, GymError, Result, Transition};
use crate::frame::{Frame, FrameShape};
use crate::kv::{KeyValues, Slots};
use crate::options::{OptionSpec, Options};
use crate::spaces::{BoxSpace, MultiDiscrete, SpaceMap};
use crate::utils::rng::{rng_from_env_seed, RngStream};
use crate::value::Value;

pub const OBSERVATION_KEY: &str = "obs1";
pub const ACTION_KEY: &str = "act1";
pub const TIMER_INFO_KEY: &str = "t";
pub const TIMER_STEP_OPTION: &str = "timer_step";
pub const NOISE_OPTION: &str = "noise";

const OBS_DIM: usize = 10;
const ACTION_CHOICES: i32 = 10;
const PHASE_STEP: f32 = 0.5;
const HORIZON: f32 = 10.0;
const FRAME_SIZE: usize = 8;
const FRAME_LEVEL: u8 = 64;

/// SineWave-v0: a smoke-test environment for hosts.
/// Observation: Box(10) in [-1, 1], `obs[i] = cos(t + 0.5 i)` (plus optional seeded noise)
/// Action: MultiDiscrete([10]), ignored by the dynamics
/// Reward: `sin(t)` before the timer advances; terminates once `t >= 10`
pub struct SineWaveEnv {
    t: f32,
    timer_step: f32,
    noise: f32,
    rng: RngStream,
    observation_space: BoxSpace,
    observation_spaces: SpaceMap,
    action_spaces: SpaceMap,
    infos: KeyValues,
}

impl SineWaveEnv {
    /// Current timer value.
    pub fn t(&self) -> f32 { self.t }

    pub fn timer_step(&self) -> f32 { self.timer_step }

    fn write_observation(&mut self, observations: &mut Slots<'_>) -> Result<()> {
        let obs = observations.f32_mut(OBSERVATION_KEY)?;
        for (i, o) in obs.iter_mut().enumerate() {
            *o = (self.t + PHASE_STEP * i as f32).cos();
        }
        if self.noise > 0.0 {
            // A `[-noise, noise]` range overflows `Uniform` for huge noise.
            let unit = Uniform::new_inclusive(-1.0f32, 1.0);
            for o in obs.iter_mut() {
                *o += self.noise * unit.sample(&mut self.rng);
            }
        }
        let obs = observations
            .get_mut(OBSERVATION_KEY)
            .ok_or_else(|| GymError::UnknownKey(OBSERVATION_KEY.to_string()))?;
        self.observation_space.clamp(obs)
    }

    fn write_info(&self, infos: &mut Slots<'_>) -> Result<()> {
        infos.f32_mut(TIMER_INFO_KEY)?[0] = self.t;
        Ok(())
    }
}

impl Env for SineWaveEnv {
    fn spec() -> EnvSpec {
        let mut spec = EnvSpec::new("SineWave-v0", 123).with_render_modes(["rgb_array"]);
        spec.max_episode_steps = Some(200);
        spec
    }

    fn make_options() -> Vec<OptionSpec> { vec![OptionSpec::optional(TIMER_STEP_OPTION, 0.25f32)] }

    fn reset_options() -> Vec<OptionSpec> { vec![OptionSpec::optional(NOISE_OPTION, 0.0f32)] }

    fn make(_render_mode: &str, options: &Options) -> Result<Self> {
        let timer_step = options.get_f32(TIMER_STEP_OPTION)?;
        if !(timer_step.is_finite() && timer_step > 0.0) {
            return Err(GymError::Config(format!("`{TIMER_STEP_OPTION}` must be positive, got {timer_step}")));
        }
        let observation_space = BoxSpace::uniform_f32(OBS_DIM, -1.0, 1.0)?;
        Ok(Self {
            t: 0.0,
            timer_step,
            noise: 0.0,
            rng: rng_from_env_seed(0),
            observation_spaces: SpaceMap::new().with(OBSERVATION_KEY, observation_space.clone())?,
            action_spaces: SpaceMap::new().with(ACTION_KEY, MultiDiscrete::new(vec![ACTION_CHOICES])?)?,
            infos: KeyValues::new().with(TIMER_INFO_KEY, vec![0.0f32])?,
            observation_space,
        })
    }

    fn observation_spaces(&self) -> SpaceMap { self.observation_spaces.clone() }

    fn action_spaces(&self) -> SpaceMap { self.action_spaces.clone() }

    fn infos(&self) -> KeyValues { self.infos.clone() }

    fn frame_shape(&self) -> FrameShape { FrameShape::rgb8(FRAME_SIZE, FRAME_SIZE) }

    fn reset(&mut self, seed: i32, options: &Options, mut observations: Slots<'_>, mut infos: Slots<'_>) -> Result<()> {
        let noise = options.get_f32(NOISE_OPTION)?;
        if !(noise.is_finite() && noise >= 0.0) {
            return Err(GymError::Config(format!("`{NOISE_OPTION}` must be non-negative, got {noise}")));
        }
        self.noise = noise;
        self.rng = rng_from_env_seed(seed);
        self.t = 0.0;
        self.write_observation(&mut observations)?;
        self.write_info(&mut infos)
    }

    fn step(&mut self, _actions: &KeyValues, mut observations: Slots<'_>, mut infos: Slots<'_>) -> Result<Transition> {
        let reward = self.t.sin();
        self.write_observation(&mut observations)?;
        self.t += self.timer_step;
        self.write_info(&mut infos)?;
        Ok(Transition::new(reward, self.t >= HORIZON, false))
    }

    fn render(&self, frame: &mut Frame) -> Result<()> {
        frame.fill(&[Value::Byte(FRAME_LEVEL); 3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use crate::value::ValueBuffer;

    fn act(n: i32) -> KeyValues {
        KeyValues::new().with(ACTION_KEY, vec![n]).unwrap()
    }

    #[test]
    fn reset_writes_cosine_profile() {
        let mut inst = Instance::<SineWaveEnv>::make("none", &Options::new()).unwrap();
        let r = inst.reset(42, &Options::new()).unwrap();
        let obs = r.observations.get(OBSERVATION_KEY).and_then(ValueBuffer::as_f32).unwrap();
        assert_eq!(obs.len(), 10);
        for (i, o) in obs.iter().enumerate() {
            assert!((o - (0.5 * i as f32).cos()).abs() < 1e-6);
        }
        assert_eq!(r.infos.get(TIMER_INFO_KEY).and_then(ValueBuffer::as_f32), Some(&[0.0][..]));
    }

    #[test]
    fn episode_terminates_after_forty_steps() {
        let mut inst = Instance::<SineWaveEnv>::make("none", &Options::new()).unwrap();
        inst.reset(0, &Options::new()).unwrap();
        let mut steps = 0;
        loop {
            let s = inst.step(&act(steps % 10)).unwrap();
            steps += 1;
            assert!(!s.truncated);
            if s.terminated {
                break;
            }
        }
        assert_eq!(steps, 40);
        assert!((inst.env().t() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn timer_step_option_changes_the_pace() {
        let options = Options::new().with(TIMER_STEP_OPTION, 1.0f32);
        let mut inst = Instance::<SineWaveEnv>::make("rgb_array", &options).unwrap();
        inst.reset(0, &Options::new()).unwrap();
        let s = inst.step(&act(0)).unwrap();
        assert_eq!(s.infos.get(TIMER_INFO_KEY).and_then(ValueBuffer::as_f32), Some(&[1.0][..]));

        let bad = Options::new().with(TIMER_STEP_OPTION, -1.0f32);
        assert!(matches!(Instance::<SineWaveEnv>::make("none", &bad), Err(GymError::Config(_))));
    }

    #[test]
    fn noise_stays_inside_bounds_and_depends_on_seed() {
        let mut inst = Instance::<SineWaveEnv>::make("none", &Options::new()).unwrap();
        let noisy = Options::new().with(NOISE_OPTION, 0.75f32);
        let a = inst.reset(5, &noisy).unwrap().observations.clone();
        let b = inst.reset(5, &noisy).unwrap().observations.clone();
        let c = inst.reset(6, &noisy).unwrap().observations.clone();
        assert_eq!(a, b);
        assert_ne!(a, c);
        let obs = a.get(OBSERVATION_KEY).and_then(ValueBuffer::as_f32).unwrap();
        assert!(obs.iter().all(|o| (-1.0..=1.0).contains(o)));

        let negative = Options::new().with(NOISE_OPTION, -0.1f32);
        assert!(matches!(inst.reset(5, &negative), Err(GymError::Config(_))));
    }

    #[test]
    fn huge_finite_noise_saturates_at_the_bounds() {
        let mut inst = Instance::<SineWaveEnv>::make("none", &Options::new()).unwrap();
        for noise in [3.0e38f32, f32::MAX] {
            let options = Options::new().with(NOISE_OPTION, noise);
            let obs = inst.reset(1, &options).unwrap().observations.clone();
            let obs = obs.get(OBSERVATION_KEY).and_then(ValueBuffer::as_f32).unwrap();
            assert!(obs.iter().all(|o| (-1.0..=1.0).contains(o)));
            let s = inst.step(&act(0)).unwrap();
            let obs = s.observations.get(OBSERVATION_KEY).and_then(ValueBuffer::as_f32).unwrap();
            assert!(obs.iter().all(|o| (-1.0..=1.0).contains(o)));
        }
        let infinite = Options::new().with(NOISE_OPTION, f32::INFINITY);
        assert!(matches!(inst.reset(1, &infinite), Err(GymError::Config(_))));
    }
}
