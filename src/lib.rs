//! Loadable reinforcement-learning environments behind a small C ABI.
//!
//! An environment implements [`Env`]; an [`Instance`] drives it through
//! `make -> reset -> step* -> close`, owns every buffer it hands out and
//! rejects out-of-order calls and malformed actions. [`export_env!`] turns an
//! environment type into the `cgym_*` symbols of a cdylib, and
//! [`ffi::ModuleInstance`] drives such a module from the host side.

pub mod value;
pub mod kv;
pub mod options;
pub mod lifecycle;
pub mod frame;
pub mod core;
pub mod spaces;
pub mod instance;
pub mod ffi;
pub mod conformance;
pub mod utils;
pub mod envs;
pub mod wrappers;

pub use crate::core::{Env, EnvSpec, GymError, Result, Transition, RENDER_MODE_NONE};
pub use crate::instance::{Instance, MakeResult, ResetResult, Snapshot, StepResult};
pub use crate::kv::{KeyValue, KeyValues, Layout, Slots};
pub use crate::options::{OptionSpec, Options};
pub use crate::lifecycle::{LifecycleState, Operation};
pub use crate::frame::{Frame, FrameShape};
pub use crate::spaces::{BoxSpace, DynSpace, MultiDiscrete, Space, SpaceMap};
pub use crate::value::{BufferMut, BufferRef, Value, ValueBuffer, ValueKind, ValueType};
pub use crate::envs::SineWaveEnv;
pub use crate::wrappers::TimeLimit;
pub use crate::utils::{encode_png, save_png};

#[cfg(feature = "example-module")]
crate::export_env!(crate::envs::SineWaveEnv);

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// A tiny dummy environment to validate the trait compiles and basic methods work.
    struct CounterEnv {
        state: i32,
    }

    impl Env for CounterEnv {
        fn spec() -> EnvSpec { EnvSpec::new("Counter-v0", 1) }

        fn make(_render_mode: &str, _options: &Options) -> Result<Self> { Ok(Self { state: 0 }) }

        fn observation_spaces(&self) -> SpaceMap {
            SpaceMap::new().with("state", BoxSpace::uniform_f32(1, 0.0, 10.0).unwrap()).unwrap()
        }

        fn action_spaces(&self) -> SpaceMap {
            SpaceMap::new().with("delta", MultiDiscrete::new(vec![3]).unwrap()).unwrap()
        }

        fn frame_shape(&self) -> FrameShape { FrameShape::new(ValueKind::Byte, 1, 1, 1) }

        fn reset(&mut self, _seed: i32, _options: &Options, mut obs: Slots<'_>, _infos: Slots<'_>) -> Result<()> {
            self.state = 0;
            obs.f32_mut("state")?[0] = 0.0;
            Ok(())
        }

        fn step(&mut self, actions: &KeyValues, mut obs: Slots<'_>, _infos: Slots<'_>) -> Result<Transition> {
            self.state += actions.get("delta").and_then(ValueBuffer::as_i32).map_or(0, |a| a[0]);
            obs.f32_mut("state")?[0] = self.state as f32;
            Ok(Transition::new(1.0f32, self.state >= 3, false))
        }

        fn render(&self, frame: &mut Frame) -> Result<()> {
            frame.fill(&[Value::Byte(self.state as u8)])
        }
    }

    #[test]
    fn dummy_env_runs() {
        let mut env = Instance::<CounterEnv>::make("", &Options::new()).unwrap();
        env.reset(0, &Options::new()).unwrap();
        let delta = |n: i32| KeyValues::new().with("delta", vec![n]).unwrap();
        let s1 = env.step(&delta(1)).unwrap();
        assert_eq!(s1.observations.get("state").and_then(ValueBuffer::as_f32), Some(&[1.0][..]));
        assert!(!s1.terminated);
        let s2 = env.step(&delta(2)).unwrap();
        assert!(s2.terminated);
        assert_eq!(env.render().unwrap().as_bytes(), Some(&[3][..]));
        env.close().unwrap();
    }

    #[test]
    fn spaces_box_and_multi_discrete() {
        let mut rng = StdRng::seed_from_u64(42);
        let b = BoxSpace::new_f32(vec![0.0, -1.0, 2.5], vec![1.0, 1.0, 3.5]).unwrap();
        for _ in 0..100 {
            let v = b.sample(&mut rng);
            assert!(b.contains(&v));
            let x = v.as_f32().unwrap();
            assert!(x[0] >= 0.0 && x[0] <= 1.0);
        }

        let md = MultiDiscrete::new(vec![1, 2, 5, 10]).unwrap();
        for _ in 0..50 {
            let v = md.sample(&mut rng);
            assert!(md.contains(&v));
            let x = v.as_i32().unwrap();
            assert_eq!(x[0], 0); // n=1 always samples/contains only 0
            assert!(x[1] < 2 && x[2] < 5 && x[3] < 10);
        }

        // Negative containment checks
        assert!(!md.contains(&ValueBuffer::Int(vec![0, 2, 5, 10])));
        assert!(!md.contains(&ValueBuffer::Float(vec![0.0; 4])));
    }

    #[test]
    fn sine_wave_runs_and_renders() {
        let mut env = Instance::<SineWaveEnv>::make("rgb_array", &Options::new()).unwrap();
        env.reset(0, &Options::new()).unwrap();
        let act = KeyValues::new().with("act1", vec![3]).unwrap();
        for _ in 0..10 {
            let s = env.step(&act).unwrap();
            assert_eq!(s.observations.get("obs1").map(ValueBuffer::len), Some(10));
            if s.done() { break; }
        }
        let frame = env.render().unwrap();
        assert_eq!((frame.width(), frame.height(), frame.channels()), (8, 8, 3));
    }
}
