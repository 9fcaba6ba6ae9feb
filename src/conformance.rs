//! Host-side conformance harness.
//!
//! Drives an environment through the module contract and checks the
//! properties every module must hold: descriptor validity, lifecycle
//! enforcement, shape stability, in-place buffer reuse, render idempotence,
//! seeded determinism and rejection of every call after `close`.
//!
//! The same checks run over an in-process [`Instance`] or over a
//! [`ModuleInstance`] reached through the C symbols.

use tracing::{debug, info};

use crate::core::{Env, GymError, Result};
use crate::ffi::{CgymStatus, ModuleApi, ModuleInstance};
use crate::frame::Frame;
use crate::instance::{Instance, MakeResult, Snapshot};
use crate::kv::KeyValues;
use crate::options::Options;
use crate::spaces::{DynSpace, SpaceMap};
use crate::utils::rng::{rng_from_seed, RngStream, SeedSequence};
use crate::value::ValueKind;

/// What the harness needs from an instance, wherever it lives.
pub trait Driver {
    fn make_result(&self) -> &MakeResult;
    fn reset(&mut self, seed: i32) -> Result<Snapshot>;
    fn step(&mut self, actions: &KeyValues) -> Result<Snapshot>;
    fn render(&mut self) -> Result<Frame>;
    fn close(&mut self) -> Result<()>;

    /// Whether replays must match. Modules do not say, so they are held to it.
    fn deterministic(&self) -> bool { true }
}

impl<E: Env> Driver for Instance<E> {
    fn make_result(&self) -> &MakeResult { Instance::make_result(self) }

    fn reset(&mut self, seed: i32) -> Result<Snapshot> {
        Instance::reset(self, seed, &Options::new()).map(Snapshot::from)
    }

    fn step(&mut self, actions: &KeyValues) -> Result<Snapshot> {
        Instance::step(self, actions).map(Snapshot::from)
    }

    fn render(&mut self) -> Result<Frame> { Instance::render(self).cloned() }

    fn close(&mut self) -> Result<()> { Instance::close(self) }

    fn deterministic(&self) -> bool { self.spec().deterministic }
}

impl Driver for ModuleInstance {
    fn make_result(&self) -> &MakeResult { ModuleInstance::make_result(self) }

    fn reset(&mut self, seed: i32) -> Result<Snapshot> { ModuleInstance::reset(self, seed, &Options::new()) }

    fn step(&mut self, actions: &KeyValues) -> Result<Snapshot> { ModuleInstance::step(self, actions) }

    fn render(&mut self) -> Result<Frame> { ModuleInstance::render(self) }

    fn close(&mut self) -> Result<()> { ModuleInstance::close(self) }
}

/// Harness settings.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HarnessConfig {
    /// Root seed for episode seeds and sampled actions.
    pub seed: u64,
    pub episodes: u32,
    pub max_steps_per_episode: u32,
    /// Replay every episode on a second instance and compare the traces.
    /// Skipped for environments that declare themselves non-deterministic.
    pub check_determinism: bool,
    /// Checked against `cgym_get_env_version` by [`run_module`].
    pub expected_env_version: Option<i32>,
    /// How [`run_module`] reads the untagged reward.
    pub reward_kind: ValueKind,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            episodes: 3,
            max_steps_per_episode: 500,
            check_determinism: true,
            expected_env_version: None,
            reward_kind: ValueKind::Float,
        }
    }
}

/// Totals over all checked episodes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Report {
    pub episodes: u32,
    pub steps: u64,
    pub total_reward: f64,
}

fn violation(message: impl Into<String>) -> GymError {
    GymError::Conformance(message.into())
}

/// Lifecycle errors from either side of the boundary.
pub fn is_lifecycle(err: &GymError) -> bool {
    match err {
        GymError::Lifecycle { .. } => true,
        GymError::Module { code, .. } => *code == CgymStatus::Lifecycle as i32,
        _ => false,
    }
}

fn expect_lifecycle<T>(what: &str, result: Result<T>) -> Result<()> {
    match result {
        Err(err) if is_lifecycle(&err) => Ok(()),
        Err(err) => Err(violation(format!("{what}: expected a lifecycle error, got `{err}`"))),
        Ok(_) => Err(violation(format!("{what}: expected a lifecycle error, call succeeded"))),
    }
}

fn check_spaces(which: &str, spaces: &SpaceMap) -> Result<()> {
    for (key, space) in spaces.iter() {
        let descriptor = space.descriptor();
        let decoded = DynSpace::from_descriptor(space.value_type(), descriptor.view())
            .map_err(|err| violation(format!("{which} space `{key}` has an invalid descriptor: {err}")))?;
        if &decoded != space {
            return Err(violation(format!("{which} space `{key}` does not round-trip through its descriptor")));
        }
    }
    Ok(())
}

/// One played episode.
#[derive(Clone, Debug, PartialEq)]
struct Trace {
    snapshots: Vec<Snapshot>,
    frame: Frame,
}

impl Trace {
    fn without_addrs(mut self) -> Self {
        for s in &mut self.snapshots {
            s.observation_addrs.clear();
        }
        self
    }
}

fn check_snapshot(what: &str, make: &MakeResult, snapshot: &Snapshot) -> Result<()> {
    snapshot
        .observations
        .check_layout(&make.observation_spaces.layout())
        .map_err(|err| violation(format!("{what} observations: {err}")))
}

fn play<D: Driver>(driver: &mut D, seed: i32, mut rng: RngStream, config: &HarnessConfig) -> Result<Trace> {
    let make = driver.make_result().clone();
    let reset = driver.reset(seed)?;
    check_snapshot("reset", &make, &reset)?;
    let info_layout = reset.infos.layout();
    let addrs = reset.observation_addrs.clone();

    let mut snapshots = vec![reset];
    for step in 0..config.max_steps_per_episode {
        let actions = make.action_spaces.sample(&mut rng);
        let snapshot = driver.step(&actions)?;
        check_snapshot("step", &make, &snapshot)?;
        if snapshot.infos.layout() != info_layout {
            return Err(violation(format!("info layout changed at step {step}")));
        }
        if snapshot.observation_addrs != addrs {
            return Err(violation(format!("observation buffers moved at step {step}")));
        }
        if snapshot.reward.is_none() {
            return Err(violation("step returned no reward"));
        }
        let done = snapshot.done();
        snapshots.push(snapshot);
        if done {
            break;
        }
    }

    let frame = driver.render()?;
    if driver.render()? != frame {
        return Err(violation("render is not idempotent"));
    }
    Ok(Trace { snapshots, frame })
}

/// Run every check over instances produced by `open`.
///
/// `open` is called once for the instance under test and, with determinism
/// checking enabled, once more per episode for the replay.
pub fn run<D, F>(mut open: F, config: &HarnessConfig) -> Result<Report>
where
    D: Driver,
    F: FnMut() -> Result<D>,
{
    let mut driver = open()?;
    let make = driver.make_result().clone();
    check_spaces("observation", &make.observation_spaces)?;
    check_spaces("action", &make.action_spaces)?;

    let replays = config.check_determinism && driver.deterministic();
    if config.check_determinism && !replays {
        debug!("environment is not deterministic, skipping replays");
    }

    let mut seeds = SeedSequence::new(config.seed);
    expect_lifecycle("step before reset", driver.step(&make.action_spaces.sample(&mut seeds.next_rng())))?;

    let mut report = Report::default();
    for episode in 0..config.episodes {
        let seed = seeds.next_env_seed();
        let action_seed = seeds.next_subseed();
        let trace = play(&mut driver, seed, rng_from_seed(action_seed), config)?;
        let steps = trace.snapshots.len() - 1;
        report.steps += steps as u64;
        report.total_reward += trace.snapshots.iter().filter_map(|s| s.reward).map(|r| r.as_f64()).sum::<f64>();
        report.episodes += 1;
        debug!(episode, seed, steps, "episode checked");

        if replays {
            let mut replay = open()?;
            let again = play(&mut replay, seed, rng_from_seed(action_seed), config)?;
            replay.close()?;
            if again.without_addrs() != trace.without_addrs() {
                return Err(violation(format!("episode {episode} with seed {seed} is not reproducible")));
            }
        }
    }

    driver.close()?;
    expect_lifecycle("reset after close", driver.reset(0))?;
    expect_lifecycle("step after close", driver.step(&make.action_spaces.zeros()))?;
    expect_lifecycle("render after close", driver.render())?;
    expect_lifecycle("close after close", driver.close())?;

    info!(episodes = report.episodes, steps = report.steps, total_reward = report.total_reward, "conformance passed");
    Ok(report)
}

/// Refuse a module whose ABI or environment version differs from what the host expects.
pub fn check_versions(api: &ModuleApi, expected_env_version: Option<i32>) -> Result<()> {
    api.check_versions(expected_env_version)?;
    debug!(protocol = api.protocol_version(), env_version = api.env_version(), "module versions accepted");
    Ok(())
}

/// Version checks, then [`run`] over instances made through the module's symbols.
pub fn run_module(api: ModuleApi, render_mode: &str, options: &Options, config: &HarnessConfig) -> Result<Report> {
    check_versions(&api, config.expected_env_version)?;
    run(|| ModuleInstance::make(api, render_mode, options).map(|m| m.with_reward_kind(config.reward_kind)), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EnvSpec, Transition};
    use crate::envs::SineWaveEnv;
    use crate::frame::FrameShape;
    use crate::kv::Slots;
    use crate::spaces::{BoxSpace, MultiDiscrete};
    use crate::value::Value;

    #[test]
    fn sine_wave_passes() {
        let config = HarnessConfig { episodes: 2, ..HarnessConfig::default() };
        let report = run(|| Instance::<SineWaveEnv>::make("rgb_array", &Options::new()), &config).unwrap();
        assert_eq!(report.episodes, 2);
        assert_eq!(report.steps, 80);
    }

    #[test]
    fn step_limit_caps_each_episode() {
        let config = HarnessConfig { episodes: 1, max_steps_per_episode: 7, ..HarnessConfig::default() };
        let report = run(|| Instance::<SineWaveEnv>::make("none", &Options::new()), &config).unwrap();
        assert_eq!(report.steps, 7);
    }

    /// Renders a counter that changes on every render call.
    struct Flicker {
        renders: std::cell::Cell<u8>,
    }

    impl Env for Flicker {
        fn spec() -> EnvSpec { EnvSpec::new("Flicker-v0", 1) }

        fn make(_render_mode: &str, _options: &Options) -> Result<Self> {
            Ok(Self { renders: std::cell::Cell::new(0) })
        }

        fn observation_spaces(&self) -> SpaceMap {
            SpaceMap::new().with("x", BoxSpace::uniform_f32(1, 0.0, 1.0).unwrap()).unwrap()
        }

        fn action_spaces(&self) -> SpaceMap {
            SpaceMap::new().with("a", MultiDiscrete::new(vec![2]).unwrap()).unwrap()
        }

        fn frame_shape(&self) -> FrameShape { FrameShape::new(crate::value::ValueKind::Byte, 1, 1, 1) }

        fn reset(&mut self, _seed: i32, _options: &Options, _obs: Slots<'_>, _infos: Slots<'_>) -> Result<()> { Ok(()) }

        fn step(&mut self, _actions: &KeyValues, _obs: Slots<'_>, _infos: Slots<'_>) -> Result<Transition> {
            Ok(Transition::new(0.0f32, true, false))
        }

        fn render(&self, frame: &mut Frame) -> Result<()> {
            self.renders.set(self.renders.get().wrapping_add(1));
            frame.fill(&[Value::Byte(self.renders.get())])
        }
    }

    #[test]
    fn non_idempotent_render_is_a_violation() {
        let err = run(|| Instance::<Flicker>::make("none", &Options::new()), &HarnessConfig::default()).unwrap_err();
        assert!(matches!(err, GymError::Conformance(ref m) if m.contains("idempotent")));
    }

    static INSTANCES_MADE: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

    /// Rewards the number of instances made before it, so no two instances agree.
    struct Drifting<const DETERMINISTIC: bool> {
        offset: u32,
        steps: u32,
    }

    impl<const DETERMINISTIC: bool> Env for Drifting<DETERMINISTIC> {
        fn spec() -> EnvSpec { EnvSpec { deterministic: DETERMINISTIC, ..EnvSpec::new("Drifting-v0", 1) } }

        fn make(_render_mode: &str, _options: &Options) -> Result<Self> {
            let offset = INSTANCES_MADE.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(Self { offset, steps: 0 })
        }

        fn observation_spaces(&self) -> SpaceMap {
            SpaceMap::new().with("x", BoxSpace::uniform_f32(1, 0.0, 1.0).unwrap()).unwrap()
        }

        fn action_spaces(&self) -> SpaceMap {
            SpaceMap::new().with("a", MultiDiscrete::new(vec![2]).unwrap()).unwrap()
        }

        fn frame_shape(&self) -> FrameShape { FrameShape::new(crate::value::ValueKind::Byte, 1, 1, 1) }

        fn reset(&mut self, _seed: i32, _options: &Options, _obs: Slots<'_>, _infos: Slots<'_>) -> Result<()> {
            self.steps = 0;
            Ok(())
        }

        fn step(&mut self, _actions: &KeyValues, _obs: Slots<'_>, _infos: Slots<'_>) -> Result<Transition> {
            self.steps += 1;
            Ok(Transition::new(self.offset as f32, self.steps >= 3, false))
        }

        fn render(&self, frame: &mut Frame) -> Result<()> { frame.fill(&[Value::Byte(0)]) }
    }

    #[test]
    fn replays_only_bind_deterministic_envs() {
        let config = HarnessConfig { episodes: 2, ..HarnessConfig::default() };
        let report = run(|| Instance::<Drifting<false>>::make("none", &Options::new()), &config).unwrap();
        assert_eq!(report.episodes, 2);
        assert_eq!(report.steps, 6);

        let err = run(|| Instance::<Drifting<true>>::make("none", &Options::new()), &config).unwrap_err();
        assert!(matches!(err, GymError::Conformance(ref m) if m.contains("not reproducible")));
    }

    #[test]
    fn module_lifecycle_status_counts_as_lifecycle() {
        assert!(is_lifecycle(&GymError::Module { code: 3, message: String::new() }));
        assert!(!is_lifecycle(&GymError::Module { code: 2, message: String::new() }));
        assert!(expect_lifecycle("x", Ok::<(), GymError>(())).is_err());
    }
}
