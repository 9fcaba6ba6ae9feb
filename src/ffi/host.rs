//! Host side of the ABI: drive a module through its function table.
//!
//! Everything read from the module is copied into owned Rust values before
//! the next call, since the module overwrites its buffers in place.

use std::ffi::{c_char, CStr, CString};
use std::ptr;

use tracing::warn;

use super::types::{
    read_array, read_size, CgymFrame, CgymHandle, CgymKeyValue, CgymMakeData, CgymOption, CgymResetData,
    CgymStatus, CgymStepData, CgymValue, CGYM_VERSION,
};
use crate::core::{GymError, Result};
use crate::frame::Frame;
use crate::instance::{MakeResult, Snapshot};
use crate::kv::KeyValues;
use crate::options::Options;
use crate::spaces::{DynSpace, SpaceMap};
use crate::value::{ValueBuffer, ValueKind, ValueType};

pub type VersionFn = unsafe extern "C" fn() -> i32;
pub type MakeFn = unsafe extern "C" fn(
    *const c_char,
    *const CgymOption,
    i32,
    *mut CgymHandle,
    *mut *const CgymMakeData,
) -> CgymStatus;
pub type ResetFn =
    unsafe extern "C" fn(CgymHandle, i32, *const CgymOption, i32, *mut *const CgymResetData) -> CgymStatus;
pub type StepFn = unsafe extern "C" fn(CgymHandle, *const CgymKeyValue, i32, *mut *const CgymStepData) -> CgymStatus;
pub type RenderFn = unsafe extern "C" fn(CgymHandle, *mut *const CgymFrame) -> CgymStatus;
pub type CloseFn = unsafe extern "C" fn(CgymHandle) -> CgymStatus;
pub type LastErrorFn = unsafe extern "C" fn() -> *const c_char;

/// The symbols of one module. Only build this from real `cgym_*` symbols;
/// every method calls straight through these pointers.
#[derive(Clone, Copy, Debug)]
pub struct ModuleApi {
    pub protocol_version: VersionFn,
    pub env_version: VersionFn,
    pub make: MakeFn,
    pub reset: ResetFn,
    pub step: StepFn,
    pub render: RenderFn,
    pub close: CloseFn,
    pub last_error: LastErrorFn,
}

impl ModuleApi {
    pub fn protocol_version(&self) -> i32 { unsafe { (self.protocol_version)() } }

    pub fn env_version(&self) -> i32 { unsafe { (self.env_version)() } }

    /// Turn a status into a result, fetching the module's message on failure.
    pub fn check(&self, status: CgymStatus) -> Result<()> {
        if status.is_ok() {
            return Ok(());
        }
        let p = unsafe { (self.last_error)() };
        let message = if p.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
        };
        Err(GymError::Module { code: status as i32, message })
    }

    /// Refuse modules built against another ABI or, if given, another environment version.
    pub fn check_versions(&self, expected_env_version: Option<i32>) -> Result<()> {
        let found = self.protocol_version();
        if found != CGYM_VERSION {
            return Err(GymError::Version { what: "protocol", expected: CGYM_VERSION, found });
        }
        if let Some(expected) = expected_env_version {
            let found = self.env_version();
            if found != expected {
                return Err(GymError::Version { what: "environment", expected, found });
            }
        }
        Ok(())
    }
}

/// Copy a data collection, recording the address of every buffer.
///
/// # Safety
/// `p` must point to `size` valid entries.
pub unsafe fn read_key_values(p: *const CgymKeyValue, size: i32) -> Result<(KeyValues, Vec<usize>)> {
    let entries = unsafe { read_array(p, size, "key-value") }?;
    let mut values = KeyValues::with_capacity(entries.len());
    let mut addrs = Vec::with_capacity(entries.len());
    for entry in entries {
        let (key, buffer) = unsafe { entry.entry() }?;
        values.insert(key, buffer.to_buffer())?;
        addrs.push(unsafe { entry.value_buffer.b } as usize);
    }
    Ok((values, addrs))
}

/// Decode and validate a space-descriptor collection.
///
/// # Safety
/// `p` must point to `size` valid entries.
pub unsafe fn read_spaces(p: *const CgymKeyValue, size: i32) -> Result<SpaceMap> {
    let mut spaces = SpaceMap::new();
    for entry in unsafe { read_array(p, size, "space") }? {
        let (key, tag, buffer) = unsafe { entry.descriptor() }?;
        spaces.insert(key, DynSpace::from_descriptor(tag, buffer)?)?;
    }
    Ok(spaces)
}

/// Copy a frame.
///
/// # Safety
/// `p` must point to a valid frame whose buffer holds `width * height * channels` elements.
pub unsafe fn read_frame(p: *const CgymFrame) -> Result<Frame> {
    let raw = unsafe { p.as_ref() }.ok_or_else(|| GymError::InvalidArgument("null frame".into()))?;
    let kind = ValueKind::try_from(ValueType::try_from(raw.value_type)?)?;
    let width = read_size(raw.value_buffer_width, "frame width")?;
    let height = read_size(raw.value_buffer_height, "frame height")?;
    let channels = read_size(raw.value_buffer_channels, "frame channels")?;
    let len = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .ok_or_else(|| GymError::InvalidArgument("frame too large".into()))?;
    let buffer = unsafe { raw.value_buffer.view(kind, len) }?.to_buffer();
    Frame::from_buffer(width, height, channels, buffer)
}

/// C views of host-owned options, alive as long as this value.
struct COptions {
    _names: Vec<CString>,
    raw: Vec<CgymOption>,
}

impl COptions {
    fn new(options: &Options) -> Result<Self> {
        let mut names = Vec::with_capacity(options.len());
        let mut raw = Vec::with_capacity(options.len());
        for (name, value) in options.iter() {
            let c = CString::new(name).map_err(|_| GymError::InvalidArgument(format!("option `{name}` contains NUL")))?;
            raw.push(CgymOption { name: c.as_ptr(), value_type: value.kind().value_type() as i32, value: CgymValue::from_value(value) });
            names.push(c);
        }
        Ok(Self { _names: names, raw })
    }

    fn as_ptr(&self) -> *const CgymOption {
        if self.raw.is_empty() { ptr::null() } else { self.raw.as_ptr() }
    }

    fn len(&self) -> i32 { i32::try_from(self.raw.len()).unwrap_or(i32::MAX) }
}

/// C views of a host-owned action collection.
struct CActions {
    _keys: Vec<CString>,
    _buffers: Vec<ValueBuffer>,
    raw: Vec<CgymKeyValue>,
}

impl CActions {
    fn new(actions: &KeyValues) -> Result<Self> {
        let mut keys = Vec::with_capacity(actions.len());
        let mut buffers = Vec::with_capacity(actions.len());
        let mut raw = Vec::with_capacity(actions.len());
        for kv in actions {
            let key = CString::new(kv.key()).map_err(|_| GymError::InvalidArgument(format!("action `{}` contains NUL", kv.key())))?;
            let buffer = kv.buffer().clone();
            raw.push(CgymKeyValue::new(&key, kv.kind().value_type(), &buffer)?);
            keys.push(key);
            buffers.push(buffer);
        }
        Ok(Self { _keys: keys, _buffers: buffers, raw })
    }

    fn as_ptr(&self) -> *const CgymKeyValue {
        if self.raw.is_empty() { ptr::null() } else { self.raw.as_ptr() }
    }

    fn len(&self) -> i32 { i32::try_from(self.raw.len()).unwrap_or(i32::MAX) }
}

/// One instance living inside a module, seen from the host.
pub struct ModuleInstance {
    api: ModuleApi,
    handle: CgymHandle,
    make: MakeResult,
    reward_kind: ValueKind,
    open: bool,
}

impl ModuleInstance {
    /// `cgym_make`, then copy and validate the space descriptors.
    pub fn make(api: ModuleApi, render_mode: &str, options: &Options) -> Result<Self> {
        let mode = CString::new(render_mode).map_err(|_| GymError::InvalidArgument("render mode contains NUL".into()))?;
        let options = COptions::new(options)?;
        let mut handle: CgymHandle = 0;
        let mut data: *const CgymMakeData = ptr::null();
        api.check(unsafe { (api.make)(mode.as_ptr(), options.as_ptr(), options.len(), &mut handle, &mut data) })?;

        let mut instance = Self {
            api,
            handle,
            make: MakeResult { observation_spaces: SpaceMap::new(), action_spaces: SpaceMap::new() },
            reward_kind: ValueKind::Float,
            open: true,
        };
        let data = unsafe { data.as_ref() }.ok_or_else(|| GymError::Conformance("make succeeded without data".into()))?;
        instance.make = MakeResult {
            observation_spaces: unsafe { read_spaces(data.observation_spaces, data.observation_spaces_size) }?,
            action_spaces: unsafe { read_spaces(data.action_spaces, data.action_spaces_size) }?,
        };
        Ok(instance)
    }

    /// The reward carries no tag on the wire; hosts assume float32 unless told otherwise.
    pub fn with_reward_kind(mut self, kind: ValueKind) -> Self {
        self.reward_kind = kind;
        self
    }

    pub fn handle(&self) -> CgymHandle { self.handle }
    pub fn make_result(&self) -> &MakeResult { &self.make }

    pub fn reset(&mut self, seed: i32, options: &Options) -> Result<Snapshot> {
        let options = COptions::new(options)?;
        let mut data: *const CgymResetData = ptr::null();
        self.api
            .check(unsafe { (self.api.reset)(self.handle, seed, options.as_ptr(), options.len(), &mut data) })?;
        let data = unsafe { data.as_ref() }.ok_or_else(|| GymError::Conformance("reset succeeded without data".into()))?;
        let (observations, observation_addrs) = unsafe { read_key_values(data.observations, data.observations_size) }?;
        let (infos, _) = unsafe { read_key_values(data.infos, data.infos_size) }?;
        Ok(Snapshot { observations, infos, reward: None, terminated: false, truncated: false, observation_addrs })
    }

    pub fn step(&mut self, actions: &KeyValues) -> Result<Snapshot> {
        let actions = CActions::new(actions)?;
        let mut data: *const CgymStepData = ptr::null();
        self.api
            .check(unsafe { (self.api.step)(self.handle, actions.as_ptr(), actions.len(), &mut data) })?;
        let data = unsafe { data.as_ref() }.ok_or_else(|| GymError::Conformance("step succeeded without data".into()))?;
        let (observations, observation_addrs) = unsafe { read_key_values(data.observations, data.observations_size) }?;
        let (infos, _) = unsafe { read_key_values(data.infos, data.infos_size) }?;
        Ok(Snapshot {
            observations,
            infos,
            reward: Some(unsafe { data.reward.to_value(self.reward_kind) }),
            terminated: data.terminated,
            truncated: data.truncated,
            observation_addrs,
        })
    }

    pub fn render(&mut self) -> Result<Frame> {
        let mut frame: *const CgymFrame = ptr::null();
        self.api.check(unsafe { (self.api.render)(self.handle, &mut frame) })?;
        unsafe { read_frame(frame) }
    }

    /// `cgym_close`. Calling it again forwards to the module, which reports a lifecycle error.
    pub fn close(&mut self) -> Result<()> {
        self.open = false;
        self.api.check(unsafe { (self.api.close)(self.handle) })
    }
}

impl Drop for ModuleInstance {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.close() {
                warn!(handle = self.handle, error = %err, "closing module instance on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance").field("handle", &self.handle).field("open", &self.open).finish()
    }
}
