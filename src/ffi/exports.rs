//! Module side of the ABI: the generic bodies behind the symbols emitted by
//! [`export_env!`](crate::export_env).
//!
//! Every entry point validates its pointers, resets its out-parameters, runs
//! the operation under `catch_unwind` and records a message for
//! `cgym_last_error` when it fails.

use std::any::Any;
use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, warn};

use super::handle::HandleTable;
use super::types::{
    read_array, CgymFrame, CgymHandle, CgymKeyValue, CgymMakeData, CgymOption, CgymResetData, CgymStatus,
    CgymStepData, CgymValue, CgymValueBuffer,
};
use crate::core::{Env, GymError, Result};
use crate::instance::Instance;
use crate::kv::KeyValues;
use crate::lifecycle::{LifecycleState, Operation};
use crate::options::Options;
use crate::spaces::{DynSpace, SpaceMap};
use crate::value::{Value, ValueBuffer, ValueKind};

/// An [`Instance`] plus the C views of its buffers.
///
/// The C structs point into heap memory owned by this value (key strings,
/// descriptors, mirror arrays) or by the instance (observations, infos, frame),
/// so they stay valid until `cgym_close`.
pub struct FfiInstance<E: Env> {
    instance: Instance<E>,
    _keys: Vec<CString>,
    _descriptors: Vec<ValueBuffer>,
    _observation_spaces: Vec<CgymKeyValue>,
    _action_spaces: Vec<CgymKeyValue>,
    observations: Vec<CgymKeyValue>,
    infos: Vec<CgymKeyValue>,
    make_data: CgymMakeData,
    reset_data: CgymResetData,
    step_data: CgymStepData,
    frame: CgymFrame,
}

// SAFETY: the raw pointers only reference heap memory owned by this value,
// and every access goes through the handle table's per-instance mutex.
unsafe impl<E: Env + Send> Send for FfiInstance<E> {}

fn intern<'a>(keys: &'a mut Vec<CString>, key: &str) -> Result<&'a CStr> {
    let c = CString::new(key).map_err(|_| GymError::InvalidArgument(format!("key `{}` contains NUL", key.escape_debug())))?;
    keys.push(c);
    Ok(&keys[keys.len() - 1])
}

fn describe(keys: &mut Vec<CString>, descriptors: &mut Vec<ValueBuffer>, spaces: &SpaceMap) -> Result<Vec<CgymKeyValue>> {
    let mut out = Vec::with_capacity(spaces.len());
    for (key, space) in spaces.iter() {
        if let DynSpace::Box(b) = space {
            if b.element_kind() != ValueKind::Float {
                return Err(GymError::Resource(format!(
                    "Box space `{key}` is {}, but Box descriptors cross the ABI as float32",
                    b.element_kind()
                )));
            }
        }
        let descriptor = space.descriptor();
        out.push(CgymKeyValue::new(intern(keys, key)?, space.value_type(), &descriptor)?);
        // Moving the buffer does not move its heap data.
        descriptors.push(descriptor);
    }
    Ok(out)
}

fn mirror(keys: &mut Vec<CString>, values: &KeyValues) -> Result<Vec<CgymKeyValue>> {
    values
        .iter()
        .map(|kv| CgymKeyValue::new(intern(keys, kv.key())?, kv.kind().value_type(), kv.buffer()))
        .collect()
}

fn refresh(mirror: &mut [CgymKeyValue], values: &KeyValues) {
    for (m, kv) in mirror.iter_mut().zip(values) {
        m.value_buffer = CgymValueBuffer::of(kv.buffer());
    }
}

fn count(entries: &[CgymKeyValue]) -> i32 {
    // Bounded by MAX_COLLECTION_LEN at make.
    i32::try_from(entries.len()).unwrap_or(i32::MAX)
}

fn array_ptr(entries: &mut [CgymKeyValue]) -> *mut CgymKeyValue {
    if entries.is_empty() { ptr::null_mut() } else { entries.as_mut_ptr() }
}

fn dim(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| GymError::Resource(format!("frame dimension {n} exceeds i32")))
}

impl<E: Env> FfiInstance<E> {
    pub fn new(instance: Instance<E>) -> Result<Self> {
        let mut keys = Vec::new();
        let mut descriptors = Vec::new();
        let make = instance.make_result();
        let mut observation_spaces = describe(&mut keys, &mut descriptors, &make.observation_spaces)?;
        let mut action_spaces = describe(&mut keys, &mut descriptors, &make.action_spaces)?;
        let mut observations = mirror(&mut keys, instance.observations())?;
        let mut infos = mirror(&mut keys, instance.infos())?;

        let make_data = CgymMakeData {
            observation_spaces_size: count(&observation_spaces),
            observation_spaces: array_ptr(&mut observation_spaces),
            action_spaces_size: count(&action_spaces),
            action_spaces: array_ptr(&mut action_spaces),
        };
        let reset_data = CgymResetData {
            observations_size: count(&observations),
            observations: array_ptr(&mut observations),
            infos_size: count(&infos),
            infos: array_ptr(&mut infos),
        };
        let step_data = CgymStepData {
            observations_size: reset_data.observations_size,
            observations: reset_data.observations,
            reward: CgymValue::from_value(Value::zero(instance.spec().reward_kind)),
            terminated: false,
            truncated: false,
            infos_size: reset_data.infos_size,
            infos: reset_data.infos,
        };
        Ok(Self {
            instance,
            _keys: keys,
            _descriptors: descriptors,
            _observation_spaces: observation_spaces,
            _action_spaces: action_spaces,
            observations,
            infos,
            make_data,
            reset_data,
            step_data,
            frame: CgymFrame::default(),
        })
    }

    pub fn instance(&self) -> &Instance<E> { &self.instance }

    pub fn make_data(&self) -> *const CgymMakeData {
        &self.make_data as *const CgymMakeData
    }

    pub fn reset(&mut self, seed: i32, options: &Options) -> Result<*const CgymResetData> {
        let result = self.instance.reset(seed, options)?;
        refresh(&mut self.observations, result.observations);
        refresh(&mut self.infos, result.infos);
        Ok(&self.reset_data as *const CgymResetData)
    }

    /// # Safety
    /// Every entry of `actions` must describe a valid key and buffer.
    pub unsafe fn step(&mut self, actions: &[CgymKeyValue]) -> Result<*const CgymStepData> {
        let result = self.instance.step_with(actions.iter().map(|kv| unsafe { kv.entry() }))?;
        refresh(&mut self.observations, result.observations);
        refresh(&mut self.infos, result.infos);
        self.step_data.reward = CgymValue::from_value(result.reward);
        self.step_data.terminated = result.terminated;
        self.step_data.truncated = result.truncated;
        Ok(&self.step_data as *const CgymStepData)
    }

    pub fn render(&mut self) -> Result<*const CgymFrame> {
        let frame = self.instance.render()?;
        self.frame = CgymFrame {
            value_type: frame.kind().value_type() as i32,
            value_buffer_width: dim(frame.width())?,
            value_buffer_height: dim(frame.height())?,
            value_buffer_channels: dim(frame.channels())?,
            value_buffer: CgymValueBuffer::of(frame.buffer()),
        };
        Ok(&self.frame as *const CgymFrame)
    }

    pub fn close(&mut self) -> Result<()> {
        self.instance.close()
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: &str) {
    let message = CString::new(message.replace('\0', " ")).ok();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

/// Message of the last failed call on this thread, or null.
///
/// The string stays valid until the next ABI call on the same thread.
pub fn last_error() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(ptr::null(), |m| m.as_ptr()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Run `f` with panics contained and errors turned into a status.
fn guarded<F>(op: Operation, f: F) -> CgymStatus
where
    F: FnOnce() -> Result<()>,
{
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
    let outcome = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        error!(op = %op, panic = %message, "environment panicked");
        Err(GymError::Internal(format!("panic during `{op}`: {message}")))
    });
    match outcome {
        Ok(()) => CgymStatus::Ok,
        Err(err) => {
            set_last_error(&err.to_string());
            CgymStatus::from(&err)
        }
    }
}

fn lookup<T>(table: &HandleTable<T>, handle: CgymHandle, op: Operation) -> Result<Arc<Mutex<T>>> {
    table.get(handle).ok_or_else(|| {
        let state = if handle == 0 { LifecycleState::Unmade } else { LifecycleState::Closed };
        warn!(handle, op = %op, "unknown or closed handle");
        GymError::Lifecycle { op, state }
    })
}

fn lock<T>(entry: &Mutex<T>, op: Operation) -> Result<MutexGuard<'_, T>> {
    entry
        .lock()
        .map_err(|_| GymError::Internal(format!("`{op}` on an instance poisoned by an earlier panic")))
}

unsafe fn out<'a, T>(p: *mut T, what: &str) -> Result<&'a mut T> {
    unsafe { p.as_mut() }.ok_or_else(|| GymError::InvalidArgument(format!("null {what} output pointer")))
}

unsafe fn read_options(options: *const CgymOption, size: i32) -> Result<Options> {
    let mut out = Options::new();
    for option in unsafe { read_array(options, size, "options") }? {
        let (name, value) = unsafe { option.entry() }?;
        out.insert(name, value)?;
    }
    Ok(out)
}

unsafe fn read_render_mode<'a>(p: *const c_char) -> Result<&'a str> {
    if p.is_null() {
        return Ok("");
    }
    unsafe { CStr::from_ptr(p) }
        .to_str()
        .map_err(|_| GymError::InvalidArgument("render mode is not valid UTF-8".into()))
}

/// Body of `cgym_make`.
///
/// # Safety
/// `render_mode` must be null or a NUL-terminated string, `options` must point
/// to `options_size` valid entries, and both out pointers must be writable.
pub unsafe fn make<E: Env + Send>(
    table: &HandleTable<FfiInstance<E>>,
    render_mode: *const c_char,
    options: *const CgymOption,
    options_size: i32,
    out_handle: *mut CgymHandle,
    out_data: *mut *const CgymMakeData,
) -> CgymStatus {
    guarded(Operation::Make, || {
        let out_handle = unsafe { out(out_handle, "handle") }?;
        let out_data = unsafe { out(out_data, "make data") }?;
        *out_handle = 0;
        *out_data = ptr::null();
        let render_mode = unsafe { read_render_mode(render_mode) }?;
        let options = unsafe { read_options(options, options_size) }?;
        let instance = FfiInstance::new(Instance::<E>::make(render_mode, &options)?)?;
        let (handle, entry) = table.insert(instance);
        *out_data = lock(&entry, Operation::Make)?.make_data();
        *out_handle = handle;
        Ok(())
    })
}

/// Body of `cgym_reset`.
///
/// # Safety
/// `options` must point to `options_size` valid entries and `out_data` must be writable.
pub unsafe fn reset<E: Env + Send>(
    table: &HandleTable<FfiInstance<E>>,
    handle: CgymHandle,
    seed: i32,
    options: *const CgymOption,
    options_size: i32,
    out_data: *mut *const CgymResetData,
) -> CgymStatus {
    guarded(Operation::Reset, || {
        let out_data = unsafe { out(out_data, "reset data") }?;
        *out_data = ptr::null();
        let options = unsafe { read_options(options, options_size) }?;
        let entry = lookup(table, handle, Operation::Reset)?;
        *out_data = lock(&entry, Operation::Reset)?.reset(seed, &options)?;
        Ok(())
    })
}

/// Body of `cgym_step`.
///
/// # Safety
/// `actions` must point to `actions_size` valid entries and `out_data` must be writable.
pub unsafe fn step<E: Env + Send>(
    table: &HandleTable<FfiInstance<E>>,
    handle: CgymHandle,
    actions: *const CgymKeyValue,
    actions_size: i32,
    out_data: *mut *const CgymStepData,
) -> CgymStatus {
    guarded(Operation::Step, || {
        let out_data = unsafe { out(out_data, "step data") }?;
        *out_data = ptr::null();
        let actions = unsafe { read_array(actions, actions_size, "actions") }?;
        let entry = lookup(table, handle, Operation::Step)?;
        *out_data = unsafe { lock(&entry, Operation::Step)?.step(actions) }?;
        Ok(())
    })
}

/// Body of `cgym_render`.
///
/// # Safety
/// `out_frame` must be writable.
pub unsafe fn render<E: Env + Send>(
    table: &HandleTable<FfiInstance<E>>,
    handle: CgymHandle,
    out_frame: *mut *const CgymFrame,
) -> CgymStatus {
    guarded(Operation::Render, || {
        let out_frame = unsafe { out(out_frame, "frame") }?;
        *out_frame = ptr::null();
        let entry = lookup(table, handle, Operation::Render)?;
        *out_frame = lock(&entry, Operation::Render)?.render()?;
        Ok(())
    })
}

/// Body of `cgym_close`. The handle is invalid afterwards, even if the
/// instance had been poisoned by a panic.
pub fn close<E: Env + Send>(table: &HandleTable<FfiInstance<E>>, handle: CgymHandle) -> CgymStatus {
    guarded(Operation::Close, || {
        let entry = lookup(table, handle, Operation::Close)?;
        table.remove(handle);
        match entry.lock() {
            Ok(mut instance) => instance.close(),
            Err(_) => {
                warn!(handle, "closing an instance poisoned by an earlier panic");
                Ok(())
            }
        }
    })
}

/// Emit the `cgym_*` symbols of a loadable module for environment type `$env`.
///
/// Invoke once per cdylib, at module scope. Besides the `extern "C"` symbols
/// it defines `cgym_module_api()`, a [`ModuleApi`](crate::ffi::ModuleApi)
/// over those symbols for in-process hosts.
#[macro_export]
macro_rules! export_env {
    ($env:ty) => {
        static CGYM_INSTANCES: $crate::ffi::HandleTable<$crate::ffi::FfiInstance<$env>> =
            $crate::ffi::HandleTable::new();

        /// Structural ABI version.
        #[unsafe(no_mangle)]
        pub extern "C" fn cgym_protocol_version() -> i32 {
            $crate::ffi::CGYM_VERSION
        }

        /// Content version of the exported environment.
        #[unsafe(no_mangle)]
        pub extern "C" fn cgym_get_env_version() -> i32 {
            <$env as $crate::Env>::spec().version
        }

        /// # Safety
        /// Same contract as `cgym::ffi::exports::make`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn cgym_make(
            render_mode: *const ::std::ffi::c_char,
            options: *const $crate::ffi::CgymOption,
            options_size: i32,
            out_handle: *mut $crate::ffi::CgymHandle,
            out_data: *mut *const $crate::ffi::CgymMakeData,
        ) -> $crate::ffi::CgymStatus {
            unsafe {
                $crate::ffi::exports::make(&CGYM_INSTANCES, render_mode, options, options_size, out_handle, out_data)
            }
        }

        /// # Safety
        /// Same contract as `cgym::ffi::exports::reset`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn cgym_reset(
            handle: $crate::ffi::CgymHandle,
            seed: i32,
            options: *const $crate::ffi::CgymOption,
            options_size: i32,
            out_data: *mut *const $crate::ffi::CgymResetData,
        ) -> $crate::ffi::CgymStatus {
            unsafe { $crate::ffi::exports::reset(&CGYM_INSTANCES, handle, seed, options, options_size, out_data) }
        }

        /// # Safety
        /// Same contract as `cgym::ffi::exports::step`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn cgym_step(
            handle: $crate::ffi::CgymHandle,
            actions: *const $crate::ffi::CgymKeyValue,
            actions_size: i32,
            out_data: *mut *const $crate::ffi::CgymStepData,
        ) -> $crate::ffi::CgymStatus {
            unsafe { $crate::ffi::exports::step(&CGYM_INSTANCES, handle, actions, actions_size, out_data) }
        }

        /// # Safety
        /// Same contract as `cgym::ffi::exports::render`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn cgym_render(
            handle: $crate::ffi::CgymHandle,
            out_frame: *mut *const $crate::ffi::CgymFrame,
        ) -> $crate::ffi::CgymStatus {
            unsafe { $crate::ffi::exports::render(&CGYM_INSTANCES, handle, out_frame) }
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn cgym_close(handle: $crate::ffi::CgymHandle) -> $crate::ffi::CgymStatus {
            $crate::ffi::exports::close(&CGYM_INSTANCES, handle)
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn cgym_last_error() -> *const ::std::ffi::c_char {
            $crate::ffi::exports::last_error()
        }

        /// Function table over the symbols above.
        pub fn cgym_module_api() -> $crate::ffi::ModuleApi {
            $crate::ffi::ModuleApi {
                protocol_version: cgym_protocol_version,
                env_version: cgym_get_env_version,
                make: cgym_make,
                reset: cgym_reset,
                step: cgym_step,
                render: cgym_render,
                close: cgym_close,
                last_error: cgym_last_error,
            }
        }
    };
}
