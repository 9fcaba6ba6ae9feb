//! The C ABI: `#[repr(C)]` mirrors of `cgym.h`, the handle table, the
//! module-side entry points and a host-side driver.
//!
//! Symbols, all `extern "C"`:
//!
//! | symbol | returns |
//! |---|---|
//! | `cgym_protocol_version()` | [`CGYM_VERSION`] |
//! | `cgym_get_env_version()` | the environment's content version |
//! | `cgym_make(render_mode, options, options_size, *handle, *data)` | [`CgymStatus`] |
//! | `cgym_reset(handle, seed, options, options_size, *data)` | [`CgymStatus`] |
//! | `cgym_step(handle, actions, actions_size, *data)` | [`CgymStatus`] |
//! | `cgym_render(handle, *frame)` | [`CgymStatus`] |
//! | `cgym_close(handle)` | [`CgymStatus`] |
//! | `cgym_last_error()` | message of the last failure on this thread, or null |
//!
//! Older headers declare `step` and `render` without the `cgym_` prefix.
//! Those unprefixed names are not exported: they collide easily with other
//! libraries, and a host built against such a header must be updated.
//!
//! Every pointer handed out stays valid until `cgym_close` on its handle, and
//! the memory behind it is overwritten by the next call on that handle.

pub mod exports;
pub mod handle;
pub mod host;
pub mod types;

pub use exports::FfiInstance;
pub use handle::HandleTable;
pub use host::{ModuleApi, ModuleInstance};
pub use types::{
    CgymFrame, CgymHandle, CgymKeyValue, CgymMakeData, CgymOption, CgymResetData, CgymStatus, CgymStepData,
    CgymValue, CgymValueBuffer, CGYM_VERSION,
};
