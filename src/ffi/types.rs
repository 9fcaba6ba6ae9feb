//! `#[repr(C)]` mirrors of the `cgym.h` structures.

use std::ffi::{c_char, CStr};
use std::ptr;

use crate::core::{GymError, Result};
use crate::kv::MAX_KEY_LEN;
use crate::value::{BufferRef, Value, ValueBuffer, ValueKind, ValueType};

/// Structural version of this ABI. Hosts refuse modules reporting another value.
pub const CGYM_VERSION: i32 = 1;

/// Opaque per-instance handle returned by `cgym_make`. Zero is never issued.
pub type CgymHandle = u64;

/// Return code of every ABI operation.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CgymStatus {
    Ok = 0,
    Config = 1,
    ShapeMismatch = 2,
    Lifecycle = 3,
    Resource = 4,
    InvalidArgument = 5,
    Internal = 6,
    InvalidAction = 7,
}

impl CgymStatus {
    pub fn from_raw(code: i32) -> Option<Self> {
        Some(match code {
            0 => CgymStatus::Ok,
            1 => CgymStatus::Config,
            2 => CgymStatus::ShapeMismatch,
            3 => CgymStatus::Lifecycle,
            4 => CgymStatus::Resource,
            5 => CgymStatus::InvalidArgument,
            6 => CgymStatus::Internal,
            7 => CgymStatus::InvalidAction,
            _ => return None,
        })
    }

    pub fn is_ok(self) -> bool { self == CgymStatus::Ok }
}

impl From<&GymError> for CgymStatus {
    fn from(err: &GymError) -> Self {
        match err {
            GymError::Config(_) | GymError::NotSupported(_) => CgymStatus::Config,
            GymError::ShapeMismatch { .. } | GymError::UnknownKey(_) => CgymStatus::ShapeMismatch,
            GymError::InvalidAction(_) => CgymStatus::InvalidAction,
            GymError::Lifecycle { .. } => CgymStatus::Lifecycle,
            GymError::Resource(_) | GymError::InvalidSpace(_) => CgymStatus::Resource,
            GymError::InvalidArgument(_) | GymError::Version { .. } => CgymStatus::InvalidArgument,
            GymError::Module { code, .. } => CgymStatus::from_raw(*code).unwrap_or(CgymStatus::Internal),
            GymError::Conformance(_) | GymError::Internal(_) => CgymStatus::Internal,
        }
    }
}

/// `cgym_value`: an untagged scalar. The tag travels next to it.
#[repr(C)]
#[derive(Clone, Copy)]
pub union CgymValue {
    pub i: i32,
    pub f: f32,
    pub d: f64,
    pub b: u8,
}

impl CgymValue {
    pub fn from_value(value: Value) -> Self {
        // Start from the widest field so every byte is initialised.
        let mut raw = CgymValue { d: 0.0 };
        match value {
            Value::Int(v) => raw.i = v,
            Value::Float(v) => raw.f = v,
            Value::Double(v) => raw.d = v,
            Value::Byte(v) => raw.b = v,
        }
        raw
    }

    /// Read the field selected by `kind`.
    ///
    /// # Safety
    /// The field for `kind` must have been initialised by the writer.
    pub unsafe fn to_value(self, kind: ValueKind) -> Value {
        unsafe {
            match kind {
                ValueKind::Int => Value::Int(self.i),
                ValueKind::Float => Value::Float(self.f),
                ValueKind::Double => Value::Double(self.d),
                ValueKind::Byte => Value::Byte(self.b),
            }
        }
    }
}

impl std::fmt::Debug for CgymValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CgymValue { .. }")
    }
}

/// `cgym_value_buffer`: an untagged pointer to the first element.
#[repr(C)]
#[derive(Clone, Copy)]
pub union CgymValueBuffer {
    pub i: *mut i32,
    pub f: *mut f32,
    pub d: *mut f64,
    pub b: *mut u8,
}

impl CgymValueBuffer {
    pub fn null() -> Self { CgymValueBuffer { b: ptr::null_mut() } }

    /// Point at `buffer`. The module never writes through pointers it hands
    /// out for reading; the mutable pointer type is dictated by the header.
    pub fn of(buffer: &ValueBuffer) -> Self {
        if buffer.is_empty() {
            return Self::null();
        }
        match buffer {
            ValueBuffer::Int(v) => CgymValueBuffer { i: v.as_ptr().cast_mut() },
            ValueBuffer::Float(v) => CgymValueBuffer { f: v.as_ptr().cast_mut() },
            ValueBuffer::Double(v) => CgymValueBuffer { d: v.as_ptr().cast_mut() },
            ValueBuffer::Byte(v) => CgymValueBuffer { b: v.as_ptr().cast_mut() },
        }
    }

    /// Borrow `len` elements of `kind`.
    ///
    /// # Safety
    /// The pointer for `kind` must be valid for `len` reads for `'a`, unless `len` is zero.
    pub unsafe fn view<'a>(self, kind: ValueKind, len: usize) -> Result<BufferRef<'a>> {
        // Every field shares the same address; reading `b` just checks for null.
        if len > 0 && unsafe { self.b }.is_null() {
            return Err(GymError::InvalidArgument(format!("null {kind} buffer of size {len}")));
        }
        unsafe fn slice<'a, T>(p: *const T, len: usize) -> &'a [T] {
            if len == 0 { &[] } else { unsafe { std::slice::from_raw_parts(p, len) } }
        }
        Ok(unsafe {
            match kind {
                ValueKind::Int => BufferRef::Int(slice(self.i, len)),
                ValueKind::Float => BufferRef::Float(slice(self.f, len)),
                ValueKind::Double => BufferRef::Double(slice(self.d, len)),
                ValueKind::Byte => BufferRef::Byte(slice(self.b, len)),
            }
        })
    }
}

impl std::fmt::Debug for CgymValueBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CgymValueBuffer({:p})", unsafe { self.b })
    }
}

/// `cgym_key_value`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CgymKeyValue {
    pub key: *const c_char,
    pub value_type: i32,
    pub value_buffer_size: i32,
    pub value_buffer: CgymValueBuffer,
}

/// Read a NUL-terminated UTF-8 key of at most [`MAX_KEY_LEN`] bytes.
///
/// # Safety
/// `p` must be null or point to a NUL-terminated string valid for `'a`.
pub unsafe fn read_key<'a>(p: *const c_char) -> Result<&'a str> {
    if p.is_null() {
        return Err(GymError::InvalidArgument("null key".into()));
    }
    let key = unsafe { CStr::from_ptr(p) }
        .to_str()
        .map_err(|_| GymError::InvalidArgument("key is not valid UTF-8".into()))?;
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(GymError::InvalidArgument(format!("key length {} outside 1..={MAX_KEY_LEN}", key.len())));
    }
    Ok(key)
}

/// Validate a size field coming from the other side.
pub fn read_size(size: i32, what: &str) -> Result<usize> {
    usize::try_from(size).map_err(|_| GymError::InvalidArgument(format!("negative {what} size {size}")))
}

/// Borrow `size` structs starting at `p`. A zero size accepts a null pointer.
///
/// # Safety
/// `p` must be valid for `size` reads for `'a` when `size > 0`.
pub unsafe fn read_array<'a, T>(p: *const T, size: i32, what: &str) -> Result<&'a [T]> {
    let len = read_size(size, what)?;
    if len == 0 {
        return Ok(&[]);
    }
    if p.is_null() {
        return Err(GymError::InvalidArgument(format!("null {what} array of size {len}")));
    }
    Ok(unsafe { std::slice::from_raw_parts(p, len) })
}

impl CgymKeyValue {
    /// Describe `buffer` under `key`. `key` must outlive every use of the result.
    pub fn new(key: &CStr, value_type: ValueType, buffer: &ValueBuffer) -> Result<Self> {
        Ok(Self {
            key: key.as_ptr(),
            value_type: value_type as i32,
            value_buffer_size: i32::try_from(buffer.len())
                .map_err(|_| GymError::Resource(format!("buffer of {} elements exceeds i32", buffer.len())))?,
            value_buffer: CgymValueBuffer::of(buffer),
        })
    }

    pub fn tag(&self) -> Result<ValueType> { ValueType::try_from(self.value_type) }

    /// Borrow a data entry (element-kind tag only).
    ///
    /// # Safety
    /// `key` and the buffer pointer must be valid for `'a` as described by the other fields.
    pub unsafe fn entry<'a>(&self) -> Result<(&'a str, BufferRef<'a>)> {
        let key = unsafe { read_key(self.key) }?;
        let kind = ValueKind::try_from(self.tag()?)?;
        let len = read_size(self.value_buffer_size, key)?;
        Ok((key, unsafe { self.value_buffer.view(kind, len) }?))
    }

    /// Borrow a space-descriptor entry, returning its space tag.
    ///
    /// # Safety
    /// As for [`entry`](Self::entry).
    pub unsafe fn descriptor<'a>(&self) -> Result<(&'a str, ValueType, BufferRef<'a>)> {
        let key = unsafe { read_key(self.key) }?;
        let tag = self.tag()?;
        let len = read_size(self.value_buffer_size, key)?;
        // The Box tag carries no element kind, so Box bounds are float32 on the wire.
        let buffer = unsafe { self.value_buffer.view(tag.element_kind(), len) }?;
        Ok((key, tag, buffer))
    }
}

/// `cgym_option`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CgymOption {
    pub name: *const c_char,
    pub value_type: i32,
    pub value: CgymValue,
}

impl CgymOption {
    /// # Safety
    /// `name` must be a valid NUL-terminated string for `'a`.
    pub unsafe fn entry<'a>(&self) -> Result<(&'a str, Value)> {
        let name = unsafe { read_key(self.name) }?;
        let kind = ValueKind::try_from(ValueType::try_from(self.value_type)?)
            .map_err(|_| GymError::Config(format!("option `{name}` has a space tag")))?;
        Ok((name, unsafe { self.value.to_value(kind) }))
    }
}

/// `cgym_make_data`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CgymMakeData {
    pub observation_spaces_size: i32,
    pub observation_spaces: *mut CgymKeyValue,
    pub action_spaces_size: i32,
    pub action_spaces: *mut CgymKeyValue,
}

/// `cgym_reset_data`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CgymResetData {
    pub observations_size: i32,
    pub observations: *mut CgymKeyValue,
    pub infos_size: i32,
    pub infos: *mut CgymKeyValue,
}

/// `cgym_step_data`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CgymStepData {
    pub observations_size: i32,
    pub observations: *mut CgymKeyValue,
    pub reward: CgymValue,
    pub terminated: bool,
    pub truncated: bool,
    pub infos_size: i32,
    pub infos: *mut CgymKeyValue,
}

/// `cgym_frame`. Element `(x, y, c)` is at `c + channels * (x + width * y)`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CgymFrame {
    pub value_type: i32,
    pub value_buffer_width: i32,
    pub value_buffer_height: i32,
    pub value_buffer_channels: i32,
    pub value_buffer: CgymValueBuffer,
}

impl Default for CgymFrame {
    fn default() -> Self {
        Self {
            value_type: ValueType::Byte as i32,
            value_buffer_width: 0,
            value_buffer_height: 0,
            value_buffer_channels: 0,
            value_buffer: CgymValueBuffer::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(CgymStatus::Ok as i32, 0);
        assert_eq!(CgymStatus::Lifecycle as i32, 3);
        assert_eq!(CgymStatus::InvalidAction as i32, 7);
        for code in 0..8 {
            assert_eq!(CgymStatus::from_raw(code).map(|s| s as i32), Some(code));
        }
        assert_eq!(CgymStatus::from_raw(8), None);
    }

    #[test]
    fn errors_map_to_statuses() {
        assert_eq!(CgymStatus::from(&GymError::Config("x".into())), CgymStatus::Config);
        assert_eq!(CgymStatus::from(&GymError::UnknownKey("k".into())), CgymStatus::ShapeMismatch);
        assert_eq!(CgymStatus::from(&GymError::Internal("boom".into())), CgymStatus::Internal);
        let proxied = GymError::Module { code: 3, message: String::new() };
        assert_eq!(CgymStatus::from(&proxied), CgymStatus::Lifecycle);
    }

    #[test]
    fn value_union_reads_back_the_written_field() {
        for v in [Value::Int(-4), Value::Float(1.5), Value::Double(-2.25), Value::Byte(200)] {
            let raw = CgymValue::from_value(v);
            assert_eq!(unsafe { raw.to_value(v.kind()) }, v);
        }
    }

    #[test]
    fn key_value_entry_validates_its_fields() {
        let key = CString::new("act1").unwrap();
        let buffer = ValueBuffer::Int(vec![3]);
        let kv = CgymKeyValue::new(&key, ValueType::Int, &buffer).unwrap();
        let (k, view) = unsafe { kv.entry() }.unwrap();
        assert_eq!(k, "act1");
        assert_eq!(view, BufferRef::Int(&[3]));

        let mut bad = kv;
        bad.value_type = 9;
        assert!(unsafe { bad.entry() }.is_err());
        bad = kv;
        bad.value_buffer_size = -1;
        assert!(unsafe { bad.entry() }.is_err());
        bad = kv;
        bad.value_buffer = CgymValueBuffer::null();
        assert!(unsafe { bad.entry() }.is_err());
        bad = kv;
        bad.key = ptr::null();
        assert!(unsafe { bad.entry() }.is_err());
        bad = kv;
        bad.value_type = ValueType::Box as i32;
        assert!(unsafe { bad.entry() }.is_err());
    }

    #[test]
    fn long_keys_are_rejected() {
        let long = CString::new("k".repeat(MAX_KEY_LEN + 1)).unwrap();
        assert!(unsafe { read_key(long.as_ptr()) }.is_err());
        let ok = CString::new("k".repeat(MAX_KEY_LEN)).unwrap();
        assert!(unsafe { read_key(ok.as_ptr()) }.is_ok());
    }

    #[test]
    fn empty_arrays_accept_null() {
        let none: &[CgymKeyValue] = unsafe { read_array(ptr::null(), 0, "actions") }.unwrap();
        assert!(none.is_empty());
        assert!(unsafe { read_array::<CgymKeyValue>(ptr::null(), 2, "actions") }.is_err());
        assert!(unsafe { read_array::<CgymKeyValue>(ptr::null(), -1, "actions") }.is_err());
    }
}
