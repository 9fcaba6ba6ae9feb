//! Tagged scalar values and homogeneous buffers.
//!
//! Every payload crossing the module boundary is one of four element kinds.
//! The Rust side models them as closed enums so the compiler, not caller
//! discipline, keeps the tag and the accessed field in agreement.

use crate::core::{GymError, Result};

/// Wire tag carried in the `value_type` field of every ABI struct.
///
/// The first four tags are element kinds. `Box` and `MultiDiscrete` only tag
/// space-descriptor entries returned by `make`.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueType {
    Int = 0,
    Float = 1,
    Double = 2,
    Byte = 3,
    Box = 4,
    MultiDiscrete = 5,
}

impl ValueType {
    /// The element kind stored in a buffer with this tag.
    ///
    /// The Box tag carries no element kind of its own, so Box descriptors
    /// cross the boundary as `Float`.
    pub fn element_kind(self) -> ValueKind {
        match self {
            ValueType::Int | ValueType::MultiDiscrete => ValueKind::Int,
            ValueType::Float | ValueType::Box => ValueKind::Float,
            ValueType::Double => ValueKind::Double,
            ValueType::Byte => ValueKind::Byte,
        }
    }
}

impl TryFrom<i32> for ValueType {
    type Error = GymError;

    fn try_from(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(ValueType::Int),
            1 => Ok(ValueType::Float),
            2 => Ok(ValueType::Double),
            3 => Ok(ValueType::Byte),
            4 => Ok(ValueType::Box),
            5 => Ok(ValueType::MultiDiscrete),
            other => Err(GymError::InvalidArgument(format!("unknown value type tag {other}"))),
        }
    }
}

/// One of the four numeric element kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueKind {
    Int,
    Float,
    Double,
    Byte,
}

impl ValueKind {
    pub fn value_type(self) -> ValueType {
        match self {
            ValueKind::Int => ValueType::Int,
            ValueKind::Float => ValueType::Float,
            ValueKind::Double => ValueType::Double,
            ValueKind::Byte => ValueType::Byte,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ValueKind::Float | ValueKind::Double)
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Int => "int32",
            ValueKind::Float => "float32",
            ValueKind::Double => "float64",
            ValueKind::Byte => "uint8",
        }
    }
}

impl TryFrom<ValueType> for ValueKind {
    type Error = GymError;

    fn try_from(tag: ValueType) -> Result<Self> {
        match tag {
            ValueType::Int => Ok(ValueKind::Int),
            ValueType::Float => Ok(ValueKind::Float),
            ValueType::Double => Ok(ValueKind::Double),
            ValueType::Byte => Ok(ValueKind::Byte),
            ValueType::Box | ValueType::MultiDiscrete => Err(GymError::InvalidArgument(format!(
                "space tag {tag:?} is not an element kind"
            ))),
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A tagged scalar.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Int(i32),
    Float(f32),
    Double(f64),
    Byte(u8),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::Byte(_) => ValueKind::Byte,
        }
    }

    /// The zero of the given kind.
    pub fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Double => Value::Double(0.0),
            ValueKind::Byte => Value::Byte(0),
        }
    }

    /// Lossless for every kind; intended for display and comparisons only.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v as f64,
            Value::Double(v) => v,
            Value::Byte(v) => v as f64,
        }
    }
}

impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v) } }
impl From<f32> for Value { fn from(v: f32) -> Self { Value::Float(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Double(v) } }
impl From<u8> for Value { fn from(v: u8) -> Self { Value::Byte(v) } }

/// A homogeneous array of one element kind. Its element count is the length
/// of the inner vector and never changes after allocation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueBuffer {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Byte(Vec<u8>),
}

impl ValueBuffer {
    /// Allocate a zero-filled buffer.
    pub fn zeros(kind: ValueKind, len: usize) -> Self {
        match kind {
            ValueKind::Int => ValueBuffer::Int(vec![0; len]),
            ValueKind::Float => ValueBuffer::Float(vec![0.0; len]),
            ValueKind::Double => ValueBuffer::Double(vec![0.0; len]),
            ValueKind::Byte => ValueBuffer::Byte(vec![0; len]),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            ValueBuffer::Int(_) => ValueKind::Int,
            ValueBuffer::Float(_) => ValueKind::Float,
            ValueBuffer::Double(_) => ValueKind::Double,
            ValueBuffer::Byte(_) => ValueKind::Byte,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ValueBuffer::Int(v) => v.len(),
            ValueBuffer::Float(v) => v.len(),
            ValueBuffer::Double(v) => v.len(),
            ValueBuffer::Byte(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.view().get(index)
    }

    pub fn view(&self) -> BufferRef<'_> {
        match self {
            ValueBuffer::Int(v) => BufferRef::Int(v),
            ValueBuffer::Float(v) => BufferRef::Float(v),
            ValueBuffer::Double(v) => BufferRef::Double(v),
            ValueBuffer::Byte(v) => BufferRef::Byte(v),
        }
    }

    /// A mutable view that can overwrite elements but not resize the buffer.
    pub fn view_mut(&mut self) -> BufferMut<'_> {
        match self {
            ValueBuffer::Int(v) => BufferMut::Int(v),
            ValueBuffer::Float(v) => BufferMut::Float(v),
            ValueBuffer::Double(v) => BufferMut::Double(v),
            ValueBuffer::Byte(v) => BufferMut::Byte(v),
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match self { ValueBuffer::Int(v) => Some(v), _ => None }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self { ValueBuffer::Float(v) => Some(v), _ => None }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self { ValueBuffer::Double(v) => Some(v), _ => None }
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self { ValueBuffer::Byte(v) => Some(v), _ => None }
    }

    /// Overwrite every element from `src`. Kind and length must match exactly.
    pub fn copy_from(&mut self, src: BufferRef<'_>) -> Result<()> {
        self.view_mut().copy_from(src)
    }

    /// Address of the first element. Stable for the lifetime of the buffer.
    pub fn data_addr(&self) -> usize {
        match self {
            ValueBuffer::Int(v) => v.as_ptr() as usize,
            ValueBuffer::Float(v) => v.as_ptr() as usize,
            ValueBuffer::Double(v) => v.as_ptr() as usize,
            ValueBuffer::Byte(v) => v.as_ptr() as usize,
        }
    }
}

impl From<Vec<i32>> for ValueBuffer { fn from(v: Vec<i32>) -> Self { ValueBuffer::Int(v) } }
impl From<Vec<f32>> for ValueBuffer { fn from(v: Vec<f32>) -> Self { ValueBuffer::Float(v) } }
impl From<Vec<f64>> for ValueBuffer { fn from(v: Vec<f64>) -> Self { ValueBuffer::Double(v) } }
impl From<Vec<u8>> for ValueBuffer { fn from(v: Vec<u8>) -> Self { ValueBuffer::Byte(v) } }

/// Borrowed read-only view of a buffer, possibly owned by the other side of
/// the boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BufferRef<'a> {
    Int(&'a [i32]),
    Float(&'a [f32]),
    Double(&'a [f64]),
    Byte(&'a [u8]),
}

impl<'a> BufferRef<'a> {
    pub fn kind(&self) -> ValueKind {
        match self {
            BufferRef::Int(_) => ValueKind::Int,
            BufferRef::Float(_) => ValueKind::Float,
            BufferRef::Double(_) => ValueKind::Double,
            BufferRef::Byte(_) => ValueKind::Byte,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BufferRef::Int(v) => v.len(),
            BufferRef::Float(v) => v.len(),
            BufferRef::Double(v) => v.len(),
            BufferRef::Byte(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn get(&self, index: usize) -> Option<Value> {
        match self {
            BufferRef::Int(v) => v.get(index).copied().map(Value::Int),
            BufferRef::Float(v) => v.get(index).copied().map(Value::Float),
            BufferRef::Double(v) => v.get(index).copied().map(Value::Double),
            BufferRef::Byte(v) => v.get(index).copied().map(Value::Byte),
        }
    }

    pub fn to_buffer(&self) -> ValueBuffer {
        match *self {
            BufferRef::Int(v) => ValueBuffer::Int(v.to_vec()),
            BufferRef::Float(v) => ValueBuffer::Float(v.to_vec()),
            BufferRef::Double(v) => ValueBuffer::Double(v.to_vec()),
            BufferRef::Byte(v) => ValueBuffer::Byte(v.to_vec()),
        }
    }
}

/// Mutable, fixed-length view of a buffer. Environments write their outputs
/// through this type, which cannot grow or shrink the underlying storage.
#[derive(Debug)]
pub enum BufferMut<'a> {
    Int(&'a mut [i32]),
    Float(&'a mut [f32]),
    Double(&'a mut [f64]),
    Byte(&'a mut [u8]),
}

impl<'a> BufferMut<'a> {
    pub fn kind(&self) -> ValueKind {
        match self {
            BufferMut::Int(_) => ValueKind::Int,
            BufferMut::Float(_) => ValueKind::Float,
            BufferMut::Double(_) => ValueKind::Double,
            BufferMut::Byte(_) => ValueKind::Byte,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BufferMut::Int(v) => v.len(),
            BufferMut::Float(v) => v.len(),
            BufferMut::Double(v) => v.len(),
            BufferMut::Byte(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Store `value` at `index`. The value kind must match the buffer kind.
    pub fn set(&mut self, index: usize, value: Value) -> Result<()> {
        let len = self.len();
        let kind = self.kind();
        let slot_missing = || GymError::InvalidArgument(format!("index {index} out of bounds for length {len}"));
        match (self, value) {
            (BufferMut::Int(b), Value::Int(v)) => *b.get_mut(index).ok_or_else(slot_missing)? = v,
            (BufferMut::Float(b), Value::Float(v)) => *b.get_mut(index).ok_or_else(slot_missing)? = v,
            (BufferMut::Double(b), Value::Double(v)) => *b.get_mut(index).ok_or_else(slot_missing)? = v,
            (BufferMut::Byte(b), Value::Byte(v)) => *b.get_mut(index).ok_or_else(slot_missing)? = v,
            (_, other) => {
                return Err(GymError::InvalidArgument(format!(
                    "cannot store {} into a {kind} buffer",
                    other.kind()
                )))
            }
        }
        Ok(())
    }

    /// Fill every element with `value`. The value kind must match.
    pub fn fill(&mut self, value: Value) -> Result<()> {
        let kind = self.kind();
        match (self, value) {
            (BufferMut::Int(b), Value::Int(v)) => b.fill(v),
            (BufferMut::Float(b), Value::Float(v)) => b.fill(v),
            (BufferMut::Double(b), Value::Double(v)) => b.fill(v),
            (BufferMut::Byte(b), Value::Byte(v)) => b.fill(v),
            (_, other) => {
                return Err(GymError::InvalidArgument(format!(
                    "cannot fill a {kind} buffer with {}",
                    other.kind()
                )))
            }
        }
        Ok(())
    }

    pub fn copy_from(&mut self, src: BufferRef<'_>) -> Result<()> {
        if self.kind() != src.kind() || self.len() != src.len() {
            return Err(GymError::InvalidArgument(format!(
                "cannot copy {}[{}] into {}[{}]",
                src.kind(),
                src.len(),
                self.kind(),
                self.len()
            )));
        }
        match (self, src) {
            (BufferMut::Int(d), BufferRef::Int(s)) => d.copy_from_slice(s),
            (BufferMut::Float(d), BufferRef::Float(s)) => d.copy_from_slice(s),
            (BufferMut::Double(d), BufferRef::Double(s)) => d.copy_from_slice(s),
            (BufferMut::Byte(d), BufferRef::Byte(s)) => d.copy_from_slice(s),
            _ => unreachable!("kinds checked above"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_match_header_constants() {
        assert_eq!(ValueType::Int as i32, 0);
        assert_eq!(ValueType::Float as i32, 1);
        assert_eq!(ValueType::Double as i32, 2);
        assert_eq!(ValueType::Byte as i32, 3);
        assert_eq!(ValueType::Box as i32, 4);
        assert_eq!(ValueType::MultiDiscrete as i32, 5);
        for tag in 0..6 {
            assert_eq!(ValueType::try_from(tag).unwrap() as i32, tag);
        }
        assert!(ValueType::try_from(6).is_err());
        assert!(ValueType::try_from(-1).is_err());
    }

    #[test]
    fn space_tags_are_not_element_kinds() {
        assert!(ValueKind::try_from(ValueType::Box).is_err());
        assert!(ValueKind::try_from(ValueType::MultiDiscrete).is_err());
        assert_eq!(ValueKind::try_from(ValueType::Byte).unwrap(), ValueKind::Byte);
    }

    #[test]
    fn zeros_allocates_declared_kind_and_len() {
        let b = ValueBuffer::zeros(ValueKind::Double, 7);
        assert_eq!(b.kind(), ValueKind::Double);
        assert_eq!(b.len(), 7);
        assert_eq!(b.get(6), Some(Value::Double(0.0)));
        assert_eq!(b.get(7), None);
    }

    #[test]
    fn buffer_mut_refuses_cross_kind_writes() {
        let mut b = ValueBuffer::zeros(ValueKind::Float, 3);
        assert!(b.view_mut().set(1, Value::Float(2.5)).is_ok());
        assert!(b.view_mut().set(1, Value::Double(2.5)).is_err());
        assert!(b.view_mut().set(3, Value::Float(1.0)).is_err());
        assert_eq!(b.as_f32(), Some(&[0.0, 2.5, 0.0][..]));
    }

    #[test]
    fn copy_from_requires_identical_shape() {
        let mut dst = ValueBuffer::zeros(ValueKind::Int, 2);
        let addr = dst.data_addr();
        dst.copy_from(BufferRef::Int(&[4, 5])).unwrap();
        assert_eq!(dst.as_i32(), Some(&[4, 5][..]));
        assert_eq!(dst.data_addr(), addr);
        assert!(dst.copy_from(BufferRef::Int(&[1, 2, 3])).is_err());
        assert!(dst.copy_from(BufferRef::Float(&[1.0, 2.0])).is_err());
    }

    #[test]
    fn fill_writes_every_element() {
        let mut b = ValueBuffer::zeros(ValueKind::Byte, 4);
        b.view_mut().fill(Value::Byte(9)).unwrap();
        assert_eq!(b.as_u8(), Some(&[9, 9, 9, 9][..]));
        assert!(b.view_mut().fill(Value::Int(9)).is_err());
    }
}
