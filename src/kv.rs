//! Ordered, uniquely keyed collections of tagged buffers.
//!
//! Observations, actions and infos all travel as a [`KeyValues`]. Entry order
//! is fixed when the collection is built (at `make` for environment-owned
//! collections) and never changes, so hosts may cache key to index maps.

use crate::core::{GymError, Result};
use crate::value::{BufferMut, BufferRef, ValueBuffer, ValueKind};

/// Longest key accepted at the ABI boundary, in bytes.
pub const MAX_KEY_LEN: usize = 64;
/// Largest collection accepted at the ABI boundary.
pub const MAX_COLLECTION_LEN: usize = 1024;

/// A named buffer. A buffer of length 1 may stand for a scalar.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyValue {
    key: String,
    buffer: ValueBuffer,
}

impl KeyValue {
    pub fn new<K: Into<String>>(key: K, buffer: ValueBuffer) -> Self {
        Self { key: key.into(), buffer }
    }

    pub fn key(&self) -> &str { &self.key }
    pub fn buffer(&self) -> &ValueBuffer { &self.buffer }
    pub fn kind(&self) -> ValueKind { self.buffer.kind() }
    pub fn len(&self) -> usize { self.buffer.len() }
    pub fn is_empty(&self) -> bool { self.buffer.is_empty() }

    pub(crate) fn buffer_mut(&mut self) -> &mut ValueBuffer { &mut self.buffer }
}

/// The declared shape of one entry: key, element kind and element count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub key: String,
    pub kind: ValueKind,
    pub len: usize,
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}[{}]", self.key, self.kind, self.len)
    }
}

/// Ordered collection with unique keys.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyValues {
    entries: Vec<KeyValue>,
}

impl KeyValues {
    pub fn new() -> Self { Self { entries: Vec::new() } }

    pub fn with_capacity(n: usize) -> Self { Self { entries: Vec::with_capacity(n) } }

    /// Entries whose keys are already known to be unique, e.g. taken from a [`SpaceMap`](crate::spaces::SpaceMap).
    pub(crate) fn from_unique(entries: Vec<KeyValue>) -> Self {
        debug_assert!(entries.iter().enumerate().all(|(i, kv)| entries[..i].iter().all(|o| o.key != kv.key)));
        Self { entries }
    }

    /// Append a new entry. Keys must be unique within the collection.
    pub fn insert<K: Into<String>>(&mut self, key: K, buffer: ValueBuffer) -> Result<()> {
        let key = key.into();
        if self.index_of(&key).is_some() {
            return Err(GymError::InvalidArgument(format!("duplicate key `{key}`")));
        }
        self.entries.push(KeyValue::new(key, buffer));
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with<K: Into<String>>(mut self, key: K, buffer: impl Into<ValueBuffer>) -> Result<Self> {
        self.insert(key, buffer.into())?;
        Ok(self)
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|kv| kv.key == key)
    }

    pub fn get(&self, key: &str) -> Option<&ValueBuffer> {
        self.entries.iter().find(|kv| kv.key == key).map(|kv| &kv.buffer)
    }

    pub fn at(&self, index: usize) -> Option<&KeyValue> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|kv| kv.key.as_str())
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn layout(&self) -> Vec<Layout> {
        self.entries
            .iter()
            .map(|kv| Layout { key: kv.key.clone(), kind: kv.kind(), len: kv.len() })
            .collect()
    }

    /// Check every entry against `layout`, in order. Reports the first mismatch.
    pub fn check_layout(&self, layout: &[Layout]) -> Result<()> {
        for (i, expected) in layout.iter().enumerate() {
            let Some(kv) = self.entries.get(i) else {
                return Err(GymError::shape_mismatch(&expected.key, format!("{}[{}]", expected.kind, expected.len), "missing"));
            };
            if kv.key != expected.key {
                return Err(GymError::UnknownKey(kv.key.clone()));
            }
            if kv.kind() != expected.kind || kv.len() != expected.len {
                return Err(GymError::shape_mismatch(
                    &kv.key,
                    format!("{}[{}]", expected.kind, expected.len),
                    format!("{}[{}]", kv.kind(), kv.len()),
                ));
            }
        }
        if let Some(extra) = self.entries.get(layout.len()) {
            return Err(GymError::UnknownKey(extra.key.clone()));
        }
        Ok(())
    }

    /// Addresses of every buffer, in order. Used to verify in-place reuse.
    pub fn data_addrs(&self) -> Vec<usize> {
        self.entries.iter().map(|kv| kv.buffer.data_addr()).collect()
    }

    pub(crate) fn at_mut(&mut self, index: usize) -> Option<&mut KeyValue> {
        self.entries.get_mut(index)
    }

    /// Drop every buffer. Only the owning instance does this, on close.
    pub(crate) fn release(&mut self) {
        self.entries = Vec::new();
    }
}

impl<'a> IntoIterator for &'a KeyValues {
    type Item = &'a KeyValue;
    type IntoIter = std::slice::Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter { self.entries.iter() }
}

/// Write access to the buffers of an environment-owned collection.
///
/// Entries can be overwritten in place but never added, removed or resized,
/// so the declared layout holds for the life of the instance.
pub struct Slots<'a> {
    inner: &'a mut KeyValues,
}

macro_rules! typed_slot {
    ($name:ident, $variant:ident, $ty:ty, $kind:expr) => {
        /// Typed mutable access to the buffer stored under `key`.
        pub fn $name(&mut self, key: &str) -> Result<&mut [$ty]> {
            let kv = self
                .inner
                .entries
                .iter_mut()
                .find(|kv| kv.key == key)
                .ok_or_else(|| GymError::UnknownKey(key.to_string()))?;
            let found = kv.kind();
            match &mut kv.buffer {
                ValueBuffer::$variant(v) => Ok(v.as_mut_slice()),
                _ => Err(GymError::shape_mismatch(key, $kind, found)),
            }
        }
    };
}

impl<'a> Slots<'a> {
    pub fn new(inner: &'a mut KeyValues) -> Self { Self { inner } }

    pub fn len(&self) -> usize { self.inner.len() }

    pub fn is_empty(&self) -> bool { self.inner.is_empty() }

    pub fn get(&self, key: &str) -> Option<BufferRef<'_>> {
        self.inner.get(key).map(ValueBuffer::view)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<BufferMut<'_>> {
        self.inner.entries.iter_mut().find(|kv| kv.key == key).map(|kv| kv.buffer.view_mut())
    }

    pub fn at_mut(&mut self, index: usize) -> Option<BufferMut<'_>> {
        self.inner.entries.get_mut(index).map(|kv| kv.buffer.view_mut())
    }

    typed_slot!(i32_mut, Int, i32, ValueKind::Int);
    typed_slot!(f32_mut, Float, f32, ValueKind::Float);
    typed_slot!(f64_mut, Double, f64, ValueKind::Double);
    typed_slot!(u8_mut, Byte, u8, ValueKind::Byte);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn sample() -> KeyValues {
        KeyValues::new()
            .with("pos", vec![0.0f32; 3])
            .and_then(|kv| kv.with("id", vec![7i32]))
            .unwrap()
    }

    #[test]
    fn insert_rejects_duplicate_keys() {
        let mut kv = sample();
        assert!(kv.insert("pos", ValueBuffer::Byte(vec![1])).is_err());
        assert_eq!(kv.len(), 2);
    }

    #[test]
    fn order_is_insertion_order() {
        let kv = sample();
        assert_eq!(kv.keys().collect::<Vec<_>>(), vec!["pos", "id"]);
        assert_eq!(kv.index_of("id"), Some(1));
        assert_eq!(kv.index_of("nope"), None);
    }

    #[test]
    fn check_layout_reports_first_mismatch() {
        let kv = sample();
        let layout = kv.layout();
        assert!(kv.check_layout(&layout).is_ok());

        let mut wrong = layout.clone();
        wrong[0].len = 4;
        assert!(matches!(kv.check_layout(&wrong), Err(GymError::ShapeMismatch { .. })));

        let mut wrong = layout.clone();
        wrong[1].kind = ValueKind::Double;
        assert!(matches!(kv.check_layout(&wrong), Err(GymError::ShapeMismatch { .. })));

        let shorter = vec![layout[0].clone()];
        assert_eq!(kv.check_layout(&shorter), Err(GymError::UnknownKey("id".into())));
    }

    #[test]
    fn slots_write_in_place_without_resizing() {
        let mut kv = sample();
        let before = kv.data_addrs();
        {
            let mut slots = Slots::new(&mut kv);
            slots.f32_mut("pos").unwrap().copy_from_slice(&[1.0, 2.0, 3.0]);
            slots.get_mut("id").unwrap().set(0, Value::Int(9)).unwrap();
            assert!(matches!(slots.i32_mut("pos"), Err(GymError::ShapeMismatch { .. })));
            assert!(matches!(slots.u8_mut("missing"), Err(GymError::UnknownKey(_))));
        }
        assert_eq!(kv.get("pos").and_then(ValueBuffer::as_f32), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(kv.get("id").and_then(ValueBuffer::as_i32), Some(&[9][..]));
        assert_eq!(kv.data_addrs(), before);
    }
}
