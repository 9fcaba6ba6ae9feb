//! Space descriptors: the declared domain of every observation and action channel.
//!
//! Two kinds cross the boundary, each as a single tagged buffer:
//! - Box: `2n` floating elements, lows in `[0, n)` and the aligned highs in `[n, 2n)`.
//! - Multi-discrete: `n` positive `int32` cardinalities, dimension `i` ranging over `0..nvec[i]`.
//!
//! Observation and action buffers for a key hold `n` elements in both cases.

pub mod interop;
pub mod space;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::core::{GymError, Result};
use crate::kv::{KeyValue, KeyValues, Layout};
use crate::value::{BufferMut, BufferRef, ValueBuffer, ValueKind, ValueType};

pub use space::Space;

/// A continuous per-dimension domain with inclusive lower and upper bounds.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoxSpace {
    F32 { low: Vec<f32>, high: Vec<f32> },
    F64 { low: Vec<f64>, high: Vec<f64> },
}

fn check_bounds<T: PartialOrd + Copy + std::fmt::Debug>(low: &[T], high: &[T]) -> Result<()> {
    if low.len() != high.len() {
        return Err(GymError::InvalidSpace(format!(
            "box low has {} dims but high has {}",
            low.len(),
            high.len()
        )));
    }
    if low.is_empty() {
        return Err(GymError::InvalidSpace("box requires at least one dimension".into()));
    }
    for (i, (l, h)) in low.iter().zip(high).enumerate() {
        // Also rejects NaN bounds.
        if !(l <= h) {
            return Err(GymError::InvalidSpace(format!("box low[{i}] = {l:?} is not <= high[{i}] = {h:?}")));
        }
    }
    Ok(())
}

/// Sampling interval for one dimension. Unbounded sides are replaced by a
/// unit-width interval next to the finite bound, or `[-1, 1]` if both are infinite.
fn sampling_range(low: f64, high: f64) -> (f64, f64) {
    match (low.is_finite(), high.is_finite()) {
        (true, true) => (low, high),
        (true, false) => (low, low + 1.0),
        (false, true) => (high - 1.0, high),
        (false, false) => (-1.0, 1.0),
    }
}

fn sample_dim<R: Rng + ?Sized>(low: f64, high: f64, rng: &mut R) -> f64 {
    let (low, high) = sampling_range(low, high);
    if low == high { return low; }
    // `Uniform` overflows once the width nears f64::MAX; a quarter scale is exact.
    let x = if high - low < f64::MAX / 2.0 {
        Uniform::new_inclusive(low, high).sample(rng)
    } else {
        4.0 * Uniform::new_inclusive(low / 4.0, high / 4.0).sample(rng)
    };
    x.clamp(low, high)
}

fn sample_f32<R: Rng + ?Sized>(low: f32, high: f32, rng: &mut R) -> f32 {
    // Rounding back to f32 cannot cross a bound that is itself an f32.
    sample_dim(low as f64, high as f64, rng) as f32
}

fn sample_index<R: Rng + ?Sized>(n: i32, rng: &mut R) -> i32 {
    if n == 1 { 0 } else { Uniform::from(0..n).sample(rng) }
}

impl BoxSpace {
    pub fn new_f32(low: Vec<f32>, high: Vec<f32>) -> Result<Self> {
        check_bounds(&low, &high)?;
        Ok(BoxSpace::F32 { low, high })
    }

    pub fn new_f64(low: Vec<f64>, high: Vec<f64>) -> Result<Self> {
        check_bounds(&low, &high)?;
        Ok(BoxSpace::F64 { low, high })
    }

    /// `dim` float32 dimensions sharing the same bounds.
    pub fn uniform_f32(dim: usize, low: f32, high: f32) -> Result<Self> {
        Self::new_f32(vec![low; dim], vec![high; dim])
    }

    pub fn dim(&self) -> usize {
        match self {
            BoxSpace::F32 { low, .. } => low.len(),
            BoxSpace::F64 { low, .. } => low.len(),
        }
    }

    pub fn element_kind(&self) -> ValueKind {
        match self {
            BoxSpace::F32 { .. } => ValueKind::Float,
            BoxSpace::F64 { .. } => ValueKind::Double,
        }
    }

    pub fn low(&self, i: usize) -> Option<f64> {
        match self {
            BoxSpace::F32 { low, .. } => low.get(i).map(|&v| v as f64),
            BoxSpace::F64 { low, .. } => low.get(i).copied(),
        }
    }

    pub fn high(&self, i: usize) -> Option<f64> {
        match self {
            BoxSpace::F32 { high, .. } => high.get(i).map(|&v| v as f64),
            BoxSpace::F64 { high, .. } => high.get(i).copied(),
        }
    }

    /// The `2n` descriptor: all lows followed by all highs.
    pub fn descriptor(&self) -> ValueBuffer {
        match self {
            BoxSpace::F32 { low, high } => ValueBuffer::Float(low.iter().chain(high).copied().collect()),
            BoxSpace::F64 { low, high } => ValueBuffer::Double(low.iter().chain(high).copied().collect()),
        }
    }

    pub fn from_descriptor(buffer: BufferRef<'_>) -> Result<Self> {
        if buffer.len() % 2 != 0 {
            return Err(GymError::InvalidSpace(format!("box descriptor length {} is odd", buffer.len())));
        }
        let n = buffer.len() / 2;
        match buffer {
            BufferRef::Float(v) => Self::new_f32(v[..n].to_vec(), v[n..].to_vec()),
            BufferRef::Double(v) => Self::new_f64(v[..n].to_vec(), v[n..].to_vec()),
            other => Err(GymError::InvalidSpace(format!(
                "box descriptor must be float32 or float64, found {}",
                other.kind()
            ))),
        }
    }

    pub fn contains_ref(&self, elem: BufferRef<'_>) -> bool {
        match (self, elem) {
            (BoxSpace::F32 { low, high }, BufferRef::Float(v)) => {
                v.len() == low.len() && v.iter().zip(low.iter().zip(high)).all(|(x, (l, h))| l <= x && x <= h)
            }
            (BoxSpace::F64 { low, high }, BufferRef::Double(v)) => {
                v.len() == low.len() && v.iter().zip(low.iter().zip(high)).all(|(x, (l, h))| l <= x && x <= h)
            }
            _ => false,
        }
    }

    /// Clamp every element of `elem` into the bounds, in place.
    pub fn clamp(&self, elem: BufferMut<'_>) -> Result<()> {
        match (self, elem) {
            (BoxSpace::F32 { low, high }, BufferMut::Float(v)) if v.len() == low.len() => {
                for (x, (l, h)) in v.iter_mut().zip(low.iter().zip(high)) {
                    *x = x.clamp(*l, *h);
                }
                Ok(())
            }
            (BoxSpace::F64 { low, high }, BufferMut::Double(v)) if v.len() == low.len() => {
                for (x, (l, h)) in v.iter_mut().zip(low.iter().zip(high)) {
                    *x = x.clamp(*l, *h);
                }
                Ok(())
            }
            (_, other) => Err(GymError::shape_mismatch(
                "box",
                format!("{}[{}]", self.element_kind(), self.dim()),
                format!("{}[{}]", other.kind(), other.len()),
            )),
        }
    }

    fn sample_into<R: Rng + ?Sized>(&self, rng: &mut R, out: BufferMut<'_>) -> Result<()> {
        match (self, out) {
            (BoxSpace::F32 { low, high }, BufferMut::Float(v)) if v.len() == low.len() => {
                for (x, (l, h)) in v.iter_mut().zip(low.iter().zip(high)) {
                    *x = sample_f32(*l, *h, rng);
                }
                Ok(())
            }
            (BoxSpace::F64 { low, high }, BufferMut::Double(v)) if v.len() == low.len() => {
                for (x, (l, h)) in v.iter_mut().zip(low.iter().zip(high)) {
                    *x = sample_dim(*l, *h, rng);
                }
                Ok(())
            }
            (_, other) => Err(GymError::shape_mismatch(
                "box",
                format!("{}[{}]", self.element_kind(), self.dim()),
                format!("{}[{}]", other.kind(), other.len()),
            )),
        }
    }
}

impl Space for BoxSpace {
    type Element = ValueBuffer;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        match self {
            BoxSpace::F32 { low, high } => {
                ValueBuffer::Float(low.iter().zip(high).map(|(l, h)| sample_f32(*l, *h, rng)).collect())
            }
            BoxSpace::F64 { low, high } => {
                ValueBuffer::Double(low.iter().zip(high).map(|(l, h)| sample_dim(*l, *h, rng)).collect())
            }
        }
    }

    fn contains(&self, elem: &Self::Element) -> bool { self.contains_ref(elem.view()) }
}

/// A multi-dimensional discrete space with per-dimension sizes nvec[i] (values in [0, nvec[i])).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MultiDiscrete {
    nvec: Vec<i32>,
}

impl MultiDiscrete {
    pub fn new<I: Into<Vec<i32>>>(nvec: I) -> Result<Self> {
        let nvec = nvec.into();
        if nvec.is_empty() {
            return Err(GymError::InvalidSpace("multi-discrete requires at least one dimension".into()));
        }
        if let Some((i, n)) = nvec.iter().enumerate().find(|(_, n)| **n <= 0) {
            return Err(GymError::InvalidSpace(format!("multi-discrete nvec[{i}] = {n} must be > 0")));
        }
        Ok(Self { nvec })
    }

    pub fn nvec(&self) -> &[i32] { &self.nvec }
    pub fn dim(&self) -> usize { self.nvec.len() }

    pub fn descriptor(&self) -> ValueBuffer { ValueBuffer::Int(self.nvec.clone()) }

    pub fn from_descriptor(buffer: BufferRef<'_>) -> Result<Self> {
        match buffer {
            BufferRef::Int(v) => Self::new(v.to_vec()),
            other => Err(GymError::InvalidSpace(format!(
                "multi-discrete descriptor must be int32, found {}",
                other.kind()
            ))),
        }
    }

    pub fn contains_ref(&self, elem: BufferRef<'_>) -> bool {
        match elem {
            BufferRef::Int(v) => v.len() == self.nvec.len() && v.iter().zip(&self.nvec).all(|(&x, &n)| 0 <= x && x < n),
            _ => false,
        }
    }

    fn sample_into<R: Rng + ?Sized>(&self, rng: &mut R, out: BufferMut<'_>) -> Result<()> {
        match out {
            BufferMut::Int(v) if v.len() == self.nvec.len() => {
                for (x, &n) in v.iter_mut().zip(&self.nvec) {
                    *x = sample_index(n, rng);
                }
                Ok(())
            }
            other => Err(GymError::shape_mismatch(
                "multi-discrete",
                format!("{}[{}]", ValueKind::Int, self.dim()),
                format!("{}[{}]", other.kind(), other.len()),
            )),
        }
    }
}

impl Space for MultiDiscrete {
    type Element = ValueBuffer;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        ValueBuffer::Int(self.nvec.iter().map(|&n| sample_index(n, rng)).collect())
    }

    fn contains(&self, elem: &Self::Element) -> bool { self.contains_ref(elem.view()) }
}

/// Either supported space kind.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DynSpace {
    Box(BoxSpace),
    MultiDiscrete(MultiDiscrete),
}

impl DynSpace {
    /// Tag carried by the descriptor entry of this space.
    pub fn value_type(&self) -> ValueType {
        match self {
            DynSpace::Box(_) => ValueType::Box,
            DynSpace::MultiDiscrete(_) => ValueType::MultiDiscrete,
        }
    }

    /// Kind of every observation or action buffer in this space.
    pub fn element_kind(&self) -> ValueKind {
        match self {
            DynSpace::Box(b) => b.element_kind(),
            DynSpace::MultiDiscrete(_) => ValueKind::Int,
        }
    }

    /// Element count of every observation or action buffer in this space.
    pub fn dim(&self) -> usize {
        match self {
            DynSpace::Box(b) => b.dim(),
            DynSpace::MultiDiscrete(m) => m.dim(),
        }
    }

    pub fn descriptor(&self) -> ValueBuffer {
        match self {
            DynSpace::Box(b) => b.descriptor(),
            DynSpace::MultiDiscrete(m) => m.descriptor(),
        }
    }

    /// Decode and validate a descriptor received with tag `tag`.
    pub fn from_descriptor(tag: ValueType, buffer: BufferRef<'_>) -> Result<Self> {
        match tag {
            ValueType::Box => BoxSpace::from_descriptor(buffer).map(DynSpace::Box),
            ValueType::MultiDiscrete => MultiDiscrete::from_descriptor(buffer).map(DynSpace::MultiDiscrete),
            other => Err(GymError::InvalidSpace(format!("{other:?} is not a space tag"))),
        }
    }

    /// A zero-filled buffer of this space's kind and element count.
    pub fn zeros(&self) -> ValueBuffer {
        ValueBuffer::zeros(self.element_kind(), self.dim())
    }

    /// Whether `elem` has this space's kind and element count.
    pub fn matches_shape(&self, elem: BufferRef<'_>) -> bool {
        elem.kind() == self.element_kind() && elem.len() == self.dim()
    }

    pub fn contains_ref(&self, elem: BufferRef<'_>) -> bool {
        match self {
            DynSpace::Box(b) => b.contains_ref(elem),
            DynSpace::MultiDiscrete(m) => m.contains_ref(elem),
        }
    }

    /// Sample into an existing buffer without allocating.
    pub fn sample_into<R: Rng + ?Sized>(&self, rng: &mut R, out: BufferMut<'_>) -> Result<()> {
        match self {
            DynSpace::Box(b) => b.sample_into(rng, out),
            DynSpace::MultiDiscrete(m) => m.sample_into(rng, out),
        }
    }

    pub fn shape_string(&self) -> String {
        format!("{}[{}]", self.element_kind(), self.dim())
    }
}

impl Space for DynSpace {
    type Element = ValueBuffer;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        match self {
            DynSpace::Box(b) => b.sample(rng),
            DynSpace::MultiDiscrete(m) => m.sample(rng),
        }
    }

    fn contains(&self, elem: &Self::Element) -> bool { self.contains_ref(elem.view()) }
}

impl From<BoxSpace> for DynSpace { fn from(b: BoxSpace) -> Self { DynSpace::Box(b) } }
impl From<MultiDiscrete> for DynSpace { fn from(m: MultiDiscrete) -> Self { DynSpace::MultiDiscrete(m) } }

/// Ordered, uniquely keyed space declarations, as returned by `make`.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpaceMap {
    entries: Vec<(String, DynSpace)>,
}

impl SpaceMap {
    pub fn new() -> Self { Self { entries: Vec::new() } }

    pub fn insert<K: Into<String>>(&mut self, key: K, space: impl Into<DynSpace>) -> Result<()> {
        let key = key.into();
        if self.get(&key).is_some() {
            return Err(GymError::InvalidSpace(format!("space `{key}` declared twice")));
        }
        self.entries.push((key, space.into()));
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with<K: Into<String>>(mut self, key: K, space: impl Into<DynSpace>) -> Result<Self> {
        self.insert(key, space)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&DynSpace> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    pub fn at(&self, index: usize) -> Option<(&str, &DynSpace)> {
        self.entries.get(index).map(|(k, s)| (k.as_str(), s))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DynSpace)> {
        self.entries.iter().map(|(k, s)| (k.as_str(), s))
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Buffer layout implied by the spaces (`n` elements per key, not the descriptor's `2n`).
    pub fn layout(&self) -> Vec<Layout> {
        self.entries
            .iter()
            .map(|(k, s)| Layout { key: k.clone(), kind: s.element_kind(), len: s.dim() })
            .collect()
    }

    /// One zero-filled buffer per key, in declaration order.
    pub fn zeros(&self) -> KeyValues {
        KeyValues::from_unique(self.entries.iter().map(|(k, s)| KeyValue::new(k.clone(), s.zeros())).collect())
    }

    /// One sampled buffer per key, in declaration order.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> KeyValues {
        KeyValues::from_unique(self.entries.iter().map(|(k, s)| KeyValue::new(k.clone(), s.sample(rng))).collect())
    }

    /// Whether every entry of `values` lies inside its space.
    pub fn contains(&self, values: &KeyValues) -> bool {
        values.len() == self.entries.len()
            && self.entries.iter().all(|(k, s)| values.get(k).is_some_and(|b| s.contains(b)))
    }
}
