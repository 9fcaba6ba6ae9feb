//! Typed configuration options for `make` and `reset`.
//!
//! Options are a flat mapping from name to a typed scalar. Each environment
//! declares an [`OptionSpec`] schema; incoming options are validated against
//! it before the environment sees them. Unknown names and mistyped values are
//! rejected, never coerced.

use crate::core::{GymError, Result};
use crate::value::{Value, ValueKind};

/// Declaration of one accepted option.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptionSpec {
    pub name: String,
    pub kind: ValueKind,
    /// Value used when the option is absent. `None` makes the option required.
    pub default: Option<Value>,
}

impl OptionSpec {
    pub fn required<S: Into<String>>(name: S, kind: ValueKind) -> Self {
        Self { name: name.into(), kind, default: None }
    }

    pub fn optional<S: Into<String>>(name: S, default: impl Into<Value>) -> Self {
        let default = default.into();
        Self { name: name.into(), kind: default.kind(), default: Some(default) }
    }

    pub fn is_required(&self) -> bool { self.default.is_none() }
}

/// A set of named scalar options.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Options {
    entries: Vec<(String, Value)>,
}

macro_rules! typed_getter {
    ($name:ident, $variant:ident, $ty:ty) => {
        /// Typed lookup. Absent names and kind mismatches are configuration errors.
        pub fn $name(&self, name: &str) -> Result<$ty> {
            match self.get(name) {
                Some(Value::$variant(v)) => Ok(v),
                Some(other) => Err(GymError::Config(format!(
                    "option `{name}` is {}, expected {}",
                    other.kind(),
                    ValueKind::$variant
                ))),
                None => Err(GymError::Config(format!("missing option `{name}`"))),
            }
        }
    };
}

impl Options {
    pub fn new() -> Self { Self { entries: Vec::new() } }

    /// Add an option. Giving the same name twice is a configuration error.
    pub fn insert<S: Into<String>>(&mut self, name: S, value: impl Into<Value>) -> Result<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(GymError::Config(format!("option `{name}` given more than once")));
        }
        self.entries.push((name, value.into()));
        Ok(())
    }

    /// Builder-style insert that replaces an existing entry.
    pub fn with<S: Into<String>>(mut self, name: S, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// A copy without `name`. Wrappers use this to strip the options they consume.
    pub fn without(&self, name: &str) -> Options {
        Options { entries: self.entries.iter().filter(|(n, _)| n != name).cloned().collect() }
    }

    typed_getter!(get_i32, Int, i32);
    typed_getter!(get_f32, Float, f32);
    typed_getter!(get_f64, Double, f64);
    typed_getter!(get_u8, Byte, u8);

    /// Validate against `schema` and fill in defaults.
    pub fn resolve(&self, schema: &[OptionSpec]) -> Result<Options> {
        for (name, value) in &self.entries {
            let spec = schema
                .iter()
                .find(|s| s.name == *name)
                .ok_or_else(|| GymError::Config(format!("unknown option `{name}`")))?;
            if value.kind() != spec.kind {
                return Err(GymError::Config(format!(
                    "option `{name}` is {}, expected {}",
                    value.kind(),
                    spec.kind
                )));
            }
        }

        let mut resolved = Options::new();
        for spec in schema {
            match (self.get(&spec.name), spec.default) {
                (Some(v), _) | (None, Some(v)) => resolved.entries.push((spec.name.clone(), v)),
                (None, None) => return Err(GymError::Config(format!("missing required option `{}`", spec.name))),
            }
        }
        Ok(resolved)
    }
}
