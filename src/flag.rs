//! Flag data as delivered by the server: already-evaluated values plus the metadata needed to
//! build analytics events.
use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::Reason;

/// A flag value: the evaluated result for a user.
///
/// Conveniently implements `From` conversions for the primitive types.
///
/// ```
/// # use flagsync::FlagValue;
/// let b: FlagValue = true.into();
/// let n: FlagValue = 13.5.into();
/// let s: FlagValue = "text".into();
/// assert_eq!(s.as_str(), Some("text"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From, Default)]
#[serde(untagged)]
pub enum FlagValue {
    /// Absence of a value (JSON `null`).
    #[default]
    Null,
    /// A boolean value.
    Bool(bool),
    /// A numerical value. Integer flags are represented as numbers too.
    Number(f64),
    /// A string value.
    String(String),
    /// An ordered list of values.
    Array(Vec<FlagValue>),
    /// A string-keyed map of values.
    Object(HashMap<String, FlagValue>),
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for FlagValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl FlagValue {
    /// Returns `true` for [`FlagValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, FlagValue::Null)
    }

    /// Returns the boolean value, if this is a [`FlagValue::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the number, if this is a [`FlagValue::Number`].
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FlagValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numbers are truncated toward zero. Values outside of `i64` range are rejected.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FlagValue::Number(n)
                if n.is_finite() && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 =>
            {
                Some(n.trunc() as i64)
            }
            _ => None,
        }
    }

    /// Returns the string slice, if this is a [`FlagValue::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Per-flag state delivered by the server for a single user.
///
/// The flag key is not part of the record; it is the key under which the record is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    /// Value of the flag for this user.
    #[serde(default)]
    pub value: FlagValue,
    /// Version of the user's flag state. Increases with every change.
    pub version: u64,
    /// Version of the flag configuration itself. Preferred over `version` in events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_version: Option<u64>,
    /// Index of the selected variation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    /// Whether full evaluation events should be recorded.
    #[serde(default)]
    pub track_events: bool,
    /// Set when the flag is part of an experiment, so evaluation reasons must be reported.
    #[serde(default)]
    pub track_reason: bool,
    /// Debug events are produced until this time (milliseconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_events_until_date: Option<u64>,
    /// Evaluation reason, present when the server was asked to include reasons or the flag is
    /// part of an experiment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl FeatureFlag {
    /// Create a flag record with `value` at `version` and all optional fields unset.
    pub fn new(value: impl Into<FlagValue>, version: u64) -> FeatureFlag {
        FeatureFlag {
            value: value.into(),
            version,
            flag_version: None,
            variation: None,
            track_events: false,
            track_reason: false,
            debug_events_until_date: None,
            reason: None,
        }
    }

    /// Version reported in analytics events.
    pub fn event_version(&self) -> u64 {
        self.flag_version.unwrap_or(self.version)
    }
}
