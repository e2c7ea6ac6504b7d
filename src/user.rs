//! Users and their attributes.
use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::platform::PlatformInfo;

/// Type alias for a HashMap representing user attributes.
pub type Attributes = HashMap<String, AttributeValue>;

/// Enum representing possible values of a user attribute.
///
/// ```
/// # use flagsync::AttributeValue;
/// let string_attr: AttributeValue = "example".into();
/// let number_attr: AttributeValue = 42.0.into();
/// let bool_attr: AttributeValue = true.into();
/// ```
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value or absence of value.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// The user flags are evaluated for.
///
/// The key identifies the user's partition in the data store. Attributes are sent to the server
/// along with the key but are never interpreted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    key: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    attributes: Attributes,
}

impl User {
    /// Create a user with the given key and no attributes.
    ///
    /// ```
    /// # use flagsync::User;
    /// let user = User::with_key("user-key").with_attribute("email", "user@example.com");
    /// ```
    pub fn with_key(key: impl Into<String>) -> User {
        User {
            key: key.into(),
            attributes: Attributes::new(),
        }
    }

    /// Add or replace an attribute, builder-style.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> User {
        self.set_attribute(name, value);
        self
    }

    /// Stamp operating system and device name reported by `platform`.
    pub fn with_platform(mut self, platform: &dyn PlatformInfo) -> User {
        self.set_attribute("os", platform.os_name());
        if let Some(device) = platform.device_name() {
            self.set_attribute("device", device);
        }
        self
    }

    /// Add or replace an attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Unique key of the user.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// All attributes of the user.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Look up a single attribute.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}
