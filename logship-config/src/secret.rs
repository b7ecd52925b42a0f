use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Deref;

/// [`SecretString`] that can travel through serde.
///
/// Sink passwords are wrapped in this type so they are redacted in `Debug` output and in the
/// configuration dump logged at startup.
#[derive(Clone, Debug)]
pub struct SerializableSecretString(SecretString);

impl SerializableSecretString {
    /// Returns the plain secret. Only call this at the point where a driver needs it.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Deref for SerializableSecretString {
    type Target = SecretString;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for SerializableSecretString {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl From<&str> for SerializableSecretString {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl Serialize for SerializableSecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.expose_secret())
    }
}

impl<'de> Deserialize<'de> for SerializableSecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        Ok(Self(string.into()))
    }
}
