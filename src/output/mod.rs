//! Deployment outputs and secret values.
//!
//! Outputs are the contract consumed by downstream steps (key distribution,
//! smoke tests). Sensitive values never appear in listings or logs; reading
//! one requires an explicit `expose()`.

use std::fmt;

/// An opaque secret value (subscription key, access key, connection string).
///
/// `Debug` and `Display` redact the value. The only way to read it is
/// [`Secret::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read the underlying value. Callers own keeping it out of logs.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Marker shown in listings in place of a sensitive value.
pub const SENSITIVE_MARKER: &str = "<sensitive>";

/// A single output value.
#[derive(Debug, Clone)]
pub enum OutputValue {
    Plain(String),
    Sensitive(Secret),
}

impl OutputValue {
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Self::Sensitive(_))
    }
}

/// Named deployment outputs, in insertion order.
///
/// Re-inserting a name replaces its value in place, keeping the original
/// position stable across converging re-runs.
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    entries: Vec<(String, OutputValue)>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.put(name.into(), OutputValue::Plain(value.into()));
    }

    pub fn insert_sensitive(&mut self, name: impl Into<String>, secret: Secret) {
        self.put(name.into(), OutputValue::Sensitive(secret));
    }

    fn put(&mut self, name: String, value: OutputValue) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// The default listing: plain values verbatim, sensitive names with a
    /// redaction marker.
    pub fn listing(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(name, value)| {
                let shown = match value {
                    OutputValue::Plain(v) => v.clone(),
                    OutputValue::Sensitive(_) => SENSITIVE_MARKER.to_string(),
                };
                (name.clone(), shown)
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutputValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
