//! Validators kept as data.
//!
//! A [`Schema<T>`] is the serde shape of `T` plus zero or more pure check
//! functions. Inbound frames go through [`Schema::parse_text`] (decode and
//! validate in one step); outbound values go through [`Schema::check`]
//! before they are serialized.

use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

/// Structured validation failure: where it failed and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Field path of the offending value (`$` for the root).
    pub path: String,
    /// Human-readable reason.
    pub message: String,
}

impl ValidationError {
    /// Failure at the root of the value.
    pub fn new(message: impl Into<String>) -> Self {
        Self::at("$", message)
    }

    /// Failure at a specific field path, e.g. `"$.items[2].id"`.
    pub fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    fn from_json(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at `{}`: {}", self.path, self.message)
    }
}

impl std::error::Error for ValidationError {}

type CheckFn<T> = Arc<dyn Fn(&T) -> Result<(), ValidationError> + Send + Sync>;

/// Validator for values of type `T`.
///
/// Cloning is cheap; checks are shared.
pub struct Schema<T> {
    checks: Vec<CheckFn<T>>,
}

impl<T> Clone for Schema<T> {
    fn clone(&self) -> Self {
        Self {
            checks: self.checks.clone(),
        }
    }
}

impl<T> Default for Schema<T> {
    fn default() -> Self {
        Self::any()
    }
}

impl<T> fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("type", &std::any::type_name::<T>())
            .field("checks", &self.checks.len())
            .finish()
    }
}

impl<T> Schema<T> {
    /// Accept every value of `T`. For inbound frames this still rejects
    /// text that does not deserialize into `T`.
    pub fn any() -> Self {
        Self { checks: Vec::new() }
    }

    /// Schema with a single check.
    pub fn new(check: impl Fn(&T) -> Result<(), ValidationError> + Send + Sync + 'static) -> Self {
        Self::any().and(check)
    }

    /// Add a check; all checks must pass, evaluated in insertion order.
    pub fn and(
        mut self,
        check: impl Fn(&T) -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    /// Validate an already-typed value.
    pub fn check(&self, value: &T) -> Result<(), ValidationError> {
        self.checks.iter().try_for_each(|check| check(value))
    }
}

impl<T: DeserializeOwned> Schema<T> {
    /// Decode one JSON text frame and validate it.
    pub fn parse_text(&self, text: &str) -> Result<T, ValidationError> {
        let value = serde_json::from_str::<T>(text).map_err(ValidationError::from_json)?;
        self.check(&value)?;
        Ok(value)
    }

    /// Convert a loose JSON value (e.g. from configuration) and validate it.
    pub fn parse_value(&self, value: serde_json::Value) -> Result<T, ValidationError> {
        let value = serde_json::from_value::<T>(value).map_err(ValidationError::from_json)?;
        self.check(&value)?;
        Ok(value)
    }
}
