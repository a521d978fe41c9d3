//! Canonical variable names.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::error::{NwpError, NwpResult};

/// Canonical name of a physical quantity, e.g. `temperature_sl`.
///
/// Names are lowercase ASCII identifiers so they can be used directly as
/// store path components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableKey(String);

impl VariableKey {
    /// Create a key, validating the character set.
    pub fn new(name: impl Into<String>) -> NwpResult<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Ok(Self(name))
        } else {
            Err(NwpError::InvalidVariable(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for VariableKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for VariableKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(VariableKey::new("temperature_sl").is_ok());
        assert!(VariableKey::new("wind_u_component_100m").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(VariableKey::new("").is_err());
        assert!(VariableKey::new("Temperature").is_err());
        assert!(VariableKey::new("wind/u").is_err());
    }
}
