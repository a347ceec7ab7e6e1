/*!
 * Canonical hardware identifiers.
 */
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use hublink_core::error::{Error, Result};

/// Separator between the module and function parts of an identifier
pub const SEPARATOR: char = '.';

/// A `(module, function)` pair naming one function on one module
///
/// The module part is a serial number; the function part is the function's
/// type-assigned identifier, unique within its module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareId {
    module: String,
    function: String,
}

impl HardwareId {
    /// Create a hardware ID from its two parts
    pub fn new<M: Into<String>, F: Into<String>>(module: M, function: F) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
        }
    }

    /// Parse `"module.function"`, splitting on the first separator
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once(SEPARATOR) {
            Some((module, function)) if !module.is_empty() && !function.is_empty() => {
                Ok(Self::new(module, function))
            }
            _ => Err(Error::invalid_argument(format!(
                "'{}' is not of the form module{}function",
                s, SEPARATOR
            ))),
        }
    }

    /// The module (serial number) part
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The function part
    pub fn function(&self) -> &str {
        &self.function
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.module, SEPARATOR, self.function)
    }
}

impl FromStr for HardwareId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for HardwareId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<HardwareId> for String {
    fn from(id: HardwareId) -> Self {
        id.to_string()
    }
}
