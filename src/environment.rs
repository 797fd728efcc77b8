//! Environment keys for multi-tenant deployments.
//!
//! Each branded deployment (BC, CUT, TILT, CLICKSON) carries its own rule
//! bundle. The environment key is used purely to partition the engine
//! cache: one engine instance per environment per process.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier for a deployment/tenant family.
///
/// # Examples
///
/// ```
/// use carbon_rules::Environment;
///
/// let env: Environment = "bc".parse().unwrap();
/// assert_eq!(env, Environment::Bc);
/// assert_eq!(env.to_string(), "bc");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Bilan Carbone deployment.
    Bc,
    /// CUT deployment.
    Cut,
    /// TILT deployment.
    Tilt,
    /// CLICKSON deployment.
    Clickson,
    /// Ad-hoc tenant outside the branded families.
    Custom(String),
}

impl Environment {
    /// Returns the canonical lowercase name of this environment.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Bc => "bc",
            Self::Cut => "cut",
            Self::Tilt => "tilt",
            Self::Clickson => "clickson",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "bc" => Self::Bc,
            "cut" => Self::Cut,
            "tilt" => Self::Tilt,
            "clickson" => Self::Clickson,
            other => Self::Custom(other.to_string()),
        })
    }
}
