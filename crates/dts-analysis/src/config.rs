//! Analysis configuration.

/// Configuration for context building and validation.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Whether deprecated standard properties produce warnings.
    pub deprecated_warnings: bool,
    /// Whether shadowed property definitions produce hints.
    pub duplicate_hints: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deprecated_warnings: true,
            duplicate_hints: true,
        }
    }
}
