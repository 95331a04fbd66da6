// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Document configuration, with optional overrides from environment variables.

/// How invariant violations are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Violations are logged at `warn` level; operations proceed.
    #[default]
    Lenient,
    /// Violations are logged at `error` level and a commit that leaves a
    /// touched entity invalid is rolled back.
    Strict,
}

impl std::str::FromStr for Strictness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" | "warn" => Ok(Strictness::Lenient),
            "strict" | "error" => Ok(Strictness::Strict),
            other => Err(format!("unknown strictness level: {other}")),
        }
    }
}

/// Document configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Policy for invariant violations.
    pub strictness: Strictness,
    /// Smallest area a slab or room profile may enclose.
    pub min_profile_area: f64,
    /// Number of committed transactions kept for undo.
    pub max_undo_steps: usize,
    /// Queue signals raised inside a transaction until it commits.
    pub defer_signals: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            strictness: Strictness::Lenient,
            min_profile_area: 1e-6,
            max_undo_steps: 100,
            defer_signals: true,
        }
    }
}

impl ModelConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            strictness: std::env::var("ROOMGRAPH_STRICTNESS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.strictness),
            min_profile_area: std::env::var("ROOMGRAPH_MIN_PROFILE_AREA")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(defaults.min_profile_area),
            max_undo_steps: std::env::var("ROOMGRAPH_MAX_UNDO_STEPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_undo_steps),
            defer_signals: std::env::var("ROOMGRAPH_DEFER_SIGNALS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.defer_signals),
        }
    }

    /// Returns a copy with strict verification enabled.
    pub fn strict(mut self) -> Self {
        self.strictness = Strictness::Strict;
        self
    }
}
