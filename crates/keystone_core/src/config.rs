//! Store configuration

use serde::{Deserialize, Serialize};

/// How persistent ids relate to internal entity ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidMode {
    /// The pid is the entity id. Callers choose ids explicitly.
    UsePidAsId,
    /// Pids are bound independently of ids; the store assigns one when the
    /// caller does not.
    #[default]
    Independent,
}

/// Entity store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub pid_mode: PidMode,
    /// Rows reserved up front in every newly created archetype.
    pub archetype_capacity: usize,
    /// Row partition size used by parallel iteration.
    pub parallel_rows: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pid_mode: PidMode::Independent,
            archetype_capacity: 0,
            parallel_rows: 1024,
        }
    }
}

impl StoreConfig {
    pub fn with_pid_mode(mut self, pid_mode: PidMode) -> Self {
        self.pid_mode = pid_mode;
        self
    }
}
