//! Governance constants and configuration defaults
//!
//! Centralized location for thresholds and default values

use std::time::Duration;

/// Persistence configuration
pub mod storage {
    use super::*;

    /// Quiet period a logical store must see before a debounced flush fires
    pub const DEBOUNCE_QUIET_PERIOD: Duration = Duration::from_millis(500);

    /// Semantic version written into every persisted store envelope
    pub const STORE_VERSION: &str = "2.0.0";

    /// Version of the legacy two-level (epic/task) store layout
    pub const LEGACY_STORE_VERSION: &str = "1.0.0";
}

/// Task graph thresholds
pub mod graph {
    use super::*;

    /// A task active this long with zero checkpoints is reported as stale
    pub const STALE_ACTIVE_TASK: Duration = Duration::from_secs(30 * 60);

    /// Abandoned plans untouched for this long are soft-deleted
    pub const ABANDONED_PURGE_THRESHOLD: Duration = Duration::from_secs(48 * 60 * 60);
}

/// Governance gate configuration
pub mod gate {
    use super::*;

    /// A denial of the same tool within this window is reported as a retry
    pub const RETRY_WINDOW: Duration = Duration::from_secs(30);

    /// Prefix of every lifecycle command failure string
    pub const ERROR_SENTINEL: &str = "ERROR: ";

    /// Marker on the first line of every governance denial
    pub const DENIAL_MARKER: &str = "[GOVERNANCE DENIED]";
}

/// Tool names
pub mod tools {
    pub const GOVERN_PLAN: &str = "govern_plan";
    pub const GOVERN_TASK: &str = "govern_task";
    pub const GOVERN_DELEGATE: &str = "govern_delegate";
    pub const GOVERN_ANCHOR: &str = "govern_anchor";

    /// All lifecycle tools
    pub const LIFECYCLE: [&str; 4] = [GOVERN_PLAN, GOVERN_TASK, GOVERN_DELEGATE, GOVERN_ANCHOR];
}

/// Filesystem layout
pub mod paths {
    /// Config directory name
    pub const CONFIG_DIR_NAME: &str = ".govern";

    /// Data subdirectory name
    pub const DATA_DIR_NAME: &str = "data";

    /// Logs subdirectory name
    pub const LOGS_DIR_NAME: &str = "logs";

    /// Config file name
    pub const CONFIG_FILE_NAME: &str = "config.toml";
}
