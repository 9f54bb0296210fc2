//! Request priority levels.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Priority level for pipeline work.
///
/// A task shared by several subscribers runs at the highest priority among
/// them. Priority only affects ordering inside the work queues; it never
/// preempts work that has already started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Speculative background loads
    VeryLow,
    /// Prefetching just outside the visible area
    Low,
    /// Standard requests
    #[default]
    Normal,
    /// Content the user is looking at
    High,
    /// Content blocking the user
    VeryHigh,
}

impl Priority {
    /// All levels in ascending order.
    pub const ALL: [Priority; 5] = [
        Priority::VeryLow,
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::VeryHigh,
    ];

    /// Returns the config/CLI spelling of this level.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::VeryLow => "very_low",
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a priority level.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid priority '{0}' - expected one of: very_low, low, normal, high, very_high")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "very_low" | "verylow" => Ok(Priority::VeryLow),
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "very_high" | "veryhigh" => Ok(Priority::VeryHigh),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}
