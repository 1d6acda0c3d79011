//! Proxy selection strategies and rotation
//!
//! This module decides which proxy a request gets, combining the health
//! tracker's live view, the time-bounded exclusion set, and a pluggable
//! ordering strategy.

mod exclusion;
mod least_recently_used;
mod round_robin;
mod selector;

pub use exclusion::ExclusionSet;
pub use least_recently_used::LeastRecentlyUsedPicker;
pub use round_robin::RoundRobinPicker;
pub use selector::ProxySelector;

use crate::models::ProxyRecord;

/// Strategy types for proxy rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    #[default]
    LeastRecentlyUsed,
    RoundRobin,
}

impl RotationStrategy {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "round_robin" | "roundrobin" | "round-robin" => Self::RoundRobin,
            _ => Self::LeastRecentlyUsed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeastRecentlyUsed => "least_recently_used",
            Self::RoundRobin => "round_robin",
        }
    }
}

/// Trait for proxy ordering strategies
///
/// A picker chooses one proxy from an already-filtered candidate list;
/// filtering (status, error threshold, exclusions) happens in the selector.
pub trait ProxyPicker: Send + Sync {
    /// Pick a proxy from the candidates, or `None` when the list is empty
    fn pick(&self, candidates: &[ProxyRecord]) -> Option<ProxyRecord>;

    /// Get the strategy name
    fn strategy_name(&self) -> &'static str;
}

/// Create a picker based on the strategy type
pub fn create_picker(strategy: RotationStrategy) -> Box<dyn ProxyPicker> {
    match strategy {
        RotationStrategy::LeastRecentlyUsed => Box::new(LeastRecentlyUsedPicker::new()),
        RotationStrategy::RoundRobin => Box::new(RoundRobinPicker::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_strategy_from_str() {
        assert_eq!(
            RotationStrategy::from_str("round_robin"),
            RotationStrategy::RoundRobin
        );
        assert_eq!(
            RotationStrategy::from_str("round-robin"),
            RotationStrategy::RoundRobin
        );
        assert_eq!(
            RotationStrategy::from_str("least_recently_used"),
            RotationStrategy::LeastRecentlyUsed
        );
        assert_eq!(
            RotationStrategy::from_str("unknown"),
            RotationStrategy::LeastRecentlyUsed
        );
    }

    #[test]
    fn test_create_picker_strategy_name() {
        assert_eq!(
            create_picker(RotationStrategy::LeastRecentlyUsed).strategy_name(),
            "least_recently_used"
        );
        assert_eq!(
            create_picker(RotationStrategy::RoundRobin).strategy_name(),
            "round_robin"
        );
    }
}
