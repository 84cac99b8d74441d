//! Job priority tiers.
//!
//! Priority is a plain integer; higher values preempt lower ones. Anything at
//! or above [`JobPriority::INTERACTIVE`] is dispatched ahead of the
//! per-project fairness ranking.

use serde::{Deserialize, Serialize};

/// Well-known priority values.
pub struct JobPriority;

impl JobPriority {
    /// Bulk reprocessing. Runs when nothing else is waiting.
    pub const REINDEX: i32 = -100;
    pub const STANDARD: i32 = 0;
    /// User-facing work that preempts project fairness.
    pub const INTERACTIVE: i32 = 100;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityTier {
    Reindex,
    Standard,
    Interactive,
}

impl PriorityTier {
    pub fn of(priority: i32) -> Self {
        if priority >= JobPriority::INTERACTIVE {
            PriorityTier::Interactive
        } else if priority > JobPriority::REINDEX {
            PriorityTier::Standard
        } else {
            PriorityTier::Reindex
        }
    }

    pub fn is_interactive(priority: i32) -> bool {
        Self::of(priority) == PriorityTier::Interactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_follow_thresholds() {
        assert_eq!(PriorityTier::of(JobPriority::INTERACTIVE), PriorityTier::Interactive);
        assert_eq!(PriorityTier::of(500), PriorityTier::Interactive);
        assert_eq!(PriorityTier::of(JobPriority::STANDARD), PriorityTier::Standard);
        assert_eq!(PriorityTier::of(99), PriorityTier::Standard);
        assert_eq!(PriorityTier::of(JobPriority::REINDEX), PriorityTier::Reindex);
    }

    #[test]
    fn tiers_order_by_preemption() {
        assert!(PriorityTier::Interactive > PriorityTier::Standard);
        assert!(PriorityTier::Standard > PriorityTier::Reindex);
    }
}
