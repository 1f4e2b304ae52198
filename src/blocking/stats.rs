use serde::Serialize;

use super::side::BlockSide;

/// Monotone counters for the blocking path. Only `reset` moves them backwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BlockCounters {
    pub total_detections: u64,
    pub successful_blocks: u64,
    pub failed_blocks: u64,
}

impl BlockCounters {
    pub fn record_detection(&mut self) {
        self.total_detections += 1;
    }

    pub fn record_outcome(&mut self, blocked: bool) {
        if blocked {
            self.successful_blocks += 1;
        } else {
            self.failed_blocks += 1;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Percentage of triggered detections that ended in a confirmed block.
    pub fn success_rate(&self) -> f64 {
        if self.total_detections == 0 {
            return 0.0;
        }
        self.successful_blocks as f64 / self.total_detections as f64 * 100.0
    }
}

/// Point-in-time view of the blocking coordinator.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlockerStatistics {
    pub total_detections: u64,
    pub successful_blocks: u64,
    pub failed_blocks: u64,
    pub success_rate: f64,
    pub is_monitoring: bool,
    pub blocking_active: bool,
    pub last_side: BlockSide,
}

impl BlockerStatistics {
    pub fn new(
        counters: BlockCounters,
        is_monitoring: bool,
        blocking_active: bool,
        last_side: BlockSide,
    ) -> Self {
        Self {
            total_detections: counters.total_detections,
            successful_blocks: counters.successful_blocks,
            failed_blocks: counters.failed_blocks,
            success_rate: counters.success_rate(),
            is_monitoring,
            blocking_active,
            last_side,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_a_percentage() {
        let mut counters = BlockCounters::default();
        assert_eq!(counters.success_rate(), 0.0);

        for blocked in [true, false, true, true] {
            counters.record_detection();
            counters.record_outcome(blocked);
        }
        assert_eq!(counters.successful_blocks, 3);
        assert_eq!(counters.failed_blocks, 1);
        assert_eq!(counters.success_rate(), 75.0);

        counters.reset();
        assert_eq!(counters, BlockCounters::default());
    }

    #[test]
    fn statistics_serialize_with_lowercase_side() {
        let stats = BlockerStatistics::new(BlockCounters::default(), false, false, BlockSide::Left);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["last_side"], "left");
        assert_eq!(json["success_rate"], 0.0);
    }
}
