//! Runtime parameters pushed to a pipeline.
//!
//! The device keeps one value per parameter and unit; each push replaces the
//! previous value. Nothing can be read back, so the driver keeps a shadow of
//! what it last pushed for reporting and tests. Parameters that were never
//! pushed stay at the device's power-on default.

use crate::channel::ScalarParam;

/// Memory latency model injected into a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyInjection {
    /// Extra cycles added to every memory access.
    pub cycles: u64,
    /// Whether an intermediate cache sits in front of the modelled memory.
    pub has_cache: bool,
}

/// Shadow of the last values pushed to one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineConfig {
    /// History window limit in bytes.
    pub history: Option<u64>,
    /// Hash table entries, as log2.
    pub hash_table_log2: Option<u64>,
    pub latency: Option<LatencyInjection>,
}

impl PipelineConfig {
    /// Records a pushed parameter. Last write wins.
    ///
    /// Algorithm selection is per request and not part of the shadow.
    ///
    /// # Arguments
    ///
    /// * `param` - Parameter the unit has just accepted
    pub fn record(&mut self, param: ScalarParam) {
        match param {
            ScalarParam::History(bytes) => self.history = Some(bytes),
            ScalarParam::HashTableLog2(log2) => self.hash_table_log2 = Some(log2),
            ScalarParam::LatencyInjection(latency) => self.latency = Some(latency),
            ScalarParam::Algorithm(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_push_wins() {
        let mut config = PipelineConfig::default();
        config.record(ScalarParam::History(65536));
        config.record(ScalarParam::HashTableLog2(14));
        config.record(ScalarParam::History(2048));
        assert_eq!(config.history, Some(2048));
        assert_eq!(config.hash_table_log2, Some(14));
        assert_eq!(config.latency, None);
    }

    #[test]
    fn test_repeated_push_is_idempotent() {
        let param = ScalarParam::LatencyInjection(LatencyInjection {
            cycles: 300,
            has_cache: true,
        });
        let mut once = PipelineConfig::default();
        once.record(param);
        let mut twice = once;
        twice.record(param);
        assert_eq!(once, twice);
    }
}
