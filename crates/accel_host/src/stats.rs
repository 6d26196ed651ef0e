//! Per-request measurements and the summary printed after a run.

use crate::cycles;
use crate::size::format_size;
use std::collections::BTreeMap;

/// One request on one input.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub name: String,
    pub history: u64,
    pub hash_table_log2: Option<u64>,
    pub elapsed: u64,
    pub input_len: usize,
    pub output_len: usize,
    pub verified: bool,
}

impl RunRecord {
    fn grid_point(&self) -> (u64, Option<u64>) {
        (self.history, self.hash_table_log2)
    }
}

/// Accumulates records of one pipeline and reports them.
///
/// Keeps min, max and sum of the elapsed time so the summary does not have
/// to walk the records again.
pub struct RunTotals {
    pub label: String,
    pub records: Vec<RunRecord>,
    pub min: u64,
    pub max: u64,
    pub sum: u64,
}

impl RunTotals {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            records: Vec::new(),
            min: u64::MAX,
            max: 0,
            sum: 0,
        }
    }

    pub fn update(&mut self, record: RunRecord) {
        self.min = self.min.min(record.elapsed);
        self.max = self.max.max(record.elapsed);
        self.sum += record.elapsed;
        self.records.push(record);
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn avg(&self) -> f64 {
        if self.records.is_empty() {
            0.0
        } else {
            self.sum as f64 / self.records.len() as f64
        }
    }

    pub fn failures(&self) -> usize {
        self.records.iter().filter(|r| !r.verified).count()
    }

    /// Sums per (history, hash table) point, in ascending order.
    pub fn grid_totals(&self) -> BTreeMap<(u64, Option<u64>), (u64, usize, usize)> {
        let mut grid = BTreeMap::new();
        for record in &self.records {
            let entry = grid.entry(record.grid_point()).or_insert((0, 0, 0));
            entry.0 += record.elapsed;
            entry.1 += record.input_len;
            entry.2 += record.output_len;
        }
        grid
    }

    pub fn print_report(&self) {
        println!("\n{}", self.label);
        for r in &self.records {
            println!(
                "Took {} {}, produced {} bytes from {} bytes for {}, hist {}, ht_log2 {}{}",
                r.elapsed,
                cycles::UNIT,
                r.output_len,
                r.input_len,
                r.name,
                format_size(r.history),
                ht_label(r.hash_table_log2),
                if r.verified { "" } else { " MISMATCH" }
            );
        }
        for ((history, ht), (elapsed, input, output)) in self.grid_totals() {
            let ratio = if output == 0 {
                0.0
            } else {
                input as f64 / output as f64
            };
            println!(
                "TOTAL: hist {} ht_log2 {}: {} {}, {} -> {} bytes, ratio {:.3}",
                format_size(history),
                ht_label(ht),
                elapsed,
                cycles::UNIT,
                input,
                output,
                ratio
            );
        }
        if !self.records.is_empty() {
            println!(
                "Requests: {}  Min: {}  Avg: {:.2}  Max: {} ({})",
                self.count(),
                self.min,
                self.avg(),
                self.max,
                cycles::UNIT
            );
        }
        let failures = self.failures();
        if failures > 0 {
            println!("FAILED: {failures} outputs did not match the reference codec");
        }
    }
}

fn ht_label(ht: Option<u64>) -> String {
    ht.map_or_else(|| "-".to_string(), |log2| log2.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(history: u64, ht: Option<u64>, elapsed: u64, verified: bool) -> RunRecord {
        RunRecord {
            name: "bench".into(),
            history,
            hash_table_log2: ht,
            elapsed,
            input_len: 100,
            output_len: 40,
            verified,
        }
    }

    #[test]
    fn test_totals_track_extremes() {
        let mut totals = RunTotals::new("snappy");
        assert_eq!(totals.avg(), 0.0);
        totals.update(record(64 << 10, Some(14), 30, true));
        totals.update(record(64 << 10, Some(14), 10, true));
        totals.update(record(32 << 10, Some(14), 20, false));
        assert_eq!(totals.min, 10);
        assert_eq!(totals.max, 30);
        assert_eq!(totals.avg(), 20.0);
        assert_eq!(totals.failures(), 1);
    }

    #[test]
    fn test_grid_totals_group_by_tuning() {
        let mut totals = RunTotals::new("zstd");
        totals.update(record(64 << 10, Some(14), 5, true));
        totals.update(record(64 << 10, Some(14), 7, true));
        totals.update(record(64 << 10, Some(9), 1, true));
        let grid = totals.grid_totals();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid[&(64 << 10, Some(14))], (12, 200, 80));
        assert_eq!(grid[&(64 << 10, Some(9))], (1, 100, 40));
    }
}
