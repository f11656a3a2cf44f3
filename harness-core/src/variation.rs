//! Add/remove cycle statistics.
//!
//! Each add/remove loop fills a pool's metadata store and empties it again.
//! The number of containers created should be about the same every loop; a
//! loop whose count differs from the mean of all loops by more than
//! `percent` of that mean is a variation failure.

/// One row of the add/remove summary.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopVariation {
    /// 1-based loop number.
    pub loop_number: usize,
    /// Containers created in this loop.
    pub created: u64,
    /// `|created - mean|`.
    pub variation: f64,
    /// True if `variation` exceeds the allowed deviation.
    pub failed: bool,
}

/// Result of analysing all loops.
#[derive(Debug, Clone, PartialEq)]
pub struct VariationReport {
    /// Mean of the created counts.
    pub mean: f64,
    /// Allowed deviation from the mean, truncated to a whole container count.
    pub allowed: u64,
    /// One row per loop.
    pub rows: Vec<LoopVariation>,
}

impl VariationReport {
    /// Compare every loop's count against the mean of all loops.
    pub fn analyze(counts: &[u64], percent: f64) -> Self {
        if counts.is_empty() {
            return Self {
                mean: 0.0,
                allowed: 0,
                rows: Vec::new(),
            };
        }
        let mean = counts.iter().map(|c| *c as f64).sum::<f64>() / counts.len() as f64;
        let allowed = (mean * percent / 100.0).trunc() as u64;
        let rows = counts
            .iter()
            .enumerate()
            .map(|(i, &created)| {
                let variation = (created as f64 - mean).abs();
                LoopVariation {
                    loop_number: i + 1,
                    created,
                    variation,
                    failed: variation > allowed as f64,
                }
            })
            .collect();
        Self {
            mean,
            allowed,
            rows,
        }
    }

    /// Failure message per loop whose variation exceeds the allowance.
    pub fn failures(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter(|row| row.failed)
            .map(|row| {
                format!(
                    "loop {}: created {} containers, {:.1} from mean {:.1} exceeds {}",
                    row.loop_number, row.created, row.variation, self.mean, self.allowed
                )
            })
            .collect()
    }

    /// Summary table, one line per loop.
    pub fn table(&self) -> Vec<String> {
        let mut lines = vec![format!("  {:<4}  {:<18}  {}", "Loop", "Containers Created", "Variation")];
        for row in &self.rows {
            let mark = if row.failed {
                format!("{:.1}  **FAIL: exceeds {}", row.variation, self.allowed)
            } else {
                format!("{:.1}", row.variation)
            };
            lines.push(format!("  {:<4}  {:<18}  {}", row.loop_number, row.created, mark));
        }
        lines
    }
}
