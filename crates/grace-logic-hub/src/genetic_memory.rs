//! Dead-end detection for rolled-back or rejected updates, keyed on an update's `checksum`
//! rather than anything type-specific. Prevents the Hub from re-accepting content it has
//! already rejected.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadEndRecord {
    pub checksum: String,
    pub update_id: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
    pub occurrence_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneticMemory {
    dead_ends: HashMap<String, DeadEndRecord>,
}

impl GeneticMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dead_end(&mut self, checksum: &str, update_id: &str, reason: &str) {
        let entry = self
            .dead_ends
            .entry(checksum.to_string())
            .or_insert_with(|| DeadEndRecord {
                checksum: checksum.to_string(),
                update_id: update_id.to_string(),
                reason: reason.to_string(),
                recorded_at: Utc::now(),
                occurrence_count: 0,
            });
        entry.occurrence_count += 1;
        entry.reason = reason.to_string();
        entry.recorded_at = Utc::now();
    }

    pub fn is_dead_end(&self, checksum: &str) -> Option<&DeadEndRecord> {
        self.dead_ends.get(checksum)
    }

    pub fn dead_end_count(&self) -> usize {
        self.dead_ends.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_dead_end_bumps_occurrence_count() {
        let mut gm = GeneticMemory::new();
        gm.mark_dead_end("abc123", "u1", "rolled back: unstable");
        gm.mark_dead_end("abc123", "u2", "resubmitted same content");
        let record = gm.is_dead_end("abc123").unwrap();
        assert_eq!(record.occurrence_count, 2);
    }
}
