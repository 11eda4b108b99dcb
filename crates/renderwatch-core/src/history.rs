use crate::error::{RenderwatchError, Result};
use crate::record::JobRecord;
use serde::Serialize;

/// Default number of snapshots retained per job.
pub const DEFAULT_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: i64,
    pub snapshot: JobRecord,
}

// ---------------------------------------------------------------------------
// JobHistory
// ---------------------------------------------------------------------------

/// Time-ordered snapshots of one job. Entries are never modified once
/// appended; the oldest are evicted when the limit is exceeded.
#[derive(Debug, Clone)]
pub struct JobHistory {
    entries: Vec<HistoryEntry>,
    limit: usize,
}

impl JobHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit: limit.max(1),
        }
    }

    pub fn append(&mut self, timestamp: i64, snapshot: JobRecord) {
        self.entries.push(HistoryEntry {
            timestamp,
            snapshot,
        });
        if self.entries.len() > self.limit {
            let latest = self.latest_index();
            let excess = self.entries.len() - self.limit;
            // Evict oldest-first, never the latest entry.
            let mut removed = 0;
            let mut index = 0;
            self.entries.retain(|_| {
                let keep = removed >= excess || index == latest;
                if !keep {
                    removed += 1;
                }
                index += 1;
                keep
            });
        }
    }

    /// The entry with the greatest timestamp; the most recently appended one
    /// wins a tie.
    pub fn latest(&self) -> Result<&HistoryEntry> {
        if self.entries.is_empty() {
            return Err(RenderwatchError::EmptyHistory);
        }
        Ok(&self.entries[self.latest_index()])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    fn latest_index(&self) -> usize {
        // max_by_key returns the last maximum, which is the latest insertion.
        self.entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| e.timestamp)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

impl Default for JobHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(pct: i64) -> JobRecord {
        [("CompletionPercentage".to_string(), json!(pct))]
            .into_iter()
            .collect()
    }

    #[test]
    fn latest_on_empty_history_fails() {
        let history = JobHistory::default();
        assert!(matches!(
            history.latest(),
            Err(RenderwatchError::EmptyHistory)
        ));
    }

    #[test]
    fn latest_prefers_max_timestamp() {
        let mut history = JobHistory::default();
        history.append(20, snapshot(2));
        history.append(10, snapshot(1));
        assert_eq!(history.latest().unwrap().snapshot, snapshot(2));
    }

    #[test]
    fn latest_breaks_ties_by_insertion_order() {
        let mut history = JobHistory::default();
        history.append(10, snapshot(1));
        history.append(10, snapshot(2));
        assert_eq!(history.latest().unwrap().snapshot, snapshot(2));
    }

    #[test]
    fn limit_evicts_oldest_entries() {
        let mut history = JobHistory::new(3);
        for t in 0..5 {
            history.append(t, snapshot(t));
        }
        assert_eq!(history.len(), 3);
        let stamps: Vec<i64> = history.entries().iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![2, 3, 4]);
        assert_eq!(history.latest().unwrap().timestamp, 4);
    }

    #[test]
    fn limit_never_evicts_latest() {
        let mut history = JobHistory::new(1);
        history.append(50, snapshot(1));
        history.append(40, snapshot(2));
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().timestamp, 50);
    }
}
