// persisted task set + derived tasks -> next task set
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::types::{Task, TaskKey};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// keys not present before
    pub added: usize,
    /// keys present before whose task changed
    pub updated: usize,
    /// keys only in the persisted set
    pub retained: usize,
}

impl MergeStats {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Merged {
    /// sorted by [`TaskKey`]
    pub tasks: Vec<Task>,
    pub stats: MergeStats,
}

/// Merge `incoming` over `existing`.
///
/// invariants:
/// 1. a key appears once in the result
/// 2. an incoming task replaces the existing task with the same key
/// 3. existing keys absent from `incoming` survive unchanged
/// 4. the result is ordered by key, so equal inputs give equal outputs
pub fn merge(existing: Vec<Task>, incoming: Vec<Task>) -> Merged {
    let mut by_key: BTreeMap<TaskKey, Task> = BTreeMap::new();
    for task in existing {
        by_key.insert(task.key(), task);
    }
    let persisted = by_key.clone();

    let mut incoming_keys = BTreeSet::new();
    for task in incoming {
        let key = task.key();
        incoming_keys.insert(key.clone());
        by_key.insert(key, task);
    }

    let mut stats = MergeStats::default();
    for key in &incoming_keys {
        match persisted.get(key) {
            None => stats.added += 1,
            Some(prev) if by_key.get(key) != Some(prev) => stats.updated += 1,
            Some(_) => {}
        }
    }
    stats.retained = persisted
        .keys()
        .filter(|key| !incoming_keys.contains(*key))
        .count();

    Merged {
        tasks: by_key.into_values().collect(),
        stats,
    }
}
