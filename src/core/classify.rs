// reachability classification of a task set
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::types::{AttachmentId, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    /// each side is propagated into the other's home table
    Bidirectional,
    /// only `from` is propagated into `to`'s home table
    OneWay,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Pair {
    pub from: AttachmentId,
    pub to: AttachmentId,
    pub kind: Reachability,
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// attachment -> home route table
    pub homes: BTreeMap<AttachmentId, String>,
    /// route table -> attachments propagated into it
    pub received: BTreeMap<String, BTreeSet<AttachmentId>>,
    /// sorted; bidirectional pairs have `from < to`
    pub pairs: Vec<Pair>,
}

impl Classification {
    /// Every attachment named by an associate or propagate task.
    pub fn attachments(&self) -> BTreeSet<&AttachmentId> {
        self.homes
            .keys()
            .chain(self.received.values().flatten())
            .collect()
    }

    pub fn bidirectional(&self) -> impl Iterator<Item = &Pair> {
        self.pairs
            .iter()
            .filter(|p| p.kind == Reachability::Bidirectional)
    }

    pub fn count_one_way(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| p.kind == Reachability::OneWay)
            .count()
    }

    fn advertises(&self, from: &AttachmentId, to: &AttachmentId) -> bool {
        self.homes
            .get(to)
            .and_then(|rtb| self.received.get(rtb))
            .is_some_and(|set| set.contains(from))
    }
}

/// Pair up attachments whose home tables receive each other's routes.
///
/// Home tables come from associate tasks, and from `homes` for attachments
/// that have none (peer-only attachments of the sheet path). Associate
/// tasks win over `homes`.
pub fn classify_with_homes<'a>(
    tasks: &[Task],
    homes: impl IntoIterator<Item = (&'a AttachmentId, &'a str)>,
) -> Classification {
    let mut out = Classification::default();

    for task in tasks {
        match task {
            Task::Associate {
                route_table,
                attachment,
                ..
            } => {
                out.homes
                    .entry(attachment.clone())
                    .or_insert_with(|| route_table.clone());
            }
            Task::Propagate {
                route_table,
                target,
                ..
            } => {
                out.received
                    .entry(route_table.clone())
                    .or_default()
                    .insert(target.clone());
            }
        }
    }

    for (attachment, route_table) in homes {
        out.homes
            .entry(attachment.clone())
            .or_insert_with(|| route_table.to_string());
    }

    let homed: Vec<&AttachmentId> = out.homes.keys().collect();
    let mut pairs = Vec::new();
    for (i, &a) in homed.iter().enumerate() {
        for &b in &homed[i + 1..] {
            let pair = match (out.advertises(a, b), out.advertises(b, a)) {
                (true, true) => Some((a, b, Reachability::Bidirectional)),
                (true, false) => Some((a, b, Reachability::OneWay)),
                (false, true) => Some((b, a, Reachability::OneWay)),
                (false, false) => None,
            };
            if let Some((from, to, kind)) = pair {
                pairs.push(Pair {
                    from: from.clone(),
                    to: to.clone(),
                    kind,
                });
            }
        }
    }
    pairs.sort();
    out.pairs = pairs;
    out
}
