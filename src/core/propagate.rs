// facts -> routing tasks
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::core::mapping::MappingTable;
use crate::core::normalize::{Fact, Relation, SkipCounts};
use crate::core::types::{AttachmentId, RtbPrefix, Task, TaskKey, Tenant};

/// Tasks derived in one run, in emission order, without duplicate keys.
#[derive(Debug, Clone, Default)]
pub struct Derivation {
    pub tasks: Vec<Task>,
    pub skipped: SkipCounts,
    keys: HashSet<TaskKey>,
}

impl Derivation {
    /// Keep the first task for a key; later ones are dropped.
    fn push(&mut self, task: Task) {
        if self.keys.insert(task.key()) {
            debug!(task_id = task.task_id(), route_table = task.route_table(), "derived task");
            self.tasks.push(task);
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Route table and task prefix of a mapped attachment.
struct Endpoint<'a> {
    attachment: &'a AttachmentId,
    route_table: &'a str,
    prefix: String,
}

fn resolve<'a>(attachment: &'a AttachmentId, mapping: &'a MappingTable, tenant: &Tenant) -> Option<Endpoint<'a>> {
    let route_table = mapping.route_table_of(attachment)?;
    let prefix = tenant.task_prefix(route_table)?;
    Some(Endpoint {
        attachment,
        route_table,
        prefix,
    })
}

/// Turn normalized facts into associate/propagate tasks.
///
/// - on-prem: the on-prem association (once per run), the subject's own
///   association, and one propagation each way through the on-prem table;
///   without an on-prem attachment only the subject's side is emitted
/// - peer: the subject is advertised into the peer's table; a bidirectional
///   peer also advertises the peer into the subject's table
/// - home: the attachment's own association
///
/// Task ids are keyed off the advertised side, so both directions of a
/// pair carry different ids.
pub fn derive(
    facts: &[Fact],
    mapping: &MappingTable,
    onprem: Option<&AttachmentId>,
    tenant: &Tenant,
) -> Derivation {
    let mut out = Derivation::default();
    let onprem_rtb = tenant.onprem_route_table();
    let mut onprem_associated = false;

    for fact in facts {
        match &fact.relation {
            Relation::OnPrem { attachment } => {
                let Some(subject) = resolve(attachment, mapping, tenant) else {
                    out.skipped.unresolved += 1;
                    warn!(attachment = %attachment, "attachment has no usable route table");
                    continue;
                };

                if let (Some(onprem), false) = (onprem, onprem_associated) {
                    onprem_associated = true;
                    out.push(Task::associate(RtbPrefix::OnPrem, &onprem_rtb, onprem.clone()));
                }
                out.push(Task::associate(&subject.prefix, subject.route_table, subject.attachment.clone()));
                match onprem {
                    Some(onprem) => {
                        out.push(Task::propagate(RtbPrefix::OnPrem, subject.route_table, None, onprem.clone()));
                    }
                    None => {
                        // only the on-prem side is missing
                        out.skipped.unresolved += 1;
                        warn!(attachment = %attachment, "no on-prem attachment resolved, skipping its propagation");
                    }
                }
                out.push(Task::propagate(&subject.prefix, &onprem_rtb, None, subject.attachment.clone()));
            }
            Relation::Peer {
                subject,
                peer,
                bidirectional,
            } => {
                let (Some(subject), Some(peer)) = (resolve(subject, mapping, tenant), resolve(peer, mapping, tenant))
                else {
                    out.skipped.unresolved += 1;
                    warn!(subject = %subject, peer = %peer, "peer relation has an unresolved side");
                    continue;
                };

                out.push(Task::propagate(
                    &subject.prefix,
                    peer.route_table,
                    Some(peer.attachment.clone()),
                    subject.attachment.clone(),
                ));
                if *bidirectional {
                    out.push(Task::propagate(
                        &peer.prefix,
                        subject.route_table,
                        Some(subject.attachment.clone()),
                        peer.attachment.clone(),
                    ));
                }
            }
            Relation::Home { attachment } => {
                let Some(home) = resolve(attachment, mapping, tenant) else {
                    out.skipped.unresolved += 1;
                    continue;
                };
                out.push(Task::associate(&home.prefix, home.route_table, home.attachment.clone()));
            }
        }
    }

    out
}
