// raw input -> normalized relations
use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::mapping::MappingTable;
use crate::core::types::{AttachmentId, Tenant};
use crate::fabric::InventoryIndex;
use crate::sheet::SheetRow;

/// One normalized reachability fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Relation {
    /// `attachment` reaches the on-prem link (and back).
    OnPrem { attachment: AttachmentId },
    /// `peer`'s table receives `subject`'s routes; with `bidirectional`
    /// the reverse holds too.
    Peer {
        subject: AttachmentId,
        peer: AttachmentId,
        bidirectional: bool,
    },
    /// `attachment` is associated with its own route table.
    Home { attachment: AttachmentId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Requested in a sheet row.
    Declared,
    /// Read from the deployed fabric.
    Observed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fact {
    pub relation: Relation,
    pub origin: Origin,
}

impl Fact {
    /// Both directions were seen on the fabric, not just requested.
    pub fn is_verified_bidirectional(&self) -> bool {
        self.origin == Origin::Observed
            && match &self.relation {
                Relation::OnPrem { .. } => true,
                Relation::Peer { bidirectional, .. } => *bidirectional,
                Relation::Home { .. } => false,
            }
    }
}

/// Per-run counters of records that were skipped rather than failing the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    pub example_rows: usize,
    pub blank_rows: usize,
    pub invalid_identifier: usize,
    pub unresolved: usize,
    pub malformed_lines: usize,
    pub fabric_failures: usize,
}

impl SkipCounts {
    pub fn absorb(&mut self, other: SkipCounts) {
        self.example_rows += other.example_rows;
        self.blank_rows += other.blank_rows;
        self.invalid_identifier += other.invalid_identifier;
        self.unresolved += other.unresolved;
        self.malformed_lines += other.malformed_lines;
        self.fabric_failures += other.fabric_failures;
    }

    pub fn total(&self) -> usize {
        self.example_rows
            + self.blank_rows
            + self.invalid_identifier
            + self.unresolved
            + self.malformed_lines
            + self.fabric_failures
    }
}

/// Normalizer output. `onprem_attachment` is resolved during the scan and
/// handed to task derivation explicitly.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub facts: Vec<Fact>,
    pub onprem_attachment: Option<AttachmentId>,
    pub skipped: SkipCounts,
}

impl Normalized {
    fn push(&mut self, seen: &mut HashSet<Relation>, relation: Relation, origin: Origin) {
        if seen.insert(relation.clone()) {
            self.facts.push(Fact { relation, origin });
        }
    }
}

/// Sheet layout: one template example row per category precedes the data.
/// A row is VPC-to-VPC when its peer cell holds an attachment id, otherwise
/// VPC-to-on-prem.
pub fn normalize_sheet(rows: &[SheetRow], mapping: &MappingTable, tenant: &Tenant) -> Normalized {
    let mut out = Normalized {
        onprem_attachment: mapping.onprem_attachment(tenant).cloned(),
        ..Default::default()
    };
    let mut seen = HashSet::new();
    let mut vpc_example_skipped = false;
    let mut onprem_example_skipped = false;

    for row in rows {
        let peer = AttachmentId::parse(&row.peer);
        let is_vpc = peer.is_some();

        if is_vpc && !vpc_example_skipped {
            vpc_example_skipped = true;
            out.skipped.example_rows += 1;
            debug!(row = row.line, "skipping VPC-to-VPC example row");
            continue;
        }
        if !is_vpc && !onprem_example_skipped {
            onprem_example_skipped = true;
            out.skipped.example_rows += 1;
            debug!(row = row.line, "skipping VPC-to-on-prem example row");
            continue;
        }

        let Some(subject) = AttachmentId::parse(&row.subject) else {
            if row.subject.trim().is_empty() {
                out.skipped.blank_rows += 1;
            } else {
                out.skipped.invalid_identifier += 1;
                warn!(row = row.line, value = %row.subject, "subject cell is not an attachment id");
            }
            continue;
        };

        match peer {
            None => {
                if !mapping.is_mapped(&subject) {
                    out.skipped.unresolved += 1;
                    warn!(row = row.line, attachment = %subject, "no route table assigned, skipping on-prem row");
                    continue;
                }
                out.push(&mut seen, Relation::OnPrem { attachment: subject }, Origin::Declared);
            }
            Some(peer) => {
                if !mapping.is_mapped(&subject) || !mapping.is_mapped(&peer) {
                    out.skipped.unresolved += 1;
                    warn!(
                        row = row.line,
                        subject = %subject,
                        peer = %peer,
                        "peer relation references an unmapped attachment"
                    );
                    continue;
                }
                out.push(
                    &mut seen,
                    Relation::Peer {
                        subject,
                        peer,
                        bidirectional: true,
                    },
                    Origin::Declared,
                );
            }
        }
    }

    out
}

/// Lift the fabric's associations and propagations into facts.
///
/// A propagation of `T` into the home table of `H` is the directed edge
/// `T -> H`. Pairs seen in both directions become bidirectional facts (on-prem
/// facts when one side is the on-prem attachment); the rest stay one-way.
pub fn normalize_inventory(index: &InventoryIndex, mapping: &MappingTable, tenant: &Tenant) -> Normalized {
    let mut out = Normalized::default();
    let mut seen = HashSet::new();

    out.onprem_attachment = index
        .home
        .iter()
        .find(|(_, rtb_id)| {
            index
                .route_table_names
                .get(rtb_id.as_str())
                .is_some_and(|name| tenant.is_onprem_route_table(name))
        })
        .map(|(attachment, _)| attachment.clone());

    for attachment in index.home.keys() {
        if mapping.is_mapped(attachment) {
            out.push(&mut seen, Relation::Home { attachment: attachment.clone() }, Origin::Observed);
        } else {
            out.skipped.unresolved += 1;
        }
    }

    // directed edges advertised -> receiving home attachment
    let mut edges: BTreeSet<(AttachmentId, AttachmentId)> = BTreeSet::new();
    let mut homes: BTreeMap<&str, Vec<&AttachmentId>> = BTreeMap::new();
    for (attachment, rtb_id) in &index.home {
        homes.entry(rtb_id.as_str()).or_default().push(attachment);
    }

    for (rtb_id, advertised) in &index.propagations {
        let Some(receivers) = homes.get(rtb_id.as_str()) else {
            out.skipped.unresolved += advertised.len();
            warn!(route_table = %rtb_id, count = advertised.len(), "propagations into a table with no associated attachment");
            continue;
        };
        for target in advertised {
            if !mapping.is_mapped(target) {
                out.skipped.unresolved += 1;
                warn!(route_table = %rtb_id, attachment = %target, "propagated attachment has no home table");
                continue;
            }
            for &receiver in receivers {
                if receiver != target {
                    edges.insert((target.clone(), receiver.clone()));
                }
            }
        }
    }

    for (from, to) in &edges {
        let reverse = edges.contains(&(to.clone(), from.clone()));
        if reverse && from > to {
            // emitted from the other side
            continue;
        }
        let onprem = out.onprem_attachment.as_ref();
        let relation = if reverse && onprem == Some(to) {
            Relation::OnPrem { attachment: from.clone() }
        } else if reverse && onprem == Some(from) {
            Relation::OnPrem { attachment: to.clone() }
        } else {
            Relation::Peer {
                subject: from.clone(),
                peer: to.clone(),
                bidirectional: reverse,
            }
        };
        out.push(&mut seen, relation, Origin::Observed);
    }

    out
}
