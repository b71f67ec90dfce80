// sheet attachments -> accepted, named, mapped attachments
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::mapping::MappingTable;
use crate::core::naming::{NamingCounter, allocate};
use crate::core::types::{AttachmentId, MappingRecord, Tenant};
use crate::error::ReconcileError;
use crate::fabric::{AttachmentState, FabricMutator};
use crate::sheet::SheetRow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Onboarding {
    pub considered: usize,
    pub accepted: usize,
    pub tagged: usize,
    /// attachments that got a freshly allocated route table
    pub allocated: usize,
    pub already_named: usize,
    /// not available after describe/accept
    pub not_ready: usize,
    pub failures: usize,
}

/// Rows whose subject is onboarded: the first row with a valid subject is
/// the template example, and VPC-to-VPC rows (peer cell holds an attachment
/// id) are left to their on-prem row.
fn candidates(rows: &[SheetRow]) -> Vec<(usize, AttachmentId)> {
    let mut out = Vec::new();
    let mut example_skipped = false;
    for row in rows {
        let Some(subject) = AttachmentId::parse(&row.subject) else {
            continue;
        };
        if !example_skipped {
            example_skipped = true;
            continue;
        }
        if AttachmentId::parse(&row.peer).is_some() {
            continue;
        }
        out.push((row.line, subject));
    }
    out
}

/// Describe, accept when pending, and re-describe.
fn settle(fabric: &mut dyn FabricMutator, id: &AttachmentId, out: &mut Onboarding) -> Result<AttachmentState, ReconcileError> {
    let state = fabric.describe(id)?;
    if !state.is_pending_acceptance() {
        return Ok(state);
    }
    let after = fabric.accept(id)?;
    out.accepted += 1;
    info!(attachment = %id, state = %after, "accepted pending attachment");
    fabric.describe(id)
}

/// Accept and name the attachments requested in the sheet, allocating a
/// route table for each one that has none yet.
///
/// Fabric errors skip the attachment. Allocations are observed into
/// `counters` immediately so later rows see them.
pub fn onboard(
    rows: &[SheetRow],
    mapping: &mut MappingTable,
    counters: &mut NamingCounter,
    tenant: &Tenant,
    fabric: &mut dyn FabricMutator,
) -> Result<Onboarding, ReconcileError> {
    let mut out = Onboarding::default();

    for (line, id) in candidates(rows) {
        out.considered += 1;

        let state = match settle(fabric, &id, &mut out) {
            Ok(state) => state,
            Err(err) => {
                out.failures += 1;
                warn!(row = line, attachment = %id, error = %err, "fabric call failed, skipping attachment");
                continue;
            }
        };
        if !state.is_usable() {
            out.not_ready += 1;
            debug!(row = line, attachment = %id, state = %state.state, "attachment not usable yet");
            continue;
        }
        if state.name_tag.is_some() {
            out.already_named += 1;
            debug!(row = line, attachment = %id, "attachment already named");
            continue;
        }

        let (route_table, fresh) = match mapping.route_table_of(&id) {
            Some(existing) => (existing.to_string(), false),
            None => {
                let name = allocate(tenant, &state.owner_account, counters);
                counters.observe(tenant, &state.owner_account, &name);
                (name, true)
            }
        };

        let display = Tenant::attachment_display_name(&route_table);
        match fabric.tag_name_if_absent(&id, &display) {
            Ok(true) => out.tagged += 1,
            Ok(false) => {}
            Err(err) => {
                out.failures += 1;
                warn!(row = line, attachment = %id, error = %err, "tagging failed, skipping attachment");
                continue;
            }
        }

        if fresh {
            mapping.insert(MappingRecord::new(state.owner_account.clone(), id.clone(), &route_table))?;
            out.allocated += 1;
            info!(attachment = %id, route_table = %route_table, account = %state.owner_account, "allocated route table");
        }
    }

    info!(
        considered = out.considered,
        allocated = out.allocated,
        tagged = out.tagged,
        failures = out.failures,
        "onboarding finished"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{Inventory, JsonFabric, OfflineFabric};

    fn att(s: &str) -> AttachmentId {
        AttachmentId::parse(s).unwrap()
    }

    fn mk_row(line: usize, peer: &str, subject: &str) -> SheetRow {
        SheetRow {
            line,
            peer: peer.to_string(),
            subject: subject.to_string(),
        }
    }

    fn tenant() -> Tenant {
        Tenant::new("acme").unwrap()
    }

    fn mk_fabric() -> JsonFabric {
        let inventory: Inventory = serde_json::from_str(
            r#"{
                "attachments": [
                    {"id": "tgw-attach-0a", "owner_account": "111122223333", "state": "pendingAcceptance"},
                    {"id": "tgw-attach-0b", "owner_account": "111122223333"},
                    {"id": "tgw-attach-0c", "owner_account": "444455556666", "name": "legacy-name"},
                    {"id": "tgw-attach-0d", "owner_account": "444455556666", "state": "deleting"}
                ]
            }"#,
        )
        .unwrap();
        JsonFabric::new(inventory)
    }

    #[test]
    fn candidates_skip_example_and_peer_rows() {
        let rows = vec![
            mk_row(2, "", "not-an-id"),
            mk_row(3, "tgw-attach-ff", "tgw-attach-ee"), // example
            mk_row(4, "tgw-attach-0a", "tgw-attach-0b"), // peer row
            mk_row(5, "DC", "tgw-attach-0a"),
        ];
        assert_eq!(candidates(&rows), vec![(5, att("tgw-attach-0a"))]);
    }

    #[test]
    fn onboarding_accepts_tags_and_allocates() {
        let rows = vec![
            mk_row(2, "DC", "tgw-attach-ee"),
            mk_row(3, "DC", "tgw-attach-0a"),
            mk_row(4, "DC", "tgw-attach-0b"),
            mk_row(5, "DC", "tgw-attach-0c"),
            mk_row(6, "DC", "tgw-attach-0d"),
            mk_row(7, "DC", "tgw-attach-99"),
        ];
        let t = tenant();
        let mut mapping = MappingTable::new();
        mapping
            .insert(MappingRecord::new("111122223333", att("tgw-attach-0b"), "acme-prd-tokyo-asp01-01-tgw-rtb"))
            .unwrap();
        let mut counters = NamingCounter::from_records(&t, mapping.records());
        let mut fabric = mk_fabric();

        let out = onboard(&rows, &mut mapping, &mut counters, &t, &mut fabric).unwrap();

        assert_eq!(out.considered, 5);
        assert_eq!(out.accepted, 1);
        assert_eq!(out.tagged, 2);
        assert_eq!(out.allocated, 1);
        assert_eq!(out.already_named, 1);
        assert_eq!(out.not_ready, 1);
        assert_eq!(out.failures, 1);

        // same account grows its series
        assert_eq!(
            mapping.route_table_of(&att("tgw-attach-0a")),
            Some("acme-prd-tokyo-asp01-02-tgw-rtb")
        );
        assert_eq!(
            fabric.describe(&att("tgw-attach-0b")).unwrap().name_tag.as_deref(),
            Some("acme-prd-tokyo-asp01-01-tgw-attach")
        );
        assert_eq!(mapping.appended_since(1).len(), 1);
    }

    #[test]
    fn offline_fabric_allocates_without_tagging() {
        let rows = vec![
            mk_row(2, "DC", "tgw-attach-ee"),
            mk_row(3, "DC", "tgw-attach-0a"),
            mk_row(4, "DC", "tgw-attach-0a"),
        ];
        let t = tenant();
        let mut mapping = MappingTable::new();
        let mut counters = NamingCounter::new();
        let mut fabric = OfflineFabric::new("111122223333");

        let out = onboard(&rows, &mut mapping, &mut counters, &t, &mut fabric).unwrap();

        assert_eq!(out.allocated, 1);
        assert_eq!(out.tagged, 0);
        assert_eq!(mapping.len(), 1);
        assert_eq!(
            mapping.route_table_of(&att("tgw-attach-0a")),
            Some("acme-prd-tokyo-asp01-01-tgw-rtb")
        );
    }

    #[test]
    fn upper_case_subject_reuses_its_route_table() {
        let rows = vec![mk_row(2, "DC", "tgw-attach-ee"), mk_row(3, "DC", "TGW-ATTACH-0A")];
        let t = tenant();
        let mut mapping = MappingTable::new();
        mapping
            .insert(MappingRecord::new("111122223333", att("tgw-attach-0a"), "acme-prd-tokyo-asp01-01-tgw-rtb"))
            .unwrap();
        let mut counters = NamingCounter::from_records(&t, mapping.records());
        let mut fabric = OfflineFabric::new("111122223333");

        let out = onboard(&rows, &mut mapping, &mut counters, &t, &mut fabric).unwrap();

        assert_eq!(out.considered, 1);
        assert_eq!(out.allocated, 0);
        assert_eq!(mapping.len(), 1);
    }
}
