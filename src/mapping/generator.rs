// observed inventory -> mapping table + import mapping
//
// inputs:  the indexed inventory of one fabric
// outputs: a mapping table (attachment -> home route table name),
//          the attachments that could not be mapped,
//          an import mapping (logical id -> physical identifiers)
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codegen::Codegen;
use crate::codegen::document::{ASSOCIATION_TYPE, PROPAGATION_TYPE, ROUTE_TABLE_TYPE};
use crate::core::mapping::MappingTable;
use crate::core::normalize::SkipCounts;
use crate::core::types::{AttachmentId, MappingRecord, Task};
use crate::fabric::InventoryIndex;

#[derive(Debug, Clone, Default)]
pub struct InventoryMapping {
    pub table: MappingTable,
    /// available attachments with no association
    pub unmapped: Vec<AttachmentId>,
    pub skipped: SkipCounts,
}

/// One record per associated attachment: owner account, attachment id and
/// the name of the table it is associated with. The `Name` tag, when set,
/// becomes the record's display name.
pub fn mapping_from_inventory(index: &InventoryIndex) -> InventoryMapping {
    let mut out = InventoryMapping::default();

    for (attachment, info) in &index.attachments {
        let Some(rtb_id) = index.home.get(attachment) else {
            debug!(attachment = %attachment, "attachment has no association");
            out.unmapped.push(attachment.clone());
            continue;
        };
        let Some(rtb_name) = index.route_table_names.get(rtb_id) else {
            out.skipped.unresolved += 1;
            warn!(attachment = %attachment, route_table = %rtb_id, "associated route table has no name");
            continue;
        };

        let mut record = MappingRecord::new(info.owner_account.clone(), attachment.clone(), rtb_name);
        record.display_name = info
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        if let Err(err) = out.table.insert(record) {
            out.skipped.unresolved += 1;
            warn!(attachment = %attachment, error = %err, "conflicting mapping, skipping");
        }
    }

    info!(
        mapped = out.table.len(),
        unmapped = out.unmapped.len(),
        "built mapping table from inventory"
    );
    out
}

/// One resource the generated document can adopt instead of creating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEntry {
    #[serde(rename = "ResourceType")]
    pub resource_type: String,
    #[serde(rename = "LogicalResourceId")]
    pub logical_id: String,
    #[serde(rename = "ResourceIdentifier")]
    pub identifier: BTreeMap<String, String>,
}

impl ImportEntry {
    fn new(resource_type: &str, logical_id: String, identifier: &[(&str, &str)]) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            logical_id,
            identifier: identifier
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Pair the logical ids of the generated document with the objects already
/// deployed on the fabric.
///
/// Route tables come first, then associations, then propagations, each
/// sorted by logical id. Tasks without a deployed counterpart are left out.
pub fn import_mapping(
    index: &InventoryIndex,
    tasks: &[Task],
    mapping: &MappingTable,
    codegen: &Codegen,
) -> Vec<ImportEntry> {
    let ids = codegen.logical_ids();
    let rtb_by_name: BTreeMap<&str, &str> = index
        .route_table_names
        .iter()
        .map(|(id, name)| (name.as_str(), id.as_str()))
        .collect();

    let mut route_tables = BTreeMap::new();
    for (rtb_id, name) in &index.route_table_names {
        match ids.route_table(name) {
            Some(logical_id) => {
                route_tables.entry(logical_id.clone()).or_insert_with(|| {
                    ImportEntry::new(
                        ROUTE_TABLE_TYPE,
                        logical_id,
                        &[("TransitGatewayRouteTableId", rtb_id.as_str())],
                    )
                });
            }
            None => warn!(route_table = %name, "route table name yields no logical id, not importable"),
        }
    }

    let mut bindings: [BTreeMap<String, ImportEntry>; 2] = Default::default();
    let mut seen = BTreeSet::new();
    for task in tasks {
        let Some(&rtb_id) = rtb_by_name.get(task.route_table()) else {
            debug!(task_id = task.task_id(), route_table = task.route_table(), "route table not deployed");
            continue;
        };
        let subject = task.subject();
        let deployed = match task {
            Task::Associate { .. } => index.home.get(subject).is_some_and(|home| home == rtb_id),
            Task::Propagate { .. } => index
                .propagations
                .get(rtb_id)
                .is_some_and(|set| set.contains(subject)),
        };
        if !deployed {
            debug!(task_id = task.task_id(), attachment = %subject, "binding not deployed");
            continue;
        }

        let (logical_id, placeholder) = codegen.task_logical_id(task, mapping);
        if placeholder || !seen.insert(logical_id.clone()) {
            continue;
        }
        let (slot, resource_type) = match task {
            Task::Associate { .. } => (0, ASSOCIATION_TYPE),
            Task::Propagate { .. } => (1, PROPAGATION_TYPE),
        };
        let entry = ImportEntry::new(
            resource_type,
            logical_id.clone(),
            &[
                ("TransitGatewayAttachmentId", subject.as_str()),
                ("TransitGatewayRouteTableId", rtb_id),
            ],
        );
        bindings[slot].insert(logical_id, entry);
    }

    let [associations, propagations] = bindings;
    let entries: Vec<ImportEntry> = route_tables
        .into_values()
        .chain(associations.into_values())
        .chain(propagations.into_values())
        .collect();
    info!(resources = entries.len(), "built import mapping");
    entries
}
