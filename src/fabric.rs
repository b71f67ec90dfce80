//! Routing-fabric collaborators.
//!
//! The engine only needs two things from the fabric: a read-only inventory
//! snapshot, and per-attachment mutations (accept, name tag) during sheet
//! onboarding. Both sit behind traits; [`JsonFabric`] serves a snapshot file
//! and [`OfflineFabric`] stands in when no fabric is reachable.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::types::AttachmentId;
use crate::error::ReconcileError;

const ACTIVE_PROPAGATION_STATES: [&str; 2] = ["enabled", "propagated"];

fn available() -> String {
    "available".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableInfo {
    pub id: String,
    /// Value of the `Name` tag.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "available")]
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub id: String,
    pub owner_account: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "available")]
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationInfo {
    pub attachment_id: String,
    pub route_table_id: String,
    #[serde(default = "associated")]
    pub state: String,
}

fn associated() -> String {
    "associated".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationInfo {
    pub route_table_id: String,
    pub attachment_id: String,
    #[serde(default = "enabled")]
    pub state: String,
}

fn enabled() -> String {
    "enabled".to_string()
}

/// Raw listing returned by an inventory query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub fabric_id: Option<String>,
    #[serde(default)]
    pub route_tables: Vec<RouteTableInfo>,
    #[serde(default)]
    pub attachments: Vec<AttachmentInfo>,
    #[serde(default)]
    pub associations: Vec<AssociationInfo>,
    #[serde(default)]
    pub propagations: Vec<PropagationInfo>,
}

/// Active, named objects of an inventory keyed for lookups.
#[derive(Debug, Clone, Default)]
pub struct InventoryIndex {
    /// route-table id -> name
    pub route_table_names: BTreeMap<String, String>,
    pub attachments: BTreeMap<AttachmentId, AttachmentInfo>,
    /// attachment -> associated route-table id
    pub home: BTreeMap<AttachmentId, String>,
    /// route-table id -> attachments propagating into it
    pub propagations: BTreeMap<String, BTreeSet<AttachmentId>>,
}

impl Inventory {
    pub fn index(&self) -> InventoryIndex {
        let mut idx = InventoryIndex::default();

        for rtb in &self.route_tables {
            if rtb.state != "available" {
                continue;
            }
            match rtb.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                Some(name) => {
                    idx.route_table_names.insert(rtb.id.clone(), name.to_string());
                }
                None => warn!(route_table = %rtb.id, "skipping route table without a Name tag"),
            }
        }

        for att in &self.attachments {
            if att.state != "available" {
                debug!(attachment = %att.id, state = %att.state, "skipping inactive attachment");
                continue;
            }
            match AttachmentId::parse(&att.id) {
                Some(id) => {
                    idx.attachments.insert(id, att.clone());
                }
                None => warn!(attachment = %att.id, "skipping attachment with malformed id"),
            }
        }

        for assoc in &self.associations {
            let Some(id) = AttachmentId::parse(&assoc.attachment_id) else {
                continue;
            };
            if assoc.state == "associated"
                && idx.attachments.contains_key(&id)
                && idx.route_table_names.contains_key(&assoc.route_table_id)
            {
                idx.home.insert(id, assoc.route_table_id.clone());
            }
        }

        for prop in &self.propagations {
            let Some(id) = AttachmentId::parse(&prop.attachment_id) else {
                continue;
            };
            if ACTIVE_PROPAGATION_STATES.contains(&prop.state.as_str())
                && idx.attachments.contains_key(&id)
                && idx.route_table_names.contains_key(&prop.route_table_id)
            {
                idx.propagations
                    .entry(prop.route_table_id.clone())
                    .or_default()
                    .insert(id);
            }
        }

        idx
    }
}

/// Live state of one attachment as seen by the fabric owner account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentState {
    pub state: String,
    pub owner_account: String,
    pub name_tag: Option<String>,
}

impl AttachmentState {
    pub fn is_pending_acceptance(&self) -> bool {
        self.state == "pendingAcceptance"
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.state.as_str(), "available" | "modifying")
    }
}

pub trait FabricInventory {
    fn inventory(&self, fabric_id: &str) -> Result<Inventory, ReconcileError>;
}

/// Per-attachment operations. Every call is idempotent and may fail on its
/// own without affecting other attachments.
pub trait FabricMutator {
    fn describe(&mut self, attachment: &AttachmentId) -> Result<AttachmentState, ReconcileError>;

    /// Accept a pending attachment; returns the state after the call.
    fn accept(&mut self, attachment: &AttachmentId) -> Result<String, ReconcileError>;

    /// Set the `Name` tag unless one exists. Returns whether a tag was written.
    fn tag_name_if_absent(&mut self, attachment: &AttachmentId, name: &str) -> Result<bool, ReconcileError>;
}

/// Fabric backed by an inventory snapshot file. Mutations apply to the
/// in-memory snapshot only.
#[derive(Debug, Clone, Default)]
pub struct JsonFabric {
    inventory: Inventory,
}

impl JsonFabric {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }

    pub fn from_path(path: &Path) -> Result<Self, ReconcileError> {
        let raw = std::fs::read(path).map_err(|source| ReconcileError::Storage {
            key: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(serde_json::from_slice(&raw)?))
    }

    fn find_mut(&mut self, attachment: &AttachmentId) -> Result<&mut AttachmentInfo, ReconcileError> {
        self.inventory
            .attachments
            .iter_mut()
            .find(|a| a.id.eq_ignore_ascii_case(attachment.as_str()))
            .ok_or_else(|| ReconcileError::Fabric {
                target: attachment.to_string(),
                message: "attachment not found".to_string(),
            })
    }
}

impl FabricInventory for JsonFabric {
    fn inventory(&self, fabric_id: &str) -> Result<Inventory, ReconcileError> {
        match self.inventory.fabric_id.as_deref() {
            Some(id) if id != fabric_id => Err(ReconcileError::Fabric {
                target: fabric_id.to_string(),
                message: format!("snapshot belongs to fabric {id}"),
            }),
            _ => Ok(self.inventory.clone()),
        }
    }
}

impl FabricMutator for JsonFabric {
    fn describe(&mut self, attachment: &AttachmentId) -> Result<AttachmentState, ReconcileError> {
        let info = self.find_mut(attachment)?;
        Ok(AttachmentState {
            state: info.state.clone(),
            owner_account: info.owner_account.clone(),
            name_tag: info.name.clone(),
        })
    }

    fn accept(&mut self, attachment: &AttachmentId) -> Result<String, ReconcileError> {
        let info = self.find_mut(attachment)?;
        if info.state == "pendingAcceptance" {
            info.state = available();
            info!(attachment = %attachment, "accepted attachment");
        }
        Ok(info.state.clone())
    }

    fn tag_name_if_absent(&mut self, attachment: &AttachmentId, name: &str) -> Result<bool, ReconcileError> {
        let info = self.find_mut(attachment)?;
        if info.name.is_some() {
            debug!(attachment = %attachment, "Name tag already present");
            return Ok(false);
        }
        info.name = Some(name.to_string());
        info!(attachment = %attachment, name, "created Name tag");
        Ok(true)
    }
}

/// Used when no fabric is reachable: every attachment is available, untagged
/// and owned by `owner_account`.
#[derive(Debug, Clone)]
pub struct OfflineFabric {
    owner_account: String,
}

impl OfflineFabric {
    pub fn new(owner_account: impl Into<String>) -> Self {
        Self {
            owner_account: owner_account.into(),
        }
    }
}

impl FabricMutator for OfflineFabric {
    fn describe(&mut self, _attachment: &AttachmentId) -> Result<AttachmentState, ReconcileError> {
        Ok(AttachmentState {
            state: available(),
            owner_account: self.owner_account.clone(),
            name_tag: None,
        })
    }

    fn accept(&mut self, _attachment: &AttachmentId) -> Result<String, ReconcileError> {
        Ok(available())
    }

    fn tag_name_if_absent(&mut self, _attachment: &AttachmentId, _name: &str) -> Result<bool, ReconcileError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn att(s: &str) -> AttachmentId {
        AttachmentId::parse(s).unwrap()
    }

    fn mk_inventory() -> Inventory {
        serde_json::from_str(
            r#"{
                "fabric_id": "tgw-0123456789abcdef0",
                "route_tables": [
                    {"id": "tgw-rtb-01", "name": "acme-prd-tokyo-asp01-01-tgw-rtb"},
                    {"id": "tgw-rtb-02"},
                    {"id": "tgw-rtb-03", "name": "acme-prd-tokyo-asp03-01-tgw-rtb", "state": "deleting"}
                ],
                "attachments": [
                    {"id": "tgw-attach-0a", "owner_account": "111122223333"},
                    {"id": "tgw-attach-0b", "owner_account": "444455556666", "state": "pendingAcceptance"},
                    {"id": "not-an-attachment", "owner_account": "111122223333"}
                ],
                "associations": [
                    {"attachment_id": "tgw-attach-0a", "route_table_id": "tgw-rtb-01"},
                    {"attachment_id": "tgw-attach-0b", "route_table_id": "tgw-rtb-01"}
                ],
                "propagations": [
                    {"route_table_id": "tgw-rtb-01", "attachment_id": "tgw-attach-0a"},
                    {"route_table_id": "tgw-rtb-01", "attachment_id": "tgw-attach-0a", "state": "disabled"},
                    {"route_table_id": "tgw-rtb-02", "attachment_id": "tgw-attach-0a"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn index_keeps_only_active_named_objects() {
        let idx = mk_inventory().index();

        assert_eq!(idx.route_table_names.len(), 1);
        assert_eq!(idx.attachments.len(), 1);
        assert_eq!(idx.home.get(&att("tgw-attach-0a")).map(String::as_str), Some("tgw-rtb-01"));
        assert!(!idx.home.contains_key(&att("tgw-attach-0b")));
        assert_eq!(idx.propagations.len(), 1);
        assert!(idx.propagations["tgw-rtb-01"].contains(&att("tgw-attach-0a")));
    }

    #[test]
    fn json_fabric_rejects_foreign_fabric_id() {
        let fabric = JsonFabric::new(mk_inventory());
        assert!(fabric.inventory("tgw-0123456789abcdef0").is_ok());
        assert!(matches!(
            fabric.inventory("tgw-ffffffffffffffff0"),
            Err(ReconcileError::Fabric { .. })
        ));
    }

    #[test]
    fn json_fabric_mutations_are_idempotent() {
        let mut fabric = JsonFabric::new(mk_inventory());
        let b = att("tgw-attach-0b");

        assert!(fabric.describe(&b).unwrap().is_pending_acceptance());
        assert_eq!(fabric.accept(&b).unwrap(), "available");
        assert_eq!(fabric.accept(&b).unwrap(), "available");
        assert!(fabric.describe(&b).unwrap().is_usable());

        assert!(fabric.tag_name_if_absent(&b, "acme-prd-tokyo-asp02-01-tgw-attach").unwrap());
        assert!(!fabric.tag_name_if_absent(&b, "other").unwrap());
        assert_eq!(
            fabric.describe(&b).unwrap().name_tag.as_deref(),
            Some("acme-prd-tokyo-asp02-01-tgw-attach")
        );

        assert!(fabric.describe(&att("tgw-attach-ff")).is_err());
    }
}
