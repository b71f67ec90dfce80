// attachment -> route table mapping (append-only)
use std::collections::HashMap;

use crate::core::types::{AttachmentId, MappingRecord, Tenant};
use crate::error::ReconcileError;

#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    records: Vec<MappingRecord>,
    by_attachment: HashMap<AttachmentId, usize>,
}

impl MappingTable {
    //invariants:
    //1. an attachment appears in at most one record
    //2. a record is never rewritten: re-inserting the same route table is a no-op,
    //   a different route table is rejected
    //3. records keep insertion order so the persisted table stays append-only

    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Ok(true)` when a record was appended, `Ok(false)` when an
    /// identical mapping already existed.
    pub fn insert(&mut self, record: MappingRecord) -> Result<bool, ReconcileError> {
        match self.by_attachment.get(&record.attachment_id).copied() {
            None => {
                self.by_attachment
                    .insert(record.attachment_id.clone(), self.records.len());
                self.records.push(record);
                Ok(true)
            }
            Some(idx) if self.records[idx].route_table == record.route_table => Ok(false),
            Some(idx) => Err(ReconcileError::MappingAlreadyExists {
                attachment: record.attachment_id.to_string(),
                existing: self.records[idx].route_table.clone(),
                requested: record.route_table,
            }),
        }
    }

    pub fn get(&self, attachment: &AttachmentId) -> Option<&MappingRecord> {
        self.by_attachment
            .get(attachment)
            .map(|&idx| &self.records[idx])
    }

    pub fn route_table_of(&self, attachment: &AttachmentId) -> Option<&str> {
        self.get(attachment)
            .map(|rec| rec.route_table.as_str())
            .filter(|name| !name.is_empty())
    }

    pub fn is_mapped(&self, attachment: &AttachmentId) -> bool {
        self.route_table_of(attachment).is_some()
    }

    /// The attachment whose home table is the tenant's on-prem sentinel.
    pub fn onprem_attachment(&self, tenant: &Tenant) -> Option<&AttachmentId> {
        self.records
            .iter()
            .find(|rec| tenant.is_onprem_route_table(&rec.route_table))
            .map(|rec| &rec.attachment_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    //for serialization and reports
    pub fn records(&self) -> &[MappingRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingRecord> {
        self.records.iter()
    }

    /// Records appended after the first `persisted` ones.
    pub fn appended_since(&self, persisted: usize) -> &[MappingRecord] {
        self.records.get(persisted..).unwrap_or(&[])
    }
}
