//! Run orchestration.
//!
//! Both entry points read every input first, derive in memory, and stage
//! their outputs; nothing is written until the whole run has succeeded.

use serde::Serialize;
use tracing::{info, warn};

use crate::codegen::{Codegen, GeneratedDocument};
use crate::config::{DocumentParams, RunConfig, TenantConfig};
use crate::core::delta::{DocumentDiff, diagram_diff, diff_documents};
use crate::core::mapping::MappingTable;
use crate::core::merge::{MergeStats, merge};
use crate::core::naming::{NamingCounter, allocate};
use crate::core::normalize::{SkipCounts, normalize_inventory, normalize_sheet};
use crate::core::propagate::derive;
use crate::core::types::{MappingRecord, Task, Tenant};
use crate::diagram::{self, Diagram};
use crate::error::ReconcileError;
use crate::fabric::{FabricInventory, FabricMutator, OfflineFabric};
use crate::mapping::{import_mapping, mapping_from_inventory};
use crate::onboard::{Onboarding, onboard};
use crate::sheet::read_sheet;
use crate::store::{BlobStore, StorageLayout, parse_jsonl, to_jsonl};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Success,
    Failure,
}

/// Outcome of one run, for humans and for calling agents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub tenant: String,
    pub message: String,
    /// whether rerunning unchanged could succeed; only set on failure
    pub retryable: bool,
    pub rows: usize,
    pub facts: usize,
    /// facts whose both directions are already live on the fabric
    pub facts_verified: usize,
    pub tasks_derived: usize,
    pub tasks_total: usize,
    pub mapping_appended: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarding: Option<Onboarding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_resources: Option<usize>,
    pub merge: MergeStats,
    pub skipped: SkipCounts,
    pub document: GeneratedDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_diff: Option<DocumentDiff>,
    pub diagram: Diagram,
    pub diagram_changed: bool,
    pub written: Vec<String>,
}

impl RunReport {
    fn new(tenant: &Tenant) -> Self {
        Self {
            tenant: tenant.prefix().to_string(),
            ..Default::default()
        }
    }

    pub fn failure(tenant: &str, err: &ReconcileError) -> Self {
        Self {
            status: RunStatus::Failure,
            tenant: tenant.to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn to_json(&self) -> Result<String, ReconcileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_toon(&self) -> Result<String, ReconcileError> {
        toon_format::encode_default(self).map_err(|e| ReconcileError::Report(e.to_string()))
    }

    fn summarize(&mut self) {
        self.message = format!(
            "{} tasks ({} added, {} updated), {} resources, {} records skipped",
            self.tasks_total,
            self.merge.added,
            self.merge.updated,
            self.document.logical_ids.len(),
            self.skipped.total()
        );
    }
}

/// Tenant-level inputs every run needs.
struct Context {
    tenant: Tenant,
    layout: StorageLayout,
    config: TenantConfig,
    codegen: Codegen,
}

fn load_context(store: &dyn BlobStore, run: &RunConfig) -> Result<Context, ReconcileError> {
    let tenant = Tenant::new(run.tenant.clone())?;
    let layout = StorageLayout::new(tenant.prefix());

    let key = layout.tenant_config();
    let raw = store
        .read(&key)?
        .ok_or_else(|| ReconcileError::MissingTenantConfig { key: key.clone() })?;
    let config = TenantConfig::parse(&raw, &key)?;

    let params = DocumentParams::new(&config, &tenant).with_tags(run.env_tag.clone(), run.system_tag.clone());
    let codegen = Codegen::new(&tenant, params)?;
    Ok(Context {
        tenant,
        layout,
        config,
        codegen,
    })
}

/// Mapping table as persisted, plus its raw lines so that new records are
/// appended without rewriting anything already stored.
struct PersistedMapping {
    table: MappingTable,
    lines: Vec<String>,
    persisted: usize,
}

impl PersistedMapping {
    fn load(store: &dyn BlobStore, layout: &StorageLayout, skipped: &mut SkipCounts) -> Result<Self, ReconcileError> {
        let key = layout.mapping_table();
        let raw = store.read(&key)?.unwrap_or_default();
        let (records, malformed) = parse_jsonl::<MappingRecord>(&raw, &key);
        skipped.malformed_lines += malformed;

        let mut table = MappingTable::new();
        for record in records {
            if let Err(err) = table.insert(record) {
                skipped.malformed_lines += 1;
                warn!(key = %key, error = %err, "conflicting persisted mapping, keeping the first record");
            }
        }
        let lines = String::from_utf8_lossy(&raw)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        let persisted = table.len();
        info!(records = persisted, "loaded mapping table");
        Ok(Self {
            table,
            lines,
            persisted,
        })
    }

    fn appended(&self) -> &[MappingRecord] {
        self.table.appended_since(self.persisted)
    }

    fn to_blob(&self) -> Result<Vec<u8>, ReconcileError> {
        let mut out = Vec::new();
        for line in &self.lines {
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        out.extend(to_jsonl(self.appended())?);
        Ok(out)
    }
}

fn load_tasks(store: &dyn BlobStore, layout: &StorageLayout, skipped: &mut SkipCounts) -> Result<Vec<Task>, ReconcileError> {
    let key = layout.task_set();
    let Some(raw) = store.read(&key)? else {
        return Ok(Vec::new());
    };
    let (tasks, malformed) = parse_jsonl::<Task>(&raw, &key);
    skipped.malformed_lines += malformed;
    info!(tasks = tasks.len(), "loaded persisted task set");
    Ok(tasks)
}

/// Outputs of a run, written in order once everything is derived.
#[derive(Default)]
struct Staged {
    writes: Vec<(String, Vec<u8>)>,
}

impl Staged {
    fn put(&mut self, key: String, bytes: impl Into<Vec<u8>>) {
        self.writes.push((key, bytes.into()));
    }

    fn commit(self, store: &mut dyn BlobStore) -> Result<Vec<String>, ReconcileError> {
        let mut written = Vec::with_capacity(self.writes.len());
        for (key, bytes) in self.writes {
            store.write(&key, &bytes)?;
            info!(key = %key, bytes = bytes.len(), "wrote artifact");
            written.push(key);
        }
        Ok(written)
    }
}

/// Document, diagram and their diffs against what is currently stored.
fn stage_artifacts(
    ctx: &Context,
    store: &dyn BlobStore,
    staged: &mut Staged,
    tasks: &[Task],
    mapping: &MappingTable,
    report: &mut RunReport,
) -> Result<(), ReconcileError> {
    let route_tables: Vec<String> = mapping.iter().map(|rec| rec.route_table.clone()).collect();
    let document = ctx.codegen.generate(&route_tables, tasks, mapping)?;

    let document_key = ctx.layout.document();
    if let Some(previous) = store.read(&document_key)? {
        match diff_documents(&String::from_utf8_lossy(&previous), &document.logical_ids) {
            Ok(diff) => {
                if let Some(text) = diff.render() {
                    staged.put(ctx.layout.document_diff(), text);
                }
                report.document_diff = Some(diff);
            }
            Err(err) => warn!(key = %document_key, error = %err, "previous document unreadable, skipping document diff"),
        }
    }
    staged.put(document_key, document.text.clone());

    let diagram = diagram::render(tasks, mapping, ctx.codegen.logical_ids(), &ctx.config.fabric_id);
    let diagram_key = ctx.layout.diagram();
    if let Some(previous) = store.read(&diagram_key)? {
        if let Some(diff) = diagram_diff(&String::from_utf8_lossy(&previous), &diagram.text) {
            staged.put(ctx.layout.diagram_diff(), diff);
            report.diagram_changed = true;
        }
    }
    staged.put(diagram_key, diagram.text.clone());

    report.document = document;
    report.diagram = diagram;
    Ok(())
}

/// Sheet path: onboard the requested attachments, turn the rows into tasks
/// and regenerate every artifact. Without a `fabric`, onboarding runs
/// against an [`OfflineFabric`] owned by the tenant's account.
pub fn sync_sheet(
    store: &mut dyn BlobStore,
    fabric: Option<&mut dyn FabricMutator>,
    run: &RunConfig,
    sheet: &str,
) -> Result<RunReport, ReconcileError> {
    let ctx = load_context(store, run)?;
    let mut report = RunReport::new(&ctx.tenant);
    let mut mapping = PersistedMapping::load(store, &ctx.layout, &mut report.skipped)?;

    let sheet_key = ctx.layout.sheet(sheet);
    let raw = store
        .read(&sheet_key)?
        .ok_or_else(|| ReconcileError::MissingInput { key: sheet_key.clone() })?;
    let rows = read_sheet(&raw)?;
    report.rows = rows.len();
    info!(key = %sheet_key, rows = rows.len(), "read sheet");

    let mut offline = OfflineFabric::new(ctx.config.owner_account.clone());
    let fabric: &mut dyn FabricMutator = match fabric {
        Some(fabric) => fabric,
        None => &mut offline,
    };
    let mut counters = NamingCounter::from_records(&ctx.tenant, mapping.table.records());
    let onboarding = onboard(&rows, &mut mapping.table, &mut counters, &ctx.tenant, fabric)?;
    report.skipped.fabric_failures += onboarding.failures;
    report.onboarding = Some(onboarding);

    let normalized = normalize_sheet(&rows, &mapping.table, &ctx.tenant);
    report.facts = normalized.facts.len();
    report.facts_verified = normalized.facts.iter().filter(|f| f.is_verified_bidirectional()).count();
    report.skipped.absorb(normalized.skipped);

    let derivation = derive(
        &normalized.facts,
        &mapping.table,
        normalized.onprem_attachment.as_ref(),
        &ctx.tenant,
    );
    report.tasks_derived = derivation.len();
    report.skipped.absorb(derivation.skipped);

    let existing = load_tasks(store, &ctx.layout, &mut report.skipped)?;
    let merged = merge(existing, derivation.tasks);
    report.merge = merged.stats;
    report.tasks_total = merged.tasks.len();

    let mut staged = Staged::default();
    report.mapping_appended = mapping.appended().len();
    if report.mapping_appended > 0 {
        staged.put(ctx.layout.mapping_table(), mapping.to_blob()?);
    }
    staged.put(ctx.layout.task_set(), to_jsonl(&merged.tasks)?);
    stage_artifacts(&ctx, store, &mut staged, &merged.tasks, &mapping.table, &mut report)?;

    report.written = staged.commit(store)?;
    report.summarize();
    info!(tenant = %report.tenant, "{}", report.message);
    Ok(report)
}

/// Inventory path: adopt what is deployed on the fabric. The persisted
/// mapping table stays authoritative; fabric records only extend it.
pub fn sync_inventory(
    store: &mut dyn BlobStore,
    fabric: &dyn FabricInventory,
    run: &RunConfig,
) -> Result<RunReport, ReconcileError> {
    let ctx = load_context(store, run)?;
    let mut report = RunReport::new(&ctx.tenant);

    let inventory = fabric.inventory(&ctx.config.fabric_id)?;
    let index = inventory.index();
    let observed = mapping_from_inventory(&index);
    report.skipped.absorb(observed.skipped);

    let mut mapping = PersistedMapping::load(store, &ctx.layout, &mut report.skipped)?;
    for record in observed.table.records() {
        if let Err(err) = mapping.table.insert(record.clone()) {
            report.skipped.unresolved += 1;
            warn!(error = %err, "fabric disagrees with the persisted mapping, keeping the persisted record");
        }
    }

    let normalized = normalize_inventory(&index, &mapping.table, &ctx.tenant);
    report.facts = normalized.facts.len();
    report.facts_verified = normalized.facts.iter().filter(|f| f.is_verified_bidirectional()).count();
    report.skipped.absorb(normalized.skipped);

    let derivation = derive(
        &normalized.facts,
        &mapping.table,
        normalized.onprem_attachment.as_ref(),
        &ctx.tenant,
    );
    report.tasks_derived = derivation.len();
    report.skipped.absorb(derivation.skipped);

    let existing = load_tasks(store, &ctx.layout, &mut report.skipped)?;
    let merged = merge(existing, derivation.tasks);
    report.merge = merged.stats;
    report.tasks_total = merged.tasks.len();

    let imports = import_mapping(&index, &merged.tasks, &mapping.table, &ctx.codegen);
    report.imported_resources = Some(imports.len());

    let mut staged = Staged::default();
    report.mapping_appended = mapping.appended().len();
    if report.mapping_appended > 0 {
        staged.put(ctx.layout.mapping_table(), mapping.to_blob()?);
    }
    staged.put(ctx.layout.task_set(), to_jsonl(&merged.tasks)?);
    staged.put(ctx.layout.import_mapping(), serde_json::to_vec_pretty(&imports)?);
    stage_artifacts(&ctx, store, &mut staged, &merged.tasks, &mapping.table, &mut report)?;

    report.written = staged.commit(store)?;
    report.summarize();
    info!(tenant = %report.tenant, "{}", report.message);
    Ok(report)
}

/// Name the next route table for `account` would get. Nothing is written.
pub fn preview_allocation(store: &dyn BlobStore, run: &RunConfig, account: &str) -> Result<String, ReconcileError> {
    let ctx = load_context(store, run)?;
    let mut skipped = SkipCounts::default();
    let mapping = PersistedMapping::load(store, &ctx.layout, &mut skipped)?;
    let counters = NamingCounter::from_records(&ctx.tenant, mapping.table.records());
    Ok(allocate(&ctx.tenant, account, &counters))
}

/// Diagram of the persisted task set, without touching stored artifacts.
pub fn render_stored_diagram(store: &dyn BlobStore, run: &RunConfig) -> Result<Diagram, ReconcileError> {
    let ctx = load_context(store, run)?;
    let mut skipped = SkipCounts::default();
    let mapping = PersistedMapping::load(store, &ctx.layout, &mut skipped)?;
    let tasks = load_tasks(store, &ctx.layout, &mut skipped)?;
    Ok(diagram::render(
        &tasks,
        &mapping.table,
        ctx.codegen.logical_ids(),
        &ctx.config.fabric_id,
    ))
}
