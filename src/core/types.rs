// identifiers, naming scheme and task records
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

pub type AccountId = String;

/// A fabric-assigned attachment identifier (`tgw-attach-<hex>`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttachmentId(String);

impl AttachmentId {
    const PREFIX: &'static str = "tgw-attach-";

    /// Parse a raw cell/field. The whole (trimmed) value must match the
    /// identifier shape; partial matches are rejected. Ids are stored
    /// lower-cased so differently cased cells name the same attachment.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let head = raw.get(..Self::PREFIX.len())?;
        if !head.eq_ignore_ascii_case(Self::PREFIX) {
            return None;
        }
        let tail = &raw[Self::PREFIX.len()..];
        if tail.is_empty() || !tail.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AttachmentId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| format!("'{raw}' is not an attachment id"))
    }
}

impl From<AttachmentId> for String {
    fn from(id: AttachmentId) -> Self {
        id.0
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Series/subseries token of a route-table name, or the on-prem sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RtbPrefix {
    Series { series: u32, subseries: u32 },
    OnPrem,
}

impl fmt::Display for RtbPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtbPrefix::Series { series, subseries } => {
                write!(f, "ASP{series:02}_{subseries:02}")
            }
            RtbPrefix::OnPrem => f.write_str("ONPRE"),
        }
    }
}

/// Naming scheme of one tenant: `<tenant>-prd-tokyo-asp<NN>-<MM>-tgw-rtb`
/// plus the `<tenant>-onpre-rtb` sentinel.
#[derive(Debug, Clone)]
pub struct Tenant {
    prefix: String,
    rtb_pattern: Regex,
}

impl Tenant {
    pub const REGION: &'static str = "prd-tokyo";

    pub fn new(prefix: impl Into<String>) -> Result<Self, ReconcileError> {
        let prefix = prefix.into().trim().to_string();
        if prefix.is_empty() {
            return Err(ReconcileError::InvalidTenantConfig(
                "tenant prefix is empty".to_string(),
            ));
        }
        let rtb_pattern = Regex::new(&format!(
            r"(?i)^{}-.*-asp(\d{{2,}})-(\d{{2,}})-tgw-rtb$",
            regex::escape(&prefix)
        ))?;
        Ok(Self {
            prefix,
            rtb_pattern,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn onprem_route_table(&self) -> String {
        format!("{}-onpre-rtb", self.prefix)
    }

    pub fn route_table_name(&self, series: u32, subseries: u32) -> String {
        format!(
            "{}-{}-asp{series:02}-{subseries:02}-tgw-rtb",
            self.prefix,
            Self::REGION
        )
    }

    /// `(series, subseries)` of a route-table name belonging to this tenant.
    pub fn series_of(&self, rtb_name: &str) -> Option<(u32, u32)> {
        let caps = self.rtb_pattern.captures(rtb_name.trim())?;
        let series = caps.get(1)?.as_str().parse().ok()?;
        let subseries = caps.get(2)?.as_str().parse().ok()?;
        Some((series, subseries))
    }

    pub fn is_onprem_route_table(&self, rtb_name: &str) -> bool {
        rtb_name.trim() == self.onprem_route_table()
    }

    pub fn prefix_of(&self, rtb_name: &str) -> Option<RtbPrefix> {
        if let Some((series, subseries)) = self.series_of(rtb_name) {
            return Some(RtbPrefix::Series { series, subseries });
        }
        self.is_onprem_route_table(rtb_name)
            .then_some(RtbPrefix::OnPrem)
    }

    /// Prefix token used in task ids. Names outside the series scheme fall
    /// back to the segment between the region and `-rtb`, upper-cased.
    pub fn task_prefix(&self, rtb_name: &str) -> Option<String> {
        if let Some(prefix) = self.prefix_of(rtb_name) {
            return Some(prefix.to_string());
        }
        let rtb_name = rtb_name.trim();
        let segment = rtb_name
            .split_once("-tokyo-")
            .and_then(|(_, rest)| rest.strip_suffix("-rtb"))
            .unwrap_or(rtb_name);
        let mut token = segment.to_uppercase().replace('-', "_");
        if token.ends_with("_TGW") {
            token.truncate(token.len() - "_TGW".len());
        }
        let tenant = format!("{}_", self.prefix.to_uppercase().replace('-', "_"));
        if let Some(stripped) = token.strip_prefix(tenant.as_str()) {
            token = stripped.to_string();
        }
        let token: String = token
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let token = token
            .split('_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        (!token.is_empty()).then_some(token)
    }

    /// Name tag given to an attachment whose home table is `rtb_name`.
    pub fn attachment_display_name(rtb_name: &str) -> String {
        let rtb_name = rtb_name.trim();
        match rtb_name.strip_suffix("-rtb") {
            Some(stem) => format!("{stem}-attach"),
            None => rtb_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Associate,
    Propagate,
}

impl Action {
    pub fn token(&self) -> &'static str {
        match self {
            Action::Associate => "ASSOCIATE",
            Action::Propagate => "PROPAGATE",
        }
    }
}

pub fn task_id(prefix: impl fmt::Display, action: Action) -> String {
    format!("TGW_{prefix}_{}", action.token())
}

/// A routing task. `Associate` binds `attachment` to `route_table`;
/// `Propagate` advertises `target` into `route_table` (`attachment`, when
/// present, is the table's own home attachment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TaskRecord", into = "TaskRecord")]
pub enum Task {
    Associate {
        task_id: String,
        route_table: String,
        attachment: AttachmentId,
    },
    Propagate {
        task_id: String,
        route_table: String,
        attachment: Option<AttachmentId>,
        target: AttachmentId,
    },
}

impl Task {
    pub fn associate(prefix: impl fmt::Display, route_table: &str, attachment: AttachmentId) -> Self {
        Task::Associate {
            task_id: task_id(prefix, Action::Associate),
            route_table: route_table.trim().to_string(),
            attachment,
        }
    }

    /// `prefix` is the prefix of the advertised (`target`) side.
    pub fn propagate(
        prefix: impl fmt::Display,
        route_table: &str,
        attachment: Option<AttachmentId>,
        target: AttachmentId,
    ) -> Self {
        Task::Propagate {
            task_id: task_id(prefix, Action::Propagate),
            route_table: route_table.trim().to_string(),
            attachment,
            target,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Task::Associate { task_id, .. } | Task::Propagate { task_id, .. } => task_id,
        }
    }

    pub fn route_table(&self) -> &str {
        match self {
            Task::Associate { route_table, .. } | Task::Propagate { route_table, .. } => {
                route_table
            }
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Task::Associate { .. } => Action::Associate,
            Task::Propagate { .. } => Action::Propagate,
        }
    }

    pub fn target(&self) -> Option<&AttachmentId> {
        match self {
            Task::Associate { .. } => None,
            Task::Propagate { target, .. } => Some(target),
        }
    }

    /// The attachment the generated resource points at.
    pub fn subject(&self) -> &AttachmentId {
        match self {
            Task::Associate { attachment, .. } => attachment,
            Task::Propagate { target, .. } => target,
        }
    }

    /// The `<PREFIX>` part of `TGW_<PREFIX>_<ACTION>`.
    pub fn prefix_token(&self) -> Option<&str> {
        let suffix = format!("_{}", self.action().token());
        self.task_id()
            .strip_prefix("TGW_")?
            .strip_suffix(suffix.as_str())
            .filter(|token| !token.is_empty())
    }

    pub fn key(&self) -> TaskKey {
        TaskKey {
            task_id: self.task_id().to_string(),
            route_table: self.route_table().to_string(),
            target: self.target().cloned(),
        }
    }
}

/// Dedup key of the persisted task set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    pub task_id: String,
    pub route_table: String,
    pub target: Option<AttachmentId>,
}

/// Wire shape of one task-set line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub rtb_name: String,
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub target_attachment_id: Option<String>,
    pub action: Action,
}

fn parse_field(raw: Option<String>, field: &str, task_id: &str) -> Result<Option<AttachmentId>, ReconcileError> {
    match raw {
        None => Ok(None),
        Some(raw) => AttachmentId::parse(&raw).map(Some).ok_or_else(|| {
            ReconcileError::InvalidTask(format!("{task_id}: {field} '{raw}' is not an attachment id"))
        }),
    }
}

impl TryFrom<TaskRecord> for Task {
    type Error = ReconcileError;

    fn try_from(rec: TaskRecord) -> Result<Self, Self::Error> {
        if rec.rtb_name.trim().is_empty() {
            return Err(ReconcileError::InvalidTask(format!(
                "{}: rtb_name is empty",
                rec.task_id
            )));
        }
        let attachment = parse_field(rec.attachment_id, "attachment_id", &rec.task_id)?;
        let target = parse_field(rec.target_attachment_id, "target_attachment_id", &rec.task_id)?;

        match rec.action {
            Action::Associate => {
                let attachment = attachment.ok_or_else(|| {
                    ReconcileError::InvalidTask(format!("{}: associate without attachment_id", rec.task_id))
                })?;
                Ok(Task::Associate {
                    task_id: rec.task_id,
                    route_table: rec.rtb_name,
                    attachment,
                })
            }
            Action::Propagate => {
                let target = target.ok_or_else(|| {
                    ReconcileError::InvalidTask(format!(
                        "{}: propagate without target_attachment_id",
                        rec.task_id
                    ))
                })?;
                Ok(Task::Propagate {
                    task_id: rec.task_id,
                    route_table: rec.rtb_name,
                    attachment,
                    target,
                })
            }
        }
    }
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        match task {
            Task::Associate {
                task_id,
                route_table,
                attachment,
            } => TaskRecord {
                task_id,
                rtb_name: route_table,
                attachment_id: Some(attachment.to_string()),
                target_attachment_id: None,
                action: Action::Associate,
            },
            Task::Propagate {
                task_id,
                route_table,
                attachment,
                target,
            } => TaskRecord {
                task_id,
                rtb_name: route_table,
                attachment_id: attachment.map(|a| a.to_string()),
                target_attachment_id: Some(target.to_string()),
                action: Action::Propagate,
            },
        }
    }
}

/// One line of the append-only mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    #[serde(rename = "account-id")]
    pub account_id: AccountId,
    #[serde(rename = "tgw-attach-id")]
    pub attachment_id: AttachmentId,
    #[serde(rename = "rtb-name")]
    pub route_table: String,
    #[serde(rename = "asp-name", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl MappingRecord {
    pub fn new(account_id: impl Into<String>, attachment_id: AttachmentId, route_table: &str) -> Self {
        Self {
            account_id: account_id.into(),
            attachment_id,
            route_table: route_table.trim().to_string(),
            display_name: None,
        }
    }

    pub fn display_name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| Tenant::attachment_display_name(&self.route_table))
    }
}
