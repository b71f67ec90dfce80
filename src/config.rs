//! Tenant configuration and generator parameters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::core::types::{AccountId, Tenant};
use crate::error::ReconcileError;

pub const DEFAULT_ENV_TAG: &str = "prd";
pub const DEFAULT_SYSTEM_TAG: &str = "your-system-name";

/// The per-tenant record naming the fabric and the account that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantConfig {
    pub fabric_id: String,
    pub owner_account: AccountId,
}

fn looks_like_fabric_id(id: &str) -> bool {
    id.strip_prefix("tgw-").is_some_and(|hex| {
        hex.len() == 17 && hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    })
}

fn value_as_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One line of the config blob; extra keys are ignored.
#[derive(Debug, Deserialize)]
struct ConfigRecord {
    #[serde(rename = "tgw_id", default)]
    fabric_id: Option<Value>,
    #[serde(
        rename = "account id",
        alias = "account_id",
        alias = "account-id",
        alias = "accountId",
        alias = "AccountId",
        default
    )]
    account: Option<Value>,
}

impl TenantConfig {
    /// Parse the first non-empty line of the config blob stored at `key`.
    ///
    /// The fabric id lives under `tgw_id`; the account under `account id`
    /// or one of its spellings (`account_id`, `account-id`, `accountId`).
    pub fn parse(raw: &[u8], key: &str) -> Result<Self, ReconcileError> {
        let text = String::from_utf8_lossy(raw);
        let Some(line) = text.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Err(ReconcileError::MissingTenantConfig { key: key.to_string() });
        };

        let record: ConfigRecord = serde_json::from_str(line)
            .map_err(|e| ReconcileError::InvalidTenantConfig(format!("{key}: {e}")))?;

        let fabric_id = value_as_string(record.fabric_id)
            .ok_or_else(|| ReconcileError::InvalidTenantConfig(format!("{key}: 'tgw_id' is missing")))?;
        let owner_account = value_as_string(record.account)
            .ok_or_else(|| ReconcileError::InvalidTenantConfig(format!("{key}: account id is missing")))?;

        if !looks_like_fabric_id(&fabric_id) {
            warn!(fabric_id = %fabric_id, "fabric id does not look like a transit gateway id, proceeding");
        }
        info!(fabric_id = %fabric_id, owner_account = %owner_account, "loaded tenant configuration");

        Ok(Self {
            fabric_id,
            owner_account,
        })
    }
}

/// What one invocation works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub tenant: String,
    pub env_tag: String,
    pub system_tag: String,
}

impl RunConfig {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            env_tag: DEFAULT_ENV_TAG.to_string(),
            system_tag: DEFAULT_SYSTEM_TAG.to_string(),
        }
    }

    pub fn with_tags(mut self, env_tag: impl Into<String>, system_tag: impl Into<String>) -> Self {
        self.env_tag = env_tag.into();
        self.system_tag = system_tag.into();
        self
    }
}

/// Values the document generator needs besides routes and tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentParams {
    pub fabric_id: String,
    pub tenant: String,
    pub env_tag: String,
    pub system_tag: String,
}

impl DocumentParams {
    pub fn new(config: &TenantConfig, tenant: &Tenant) -> Self {
        Self {
            fabric_id: config.fabric_id.clone(),
            tenant: tenant.prefix().to_string(),
            env_tag: DEFAULT_ENV_TAG.to_string(),
            system_tag: DEFAULT_SYSTEM_TAG.to_string(),
        }
    }

    pub fn with_tags(mut self, env_tag: impl Into<String>, system_tag: impl Into<String>) -> Self {
        self.env_tag = env_tag.into();
        self.system_tag = system_tag.into();
        self
    }

    pub fn description(&self) -> String {
        format!(
            "Generated TGW Routing Configuration for TGW {} in {}. (No Outputs/Exports)",
            self.fabric_id, self.tenant
        )
    }
}
