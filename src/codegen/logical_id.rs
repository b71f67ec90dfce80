// route table / task -> logical resource id
use regex::Regex;

use crate::core::types::{Task, Tenant};
use crate::error::ReconcileError;

/// Logical id used for a route table whose name cannot be resolved.
pub const PLACEHOLDER_ROUTE_TABLE: &str = "UNRESOLVEDPlaceholderRTB";

/// One ordered rewrite step.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

impl Rule {
    pub fn new(pattern: &str, replacement: &'static str) -> Result<Self, ReconcileError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement,
        })
    }

    pub fn apply(&self, input: &str) -> String {
        self.pattern.replace_all(input, self.replacement).into_owned()
    }
}

fn apply_all(rules: &[Rule], input: String) -> String {
    rules.iter().fold(input, |acc, rule| rule.apply(&acc))
}

/// `acme-prd-tokyo-asp01-01` -> `Asp0101`
pub fn pascal_case(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect()
}

/// Pure name -> id transforms for one tenant.
#[derive(Debug, Clone)]
pub struct LogicalIds {
    tenant_prefix: String,
    route_table_rules: Vec<Rule>,
    attachment_rules: Vec<Rule>,
}

impl LogicalIds {
    pub fn new(tenant: &Tenant) -> Result<Self, ReconcileError> {
        let tenant_token = tenant
            .prefix()
            .to_ascii_uppercase()
            .replace(|c: char| !c.is_ascii_alphanumeric(), "_");
        let region_token = Tenant::REGION.to_ascii_uppercase().replace('-', "_");

        //order matters: each rule sees the output of the previous one
        let route_table_rules = vec![
            Rule::new("Rtb", "RTB")?,
            Rule::new("^Hubdev", "HubDev")?,
        ];
        let attachment_rules = vec![
            Rule::new("[^A-Z0-9]+", "_")?,
            Rule::new(&format!("^{}_?", regex::escape(&tenant_token)), "")?,
            Rule::new("(TGW)?_?ATTACH(MENT)?", "")?,
            Rule::new("_VPC", "")?,
            Rule::new(&format!("^_?{}_?", regex::escape(&region_token)), "")?,
            Rule::new("_+", "_")?,
            Rule::new("^_|_$", "")?,
            Rule::new("[^A-Z0-9]+", "")?,
        ];

        Ok(Self {
            tenant_prefix: tenant.prefix().to_string(),
            route_table_rules,
            attachment_rules,
        })
    }

    /// Tenant and region boilerplate stripped, PascalCase, then the case rules.
    /// `None` when nothing usable is left.
    pub fn route_table(&self, rtb_name: &str) -> Option<String> {
        let name = rtb_name.trim();
        let region = format!("{}-", Tenant::REGION);
        let short = match name.strip_prefix(&format!("{}-", self.tenant_prefix)) {
            Some(rest) => rest.strip_prefix(region.as_str()).unwrap_or(rest),
            None => name,
        };
        let pascal = pascal_case(short);
        if pascal.is_empty() {
            return None;
        }
        Some(apply_all(&self.route_table_rules, pascal))
    }

    /// Short attachment token (`ASP0101`, `ONPRE`) from a display name.
    pub fn attachment_prefix(&self, display_name: &str) -> Option<String> {
        let token = apply_all(&self.attachment_rules, display_name.trim().to_ascii_uppercase());
        (!token.is_empty()).then_some(token)
    }

    /// `TGW<AttachmentPrefix><ACTION>To<RouteTableLogicalId>`
    pub fn task(&self, task: &Task, display_name: Option<&str>, route_table_id: &str) -> String {
        let prefix = display_name
            .and_then(|name| self.attachment_prefix(name))
            .or_else(|| task.prefix_token().map(|token| token.replace('_', "")))
            .unwrap_or_else(|| {
                task.task_id()
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect()
            });
        format!("TGW{prefix}{}To{route_table_id}", task.action().token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AttachmentId, RtbPrefix};

    fn ids() -> LogicalIds {
        LogicalIds::new(&Tenant::new("acme").unwrap()).unwrap()
    }

    #[test]
    fn pascal_case_splits_on_non_alphanumerics() {
        assert_eq!(pascal_case("asp01-01-tgw-rtb"), "Asp0101TgwRtb");
        assert_eq!(pascal_case("ONPRE__rtb"), "OnpreRtb");
        assert_eq!(pascal_case("--"), "");
    }

    #[test]
    fn route_table_ids_strip_boilerplate_and_fix_case() {
        let ids = ids();
        assert_eq!(ids.route_table("acme-prd-tokyo-asp01-01-tgw-rtb").as_deref(), Some("Asp0101TgwRTB"));
        assert_eq!(ids.route_table("acme-onpre-rtb").as_deref(), Some("OnpreRTB"));
        // foreign names keep their tenant and get the prefix correction
        assert_eq!(
            ids.route_table("hubdev801-prd-tokyo-shared-rtb").as_deref(),
            Some("HubDev801PrdTokyoSharedRTB")
        );
        assert_eq!(ids.route_table("acme-"), None);
        assert_eq!(ids.route_table("   "), None);
    }

    #[test]
    fn attachment_prefixes_drop_fabric_vocabulary() {
        let ids = ids();
        assert_eq!(ids.attachment_prefix("acme-prd-tokyo-asp01-01-tgw-attach").as_deref(), Some("ASP0101"));
        assert_eq!(ids.attachment_prefix("acme-onpre-attach").as_deref(), Some("ONPRE"));
        assert_eq!(ids.attachment_prefix("acme shared VPC attachment").as_deref(), Some("SHARED"));
        assert_eq!(ids.attachment_prefix("tgw-attach"), None);
    }

    #[test]
    fn task_ids_fall_back_to_task_prefix() {
        let ids = ids();
        let task = Task::propagate(
            RtbPrefix::Series { series: 2, subseries: 1 },
            "acme-onpre-rtb",
            None,
            AttachmentId::parse("tgw-attach-0b").unwrap(),
        );
        assert_eq!(
            ids.task(&task, Some("acme-prd-tokyo-asp02-01-tgw-attach"), "OnpreRTB"),
            "TGWASP0201PROPAGATEToOnpreRTB"
        );
        assert_eq!(ids.task(&task, None, "OnpreRTB"), "TGWASP0201PROPAGATEToOnpreRTB");
        assert_eq!(ids.task(&task, Some("---"), "OnpreRTB"), "TGWASP0201PROPAGATEToOnpreRTB");
    }
}
