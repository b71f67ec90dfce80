// route tables + tasks -> infrastructure document
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_yaml::Value;
use serde_yaml::value::{Tag, TaggedValue};
use tracing::{debug, warn};

use crate::codegen::logical_id::{LogicalIds, PLACEHOLDER_ROUTE_TABLE};
use crate::config::DocumentParams;
use crate::core::mapping::MappingTable;
use crate::core::types::{Action, Task, Tenant};
use crate::error::ReconcileError;

pub const ROUTE_TABLE_TYPE: &str = "AWS::EC2::TransitGatewayRouteTable";
pub const ASSOCIATION_TYPE: &str = "AWS::EC2::TransitGatewayRouteTableAssociation";
pub const PROPAGATION_TYPE: &str = "AWS::EC2::TransitGatewayRouteTablePropagation";

const FORMAT_VERSION: &str = "2010-09-09";
const FABRIC_PARAMETER: &str = "TransitGatewayId";
const DELETION_POLICY: &str = "Retain";
const RULE: &str = "# =========================================================================";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    RouteTables,
    Associations,
    Propagations,
}

impl Group {
    fn title(&self) -> &'static str {
        match self {
            Group::RouteTables => "TransitGatewayRouteTable",
            Group::Associations => "TransitGatewayRouteTableAssociation",
            Group::Propagations => "TransitGatewayRouteTablePropagation",
        }
    }
}

/// `!Ref <logical id>`
fn reference(logical_id: &str) -> TaggedValue {
    TaggedValue {
        tag: Tag::new("Ref"),
        value: Value::String(logical_id.to_string()),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceTag {
    key: &'static str,
    value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RouteTableProperties {
    transit_gateway_id: TaggedValue,
    tags: Vec<ResourceTag>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct BindingProperties {
    transit_gateway_attachment_id: String,
    transit_gateway_route_table_id: TaggedValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Properties {
    RouteTable(RouteTableProperties),
    Binding(BindingProperties),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Resource {
    #[serde(rename = "Type")]
    resource_type: &'static str,
    properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    depends_on: Option<String>,
    deletion_policy: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Parameter<'a> {
    #[serde(rename = "Type")]
    kind: &'static str,
    description: &'static str,
    default: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Header<'a> {
    #[serde(rename = "AWSTemplateFormatVersion")]
    format_version: &'static str,
    description: String,
    parameters: BTreeMap<&'static str, Parameter<'a>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeneratedDocument {
    #[serde(skip)]
    pub text: String,
    #[serde(skip)]
    pub logical_ids: BTreeSet<String>,
    pub route_tables: usize,
    pub associations: usize,
    pub propagations: usize,
    /// tasks whose route table fell back to the placeholder id
    pub placeholders: usize,
    /// resources dropped because an earlier one had the same logical id
    pub duplicates: usize,
}

/// Deterministic document generator for one tenant.
#[derive(Debug, Clone)]
pub struct Codegen {
    ids: LogicalIds,
    params: DocumentParams,
}

impl Codegen {
    pub fn new(tenant: &Tenant, params: DocumentParams) -> Result<Self, ReconcileError> {
        Ok(Self {
            ids: LogicalIds::new(tenant)?,
            params,
        })
    }

    pub fn logical_ids(&self) -> &LogicalIds {
        &self.ids
    }

    /// Logical id a task's resource gets in the document.
    pub fn task_logical_id(&self, task: &Task, mapping: &MappingTable) -> (String, bool) {
        let (rtb_id, placeholder) = match self.ids.route_table(task.route_table()) {
            Some(id) => (id, false),
            None => (PLACEHOLDER_ROUTE_TABLE.to_string(), true),
        };
        let display = mapping.get(task.subject()).map(|rec| rec.display_name());
        (self.ids.task(task, display.as_deref(), &rtb_id), placeholder)
    }

    fn route_table_resource(&self, name: &str) -> Resource {
        let tags = vec![
            ResourceTag {
                key: "Env",
                value: self.params.env_tag.clone(),
            },
            ResourceTag {
                key: "Name",
                value: name.to_string(),
            },
            ResourceTag {
                key: "System",
                value: self.params.system_tag.clone(),
            },
        ];
        Resource {
            resource_type: ROUTE_TABLE_TYPE,
            properties: Properties::RouteTable(RouteTableProperties {
                transit_gateway_id: reference(FABRIC_PARAMETER),
                tags,
            }),
            depends_on: None,
            deletion_policy: DELETION_POLICY,
        }
    }

    fn binding_resource(resource_type: &'static str, attachment: String, route_table_id: String) -> Resource {
        Resource {
            resource_type,
            properties: Properties::Binding(BindingProperties {
                transit_gateway_attachment_id: attachment,
                transit_gateway_route_table_id: reference(&route_table_id),
            }),
            depends_on: Some(route_table_id),
            deletion_policy: DELETION_POLICY,
        }
    }

    /// Emit the document. Every route table named by a task is declared even
    /// when absent from `route_tables`.
    ///
    /// invariants:
    /// 1. groups appear in a fixed order: route tables, associations, propagations
    /// 2. each group is sorted by logical id
    /// 3. a logical id is emitted once; the first resource claiming it wins
    pub fn generate(
        &self,
        route_tables: &[String],
        tasks: &[Task],
        mapping: &MappingTable,
    ) -> Result<GeneratedDocument, ReconcileError> {
        let mut out = GeneratedDocument::default();
        let mut groups: [BTreeMap<String, Resource>; 3] = Default::default();

        let names: BTreeSet<&str> = route_tables
            .iter()
            .map(String::as_str)
            .chain(tasks.iter().map(Task::route_table))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();

        let mut claim = |out: &mut GeneratedDocument, group: Group, id: String, resource: Resource| {
            if out.logical_ids.contains(&id) {
                out.duplicates += 1;
                warn!(logical_id = %id, group = group.title(), "duplicate logical id, keeping the first resource");
                return;
            }
            out.logical_ids.insert(id.clone());
            groups[group as usize].insert(id, resource);
        };

        for name in names {
            match self.ids.route_table(name) {
                Some(id) => claim(&mut out, Group::RouteTables, id, self.route_table_resource(name)),
                None => warn!(route_table = name, "route table name yields no logical id"),
            }
        }

        for task in tasks {
            let (id, placeholder) = self.task_logical_id(task, mapping);
            if placeholder {
                out.placeholders += 1;
                warn!(task_id = task.task_id(), logical_id = %id, "route table unresolved, using placeholder");
            }
            let route_table_id = self
                .ids
                .route_table(task.route_table())
                .unwrap_or_else(|| PLACEHOLDER_ROUTE_TABLE.to_string());
            let (group, resource_type) = match task.action() {
                Action::Associate => (Group::Associations, ASSOCIATION_TYPE),
                Action::Propagate => (Group::Propagations, PROPAGATION_TYPE),
            };
            debug!(logical_id = %id, "emitting task resource");
            let resource = Self::binding_resource(resource_type, task.subject().to_string(), route_table_id);
            claim(&mut out, group, id, resource);
        }

        out.route_tables = groups[Group::RouteTables as usize].len();
        out.associations = groups[Group::Associations as usize].len();
        out.propagations = groups[Group::Propagations as usize].len();
        out.text = self.render(&groups)?;
        Ok(out)
    }

    /// Header and each resource group go through `serde_yaml` separately so
    /// the group banners can sit between them under `Resources`.
    fn render(&self, groups: &[BTreeMap<String, Resource>; 3]) -> Result<String, ReconcileError> {
        let header = Header {
            format_version: FORMAT_VERSION,
            description: self.params.description(),
            parameters: BTreeMap::from([(
                FABRIC_PARAMETER,
                Parameter {
                    kind: "String",
                    description: "TGW ID to apply routing changes",
                    default: &self.params.fabric_id,
                },
            )]),
        };

        let mut doc = serde_yaml::to_string(&header)?;
        doc.push_str("Resources:\n");
        for (group, resources) in [Group::RouteTables, Group::Associations, Group::Propagations]
            .into_iter()
            .zip(groups.iter())
        {
            doc.push_str(&format!("\n{RULE}\n# --- {} Resources ---\n{RULE}\n", group.title()));
            if resources.is_empty() {
                continue;
            }
            for line in serde_yaml::to_string(resources)?.lines() {
                doc.push_str("  ");
                doc.push_str(line);
                doc.push('\n');
            }
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenantConfig;
    use crate::core::delta::document_logical_ids;
    use crate::core::types::{AttachmentId, MappingRecord, RtbPrefix};
    use pretty_assertions::assert_eq;

    fn att(s: &str) -> AttachmentId {
        AttachmentId::parse(s).unwrap()
    }

    fn mk_codegen() -> Codegen {
        let tenant = Tenant::new("acme").unwrap();
        let cfg = TenantConfig {
            fabric_id: "tgw-0123456789abcdef0".into(),
            owner_account: "111122223333".into(),
        };
        Codegen::new(&tenant, DocumentParams::new(&cfg, &tenant).with_tags("prd", "routing")).unwrap()
    }

    fn mk_mapping() -> MappingTable {
        let mut table = MappingTable::new();
        table
            .insert(MappingRecord::new("111122223333", att("tgw-attach-0a"), "acme-prd-tokyo-asp01-01-tgw-rtb"))
            .unwrap();
        table
            .insert(MappingRecord::new("111122223333", att("tgw-attach-0f"), "acme-onpre-rtb"))
            .unwrap();
        table
    }

    fn mk_tasks() -> Vec<Task> {
        vec![
            Task::propagate(RtbPrefix::OnPrem, "acme-prd-tokyo-asp01-01-tgw-rtb", None, att("tgw-attach-0f")),
            Task::associate(
                RtbPrefix::Series { series: 1, subseries: 1 },
                "acme-prd-tokyo-asp01-01-tgw-rtb",
                att("tgw-attach-0a"),
            ),
        ]
    }

    fn tag_ref(value: &Value) -> Option<&str> {
        match value {
            Value::Tagged(tagged) if tagged.tag == Tag::new("Ref") => tagged.value.as_str(),
            _ => None,
        }
    }

    #[test]
    fn generated_document_layout() {
        let doc = mk_codegen().generate(&[], &mk_tasks(), &mk_mapping()).unwrap();
        assert_eq!((doc.route_tables, doc.associations, doc.propagations), (1, 1, 1));

        // banners in fixed group order, each resource under its own banner
        let text = &doc.text;
        let at = |needle: &str| text.find(needle).unwrap();
        assert!(at("Resources:") < at("# --- TransitGatewayRouteTable Resources ---"));
        assert!(at("# --- TransitGatewayRouteTable Resources ---") < at("  Asp0101TgwRTB:"));
        assert!(at("  Asp0101TgwRTB:") < at("# --- TransitGatewayRouteTableAssociation Resources ---"));
        assert!(
            at("# --- TransitGatewayRouteTableAssociation Resources ---")
                < at("  TGWASP0101ASSOCIATEToAsp0101TgwRTB:")
        );
        assert!(
            at("  TGWASP0101ASSOCIATEToAsp0101TgwRTB:")
                < at("# --- TransitGatewayRouteTablePropagation Resources ---")
        );
        assert!(
            at("# --- TransitGatewayRouteTablePropagation Resources ---")
                < at("  TGWONPREPROPAGATEToAsp0101TgwRTB:")
        );
        assert!(text.contains("TransitGatewayRouteTableId: !Ref Asp0101TgwRTB"));

        let value: Value = serde_yaml::from_str(text).unwrap();
        assert_eq!(value["AWSTemplateFormatVersion"].as_str(), Some("2010-09-09"));
        assert_eq!(
            value["Description"].as_str(),
            Some("Generated TGW Routing Configuration for TGW tgw-0123456789abcdef0 in acme. (No Outputs/Exports)")
        );

        let rtb = &value["Resources"]["Asp0101TgwRTB"];
        assert_eq!(rtb["Type"].as_str(), Some(ROUTE_TABLE_TYPE));
        assert_eq!(rtb["DeletionPolicy"].as_str(), Some("Retain"));
        assert_eq!(tag_ref(&rtb["Properties"]["TransitGatewayId"]), Some("TransitGatewayId"));
        let tags: Vec<(&str, &str)> = rtb["Properties"]["Tags"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|t| (t["Key"].as_str().unwrap(), t["Value"].as_str().unwrap()))
            .collect();
        assert_eq!(
            tags,
            vec![
                ("Env", "prd"),
                ("Name", "acme-prd-tokyo-asp01-01-tgw-rtb"),
                ("System", "routing"),
            ]
        );
        assert!(rtb.get("DependsOn").is_none());

        let prop = &value["Resources"]["TGWONPREPROPAGATEToAsp0101TgwRTB"];
        assert_eq!(prop["Type"].as_str(), Some(PROPAGATION_TYPE));
        assert_eq!(prop["Properties"]["TransitGatewayAttachmentId"].as_str(), Some("tgw-attach-0f"));
        assert_eq!(tag_ref(&prop["Properties"]["TransitGatewayRouteTableId"]), Some("Asp0101TgwRTB"));
        assert_eq!(prop["DependsOn"].as_str(), Some("Asp0101TgwRTB"));
        assert_eq!(prop["DeletionPolicy"].as_str(), Some("Retain"));
    }

    #[test]
    fn empty_groups_keep_their_banner() {
        let doc = mk_codegen().generate(&[], &[], &MappingTable::new()).unwrap();
        assert_eq!(doc.text.matches("# --- ").count(), 3);
        assert!(document_logical_ids(&doc.text).unwrap().is_empty());
    }

    #[test]
    fn generation_is_deterministic_and_parseable() {
        let codegen = mk_codegen();
        let mapping = mk_mapping();
        let mut tasks = mk_tasks();
        let first = codegen.generate(&["acme-onpre-rtb".to_string()], &tasks, &mapping).unwrap();
        tasks.reverse();
        let second = codegen.generate(&["acme-onpre-rtb".to_string()], &tasks, &mapping).unwrap();

        assert_eq!(first.text, second.text);

        let parsed = document_logical_ids(&first.text).unwrap();
        assert_eq!(parsed, first.logical_ids);
        assert!(parsed.contains("OnpreRTB"));

        let value: Value = serde_yaml::from_str(&first.text).unwrap();
        assert_eq!(value["Parameters"]["TransitGatewayId"]["Default"].as_str(), Some("tgw-0123456789abcdef0"));
    }

    #[test]
    fn duplicate_logical_ids_keep_the_first_resource() {
        // two targets sharing a prefix collapse onto one logical id
        let tasks = vec![
            Task::propagate(RtbPrefix::OnPrem, "acme-prd-tokyo-asp01-01-tgw-rtb", None, att("tgw-attach-0f")),
            Task::propagate(RtbPrefix::OnPrem, "acme-prd-tokyo-asp01-01-tgw-rtb", None, att("tgw-attach-0e")),
        ];
        let doc = mk_codegen().generate(&[], &tasks, &mk_mapping()).unwrap();
        assert_eq!(doc.duplicates, 1);
        assert_eq!(doc.propagations, 1);
        assert!(doc.text.contains("TransitGatewayAttachmentId: tgw-attach-0f"));
        assert!(!doc.text.contains("tgw-attach-0e"));
    }

    #[test]
    fn unresolved_route_table_uses_placeholder() {
        let task = Task::Associate {
            task_id: "TGW_ASP01_01_ASSOCIATE".into(),
            route_table: "acme-".into(),
            attachment: att("tgw-attach-0a"),
        };
        let doc = mk_codegen().generate(&[], &[task], &mk_mapping()).unwrap();
        assert_eq!(doc.placeholders, 1);
        assert_eq!(doc.route_tables, 0);
        assert!(doc.text.contains(&format!("!Ref {PLACEHOLDER_ROUTE_TABLE}")));
    }
}
