//! Mermaid reachability diagram of a task set.
//!
//! One node per attachment and one edge per pair of attachments whose home
//! tables receive each other's routes. One-way propagations are counted but
//! not drawn.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::codegen::LogicalIds;
use crate::core::classify::classify_with_homes;
use crate::core::mapping::MappingTable;
use crate::core::types::{AttachmentId, Task};

pub const ONPREM_NODE: &str = "ONPRE";
pub const EDGE_LABEL: &str = "Reachability";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagram {
    #[serde(skip)]
    pub text: String,
    pub nodes: usize,
    pub edges: usize,
    pub one_way: usize,
}

fn clean(text: &str) -> String {
    text.replace(['\u{a0}', '\t'], " ")
}

/// Node id for an attachment that has no usable display token.
fn fallback_token(attachment: &AttachmentId) -> String {
    attachment
        .as_str()
        .to_ascii_uppercase()
        .replace(|c: char| !c.is_ascii_alphanumeric(), "_")
}

pub fn render(tasks: &[Task], mapping: &MappingTable, ids: &LogicalIds, fabric_id: &str) -> Diagram {
    let named: BTreeSet<&AttachmentId> = tasks
        .iter()
        .flat_map(|t| match t {
            Task::Associate { attachment, .. } => vec![attachment],
            Task::Propagate { attachment, target, .. } => attachment.iter().chain([target]).collect(),
        })
        .collect();
    let homes = named
        .iter()
        .filter_map(|&a| mapping.route_table_of(a).map(|rtb| (a, rtb)));
    let classification = classify_with_homes(tasks, homes);

    // attachment -> (token, definition line); a token already taken falls back to the id
    let mut tokens: BTreeMap<&AttachmentId, String> = BTreeMap::new();
    let mut nodes: BTreeMap<String, String> = BTreeMap::new();
    for attachment in classification.attachments().into_iter().chain(named.iter().copied()) {
        if tokens.contains_key(attachment) {
            continue;
        }
        let display = mapping.get(attachment).map(|rec| rec.display_name());
        let token = display
            .as_deref()
            .and_then(|name| ids.attachment_prefix(name))
            .filter(|token| !nodes.contains_key(token))
            .unwrap_or_else(|| fallback_token(attachment));
        let label = display.unwrap_or_else(|| attachment.to_string());
        debug!(attachment = %attachment, node = %token, "diagram node");
        nodes.insert(token.clone(), format!("{token}({token} <br> {})", clean(&label)));
        tokens.insert(attachment, token);
    }
    if !nodes.contains_key(ONPREM_NODE) {
        nodes.insert(ONPREM_NODE.to_string(), format!("{ONPREM_NODE}({ONPREM_NODE})"));
    }

    let edges: BTreeSet<String> = classification
        .bidirectional()
        .filter_map(|pair| {
            let a = tokens.get(&pair.from)?;
            let b = tokens.get(&pair.to)?;
            let (a, b) = if a <= b { (a, b) } else { (b, a) };
            Some(format!("{a} <-- {EDGE_LABEL} --> {b}"))
        })
        .collect();

    let mut lines = vec![
        "```mermaid".to_string(),
        "flowchart TB".to_string(),
        format!("    subgraph Transit Gateway {fabric_id}"),
        String::new(),
        "        %% attachments".to_string(),
    ];
    lines.extend(nodes.values().map(|def| format!("        {def}")));
    lines.push(String::new());
    lines.push("        %% reachability: each home table receives the other's routes".to_string());
    lines.extend(edges.iter().map(|edge| format!("        {edge}")));
    lines.push("    end".to_string());
    lines.push("```".to_string());

    let diagram = Diagram {
        text: lines.join("\n") + "\n",
        nodes: nodes.len(),
        edges: edges.len(),
        one_way: classification.count_one_way(),
    };
    info!(
        nodes = diagram.nodes,
        edges = diagram.edges,
        one_way = diagram.one_way,
        "rendered reachability diagram"
    );
    diagram
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::delta::{DiagramElements, diagram_diff};
    use crate::core::types::{MappingRecord, RtbPrefix, Tenant};
    use pretty_assertions::assert_eq;

    fn att(s: &str) -> AttachmentId {
        AttachmentId::parse(s).unwrap()
    }

    fn series(n: u32) -> RtbPrefix {
        RtbPrefix::Series { series: n, subseries: 1 }
    }

    fn mk_mapping() -> MappingTable {
        let mut table = MappingTable::new();
        for (attach, rtb) in [
            ("tgw-attach-0a", "acme-prd-tokyo-asp01-01-tgw-rtb"),
            ("tgw-attach-0b", "acme-prd-tokyo-asp02-01-tgw-rtb"),
            ("tgw-attach-0c", "acme-prd-tokyo-asp03-01-tgw-rtb"),
        ] {
            table
                .insert(MappingRecord::new("111122223333", att(attach), rtb))
                .unwrap();
        }
        table
    }

    fn ids() -> LogicalIds {
        LogicalIds::new(&Tenant::new("acme").unwrap()).unwrap()
    }

    #[test]
    fn renders_nodes_and_mutual_edges() {
        let tasks = vec![
            Task::propagate(series(2), "acme-prd-tokyo-asp01-01-tgw-rtb", None, att("tgw-attach-0b")),
            Task::propagate(series(1), "acme-prd-tokyo-asp02-01-tgw-rtb", None, att("tgw-attach-0a")),
            // one way
            Task::propagate(series(3), "acme-prd-tokyo-asp01-01-tgw-rtb", None, att("tgw-attach-0c")),
        ];

        let d = render(&tasks, &mk_mapping(), &ids(), "tgw-0123456789abcdef0");

        let expected = "\
```mermaid
flowchart TB
    subgraph Transit Gateway tgw-0123456789abcdef0

        %% attachments
        ASP0101(ASP0101 <br> acme-prd-tokyo-asp01-01-tgw-attach)
        ASP0201(ASP0201 <br> acme-prd-tokyo-asp02-01-tgw-attach)
        ASP0301(ASP0301 <br> acme-prd-tokyo-asp03-01-tgw-attach)
        ONPRE(ONPRE)

        %% reachability: each home table receives the other's routes
        ASP0101 <-- Reachability --> ASP0201
    end
```
";
        assert_eq!(d.text, expected);
        assert_eq!((d.nodes, d.edges, d.one_way), (4, 1, 1));
    }

    #[test]
    fn unmapped_attachments_use_their_id() {
        let tasks = vec![Task::associate(series(9), "acme-prd-tokyo-asp09-01-tgw-rtb", att("tgw-attach-99"))];
        let d = render(&tasks, &MappingTable::new(), &ids(), "tgw-x");
        let el = DiagramElements::parse(&d.text);
        assert!(el.nodes.contains_key("TGW_ATTACH_99"));
        assert!(el.edges.is_empty());
    }

    #[test]
    fn rendered_diagrams_feed_the_diagram_diff() {
        let mapping = mk_mapping();
        let mut tasks = vec![
            Task::propagate(series(2), "acme-prd-tokyo-asp01-01-tgw-rtb", None, att("tgw-attach-0b")),
            Task::propagate(series(1), "acme-prd-tokyo-asp02-01-tgw-rtb", None, att("tgw-attach-0a")),
        ];
        let v1 = render(&tasks, &mapping, &ids(), "tgw-x").text;
        tasks.push(Task::propagate(series(3), "acme-prd-tokyo-asp02-01-tgw-rtb", None, att("tgw-attach-0c")));
        tasks.push(Task::propagate(series(2), "acme-prd-tokyo-asp03-01-tgw-rtb", None, att("tgw-attach-0b")));
        let v2 = render(&tasks, &mapping, &ids(), "tgw-x").text;

        let diff = DiagramElements::parse(&diagram_diff(&v1, &v2).unwrap());
        assert_eq!(
            diff.nodes.keys().cloned().collect::<Vec<_>>(),
            vec!["ASP0201".to_string(), "ASP0301".to_string()]
        );
        assert_eq!(
            diff.edges.into_iter().collect::<Vec<_>>(),
            vec!["ASP0201 <-- New Reachability --> ASP0301".to_string()]
        );
    }
}
