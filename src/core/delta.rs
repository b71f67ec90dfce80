// structural diffs between generations of the document and the diagram
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_yaml::Value;
use tracing::debug;

use crate::error::ReconcileError;

/// Logical ids under `Resources` of a generated document.
pub fn document_logical_ids(text: &str) -> Result<BTreeSet<String>, ReconcileError> {
    let doc: Value = serde_yaml::from_str(text)?;
    let ids = match doc.get("Resources") {
        Some(Value::Mapping(resources)) => resources
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect(),
        _ => BTreeSet::new(),
    };
    Ok(ids)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentDiff {
    /// sorted
    pub added: Vec<String>,
    /// sorted
    pub removed: Vec<String>,
}

impl DocumentDiff {
    pub fn between(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> Self {
        Self {
            added: current.difference(previous).cloned().collect(),
            removed: previous.difference(current).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Plain `+ id` / `- id` listing; `None` when nothing changed.
    pub fn render(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut out = String::from("# --- Pure Logical Difference (Resource Addition/Removal) ---\n");
        if !self.added.is_empty() {
            out.push_str("\n## Added Resources (New CFn Resources to be created):\n");
            for id in &self.added {
                out.push_str(&format!("+ {id}\n"));
            }
        }
        if !self.removed.is_empty() {
            out.push_str("\n## Removed Resources (Existing CFn Resources to be deleted):\n");
            for id in &self.removed {
                out.push_str(&format!("- {id}\n"));
            }
        }
        Some(out)
    }
}

/// Diff a previously stored document against the ids of the new one.
pub fn diff_documents(previous: &str, current: &BTreeSet<String>) -> Result<DocumentDiff, ReconcileError> {
    let previous = document_logical_ids(previous)?;
    let diff = DocumentDiff::between(&previous, current);
    debug!(added = diff.added.len(), removed = diff.removed.len(), "document diff");
    Ok(diff)
}

const SKIPPED_PREFIXES: [&str; 8] = [
    "flowchart",
    "graph",
    "subgraph",
    "end",
    "%%",
    "direction",
    "classDef",
    "linkStyle",
];

fn normalize_line(line: &str) -> String {
    line.replace(['\u{a0}', '\t'], " ").trim().to_string()
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `NODE(label)` / `NODE{label}` -> `NODE`
fn node_id(line: &str) -> Option<&str> {
    if line.contains("-->") {
        return None;
    }
    let end = line
        .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-'))?;
    let (id, rest) = line.split_at(end);
    let closes = rest.ends_with(')') || rest.ends_with('}');
    let opens = rest.starts_with('(') || rest.starts_with('{');
    (!id.is_empty() && opens && closes).then_some(id)
}

fn is_edge(line: &str) -> bool {
    line.contains("-->") || line.contains("<--")
}

/// `A <-- label --> B` -> `(A, B)`
fn edge_endpoints(line: &str) -> Option<(&str, &str)> {
    let head_end = line.find(|c: char| !is_ident(c)).unwrap_or(line.len());
    let tail_start = line.rfind(|c: char| !is_ident(c)).map_or(0, |i| i + 1);
    let (head, tail) = (&line[..head_end], &line[tail_start..]);
    (!head.is_empty() && !tail.is_empty() && head_end <= tail_start).then_some((head, tail))
}

/// Node-definition and edge lines of a Mermaid diagram, whitespace-normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagramElements {
    pub fabric_id: Option<String>,
    /// node id -> definition line
    pub nodes: BTreeMap<String, String>,
    pub edges: BTreeSet<String>,
}

impl DiagramElements {
    pub fn parse(text: &str) -> Self {
        let mut out = Self::default();
        let mut in_block = false;

        for raw in text.lines() {
            let line = normalize_line(raw);
            if line.starts_with("```mermaid") {
                in_block = true;
                continue;
            }
            if line.starts_with("```") {
                in_block = false;
                continue;
            }
            if !in_block || line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix("subgraph Transit Gateway ") {
                out.fabric_id = rest.split_whitespace().next().map(str::to_string);
            }
            if SKIPPED_PREFIXES.iter().any(|p| line.starts_with(p)) {
                continue;
            }

            if let Some(id) = node_id(&line) {
                out.nodes.insert(id.to_string(), line.clone());
            } else if is_edge(&line) {
                out.edges.insert(line);
            }
        }
        out
    }

    fn definitions(&self) -> BTreeSet<&str> {
        self.nodes.values().map(String::as_str).collect()
    }
}

/// Render the additions of `current` over `previous` as a standalone diagram.
///
/// Added nodes, added edges (relabelled as new), and every existing node
/// that is an endpoint of an added edge. `None` when nothing was added.
pub fn diagram_diff(previous: &str, current: &str) -> Option<String> {
    let prev = DiagramElements::parse(previous);
    let curr = DiagramElements::parse(current);

    let prev_defs = prev.definitions();
    let added_nodes: Vec<&str> = curr
        .definitions()
        .into_iter()
        .filter(|def| !prev_defs.contains(def))
        .collect();
    let added_edges: Vec<&String> = curr.edges.difference(&prev.edges).collect();

    if added_nodes.is_empty() && added_edges.is_empty() {
        debug!("diagram unchanged, no diff");
        return None;
    }

    let mut required: BTreeSet<&str> = added_nodes.iter().copied().filter_map(node_id).collect();
    for edge in &added_edges {
        if let Some((a, b)) = edge_endpoints(edge) {
            for id in [a, b] {
                if let Some((key, _)) = curr.nodes.get_key_value(id) {
                    required.insert(key.as_str());
                }
            }
        }
    }

    let fabric_id = curr
        .fabric_id
        .clone()
        .or_else(|| prev.fabric_id.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let mut lines = vec![
        "```mermaid".to_string(),
        "flowchart TB".to_string(),
        format!("    subgraph Transit Gateway {fabric_id}"),
        String::new(),
        "        %% added attachments and the existing endpoints of new connections".to_string(),
    ];
    for id in required {
        if let Some(def) = curr.nodes.get(id) {
            lines.push(format!("        {def}"));
        }
    }
    lines.push(String::new());
    lines.push("        %% new reachability only".to_string());
    for edge in added_edges {
        let edge = if edge.contains("New Reachability") {
            edge.clone()
        } else {
            edge.replace("Reachability", "New Reachability")
        };
        lines.push(format!("        {edge}"));
    }
    lines.push("    end".to_string());
    lines.push("```".to_string());
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn mk_diagram(nodes: &[&str], edges: &[&str]) -> String {
        let mut lines = vec![
            "```mermaid".to_string(),
            "flowchart TB".to_string(),
            "    subgraph Transit Gateway tgw-0123456789abcdef0".to_string(),
        ];
        for n in nodes {
            lines.push(format!("        {n}({n} <br> {})", n.to_lowercase()));
        }
        for e in edges {
            lines.push(format!("        {e}"));
        }
        lines.push("    end".to_string());
        lines.push("```".to_string());
        lines.join("\n")
    }

    #[test]
    fn document_ids_ignore_parameters_and_tags() {
        let doc = "\
AWSTemplateFormatVersion: '2010-09-09'
Parameters:
  TransitGatewayId:
    Type: String
Resources:
# --- group ---
  Asp0101TgwRTB:
    Type: AWS::EC2::TransitGatewayRouteTable
    Properties:
      TransitGatewayId: !Ref TransitGatewayId
  TGWASP0101ASSOCIATEToAsp0101TgwRTB:
    Properties:
      TransitGatewayRouteTableId: !Ref Asp0101TgwRTB
";
        assert_eq!(
            document_logical_ids(doc).unwrap(),
            ids(&["Asp0101TgwRTB", "TGWASP0101ASSOCIATEToAsp0101TgwRTB"])
        );
        assert!(document_logical_ids("Resources:\n").unwrap().is_empty());
        assert!(document_logical_ids("Resources: [unclosed").is_err());
    }

    #[test]
    fn document_diff_lists_additions_and_removals() {
        let diff = DocumentDiff::between(&ids(&["A", "B"]), &ids(&["B", "C"]));
        assert_eq!(diff.added, vec!["C".to_string()]);
        assert_eq!(diff.removed, vec!["A".to_string()]);

        let expected = "\
# --- Pure Logical Difference (Resource Addition/Removal) ---

## Added Resources (New CFn Resources to be created):
+ C

## Removed Resources (Existing CFn Resources to be deleted):
- A
";
        assert_eq!(diff.render().as_deref(), Some(expected));
        assert_eq!(DocumentDiff::between(&ids(&["A"]), &ids(&["A"])).render(), None);
    }

    #[test]
    fn node_and_edge_line_parsing() {
        assert_eq!(node_id("ASP0101(ASP0101 <br> acme-attach)"), Some("ASP0101"));
        assert_eq!(node_id("ONPRE{ONPRE}"), Some("ONPRE"));
        assert_eq!(node_id("A <-- Reachability --> B"), None);
        assert_eq!(node_id("lower(case)"), None);
        assert_eq!(edge_endpoints("A <-- Reachability --> B_2"), Some(("A", "B_2")));
        assert_eq!(edge_endpoints("A-->B"), Some(("A", "B")));
        assert_eq!(edge_endpoints("<-->"), None);
    }

    #[test]
    fn parse_normalizes_whitespace_and_skips_structure() {
        let text = "```mermaid\nflowchart TB\n\tsubgraph Transit Gateway tgw-x\n\u{a0}\u{a0}A(A)\t\n  %% note\n  A <-- Reachability --> B\n  end\n```\nB(B)\n";
        let el = DiagramElements::parse(text);
        assert_eq!(el.fabric_id.as_deref(), Some("tgw-x"));
        assert_eq!(el.nodes.keys().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(el.edges.len(), 1);
    }

    #[test]
    fn diagram_diff_includes_context_nodes_of_new_edges() {
        let v1 = mk_diagram(&["A", "B"], &["A <-- Reachability --> B"]);
        let v2 = mk_diagram(&["A", "B", "C"], &["A <-- Reachability --> B", "B <-- Reachability --> C"]);

        let diff = diagram_diff(&v1, &v2).unwrap();
        let el = DiagramElements::parse(&diff);

        assert_eq!(el.nodes.keys().cloned().collect::<Vec<_>>(), vec!["B".to_string(), "C".to_string()]);
        assert_eq!(
            el.edges.into_iter().collect::<Vec<_>>(),
            vec!["B <-- New Reachability --> C".to_string()]
        );
        assert_eq!(el.fabric_id.as_deref(), Some("tgw-0123456789abcdef0"));
    }

    #[test]
    fn diagram_diff_is_none_without_additions() {
        let v1 = mk_diagram(&["A", "B", "C"], &["A <-- Reachability --> B"]);
        // a removed node is not an addition
        let v2 = mk_diagram(&["A", "B"], &["A <-- Reachability --> B"]);
        assert_eq!(diagram_diff(&v1, &v2), None);
        assert_eq!(diagram_diff(&v2, &v2), None);
    }
}
