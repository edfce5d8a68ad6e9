use std::fs::File;
use std::io::{self, Write};

use graphviz_rust::cmd::{CommandArg, Format};
use graphviz_rust::dot_generator::*;
use graphviz_rust::dot_structures::*;
use graphviz_rust::exec;
use graphviz_rust::printer::{DotPrinter, PrinterContext};

use crate::multigraph::ImplicationTag;
use crate::property_graph::TimedPropertyGraph;

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn tag_name(tag: ImplicationTag) -> &'static str {
    match tag {
        ImplicationTag::Assumption => "assumption",
        ImplicationTag::Conclusion => "conclusion",
    }
}

impl TimedPropertyGraph {
    /// Writes the graph in GraphML: node ids are the textual renderings,
    /// edges carry their timestamp rendering and implication tag.
    pub fn write_graphml<W: Write>(&self, mut out: W) -> io::Result<()> {
        let graph = self.substrate();

        writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(
            out,
            r#"<graphml xmlns="http://graphml.graphdrawing.org/xmlns">"#
        )?;
        writeln!(
            out,
            r#"  <key id="timestamp" for="edge" attr.name="timestamp" attr.type="string"/>"#
        )?;
        writeln!(
            out,
            r#"  <key id="implication" for="edge" attr.name="implication" attr.type="string"/>"#
        )?;
        writeln!(out, r#"  <graph edgedefault="directed">"#)?;

        for id in graph.node_ids() {
            if let Some(node) = graph.node(id) {
                writeln!(out, r#"    <node id="{}"/>"#, xml_escape(&node.export_id()))?;
            }
        }
        for edge in graph.edge_refs() {
            let (Some(from), Some(to), Some(attrs)) = (
                graph.node(edge.from),
                graph.node(edge.to),
                graph.edge_attrs(edge),
            ) else {
                continue;
            };
            writeln!(
                out,
                r#"    <edge source="{}" target="{}">"#,
                xml_escape(&from.export_id()),
                xml_escape(&to.export_id())
            )?;
            writeln!(
                out,
                r#"      <data key="timestamp">{}</data>"#,
                xml_escape(&attrs.timestamp.to_string())
            )?;
            if let Some(tag) = attrs.implication {
                writeln!(
                    out,
                    r#"      <data key="implication">{}</data>"#,
                    tag_name(tag)
                )?;
            }
            writeln!(out, r#"    </edge>"#)?;
        }

        writeln!(out, r#"  </graph>"#)?;
        writeln!(out, r#"</graphml>"#)?;
        Ok(())
    }

    /// Saves the graph as a GraphML file.
    pub fn export_to_graphml_file(&self, path: &str) -> io::Result<()> {
        let file = File::create(path)?;
        self.write_graphml(file)
    }

    /// DOT rendering with timestamp edge labels; colorized edges show red so
    /// a pending deletion can be inspected visually.
    pub fn to_dot(&self) -> Graph {
        let graph = self.substrate();
        let mut stmts = Vec::new();

        stmts.push(stmt!(node!("node";
            attr!("shape", "ellipse"),
            attr!("style", "filled"),
            attr!("fillcolor", "lightblue"))));

        for id in graph.node_ids() {
            if let Some(node) = graph.node(id) {
                let dot_id = node.export_id();
                let label = node.rendering();
                stmts.push(stmt!(node!(esc dot_id; attr!("label", esc label))));
            }
        }

        for edge in graph.edge_refs() {
            let (Some(from), Some(to), Some(attrs)) = (
                graph.node(edge.from),
                graph.node(edge.to),
                graph.edge_attrs(edge),
            ) else {
                continue;
            };
            let from_id = from.export_id();
            let to_id = to.export_id();
            let label = match attrs.implication {
                Some(tag) => format!("{} ({})", attrs.timestamp, tag_name(tag)),
                None => attrs.timestamp.to_string(),
            };
            let color = if graph.is_edge_colorized(edge) {
                "red"
            } else {
                "black"
            };
            stmts.push(stmt!(edge!(
                node_id!(esc from_id) => node_id!(esc to_id);
                attr!("label", esc label),
                attr!("color", color)
            )));
        }

        Graph::DiGraph {
            id: id!("timed_property_graph"),
            strict: false,
            stmts,
        }
    }

    /// Writes the DOT rendering to a file.
    pub fn save_dot(&self, path: &str) -> io::Result<()> {
        let dot_graph = self.to_dot();
        let dot_string = dot_graph.print(&mut PrinterContext::default());
        let mut file = File::create(path)?;
        file.write_all(dot_string.as_bytes())?;
        Ok(())
    }

    /// Renders the graph to a PNG through the graphviz command.
    pub fn save_png(&self, path: &str) -> io::Result<()> {
        exec(
            self.to_dot(),
            &mut PrinterContext::default(),
            vec![
                CommandArg::Format(Format::Png),
                CommandArg::Output(path.to_string()),
            ],
        )
        .map_err(io::Error::other)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeSource;
    use crate::timestamp::Timestamp;

    fn sample() -> TimedPropertyGraph {
        let source = TimeSource::new();
        let mut g = TimedPropertyGraph::predicate_with_source("p", Vec::new(), source.clone());
        g.set_timestamp(Timestamp::Absolute(1))
            .expect("fresh predicate accepts a stamp");
        let mut q = TimedPropertyGraph::predicate_with_source("q", Vec::new(), source);
        q.set_timestamp(Timestamp::Absolute(2))
            .expect("fresh predicate accepts a stamp");
        g.logical_and(&q, None);
        g
    }

    #[test]
    fn test_graphml_lists_nodes_and_edges() {
        let mut buffer = Vec::new();
        sample().write_graphml(&mut buffer).unwrap();
        let xml = String::from_utf8(buffer).unwrap();
        assert!(xml.contains(r#"<node id="p()"/>"#));
        assert!(xml.contains(r#"<node id="q()"/>"#));
        assert!(xml.contains(r#"<data key="timestamp">1</data>"#));
        assert!(xml.contains(r#"<data key="timestamp">2</data>"#));
        assert!(xml.contains("edgedefault=\"directed\""));
    }

    #[test]
    fn test_graphml_marks_implication_edges() {
        let source = TimeSource::new();
        let mut g = TimedPropertyGraph::predicate_with_source("a", Vec::new(), source.clone());
        g.implies(
            &TimedPropertyGraph::predicate_with_source("b", Vec::new(), source),
            Some(Timestamp::Relative(3)),
        )
        .unwrap();

        let mut buffer = Vec::new();
        g.write_graphml(&mut buffer).unwrap();
        let xml = String::from_utf8(buffer).unwrap();
        assert!(xml.contains(r#"<data key="implication">assumption</data>"#));
        assert!(xml.contains(r#"<data key="implication">conclusion</data>"#));
        assert!(xml.contains(r#"<data key="timestamp">now+3</data>"#));
    }

    #[test]
    fn test_graphml_escapes_operator_symbols() {
        let source = TimeSource::new();
        let mut g = TimedPropertyGraph::predicate_with_source("a", Vec::new(), source.clone());
        g.implies(
            &TimedPropertyGraph::predicate_with_source("b", Vec::new(), source),
            Some(Timestamp::Absolute(1)),
        )
        .unwrap();
        let mut buffer = Vec::new();
        g.write_graphml(&mut buffer).unwrap();
        let xml = String::from_utf8(buffer).unwrap();
        // The implication root renders as a()-->b(); the > must be escaped.
        assert!(xml.contains("a()--&gt;b()"));
    }

    #[test]
    fn test_dot_contains_labels() {
        let dot = sample()
            .to_dot()
            .print(&mut PrinterContext::default());
        assert!(dot.contains("p()"));
        assert!(dot.contains("q()"));
        assert!(dot.contains("digraph"));
    }

    #[test]
    fn test_graphml_file_round_trip_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("execution.graphml");
        let path = path.to_str().unwrap();
        sample().export_to_graphml_file(path).unwrap();
        let xml = std::fs::read_to_string(path).unwrap();
        assert!(xml.starts_with(r#"<?xml version="1.0""#));
        assert!(xml.contains("</graphml>"));
    }

    #[test]
    fn test_save_dot_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("execution.dot");
        let path = path.to_str().unwrap();
        sample().save_dot(path).unwrap();
        let dot = std::fs::read_to_string(path).unwrap();
        assert!(dot.contains("digraph"));
    }
}
