use std::path::Path;

use rill_types::indexmap::IndexMap;
use rill_types::log::warn;
use rill_types::serde::{Deserialize, Serialize};
use rill_types::{serde_json, serde_yaml};

use crate::connection::Connection;
use crate::errors::SerializeError;
use crate::graph::Graph;
use crate::location::Location;
use crate::node::{Node, NodeHandle};
use crate::registry::NodeRegistry;

/// One entry of a graph document, keyed by the node's string identity.
#[derive(Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
struct NodeDoc {
    class: String,
    settings: serde_json::Value,
    inputs: Vec<Connection>,
}

type GraphDoc = IndexMap<String, NodeDoc>;

/// The settings object of a node: `name` and `compute_on` merged with the
/// class-specific settings.
pub(crate) fn node_settings(node: &Node) -> serde_json::Value {
    let mut settings = match node.kind().settings() {
        serde_json::Value::Object(map) => map,
        other => {
            warn!(
                "[{}] Class settings are not an object ({other}); ignoring them",
                node.handle()
            );
            serde_json::Map::new()
        }
    };
    settings.insert(
        "name".to_string(),
        serde_json::Value::String(node.name().to_string()),
    );
    settings.insert(
        "compute_on".to_string(),
        serde_json::Value::String(node.compute_on().to_string()),
    );
    serde_json::Value::Object(settings)
}

fn node_doc(graph: &Graph, handle: &NodeHandle) -> Result<NodeDoc, SerializeError> {
    let node = graph.node(handle)?;
    let mut inputs = graph.input_connections(handle)?;
    inputs.sort_by_key(|con| {
        (
            con.emit_node.clone(),
            con.emit_port.clone(),
            con.recv_port.clone(),
            con.connection_counter,
        )
    });
    Ok(NodeDoc {
        class: node.kind().class_name().to_string(),
        settings: node_settings(node),
        inputs,
    })
}

/// Serializes the whole graph, ordered by the stable discovery sort.
pub fn to_dict(graph: &Graph) -> Result<serde_json::Value, SerializeError> {
    let mut handles: Vec<NodeHandle> = graph.handles().collect();
    graph.sort_discovered(&mut handles);

    let mut doc = GraphDoc::new();
    for handle in handles {
        doc.insert(handle.to_string(), node_doc(graph, &handle)?);
    }
    Ok(serde_json::to_value(doc)?)
}

/// Human-readable only; connections are collapsed to compact strings and
/// cannot be loaded again.
pub fn to_compact_dict(graph: &Graph) -> Result<serde_json::Value, SerializeError> {
    let mut handles: Vec<NodeHandle> = graph.handles().collect();
    graph.sort_discovered(&mut handles);

    let mut doc = serde_json::Map::new();
    for handle in handles {
        let node = graph.node(&handle)?;
        let mut inputs: Vec<String> = graph
            .input_connections(&handle)?
            .iter()
            .map(Connection::serialize_compact)
            .collect();
        inputs.sort();
        let mut entry = serde_json::Map::new();
        entry.insert("Config".to_string(), node_settings(node));
        entry.insert("Inputs".to_string(), serde_json::Value::from(inputs));
        doc.insert(handle.to_string(), serde_json::Value::Object(entry));
    }
    Ok(serde_json::Value::Object(doc))
}

/// Rebuilds a graph from a document: instantiate every node through the
/// registry, then wire the inputs.
///
/// Returns the graph and its initial node: the explicitly requested one,
/// else the first node without inputs by sorted identity, else the first
/// entry by sorted identity.
pub fn from_dict(
    doc: &serde_json::Value,
    registry: &NodeRegistry,
    initial_node: Option<&str>,
) -> Result<(Graph, NodeHandle), SerializeError> {
    let doc: GraphDoc = serde_json::from_value(doc.clone())?;
    if doc.is_empty() {
        return Err(SerializeError::EmptyDocument);
    }

    let mut graph = Graph::new();
    let mut handles: IndexMap<String, NodeHandle> = IndexMap::new();

    // first pass: create the nodes
    for (identity, entry) in &doc {
        let kind = registry
            .get(&entry.class, entry.settings.clone())
            .map_err(SerializeError::Registry)?;
        let name = entry
            .settings
            .get("name")
            .and_then(|value| value.as_str())
            .unwrap_or("Name");
        let compute_on = entry
            .settings
            .get("compute_on")
            .and_then(|value| value.as_str())
            .unwrap_or("");
        let node = Node::new(name, Location::parse(compute_on), kind)?;
        let handle = node.handle();
        if handle.as_str() != identity {
            return Err(SerializeError::IdentityMismatch {
                key: identity.clone(),
                actual: handle.to_string(),
            });
        }
        graph.add_node(node)?;
        handles.insert(identity.clone(), handle);
    }

    // second pass: wire the inputs; outputs mirror them. Edges into
    // circuit breakers go last so that a feedback edge is the one that
    // completes its cycle, whatever order the document lists the nodes in.
    let mut deferred = Vec::new();
    for (identity, entry) in &doc {
        let recv = &handles[identity];
        let recv_is_breaker = graph.node(recv)?.is_circuit_breaker();
        for con in &entry.inputs {
            let emit = handles
                .get(&con.emit_node)
                .ok_or_else(|| {
                    SerializeError::Graph(crate::errors::GraphError::UnknownNode(
                        NodeHandle::from_identity(&con.emit_node),
                    ))
                })?
                .clone();
            if recv_is_breaker {
                deferred.push((emit, con.emit_port.clone(), recv.clone(), con.recv_port.clone()));
            } else {
                graph.add_input(&emit, &con.emit_port, recv, &con.recv_port)?;
            }
        }
    }
    for (emit, emit_port, recv, recv_port) in deferred {
        graph.add_input(&emit, &emit_port, &recv, &recv_port)?;
    }

    let initial = match initial_node {
        Some(identity) => handles
            .get(identity)
            .cloned()
            .ok_or_else(|| SerializeError::Graph(crate::errors::GraphError::UnknownNode(
                NodeHandle::from_identity(identity),
            )))?,
        None => {
            let mut sorted: Vec<&String> = doc.keys().collect();
            sorted.sort();
            let chosen = sorted
                .iter()
                .find(|identity| doc[identity.as_str()].inputs.is_empty())
                .copied()
                .or_else(|| sorted.first().copied())
                .expect("document is not empty");
            handles[chosen.as_str()].clone()
        }
    };

    Ok((graph, initial))
}

/// Writes the graph document; the extension picks JSON or YAML.
pub fn save(graph: &Graph, path: &Path) -> Result<(), SerializeError> {
    let doc = to_dict(graph)?;
    let text = match extension(path)? {
        DocFormat::Json => serde_json::to_string_pretty(&doc)?,
        DocFormat::Yaml => serde_yaml::to_string(&doc)?,
    };
    std::fs::write(path, text)?;
    Ok(())
}

/// Loads a graph document; the extension picks JSON or YAML.
pub fn load(
    path: &Path,
    registry: &NodeRegistry,
    initial_node: Option<&str>,
) -> Result<(Graph, NodeHandle), SerializeError> {
    let text = std::fs::read_to_string(path)?;
    let doc: serde_json::Value = match extension(path)? {
        DocFormat::Json => serde_json::from_str(&text)?,
        DocFormat::Yaml => serde_yaml::from_str(&text)?,
    };
    from_dict(&doc, registry, initial_node)
}

enum DocFormat {
    Json,
    Yaml,
}

fn extension(path: &Path) -> Result<DocFormat, SerializeError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(DocFormat::Json),
        Some("yml") | Some("yaml") => Ok(DocFormat::Yaml),
        other => Err(SerializeError::UnknownExtension(
            other.unwrap_or("").to_string(),
        )),
    }
}
