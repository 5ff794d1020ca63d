use std::path::PathBuf;

use rill_types::thiserror;
use rill_types::thiserror::Error;
use rill_types::{serde_json, serde_yaml};

use crate::connection::Connection;
use crate::node::NodeHandle;

/// Structural errors raised before a graph is locked. The graph is left
/// unchanged when one of these is returned.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid node name `{name}`: {reason}")]
    InvalidNodeName { name: String, reason: String },
    #[error("A node {0} already exists in the graph")]
    DuplicateNode(NodeHandle),
    #[error("Unknown node {0}")]
    UnknownNode(NodeHandle),
    #[error("Emitting port `{port}` not present on node {node}")]
    UnknownEmitPort { node: NodeHandle, port: String },
    #[error("Receiving port `{port}` not present on node {node}")]
    UnknownRecvPort { node: NodeHandle, port: String },
    #[error("Connection already exists: {0}")]
    DuplicateConnection(Connection),
    #[error("Connection not found: {0}")]
    ConnectionNotFound(Connection),
    #[error("Adding this edge would create a cycle: {0}")]
    WouldCycle(Connection),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown node class `{0}`")]
    UnknownClass(String),
    #[error("Invalid settings for node class `{class}`: {source}")]
    InvalidSettings {
        class: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("Unknown graph document extension `{0}`")]
    UnknownExtension(String),
    #[error("Malformed compact connection `{0}`")]
    MalformedCompact(String),
    #[error("Node identity `{key}` does not match its settings ({actual})")]
    IdentityMismatch { key: String, actual: String },
    #[error("The graph document is empty")]
    EmptyDocument,
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No registered bridge can handle connection {0}")]
    NoBridgeForConnection(Connection),
    #[error("Cannot spawn worker thread: {0}")]
    CannotSpawnWorkerThread(#[source] std::io::Error),
    #[error("Cannot spawn worker process `{0}`: {1}")]
    CannotSpawnWorkerProcess(PathBuf, #[source] std::io::Error),
    #[error("Worker for `{0}` quit before reporting ready")]
    WorkerQuitEarly(String),
    #[error("Worker thread panicked")]
    WorkerPanic,
    #[error("Worker protocol violation: {0}")]
    WorkerProtocol(String),
    #[error("Failed to build node {node}: {source}")]
    NodeBuild {
        node: NodeHandle,
        #[source]
        source: rill_types::errors::internal::BoxedError,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
