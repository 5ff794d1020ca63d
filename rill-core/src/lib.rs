pub mod bridge;
pub mod connection;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod location;
pub mod node;
pub mod port;
pub mod registry;
pub mod serializer;
pub mod storage;

#[cfg(test)]
mod tests;

pub use connection::Connection;
pub use errors::{ExecutionError, GraphError, RegistryError, SerializeError};
pub use executor::{ExecutorOptions, GraphExecutor};
pub use graph::Graph;
pub use location::Location;
pub use node::{
    Attr, Emission, Emissions, InputFrame, Node, NodeHandle, NodeKind, Source, SourceFactory,
    Transform, TransformFactory,
};
pub use port::{Port, PortKind, PortSet};
pub use registry::{BridgeRegistry, NodeRegistry};
