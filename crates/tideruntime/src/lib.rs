//! Dataflow runtime
//!
//! This crate turns program descriptors into graphs, orders each scope
//! topologically and executes the result incrementally. It also holds the
//! operator catalog, the module registry and the alternate flow scheduler.

mod builder;
mod context;
pub mod flow;
mod graph;
mod live;
mod module;
mod program;
mod registry;
mod runtime;
mod schema;

pub use builder::{Build, ProgramBuilder};
pub use context::{ContextId, ExecutionContext, StatusFlags};
pub use graph::{
    Graph, NodeEntry, NodeId, NodeKind, Operator, Scope, ScopeId, ScopeKind, Use, UseLabel,
    ValueReader,
};
pub use live::LiveProgram;
pub use module::{ModuleEntry, ModuleRegistry, ModuleServer, ModuleState, StaticModuleServer};
pub use program::{Program, ProgramComponent};
pub use registry::{Catalog, ModelMetadata, OperatorModel};
pub use runtime::{Engine, EngineConfig};
pub use schema::{NamedTypeFetcher, SchemaFetcher};
