use crate::builder::{Build, ProgramBuilder};
use crate::live::LiveProgram;
use crate::module::{ModuleRegistry, ModuleServer};
use crate::program::Program;
use crate::registry::Catalog;
use crate::schema::{NamedTypeFetcher, SchemaFetcher};
use std::sync::Arc;
use tidecore::{BuildError, Error, EvalError, ProgramDesc, Value, ValueDesc};

/// Entry point owning the operator catalog and the module registry
pub struct Engine {
    catalog: Arc<Catalog>,
    modules: Arc<ModuleRegistry>,
    server: Option<Arc<dyn ModuleServer>>,
    schemas: Arc<dyn SchemaFetcher>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with an empty catalog and default settings
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with an empty catalog
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_catalog(Catalog::new(), config)
    }

    /// Create an engine with a pre-filled catalog
    pub fn with_catalog(catalog: Catalog, config: EngineConfig) -> Self {
        let catalog = Arc::new(catalog);
        let schemas: Arc<dyn SchemaFetcher> = Arc::new(NamedTypeFetcher);
        let modules = Arc::new(
            ModuleRegistry::new(Arc::clone(&catalog), config.clone())
                .with_schema_fetcher(Arc::clone(&schemas)),
        );
        Self {
            catalog,
            modules,
            server: None,
            schemas,
            config,
        }
    }

    /// Fetch modules through `server`. Modules installed before are dropped.
    pub fn with_module_server(mut self, server: Arc<dyn ModuleServer>) -> Self {
        self.server = Some(server);
        self.rebuild_registry();
        self
    }

    /// Resolve `$ref` props schemas through `schemas`
    pub fn with_schema_fetcher(mut self, schemas: Arc<dyn SchemaFetcher>) -> Self {
        self.schemas = schemas;
        self.rebuild_registry();
        self
    }

    fn rebuild_registry(&mut self) {
        let mut modules = ModuleRegistry::new(Arc::clone(&self.catalog), self.config.clone())
            .with_schema_fetcher(Arc::clone(&self.schemas));
        if let Some(server) = &self.server {
            modules = modules.with_server(Arc::clone(server));
        }
        self.modules = Arc::new(modules);
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn builder(&self) -> ProgramBuilder<'_> {
        ProgramBuilder::new(&self.catalog, &self.modules)
    }

    /// Build a program; its pending typings are left on the returned build
    pub fn build(&self, desc: &ProgramDesc) -> Result<Build, BuildError> {
        self.builder().build(desc)
    }

    /// Build a program and wait for its typings to settle
    pub async fn compile(&self, desc: &ProgramDesc) -> Result<Arc<Program>, BuildError> {
        let program = self.build(desc)?.settle().await;
        Ok(Arc::new(program))
    }

    pub async fn compile_json(&self, desc: &serde_json::Value) -> Result<Arc<Program>, Error> {
        let desc = ProgramDesc::from_json(desc)?;
        Ok(self.compile(&desc).await?)
    }

    /// Compile a program and wrap it for mounting contexts
    pub async fn live(&self, desc: &ProgramDesc) -> Result<LiveProgram, BuildError> {
        Ok(LiveProgram::new(self.compile(desc).await?))
    }

    /// Evaluate a descriptor without building a graph
    pub fn eval_value(&self, desc: &ValueDesc) -> Result<Value, EvalError> {
        self.catalog.eval_value(desc)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Record the slots evaluated by each `execute` pass
    pub trace_execution: bool,
    /// Maximum number of module fetches in flight while flushing
    pub fetch_concurrency: usize,
    /// Separator of reference path segments
    pub scope_separator: char,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trace_execution: true,
            fetch_concurrency: 8,
            scope_separator: '/',
        }
    }
}
