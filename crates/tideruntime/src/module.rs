//! External modules: named exports resolved asynchronously by id.
//!
//! A [`ModuleEntry`] starts pending and ends either loaded (definition and
//! exports both set) or failed. Waiters registered before resolution are
//! invoked exactly once. The [`ModuleRegistry`] memoizes entries per id and
//! drives their fetches through a pluggable [`ModuleServer`].

use crate::builder::ProgramBuilder;
use crate::program::ProgramComponent;
use crate::registry::Catalog;
use crate::runtime::EngineConfig;
use crate::schema::{NamedTypeFetcher, SchemaFetcher};
use async_trait::async_trait;
use futures::channel::oneshot;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tidecore::{ModuleError, ProgramDesc, Schema, Value};

type Waiter<T> = Box<dyn FnOnce(Result<T, ModuleError>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Pending,
    Loaded,
    Failed,
}

#[derive(Default)]
struct EntryInner {
    definition: Option<Schema>,
    exports: Option<Value>,
    error: Option<ModuleError>,
    definition_waiters: Vec<Waiter<Schema>>,
    data_waiters: Vec<Waiter<Value>>,
    children: IndexMap<String, Arc<ModuleEntry>>,
}

pub struct ModuleEntry {
    id: String,
    inner: Mutex<EntryInner>,
}

impl ModuleEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(EntryInner::default()),
        }
    }

    /// An entry that is loaded from the start
    pub fn loaded(id: impl Into<String>, definition: Schema, exports: Value) -> Self {
        let entry = Self::new(id);
        {
            let mut inner = entry.lock();
            inner.definition = Some(definition);
            inner.exports = Some(exports);
        }
        entry
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, EntryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ModuleState {
        let inner = self.lock();
        if inner.error.is_some() {
            ModuleState::Failed
        } else if inner.definition.is_some() && inner.exports.is_some() {
            ModuleState::Loaded
        } else {
            ModuleState::Pending
        }
    }

    pub fn error(&self) -> Option<ModuleError> {
        self.lock().error.clone()
    }

    pub fn set_definition(&self, definition: Schema) {
        let waiters = {
            let mut inner = self.lock();
            inner.definition = Some(definition.clone());
            std::mem::take(&mut inner.definition_waiters)
        };
        for waiter in waiters {
            waiter(Ok(definition.clone()));
        }
    }

    pub fn set_data(&self, exports: Value) {
        let waiters = {
            let mut inner = self.lock();
            inner.exports = Some(exports.clone());
            std::mem::take(&mut inner.data_waiters)
        };
        tracing::debug!("Module '{}' exports are ready", self.id);
        for waiter in waiters {
            waiter(Ok(exports.clone()));
        }
    }

    /// Fail the entry and every child entry still pending
    pub fn set_error(&self, error: ModuleError) {
        tracing::error!("Module '{}' failed: {}", self.id, error);
        let (definition_waiters, data_waiters, children) = {
            let mut inner = self.lock();
            inner.error = Some(error.clone());
            (
                std::mem::take(&mut inner.definition_waiters),
                std::mem::take(&mut inner.data_waiters),
                inner.children.values().cloned().collect::<Vec<_>>(),
            )
        };
        for waiter in definition_waiters {
            waiter(Err(error.clone()));
        }
        for waiter in data_waiters {
            waiter(Err(error.clone()));
        }
        for child in children {
            if child.state() == ModuleState::Pending {
                child.set_error(error.clone());
            }
        }
    }

    /// Call `callback` once the definition is known, immediately if it is
    pub fn require_definition(
        &self,
        callback: impl FnOnce(Result<Schema, ModuleError>) + Send + 'static,
    ) {
        let ready = {
            let mut inner = self.lock();
            if let Some(definition) = &inner.definition {
                Some(Ok(definition.clone()))
            } else if let Some(error) = &inner.error {
                Some(Err(error.clone()))
            } else {
                inner.definition_waiters.push(Box::new(callback));
                return;
            }
        };
        if let Some(result) = ready {
            callback(result);
        }
    }

    /// Call `callback` once the exports are known, immediately if they are
    pub fn require_data(&self, callback: impl FnOnce(Result<Value, ModuleError>) + Send + 'static) {
        let ready = {
            let mut inner = self.lock();
            if let Some(exports) = &inner.exports {
                Some(Ok(exports.clone()))
            } else if let Some(error) = &inner.error {
                Some(Err(error.clone()))
            } else {
                inner.data_waiters.push(Box::new(callback));
                return;
            }
        };
        if let Some(result) = ready {
            callback(result);
        }
    }

    pub fn definition(&self) -> impl Future<Output = Result<Schema, ModuleError>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.require_definition(move |result| {
            let _ = tx.send(result);
        });
        let id = self.id.clone();
        async move { rx.await.unwrap_or(Err(ModuleError::NotFound(id))) }
    }

    pub fn data(&self) -> impl Future<Output = Result<Value, ModuleError>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.require_data(move |result| {
            let _ = tx.send(result);
        });
        let id = self.id.clone();
        async move { rx.await.unwrap_or(Err(ModuleError::NotFound(id))) }
    }

    /// Current exports: `Invalid` while pending, `Undefined` after a failure
    pub fn exports(&self) -> Value {
        let inner = self.lock();
        match (&inner.exports, &inner.error) {
            (_, Some(_)) => Value::Undefined,
            (Some(exports), None) => exports.clone(),
            (None, None) => Value::Invalid,
        }
    }

    /// Loaded definition, if any
    pub fn current_definition(&self) -> Option<Schema> {
        self.lock().definition.clone()
    }

    /// Child entry published by an assembly, created on first request.
    ///
    /// Once the parent has settled its published children are final, so a
    /// child first requested afterwards fails right away.
    pub fn child(&self, publish: &str) -> Arc<ModuleEntry> {
        let mut inner = self.lock();
        if let Some(child) = inner.children.get(publish) {
            return Arc::clone(child);
        }
        let child = Arc::new(ModuleEntry::new(format!("{}#{}", self.id, publish)));
        if let Some(error) = &inner.error {
            child.lock().error = Some(error.clone());
        } else if inner.definition.is_some() && inner.exports.is_some() {
            let error = ModuleError::NotFound(child.id().to_string());
            tracing::warn!("Module '{}' is not published", child.id());
            child.lock().error = Some(error);
        }
        inner.children.insert(publish.to_string(), Arc::clone(&child));
        child
    }

    fn children(&self) -> Vec<Arc<ModuleEntry>> {
        self.lock().children.values().cloned().collect()
    }
}

impl fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Remote side of the module registry, returns module descriptors by id
#[async_trait]
pub trait ModuleServer: Send + Sync {
    async fn fetch_module(&self, id: &str) -> Result<Json, ModuleError>;
}

/// In-memory module server
#[derive(Debug, Clone, Default)]
pub struct StaticModuleServer {
    modules: HashMap<String, Json>,
}

impl StaticModuleServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, id: impl Into<String>, descriptor: Json) -> Self {
        self.insert(id, descriptor);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, descriptor: Json) {
        self.modules.insert(id.into(), descriptor);
    }
}

#[async_trait]
impl ModuleServer for StaticModuleServer {
    async fn fetch_module(&self, id: &str) -> Result<Json, ModuleError> {
        self.modules
            .get(id)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound(id.to_string()))
    }
}

/// Memoized module entries plus the queue of fetches still to run
pub struct ModuleRegistry {
    catalog: Arc<Catalog>,
    server: Option<Arc<dyn ModuleServer>>,
    schemas: Arc<dyn SchemaFetcher>,
    config: EngineConfig,
    modules: Mutex<HashMap<String, Arc<ModuleEntry>>>,
    queue: Mutex<Vec<String>>,
}

impl ModuleRegistry {
    pub fn new(catalog: Arc<Catalog>, config: EngineConfig) -> Self {
        Self {
            catalog,
            server: None,
            schemas: Arc::new(NamedTypeFetcher),
            config,
            modules: Mutex::new(HashMap::new()),
            queue: Mutex::new(Vec::new()),
        }
    }

    pub fn with_server(mut self, server: Arc<dyn ModuleServer>) -> Self {
        self.server = Some(server);
        self
    }

    pub fn with_schema_fetcher(mut self, schemas: Arc<dyn SchemaFetcher>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn schema_fetcher(&self) -> &Arc<dyn SchemaFetcher> {
        &self.schemas
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn modules(&self) -> MutexGuard<'_, HashMap<String, Arc<ModuleEntry>>> {
        self.modules.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queue(&self) -> MutexGuard<'_, Vec<String>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the entry for an id, queueing its fetch on first request.
    ///
    /// `id#publish` addresses an entry published by the assembly `id`.
    pub fn require_module(&self, id: &str) -> Arc<ModuleEntry> {
        if let Some((parent, publish)) = id.split_once('#') {
            return self.require_module(parent).child(publish);
        }

        let mut modules = self.modules();
        if let Some(entry) = modules.get(id) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(ModuleEntry::new(id));
        modules.insert(id.to_string(), Arc::clone(&entry));
        drop(modules);

        if self.server.is_some() {
            tracing::debug!("Queueing fetch of module '{}'", id);
            self.queue().push(id.to_string());
        } else {
            entry.set_error(ModuleError::NoServer(id.to_string()));
        }
        entry
    }

    /// Register a module that needs no fetch
    pub fn install_module(
        &self,
        id: impl Into<String>,
        definition: Schema,
        exports: Value,
    ) -> Arc<ModuleEntry> {
        let id = id.into();
        tracing::info!("Installing module: {}", id);
        let entry = Arc::new(ModuleEntry::loaded(id.clone(), definition, exports));
        self.modules().insert(id, Arc::clone(&entry));
        entry
    }

    pub fn get(&self, id: &str) -> Option<Arc<ModuleEntry>> {
        match id.split_once('#') {
            Some((parent, publish)) => self.get(parent).map(|entry| entry.child(publish)),
            None => self.modules().get(id).cloned(),
        }
    }

    /// Exports of a loaded module
    pub fn get_data(&self, id: &str) -> Option<Value> {
        self.get(id)
            .filter(|entry| entry.state() == ModuleState::Loaded)
            .map(|entry| entry.exports())
    }

    pub fn get_definition(&self, id: &str) -> Option<Schema> {
        self.get(id).and_then(|entry| entry.current_definition())
    }

    pub fn pending_fetches(&self) -> usize {
        self.queue().len()
    }

    /// Run every queued fetch, including fetches queued by the modules
    /// being built, until the queue is empty. Returns the number of fetches.
    pub async fn flush(self: &Arc<Self>) -> usize {
        let Some(server) = self.server.clone() else {
            return 0;
        };

        let mut fetched = 0;
        loop {
            let batch = std::mem::take(&mut *self.queue());
            if batch.is_empty() {
                break;
            }
            tracing::debug!("Fetching {} module(s)", batch.len());
            fetched += batch.len();

            let results: Vec<(String, Result<Json, ModuleError>)> = stream::iter(batch)
                .map(|id| {
                    let server = Arc::clone(&server);
                    async move {
                        let result = server.fetch_module(&id).await;
                        (id, result)
                    }
                })
                .buffer_unordered(self.config.fetch_concurrency.max(1))
                .collect()
                .await;

            for (id, result) in results {
                let Some(entry) = self.modules().get(&id).cloned() else {
                    continue;
                };
                let outcome =
                    result.and_then(|descriptor| self.apply_descriptor(&entry, &descriptor));
                if let Err(error) = outcome {
                    entry.set_error(error);
                }
            }
        }
        fetched
    }

    /// Build an entry from its fetched descriptor
    fn apply_descriptor(
        self: &Arc<Self>,
        entry: &Arc<ModuleEntry>,
        descriptor: &Json,
    ) -> Result<(), ModuleError> {
        let module_type = descriptor.get("type").and_then(Json::as_str).unwrap_or_default();
        tracing::debug!("Building module '{}' of type '{}'", entry.id(), module_type);

        match module_type {
            "data" => {
                entry.set_definition(definition_of(descriptor));
                entry.set_data(descriptor.get("data").map(Value::from).unwrap_or(Value::Null));
                Ok(())
            }
            "component" => {
                let desc = ProgramDesc::from_json(descriptor)
                    .map_err(|e| ModuleError::BuildFailed(e.to_string()))?;
                let program = ProgramBuilder::new(&self.catalog, self)
                    .build(&desc)
                    .map_err(|e| ModuleError::BuildFailed(e.to_string()))?
                    .into_program();
                entry.set_definition(Schema::view(desc.props.as_ref()));
                entry.set_data(Value::Component(Arc::new(ProgramComponent::new(Arc::new(
                    program,
                )))));
                Ok(())
            }
            "assembly" => {
                let objects = descriptor
                    .get("objects")
                    .and_then(Json::as_array)
                    .cloned()
                    .unwrap_or_default();
                for object in &objects {
                    let publish = object
                        .get("publish")
                        .or_else(|| object.get("id"))
                        .and_then(Json::as_str)
                        .unwrap_or_default();
                    let child = entry.child(publish);
                    if let Err(error) = self.apply_descriptor(&child, object) {
                        child.set_error(error);
                    }
                }
                for child in entry.children() {
                    if child.state() == ModuleState::Pending {
                        child.set_error(ModuleError::NotFound(child.id().to_string()));
                    }
                }
                if entry.state() == ModuleState::Pending {
                    entry.set_definition(definition_of(descriptor));
                    entry.set_data(Value::Null);
                }
                Ok(())
            }
            other => Err(ModuleError::UnknownModuleType {
                id: entry.id().to_string(),
                module_type: other.to_string(),
            }),
        }
    }
}

fn definition_of(descriptor: &Json) -> Schema {
    descriptor
        .get("definition")
        .cloned()
        .map(Schema::from)
        .unwrap_or_default()
}
