//! Resolving a core's `wit`/`wit_query`/`wit_update` node to a
//! callable handler.
//!
//! The node's blob body is a small DSL:
//!
//! - `external:<name>` — look up a handler pre-registered on the host.
//! - `external:<module>:<function>` — look up a function of a host
//!   native module.
//! - `/<tree-path>:<module>:<function>` — load `<module>` from the
//!   tree at `<tree-path>` inside the core via the in-core loader and
//!   take `<function>`.
//!
//! Anything else is reserved for inline source and rejected here.
//! Resolutions are cached by `(node content, code tree id)`, so a new
//! core version never reuses a stale handler.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use dashmap::DashMap;

// Layer 3: Internal module imports
use loam_grit::{Object, Tree, TreeId};
use loam_wit::{QueryFn, SharedStore, WitError, WitFn, WIT_NODE, WIT_QUERY_NODE, WIT_UPDATE_NODE};

use crate::error::RuntimeError;
pub(crate) use crate::loader::NativeModuleRegistry;
use crate::loader::{CoreLoader, MODULE_EXT};

/// The resolvable nodes of a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreNode {
    Wit,
    WitQuery,
    WitUpdate,
}

impl CoreNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoreNode::Wit => WIT_NODE,
            CoreNode::WitQuery => WIT_QUERY_NODE,
            CoreNode::WitUpdate => WIT_UPDATE_NODE,
        }
    }
}

/// Resolve core nodes to callable handlers.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve a wit-like node (`wit` or `wit_update`).
    ///
    /// Returns `Ok(None)` when the node is absent and not `required`;
    /// a missing required node is an invalid core.
    async fn resolve_wit(
        &self,
        core_id: TreeId,
        node: CoreNode,
        required: bool,
    ) -> Result<Option<WitFn>, RuntimeError>;

    /// Resolve the `wit_query` node; `Ok(None)` when absent.
    async fn resolve_query(&self, core_id: TreeId) -> Result<Option<QueryFn>, RuntimeError>;
}

/// A host-registered handler pair (either side may be absent).
#[derive(Clone, Default)]
pub struct RegisteredHandler {
    pub wit: Option<WitFn>,
    pub query: Option<QueryFn>,
}

/// Registry behind `external:<name>` references.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<String, RegisteredHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or extend) the wit side of a name.
    pub fn register_wit(&self, name: &str, wit: WitFn) {
        self.handlers.entry(name.to_string()).or_default().wit = Some(wit);
    }

    /// Register (or extend) the query side of a name.
    pub fn register_query(&self, name: &str, query: QueryFn) {
        self.handlers.entry(name.to_string()).or_default().query = Some(query);
    }

    pub fn get(&self, name: &str) -> Option<RegisteredHandler> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }
}

/// The node content, parsed.
enum NodeRef<'a> {
    /// `external:<name>`
    External(&'a str),
    /// `external:<module>:<function>`
    ExternalModule { module: &'a str, function: &'a str },
    /// `/<tree-path>:<module>:<function>`
    InCore {
        path: &'a str,
        module: &'a str,
        function: &'a str,
    },
}

fn parse_node_ref(content: &str) -> Result<NodeRef<'_>, WitError> {
    if let Some(rest) = content.strip_prefix("external:") {
        return match rest.split_once(':') {
            None => Ok(NodeRef::External(rest.trim())),
            Some((module, function)) => Ok(NodeRef::ExternalModule {
                module: module.trim(),
                function: function.trim(),
            }),
        };
    }
    if content.starts_with('/') {
        let parts: Vec<&str> = content.split(':').collect();
        if parts.len() != 3 {
            return Err(WitError::InvalidCore(format!(
                "expected '/path:module:function', got '{content}'"
            )));
        }
        return Ok(NodeRef::InCore {
            path: parts[0].trim(),
            module: parts[1].trim(),
            function: parts[2].trim(),
        });
    }
    Err(WitError::InvalidCore(format!(
        "unsupported handler reference '{content}'"
    )))
}

/// Loads the node blob and validates the core along the way.
async fn load_node_content(
    store: &SharedStore,
    core_id: TreeId,
    node: &str,
    required: bool,
) -> Result<Option<String>, WitError> {
    let core = store
        .load(core_id)
        .await?
        .ok_or(WitError::MissingObject(core_id))?;
    let core = core
        .into_tree()
        .ok_or_else(|| WitError::InvalidCore(format!("core {core_id} is not a tree")))?;
    let Some(node_id) = core.get(node).copied() else {
        if required {
            return Err(WitError::InvalidCore(format!("core is missing '{node}'")));
        }
        return Ok(None);
    };
    let blob = store
        .load(node_id)
        .await?
        .ok_or(WitError::MissingObject(node_id))?;
    let blob = blob
        .into_blob()
        .ok_or_else(|| WitError::InvalidCore(format!("core '/{node}' must be a string blob")))?;
    let content = String::from_utf8(blob.data)
        .map_err(|_| WitError::InvalidCore(format!("core '/{node}' is not utf-8")))?;
    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(WitError::InvalidCore(format!("core '/{node}' is empty")));
    }
    Ok(Some(content))
}

/// Walk a `/a/b/c` path of trees inside the core, returning the tree
/// id at the end of the path (sync, for the loader's benefit).
fn resolve_code_tree(store: &SharedStore, core_id: TreeId, path: &str) -> Result<TreeId, WitError> {
    let mut current_id = core_id;
    for part in path.split('/').filter(|p| !p.is_empty()) {
        let tree = load_tree_sync(store, current_id, path)?;
        current_id = tree
            .get(part)
            .or_else(|| tree.get(&format!("{part}{MODULE_EXT}")))
            .copied()
            .ok_or_else(|| {
                WitError::InvalidCore(format!("code path '{path}' not found in core"))
            })?;
    }
    // the end of the path must itself be a code tree
    load_tree_sync(store, current_id, path)?;
    Ok(current_id)
}

fn load_tree_sync(store: &SharedStore, id: TreeId, path: &str) -> Result<Tree, WitError> {
    match store.load_sync(id)? {
        Some(Object::Tree(tree)) => Ok(tree),
        _ => Err(WitError::InvalidCore(format!(
            "code path '{path}' does not lead to a tree"
        ))),
    }
}

/// Resolves `external:` references through host registries.
pub struct ExternalResolver {
    registry: HandlerRegistry,
    modules: NativeModuleRegistry,
}

impl ExternalResolver {
    pub fn new(registry: HandlerRegistry, modules: NativeModuleRegistry) -> Self {
        Self { registry, modules }
    }

    fn lookup(&self, content: &str) -> Result<RegisteredHandler, WitError> {
        match parse_node_ref(content)? {
            NodeRef::External(name) => self.registry.get(name).ok_or_else(|| {
                WitError::InvalidCore(format!(
                    "no handler registered as '{name}'; register it on the resolver"
                ))
            }),
            NodeRef::ExternalModule { module, function } => {
                let functions = self.modules.get(module).ok_or_else(|| {
                    WitError::InvalidCore(format!("no host module registered as '{module}'"))
                })?;
                Ok(RegisteredHandler {
                    wit: functions.wit(function),
                    query: functions.query(function),
                })
            }
            NodeRef::InCore { .. } => Err(WitError::InvalidCore(
                "in-core reference routed to the external resolver".to_string(),
            )),
        }
    }
}

/// Resolves `/<path>:<module>:<function>` references via the in-core
/// loader.
pub struct CoreResolver {
    store: SharedStore,
    loader: Arc<CoreLoader>,
    cache: DashMap<String, RegisteredHandler>,
}

impl CoreResolver {
    pub fn new(store: SharedStore, loader: Arc<CoreLoader>) -> Self {
        Self {
            store,
            loader,
            cache: DashMap::new(),
        }
    }

    fn lookup(&self, core_id: TreeId, content: &str) -> Result<RegisteredHandler, WitError> {
        let NodeRef::InCore {
            path,
            module,
            function,
        } = parse_node_ref(content)?
        else {
            return Err(WitError::InvalidCore(
                "external reference routed to the core resolver".to_string(),
            ));
        };
        let code_tree_id = resolve_code_tree(&self.store, core_id, path)?;
        let cache_key = format!("{content}-{code_tree_id}");
        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(cached.value().clone());
        }

        let fullname = format!("{code_tree_id}.{}", module.trim_start_matches('.'));
        let loaded = self
            .loader
            .import(&fullname)
            .map_err(|err| WitError::InvalidCore(err.to_string()))?;
        let handler = RegisteredHandler {
            wit: loaded.wit_fn(function).ok(),
            query: loaded.query_fn(function).ok(),
        };
        if handler.wit.is_none() && handler.query.is_none() {
            return Err(WitError::InvalidCore(format!(
                "cannot find function '{function}' in module '{fullname}'"
            )));
        }
        self.cache.insert(cache_key, handler.clone());
        Ok(handler)
    }
}

/// Dispatches between the external and in-core resolvers on the node
/// content's shape.
pub struct MetaResolver {
    store: SharedStore,
    external: ExternalResolver,
    core: CoreResolver,
}

impl MetaResolver {
    pub fn new(store: SharedStore, external: ExternalResolver, core: CoreResolver) -> Self {
        Self {
            store,
            external,
            core,
        }
    }

    /// A resolver with fresh registries over `store`; returns the
    /// registries so hosts can populate them.
    pub fn with_registries(store: SharedStore) -> (Self, HandlerRegistry, NativeModuleRegistry) {
        let registry = HandlerRegistry::new();
        let (loader, modules) = CoreLoader::with_native_engine(SharedStore::clone(&store));
        let resolver = Self::new(
            SharedStore::clone(&store),
            ExternalResolver::new(registry.clone(), modules.clone()),
            CoreResolver::new(SharedStore::clone(&store), Arc::new(loader)),
        );
        (resolver, registry, modules)
    }

    async fn resolve_handler(
        &self,
        core_id: TreeId,
        node: &str,
        required: bool,
    ) -> Result<Option<RegisteredHandler>, WitError> {
        let Some(content) = load_node_content(&self.store, core_id, node, required).await? else {
            return Ok(None);
        };
        let handler = if content.starts_with('/') {
            self.core.lookup(core_id, &content)?
        } else {
            self.external.lookup(&content)?
        };
        Ok(Some(handler))
    }
}

#[async_trait]
impl Resolver for MetaResolver {
    async fn resolve_wit(
        &self,
        core_id: TreeId,
        node: CoreNode,
        required: bool,
    ) -> Result<Option<WitFn>, RuntimeError> {
        let handler = self
            .resolve_handler(core_id, node.as_str(), required)
            .await?;
        match handler {
            None => Ok(None),
            Some(handler) => match handler.wit {
                Some(wit) => Ok(Some(wit)),
                None => Err(WitError::InvalidCore(format!(
                    "core '/{}' resolved, but not to a wit handler",
                    node.as_str()
                ))
                .into()),
            },
        }
    }

    async fn resolve_query(&self, core_id: TreeId) -> Result<Option<QueryFn>, RuntimeError> {
        let handler = self.resolve_handler(core_id, WIT_QUERY_NODE, false).await?;
        match handler {
            None => Ok(None),
            Some(handler) => match handler.query {
                Some(query) => Ok(Some(query)),
                None => Err(WitError::InvalidCore(format!(
                    "core '/{WIT_QUERY_NODE}' resolved, but not to a query handler"
                ))
                .into()),
            },
        }
    }
}
