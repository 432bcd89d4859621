//! The in-core code loader: content-addressed trees as a module
//! namespace.
//!
//! A fully-qualified module name is `<hex tree id>[.<sub>...]`. The
//! tree-id prefix is the root package; each following part maps to a
//! child tree (a package) or a `<part>.mod` blob (a module). A tree
//! with an `__init__`/`__init__.mod` blob is a *regular* package whose
//! init blob is compiled; a tree without one is a *namespace* package
//! (just a search location, no code).
//!
//! While a module is being compiled, its owning tree id sits on the
//! loader's executing-context stack; a bare (absolute) name import
//! consults that stack, so code inside a core can reach sibling
//! modules without knowing their tree id.
//!
//! Compiled modules are cached by fully-qualified name, so two
//! versions of a core get distinct module identities and never
//! contaminate each other.
//!
//! What a module blob *means* is the [`CodeEngine`]'s business. The
//! engine shipped here resolves `native:<name>` descriptors against a
//! registry of host-provided modules; a sandboxed bytecode engine
//! would slot into the same seam.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::Mutex;

// Layer 3: Internal module imports
use loam_grit::{is_object_id_str, Blob, Object, ObjectId, Tree, TreeId};
use loam_wit::{QueryFn, SharedStore, WitFn};

use crate::error::ImportError;

/// Extension of module blobs inside code trees.
pub const MODULE_EXT: &str = ".mod";

/// Names marking a tree as a regular package.
pub const INIT_NAMES: [&str; 2] = ["__init__", "__init__.mod"];

/// The functions a materialized module exposes.
#[derive(Default)]
pub struct ModuleFunctions {
    wits: HashMap<String, WitFn>,
    queries: HashMap<String, QueryFn>,
}

impl ModuleFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wit(mut self, name: &str, wit: WitFn) -> Self {
        self.wits.insert(name.to_string(), wit);
        self
    }

    pub fn with_query(mut self, name: &str, query: QueryFn) -> Self {
        self.queries.insert(name.to_string(), query);
        self
    }

    pub fn wit(&self, name: &str) -> Option<WitFn> {
        self.wits.get(name).cloned()
    }

    pub fn query(&self, name: &str) -> Option<QueryFn> {
        self.queries.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.wits.is_empty() && self.queries.is_empty()
    }
}

/// Host registry of native modules, addressed by `native:<name>`
/// descriptors inside code blobs.
#[derive(Clone, Default)]
pub struct NativeModuleRegistry {
    modules: Arc<DashMap<String, Arc<ModuleFunctions>>>,
}

impl NativeModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, functions: ModuleFunctions) {
        self.modules.insert(name.to_string(), Arc::new(functions));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModuleFunctions>> {
        self.modules
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
    }
}

/// Materializes module blobs into callable functions.
///
/// `compile` runs with the owning tree id already on the loader's
/// executing-context stack, so an engine may call back into
/// [`CoreLoader::import_bare`] for sibling imports.
pub trait CodeEngine: Send + Sync {
    fn compile(
        &self,
        fullname: &str,
        source: &Blob,
        loader: &CoreLoader,
    ) -> Result<Arc<ModuleFunctions>, ImportError>;
}

/// The shipped engine: module blobs carry `native:<registered name>`.
pub struct NativeCodeEngine {
    registry: NativeModuleRegistry,
}

impl NativeCodeEngine {
    pub fn new(registry: NativeModuleRegistry) -> Self {
        Self { registry }
    }
}

impl CodeEngine for NativeCodeEngine {
    fn compile(
        &self,
        fullname: &str,
        source: &Blob,
        _loader: &CoreLoader,
    ) -> Result<Arc<ModuleFunctions>, ImportError> {
        let text = std::str::from_utf8(&source.data).map_err(|_| ImportError::Engine {
            name: fullname.to_string(),
            reason: "module blob is not utf-8".to_string(),
        })?;
        let descriptor = text.trim();
        let native_name =
            descriptor
                .strip_prefix("native:")
                .ok_or_else(|| ImportError::Engine {
                    name: fullname.to_string(),
                    reason: format!("expected a 'native:<name>' descriptor, got '{descriptor}'"),
                })?;
        self.registry
            .get(native_name.trim())
            .ok_or_else(|| ImportError::Engine {
                name: fullname.to_string(),
                reason: format!("no native module registered as '{native_name}'"),
            })
    }
}

/// A module materialized out of a content-addressed tree.
pub struct LoadedModule {
    pub fullname: String,
    /// The tree owning this module's code (the package tree itself,
    /// or the parent tree of a module blob).
    pub tree_id: TreeId,
    /// Namespace packages carry no code.
    pub is_namespace: bool,
    functions: Arc<ModuleFunctions>,
}

impl LoadedModule {
    pub fn wit_fn(&self, name: &str) -> Result<WitFn, ImportError> {
        self.functions
            .wit(name)
            .ok_or_else(|| ImportError::FunctionNotFound {
                module: self.fullname.clone(),
                function: name.to_string(),
            })
    }

    pub fn query_fn(&self, name: &str) -> Result<QueryFn, ImportError> {
        self.functions
            .query(name)
            .ok_or_else(|| ImportError::FunctionNotFound {
                module: self.fullname.clone(),
                function: name.to_string(),
            })
    }
}

/// The loader itself. One per runtime; no process-wide state.
pub struct CoreLoader {
    store: SharedStore,
    engine: Arc<dyn CodeEngine>,
    modules: DashMap<String, Arc<LoadedModule>>,
    contexts: Mutex<Vec<TreeId>>,
}

impl CoreLoader {
    pub fn new(store: SharedStore, engine: Arc<dyn CodeEngine>) -> Self {
        Self {
            store,
            engine,
            modules: DashMap::new(),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// A loader over the native engine, returning the registry to
    /// populate.
    pub fn with_native_engine(store: SharedStore) -> (Self, NativeModuleRegistry) {
        let registry = NativeModuleRegistry::new();
        let loader = Self::new(store, Arc::new(NativeCodeEngine::new(registry.clone())));
        (loader, registry)
    }

    /// Import a fully-qualified module: `<hex tree id>[.<sub>...]`.
    pub fn import(&self, fullname: &str) -> Result<Arc<LoadedModule>, ImportError> {
        if let Some(module) = self.modules.get(fullname) {
            return Ok(Arc::clone(module.value()));
        }

        let parts: Vec<&str> = fullname.split('.').map(str::trim).collect();
        let Some((first, sub_parts)) = parts.split_first() else {
            return Err(ImportError::InvalidName(fullname.to_string()));
        };
        if !is_object_id_str(first) {
            return Err(ImportError::InvalidName(fullname.to_string()));
        }
        let root_id = ObjectId::from_hex(first)
            .map_err(|_| ImportError::InvalidName(fullname.to_string()))?;

        // walk the tree down to the named object
        let mut parent_id = root_id;
        let mut current = ModulePathEntry::Tree(root_id, self.load_tree(root_id, fullname)?);
        for part in sub_parts {
            let ModulePathEntry::Tree(tree_id, ref tree) = current else {
                // descended into a blob but the name continues
                return Err(ImportError::NotFound(fullname.to_string()));
            };
            parent_id = tree_id;
            let child_id = lookup_child(tree, part)
                .ok_or_else(|| ImportError::NotFound(fullname.to_string()))?;
            current = self.load_entry(child_id, fullname)?;
        }

        let module = match current {
            ModulePathEntry::Tree(tree_id, tree) => {
                match init_blob_id(&tree) {
                    Some(init_id) => {
                        // regular package: compile its init blob
                        let init = self.load_blob(init_id, fullname)?;
                        let functions = self.compile_in_context(fullname, tree_id, &init)?;
                        LoadedModule {
                            fullname: fullname.to_string(),
                            tree_id,
                            is_namespace: false,
                            functions,
                        }
                    }
                    None => LoadedModule {
                        fullname: fullname.to_string(),
                        tree_id,
                        is_namespace: true,
                        functions: Arc::new(ModuleFunctions::default()),
                    },
                }
            }
            ModulePathEntry::Blob(_, blob) => {
                let functions = self.compile_in_context(fullname, parent_id, &blob)?;
                LoadedModule {
                    fullname: fullname.to_string(),
                    tree_id: parent_id,
                    is_namespace: false,
                    functions,
                }
            }
        };

        let module = Arc::new(module);
        self.modules
            .insert(fullname.to_string(), Arc::clone(&module));
        Ok(module)
    }

    /// Import by bare name, consulting the executing-context stack
    /// (most recent context first).
    pub fn import_bare(&self, name: &str) -> Result<Arc<LoadedModule>, ImportError> {
        let contexts: Vec<TreeId> = {
            let stack = self.contexts.lock();
            let mut seen = Vec::new();
            for tree_id in stack.iter().rev() {
                if !seen.contains(tree_id) {
                    seen.push(*tree_id);
                }
            }
            seen
        };
        for tree_id in contexts {
            let Ok(tree) = self.load_tree(tree_id, name) else {
                continue;
            };
            if lookup_child(&tree, name).is_some() {
                return self.import(&format!("{tree_id}.{name}"));
            }
        }
        Err(ImportError::NotFound(name.to_string()))
    }

    /// Run `f` with `tree_id` on the executing-context stack. Engines
    /// use this implicitly through `compile`; exposed for engines that
    /// trigger work outside `compile` itself.
    pub fn with_context<R>(&self, tree_id: TreeId, f: impl FnOnce() -> R) -> R {
        self.contexts.lock().push(tree_id);
        let result = f();
        self.contexts.lock().pop();
        result
    }

    fn compile_in_context(
        &self,
        fullname: &str,
        tree_id: TreeId,
        source: &Blob,
    ) -> Result<Arc<ModuleFunctions>, ImportError> {
        self.contexts.lock().push(tree_id);
        let result = self.engine.compile(fullname, source, self);
        self.contexts.lock().pop();
        result
    }

    fn load_entry(&self, id: ObjectId, fullname: &str) -> Result<ModulePathEntry, ImportError> {
        match self.store.load_sync(id)? {
            Some(Object::Tree(tree)) => Ok(ModulePathEntry::Tree(id, tree)),
            Some(Object::Blob(blob)) => Ok(ModulePathEntry::Blob(id, blob)),
            Some(_) => Err(ImportError::NotABlob(fullname.to_string())),
            None => Err(ImportError::NotFound(fullname.to_string())),
        }
    }

    fn load_tree(&self, id: TreeId, fullname: &str) -> Result<Tree, ImportError> {
        match self.store.load_sync(id)? {
            Some(Object::Tree(tree)) => Ok(tree),
            Some(_) => Err(ImportError::NotFound(fullname.to_string())),
            None => Err(ImportError::NotFound(fullname.to_string())),
        }
    }

    fn load_blob(&self, id: ObjectId, fullname: &str) -> Result<Blob, ImportError> {
        match self.store.load_sync(id)? {
            Some(Object::Blob(blob)) => Ok(blob),
            Some(_) => Err(ImportError::NotABlob(fullname.to_string())),
            None => Err(ImportError::NotFound(fullname.to_string())),
        }
    }
}

enum ModulePathEntry {
    Tree(TreeId, Tree),
    Blob(ObjectId, Blob),
}

/// Find a sub-part as a child tree or `<part>.mod` blob.
fn lookup_child(tree: &Tree, part: &str) -> Option<ObjectId> {
    tree.get(part)
        .or_else(|| tree.get(&format!("{part}{MODULE_EXT}")))
        .copied()
}

fn init_blob_id(tree: &Tree) -> Option<ObjectId> {
    INIT_NAMES.iter().find_map(|name| tree.get(*name).copied())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use loam_grit::MemoryObjectStore;
    use loam_wit::{TreeObject, WitContext, WitInput};

    use super::*;

    fn noop_wit() -> WitFn {
        Arc::new(|_input: WitInput, _ctx: WitContext| {
            Box::pin(async move { Err(loam_wit::WitError::Handler("noop".to_string())) })
        })
    }

    async fn build_code_tree(store: &SharedStore) -> TreeId {
        let mut code = TreeObject::new_empty();
        code.makeb_path("main.mod")
            .await
            .unwrap()
            .set_as_str("native:main-mod");
        code.makeb_path("pkg/__init__.mod")
            .await
            .unwrap()
            .set_as_str("native:pkg-mod");
        code.makeb_path("ns/inner.mod")
            .await
            .unwrap()
            .set_as_str("native:inner-mod");
        code.persist(store).await.unwrap()
    }

    fn loader_with_modules(store: SharedStore) -> (CoreLoader, NativeModuleRegistry) {
        let (loader, registry) = CoreLoader::with_native_engine(store);
        registry.register(
            "main-mod",
            ModuleFunctions::new().with_wit("run", noop_wit()),
        );
        registry.register(
            "pkg-mod",
            ModuleFunctions::new().with_wit("init_run", noop_wit()),
        );
        registry.register(
            "inner-mod",
            ModuleFunctions::new().with_wit("run", noop_wit()),
        );
        (loader, registry)
    }

    #[tokio::test]
    async fn test_import_module_blob() {
        let store: SharedStore = Arc::new(MemoryObjectStore::new());
        let code_id = build_code_tree(&store).await;
        let (loader, _registry) = loader_with_modules(SharedStore::clone(&store));

        let module = loader.import(&format!("{code_id}.main")).unwrap();
        assert!(!module.is_namespace);
        assert_eq!(module.tree_id, code_id);
        assert!(module.wit_fn("run").is_ok());
        assert!(matches!(
            module.wit_fn("missing"),
            Err(ImportError::FunctionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_regular_vs_namespace_package() {
        let store: SharedStore = Arc::new(MemoryObjectStore::new());
        let code_id = build_code_tree(&store).await;
        let (loader, _registry) = loader_with_modules(SharedStore::clone(&store));

        // pkg has __init__.mod: regular package with the init's code
        let pkg = loader.import(&format!("{code_id}.pkg")).unwrap();
        assert!(!pkg.is_namespace);
        assert!(pkg.wit_fn("init_run").is_ok());

        // ns has no init: namespace package, search location only
        let ns = loader.import(&format!("{code_id}.ns")).unwrap();
        assert!(ns.is_namespace);
        assert!(ns.wit_fn("run").is_err());

        // but its inner module is importable
        let inner = loader.import(&format!("{code_id}.ns.inner")).unwrap();
        assert!(inner.wit_fn("run").is_ok());
    }

    #[tokio::test]
    async fn test_import_caches_by_fullname() {
        let store: SharedStore = Arc::new(MemoryObjectStore::new());
        let code_id = build_code_tree(&store).await;
        let (loader, _registry) = loader_with_modules(SharedStore::clone(&store));

        let first = loader.import(&format!("{code_id}.main")).unwrap();
        let second = loader.import(&format!("{code_id}.main")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_distinct_trees_distinct_modules() {
        let store: SharedStore = Arc::new(MemoryObjectStore::new());
        let code_a = build_code_tree(&store).await;

        let mut other = TreeObject::new_empty();
        other
            .makeb_path("main.mod")
            .await
            .unwrap()
            .set_as_str("native:main-mod");
        other
            .makeb_path("extra.mod")
            .await
            .unwrap()
            .set_as_str("native:main-mod");
        let code_b = other.persist(&store).await.unwrap();
        assert_ne!(code_a, code_b);

        let (loader, _registry) = loader_with_modules(SharedStore::clone(&store));
        let a = loader.import(&format!("{code_a}.main")).unwrap();
        let b = loader.import(&format!("{code_b}.main")).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a.fullname, b.fullname);
    }

    #[tokio::test]
    async fn test_bare_import_uses_executing_context() {
        let store: SharedStore = Arc::new(MemoryObjectStore::new());
        let code_id = build_code_tree(&store).await;
        let (loader, _registry) = loader_with_modules(SharedStore::clone(&store));

        // outside any context the bare name resolves nowhere
        assert!(matches!(
            loader.import_bare("main"),
            Err(ImportError::NotFound(_))
        ));

        // inside the tree's context the sibling is found
        let module = loader
            .with_context(code_id, || loader.import_bare("main"))
            .unwrap();
        assert_eq!(module.fullname, format!("{code_id}.main"));
    }

    #[tokio::test]
    async fn test_unresolved_paths_are_import_errors() {
        let store: SharedStore = Arc::new(MemoryObjectStore::new());
        let code_id = build_code_tree(&store).await;
        let (loader, _registry) = loader_with_modules(SharedStore::clone(&store));

        assert!(matches!(
            loader.import(&format!("{code_id}.nothing")),
            Err(ImportError::NotFound(_))
        ));
        assert!(matches!(
            loader.import("not-a-tree-id.main"),
            Err(ImportError::InvalidName(_))
        ));
        // descending through a blob is unresolvable
        assert!(matches!(
            loader.import(&format!("{code_id}.main.deeper")),
            Err(ImportError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unregistered_native_module_fails() {
        let store: SharedStore = Arc::new(MemoryObjectStore::new());
        let mut code = TreeObject::new_empty();
        code.makeb_path("ghost.mod")
            .await
            .unwrap()
            .set_as_str("native:not-registered");
        let code_id = code.persist(&store).await.unwrap();

        let (loader, _registry) = CoreLoader::with_native_engine(store);
        assert!(matches!(
            loader.import(&format!("{code_id}.ghost")),
            Err(ImportError::Engine { .. })
        ));
    }
}
