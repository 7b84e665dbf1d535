/// Function registry with a lock-free in-memory view
///
/// Storage is the source of truth. The registry keeps an ArcSwap'd map of every
/// known registration so listings and name checks never block, and swaps the
/// whole map whenever a registration changes.

use crate::error::{PyflowError, Result};
use crate::function::callable::{HandlerTable, MaterializedFunction};
use crate::function::storage::FunctionStorage;
use crate::function::types::{Closure, Environment, RegisteredFunction, Signature};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Registry of named functions backed by the storage directory
#[derive(Debug)]
pub struct FunctionRegistry {
    /// Atomic pointer to the name -> registration map
    functions: ArcSwap<HashMap<String, RegisteredFunction>>,

    /// Persistent storage for registrations and executions
    storage: FunctionStorage,

    /// Native handlers linked into this process
    handlers: HandlerTable,
}

impl FunctionRegistry {
    /// Create new registry instance with storage backend and native handlers
    pub fn new(storage: FunctionStorage, handlers: HandlerTable) -> Self {
        Self {
            functions: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
            handlers,
        }
    }

    pub fn storage(&self) -> &FunctionStorage {
        &self.storage
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Initialize registry by loading all functions from storage
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all_functions().await?;
        self.functions.store(Arc::new(stored));

        tracing::info!("Initialized function registry with {} functions",
            self.functions.load().len());

        Ok(())
    }

    /// Register (or re-register) a function with the default environment
    pub async fn register(
        &self,
        name: &str,
        source: &str,
        signature: Signature,
        closure: Closure,
    ) -> Result<RegisteredFunction> {
        self.register_with(name, source, signature, closure, Environment::default())
            .await
    }

    /// Register (or re-register) a function
    ///
    /// Computes the source hash and persists the metadata, including the
    /// environment used for container runs, under `functions/{name}`.
    /// An existing registration with the same name is overwritten.
    pub async fn register_with(
        &self,
        name: &str,
        source: &str,
        signature: Signature,
        closure: Closure,
        environment: Environment,
    ) -> Result<RegisteredFunction> {
        validate_name(name)?;
        signature.validate(name)?;

        let function =
            RegisteredFunction::new(name, source, signature, closure).with_environment(environment);
        self.storage.save_function(&function).await?;

        let replaced = self.insert_cached(function.clone());
        tracing::info!("Registered function '{}{}' (sha256 {}){}",
            name,
            function.signature,
            function.short_hash(),
            if replaced { ", replacing previous registration" } else { "" });

        Ok(function)
    }

    /// Look up a function, reading storage and refreshing the cached copy
    pub async fn lookup(&self, name: &str) -> Result<RegisteredFunction> {
        validate_name(name)?;
        match self.storage.get_function(name).await {
            Ok(function) => {
                self.insert_cached(function.clone());
                Ok(function)
            }
            Err(e) => {
                self.remove_cached(name);
                Err(e)
            }
        }
    }

    /// Cached registration (lock-free, no I/O)
    pub fn get(&self, name: &str) -> Option<RegisteredFunction> {
        self.functions.load().get(name).cloned()
    }

    /// All cached registrations sorted by name
    pub fn list(&self) -> Vec<RegisteredFunction> {
        let mut functions: Vec<_> = self.functions.load().values().cloned().collect();
        functions.sort_by(|a, b| a.name.cmp(&b.name));
        functions
    }

    /// Rebuild an invocable function from its persisted registration
    pub async fn materialize(&self, name: &str) -> Result<MaterializedFunction> {
        let function = self.lookup(name).await?;
        let materialized = MaterializedFunction::build(function, &self.handlers)?;
        tracing::debug!("Materialized function: {}", name);
        Ok(materialized)
    }

    /// Insert into the cached map; returns whether a previous entry existed
    fn insert_cached(&self, function: RegisteredFunction) -> bool {
        let current = self.functions.load();
        let mut next = (**current).clone();
        let replaced = next.insert(function.name.clone(), function).is_some();
        self.functions.store(Arc::new(next));
        replaced
    }

    fn remove_cached(&self, name: &str) {
        let current = self.functions.load();
        if current.contains_key(name) {
            let mut next = (**current).clone();
            next.remove(name);
            self.functions.store(Arc::new(next));
        }
    }
}

/// Names are directory names, so they must be one plain path component
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(PyflowError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::types::{BoundArgs, ContainerImage, Parameter, Resources};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn double(args: &BoundArgs) -> anyhow::Result<Value> {
        Ok(json!(args.i64("x")? * 2))
    }

    fn triple(args: &BoundArgs) -> anyhow::Result<Value> {
        Ok(json!(args.i64("x")? * 3))
    }

    fn registry(root: &std::path::Path) -> FunctionRegistry {
        let handlers = HandlerTable::new().with("double", double).with("triple", triple);
        FunctionRegistry::new(FunctionStorage::new(root), handlers)
    }

    #[tokio::test]
    async fn reregistration_overwrites() {
        let tmp = tempfile::TempDir::new().unwrap();
        let registry = registry(tmp.path());
        let sig = Signature::positional(["x"]);

        let first = registry.register("scale", "x * 2", sig.clone(), Closure::native("double")).await.unwrap();
        let second = registry.register("scale", "x * 3", sig, Closure::native("triple")).await.unwrap();
        assert_ne!(first.source_hash, second.source_hash);

        let scale = registry.materialize("scale").await.unwrap();
        assert_eq!(scale.invoke(vec![json!(4)], BTreeMap::new()).unwrap(), json!(12));
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn init_from_storage_sees_other_instances() {
        let tmp = tempfile::TempDir::new().unwrap();
        registry(tmp.path())
            .register("scale", "x * 2", Signature::positional(["x"]), Closure::native("double"))
            .await
            .unwrap();

        let fresh = registry(tmp.path());
        assert!(fresh.get("scale").is_none());
        fresh.init_from_storage().await.unwrap();
        assert_eq!(fresh.get("scale").unwrap().source, "x * 2");
    }

    #[tokio::test]
    async fn lookup_unknown_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let registry = registry(tmp.path());
        assert!(matches!(registry.lookup("nope").await, Err(PyflowError::NotFound(_))));
        assert!(matches!(registry.materialize("nope").await, Err(PyflowError::NotFound(_))));
    }

    #[tokio::test]
    async fn duplicate_parameters_are_not_registered() {
        let tmp = tempfile::TempDir::new().unwrap();
        let registry = registry(tmp.path());
        let sig = Signature::new(vec![Parameter::positional("x"), Parameter::keyword("x", json!(1))]);

        let err = registry.register("scale", "x * 2", sig, Closure::native("double")).await.unwrap_err();
        assert!(matches!(err, PyflowError::SignatureMismatch { .. }));
        assert!(!tmp.path().join("functions/scale").exists());
        assert!(registry.get("scale").is_none());
    }

    #[tokio::test]
    async fn environment_is_persisted_with_the_registration() {
        let tmp = tempfile::TempDir::new().unwrap();
        let environment = Environment {
            container: Some(ContainerImage::new("pyflow/scale", "v2")),
            resources: Resources { cpu: Some("2".to_string()), mem: Some("512m".to_string()) },
            ..Environment::default()
        };
        registry(tmp.path())
            .register_with("scale", "x * 2", Signature::positional(["x"]), Closure::native("double"), environment.clone())
            .await
            .unwrap();

        let stored = registry(tmp.path()).lookup("scale").await.unwrap();
        assert_eq!(stored.environment, environment);
    }

    #[test]
    fn rejects_path_like_names() {
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(matches!(validate_name(bad), Err(PyflowError::InvalidName(_))), "{bad:?}");
        }
        assert!(validate_name("step_1").is_ok());
    }
}
