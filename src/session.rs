/// Session: the context object for registering, deferring and running calls
///
/// A session owns the function registry and the execution queue for one run.
/// Deferring only validates and queues; nothing executes, logs or writes to
/// storage until `run_all` drains the queue.

use crate::{
    config::Config,
    error::Result,
    function::{
        callable::{HandlerTable, MaterializedFunction},
        registry::FunctionRegistry,
        storage::FunctionStorage,
        types::{Closure, Environment, RegisteredFunction, Signature},
    },
    runtime::{
        container::ContainerLauncher,
        journal::ExecutionJournal,
        placeholder::{Argument, OutputPlaceholder},
        runner::{ExecutionMode, FailurePolicy, RunSummary, Runner},
        stub::{CallStub, ExecutionQueue},
    },
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct Session {
    config: Config,
    registry: Arc<FunctionRegistry>,
    queue: ExecutionQueue,
}

impl Session {
    /// Open a session over the configured storage root
    ///
    /// Loads every existing registration; performs no writes.
    pub async fn open(config: Config, handlers: HandlerTable) -> Result<Self> {
        let storage = FunctionStorage::new(&config.storage.root);
        let registry = Arc::new(FunctionRegistry::new(storage, handlers));
        registry.init_from_storage().await?;

        Ok(Self {
            config,
            registry,
            queue: ExecutionQueue::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &FunctionStorage {
        self.registry.storage()
    }

    /// Stubs waiting for the next run
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    /// Register (or overwrite) a function
    pub async fn register(
        &self,
        name: &str,
        source: &str,
        signature: Signature,
        closure: Closure,
    ) -> Result<RegisteredFunction> {
        self.registry.register(name, source, signature, closure).await
    }

    /// Register (or overwrite) a function with its container environment
    pub async fn register_with(
        &self,
        name: &str,
        source: &str,
        signature: Signature,
        closure: Closure,
        environment: Environment,
    ) -> Result<RegisteredFunction> {
        self.registry
            .register_with(name, source, signature, closure, environment)
            .await
    }

    pub async fn lookup(&self, name: &str) -> Result<RegisteredFunction> {
        self.registry.lookup(name).await
    }

    pub async fn materialize(&self, name: &str) -> Result<MaterializedFunction> {
        self.registry.materialize(name).await
    }

    /// Record a call without running it
    ///
    /// Fails with `NotFound` for unknown functions and `SignatureMismatch` when the
    /// call shape does not fit the declared parameters. The returned placeholder
    /// can be passed as an argument to later `defer` calls.
    pub async fn defer(
        &mut self,
        function_name: &str,
        args: Vec<Argument>,
        kwargs: BTreeMap<String, Argument>,
    ) -> Result<OutputPlaceholder> {
        let function = self.registry.lookup(function_name).await?;
        function
            .signature
            .check(function_name, args.len(), kwargs.keys().map(String::as_str))?;

        Ok(self.queue.push(CallStub::new(function_name, args, kwargs)))
    }

    /// Drain the queue and run every stub in insertion order
    ///
    /// Per-stub failures are reported in the summary; an error here means the run
    /// could not start (e.g., the journal could not be opened).
    pub async fn run_all(&mut self) -> Result<RunSummary> {
        let runner = self.runner().await?;
        let queue = std::mem::take(&mut self.queue);
        Ok(runner.run_all(queue).await)
    }

    /// Read the output of a completed call
    pub async fn resolve(&self, placeholder: &OutputPlaceholder) -> Result<Value> {
        placeholder.resolve(self.registry.storage()).await
    }

    /// Runner configured from this session's settings
    pub async fn runner(&self) -> Result<Runner> {
        let policy = if self.config.runner.fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::Continue
        };
        let mode = if self.config.container.enabled {
            ExecutionMode::Container(ContainerLauncher::new(
                &self.config.container,
                &self.config.storage.root,
            ))
        } else {
            ExecutionMode::InProcess
        };

        let mut runner = Runner::new(Arc::clone(&self.registry))
            .with_policy(policy)
            .with_mode(mode);
        if self.config.runner.journal {
            let path = self.config.storage.root.join("journal.db");
            let journal = ExecutionJournal::open(&path).await.map_err(|e| {
                tracing::error!("Failed to open execution journal {}: {}", path.display(), e);
                e
            })?;
            runner = runner.with_journal(journal);
        }
        Ok(runner)
    }
}
