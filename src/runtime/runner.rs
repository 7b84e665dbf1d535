/// Sequential runner for a drained execution queue
///
/// Executes stubs strictly in insertion order on the calling task. For each stub it
/// persists the call record, resolves placeholder arguments from storage,
/// materializes the function, invokes it synchronously and persists the result.
/// A failed stub is recorded and, by default, the run continues; stubs that read
/// a failed stub's output are marked failed without being invoked.

use crate::error::{PyflowError, Result};
use crate::function::registry::FunctionRegistry;
use crate::runtime::container::ContainerLauncher;
use crate::runtime::graph::StubGraph;
use crate::runtime::journal::ExecutionJournal;
use crate::runtime::placeholder::ExecutionId;
use crate::runtime::stub::{CallStub, ExecutionQueue, StubState};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What to do when a stub fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Record the failure and keep running independent stubs
    #[default]
    Continue,
    /// Stop at the first failure; remaining stubs stay pending
    FailFast,
}

/// Where stubs are invoked
#[derive(Debug, Clone, Default)]
pub enum ExecutionMode {
    #[default]
    InProcess,
    Container(ContainerLauncher),
}

/// Runner over the function registry and its storage
#[derive(Debug)]
pub struct Runner {
    registry: Arc<FunctionRegistry>,
    journal: Option<ExecutionJournal>,
    policy: FailurePolicy,
    mode: ExecutionMode,
}

impl Runner {
    /// Create an in-process, continue-on-failure runner without a journal
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            journal: None,
            policy: FailurePolicy::default(),
            mode: ExecutionMode::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_journal(mut self, journal: ExecutionJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run every queued stub in insertion order
    pub async fn run_all(&self, queue: ExecutionQueue) -> RunSummary {
        let started = Instant::now();
        let mut stubs = queue.into_stubs();
        let graph = StubGraph::build(&stubs);
        let total = stubs.len();

        tracing::info!("🚀 Starting run of {} stubs", total);

        // queue position -> failed upstream execution
        let mut blocked: HashMap<usize, ExecutionId> = HashMap::new();
        let mut aborted = false;

        for position in 0..total {
            if let Some(upstream) = blocked.get(&position) {
                let stub = &mut stubs[position];
                tracing::warn!("⏭️ Step {}/{}: not running {}, upstream {} failed",
                    position + 1, total, stub, upstream);
                stub.state = StubState::Failed(PyflowError::UpstreamFailed {
                    function: stub.function_name.clone(),
                    execution_id: stub.execution_id.to_string(),
                    upstream: upstream.to_string(),
                });
                self.journal(stub).await;
                continue;
            }

            tracing::info!("📍 Step {}/{}: {}", position + 1, total, stubs[position]);
            self.run_stub(&mut stubs[position]).await;

            if let StubState::Failed(error) = &stubs[position].state {
                if self.policy == FailurePolicy::FailFast {
                    tracing::warn!("⏸️ Fail-fast: aborting run after {}, {} stubs left pending",
                        stubs[position], total - position - 1);
                    aborted = true;
                    break;
                }

                let downstream = graph.downstream(position);
                if !downstream.is_empty() {
                    tracing::debug!("{} dependent stubs will not run: {}", downstream.len(), error);
                }
                let upstream = stubs[position].execution_id.clone();
                for dependent in downstream {
                    blocked.entry(dependent).or_insert_with(|| upstream.clone());
                }
            }
        }

        let summary = RunSummary {
            stubs,
            aborted,
            elapsed: started.elapsed(),
        };
        tracing::info!("🎉 Run finished in {:?}: {} succeeded, {} failed, {} pending",
            summary.elapsed,
            summary.succeeded().count(),
            summary.failed().count(),
            summary.pending().count());
        summary
    }

    /// Run one stub through Pending -> Running -> {Succeeded, Failed}
    pub async fn run_stub(&self, stub: &mut CallStub) {
        stub.state = StubState::Running;
        self.journal(stub).await;

        let start = Instant::now();
        let outcome = match self.registry.storage().save_stub(stub).await {
            Ok(()) => match &self.mode {
                ExecutionMode::InProcess => self.invoke(stub).await,
                ExecutionMode::Container(launcher) => self.invoke_in_container(launcher, stub).await,
            },
            Err(e) => Err(e),
        };

        self.finish(stub, outcome, start.elapsed()).await;
    }

    /// Run a stub whose record was persisted by another process
    ///
    /// Used by the worker inside a container: always invokes in-process.
    pub async fn run_persisted(&self, function: &str, execution_id: &str) -> Result<CallStub> {
        let mut stub = self.registry.storage().load_stub(function, execution_id).await?;
        tracing::info!("📥 Loaded persisted stub {}", stub);

        stub.state = StubState::Running;
        self.journal(&stub).await;

        let start = Instant::now();
        let outcome = self.invoke(&stub).await;
        self.finish(&mut stub, outcome, start.elapsed()).await;
        Ok(stub)
    }

    async fn finish(&self, stub: &mut CallStub, outcome: Result<()>, elapsed: Duration) {
        stub.state = match outcome {
            Ok(()) => {
                tracing::info!("✅ {} completed in {:?}", stub, elapsed);
                StubState::Succeeded
            }
            Err(error) => {
                tracing::error!("❌ {} failed in {:?}: {}", stub, elapsed, error);
                StubState::Failed(error)
            }
        };
        self.journal(stub).await;
    }

    /// Resolve, materialize, invoke and persist in this process
    async fn invoke(&self, stub: &CallStub) -> Result<()> {
        let storage = self.registry.storage();

        let mut args = Vec::with_capacity(stub.arguments.len());
        for argument in &stub.arguments {
            args.push(argument.resolve(storage).await?);
        }
        let mut kwargs = BTreeMap::new();
        for (name, argument) in &stub.keyword_arguments {
            kwargs.insert(name.clone(), argument.resolve(storage).await?);
        }
        tracing::debug!("📥 Resolved arguments for {}: {:?} {:?}", stub, args, kwargs);

        let value = {
            let function = self.registry.materialize(&stub.function_name).await?;
            let bound = function.bind(args, kwargs)?;
            function.call(&bound)
        }
        .map_err(|source| PyflowError::ExecutionFailed {
            function: stub.function_name.clone(),
            execution_id: stub.execution_id.to_string(),
            source,
        })?;

        tracing::debug!("📤 Output of {}: {}", stub, value);
        storage.save_output(&stub.result_placeholder, &value).await
    }

    async fn invoke_in_container(&self, launcher: &ContainerLauncher, stub: &CallStub) -> Result<()> {
        let function = self.registry.lookup(&stub.function_name).await?;
        launcher
            .launch(stub, &function.environment)
            .await
            .map_err(|source| PyflowError::ExecutionFailed {
                function: stub.function_name.clone(),
                execution_id: stub.execution_id.to_string(),
                source,
            })?;

        // The container must have written the output through the shared mount
        if !self.registry.storage().has_output(&stub.result_placeholder).await? {
            return Err(PyflowError::NotReady {
                function: stub.function_name.clone(),
                execution_id: stub.execution_id.to_string(),
            });
        }
        Ok(())
    }

    async fn journal(&self, stub: &CallStub) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(stub).await {
                tracing::error!("Failed to journal {} ({}): {}", stub, stub.state.label(), e);
            }
        }
    }
}

/// Outcome of one run: every stub with its final state, in queue order
#[derive(Debug)]
pub struct RunSummary {
    stubs: Vec<CallStub>,
    aborted: bool,
    elapsed: Duration,
}

impl RunSummary {
    pub fn stubs(&self) -> &[CallStub] {
        &self.stubs
    }

    pub fn get(&self, execution_id: &ExecutionId) -> Option<&CallStub> {
        self.stubs.iter().find(|s| &s.execution_id == execution_id)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &CallStub> {
        self.stubs.iter().filter(|s| matches!(s.state, StubState::Succeeded))
    }

    pub fn failed(&self) -> impl Iterator<Item = &CallStub> {
        self.stubs.iter().filter(|s| matches!(s.state, StubState::Failed(_)))
    }

    /// Stubs never started because the run was aborted
    pub fn pending(&self) -> impl Iterator<Item = &CallStub> {
        self.stubs.iter().filter(|s| matches!(s.state, StubState::Pending))
    }

    pub fn is_success(&self) -> bool {
        self.stubs.iter().all(|s| matches!(s.state, StubState::Succeeded))
    }

    /// Whether a fail-fast run stopped early
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The stubs if all succeeded, otherwise the first failure's error
    pub fn into_result(self) -> Result<Vec<CallStub>> {
        let mut stubs = self.stubs;
        if let Some(stub) = stubs.iter_mut().find(|s| matches!(s.state, StubState::Failed(_))) {
            if let StubState::Failed(error) = std::mem::take(&mut stub.state) {
                return Err(error);
            }
        }
        Ok(stubs)
    }
}
