/// Worker entry point
///
/// Wires configuration, registry and runner together for the `pyflow` binary and
/// for containers launched by the runner. When a stub is handed over through
/// `PYFLOW_FUNCTION` / `PYFLOW_EXECUTION_ID` it is executed; otherwise the
/// registered functions are listed.

use crate::{
    config::Config,
    function::{callable::HandlerTable, registry::FunctionRegistry, storage::FunctionStorage},
    runtime::{journal::ExecutionJournal, runner::Runner, stub::{CallStub, StubState}},
};
use anyhow::Result;
use std::sync::Arc;

/// Start the worker with the given configuration and native handlers
///
/// Embed this in your own binary to make native handlers available inside
/// containers; the stock `pyflow` binary links none and can only run Lua closures.
pub async fn start_worker(config: Config, handlers: HandlerTable) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Starting pyflow worker (storage root: {})", config.storage.root.display());

    match (&config.worker.function, &config.worker.execution_id) {
        (Some(function), Some(execution_id)) => {
            let stub = execute_handoff(&config, handlers, function, execution_id).await?;
            match stub.state {
                StubState::Succeeded => Ok(()),
                StubState::Failed(error) => Err(error.into()),
                other => Err(anyhow::anyhow!("Stub {} ended in unexpected state '{}'", stub.execution_id, other.label())),
            }
        }
        (None, Some(execution_id)) => Err(anyhow::anyhow!(
            "PYFLOW_EXECUTION_ID={} given without PYFLOW_FUNCTION", execution_id
        )),
        _ => {
            let registry = FunctionRegistry::new(FunctionStorage::new(&config.storage.root), handlers);
            registry.init_from_storage().await?;
            for line in catalog(&registry) {
                tracing::info!("{}", line);
            }
            Ok(())
        }
    }
}

/// Run one persisted stub in this process
pub async fn execute_handoff(
    config: &Config,
    handlers: HandlerTable,
    function: &str,
    execution_id: &str,
) -> Result<CallStub> {
    let storage = FunctionStorage::new(&config.storage.root);
    let registry = Arc::new(FunctionRegistry::new(storage, handlers));

    let mut runner = Runner::new(registry);
    if config.runner.journal {
        runner = runner.with_journal(ExecutionJournal::open(&config.storage.root.join("journal.db")).await?);
    }

    Ok(runner.run_persisted(function, execution_id).await?)
}

/// One line per registered function: `name(signature) sha256:<prefix>`
pub fn catalog(registry: &FunctionRegistry) -> Vec<String> {
    registry
        .list()
        .iter()
        .map(|f| format!("{}{} sha256:{}", f.name, f.signature, f.short_hash()))
        .collect()
}
