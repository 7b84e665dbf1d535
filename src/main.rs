/// pyflow worker binary
/// 
/// Runs the stub handed over through `PYFLOW_FUNCTION` / `PYFLOW_EXECUTION_ID`
/// (as set by the container launcher), or lists the registered functions.

use pyflow::{config::Config, start_worker, HandlerTable};

/// Application entry point
/// 
/// Execution is single-threaded: stubs run one after another on this thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load configuration (defaults to ~/.pyflow, overridable with PYFLOW_HOME)
    let config = Config::default();

    // Only Lua closures can be materialized without linked native handlers
    start_worker(config, HandlerTable::new()).await?;

    Ok(())
}
