/// Remote execution inside a container
///
/// The launcher starts a fresh container that mounts the storage root and runs the
/// `pyflow` worker, which picks the stub up through `PYFLOW_FUNCTION` and
/// `PYFLOW_EXECUTION_ID` and executes it with the same resolve/invoke/persist path
/// used in-process. Each function's registered environment picks the image and
/// the resource limits; building the image is left to the caller.

use crate::config::ContainerConfig;
use crate::function::types::Environment;
use crate::runtime::stub::CallStub;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct ContainerLauncher {
    /// Container CLI (e.g., "docker")
    engine: String,
    /// Image override; `None` means `<function>:latest`
    image: Option<String>,
    /// Host storage root to mount
    storage_root: PathBuf,
    /// Mount point of the storage root inside the container
    mount_point: String,
}

impl ContainerLauncher {
    pub fn new(config: &ContainerConfig, storage_root: &Path) -> Self {
        Self {
            engine: config.engine.clone(),
            image: config.image.clone(),
            storage_root: storage_root.to_path_buf(),
            mount_point: config.mount_point.clone(),
        }
    }

    /// Image used for a function
    ///
    /// The registered image wins, then the configured override, then `<function>:latest`.
    pub fn image_for(&self, function_name: &str, environment: &Environment) -> String {
        if let Some(container) = &environment.container {
            return container.reference();
        }
        self.image
            .clone()
            .unwrap_or_else(|| format!("{}:latest", function_name))
    }

    /// Arguments passed to the container engine for one stub
    pub fn args_for(&self, stub: &CallStub, environment: &Environment) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:{}", self.storage_root.display(), self.mount_point),
            "-e".to_string(),
            format!("PYFLOW_HOME={}", self.mount_point),
            "-e".to_string(),
            format!("PYFLOW_FUNCTION={}", stub.function_name),
            "-e".to_string(),
            format!("PYFLOW_EXECUTION_ID={}", stub.execution_id),
            // The host runner journals this stub's transitions
            "-e".to_string(),
            "PYFLOW_JOURNAL=false".to_string(),
        ];

        if let Some(cpu) = &environment.resources.cpu {
            args.extend(["--cpus".to_string(), cpu.clone()]);
        }
        if let Some(mem) = &environment.resources.mem {
            args.extend(["--memory".to_string(), mem.clone()]);
        }
        if environment.runtime.gpu {
            args.extend(["--gpus".to_string(), "all".to_string()]);
        }

        args.push(self.image_for(&stub.function_name, environment));
        args
    }

    /// Run the stub in a container and wait for it to exit
    ///
    /// The stub record must already be persisted; success only means the container
    /// exited cleanly, the caller still checks that an output was written.
    pub async fn launch(&self, stub: &CallStub, environment: &Environment) -> Result<()> {
        let args = self.args_for(stub, environment);
        tracing::info!("Launching container for {}: {} {}", stub, self.engine, args.join(" "));

        let status = Command::new(&self.engine)
            .args(&args)
            .status()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start container engine '{}': {}", self.engine, e))?;

        if !status.success() {
            return Err(anyhow::anyhow!("Container for {} exited with {}", stub, status));
        }

        Ok(())
    }
}
