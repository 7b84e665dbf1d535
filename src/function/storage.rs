/// Directory-tree persistence for functions and their executions
///
/// Layout under the storage root:
/// - functions/{name}/meta.json: registered function metadata
/// - functions/{name}/{execution_id}/stub.json: call record written when the stub starts
/// - functions/{name}/{execution_id}/output.json: the call's result
///
/// Files are written to a temporary sibling and renamed into place. There is no
/// locking: concurrent runs against one root from separate processes are unsafe.

use crate::error::{PyflowError, Result};
use crate::function::types::RegisteredFunction;
use crate::runtime::placeholder::OutputPlaceholder;
use crate::runtime::stub::CallStub;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const META_FILE: &str = "meta.json";
const STUB_FILE: &str = "stub.json";
const OUTPUT_FILE: &str = "output.json";

/// Filesystem storage manager rooted at one directory
#[derive(Debug, Clone)]
pub struct FunctionStorage {
    root: PathBuf,
}

impl FunctionStorage {
    /// Create new storage instance for the given root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every function
    pub fn functions_dir(&self) -> PathBuf {
        self.root.join("functions")
    }

    pub fn function_dir(&self, name: &str) -> PathBuf {
        self.functions_dir().join(name)
    }

    pub fn execution_dir(&self, function: &str, execution_id: &str) -> PathBuf {
        self.function_dir(function).join(execution_id)
    }

    /// Location of the result blob for a placeholder
    pub fn output_path(&self, placeholder: &OutputPlaceholder) -> PathBuf {
        self.execution_dir(&placeholder.function_name, placeholder.execution_id.as_str())
            .join(OUTPUT_FILE)
    }

    pub fn stub_path(&self, function: &str, execution_id: &str) -> PathBuf {
        self.execution_dir(function, execution_id).join(STUB_FILE)
    }

    /// Store function metadata, replacing any previous registration
    pub async fn save_function(&self, function: &RegisteredFunction) -> Result<()> {
        let path = self.function_dir(&function.name).join(META_FILE);
        write_json(&path, function).await
    }

    /// Retrieve a function by name
    ///
    /// Missing or unreadable metadata both report `NotFound`; the parse failure is logged.
    pub async fn get_function(&self, name: &str) -> Result<RegisteredFunction> {
        let path = self.function_dir(name).join(META_FILE);
        match read_json::<RegisteredFunction>(&path).await {
            Ok(Some(function)) => Ok(function),
            Ok(None) => Err(PyflowError::NotFound(name.to_string())),
            Err(PyflowError::StorageCorrupt { path, reason }) => {
                tracing::warn!("Unreadable metadata for '{}' at {}: {}", name, path.display(), reason);
                Err(PyflowError::NotFound(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Load all readable functions for registry initialization
    ///
    /// Returns a map of name -> RegisteredFunction. Directories without readable
    /// metadata are skipped with a warning.
    pub async fn load_all_functions(&self) -> Result<HashMap<String, RegisteredFunction>> {
        let mut functions = HashMap::new();
        let mut entries = match tokio::fs::read_dir(self.functions_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(functions),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.get_function(&name).await {
                Ok(function) => {
                    functions.insert(name, function);
                }
                Err(PyflowError::NotFound(_)) => {
                    tracing::warn!("Skipping function directory without metadata: {}", name);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(functions)
    }

    /// Persist the call record of a stub
    pub async fn save_stub(&self, stub: &CallStub) -> Result<()> {
        let path = self.stub_path(&stub.function_name, stub.execution_id.as_str());
        write_json(&path, stub).await
    }

    /// Load a persisted call record
    pub async fn load_stub(&self, function: &str, execution_id: &str) -> Result<CallStub> {
        let path = self.stub_path(function, execution_id);
        read_json::<CallStub>(&path).await?.ok_or_else(|| PyflowError::NotReady {
            function: function.to_string(),
            execution_id: execution_id.to_string(),
        })
    }

    /// Persist the raw result of an execution
    pub async fn save_output(&self, placeholder: &OutputPlaceholder, value: &Value) -> Result<()> {
        write_json(&self.output_path(placeholder), value).await
    }

    /// Read the result an execution produced
    ///
    /// Fails with `NotReady` if nothing was written yet and `StorageCorrupt` if
    /// the blob cannot be parsed.
    pub async fn load_output(&self, placeholder: &OutputPlaceholder) -> Result<Value> {
        read_json::<Value>(&self.output_path(placeholder))
            .await?
            .ok_or_else(|| PyflowError::NotReady {
                function: placeholder.function_name.clone(),
                execution_id: placeholder.execution_id.to_string(),
            })
    }

    /// Whether an execution has produced output
    pub async fn has_output(&self, placeholder: &OutputPlaceholder) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.output_path(placeholder)).await?)
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| PyflowError::StorageCorrupt {
        path: path.to_path_buf(),
        reason: format!("serialization failed: {}", e),
    })?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    tracing::debug!("Wrote {}", path.display());
    Ok(())
}

/// Read and parse a JSON file; `Ok(None)` when it does not exist
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| PyflowError::StorageCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
