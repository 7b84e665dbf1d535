/// Execution identifiers, output placeholders and call arguments
///
/// An argument is either a literal JSON value or a placeholder for the output of
/// another execution. The distinction is carried by the type, so no literal value
/// can ever be mistaken for a placeholder.

use crate::error::Result;
use crate::function::storage::FunctionStorage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Process-wide unique identifier of one deferred call
///
/// Time-derived prefix (sortable on disk) plus a random suffix, e.g.
/// `20260114T093012123456-4f1c2a9b`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%6f"),
            &uuid[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the not-yet-computed result of one execution
///
/// Its storage location is `functions/{function_name}/{execution_id}/output.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputPlaceholder {
    pub function_name: String,
    pub execution_id: ExecutionId,
}

impl OutputPlaceholder {
    pub fn create(function_name: &str, execution_id: ExecutionId) -> Self {
        Self {
            function_name: function_name.to_string(),
            execution_id,
        }
    }

    /// Read the stored result (`NotReady` before the producer ran)
    pub async fn resolve(&self, storage: &FunctionStorage) -> Result<Value> {
        storage.load_output(self).await
    }
}

impl fmt::Display for OutputPlaceholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.function_name, self.execution_id)
    }
}

/// One call argument: a literal value or a placeholder to resolve at run time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Argument {
    Literal(Value),
    Placeholder(OutputPlaceholder),
}

impl Argument {
    pub fn literal(value: impl Into<Value>) -> Self {
        Argument::Literal(value.into())
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Argument::Placeholder(_))
    }

    pub fn as_placeholder(&self) -> Option<&OutputPlaceholder> {
        match self {
            Argument::Placeholder(placeholder) => Some(placeholder),
            Argument::Literal(_) => None,
        }
    }

    /// Literal value as-is, or the placeholder's stored output
    pub async fn resolve(&self, storage: &FunctionStorage) -> Result<Value> {
        match self {
            Argument::Literal(value) => Ok(value.clone()),
            Argument::Placeholder(placeholder) => {
                tracing::debug!("Resolving placeholder {}", placeholder);
                placeholder.resolve(storage).await
            }
        }
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Argument::Literal(value)
    }
}

impl From<OutputPlaceholder> for Argument {
    fn from(placeholder: OutputPlaceholder) -> Self {
        Argument::Placeholder(placeholder)
    }
}

impl From<&OutputPlaceholder> for Argument {
    fn from(placeholder: &OutputPlaceholder) -> Self {
        Argument::Placeholder(placeholder.clone())
    }
}
