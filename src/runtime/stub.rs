/// Deferred calls and the queue that holds them
///
/// A CallStub records one call without running it. The ExecutionQueue keeps stubs
/// in insertion order, which is the run order; it supports no removal or
/// reordering and is drained once by the runner.

use crate::error::PyflowError;
use crate::runtime::placeholder::{Argument, ExecutionId, OutputPlaceholder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of a stub: Pending -> Running -> {Succeeded, Failed}
///
/// Single attempt only; both terminal states are final.
#[derive(Debug, Default)]
pub enum StubState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed(PyflowError),
}

impl StubState {
    pub fn label(&self) -> &'static str {
        match self {
            StubState::Pending => "pending",
            StubState::Running => "running",
            StubState::Succeeded => "succeeded",
            StubState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StubState::Succeeded | StubState::Failed(_))
    }

    pub fn error(&self) -> Option<&PyflowError> {
        match self {
            StubState::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// A recorded-but-not-yet-executed function call
#[derive(Debug, Serialize, Deserialize)]
pub struct CallStub {
    /// Reference into the function registry
    pub function_name: String,
    pub execution_id: ExecutionId,
    /// Positional arguments, literals or placeholders, captured verbatim
    pub arguments: Vec<Argument>,
    pub keyword_arguments: BTreeMap<String, Argument>,
    /// Where this call's output will be stored
    pub result_placeholder: OutputPlaceholder,
    #[serde(skip)]
    pub state: StubState,
}

impl CallStub {
    /// New pending stub with a freshly generated execution id
    pub fn new(
        function_name: &str,
        arguments: Vec<Argument>,
        keyword_arguments: BTreeMap<String, Argument>,
    ) -> Self {
        let execution_id = ExecutionId::generate();
        Self {
            function_name: function_name.to_string(),
            result_placeholder: OutputPlaceholder::create(function_name, execution_id.clone()),
            execution_id,
            arguments,
            keyword_arguments,
            state: StubState::Pending,
        }
    }

    /// Every placeholder this stub reads, positional first
    pub fn placeholders(&self) -> impl Iterator<Item = &OutputPlaceholder> {
        self.arguments
            .iter()
            .chain(self.keyword_arguments.values())
            .filter_map(Argument::as_placeholder)
    }
}

impl fmt::Display for CallStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.function_name, self.execution_id)
    }
}

/// Ordered, append-only list of deferred calls
#[derive(Debug, Default)]
pub struct ExecutionQueue {
    stubs: Vec<CallStub>,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stub and hand back its result placeholder
    pub fn push(&mut self, stub: CallStub) -> OutputPlaceholder {
        let placeholder = stub.result_placeholder.clone();
        self.stubs.push(stub);
        placeholder
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallStub> {
        self.stubs.iter()
    }

    /// Consume the queue for a run
    pub fn into_stubs(self) -> Vec<CallStub> {
        self.stubs
    }
}
