/// Deferred execution runtime
///
/// This module turns deferred calls into results. It handles:
/// - Execution ids, output placeholders and literal/placeholder arguments
/// - Call stubs and the append-only execution queue
/// - A petgraph dependency graph used to stop stubs whose inputs failed
/// - Sequential in-process or container execution with an SQLite journal

// Execution ids, placeholders and call arguments
pub mod placeholder;

// Call stubs and the execution queue
pub mod stub;

// Producer -> consumer graph over a queue
pub mod graph;

// Sequential runner and run summaries
pub mod runner;

// SQLite journal of stub state transitions
pub mod journal;

// Remote execution through a container engine
pub mod container;

// Re-export main types
pub use container::ContainerLauncher;
pub use journal::{ExecutionJournal, JournalEntry};
pub use placeholder::{Argument, ExecutionId, OutputPlaceholder};
pub use runner::{ExecutionMode, FailurePolicy, RunSummary, Runner};
pub use stub::{CallStub, ExecutionQueue, StubState};
