/// pyflow: register functions, defer calls, run them later
/// 
/// This library records named functions with their provenance (source, hash,
/// declared signature), lets callers queue deferred calls whose arguments may be
/// the future outputs of earlier calls, and runs the queue in order while
/// persisting every result under a shared storage root.

// Core configuration and setup
pub mod config;

// Error types shared by every layer
pub mod error;

// Function registry - registration, persistence and materialization
pub mod function;

// Deferred execution runtime - placeholders, stubs, queue and runner
pub mod runtime;

// Context object owning the registry and the queue
pub mod session;

// Worker entry point for the binary and for containers
pub mod worker;

// Re-export commonly used types for external consumers
pub use error::{PyflowError, Result};
pub use function::{
    BoundArgs, Closure, Environment, HandlerTable, Parameter, RegisteredFunction, Signature,
};
pub use runtime::{Argument, OutputPlaceholder, RunSummary, StubState};
pub use session::Session;
pub use worker::start_worker;
