/// Function Registry
///
/// Registration, persistence and materialization of named functions:
/// - Type definitions (RegisteredFunction, Signature, Closure)
/// - Directory-tree persistence under the storage root
/// - Lock-free registry view using ArcSwap
/// - Native handler table and embedded Lua closures

// Core registration type definitions
pub mod types;

// Filesystem persistence for metadata, stubs and outputs
pub mod storage;

// ArcSwap-backed registry and materialization
pub mod registry;

// Invocable functions: native handlers and Lua closures
pub mod callable;

// Re-export commonly used types
pub use callable::{Callable, HandlerTable, MaterializedFunction, NativeFn};
pub use registry::FunctionRegistry;
pub use storage::FunctionStorage;
pub use types::{
    BoundArgs, Closure, ContainerImage, Environment, Parameter, RegisteredFunction, Resources,
    Runtime, Signature,
};
