//! Tool registry, identifier resolution and local handlers
//!
//! The registry is the single authoritative map of registered tools.
//! The resolver translates agent-facing identifiers and legacy aliases
//! onto registry identifiers and validates invocations against the
//! registered capability schemas. The handler table holds the
//! in-process function tools.

pub mod builtin;
pub mod handlers;
pub mod registry;
pub mod resolver;

pub use builtin::builtin_tools;
pub use handlers::{BoxedTool, FnTool, HandlerTable, LocalTool};
pub use registry::{RegisterOutcome, Registry, RegistryFilter};
pub use resolver::{Normalized, Resolver, ValidateError};
