//! enginepool-provider: pluggable compute resource providers.
//!
//! A provider turns a launch command into a running allocation ("block")
//! and reports on it afterwards. The pool manager only ever talks to the
//! [`ExecutionProvider`] trait; [`LocalProvider`] is the built-in
//! implementation that runs blocks as local child processes.

pub mod local;
pub mod provider;

pub use local::LocalProvider;
pub use provider::{ExecutionProvider, from_config};
