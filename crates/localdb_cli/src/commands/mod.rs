//! CLI command implementations.

pub mod bootstrap;
pub mod fetch;
mod printer;
