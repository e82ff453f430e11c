//! Plugin System Tests
//!
//! Lifecycle, sandbox, registry, version and discovery tests built on the
//! mock plugins.


#[cfg(test)]
pub mod manager_tests;
