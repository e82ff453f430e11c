//! plughost
//!
//! Plugin host core: version comparison, extension point registry,
//! capability sandbox and plugin lifecycle management.

pub mod config;
pub mod logging;
pub mod platform;
pub mod plugin;

pub use platform::platform_version;
