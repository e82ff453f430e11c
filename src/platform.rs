//! Platform Version
//!
//! Build-time platform version read from Cargo.toml metadata
//! (`package.metadata.plughost.platform_version`). Plugins declare
//! `dependencies.platform` constraints against this value.

// Include the build-generated platform version constant
include!(concat!(env!("OUT_DIR"), "/platform_version.rs"));

/// Get the platform version plugins are checked against
///
/// To bump the platform version:
/// 1. Edit Cargo.toml: package.metadata.plughost.platform_version = "X.Y.Z"
/// 2. Build - the new version will be used
///
/// Bump the major component for changes that break plugins.
pub fn platform_version() -> &'static str {
    PLATFORM_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::version::Version;

    #[test]
    fn test_platform_version_is_semantic() {
        assert!(Version::parse(platform_version()).is_ok());
        assert_eq!(platform_version(), PLATFORM_VERSION);
    }
}
