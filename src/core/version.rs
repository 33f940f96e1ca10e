//! Build metadata generated by build.rs

include!(concat!(env!("OUT_DIR"), "/version.rs"));

/// Crate version as recorded in Cargo.toml at build time
pub fn package_version() -> &'static str {
    PACKAGE_VERSION
}

/// Build time string from the build script (UTC)
pub fn build_time() -> &'static str {
    BUILD_TIME
}

/// Short git hash captured by the build script
pub fn git_hash() -> &'static str {
    GIT_HASH
}

/// `0.1.0 (abc1234, built 2025-01-01 00:00:00 UTC)`
pub fn long_version() -> String {
    format!("{} ({}, built {})", PACKAGE_VERSION, GIT_HASH, BUILD_TIME)
}
