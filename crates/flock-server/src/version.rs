//! Build and Version Metadata

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Major version; nodes only see services announced with the same major
pub const VERSION_MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");

/// Git commit SHA (short)
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

/// Git branch name
pub const GIT_BRANCH: &str = env!("VERGEN_GIT_BRANCH");

/// Whether the working tree had uncommitted changes
pub const GIT_DIRTY: &str = env!("VERGEN_GIT_DIRTY");

/// Rust compiler version used to build
pub const RUSTC_VERSION: &str = env!("VERGEN_RUSTC_SEMVER");

/// Build timestamp
pub const BUILD_TIMESTAMP: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// Target triple
pub const TARGET: &str = env!("VERGEN_CARGO_TARGET_TRIPLE");

/// Version reported by `--version`
pub const CLI_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_GIT_SHA"), ")");

/// Protocol identifier carried in the `proto` TXT property, e.g. `compute-flock/0`.
pub const BEACON_PROTOCOL: &str = concat!("compute-flock/", env!("CARGO_PKG_VERSION_MAJOR"));

/// Version string with git metadata: `<version> (<sha>[ dirty])`
pub fn full_version() -> String {
    let dirty = if GIT_DIRTY == "true" { " dirty" } else { "" };
    format!("{VERSION} ({GIT_SHA}{dirty})")
}

/// Multi-line build report printed by `compute-flock version`.
pub fn build_info() -> String {
    format!(
        "compute-flock {}\n\
         commit:   {} ({})\n\
         built:    {}\n\
         rustc:    {}\n\
         target:   {}\n\
         protocol: {}",
        VERSION, GIT_SHA, GIT_BRANCH, BUILD_TIMESTAMP, RUSTC_VERSION, TARGET, BEACON_PROTOCOL
    )
}
