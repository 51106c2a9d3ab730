//! Helpers shared by the wqs-metrics binaries.

mod build_info;
pub mod logging;
pub mod version;
