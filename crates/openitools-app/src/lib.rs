/// OpeniTools application layer — the control context around the core.
///
/// Owns configuration, the worker pool and the serialized state reducer
/// that a front end (the bundled CLI, or a GUI) drives.
pub mod config;
pub mod state;
pub mod workers;
