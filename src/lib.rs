pub mod config;
pub mod debug;
pub mod logging;
pub mod modules;
pub mod runtime;
pub mod utils;

// Scripted sources, fixtures and config helpers shared by unit and integration tests.
pub mod test_utils;
