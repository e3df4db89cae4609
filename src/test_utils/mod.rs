// Test utilities for poolscope unit and integration testing

pub use tempfile::TempDir;

pub mod config_builder;
pub mod fixtures;
pub mod mock_source;

// Re-export commonly used items
pub use config_builder::TestConfigBuilder;
pub use mock_source::ScriptedPoolSource;
