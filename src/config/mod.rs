// src/config/mod.rs - Configuration module
// Tree location: ./src/config/mod.rs

/// Settings file and CLI overrides
pub mod settings;

pub use settings::Settings;
