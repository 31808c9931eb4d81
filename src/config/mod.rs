// Configuration management module
// TOML settings, validation and display

pub mod display;
pub mod settings;

pub use display::{show_config, write_default_config};
pub use settings::{
    Config, ConfigError, EmbeddingConfig, EmbeddingMethod, ParserConfig, PathsConfig, PdfBackend,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
