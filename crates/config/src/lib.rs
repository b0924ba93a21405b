//! Configuration loading, validation, env substitution, and the processor
//! catalog.
//!
//! Config files: `homegw.toml`, `homegw.yaml`, `homegw.yml` or `homegw.json`.
//! Searched in `./` then the user config dir (`~/.config/homegw/` on Linux).
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod catalog;
pub mod env_subst;
pub mod error;
pub mod loader;
pub mod processors;
pub mod schema;
pub mod validate;
pub mod watcher;

pub use {
    catalog::ProcessorCatalog,
    error::{Error, Result},
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    processors::load_processors,
    schema::{
        ChannelsConfig, HomegwConfig, LlmConfig, LogConfig, LogFormat, ProcessorsConfig,
        SecurityConfig, ServerConfig, TelegramConfig, TransportConfig, WechatWorkConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
    watcher::CatalogWatcher,
};
