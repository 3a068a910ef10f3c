//! Configuration module for tagsync.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `tagsync.yaml`
//! - Environment and `.env` overrides
//! - Validation of configuration values

mod parser;
mod schema;
mod validator;

pub use parser::{find_config_file, ConfigParser, API_TOKEN_ENV, DEFAULT_CONFIG_FILES};
pub use schema::{BackendConfig, BackendKind, ResourceConfig, SystemTagRule, TagSyncConfig};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
