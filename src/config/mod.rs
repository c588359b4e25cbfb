//! Configuration module for the Terraplane engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `terraplane.stack.yaml`
//! - The tagged attribute value model (literals, lists, maps, references)
//! - Validation of declarations
//! - Computing declaration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;
mod value;

pub use hash::ConfigHasher;
pub use parser::{ConfigParser, find_config_file};
pub use spec::{
    ProjectConfig, ResourceSpec, RunSettings, StackConfig, StateBackend, StateConfig,
};
pub use validator::{ConfigValidator, ValidationResult};
pub use value::{Reference, Value};
