// src/config/mod.rs

//! Template loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed template model (`model.rs`).
//! - Load a template from disk or a string (`loader.rs`).
//! - Validate names, references and the reference graph (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_str};
pub use model::{ConfigSection, Properties, RawTemplate, ResourceDefinition, Template};
pub use validate::{validate_raw_template, validate_stack_name};
