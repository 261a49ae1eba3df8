// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{RawTemplate, Template};
use crate::errors::Result;

/// Load a template file from a given path and return the raw `RawTemplate`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (references, cycles, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawTemplate> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading template");
    let contents = fs::read_to_string(path)?;
    let raw: RawTemplate = toml::from_str(&contents)?;
    Ok(raw)
}

/// Load a template from path and validate it.
///
/// This is the entry point the CLI uses:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks names, unknown or self references, and reference cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Template> {
    let raw = load_from_path(&path)?;
    Template::try_from(raw)
}

/// Parse and validate a template held in memory.
pub fn parse_str(contents: &str) -> Result<Template> {
    let raw: RawTemplate = toml::from_str(contents)?;
    Template::try_from(raw)
}
