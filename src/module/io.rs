use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::definition::{ModuleDef, StructureError};
use super::printer::print_module;
use crate::parser::{SourceError, parse_module};

/// On-disk representations of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFormat {
    #[default]
    Cwil,
    Yaml,
    Json,
}

impl ModuleFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => ModuleFormat::Yaml,
            Some("json") => ModuleFormat::Json,
            _ => ModuleFormat::Cwil,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ModuleFormat::Cwil => "cwil",
            ModuleFormat::Yaml => "yaml",
            ModuleFormat::Json => "json",
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to decode YAML module: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to decode JSON module: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed module: {0}")]
    Structure(#[from] StructureError),
}

/// Decode a module. Source spans only exist for the text format; YAML and
/// JSON modules come back without them.
pub fn decode_module(source: &str, format: ModuleFormat) -> Result<ModuleDef, DecodeError> {
    let module = match format {
        ModuleFormat::Cwil => parse_module(source)?,
        ModuleFormat::Yaml => serde_yaml::from_str(source)?,
        ModuleFormat::Json => serde_json::from_str(source)?,
    };
    module.check_structure()?;
    Ok(module)
}

pub fn encode_module(module: &ModuleDef, format: ModuleFormat) -> Result<String> {
    let encoded = match format {
        ModuleFormat::Cwil => print_module(module),
        ModuleFormat::Yaml => serde_yaml::to_string(module).context("failed to serialise module")?,
        ModuleFormat::Json => {
            serde_json::to_string_pretty(module).context("failed to serialise module")?
        }
    };
    Ok(encoded)
}

/// Read a module, picking the format from the file extension.
pub fn read_module(path: &Path) -> Result<ModuleDef> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read module {}", path.display()))?;
    decode_module(&source, ModuleFormat::from_path(path))
        .with_context(|| format!("failed to load module {}", path.display()))
}

pub fn write_module(path: &Path, module: &ModuleDef, format: ModuleFormat) -> Result<()> {
    let encoded = encode_module(module, format)?;
    fs::write(path, encoded)
        .with_context(|| format!("failed to write module {}", path.display()))
}
