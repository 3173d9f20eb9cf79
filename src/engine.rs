use std::collections::HashMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mutants::{MutationDetails, MutationIdentifier};
use crate::unit::{Location, UnitName};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unit {0} not found")]
    UnitNotFound(UnitName),

    #[error("unit {unit} could not be read: {message}")]
    Unreadable { unit: UnitName, message: String },

    #[error("invalid mutation manifest {path}: {message}")]
    Manifest { path: Utf8PathBuf, message: String },
}

impl EngineError {
    /// The unit this error concerns, when there is one.
    pub fn unit(&self) -> Option<&UnitName> {
        match self {
            EngineError::UnitNotFound(unit) | EngineError::Unreadable { unit, .. } => Some(unit),
            EngineError::Manifest { .. } => None,
        }
    }
}

/// Supplies a unit's raw bytes.
pub trait ByteSource: Send + Sync {
    fn fetch(&self, unit: &UnitName) -> Option<Vec<u8>>;
}

/// Reads `<root>/a/b/C.wasm` for unit `a.b.C`.
#[derive(Debug, Clone)]
pub struct DirByteSource {
    root: Utf8PathBuf,
}

impl DirByteSource {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn path_for(&self, unit: &UnitName) -> Utf8PathBuf {
        self.root.join(unit.to_relative_path())
    }
}

impl ByteSource for DirByteSource {
    fn fetch(&self, unit: &UnitName) -> Option<Vec<u8>> {
        let path = self.path_for(unit);
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::trace!(%path, error = %e, "unit not readable");
                None
            }
        }
    }
}

/// Finds mutation candidates in one unit.
pub trait Mutater {
    fn find_mutations(&self, unit: &UnitName) -> Result<Vec<MutationDetails>, EngineError>;
}

/// Builds a [`Mutater`] bound to a byte source.
pub trait MutationEngine: Send + Sync {
    fn create_mutator(&self, source: Arc<dyn ByteSource>) -> Result<Box<dyn Mutater>, EngineError>;
}

/// One candidate as listed in a manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub method: String,
    #[serde(default)]
    pub descriptor: String,
    pub index: u32,
    pub operator: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub description: String,
    pub line: u32,
    #[serde(default)]
    pub block: u32,
}

/// Engine whose candidates were produced ahead of time by an external
/// mutation tool and stored as JSON (`{ "unit": [entry, ...] }`).
#[derive(Debug, Clone, Default)]
pub struct ManifestEngine {
    entries: Arc<HashMap<UnitName, Vec<ManifestEntry>>>,
}

impl ManifestEngine {
    pub fn new(entries: HashMap<UnitName, Vec<ManifestEntry>>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn from_json_file(path: &Utf8Path) -> Result<Self, EngineError> {
        let data = std::fs::read_to_string(path).map_err(|e| EngineError::Manifest {
            path: path.to_owned(),
            message: e.to_string(),
        })?;
        let entries = serde_json::from_str(&data).map_err(|e| EngineError::Manifest {
            path: path.to_owned(),
            message: e.to_string(),
        })?;
        Ok(Self::new(entries))
    }
}

impl MutationEngine for ManifestEngine {
    fn create_mutator(&self, source: Arc<dyn ByteSource>) -> Result<Box<dyn Mutater>, EngineError> {
        Ok(Box::new(ManifestMutater {
            entries: Arc::clone(&self.entries),
            source,
        }))
    }
}

struct ManifestMutater {
    entries: Arc<HashMap<UnitName, Vec<ManifestEntry>>>,
    source: Arc<dyn ByteSource>,
}

impl Mutater for ManifestMutater {
    fn find_mutations(&self, unit: &UnitName) -> Result<Vec<MutationDetails>, EngineError> {
        let bytes = self
            .source
            .fetch(unit)
            .ok_or_else(|| EngineError::UnitNotFound(unit.clone()))?;
        wasmparser::Parser::new(0)
            .parse_all(&bytes)
            .try_for_each(|payload| payload.map(drop))
            .map_err(|e| EngineError::Unreadable {
                unit: unit.clone(),
                message: e.to_string(),
            })?;

        let default_file = format!("{}.wasm", unit.simple_name());
        let found = self
            .entries
            .get(unit)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| {
                        let location = Location::new(unit.clone(), &entry.method, &entry.descriptor);
                        MutationDetails::new(
                            MutationIdentifier::new(location, entry.index, &entry.operator),
                            entry.filename.clone().unwrap_or_else(|| default_file.clone()),
                            &entry.description,
                            entry.line,
                            entry.block,
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(found)
    }
}
