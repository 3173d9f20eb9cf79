use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Method name engines use for a unit's start function.
pub const STATIC_INITIALIZER: &str = "<start>";

const UNIT_EXTENSION: &str = "wasm";

/// Fully-qualified, dotted name of a compiled unit (`app.math.Calculator`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitName(String);

impl UnitName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last dotted segment, e.g. `Calculator` for `app.math.Calculator`.
    pub fn simple_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// `app.math.Calculator` -> `app/math/Calculator.wasm`
    pub fn to_relative_path(&self) -> Utf8PathBuf {
        let mut path: Utf8PathBuf = self.0.split('.').collect();
        path.set_extension(UNIT_EXTENSION);
        path
    }

    /// Inverse of [`UnitName::to_relative_path`]. Returns `None` for paths
    /// outside `root` or without a `.wasm` extension.
    pub fn from_path(root: &Utf8Path, path: &Utf8Path) -> Option<Self> {
        let relative = path.strip_prefix(root).ok()?;
        if relative.extension() != Some(UNIT_EXTENSION) {
            return None;
        }
        let stem = relative.with_extension("");
        let segments: Vec<&str> = stem.components().map(|c| c.as_str()).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty() || s.contains('.')) {
            return None;
        }
        Some(Self(segments.join(".")))
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A mutation point, independent of line numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub unit: UnitName,
    pub method: String,
    pub descriptor: String,
}

impl Location {
    pub fn new(unit: UnitName, method: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            unit,
            method: method.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Code run once when the unit is instantiated. Its execution is not
    /// attributed to individual lines.
    pub fn is_static_initializer(&self) -> bool {
        self.method == STATIC_INITIALIZER
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}{}", self.unit, self.method, self.descriptor)
    }
}

/// Coverage lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassLine {
    pub unit: UnitName,
    pub line: u32,
}

impl ClassLine {
    pub fn new(unit: UnitName, line: u32) -> Self {
        Self { unit, line }
    }
}

impl fmt::Display for ClassLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.unit, self.line)
    }
}
