use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::ProbeId;
use crate::unit::{ClassLine, UnitName};

/// A test known to the coverage database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestInfo {
    pub name: String,
    pub defining_class: String,
    /// Execution time in milliseconds. Tests are prioritised by this alone.
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_under_test: Option<UnitName>,
    #[serde(default)]
    pub order: u32,
}

impl TestInfo {
    pub fn new(
        name: impl Into<String>,
        defining_class: impl Into<String>,
        time: u64,
        class_under_test: Option<UnitName>,
        order: u32,
    ) -> Self {
        Self {
            name: name.into(),
            defining_class: defining_class.into(),
            time,
            class_under_test,
            order,
        }
    }

    fn same_test(&self, other: &TestInfo) -> bool {
        self.name == other.name && self.defining_class == other.defining_class
    }
}

/// Answers which tests executed which code.
pub trait CoverageDatabase: Send + Sync {
    fn tests_for_class_line(&self, line: &ClassLine) -> Vec<TestInfo>;

    /// Every test that executed any part of `unit`.
    fn tests_for_class(&self, unit: &UnitName) -> Vec<TestInfo>;
}

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("failed to read coverage file {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid coverage file {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk form of one covered line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineRecord {
    pub unit: UnitName,
    pub line: u32,
    pub tests: Vec<TestInfo>,
}

/// Coverage held in memory, in discovery order.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCoverage {
    lines: HashMap<ClassLine, Vec<TestInfo>>,
    classes: HashMap<UnitName, Vec<TestInfo>>,
}

impl InMemoryCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `test` executed `line`. Repeat records of the same test
    /// for the same key are ignored.
    pub fn record(&mut self, line: ClassLine, test: TestInfo) {
        let per_class = self.classes.entry(line.unit.clone()).or_default();
        if !per_class.iter().any(|t| t.same_test(&test)) {
            per_class.push(test.clone());
        }
        let per_line = self.lines.entry(line).or_default();
        if !per_line.iter().any(|t| t.same_test(&test)) {
            per_line.push(test);
        }
    }

    pub fn from_records(records: impl IntoIterator<Item = LineRecord>) -> Self {
        let mut coverage = Self::new();
        for record in records {
            let key = ClassLine::new(record.unit, record.line);
            for test in record.tests {
                coverage.record(key.clone(), test);
            }
        }
        coverage
    }

    pub fn from_json_file(path: &Utf8Path) -> Result<Self, CoverageError> {
        let data = std::fs::read_to_string(path).map_err(|source| CoverageError::Io {
            path: path.to_owned(),
            source,
        })?;
        let records: Vec<LineRecord> =
            serde_json::from_str(&data).map_err(|source| CoverageError::Parse {
                path: path.to_owned(),
                source,
            })?;
        let coverage = Self::from_records(records);
        tracing::debug!(%path, lines = coverage.lines.len(), "loaded coverage");
        Ok(coverage)
    }

    /// Aggregates probe hits into line coverage. `sites` maps each probe to
    /// the line it stands for and `tests` resolves recorded test names.
    /// Hits for unknown probes or tests are skipped.
    pub fn from_probe_hits(
        hits: &BTreeMap<ProbeId, Arc<str>>,
        sites: &HashMap<ProbeId, ClassLine>,
        tests: &HashMap<String, TestInfo>,
    ) -> Self {
        let mut coverage = Self::new();
        for (probe, test_name) in hits {
            let (Some(line), Some(test)) = (sites.get(probe), tests.get(&**test_name)) else {
                tracing::trace!(%probe, test = &**test_name, "dropping unresolved probe hit");
                continue;
            };
            coverage.record(line.clone(), test.clone());
        }
        coverage
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn to_records(&self) -> Vec<LineRecord> {
        let mut records: Vec<LineRecord> = self
            .lines
            .iter()
            .map(|(key, tests)| LineRecord {
                unit: key.unit.clone(),
                line: key.line,
                tests: tests.clone(),
            })
            .collect();
        records.sort_by(|a, b| (&a.unit, a.line).cmp(&(&b.unit, b.line)));
        records
    }
}

impl CoverageDatabase for InMemoryCoverage {
    fn tests_for_class_line(&self, line: &ClassLine) -> Vec<TestInfo> {
        self.lines.get(line).cloned().unwrap_or_default()
    }

    fn tests_for_class(&self, unit: &UnitName) -> Vec<TestInfo> {
        self.classes.get(unit).cloned().unwrap_or_default()
    }
}

impl<D: CoverageDatabase + ?Sized> CoverageDatabase for Arc<D> {
    fn tests_for_class_line(&self, line: &ClassLine) -> Vec<TestInfo> {
        (**self).tests_for_class_line(line)
    }

    fn tests_for_class(&self, unit: &UnitName) -> Vec<TestInfo> {
        (**self).tests_for_class(unit)
    }
}
