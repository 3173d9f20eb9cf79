use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coverage::TestInfo;
use crate::unit::{Location, UnitName};

/// Uniquely identifies one mutant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationIdentifier {
    pub location: Location,
    /// Instruction index within the method.
    pub index: u32,
    /// Id of the mutation operator that produced this mutant.
    pub operator: String,
}

impl MutationIdentifier {
    pub fn new(location: Location, index: u32, operator: impl Into<String>) -> Self {
        Self {
            location,
            index,
            operator: operator.into(),
        }
    }

    pub fn unit(&self) -> &UnitName {
        &self.location.unit
    }
}

impl fmt::Display for MutationIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} [{}]", self.location, self.index, self.operator)
    }
}

/// One mutant plus the tests that must re-run to detect it.
///
/// Engines build these with no tests; the mutation source fills the test
/// list exactly once through [`MutationDetails::with_tests`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationDetails {
    id: MutationIdentifier,
    filename: String,
    description: String,
    line: u32,
    block: u32,
    #[serde(default)]
    tests_in_order: Vec<TestInfo>,
}

impl MutationDetails {
    pub fn new(
        id: MutationIdentifier,
        filename: impl Into<String>,
        description: impl Into<String>,
        line: u32,
        block: u32,
    ) -> Self {
        Self {
            id,
            filename: filename.into(),
            description: description.into(),
            line,
            block,
            tests_in_order: Vec::new(),
        }
    }

    pub fn with_tests(mut self, tests: Vec<TestInfo>) -> Self {
        self.tests_in_order = tests;
        self
    }

    pub fn id(&self) -> &MutationIdentifier {
        &self.id
    }

    pub fn unit(&self) -> &UnitName {
        self.id.unit()
    }

    pub fn location(&self) -> &Location {
        &self.id.location
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn block(&self) -> u32 {
        self.block
    }

    pub fn tests_in_order(&self) -> &[TestInfo] {
        &self.tests_in_order
    }

    /// Mutants with no tests are not covered and are usually not run.
    pub fn is_covered(&self) -> bool {
        !self.tests_in_order.is_empty()
    }
}
