use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::coverage::{CoverageDatabase, TestInfo};
use crate::engine::{ByteSource, EngineError, MutationEngine};
use crate::filter::MutationFilterFactory;
use crate::mutants::{MutationDetails, MutationIdentifier};
use crate::unit::{ClassLine, UnitName};

#[derive(Clone)]
pub struct MutationConfig {
    pub engine: Arc<dyn MutationEngine>,
}

impl MutationConfig {
    pub fn new(engine: Arc<dyn MutationEngine>) -> Self {
        Self { engine }
    }
}

/// Result of generating mutants for one unit.
#[derive(Debug)]
pub struct UnitOutcome {
    pub unit: UnitName,
    pub result: Result<Vec<MutationDetails>, EngineError>,
}

/// Produces the mutants of a unit, each with the tests to run against it,
/// fastest first.
pub struct MutationSource {
    config: MutationConfig,
    filter: Arc<dyn MutationFilterFactory>,
    coverage: Arc<dyn CoverageDatabase>,
    source: Arc<dyn ByteSource>,
}

impl MutationSource {
    pub fn new(
        config: MutationConfig,
        filter: Arc<dyn MutationFilterFactory>,
        coverage: Arc<dyn CoverageDatabase>,
        source: Arc<dyn ByteSource>,
    ) -> Self {
        Self {
            config,
            filter,
            coverage,
            source,
        }
    }

    pub fn create_mutations(&self, unit: &UnitName) -> Result<Vec<MutationDetails>, EngineError> {
        let mutater = self.config.engine.create_mutator(Arc::clone(&self.source))?;
        let filter = self.filter.create_filter();

        let candidates = mutater.find_mutations(unit)?;
        let found = candidates.len();

        // Survivors are matched back by content so the mutater's order wins,
        // and a rejected twin of a kept candidate stays rejected.
        let mut kept: HashMap<MutationIdentifier, Vec<MutationDetails>> = HashMap::new();
        for survivor in filter.filter(candidates.clone(), unit) {
            kept.entry(survivor.id().clone()).or_default().push(survivor);
        }

        let mut emitted: HashSet<MutationIdentifier> = HashSet::new();
        let mut mutations = Vec::new();
        for candidate in candidates {
            let Some(survivors) = kept.get_mut(candidate.id()) else {
                continue;
            };
            let Some(position) = survivors.iter().position(|s| *s == candidate) else {
                continue;
            };
            survivors.swap_remove(position);
            // One mutant per identifier.
            if !emitted.insert(candidate.id().clone()) {
                continue;
            }
            let tests = self.tests_for(&candidate);
            mutations.push(candidate.with_tests(tests));
        }

        tracing::debug!(
            %unit,
            found,
            filtered = found - mutations.len(),
            uncovered = mutations.iter().filter(|m| !m.is_covered()).count(),
            "created mutations"
        );
        Ok(mutations)
    }

    /// Runs [`MutationSource::create_mutations`] for each unit, reporting
    /// failures per unit instead of stopping.
    pub fn create_all<'a>(&self, units: impl IntoIterator<Item = &'a UnitName>) -> Vec<UnitOutcome> {
        units
            .into_iter()
            .map(|unit| {
                let result = self.create_mutations(unit);
                if let Err(e) = &result {
                    tracing::warn!(%unit, error = %e, "skipping unit");
                }
                UnitOutcome {
                    unit: unit.clone(),
                    result,
                }
            })
            .collect()
    }

    fn tests_for(&self, candidate: &MutationDetails) -> Vec<TestInfo> {
        let mut tests = if candidate.location().is_static_initializer() {
            self.coverage.tests_for_class(candidate.unit())
        } else {
            let line = ClassLine::new(candidate.unit().clone(), candidate.line());
            self.coverage.tests_for_class_line(&line)
        };
        // Stable: equal times keep the database's order.
        tests.sort_by_key(|test| test.time);
        tests
    }
}
