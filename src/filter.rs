use std::sync::Arc;

use crate::mutants::MutationDetails;
use crate::unit::UnitName;

/// Removes candidates that should not be tested.
pub trait MutationFilter {
    fn filter(&self, candidates: Vec<MutationDetails>, unit: &UnitName) -> Vec<MutationDetails>;
}

/// Closures act as retain predicates.
impl<F> MutationFilter for F
where
    F: Fn(&MutationDetails) -> bool,
{
    fn filter(&self, mut candidates: Vec<MutationDetails>, _unit: &UnitName) -> Vec<MutationDetails> {
        candidates.retain(|candidate| self(candidate));
        candidates
    }
}

/// Rejects nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnfilteredMutationFilter;

impl MutationFilter for UnfilteredMutationFilter {
    fn filter(&self, candidates: Vec<MutationDetails>, _unit: &UnitName) -> Vec<MutationDetails> {
        candidates
    }
}

pub trait MutationFilterFactory: Send + Sync {
    fn create_filter(&self) -> Box<dyn MutationFilter>;
}

/// Factory for [`UnfilteredMutationFilter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Unfiltered;

impl MutationFilterFactory for Unfiltered {
    fn create_filter(&self) -> Box<dyn MutationFilter> {
        Box::new(UnfilteredMutationFilter)
    }
}

/// Hands out a shared retain predicate as the filter.
pub struct FnFilterFactory {
    predicate: Arc<dyn Fn(&MutationDetails) -> bool + Send + Sync>,
}

impl FnFilterFactory {
    pub fn new(predicate: impl Fn(&MutationDetails) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl MutationFilterFactory for FnFilterFactory {
    fn create_filter(&self) -> Box<dyn MutationFilter> {
        let predicate = Arc::clone(&self.predicate);
        Box::new(move |candidate: &MutationDetails| predicate(candidate))
    }
}
