pub mod coverage;
pub mod engine;
pub mod filter;
pub mod mutants;
pub mod output;
pub mod probe;
pub mod source;
pub mod transform;
pub mod unit;

pub use coverage::{CoverageDatabase, InMemoryCoverage, TestInfo};
pub use engine::{ByteSource, DirByteSource, EngineError, ManifestEngine, Mutater, MutationEngine};
pub use filter::{MutationFilter, MutationFilterFactory, Unfiltered, UnfilteredMutationFilter};
pub use mutants::{MutationDetails, MutationIdentifier};
pub use probe::{InvokeReceiver, ProbeId, ProbeStore, enter_test};
pub use source::{MutationConfig, MutationSource};
pub use transform::{CoverageTransformer, NamePatterns, TransformError, Transformed, UnitPredicate};
pub use unit::{ClassLine, Location, UnitName};
