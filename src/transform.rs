//! Coverage instrumentation of wasm units.
//!
//! Selected modules gain one imported function, `__mutacov.probe: (i64) -> ()`,
//! appended after their existing imports. Every defined function index shifts
//! up by one to make room for it. Probes are `i64.const <id>; call <probe>`
//! pairs placed at function entry and at the start of every basic block. A
//! pair leaves the operand stack as it found it, so it is valid at any
//! instruction boundary, unreachable code included.

use std::convert::Infallible;

use regex::Regex;
use thiserror::Error;
use wasm_encoder::reencode::{self, Reencode};
use wasm_encoder::{
    CodeSection, DataCountSection, DataSection, ElementSection, EntityType, ExportSection, Function,
    FunctionSection, GlobalSection, ImportSection, Instruction, MemorySection, Module, StartSection,
    TableSection, TagSection, TypeSection, ValType,
};
use wasmparser::{
    BinaryReaderError, Encoding, FunctionBody, Operator, Parser, Payload, TypeRef, TypeSectionReader,
    Validator, WasmFeatures,
};

use crate::probe::{ProbeId, unit_tag};
use crate::unit::UnitName;

pub const PROBE_MODULE: &str = "__mutacov";
pub const PROBE_FUNCTION: &str = "probe";

const NO_RESULTS: [ValType; 0] = [];

/// Decides which units get instrumented.
pub trait UnitPredicate: Send + Sync {
    fn matches(&self, name: &str) -> bool;
}

impl<F> UnitPredicate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, name: &str) -> bool {
        self(name)
    }
}

/// Glob list over qualified unit names; `*` matches any run of characters.
#[derive(Debug, Clone)]
pub struct NamePatterns {
    regex: Option<Regex>,
}

impl NamePatterns {
    pub fn new<S: AsRef<str>>(globs: &[S]) -> Result<Self, regex::Error> {
        if globs.is_empty() {
            return Ok(Self::none());
        }
        let alternatives: Vec<String> = globs
            .iter()
            .map(|glob| regex::escape(glob.as_ref()).replace(r"\*", ".*"))
            .collect();
        let regex = Regex::new(&format!("^(?:{})$", alternatives.join("|")))?;
        Ok(Self { regex: Some(regex) })
    }

    pub fn all() -> Self {
        Self {
            regex: Regex::new("^.*$").ok(),
        }
    }

    pub fn none() -> Self {
        Self { regex: None }
    }
}

impl UnitPredicate for NamePatterns {
    fn matches(&self, name: &str) -> bool {
        self.regex.as_ref().is_some_and(|regex| regex.is_match(name))
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{unit} is not a well-formed module: {source}")]
    Malformed {
        unit: UnitName,
        #[source]
        source: BinaryReaderError,
    },

    #[error("{unit} cannot be instrumented: {reason}")]
    Unsupported { unit: UnitName, reason: String },

    #[error("failed to re-encode {unit}: {message}")]
    Reencode { unit: UnitName, message: String },

    #[error("instrumented {unit} failed verification: {source}")]
    Verification {
        unit: UnitName,
        #[source]
        source: BinaryReaderError,
    },
}

impl TransformError {
    pub fn unit(&self) -> &UnitName {
        match self {
            TransformError::Malformed { unit, .. }
            | TransformError::Unsupported { unit, .. }
            | TransformError::Reencode { unit, .. }
            | TransformError::Verification { unit, .. } => unit,
        }
    }
}

/// Where a probe was placed, in terms of the original module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSite {
    pub probe: ProbeId,
    /// Function index before instrumentation.
    pub function: u32,
    /// Module offset of the instruction the probe precedes.
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct InstrumentedUnit {
    pub bytes: Vec<u8>,
    pub probes: Vec<ProbeSite>,
}

#[derive(Debug, Clone)]
pub enum Transformed {
    /// The predicate rejected the unit; use the input as is.
    Unchanged,
    Instrumented(InstrumentedUnit),
}

impl Transformed {
    pub fn is_instrumented(&self) -> bool {
        matches!(self, Transformed::Instrumented(_))
    }

    pub fn into_bytes(self, original: &[u8]) -> Vec<u8> {
        match self {
            Transformed::Unchanged => original.to_vec(),
            Transformed::Instrumented(unit) => unit.bytes,
        }
    }
}

/// Runs the structural verifier over a unit.
pub fn verify(bytes: &[u8]) -> Result<(), BinaryReaderError> {
    Validator::new_with_features(WasmFeatures::all())
        .validate_all(bytes)
        .map(drop)
}

/// Inserts coverage probes into units accepted by the predicate. Holds no
/// mutable state, so one transformer may serve many loader threads.
#[derive(Debug, Clone)]
pub struct CoverageTransformer<P> {
    predicate: P,
}

impl<P: UnitPredicate> CoverageTransformer<P> {
    pub fn new(predicate: P) -> Self {
        Self { predicate }
    }

    pub fn transform(&self, unit: &UnitName, bytes: &[u8]) -> Result<Transformed, TransformError> {
        if !self.predicate.matches(unit.as_str()) {
            tracing::trace!(%unit, "unit not selected for instrumentation");
            return Ok(Transformed::Unchanged);
        }

        verify(bytes).map_err(|source| TransformError::Malformed {
            unit: unit.clone(),
            source,
        })?;
        let instrumented = Instrumenter::new(unit).run(bytes)?;
        verify(&instrumented.bytes).map_err(|source| TransformError::Verification {
            unit: unit.clone(),
            source,
        })?;

        tracing::debug!(
            %unit,
            probes = instrumented.probes.len(),
            bytes = instrumented.bytes.len(),
            "instrumented unit"
        );
        Ok(Transformed::Instrumented(instrumented))
    }
}

struct Instrumenter {
    unit: UnitName,
    tag: u32,
    imported_functions: u32,
    probe_type: Option<u32>,
    probe_function: Option<u32>,
    next_probe: u32,
    probes: Vec<ProbeSite>,
}

impl Reencode for Instrumenter {
    type Error = Infallible;

    fn function_index(&mut self, func: u32) -> u32 {
        if func >= self.imported_functions {
            func + 1
        } else {
            func
        }
    }
}

impl Instrumenter {
    fn new(unit: &UnitName) -> Self {
        Self {
            unit: unit.clone(),
            tag: unit_tag(unit),
            imported_functions: 0,
            probe_type: None,
            probe_function: None,
            next_probe: 0,
            probes: Vec::new(),
        }
    }

    fn malformed(&self, source: BinaryReaderError) -> TransformError {
        TransformError::Malformed {
            unit: self.unit.clone(),
            source,
        }
    }

    fn failed(&self, error: reencode::Error<Infallible>) -> TransformError {
        TransformError::Reencode {
            unit: self.unit.clone(),
            message: error.to_string(),
        }
    }

    fn unsupported(&self, reason: impl Into<String>) -> TransformError {
        TransformError::Unsupported {
            unit: self.unit.clone(),
            reason: reason.into(),
        }
    }

    fn run(mut self, bytes: &[u8]) -> Result<InstrumentedUnit, TransformError> {
        let mut module = Module::new();
        let mut code: Option<(CodeSection, u32)> = None;
        let mut next_function = 0;

        for payload in Parser::new(0).parse_all(bytes) {
            let payload = payload.map_err(|e| self.malformed(e))?;
            match payload {
                Payload::Version { encoding, .. } => {
                    if encoding != Encoding::Module {
                        return Err(self.unsupported("components are not instrumented"));
                    }
                }
                Payload::TypeSection(reader) => {
                    let defined = count_types(&reader).map_err(|e| self.malformed(e))?;
                    let mut types = TypeSection::new();
                    self.parse_type_section(&mut types, reader)
                        .map_err(|e| self.failed(e))?;
                    types.ty().function([ValType::I64], NO_RESULTS);
                    self.probe_type = Some(defined);
                    module.section(&types);
                }
                Payload::ImportSection(reader) => {
                    let probe_type = self.ensure_types(&mut module);
                    for import in reader.clone() {
                        let import = import.map_err(|e| self.malformed(e))?;
                        if matches!(import.ty, TypeRef::Func(_)) {
                            self.imported_functions += 1;
                        }
                    }
                    let mut imports = ImportSection::new();
                    self.parse_import_section(&mut imports, reader)
                        .map_err(|e| self.failed(e))?;
                    self.push_probe_import(&mut imports, probe_type);
                    module.section(&imports);
                }
                Payload::FunctionSection(reader) => {
                    self.ensure_prelude(&mut module);
                    let mut functions = FunctionSection::new();
                    self.parse_function_section(&mut functions, reader)
                        .map_err(|e| self.failed(e))?;
                    module.section(&functions);
                }
                Payload::TableSection(reader) => {
                    self.ensure_prelude(&mut module);
                    let mut tables = TableSection::new();
                    self.parse_table_section(&mut tables, reader)
                        .map_err(|e| self.failed(e))?;
                    module.section(&tables);
                }
                Payload::MemorySection(reader) => {
                    self.ensure_prelude(&mut module);
                    let mut memories = MemorySection::new();
                    self.parse_memory_section(&mut memories, reader)
                        .map_err(|e| self.failed(e))?;
                    module.section(&memories);
                }
                Payload::TagSection(reader) => {
                    self.ensure_prelude(&mut module);
                    let mut tags = TagSection::new();
                    self.parse_tag_section(&mut tags, reader)
                        .map_err(|e| self.failed(e))?;
                    module.section(&tags);
                }
                Payload::GlobalSection(reader) => {
                    self.ensure_prelude(&mut module);
                    let mut globals = GlobalSection::new();
                    self.parse_global_section(&mut globals, reader)
                        .map_err(|e| self.failed(e))?;
                    module.section(&globals);
                }
                Payload::ExportSection(reader) => {
                    self.ensure_prelude(&mut module);
                    let mut exports = ExportSection::new();
                    self.parse_export_section(&mut exports, reader)
                        .map_err(|e| self.failed(e))?;
                    module.section(&exports);
                }
                Payload::StartSection { func, .. } => {
                    self.ensure_prelude(&mut module);
                    let function_index = self.function_index(func);
                    module.section(&StartSection { function_index });
                }
                Payload::ElementSection(reader) => {
                    self.ensure_prelude(&mut module);
                    let mut elements = ElementSection::new();
                    self.parse_element_section(&mut elements, reader)
                        .map_err(|e| self.failed(e))?;
                    module.section(&elements);
                }
                Payload::DataCountSection { count, .. } => {
                    self.ensure_prelude(&mut module);
                    module.section(&DataCountSection { count });
                }
                Payload::CodeSectionStart { count, .. } => {
                    self.ensure_prelude(&mut module);
                    next_function = self.imported_functions;
                    if count == 0 {
                        module.section(&CodeSection::new());
                    } else {
                        code = Some((CodeSection::new(), count));
                    }
                }
                Payload::CodeSectionEntry(body) => {
                    let Some((section, remaining)) = code.as_mut() else {
                        return Err(self.unsupported("function body outside a code section"));
                    };
                    self.instrument_body(section, next_function, body)?;
                    next_function += 1;
                    *remaining -= 1;
                    if *remaining == 0 {
                        if let Some((section, _)) = code.take() {
                            module.section(&section);
                        }
                    }
                }
                Payload::DataSection(reader) => {
                    self.ensure_prelude(&mut module);
                    let mut data = DataSection::new();
                    self.parse_data_section(&mut data, reader)
                        .map_err(|e| self.failed(e))?;
                    module.section(&data);
                }
                Payload::CustomSection(reader) => {
                    self.parse_custom_section(&mut module, reader)
                        .map_err(|e| self.failed(e))?;
                }
                Payload::End(_) => {
                    self.ensure_prelude(&mut module);
                }
                Payload::UnknownSection { id, .. } => {
                    return Err(self.unsupported(format!("unknown section id {id}")));
                }
                _ => {
                    return Err(self.unsupported("component sections are not instrumented"));
                }
            }
        }

        Ok(InstrumentedUnit {
            bytes: module.finish(),
            probes: self.probes,
        })
    }

    /// Emits a type section holding only the probe signature when the
    /// module has none. Returns the probe's type index.
    fn ensure_types(&mut self, module: &mut Module) -> u32 {
        if let Some(ty) = self.probe_type {
            return ty;
        }
        let mut types = TypeSection::new();
        types.ty().function([ValType::I64], NO_RESULTS);
        module.section(&types);
        self.probe_type = Some(0);
        0
    }

    fn ensure_prelude(&mut self, module: &mut Module) {
        let probe_type = self.ensure_types(module);
        if self.probe_function.is_none() {
            let mut imports = ImportSection::new();
            self.push_probe_import(&mut imports, probe_type);
            module.section(&imports);
        }
    }

    fn push_probe_import(&mut self, imports: &mut ImportSection, probe_type: u32) {
        imports.import(PROBE_MODULE, PROBE_FUNCTION, EntityType::Function(probe_type));
        self.probe_function = Some(self.imported_functions);
    }

    fn instrument_body(
        &mut self,
        code: &mut CodeSection,
        function: u32,
        body: FunctionBody<'_>,
    ) -> Result<(), TransformError> {
        let probe_function = self.probe_function.unwrap_or(self.imported_functions);
        let mut func = self
            .new_function_with_parsed_locals(&body)
            .map_err(|e| self.failed(e))?;
        let mut reader = body.get_operators_reader().map_err(|e| self.malformed(e))?;

        // Block nesting, counting the function body itself.
        let mut depth = 1u32;
        let mut probe_next = true;
        while !reader.eof() {
            let (op, offset) = reader.read_with_offset().map_err(|e| self.malformed(e))?;
            if probe_next {
                self.emit_probe(&mut func, probe_function, function, offset);
            }
            probe_next = match &op {
                Operator::Block { .. }
                | Operator::Loop { .. }
                | Operator::If { .. }
                | Operator::Try { .. }
                | Operator::TryTable { .. } => {
                    depth += 1;
                    true
                }
                Operator::Else | Operator::Catch { .. } | Operator::CatchAll => true,
                Operator::BrIf { .. }
                | Operator::BrOnNull { .. }
                | Operator::BrOnNonNull { .. }
                | Operator::BrOnCast { .. }
                | Operator::BrOnCastFail { .. } => true,
                // The final `end` closes the body and is never followed.
                Operator::End | Operator::Delegate { .. } => {
                    depth = depth.saturating_sub(1);
                    depth > 0
                }
                _ => false,
            };
            let instruction = self.instruction(op).map_err(|e| self.failed(e))?;
            func.instruction(&instruction);
        }

        code.function(&func);
        Ok(())
    }

    fn emit_probe(&mut self, func: &mut Function, probe_function: u32, function: u32, offset: usize) {
        let probe = ProbeId::new(self.tag, self.next_probe);
        self.next_probe += 1;
        func.instruction(&Instruction::I64Const(probe.as_u64() as i64));
        func.instruction(&Instruction::Call(probe_function));
        self.probes.push(ProbeSite {
            probe,
            function,
            offset,
        });
    }
}

fn count_types(reader: &TypeSectionReader<'_>) -> Result<u32, BinaryReaderError> {
    let mut count = 0;
    for group in reader.clone() {
        count += group?.types().count() as u32;
    }
    Ok(count)
}
