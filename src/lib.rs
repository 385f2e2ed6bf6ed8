#![allow(clippy::collapsible_if)]

pub mod diagnostics;
pub mod language;
pub mod logging;
pub mod runtime;

use language::{
    compiler::{Compiler, LowerOptions, LoweringErrors},
    desugar::desugar_program,
    errors::SyntaxErrors,
    ir::Module,
    parser::parse_program,
};

/// Why a source file could not be lowered.
#[derive(Debug)]
pub enum CompileFailure {
    Syntax(SyntaxErrors),
    Lowering(LoweringErrors),
}

/// Parses, resolves and lowers a whole source file.
pub fn compile_source(source: &str, options: LowerOptions) -> Result<Module, CompileFailure> {
    let program = parse_program(source).map_err(CompileFailure::Syntax)?;
    let checked = desugar_program(&program).map_err(CompileFailure::Syntax)?;
    Compiler::new(options)
        .compile_program(&checked)
        .map_err(CompileFailure::Lowering)
}
