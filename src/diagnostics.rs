use crate::{
    language::{
        compiler::{FunctionError, LoweringErrors},
        errors::{SyntaxError, SyntaxErrors},
    },
    runtime::RuntimeError,
};
use miette::{Diagnostic, NamedSource, Report, SourceSpan};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
pub struct SyntaxDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("here")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
}

impl SyntaxDiagnostic {
    pub fn from_error(src: NamedSource<String>, err: &SyntaxError) -> Self {
        Self {
            src,
            span: err.span.into(),
            help: err.help.clone(),
            message: err.message.clone(),
        }
    }
}

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("cannot lower `{function}`: {message}")]
#[diagnostic(code(prime_coro::lowering))]
pub struct LoweringDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("while lowering this")]
    span: Option<SourceSpan>,
    function: String,
    message: String,
}

impl LoweringDiagnostic {
    pub fn from_error(src: NamedSource<String>, err: &FunctionError) -> Self {
        // Synthetic nodes carry empty spans; those get no label.
        let span = err
            .error
            .span()
            .filter(|span| !span.is_empty())
            .map(SourceSpan::from);
        Self {
            src,
            span,
            function: err.function.clone(),
            message: err.error.to_string(),
        }
    }
}

pub fn emit_syntax_errors(path: &Path, source: &str, errors: &SyntaxErrors) {
    let src = NamedSource::new(path.display().to_string(), source.to_string());
    for err in &errors.errors {
        let diagnostic = SyntaxDiagnostic::from_error(src.clone(), err);
        eprintln!("{:?}", Report::new(diagnostic));
    }
}

pub fn emit_lowering_errors(path: &Path, source: &str, errors: &LoweringErrors) {
    let src = NamedSource::new(path.display().to_string(), source.to_string());
    for err in &errors.errors {
        let diagnostic = LoweringDiagnostic::from_error(src.clone(), err);
        eprintln!("{:?}", Report::new(diagnostic));
    }
}

pub fn report_runtime_error(error: &RuntimeError) {
    eprintln!("Runtime error: {}", error);
}

pub fn report_io_error(path: &Path, error: &std::io::Error) {
    eprintln!("Failed to access {}: {}", path.display(), error);
}
