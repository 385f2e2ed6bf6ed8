use crate::language::span::Span;
use miette::SourceSpan;

/// A front-end error: what went wrong, where, and an optional hint.
#[derive(Clone, Debug)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.len()).into()
    }
}

/// Every error one front-end pass found, in source order.
#[derive(Clone, Debug, Default)]
pub struct SyntaxErrors {
    pub errors: Vec<SyntaxError>,
}

impl SyntaxErrors {
    /// Fails with the collected errors unless there are none.
    pub fn check(errors: Vec<SyntaxError>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self { errors })
        }
    }
}

impl FromIterator<SyntaxError> for SyntaxErrors {
    fn from_iter<I: IntoIterator<Item = SyntaxError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_only_when_nothing_was_reported() {
        assert!(SyntaxErrors::check(Vec::new()).is_ok());

        let errors = SyntaxErrors::check(vec![
            SyntaxError::new("first", Span::new(0, 1)),
            SyntaxError::new("second", Span::new(4, 9)).with_help("try again"),
        ])
        .expect_err("two errors");
        let messages: Vec<&str> = errors.errors.iter().map(|err| err.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(errors.errors[1].help.as_deref(), Some("try again"));
    }

    #[test]
    fn spans_convert_to_offset_and_length() {
        let span = SourceSpan::from(Span::new(4, 9));
        assert_eq!(span.offset(), 4);
        assert_eq!(span.len(), 5);
    }
}
