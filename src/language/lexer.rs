use crate::language::{
    span::Span,
    token::{Token, TokenKind},
};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, alphanumeric1, digit1, multispace1},
    combinator::{map, recognize, value},
    multi::many0_count,
    sequence::pair,
};

#[derive(Debug)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

pub fn lex(source: &str) -> Result<Vec<Token>, Vec<LexError>> {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut remaining = source;

    loop {
        if let Ok((rest, _)) = trivia(remaining) {
            remaining = rest;
        }
        let offset = source.len() - remaining.len();
        if remaining.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: Span::new(offset, offset),
            });
            break;
        }

        match token(remaining) {
            Ok((rest, kind)) => {
                let consumed = remaining.len() - rest.len();
                tokens.push(Token {
                    kind,
                    span: Span::new(offset, offset + consumed),
                });
                remaining = rest;
            }
            Err(_) => {
                let (message, consumed) = match integer_digits(remaining) {
                    Ok((rest, digits)) => (
                        format!("integer literal `{digits}` does not fit in 64 bits"),
                        remaining.len() - rest.len(),
                    ),
                    Err(_) => {
                        let ch = remaining.chars().next().unwrap_or('\0');
                        (format!("unexpected character `{ch}`"), ch.len_utf8())
                    }
                };
                errors.push(LexError {
                    message,
                    span: Span::new(offset, offset + consumed),
                });
                remaining = &remaining[consumed..];
            }
        }
    }

    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(errors)
    }
}

fn trivia(input: &str) -> IResult<&str, usize> {
    many0_count(alt((multispace1, line_comment)))(input)
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("//"), take_while(|ch| ch != '\n')))(input)
}

fn token(input: &str) -> IResult<&str, TokenKind> {
    alt((integer, word, compound_symbol, single_symbol))(input)
}

fn integer_digits(input: &str) -> IResult<&str, &str> {
    digit1(input)
}

fn integer(input: &str) -> IResult<&str, TokenKind> {
    let (rest, digits) = integer_digits(input)?;
    match digits.parse::<i64>() {
        Ok(value) => Ok((rest, TokenKind::Integer(value))),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn word(input: &str) -> IResult<&str, TokenKind> {
    map(identifier, |word: &str| match word {
        "fn" => TokenKind::Fn,
        "coro" => TokenKind::Coro,
        "let" => TokenKind::Let,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "return" => TokenKind::Return,
        "defer" => TokenKind::Defer,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "co_await" => TokenKind::CoAwait,
        "co_yield" => TokenKind::CoYield,
        "co_return" => TokenKind::CoReturn,
        other => TokenKind::Identifier(other.to_string()),
    })(input)
}

fn compound_symbol(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::Arrow, tag("->")),
        value(TokenKind::EqEq, tag("==")),
        value(TokenKind::NotEq, tag("!=")),
        value(TokenKind::LtEq, tag("<=")),
        value(TokenKind::GtEq, tag(">=")),
        value(TokenKind::AndAnd, tag("&&")),
        value(TokenKind::OrOr, tag("||")),
    ))(input)
}

fn single_symbol(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::LParen, tag("(")),
        value(TokenKind::RParen, tag(")")),
        value(TokenKind::LBrace, tag("{")),
        value(TokenKind::RBrace, tag("}")),
        value(TokenKind::Comma, tag(",")),
        value(TokenKind::Semi, tag(";")),
        value(TokenKind::Eq, tag("=")),
        value(TokenKind::Lt, tag("<")),
        value(TokenKind::Gt, tag(">")),
        value(TokenKind::Plus, tag("+")),
        value(TokenKind::Minus, tag("-")),
        value(TokenKind::Star, tag("*")),
        value(TokenKind::Slash, tag("/")),
        value(TokenKind::Percent, tag("%")),
        value(TokenKind::Bang, tag("!")),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source)
            .expect("lex")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn keywords_and_symbols() {
        assert_eq!(
            kinds("coro g() -> generator { co_yield 1; }"),
            vec![
                TokenKind::Coro,
                TokenKind::Identifier("g".into()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::Identifier("generator".into()),
                TokenKind::LBrace,
                TokenKind::CoYield,
                TokenKind::Integer(1),
                TokenKind::Semi,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_spans_track_offsets() {
        let tokens = lex("// header\nlet x = 10;").expect("lex");
        assert_eq!(tokens[0].kind, TokenKind::Let);
        assert_eq!(tokens[0].span, Span::new(10, 13));
        assert_eq!(tokens[3].kind, TokenKind::Integer(10));
        assert_eq!(tokens[3].span, Span::new(18, 20));
    }

    #[test]
    fn reports_unknown_characters() {
        let errors = lex("let x = 1 @ 2;").expect_err("should fail");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].span, Span::new(10, 11));
        assert!(errors[0].message.contains('@'));
    }

    #[test]
    fn reports_oversized_integers() {
        let errors = lex("99999999999999999999").expect_err("should fail");
        assert!(errors[0].message.contains("64 bits"));
    }
}
