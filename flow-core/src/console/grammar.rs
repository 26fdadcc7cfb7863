#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for console lines.
//!
//! `regal` produces a bounded token stream; `winnow` combinators walk the
//! tokens against the ordered command table in [`super::catalog`].

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
use winnow::combinator::opt;
use winnow::error::ContextError;
use winnow::prelude::*;

use super::catalog::{self, CommandForm, CommandTag, ValueSpec};

/// Maximum number of tokens produced per console line.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds recognized by the console grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    #[regex(r"[0-9]+")]
    Integer,
    /// Keyword, state token, or help topic.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
    #[token("=")]
    Equals,
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    TooManyTokens { processed: usize },
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "token buffer exhausted after {processed} items")
            }
            LexError::Engine => write!(f, "lexer engine error"),
        }
    }
}

/// Why a token stream did not form a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarError {
    /// The leading identifier names no command in that form.
    UnknownCommand { span: Range<usize> },
    /// A value after `=` did not fit its slot.
    InvalidValue { span: Range<usize> },
    UnexpectedToken { found: TokenKind, span: Range<usize> },
    UnexpectedEnd,
    /// The lexer could not classify part of the line.
    InvalidToken { span: Range<usize> },
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::UnknownCommand { span } => write!(f, "unknown command at {span:?}"),
            GrammarError::InvalidValue { span } => write!(f, "invalid value at {span:?}"),
            GrammarError::UnexpectedToken { found, span } => {
                write!(f, "unexpected {found:?} at {span:?}")
            }
            GrammarError::UnexpectedEnd => write!(f, "unexpected end of line"),
            GrammarError::InvalidToken { span } => write!(f, "unsupported input at {span:?}"),
        }
    }
}

/// Combined lex/parse error. Holds no borrows so it can outlive the line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    Lex(LexError),
    Unrecognized(GrammarError),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Unrecognized(err) => err.fmt(f),
        }
    }
}

/// Parsed console command. State tokens are kept raw; the dispatcher
/// resolves them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand<'a> {
    SetMode(&'a str),
    OpenSideA(u16),
    OpenSideB(u16),
    SetPulse(u16),
    SetCurrent(u16),
    Panic,
    Mode,
    Current,
    Pulse,
    Version,
    Serial,
    Count,
    Help { topic: Option<&'a str> },
}

impl ConsoleCommand<'_> {
    #[must_use]
    pub const fn tag(&self) -> CommandTag {
        match self {
            ConsoleCommand::SetMode(_) => CommandTag::SetMode,
            ConsoleCommand::OpenSideA(_) => CommandTag::OpenSideA,
            ConsoleCommand::OpenSideB(_) => CommandTag::OpenSideB,
            ConsoleCommand::SetPulse(_) => CommandTag::SetPulse,
            ConsoleCommand::SetCurrent(_) => CommandTag::SetCurrent,
            ConsoleCommand::Panic => CommandTag::Panic,
            ConsoleCommand::Mode => CommandTag::Mode,
            ConsoleCommand::Current => CommandTag::Current,
            ConsoleCommand::Pulse => CommandTag::Pulse,
            ConsoleCommand::Version => CommandTag::Version,
            ConsoleCommand::Serial => CommandTag::Serial,
            ConsoleCommand::Count => CommandTag::Count,
            ConsoleCommand::Help { .. } => CommandTag::Help,
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

/// Tokenize the provided line.
///
/// # Errors
///
/// Returns [`LexError`] when the line produces too many tokens.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        let lexeme = line.get(span.clone()).unwrap_or_default();
        push_token(&mut buffer, record.token, lexeme, span)?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let span = start..start + partial.fragment.len();
        push_token(&mut buffer, TokenKind::Error, partial.fragment, span)?;
    }

    Ok(buffer)
}

fn push_token<'a>(
    buffer: &mut TokenBuffer<'a>,
    kind: TokenKind,
    lexeme: &'a str,
    span: Range<usize>,
) -> Result<(), LexError> {
    buffer
        .push(Token { kind, lexeme, span })
        .map_err(|_| LexError::TooManyTokens {
            processed: MAX_TOKENS + 1,
        })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a console command from one line. Trailing line terminators are
/// accepted; anything else after the command is rejected.
///
/// # Errors
///
/// Returns [`ParseError::Lex`] for lexer failures and
/// [`ParseError::Unrecognized`] for lines that match no command.
pub fn parse(line: &str) -> Result<ConsoleCommand<'_>, ParseError> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Unrecognized(GrammarError::InvalidToken {
            span: token.span.clone(),
        }));
    }

    let all = tokens.as_slice();
    let mut rest = all;
    let command = command()
        .parse_next(&mut rest)
        .map_err(|_| ParseError::Unrecognized(classify_failure(all, rest)))?;

    if let Some(token) = rest.iter().find(|token| token.kind != TokenKind::Eol) {
        return Err(ParseError::Unrecognized(GrammarError::UnexpectedToken {
            found: token.kind,
            span: token.span.clone(),
        }));
    }

    Ok(command)
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, ConsoleCommand<'src>, ContextError>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let snapshot = *input;
        let keyword = token(TokenKind::Ident).parse_next(input)?;
        let assignment = input
            .first()
            .is_some_and(|token| token.kind == TokenKind::Equals);

        let Some(entry) = catalog::find(keyword.lexeme, assignment) else {
            *input = snapshot;
            return Err(ContextError::new());
        };

        match entry.form {
            CommandForm::Assign(spec) => {
                token(TokenKind::Equals).parse_next(input)?;
                assigned(entry.tag, spec).parse_next(input)
            }
            CommandForm::Query => query(entry.tag).ok_or_else(ContextError::new),
            CommandForm::QueryWithTopic => {
                let topic = opt(token(TokenKind::Ident)).parse_next(input)?;
                Ok(ConsoleCommand::Help {
                    topic: topic.map(|token| token.lexeme),
                })
            }
        }
    }
}

fn assigned<'src, 'slice>(
    tag: CommandTag,
    spec: ValueSpec,
) -> impl Parser<Input<'src, 'slice>, ConsoleCommand<'src>, ContextError>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match spec {
        ValueSpec::StateToken => {
            let value = token(TokenKind::Ident).parse_next(input)?;
            Ok(ConsoleCommand::SetMode(value.lexeme))
        }
        ValueSpec::Integer => {
            let value = integer().parse_next(input)?;
            match tag {
                CommandTag::OpenSideA => Ok(ConsoleCommand::OpenSideA(value)),
                CommandTag::OpenSideB => Ok(ConsoleCommand::OpenSideB(value)),
                CommandTag::SetPulse => Ok(ConsoleCommand::SetPulse(value)),
                CommandTag::SetCurrent => Ok(ConsoleCommand::SetCurrent(value)),
                _ => Err(ContextError::new()),
            }
        }
    }
}

const fn query<'a>(tag: CommandTag) -> Option<ConsoleCommand<'a>> {
    match tag {
        CommandTag::Panic => Some(ConsoleCommand::Panic),
        CommandTag::Mode => Some(ConsoleCommand::Mode),
        CommandTag::Current => Some(ConsoleCommand::Current),
        CommandTag::Pulse => Some(ConsoleCommand::Pulse),
        CommandTag::Version => Some(ConsoleCommand::Version),
        CommandTag::Serial => Some(ConsoleCommand::Serial),
        CommandTag::Count => Some(ConsoleCommand::Count),
        _ => None,
    }
}

fn token<'src, 'slice>(
    kind: TokenKind,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, ContextError>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        _ => Err(ContextError::new()),
    }
}

fn integer<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, u16, ContextError>
where
    'src: 'slice,
{
    token(TokenKind::Integer).verify_map(|token: Token<'src>| token.lexeme.parse::<u16>().ok())
}

/// Names the failure from where the parser stopped. Parsers only advance on
/// success, so the head of `rest` is the offending token.
fn classify_failure(all: &[Token<'_>], rest: &[Token<'_>]) -> GrammarError {
    let consumed = all.len() - rest.len();
    let after_equals = consumed
        .checked_sub(1)
        .and_then(|index| all.get(index))
        .is_some_and(|token| token.kind == TokenKind::Equals);

    match rest.first() {
        None => GrammarError::UnexpectedEnd,
        Some(token) if token.kind == TokenKind::Eol => GrammarError::UnexpectedEnd,
        Some(token) if after_equals => GrammarError::InvalidValue {
            span: token.span.clone(),
        },
        Some(token) if consumed == 0 && token.kind == TokenKind::Ident => {
            GrammarError::UnknownCommand {
                span: token.span.clone(),
            }
        }
        Some(token) => GrammarError::UnexpectedToken {
            found: token.kind,
            span: token.span.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> ConsoleCommand<'_> {
        parse(input).expect("command should parse")
    }

    fn unrecognized(input: &str) -> GrammarError {
        match parse(input) {
            Err(ParseError::Unrecognized(err)) => err,
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parses_write_forms() {
        assert_eq!(parse_ok("mode=ZPON\r\n"), ConsoleCommand::SetMode("ZPON"));
        assert_eq!(parse_ok("vac=3"), ConsoleCommand::OpenSideA(3));
        assert_eq!(parse_ok("vbc=0\n"), ConsoleCommand::OpenSideB(0));
        assert_eq!(parse_ok("pulse=250\r\n"), ConsoleCommand::SetPulse(250));
        assert_eq!(parse_ok("current=5\r"), ConsoleCommand::SetCurrent(5));
    }

    #[test]
    fn parses_queries() {
        assert_eq!(parse_ok("mode\r\n"), ConsoleCommand::Mode);
        assert_eq!(parse_ok("panic"), ConsoleCommand::Panic);
        assert_eq!(parse_ok("current"), ConsoleCommand::Current);
        assert_eq!(parse_ok("pulse"), ConsoleCommand::Pulse);
        assert_eq!(parse_ok("ver"), ConsoleCommand::Version);
        assert_eq!(parse_ok("ser"), ConsoleCommand::Serial);
        assert_eq!(parse_ok("count"), ConsoleCommand::Count);
    }

    #[test]
    fn keywords_are_case_insensitive_but_tokens_are_kept_raw() {
        assert_eq!(parse_ok("MODE\r\n"), ConsoleCommand::Mode);
        assert_eq!(parse_ok("Mode=zpon"), ConsoleCommand::SetMode("zpon"));
    }

    #[test]
    fn pump_toggle_token_lexes_as_one_ident() {
        assert_eq!(
            parse_ok("mode=PUMP_TOGGLE\r\n"),
            ConsoleCommand::SetMode("PUMP_TOGGLE")
        );
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(
            parse_ok("help pulse"),
            ConsoleCommand::Help {
                topic: Some("pulse")
            }
        );
        assert_eq!(parse_ok("help"), ConsoleCommand::Help { topic: None });
    }

    #[test]
    fn partial_keywords_are_unknown() {
        assert!(matches!(
            unrecognized("modeX\r\n"),
            GrammarError::UnknownCommand { .. }
        ));
        assert!(matches!(
            unrecognized("pan"),
            GrammarError::UnknownCommand { .. }
        ));
    }

    #[test]
    fn assignment_without_value_is_rejected() {
        assert_eq!(unrecognized("mode=\r\n"), GrammarError::UnexpectedEnd);
        assert!(matches!(
            unrecognized("mode=5"),
            GrammarError::InvalidValue { .. }
        ));
        assert!(matches!(
            unrecognized("pulse=99999"),
            GrammarError::InvalidValue { .. }
        ));
    }

    #[test]
    fn query_only_commands_reject_assignment() {
        assert!(matches!(
            unrecognized("panic=1"),
            GrammarError::UnknownCommand { .. }
        ));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(matches!(
            unrecognized("ver now"),
            GrammarError::UnexpectedToken {
                found: TokenKind::Ident,
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_token() {
        assert!(matches!(
            unrecognized("mode=ZPON$"),
            GrammarError::InvalidToken { .. }
        ));
    }

    #[test]
    fn lexer_emits_error_token_for_unknown_symbol() {
        let tokens = lex("ver#").expect("lexing should succeed");
        let last = tokens.last().expect("expected at least one token");
        assert_eq!(last.kind, TokenKind::Error);
        assert_eq!(last.lexeme, "#");
    }

    #[test]
    fn empty_line_is_unrecognized() {
        assert_eq!(unrecognized("\r\n"), GrammarError::UnexpectedEnd);
        assert_eq!(unrecognized(""), GrammarError::UnexpectedEnd);
    }
}
