//! # Command module
//!
//! This module provides the lexer for the command side channel. Commands are single text lines of
//! the form `mnemonic [arguments...]`, where each argument is either a plain whitespace-delimited
//! word or a double-quoted string in which `\"` stands for a literal quote.
//!
//! The dispatch table which maps mnemonics onto handlers lives in [`table`].

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod table;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use table::{CommandHandler, CommandTable, CommandTableError, DispatchOutcome};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Maximum number of bytes stored for a single lexeme. Further bytes of an over-long token are
/// consumed but discarded.
pub const MAX_LEXEME_LENGTH: usize = 80;

const QUOTE: u8 = b'"';
const ESCAPE: u8 = b'\\';

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One token extracted from a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    /// The decoded text of the token, without surrounding quotes.
    pub text: String,

    /// What kind of token this was.
    pub kind: LexemeKind,
}

/// Iterator over the argument lexemes of a command line.
///
/// Stops at the end of the line. Unterminated quoted strings are yielded (their kind tells the
/// caller the line was malformed) and end the iteration since they run to the end of the line.
pub struct Arguments<'a> {
    line: &'a str,
    pos: usize,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The kinds of lexeme the lexer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexemeKind {
    /// Nothing but whitespace remained in the buffer.
    Empty,

    /// A plain whitespace-delimited word.
    Word,

    /// A string with both an opening and a closing quote.
    Quoted,

    /// A string with an opening quote which ran to the end of the buffer.
    Unterminated,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Lexeme {
    fn empty() -> Self {
        Self {
            text: String::new(),
            kind: LexemeKind::Empty,
        }
    }

    /// True only if the token had both an opening and a matching closing quote.
    pub fn is_quoted(&self) -> bool {
        self.kind == LexemeKind::Quoted
    }

    /// True if no token was found.
    pub fn is_empty(&self) -> bool {
        self.kind == LexemeKind::Empty
    }

    /// True if the token opened a quote it never closed.
    pub fn is_unterminated(&self) -> bool {
        self.kind == LexemeKind::Unterminated
    }
}

impl<'a> Arguments<'a> {
    /// Iterate over the lexemes of `line` starting at byte index `start`.
    pub fn new(line: &'a str, start: usize) -> Self {
        Self { line, pos: start }
    }
}

impl<'a> Iterator for Arguments<'a> {
    type Item = Lexeme;

    fn next(&mut self) -> Option<Lexeme> {
        if self.pos >= self.line.len() {
            return None;
        }

        let (next, lexeme) = extract_lexeme(self.line, self.pos, self.line.len());
        self.pos = next;

        match lexeme.kind {
            LexemeKind::Empty => None,
            _ => Some(lexeme),
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Extract the next lexeme from `line`, scanning from byte index `start`.
///
/// Only the first `buffer_length` bytes of the line are considered (clamped to the line's
/// length). Leading whitespace is skipped. If the token starts with a quote, bytes are consumed up
/// to the next unescaped quote or the end of the buffer, decoding `\"` into `"`. Otherwise bytes
/// are consumed up to the next whitespace.
///
/// Returns the index immediately following the consumed token, or the buffer length if no token
/// was found, along with the decoded lexeme.
pub fn extract_lexeme(line: &str, start: usize, buffer_length: usize) -> (usize, Lexeme) {
    let buf = line.as_bytes();
    let len = buffer_length.min(buf.len());
    let mut pos = start;

    // Skip leading whitespace
    while pos < len && is_space(buf[pos]) {
        pos += 1;
    }

    if pos >= len {
        return (len, Lexeme::empty());
    }

    let mut text = Vec::with_capacity(MAX_LEXEME_LENGTH);
    let mut push = |b: u8| {
        if text.len() < MAX_LEXEME_LENGTH {
            text.push(b);
        }
    };

    let kind = if buf[pos] == QUOTE {
        // Skip the opening quote
        pos += 1;
        let mut closed = false;

        while pos < len {
            if buf[pos] == ESCAPE && pos + 1 < len && buf[pos + 1] == QUOTE {
                push(QUOTE);
                pos += 2;
            } else if buf[pos] == QUOTE {
                closed = true;
                pos += 1;
                break;
            } else {
                push(buf[pos]);
                pos += 1;
            }
        }

        if closed {
            LexemeKind::Quoted
        } else {
            LexemeKind::Unterminated
        }
    } else {
        while pos < len && !is_space(buf[pos]) {
            push(buf[pos]);
            pos += 1;
        }

        LexemeKind::Word
    };

    (
        pos,
        Lexeme {
            text: String::from_utf8_lossy(&text).into_owned(),
            kind,
        },
    )
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// The C locale whitespace set: space, tab, newline, vertical tab, form feed, carriage return.
fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_single_word() {
        let line = "ping-camera";
        let (next, lex) = extract_lexeme(line, 0, line.len());

        assert_eq!(lex.text, "ping-camera");
        assert_eq!(lex.kind, LexemeKind::Word);
        assert!(!lex.is_quoted());
        assert_eq!(next, line.len());
    }

    #[test]
    fn test_quoted_argument() {
        let line = "set-name \"Front Cam\"";
        let (next, mnemonic) = extract_lexeme(line, 0, line.len());
        assert_eq!(mnemonic.text, "set-name");
        assert_eq!(next, 8);

        let (next, arg) = extract_lexeme(line, next, line.len());
        assert_eq!(arg.text, "Front Cam");
        assert!(arg.is_quoted());
        assert_eq!(next, line.len());
    }

    #[test]
    fn test_unterminated_quote() {
        let line = "bad \"unterminated";
        let (next, _) = extract_lexeme(line, 0, line.len());
        let (next, arg) = extract_lexeme(line, next, line.len());

        assert_eq!(arg.text, "unterminated");
        assert!(!arg.is_quoted());
        assert!(arg.is_unterminated());
        assert_eq!(next, line.len());
    }

    #[test]
    fn test_escaped_quote() {
        let line = r#"say "a \"b\" c" tail"#;
        let (next, _) = extract_lexeme(line, 0, line.len());
        let (next, arg) = extract_lexeme(line, next, line.len());

        assert_eq!(arg.text, r#"a "b" c"#);
        assert!(arg.is_quoted());
        assert_eq!(&line[next..], " tail");

        // A backslash not followed by a quote is kept verbatim
        let line = r#""c:\dir""#;
        let (_, arg) = extract_lexeme(line, 0, line.len());
        assert_eq!(arg.text, r"c:\dir");
        assert!(arg.is_quoted());
    }

    #[test]
    fn test_whitespace_only() {
        let line = " \t\r\n";
        let (next, lex) = extract_lexeme(line, 0, line.len());
        assert!(lex.is_empty());
        assert_eq!(lex.text, "");
        assert_eq!(next, line.len());

        let (next, lex) = extract_lexeme("word", 4, 4);
        assert!(lex.is_empty());
        assert_eq!(next, 4);
    }

    #[test]
    fn test_buffer_length_limits_scan() {
        let line = "ping-camera extra";
        let (next, lex) = extract_lexeme(line, 0, 4);
        assert_eq!(lex.text, "ping");
        assert_eq!(next, 4);

        // A buffer length past the end of the line is clamped
        let (next, lex) = extract_lexeme("ping", 0, 80);
        assert_eq!(lex.text, "ping");
        assert_eq!(next, 4);
    }

    #[test]
    fn test_empty_quoted_string() {
        let line = "name \"\"";
        let args: Vec<Lexeme> = Arguments::new(line, 4).collect();
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].text, "");
        assert!(args[0].is_quoted());
    }

    #[test]
    fn test_long_lexeme_is_truncated() {
        let line = "x".repeat(MAX_LEXEME_LENGTH + 20);
        let (next, lex) = extract_lexeme(&line, 0, line.len());
        assert_eq!(lex.text.len(), MAX_LEXEME_LENGTH);
        assert_eq!(next, line.len());
    }

    #[test]
    fn test_arguments_iterator() {
        let line = "cmd one \"two three\"  four ";
        let (start, _) = extract_lexeme(line, 0, line.len());
        let args: Vec<String> = Arguments::new(line, start).map(|l| l.text).collect();

        assert_eq!(args, vec!["one", "two three", "four"]);
    }
}
