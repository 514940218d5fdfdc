//! # Command dispatch table
//!
//! Maps mnemonics onto handler objects. The table is built once at startup and is read-only
//! afterwards, so it can be shared between threads behind an `Arc`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::io::Write;

use thiserror::Error;

use super::{extract_lexeme, Arguments, LexemeKind};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Status returned by a handler which completed successfully.
pub const STATUS_OK: i32 = 0;

/// Status returned by a handler whose arguments were missing or invalid.
pub const STATUS_BAD_ARGS: i32 = 1;

/// Status returned by a handler which could not write its reply.
pub const STATUS_IO_ERROR: i32 = -1;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A handler for one command mnemonic.
pub trait CommandHandler: Send + Sync {
    /// Execute the command.
    ///
    /// `line` is the full command line, `args_start` the byte index immediately after the
    /// mnemonic. Any reply is written to `out`. The returned status is informational only.
    fn handle(&self, line: &str, args_start: usize, out: &mut dyn Write) -> i32;
}

impl<F> CommandHandler for F
where
    F: Fn(&str, usize, &mut dyn Write) -> i32 + Send + Sync,
{
    fn handle(&self, line: &str, args_start: usize, out: &mut dyn Write) -> i32 {
        self(line, args_start, out)
    }
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Registry of command handlers keyed by mnemonic.
#[derive(Default)]
pub struct CommandTable {
    handlers: HashMap<String, Box<dyn CommandHandler>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur while building a [`CommandTable`].
#[derive(Debug, Error)]
pub enum CommandTableError {
    #[error("A handler for \"{0}\" is already registered")]
    DuplicateMnemonic(String),

    #[error("\"{0}\" is not a valid mnemonic, mnemonics must be a single unquoted word")]
    InvalidMnemonic(String),
}

/// The result of dispatching one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran and returned the given status.
    Handled(i32),

    /// The line contained only whitespace.
    Empty,

    /// No handler is registered for the mnemonic.
    Unknown(String),

    /// The mnemonic was a quoted string, or an argument opened a quote it never closed. Holds the
    /// mnemonic.
    Malformed(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CommandTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the given mnemonic.
    pub fn register<H>(&mut self, mnemonic: &str, handler: H) -> Result<(), CommandTableError>
    where
        H: CommandHandler + 'static,
    {
        // The mnemonic must survive a round trip through the lexer unchanged, otherwise it could
        // never be matched.
        let (next, lexeme) = extract_lexeme(mnemonic, 0, mnemonic.len());
        if lexeme.kind != LexemeKind::Word || next != mnemonic.len() || lexeme.text != mnemonic {
            return Err(CommandTableError::InvalidMnemonic(mnemonic.into()));
        }

        if self.handlers.contains_key(mnemonic) {
            return Err(CommandTableError::DuplicateMnemonic(mnemonic.into()));
        }

        self.handlers.insert(mnemonic.into(), Box::new(handler));

        Ok(())
    }

    /// Get the handler for a mnemonic, using an exact case-sensitive match.
    pub fn get(&self, mnemonic: &str) -> Option<&dyn CommandHandler> {
        self.handlers.get(mnemonic).map(|h| h.as_ref())
    }

    /// All registered mnemonics in alphabetical order.
    pub fn mnemonics(&self) -> Vec<&str> {
        let mut m: Vec<&str> = self.handlers.keys().map(|k| k.as_str()).collect();
        m.sort_unstable();
        m
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Lex the mnemonic from `line` and run the matching handler.
    ///
    /// Lines with an unterminated quoted argument never reach a handler. Nothing is written to
    /// `out` unless a handler runs.
    pub fn dispatch(&self, line: &str, out: &mut dyn Write) -> DispatchOutcome {
        let (args_start, mnemonic) = extract_lexeme(line, 0, line.len());

        match mnemonic.kind {
            LexemeKind::Empty => DispatchOutcome::Empty,
            LexemeKind::Quoted | LexemeKind::Unterminated => {
                DispatchOutcome::Malformed(mnemonic.text)
            }
            LexemeKind::Word
                if Arguments::new(line, args_start).any(|l| l.is_unterminated()) =>
            {
                DispatchOutcome::Malformed(mnemonic.text)
            }
            LexemeKind::Word => match self.get(&mnemonic.text) {
                Some(handler) => DispatchOutcome::Handled(handler.handle(line, args_start, out)),
                None => DispatchOutcome::Unknown(mnemonic.text),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Write a reply and convert the write result into a handler status.
pub fn reply(out: &mut dyn Write, message: &str, status: i32) -> i32 {
    match out.write_all(message.as_bytes()).and_then(|_| out.flush()) {
        Ok(_) => status,
        Err(_) => STATUS_IO_ERROR,
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn ping(_line: &str, _start: usize, out: &mut dyn Write) -> i32 {
        reply(out, "pong-camera\r\n", STATUS_OK)
    }

    #[test]
    fn test_dispatch_ping() {
        let mut table = CommandTable::new();
        table.register("ping-camera", ping).unwrap();

        let mut out = Vec::new();
        let outcome = table.dispatch("ping-camera", &mut out);

        assert_eq!(outcome, DispatchOutcome::Handled(STATUS_OK));
        assert_eq!(out, b"pong-camera\r\n");
    }

    fn echo(line: &str, start: usize, out: &mut dyn Write) -> i32 {
        reply(out, &line[start..], STATUS_OK)
    }

    #[test]
    fn test_dispatch_passes_args_start() {
        let mut table = CommandTable::new();
        table.register("echo", echo).unwrap();

        let mut out = Vec::new();
        table.dispatch("  echo hello there", &mut out);
        assert_eq!(out, b" hello there");
    }

    #[test]
    fn test_unknown_and_malformed_are_silent() {
        let mut table = CommandTable::new();
        table.register("ping-camera", ping).unwrap();

        let mut out = Vec::new();
        assert_eq!(
            table.dispatch("PING-CAMERA", &mut out),
            DispatchOutcome::Unknown("PING-CAMERA".into())
        );
        assert_eq!(
            table.dispatch("\"ping-camera\"", &mut out),
            DispatchOutcome::Malformed("ping-camera".into())
        );
        assert_eq!(table.dispatch("   ", &mut out), DispatchOutcome::Empty);
        assert!(out.is_empty());
    }

    #[test]
    fn test_unterminated_argument_is_malformed() {
        let mut table = CommandTable::new();
        table.register("ping-camera", ping).unwrap();
        table.register("echo", echo).unwrap();

        let mut out = Vec::new();
        assert_eq!(
            table.dispatch("ping-camera \"x", &mut out),
            DispatchOutcome::Malformed("ping-camera".into())
        );
        assert_eq!(
            table.dispatch("echo \"42", &mut out),
            DispatchOutcome::Malformed("echo".into())
        );
        assert!(out.is_empty());

        // Closed quotes are fine
        assert_eq!(
            table.dispatch("echo \"42\"", &mut out),
            DispatchOutcome::Handled(STATUS_OK)
        );
    }

    #[test]
    fn test_register_rejects_bad_mnemonics() {
        let mut table = CommandTable::new();
        table.register("ping-camera", ping).unwrap();

        assert!(matches!(
            table.register("ping-camera", ping),
            Err(CommandTableError::DuplicateMnemonic(_))
        ));
        assert!(matches!(
            table.register("two words", ping),
            Err(CommandTableError::InvalidMnemonic(_))
        ));
        assert!(matches!(
            table.register("", ping),
            Err(CommandTableError::InvalidMnemonic(_))
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_mnemonics_sorted() {
        let mut table = CommandTable::new();
        table.register("stats", ping).unwrap();
        table.register("get-name", ping).unwrap();
        table.register("ping-camera", ping).unwrap();

        assert_eq!(table.mnemonics(), vec!["get-name", "ping-camera", "stats"]);
    }
}
