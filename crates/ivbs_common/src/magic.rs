//! `%` magic commands.
//!
//! Magics are alternate code sources (a file, the clipboard) plus a
//! session reset. Parsing is separate from running so the controller can
//! report usage errors as plain error text.

use std::path::PathBuf;
use thiserror::Error;

/// Prefix marking a magic command
pub const MAGIC_PREFIX: char = '%';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MagicCommand {
    /// `%load <path>`: submit a file's contents
    Load(PathBuf),
    /// `%reset`: restart the interpreter session
    Reset,
    /// `%paste`: submit the clipboard contents
    Paste,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MagicError {
    #[error("empty magic command")]
    Empty,

    #[error("usage: %{name}{usage}")]
    Usage { name: &'static str, usage: &'static str },

    #[error("unknown magic command: %{0}")]
    Unknown(String),
}

impl MagicCommand {
    pub fn name(&self) -> &'static str {
        match self {
            MagicCommand::Load(_) => "load",
            MagicCommand::Reset => "reset",
            MagicCommand::Paste => "paste",
        }
    }

    /// Parse the text after the `%` prefix (the prefix itself is optional).
    pub fn parse(text: &str) -> Result<Self, MagicError> {
        let text = text.trim();
        let text = text.strip_prefix(MAGIC_PREFIX).unwrap_or(text);
        let (name, rest) = match text.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (text, ""),
        };

        match name.to_ascii_lowercase().as_str() {
            "" => Err(MagicError::Empty),
            "load" => {
                let path = unquote(rest);
                if path.is_empty() {
                    return Err(MagicError::Usage {
                        name: "load",
                        usage: " <path>",
                    });
                }
                Ok(MagicCommand::Load(PathBuf::from(path)))
            }
            "reset" if rest.is_empty() => Ok(MagicCommand::Reset),
            "reset" => Err(MagicError::Usage {
                name: "reset",
                usage: "",
            }),
            "paste" if rest.is_empty() => Ok(MagicCommand::Paste),
            "paste" => Err(MagicError::Usage {
                name: "paste",
                usage: "",
            }),
            _ => Err(MagicError::Unknown(name.to_string())),
        }
    }
}

/// Strip one pair of matching surrounding quotes. Backslashes are kept,
/// so Windows paths survive.
fn unquote(arg: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = arg
            .strip_prefix(quote)
            .and_then(|a| a.strip_suffix(quote))
        {
            return inner;
        }
    }
    arg
}
