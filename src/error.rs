//! Error types for the extraction engine.
//!
//! Every failure the engine can report maps onto a small, stable taxonomy of
//! numeric codes. Rule-compilation errors are *structural*: they abort building
//! a rule tree and carry the line of the offending element. Everything else is
//! local to one message or one rule.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExtractError>;

/// Message strings indexed by [`ExtractError::code`]. Index 0 is success.
const CODE_STRINGS: [&str; 15] = [
    "Success",
    "Unknown error",
    "Undefine protocol",
    "Undefine step",
    "Invalid step",
    "Invalid rule layout",
    "Invalid rule",
    "Negative rule",
    "Undefine codec method",
    "Uncompress failed",
    "Decode failed",
    "Not found rule",
    "Incomplete message",
    "Feature not implemented",
    "Unknown message",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("Unknown error")]
    Unknown,
    #[error("Undefine protocol: {0}")]
    UndefinedProtocol(String),
    #[error("Undefine step: {0}")]
    UndefinedStep(String),
    #[error("Invalid step: {0}")]
    InvalidStep(String),
    #[error("Invalid rule layout: {0}")]
    InvalidLayout(String),
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
    /// The rule is explicitly disabled. Callers skip it and continue.
    #[error("Negative rule")]
    NegativeRule,
    #[error("Undefine codec method: {0}")]
    UndefinedMethod(String),
    #[error("Uncompress failed")]
    UncompressFailed,
    #[error("Decode failed")]
    DecodeFailed,
    #[error("Not found rule")]
    NotFoundRule,
    #[error("Incomplete message")]
    IncompleteMessage,
    #[error("Feature not implemented")]
    NotImplemented,
    #[error("Unknown message")]
    UnknownMessage,
    /// The rule document is not well-formed XML.
    #[error("Malformed rule document: {0}")]
    Xml(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// A compilation error tagged with the 1-based line of the element that
    /// caused it.
    #[error("{source} in line {line}")]
    AtLine {
        line: u64,
        #[source]
        source: Box<ExtractError>,
    },
}

impl ExtractError {
    /// Wrap a compilation error with a line number. Already-located errors
    /// keep their original line.
    pub fn at_line(self, line: u64) -> Self {
        match self {
            located @ ExtractError::AtLine { .. } => located,
            other => ExtractError::AtLine {
                line,
                source: Box::new(other),
            },
        }
    }

    /// Numeric result code. `0` is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            ExtractError::Unknown | ExtractError::Io(_) | ExtractError::Config(_) => 1,
            ExtractError::UndefinedProtocol(_) => 2,
            ExtractError::UndefinedStep(_) => 3,
            ExtractError::InvalidStep(_) => 4,
            ExtractError::InvalidLayout(_) | ExtractError::Xml(_) => 5,
            ExtractError::InvalidRule(_) => 6,
            ExtractError::NegativeRule => 7,
            ExtractError::UndefinedMethod(_) => 8,
            ExtractError::UncompressFailed => 9,
            ExtractError::DecodeFailed => 10,
            ExtractError::NotFoundRule => 11,
            ExtractError::IncompleteMessage => 12,
            ExtractError::NotImplemented => 13,
            ExtractError::UnknownMessage => 14,
            ExtractError::AtLine { source, .. } => source.code(),
        }
    }

    /// Short classic message for this error's code, without detail.
    pub fn as_str(&self) -> &'static str {
        describe(self.code())
    }

    /// Line number for located compilation errors.
    pub fn line(&self) -> Option<u64> {
        match self {
            ExtractError::AtLine { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// True for errors that must prevent a rule tree from being activated.
    pub fn is_structural(&self) -> bool {
        match self {
            ExtractError::UndefinedProtocol(_)
            | ExtractError::UndefinedStep(_)
            | ExtractError::UndefinedMethod(_)
            | ExtractError::InvalidStep(_)
            | ExtractError::InvalidLayout(_)
            | ExtractError::InvalidRule(_)
            | ExtractError::Xml(_) => true,
            ExtractError::AtLine { source, .. } => source.is_structural(),
            _ => false,
        }
    }
}

/// Message string for a numeric code; out-of-range codes read as unknown.
pub fn describe(code: i32) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|idx| CODE_STRINGS.get(idx))
        .copied()
        .unwrap_or(CODE_STRINGS[1])
}

impl From<std::io::Error> for ExtractError {
    fn from(err: std::io::Error) -> Self {
        ExtractError::Io(err.to_string())
    }
}
