use std::io;

/// A type (or a type it reaches) cannot be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedShapeError {
    /// Full name of the offending type.
    pub type_name: &'static str,
    /// Why it was refused.
    pub reason: &'static str,
}

impl core::fmt::Display for UnsupportedShapeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "unsupported type {}: {}", self.type_name, self.reason)
    }
}

impl core::error::Error for UnsupportedShapeError {}

/// The compiler or executor found itself in a state it should never reach.
///
/// This is always a bug in the encoder, never in the value being encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError {
    /// Type whose program was being built or run.
    pub type_name: &'static str,
    /// What went wrong.
    pub message: String,
}

impl InvariantError {
    pub(crate) fn new(type_name: &'static str, message: impl Into<String>) -> Self {
        Self {
            type_name,
            message: message.into(),
        }
    }
}

impl core::fmt::Display for InvariantError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "internal compiler invariant violated in {}: {}",
            self.type_name, self.message
        )
    }
}

impl core::error::Error for InvariantError {}

/// Errors raised while building the program for a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The type reaches something the encoder cannot model.
    UnsupportedShape(UnsupportedShapeError),

    /// Compilation broke one of its own invariants.
    Invariant(InvariantError),
}

impl core::fmt::Display for CompileError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CompileError::UnsupportedShape(e) => e.fmt(f),
            CompileError::Invariant(e) => e.fmt(f),
        }
    }
}

impl core::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            CompileError::UnsupportedShape(e) => Some(e),
            CompileError::Invariant(e) => Some(e),
        }
    }
}

impl From<UnsupportedShapeError> for CompileError {
    fn from(e: UnsupportedShapeError) -> Self {
        CompileError::UnsupportedShape(e)
    }
}

impl From<InvariantError> for CompileError {
    fn from(e: InvariantError) -> Self {
        CompileError::Invariant(e)
    }
}

/// Errors raised by an encode call.
#[derive(Debug)]
pub enum EncodeError {
    /// No program could be built for the root type.
    Compile {
        /// Full name of the root type.
        root: &'static str,
        /// What failed.
        source: CompileError,
    },

    /// The executor broke one of its own invariants.
    Invariant(InvariantError),

    /// The value holds something JSON cannot represent (NaN, infinities) or
    /// nests deeper than the configured limit.
    UnsupportedValue {
        /// Full name of the type holding the value.
        type_name: &'static str,
        /// Why it was refused.
        reason: &'static str,
    },

    /// The output sink failed.
    Write(io::Error),
}

impl core::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EncodeError::Compile { root, source } => {
                write!(f, "cannot encode {root}: {source}")
            }
            EncodeError::Invariant(e) => e.fmt(f),
            EncodeError::UnsupportedValue { type_name, reason } => {
                write!(f, "unsupported value of type {type_name}: {reason}")
            }
            EncodeError::Write(e) => write!(f, "write error: {e}"),
        }
    }
}

impl core::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            EncodeError::Compile { source, .. } => Some(source),
            EncodeError::Invariant(e) => Some(e),
            EncodeError::UnsupportedValue { .. } => None,
            EncodeError::Write(e) => Some(e),
        }
    }
}

impl From<InvariantError> for EncodeError {
    fn from(e: InvariantError) -> Self {
        EncodeError::Invariant(e)
    }
}

impl From<io::Error> for EncodeError {
    fn from(e: io::Error) -> Self {
        EncodeError::Write(e)
    }
}
