use std::fmt;

/// Error kind for decode failures.
///
/// None of the kinds is transient: each reflects bad input or a broken
/// ownership contract, so the pipeline never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bytes do not parse as structured text in the declared encoding.
    MalformedSyntax,
    /// Parsed, but no known record shape matches.
    UnrecognizedSchema,
    /// Blocks could not be handed over across the worker boundary.
    TransferFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MalformedSyntax => f.write_str("malformed syntax"),
            ErrorKind::UnrecognizedSchema => f.write_str("unrecognized schema"),
            ErrorKind::TransferFailure => f.write_str("transfer failure"),
        }
    }
}

/// Decode error, the failure half of every worker delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DecodeError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::MalformedSyntax, message: msg.into() }
    }

    pub fn unrecognized(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::UnrecognizedSchema, message: msg.into() }
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::TransferFailure, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for DecodeError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → DecodeError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::malformed(e.to_string())
    }
}

impl From<std::str::Utf8Error> for DecodeError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::malformed(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for DecodeError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::malformed(e.to_string())
    }
}

impl From<std::char::DecodeUtf16Error> for DecodeError {
    fn from(e: std::char::DecodeUtf16Error) -> Self {
        Self::malformed(e.to_string())
    }
}

impl From<base64::DecodeError> for DecodeError {
    fn from(e: base64::DecodeError) -> Self {
        Self::unrecognized(format!("invalid base64 payload: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = DecodeError::unrecognized("missing time").with_context("record 3");
        assert_eq!(err.kind(), ErrorKind::UnrecognizedSchema);
        assert_eq!(err.message, "record 3: missing time");
        assert_eq!(err.to_string(), "unrecognized schema: record 3: missing time");
    }

    #[test]
    fn json_errors_are_malformed_syntax() {
        let err: DecodeError = serde_json::from_str::<serde_json::Value>("[1, 2")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::MalformedSyntax);
    }
}
