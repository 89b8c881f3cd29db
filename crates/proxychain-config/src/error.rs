//! Chain configuration parse errors.

/// Why a configuration blob was rejected.
///
/// Field-level failures carry the zero-based hop index (`None` for
/// chain-wide options) and the field name as it appears in the blob.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("blob is not valid base64: {0}")]
    Encoding(String),

    #[error("blob is not valid UTF-8")]
    Utf8,

    #[error("malformed {format} config: {message}")]
    Syntax {
        format: &'static str,
        message: String,
    },

    #[error("line {line}: {reason}")]
    Line { line: usize, reason: String },

    #[error("{}{field}: {reason}", hop_prefix(*.hop))]
    Field {
        hop: Option<usize>,
        field: &'static str,
        reason: String,
    },
}

impl ParseError {
    pub(crate) fn hop(index: usize, field: &'static str, reason: impl Into<String>) -> Self {
        Self::Field {
            hop: Some(index),
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn chain(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Field {
            hop: None,
            field,
            reason: reason.into(),
        }
    }

    /// Index of the offending hop, when the error is hop-specific.
    pub fn hop_index(&self) -> Option<usize> {
        match self {
            Self::Field { hop, .. } => *hop,
            _ => None,
        }
    }

    /// Name of the offending field, when the error is field-specific.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Field { field, .. } => Some(field),
            _ => None,
        }
    }
}

fn hop_prefix(hop: Option<usize>) -> String {
    match hop {
        Some(i) => format!("hops[{i}]."),
        None => String::new(),
    }
}
