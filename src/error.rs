//! Error types for the featmill engine.
//!
//! Every error carries one of the fixed kinds below; the protocol layer
//! renders the kind as the first line of an error reply
//! (`Tag: human-readable message`), so clients can match on the tag without
//! parsing the rest of the message.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A named frame, pipeline, column or project is absent.
    #[error("NotFound: {0}")]
    NotFound(String),

    /// Missing or out-of-range fields in a command, unknown aggregation,
    /// role mismatch.
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    /// Column length mismatch within a frame, predict/target size
    /// disagreement.
    #[error("Shape: {0}")]
    Shape(String),

    /// Same-unit aggregation applied to incompatible units.
    #[error("Unit: {0}")]
    Unit(String),

    /// Transform or score on an unfit pipeline.
    #[error("NotFitted: {0}")]
    NotFitted(String),

    /// File or socket error.
    #[error("Io: {0}")]
    Io(String),

    /// Memory or capacity limits exceeded.
    #[error("Resource: {0}")]
    Resource(String),

    /// The owning session dropped during a fit.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invariant violation - a bug.
    #[error("Internal: {0}")]
    Internal(String),
}

impl Error {
    /// The machine-parseable tag that leads the error reply.
    pub fn tag(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::Shape(_) => "Shape",
            Error::Unit(_) => "Unit",
            Error::NotFitted(_) => "NotFitted",
            Error::Io(_) => "Io",
            Error::Resource(_) => "Resource",
            Error::Cancelled(_) => "Cancelled",
            Error::Internal(_) => "Internal",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidArgument(format!("malformed JSON: {e}"))
    }
}

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_matches_display_prefix() {
        let errors = vec![
            Error::NotFound("frame 'x'".to_string()),
            Error::InvalidArgument("bad".to_string()),
            Error::Shape("4 vs 5".to_string()),
            Error::Unit("EUR vs USD".to_string()),
            Error::NotFitted("pipeline 'p'".to_string()),
            Error::Io("gone".to_string()),
            Error::Resource("storage".to_string()),
            Error::Cancelled("fit".to_string()),
            Error::Internal("bug".to_string()),
        ];
        for e in errors {
            assert!(e.to_string().starts_with(e.tag()));
        }
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let e: Error = io.into();
        assert_eq!(e.tag(), "Io");
    }
}
