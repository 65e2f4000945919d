use thiserror::Error;

pub type Result<T> = std::result::Result<T, VcError>;

#[derive(Debug, Error)]
pub enum VcError {
    #[error("invalid input in {stage}: {message}")]
    InvalidInput {
        stage: &'static str,
        message: String,
    },
    #[error("mixture fit failed: {message}")]
    FitFailure { message: String },
    #[error("covariance of component {component} ({dim}x{dim}) is singular after regularization")]
    SingularCovariance { component: usize, dim: usize },
    #[error("invalid configuration `{field}`: {message}")]
    Configuration {
        field: &'static str,
        message: String,
    },
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error while {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("audio error while {context}: {message}")]
    Audio { context: String, message: String },
}

impl VcError {
    pub(crate) fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            stage,
            message: message.into(),
        }
    }

    pub(crate) fn fit_failure(message: impl Into<String>) -> Self {
        Self::FitFailure {
            message: message.into(),
        }
    }

    pub(crate) fn configuration(field: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn audio(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Audio {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_message_names_stage() {
        let err = VcError::invalid_input("align", "source has 0 frames");
        assert_eq!(err.to_string(), "invalid input in align: source has 0 frames");
    }

    #[test]
    fn configuration_message_names_field() {
        let err = VcError::configuration("padded_length", "must be positive");
        assert_eq!(
            err.to_string(),
            "invalid configuration `padded_length`: must be positive"
        );
    }

    #[test]
    fn io_error_keeps_source() {
        let err = VcError::io(
            "read model",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("read model"));
    }
}
