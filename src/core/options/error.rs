use thiserror::Error;

/// Errors raised while parsing, merging or validating `x-kusk` options.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum OptionsError {
    #[error("upstream and redirect are mutually exclusive")]
    BackendConflict,

    #[error("upstream.host and upstream.service are mutually exclusive")]
    UpstreamTargetConflict,

    #[error("upstream requires either host or service")]
    MissingUpstreamTarget,

    #[error("{operation}: either upstream or redirect must be specified")]
    MissingBackend { operation: String },

    #[error("{operation}: mocking and request validation cannot be enabled together")]
    MockingWithValidation { operation: String },

    #[error("auth.{first} and auth.{second} are mutually exclusive")]
    AuthSchemeConflict {
        first: &'static str,
        second: &'static str,
    },

    #[error("client_secret and client_secret_ref are mutually exclusive")]
    ClientSecretConflict,

    #[error("oauth2 credentials require client_secret or client_secret_ref")]
    MissingClientSecret,

    #[error("redirect path_redirect and rewrite_regex are mutually exclusive")]
    RedirectPathConflict,

    #[error("invalid {field}: {message}")]
    InvalidField { field: String, message: String },
}

impl OptionsError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Prefixes the field of an `InvalidField` error with the scope it came from.
    pub fn in_scope(self, scope: &str) -> Self {
        match self {
            Self::InvalidField { field, message } => Self::InvalidField {
                field: format!("{scope}: {field}"),
                message,
            },
            other => other,
        }
    }
}
