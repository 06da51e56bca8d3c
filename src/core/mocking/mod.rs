//! Canned responses generated from OpenAPI examples.
mod negotiator;
mod response;

pub use negotiator::{default_media_type, negotiate};
pub use response::{
    MockConfig, MockResponse, generate_mock_response, is_json_media_type, mock_id,
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MockError {
    #[error("mock response with ID {0} already exists")]
    DuplicateId(String),

    #[error("no success response with a usable example for operation '{0}'")]
    NoUsableResponse(String),

    #[error("unsupported media type {0} for mocking")]
    UnsupportedMediaType(String),

    #[error("cannot encode example for {media_type}: {message}")]
    Encode { media_type: String, message: String },
}
