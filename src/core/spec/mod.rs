//! OpenAPI documents and their `x-kusk` extension.
mod extension;
mod openapi;

pub use extension::{get_options, post_processed};
pub use openapi::{
    EXTENSION_KEY, Example, MediaType, OpenApiDocument, Operation, ParamSchema, Parameter,
    PathItem, Response, Schema,
};

use thiserror::Error;

use crate::core::options::{Options, OptionsError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpecError {
    #[error("failed to parse OpenAPI document: {0}")]
    Parse(String),

    #[error("unsupported OpenAPI version {0}, only 3.x documents are accepted")]
    UnsupportedVersion(String),

    #[error("failed to parse x-kusk extension at {scope}: {message}")]
    Extension { scope: String, message: String },

    #[error("invalid options: {0}")]
    Options(#[from] OptionsError),
}

impl SpecError {
    fn extension(scope: &str, message: impl Into<String>) -> Self {
        Self::Extension {
            scope: scope.to_string(),
            message: message.into(),
        }
    }
}

/// Parses a document, extracts its options, fills defaults and validates them.
pub fn parse_annotated(source: &str) -> Result<(OpenApiDocument, Options), SpecError> {
    let doc = OpenApiDocument::parse(source)?;
    let mut options = get_options(&doc)?;
    options.fill_defaults();
    options.validate()?;
    Ok((doc, options))
}
