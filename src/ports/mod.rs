pub mod config_provider;
pub mod document_source;
