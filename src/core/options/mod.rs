//! `x-kusk` options: parsing, three-scope inheritance and validation.
mod auth;
mod document;
mod error;
mod host;
mod policies;
mod static_options;
mod sub_options;
mod upstream;

pub use auth::{
    AuthOptions, AuthScheme, AuthUpstream, AuthUpstreamHost, ClientSecret, ClientSecretRef,
    CookieNames, JwtOptions, JwtProvider, OAuth2Credentials, OAuth2Options, RemoteJwks,
    https_endpoint,
};
pub use document::Options;
pub use error::OptionsError;
pub use host::{Host, is_valid_hostname};
pub use policies::{
    CORS_ALLOWED_METHODS, CacheOptions, CorsOptions, MockingOptions, PathOptions, QosOptions,
    RateLimitOptions, RateLimitUnit, RequestValidationOptions, ValidationOptions,
};
pub use static_options::StaticOptions;
pub use sub_options::SubOptions;
pub use upstream::{
    Backend, RedirectOptions, RewriteRegex, UpstreamHost, UpstreamOptions, UpstreamService,
    UpstreamTarget,
};
