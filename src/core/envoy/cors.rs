use crate::core::options::{CORS_ALLOWED_METHODS, CorsOptions};

use super::BuildError;
use super::resources::{CorsPolicy, StringMatch};

/// Builds a route CORS policy. Origins only ever match exactly.
pub fn cors_policy(options: &CorsOptions) -> Result<CorsPolicy, BuildError> {
    if let Some(method) = options
        .methods
        .iter()
        .find(|m| !CORS_ALLOWED_METHODS.contains(&m.as_str()))
    {
        return Err(BuildError::InvalidCors(format!(
            "method {method} is not allowed"
        )));
    }
    if options.origins.iter().any(String::is_empty) {
        return Err(BuildError::InvalidCors("empty origin".to_string()));
    }

    Ok(CorsPolicy {
        allow_origin_string_match: options
            .origins
            .iter()
            .map(|origin| StringMatch::Exact(origin.clone()))
            .collect(),
        allow_methods: options.methods.join(","),
        allow_headers: options.headers.join(","),
        expose_headers: options.expose_headers.join(","),
        max_age: options.max_age.to_string(),
        allow_credentials: options.credentials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_policy() {
        let options = CorsOptions {
            origins: vec!["https://a.com".into(), "https://b.com".into()],
            methods: vec!["GET".into(), "POST".into()],
            headers: vec!["Content-Type".into()],
            expose_headers: vec!["X-Total".into(), "X-Page".into()],
            credentials: Some(true),
            max_age: 86400,
        };
        let policy = cors_policy(&options).unwrap();
        assert_eq!(policy.allow_origin_string_match.len(), 2);
        assert_eq!(policy.allow_methods, "GET,POST");
        assert_eq!(policy.expose_headers, "X-Total,X-Page");
        assert_eq!(policy.max_age, "86400");
        assert_eq!(policy.allow_credentials, Some(true));
    }

    #[test]
    fn test_cors_policy_rejects_method() {
        let options = CorsOptions {
            methods: vec!["CONNECT".into()],
            ..Default::default()
        };
        assert!(matches!(cors_policy(&options), Err(BuildError::InvalidCors(_))));
    }
}
