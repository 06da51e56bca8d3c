//! The overridable option bundle and its inheritance rules.
use serde::Deserialize;

use super::{
    AuthOptions, Backend, CacheOptions, CorsOptions, MockingOptions, OptionsError, PathOptions,
    QosOptions, RateLimitOptions, RedirectOptions, UpstreamOptions, ValidationOptions,
};

/// Options attachable at document, path or operation scope.
///
/// Every field is optional so that a narrower scope can leave it to a wider one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "RawSubOptions")]
pub struct SubOptions {
    pub disabled: Option<bool>,
    pub backend: Option<Backend>,
    pub path: Option<PathOptions>,
    pub qos: Option<QosOptions>,
    pub cors: Option<CorsOptions>,
    pub websocket: Option<bool>,
    pub validation: Option<ValidationOptions>,
    pub mocking: Option<MockingOptions>,
    pub rate_limit: Option<RateLimitOptions>,
    pub cache: Option<CacheOptions>,
    pub auth: Option<AuthOptions>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSubOptions {
    disabled: Option<bool>,
    upstream: Option<UpstreamOptions>,
    redirect: Option<RedirectOptions>,
    path: Option<PathOptions>,
    qos: Option<QosOptions>,
    cors: Option<CorsOptions>,
    websocket: Option<bool>,
    validation: Option<ValidationOptions>,
    mocking: Option<MockingOptions>,
    rate_limit: Option<RateLimitOptions>,
    cache: Option<CacheOptions>,
    auth: Option<AuthOptions>,
}

impl TryFrom<RawSubOptions> for SubOptions {
    type Error = OptionsError;

    fn try_from(raw: RawSubOptions) -> Result<Self, Self::Error> {
        let backend = match (raw.upstream, raw.redirect) {
            (Some(_), Some(_)) => return Err(OptionsError::BackendConflict),
            (Some(upstream), None) => Some(Backend::Upstream(upstream)),
            (None, Some(redirect)) => Some(Backend::Redirect(redirect)),
            (None, None) => None,
        };

        Ok(Self {
            disabled: raw.disabled,
            backend,
            path: raw.path,
            qos: raw.qos,
            cors: raw.cors,
            websocket: raw.websocket,
            validation: raw.validation,
            mocking: raw.mocking,
            rate_limit: raw.rate_limit,
            cache: raw.cache,
            auth: raw.auth,
        })
    }
}

impl SubOptions {
    /// Fills every field `self` leaves unset from `parent`.
    ///
    /// The backend is taken as a whole: a child that names either an upstream or a redirect
    /// never inherits any part of the parent's backend.
    pub fn merge_in(&mut self, parent: &SubOptions) {
        if self.disabled.is_none() {
            self.disabled = parent.disabled;
        }
        if self.backend.is_none() {
            self.backend = parent.backend.clone();
        }

        if let Some(parent_path) = &parent.path {
            let path = self.path.get_or_insert_with(|| parent_path.clone());
            if path.prefix.is_empty() {
                path.prefix.clone_from(&parent_path.prefix);
            }
        }
        if let Some(parent_qos) = &parent.qos {
            self.qos.get_or_insert(*parent_qos).merge_in(parent_qos);
        }

        if self.cors.is_none() {
            self.cors = parent.cors.clone();
        }
        if self.websocket.is_none() {
            self.websocket = parent.websocket;
        }
        if self.validation.is_none() {
            self.validation = parent.validation;
        }
        if self.mocking.is_none() {
            self.mocking = parent.mocking;
        }
        if self.rate_limit.is_none() {
            self.rate_limit = parent.rate_limit;
        }
        if self.cache.is_none() {
            self.cache = parent.cache;
        }
        if self.auth.is_none() {
            self.auth = parent.auth.clone();
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(false)
    }

    pub fn mocking_enabled(&self) -> bool {
        self.mocking.and_then(|m| m.enabled).unwrap_or(false)
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation.is_some_and(|v| v.request_enabled())
    }

    pub fn websocket_enabled(&self) -> bool {
        self.websocket.unwrap_or(false)
    }

    pub fn upstream(&self) -> Option<&UpstreamOptions> {
        self.backend.as_ref().and_then(Backend::upstream)
    }

    pub fn redirect(&self) -> Option<&RedirectOptions> {
        self.backend.as_ref().and_then(Backend::redirect)
    }

    /// Checks the fields present in this scope without requiring a backend.
    pub fn validate_fields(&self) -> Result<(), OptionsError> {
        if let Some(backend) = &self.backend {
            backend.validate()?;
        }
        if let Some(path) = &self.path {
            path.validate()?;
        }
        if let Some(qos) = &self.qos {
            qos.validate()?;
        }
        if let Some(cors) = &self.cors {
            cors.validate()?;
        }
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        if let Some(auth) = &self.auth {
            auth.validate()?;
        }
        Ok(())
    }

    /// Validates a finalized operation. Disabled operations are never checked.
    pub fn validate_final(&self, operation: &str) -> Result<(), OptionsError> {
        if self.is_disabled() {
            return Ok(());
        }
        if self.mocking_enabled() && self.validation_enabled() {
            return Err(OptionsError::MockingWithValidation {
                operation: operation.to_string(),
            });
        }
        if self.backend.is_none() && !self.mocking_enabled() {
            return Err(OptionsError::MissingBackend {
                operation: operation.to_string(),
            });
        }
        self.validate_fields()
            .map_err(|e| e.in_scope(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::UpstreamTarget;

    fn parse(yaml: &str) -> SubOptions {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_upstream_and_redirect_together_is_rejected() {
        let err = serde_yaml::from_str::<SubOptions>(
            "upstream: {service: {name: svc}}\nredirect: {host_redirect: a.com}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("upstream and redirect are mutually exclusive"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(serde_yaml::from_str::<SubOptions>("upstreams: {}\n").is_err());
    }

    #[test]
    fn test_child_backend_replaces_parent_backend() {
        let parent = parse("upstream: {service: {name: svc, namespace: ns, port: 8080}}\n");
        let mut child = parse("redirect: {host_redirect: other.com}\n");
        child.merge_in(&parent);
        assert!(child.upstream().is_none());
        assert_eq!(
            child.redirect().and_then(|r| r.host_redirect.as_deref()),
            Some("other.com")
        );
    }

    #[test]
    fn test_merge_precedence_operation_path_document() {
        let document = parse(
            "upstream: {service: {name: doc}}\nwebsocket: true\nqos: {retries: 2, request_timeout: 10}\n",
        );
        let mut path = parse("cors: {origins: [\"https://a\"]}\nqos: {retries: 5}\n");
        path.merge_in(&document);
        let mut operation = parse("websocket: false\n");
        operation.merge_in(&path);

        assert_eq!(operation.websocket, Some(false));
        assert_eq!(operation.cors.as_ref().map(|c| c.origins.len()), Some(1));
        let qos = operation.qos.unwrap();
        assert_eq!((qos.retries, qos.request_timeout), (5, 10));
        match &operation.upstream().unwrap().target {
            UpstreamTarget::Service(svc) => assert_eq!(svc.name, "doc"),
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn test_empty_child_prefix_is_filled() {
        let parent = parse("path: {prefix: /v1}\n");
        let mut child = parse("path: {}\n");
        child.merge_in(&parent);
        assert_eq!(child.path.unwrap().prefix, "/v1");
    }

    #[test]
    fn test_validate_final() {
        let missing = parse("cors: {}\n");
        assert!(matches!(
            missing.validate_final("GET/items"),
            Err(OptionsError::MissingBackend { .. })
        ));

        let disabled = parse("disabled: true\n");
        assert!(disabled.validate_final("GET/items").is_ok());

        let both = parse(
            "upstream: {service: {name: svc}}\nmocking: {enabled: true}\nvalidation: {request: {enabled: true}}\n",
        );
        assert!(matches!(
            both.validate_final("GET/items"),
            Err(OptionsError::MockingWithValidation { .. })
        ));

        let mocked = parse("mocking: {enabled: true}\n");
        assert!(mocked.validate_final("GET/items").is_ok());
    }
}
