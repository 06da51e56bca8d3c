//! Route lists that are not backed by an OpenAPI document.
use std::collections::BTreeMap;

use serde::Deserialize;

use super::{AuthOptions, Host, Options, OptionsError, SubOptions};

const METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// `{hosts, auth, paths: {path: {method: options}}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticOptions {
    #[serde(default)]
    pub hosts: Vec<Host>,
    /// Applied to every route that does not set its own auth.
    pub auth: Option<AuthOptions>,
    #[serde(default)]
    pub paths: BTreeMap<String, BTreeMap<String, SubOptions>>,
}

impl StaticOptions {
    pub fn fill_defaults(&mut self) {
        if self.hosts.is_empty() {
            self.hosts.push(Host::wildcard());
        }
        if self.auth.is_some() {
            let parent = SubOptions {
                auth: self.auth.clone(),
                ..Default::default()
            };
            for operation in self.paths.values_mut().flat_map(|m| m.values_mut()) {
                operation.merge_in(&parent);
            }
        }
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        for host in &self.hosts {
            host.validate()?;
        }
        for (path, methods) in &self.paths {
            if !path.starts_with('/') {
                return Err(OptionsError::invalid(
                    "paths",
                    format!("{path} must start with /"),
                ));
            }
            for (method, operation) in methods {
                if !METHODS.contains(&method.to_ascii_lowercase().as_str()) {
                    return Err(OptionsError::invalid(
                        "paths",
                        format!("{path}: unknown method {method}"),
                    ));
                }
                operation.validate_final(&Options::operation_key(method, path))?;
            }
        }
        Ok(())
    }

    pub fn fill_defaults_and_validate(&mut self) -> Result<(), OptionsError> {
        self.fill_defaults();
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATIC_ROUTES: &str = r#"
hosts: [example.com]
auth:
  custom:
    host: {hostname: auth.local, port: 9000}
paths:
  /old/:
    get:
      redirect: {path_redirect: /new, response_code: 308}
  /api/:
    post:
      upstream: {host: {hostname: backend.local, port: 8080}}
      auth: {}
"#;

    #[test]
    fn test_static_auth_is_inherited() {
        let mut opts: StaticOptions = serde_yaml::from_str(STATIC_ROUTES).unwrap();
        opts.fill_defaults_and_validate().unwrap();
        assert!(opts.paths["/old/"]["get"].auth.as_ref().unwrap().scheme.is_some());
        assert!(opts.paths["/api/"]["post"].auth.as_ref().unwrap().scheme.is_none());
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let mut opts: StaticOptions = serde_yaml::from_str(
            "paths:\n  /a:\n    fetch:\n      upstream: {host: {hostname: a.local, port: 80}}\n",
        )
        .unwrap();
        assert!(opts.fill_defaults_and_validate().is_err());
        assert_eq!(opts.hosts, vec![Host::wildcard()]);
    }
}
