use std::collections::BTreeMap;

use super::{Host, OptionsError, SubOptions};

/// Finalized options of one OpenAPI document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Document scope options, already the parent of every path.
    pub document: SubOptions,
    pub hosts: Vec<Host>,
    /// Path under which the processed document itself is served.
    pub openapi_path: Option<String>,
    /// Merged options keyed by [`Options::operation_key`].
    pub operations: BTreeMap<String, SubOptions>,
}

impl Options {
    /// `GET` + `/items` gives `GET/items`.
    pub fn operation_key(method: &str, path: &str) -> String {
        format!("{}{path}", method.to_ascii_uppercase())
    }

    pub fn operation(&self, method: &str, path: &str) -> Option<&SubOptions> {
        self.operations.get(&Self::operation_key(method, path))
    }

    pub fn fill_defaults(&mut self) {
        if self.hosts.is_empty() {
            self.hosts.push(Host::wildcard());
        }
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        for host in &self.hosts {
            host.validate()?;
        }
        if let Some(path) = &self.openapi_path
            && !path.starts_with('/')
        {
            return Err(OptionsError::invalid("openapi-path", "must start with /"));
        }
        self.document
            .validate_fields()
            .map_err(|e| e.in_scope("document"))?;
        for (key, operation) in &self.operations {
            operation.validate_final(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_key_uppercases_method() {
        assert_eq!(Options::operation_key("get", "/items"), "GET/items");
    }

    #[test]
    fn test_fill_defaults_adds_wildcard_host() {
        let mut options = Options::default();
        options.fill_defaults();
        assert_eq!(options.hosts, vec![Host::wildcard()]);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_operation() {
        let mut options = Options::default();
        options
            .operations
            .insert("GET/items".into(), SubOptions::default());
        let err = options.validate().unwrap_err();
        assert!(err.to_string().starts_with("GET/items"));
    }
}
