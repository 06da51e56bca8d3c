//! Per-route policies that can be set at any scope and are inherited as a whole.
use serde::Deserialize;

use super::OptionsError;

pub const CORS_ALLOWED_METHODS: [&str; 7] =
    ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "HEAD"];

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathOptions {
    /// Base path prepended to every route of the scope.
    #[serde(default)]
    pub prefix: String,
}

impl PathOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !self.prefix.is_empty() && !self.prefix.starts_with('/') {
            return Err(OptionsError::invalid("path.prefix", "must start with /"));
        }
        Ok(())
    }
}

/// Zero means unset: the proxy default applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QosOptions {
    pub retries: u32,
    /// Seconds.
    pub request_timeout: u32,
    /// Seconds.
    pub idle_timeout: u32,
}

impl QosOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.retries > 255 {
            return Err(OptionsError::invalid("qos.retries", "must be at most 255"));
        }
        Ok(())
    }

    pub(crate) fn merge_in(&mut self, parent: &QosOptions) {
        if self.retries == 0 {
            self.retries = parent.retries;
        }
        if self.request_timeout == 0 {
            self.request_timeout = parent.request_timeout;
        }
        if self.idle_timeout == 0 {
            self.idle_timeout = parent.idle_timeout;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CorsOptions {
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub credentials: Option<bool>,
    /// Seconds.
    pub max_age: u32,
}

impl CorsOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.origins.iter().any(String::is_empty) {
            return Err(OptionsError::invalid("cors.origins", "origin must not be empty"));
        }
        for method in &self.methods {
            if !CORS_ALLOWED_METHODS.contains(&method.as_str()) {
                return Err(OptionsError::invalid(
                    "cors.methods",
                    format!("{method} is not one of {}", CORS_ALLOWED_METHODS.join(", ")),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitUnit {
    Second,
    Minute,
    Hour,
}

impl RateLimitUnit {
    pub fn as_secs(self) -> u64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitOptions {
    pub requests_per_unit: u32,
    pub unit: RateLimitUnit,
    #[serde(default)]
    pub per_connection: bool,
    pub response_code: Option<u16>,
}

impl RateLimitOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.requests_per_unit == 0 {
            return Err(OptionsError::invalid(
                "rate_limit.requests_per_unit",
                "must be greater than zero",
            ));
        }
        if let Some(code) = self.response_code
            && !(400..=599).contains(&code)
        {
            return Err(OptionsError::invalid(
                "rate_limit.response_code",
                format!("{code} is not an error status"),
            ));
        }
        Ok(())
    }

    pub fn response_code(&self) -> u16 {
        self.response_code.unwrap_or(429)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheOptions {
    pub enabled: Option<bool>,
    pub max_age: Option<u32>,
}

impl CacheOptions {
    pub fn max_age_if_enabled(&self) -> Option<u32> {
        match self.enabled {
            Some(true) => Some(self.max_age.unwrap_or(0)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationOptions {
    pub request: Option<RequestValidationOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestValidationOptions {
    pub enabled: Option<bool>,
}

impl ValidationOptions {
    pub fn request_enabled(&self) -> bool {
        self.request.and_then(|r| r.enabled).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockingOptions {
    pub enabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_merge_fills_zero_fields() {
        let mut child = QosOptions {
            retries: 3,
            ..Default::default()
        };
        child.merge_in(&QosOptions {
            retries: 7,
            request_timeout: 10,
            idle_timeout: 30,
        });
        assert_eq!(
            child,
            QosOptions {
                retries: 3,
                request_timeout: 10,
                idle_timeout: 30
            }
        );
    }

    #[test]
    fn test_cors_rejects_unknown_method() {
        let cors = CorsOptions {
            methods: vec!["GET".into(), "TRACE".into()],
            ..Default::default()
        };
        assert!(cors.validate().is_err());
    }

    #[test]
    fn test_rate_limit_unit_parsing() {
        let rl: RateLimitOptions =
            serde_yaml::from_str("requests_per_unit: 5\nunit: minute\n").unwrap();
        assert_eq!(rl.unit.as_secs(), 60);
        assert_eq!(rl.response_code(), 429);
        assert!(serde_yaml::from_str::<RateLimitOptions>("requests_per_unit: 5\nunit: day\n").is_err());
    }
}
