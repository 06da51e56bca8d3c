use crate::core::options::RateLimitOptions;

use super::resources::{LocalRateLimit, RuntimeFractionalPercent, TokenBucket};

pub const LOCAL_RATE_LIMIT_FILTER: &str = "envoy.filters.http.local_ratelimit";

/// `{host}-{path}-{METHOD}-{operationId}`.
pub fn stat_prefix(host: &str, path: &str, method: &str, operation_id: &str) -> String {
    format!("{host}-{path}-{method}-{operation_id}")
}

/// Token bucket holding `requests_per_unit` tokens, refilled by one token per unit.
pub fn local_rate_limit(options: &RateLimitOptions, stat_prefix: String) -> LocalRateLimit {
    LocalRateLimit {
        stat_prefix,
        token_bucket: TokenBucket {
            max_tokens: options.requests_per_unit,
            tokens_per_fill: 1,
            fill_interval_secs: options.unit.as_secs(),
        },
        filter_enabled: full_runtime_fraction("local_rate_limit_enabled"),
        filter_enforced: full_runtime_fraction("local_rate_limit_enforced"),
        status_code: options.response_code(),
        local_rate_limit_per_downstream_connection: options.per_connection,
    }
}

fn full_runtime_fraction(key: &str) -> RuntimeFractionalPercent {
    RuntimeFractionalPercent {
        runtime_key: key.to_string(),
        default_percent: 100,
    }
}
