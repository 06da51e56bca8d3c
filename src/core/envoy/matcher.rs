//! Path templates to route matchers.
use std::collections::BTreeMap;

use crate::core::spec::ParamSchema;

use super::resources::{HeaderMatcher, PathMatcher, RouteMatch, StringMatch};

const STRING_PARAM: &str = "([.a-zA-Z0-9-]+)";
const INTEGER_PARAM: &str = "([0-9]+)";
const NUMBER_PARAM: &str = "([0-9]*[.])?[0-9]+";

/// Stable name of a route; also its uniqueness key inside a virtual host.
pub fn route_name(path: &str, method: &str) -> String {
    format!("{path}-{}", method.to_ascii_uppercase())
}

/// Joins a base path and a route path without doubling the separator.
pub fn route_path(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Param(&'a str),
}

fn is_param_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Splits `/pets/{petId}/toys` into literal and `{name}` parameter segments.
fn split_template(path: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = path;
    let mut literal_start = 0;
    let mut offset = 0;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + close];
        let consumed = open + close + 1;
        if is_param_name(name) {
            let literal = &path[literal_start..offset + open];
            if !literal.is_empty() {
                segments.push(Segment::Literal(literal));
            }
            segments.push(Segment::Param(name));
            literal_start = offset + consumed;
        }
        offset += consumed;
        rest = &rest[consumed..];
    }

    if literal_start < path.len() {
        segments.push(Segment::Literal(&path[literal_start..]));
    }
    segments
}

fn param_pattern(schema: Option<&ParamSchema>) -> String {
    match schema {
        Some(schema) if !schema.enum_values.is_empty() => {
            let values: Vec<String> = schema.enum_values.iter().map(|v| regex::escape(v)).collect();
            format!("({})", values.join("|"))
        }
        Some(schema) => match schema.kind.as_deref() {
            Some("integer") => INTEGER_PARAM.to_string(),
            Some("number") => NUMBER_PARAM.to_string(),
            _ => STRING_PARAM.to_string(),
        },
        None => STRING_PARAM.to_string(),
    }
}

/// Exact for plain paths, prefix for paths ending in `/`, an anchored regex when the
/// template has parameters.
pub fn path_matcher(path: &str, params: &BTreeMap<String, ParamSchema>) -> PathMatcher {
    let segments = split_template(path);
    if !segments.iter().any(|s| matches!(s, Segment::Param(_))) {
        return if path.ends_with('/') {
            PathMatcher::Prefix(path.to_string())
        } else {
            PathMatcher::Path(path.to_string())
        };
    }

    let mut pattern = String::from("^");
    for segment in segments {
        match segment {
            Segment::Literal(literal) => pattern.push_str(&regex::escape(literal)),
            Segment::Param(name) => pattern.push_str(&param_pattern(params.get(name))),
        }
    }
    pattern.push('$');
    PathMatcher::SafeRegex(pattern)
}

/// `:method` matcher; a route with CORS also admits preflight `OPTIONS` requests.
pub fn method_matcher(method: &str, cors: bool) -> HeaderMatcher {
    let method = method.to_ascii_uppercase();
    let string_match = if cors && method != "OPTIONS" {
        StringMatch::SafeRegex(format!("^({method}|OPTIONS)$"))
    } else {
        StringMatch::Exact(method)
    };
    HeaderMatcher {
        name: ":method".to_string(),
        string_match,
    }
}

pub fn route_match(
    path: &str,
    method: &str,
    params: &BTreeMap<String, ParamSchema>,
    cors: bool,
) -> RouteMatch {
    RouteMatch {
        path: path_matcher(path, params),
        headers: vec![method_matcher(method, cors)],
    }
}
