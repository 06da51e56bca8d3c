use crate::core::options::RedirectOptions;

use super::BuildError;
use super::resources::{PathRewrite, RedirectAction, RegexRewrite};

pub fn redirect_action(options: &RedirectOptions) -> Result<RedirectAction, BuildError> {
    options
        .validate()
        .map_err(|e| BuildError::InvalidRedirect(e.to_string()))?;

    let regex = options
        .rewrite_regex
        .as_ref()
        .filter(|r| r.is_set())
        .map(|r| RegexRewrite {
            pattern: r.pattern.clone(),
            substitution: r.substitution.clone(),
        });
    let path_rewrite = match (&options.path_redirect, regex) {
        (Some(path), None) => Some(PathRewrite::PathRedirect(path.clone())),
        (None, Some(regex)) => Some(PathRewrite::RegexRewrite(regex)),
        (None, None) => None,
        (Some(_), Some(_)) => {
            return Err(BuildError::InvalidRedirect(
                "path_redirect and rewrite_regex are mutually exclusive".to_string(),
            ));
        }
    };

    Ok(RedirectAction {
        scheme_redirect: options.scheme_redirect.clone(),
        host_redirect: options.host_redirect.clone(),
        port_redirect: options.port_redirect,
        path_rewrite,
        response_code: options.response_code(),
        strip_query: options.strip_query.unwrap_or(false),
    })
}
