//! Extraction of `x-kusk` options from the three scopes of a document.
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::openapi::{EXTENSION_KEY, OPERATION_METHODS, OpenApiDocument};
use super::SpecError;
use crate::core::options::{Host, Options, SubOptions};

/// Parses every scope and merges operation options into their path and document parents.
///
/// The result still needs [`Options::fill_defaults`] and [`Options::validate`].
pub fn get_options(doc: &OpenApiDocument) -> Result<Options, SpecError> {
    let mut options = Options::default();

    if let Some(extension) = doc.extensions.get(EXTENSION_KEY) {
        let mut fields = match extension {
            Value::Object(fields) => fields.clone(),
            Value::Null => Map::new(),
            _ => return Err(SpecError::extension("document", "x-kusk must be an object")),
        };
        if let Some(hosts) = fields.remove("hosts") {
            options.hosts = parse_scope::<Vec<Host>>("document hosts", hosts)?;
        }
        if let Some(path) = fields.remove("openapi-path") {
            options.openapi_path = parse_scope::<Option<String>>("document openapi-path", path)?;
        }
        options.document = parse_scope("document", Value::Object(fields))?;
    }

    for (path, item) in &doc.paths {
        let mut path_options = scope_options(&item.extensions, path)?;
        path_options.merge_in(&options.document);

        for (method, operation) in item.operations() {
            let key = Options::operation_key(method, path);
            let mut operation_options = scope_options(&operation.extensions, &key)?;
            operation_options.merge_in(&path_options);
            options.operations.insert(key, operation_options);
        }
    }

    Ok(options)
}

fn scope_options(
    extensions: &BTreeMap<String, Value>,
    scope: &str,
) -> Result<SubOptions, SpecError> {
    match extensions.get(EXTENSION_KEY) {
        Some(extension) => parse_scope(scope, extension.clone()),
        None => Ok(SubOptions::default()),
    }
}

fn parse_scope<T: DeserializeOwned>(scope: &str, value: Value) -> Result<T, SpecError> {
    serde_json::from_value(value).map_err(|e| SpecError::extension(scope, e.to_string()))
}

/// The document as clients should see it: `x-kusk` removed everywhere and disabled
/// operations dropped. A path left without operations is dropped as well.
pub fn post_processed(doc: &OpenApiDocument, options: &Options) -> Value {
    let mut processed = doc.raw().clone();
    let Some(root) = processed.as_object_mut() else {
        return processed;
    };
    root.remove(EXTENSION_KEY);

    let Some(Value::Object(paths)) = root.get_mut("paths") else {
        return processed;
    };

    paths.retain(|path, item| {
        let Some(item) = item.as_object_mut() else {
            return true;
        };
        item.remove(EXTENSION_KEY);

        let mut declared = 0;
        for method in OPERATION_METHODS {
            let disabled = options
                .operation(method, path)
                .is_some_and(SubOptions::is_disabled);
            if disabled {
                item.remove(method);
                continue;
            }
            if let Some(Value::Object(operation)) = item.get_mut(method) {
                operation.remove(EXTENSION_KEY);
                declared += 1;
            }
        }
        declared > 0
    });

    processed
}
