//! The subset of an OpenAPI 3 document the route compiler reads.
//!
//! The raw JSON value is kept next to the typed view so that the processed document can be
//! re-served without losing fields this model does not know about.
use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::SpecError;

pub const EXTENSION_KEY: &str = "x-kusk";

/// Operation methods in the order routes are generated for one path.
pub const OPERATION_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

#[derive(Debug, Clone)]
pub struct OpenApiDocument {
    pub paths: BTreeMap<String, PathItem>,
    pub extensions: BTreeMap<String, Value>,
    raw: Value,
}

impl OpenApiDocument {
    /// Parses a YAML or JSON document.
    pub fn parse(source: &str) -> Result<Self, SpecError> {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(source).map_err(|e| SpecError::Parse(e.to_string()))?;
        Self::from_value(yaml_to_json(yaml)?)
    }

    pub fn from_value(raw: Value) -> Result<Self, SpecError> {
        let version = raw
            .get("openapi")
            .and_then(Value::as_str)
            .ok_or_else(|| match raw.get("swagger") {
                Some(v) => SpecError::UnsupportedVersion(v.to_string()),
                None => SpecError::Parse("missing openapi version field".to_string()),
            })?;
        if !version.starts_with("3.") {
            return Err(SpecError::UnsupportedVersion(version.to_string()));
        }

        let typed: RawDocument =
            serde_json::from_value(raw.clone()).map_err(|e| SpecError::Parse(e.to_string()))?;
        Ok(Self {
            paths: typed.paths,
            extensions: typed.extensions,
            raw,
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// YAML allows non-string keys (`200:` for a response code); JSON does not.
fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, SpecError> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => serde_json::to_value(&n).map_err(|e| SpecError::Parse(e.to_string()))?,
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut object = serde_json::Map::new();
            for (key, value) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    other => {
                        return Err(SpecError::Parse(format!("unsupported mapping key {other:?}")));
                    }
                };
                object.insert(key, yaml_to_json(value)?);
            }
            Value::Object(object)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    paths: BTreeMap<String, PathItem>,
    #[serde(flatten)]
    extensions: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathItem {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    pub get: Option<Operation>,
    pub put: Option<Operation>,
    pub post: Option<Operation>,
    pub delete: Option<Operation>,
    pub options: Option<Operation>,
    pub head: Option<Operation>,
    pub patch: Option<Operation>,
    pub trace: Option<Operation>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl PathItem {
    /// Declared operations with their upper-case method.
    pub fn operations(&self) -> impl Iterator<Item = (&'static str, &Operation)> {
        [
            ("GET", &self.get),
            ("PUT", &self.put),
            ("POST", &self.post),
            ("DELETE", &self.delete),
            ("OPTIONS", &self.options),
            ("HEAD", &self.head),
            ("PATCH", &self.patch),
            ("TRACE", &self.trace),
        ]
        .into_iter()
        .filter_map(|(method, op)| op.as_ref().map(|op| (method, op)))
    }

    /// Path level parameters overridden by operation level ones of the same name.
    pub fn parameters_for(&self, operation: &Operation) -> BTreeMap<String, ParamSchema> {
        let mut params = BTreeMap::new();
        for param in self.parameters.iter().chain(&operation.parameters) {
            if let Some(name) = &param.name {
                params.insert(name.clone(), param.param_schema());
            }
        }
        params
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operation {
    #[serde(rename = "operationId", default)]
    pub operation_id: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub responses: BTreeMap<String, Response>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

/// `$ref` parameters carry no name and therefore no matcher hint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Parameter {
    pub name: Option<String>,
    #[serde(rename = "in")]
    pub location: Option<String>,
    pub schema: Option<Schema>,
}

impl Parameter {
    fn param_schema(&self) -> ParamSchema {
        let Some(schema) = &self.schema else {
            return ParamSchema::default();
        };
        let kind = match &schema.kind {
            Some(Value::String(kind)) => Some(kind.clone()),
            // 3.1 allows a list of types; the first non-null one decides.
            Some(Value::Array(kinds)) => kinds
                .iter()
                .filter_map(Value::as_str)
                .find(|k| *k != "null")
                .map(str::to_string),
            _ => None,
        };
        let enum_values = schema
            .enum_values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        ParamSchema { kind, enum_values }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub kind: Option<Value>,
    #[serde(rename = "enum", default)]
    pub enum_values: Vec<Value>,
}

/// Type hints used to build a parameter's regex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSchema {
    pub kind: Option<String>,
    pub enum_values: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Response {
    pub content: Option<BTreeMap<String, MediaType>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaType {
    pub example: Option<Value>,
    pub examples: Option<BTreeMap<String, Example>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Example {
    pub value: Option<Value>,
}
