use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::snapshot::{ConsistencyCheck, SnapshotError};
use crate::core::spec::{MediaType, Operation};

use super::MockError;

/// Stored answer for one mocked operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockResponse {
    pub status_code: u16,
    /// Media type to body; empty for a bodyless response.
    pub media_type_data: BTreeMap<String, Vec<u8>>,
}

impl MockResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            media_type_data: BTreeMap::new(),
        }
    }
}

/// The mock table of one fleet, keyed by mock ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockConfig {
    mocks: BTreeMap<String, MockResponse>,
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mock_id: &str) -> Option<&MockResponse> {
        self.mocks.get(mock_id)
    }

    pub fn add(&mut self, mock_id: impl Into<String>, response: MockResponse) -> Result<(), MockError> {
        let mock_id = mock_id.into();
        if self.mocks.contains_key(&mock_id) {
            return Err(MockError::DuplicateId(mock_id));
        }
        self.mocks.insert(mock_id, response);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.mocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }
}

impl ConsistencyCheck for MockConfig {
    fn check_consistency(&self) -> Result<(), SnapshotError> {
        match self
            .mocks
            .iter()
            .find(|(_, r)| !(200..300).contains(&r.status_code))
        {
            Some((id, response)) => Err(SnapshotError::Inconsistent(format!(
                "mock {id} has non-success status {}",
                response.status_code
            ))),
            None => Ok(()),
        }
    }
}

/// `"{path}-{METHOD}-{operationId}"`.
pub fn mock_id(path: &str, method: &str, operation_id: &str) -> String {
    format!("{path}-{method}-{operation_id}")
}

fn essence(media_type: &str) -> &str {
    media_type.split(';').next().unwrap_or_default().trim()
}

pub fn is_json_media_type(media_type: &str) -> bool {
    let essence = essence(media_type);
    essence.starts_with("application/") && essence.ends_with("json")
}

fn example_of(media: &MediaType) -> Option<&Value> {
    media.example.as_ref().or_else(|| {
        media
            .examples
            .as_ref()
            .and_then(|examples| examples.values().find_map(|e| e.value.as_ref()))
    })
}

fn encode_example(media_type: &str, example: &Value) -> Result<Vec<u8>, MockError> {
    if is_json_media_type(media_type) {
        return serde_json::to_vec(example).map_err(|e| MockError::Encode {
            media_type: media_type.to_string(),
            message: e.to_string(),
        });
    }
    if essence(media_type).starts_with("text/") {
        return match example {
            Value::String(text) => Ok(text.clone().into_bytes()),
            _ => Err(MockError::Encode {
                media_type: media_type.to_string(),
                message: "text examples must be strings".to_string(),
            }),
        };
    }
    Err(MockError::UnsupportedMediaType(media_type.to_string()))
}

/// Builds the mock answer of an operation from its first usable success response.
pub fn generate_mock_response(operation: &Operation) -> Result<MockResponse, MockError> {
    for (code, response) in &operation.responses {
        if !code.starts_with('2') {
            continue;
        }
        let Ok(status_code) = code.parse::<u16>() else {
            continue;
        };

        let content = match &response.content {
            Some(content) if !content.is_empty() => content,
            _ => return Ok(MockResponse::new(status_code)),
        };

        let mut mock = MockResponse::new(status_code);
        for (media_type, media) in content {
            let Some(example) = example_of(media) else {
                continue;
            };
            mock.media_type_data
                .insert(media_type.clone(), encode_example(media_type, example)?);
        }
        if !mock.media_type_data.is_empty() {
            return Ok(mock);
        }
    }

    Err(MockError::NoUsableResponse(operation.operation_id.clone()))
}
