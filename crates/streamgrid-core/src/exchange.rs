//! Import/export document validation.
//!
//! Imports arrive as untyped JSON from files or the clipboard, so validation
//! walks a `serde_json::Value` and reports the first problem instead of
//! surfacing serde's messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ImportError;
use crate::model::{ChatOverlay, ExchangeData, LayoutCell, StreamEntry};

/// Outcome of an import, in the shape UI callers expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportReport {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(err: &ImportError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
        }
    }
}

impl<T> From<&Result<T, ImportError>> for ImportReport {
    fn from(result: &Result<T, ImportError>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::failed(e),
        }
    }
}

/// Parse and validate an exchange document from text.
pub fn parse(text: &str) -> Result<ExchangeData, ImportError> {
    let value: Value = serde_json::from_str(text).map_err(|_| ImportError::InvalidFormat)?;
    validate(&value)
}

/// Validate an exchange document. Stream kinds are recomputed from their URLs.
pub fn validate(value: &Value) -> Result<ExchangeData, ImportError> {
    let obj = value.as_object().ok_or(ImportError::InvalidFormat)?;

    let (Some(streams), Some(layout)) = (
        obj.get("streams").and_then(Value::as_array),
        obj.get("layout").and_then(Value::as_array),
    ) else {
        return Err(ImportError::NotArrays);
    };

    let streams = streams
        .iter()
        .map(validate_stream)
        .collect::<Result<Vec<_>, _>>()?;
    let layout = layout
        .iter()
        .map(validate_cell)
        .collect::<Result<Vec<_>, _>>()?;
    let chats = match obj.get("chats") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                serde_json::from_value::<ChatOverlay>(item.clone())
                    .map_err(|_| ImportError::InvalidChat)
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(ImportError::InvalidChat),
    };

    Ok(ExchangeData {
        streams,
        layout,
        chats,
    })
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn validate_stream(value: &Value) -> Result<StreamEntry, ImportError> {
    let obj = value.as_object().ok_or(ImportError::InvalidStream)?;
    for key in ["id", "name", "logoUrl", "streamUrl"] {
        non_empty_str(obj, key).ok_or(ImportError::InvalidStream)?;
    }
    let mut entry: StreamEntry =
        serde_json::from_value(value.clone()).map_err(|_| ImportError::InvalidStream)?;
    entry.refresh_kind();
    Ok(entry)
}

fn grid_number(obj: &Map<String, Value>, key: &str) -> Option<i32> {
    let n = obj.get(key)?.as_f64()?;
    n.is_finite()
        .then(|| n.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32)
}

fn validate_cell(value: &Value) -> Result<LayoutCell, ImportError> {
    let obj = value.as_object().ok_or(ImportError::InvalidLayout)?;
    let item_id = obj
        .get("i")
        .and_then(Value::as_str)
        .ok_or(ImportError::InvalidLayout)?;
    let num = |key: &str| grid_number(obj, key).ok_or(ImportError::InvalidLayout);
    let mut cell = LayoutCell::new(item_id, num("x")?, num("y")?, num("w")?, num("h")?);
    cell.pinned = obj.get("static").and_then(Value::as_bool).unwrap_or(false);
    Ok(cell)
}

/// Serialize an exchange document for export.
pub fn to_json(data: &ExchangeData) -> serde_json::Result<String> {
    serde_json::to_string_pretty(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::StreamKind;
    use serde_json::json;

    fn stream_json(id: &str) -> Value {
        json!({
            "id": id,
            "name": "Lofi",
            "logoUrl": "https://example.com/logo.png",
            "streamUrl": "https://twitch.tv/lofigirl"
        })
    }

    #[test]
    fn test_valid_document() {
        let doc = json!({
            "streams": [stream_json("s1")],
            "layout": [{"i": "s1", "x": 0, "y": 0, "w": 3.4, "h": 3}],
        });
        let data = validate(&doc).unwrap();
        assert_eq!(data.streams[0].kind, StreamKind::Twitch);
        assert_eq!(data.layout[0].w, 3);
        assert!(data.chats.is_empty());
    }

    #[test]
    fn test_error_messages() {
        let cases = [
            (json!([1, 2]), "Invalid data format"),
            (json!({"streams": {}, "layout": []}), "Streams and layout must be arrays"),
            (json!({"streams": []}), "Streams and layout must be arrays"),
            (
                json!({"streams": [{"id": "s1", "name": "", "logoUrl": "x", "streamUrl": "y"}], "layout": []}),
                "Invalid stream data format",
            ),
            (
                json!({"streams": [stream_json("s1")], "layout": [{"i": "s1", "x": "0", "y": 0, "w": 3, "h": 3}]}),
                "Invalid layout data format",
            ),
            (
                json!({"streams": [], "layout": [], "chats": [{"id": 3}]}),
                "Invalid chat data format",
            ),
        ];
        for (doc, message) in cases {
            let report = ImportReport::from(&validate(&doc));
            assert!(!report.success);
            assert_eq!(report.error.as_deref(), Some(message));
        }
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert_eq!(parse("not json").unwrap_err(), ImportError::InvalidFormat);
    }

    #[test]
    fn test_export_is_importable() {
        let doc = json!({
            "streams": [stream_json("s1")],
            "layout": [{"i": "s1", "x": 3, "y": 0, "w": 3, "h": 3, "static": true}],
            "chats": [{"id": "chat-1", "streamId": "s1", "streamType": "twitch", "identifier": "lofigirl", "displayName": "Lofi"}],
        });
        let data = validate(&doc).unwrap();
        let again = parse(&to_json(&data).unwrap()).unwrap();
        assert_eq!(again, data);
        assert!(again.layout[0].pinned);
    }
}
