//! JSON schemas for description-file records and the user credential record.

use std::sync::LazyLock;

use jsonschema::{Draft, JSONSchema};
use serde_json::{Value, json};

use crate::ProtocolError;

static DESCRIPTOR_SCHEMA: LazyLock<JSONSchema> =
    LazyLock::new(|| compile(&descriptor_schema()));

static USER_SCHEMA: LazyLock<JSONSchema> = LazyLock::new(|| compile(&user_schema()));

fn compile(schema: &Value) -> JSONSchema {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .expect("A valid schema")
}

/// Schema every image descriptor must satisfy before grouping.
pub fn descriptor_schema() -> Value {
    json!({
        "type": "object",
        "required": ["path", "filename", "CaptureTime"],
        "properties": {
            "path": { "type": "string" },
            "filename": { "type": "string", "minLength": 1 },
            "CaptureTime": { "type": "string", "minLength": 1 },
            "SequenceUUID": { "type": "string" },
            "Heading": { "type": "number" },
            "Latitude": { "type": "number" },
            "Longitude": { "type": "number" }
        },
        "additionalProperties": true
    })
}

/// Schema of the stored user record.
pub fn user_schema() -> Value {
    json!({
        "type": "object",
        "required": ["SettingsUsername", "user_upload_token"],
        "properties": {
            "SettingsUsername": { "type": "string", "minLength": 1 },
            "user_upload_token": { "type": "string", "minLength": 1 }
        }
    })
}

/// Validates one image descriptor record.
pub fn validate_descriptor(instance: &Value) -> Result<(), ProtocolError> {
    validate(&DESCRIPTOR_SCHEMA, instance, || describe_descriptor(instance))
}

/// Validates a user credential record.
pub fn validate_user(instance: &Value) -> Result<(), ProtocolError> {
    validate(&USER_SCHEMA, instance, || "user record".to_string())
}

fn validate(
    schema: &JSONSchema,
    instance: &Value,
    subject: impl FnOnce() -> String,
) -> Result<(), ProtocolError> {
    if let Err(errors) = schema.validate(instance) {
        let details = errors.map(|e| e.to_string()).collect();
        return Err(ProtocolError::Schema {
            subject: subject(),
            details,
        });
    }
    Ok(())
}

fn describe_descriptor(instance: &Value) -> String {
    let path = instance.get("path").and_then(Value::as_str);
    let filename = instance.get("filename").and_then(Value::as_str);
    match (path, filename) {
        (Some(p), Some(f)) if !p.is_empty() => format!("descriptor {p}/{f}"),
        (_, Some(f)) => format!("descriptor {f}"),
        _ => "descriptor".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_complete_descriptor() {
        let desc = json!({
            "path": "a",
            "filename": "1.jpg",
            "CaptureTime": "2024_01_01_00_00_00_000",
            "Heading": 10,
            "SequenceUUID": "s",
            "Orientation": 1
        });
        assert!(validate_descriptor(&desc).is_ok());
    }

    #[test]
    fn rejects_missing_capture_time() {
        let desc = json!({ "path": "a", "filename": "1.jpg", "Heading": 10 });
        let err = validate_descriptor(&desc).unwrap_err();
        match err {
            ProtocolError::Schema { subject, details } => {
                assert_eq!(subject, "descriptor a/1.jpg");
                assert!(!details.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_non_numeric_heading() {
        let desc = json!({
            "path": "",
            "filename": "1.jpg",
            "CaptureTime": "t",
            "Heading": "north"
        });
        let err = validate_descriptor(&desc).unwrap_err();
        assert!(err.to_string().starts_with("descriptor 1.jpg"));
    }

    #[test]
    fn user_record_requires_token() {
        assert!(validate_user(&json!({ "SettingsUsername": "me" })).is_err());
        assert!(
            validate_user(&json!({ "SettingsUsername": "me", "user_upload_token": "t" })).is_ok()
        );
    }
}
