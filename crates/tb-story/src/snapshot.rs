use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tb_core::{BridgeError, FieldValue, SharedStr};

use crate::expr::CharacterFields;

pub(crate) const SNAPSHOT_SCHEMA: u32 = 1;

/// Serialized playback position: the pause the session is parked at plus all
/// character fields. Keys address script structure (beat name and node
/// index), not text, so a snapshot survives retranslation of the script.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StorySnapshot {
    pub schema: u32,
    pub beat: String,
    pub node: usize,
    pub fields: BTreeMap<String, BTreeMap<String, SnapValue>>,
}

/// Field value in snapshot form. Untagged: the JSON value's own shape picks
/// the variant, which keeps snapshots readable and hand-editable.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum SnapValue {
    Null(()),
    Bool(bool),
    Int(i32),
    Float(f64),
    Str(String),
}

impl From<&FieldValue> for SnapValue {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => Self::Null(()),
            FieldValue::Bool(value) => Self::Bool(*value),
            FieldValue::Int(value) => Self::Int(*value),
            FieldValue::Float(value) => Self::Float(*value),
            FieldValue::Str(value) => Self::Str(value.to_string()),
        }
    }
}

impl From<&SnapValue> for FieldValue {
    fn from(value: &SnapValue) -> Self {
        match value {
            SnapValue::Null(()) => Self::Null,
            SnapValue::Bool(value) => Self::Bool(*value),
            SnapValue::Int(value) => Self::Int(*value),
            SnapValue::Float(value) => Self::Float(*value),
            SnapValue::Str(value) => Self::Str(SharedStr::new(value)),
        }
    }
}

impl StorySnapshot {
    pub fn capture(beat: &str, node: usize, fields: &CharacterFields) -> Self {
        Self {
            schema: SNAPSHOT_SCHEMA,
            beat: beat.to_string(),
            node,
            fields: fields
                .iter()
                .map(|(character, fields)| {
                    (
                        character.clone(),
                        fields
                            .iter()
                            .map(|(field, value)| (field.clone(), SnapValue::from(value)))
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|error| {
            BridgeError::new(
                "ENGINE_BAD_SNAPSHOT",
                format!("Snapshot serialization failed: {}.", error),
            )
        })
    }

    pub fn from_json(snapshot: &str) -> Result<Self, BridgeError> {
        let parsed: Self = serde_json::from_str(snapshot).map_err(|error| {
            BridgeError::new(
                "ENGINE_BAD_SNAPSHOT",
                format!("Snapshot is unreadable: {}.", error),
            )
        })?;
        if parsed.schema != SNAPSHOT_SCHEMA {
            return Err(BridgeError::new(
                "ENGINE_BAD_SNAPSHOT",
                format!("Snapshot schema {} is unsupported.", parsed.schema),
            ));
        }
        Ok(parsed)
    }

    pub fn restore_fields(&self) -> CharacterFields {
        self.fields
            .iter()
            .map(|(character, fields)| {
                (
                    character.clone(),
                    fields
                        .iter()
                        .map(|(field, value)| (field.clone(), FieldValue::from(value)))
                        .collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_round_trips_through_json() {
        let mut fields = CharacterFields::new();
        fields.entry("hero".to_string()).or_default().extend([
            ("courage".to_string(), FieldValue::Int(3)),
            ("name".to_string(), FieldValue::from("Mara")),
            ("scar".to_string(), FieldValue::Null),
        ]);

        let snapshot = StorySnapshot::capture("main", 2, &fields);
        let json = snapshot.to_json().expect("serialize");
        let restored = StorySnapshot::from_json(&json).expect("deserialize");
        assert_eq!(restored.beat, "main");
        assert_eq!(restored.node, 2);
        assert_eq!(restored.restore_fields(), fields);
    }

    #[test]
    fn unknown_schema_versions_are_rejected() {
        let json = "{\"schema\":99,\"beat\":\"main\",\"node\":0,\"fields\":{}}";
        let error = StorySnapshot::from_json(json).expect_err("future schema");
        assert_eq!(error.code, "ENGINE_BAD_SNAPSHOT");
    }

    #[test]
    fn garbage_input_is_a_snapshot_error() {
        let error = StorySnapshot::from_json("not json").expect_err("garbage");
        assert_eq!(error.code, "ENGINE_BAD_SNAPSHOT");
    }
}
