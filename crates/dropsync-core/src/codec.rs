//! Wire codec for device state payloads
//!
//! Maps [`DeviceModel`] to and from the JSON form carried on the bus.
//! An absent device encodes to JSON `null` rather than an omitted
//! message: absence is application state, and a retained null clears
//! stale retained data for late subscribers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::device::{BoundingBox, DeviceModel, ModelError};

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("non-finite value in field {field}")]
    NonFinite { field: String },
    #[error("JSON serialization failed: {0}")]
    Json(String),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("invalid device state: {0}")]
    Invalid(#[from] ModelError),
}

/// Inbound "load device from file" payload: a layout name and the SVG
/// source text
#[derive(Debug, Clone, Deserialize)]
pub struct LoadRequest {
    pub name: String,
    pub file: String,
}

/// Full device state as carried on the wire
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceStateWire {
    name: String,
    source_path: String,
    electrode_channels: IndexMap<String, u32>,
    electrode_areas: IndexMap<String, f64>,
    bounding_box: [f64; 4],
    max_channel: i32,
    diff_electrode_channels: IndexMap<String, u32>,
}

/// Encode a device (or its absence) to the wire JSON form.
///
/// Fails rather than emitting NaN/Infinity, which have no JSON
/// representation.
pub fn encode(model: Option<&DeviceModel>) -> Result<Value, EncodeError> {
    let Some(model) = model else {
        return Ok(Value::Null);
    };

    for (id, area) in model.electrode_areas() {
        if !area.is_finite() {
            return Err(EncodeError::NonFinite {
                field: format!("electrodeAreas.{id}"),
            });
        }
    }
    if model.bounding_box().to_array().iter().any(|v| !v.is_finite()) {
        return Err(EncodeError::NonFinite {
            field: "boundingBox".to_string(),
        });
    }

    let wire = DeviceStateWire {
        name: model.name().to_string(),
        source_path: model.source_path().to_string(),
        electrode_channels: model.electrode_channels().clone(),
        electrode_areas: model.electrode_areas().clone(),
        bounding_box: model.bounding_box().to_array(),
        max_channel: model.max_channel(),
        diff_electrode_channels: model.diff_electrode_channels().clone(),
    };

    serde_json::to_value(&wire).map_err(|e| EncodeError::Json(e.to_string()))
}

/// Decode a full device state payload. JSON `null` decodes to "no
/// device" without error.
pub fn decode_state(payload: &[u8]) -> Result<Option<DeviceModel>, DecodeError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if value.is_null() {
        return Ok(None);
    }

    let wire: DeviceStateWire =
        serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let model = DeviceModel::from_parts(
        wire.name,
        wire.source_path,
        wire.electrode_channels,
        wire.electrode_areas,
        BoundingBox::from_array(wire.bounding_box),
        wire.max_channel,
        wire.diff_electrode_channels,
    )?;
    Ok(Some(model))
}

/// Decode an inbound "load device from file" payload
pub fn decode_load(payload: &[u8]) -> Result<LoadRequest, DecodeError> {
    serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Electrode, NO_CHANNEL};

    fn sample_model() -> DeviceModel {
        let electrodes = vec![
            Electrode {
                id: "electrode000".to_string(),
                channel: 3,
                default_channel: None,
                area: 2.25,
                bounds: BoundingBox::from_array([0.0, 0.0, 1.5, 1.5]),
            },
            Electrode {
                id: "electrode001".to_string(),
                channel: 11,
                default_channel: Some(5),
                area: 4.0,
                bounds: BoundingBox::from_array([2.0, 0.0, 4.0, 2.0]),
            },
            Electrode {
                id: "electrode002".to_string(),
                channel: 3,
                default_channel: None,
                area: 1.0,
                bounds: BoundingBox::from_array([0.0, 3.0, 1.0, 4.0]),
            },
        ];
        DeviceModel::from_electrodes("chip1", "chip1.svg", electrodes).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let model = sample_model();
        let value = encode(Some(&model)).unwrap();
        let payload = serde_json::to_vec(&value).unwrap();
        let decoded = decode_state(&payload).unwrap().unwrap();
        assert_eq!(decoded, model);
    }

    #[test]
    fn test_round_trip_empty_layout() {
        let model = DeviceModel::from_electrodes("empty", "empty.svg", vec![]).unwrap();
        let value = encode(Some(&model)).unwrap();
        let payload = serde_json::to_vec(&value).unwrap();
        let decoded = decode_state(&payload).unwrap().unwrap();
        assert_eq!(decoded.max_channel(), NO_CHANNEL);
        assert_eq!(decoded, model);
    }

    #[test]
    fn test_none_encodes_to_null() {
        assert_eq!(encode(None).unwrap(), Value::Null);
    }

    #[test]
    fn test_null_decodes_to_no_device() {
        assert!(decode_state(b"null").unwrap().is_none());
    }

    #[test]
    fn test_order_preserved_through_cycle() {
        // Layout order deliberately not alphabetical
        let ids = ["reservoir", "electrode009", "mixer", "electrode001"];
        let electrodes: Vec<Electrode> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Electrode {
                id: id.to_string(),
                channel: i as u32,
                default_channel: None,
                area: 1.0,
                bounds: BoundingBox::default(),
            })
            .collect();
        let model = DeviceModel::from_electrodes("chip", "chip.svg", electrodes).unwrap();

        let payload = serde_json::to_vec(&encode(Some(&model)).unwrap()).unwrap();
        let decoded = decode_state(&payload).unwrap().unwrap();
        let cycled: Vec<&str> = decoded
            .electrode_channels()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(cycled, ids);
    }

    #[test]
    fn test_non_finite_area_rejected() {
        let model = DeviceModel::from_electrodes(
            "bad",
            "bad.svg",
            vec![Electrode {
                id: "e0".to_string(),
                channel: 0,
                default_channel: None,
                area: f64::NAN,
                bounds: BoundingBox::default(),
            }],
        )
        .unwrap();

        let err = encode(Some(&model)).unwrap_err();
        assert!(matches!(err, EncodeError::NonFinite { field } if field == "electrodeAreas.e0"));
    }

    #[test]
    fn test_missing_field_is_decode_error() {
        let payload = br#"{"name": "chip1", "sourcePath": "chip1.svg"}"#;
        assert!(matches!(
            decode_state(payload),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_malformed_tabular_value_is_decode_error() {
        let payload = br#"{
            "name": "chip1",
            "sourcePath": "chip1.svg",
            "electrodeChannels": {"e0": "not-a-number"},
            "electrodeAreas": {"e0": 1.0},
            "boundingBox": [0, 0, 1, 1],
            "maxChannel": 0,
            "diffElectrodeChannels": {}
        }"#;
        assert!(matches!(
            decode_state(payload),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_invariant_violation_is_decode_error() {
        // maxChannel disagrees with the channel table
        let payload = br#"{
            "name": "chip1",
            "sourcePath": "chip1.svg",
            "electrodeChannels": {"e0": 2},
            "electrodeAreas": {"e0": 1.0},
            "boundingBox": [0, 0, 1, 1],
            "maxChannel": 7,
            "diffElectrodeChannels": {}
        }"#;
        assert!(matches!(decode_state(payload), Err(DecodeError::Invalid(_))));
    }

    #[test]
    fn test_decode_load_request() {
        let payload = br#"{"name": "chip1.svg", "file": "<svg></svg>"}"#;
        let req = decode_load(payload).unwrap();
        assert_eq!(req.name, "chip1.svg");
        assert_eq!(req.file, "<svg></svg>");
    }

    #[test]
    fn test_decode_load_missing_file_field() {
        assert!(decode_load(br#"{"name": "chip1.svg"}"#).is_err());
    }
}
