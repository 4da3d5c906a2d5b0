//! Device model types for a parsed DMF chip layout

use indexmap::IndexMap;
use thiserror::Error;

/// Sentinel returned by [`DeviceModel::max_channel`] when the layout has
/// no electrodes.
pub const NO_CHANNEL: i32 = -1;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("duplicate electrode id in layout: {0}")]
    DuplicateElectrode(String),
    #[error("electrode key sets differ: {0} is present in only one mapping")]
    KeySetMismatch(String),
    #[error("bounding box inverted on {axis} axis: {min} > {max}")]
    InvertedBounds { axis: char, min: f64, max: f64 },
    #[error("max channel {given} does not match channel table (expected {expected})")]
    MaxChannelMismatch { given: i32, expected: i32 },
    #[error("diff entry references unknown electrode: {0}")]
    UnknownDiffElectrode(String),
}

/// Axis-aligned bounding box in SVG user units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn from_array(arr: [f64; 4]) -> Self {
        Self {
            min_x: arr[0],
            min_y: arr[1],
            max_x: arr[2],
            max_y: arr[3],
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    /// Box containing a single point
    pub fn point(x: f64, y: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &BoundingBox) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.min_x > self.max_x {
            return Err(ModelError::InvertedBounds {
                axis: 'x',
                min: self.min_x,
                max: self.max_x,
            });
        }
        if self.min_y > self.max_y {
            return Err(ModelError::InvertedBounds {
                axis: 'y',
                min: self.min_y,
                max: self.max_y,
            });
        }
        Ok(())
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 0.0,
            max_y: 0.0,
        }
    }
}

/// A single electrode shape as produced by the layout parser
#[derive(Debug, Clone, PartialEq)]
pub struct Electrode {
    /// Element id from the source file (e.g. "electrode007")
    pub id: String,
    /// Actuation channel this electrode is wired to
    pub channel: u32,
    /// Default channel from the layout, when it differs from `channel`
    pub default_channel: Option<u32>,
    /// Shape area in SVG user units squared
    pub area: f64,
    /// Shape bounds
    pub bounds: BoundingBox,
}

/// Immutable parsed device layout with derived attributes.
///
/// Derived fields (bounding box, max channel, diff channel map) are
/// computed once at construction and never recomputed in place; any
/// change produces a new instance. `electrode_channels` and
/// `electrode_areas` always cover the same electrode ids.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceModel {
    name: String,
    source_path: String,
    electrode_channels: IndexMap<String, u32>,
    electrode_areas: IndexMap<String, f64>,
    bounding_box: BoundingBox,
    max_channel: i32,
    diff_electrode_channels: IndexMap<String, u32>,
}

impl DeviceModel {
    /// Build a model from parsed electrode shapes, deriving bounding
    /// box, max channel, and the diff channel map.
    pub fn from_electrodes(
        name: impl Into<String>,
        source_path: impl Into<String>,
        electrodes: Vec<Electrode>,
    ) -> Result<Self, ModelError> {
        let mut electrode_channels = IndexMap::with_capacity(electrodes.len());
        let mut electrode_areas = IndexMap::with_capacity(electrodes.len());
        let mut diff_electrode_channels = IndexMap::new();
        let mut bounding_box: Option<BoundingBox> = None;
        let mut max_channel = NO_CHANNEL;

        for e in electrodes {
            if electrode_channels.insert(e.id.clone(), e.channel).is_some() {
                return Err(ModelError::DuplicateElectrode(e.id));
            }
            electrode_areas.insert(e.id.clone(), e.area);
            if let Some(default) = e.default_channel {
                if default != e.channel {
                    diff_electrode_channels.insert(e.id.clone(), e.channel);
                }
            }
            max_channel = max_channel.max(e.channel as i32);
            bounding_box = Some(match bounding_box {
                Some(b) => b.union(&e.bounds),
                None => e.bounds,
            });
        }

        Ok(Self {
            name: name.into(),
            source_path: source_path.into(),
            electrode_channels,
            electrode_areas,
            bounding_box: bounding_box.unwrap_or_default(),
            max_channel,
            diff_electrode_channels,
        })
    }

    /// Reassemble a model from already-derived parts (wire decode
    /// path). Validates the key-set, bounding-box, and max-channel
    /// invariants instead of recomputing.
    pub fn from_parts(
        name: String,
        source_path: String,
        electrode_channels: IndexMap<String, u32>,
        electrode_areas: IndexMap<String, f64>,
        bounding_box: BoundingBox,
        max_channel: i32,
        diff_electrode_channels: IndexMap<String, u32>,
    ) -> Result<Self, ModelError> {
        if electrode_channels.len() != electrode_areas.len() {
            // Report the first id missing from the other mapping
            let odd = electrode_channels
                .keys()
                .find(|k| !electrode_areas.contains_key(*k))
                .or_else(|| {
                    electrode_areas
                        .keys()
                        .find(|k| !electrode_channels.contains_key(*k))
                })
                .cloned()
                .unwrap_or_default();
            return Err(ModelError::KeySetMismatch(odd));
        }
        if let Some(odd) = electrode_channels
            .keys()
            .find(|k| !electrode_areas.contains_key(*k))
        {
            return Err(ModelError::KeySetMismatch(odd.clone()));
        }

        bounding_box.validate()?;

        let expected = electrode_channels
            .values()
            .map(|&c| c as i32)
            .max()
            .unwrap_or(NO_CHANNEL);
        if max_channel != expected {
            return Err(ModelError::MaxChannelMismatch {
                given: max_channel,
                expected,
            });
        }

        if let Some(odd) = diff_electrode_channels
            .keys()
            .find(|k| !electrode_channels.contains_key(*k))
        {
            return Err(ModelError::UnknownDiffElectrode(odd.clone()));
        }

        Ok(Self {
            name,
            source_path,
            electrode_channels,
            electrode_areas,
            bounding_box,
            max_channel,
            diff_electrode_channels,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Originating file identifier; distinct from `name` when the
    /// layout was renamed on load.
    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    /// Electrode id to actuation channel, in layout order
    pub fn electrode_channels(&self) -> &IndexMap<String, u32> {
        &self.electrode_channels
    }

    /// Electrode id to shape area, same key set as the channel mapping
    pub fn electrode_areas(&self) -> &IndexMap<String, f64> {
        &self.electrode_areas
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    /// Largest channel id in the layout, or [`NO_CHANNEL`] when the
    /// layout has no electrodes
    pub fn max_channel(&self) -> i32 {
        self.max_channel
    }

    /// Electrodes whose channel assignment differs from the layout
    /// default; empty when none do
    pub fn diff_electrode_channels(&self) -> &IndexMap<String, u32> {
        &self.diff_electrode_channels
    }

    pub fn electrode_count(&self) -> usize {
        self.electrode_channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn electrode(id: &str, channel: u32, area: f64) -> Electrode {
        Electrode {
            id: id.to_string(),
            channel,
            default_channel: None,
            area,
            bounds: BoundingBox::point(channel as f64, channel as f64),
        }
    }

    #[test]
    fn test_derives_max_channel_and_bounds() {
        let model = DeviceModel::from_electrodes(
            "chip",
            "chip.svg",
            vec![
                electrode("e0", 3, 1.0),
                electrode("e1", 7, 2.0),
                electrode("e2", 5, 3.0),
            ],
        )
        .unwrap();

        assert_eq!(model.max_channel(), 7);
        assert_eq!(model.electrode_count(), 3);
        assert_eq!(model.bounding_box().to_array(), [3.0, 3.0, 7.0, 7.0]);
        assert!(model.diff_electrode_channels().is_empty());
    }

    #[test]
    fn test_empty_layout_uses_sentinel() {
        let model = DeviceModel::from_electrodes("empty", "empty.svg", vec![]).unwrap();
        assert_eq!(model.max_channel(), NO_CHANNEL);
        assert_eq!(model.electrode_count(), 0);
        assert_eq!(model.bounding_box().to_array(), [0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_diff_only_when_default_disagrees() {
        let mut e0 = electrode("e0", 3, 1.0);
        e0.default_channel = Some(3);
        let mut e1 = electrode("e1", 9, 1.0);
        e1.default_channel = Some(4);

        let model =
            DeviceModel::from_electrodes("chip", "chip.svg", vec![e0, e1]).unwrap();
        assert_eq!(model.diff_electrode_channels().len(), 1);
        assert_eq!(model.diff_electrode_channels().get("e1"), Some(&9));
    }

    #[test]
    fn test_duplicate_electrode_rejected() {
        let err = DeviceModel::from_electrodes(
            "chip",
            "chip.svg",
            vec![electrode("e0", 1, 1.0), electrode("e0", 2, 1.0)],
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateElectrode(id) if id == "e0"));
    }

    #[test]
    fn test_from_parts_rejects_key_set_mismatch() {
        let mut channels = IndexMap::new();
        channels.insert("e0".to_string(), 1u32);
        let areas = IndexMap::new();

        let err = DeviceModel::from_parts(
            "chip".into(),
            "chip.svg".into(),
            channels,
            areas,
            BoundingBox::default(),
            1,
            IndexMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::KeySetMismatch(_)));
    }

    #[test]
    fn test_from_parts_rejects_inverted_bounds() {
        let err = DeviceModel::from_parts(
            "chip".into(),
            "chip.svg".into(),
            IndexMap::new(),
            IndexMap::new(),
            BoundingBox::from_array([5.0, 0.0, 1.0, 0.0]),
            NO_CHANNEL,
            IndexMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::InvertedBounds { axis: 'x', .. }));
    }

    #[test]
    fn test_from_parts_rejects_stale_max_channel() {
        let mut channels = IndexMap::new();
        channels.insert("e0".to_string(), 4u32);
        let mut areas = IndexMap::new();
        areas.insert("e0".to_string(), 1.0f64);

        let err = DeviceModel::from_parts(
            "chip".into(),
            "chip.svg".into(),
            channels,
            areas,
            BoundingBox::default(),
            9,
            IndexMap::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ModelError::MaxChannelMismatch {
                given: 9,
                expected: 4
            }
        ));
    }
}
