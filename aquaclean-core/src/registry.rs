//! Data point registry.
//!
//! The registry is loaded from a table (YAML or JSON) so new firmware data
//! points can be described without code changes:
//!
//! ```yaml
//! data_points:
//!   - id: 340
//!     name: lighting_set_brightness
//!     direction: write
//!     encoding: { type: percent }
//!     unit: "%"
//! ```

use crate::datapoint::{DataPointId, DataPointSpec, DataPointValue};
use crate::error::{CoreError, ValidationError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const BUILTIN_TABLE: &str = include_str!("../data/datapoints.yaml");

/// Serialized form of a registry table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataPointTable {
    pub data_points: Vec<DataPointSpec>,
}

/// Indexed set of data point descriptors.
#[derive(Debug, Clone)]
pub struct DataPointRegistry {
    points: BTreeMap<DataPointId, DataPointSpec>,
    names: HashMap<String, DataPointId>,
}

impl DataPointRegistry {
    /// Builds a registry, rejecting duplicate ids or names and malformed encodings.
    pub fn from_table(table: DataPointTable) -> Result<Self, CoreError> {
        let mut points = BTreeMap::new();
        let mut names = HashMap::new();

        for spec in table.data_points {
            spec.encoding.check().map_err(|reason| {
                CoreError::invalid_table(format!("data point {}: {}", spec.id, reason))
            })?;

            if names.insert(spec.name.clone(), spec.id).is_some() {
                return Err(CoreError::invalid_table(format!(
                    "duplicate data point name '{}'",
                    spec.name
                )));
            }
            if let Some(previous) = points.insert(spec.id, spec) {
                return Err(CoreError::invalid_table(format!(
                    "duplicate data point id {}",
                    previous.id
                )));
            }
        }

        Ok(Self { points, names })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        Self::from_table(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Self::from_table(serde_json::from_str(json)?)
    }

    /// Returns the registry shipped with the crate.
    pub fn builtin() -> Result<Self, CoreError> {
        Self::from_yaml(BUILTIN_TABLE)
    }

    /// Returns the descriptor for `id`.
    pub fn describe(&self, id: DataPointId) -> Result<&DataPointSpec, CoreError> {
        self.points.get(&id).ok_or(CoreError::UnknownDataPoint(id))
    }

    /// Looks a descriptor up by name.
    pub fn by_name(&self, name: &str) -> Option<&DataPointSpec> {
        self.names.get(name).and_then(|id| self.points.get(id))
    }

    pub fn contains(&self, id: DataPointId) -> bool {
        self.points.contains_key(&id)
    }

    /// Validates and encodes a value for writing to `id`.
    pub fn encode_write(&self, id: DataPointId, value: &DataPointValue) -> Result<Bytes, CoreError> {
        Ok(self.describe(id)?.encode(value)?)
    }

    /// Checks that `id` is known and readable.
    pub fn check_readable(&self, id: DataPointId) -> Result<&DataPointSpec, CoreError> {
        let spec = self.describe(id)?;
        if !spec.direction.is_readable() {
            return Err(ValidationError::NotReadable { id }.into());
        }
        Ok(spec)
    }

    /// Decodes a reported payload for `id`. An empty payload yields `None`.
    pub fn decode(&self, id: DataPointId, payload: &[u8]) -> Result<Option<DataPointValue>, CoreError> {
        Ok(self.describe(id)?.decode(payload)?)
    }

    /// Iterates descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &DataPointSpec> {
        self.points.values()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the table this registry was built from.
    pub fn to_table(&self) -> DataPointTable {
        DataPointTable {
            data_points: self.points.values().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoint::{Direction, Encoding};

    #[test]
    fn test_builtin_registry() {
        let registry = DataPointRegistry::builtin().unwrap();
        assert!(!registry.is_empty());

        let set = registry.describe(DataPointId(340)).unwrap();
        assert_eq!(set.name, "lighting_set_brightness");
        assert_eq!(set.direction, Direction::Write);
        assert_eq!(set.encoding, Encoding::Percent);

        let status = registry.by_name("lighting_brightness_status").unwrap();
        assert_eq!(status.id, DataPointId(341));
        assert!(status.direction.is_readable());

        let model = registry.describe(DataPointId(2)).unwrap();
        assert!(matches!(model.encoding, Encoding::Text { .. }));
    }

    #[test]
    fn test_encode_write() {
        let registry = DataPointRegistry::builtin().unwrap();
        let id = DataPointId(340);

        let wire = registry.encode_write(id, &DataPointValue::Percent(50)).unwrap();
        assert_eq!(wire.as_ref(), &[50]);

        let err = registry
            .encode_write(id, &DataPointValue::Percent(150))
            .unwrap_err();
        assert!(err.is_validation());

        assert!(matches!(
            registry.encode_write(DataPointId(9999), &DataPointValue::Bool(true)),
            Err(CoreError::UnknownDataPoint(DataPointId(9999)))
        ));
    }

    #[test]
    fn test_decode() {
        let registry = DataPointRegistry::builtin().unwrap();
        assert_eq!(
            registry.decode(DataPointId(341), &[75]).unwrap(),
            Some(DataPointValue::Percent(75))
        );
        assert_eq!(registry.decode(DataPointId(341), &[]).unwrap(), None);
        assert!(registry.decode(DataPointId(341), &[255]).unwrap_err().is_decode());
    }

    #[test]
    fn test_check_readable() {
        let registry = DataPointRegistry::builtin().unwrap();
        assert!(registry.check_readable(DataPointId(341)).is_ok());
        assert!(matches!(
            registry.check_readable(DataPointId(340)),
            Err(CoreError::Validation(ValidationError::NotReadable { .. }))
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let yaml = r#"
data_points:
  - { id: 1, name: a, direction: read, encoding: { type: boolean } }
  - { id: 1, name: b, direction: read, encoding: { type: boolean } }
"#;
        let err = DataPointRegistry::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTable { .. }));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let yaml = r#"
data_points:
  - { id: 1, name: a, direction: read, encoding: { type: boolean } }
  - { id: 2, name: a, direction: read, encoding: { type: boolean } }
"#;
        assert!(DataPointRegistry::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_bad_encoding_rejected() {
        let yaml = r#"
data_points:
  - { id: 7, name: x, direction: read, encoding: { type: unsigned, width: 3 } }
"#;
        let err = DataPointRegistry::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("width"));
    }

    #[test]
    fn test_json_table() {
        let json = r#"{
            "data_points": [
                {"id": 900, "name": "seat_heating", "direction": "read_write",
                 "encoding": {"type": "unsigned", "width": 1, "min": 0, "max": 5}}
            ]
        }"#;
        let registry = DataPointRegistry::from_json(json).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry
                .encode_write(DataPointId(900), &DataPointValue::Unsigned(3))
                .unwrap()
                .as_ref(),
            &[3]
        );
    }

    #[test]
    fn test_table_roundtrip() {
        let registry = DataPointRegistry::builtin().unwrap();
        let yaml = serde_yaml::to_string(&registry.to_table()).unwrap();
        let reloaded = DataPointRegistry::from_yaml(&yaml).unwrap();
        assert_eq!(reloaded.len(), registry.len());
    }
}
