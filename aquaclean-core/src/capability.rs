//! Model capability resolution.
//!
//! Device models are grouped into tiers; each tier exposes a set of data
//! points and named features. Tiers may extend one another. Model ranges
//! are matched on the leading digits of the normalized model identifier
//! (`146.220.11.1` normalizes to `146220111`).
//!
//! ```yaml
//! tiers:
//!   basic:
//!     data_points: [0, 1, 2]
//!     features: [anal_shower]
//!   full:
//!     extends: basic
//!     data_points: [340, 341]
//!     features: [night_light]
//! families:
//!   - { family: Sela, tier: full, min: 146220, max: 146229 }
//! ```
//!
//! Unknown identifiers resolve to the basic tier so that the device stays
//! usable with a minimal feature set.

use crate::datapoint::DataPointId;
use crate::error::CoreError;
use crate::registry::DataPointRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

const BUILTIN_TABLE: &str = include_str!("../data/capabilities.yaml");

/// Capability tier of a device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Full,
    Mid,
    Basic,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Full => "full",
            ModelTier::Mid => "mid",
            ModelTier::Basic => "basic",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tier as written in the table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<ModelTier>,
    #[serde(default)]
    pub data_points: Vec<DataPointId>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// A range of model numbers belonging to one product family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyPattern {
    pub family: String,
    pub tier: ModelTier,
    pub min: u64,
    pub max: u64,
}

impl FamilyPattern {
    /// Returns whether the normalized identifier falls in this range.
    ///
    /// Compares as many leading digits as `max` has.
    fn matches(&self, normalized: &str) -> bool {
        let digits = self.max.to_string().len();
        normalized
            .get(..digits)
            .and_then(|prefix| prefix.parse::<u64>().ok())
            .map_or(false, |n| (self.min..=self.max).contains(&n))
    }
}

/// Serialized form of a capability table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityTableRaw {
    pub tiers: BTreeMap<ModelTier, TierSpec>,
    #[serde(default)]
    pub families: Vec<FamilyPattern>,
}

#[derive(Debug, Clone)]
struct ResolvedTier {
    data_points: BTreeSet<DataPointId>,
    features: BTreeSet<String>,
}

/// Validated capability table with tier inheritance flattened.
#[derive(Debug, Clone)]
pub struct CapabilityTable {
    tiers: BTreeMap<ModelTier, ResolvedTier>,
    families: Vec<FamilyPattern>,
}

impl CapabilityTable {
    pub fn from_raw(raw: CapabilityTableRaw) -> Result<Self, CoreError> {
        if !raw.tiers.contains_key(&ModelTier::Basic) {
            return Err(CoreError::invalid_table("basic tier is required"));
        }

        for pattern in &raw.families {
            if pattern.min > pattern.max {
                return Err(CoreError::invalid_table(format!(
                    "family '{}': min {} greater than max {}",
                    pattern.family, pattern.min, pattern.max
                )));
            }
            if !raw.tiers.contains_key(&pattern.tier) {
                return Err(CoreError::invalid_table(format!(
                    "family '{}' references undefined tier '{}'",
                    pattern.family, pattern.tier
                )));
            }
        }

        let mut tiers = BTreeMap::new();
        for &tier in raw.tiers.keys() {
            tiers.insert(tier, flatten(&raw.tiers, tier)?);
        }

        Ok(Self {
            tiers,
            families: raw.families,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        Self::from_raw(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Self::from_raw(serde_json::from_str(json)?)
    }

    /// Returns the table shipped with the crate.
    pub fn builtin() -> Result<Self, CoreError> {
        Self::from_yaml(BUILTIN_TABLE)
    }

    /// Checks every data point the table mentions is described by `registry`.
    pub fn check_against(&self, registry: &DataPointRegistry) -> Result<(), CoreError> {
        for (tier, resolved) in &self.tiers {
            if let Some(id) = resolved.data_points.iter().find(|id| !registry.contains(**id)) {
                return Err(CoreError::invalid_table(format!(
                    "tier '{}' lists unknown data point {}",
                    tier, id
                )));
            }
        }
        Ok(())
    }

    /// Resolves a model identifier to its capability profile.
    ///
    /// Never fails: identifiers that match no family get the basic tier.
    pub fn resolve(&self, model_identifier: &str) -> DeviceCapabilityProfile {
        let normalized = normalize_model(model_identifier);
        let family = if normalized.bytes().all(|b| b.is_ascii_digit()) {
            self.families.iter().find(|p| p.matches(&normalized))
        } else {
            None
        };

        let tier = family.map_or(ModelTier::Basic, |p| p.tier);
        match family {
            Some(p) => debug!(model = model_identifier, family = %p.family, %tier, "Resolved model"),
            None => debug!(model = model_identifier, "No family matched, assuming basic tier"),
        }
        let resolved = self.tiers.get(&tier).or_else(|| self.tiers.get(&ModelTier::Basic));

        DeviceCapabilityProfile {
            model_identifier: model_identifier.to_string(),
            tier,
            family: family.map(|p| p.family.clone()),
            data_points: resolved.map(|r| r.data_points.clone()).unwrap_or_default(),
            features: resolved.map(|r| r.features.clone()).unwrap_or_default(),
        }
    }
}

fn flatten(
    raw: &BTreeMap<ModelTier, TierSpec>,
    tier: ModelTier,
) -> Result<ResolvedTier, CoreError> {
    let mut resolved = ResolvedTier {
        data_points: BTreeSet::new(),
        features: BTreeSet::new(),
    };
    let mut seen = BTreeSet::new();
    let mut current = Some(tier);

    while let Some(t) = current {
        if !seen.insert(t) {
            return Err(CoreError::invalid_table(format!(
                "tier '{}' has a cyclic extends chain",
                tier
            )));
        }
        let spec = raw.get(&t).ok_or_else(|| {
            CoreError::invalid_table(format!("tier '{}' extends undefined tier '{}'", tier, t))
        })?;
        resolved.data_points.extend(spec.data_points.iter().copied());
        resolved.features.extend(spec.features.iter().cloned());
        current = spec.extends;
    }

    Ok(resolved)
}

/// Strips separators from a model identifier.
pub fn normalize_model(model_identifier: &str) -> String {
    model_identifier
        .chars()
        .filter(|c| !matches!(c, '.' | '-') && !c.is_whitespace())
        .collect()
}

/// What a connected device can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilityProfile {
    /// Identifier as reported by the device.
    pub model_identifier: String,
    pub tier: ModelTier,
    /// Matched product family; `None` when the basic fallback applied.
    pub family: Option<String>,
    pub data_points: BTreeSet<DataPointId>,
    pub features: BTreeSet<String>,
}

impl DeviceCapabilityProfile {
    pub fn supports(&self, id: DataPointId) -> bool {
        self.data_points.contains(&id)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// Returns whether no family matched and the basic tier was assumed.
    pub fn is_fallback(&self) -> bool {
        self.family.is_none()
    }
}
