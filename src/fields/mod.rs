//! Chargeable field registry.
//!
//! A chargeable field is one priced metric dimension of an entity (fixed
//! compute, allocated CPU cores, used memory, ...). Fields are described by
//! data, not code: the aggregator and the rate calculator consult a
//! [`FieldDescriptor`] to know how to derive and price each one, so new
//! fields can be declared in configuration.

use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

use crate::{ChargebackError, ChargebackResult};

pub const FIXED_COMPUTE_1: &str = "fixed_compute_1";
pub const FIXED_COMPUTE_2: &str = "fixed_compute_2";
pub const CPU_CORES_ALLOCATED: &str = "cpu_cores_allocated";
pub const MEMORY_ALLOCATED: &str = "memory_allocated";
pub const CPU_CORES_USED: &str = "cpu_cores_used";
pub const MEMORY_USED: &str = "memory_used";
pub const NET_IO_USED: &str = "net_io_used";

/// Identifier of a chargeable field, e.g. `cpu_cores_allocated`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(String);

impl FieldId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Borrow<str> for FieldId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Measurement units. Byte multiples are binary (1 KB = 1024 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Count,
    Cores,
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitFamily {
    Count,
    Cores,
    Bytes,
}

impl Unit {
    fn family(self) -> UnitFamily {
        match self {
            Self::Count => UnitFamily::Count,
            Self::Cores => UnitFamily::Cores,
            Self::Bytes | Self::Kilobytes | Self::Megabytes | Self::Gigabytes | Self::Terabytes => {
                UnitFamily::Bytes
            }
        }
    }

    /// Size of one unit in the family's base unit.
    fn factor(self) -> f64 {
        match self {
            Self::Count | Self::Cores | Self::Bytes => 1.0,
            Self::Kilobytes => 1024.0,
            Self::Megabytes => 1024.0 * 1024.0,
            Self::Gigabytes => 1024.0 * 1024.0 * 1024.0,
            Self::Terabytes => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        }
    }

    pub fn is_compatible_with(self, other: Unit) -> bool {
        self.family() == other.family()
    }

    /// Convert `value` expressed in `self` into `to`.
    ///
    /// Returns `None` across unit families (e.g. bytes to cores).
    pub fn convert(self, value: f64, to: Unit) -> Option<f64> {
        if !self.is_compatible_with(to) {
            return None;
        }
        if self == to {
            return Some(value);
        }
        Some(value * self.factor() / to.factor())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Cores => "cores",
            Self::Bytes => "bytes",
            Self::Kilobytes => "kilobytes",
            Self::Megabytes => "megabytes",
            Self::Gigabytes => "gigabytes",
            Self::Terabytes => "terabytes",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How samples within one sub-interval are reduced to a single value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    Sum,
    #[default]
    Average,
    Max,
}

impl Reduction {
    pub fn reduce(self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Self::Sum => values.iter().sum(),
            Self::Average => values.iter().sum::<f64>() / values.len() as f64,
            Self::Max => values.iter().copied().fold(f64::MIN, f64::max),
        }
    }
}

/// How a field's metric is derived for a sub-interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// One billable unit per sub-interval in which the entity is present
    Fixed,
    /// Current-state allocation attribute of the entity, held constant
    Allocation {
        attribute: String,
        /// Unit of the attribute value; defaults to the field unit
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attribute_unit: Option<Unit>,
    },
    /// Reduction of the samples' `metric` values within the sub-interval
    Usage {
        metric: String,
        #[serde(default)]
        reduce: Reduction,
        /// Unit of the sample values; defaults to the field unit
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_unit: Option<Unit>,
    },
}

/// Descriptor of one chargeable field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDescriptor {
    pub id: FieldId,
    #[serde(default)]
    pub description: String,
    /// Unit the metric is reported in
    pub unit: Unit,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub fn fixed(id: &str, description: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            unit: Unit::Count,
            kind: FieldKind::Fixed,
        }
    }

    pub fn allocation(id: &str, description: &str, unit: Unit, attribute: &str, from: Unit) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            unit,
            kind: FieldKind::Allocation {
                attribute: attribute.into(),
                attribute_unit: Some(from),
            },
        }
    }

    pub fn usage(
        id: &str,
        description: &str,
        unit: Unit,
        metric: &str,
        reduce: Reduction,
        from: Unit,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            unit,
            kind: FieldKind::Usage {
                metric: metric.into(),
                reduce,
                sample_unit: Some(from),
            },
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self.kind, FieldKind::Fixed)
    }

    pub fn is_usage(&self) -> bool {
        matches!(self.kind, FieldKind::Usage { .. })
    }

    /// Combine two metric values of this field belonging to one group.
    ///
    /// Fixed metrics count billed sub-intervals, so a group present in a
    /// sub-interval counts once however many members it has.
    pub fn merge_metric(&self, a: f64, b: f64) -> f64 {
        if self.is_fixed() { a.max(b) } else { a + b }
    }

    fn validate(&self) -> ChargebackResult<()> {
        let source_unit = match &self.kind {
            FieldKind::Fixed => None,
            FieldKind::Allocation { attribute_unit, .. } => *attribute_unit,
            FieldKind::Usage { sample_unit, .. } => *sample_unit,
        };
        if let Some(unit) = source_unit
            && !unit.is_compatible_with(self.unit)
        {
            return Err(ChargebackError::InvalidOptions(format!(
                "field '{}' converts {unit} into incompatible unit {}",
                self.id, self.unit
            )));
        }
        Ok(())
    }
}

/// Ordered, immutable-after-startup set of chargeable fields.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: Vec<FieldDescriptor>,
}

impl FieldRegistry {
    /// Registry holding the built-in container fields.
    pub fn seeded() -> Self {
        Self {
            fields: vec![
                FieldDescriptor::fixed(FIXED_COMPUTE_1, "Fixed Compute Cost 1"),
                FieldDescriptor::fixed(FIXED_COMPUTE_2, "Fixed Compute Cost 2"),
                FieldDescriptor::allocation(
                    CPU_CORES_ALLOCATED,
                    "Allocated CPU Cores",
                    Unit::Cores,
                    "limit_cpu_cores",
                    Unit::Cores,
                ),
                FieldDescriptor::allocation(
                    MEMORY_ALLOCATED,
                    "Allocated Memory",
                    Unit::Megabytes,
                    "limit_memory_bytes",
                    Unit::Bytes,
                ),
                FieldDescriptor::usage(
                    CPU_CORES_USED,
                    "Used CPU Cores",
                    Unit::Cores,
                    "cpu_usage_cores",
                    Reduction::Average,
                    Unit::Cores,
                ),
                FieldDescriptor::usage(
                    MEMORY_USED,
                    "Used Memory",
                    Unit::Megabytes,
                    "memory_usage_bytes",
                    Reduction::Average,
                    Unit::Bytes,
                ),
                FieldDescriptor::usage(
                    NET_IO_USED,
                    "Used Network I/O",
                    Unit::Kilobytes,
                    "net_usage_kbps",
                    Reduction::Average,
                    Unit::Kilobytes,
                ),
            ],
        }
    }

    /// Add a field. Ids must be unique.
    pub fn register(&mut self, field: FieldDescriptor) -> ChargebackResult<()> {
        if self.contains(field.id.as_str()) {
            return Err(ChargebackError::DuplicateField(field.id.to_string()));
        }
        field.validate()?;
        self.fields.push(field);
        Ok(())
    }

    /// Seeded registry extended with `extra` fields.
    pub fn with_fields(extra: impl IntoIterator<Item = FieldDescriptor>) -> ChargebackResult<Self> {
        let mut registry = Self::seeded();
        for field in extra {
            registry.register(field)?;
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id.as_str() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_registry_order() {
        let registry = FieldRegistry::seeded();
        let ids: Vec<&str> = registry.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids[0], FIXED_COMPUTE_1);
        assert!(registry.contains(MEMORY_ALLOCATED));
        assert!(registry.get(FIXED_COMPUTE_1).unwrap().is_fixed());
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(
            Unit::Bytes.convert(1024.0 * 1024.0, Unit::Megabytes),
            Some(1.0)
        );
        assert_eq!(Unit::Gigabytes.convert(1.0, Unit::Megabytes), Some(1024.0));
        assert_eq!(Unit::Cores.convert(2.0, Unit::Cores), Some(2.0));
        assert_eq!(Unit::Bytes.convert(1.0, Unit::Cores), None);
    }

    #[test]
    fn test_reduction() {
        let values = [1.0, 2.0, 6.0];
        assert_eq!(Reduction::Sum.reduce(&values), 9.0);
        assert_eq!(Reduction::Average.reduce(&values), 3.0);
        assert_eq!(Reduction::Max.reduce(&values), 6.0);
        assert_eq!(Reduction::Average.reduce(&[]), 0.0);
    }

    #[test]
    fn test_merge_metric_rules() {
        let registry = FieldRegistry::seeded();
        let fixed = registry.get(FIXED_COMPUTE_1).unwrap();
        let cpu = registry.get(CPU_CORES_ALLOCATED).unwrap();
        assert_eq!(fixed.merge_metric(1.0, 1.0), 1.0);
        assert_eq!(cpu.merge_metric(1.0, 2.0), 3.0);
    }

    #[test]
    fn test_register_custom_field() {
        let storage: FieldDescriptor = toml::from_str(
            r#"
            id = "storage_allocated"
            unit = "gigabytes"
            kind = { type = "allocation", attribute = "storage_bytes", attribute_unit = "bytes" }
        "#,
        )
        .unwrap();
        let registry = FieldRegistry::with_fields([storage]).unwrap();
        assert_eq!(registry.len(), FieldRegistry::seeded().len() + 1);
        assert!(registry.contains("storage_allocated"));
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let err = FieldRegistry::with_fields([FieldDescriptor::fixed(FIXED_COMPUTE_1, "again")])
            .unwrap_err();
        assert!(matches!(err, ChargebackError::DuplicateField(id) if id == FIXED_COMPUTE_1));
    }

    #[test]
    fn test_register_incompatible_units_rejected() {
        let bad = FieldDescriptor::allocation("odd", "", Unit::Cores, "limit_memory_bytes", Unit::Bytes);
        assert!(FieldRegistry::with_fields([bad]).is_err());
    }
}
