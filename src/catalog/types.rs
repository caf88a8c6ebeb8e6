use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    ChargebackError, ChargebackResult,
    fields::{FieldDescriptor, FieldId, FieldRegistry, Unit},
};

/// One pricing band `[start, finish)` of a rate detail.
///
/// `fixed_rate` is charged once per `per_time` period while the value falls
/// in the band; `variable_rate` is charged per unit of value per period.
/// Rates are in dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateTier {
    #[serde(default)]
    pub start: f64,
    /// Exclusive upper bound; `None` is unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<f64>,
    #[serde(default)]
    pub fixed_rate: Decimal,
    #[serde(default)]
    pub variable_rate: Decimal,
}

impl RateTier {
    /// A single unbounded tier.
    pub fn flat(fixed_rate: Decimal, variable_rate: Decimal) -> Self {
        Self {
            start: 0.0,
            finish: None,
            fixed_rate,
            variable_rate,
        }
    }

    pub fn bounded(start: f64, finish: Option<f64>, fixed_rate: Decimal, variable_rate: Decimal) -> Self {
        Self {
            start,
            finish,
            fixed_rate,
            variable_rate,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.start && self.finish.is_none_or(|f| value < f)
    }
}

/// The period a rate is quoted for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerTime {
    #[default]
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl PerTime {
    /// Hours in the period containing `date`; months and years are calendar based.
    pub fn hours_in_period(self, date: NaiveDate) -> u32 {
        match self {
            Self::Hourly => 1,
            Self::Daily => 24,
            Self::Weekly => 24 * 7,
            Self::Monthly => days_in_month(date) * 24,
            Self::Yearly => {
                if date.leap_year() {
                    366 * 24
                } else {
                    365 * 24
                }
            }
        }
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = (date.year(), date.month());
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(first), Some(next)) => (next - first).num_days() as u32,
        _ => 30,
    }
}

/// Pricing of one chargeable field within a rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateDetail {
    pub field: FieldId,
    #[serde(default)]
    pub per_time: PerTime,
    /// Unit the tier bounds and variable rate are quoted in; defaults to the field unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_unit: Option<Unit>,
    pub tiers: Vec<RateTier>,
}

impl RateDetail {
    pub fn new(field: &str, tiers: Vec<RateTier>) -> Self {
        Self {
            field: field.into(),
            per_time: PerTime::Hourly,
            per_unit: None,
            tiers,
        }
    }

    pub fn per_time(mut self, per_time: PerTime) -> Self {
        self.per_time = per_time;
        self
    }

    pub fn per_unit(mut self, unit: Unit) -> Self {
        self.per_unit = Some(unit);
        self
    }

    /// The unit values are converted into before tier lookup.
    pub fn rate_unit(&self, field: &FieldDescriptor) -> Unit {
        self.per_unit.unwrap_or(field.unit)
    }

    /// The tier whose `[start, finish)` range holds `value`.
    pub fn find_tier(&self, value: f64) -> Option<&RateTier> {
        self.tiers.iter().find(|t| t.contains(value))
    }

    /// Reject tier sets with gaps, overlaps or a range not covering `[0, inf)`.
    pub fn validate(&self, rate: &str, fields: &FieldRegistry) -> ChargebackResult<()> {
        let malformed = |reason: String| ChargebackError::MalformedTierSet {
            rate: rate.to_string(),
            field: self.field.to_string(),
            reason,
        };

        let field = fields
            .get(self.field.as_str())
            .ok_or_else(|| ChargebackError::UnknownField(self.field.to_string()))?;
        if let Some(unit) = self.per_unit
            && !unit.is_compatible_with(field.unit)
        {
            return Err(malformed(format!(
                "per_unit {unit} is incompatible with field unit {}",
                field.unit
            )));
        }

        let Some(first) = self.tiers.first() else {
            return Err(malformed("no tiers defined".into()));
        };
        if first.start != 0.0 {
            return Err(malformed(format!(
                "first tier starts at {} instead of 0",
                first.start
            )));
        }

        for (i, tier) in self.tiers.iter().enumerate() {
            if !tier.start.is_finite() || tier.start < 0.0 {
                return Err(malformed(format!("tier {i} has invalid start {}", tier.start)));
            }
            if let Some(finish) = tier.finish
                && (!finish.is_finite() || finish <= tier.start)
            {
                return Err(malformed(format!(
                    "tier {i} has empty range [{}, {finish})",
                    tier.start
                )));
            }
            if tier.fixed_rate < Decimal::ZERO || tier.variable_rate < Decimal::ZERO {
                return Err(malformed(format!("tier {i} has a negative rate")));
            }

            match (tier.finish, self.tiers.get(i + 1)) {
                (None, Some(_)) => {
                    return Err(malformed(format!(
                        "unbounded tier {i} is followed by another tier"
                    )));
                }
                (Some(finish), None) => {
                    return Err(malformed(format!(
                        "last tier ends at {finish}; it must be unbounded"
                    )));
                }
                (Some(finish), Some(next)) if finish < next.start => {
                    return Err(malformed(format!(
                        "gap between {finish} and {}",
                        next.start
                    )));
                }
                (Some(finish), Some(next)) if finish > next.start => {
                    return Err(malformed(format!(
                        "tiers overlap between {} and {finish}",
                        next.start
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Rate definition as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: Vec<RateDetail>,
}

/// A validated, immutable chargeback rate.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargebackRate {
    name: String,
    description: String,
    details: BTreeMap<FieldId, RateDetail>,
}

impl ChargebackRate {
    /// Validate every detail of `config` against the field registry.
    pub fn from_config(config: RateConfig, fields: &FieldRegistry) -> ChargebackResult<Self> {
        let mut details = BTreeMap::new();
        for detail in config.details {
            detail.validate(&config.name, fields)?;
            if details.contains_key(&detail.field) {
                return Err(ChargebackError::MalformedTierSet {
                    rate: config.name.clone(),
                    field: detail.field.to_string(),
                    reason: "field is priced twice".into(),
                });
            }
            details.insert(detail.field.clone(), detail);
        }

        Ok(Self {
            name: config.name,
            description: config.description,
            details,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn detail(&self, field: &str) -> Option<&RateDetail> {
        self.details.get(field)
    }

    pub fn details(&self) -> impl Iterator<Item = &RateDetail> {
        self.details.values()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::dec;

    use super::*;
    use crate::fields::{CPU_CORES_ALLOCATED, FIXED_COMPUTE_1, MEMORY_ALLOCATED};

    fn tiers(bounds: &[(f64, Option<f64>)]) -> Vec<RateTier> {
        bounds
            .iter()
            .map(|&(s, f)| RateTier::bounded(s, f, dec!(0), dec!(1)))
            .collect()
    }

    fn validate(tiers: Vec<RateTier>) -> ChargebackResult<()> {
        RateDetail::new(CPU_CORES_ALLOCATED, tiers).validate("test", &FieldRegistry::seeded())
    }

    #[test]
    fn test_valid_tier_set() {
        assert!(validate(tiers(&[(0.0, Some(1.0)), (1.0, Some(4.0)), (4.0, None)])).is_ok());
        assert!(validate(vec![RateTier::flat(dec!(0), dec!(0.01))]).is_ok());
    }

    #[test]
    fn test_gap_rejected() {
        let err = validate(tiers(&[(0.0, Some(1.0)), (2.0, None)])).unwrap_err();
        assert!(err.to_string().contains("gap"), "{err}");
    }

    #[test]
    fn test_overlap_rejected() {
        let err = validate(tiers(&[(0.0, Some(2.0)), (1.0, None)])).unwrap_err();
        assert!(err.to_string().contains("overlap"), "{err}");
    }

    #[test]
    fn test_bounded_last_tier_rejected() {
        let err = validate(tiers(&[(0.0, Some(10.0))])).unwrap_err();
        assert!(err.to_string().contains("unbounded"), "{err}");
    }

    #[test]
    fn test_nonzero_start_rejected() {
        assert!(validate(tiers(&[(1.0, None)])).is_err());
    }

    #[test]
    fn test_empty_tiers_rejected() {
        assert!(validate(vec![]).is_err());
    }

    #[test]
    fn test_negative_rate_rejected() {
        assert!(validate(vec![RateTier::flat(dec!(-1), dec!(0))]).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let detail = RateDetail::new("gpu_hours", vec![RateTier::flat(dec!(0), dec!(1))]);
        let err = detail.validate("test", &FieldRegistry::seeded()).unwrap_err();
        assert!(matches!(err, ChargebackError::UnknownField(_)));
    }

    #[test]
    fn test_incompatible_per_unit_rejected() {
        let detail = RateDetail::new(MEMORY_ALLOCATED, vec![RateTier::flat(dec!(0), dec!(1))])
            .per_unit(Unit::Cores);
        assert!(detail.validate("test", &FieldRegistry::seeded()).is_err());
    }

    #[test]
    fn test_find_tier_closed_open() {
        let detail = RateDetail::new(
            CPU_CORES_ALLOCATED,
            tiers(&[(0.0, Some(1.0)), (1.0, Some(4.0)), (4.0, None)]),
        );
        assert_eq!(detail.find_tier(0.0).unwrap().start, 0.0);
        assert_eq!(detail.find_tier(0.999).unwrap().start, 0.0);
        assert_eq!(detail.find_tier(1.0).unwrap().start, 1.0);
        assert_eq!(detail.find_tier(4.0).unwrap().start, 4.0);
        assert_eq!(detail.find_tier(1e12).unwrap().start, 4.0);
        assert!(detail.find_tier(-1.0).is_none());
    }

    #[test]
    fn test_hours_in_period() {
        let sept = NaiveDate::from_ymd_opt(2012, 9, 15).unwrap();
        let aug = NaiveDate::from_ymd_opt(2012, 8, 1).unwrap();
        let feb = NaiveDate::from_ymd_opt(2012, 2, 10).unwrap();
        assert_eq!(PerTime::Monthly.hours_in_period(sept), 720);
        assert_eq!(PerTime::Monthly.hours_in_period(aug), 744);
        assert_eq!(PerTime::Monthly.hours_in_period(feb), 29 * 24);
        assert_eq!(PerTime::Yearly.hours_in_period(feb), 366 * 24);
        assert_eq!(PerTime::Daily.hours_in_period(feb), 24);
    }

    #[test]
    fn test_rate_from_toml() {
        let config: RateConfig = toml::from_str(
            r#"
            name = "default"

            [[details]]
            field = "fixed_compute_1"
            tiers = [{ variable_rate = "0.01" }]

            [[details]]
            field = "memory_allocated"
            per_time = "monthly"
            per_unit = "gigabytes"
            tiers = [
                { finish = 4.0, fixed_rate = "1", variable_rate = "2.5" },
                { start = 4.0, variable_rate = "2" },
            ]
        "#,
        )
        .unwrap();

        let rate = ChargebackRate::from_config(config, &FieldRegistry::seeded()).unwrap();
        assert_eq!(rate.name(), "default");
        let fixed = rate.detail(FIXED_COMPUTE_1).unwrap();
        assert_eq!(fixed.tiers[0].variable_rate, dec!(0.01));
        assert_eq!(fixed.per_time, PerTime::Hourly);
        let memory = rate.detail(MEMORY_ALLOCATED).unwrap();
        assert_eq!(memory.per_unit, Some(Unit::Gigabytes));
        assert_eq!(memory.tiers.len(), 2);
        assert!(rate.detail(CPU_CORES_ALLOCATED).is_none());
    }

    #[test]
    fn test_field_priced_twice_rejected() {
        let config = RateConfig {
            name: "dup".into(),
            description: String::new(),
            details: vec![
                RateDetail::new(FIXED_COMPUTE_1, vec![RateTier::flat(dec!(0), dec!(1))]),
                RateDetail::new(FIXED_COMPUTE_1, vec![RateTier::flat(dec!(0), dec!(2))]),
            ],
        };
        assert!(ChargebackRate::from_config(config, &FieldRegistry::seeded()).is_err());
    }
}
