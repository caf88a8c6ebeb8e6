//! Tiered rate evaluation.
//!
//! Costs are stored in microdollars (1/1,000,000 of a dollar). Intermediate
//! arithmetic uses [`Decimal`] so tier rates such as `0.01` stay exact; each
//! (entity, field, sub-interval) cost is rounded once, and anything that
//! would overflow saturates to `i64::MAX`.

use std::collections::BTreeMap;

use rust_decimal::{
    Decimal, RoundingStrategy,
    prelude::{FromPrimitive, ToPrimitive},
};
use serde::{Deserialize, Serialize};

use crate::{
    aggregation::{Interval, IntervalMetrics},
    catalog::{ChargebackRate, RateDetail, RateTier},
    fields::{FieldDescriptor, FieldId, FieldRegistry},
};

const MICRODOLLARS_PER_DOLLAR: i64 = 1_000_000;
const SECONDS_PER_HOUR: i64 = 3_600;

/// How a value is priced against a tier set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateMode {
    /// The whole value is priced by the one tier containing it
    #[default]
    Single,
    /// Each tier prices the slice of the value that falls inside it
    Cumulative,
}

impl RateMode {
    pub fn from_cumulative_flag(cumulative: bool) -> Self {
        if cumulative {
            Self::Cumulative
        } else {
            Self::Single
        }
    }
}

/// Metric and cost of one field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldCharge {
    pub metric: f64,
    /// Microdollars
    pub cost: i64,
}

impl FieldCharge {
    pub fn new(metric: f64, cost: i64) -> Self {
        Self { metric, cost }
    }

    /// Combine two charges of the same field.
    pub fn merge(self, other: Self, field: &FieldDescriptor) -> Self {
        Self {
            metric: field.merge_metric(self.metric, other.metric),
            cost: self.cost.saturating_add(other.cost),
        }
    }

    pub fn cost_dollars(&self) -> f64 {
        microdollars_to_dollars(self.cost)
    }
}

/// Price `metric` (in the field's unit) for one sub-interval.
///
/// The rate is quoted per `detail.per_time`; the result is prorated to the
/// interval's actual length. Fixed and usage fields with no metric cost
/// nothing, tier fixed rates included.
pub fn charge(
    detail: &RateDetail,
    field: &FieldDescriptor,
    metric: f64,
    interval: &Interval,
    mode: RateMode,
) -> i64 {
    if (field.is_fixed() || field.is_usage()) && metric <= 0.0 {
        return 0;
    }

    let rate_unit = detail.rate_unit(field);
    let value = field.unit.convert(metric, rate_unit).unwrap_or(metric).max(0.0);

    let Some(amount) = Decimal::from_f64(value) else {
        tracing::warn!(field = %field.id, metric, "Metric out of decimal range, saturating cost");
        return i64::MAX;
    };

    let per_period = match mode {
        RateMode::Single => match detail.find_tier(value) {
            Some(tier) => single_tier_cost(tier, amount),
            None => return 0,
        },
        RateMode::Cumulative => cumulative_cost(&detail.tiers, amount),
    };
    let Some(per_period) = per_period else {
        return i64::MAX;
    };

    let period_hours = Decimal::from(detail.per_time.hours_in_period(interval.local_date));
    let interval_hours =
        Decimal::from(interval.duration().num_seconds()) / Decimal::from(SECONDS_PER_HOUR);

    per_period
        .checked_mul(interval_hours)
        .and_then(|d| d.checked_div(period_hours))
        .map(dollars_to_microdollars)
        .unwrap_or(i64::MAX)
}

/// Price every field of every aggregated interval of one entity.
///
/// Fields the rate does not price keep their metric at zero cost.
pub fn price_intervals(
    rate: &ChargebackRate,
    fields: &FieldRegistry,
    aggregated: &[IntervalMetrics],
    intervals: &[Interval],
    mode: RateMode,
) -> BTreeMap<usize, BTreeMap<FieldId, FieldCharge>> {
    aggregated
        .iter()
        .filter_map(|metrics| {
            // Intervals are numbered from 1 without gaps
            let interval = intervals
                .get(metrics.index.checked_sub(1)?)
                .filter(|i| i.index == metrics.index)?;
            let charges = fields
                .iter()
                .map(|field| {
                    let metric = metrics.metric(field.id.as_str());
                    let cost = rate
                        .detail(field.id.as_str())
                        .map_or(0, |detail| charge(detail, field, metric, interval, mode));
                    (field.id.clone(), FieldCharge::new(metric, cost))
                })
                .collect();
            Some((metrics.index, charges))
        })
        .collect()
}

fn single_tier_cost(tier: &RateTier, value: Decimal) -> Option<Decimal> {
    tier.variable_rate
        .checked_mul(value)
        .and_then(|v| v.checked_add(tier.fixed_rate))
}

fn cumulative_cost(tiers: &[RateTier], value: Decimal) -> Option<Decimal> {
    let mut total = Decimal::ZERO;
    for tier in tiers {
        let start = Decimal::from_f64(tier.start)?;
        if value < start {
            break;
        }
        let upper = match tier.finish.and_then(Decimal::from_f64) {
            Some(finish) => value.min(finish),
            None => value,
        };
        let slice = tier.variable_rate.checked_mul(upper - start)?;
        total = total.checked_add(tier.fixed_rate)?.checked_add(slice)?;
    }
    Some(total)
}

/// Round a dollar amount to whole microdollars, saturating on overflow.
pub fn dollars_to_microdollars(dollars: Decimal) -> i64 {
    dollars
        .checked_mul(Decimal::from(MICRODOLLARS_PER_DOLLAR))
        .map(|d| d.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_i128())
        .map(saturate_to_i64)
        .unwrap_or(i64::MAX)
}

pub fn microdollars_to_dollars(microdollars: i64) -> f64 {
    microdollars as f64 / MICRODOLLARS_PER_DOLLAR as f64
}

/// Saturate an i128 value to fit in an i64
fn saturate_to_i64(value: i128) -> i64 {
    if value > i64::MAX as i128 {
        i64::MAX
    } else if value < i64::MIN as i128 {
        i64::MIN
    } else {
        value as i64
    }
}
