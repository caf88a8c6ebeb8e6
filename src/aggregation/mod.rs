//! Interval aggregation.
//!
//! Reduces an entity's rollup samples into one metric per chargeable field
//! for each sub-interval of the report window. How each metric is derived
//! comes from the field's [`FieldKind`].

mod intervals;

use std::{borrow::Cow, collections::BTreeMap};

pub use intervals::{
    Granularity, Interval, ReportWindow, WindowBounds, WindowSpec, parse_timezone,
};

use crate::{
    fields::{FieldDescriptor, FieldId, FieldKind, FieldRegistry},
    models::{AllocationMethod, Entity, MetricRollupSample, TagFilter},
};

/// Per-run inputs shared by every entity's aggregation.
#[derive(Debug, Clone, Copy)]
pub struct AggregationContext<'a> {
    pub fields: &'a FieldRegistry,
    pub tag_filter: Option<&'a TagFilter>,
    pub allocation_method: AllocationMethod,
}

/// Metrics of one entity for one sub-interval, keyed by field.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalMetrics {
    /// Index of the [`Interval`] within the window
    pub index: usize,
    pub metrics: BTreeMap<FieldId, f64>,
}

impl IntervalMetrics {
    pub fn metric(&self, field: &str) -> f64 {
        self.metrics.get(field).copied().unwrap_or(0.0)
    }
}

/// Aggregate `samples` over `intervals`.
///
/// Intervals ending at or before the entity's creation are skipped. Samples
/// are expected in ascending timestamp order; an unsorted slice is sorted on
/// a private copy.
pub fn aggregate(
    entity: &Entity,
    samples: &[MetricRollupSample],
    intervals: &[Interval],
    ctx: &AggregationContext<'_>,
) -> Vec<IntervalMetrics> {
    let samples: Cow<'_, [MetricRollupSample]> =
        if samples.is_sorted_by_key(|s| s.timestamp) {
            Cow::Borrowed(samples)
        } else {
            let mut owned = samples.to_vec();
            owned.sort_by_key(|s| s.timestamp);
            Cow::Owned(owned)
        };

    intervals
        .iter()
        .filter(|interval| entity.created_on < interval.end)
        .map(|interval| {
            let lo = samples.partition_point(|s| s.timestamp < interval.start);
            let hi = samples.partition_point(|s| s.timestamp < interval.end);
            let in_interval = &samples[lo..hi];

            let metrics = ctx
                .fields
                .iter()
                .map(|field| {
                    let raw = field_metric(entity, field, in_interval, ctx);
                    (field.id.clone(), clamp_non_negative(entity, field, raw))
                })
                .collect();

            IntervalMetrics {
                index: interval.index,
                metrics,
            }
        })
        .collect()
}

fn field_metric(
    entity: &Entity,
    field: &FieldDescriptor,
    samples: &[MetricRollupSample],
    ctx: &AggregationContext<'_>,
) -> f64 {
    match &field.kind {
        FieldKind::Fixed => {
            let present = match ctx.tag_filter {
                None => true,
                Some(filter) => samples.iter().any(|s| s.counts_for(filter)),
            };
            if present { 1.0 } else { 0.0 }
        }
        FieldKind::Allocation {
            attribute,
            attribute_unit,
        } => {
            let value = entity.allocation(attribute, ctx.allocation_method);
            let from = attribute_unit.unwrap_or(field.unit);
            from.convert(value, field.unit).unwrap_or(value)
        }
        FieldKind::Usage {
            metric,
            reduce,
            sample_unit,
        } => {
            let values: Vec<f64> = samples.iter().filter_map(|s| s.value(metric)).collect();
            let value = reduce.reduce(&values);
            let from = sample_unit.unwrap_or(field.unit);
            from.convert(value, field.unit).unwrap_or(value)
        }
    }
}

fn clamp_non_negative(entity: &Entity, field: &FieldDescriptor, value: f64) -> f64 {
    if value >= 0.0 {
        return value;
    }
    tracing::warn!(
        entity_id = %entity.id,
        field = %field.id,
        value,
        "Negative metric clamped to zero"
    );
    0.0
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use chrono_tz::Tz;

    use super::*;
    use crate::{
        fields::{
            CPU_CORES_ALLOCATED, CPU_CORES_USED, FIXED_COMPUTE_1, MEMORY_ALLOCATED, MEMORY_USED,
        },
        models::{EntityKind, Tag},
    };

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn two_days() -> Vec<Interval> {
        ReportWindow::build(&WindowSpec {
            granularity: Granularity::Daily,
            tz: Tz::UTC,
            bounds: WindowBounds::Explicit {
                start: utc("2012-09-01T00:00:00Z"),
                end: Some(utc("2012-09-03T00:00:00Z")),
            },
            now: utc("2012-10-01T00:00:00Z"),
        })
        .unwrap()
        .intervals
    }

    fn image() -> Entity {
        Entity::new(EntityKind::ContainerImage, "image", utc("2012-08-01T00:00:00Z")).with_child(
            Entity::new(EntityKind::Container, "c1", utc("2012-08-01T00:00:00Z"))
                .with_allocation("limit_cpu_cores", 1.0)
                .with_allocation("limit_memory_bytes", 1024.0 * 1024.0),
        )
    }

    fn samples_every(hours: i64, from: &str, count: usize) -> Vec<MetricRollupSample> {
        let start = utc(from);
        (0..count)
            .map(|i| {
                MetricRollupSample::new(start + Duration::hours(hours * i as i64))
                    .with_value("cpu_usage_cores", 0.5 + i as f64)
                    .with_value("memory_usage_bytes", 2.0 * 1024.0 * 1024.0)
            })
            .collect()
    }

    fn ctx<'a>(fields: &'a FieldRegistry, filter: Option<&'a TagFilter>) -> AggregationContext<'a> {
        AggregationContext {
            fields,
            tag_filter: filter,
            allocation_method: AllocationMethod::Sum,
        }
    }

    #[test]
    fn test_zero_samples() {
        let fields = FieldRegistry::seeded();
        let result = aggregate(&image(), &[], &two_days(), &ctx(&fields, None));
        assert_eq!(result.len(), 2);
        for interval in &result {
            assert_eq!(interval.metric(FIXED_COMPUTE_1), 1.0);
            assert_eq!(interval.metric(CPU_CORES_ALLOCATED), 1.0);
            assert_eq!(interval.metric(MEMORY_ALLOCATED), 1.0);
            assert_eq!(interval.metric(CPU_CORES_USED), 0.0);
            assert_eq!(interval.metric(MEMORY_USED), 0.0);
        }
    }

    #[test]
    fn test_usage_reduced_per_interval() {
        let fields = FieldRegistry::seeded();
        // 00:00, 12:00 on day 1; 00:00, 12:00 on day 2
        let samples = samples_every(12, "2012-09-01T00:00:00Z", 4);
        let result = aggregate(&image(), &samples, &two_days(), &ctx(&fields, None));
        assert_eq!(result[0].metric(CPU_CORES_USED), 1.0);
        assert_eq!(result[1].metric(CPU_CORES_USED), 3.0);
        assert_eq!(result[0].metric(MEMORY_USED), 2.0);
    }

    #[test]
    fn test_unsorted_samples() {
        let fields = FieldRegistry::seeded();
        let mut samples = samples_every(12, "2012-09-01T00:00:00Z", 4);
        samples.reverse();
        let result = aggregate(&image(), &samples, &two_days(), &ctx(&fields, None));
        assert_eq!(result[1].metric(CPU_CORES_USED), 3.0);
    }

    #[test]
    fn test_entity_created_mid_window() {
        let fields = FieldRegistry::seeded();
        let mut entity = image();
        entity.created_on = utc("2012-09-02T06:00:00Z");
        let result = aggregate(&entity, &[], &two_days(), &ctx(&fields, None));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].index, 2);
    }

    #[test]
    fn test_fixed_presence_under_tag_filter() {
        let fields = FieldRegistry::seeded();
        let filter = TagFilter::new(vec![Tag::new("environment", "prod")]);
        let samples = vec![
            // Day 1: only a sample tagged with another environment
            MetricRollupSample::new(utc("2012-09-01T06:00:00Z"))
                .with_tags(Some(vec![Tag::new("environment", "dev")])),
            // Day 2: untagged sample counts
            MetricRollupSample::new(utc("2012-09-02T06:00:00Z")),
        ];
        let result = aggregate(&image(), &samples, &two_days(), &ctx(&fields, Some(&filter)));
        assert_eq!(result[0].metric(FIXED_COMPUTE_1), 0.0);
        assert_eq!(result[1].metric(FIXED_COMPUTE_1), 1.0);
    }

    #[test]
    fn test_negative_values_clamped() {
        let fields = FieldRegistry::seeded();
        let samples = vec![
            MetricRollupSample::new(utc("2012-09-01T06:00:00Z")).with_value("cpu_usage_cores", -4.0),
        ];
        let result = aggregate(&image(), &samples, &two_days(), &ctx(&fields, None));
        assert_eq!(result[0].metric(CPU_CORES_USED), 0.0);
    }

    #[test]
    fn test_allocation_method_average() {
        let fields = FieldRegistry::seeded();
        let entity = image().with_child(
            Entity::new(EntityKind::Container, "c2", utc("2012-08-01T00:00:00Z"))
                .with_allocation("limit_cpu_cores", 3.0),
        );
        let context = AggregationContext {
            allocation_method: AllocationMethod::Average,
            ..ctx(&fields, None)
        };
        let result = aggregate(&entity, &[], &two_days(), &context);
        assert_eq!(result[0].metric(CPU_CORES_ALLOCATED), 2.0);
    }
}
