use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    ChargebackError, ChargebackResult,
    aggregation::{Granularity, ReportWindow, WindowBounds, WindowSpec, parse_timezone},
    db::repos::ScopeFilter,
    grouping::GroupBy,
    models::{EntityKind, TagFilter},
    pricing::RateMode,
};

/// Caller-supplied options of one report run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReportOptions {
    #[serde(default)]
    pub interval: Granularity,

    /// Explicit window start; takes precedence over the offset form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,

    /// Explicit window end; defaults to the run time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,

    /// Periods between the current one and the last reported one
    #[serde(default)]
    pub end_interval_offset: u32,

    /// Number of reported periods
    #[serde(default = "default_interval_size")]
    #[validate(range(min = 1))]
    pub interval_size: u32,

    #[serde(default)]
    pub entity_kind: EntityKind,

    /// Restrict the report to one entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,

    /// Tag filter; an entity must carry at least one of these tags
    #[serde(default, deserialize_with = "null_as_default")]
    pub tag: Vec<String>,

    /// Tag categories to group by
    #[serde(default, deserialize_with = "null_as_default")]
    pub groupby_tag: Vec<String>,

    /// Label keys to group by
    #[serde(default, deserialize_with = "null_as_default")]
    pub groupby_label: Vec<String>,

    #[serde(default)]
    pub ext_options: ExtOptions,

    #[serde(default)]
    pub cumulative_rate_calculation: bool,

    /// Report run time; defaults to now
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtOptions {
    /// IANA timezone for interval boundaries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
}

fn default_interval_size() -> u32 {
    1
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            interval: Granularity::default(),
            start: None,
            end: None,
            end_interval_offset: 0,
            interval_size: default_interval_size(),
            entity_kind: EntityKind::default(),
            entity_id: None,
            tag: Vec::new(),
            groupby_tag: Vec::new(),
            groupby_label: Vec::new(),
            ext_options: ExtOptions::default(),
            cumulative_rate_calculation: false,
            run_at: None,
        }
    }
}

/// Validated, resolved form of [`ReportOptions`].
#[derive(Debug, Clone)]
pub struct ReportPlan {
    pub window: ReportWindow,
    pub scope: ScopeFilter,
    pub tag_filter: Option<TagFilter>,
    pub group_by: GroupBy,
    pub mode: RateMode,
}

impl ReportOptions {
    /// Validate the options and compute the report window.
    ///
    /// `default_timezone` applies when `ext_options.tz` is unset; `now` is
    /// used when `run_at` is unset.
    pub fn plan(&self, default_timezone: &str, now: DateTime<Utc>) -> ChargebackResult<ReportPlan> {
        self.validate()
            .map_err(|e| ChargebackError::InvalidIntervalConfiguration(e.to_string()))?;

        if !self.groupby_tag.is_empty() && !self.groupby_label.is_empty() {
            return Err(ChargebackError::InvalidOptions(
                "groupby_tag and groupby_label are mutually exclusive".into(),
            ));
        }
        if self.start.is_none() && self.end.is_some() {
            return Err(ChargebackError::InvalidIntervalConfiguration(
                "end requires start".into(),
            ));
        }

        let tz = parse_timezone(self.ext_options.tz.as_deref().unwrap_or(default_timezone))?;
        let bounds = match self.start {
            Some(start) => WindowBounds::Explicit {
                start,
                end: self.end,
            },
            None => WindowBounds::Offset {
                end_interval_offset: self.end_interval_offset,
                interval_size: self.interval_size,
            },
        };
        let window = ReportWindow::build(&WindowSpec {
            granularity: self.interval,
            tz,
            bounds,
            now: self.run_at.unwrap_or(now),
        })?;

        let group_by = if !self.groupby_tag.is_empty() {
            GroupBy::Tags(self.groupby_tag.clone())
        } else if !self.groupby_label.is_empty() {
            GroupBy::Labels(self.groupby_label.clone())
        } else {
            GroupBy::Entity
        };

        Ok(ReportPlan {
            window,
            scope: ScopeFilter {
                kind: self.entity_kind,
                entity_id: self.entity_id,
            },
            tag_filter: TagFilter::parse(&self.tag)?,
            group_by,
            mode: RateMode::from_cumulative_flag(self.cumulative_rate_calculation),
        })
    }
}
