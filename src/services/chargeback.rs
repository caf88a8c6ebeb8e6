use std::{sync::Arc, time::Instant};

use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::{
    ChargebackError, ChargebackResult,
    aggregation::{AggregationContext, aggregate},
    assignment::{resolve, validate_assignments},
    catalog::RateCatalog,
    config::{ChargebackConfig, ConfigError, EngineConfig},
    db::{DbError, DbPool},
    fields::FieldRegistry,
    grouping::{EntityResult, IntervalCharges, group},
    models::{Entity, EntitySnapshot, RateAssignment},
    pricing::price_intervals,
    report::{Report, ReportOptions, ReportPlan, ReportStats, assemble},
};

/// What happened to one entity of a report run.
enum EntityOutcome {
    Billed { result: EntityResult, had_samples: bool },
    Unrated,
    Filtered,
}

/// Per-run snapshot shared by every entity task.
struct RunContext<'a> {
    plan: &'a ReportPlan,
    assignments: &'a [RateAssignment],
}

/// Builds chargeback reports from the collaborator repositories.
///
/// Rates, assignments and fields are snapshots taken at construction; one
/// service can serve concurrent report runs.
#[derive(Clone)]
pub struct ChargebackService {
    db: Arc<DbPool>,
    catalog: Arc<RateCatalog>,
    fields: Arc<FieldRegistry>,
    config: EngineConfig,
}

impl ChargebackService {
    pub fn new(
        db: Arc<DbPool>,
        catalog: Arc<RateCatalog>,
        fields: Arc<FieldRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            catalog,
            fields,
            config,
        }
    }

    /// Service with the fields, rates and engine settings of `config`.
    pub fn from_config(db: Arc<DbPool>, config: &ChargebackConfig) -> Result<Self, ConfigError> {
        let (fields, catalog) = config.build_catalog()?;
        Ok(Self::new(
            db,
            Arc::new(catalog),
            Arc::new(fields),
            config.engine.clone(),
        ))
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    pub fn catalog(&self) -> &RateCatalog {
        &self.catalog
    }

    /// Run a report to completion.
    pub async fn build_report(&self, options: &ReportOptions) -> ChargebackResult<Report> {
        self.build_report_with_cancel(options, CancellationToken::new())
            .await
    }

    /// Run a report, aborting with [`ChargebackError::Cancelled`] once `cancel` fires.
    ///
    /// Any fatal error aborts the whole run; no partial report is returned.
    #[tracing::instrument(
        skip_all,
        fields(
            interval = %options.interval,
            entity_kind = %options.entity_kind,
            entity_id = ?options.entity_id,
        )
    )]
    pub async fn build_report_with_cancel(
        &self,
        options: &ReportOptions,
        cancel: CancellationToken,
    ) -> ChargebackResult<Report> {
        let started = Instant::now();
        let plan = options.plan(&self.config.default_timezone, Utc::now())?;

        let entities = self.db.entities().list_in_scope(&plan.scope).await?;
        let assignments = self.db.assignments().get_assignments(plan.scope.kind).await?;
        validate_assignments(&assignments, &self.catalog)?;

        let run = RunContext {
            plan: &plan,
            assignments: &assignments,
        };
        let entities_in_scope = entities.len();

        // `buffered` keeps listing order, so group sums are deterministic
        let outcomes: Vec<EntityOutcome> = stream::iter(entities)
            .map(|entity| self.process_with_limits(entity, &run, &cancel))
            .buffered(self.config.max_concurrency.max(1))
            .try_collect()
            .await?;

        let mut stats = ReportStats {
            entities_in_scope,
            ..Default::default()
        };
        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                EntityOutcome::Billed {
                    result,
                    had_samples,
                } => {
                    stats.entities_billed += 1;
                    if !had_samples {
                        stats.entities_without_samples += 1;
                    }
                    results.push(result);
                }
                EntityOutcome::Unrated => stats.entities_without_rate += 1,
                EntityOutcome::Filtered => stats.entities_filtered += 1,
            }
        }

        let groups = group(
            results,
            &plan.group_by,
            plan.tag_filter.as_ref(),
            &self.fields,
        );
        let rows = assemble(&groups, &plan.window.intervals, &self.fields);

        tracing::info!(
            entities = stats.entities_in_scope,
            billed = stats.entities_billed,
            unrated = stats.entities_without_rate,
            filtered = stats.entities_filtered,
            groups = groups.len(),
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chargeback report built"
        );

        Ok(Report {
            window: plan.window,
            rows,
            stats,
        })
    }

    async fn process_with_limits(
        &self,
        entity: Entity,
        run: &RunContext<'_>,
        cancel: &CancellationToken,
    ) -> ChargebackResult<EntityOutcome> {
        if cancel.is_cancelled() {
            return Err(ChargebackError::Cancelled);
        }

        let entity_id = entity.id;
        let work = async {
            match self.config.entity_timeout() {
                Some(limit) => tokio::time::timeout(limit, self.process_entity(entity, run))
                    .await
                    .unwrap_or_else(|_| Err(ChargebackError::EntityTimeout(entity_id))),
                None => self.process_entity(entity, run).await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChargebackError::Cancelled),
            outcome = work => outcome,
        }
    }

    async fn process_entity(
        &self,
        entity: Entity,
        run: &RunContext<'_>,
    ) -> ChargebackResult<EntityOutcome> {
        let plan = run.plan;
        let tagging = self.db.tagging();
        let (tags, labels) =
            futures::try_join!(tagging.get_tags(entity.id), tagging.get_labels(entity.id))?;
        let snapshot = EntitySnapshot::new(entity, tags, labels);

        if let Some(filter) = &plan.tag_filter
            && !filter.matches(&snapshot.tags)
        {
            tracing::debug!(entity_id = %snapshot.id(), "Entity excluded by tag filter");
            return Ok(EntityOutcome::Filtered);
        }

        let resolved = match resolve(
            &snapshot,
            run.assignments,
            &self.catalog,
            self.config.precedence,
        ) {
            Ok(resolved) => resolved,
            Err(e) if !e.is_fatal() => {
                tracing::debug!(entity_id = %snapshot.id(), error = %e, "Entity excluded");
                return Ok(EntityOutcome::Unrated);
            }
            Err(e) => return Err(e),
        };

        let samples = match self
            .db
            .metrics()
            .get_rollup_samples(snapshot.id(), plan.window.time_range())
            .await
        {
            Ok(samples) => samples,
            Err(DbError::NotFound) => {
                let missing = ChargebackError::MissingSampleData(snapshot.id());
                tracing::debug!(entity_id = %snapshot.id(), "{missing}, treating usage as zero");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let ctx = AggregationContext {
            fields: &self.fields,
            tag_filter: plan.tag_filter.as_ref(),
            allocation_method: self.config.allocation_method,
        };
        let metrics = aggregate(&snapshot.entity, &samples, &plan.window.intervals, &ctx);
        let priced = price_intervals(
            &resolved.rate,
            &self.fields,
            &metrics,
            &plan.window.intervals,
            plan.mode,
        );

        tracing::trace!(
            entity_id = %snapshot.id(),
            rate = resolved.rate.name(),
            intervals = priced.len(),
            "Entity priced"
        );

        Ok(EntityOutcome::Billed {
            had_samples: !samples.is_empty(),
            result: EntityResult {
                entity: snapshot,
                intervals: priced
                    .into_iter()
                    .map(|(index, charges)| (index, IntervalCharges::for_entity(charges)))
                    .collect(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use rust_decimal::{Decimal, dec};

    use super::*;
    use crate::{
        aggregation::Granularity,
        catalog::{RateConfig, RateDetail, RateTier},
        db::{
            DbResult,
            memory::MemoryStore,
            repos::{MetricsRepo, TimeRange},
        },
        fields::{CPU_CORES_ALLOCATED, CPU_CORES_USED, FIXED_COMPUTE_1},
        models::{AssignmentTarget, EntityKind, MetricRollupSample, Tag},
        pricing::dollars_to_microdollars,
    };

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn catalog(fields: &FieldRegistry) -> RateCatalog {
        RateCatalog::load(
            [RateConfig {
                name: "default".into(),
                description: String::new(),
                details: vec![
                    RateDetail::new(
                        FIXED_COMPUTE_1,
                        vec![RateTier::flat(dec!(0.01), Decimal::ZERO)],
                    ),
                    RateDetail::new(
                        CPU_CORES_ALLOCATED,
                        vec![RateTier::flat(Decimal::ZERO, dec!(1.0))],
                    ),
                    RateDetail::new(CPU_CORES_USED, vec![RateTier::flat(dec!(1), dec!(0.5))]),
                ],
            }],
            fields,
        )
        .unwrap()
    }

    struct Harness {
        store: Arc<MemoryStore>,
        service: ChargebackService,
    }

    fn harness(config: EngineConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let fields = FieldRegistry::seeded();
        let catalog = catalog(&fields);
        let service = ChargebackService::new(
            Arc::new(DbPool::in_memory(store.clone())),
            Arc::new(catalog),
            Arc::new(fields),
            config,
        );
        Harness { store, service }
    }

    fn image(store: &MemoryStore, name: &str, tags: Vec<Tag>) -> Entity {
        let entity = Entity::new(EntityKind::ContainerImage, name, utc(2012, 9, 1))
            .with_allocation("limit_cpu_cores", 1.0);
        store.insert_entity(entity.clone());
        store.set_tags(entity.id, tags);
        store.add_samples(
            entity.id,
            (0..48).map(|h| MetricRollupSample::new(utc(2012, 9, 28) + chrono::Duration::hours(h))),
        );
        entity
    }

    fn two_day_options() -> ReportOptions {
        ReportOptions {
            interval: Granularity::Daily,
            start: Some(utc(2012, 9, 28)),
            end: Some(utc(2012, 9, 30)),
            entity_kind: EntityKind::ContainerImage,
            run_at: Some(utc(2012, 10, 1)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_build_report_prices_each_day() {
        let h = harness(EngineConfig::default());
        h.store
            .add_assignment(RateAssignment::new("default", AssignmentTarget::Enterprise));
        let entity = image(&h.store, "web", vec![]);

        let report = h.service.build_report(&two_day_options()).await.unwrap();

        assert_eq!(report.stats.entities_in_scope, 1);
        assert_eq!(report.stats.entities_billed, 1);
        assert_eq!(report.rows.len(), 2);
        for row in &report.rows {
            assert_eq!(row.group.label, "web");
            assert_eq!(row.group.parts, vec![Some(entity.id.to_string())]);
            assert_eq!(row.cost(FIXED_COMPUTE_1), dollars_to_microdollars(dec!(0.24)));
            assert_eq!(row.metric(CPU_CORES_ALLOCATED), 1.0);
            assert_eq!(row.cost(CPU_CORES_ALLOCATED), dollars_to_microdollars(dec!(24)));
        }
        assert_eq!(report.total_cost(), 2 * (240_000 + 24_000_000));
    }

    #[tokio::test]
    async fn test_unrated_entities_are_excluded() {
        let h = harness(EngineConfig::default());
        h.store.add_assignment(RateAssignment::new(
            "default",
            AssignmentTarget::Tag(Tag::new("environment", "prod")),
        ));
        image(&h.store, "prod", vec![Tag::new("environment", "prod")]);
        image(&h.store, "dev", vec![Tag::new("environment", "dev")]);

        let report = h.service.build_report(&two_day_options()).await.unwrap();

        assert_eq!(report.stats.entities_billed, 1);
        assert_eq!(report.stats.entities_without_rate, 1);
        assert!(report.rows.iter().all(|r| r.group.label == "prod"));
    }

    #[tokio::test]
    async fn test_tag_filter_counts_filtered_entities() {
        let h = harness(EngineConfig::default());
        h.store
            .add_assignment(RateAssignment::new("default", AssignmentTarget::Enterprise));
        image(&h.store, "prod", vec![Tag::new("environment", "prod")]);
        image(&h.store, "dev", vec![Tag::new("environment", "dev")]);

        let options = ReportOptions {
            tag: vec!["/managed/environment/prod".into()],
            ..two_day_options()
        };
        let report = h.service.build_report(&options).await.unwrap();

        assert_eq!(report.stats.entities_filtered, 1);
        assert_eq!(report.stats.entities_billed, 1);
    }

    #[tokio::test]
    async fn test_missing_samples_price_allocation_only() {
        let h = harness(EngineConfig::default());
        h.store
            .add_assignment(RateAssignment::new("default", AssignmentTarget::Enterprise));
        let entity = Entity::new(EntityKind::ContainerImage, "idle", utc(2012, 9, 1))
            .with_allocation("limit_cpu_cores", 2.0);
        h.store.insert_entity(entity);

        let report = h.service.build_report(&two_day_options()).await.unwrap();

        assert_eq!(report.stats.entities_without_samples, 1);
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].metric(CPU_CORES_ALLOCATED), 2.0);
        assert_eq!(report.rows[0].cost(CPU_CORES_ALLOCATED), 48_000_000);
        // Present without a tag filter
        assert_eq!(report.rows[0].cost(FIXED_COMPUTE_1), 240_000);
    }

    #[tokio::test]
    async fn test_zero_samples_cost_nothing_for_usage_fields() {
        let h = harness(EngineConfig::default());
        h.store
            .add_assignment(RateAssignment::new("default", AssignmentTarget::Enterprise));
        let entity = Entity::new(EntityKind::ContainerImage, "idle", utc(2012, 9, 1));
        h.store.insert_entity(entity);

        let report = h.service.build_report(&two_day_options()).await.unwrap();

        assert_eq!(report.rows.len(), 2);
        for row in &report.rows {
            assert_eq!(row.metric(CPU_CORES_USED), 0.0);
            assert_eq!(row.cost(CPU_CORES_USED), 0);
        }

        let cumulative = ReportOptions {
            cumulative_rate_calculation: true,
            ..two_day_options()
        };
        let report = h.service.build_report(&cumulative).await.unwrap();
        assert!(report.rows.iter().all(|r| r.cost(CPU_CORES_USED) == 0));
    }

    #[tokio::test]
    async fn test_unknown_rate_assignment_is_fatal() {
        let h = harness(EngineConfig::default());
        h.store
            .add_assignment(RateAssignment::new("missing", AssignmentTarget::Enterprise));
        image(&h.store, "web", vec![]);

        let result = h.service.build_report(&two_day_options()).await;
        assert!(matches!(result, Err(ChargebackError::UnknownRate(r)) if r == "missing"));
    }

    #[tokio::test]
    async fn test_storage_failure_is_fatal() {
        let h = harness(EngineConfig::default());
        image(&h.store, "web", vec![]);
        h.store.set_unavailable(true);

        let result = h.service.build_report(&two_day_options()).await;
        assert!(matches!(
            result,
            Err(ChargebackError::Storage(DbError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_reads() {
        let h = harness(EngineConfig::default());
        h.store.set_unavailable(true);
        let options = ReportOptions {
            end: Some(utc(2012, 9, 27)),
            ..two_day_options()
        };
        let result = h.service.build_report(&options).await;
        assert!(matches!(
            result,
            Err(ChargebackError::InvalidIntervalConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let h = harness(EngineConfig::default());
        h.store
            .add_assignment(RateAssignment::new("default", AssignmentTarget::Enterprise));
        image(&h.store, "web", vec![]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = h
            .service
            .build_report_with_cancel(&two_day_options(), cancel)
            .await;
        assert!(matches!(result, Err(ChargebackError::Cancelled)));
    }

    #[tokio::test]
    async fn test_empty_scope() {
        let h = harness(EngineConfig::default());
        let report = h.service.build_report(&two_day_options()).await.unwrap();
        assert!(report.rows.is_empty());
        assert_eq!(report.stats, ReportStats::default());
        assert_eq!(report.window.intervals.len(), 2);
    }

    /// Metrics source that never answers.
    struct StalledMetrics;

    #[async_trait]
    impl MetricsRepo for StalledMetrics {
        async fn get_rollup_samples(
            &self,
            _entity_id: uuid::Uuid,
            _range: TimeRange,
        ) -> DbResult<Vec<MetricRollupSample>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_entity_timeout() {
        let store = Arc::new(MemoryStore::new());
        store.add_assignment(RateAssignment::new("default", AssignmentTarget::Enterprise));
        let entity = image(&store, "slow", vec![]);

        let fields = FieldRegistry::seeded();
        let catalog = catalog(&fields);
        let db = DbPool::from_repos(
            store.clone(),
            store.clone(),
            Arc::new(StalledMetrics),
            store,
        );
        let service = ChargebackService::new(
            Arc::new(db),
            Arc::new(catalog),
            Arc::new(fields),
            EngineConfig {
                entity_timeout_secs: 1,
                ..Default::default()
            },
        );

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            service.build_report(&two_day_options()),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(ChargebackError::EntityTimeout(id)) if id == entity.id));
    }

    #[tokio::test]
    async fn test_results_independent_of_concurrency() {
        let mut reports = Vec::new();
        for max_concurrency in [1, 8] {
            let h = harness(EngineConfig {
                max_concurrency,
                ..Default::default()
            });
            h.store
                .add_assignment(RateAssignment::new("default", AssignmentTarget::Enterprise));
            for i in 0..20 {
                image(&h.store, &format!("image-{i:02}"), vec![]);
            }
            let report = h.service.build_report(&two_day_options()).await.unwrap();
            reports.push(
                report
                    .rows
                    .iter()
                    .map(|r| (r.group.label.clone(), r.interval.index, r.total_cost))
                    .collect::<Vec<_>>(),
            );
        }
        assert_eq!(reports[0], reports[1]);
        assert_eq!(reports[0].len(), 40);
    }
}
