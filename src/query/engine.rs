use crate::error::{TrendsError, TrendsResult};
use crate::query::aggregation::aggregate;
use crate::query::breakdown::{self, Slice};
use crate::query::response::{assemble, SliceOutputs, TrendResult};
use crate::query::{QueryPlan, QuerySpec, Series};
use crate::storage::EventStore;
use crate::TrendsConfig;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs trend queries against a shared event store.
pub struct TrendsEngine {
    store: Arc<dyn EventStore>,
    config: TrendsConfig,
}

impl TrendsEngine {
    pub fn new(store: Arc<dyn EventStore>, config: TrendsConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &TrendsConfig {
        &self.config
    }

    pub fn plan(&self, spec: &QuerySpec, now: DateTime<Utc>) -> TrendsResult<QueryPlan> {
        QueryPlan::build(spec, now, &self.config)
    }

    pub async fn run(&self, spec: &QuerySpec, now: DateTime<Utc>) -> TrendsResult<Vec<TrendResult>> {
        let request_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Running trends query over {} events at {} ({})",
            spec.events.len(),
            now.to_rfc3339(),
            request_id
        );

        let plan = match self.plan(spec, now) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Rejected trends query ({}): {}", request_id, e);
                return Err(e);
            }
        };

        let results = self.execute(&plan).await?;
        info!("Trends query returned {} results ({})", results.len(), request_id);
        Ok(results)
    }

    pub async fn execute(&self, plan: &QueryPlan) -> TrendsResult<Vec<TrendResult>> {
        let events: Vec<String> = plan.metrics.iter().map(|m| m.event.clone()).collect();
        let slices = breakdown::resolve(
            self.store.as_ref(),
            plan.breakdown.as_deref(),
            &events,
            &plan.predicates,
            &plan.grid,
            self.config.breakdown_options(),
        )
        .await?;
        debug!(
            "Computing {} metrics x {} slices over {} buckets",
            plan.metrics.len(),
            slices.len(),
            plan.grid.len()
        );

        let series = if self.config.parallel_slices {
            self.compute_parallel(plan, &slices).await?
        } else {
            self.compute_sequential(plan, &slices).await?
        };

        let outputs = match &plan.formula {
            Some(formula) => {
                let mut combined = Vec::with_capacity(slices.len());
                for slice_index in 0..slices.len() {
                    let inputs: Vec<&Series> = (0..plan.metrics.len())
                        .map(|metric_index| &series[metric_index * slices.len() + slice_index])
                        .collect();
                    combined.push(formula.evaluate(&inputs)?);
                }
                SliceOutputs::Formula(combined)
            }
            None => SliceOutputs::PerMetric(series),
        };

        Ok(assemble(&plan.grid, &plan.metrics, &slices, outputs))
    }

    async fn compute_sequential(&self, plan: &QueryPlan, slices: &[Slice]) -> TrendsResult<Vec<Series>> {
        let options = self.config.aggregation_options();
        let mut series = Vec::with_capacity(plan.metrics.len() * slices.len());
        for metric in &plan.metrics {
            for slice in slices {
                series.push(
                    aggregate(self.store.as_ref(), metric, &plan.predicates, &plan.grid, slice, options).await?,
                );
            }
        }
        Ok(series)
    }

    /// One task per (metric, slice); each writes only its own slot.
    async fn compute_parallel(&self, plan: &QueryPlan, slices: &[Slice]) -> TrendsResult<Vec<Series>> {
        let options = self.config.aggregation_options();
        let slice_count = slices.len();
        let shared_slices = Arc::new(slices.to_vec());
        let predicates = Arc::new(plan.predicates.clone());

        let mut tasks = Vec::with_capacity(plan.metrics.len() * slice_count);
        for (metric_index, metric) in plan.metrics.iter().enumerate() {
            let metric = Arc::new(metric.clone());
            for slice_index in 0..slice_count {
                let store = Arc::clone(&self.store);
                let metric = Arc::clone(&metric);
                let predicates = Arc::clone(&predicates);
                let grid = Arc::clone(&plan.grid);
                let slices = Arc::clone(&shared_slices);

                let task = tokio::spawn(async move {
                    aggregate(store.as_ref(), &metric, &predicates, &grid, &slices[slice_index], options).await
                });
                tasks.push((metric_index * slice_count + slice_index, task));
            }
        }

        let mut slots: Vec<Option<Series>> = vec![None; tasks.len()];
        for (index, task) in tasks {
            let series = task.await.map_err(|e| {
                error!("Aggregation task failed: {}", e);
                TrendsError::Task(e.to_string())
            })??;
            slots[index] = Some(series);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or_else(|| TrendsError::Task(format!("slot {} was never filled", index))))
            .collect()
    }
}
