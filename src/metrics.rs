use crate::controllers::clusterresourceoverride::condition::TRUE;
use crate::resources::clusterresourceoverrides::ClusterResourceOverride;
use crate::Error;
use kube::ResourceExt;
use prometheus::{
    histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry,
};
use tokio::time::Instant;

/// Prometheus metrics of the ClusterResourceOverride controller.
#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    /// Failed passes by resource and condition reason
    pub failures: IntCounterVec,
    /// Rejected status writes by API reason, `Conflict` being the common one
    pub status_update_failures: IntCounterVec,
    /// 1 while a condition type is `True`, 0 otherwise
    pub conditions: IntGaugeVec,
    pub reconcile_duration: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconciliations = IntCounter::new(
            "clusterresourceoverride_operator_reconciliations_total",
            "Reconcile passes of the ClusterResourceOverride",
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "clusterresourceoverride_operator_reconciliation_errors_total",
                "Reconcile passes that stopped on an error, by reason",
            ),
            &["instance", "reason"],
        )
        .unwrap();
        let status_update_failures = IntCounterVec::new(
            opts!(
                "clusterresourceoverride_operator_status_update_errors_total",
                "Status writes rejected by the API server, by reason",
            ),
            &["reason"],
        )
        .unwrap();
        let conditions = IntGaugeVec::new(
            opts!(
                "clusterresourceoverride_operator_condition",
                "Whether a status condition of the ClusterResourceOverride is True",
            ),
            &["instance", "type"],
        )
        .unwrap();
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "clusterresourceoverride_operator_reconcile_duration_seconds",
                "Duration of a reconcile pass in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["instance"],
        )
        .unwrap();
        Metrics {
            reconciliations,
            failures,
            status_update_failures,
            conditions,
            reconcile_duration,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.status_update_failures.clone()))?;
        registry.register(Box::new(self.conditions.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, cro: &ClusterResourceOverride, e: &Error) {
        self.failures
            .with_label_values(&[cro.name_any().as_str(), e.metric_label()])
            .inc()
    }

    pub fn status_update_failure(&self, e: &Error) {
        let reason = match e {
            Error::KubeError(kube::Error::Api(response)) if !response.reason.is_empty() => {
                response.reason.as_str()
            }
            other => other.metric_label(),
        };
        self.status_update_failures.with_label_values(&[reason]).inc()
    }

    /// Publish the conditions a pass left on the resource.
    pub fn observe_conditions(&self, cro: &ClusterResourceOverride) {
        let name = cro.name_any();
        let Some(status) = &cro.status else {
            return;
        };
        for condition in &status.conditions {
            let value = i64::from(condition.status == TRUE);
            self.conditions
                .with_label_values(&[name.as_str(), condition.r#type.as_str()])
                .set(value);
        }
    }

    pub fn count_and_measure(&self, cro: &ClusterResourceOverride) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            instance: cro.name_any(),
            metric: self.reconcile_duration.clone(),
        }
    }
}

/// Observes the duration of a pass when dropped.
pub struct ReconcileMeasurer {
    start: Instant,
    instance: String,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        self.metric
            .with_label_values(&[self.instance.as_str()])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::api_error;
    use crate::resources::clusterresourceoverrides::{
        ClusterResourceOverrideCondition, ClusterResourceOverrideStatus,
    };

    fn cluster() -> ClusterResourceOverride {
        ClusterResourceOverride::new("cluster", Default::default())
    }

    #[test]
    fn failures_are_labelled_by_reason() {
        let registry = Registry::new();
        let metrics = Metrics::default().register(&registry).unwrap();

        metrics.reconcile_failure(
            &cluster(),
            &Error::install_readiness("CertNotAvailable", "name=cluster secret missing"),
        );

        let count = metrics
            .failures
            .with_label_values(&["cluster", "CertNotAvailable"])
            .get();
        assert_eq!(count, 1);
    }

    #[test]
    fn status_conflicts_are_counted_by_api_reason() {
        let metrics = Metrics::default();

        metrics.status_update_failure(&Error::KubeError(api_error(
            409,
            "Conflict",
            "the object has been modified".to_string(),
        )));
        metrics.status_update_failure(&Error::InvalidConfig("broken".to_string()));

        assert_eq!(metrics.status_update_failures.with_label_values(&["Conflict"]).get(), 1);
        assert_eq!(
            metrics.status_update_failures.with_label_values(&["InvalidConfig"]).get(),
            1
        );
    }

    #[test]
    fn conditions_follow_the_status() {
        let metrics = Metrics::default();
        let mut cro = cluster();
        let condition = |type_: &str, status: &str| ClusterResourceOverrideCondition {
            last_transition_time: None,
            message: None,
            reason: None,
            status: status.to_string(),
            r#type: type_.to_string(),
        };
        cro.status = Some(ClusterResourceOverrideStatus {
            conditions: vec![
                condition("Available", "True"),
                condition("InstallReadinessFailure", "False"),
            ],
            ..Default::default()
        });

        metrics.observe_conditions(&cro);

        let gauge = |type_: &str| metrics.conditions.with_label_values(&["cluster", type_]).get();
        assert_eq!(gauge("Available"), 1);
        assert_eq!(gauge("InstallReadinessFailure"), 0);
    }

    #[test]
    fn measurer_observes_on_drop() {
        let metrics = Metrics::default();
        {
            let _timer = metrics.count_and_measure(&cluster());
        }
        assert_eq!(metrics.reconciliations.get(), 1);
        let samples = metrics
            .reconcile_duration
            .with_label_values(&["cluster"])
            .get_sample_count();
        assert_eq!(samples, 1);
    }
}
