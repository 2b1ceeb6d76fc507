//! Metrics and tracing hooks.
//!
//! With the `metrics` feature, [`METRICS`] records statement timings and
//! errors, connection waits and cascade-delete volumes through OpenTelemetry,
//! with a Prometheus exporter attached. With the `tracing` feature,
//! [`tracing_helpers`] provides the spans wrapped around statements, sessions
//! and cascade deletes.

#[cfg(feature = "metrics")]
pub use self::otel::{LifelinkMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
    };
    use opentelemetry_prometheus::PrometheusExporter;
    use std::time::Duration;

    pub static METRICS: Lazy<LifelinkMetrics> = Lazy::new(LifelinkMetrics::init);

    pub struct LifelinkMetrics {
        /// `None` when the exporter could not be built; instruments still record
        pub exporter: Option<PrometheusExporter>,
        pub queries_total: Counter<u64>,
        pub query_errors_total: Counter<u64>,
        pub query_duration: Histogram<f64>,
        pub connection_wait_duration: Histogram<f64>,
        pub cascade_deletes_total: Counter<u64>,
        pub entities_deleted_total: Counter<u64>,
        pub join_records_deleted_total: Counter<u64>,
        pub fan_out_failures_total: Counter<u64>,
    }

    impl LifelinkMetrics {
        pub fn init() -> Self {
            let exporter = match opentelemetry_prometheus::exporter().build() {
                Ok(exporter) => Some(exporter),
                Err(e) => {
                    log::warn!("failed to build prometheus exporter: {e}");
                    None
                }
            };
            let meter = global::meter("lifelink");

            Self {
                exporter,
                queries_total: meter
                    .u64_counter("lifelink_queries_total")
                    .with_description("Total statements executed against the store")
                    .build(),
                query_errors_total: meter
                    .u64_counter("lifelink_query_errors_total")
                    .with_description("Statements that failed")
                    .build(),
                query_duration: meter
                    .f64_histogram("lifelink_query_duration_seconds")
                    .with_description("Duration of store statements")
                    .build(),
                connection_wait_duration: meter
                    .f64_histogram("lifelink_connection_wait_seconds")
                    .with_description("Time spent establishing store connections")
                    .build(),
                cascade_deletes_total: meter
                    .u64_counter("lifelink_cascade_deletes_total")
                    .with_description("Cascade delete batches executed")
                    .build(),
                entities_deleted_total: meter
                    .u64_counter("lifelink_entities_deleted_total")
                    .with_description("Entity documents removed by cascade deletes")
                    .build(),
                join_records_deleted_total: meter
                    .u64_counter("lifelink_join_records_deleted_total")
                    .with_description("Join records removed by cascade deletes")
                    .build(),
                fan_out_failures_total: meter
                    .u64_counter("lifelink_fan_out_failures_total")
                    .with_description("Fan-out tasks that failed during a cascade delete")
                    .build(),
            }
        }

        pub fn record_query_duration(&self, elapsed: Duration) {
            self.queries_total.add(1, &[]);
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_query_error(&self) {
            self.query_errors_total.add(1, &[]);
        }

        pub fn record_connection_wait(&self, elapsed: Duration) {
            self.connection_wait_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_cascade_batch(&self, entities: u64, join_records: u64) {
            self.cascade_deletes_total.add(1, &[]);
            self.entities_deleted_total.add(entities, &[]);
            self.join_records_deleted_total.add(join_records, &[]);
        }

        pub fn record_fan_out_failure(&self) {
            self.fan_out_failures_total.add(1, &[]);
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::Span;

    const MAX_SQL_IN_SPAN: usize = 256;

    fn shorten(sql: &str) -> &str {
        match sql.char_indices().nth(MAX_SQL_IN_SPAN) {
            Some((cut, _)) => &sql[..cut],
            None => sql,
        }
    }

    pub fn execute_query_span(sql: &str) -> Span {
        tracing::debug_span!("lifelink.query", sql = shorten(sql))
    }

    pub fn acquire_connection_span() -> Span {
        tracing::debug_span!("lifelink.connect")
    }

    pub fn begin_session_span() -> Span {
        tracing::debug_span!("lifelink.session.begin")
    }

    pub fn commit_session_span() -> Span {
        tracing::debug_span!("lifelink.session.commit")
    }

    pub fn abort_session_span() -> Span {
        tracing::debug_span!("lifelink.session.abort")
    }

    pub fn cascade_delete_span(collection: &str, ids: usize) -> Span {
        tracing::info_span!("lifelink.cascade_delete", collection, ids)
    }

    pub fn fan_out_task_span(task: &str) -> Span {
        tracing::debug_span!("lifelink.fan_out.task", task)
    }

}
