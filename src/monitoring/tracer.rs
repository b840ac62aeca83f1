/*!
 * Tracing
 * Structured tracing for semaphore operations using the tracing crate
 *
 * Features:
 * - Trace ID generation for correlating a transaction's events
 * - JSON-formatted logs for structured parsing
 * - Slow transaction warnings
 */

use crate::core::limits::SLOW_TRANSACTION_THRESHOLD;
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};
use uuid::Uuid;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SEMSET_TRACE_JSON: Enable JSON output (default: false)
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("SEMSET_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    if use_json {
        let installed = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok();
        if installed {
            info!("Structured tracing initialized with JSON output");
        }
    } else {
        let installed = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
            .is_ok();
        if installed {
            info!("Structured tracing initialized");
        }
    }
}

/// Generate a unique trace ID for request correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one operation, logged with its duration when dropped
pub struct OperationSpan {
    span: tracing::Span,
    start: Instant,
    /// Set once the operation starts blocking; later time is not counted as work
    wait_started: Option<Instant>,
    operation: String,
    trace_id: String,
}

impl OperationSpan {
    pub fn new(operation: &str) -> Self {
        let trace_id = generate_trace_id();

        let span = span!(
            Level::DEBUG,
            "operation",
            trace_id = %trace_id,
            operation = operation,
            set = tracing::field::Empty,
            pid = tracing::field::Empty,
            duration_us = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            waited_us = tracing::field::Empty,
            result = tracing::field::Empty,
            items_processed = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            wait_started: None,
            operation: operation.to_string(),
            trace_id,
        }
    }

    /// Get the trace ID for this operation
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Record a field with any Debug-compatible type
    ///
    /// Only fields declared on the span are kept.
    pub fn record_debug<V: std::fmt::Debug>(&self, key: &str, value: V) {
        self.span.record(key, format!("{:?}", value).as_str());
    }

    /// Record the operation result
    pub fn record_result(&self, success: bool) {
        self.span.record("result", if success { "success" } else { "error" });
    }

    /// Record an error
    pub fn record_error(&self, error: &str) {
        self.span.record("error", error);
        self.span.record("result", "error");
    }

    /// Record items processed count
    pub fn record_items_processed(&self, count: usize) {
        self.span.record("items_processed", count);
    }

    /// Mark the start of a blocking wait
    ///
    /// The slow-operation check only counts time before this point.
    pub fn begin_wait(&mut self) {
        self.wait_started.get_or_insert_with(Instant::now);
    }

    /// Time spent working, excluding any wait
    pub fn active(&self) -> Duration {
        match self.wait_started {
            Some(at) => at.duration_since(self.start),
            None => self.start.elapsed(),
        }
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.active();
        let _entered = self.span.enter();

        if let Some(at) = self.wait_started {
            self.span.record("waited_us", at.elapsed().as_micros() as u64);
        }

        if duration > SLOW_TRANSACTION_THRESHOLD {
            self.span.record("duration_ms", duration.as_millis() as u64);
            warn!(
                trace_id = %self.trace_id,
                operation = %self.operation,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow operation detected"
            );
        } else {
            self.span.record("duration_us", duration.as_micros() as u64);
            debug!(
                trace_id = %self.trace_id,
                operation = %self.operation,
                duration_us = duration.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

/// Helper to create an operation span
#[inline]
pub fn span_operation(name: &str) -> OperationSpan {
    OperationSpan::new(name)
}
