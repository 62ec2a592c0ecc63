/*!
 * Heap Tracing
 * Structured tracing for heap operations using the tracing crate
 *
 * Features:
 * - Env-filtered subscriber with human-readable or JSON output
 * - Spans for long-running heap operations (growth, inspection)
 * - Duration and size changes recorded on the span
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, span, warn, Level, Span};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static NEXT_SPAN_ID: AtomicU64 = AtomicU64::new(1);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - HEAP_TRACE_JSON: Enable JSON output (default: false)
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("HEAP_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Heap tracing initialized");
    }
    installed
}

/// Span around a heap operation that may take a while
///
/// Logs completion on drop; operations slower than 10ms are reported at `warn`.
pub struct HeapSpan {
    span: Span,
    start: Instant,
    id: u64,
}

impl HeapSpan {
    pub fn new(operation: &'static str) -> Self {
        let id = NEXT_SPAN_ID.fetch_add(1, Ordering::Relaxed);

        let span = span!(
            Level::DEBUG,
            "heap_operation",
            span_id = id,
            operation = operation,
            old_size = tracing::field::Empty,
            new_size = tracing::field::Empty,
            duration_us = tracing::field::Empty,
            result = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        let entered = span.enter();
        debug!(operation, "heap operation started");
        drop(entered);

        Self {
            span,
            start: Instant::now(),
            id,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Record the heap body length before and after the operation
    pub fn record_sizes(&self, old_size: usize, new_size: usize) {
        self.span.record("old_size", old_size);
        self.span.record("new_size", new_size);
    }

    pub fn record_result(&self, success: bool) {
        self.span.record("result", if success { "success" } else { "error" });
    }

    pub fn record_error(&self, error: &str) {
        self.span.record("error", error);
        self.span.record("result", "error");
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for HeapSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);

        if duration.as_millis() > 10 {
            warn!(
                span_id = self.id,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow heap operation"
            );
        } else {
            debug!(
                span_id = self.id,
                duration_us = duration.as_micros() as u64,
                "heap operation completed"
            );
        }
    }
}

/// Helper to open a [`HeapSpan`]
#[inline]
pub fn span_heap(operation: &'static str) -> HeapSpan {
    HeapSpan::new(operation)
}
