//! Tracing setup and shared span helpers.

use tracing::{Level, span};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the filter is `flowtest=info,warn`,
/// or `flowtest=debug,info` with span close events when `verbose` is set.
///
/// Returns an error (rather than panicking) if a subscriber is already
/// installed, which happens routinely when several tests call this.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("flowtest=debug,info")
            } else {
                EnvFilter::try_new("flowtest=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = fmt::layer()
        .with_target(verbose)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_writer(std::io::stderr);

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.with_span_events(FmtSpan::CLOSE).compact())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.compact())
            .try_init()?;
    }

    Ok(())
}

/// Span wrapping one child-process invocation.
pub fn invocation_span(test: &str, binary: &str) -> tracing::Span {
    span!(Level::INFO, "invocation", test = %test, binary = %binary)
}

/// Span wrapping one coverage aggregation pass.
pub fn aggregation_span(coverage_base: &str, toolchain: &str) -> tracing::Span {
    span!(
        Level::INFO,
        "aggregate_coverage",
        coverage_base = %coverage_base,
        toolchain = %toolchain,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error_not_a_panic() {
        let _ = init_tracing(false);
        assert!(init_tracing(true).is_err());
    }

    #[test]
    fn test_spans_can_be_entered() {
        let span = invocation_span("T1", "/bin/true");
        let _guard = span.enter();
        let agg = aggregation_span("coverage/e2e", "go");
        let _agg_guard = agg.enter();
    }
}
