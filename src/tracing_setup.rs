use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging with JSON output
pub fn init_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(true)
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init()
        .wrap_err("Failed to install JSON tracing subscriber")?;

    tracing::info!("Bulwark structured logging initialized");
    Ok(())
}

/// Initialize console-friendly logging for interactive use
pub fn init_console_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .wrap_err("Failed to install console tracing subscriber")?;

    tracing::debug!("Bulwark console logging initialized");
    Ok(())
}

/// Initialize tracing with an explicit level directive and format
pub fn init_tracing_with_config(level: &str, json_format: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(true).with_span_list(true))
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.compact())
            .try_init()
    }
    .wrap_err("Failed to install tracing subscriber")?;

    tracing::info!(
        "Bulwark logging initialized with level: {}, json: {}",
        level,
        json_format
    );
    Ok(())
}

/// Span for a long-running component such as the health monitor
pub fn configure_component_tracing(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Span covering one logical request, retries included
pub fn create_request_span(method: &str, endpoint: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = endpoint,
        request.id = request_id,
        http.status_code = tracing::field::Empty,
        attempts = tracing::field::Empty,
    )
}

/// Span covering a single network attempt
pub fn create_attempt_span(attempt: u32, url: &str) -> tracing::Span {
    tracing::debug_span!(
        "attempt",
        attempt = attempt,
        url = url,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_subscriber<T>(f: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        assert!(init_tracing_with_config("bulwark=loud", false).is_err());
    }

    #[test]
    fn test_create_request_span() {
        with_subscriber(|| {
            let span = create_request_span("GET", "/flows", "req-123");
            assert_eq!(span.metadata().map(|m| m.name()), Some("request"));
        });
    }

    #[test]
    fn test_create_attempt_span() {
        with_subscriber(|| {
            let span = create_attempt_span(2, "https://api.example.test/flows");
            assert_eq!(span.metadata().map(|m| m.name()), Some("attempt"));
        });
    }

    #[test]
    fn test_configure_component_tracing() {
        with_subscriber(|| {
            let span = configure_component_tracing("health_monitor");
            assert_eq!(span.metadata().map(|m| m.name()), Some("component"));
        });
    }
}
