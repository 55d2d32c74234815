//! Structured logging with JSON or pretty output.
//!
//! Logs go to stderr so the run summary on stdout stays machine-readable.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// Sets up tracing-subscriber with either JSON or pretty format,
/// respecting the configured log level. `RUST_LOG` wins when set.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => init_json_logging(filter),
        LogFormat::Pretty => init_pretty_logging(filter),
    }
}

/// Initialize JSON logging.
fn init_json_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Initialize compact human-readable logging.
fn init_pretty_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Standard log event names.
pub mod events {
    /// A unification run is starting.
    pub const RUN_STARTED: &str = "run_started";

    /// A unification run has finished.
    pub const RUN_FINISHED: &str = "run_finished";

    /// A domain has been unified.
    pub const DOMAIN_UNIFIED: &str = "domain_unified";

    /// A source document was skipped (parse error, not a spec).
    pub const DOCUMENT_SKIPPED: &str = "document_skipped";

    /// A merge conflict was resolved.
    pub const CONFLICT_RESOLVED: &str = "conflict_resolved";

    /// An external reference could not be resolved.
    pub const REFERENCE_UNRESOLVED: &str = "reference_unresolved";

    /// A legacy construct could not be converted.
    pub const CONVERSION_SKIPPED: &str = "conversion_skipped";

    /// A unified document was written.
    pub const OUTPUT_WRITTEN: &str = "output_written";
}

/// Helper macros for structured logging with standard fields.
///
/// These wrap the tracing macros to ensure consistent field naming.
#[macro_export]
macro_rules! log_run_started {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::RUN_STARTED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_run_finished {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::RUN_FINISHED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_domain_unified {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::DOMAIN_UNIFIED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_document_skipped {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::DOCUMENT_SKIPPED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_conflict_resolved {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::CONFLICT_RESOLVED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_reference_unresolved {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::REFERENCE_UNRESOLVED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_conversion_skipped {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::CONVERSION_SKIPPED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_output_written {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::OUTPUT_WRITTEN,
            $($field)*
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> fmt::MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    // Logging can only be initialized once per test process, so these
    // tests cover the configuration logic.

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("PRETTY"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("invalid"), None);
    }

    #[test]
    fn test_reference_unresolved_macro_stamps_event() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_writer(capture.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            crate::log_reference_unresolved!(pointer = "missing.json", "unresolved reference");
        });

        let out = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains(r#""event":"reference_unresolved""#));
        assert!(out.contains(r#""pointer":"missing.json""#));
        assert!(out.contains(r#""level":"WARN""#));
    }

    #[test]
    fn test_event_names_are_snake_case() {
        for name in [
            events::RUN_STARTED,
            events::RUN_FINISHED,
            events::DOMAIN_UNIFIED,
            events::DOCUMENT_SKIPPED,
            events::CONFLICT_RESOLVED,
            events::REFERENCE_UNRESOLVED,
            events::CONVERSION_SKIPPED,
            events::OUTPUT_WRITTEN,
        ] {
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
