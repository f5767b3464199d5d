//! Log channels and subscriber setup.
//!
//! Events are grouped into three spans: `internal` for the scheduler and the
//! stores, `outgoing` for payloads handed to a transport and `incoming` for
//! callbacks coming back. The outgoing and incoming spans always carry the
//! id they are about, so a whole message can be followed with one filter.

use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Emit an event inside a span named `$span`, optionally tagged with one
/// field (`key = value;`).
#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $key:ident = $value:expr; $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span, $key = %$value);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};

    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Scheduler and store events. `job = id;` tags the span with a job id.
#[macro_export]
macro_rules! internal {
    (level = $level:ident, job = $job:expr; $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", job_id = $job; $($msg),*)
    };

    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    (job = $job:expr; $($msg:expr),*) => {
        $crate::internal!(level = TRACE, job = $job; $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// A payload leaving through a transport, tagged with its message id.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, message = $id:expr; $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", message_id = $id; $($msg),*)
    };

    (message = $id:expr; $($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, message = $id; $($msg),*)
    };
}

/// A sent or delivered callback, tagged with the segment it settles.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, correlation = $id:expr; $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", correlation = $id; $($msg),*)
    };

    (correlation = $id:expr; $($msg:expr),*) => {
        $crate::incoming!(level = TRACE, correlation = $id; $($msg),*)
    };
}

/// Parse a `LOG_LEVEL` value, keeping `default` for anything unrecognised.
fn parse_level(value: Option<&str>, default: LevelFilter) -> LevelFilter {
    let Some(value) = value else {
        return default;
    };

    LevelFilter::from_str(value).unwrap_or_else(|_| {
        eprintln!("Invalid log level specified {value}, defaulting to {default}");
        default
    })
}

/// Install the global subscriber.
///
/// The level comes from `LOG_LEVEL`, falling back to `TRACE` for debug builds
/// and `INFO` for release builds. Only events from the workspace's own crates
/// are emitted.
pub fn init() {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let level = parse_level(std::env::var("LOG_LEVEL").ok().as_deref(), default);

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(false)
                .with_line_number(false)
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("sealpost")
                })),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn log_level_parsing() {
        assert_eq!(parse_level(None, LevelFilter::INFO), LevelFilter::INFO);
        assert_eq!(
            parse_level(Some("debug"), LevelFilter::INFO),
            LevelFilter::DEBUG
        );
        assert_eq!(
            parse_level(Some("chatty"), LevelFilter::WARN),
            LevelFilter::WARN
        );
    }

    #[test]
    fn channel_macros_accept_tags() {
        let job = "01J0000000000000000000000";
        crate::internal!("plain {}", 1);
        crate::internal!(level = DEBUG, job = job; "tagged {}", 2);
        crate::outgoing!(message = 7; "segment {} of {}", 1, 3);
        crate::incoming!(level = INFO, correlation = "sp:7:0:0/1:1"; "sent");
    }
}
