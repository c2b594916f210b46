//! Diagnostic sink setup
//!
//! Console output goes through a `tracing_subscriber` fmt layer filtered by
//! `RUST_LOG` (or `--verbose`). With the `syslog-backend` feature, every
//! debug-and-above event from this crate is also forwarded to the local
//! syslog under the LOG_USER facility.

use crate::config::{LogFormat, LoggingSettings};
use crate::{AesdError, Result};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Layer};

/// Install the global subscriber
pub fn init(settings: &LoggingSettings, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        "aesdsocket=debug,info"
    } else {
        "aesdsocket=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let console = match settings.format {
        LogFormat::Text => tracing_fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let registry = tracing_subscriber::registry().with(console.with_filter(filter));

    #[cfg(feature = "syslog-backend")]
    let registry = registry.with(settings.syslog.then(|| {
        syslog_sink::SyslogLayer::new(&settings.identifier).with_filter(
            tracing_subscriber::filter::Targets::new()
                .with_target("aesdsocket", tracing::Level::DEBUG),
        )
    }));

    registry
        .try_init()
        .map_err(|e| AesdError::Config(format!("Failed to set tracing subscriber: {}", e)))
}

/// Flattens an event into a single line: the message followed by any
/// structured fields as `key=value`.
#[derive(Debug, Default)]
pub struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    /// The formatted line
    pub fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.join(" ")
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

#[cfg(feature = "syslog-backend")]
mod syslog_sink {
    use super::MessageVisitor;
    use parking_lot::Mutex;
    use syslog::{Facility, Formatter3164, Logger, LoggerBackend};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer};

    type SyslogLogger = Logger<LoggerBackend, Formatter3164>;

    /// Layer writing events to the local syslog socket.
    ///
    /// The connection is tied to the pid that opened it and is reopened after
    /// a fork so the detached child reports its own pid.
    pub struct SyslogLayer {
        identifier: String,
        hostname: Option<String>,
        logger: Mutex<Option<(u32, SyslogLogger)>>,
    }

    impl SyslogLayer {
        pub fn new(identifier: &str) -> Self {
            Self {
                identifier: identifier.to_string(),
                hostname: Some(gethostname::gethostname().to_string_lossy().into_owned()),
                logger: Mutex::new(None),
            }
        }

        fn formatter(&self, pid: u32) -> Formatter3164 {
            Formatter3164 {
                facility: Facility::LOG_USER,
                hostname: self.hostname.clone(),
                process: self.identifier.clone(),
                pid,
            }
        }

        fn write(&self, level: Level, line: String) {
            let pid = std::process::id();
            let mut guard = self.logger.lock();

            let stale = !matches!(&*guard, Some((owner, _)) if *owner == pid);
            if stale {
                // No syslog daemon is not fatal; console output still works.
                *guard = syslog::unix(self.formatter(pid))
                    .ok()
                    .map(|logger| (pid, logger));
            }

            deliver(&mut *guard, |logger| match level {
                Level::ERROR => logger.err(line),
                Level::WARN => logger.warning(line),
                Level::INFO => logger.info(line),
                _ => logger.debug(line),
            });
        }
    }

    /// Send through the cached connection, dropping it on failure so the
    /// next event reconnects. Returns whether the line went out.
    fn deliver<L, E>(
        slot: &mut Option<(u32, L)>,
        send: impl FnOnce(&mut L) -> Result<(), E>,
    ) -> bool {
        let Some((_, logger)) = slot.as_mut() else {
            return false;
        };
        if send(logger).is_err() {
            *slot = None;
            return false;
        }
        true
    }

    impl<S: Subscriber> Layer<S> for SyslogLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            self.write(*event.metadata().level(), visitor.finish());
        }
    }

}
