//! Log format for a long-running gateway.
//!
//! Default tracing format: `TIMESTAMP LEVEL span1:span2: target: message`
//! This format:            `[uptime] LEVEL target: span1:span2: message`
//!
//! Uptime is seconds since the formatter was created, which on a board
//! without a real-time clock is more useful than a wall-clock timestamp.

use std::fmt;
use std::time::Instant;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Event formatter prefixing each line with process uptime
pub struct UptimeFormat {
    started: Instant,
}

impl UptimeFormat {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for UptimeFormat {
    fn default() -> Self {
        Self::new()
    }
}

fn level_color(level: &tracing::Level) -> &'static str {
    match *level {
        tracing::Level::ERROR => "\x1b[31m", // Red
        tracing::Level::WARN => "\x1b[33m",  // Yellow
        tracing::Level::INFO => "\x1b[32m",  // Green
        tracing::Level::DEBUG => "\x1b[34m", // Blue
        tracing::Level::TRACE => "\x1b[35m", // Magenta
    }
}

impl<S, N> FormatEvent<S, N> for UptimeFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        // Write uptime instead of a wall-clock timestamp
        let uptime = self.started.elapsed();
        write!(
            writer,
            "[{:>6}.{:03}] ",
            uptime.as_secs(),
            uptime.subsec_millis()
        )?;

        // Write level with color
        let level = metadata.level();
        if writer.has_ansi_escapes() {
            write!(writer, "{}{:>5}\x1b[0m ", level_color(level), level)?;
        } else {
            write!(writer, "{:>5} ", level)?;
        }

        // Write target (module path)
        write!(writer, "{}: ", metadata.target())?;

        // Write span context (if any)
        if let Some(scope) = ctx.event_scope() {
            let mut first = true;
            for span in scope.from_root() {
                if !first {
                    write!(writer, ":")?;
                }
                write!(writer, "{}", span.name())?;
                first = false;
            }
            if !first {
                write!(writer, ": ")?;
            }
        }

        // Write the event message and fields
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}
