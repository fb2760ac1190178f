//! W3C Extended Log File Format output (<http://www.w3.org/TR/WD-logfile.html>).
//!
//! Records go to standard output as tab separated fields:
//!
//! ```text
//! #Version: 1.0
//! #Fields: date time event message tags time-taken payload cause
//! ```
//!
//! `date` and `time` are stamped when [`log`] is called; `event` and
//! `message` are required, the rest come from [`LogOptions`] and default to
//! `-`. `time-taken` is seconds with three decimals, measured from
//! `LogOptions::started`.

use std::io::Write;
use std::sync::Once;
use std::time::Instant;

use chrono::Utc;

static HEADER: Once = Once::new();

/// Emit the ELF directive header. Safe to call more than once; only the
/// first call writes.
pub fn init() {
    HEADER.call_once(|| {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let _ = writeln!(out, "#Version: 1.0");
        let _ = writeln!(
            out,
            "#Fields: date time event message tags time-taken payload cause"
        );
    });
}

/// Optional fields for [`log`].
#[derive(Debug, Default)]
pub struct LogOptions {
    pub tags: Option<String>,
    pub started: Option<Instant>,
    pub payload: Option<String>,
    pub cause: Option<String>,
}

/// Write one ELF record. Tabs or newlines inside the fields would corrupt
/// the record, so they are collapsed to spaces.
pub fn log(event: &str, message: &str, options: LogOptions) {
    init();

    let now = Utc::now();
    let time_taken = match options.started {
        Some(started) => format!("{:.3}", started.elapsed().as_secs_f64()),
        None => "-".to_string(),
    };
    let tags = options.tags.as_deref().unwrap_or("-");
    let payload = options.payload.as_deref().unwrap_or("-");
    let cause = options.cause.as_deref().unwrap_or("-");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        now.format("%Y-%m-%d"),
        now.format("%H:%M:%S"),
        sanitise(event),
        sanitise(message),
        sanitise(tags),
        time_taken,
        sanitise(payload),
        sanitise(cause),
    );
}

fn sanitise(field: &str) -> String {
    field.replace(['\t', '\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sanitise_collapses_separators() {
        assert_eq!(sanitise("a\tb\nc"), "a b c");
        assert_eq!(sanitise("plain"), "plain");
    }

    #[test]
    fn log_accepts_all_option_shapes() {
        init();
        log("START", "Started thing", LogOptions::default());
        log(
            "READ",
            "Reading request body",
            LogOptions {
                tags: Some("SOMETAG".to_string()),
                payload: Some("extra information".to_string()),
                started: Instant::now().checked_sub(Duration::from_millis(250)),
                cause: None,
            },
        );
        log(
            "ERROR",
            "Unexpected error",
            LogOptions {
                cause: Some("oops".to_string()),
                started: Some(Instant::now()),
                ..LogOptions::default()
            },
        );
    }
}
