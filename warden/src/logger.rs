use std::fmt::Write;

use jiff::{Timestamp, Zoned, tz::TimeZone};
use log::{Level, Record};
use logforth::{
    append::Stdout,
    diagnostic::Diagnostic,
    layout::{JsonLayout, Layout},
};

use crate::args::{Args, LogStyle};

/// `<timestamp> <level>  <module>: <message>`, optionally with ANSI colored levels.
#[derive(Debug, Clone, Default)]
struct LineLayout {
    colored: bool,
}

impl LineLayout {
    fn colored() -> Self {
        Self { colored: true }
    }

    fn line(&self, now: Timestamp, record: &Record<'_>) -> Result<String, std::fmt::Error> {
        let mut line = String::new();
        let now = Zoned::new(now, TimeZone::UTC);

        write!(line, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        if self.colored {
            let color = level_color(record.level());
            write!(line, "\x1b[{color}m{:>5}\x1b[0m", record.level())?;
        } else {
            write!(line, "{:>5}", record.level())?;
        }

        // Crate and first module of the target.
        let target = record.target().split("::").take(2).collect::<Vec<_>>().join("::");
        write!(line, "  {target}: {}", record.args())?;

        Ok(line)
    }
}

fn level_color(level: Level) -> u8 {
    match level {
        Level::Error => 31,
        Level::Warn => 33,
        Level::Info => 32,
        Level::Debug => 34,
        Level::Trace => 35,
    }
}

impl Layout for LineLayout {
    fn format(&self, record: &Record<'_>, _diagnostics: &[Box<dyn Diagnostic>]) -> anyhow::Result<Vec<u8>> {
        Ok(self.line(Timestamp::now(), record)?.into_bytes())
    }
}

pub(super) fn init(args: &Args) {
    logforth::builder()
        .dispatch(|d| {
            let d = d.filter(args.log_level.env_filter());

            match args.log_style() {
                LogStyle::Color => d.append(Stdout::default().with_layout(LineLayout::colored())),
                LogStyle::Text => d.append(Stdout::default().with_layout(LineLayout::default())),
                LogStyle::Json => d.append(Stdout::default().with_layout(JsonLayout::default())),
            }
        })
        .apply();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_line() {
        let now: Timestamp = "2024-03-01T12:30:45.123456Z".parse().unwrap();

        let line = LineLayout::default()
            .line(
                now,
                &Record::builder()
                    .level(Level::Warn)
                    .target("rate_limit::manager::inner")
                    .args(format_args!("Rate limit 'strict' reached"))
                    .build(),
            )
            .unwrap();

        insta::assert_snapshot!(
            line,
            @"2024-03-01T12:30:45.123456Z  WARN  rate_limit::manager: Rate limit 'strict' reached"
        );
    }

    #[test]
    fn colored_level() {
        let now: Timestamp = "2024-03-01T12:30:45Z".parse().unwrap();

        let line = LineLayout::colored()
            .line(
                now,
                &Record::builder()
                    .level(Level::Error)
                    .target("server")
                    .args(format_args!("boom"))
                    .build(),
            )
            .unwrap();

        assert_eq!(line, "2024-03-01T12:30:45.000000Z \x1b[31mERROR\x1b[0m  server: boom");
    }
}
