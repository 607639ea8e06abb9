//! CLI argument parsing using clap.

use clap::{
    Parser,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::capabilities::StreamFeature;
use crate::config::{ConfigError, DEFAULT_LATENCY_SECS, WatchRequest};
use crate::io::OutputFormat;
use crate::types::EventId;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser, Debug)]
#[command(
    name = "fsevent_watch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch paths and stream filesystem change events to stdout",
    long_about = "Watch paths and stream filesystem change events to stdout.\n\n\
                  Each delivered batch is written as one record in the selected format \
                  and flushed immediately. Diagnostics go to stderr.",
    after_help = "Environment:\n  \
                  RUST_LOG                           Log filter (overrides settings)\n  \
                  FSEVENT_WATCH_LOGGING__DEFAULT     Default log level [default: warn]\n  \
                  FSEVENT_WATCH_QUEUE_CAPACITY       Event queue capacity [default: 1024]",
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Event id to start from, or "now" (decimal, 0x hex or 0 octal)
    #[arg(
        short = 's',
        long = "since-when",
        value_name = "ID",
        default_value = "now",
        value_parser = parse_event_id
    )]
    pub since_when: EventId,

    /// Seconds to coalesce events before delivering a batch
    #[arg(
        short = 'l',
        long,
        value_name = "SECONDS",
        default_value_t = DEFAULT_LATENCY_SECS,
        value_parser = parse_latency
    )]
    pub latency: f64,

    /// Deliver the first event after a quiet period immediately
    #[arg(short = 'n', long)]
    pub no_defer: bool,

    /// Report changes to the watched paths themselves
    #[arg(short = 'r', long)]
    pub watch_root: bool,

    /// Ignore changes made by this process
    #[arg(short = 'i', long)]
    pub ignore_self: bool,

    /// Report individual files instead of their directories
    #[arg(short = 'F', long)]
    pub file_events: bool,

    /// Output format: classic, niw, tnetstring or otnetstring
    #[arg(
        short = 'f',
        long,
        value_name = "FORMAT",
        default_value = "classic",
        value_parser = parse_format
    )]
    pub format: OutputFormat,

    /// Paths to watch [default: .]
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,
}

impl Cli {
    /// Requested features in flag order.
    pub fn features(&self) -> Vec<StreamFeature> {
        StreamFeature::ALL
            .into_iter()
            .filter(|feature| match feature {
                StreamFeature::NoDefer => self.no_defer,
                StreamFeature::WatchRoot => self.watch_root,
                StreamFeature::IgnoreSelf => self.ignore_self,
                StreamFeature::FileEvents => self.file_events,
            })
            .collect()
    }

    pub fn into_request(self) -> WatchRequest {
        WatchRequest {
            features: self.features(),
            paths: self.paths,
            since: self.since_when,
            latency_secs: self.latency,
            format: self.format,
        }
    }
}

/// Parse an event id the way `strtoull(s, NULL, 0)` reads it, plus `now`.
pub fn parse_event_id(s: &str) -> Result<EventId, ConfigError> {
    if s.eq_ignore_ascii_case("now") {
        return Ok(EventId::SINCE_NOW);
    }

    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(oct) = s.strip_prefix("0o") {
        (oct, 8)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };

    u64::from_str_radix(digits, radix)
        .map(EventId::new)
        .map_err(|e| ConfigError::InvalidNumber {
            option: "--since-when",
            value: s.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a latency in seconds: finite and not negative.
pub fn parse_latency(s: &str) -> Result<f64, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidNumber {
        option: "--latency",
        value: s.to_string(),
        reason,
    };

    let secs: f64 = s.trim().parse().map_err(|e: std::num::ParseFloatError| invalid(e.to_string()))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(invalid("must be a finite number of seconds >= 0".to_string()));
    }
    Ok(secs)
}

pub fn parse_format(s: &str) -> Result<OutputFormat, ConfigError> {
    s.parse()
}
