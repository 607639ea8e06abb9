//! Batch encoders for the four output formats.
//!
//! Every format is a total function over `EventBatch`: any batch, including
//! the empty one, produces bytes. The caller writes the result and flushes
//! once per batch.

use std::str::FromStr;

use super::tnetstring::{self, Dialect, Value};
use crate::config::ConfigError;
use crate::types::{EventBatch, RawEvent};

/// Output format selected with `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    /// `<path>:` per event, one newline per batch
    #[default]
    Classic,
    /// `<flags>:<id>:<path>` per line, blank line after each batch
    Niw,
    /// One tnetstring dictionary per batch
    Tnetstring,
    /// One ordered, prefix-tagged tnetstring dictionary per batch
    Otnetstring,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Classic,
        OutputFormat::Niw,
        OutputFormat::Tnetstring,
        OutputFormat::Otnetstring,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Niw => "niw",
            Self::Tnetstring => "tnetstring",
            Self::Otnetstring => "otnetstring",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    /// Format names are matched exactly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.name() == s)
            .ok_or_else(|| ConfigError::UnknownFormat {
                name: s.to_string(),
            })
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode one batch in the given format.
pub fn format_batch(batch: &EventBatch, format: OutputFormat) -> Vec<u8> {
    match format {
        OutputFormat::Classic => classic(batch),
        OutputFormat::Niw => niw(batch),
        OutputFormat::Tnetstring => tnetstring::encode(&batch_value(batch), Dialect::TNetstring),
        OutputFormat::Otnetstring => {
            tnetstring::encode(&batch_value(batch), Dialect::OTNetstring)
        }
    }
}

fn classic(batch: &EventBatch) -> Vec<u8> {
    let mut out = Vec::new();
    for event in batch {
        out.extend_from_slice(event.path.as_bytes());
        out.push(b':');
    }
    out.push(b'\n');
    out
}

fn niw(batch: &EventBatch) -> Vec<u8> {
    let mut out = Vec::new();
    for event in batch {
        let line = format!("{}:{}:{}\n", event.flags.bits(), event.id.value(), event.path);
        out.extend_from_slice(line.as_bytes());
    }
    out.push(b'\n');
    out
}

/// The value model shared by both tnetstring dialects:
/// `{ "events": [ {path, flags, id}, ... ], "numEvents": n }`.
pub fn batch_value(batch: &EventBatch) -> Value {
    let events = batch.iter().map(event_value).collect();
    Value::Dict(vec![
        ("events".to_string(), Value::List(events)),
        ("numEvents".to_string(), Value::from(batch.len())),
    ])
}

fn event_value(event: &RawEvent) -> Value {
    Value::Dict(vec![
        ("path".to_string(), Value::from(event.path.as_str())),
        ("flags".to_string(), Value::from(event.flags.bits())),
        ("id".to_string(), Value::from(event.id.value())),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventFlags, EventId};

    #[test]
    fn test_format_names_parse() {
        for format in OutputFormat::ALL {
            assert_eq!(format.name().parse::<OutputFormat>().unwrap(), format);
        }
        let err = "bogus".parse::<OutputFormat>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFormat { ref name } if name == "bogus"));
        assert!("Classic".parse::<OutputFormat>().is_err());
    }

    fn event(path: &str, flags: u32, id: u64) -> RawEvent {
        RawEvent::new(path, EventFlags::from_bits_retain(flags), EventId::new(id))
    }

    fn synthetic(n: usize) -> EventBatch {
        (0..n)
            .map(|i| {
                event(
                    &format!("/tmp/watch/dir{}/file-{i}.txt", i % 7),
                    (i as u32).wrapping_mul(2_654_435_761) & 0x7_FFFF,
                    (i as u64) * 31 + 1_000_000,
                )
            })
            .collect::<Vec<_>>()
            .into()
    }

    const ALL: [OutputFormat; 4] = [
        OutputFormat::Classic,
        OutputFormat::Niw,
        OutputFormat::Tnetstring,
        OutputFormat::Otnetstring,
    ];

    #[test]
    fn test_classic_literal() {
        let batch = EventBatch::new(vec![event("/a", 0, 1), event("/b", 0, 2)]);
        assert_eq!(format_batch(&batch, OutputFormat::Classic), b"/a:/b:\n");
    }

    #[test]
    fn test_classic_empty_batch_is_lone_newline() {
        assert_eq!(format_batch(&EventBatch::default(), OutputFormat::Classic), b"\n");
    }

    #[test]
    fn test_niw_literal() {
        let batch = EventBatch::new(vec![event("/a", 256, 7)]);
        assert_eq!(format_batch(&batch, OutputFormat::Niw), b"256:7:/a\n\n");
    }

    #[test]
    fn test_niw_multiple_records() {
        let batch = EventBatch::new(vec![event("/a", 1, 2), event("/b c", 0x10100, 3)]);
        assert_eq!(
            format_batch(&batch, OutputFormat::Niw),
            b"1:2:/a\n65792:3:/b c\n\n"
        );
    }

    #[test]
    fn test_tnetstring_literal() {
        let batch = EventBatch::new(vec![event("/a", 256, 7)]);
        let expected: &[u8] =
            b"68:6:events,39:35:4:path,2:/a,5:flags,3:256#2:id,1:7#}]9:numEvents,1:1#}";
        assert_eq!(format_batch(&batch, OutputFormat::Tnetstring), expected);
    }

    #[test]
    fn test_otnetstring_literal() {
        let batch = EventBatch::new(vec![event("/a", 256, 7)]);
        let expected: &[u8] =
            b"68:{6:,events39:[35:{4:,path2:,/a5:,flags3:#2562:,id1:#79:,numEvents1:#1";
        assert_eq!(format_batch(&batch, OutputFormat::Otnetstring), expected);
    }

    #[test]
    fn test_every_format_is_total() {
        for format in ALL {
            assert!(!format_batch(&EventBatch::default(), format).is_empty());
            assert!(!format_batch(&synthetic(1000), format).is_empty());
        }
    }

    #[test]
    fn test_tnetstring_round_trip_preserves_order() {
        let batch = synthetic(250);
        for (format, dialect) in [
            (OutputFormat::Tnetstring, Dialect::TNetstring),
            (OutputFormat::Otnetstring, Dialect::OTNetstring),
        ] {
            let bytes = format_batch(&batch, format);
            let decoded = tnetstring::decode(&bytes, dialect).unwrap();

            assert_eq!(decoded.get("numEvents").and_then(Value::as_integer), Some(250));
            let events = decoded.get("events").and_then(Value::as_list).unwrap();
            assert_eq!(events.len(), batch.len());
            for (decoded, original) in events.iter().zip(batch.iter()) {
                assert_eq!(decoded.get("path").and_then(Value::as_str), Some(original.path.as_str()));
                assert_eq!(
                    decoded.get("flags").and_then(Value::as_integer),
                    Some(i128::from(original.flags.bits()))
                );
                assert_eq!(
                    decoded.get("id").and_then(Value::as_integer),
                    Some(i128::from(original.id.value()))
                );
            }
        }
    }

    #[test]
    fn test_tnetstring_paths_with_delimiters_and_multibyte_text() {
        let paths = ["/ü/日本語", "a:b", "c,d", "}e#", "", "/x]y~{", "12:x,"];
        let batch: EventBatch = paths
            .iter()
            .enumerate()
            .map(|(i, p)| event(p, 0x100, i as u64))
            .collect::<Vec<_>>()
            .into();

        for (format, dialect) in [
            (OutputFormat::Tnetstring, Dialect::TNetstring),
            (OutputFormat::Otnetstring, Dialect::OTNetstring),
        ] {
            let bytes = format_batch(&batch, format);
            let decoded = tnetstring::decode(&bytes, dialect).unwrap();

            assert_eq!(
                decoded.get("numEvents").and_then(Value::as_integer),
                Some(paths.len() as i128)
            );
            let decoded_paths: Vec<_> = decoded
                .get("events")
                .and_then(Value::as_list)
                .unwrap()
                .iter()
                .map(|e| e.get("path").and_then(Value::as_str))
                .collect();
            let expected: Vec<_> = paths.iter().map(|p| Some(*p)).collect();
            assert_eq!(decoded_paths, expected, "{format}");
        }
    }

    #[test]
    fn test_empty_batch_tnetstring() {
        let bytes = format_batch(&EventBatch::default(), OutputFormat::Tnetstring);
        assert_eq!(bytes, b"28:6:events,0:]9:numEvents,1:0#}");
    }

    #[test]
    fn test_tnetstring_dialects_differ() {
        let batch = synthetic(2);
        assert_ne!(
            format_batch(&batch, OutputFormat::Tnetstring),
            format_batch(&batch, OutputFormat::Otnetstring)
        );
    }

    #[test]
    fn test_max_event_id_survives_encoding() {
        let batch = EventBatch::new(vec![event("/x", 0, u64::MAX)]);
        let bytes = format_batch(&batch, OutputFormat::Tnetstring);
        let decoded = tnetstring::decode(&bytes, Dialect::TNetstring).unwrap();
        let events = decoded.get("events").and_then(Value::as_list).unwrap();
        assert_eq!(
            events[0].get("id").and_then(Value::as_integer),
            Some(i128::from(u64::MAX))
        );
    }

    #[test]
    fn test_format_names() {
        let names: Vec<&str> = ALL.iter().map(OutputFormat::name).collect();
        assert_eq!(names, vec!["classic", "niw", "tnetstring", "otnetstring"]);
        assert_eq!(OutputFormat::default(), OutputFormat::Classic);
    }
}
