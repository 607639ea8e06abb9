//! Length-prefixed, type-tagged serialization in two dialects.
//!
//! ```text
//! TNetstring   <len>:<payload><tag>     tags  , # ^ ! ~ ] }
//! OTNetstring  <len>:<tag><payload>     tags  , # ^ ! ~ [ {
//! ```
//!
//! `<len>` is the decimal byte length of `<payload>`. Container payloads are
//! the concatenation of their already-encoded children; dictionaries
//! alternate key and value. OTNetstring dictionaries are ordered, and this
//! encoder emits TNetstring dictionaries in insertion order as well.

use thiserror::Error;

/// Longest length prefix accepted by the decoder.
const MAX_LENGTH_DIGITS: usize = 20;

/// Concrete tag placement and tag alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Suffix-tagged TNetstring.
    TNetstring,
    /// Prefix-tagged ordered TNetstring.
    OTNetstring,
}

impl Dialect {
    fn list_tag(self) -> u8 {
        match self {
            Dialect::TNetstring => b']',
            Dialect::OTNetstring => b'[',
        }
    }

    fn dict_tag(self) -> u8 {
        match self {
            Dialect::TNetstring => b'}',
            Dialect::OTNetstring => b'{',
        }
    }
}

/// The value model shared by both dialects.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i128),
    Float(f64),
    String(String),
    List(Vec<Value>),
    /// Key/value pairs in insertion order.
    Dict(Vec<(String, Value)>),
}

impl Value {
    /// Look up a dictionary entry by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary keys in stored order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Value::Dict(entries) => entries.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        // usize is at most 64 bits on supported targets
        Value::Integer(n as i128)
    }
}

/// Decoding failures. Encoding is total and has no error type.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TnetstringError {
    #[error("Unexpected end of input at byte {offset}")]
    UnexpectedEof { offset: usize },

    #[error("Invalid length prefix at byte {offset}")]
    InvalidLength { offset: usize },

    #[error("Unknown type tag '{tag}' at byte {offset}")]
    UnknownTag { tag: char, offset: usize },

    #[error("Invalid {kind} payload: {payload}")]
    InvalidScalar { kind: &'static str, payload: String },

    #[error("String payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Dictionary key is not a string")]
    NonStringKey,

    #[error("Dictionary key has no value")]
    MissingValue,

    #[error("{count} trailing bytes after value")]
    TrailingBytes { count: usize },
}

/// Encode a value into a fresh buffer.
pub fn encode(value: &Value, dialect: Dialect) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, dialect, &mut out);
    out
}

/// Append the encoding of `value` to `out`.
pub fn encode_into(value: &Value, dialect: Dialect, out: &mut Vec<u8>) {
    match value {
        Value::Null => write_item(out, dialect, b'~', b""),
        Value::Bool(b) => {
            let text: &[u8] = if *b { b"true" } else { b"false" };
            write_item(out, dialect, b'!', text);
        }
        Value::Integer(n) => write_item(out, dialect, b'#', n.to_string().as_bytes()),
        Value::Float(f) => write_item(out, dialect, b'^', f.to_string().as_bytes()),
        Value::String(s) => write_item(out, dialect, b',', s.as_bytes()),
        Value::List(items) => {
            let mut payload = Vec::new();
            for item in items {
                encode_into(item, dialect, &mut payload);
            }
            write_item(out, dialect, dialect.list_tag(), &payload);
        }
        Value::Dict(entries) => {
            let mut payload = Vec::new();
            for (key, item) in entries {
                write_item(&mut payload, dialect, b',', key.as_bytes());
                encode_into(item, dialect, &mut payload);
            }
            write_item(out, dialect, dialect.dict_tag(), &payload);
        }
    }
}

fn write_item(out: &mut Vec<u8>, dialect: Dialect, tag: u8, payload: &[u8]) {
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b':');
    match dialect {
        Dialect::TNetstring => {
            out.extend_from_slice(payload);
            out.push(tag);
        }
        Dialect::OTNetstring => {
            out.push(tag);
            out.extend_from_slice(payload);
        }
    }
}

/// Decode exactly one value spanning all of `input`.
pub fn decode(input: &[u8], dialect: Dialect) -> Result<Value, TnetstringError> {
    let (value, consumed) = decode_prefix(input, dialect)?;
    if consumed != input.len() {
        return Err(TnetstringError::TrailingBytes {
            count: input.len() - consumed,
        });
    }
    Ok(value)
}

/// Decode one value from the front of `input`, returning it with the number
/// of bytes consumed. Lets callers split a stream of concatenated values.
pub fn decode_prefix(input: &[u8], dialect: Dialect) -> Result<(Value, usize), TnetstringError> {
    Decoder { input, dialect }.value_at(0)
}

struct Decoder<'a> {
    input: &'a [u8],
    dialect: Dialect,
}

impl Decoder<'_> {
    /// Returns the decoded value and the offset just past it.
    fn value_at(&self, start: usize) -> Result<(Value, usize), TnetstringError> {
        let (tag, payload_start, payload_end, next) = self.frame_at(start)?;
        let payload = &self.input[payload_start..payload_end];

        let value = match tag {
            b'~' => {
                if !payload.is_empty() {
                    return Err(invalid_scalar("null", payload));
                }
                Value::Null
            }
            b'!' => match payload {
                b"true" => Value::Bool(true),
                b"false" => Value::Bool(false),
                _ => return Err(invalid_scalar("boolean", payload)),
            },
            b'#' => std::str::from_utf8(payload)
                .ok()
                .and_then(|s| s.parse::<i128>().ok())
                .map(Value::Integer)
                .ok_or_else(|| invalid_scalar("integer", payload))?,
            b'^' => std::str::from_utf8(payload)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .map(Value::Float)
                .ok_or_else(|| invalid_scalar("float", payload))?,
            b',' | b'"' => Value::String(utf8(payload)?),
            t if t == self.dialect.list_tag() => {
                Value::List(self.children(payload_start, payload_end)?)
            }
            t if t == self.dialect.dict_tag() => {
                let mut items = self.children(payload_start, payload_end)?.into_iter();
                let mut entries = Vec::new();
                while let Some(key) = items.next() {
                    let Value::String(key) = key else {
                        return Err(TnetstringError::NonStringKey);
                    };
                    let item = items.next().ok_or(TnetstringError::MissingValue)?;
                    entries.push((key, item));
                }
                Value::Dict(entries)
            }
            other => {
                let offset = match self.dialect {
                    Dialect::TNetstring => payload_end,
                    Dialect::OTNetstring => payload_start - 1,
                };
                return Err(TnetstringError::UnknownTag {
                    tag: other as char,
                    offset,
                });
            }
        };

        Ok((value, next))
    }

    /// Parse `<len>:` and locate tag and payload.
    ///
    /// Returns `(tag, payload_start, payload_end, next_offset)`.
    fn frame_at(&self, start: usize) -> Result<(u8, usize, usize, usize), TnetstringError> {
        let rest = &self.input[start.min(self.input.len())..];
        let colon = rest
            .iter()
            .take(MAX_LENGTH_DIGITS + 1)
            .position(|b| *b == b':')
            .ok_or(if rest.len() <= MAX_LENGTH_DIGITS {
                TnetstringError::UnexpectedEof {
                    offset: self.input.len(),
                }
            } else {
                TnetstringError::InvalidLength { offset: start }
            })?;

        let digits = &rest[..colon];
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(TnetstringError::InvalidLength { offset: start });
        }
        let length: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(TnetstringError::InvalidLength { offset: start })?;

        let after_colon = start + colon + 1;
        let (tag_offset, payload_start) = match self.dialect {
            Dialect::TNetstring => (after_colon.checked_add(length), after_colon),
            Dialect::OTNetstring => (Some(after_colon), after_colon + 1),
        };
        let tag_offset = tag_offset.ok_or(TnetstringError::InvalidLength { offset: start })?;
        let payload_end = payload_start
            .checked_add(length)
            .ok_or(TnetstringError::InvalidLength { offset: start })?;
        let next = payload_end.max(tag_offset) + usize::from(self.dialect == Dialect::TNetstring);

        if next > self.input.len() {
            return Err(TnetstringError::UnexpectedEof {
                offset: self.input.len(),
            });
        }

        Ok((self.input[tag_offset], payload_start, payload_end, next))
    }

    fn children(&self, start: usize, end: usize) -> Result<Vec<Value>, TnetstringError> {
        let scoped = Decoder {
            input: &self.input[..end],
            dialect: self.dialect,
        };
        let mut items = Vec::new();
        let mut offset = start;
        while offset < end {
            let (item, next) = scoped.value_at(offset)?;
            items.push(item);
            offset = next;
        }
        Ok(items)
    }
}

fn utf8(payload: &[u8]) -> Result<String, TnetstringError> {
    String::from_utf8(payload.to_vec()).map_err(|_| TnetstringError::InvalidUtf8)
}

fn invalid_scalar(kind: &'static str, payload: &[u8]) -> TnetstringError {
    TnetstringError::InvalidScalar {
        kind,
        payload: String::from_utf8_lossy(payload).into_owned(),
    }
}
