use std::borrow::Cow;

use serde_json::Value;

use xviz_api::{DecodeError, Envelope, ParserConfig, TextEncoding};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Raw bytes → untyped envelope.
///
/// Decoding is total: a complete `Envelope` or a `DecodeError`, never a
/// partially populated one. The input slice is only read.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeDecoder {
    encoding: TextEncoding,
}

impl EnvelopeDecoder {
    pub fn new(config: &ParserConfig) -> Self {
        Self { encoding: config.encoding }
    }

    pub fn with_encoding(encoding: TextEncoding) -> Self {
        Self { encoding }
    }

    /// Bytes → text in the configured encoding. UTF-8 input borrows.
    pub fn decode_text<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, str>, DecodeError> {
        match self.encoding {
            TextEncoding::Utf8 => {
                let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                Ok(Cow::Borrowed(std::str::from_utf8(bytes)?))
            }
            TextEncoding::Utf16Le => {
                let bytes = bytes.strip_prefix(UTF16LE_BOM).unwrap_or(bytes);
                decode_utf16(bytes, u16::from_le_bytes).map(Cow::Owned)
            }
            TextEncoding::Utf16Be => {
                let bytes = bytes.strip_prefix(UTF16BE_BOM).unwrap_or(bytes);
                decode_utf16(bytes, u16::from_be_bytes).map(Cow::Owned)
            }
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope, DecodeError> {
        let text = self.decode_text(bytes)?;
        let value: Value = serde_json::from_str(&text)?;
        match value {
            Value::Array(elements) => {
                tracing::trace!(elements = elements.len(), bytes = bytes.len(), "decoded envelope");
                Ok(Envelope { elements })
            }
            other => Err(DecodeError::unrecognized(format!(
                "envelope must be an array of records, got {}",
                json_type(&other)
            ))),
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::malformed(format!(
            "utf-16 payload has odd length {}",
            bytes.len()
        )));
    }
    let units = bytes.chunks_exact(2).map(|c| unit([c[0], c[1]]));
    Ok(char::decode_utf16(units).collect::<Result<String, _>>()?)
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
