//! Fixed-key message obfuscation.
//!
//! Each UTF-16 code unit of the text is XORed with the key's units, the
//! result is written out as UTF-8 and encoded with standard Base64. Browser
//! clients produce the same payloads, so both sides read each other's
//! messages. This only hides the text from casual inspection of the store;
//! it is not encryption and gives no confidentiality.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::constants::{
    DECODE_PLACEHOLDER, DEFAULT_OBFUSCATION_KEY, EMOJI_MARKER_PREFIX, STICKER_COUNT,
    STICKER_MARKER_PREFIX,
};
use crate::error::SharedError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscationKey(Vec<u16>);

impl ObfuscationKey {
    pub fn new(material: impl AsRef<str>) -> Result<Self, SharedError> {
        let units: Vec<u16> = material.as_ref().encode_utf16().collect();
        if units.is_empty() {
            return Err(SharedError::EmptyKey);
        }
        Ok(Self(units))
    }
}

impl Default for ObfuscationKey {
    fn default() -> Self {
        Self(DEFAULT_OBFUSCATION_KEY.encode_utf16().collect())
    }
}

fn xor(units: impl Iterator<Item = u16>, key: &ObfuscationKey) -> Vec<u16> {
    units.zip(key.0.iter().cycle()).map(|(u, k)| u ^ k).collect()
}

/// A key with non-ASCII units can split a surrogate pair; such units are
/// written as U+FFFD.
pub fn obfuscate(plaintext: &str, key: &ObfuscationKey) -> String {
    let mixed = String::from_utf16_lossy(&xor(plaintext.encode_utf16(), key));
    STANDARD.encode(mixed.as_bytes())
}

/// `None` when the payload is not Base64, not UTF-8, or does not unmix to
/// valid UTF-16.
pub fn try_deobfuscate(payload: &str, key: &ObfuscationKey) -> Option<String> {
    let bytes = STANDARD.decode(payload.trim()).ok()?;
    let mixed = String::from_utf8(bytes).ok()?;
    String::from_utf16(&xor(mixed.encode_utf16(), key)).ok()
}

/// Never fails: undecodable payloads become [`DECODE_PLACEHOLDER`].
pub fn deobfuscate(payload: &str, key: &ObfuscationKey) -> String {
    try_deobfuscate(payload, key).unwrap_or_else(|| DECODE_PLACEHOLDER.to_string())
}

// ---------------------------------------------------------------------------
// Tagged payloads
// ---------------------------------------------------------------------------

/// Decoded message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    /// Sticker index; `0` when the marker carries an unreadable index.
    Sticker(u32),
}

/// Payload for a sticker message. Markers are stored as-is.
pub fn sticker_marker(index: u32) -> Result<String, SharedError> {
    if !(1..=STICKER_COUNT).contains(&index) {
        return Err(SharedError::InvalidSticker(index));
    }
    Ok(format!("{EMOJI_MARKER_PREFIX}{index}"))
}

/// Recognise a tagged payload without attempting to decode it.
pub fn parse_marker(raw: &str) -> Option<u32> {
    let rest = raw
        .strip_prefix(EMOJI_MARKER_PREFIX)
        .or_else(|| raw.strip_prefix(STICKER_MARKER_PREFIX))?;
    Some(rest.trim().parse().unwrap_or(0))
}

pub fn is_marker(raw: &str) -> bool {
    parse_marker(raw).is_some()
}

/// Classify then decode a stored payload.
///
/// Markers are checked first. Older senders obfuscated markers like normal
/// text, so a decoded text that is itself a marker is a sticker too.
pub fn decode_body(raw: &str, key: &ObfuscationKey) -> Body {
    if let Some(index) = parse_marker(raw) {
        return Body::Sticker(index);
    }
    let text = deobfuscate(raw, key);
    match parse_marker(&text) {
        Some(index) => Body::Sticker(index),
        None => Body::Text(text),
    }
}
