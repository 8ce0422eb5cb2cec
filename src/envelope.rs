//! Stored envelope formats and format detection.
//!
//! Envelopes are persisted by the caller as opaque strings. Three shapes
//! exist:
//!
//! ```text
//! single-layer  {"ciphertext","iv","hmac"}
//! layered       {"ciphertext","layers":2,"iv1","iv2","hmac1","hmac2"}
//!               + {"layers":3,"salt","iv3","hmac3"} with a password
//! legacy        anything else (bare base64 cipher string)
//! ```
//!
//! [`classify`] decides the shape without ever failing; [`Envelope::parse`]
//! turns a string into the tagged union and [`Envelope::to_json`] is the
//! matching serialize step. Callers never guess the format.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StrataError};
use crate::stack::Layer;

/// The detected shape of a stored string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Legacy,
    SingleLayer,
    Layered,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::SingleLayer => write!(f, "single-layer"),
            Self::Layered => write!(f, "layered"),
        }
    }
}

/// One authenticated encryption under one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleLayerEnvelope {
    pub ciphertext: String,
    pub iv: String,
    pub hmac: String,
}

/// Two or three sequential rounds. Round `n` is described by `ivN`/`hmacN`;
/// round 1 is innermost and the highest round outermost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayeredEnvelope {
    /// Output of the outermost round.
    pub ciphertext: String,
    pub layers: u8,
    pub iv1: String,
    pub iv2: String,
    pub hmac1: String,
    pub hmac2: String,
    /// PBKDF2 salt of the password round; present only when `layers == 3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac3: Option<String>,
}

impl LayeredEnvelope {
    /// Check that `layers` agrees with the optional password-round fields.
    pub fn validate(&self) -> Result<()> {
        let password_fields = [&self.salt, &self.iv3, &self.hmac3];
        match self.layers {
            2 if password_fields.iter().all(|f| f.is_none()) => Ok(()),
            3 if password_fields.iter().all(|f| f.is_some()) => Ok(()),
            2 => Err(StrataError::MalformedEnvelope(
                "password-round fields on a 2-layer envelope".into(),
            )),
            3 => Err(StrataError::MalformedEnvelope(
                "3-layer envelope without salt, iv3 and hmac3".into(),
            )),
            n => Err(StrataError::MalformedEnvelope(format!(
                "unsupported layer count {n}"
            ))),
        }
    }

    pub fn has_password_layer(&self) -> bool {
        self.layers == 3
    }

    /// The `(iv, hmac)` pair recorded for `layer`.
    pub(crate) fn round(&self, layer: Layer) -> Result<(&str, &str)> {
        let missing = || StrataError::MalformedEnvelope(format!("missing round {}", layer as u8));
        match layer {
            Layer::MachinePrimary => Ok((self.iv1.as_str(), self.hmac1.as_str())),
            Layer::MachineSecondary => Ok((self.iv2.as_str(), self.hmac2.as_str())),
            Layer::Password => Ok((
                self.iv3.as_deref().ok_or_else(missing)?,
                self.hmac3.as_deref().ok_or_else(missing)?,
            )),
        }
    }
}

/// A parsed stored string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Single(SingleLayerEnvelope),
    Layered(LayeredEnvelope),
    Legacy(String),
}

impl Envelope {
    /// Classify `raw` and deserialize it into the matching variant.
    ///
    /// Only inconsistent JSON is an error; strings that are not envelopes
    /// at all become [`Envelope::Legacy`].
    pub fn parse(raw: &str) -> Result<Self> {
        match classify(raw) {
            Format::Legacy => Ok(Self::Legacy(raw.to_string())),
            Format::SingleLayer => serde_json::from_str(raw)
                .map(Self::Single)
                .map_err(|e| StrataError::MalformedEnvelope(e.to_string())),
            Format::Layered => {
                let layered: LayeredEnvelope = serde_json::from_str(raw)
                    .map_err(|e| StrataError::MalformedEnvelope(e.to_string()))?;
                layered.validate()?;
                Ok(Self::Layered(layered))
            }
        }
    }

    pub fn format(&self) -> Format {
        match self {
            Self::Single(_) => Format::SingleLayer,
            Self::Layered(_) => Format::Layered,
            Self::Legacy(_) => Format::Legacy,
        }
    }

    /// Serialize back to the stored string form.
    pub fn to_json(&self) -> Result<String> {
        let encoded = match self {
            Self::Single(envelope) => serde_json::to_string(envelope),
            Self::Layered(envelope) => serde_json::to_string(envelope),
            Self::Legacy(raw) => return Ok(raw.clone()),
        };
        encoded.map_err(|e| StrataError::MalformedEnvelope(e.to_string()))
    }
}

impl From<SingleLayerEnvelope> for Envelope {
    fn from(envelope: SingleLayerEnvelope) -> Self {
        Self::Single(envelope)
    }
}

impl From<LayeredEnvelope> for Envelope {
    fn from(envelope: LayeredEnvelope) -> Self {
        Self::Layered(envelope)
    }
}

fn has_string(map: &Map<String, Value>, field: &str) -> bool {
    map.get(field).is_some_and(Value::is_string)
}

/// Decide which decode path `raw` belongs to. Never fails.
///
/// - not a JSON object → [`Format::Legacy`]
/// - `layers` plus the round-2 `iv2`/`hmac2` fields → [`Format::Layered`]
/// - `iv` and `hmac` → [`Format::SingleLayer`]
/// - any other JSON → [`Format::Legacy`]
pub fn classify(raw: &str) -> Format {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        return Format::Legacy;
    };

    if map.contains_key("layers") && has_string(&map, "iv2") && has_string(&map, "hmac2") {
        Format::Layered
    } else if has_string(&map, "iv") && has_string(&map, "hmac") {
        Format::SingleLayer
    } else {
        Format::Legacy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE: &str = r#"{"ciphertext":"Y3Q=","iv":"aXY=","hmac":"bWFj"}"#;
    const LAYERED_2: &str =
        r#"{"ciphertext":"Y3Q=","layers":2,"iv1":"a","iv2":"b","hmac1":"c","hmac2":"d"}"#;
    const LAYERED_3: &str = r#"{"ciphertext":"Y3Q=","layers":3,"iv1":"a","iv2":"b","hmac1":"c","hmac2":"d","salt":"s","iv3":"e","hmac3":"f"}"#;

    #[test]
    fn test_classify_shapes() {
        assert_eq!(classify(SINGLE), Format::SingleLayer);
        assert_eq!(classify(LAYERED_2), Format::Layered);
        assert_eq!(classify(LAYERED_3), Format::Layered);
        assert_eq!(classify("U2FsdGVkX1+abc=="), Format::Legacy);
    }

    #[test]
    fn test_classify_never_panics_on_junk() {
        for raw in ["", "{", "{\"iv\":", "null", "42", "[1,2]", "\"str\"", "{}"] {
            assert_eq!(classify(raw), Format::Legacy, "input {raw:?}");
        }
        // JSON with the right keys but wrong types is not an envelope.
        assert_eq!(classify(r#"{"iv":1,"hmac":2}"#), Format::Legacy);
    }

    #[test]
    fn test_parse_and_serialize() {
        let parsed = Envelope::parse(LAYERED_3).unwrap();
        assert_eq!(parsed.format(), Format::Layered);
        let again = Envelope::parse(&parsed.to_json().unwrap()).unwrap();
        assert_eq!(parsed, again);

        let two = Envelope::parse(LAYERED_2).unwrap().to_json().unwrap();
        assert!(!two.contains("salt"));
        assert!(!two.contains("iv3"));

        let legacy = Envelope::parse("opaque").unwrap();
        assert_eq!(legacy.to_json().unwrap(), "opaque");
    }

    #[test]
    fn test_parse_rejects_inconsistent_layers() {
        let missing_salt =
            r#"{"ciphertext":"x","layers":3,"iv1":"a","iv2":"b","hmac1":"c","hmac2":"d","iv3":"e","hmac3":"f"}"#;
        assert!(matches!(
            Envelope::parse(missing_salt),
            Err(StrataError::MalformedEnvelope(_))
        ));

        let stray_salt =
            r#"{"ciphertext":"x","layers":2,"iv1":"a","iv2":"b","hmac1":"c","hmac2":"d","salt":"s"}"#;
        assert!(Envelope::parse(stray_salt).is_err());

        let four =
            r#"{"ciphertext":"x","layers":4,"iv1":"a","iv2":"b","hmac1":"c","hmac2":"d"}"#;
        assert!(Envelope::parse(four).is_err());
    }

    #[test]
    fn test_single_without_ciphertext_is_malformed() {
        assert!(matches!(
            Envelope::parse(r#"{"iv":"a","hmac":"b"}"#),
            Err(StrataError::MalformedEnvelope(_))
        ));
    }
}
