//! Cheap extraction of a message's top-level `type` discriminator.
//!
//! Most upstream traffic is `response.audio.delta` and similar events that
//! carry large base64 audio payloads and never need rewriting. Instead of
//! building a full JSON tree for every frame, [`message_type`] walks the
//! top-level object with a streaming serde visitor: values of other keys are
//! skimmed with [`IgnoredAny`] (nothing is allocated) and the walk stops as
//! soon as the `type` value has been read. When `type` is the first key, as
//! it is for every event the realtime service emits, the audio payload is
//! never touched.
//!
//! The sniffer only borrows the buffer. It cannot move a read position, so a
//! full parse of the same buffer afterwards always starts from the first
//! byte.

use std::fmt;

use serde::Deserializer as _;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, Visitor};

/// Return the top-level `type` of a JSON message, or an empty string.
///
/// Malformed, truncated, non-object input and a non-string `type` value all
/// yield `""`. This never fails.
pub fn message_type(message: &[u8]) -> String {
    let mut found = None;
    let mut deserializer = serde_json::Deserializer::from_slice(message);

    // Stopping early leaves the deserializer inside the object, so serde_json
    // reports an error after the visitor returns. The slot is authoritative.
    let _ = deserializer.deserialize_map(TypeVisitor { slot: &mut found });

    found.unwrap_or_default()
}

struct TypeVisitor<'a> {
    slot: &'a mut Option<String>,
}

impl<'de> Visitor<'de> for TypeVisitor<'_> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        while let Some(is_type) = map.next_key_seed(TypeKey)? {
            if is_type {
                if let Ok(value) = map.next_value::<String>() {
                    *self.slot = Some(value);
                }
                return Ok(());
            }
            map.next_value::<IgnoredAny>()?;
        }
        Ok(())
    }
}

/// Key seed that answers "is this key `type`?" without allocating.
struct TypeKey;

impl<'de> DeserializeSeed<'de> for TypeKey {
    type Value = bool;

    fn deserialize<D>(self, deserializer: D) -> Result<bool, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_str(self)
    }
}

impl<'de> Visitor<'de> for TypeKey {
    type Value = bool;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an object key")
    }

    fn visit_str<E>(self, key: &str) -> Result<bool, E>
    where
        E: de::Error,
    {
        Ok(key == "type")
    }
}
