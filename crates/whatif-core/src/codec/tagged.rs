//! Tagged JSON encoding for [`RichValue`].
//!
//! ```text
//! {"json": <plain JSON>, "meta": {"values": {"<path>": "<tag>"}}}
//! ```
//!
//! `<path>` is the dotted location of the annotated value (`""` for the
//! root). Segments are object keys or array indices; a literal `.` or `\` in a
//! key is escaped with a backslash, and an empty key is written as `\e`.
//! `meta` is omitted when nothing needed a tag.
//!
//! Tags: `Date` (ISO string), `bigint` (decimal string), `undefined` (`null`),
//! `set` (array of members), `map` (array of `[key, value]` pairs).

use super::value::{format_date, parse_date, RichValue};
use super::Transformer;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const TAG_DATE: &str = "Date";
const TAG_BIGINT: &str = "bigint";
const TAG_UNDEFINED: &str = "undefined";
const TAG_SET: &str = "set";
const TAG_MAP: &str = "map";

/// Wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub json: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Type annotations keyed by dotted path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// The default transformer used on both transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedJson;

impl Transformer for TaggedJson {
    fn name(&self) -> &'static str {
        "tagged-json"
    }

    fn serialize(&self, value: &RichValue) -> Result<Value> {
        let mut annotations = BTreeMap::new();
        let json = encode(value, "", &mut annotations);
        let envelope = Envelope {
            json,
            meta: if annotations.is_empty() {
                None
            } else {
                Some(Meta {
                    values: annotations,
                })
            },
        };
        Ok(serde_json::to_value(envelope)?)
    }

    fn deserialize(&self, wire: Value) -> Result<RichValue> {
        let envelope: Envelope = serde_json::from_value(wire).map_err(|e| BridgeError::Codec {
            message: format!("Malformed envelope: {}", e),
        })?;
        let annotations = envelope.meta.map(|m| m.values).unwrap_or_default();
        decode(envelope.json, "", &annotations)
    }
}

fn escape_segment(segment: &str) -> String {
    if segment.is_empty() {
        return "\\e".to_string();
    }
    segment.replace('\\', "\\\\").replace('.', "\\.")
}

fn child_path(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        escape_segment(segment)
    } else {
        format!("{}.{}", parent, escape_segment(segment))
    }
}

fn encode(value: &RichValue, path: &str, annotations: &mut BTreeMap<String, String>) -> Value {
    match value {
        RichValue::Undefined => {
            annotations.insert(path.to_string(), TAG_UNDEFINED.to_string());
            Value::Null
        }
        RichValue::Null => Value::Null,
        RichValue::Bool(b) => Value::Bool(*b),
        RichValue::Number(n) => Value::Number(n.clone()),
        RichValue::String(s) => Value::String(s.clone()),
        RichValue::BigInt(n) => {
            annotations.insert(path.to_string(), TAG_BIGINT.to_string());
            Value::String(n.to_string())
        }
        RichValue::Date(d) => {
            annotations.insert(path.to_string(), TAG_DATE.to_string());
            Value::String(format_date(d))
        }
        RichValue::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| encode(item, &child_path(path, &i.to_string()), annotations))
                .collect(),
        ),
        RichValue::Set(items) => {
            annotations.insert(path.to_string(), TAG_SET.to_string());
            Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| encode(item, &child_path(path, &i.to_string()), annotations))
                    .collect(),
            )
        }
        RichValue::Map(entries) => {
            annotations.insert(path.to_string(), TAG_MAP.to_string());
            Value::Array(
                entries
                    .iter()
                    .enumerate()
                    .map(|(i, (k, v))| {
                        let entry = child_path(path, &i.to_string());
                        Value::Array(vec![
                            encode(k, &child_path(&entry, "0"), annotations),
                            encode(v, &child_path(&entry, "1"), annotations),
                        ])
                    })
                    .collect(),
            )
        }
        RichValue::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), encode(v, &child_path(path, k), annotations)))
                .collect(),
        ),
    }
}

fn decode(json: Value, path: &str, annotations: &BTreeMap<String, String>) -> Result<RichValue> {
    let Some(tag) = annotations.get(path) else {
        return Ok(match json {
            Value::Array(items) => RichValue::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| decode(item, &child_path(path, &i.to_string()), annotations))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => RichValue::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        let decoded = decode(v, &child_path(path, &k), annotations)?;
                        Ok((k, decoded))
                    })
                    .collect::<Result<_>>()?,
            ),
            other => other.into(),
        });
    };

    match tag.as_str() {
        TAG_UNDEFINED => Ok(RichValue::Undefined),
        TAG_DATE => {
            let raw = expect_string(json, path, tag)?;
            Ok(RichValue::Date(parse_date(&raw)?))
        }
        TAG_BIGINT => {
            let raw = expect_string(json, path, tag)?;
            raw.parse::<i128>()
                .map(RichValue::BigInt)
                .map_err(|e| BridgeError::Codec {
                    message: format!("Invalid bigint at {:?}: {}", path, e),
                })
        }
        TAG_SET => {
            let items = expect_array(json, path, tag)?;
            Ok(RichValue::Set(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| decode(item, &child_path(path, &i.to_string()), annotations))
                    .collect::<Result<_>>()?,
            ))
        }
        TAG_MAP => {
            let entries = expect_array(json, path, tag)?;
            let mut decoded = Vec::with_capacity(entries.len());
            for (i, entry) in entries.into_iter().enumerate() {
                let entry_path = child_path(path, &i.to_string());
                let pair = expect_array(entry, &entry_path, "map entry")?;
                let [k, v]: [Value; 2] = pair.try_into().map_err(|_| BridgeError::Codec {
                    message: format!("Map entry at {:?} is not a [key, value] pair", entry_path),
                })?;
                decoded.push((
                    decode(k, &child_path(&entry_path, "0"), annotations)?,
                    decode(v, &child_path(&entry_path, "1"), annotations)?,
                ));
            }
            Ok(RichValue::Map(decoded))
        }
        unknown => Err(BridgeError::Codec {
            message: format!("Unknown type tag {:?} at {:?}", unknown, path),
        }),
    }
}

fn expect_string(json: Value, path: &str, tag: &str) -> Result<String> {
    match json {
        Value::String(s) => Ok(s),
        other => Err(BridgeError::Codec {
            message: format!("Expected string for {} at {:?}, got {}", tag, path, other),
        }),
    }
}

fn expect_array(json: Value, path: &str, tag: &str) -> Result<Vec<Value>> {
    match json {
        Value::Array(items) => Ok(items),
        other => Err(BridgeError::Codec {
            message: format!("Expected array for {} at {:?}, got {}", tag, path, other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn roundtrip(value: RichValue) -> RichValue {
        let wire = TaggedJson.serialize(&value).unwrap();
        TaggedJson.deserialize(wire).unwrap()
    }

    #[test]
    fn test_plain_json_has_no_meta() {
        let wire = TaggedJson
            .serialize(&RichValue::from(json!({"a": [1, 2], "b": "x"})))
            .unwrap();
        assert_eq!(wire, json!({"json": {"a": [1, 2], "b": "x"}}));
    }

    #[test]
    fn test_date_annotation_path() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let value = RichValue::object([(
            "apps",
            RichValue::Array(vec![RichValue::object([("modified", RichValue::Date(at))])]),
        )]);
        let wire = TaggedJson.serialize(&value).unwrap();
        assert_eq!(wire["meta"]["values"]["apps.0.modified"], json!("Date"));
        assert_eq!(
            wire["json"]["apps"][0]["modified"],
            json!("2026-03-04T05:06:07.000Z")
        );
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn test_root_date() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let wire = TaggedJson.serialize(&RichValue::Date(at)).unwrap();
        assert_eq!(wire["meta"]["values"][""], json!("Date"));
        assert_eq!(roundtrip(RichValue::Date(at)), RichValue::Date(at));
    }

    #[test]
    fn test_set_map_bigint_undefined_survive() {
        let at = Utc.with_ymd_and_hms(2026, 2, 2, 2, 2, 2).unwrap();
        let value = RichValue::object([
            (
                "tags",
                RichValue::Set(vec!["a".into(), RichValue::BigInt(1 << 70)]),
            ),
            (
                "seen",
                RichValue::Map(vec![(RichValue::from("alice"), RichValue::Date(at))]),
            ),
            ("missing", RichValue::Undefined),
            ("nothing", RichValue::Null),
        ]);
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn test_keys_with_dots_are_escaped() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let value = RichValue::object([("a.b", RichValue::object([("c", RichValue::Date(at))]))]);
        let wire = TaggedJson.serialize(&value).unwrap();
        assert_eq!(wire["meta"]["values"]["a\\.b.c"], json!("Date"));
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn test_empty_key_does_not_collide_with_root() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let value = RichValue::object([("", RichValue::Date(at))]);
        let wire = TaggedJson.serialize(&value).unwrap();
        assert_eq!(wire["meta"]["values"], json!({"\\e": "Date"}));
        assert_eq!(roundtrip(value.clone()), value);

        let nested = RichValue::object([("", RichValue::object([("", RichValue::BigInt(7))]))]);
        assert_eq!(roundtrip(nested.clone()), nested);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let wire = json!({"json": 1, "meta": {"values": {"": "regexp"}}});
        assert!(TaggedJson.deserialize(wire).is_err());
    }

    #[test]
    fn test_envelope_required() {
        assert!(TaggedJson.deserialize(json!([1, 2, 3])).is_err());
    }
}
