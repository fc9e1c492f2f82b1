//! Lenient serde deserializers for payloads produced by LLMs and partial updates.
//!
//! Extraction output is model-generated JSON: property maps routinely carry
//! numbers, booleans or nested objects where a string was asked for, and
//! sometimes the map is missing or replaced by another shape entirely. These
//! helpers coerce instead of failing the whole record.

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Deserialize a `HashMap<String, String>` leniently: every value is
/// stringified (`34` becomes `"34"`, `true` becomes `"true"`, objects become
/// their JSON text). Any non-map input yields an empty map.
pub fn string_map_lenient<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringMapVisitor;

    impl<'de> Visitor<'de> for StringMapVisitor {
        type Value = HashMap<String, String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map (or any value, which will default to empty HashMap)")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut result = HashMap::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((k, v)) = map.next_entry::<String, serde_json::Value>()? {
                let s = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                result.insert(k, s);
            }
            Ok(result)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            while seq.next_element::<de::IgnoredAny>()?.is_some() {}
            Ok(HashMap::new())
        }

        fn visit_i64<E: de::Error>(self, _v: i64) -> Result<Self::Value, E> {
            Ok(HashMap::new())
        }

        fn visit_u64<E: de::Error>(self, _v: u64) -> Result<Self::Value, E> {
            Ok(HashMap::new())
        }

        fn visit_f64<E: de::Error>(self, _v: f64) -> Result<Self::Value, E> {
            Ok(HashMap::new())
        }

        fn visit_str<E: de::Error>(self, _v: &str) -> Result<Self::Value, E> {
            Ok(HashMap::new())
        }

        fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Self::Value, E> {
            Ok(HashMap::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(HashMap::new())
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(HashMap::new())
        }
    }

    deserializer.deserialize_any(StringMapVisitor)
}

/// Deserialize a nullable field so that an explicit `null` is distinguishable
/// from an absent one. Use together with `#[serde(default)]`:
/// absent → `None`, `null` → `Some(None)`, value → `Some(Some(v))`.
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Props {
        #[serde(default, deserialize_with = "string_map_lenient")]
        properties: HashMap<String, String>,
    }

    #[derive(Debug, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        note: Option<Option<String>>,
    }

    #[test]
    fn test_string_map_stringifies_values() {
        let json = r#"{"properties": {"n": 1.5, "flag": false, "nested": {"a": 1}, "s": "x"}}"#;
        let p: Props = serde_json::from_str(json).unwrap();
        assert_eq!(p.properties["n"], "1.5");
        assert_eq!(p.properties["flag"], "false");
        assert_eq!(p.properties["nested"], r#"{"a":1}"#);
        assert_eq!(p.properties["s"], "x");
    }

    #[test]
    fn test_string_map_non_map_becomes_empty() {
        for json in [
            r#"{"properties": [1, 2]}"#,
            r#"{"properties": "text"}"#,
            r#"{"properties": null}"#,
            r#"{}"#,
        ] {
            let p: Props = serde_json::from_str(json).unwrap();
            assert!(p.properties.is_empty(), "input: {json}");
        }
    }

    #[test]
    fn test_double_option_states() {
        let p: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(p.note, None);
        let p: Patch = serde_json::from_str(r#"{"note": null}"#).unwrap();
        assert_eq!(p.note, Some(None));
        let p: Patch = serde_json::from_str(r#"{"note": "hi"}"#).unwrap();
        assert_eq!(p.note, Some(Some("hi".to_string())));
    }
}
