//! Deserialization helpers shared by the configuration types.
//!
//! YAML mappings are kept in document order by deserializing them into
//! `Vec<(String, V)>`; header and capture ordering is observable.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::marker::PhantomData;

/// Deserialize a mapping into an ordered list of entries.
pub fn ordered_map<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct OrderedMapVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<ScalarString, V>()? {
                entries.push((key.0, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_any(OrderedMapVisitor(PhantomData))
}

/// Deserialize a mapping of scalar values (strings, numbers, booleans) into
/// ordered string pairs.
pub fn ordered_string_map<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Vec<(String, ScalarString)> = ordered_map(deserializer)?;
    Ok(entries.into_iter().map(|(k, v)| (k, v.0)).collect())
}

/// Deserialize an optional scalar into a string.
pub fn optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<ScalarString>::deserialize(deserializer)?.map(|s| s.0))
}

/// Deserialize response content: strings are kept verbatim, structured
/// values are serialized as JSON.
pub fn content<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.map(|v| match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }))
}

/// A scalar (string, number or boolean) read as its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarString(pub String);

impl<'de> Deserialize<'de> for ScalarString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarVisitor;

        impl<'de> Visitor<'de> for ScalarVisitor {
            type Value = ScalarString;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string, number or boolean")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(ScalarString(v))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "ordered_string_map")]
        headers: Vec<(String, String)>,
    }

    #[test]
    fn test_ordered_map_keeps_document_order() {
        let yaml = "headers:\n  Zeta: z\n  Alpha: 1\n  Mid: true\n";
        let holder: Holder = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            holder.headers,
            vec![
                ("Zeta".to_string(), "z".to_string()),
                ("Alpha".to_string(), "1".to_string()),
                ("Mid".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_ordered_map_missing_is_empty() {
        let holder: Holder = serde_yaml::from_str("{}").unwrap();
        assert!(holder.headers.is_empty());
    }
}
