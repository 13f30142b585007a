use serde::{Deserialize, Deserializer};

/// Distinguishes an omitted field from an explicit `null` in update payloads.
///
/// Use together with `#[serde(default)]`: omitted → `None`,
/// `null` → `Some(None)`, value → `Some(Some(value))`.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trims a string and turns blanks into `None`.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "nullable")]
        city: Option<Option<String>>,
    }

    #[test]
    fn omitted_null_and_value_are_distinct() {
        let omitted: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(omitted.city, None);

        let cleared: Patch = serde_json::from_str(r#"{"city":null}"#).unwrap();
        assert_eq!(cleared.city, Some(None));

        let set: Patch = serde_json::from_str(r#"{"city":"Köln"}"#).unwrap();
        assert_eq!(set.city, Some(Some("Köln".to_string())));
    }

    #[test]
    fn blanks_become_none() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some(" 0221 ".into())), Some("0221".into()));
    }
}
