//! Tolerant field deserialisers for model-produced JSON.
//!
//! A model is told the exact schema but nothing guarantees it obeys: numbers
//! arrive as strings (`"0.8"`, `"45%"`, `"12 km"`), booleans as `"yes"`, lists
//! as a single string, whole sub-records as `null`. Every helper here accepts any JSON
//! value and never fails. A value that cannot be interpreted becomes `None`
//! (serialised as `null`) so the record keeps its full key set.
//!
//! All helpers are used as `#[serde(default, deserialize_with = "...")]` so a
//! missing key takes the same path as an unusable one.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::{Number, Value};

/// First numeric token in free text, with optional sign, digit grouping and
/// fraction.
static RE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?(?:\d[\d,_]*(?:\.\d+)?|\.\d+)").unwrap());

/// Free text. Numbers and booleans are stringified.
pub(crate) fn text<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_text(Value::deserialize(d)?))
}

/// A number, kept exactly as the model wrote it (integers stay integers).
/// Strings yield their first numeric token: `"1,200"`, `"45%"`, `"6 months"`,
/// `"EGP 150,000"`.
pub(crate) fn number<'de, D>(d: D) -> Result<Option<Number>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => Some(n),
        Value::String(s) => parse_number(&s),
        _ => None,
    })
}

/// A boolean, also accepting `"yes"`/`"no"`, `"true"`/`"false"`, `1`/`0`.
pub(crate) fn flag<'de, D>(d: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => Some(b),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 1.0 => Some(true),
            Some(x) if x == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// A list of strings. A bare string becomes a one-element list; non-text
/// items inside an array are dropped.
pub(crate) fn text_list<'de, D>(d: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => Some(items.into_iter().filter_map(value_to_text).collect()),
        Value::String(s) => Some(vec![s]),
        _ => None,
    })
}

/// A list of sub-records. Items that are not JSON objects are dropped.
pub(crate) fn record_list<'de, D, T>(d: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter(Value::is_object)
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        ),
        _ => None,
    })
}

/// A nested sub-record. `null` or any non-object value yields the all-null
/// default so callers always see every leaf key.
pub(crate) fn record<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    match Value::deserialize(d)? {
        v @ Value::Object(_) => serde_json::from_value(v).map_err(D::Error::custom),
        _ => Ok(T::default()),
    }
}

fn value_to_text(v: Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<Number> {
    let m = RE_NUMBER.find(s)?;
    let mut token = m.as_str();
    // A hyphen glued to a word ("EGP-150") is punctuation, not a sign.
    let glued = s[..m.start()].chars().next_back().is_some_and(char::is_alphanumeric);
    if let Some(rest) = token.strip_prefix('+') {
        token = rest;
    } else if glued {
        token = token.strip_prefix('-').unwrap_or(token);
    }
    let digits: String = token.chars().filter(|c| !matches!(c, ',' | '_')).collect();
    if !digits.contains('.') {
        if let Ok(i) = digits.parse::<i64>() {
            return Some(i.into());
        }
    }
    digits.parse::<f64>().ok().and_then(Number::from_f64)
}
