//! Sparse document representation for the secondary store

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A value inside a document.
///
/// Timestamps are native values (EJSON `$date`), never strings, so range
/// queries on the document side stay correct.
#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Array(Vec<DocValue>),
}

impl From<String> for DocValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for DocValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for DocValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for DocValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for DocValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for DocValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for DocValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// Calendar dates are stored as midnight UTC timestamps
impl From<NaiveDate> for DocValue {
    fn from(value: NaiveDate) -> Self {
        Self::Timestamp(value.and_time(NaiveTime::MIN).and_utc())
    }
}

impl From<Vec<String>> for DocValue {
    fn from(value: Vec<String>) -> Self {
        Self::Array(value.into_iter().map(Self::Text).collect())
    }
}

/// A document with camelCase keys; absent keys mean "no value"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: BTreeMap<String, DocValue>,
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field
    pub fn put(&mut self, key: &str, value: impl Into<DocValue>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Set a field only when a value is present; `None` is dropped, not nulled
    pub fn put_opt<T: Into<DocValue>>(&mut self, key: &str, value: Option<T>) {
        if let Some(value) = value {
            self.put(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&DocValue> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<DocValue> {
        self.fields.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy every field of `other` over this document
    pub fn merge(&mut self, other: &Self) {
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Whether every field of `filter` is present here with an equal value
    pub fn matches(&self, filter: &Self) -> bool {
        filter
            .fields
            .iter()
            .all(|(key, value)| self.fields.get(key) == Some(value))
    }

    pub fn text(&self, key: &str) -> Result<String> {
        self.opt_text(key)?.ok_or_else(|| missing(key))
    }

    pub fn opt_text(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(DocValue::Text(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key, "text")),
        }
    }

    pub fn int(&self, key: &str) -> Result<i64> {
        self.opt_int(key)?.ok_or_else(|| missing(key))
    }

    pub fn opt_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(DocValue::Int(value)) => Ok(Some(*value)),
            Some(_) => Err(wrong_type(key, "integer")),
        }
    }

    pub fn float(&self, key: &str) -> Result<f64> {
        self.opt_float(key)?.ok_or_else(|| missing(key))
    }

    /// Integers are widened; document stores often drop the fractional part of whole numbers
    #[allow(clippy::cast_precision_loss)]
    pub fn opt_float(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(DocValue::Float(value)) => Ok(Some(*value)),
            Some(DocValue::Int(value)) => Ok(Some(*value as f64)),
            Some(_) => Err(wrong_type(key, "number")),
        }
    }

    /// Missing booleans read as `false`
    pub fn flag(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            None => Ok(false),
            Some(DocValue::Bool(value)) => Ok(*value),
            Some(_) => Err(wrong_type(key, "boolean")),
        }
    }

    pub fn timestamp(&self, key: &str) -> Result<DateTime<Utc>> {
        self.opt_timestamp(key)?.ok_or_else(|| missing(key))
    }

    pub fn opt_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        match self.get(key) {
            None => Ok(None),
            Some(DocValue::Timestamp(value)) => Ok(Some(*value)),
            Some(_) => Err(wrong_type(key, "timestamp")),
        }
    }

    pub fn date(&self, key: &str) -> Result<NaiveDate> {
        Ok(self.timestamp(key)?.date_naive())
    }

    pub fn text_list(&self, key: &str) -> Result<Vec<String>> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(DocValue::Array(items)) => items
                .iter()
                .map(|item| match item {
                    DocValue::Text(value) => Ok(value.clone()),
                    _ => Err(wrong_type(key, "text array")),
                })
                .collect(),
            Some(_) => Err(wrong_type(key, "text array")),
        }
    }

    /// Encode as extended JSON (`{"$date": ...}` for timestamps)
    pub fn to_ejson(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(key, value)| (key.clone(), value_to_ejson(value)))
                .collect(),
        )
    }

    /// Decode extended JSON. Explicit nulls are treated as absent fields.
    pub fn from_ejson(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::InvalidInput(
                "document must be a JSON object".to_string(),
            ));
        };
        let mut document = Self::new();
        for (key, value) in map {
            if let Some(value) = value_from_ejson(key, value)? {
                document.fields.insert(key.clone(), value);
            }
        }
        Ok(document)
    }
}

fn value_to_ejson(value: &DocValue) -> Value {
    match value {
        DocValue::Text(text) => Value::String(text.clone()),
        DocValue::Int(number) => Value::from(*number),
        DocValue::Float(number) => Number::from_f64(*number).map_or(Value::Null, Value::Number),
        DocValue::Bool(flag) => Value::Bool(*flag),
        DocValue::Timestamp(at) => {
            let mut date = Map::new();
            date.insert(
                "$date".to_string(),
                Value::String(at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            );
            Value::Object(date)
        }
        DocValue::Array(items) => Value::Array(items.iter().map(value_to_ejson).collect()),
    }
}

fn value_from_ejson(key: &str, value: &Value) -> Result<Option<DocValue>> {
    Ok(match value {
        Value::Null => None,
        Value::String(text) => Some(DocValue::Text(text.clone())),
        Value::Bool(flag) => Some(DocValue::Bool(*flag)),
        Value::Number(number) => Some(match number.as_i64() {
            Some(int) => DocValue::Int(int),
            None => DocValue::Float(number.as_f64().unwrap_or_default()),
        }),
        Value::Array(items) => Some(DocValue::Array(
            items
                .iter()
                .filter_map(|item| value_from_ejson(key, item).transpose())
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(map) => Some(extended_scalar(key, map)?),
    })
}

fn extended_scalar(key: &str, map: &Map<String, Value>) -> Result<DocValue> {
    if let Some(Value::String(raw)) = map.get("$date") {
        let at = DateTime::parse_from_rfc3339(raw)
            .map_err(|error| Error::InvalidInput(format!("field `{key}`: {error}")))?;
        return Ok(DocValue::Timestamp(at.with_timezone(&Utc)));
    }
    if let Some(Value::Object(inner)) = map.get("$date") {
        if let Some(Value::String(millis)) = inner.get("$numberLong") {
            let millis = millis
                .parse::<i64>()
                .map_err(|error| Error::InvalidInput(format!("field `{key}`: {error}")))?;
            return Ok(DocValue::Timestamp(crate::util::from_millis(millis)));
        }
    }
    if let Some(Value::String(raw)) = map.get("$numberLong") {
        let number = raw
            .parse::<i64>()
            .map_err(|error| Error::InvalidInput(format!("field `{key}`: {error}")))?;
        return Ok(DocValue::Int(number));
    }
    if let Some(Value::String(raw)) = map.get("$numberDouble") {
        let number = raw
            .parse::<f64>()
            .map_err(|error| Error::InvalidInput(format!("field `{key}`: {error}")))?;
        return Ok(DocValue::Float(number));
    }
    if let Some(Value::String(raw)) = map.get("$oid") {
        return Ok(DocValue::Text(raw.clone()));
    }
    Err(Error::InvalidInput(format!(
        "field `{key}` holds an unsupported nested object"
    )))
}

fn missing(key: &str) -> Error {
    Error::InvalidInput(format!("document field `{key}` is missing"))
}

fn wrong_type(key: &str, expected: &str) -> Error {
    Error::InvalidInput(format!("document field `{key}` is not a {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_opt_drops_none() {
        let mut doc = Document::new();
        doc.put_opt::<String>("notes", None);
        doc.put_opt("hours", Some(7.5));
        assert!(!doc.contains("notes"));
        assert_eq!(doc.float("hours").unwrap(), 7.5);
    }

    #[test]
    fn timestamps_encode_as_ejson_dates() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut doc = Document::new();
        doc.put("updatedAt", at);

        let ejson = doc.to_ejson();
        assert_eq!(ejson, json!({ "updatedAt": { "$date": "2024-05-01T10:00:00.000Z" } }));
        assert_eq!(Document::from_ejson(&ejson).unwrap(), doc);
    }

    #[test]
    fn from_ejson_reads_extended_scalars() {
        let doc = Document::from_ejson(&json!({
            "_id": { "$oid": "65f0c0ffee" },
            "_sourceId": { "$numberLong": "42" },
            "startedAt": { "$date": { "$numberLong": "1714557600000" } },
            "notes": null,
        }))
        .unwrap();

        assert_eq!(doc.text("_id").unwrap(), "65f0c0ffee");
        assert_eq!(doc.int("_sourceId").unwrap(), 42);
        assert_eq!(doc.timestamp("startedAt").unwrap().timestamp(), 1_714_557_600);
        assert!(!doc.contains("notes"));
    }

    #[test]
    fn matches_requires_every_filter_field() {
        let mut doc = Document::new();
        doc.put("userId", "user-1");
        doc.put("muscleGroup", "quads");

        let mut filter = Document::new();
        filter.put("userId", "user-1");
        assert!(doc.matches(&filter));

        filter.put("muscleGroup", "chest");
        assert!(!doc.matches(&filter));
    }

    #[test]
    fn typed_getters_reject_wrong_types() {
        let mut doc = Document::new();
        doc.put("version", "three");
        assert!(doc.int("version").is_err());
        assert!(doc.text("missing").is_err());
        assert!(!doc.flag("missing").unwrap());
    }

    #[test]
    fn dates_become_midnight_timestamps() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let mut doc = Document::new();
        doc.put("date", date);
        assert!(matches!(doc.get("date"), Some(DocValue::Timestamp(_))));
        assert_eq!(doc.date("date").unwrap(), date);
    }
}
