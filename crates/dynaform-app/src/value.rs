// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::FieldType;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Scalar carried by a record attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Parses user input according to the field's type.
    pub fn parse_for_type(field_type: FieldType, raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        match field_type {
            FieldType::Text | FieldType::Select | FieldType::Textarea => Ok(Self::text(raw)),
            FieldType::Integer => {
                if trimmed.is_empty() {
                    return Ok(Self::Null);
                }
                let value: i64 = trimmed
                    .parse()
                    .with_context(|| format!("{trimmed:?} is not a whole number"))?;
                Ok(Self::Integer(value))
            }
            FieldType::Decimal => {
                if trimmed.is_empty() {
                    return Ok(Self::Null);
                }
                let value: f64 = trimmed
                    .replace(',', ".")
                    .parse()
                    .with_context(|| format!("{trimmed:?} is not a number"))?;
                if !value.is_finite() {
                    bail!("{trimmed:?} is not a finite number");
                }
                Ok(Self::Decimal(value))
            }
            FieldType::Date => {
                if trimmed.is_empty() {
                    return Ok(Self::text(""));
                }
                let date = Date::parse(trimmed, DATE_FORMAT)
                    .with_context(|| format!("{trimmed:?} is not a date -- use YYYY-MM-DD"))?;
                let canonical = date.format(DATE_FORMAT).context("format date")?;
                Ok(Self::Text(canonical))
            }
            FieldType::Logical => match trimmed.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" | "y" => Ok(Self::Bool(true)),
                "" | "0" | "false" | "off" | "no" | "n" => Ok(Self::Bool(false)),
                _ => bail!("{trimmed:?} is not a yes/no value"),
            },
        }
    }

    pub fn display(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(true) => "true".to_owned(),
            Self::Bool(false) => "false".to_owned(),
            Self::Integer(value) => value.to_string(),
            Self::Decimal(value) => value.to_string(),
            Self::Text(value) => value.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(value) => value.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Decimal(value) => Some(*value),
            Self::Text(value) => value.trim().parse().ok(),
            Self::Bool(_) | Self::Null => None,
        }
    }

    /// Loose truthiness, as servers send flags as bools, 0/1 or strings.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(value) => *value,
            Self::Integer(value) => *value != 0,
            Self::Decimal(value) => *value != 0.0,
            Self::Text(value) => !matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "" | "0" | "false" | "n" | "no" | "off"
            ),
        }
    }

    /// Orders two values for display sorting. Nulls sort first.
    pub fn compare(&self, other: &Self, numeric: bool) -> Ordering {
        if numeric {
            return match (self.as_f64(), other.as_f64()) {
                (Some(left), Some(right)) => left.total_cmp(&right),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
        }
        self.display()
            .to_lowercase()
            .cmp(&other.display().to_lowercase())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Decimal(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Accepts strings, numbers and bools on the wire and keeps their display form.
pub(crate) fn deserialize_lossy_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.display())
}

/// Accepts `true`, `1`, `"yes"` and friends for flags servers send loosely.
pub(crate) fn deserialize_lossy_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.is_truthy())
}

/// One row of a form's record set, keyed by field name. Server-only keys
/// (`active`, `color`) travel alongside the schema fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn display(&self, field: &str) -> String {
        self.get(field).map(Value::display).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrites the keys present in `patch`, keeping the rest.
    pub fn merge(&mut self, patch: &Record) {
        for (field, value) in patch.iter() {
            self.0.insert(field.clone(), value.clone());
        }
    }

    pub fn is_inactive(&self) -> bool {
        self.get("active").is_some_and(|value| !value.is_truthy())
    }

    pub fn color(&self) -> Option<&str> {
        match self.get("color") {
            Some(Value::Text(color)) if !color.trim().is_empty() => Some(color.as_str()),
            _ => None,
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{Record, Value};
    use crate::FieldType;
    use std::cmp::Ordering;

    #[test]
    fn parse_respects_field_type() {
        assert_eq!(
            Value::parse_for_type(FieldType::Integer, " 42 ").expect("integer parses"),
            Value::Integer(42)
        );
        assert_eq!(
            Value::parse_for_type(FieldType::Decimal, "12,5").expect("decimal comma parses"),
            Value::Decimal(12.5)
        );
        assert_eq!(
            Value::parse_for_type(FieldType::Logical, "yes").expect("logical parses"),
            Value::Bool(true)
        );
        assert_eq!(
            Value::parse_for_type(FieldType::Date, "2026-03-09").expect("date parses"),
            Value::text("2026-03-09")
        );
        assert_eq!(
            Value::parse_for_type(FieldType::Integer, "").expect("empty integer"),
            Value::Null
        );
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert!(Value::parse_for_type(FieldType::Integer, "4.2").is_err());
        assert!(Value::parse_for_type(FieldType::Decimal, "abc").is_err());
        assert!(Value::parse_for_type(FieldType::Date, "09.03.2026").is_err());
        assert!(Value::parse_for_type(FieldType::Logical, "maybe").is_err());
    }

    #[test]
    fn untagged_json_keeps_number_kinds() {
        let record: Record =
            serde_json::from_str(r#"{"id":7,"amount":12.5,"name":"Acme","paid":true,"note":null}"#)
                .expect("record decodes");
        assert_eq!(record.get("id"), Some(&Value::Integer(7)));
        assert_eq!(record.get("amount"), Some(&Value::Decimal(12.5)));
        assert_eq!(record.get("name"), Some(&Value::text("Acme")));
        assert_eq!(record.get("paid"), Some(&Value::Bool(true)));
        assert_eq!(record.get("note"), Some(&Value::Null));
    }

    #[test]
    fn compare_is_case_insensitive_for_text_and_numeric_for_numbers() {
        assert_eq!(
            Value::text("apple").compare(&Value::text("Banana"), false),
            Ordering::Less
        );
        assert_eq!(
            Value::Integer(9).compare(&Value::Integer(10), true),
            Ordering::Less
        );
        assert_eq!(
            Value::text("9").compare(&Value::text("10"), false),
            Ordering::Greater
        );
        assert_eq!(Value::Null.compare(&Value::Integer(0), true), Ordering::Less);
    }

    #[test]
    fn row_styling_hints() {
        let inactive = Record::new().with("active", 0_i64).with("color", "#ff0000");
        assert!(inactive.is_inactive());
        assert_eq!(inactive.color(), Some("#ff0000"));

        let plain = Record::new().with("name", "x");
        assert!(!plain.is_inactive());
        assert_eq!(plain.color(), None);
    }

    #[test]
    fn merge_overwrites_only_patched_keys() {
        let mut record = Record::new().with("a", 1_i64).with("b", "keep");
        record.merge(&Record::new().with("a", 2_i64).with("c", true));
        assert_eq!(record.get("a"), Some(&Value::Integer(2)));
        assert_eq!(record.get("b"), Some(&Value::text("keep")));
        assert_eq!(record.get("c"), Some(&Value::Bool(true)));
    }
}
