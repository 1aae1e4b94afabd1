// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! Wire shapes exchanged with the form server, and the collaborator trait the
//! session drives. Field names are camelCase on the wire.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value::deserialize_lossy_bool;
use crate::{ActiveFilter, FieldSchema, FormSchema, OptionMap, PageQuery, Record, Value};

/// `(field, value)` pairs identifying a record. Transports prefix the field
/// with `keyfield_`.
pub type KeyParams = Vec<(String, String)>;

pub fn key_params(schema: &FormSchema, record: &Record) -> KeyParams {
    schema
        .key_fields()
        .map(|field| (field.field_name.clone(), record.display(&field.field_name)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitResponse {
    pub fields: Vec<FieldSchema>,
    pub select_options_fix: OptionMap,
    pub select_options: OptionMap,
    pub active_filter: Option<ActiveFilter>,
    #[serde(deserialize_with = "deserialize_lossy_bool")]
    pub has_active_field: bool,
    pub items_per_page: Option<u32>,
    pub table_max_height: Option<Value>,
}

/// Where a record lives in the current query ordering after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub page: u32,
    pub index: usize,
    pub total_records: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadResponse {
    pub records: Vec<Record>,
    pub max_records: u64,
    pub page_count: u32,
    pub current_page: Option<u32>,
    pub current_index: Option<usize>,
    pub select_options: Option<OptionMap>,
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MutationResponse {
    #[serde(deserialize_with = "deserialize_lossy_bool")]
    pub success: bool,
    pub position: Option<Position>,
    pub record: Option<Record>,
    pub field_errors: BTreeMap<String, String>,
    pub show_message: Option<Value>,
    pub message: Option<String>,
}

impl MutationResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(message: &str) -> Self {
        Self {
            success: false,
            message: Some(message.to_owned()),
            ..Self::default()
        }
    }

    pub fn message_text(&self) -> Option<&str> {
        message_text(self.message.as_deref(), self.show_message.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub field: String,
    pub action: String,
    pub value: Value,
    pub keyfields: KeyParams,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeResponse {
    pub record: Option<Record>,
    pub select_options: Option<OptionMap>,
    pub enabled_fields: Vec<String>,
    pub disabled_fields: Vec<String>,
    pub hidden_fields: Vec<String>,
    pub show_message: Option<Value>,
    pub message: Option<String>,
}

impl ChangeResponse {
    pub fn message_text(&self) -> Option<&str> {
        message_text(self.message.as_deref(), self.show_message.as_ref())
    }
}

/// `showMessage` is either the text itself or a flag pointing at `message`.
fn message_text<'a>(message: Option<&'a str>, show_message: Option<&'a Value>) -> Option<&'a str> {
    match show_message {
        Some(Value::Text(text)) if !text.trim().is_empty() => Some(text.as_str()),
        Some(flag) if !flag.is_truthy() => None,
        _ => message.filter(|text| !text.trim().is_empty()),
    }
}

/// The eight logical operations of the form server.
///
/// Transport errors are `Err`; domain failures (`success: false`) are values.
pub trait FormBackend {
    fn init(&mut self, form: &str) -> Result<InitResponse>;
    fn load_page(&mut self, form: &str, query: &PageQuery) -> Result<LoadResponse>;
    fn create(&mut self, form: &str, record: &Record, keys: &KeyParams)
    -> Result<MutationResponse>;
    fn update(&mut self, form: &str, record: &Record, keys: &KeyParams)
    -> Result<MutationResponse>;
    fn delete(&mut self, form: &str, keys: &KeyParams) -> Result<MutationResponse>;
    fn change(&mut self, form: &str, request: &ChangeRequest) -> Result<ChangeResponse>;
    /// Listing with filters reset; `query.keyfields` carries the record to relocate.
    fn rebuild(&mut self, form: &str, query: &PageQuery) -> Result<LoadResponse>;
    fn save_active_filter(&mut self, form: &str, filter: ActiveFilter) -> Result<()>;
}

impl<B: FormBackend + ?Sized> FormBackend for &mut B {
    fn init(&mut self, form: &str) -> Result<InitResponse> {
        (**self).init(form)
    }

    fn load_page(&mut self, form: &str, query: &PageQuery) -> Result<LoadResponse> {
        (**self).load_page(form, query)
    }

    fn create(
        &mut self,
        form: &str,
        record: &Record,
        keys: &KeyParams,
    ) -> Result<MutationResponse> {
        (**self).create(form, record, keys)
    }

    fn update(
        &mut self,
        form: &str,
        record: &Record,
        keys: &KeyParams,
    ) -> Result<MutationResponse> {
        (**self).update(form, record, keys)
    }

    fn delete(&mut self, form: &str, keys: &KeyParams) -> Result<MutationResponse> {
        (**self).delete(form, keys)
    }

    fn change(&mut self, form: &str, request: &ChangeRequest) -> Result<ChangeResponse> {
        (**self).change(form, request)
    }

    fn rebuild(&mut self, form: &str, query: &PageQuery) -> Result<LoadResponse> {
        (**self).rebuild(form, query)
    }

    fn save_active_filter(&mut self, form: &str, filter: ActiveFilter) -> Result<()> {
        (**self).save_active_filter(form, filter)
    }
}
