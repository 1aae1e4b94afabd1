// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::Value;

const NUMERIC_WIDTH_PADDING: u32 = 3;
const TEXT_WIDTH_PADDING: u32 = 2;
const MIN_WIDTH_IN_CHARS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Date,
    #[serde(alias = "checkbox")]
    Logical,
    Select,
    Textarea,
}

impl FieldType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::Logical => "logical",
            Self::Select => "select",
            Self::Textarea => "textarea",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "integer" => Some(Self::Integer),
            "decimal" => Some(Self::Decimal),
            "date" => Some(Self::Date),
            "logical" | "checkbox" => Some(Self::Logical),
            "select" => Some(Self::Select),
            "textarea" => Some(Self::Textarea),
            _ => None,
        }
    }

    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Decimal)
    }

    /// Value a freshly added record starts with.
    pub fn zero_value(self) -> Value {
        match self {
            Self::Text | Self::Select | Self::Date | Self::Textarea => Value::text(""),
            Self::Logical => Value::Bool(false),
            Self::Integer => Value::Integer(0),
            Self::Decimal => Value::Decimal(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// Layout width of a field. Percent and character widths exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldWidth {
    #[default]
    Auto,
    Percent(u8),
    Chars(u32),
}

impl FieldWidth {
    pub const fn percent(self) -> Option<u8> {
        match self {
            Self::Percent(percent) => Some(percent),
            _ => None,
        }
    }

    pub const fn chars(self) -> Option<u32> {
        match self {
            Self::Chars(chars) => Some(chars),
            _ => None,
        }
    }

    fn parse_percent(raw: &str) -> Result<u8> {
        let digits = raw.trim().trim_end_matches('%').trim();
        let percent: u8 = digits
            .parse()
            .map_err(|_| anyhow!("width {raw:?} is not a percentage"))?;
        if percent == 0 || percent > 100 {
            bail!("width {raw:?} must be between 1% and 100%");
        }
        Ok(percent)
    }
}

/// Derives a layout width from a field's maximum length.
///
/// Numeric fields get three characters of padding, everything else two, with a
/// floor of eight characters. Wide fields switch to a percent width.
pub fn infer_width(max_length: u32, field_type: FieldType) -> FieldWidth {
    let padding = if field_type.is_numeric() {
        NUMERIC_WIDTH_PADDING
    } else {
        TEXT_WIDTH_PADDING
    };
    let chars = max_length.saturating_add(padding).max(MIN_WIDTH_IN_CHARS);
    if chars > 80 {
        FieldWidth::Percent(100)
    } else if chars > 50 {
        FieldWidth::Percent(75)
    } else if chars > 30 {
        FieldWidth::Percent(50)
    } else {
        FieldWidth::Chars(chars)
    }
}

/// One configured attribute of a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldSchemaWire", into = "FieldSchemaWire")]
pub struct FieldSchema {
    pub field_name: String,
    pub label: String,
    pub field_type: FieldType,
    pub keyfield: bool,
    pub editable: bool,
    pub hidden: bool,
    pub required: bool,
    pub show_in_table: bool,
    pub show_spinner: bool,
    pub password: bool,
    pub separator: bool,
    pub new_line: bool,
    width: FieldWidth,
    pub max_length: Option<u32>,
    pub decimal_places: Option<u8>,
    pub placeholder: String,
    pub align: Align,
    pub on_change_action: Option<String>,
}

impl FieldSchema {
    pub fn new(field_name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            field_name: field_name.to_owned(),
            label: label.to_owned(),
            field_type,
            keyfield: false,
            editable: true,
            hidden: false,
            required: false,
            show_in_table: true,
            show_spinner: false,
            password: false,
            separator: false,
            new_line: false,
            width: FieldWidth::Auto,
            max_length: None,
            decimal_places: None,
            placeholder: String::new(),
            align: if field_type.is_numeric() {
                Align::Right
            } else {
                Align::Left
            },
            on_change_action: None,
        }
    }

    pub fn key(mut self) -> Self {
        self.keyfield = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_change_action(mut self, action: &str) -> Self {
        self.on_change_action = Some(action.to_owned());
        self
    }

    pub fn width(&self) -> FieldWidth {
        self.width
    }

    pub fn set_width_percent(&mut self, percent: u8) {
        self.width = FieldWidth::Percent(percent.clamp(1, 100));
    }

    pub fn set_width_in_chars(&mut self, chars: u32) {
        self.width = FieldWidth::Chars(chars.max(1));
    }

    pub fn clear_width(&mut self) {
        self.width = FieldWidth::Auto;
    }

    /// Applies width inference when no explicit width is configured.
    pub fn ensure_width(&mut self) {
        if self.width != FieldWidth::Auto {
            return;
        }
        if let Some(max_length) = self.max_length {
            self.width = infer_width(max_length, self.field_type);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldSchemaWire {
    field_name: String,
    #[serde(default)]
    label: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default)]
    keyfield: bool,
    #[serde(default = "default_true")]
    editable: bool,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    required: bool,
    #[serde(default = "default_true")]
    show_in_table: bool,
    #[serde(default)]
    show_spinner: bool,
    #[serde(default)]
    password: bool,
    #[serde(default)]
    separator: bool,
    #[serde(default)]
    new_line: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width_in_chars: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decimal_places: Option<u8>,
    #[serde(default)]
    placeholder: String,
    #[serde(default)]
    align: Option<Align>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_change_action: Option<String>,
}

fn default_true() -> bool {
    true
}

impl TryFrom<FieldSchemaWire> for FieldSchema {
    type Error = anyhow::Error;

    fn try_from(wire: FieldSchemaWire) -> Result<Self> {
        let width = match (wire.width.as_deref(), wire.width_in_chars) {
            (Some(raw), Some(_)) if !raw.trim().is_empty() => bail!(
                "field {:?} sets both width and widthInChars -- keep only one",
                wire.field_name
            ),
            (Some(raw), _) if !raw.trim().is_empty() => {
                FieldWidth::Percent(FieldWidth::parse_percent(raw)?)
            }
            (_, Some(chars)) if chars > 0 => FieldWidth::Chars(chars),
            _ => FieldWidth::Auto,
        };

        let mut field = FieldSchema::new(&wire.field_name, &wire.label, wire.field_type);
        field.keyfield = wire.keyfield;
        field.editable = wire.editable;
        field.hidden = wire.hidden;
        field.required = wire.required;
        field.show_in_table = wire.show_in_table;
        field.show_spinner = wire.show_spinner;
        field.password = wire.password;
        field.separator = wire.separator;
        field.new_line = wire.new_line;
        field.width = width;
        field.max_length = wire.max_length;
        field.decimal_places = wire.decimal_places;
        field.placeholder = wire.placeholder;
        if let Some(align) = wire.align {
            field.align = align;
        }
        field.on_change_action = wire.on_change_action.filter(|action| !action.is_empty());
        Ok(field)
    }
}

impl From<FieldSchema> for FieldSchemaWire {
    fn from(field: FieldSchema) -> Self {
        Self {
            field_name: field.field_name,
            label: field.label,
            field_type: field.field_type,
            keyfield: field.keyfield,
            editable: field.editable,
            hidden: field.hidden,
            required: field.required,
            show_in_table: field.show_in_table,
            show_spinner: field.show_spinner,
            password: field.password,
            separator: field.separator,
            new_line: field.new_line,
            width: field.width.percent().map(|percent| format!("{percent}%")),
            width_in_chars: field.width.chars(),
            max_length: field.max_length,
            decimal_places: field.decimal_places,
            placeholder: field.placeholder,
            align: Some(field.align),
            on_change_action: field.on_change_action,
        }
    }
}

/// Ordered field list of one form. Order drives rendering and focus sequencing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormSchema {
    form_id: String,
    fields: Vec<FieldSchema>,
}

impl FormSchema {
    pub fn new(form_id: &str, fields: Vec<FieldSchema>) -> Result<Self> {
        if form_id.trim().is_empty() {
            bail!("form id must not be empty");
        }
        let mut schema = Self {
            form_id: form_id.to_owned(),
            fields: Vec::with_capacity(fields.len()),
        };
        for field in fields {
            schema.attach(field)?;
        }
        Ok(schema)
    }

    /// Appends a field, inferring its width when none is configured.
    pub fn attach(&mut self, mut field: FieldSchema) -> Result<()> {
        if field.field_name.trim().is_empty() {
            bail!("form {:?} has a field without a name", self.form_id);
        }
        if self.position(&field.field_name).is_some() {
            bail!(
                "form {:?} declares field {:?} twice",
                self.form_id,
                field.field_name
            );
        }
        field.ensure_width();
        self.fields.push(field);
        Ok(())
    }

    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.field_name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.field_name == name)
    }

    pub fn key_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|field| field.keyfield)
    }

    pub fn table_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields
            .iter()
            .filter(|field| field.show_in_table && !field.hidden)
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.fields
            .iter()
            .map(|field| field.field_name.as_str())
            .collect()
    }

    pub fn is_numeric(&self, name: &str) -> bool {
        self.field(name)
            .is_some_and(|field| field.field_type.is_numeric())
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldSchema, FieldType, FieldWidth, FormSchema, infer_width};

    #[test]
    fn width_inference_thresholds() {
        assert_eq!(infer_width(1, FieldType::Text), FieldWidth::Chars(8));
        assert_eq!(infer_width(10, FieldType::Text), FieldWidth::Chars(12));
        assert_eq!(infer_width(10, FieldType::Integer), FieldWidth::Chars(13));
        assert_eq!(infer_width(28, FieldType::Text), FieldWidth::Chars(30));
        assert_eq!(infer_width(29, FieldType::Text), FieldWidth::Percent(50));
        assert_eq!(infer_width(48, FieldType::Decimal), FieldWidth::Percent(75));
        assert_eq!(infer_width(78, FieldType::Text), FieldWidth::Percent(75));
        assert_eq!(infer_width(79, FieldType::Text), FieldWidth::Percent(100));
    }

    #[test]
    fn width_inference_populates_exactly_one_width() {
        for max_length in 1..=200 {
            for field_type in [FieldType::Integer, FieldType::Decimal, FieldType::Text] {
                let width = infer_width(max_length, field_type);
                assert!(
                    width.percent().is_some() ^ width.chars().is_some(),
                    "max_length={max_length} type={field_type:?} gave {width:?}"
                );
            }
        }
    }

    #[test]
    fn ensure_width_is_idempotent_and_keeps_explicit_widths() {
        let mut field = FieldSchema::new("name", "Name", FieldType::Text).with_max_length(20);
        field.ensure_width();
        assert_eq!(field.width(), FieldWidth::Chars(22));
        field.ensure_width();
        assert_eq!(field.width(), FieldWidth::Chars(22));

        let mut explicit = FieldSchema::new("memo", "Memo", FieldType::Text).with_max_length(200);
        explicit.set_width_in_chars(12);
        explicit.ensure_width();
        assert_eq!(explicit.width(), FieldWidth::Chars(12));
    }

    #[test]
    fn setting_one_width_clears_the_other() {
        let mut field = FieldSchema::new("name", "Name", FieldType::Text);
        field.set_width_percent(50);
        assert_eq!(field.width().chars(), None);
        field.set_width_in_chars(14);
        assert_eq!(field.width().percent(), None);
        assert_eq!(field.width().chars(), Some(14));
    }

    #[test]
    fn wire_format_decodes_camel_case_and_rejects_double_width() {
        let field: FieldSchema = serde_json::from_str(
            r#"{"fieldName":"amount","label":"Amount","type":"decimal","width":"75%","decimalPlaces":2}"#,
        )
        .expect("field decodes");
        assert_eq!(field.field_type, FieldType::Decimal);
        assert_eq!(field.width(), FieldWidth::Percent(75));
        assert!(field.editable);
        assert!(field.show_in_table);

        let checkbox: FieldSchema =
            serde_json::from_str(r#"{"fieldName":"paid","type":"checkbox"}"#)
                .expect("checkbox alias decodes");
        assert_eq!(checkbox.field_type, FieldType::Logical);

        let both = serde_json::from_str::<FieldSchema>(
            r#"{"fieldName":"x","type":"text","width":"50%","widthInChars":10}"#,
        );
        assert!(both.is_err());
    }

    #[test]
    fn form_schema_rejects_duplicate_fields_and_infers_width_on_attach() {
        let duplicate = FormSchema::new(
            "invoice_form",
            vec![
                FieldSchema::new("id", "Id", FieldType::Integer),
                FieldSchema::new("id", "Id again", FieldType::Integer),
            ],
        );
        assert!(duplicate.is_err());

        let schema = FormSchema::new(
            "invoice_form",
            vec![
                FieldSchema::new("id", "Id", FieldType::Integer).key(),
                FieldSchema::new("customer", "Customer", FieldType::Text).with_max_length(60),
            ],
        )
        .expect("schema builds");
        assert_eq!(
            schema.field("customer").map(FieldSchema::width),
            Some(FieldWidth::Percent(75))
        );
        assert_eq!(schema.key_fields().count(), 1);
    }
}
