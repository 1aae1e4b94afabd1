// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value::deserialize_lossy_string;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    #[serde(deserialize_with = "deserialize_lossy_string")]
    pub value: String,
    #[serde(deserialize_with = "deserialize_lossy_string")]
    pub label: String,
}

impl SelectOption {
    pub fn new(value: &str, label: &str) -> Self {
        Self {
            value: value.to_owned(),
            label: label.to_owned(),
        }
    }
}

pub type OptionMap = BTreeMap<String, Vec<SelectOption>>;

/// Two-tier option lists: fixed lists load once with the form and shadow the
/// dynamic lists, which change actions and key-field changes may replace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectOptions {
    fixed: OptionMap,
    dynamic: OptionMap,
}

impl SelectOptions {
    pub fn new(fixed: OptionMap, dynamic: OptionMap) -> Self {
        Self { fixed, dynamic }
    }

    pub fn options_for(&self, field: &str) -> &[SelectOption] {
        self.fixed
            .get(field)
            .or_else(|| self.dynamic.get(field))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn label_for(&self, field: &str, value: &str) -> Option<&str> {
        self.options_for(field)
            .iter()
            .find(|option| option.value == value)
            .map(|option| option.label.as_str())
    }

    pub fn has_options(&self, field: &str) -> bool {
        !self.options_for(field).is_empty()
    }

    pub fn replace_dynamic(&mut self, dynamic: OptionMap) {
        self.dynamic = dynamic;
    }

    /// Replaces the lists named in `patch`, keeping the other dynamic lists.
    pub fn merge_dynamic(&mut self, patch: OptionMap) {
        self.dynamic.extend(patch);
    }

    pub fn fixed(&self) -> &OptionMap {
        &self.fixed
    }

    pub fn dynamic(&self) -> &OptionMap {
        &self.dynamic
    }
}

#[cfg(test)]
mod tests {
    use super::{OptionMap, SelectOption, SelectOptions};

    fn map(field: &str, options: &[(&str, &str)]) -> OptionMap {
        let mut out = OptionMap::new();
        out.insert(
            field.to_owned(),
            options
                .iter()
                .map(|(value, label)| SelectOption::new(value, label))
                .collect(),
        );
        out
    }

    #[test]
    fn fixed_options_shadow_dynamic_options() {
        let options = SelectOptions::new(
            map("currency", &[("EUR", "Euro")]),
            map("currency", &[("USD", "Dollar")]),
        );
        assert_eq!(options.options_for("currency").len(), 1);
        assert_eq!(options.label_for("currency", "EUR"), Some("Euro"));
        assert_eq!(options.label_for("currency", "USD"), None);
    }

    #[test]
    fn merge_dynamic_replaces_only_named_lists() {
        let mut options = SelectOptions::new(
            OptionMap::new(),
            {
                let mut dynamic = map("city", &[("1", "Berlin")]);
                dynamic.extend(map("region", &[("n", "North")]));
                dynamic
            },
        );
        options.merge_dynamic(map("city", &[("2", "Hamburg")]));
        assert_eq!(options.label_for("city", "2"), Some("Hamburg"));
        assert_eq!(options.label_for("city", "1"), None);
        assert_eq!(options.label_for("region", "n"), Some("North"));

        options.replace_dynamic(OptionMap::new());
        assert!(!options.has_options("region"));
    }

    #[test]
    fn numeric_option_values_decode_as_text() {
        let option: SelectOption =
            serde_json::from_str(r#"{"value":3,"label":"Three"}"#).expect("option decodes");
        assert_eq!(option.value, "3");
    }
}
