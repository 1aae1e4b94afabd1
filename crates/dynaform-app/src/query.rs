// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub const fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Which records to list when the form has an `active` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveFilter {
    #[default]
    All,
    Active,
    Inactive,
}

impl ActiveFilter {
    pub const ALL: [Self; 3] = [Self::All, Self::Active, Self::Inactive];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::All => Self::Active,
            Self::Active => Self::Inactive,
            Self::Inactive => Self::All,
        }
    }
}

/// Per-column filter strings. Blank entries are dropped on write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnFilters(BTreeMap<String, String>);

impl ColumnFilters {
    pub fn set(&mut self, field: &str, text: &str) -> bool {
        if text.trim().is_empty() {
            return self.0.remove(field).is_some();
        }
        self.0.insert(field.to_owned(), text.to_owned()).as_deref() != Some(text)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(field, text)| (field.as_str(), text.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Case-insensitive substring match of every filter against the record.
    pub fn matches(&self, record: &Record) -> bool {
        self.0.iter().all(|(field, text)| {
            record
                .display(field)
                .to_lowercase()
                .contains(&text.trim().to_lowercase())
        })
    }
}

/// Parameters of one `loaddata` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
    pub sort: Option<SortSpec>,
    pub filters: Vec<(String, String)>,
    pub keyfields: Vec<(String, String)>,
    pub active_filter: Option<ActiveFilter>,
    pub change: bool,
}

impl PageQuery {
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_owned(), self.page.to_string()),
            ("limit".to_owned(), self.limit.to_string()),
        ];
        if let Some(search) = &self.search {
            pairs.push(("search".to_owned(), search.clone()));
        }
        if let Some(sort) = &self.sort {
            pairs.push(("sortField".to_owned(), sort.field.clone()));
            pairs.push((
                "sortDirection".to_owned(),
                sort.direction.as_str().to_owned(),
            ));
        }
        for (field, text) in &self.filters {
            pairs.push((format!("filter_{field}"), text.clone()));
        }
        for (field, value) in &self.keyfields {
            pairs.push((format!("keyfield_{field}"), value.clone()));
        }
        if let Some(active_filter) = self.active_filter {
            pairs.push((
                "activeFilter".to_owned(),
                active_filter.as_str().to_owned(),
            ));
        }
        if self.change {
            pairs.push(("change".to_owned(), "1".to_owned()));
        }
        pairs
    }
}

/// Search, sort, filter and scoping criteria for page fetches.
///
/// Column filters exist twice: `live` filters follow every keystroke and only
/// narrow the loaded page, `applied` filters are what the server last saw.
/// `commit_filters` is the sync point between the two.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryState {
    search: String,
    search_open: bool,
    sort: Option<SortSpec>,
    live_filters: ColumnFilters,
    applied_filters: ColumnFilters,
    keyfields: BTreeMap<String, Value>,
    active_filter: ActiveFilter,
    has_active_field: bool,
}

impl QueryState {
    pub fn configure_active_filter(&mut self, has_active_field: bool, initial: ActiveFilter) {
        self.has_active_field = has_active_field;
        self.active_filter = if has_active_field {
            initial
        } else {
            ActiveFilter::All
        };
    }

    /// Same column flips direction, another column starts ascending.
    pub fn toggle_sort(&mut self, field: &str) -> SortSpec {
        let direction = match &self.sort {
            Some(current) if current.field == field => current.direction.flipped(),
            _ => SortDirection::Asc,
        };
        let spec = SortSpec {
            field: field.to_owned(),
            direction,
        };
        self.sort = Some(spec.clone());
        spec
    }

    /// Puts back a sort taken from `sort()` before a toggle.
    pub fn restore_sort(&mut self, sort: Option<SortSpec>) {
        self.sort = sort;
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn set_live_filter(&mut self, field: &str, text: &str) -> bool {
        self.live_filters.set(field, text)
    }

    pub fn commit_filters(&mut self) {
        self.applied_filters = self.live_filters.clone();
    }

    pub fn live_filters(&self) -> &ColumnFilters {
        &self.live_filters
    }

    pub fn applied_filters(&self) -> &ColumnFilters {
        &self.applied_filters
    }

    pub fn clear_filters(&mut self) {
        self.live_filters.clear();
        self.applied_filters.clear();
        self.search.clear();
        self.search_open = false;
    }

    pub fn open_search(&mut self) {
        self.search_open = true;
    }

    pub fn close_search(&mut self) -> bool {
        std::mem::replace(&mut self.search_open, false)
    }

    pub fn search_open(&self) -> bool {
        self.search_open
    }

    pub fn set_search(&mut self, text: &str) {
        self.search = text.to_owned();
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_keyfield(&mut self, field: &str, value: Value) {
        if value.is_empty() {
            self.keyfields.remove(field);
        } else {
            self.keyfields.insert(field.to_owned(), value);
        }
    }

    pub fn keyfields(&self) -> &BTreeMap<String, Value> {
        &self.keyfields
    }

    pub fn set_active_filter(&mut self, filter: ActiveFilter) {
        self.active_filter = filter;
    }

    pub fn active_filter(&self) -> ActiveFilter {
        self.active_filter
    }

    pub fn has_active_field(&self) -> bool {
        self.has_active_field
    }

    /// Serializes every active constraint into a page request.
    pub fn page_query(&self, page: u32, limit: u32, change: bool) -> PageQuery {
        let search = self.search.trim();
        PageQuery {
            page: page.max(1),
            limit,
            search: (!search.is_empty()).then(|| search.to_owned()),
            sort: self.sort.clone(),
            filters: self
                .applied_filters
                .iter()
                .map(|(field, text)| (field.to_owned(), text.to_owned()))
                .collect(),
            keyfields: self
                .keyfields
                .iter()
                .map(|(field, value)| (field.clone(), value.display()))
                .collect(),
            active_filter: self.has_active_field.then_some(self.active_filter),
            change,
        }
    }
}
