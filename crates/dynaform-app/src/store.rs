// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{ColumnFilters, FormSchema, Record, SortDirection, SortSpec, Value};

pub const DEFAULT_ITEMS_PER_PAGE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: u32,
    pub items_per_page: u32,
    pub total_records: u64,
    pub total_pages: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            current_page: 1,
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
            total_records: 0,
            total_pages: 0,
        }
    }
}

impl Pagination {
    /// Clamps a requested page to `1..=total_pages` (or to 1 when empty).
    pub fn clamp(&self, page: u32) -> u32 {
        let page = page.max(1);
        if self.total_pages > 0 {
            page.min(self.total_pages)
        } else {
            1
        }
    }

    pub fn pages_for(&self, total_records: u64) -> u32 {
        let per_page = u64::from(self.items_per_page.max(1));
        u32::try_from(total_records.div_ceil(per_page)).unwrap_or(u32::MAX)
    }
}

/// Server-declared paging metadata that accompanies a page of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    pub current_page: u32,
    pub total_records: u64,
    pub total_pages: u32,
}

/// The loaded page, the selected record and the in-progress draft.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordStore {
    records: Vec<Record>,
    active_index: Option<usize>,
    pagination: Pagination,
    draft: Option<Record>,
    dirty: bool,
}

impl RecordStore {
    pub fn set_items_per_page(&mut self, items_per_page: u32) {
        self.pagination.items_per_page = items_per_page.max(1);
    }

    /// Replaces the page wholesale. Selection is cleared; callers reselect.
    pub fn set_page(&mut self, records: Vec<Record>, meta: PageMeta) {
        self.records = records;
        self.active_index = None;
        self.pagination.current_page = meta.current_page.max(1);
        self.pagination.total_records = meta.total_records;
        self.pagination.total_pages = meta.total_pages;
    }

    pub fn set_totals(&mut self, total_records: u64) {
        self.pagination.total_records = total_records;
        self.pagination.total_pages = self.pagination.pages_for(total_records);
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.active_index = None;
        self.pagination.current_page = 1;
        self.pagination.total_records = 0;
        self.pagination.total_pages = 0;
    }

    /// Out-of-range indices are ignored.
    pub fn select_by_index(&mut self, index: usize) -> bool {
        if index >= self.records.len() {
            return false;
        }
        self.active_index = Some(index);
        true
    }

    /// Replaces the active record in place, after a confirmed edit.
    pub fn patch_active(&mut self, record: Record) -> bool {
        let Some(slot) = self
            .active_index
            .and_then(|index| self.records.get_mut(index))
        else {
            return false;
        };
        *slot = record;
        true
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    pub fn active(&self) -> Option<&Record> {
        self.active_index.and_then(|index| self.records.get(index))
    }

    pub fn begin_draft(&mut self, record: Record) {
        self.draft = Some(record);
        self.dirty = false;
    }

    pub fn draft(&self) -> Option<&Record> {
        self.draft.as_ref()
    }

    /// Sets a draft value from user input and marks the draft dirty.
    pub fn edit_draft(&mut self, field: &str, value: Value) -> bool {
        let Some(draft) = self.draft.as_mut() else {
            return false;
        };
        if draft.get(field) != Some(&value) {
            draft.set(field, value);
            self.dirty = true;
        }
        true
    }

    /// Merges a server patch into the draft without marking it dirty.
    pub fn patch_draft(&mut self, patch: &Record) -> bool {
        let Some(draft) = self.draft.as_mut() else {
            return false;
        };
        draft.merge(patch);
        true
    }

    pub fn discard_draft(&mut self) -> Option<Record> {
        self.dirty = false;
        self.draft.take()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Page indices in display order. Filtering and sorting only ever see the
    /// loaded page; the record array itself is left untouched.
    pub fn view(
        &self,
        schema: &FormSchema,
        filters: &ColumnFilters,
        sort: Option<&SortSpec>,
    ) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| filters.matches(record))
            .map(|(index, _)| index)
            .collect();

        if let Some(sort) = sort {
            let numeric = schema.is_numeric(&sort.field);
            let null = Value::Null;
            indices.sort_by(|left, right| {
                let left = self.records[*left].get(&sort.field).unwrap_or(&null);
                let right = self.records[*right].get(&sort.field).unwrap_or(&null);
                let order = left.compare(right, numeric);
                match sort.direction {
                    SortDirection::Asc => order,
                    SortDirection::Desc => order.reverse(),
                }
            });
        }
        indices
    }

    pub fn last_index(&self) -> Option<usize> {
        self.records.len().checked_sub(1)
    }

    pub fn position_in_view(view: &[usize], index: Option<usize>) -> Option<usize> {
        let index = index?;
        view.iter().position(|candidate| *candidate == index)
    }
}
