// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, anyhow, bail};
use dynaform_app::{
    ActiveFilter, ChangeRequest, ChangeResponse, FormBackend, FormSchema, InitResponse, KeyParams,
    LoadResponse, MutationResponse, PageQuery, Position, Record, SortDirection, Value,
};
use std::collections::{BTreeMap, VecDeque};

use crate::{InvoiceFaker, invoice_init, region_for_city};

/// One request the fake server received, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Init(String),
    LoadPage(PageQuery),
    Create(Record),
    Update(Record),
    Delete(KeyParams),
    Change(ChangeRequest),
    Rebuild(PageQuery),
    SaveActiveFilter(ActiveFilter),
}

/// In-memory form server.
///
/// Listing honours search, sort, column filters, key-field scoping, the
/// active filter and paging. Mutations answer with the position the record
/// holds in the most recent listing's ordering. Any response can be scripted
/// ahead of time, and `fail_next` turns the next call into a transport error.
#[derive(Debug, Clone)]
pub struct FakeBackend {
    init: InitResponse,
    schema: FormSchema,
    rows: Vec<Record>,
    next_id: i64,
    saved_active_filter: Option<ActiveFilter>,
    last_query: Option<PageQuery>,
    calls: Vec<Call>,
    fail_next: Option<String>,
    scripted_loads: VecDeque<LoadResponse>,
    scripted_mutations: VecDeque<MutationResponse>,
    scripted_changes: BTreeMap<String, ChangeResponse>,
}

impl FakeBackend {
    pub fn new(form_id: &str, init: InitResponse, rows: Vec<Record>) -> Result<Self> {
        let schema = FormSchema::new(form_id, init.fields.clone())?;
        let next_id = rows
            .iter()
            .filter_map(|row| match row.get("id") {
                Some(Value::Integer(id)) => Some(*id),
                _ => None,
            })
            .max()
            .unwrap_or(0)
            + 1;
        Ok(Self {
            init,
            schema,
            rows,
            next_id,
            saved_active_filter: None,
            last_query: None,
            calls: Vec::new(),
            fail_next: None,
            scripted_loads: VecDeque::new(),
            scripted_mutations: VecDeque::new(),
            scripted_changes: BTreeMap::new(),
        })
    }

    /// The invoice fixture with `count` faked rows.
    pub fn invoices(count: usize, items_per_page: u32) -> Self {
        let rows = InvoiceFaker::new(7).invoices(count);
        Self::new(crate::INVOICE_FORM, invoice_init(items_per_page), rows)
            .expect("invoice fixture schema is valid")
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn load_calls(&self) -> Vec<&PageQuery> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::LoadPage(query) => Some(query),
                _ => None,
            })
            .collect()
    }

    pub fn saved_active_filter(&self) -> Option<ActiveFilter> {
        self.saved_active_filter
    }

    /// The next call of any kind fails as if the server were unreachable.
    pub fn fail_next(&mut self, message: &str) {
        self.fail_next = Some(message.to_owned());
    }

    /// Answers the next `load_page` with `response` instead of real data.
    pub fn script_load(&mut self, response: LoadResponse) {
        self.scripted_loads.push_back(response);
    }

    /// Answers the next create, update or delete with `response`.
    pub fn script_mutation(&mut self, response: MutationResponse) {
        self.scripted_mutations.push_back(response);
    }

    pub fn script_change(&mut self, action: &str, response: ChangeResponse) {
        self.scripted_changes.insert(action.to_owned(), response);
    }

    fn check_transport(&mut self) -> Result<()> {
        match self.fail_next.take() {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }

    fn listing(&self, query: &PageQuery, scope_by_keys: bool) -> Vec<Record> {
        let search = query.search.as_deref().map(str::to_lowercase);
        let mut rows: Vec<Record> = self
            .rows
            .iter()
            .filter(|row| match query.active_filter {
                Some(ActiveFilter::Active) => !row.is_inactive(),
                Some(ActiveFilter::Inactive) => row.is_inactive(),
                Some(ActiveFilter::All) | None => true,
            })
            .filter(|row| {
                !scope_by_keys
                    || query
                        .keyfields
                        .iter()
                        .all(|(field, value)| row.display(field) == *value)
            })
            .filter(|row| {
                query.filters.iter().all(|(field, text)| {
                    row.display(field)
                        .to_lowercase()
                        .contains(&text.to_lowercase())
                })
            })
            .filter(|row| {
                search.as_ref().is_none_or(|needle| {
                    row.iter()
                        .any(|(_, value)| value.display().to_lowercase().contains(needle))
                })
            })
            .cloned()
            .collect();

        if let Some(sort) = &query.sort {
            let numeric = self.schema.is_numeric(&sort.field);
            rows.sort_by(|left, right| {
                let order = left
                    .get(&sort.field)
                    .unwrap_or(&Value::Null)
                    .compare(right.get(&sort.field).unwrap_or(&Value::Null), numeric);
                match sort.direction {
                    SortDirection::Asc => order,
                    SortDirection::Desc => order.reverse(),
                }
            });
        }
        rows
    }

    fn page_of(rows: &[Record], page: u32, limit: u32) -> LoadResponse {
        let limit = limit.max(1) as usize;
        let page_count = rows.len().div_ceil(limit) as u32;
        let page = page.clamp(1, page_count.max(1));
        let start = (page as usize - 1) * limit;
        let records = rows.iter().skip(start).take(limit).cloned().collect();
        LoadResponse {
            records,
            max_records: rows.len() as u64,
            page_count,
            current_page: Some(page),
            ..LoadResponse::default()
        }
    }

    fn matches_keys(&self, row: &Record, keys: &KeyParams) -> bool {
        !keys.is_empty() && keys.iter().all(|(field, value)| row.display(field) == *value)
    }

    /// Position of the row matching `keys` in the last listing's ordering.
    fn position_of(&self, keys: &KeyParams) -> Option<Position> {
        let query = self.last_query.clone()?;
        let rows = self.listing(&query, true);
        let limit = query.limit.max(1) as usize;
        let at = rows.iter().position(|row| self.matches_keys(row, keys))?;
        Some(Position {
            page: (at / limit) as u32 + 1,
            index: at % limit,
            total_records: rows.len() as u64,
        })
    }

    fn keys_of(&self, record: &Record) -> KeyParams {
        dynaform_app::key_params(&self.schema, record)
    }
}

impl FormBackend for FakeBackend {
    fn init(&mut self, form: &str) -> Result<InitResponse> {
        self.calls.push(Call::Init(form.to_owned()));
        self.check_transport()?;
        if form != self.schema.form_id() {
            bail!("unknown form {form:?}");
        }
        Ok(self.init.clone())
    }

    fn load_page(&mut self, _form: &str, query: &PageQuery) -> Result<LoadResponse> {
        self.calls.push(Call::LoadPage(query.clone()));
        self.check_transport()?;
        self.last_query = Some(query.clone());
        if let Some(scripted) = self.scripted_loads.pop_front() {
            return Ok(scripted);
        }
        let rows = self.listing(query, true);
        let mut response = Self::page_of(&rows, query.page, query.limit);
        if query.change {
            response.select_options = Some(self.init.select_options.clone());
        }
        Ok(response)
    }

    fn create(&mut self, _form: &str, record: &Record, _keys: &KeyParams) -> Result<MutationResponse> {
        self.calls.push(Call::Create(record.clone()));
        self.check_transport()?;
        if let Some(scripted) = self.scripted_mutations.pop_front() {
            return Ok(scripted);
        }
        let mut stored = record.clone();
        let id = match record.get("id") {
            Some(Value::Integer(id)) if *id > 0 => *id,
            _ => self.next_id,
        };
        if self.rows.iter().any(|row| row.get("id") == Some(&Value::Integer(id))) {
            let mut response = MutationResponse::failed("invoice number already used");
            response
                .field_errors
                .insert("id".to_owned(), "already used".to_owned());
            return Ok(response);
        }
        self.next_id = self.next_id.max(id + 1);
        stored.set("id", id);
        if stored.get("active").is_none() {
            stored.set("active", true);
        }
        let keys = self.keys_of(&stored);
        self.rows.push(stored.clone());
        Ok(MutationResponse {
            position: self.position_of(&keys),
            record: Some(stored),
            ..MutationResponse::ok()
        })
    }

    fn update(&mut self, _form: &str, record: &Record, keys: &KeyParams) -> Result<MutationResponse> {
        self.calls.push(Call::Update(record.clone()));
        self.check_transport()?;
        if let Some(scripted) = self.scripted_mutations.pop_front() {
            return Ok(scripted);
        }
        let Some(at) = self.rows.iter().position(|row| self.matches_keys(row, keys)) else {
            return Ok(MutationResponse::failed("record no longer exists"));
        };
        self.rows[at].merge(record);
        Ok(MutationResponse {
            record: Some(self.rows[at].clone()),
            ..MutationResponse::ok()
        })
    }

    fn delete(&mut self, _form: &str, keys: &KeyParams) -> Result<MutationResponse> {
        self.calls.push(Call::Delete(keys.clone()));
        self.check_transport()?;
        if let Some(scripted) = self.scripted_mutations.pop_front() {
            return Ok(scripted);
        }
        let query = self.last_query.clone();
        let before = query
            .as_ref()
            .map(|query| self.listing(query, true))
            .unwrap_or_default();
        let Some(at) = self.rows.iter().position(|row| self.matches_keys(row, keys)) else {
            return Ok(MutationResponse::failed("record no longer exists"));
        };
        let slot = before.iter().position(|row| self.matches_keys(row, keys));
        self.rows.remove(at);

        let position = query.map(|query| {
            let rows = self.listing(&query, true);
            let limit = query.limit.max(1) as usize;
            let total = rows.len();
            let at = slot.unwrap_or(0).min(total.saturating_sub(1));
            Position {
                page: (at / limit) as u32 + 1,
                index: at % limit,
                total_records: total as u64,
            }
        });
        Ok(MutationResponse {
            position,
            ..MutationResponse::ok()
        })
    }

    fn change(&mut self, _form: &str, request: &ChangeRequest) -> Result<ChangeResponse> {
        self.calls.push(Call::Change(request.clone()));
        self.check_transport()?;
        if let Some(scripted) = self.scripted_changes.get(&request.action) {
            return Ok(scripted.clone());
        }
        if request.action == "city_changed"
            && let Some(region) = region_for_city(&request.value.display())
        {
            return Ok(ChangeResponse {
                record: Some(Record::new().with("region", region)),
                ..ChangeResponse::default()
            });
        }
        Ok(ChangeResponse::default())
    }

    fn rebuild(&mut self, _form: &str, query: &PageQuery) -> Result<LoadResponse> {
        self.calls.push(Call::Rebuild(query.clone()));
        self.check_transport()?;
        let mut listing_query = query.clone();
        listing_query.filters.clear();
        listing_query.search = None;
        let rows = self.listing(&listing_query, false);
        let limit = query.limit.max(1) as usize;
        let at = rows
            .iter()
            .position(|row| self.matches_keys(row, &query.keyfields));
        let page = at.map_or(1, |at| (at / limit) as u32 + 1);
        let mut response = Self::page_of(&rows, page, query.limit);
        response.position = at.map(|at| Position {
            page,
            index: at % limit,
            total_records: rows.len() as u64,
        });
        listing_query.page = page;
        listing_query.keyfields.clear();
        self.last_query = Some(listing_query);
        Ok(response)
    }

    fn save_active_filter(&mut self, _form: &str, filter: ActiveFilter) -> Result<()> {
        self.calls.push(Call::SaveActiveFilter(filter));
        self.check_transport()?;
        self.saved_active_filter = Some(filter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Call, FakeBackend};
    use dynaform_app::{
        ActiveFilter, FormBackend, PageQuery, Record, SortDirection, SortSpec, Value,
    };

    fn query(page: u32, limit: u32) -> PageQuery {
        PageQuery {
            page,
            limit,
            search: None,
            sort: None,
            filters: Vec::new(),
            keyfields: Vec::new(),
            active_filter: None,
            change: false,
        }
    }

    #[test]
    fn pages_slice_the_listing() -> anyhow::Result<()> {
        let mut backend = FakeBackend::invoices(120, 50);
        let last = backend.load_page("invoice_form", &query(3, 50))?;
        assert_eq!(last.records.len(), 20);
        assert_eq!(last.max_records, 120);
        assert_eq!(last.page_count, 3);
        assert_eq!(last.current_page, Some(3));
        Ok(())
    }

    #[test]
    fn sort_and_filter_apply_before_paging() -> anyhow::Result<()> {
        let mut backend = FakeBackend::invoices(30, 10);
        let mut sorted = query(1, 10);
        sorted.sort = Some(SortSpec {
            field: "id".to_owned(),
            direction: SortDirection::Desc,
        });
        let page = backend.load_page("invoice_form", &sorted)?;
        assert_eq!(page.records[0].get("id"), Some(&Value::Integer(30)));

        let mut filtered = query(1, 10);
        filtered.keyfields = vec![("id".to_owned(), "17".to_owned())];
        let page = backend.load_page("invoice_form", &filtered)?;
        assert_eq!(page.max_records, 1);
        Ok(())
    }

    #[test]
    fn create_reports_position_in_last_listing() -> anyhow::Result<()> {
        let mut backend = FakeBackend::invoices(120, 50);
        backend.load_page("invoice_form", &query(1, 50))?;
        let created = backend.create(
            "invoice_form",
            &Record::new().with("customer", "Zeta"),
            &Vec::new(),
        )?;
        assert!(created.success);
        let position = created.position.expect("position hint");
        assert_eq!((position.page, position.index, position.total_records), (3, 20, 121));
        Ok(())
    }

    #[test]
    fn scripted_failures_are_one_shot() -> anyhow::Result<()> {
        let mut backend = FakeBackend::invoices(5, 50);
        backend.fail_next("connection refused");
        assert!(backend.load_page("invoice_form", &query(1, 50)).is_err());
        assert!(backend.load_page("invoice_form", &query(1, 50)).is_ok());
        Ok(())
    }

    #[test]
    fn active_filter_is_remembered() -> anyhow::Result<()> {
        let mut backend = FakeBackend::invoices(5, 50);
        backend.save_active_filter("invoice_form", ActiveFilter::Inactive)?;
        assert_eq!(backend.saved_active_filter(), Some(ActiveFilter::Inactive));
        assert_eq!(
            backend.calls(),
            &[Call::SaveActiveFilter(ActiveFilter::Inactive)]
        );
        Ok(())
    }
}
