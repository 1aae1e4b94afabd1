// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    ActiveFilter, ChangeRequest, DEFAULT_ITEMS_PER_PAGE, FieldSchema, FormBackend, FormSchema,
    InitResponse, LoadResponse, MutationResponse, PageMeta, Position, QueryState, Record,
    RecordStore, SelectOptions, SortSpec, Value, key_params,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationMode {
    #[default]
    View,
    Add,
    Edit,
    Copy,
    DeletePending,
}

impl MutationMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Copy => "copy",
            Self::DeletePending => "delete",
        }
    }

    /// Modes that own a draft record.
    pub const fn is_editing(self) -> bool {
        matches!(self, Self::Add | Self::Edit | Self::Copy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    DiscardChanges,
    Delete,
}

impl Confirmation {
    pub const fn prompt(self) -> &'static str {
        match self {
            Self::DiscardChanges => "discard unsaved changes?",
            Self::Delete => "delete this record?",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBox {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormCommand {
    LoadPage(u32),
    NextPage,
    PrevPage,
    FirstPage,
    LastPage,
    Reload,
    Select(usize),
    Add,
    Copy,
    Edit,
    Cancel,
    Save,
    Delete,
    Confirm,
    Decline,
    SetField { field: String, raw: String },
    SetValue { field: String, value: Value },
    FireChangeAction(String),
    ToggleSort(String),
    SetLiveFilter { field: String, text: String },
    CommitFilters,
    OpenSearch,
    CloseSearch,
    SetSearch(String),
    SubmitSearch,
    SetKeyfield { field: String, value: Value },
    SetActiveFilter(ActiveFilter),
    Rebuild,
    DismissMessage,
    ClearStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormEvent {
    PageLoaded { page: u32, records: usize },
    Selected(Option<usize>),
    ModeChanged(MutationMode),
    ConfirmationRequested(Confirmation),
    DraftChanged(String),
    FieldErrorsMarked(Vec<String>),
    RecordSaved,
    RecordDeleted,
    OptionsChanged,
    FieldStateChanged,
    SortChanged(SortSpec),
    FiltersChanged,
    SearchChanged,
    MessageShown(String),
    MessageDismissed,
    StatusUpdated(String),
    StatusCleared,
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default)]
struct FetchOptions {
    skip_auto_select: bool,
    keyfield_change: bool,
}

/// One open form: schema, loaded page, query criteria and the record-editing
/// state machine.
///
/// All server calls happen inside [`FormSession::dispatch`], which holds
/// `&mut self` across the request, so at most one workflow action is ever in
/// flight and its response is applied by the call that issued it.
#[derive(Debug, Clone)]
pub struct FormSession {
    schema: FormSchema,
    options: SelectOptions,
    store: RecordStore,
    query: QueryState,
    mode: MutationMode,
    pending: Option<Confirmation>,
    message: Option<MessageBox>,
    field_errors: BTreeMap<String, String>,
    editable_overrides: BTreeMap<String, bool>,
    hidden_overrides: BTreeSet<String>,
    table_max_height: Option<Value>,
    status_line: Option<String>,
}

impl FormSession {
    /// Initializes the form and loads its first page.
    pub fn open<B: FormBackend + ?Sized>(backend: &mut B, form_id: &str) -> Result<Self> {
        let init = backend
            .init(form_id)
            .with_context(|| format!("initialize form {form_id:?}"))?;
        let mut session = Self::from_init(form_id, init)?;
        let events = session.fetch_page(backend, 1, FetchOptions::default())?;
        if let Some(FormEvent::PageLoaded { records, .. }) = events.first() {
            let status = format!(
                "{records} of {} records",
                session.store.pagination().total_records
            );
            session.set_status(&status);
        }
        Ok(session)
    }

    pub fn from_init(form_id: &str, init: InitResponse) -> Result<Self> {
        let schema = FormSchema::new(form_id, init.fields)?;
        let mut store = RecordStore::default();
        store.set_items_per_page(init.items_per_page.unwrap_or(DEFAULT_ITEMS_PER_PAGE));
        let mut query = QueryState::default();
        query.configure_active_filter(
            init.has_active_field,
            init.active_filter.unwrap_or_default(),
        );
        Ok(Self {
            schema,
            options: SelectOptions::new(init.select_options_fix, init.select_options),
            store,
            query,
            mode: MutationMode::View,
            pending: None,
            message: None,
            field_errors: BTreeMap::new(),
            editable_overrides: BTreeMap::new(),
            hidden_overrides: BTreeSet::new(),
            table_max_height: init.table_max_height,
            status_line: None,
        })
    }

    pub fn dispatch<B: FormBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        command: FormCommand,
    ) -> Vec<FormEvent> {
        if self.pending.is_some() {
            return match command {
                FormCommand::Confirm => self.confirm(backend),
                FormCommand::Decline | FormCommand::Cancel => self.decline(),
                _ => Vec::new(),
            };
        }
        if self.message.is_some() {
            return match command {
                FormCommand::DismissMessage | FormCommand::Confirm | FormCommand::Decline => {
                    self.message = None;
                    vec![FormEvent::MessageDismissed]
                }
                _ => Vec::new(),
            };
        }

        match command {
            FormCommand::LoadPage(page) => self.goto_page(backend, page),
            FormCommand::NextPage => {
                let page = self.store.pagination().current_page.saturating_add(1);
                self.goto_page(backend, page)
            }
            FormCommand::PrevPage => {
                let page = self.store.pagination().current_page.saturating_sub(1);
                self.goto_page(backend, page)
            }
            FormCommand::FirstPage => self.goto_page(backend, 1),
            FormCommand::LastPage => {
                let page = self.store.pagination().total_pages;
                self.goto_page(backend, page)
            }
            FormCommand::Reload => {
                if !self.in_view() {
                    return Vec::new();
                }
                let page = self.store.pagination().current_page;
                self.fetch_or_fail(backend, page, FetchOptions::default())
            }
            FormCommand::Select(index) => {
                if !self.in_view() || !self.store.select_by_index(index) {
                    return Vec::new();
                }
                vec![FormEvent::Selected(Some(index))]
            }
            FormCommand::Add => self.begin_add(),
            FormCommand::Copy => self.begin_from_active(MutationMode::Copy),
            FormCommand::Edit => self.begin_from_active(MutationMode::Edit),
            FormCommand::Cancel => self.cancel(),
            FormCommand::Save => self.save(backend),
            FormCommand::Delete => self.request_delete(),
            FormCommand::Confirm | FormCommand::Decline | FormCommand::DismissMessage => Vec::new(),
            FormCommand::SetField { field, raw } => self.set_field(&field, &raw),
            FormCommand::SetValue { field, value } => self.set_value(&field, value),
            FormCommand::FireChangeAction(field) => self.fire_change_action(backend, &field),
            FormCommand::ToggleSort(field) => {
                if !self.in_view() || self.schema.field(&field).is_none() {
                    return Vec::new();
                }
                let previous = self.query.sort().cloned();
                let spec = self.query.toggle_sort(&field);
                match self.fetch_page(backend, 1, FetchOptions::default()) {
                    Ok(loaded) => {
                        let mut events = vec![FormEvent::SortChanged(spec)];
                        events.extend(loaded);
                        events
                    }
                    Err(error) => {
                        self.query.restore_sort(previous);
                        self.fail(error)
                    }
                }
            }
            FormCommand::SetLiveFilter { field, text } => {
                if self.query.set_live_filter(&field, &text) {
                    vec![FormEvent::FiltersChanged]
                } else {
                    Vec::new()
                }
            }
            FormCommand::CommitFilters => {
                if !self.in_view() {
                    return Vec::new();
                }
                self.query.commit_filters();
                let mut events = vec![FormEvent::FiltersChanged];
                events.extend(self.fetch_or_fail(backend, 1, FetchOptions::default()));
                events
            }
            FormCommand::OpenSearch => {
                if !self.in_view() || self.query.search_open() {
                    return Vec::new();
                }
                self.query.open_search();
                vec![FormEvent::SearchChanged]
            }
            FormCommand::CloseSearch => {
                if self.query.close_search() {
                    vec![FormEvent::SearchChanged]
                } else {
                    Vec::new()
                }
            }
            FormCommand::SetSearch(text) => {
                self.query.set_search(&text);
                vec![FormEvent::SearchChanged]
            }
            FormCommand::SubmitSearch => {
                if !self.in_view() {
                    return Vec::new();
                }
                self.fetch_or_fail(backend, 1, FetchOptions::default())
            }
            FormCommand::SetKeyfield { field, value } => {
                if !self.in_view() || self.schema.field(&field).is_none() {
                    return Vec::new();
                }
                self.query.set_keyfield(&field, value);
                self.fetch_or_fail(
                    backend,
                    1,
                    FetchOptions {
                        keyfield_change: true,
                        ..FetchOptions::default()
                    },
                )
            }
            FormCommand::SetActiveFilter(filter) => self.set_active_filter(backend, filter),
            FormCommand::Rebuild => self.rebuild(backend),
            FormCommand::ClearStatus => {
                self.status_line = None;
                vec![FormEvent::StatusCleared]
            }
        }
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn form_id(&self) -> &str {
        self.schema.form_id()
    }

    pub fn options(&self) -> &SelectOptions {
        &self.options
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    pub fn mode(&self) -> MutationMode {
        self.mode
    }

    pub fn pending_confirmation(&self) -> Option<Confirmation> {
        self.pending
    }

    pub fn message(&self) -> Option<&MessageBox> {
        self.message.as_ref()
    }

    pub fn has_dialog(&self) -> bool {
        self.pending.is_some() || self.message.is_some()
    }

    pub fn status_line(&self) -> Option<&str> {
        self.status_line.as_deref()
    }

    pub fn table_max_height(&self) -> Option<&Value> {
        self.table_max_height.as_ref()
    }

    pub fn field_errors(&self) -> &BTreeMap<String, String> {
        &self.field_errors
    }

    pub fn field_error(&self, field: &str) -> Option<&str> {
        self.field_errors.get(field).map(String::as_str)
    }

    pub fn active_record(&self) -> Option<&Record> {
        self.store.active()
    }

    pub fn draft(&self) -> Option<&Record> {
        self.store.draft()
    }

    /// The record the form panel shows: the draft while editing, else the
    /// active record.
    pub fn current_record(&self) -> Option<&Record> {
        if self.mode.is_editing() {
            self.store.draft()
        } else {
            self.store.active()
        }
    }

    /// Display order of the loaded page under the live filters and sort.
    pub fn view_rows(&self) -> Vec<usize> {
        self.store
            .view(&self.schema, self.query.live_filters(), self.query.sort())
    }

    pub fn is_field_visible(&self, field: &str) -> bool {
        self.schema
            .field(field)
            .is_some_and(|schema| !schema.hidden && !self.hidden_overrides.contains(field))
    }

    pub fn is_field_editable(&self, field: &str) -> bool {
        if !self.mode.is_editing() {
            return false;
        }
        let Some(schema) = self.schema.field(field) else {
            return false;
        };
        if schema.keyfield && self.mode == MutationMode::Edit {
            return false;
        }
        self.editable_overrides
            .get(field)
            .copied()
            .unwrap_or(schema.editable)
    }

    /// Positions of the fields that take focus in the form, in schema order.
    pub fn focusable_fields(&self) -> Vec<usize> {
        self.schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| {
                self.is_field_visible(&field.field_name) && self.is_field_editable(&field.field_name)
            })
            .map(|(position, _)| position)
            .collect()
    }

    fn in_view(&self) -> bool {
        self.mode == MutationMode::View
    }

    fn set_status(&mut self, message: &str) -> FormEvent {
        self.status_line = Some(message.to_owned());
        FormEvent::StatusUpdated(message.to_owned())
    }

    fn fail(&mut self, error: anyhow::Error) -> Vec<FormEvent> {
        let message = format!("{error:#}");
        self.status_line = Some(message.clone());
        vec![FormEvent::Failed(message)]
    }

    fn show_message(&mut self, text: &str) -> FormEvent {
        self.message = Some(MessageBox {
            text: text.to_owned(),
        });
        FormEvent::MessageShown(text.to_owned())
    }

    fn goto_page<B: FormBackend + ?Sized>(&mut self, backend: &mut B, page: u32) -> Vec<FormEvent> {
        if !self.in_view() {
            return Vec::new();
        }
        let page = self.store.pagination().clamp(page);
        self.fetch_or_fail(backend, page, FetchOptions::default())
    }

    fn fetch_or_fail<B: FormBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        page: u32,
        options: FetchOptions,
    ) -> Vec<FormEvent> {
        match self.fetch_page(backend, page, options) {
            Ok(events) => events,
            Err(error) => self.fail(error),
        }
    }

    /// Issues exactly one listing request. On failure the loaded page is kept.
    fn fetch_page<B: FormBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        page: u32,
        options: FetchOptions,
    ) -> Result<Vec<FormEvent>> {
        let limit = self.store.pagination().items_per_page;
        let query = self.query.page_query(page, limit, options.keyfield_change);
        let response = backend
            .load_page(self.schema.form_id(), &query)
            .with_context(|| format!("load page {page}"))?;
        Ok(self.apply_page(response, page, options.skip_auto_select))
    }

    fn apply_page(
        &mut self,
        response: LoadResponse,
        requested_page: u32,
        skip_auto_select: bool,
    ) -> Vec<FormEvent> {
        let LoadResponse {
            records,
            max_records,
            page_count,
            current_page,
            current_index,
            select_options,
            ..
        } = response;
        let page = current_page.unwrap_or(requested_page);
        let count = records.len();
        self.store.set_page(
            records,
            PageMeta {
                current_page: page,
                total_records: max_records,
                total_pages: page_count,
            },
        );

        let mut events = vec![FormEvent::PageLoaded {
            page,
            records: count,
        }];
        if let Some(options) = select_options {
            self.options.replace_dynamic(options);
            events.push(FormEvent::OptionsChanged);
        }
        match current_index {
            Some(index) => self.select_or_last(index),
            None if !skip_auto_select => {
                self.store.select_by_index(0);
            }
            None => {}
        }
        events.push(FormEvent::Selected(self.store.active_index()));
        events
    }

    /// Selects `index`, or the page's last record when it is out of range.
    fn select_or_last(&mut self, index: usize) {
        if self.store.select_by_index(index) {
            return;
        }
        if let Some(last) = self.store.last_index() {
            self.store.select_by_index(last);
        }
    }

    /// Re-fetches the hinted page and selects the hinted record on it.
    fn smart_jump<B: FormBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        position: Position,
    ) -> Result<Vec<FormEvent>> {
        self.store.set_totals(position.total_records);
        let page = self.store.pagination().clamp(position.page);
        let mut events = self.fetch_page(
            backend,
            page,
            FetchOptions {
                skip_auto_select: true,
                ..FetchOptions::default()
            },
        )?;
        self.select_or_last(position.index);
        events.push(FormEvent::Selected(self.store.active_index()));
        Ok(events)
    }

    fn reset_edit_state(&mut self) {
        self.field_errors.clear();
        self.editable_overrides.clear();
        self.hidden_overrides.clear();
    }

    /// Field overrides from a change action fired in view carry into the
    /// mutation and are dropped when it ends.
    fn enter_mode(&mut self, mode: MutationMode, draft: Record) -> Vec<FormEvent> {
        self.field_errors.clear();
        self.store.begin_draft(draft);
        self.mode = mode;
        let status = self.set_status(mode.as_str());
        vec![FormEvent::ModeChanged(mode), status]
    }

    fn return_to_view(&mut self) -> Vec<FormEvent> {
        self.store.discard_draft();
        self.reset_edit_state();
        self.mode = MutationMode::View;
        vec![FormEvent::ModeChanged(MutationMode::View)]
    }

    fn begin_add(&mut self) -> Vec<FormEvent> {
        if !self.in_view() {
            return Vec::new();
        }
        let mut draft: Record = self
            .schema
            .fields()
            .iter()
            .map(|field| (field.field_name.clone(), field.field_type.zero_value()))
            .collect();
        for (field, value) in self.query.keyfields() {
            if self.schema.field(field).is_some() {
                draft.set(field.clone(), value.clone());
            }
        }
        self.enter_mode(MutationMode::Add, draft)
    }

    fn begin_from_active(&mut self, mode: MutationMode) -> Vec<FormEvent> {
        if !self.in_view() {
            return Vec::new();
        }
        let Some(active) = self.store.active().cloned() else {
            return Vec::new();
        };
        self.enter_mode(mode, active)
    }

    fn cancel(&mut self) -> Vec<FormEvent> {
        if !self.mode.is_editing() {
            return Vec::new();
        }
        if self.store.is_dirty() {
            self.pending = Some(Confirmation::DiscardChanges);
            return vec![FormEvent::ConfirmationRequested(
                Confirmation::DiscardChanges,
            )];
        }
        self.return_to_view()
    }

    fn request_delete(&mut self) -> Vec<FormEvent> {
        if !self.in_view() || self.store.active().is_none() {
            return Vec::new();
        }
        self.mode = MutationMode::DeletePending;
        self.pending = Some(Confirmation::Delete);
        vec![
            FormEvent::ModeChanged(MutationMode::DeletePending),
            FormEvent::ConfirmationRequested(Confirmation::Delete),
        ]
    }

    fn confirm<B: FormBackend + ?Sized>(&mut self, backend: &mut B) -> Vec<FormEvent> {
        match self.pending.take() {
            Some(Confirmation::DiscardChanges) => {
                let mut events = self.return_to_view();
                events.push(self.set_status("changes discarded"));
                events
            }
            Some(Confirmation::Delete) => self.delete(backend),
            None => Vec::new(),
        }
    }

    fn decline(&mut self) -> Vec<FormEvent> {
        match self.pending.take() {
            Some(Confirmation::Delete) => {
                self.mode = MutationMode::View;
                vec![FormEvent::ModeChanged(MutationMode::View)]
            }
            Some(Confirmation::DiscardChanges) | None => Vec::new(),
        }
    }

    fn delete<B: FormBackend + ?Sized>(&mut self, backend: &mut B) -> Vec<FormEvent> {
        self.mode = MutationMode::View;
        let mut events = vec![FormEvent::ModeChanged(MutationMode::View)];
        let Some(active) = self.store.active() else {
            return events;
        };
        let keys = key_params(&self.schema, active);
        let response = match backend.delete(self.schema.form_id(), &keys) {
            Ok(response) => response,
            Err(error) => {
                events.extend(self.fail(error.context("delete record")));
                return events;
            }
        };
        if !response.success {
            let text = response
                .message_text()
                .unwrap_or("delete failed")
                .to_owned();
            events.push(self.show_message(&text));
            return events;
        }

        events.push(FormEvent::RecordDeleted);
        events.push(self.set_status("deleted"));
        let outcome = match response.position {
            Some(position) if position.total_records == 0 => {
                self.store.clear();
                Ok(vec![
                    FormEvent::PageLoaded {
                        page: 1,
                        records: 0,
                    },
                    FormEvent::Selected(None),
                ])
            }
            Some(position) => self.smart_jump(backend, position),
            None => {
                let page = self.store.pagination().current_page;
                self.fetch_page(backend, page, FetchOptions::default())
            }
        };
        match outcome {
            Ok(more) => events.extend(more),
            Err(error) => events.extend(self.fail(error)),
        }
        events
    }

    fn missing_required(&self, draft: &Record) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .filter(|field| field.required)
            .filter(|field| {
                self.is_field_visible(&field.field_name) && self.is_field_editable(&field.field_name)
            })
            .filter(|field| draft.get(&field.field_name).is_none_or(Value::is_empty))
            .map(|field| field.field_name.clone())
            .collect()
    }

    fn save<B: FormBackend + ?Sized>(&mut self, backend: &mut B) -> Vec<FormEvent> {
        let mode = self.mode;
        if !mode.is_editing() {
            return Vec::new();
        }
        let Some(draft) = self.store.draft().cloned() else {
            return Vec::new();
        };

        if !self.field_errors.is_empty() {
            let marked: Vec<String> = self.field_errors.keys().cloned().collect();
            let status = self.set_status("correct the marked fields before saving");
            return vec![FormEvent::FieldErrorsMarked(marked), status];
        }

        let missing = self.missing_required(&draft);
        if !missing.is_empty() {
            for field in &missing {
                self.field_errors
                    .insert(field.clone(), "required".to_owned());
            }
            let status = self.set_status("fill in the required fields");
            return vec![FormEvent::FieldErrorsMarked(missing), status];
        }

        let form = self.schema.form_id().to_owned();
        let keys = key_params(&self.schema, &draft);
        let sent = if mode == MutationMode::Edit {
            backend.update(&form, &draft, &keys)
        } else {
            backend.create(&form, &draft, &keys)
        };
        let response = match sent {
            Ok(response) => response,
            Err(error) => return self.fail(error.context("save record")),
        };
        if !response.success {
            return self.reject_save(response);
        }

        let mut events = self.return_to_view();
        events.push(FormEvent::RecordSaved);
        events.push(self.set_status("saved"));
        if mode == MutationMode::Edit {
            self.store.patch_active(response.record.unwrap_or(draft));
            events.push(FormEvent::Selected(self.store.active_index()));
            return events;
        }

        let outcome = match response.position {
            Some(position) => self.smart_jump(backend, position),
            None => {
                let page = self.store.pagination().current_page;
                self.fetch_page(backend, page, FetchOptions::default())
            }
        };
        match outcome {
            Ok(more) => events.extend(more),
            Err(error) => events.extend(self.fail(error)),
        }
        events
    }

    /// Domain failure: the mode stays, fields get marked, the message shows.
    fn reject_save(&mut self, response: MutationResponse) -> Vec<FormEvent> {
        let text = response.message_text().map(str::to_owned);
        let mut events = Vec::new();
        if !response.field_errors.is_empty() {
            let fields: Vec<String> = response.field_errors.keys().cloned().collect();
            self.field_errors.extend(response.field_errors);
            events.push(FormEvent::FieldErrorsMarked(fields));
            let status = text.unwrap_or_else(|| "fix the marked fields".to_owned());
            events.push(self.set_status(&status));
            return events;
        }
        let text = text.unwrap_or_else(|| "save failed".to_owned());
        events.push(self.show_message(&text));
        events
    }

    fn set_field(&mut self, field: &str, raw: &str) -> Vec<FormEvent> {
        let Some(schema) = self.editable_field(field) else {
            return Vec::new();
        };
        match Value::parse_for_type(schema.field_type, raw) {
            Ok(value) => self.set_value(field, value),
            Err(error) => {
                let message = format!("{error:#}");
                self.field_errors.insert(field.to_owned(), message.clone());
                let status = self.set_status(&message);
                vec![FormEvent::FieldErrorsMarked(vec![field.to_owned()]), status]
            }
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Vec<FormEvent> {
        if self.editable_field(field).is_none() || !self.store.edit_draft(field, value) {
            return Vec::new();
        }
        self.field_errors.remove(field);
        vec![FormEvent::DraftChanged(field.to_owned())]
    }

    fn editable_field(&self, field: &str) -> Option<&FieldSchema> {
        if !self.is_field_editable(field) {
            return None;
        }
        self.schema.field(field)
    }

    fn fire_change_action<B: FormBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        field: &str,
    ) -> Vec<FormEvent> {
        let Some(action) = self
            .schema
            .field(field)
            .and_then(|schema| schema.on_change_action.clone())
        else {
            return Vec::new();
        };
        let Some(record) = self.current_record() else {
            return Vec::new();
        };
        let request = ChangeRequest {
            field: field.to_owned(),
            action,
            value: record.get(field).cloned().unwrap_or_default(),
            keyfields: key_params(&self.schema, record),
        };
        let response = match backend.change(self.schema.form_id(), &request) {
            Ok(response) => response,
            Err(error) => return self.fail(error.context(format!("change action on {field}"))),
        };

        let mut events = Vec::new();
        if let Some(patch) = &response.record {
            if self.mode.is_editing() {
                self.store.patch_draft(patch);
            } else if let Some(mut active) = self.store.active().cloned() {
                active.merge(patch);
                self.store.patch_active(active);
            }
            events.push(FormEvent::DraftChanged(field.to_owned()));
        }
        if let Some(options) = &response.select_options {
            self.options.merge_dynamic(options.clone());
            events.push(FormEvent::OptionsChanged);
        }
        let touches_fields = !response.enabled_fields.is_empty()
            || !response.disabled_fields.is_empty()
            || !response.hidden_fields.is_empty();
        for name in &response.enabled_fields {
            self.editable_overrides.insert(name.clone(), true);
        }
        for name in &response.disabled_fields {
            self.editable_overrides.insert(name.clone(), false);
        }
        for name in &response.hidden_fields {
            self.hidden_overrides.insert(name.clone());
        }
        if touches_fields {
            events.push(FormEvent::FieldStateChanged);
        }
        if let Some(text) = response.message_text().map(str::to_owned) {
            events.push(self.show_message(&text));
        }
        events
    }

    fn set_active_filter<B: FormBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        filter: ActiveFilter,
    ) -> Vec<FormEvent> {
        if !self.in_view() || !self.query.has_active_field() {
            return Vec::new();
        }
        if let Err(error) = backend.save_active_filter(self.schema.form_id(), filter) {
            return self.fail(error.context("save active filter"));
        }
        self.query.set_active_filter(filter);
        let mut events = vec![self.set_status(&format!("showing {}", filter.as_str()))];
        events.extend(self.fetch_or_fail(backend, 1, FetchOptions::default()));
        events
    }

    fn rebuild<B: FormBackend + ?Sized>(&mut self, backend: &mut B) -> Vec<FormEvent> {
        if !self.in_view() {
            return Vec::new();
        }
        let mut cleared = self.query.clone();
        cleared.clear_filters();
        let limit = self.store.pagination().items_per_page;
        let mut query = cleared.page_query(1, limit, false);
        if let Some(active) = self.store.active() {
            query.keyfields = key_params(&self.schema, active);
        }
        let response = match backend.rebuild(self.schema.form_id(), &query) {
            Ok(response) => response,
            Err(error) => return self.fail(error.context("rebuild listing")),
        };
        self.query = cleared;
        let position = response.position;
        let mut events = vec![FormEvent::FiltersChanged, FormEvent::SearchChanged];
        events.extend(self.apply_page(response, 1, position.is_some()));
        if let Some(position) = position {
            self.select_or_last(position.index);
            events.push(FormEvent::Selected(self.store.active_index()));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::{FormCommand, FormEvent, FormSession, MutationMode};
    use crate::{
        ActiveFilter, ChangeRequest, ChangeResponse, FieldSchema, FieldType, FormBackend,
        InitResponse, KeyParams, LoadResponse, MutationResponse, PageQuery, Record,
    };
    use anyhow::{Result, bail};

    struct Offline;

    impl FormBackend for Offline {
        fn init(&mut self, _form: &str) -> Result<InitResponse> {
            bail!("offline")
        }
        fn load_page(&mut self, _form: &str, _query: &PageQuery) -> Result<LoadResponse> {
            bail!("offline")
        }
        fn create(&mut self, _: &str, _: &Record, _: &KeyParams) -> Result<MutationResponse> {
            bail!("offline")
        }
        fn update(&mut self, _: &str, _: &Record, _: &KeyParams) -> Result<MutationResponse> {
            bail!("offline")
        }
        fn delete(&mut self, _: &str, _: &KeyParams) -> Result<MutationResponse> {
            bail!("offline")
        }
        fn change(&mut self, _: &str, _: &ChangeRequest) -> Result<ChangeResponse> {
            bail!("offline")
        }
        fn rebuild(&mut self, _: &str, _: &PageQuery) -> Result<LoadResponse> {
            bail!("offline")
        }
        fn save_active_filter(&mut self, _: &str, _: ActiveFilter) -> Result<()> {
            bail!("offline")
        }
    }

    fn session() -> FormSession {
        let init = InitResponse {
            fields: vec![
                FieldSchema::new("id", "Id", FieldType::Integer).key(),
                FieldSchema::new("customer", "Customer", FieldType::Text).required(),
                FieldSchema::new("paid", "Paid", FieldType::Logical),
            ],
            ..InitResponse::default()
        };
        FormSession::from_init("invoice_form", init).expect("session builds")
    }

    #[test]
    fn add_is_allowed_on_an_empty_page_and_seeds_zero_values() {
        let mut session = session();
        let events = session.dispatch(&mut Offline, FormCommand::Add);
        assert_eq!(events[0], FormEvent::ModeChanged(MutationMode::Add));
        let draft = session.draft().expect("draft exists");
        assert_eq!(draft.display("customer"), "");
        assert_eq!(draft.display("paid"), "false");
        assert_eq!(draft.display("id"), "0");
    }

    #[test]
    fn edit_and_copy_need_an_active_record() {
        let mut session = session();
        assert!(session.dispatch(&mut Offline, FormCommand::Edit).is_empty());
        assert!(session.dispatch(&mut Offline, FormCommand::Copy).is_empty());
        assert!(session.dispatch(&mut Offline, FormCommand::Delete).is_empty());
        assert_eq!(session.mode(), MutationMode::View);
    }

    #[test]
    fn required_fields_are_checked_before_any_request() {
        let mut session = session();
        session.dispatch(&mut Offline, FormCommand::Add);
        let events = session.dispatch(&mut Offline, FormCommand::Save);
        assert_eq!(
            events[0],
            FormEvent::FieldErrorsMarked(vec!["customer".to_owned()])
        );
        assert_eq!(session.mode(), MutationMode::Add);
        assert_eq!(session.field_error("customer"), Some("required"));

        session.dispatch(
            &mut Offline,
            FormCommand::SetField {
                field: "customer".to_owned(),
                raw: "Acme".to_owned(),
            },
        );
        assert_eq!(session.field_error("customer"), None);
    }

    #[test]
    fn transport_failure_keeps_mode_and_reports() {
        let mut session = session();
        session.dispatch(&mut Offline, FormCommand::Add);
        session.dispatch(
            &mut Offline,
            FormCommand::SetField {
                field: "customer".to_owned(),
                raw: "Acme".to_owned(),
            },
        );
        let events = session.dispatch(&mut Offline, FormCommand::Save);
        assert!(matches!(events.as_slice(), [FormEvent::Failed(message)] if message.contains("offline")));
        assert_eq!(session.mode(), MutationMode::Add);
        assert!(session.status_line().is_some_and(|line| line.contains("save record")));
    }

    #[test]
    fn malformed_input_marks_the_field_and_keeps_the_draft() {
        let mut session = session();
        session.dispatch(&mut Offline, FormCommand::Add);
        let events = session.dispatch(
            &mut Offline,
            FormCommand::SetField {
                field: "id".to_owned(),
                raw: "abc".to_owned(),
            },
        );
        assert_eq!(events[0], FormEvent::FieldErrorsMarked(vec!["id".to_owned()]));
        assert_eq!(session.draft().map(|draft| draft.display("id")), Some("0".to_owned()));
        assert!(!session.store().is_dirty());
    }

    #[test]
    fn fetch_commands_are_ignored_while_editing() {
        let mut session = session();
        session.dispatch(&mut Offline, FormCommand::Add);
        assert!(session.dispatch(&mut Offline, FormCommand::NextPage).is_empty());
        assert!(
            session
                .dispatch(&mut Offline, FormCommand::ToggleSort("customer".to_owned()))
                .is_empty()
        );
        assert!(session.dispatch(&mut Offline, FormCommand::Rebuild).is_empty());
    }

    #[test]
    fn clean_cancel_returns_to_view_without_prompt() {
        let mut session = session();
        session.dispatch(&mut Offline, FormCommand::Add);
        let events = session.dispatch(&mut Offline, FormCommand::Cancel);
        assert_eq!(events, vec![FormEvent::ModeChanged(MutationMode::View)]);
        assert!(session.draft().is_none());
    }
}
