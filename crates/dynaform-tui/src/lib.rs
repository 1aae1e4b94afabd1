// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use dynaform_app::{
    Align, FieldSchema, FieldType, FieldWidth, Focus, FormBackend, FormCommand, FormEvent,
    FormSession, MutationMode, NavKey, Navigator, Record, SortDirection, Value,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap};
use std::io;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

const SORT_MARK_ASC: &str = "▲";
const SORT_MARK_DESC: &str = "▼";
const FILTER_MARK: &str = "▽";
const CURSOR_MARK: &str = "▏";
const PASSWORD_MASK: &str = "••••••";
const HEADER_HEIGHT: u16 = 3;
const STATUS_HEIGHT: u16 = 3;
const STATUS_CLEAR_AFTER: Duration = Duration::from_secs(4);

pub enum InternalEvent {
    ClearStatus { token: u64 },
}

/// Text being typed outside the record draft.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum InputState {
    #[default]
    Idle,
    Filter {
        field: String,
        text: String,
    },
    /// Unparsed text of the focused form field, committed on Enter.
    Field {
        field: String,
        buffer: String,
    },
}

#[derive(Debug, Clone, Default)]
struct ViewData {
    navigator: Navigator,
    column: usize,
    input: InputState,
    help_visible: bool,
    status_token: u64,
}

#[derive(Debug, Default)]
struct KeyOutcome {
    quit: bool,
    events: Vec<FormEvent>,
}

impl KeyOutcome {
    fn events(events: Vec<FormEvent>) -> Self {
        Self {
            quit: false,
            events,
        }
    }

    fn quit() -> Self {
        Self {
            quit: true,
            events: Vec::new(),
        }
    }
}

pub fn run_app<B: FormBackend>(session: &mut FormSession, backend: &mut B) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let terminal_backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(terminal_backend).context("create terminal")?;

    let mut view_data = ViewData::default();
    let (internal_tx, internal_rx) = mpsc::channel();
    if session.status_line().is_some() {
        bump_status(&mut view_data, &internal_tx);
    }

    let mut result = Ok(());
    loop {
        process_internal_events(session, backend, &view_data, &internal_rx);

        match terminal.size() {
            Ok(size) => {
                let areas = screen_areas(Rect::new(0, 0, size.width, size.height), session);
                fit_viewport(&mut view_data, areas.table);
            }
            Err(error) => {
                result = Err(error).context("read terminal size");
                break;
            }
        }

        if let Err(error) = terminal.draw(|frame| render(frame, session, &view_data)) {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = match event::poll(Duration::from_millis(120)).context("poll event") {
            Ok(has_event) => has_event,
            Err(error) => {
                result = Err(error);
                break;
            }
        };
        if !has_event {
            continue;
        }
        match event::read().context("read event") {
            Ok(Event::Key(key)) => {
                let outcome = handle_key_event(session, backend, &mut view_data, key);
                if outcome.quit {
                    break;
                }
                if outcome.events.iter().any(|event| {
                    matches!(event, FormEvent::StatusUpdated(_) | FormEvent::Failed(_))
                }) {
                    bump_status(&mut view_data, &internal_tx);
                }
            }
            Ok(_) => {}
            Err(error) => {
                result = Err(error);
                break;
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_internal_events<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &ViewData,
    rx: &Receiver<InternalEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == view_data.status_token => {
                session.dispatch(backend, FormCommand::ClearStatus);
            }
            InternalEvent::ClearStatus { .. } => {}
        }
    }
}

fn bump_status(view_data: &mut ViewData, internal_tx: &Sender<InternalEvent>) {
    view_data.status_token = view_data.status_token.saturating_add(1);
    let token = view_data.status_token;
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(STATUS_CLEAR_AFTER);
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn fit_viewport(view_data: &mut ViewData, table: Rect) {
    // Borders take two lines, the column header one.
    let height = usize::from(table.height.saturating_sub(2));
    view_data.navigator.set_viewport_height(height, 1);
}

fn handle_key_event<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &mut ViewData,
    key: KeyEvent,
) -> KeyOutcome {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return KeyOutcome::quit();
    }
    if view_data.help_visible {
        view_data.help_visible = false;
        return KeyOutcome::default();
    }
    if session.has_dialog() {
        return KeyOutcome::events(handle_dialog_key(session, backend, view_data, key));
    }
    if matches!(view_data.input, InputState::Filter { .. }) {
        return KeyOutcome::events(handle_filter_key(session, backend, view_data, key));
    }

    match view_data.navigator.focus() {
        Focus::Search => KeyOutcome::events(handle_search_key(session, backend, view_data, key)),
        Focus::Field(position) => {
            KeyOutcome::events(handle_field_key(session, backend, view_data, position, key))
        }
        Focus::Table => handle_table_key(session, backend, view_data, key),
    }
}

fn handle_dialog_key<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &mut ViewData,
    key: KeyEvent,
) -> Vec<FormEvent> {
    let command = if session.pending_confirmation().is_some() {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => FormCommand::Confirm,
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => FormCommand::Decline,
            _ => return Vec::new(),
        }
    } else {
        match key.code {
            KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ') => FormCommand::DismissMessage,
            _ => return Vec::new(),
        }
    };
    dispatch(session, backend, view_data, command)
}

fn handle_filter_key<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &mut ViewData,
    key: KeyEvent,
) -> Vec<FormEvent> {
    let InputState::Filter { field, text } = &mut view_data.input else {
        return Vec::new();
    };
    match key.code {
        KeyCode::Enter => {
            view_data.input = InputState::Idle;
            dispatch(session, backend, view_data, FormCommand::CommitFilters)
        }
        KeyCode::Esc => {
            view_data.input = InputState::Idle;
            Vec::new()
        }
        KeyCode::Backspace => {
            text.pop();
            let command = FormCommand::SetLiveFilter {
                field: field.clone(),
                text: text.clone(),
            };
            dispatch(session, backend, view_data, command)
        }
        KeyCode::Char(ch) => {
            text.push(ch);
            let command = FormCommand::SetLiveFilter {
                field: field.clone(),
                text: text.clone(),
            };
            dispatch(session, backend, view_data, command)
        }
        _ => Vec::new(),
    }
}

fn handle_search_key<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &mut ViewData,
    key: KeyEvent,
) -> Vec<FormEvent> {
    match key.code {
        KeyCode::Enter => drive(session, backend, view_data, NavKey::Enter),
        KeyCode::Esc => drive(session, backend, view_data, NavKey::Escape),
        KeyCode::Backspace => {
            let mut text = session.query().search().to_owned();
            text.pop();
            dispatch(session, backend, view_data, FormCommand::SetSearch(text))
        }
        KeyCode::Char(ch) => {
            let mut text = session.query().search().to_owned();
            text.push(ch);
            dispatch(session, backend, view_data, FormCommand::SetSearch(text))
        }
        _ => Vec::new(),
    }
}

fn handle_field_key<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &mut ViewData,
    position: usize,
    key: KeyEvent,
) -> Vec<FormEvent> {
    let Some(schema) = session.schema().fields().get(position).cloned() else {
        return Vec::new();
    };
    let field = schema.field_name.as_str();

    match key.code {
        KeyCode::Enter if key.modifiers.contains(KeyModifiers::SHIFT) => {
            let mut events = commit_field_input(session, backend, view_data);
            events.extend(drive(session, backend, view_data, NavKey::ShiftEnter));
            events
        }
        KeyCode::BackTab => {
            let mut events = commit_field_input(session, backend, view_data);
            events.extend(drive(session, backend, view_data, NavKey::ShiftEnter));
            events
        }
        KeyCode::Enter | KeyCode::Tab => {
            let mut events = commit_field_input(session, backend, view_data);
            events.extend(drive(session, backend, view_data, NavKey::Enter));
            events
        }
        KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let mut events = commit_field_input(session, backend, view_data);
            events.extend(dispatch(session, backend, view_data, FormCommand::Save));
            events
        }
        KeyCode::Esc => {
            view_data.input = InputState::Idle;
            drive(session, backend, view_data, NavKey::Escape)
        }
        KeyCode::Left | KeyCode::Right if schema.field_type == FieldType::Select => {
            let step = if key.code == KeyCode::Left { -1 } else { 1 };
            let Some(value) = cycle_option(session, field, step) else {
                return Vec::new();
            };
            set_value_and_follow(session, backend, view_data, field, value)
        }
        KeyCode::Char(' ') if schema.field_type == FieldType::Logical => {
            let checked = session
                .current_record()
                .and_then(|record| record.get(field))
                .is_some_and(Value::is_truthy);
            set_value_and_follow(session, backend, view_data, field, Value::Bool(!checked))
        }
        KeyCode::Backspace => {
            if let InputState::Field { buffer, .. } = &mut view_data.input {
                buffer.pop();
            }
            Vec::new()
        }
        KeyCode::Char(ch) if accepts_typing(&schema) => {
            if let InputState::Field { buffer, .. } = &mut view_data.input {
                let full = schema
                    .max_length
                    .is_some_and(|max| buffer.chars().count() >= max as usize);
                if !full {
                    buffer.push(ch);
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn handle_table_key<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &mut ViewData,
    key: KeyEvent,
) -> KeyOutcome {
    let control = key.modifiers.contains(KeyModifiers::CONTROL);
    let nav = match key.code {
        KeyCode::Enter => Some(NavKey::Enter),
        KeyCode::Esc => Some(NavKey::Escape),
        KeyCode::Down | KeyCode::Char('j') => Some(NavKey::Down),
        KeyCode::Up | KeyCode::Char('k') => Some(NavKey::Up),
        KeyCode::Home if control => Some(NavKey::CtrlHome),
        KeyCode::End if control => Some(NavKey::CtrlEnd),
        KeyCode::Char('g') => Some(NavKey::CtrlHome),
        KeyCode::Char('G') => Some(NavKey::CtrlEnd),
        _ => None,
    };
    if let Some(nav) = nav {
        return KeyOutcome::events(drive(session, backend, view_data, nav));
    }

    let column_field = current_column_field(session, view_data);
    let command = match key.code {
        KeyCode::Char('q') if session.mode() == MutationMode::View => return KeyOutcome::quit(),
        KeyCode::Char('?') => {
            view_data.help_visible = true;
            return KeyOutcome::default();
        }
        KeyCode::Left | KeyCode::Char('h') => {
            view_data.column = view_data.column.saturating_sub(1);
            return KeyOutcome::default();
        }
        KeyCode::Right | KeyCode::Char('l') => {
            let last = session.schema().table_fields().count().saturating_sub(1);
            view_data.column = (view_data.column + 1).min(last);
            return KeyOutcome::default();
        }
        KeyCode::Char('f') => {
            let Some(field) = column_field else {
                return KeyOutcome::default();
            };
            let text = session
                .query()
                .live_filters()
                .get(&field)
                .unwrap_or_default()
                .to_owned();
            view_data.input = InputState::Filter { field, text };
            return KeyOutcome::default();
        }
        KeyCode::Char('x') => {
            let Some(field) = column_field else {
                return KeyOutcome::default();
            };
            match next_keyfield_value(session, &field) {
                Some(value) => FormCommand::SetKeyfield { field, value },
                None => return KeyOutcome::default(),
            }
        }
        KeyCode::Char('s') => match column_field {
            Some(field) => FormCommand::ToggleSort(field),
            None => return KeyOutcome::default(),
        },
        KeyCode::Char('a') => FormCommand::Add,
        KeyCode::Char('c') => FormCommand::Copy,
        KeyCode::Char('e') => FormCommand::Edit,
        KeyCode::Char('d') | KeyCode::Delete => FormCommand::Delete,
        KeyCode::Char('/') => FormCommand::OpenSearch,
        KeyCode::PageDown | KeyCode::Char(']') => FormCommand::NextPage,
        KeyCode::PageUp | KeyCode::Char('[') => FormCommand::PrevPage,
        KeyCode::Char('<') => FormCommand::FirstPage,
        KeyCode::Char('>') => FormCommand::LastPage,
        KeyCode::Char('r') => FormCommand::Reload,
        KeyCode::Char('R') => FormCommand::Rebuild,
        KeyCode::Char('v') if session.query().has_active_field() => {
            FormCommand::SetActiveFilter(session.query().active_filter().next())
        }
        _ => return KeyOutcome::default(),
    };
    KeyOutcome::events(dispatch(session, backend, view_data, command))
}

fn dispatch<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &mut ViewData,
    command: FormCommand,
) -> Vec<FormEvent> {
    tracing::debug!(?command, "dispatch");
    let events = session.dispatch(backend, command);
    view_data.navigator.after_dispatch(session, &events);
    sync_input(session, view_data);
    events
}

fn drive<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &mut ViewData,
    key: NavKey,
) -> Vec<FormEvent> {
    let events = view_data.navigator.drive(session, backend, key);
    sync_input(session, view_data);
    events
}

/// Keeps the field buffer attached to whichever field has focus.
fn sync_input(session: &FormSession, view_data: &mut ViewData) {
    let Focus::Field(position) = view_data.navigator.focus() else {
        if matches!(view_data.input, InputState::Field { .. }) {
            view_data.input = InputState::Idle;
        }
        return;
    };
    let Some(schema) = session.schema().fields().get(position) else {
        view_data.input = InputState::Idle;
        return;
    };
    let attached = matches!(
        &view_data.input,
        InputState::Field { field, .. } if *field == schema.field_name
    );
    if !attached {
        view_data.input = InputState::Field {
            field: schema.field_name.clone(),
            buffer: session
                .current_record()
                .map(|record| record.display(&schema.field_name))
                .unwrap_or_default(),
        };
    }
}

fn commit_field_input<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &mut ViewData,
) -> Vec<FormEvent> {
    let (field, buffer) = match &view_data.input {
        InputState::Field { field, buffer } => (field.clone(), buffer.clone()),
        _ => return Vec::new(),
    };
    let Some(schema) = session.schema().field(&field) else {
        return Vec::new();
    };
    if !accepts_typing(schema) {
        return Vec::new();
    }
    let current = session
        .current_record()
        .map(|record| record.display(&field))
        .unwrap_or_default();
    if buffer == current {
        return Vec::new();
    }

    let command = FormCommand::SetField {
        field: field.clone(),
        raw: buffer,
    };
    let mut events = dispatch(session, backend, view_data, command);
    follow_change_action(session, backend, view_data, &field, &mut events);
    events
}

fn set_value_and_follow<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &mut ViewData,
    field: &str,
    value: Value,
) -> Vec<FormEvent> {
    let command = FormCommand::SetValue {
        field: field.to_owned(),
        value,
    };
    let mut events = dispatch(session, backend, view_data, command);
    follow_change_action(session, backend, view_data, field, &mut events);
    events
}

fn follow_change_action<B: FormBackend + ?Sized>(
    session: &mut FormSession,
    backend: &mut B,
    view_data: &mut ViewData,
    field: &str,
    events: &mut Vec<FormEvent>,
) {
    let changed = events
        .iter()
        .any(|event| matches!(event, FormEvent::DraftChanged(name) if name == field));
    let has_action = session
        .schema()
        .field(field)
        .is_some_and(|schema| schema.on_change_action.is_some());
    if changed && has_action {
        let follow_up = dispatch(
            session,
            backend,
            view_data,
            FormCommand::FireChangeAction(field.to_owned()),
        );
        events.extend(follow_up);
    }
}

fn accepts_typing(schema: &FieldSchema) -> bool {
    !matches!(schema.field_type, FieldType::Select | FieldType::Logical)
}

fn cycle_option(session: &FormSession, field: &str, step: isize) -> Option<Value> {
    let options = session.options().options_for(field);
    if options.is_empty() {
        return None;
    }
    let current = session
        .current_record()
        .map(|record| record.display(field))
        .unwrap_or_default();
    let next = match options.iter().position(|option| option.value == current) {
        Some(at) => (at as isize + step).rem_euclid(options.len() as isize) as usize,
        None => 0,
    };
    options
        .get(next)
        .map(|option| Value::text(option.value.clone()))
}

fn next_keyfield_value(session: &FormSession, field: &str) -> Option<Value> {
    let schema = session.schema().field(field)?;
    if !schema.keyfield {
        return None;
    }
    let options = session.options().options_for(field);
    let current = session
        .query()
        .keyfields()
        .get(field)
        .map(Value::display)
        .unwrap_or_default();
    let next = match options.iter().position(|option| option.value == current) {
        Some(at) => (at + 1) % options.len(),
        None => 0,
    };
    options
        .get(next)
        .map(|option| Value::text(option.value.clone()))
}

fn current_column_field(session: &FormSession, view_data: &ViewData) -> Option<String> {
    session
        .schema()
        .table_fields()
        .nth(view_data.column)
        .map(|field| field.field_name.clone())
}

struct ScreenAreas {
    header: Rect,
    table: Rect,
    form: Rect,
    status: Rect,
}

fn screen_areas(area: Rect, session: &FormSession) -> ScreenAreas {
    let form_rows = session
        .schema()
        .fields()
        .iter()
        .filter(|field| session.is_field_visible(&field.field_name))
        .count() as u16
        + 2;
    let body = area.height.saturating_sub(HEADER_HEIGHT + STATUS_HEIGHT);
    let form_height = form_rows.min(body / 2);
    let mut table_height = body.saturating_sub(form_height);
    if let Some(limit) = table_height_limit(session.table_max_height(), area.height) {
        table_height = table_height.min(limit.max(4));
    }

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Length(table_height),
            Constraint::Min(form_height),
            Constraint::Length(STATUS_HEIGHT),
        ])
        .split(area);
    ScreenAreas {
        header: layout[0],
        table: layout[1],
        form: layout[2],
        status: layout[3],
    }
}

/// Table height cap from the server hint: a row count or `<n>vh`.
fn table_height_limit(hint: Option<&Value>, screen_height: u16) -> Option<u16> {
    match hint? {
        Value::Integer(rows) if *rows > 0 => u16::try_from(*rows).ok(),
        Value::Text(text) => {
            let text = text.trim();
            if let Some(percent) = text.strip_suffix("vh") {
                let percent: u32 = percent.trim().parse().ok()?;
                let rows = u32::from(screen_height) * percent.min(100) / 100;
                u16::try_from(rows).ok()
            } else {
                text.parse().ok()
            }
        }
        _ => None,
    }
}

fn render(frame: &mut ratatui::Frame<'_>, session: &FormSession, view_data: &ViewData) {
    let areas = screen_areas(frame.area(), session);

    let header = Paragraph::new(header_text(session)).block(
        Block::default()
            .title(session.form_id().to_owned())
            .borders(Borders::ALL),
    );
    frame.render_widget(header, areas.header);

    render_table(frame, areas.table, session, view_data);
    render_form(frame, areas.form, session, view_data);

    let status = Paragraph::new(status_text(session, view_data))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status, areas.status);

    if let Some((title, text)) = dialog_text(session) {
        let area = centered_rect(60, 30, frame.area());
        frame.render_widget(Clear, area);
        let dialog = Paragraph::new(text)
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .style(Style::default().fg(Color::Cyan)),
            );
        frame.render_widget(dialog, area);
    }

    if view_data.help_visible {
        let area = centered_rect(70, 70, frame.area());
        frame.render_widget(Clear, area);
        let help = Paragraph::new(help_overlay_text())
            .block(Block::default().title("help").borders(Borders::ALL));
        frame.render_widget(help, area);
    }
}

fn header_text(session: &FormSession) -> String {
    let pagination = session.store().pagination();
    let mut parts = vec![
        session.mode().as_str().to_owned(),
        format!(
            "page {}/{}",
            pagination.current_page,
            pagination.total_pages.max(1)
        ),
        format!("{} records", pagination.total_records),
    ];
    if session.query().has_active_field() {
        parts.push(format!("show {}", session.query().active_filter().as_str()));
    }
    if let Some(sort) = session.query().sort() {
        parts.push(format!("sort {} {}", sort.field, sort.direction.as_str()));
    }
    for (field, value) in session.query().keyfields() {
        parts.push(format!("{field}={}", value.display()));
    }
    if session.query().search_open() || !session.query().search().is_empty() {
        parts.push(format!("search: {}", session.query().search()));
    }
    parts.join(" | ")
}

fn column_label(session: &FormSession, field: &FieldSchema) -> String {
    let mut label = field.label.clone();
    if let Some(sort) = session.query().sort()
        && sort.field == field.field_name
    {
        label.push(' ');
        label.push_str(match sort.direction {
            SortDirection::Asc => SORT_MARK_ASC,
            SortDirection::Desc => SORT_MARK_DESC,
        });
    }
    if session
        .query()
        .live_filters()
        .get(&field.field_name)
        .is_some_and(|text| !text.is_empty())
    {
        label.push(' ');
        label.push_str(FILTER_MARK);
    }
    label
}

fn column_constraint(field: &FieldSchema) -> Constraint {
    match field.width() {
        FieldWidth::Chars(chars) => Constraint::Length(u16::try_from(chars).unwrap_or(u16::MAX)),
        FieldWidth::Percent(percent) => Constraint::Percentage(u16::from(percent)),
        FieldWidth::Auto => Constraint::Min(8),
    }
}

fn cell_text(session: &FormSession, field: &FieldSchema, record: &Record) -> String {
    let raw = record.display(&field.field_name);
    if field.password && !raw.is_empty() {
        return PASSWORD_MASK.to_owned();
    }
    match field.field_type {
        FieldType::Select => session
            .options()
            .label_for(&field.field_name, &raw)
            .map_or(raw.clone(), str::to_owned),
        FieldType::Logical => {
            let checked = record
                .get(&field.field_name)
                .is_some_and(Value::is_truthy);
            let mark = if checked { "[x]" } else { "[ ]" };
            mark.to_owned()
        }
        _ => raw,
    }
}

fn aligned(text: String, align: Align) -> Cell<'static> {
    let line = match align {
        Align::Left => Line::from(text).left_aligned(),
        Align::Center => Line::from(text).centered(),
        Align::Right => Line::from(text).right_aligned(),
    };
    Cell::from(line)
}

/// Row styling from the server's hints: `active: false` dims, `color` tints.
fn row_style(record: &Record, selected: bool) -> Style {
    let mut style = Style::default();
    if let Some(color) = record.color().and_then(|name| Color::from_str(name).ok()) {
        style = style.fg(color);
    }
    if record.is_inactive() {
        style = style.fg(Color::DarkGray).add_modifier(Modifier::ITALIC);
    }
    if selected {
        style = style.bg(Color::DarkGray).add_modifier(Modifier::BOLD);
    }
    style
}

fn render_table(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    session: &FormSession,
    view_data: &ViewData,
) {
    let fields: Vec<&FieldSchema> = session.schema().table_fields().collect();
    let header = Row::new(fields.iter().enumerate().map(|(column, field)| {
        let mut style = Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD);
        if column == view_data.column {
            style = style.fg(Color::Cyan);
        }
        Cell::from(column_label(session, field)).style(style)
    }));

    let viewport = view_data.navigator.viewport();
    let active = session.store().active_index();
    let records = session.store().records();
    let rows = session
        .view_rows()
        .into_iter()
        .skip(viewport.offset)
        .take(viewport.visible_rows())
        .filter_map(|index| records.get(index).map(|record| (index, record)))
        .map(|(index, record)| {
            let cells = fields
                .iter()
                .map(|field| aligned(cell_text(session, field, record), field.align))
                .collect::<Vec<_>>();
            Row::new(cells).style(row_style(record, Some(index) == active))
        })
        .collect::<Vec<_>>();

    let title = if rows.is_empty() {
        "no records".to_owned()
    } else {
        format!("{} shown", session.view_rows().len())
    };
    let table = Table::new(rows, fields.iter().map(|field| column_constraint(field)))
        .header(header)
        .column_spacing(1)
        .block(Block::default().title(title).borders(Borders::ALL));
    frame.render_widget(table, area);
}

fn form_lines(session: &FormSession, view_data: &ViewData) -> Vec<Line<'static>> {
    let Some(record) = session.current_record() else {
        return vec![Line::from("no record selected")];
    };
    let focus = view_data.navigator.focus();
    let mut lines = Vec::new();
    for (position, field) in session.schema().fields().iter().enumerate() {
        if !session.is_field_visible(&field.field_name) {
            continue;
        }
        if field.separator {
            lines.push(Line::from(""));
        }

        let focused = focus == Focus::Field(position);
        let value = match &view_data.input {
            InputState::Field { field: name, buffer } if focused && *name == field.field_name => {
                if field.password {
                    format!("{}{CURSOR_MARK}", "•".repeat(buffer.chars().count()))
                } else {
                    format!("{buffer}{CURSOR_MARK}")
                }
            }
            _ => cell_text(session, field, record),
        };
        let marker = if field.required { "*" } else { " " };
        let mut label_style = Style::default().add_modifier(Modifier::BOLD);
        if !session.is_field_editable(&field.field_name) && session.mode().is_editing() {
            label_style = Style::default().fg(Color::DarkGray);
        }
        let mut value_style = Style::default();
        if focused {
            value_style = value_style.add_modifier(Modifier::REVERSED);
        }

        let mut spans = vec![
            Span::styled(format!("{marker}{:>14}: ", field.label), label_style),
            Span::styled(value, value_style),
        ];
        if value_is_blank(record, field) && !field.placeholder.is_empty() && !focused {
            spans.push(Span::styled(
                field.placeholder.clone(),
                Style::default().fg(Color::DarkGray),
            ));
        }
        if let Some(error) = session.field_error(&field.field_name) {
            spans.push(Span::styled(
                format!("  {error}"),
                Style::default().fg(Color::Red),
            ));
        }
        lines.push(Line::from(spans));
    }
    lines
}

fn value_is_blank(record: &Record, field: &FieldSchema) -> bool {
    record.get(&field.field_name).is_none_or(Value::is_empty)
}

fn render_form(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    session: &FormSession,
    view_data: &ViewData,
) {
    let title = match session.mode() {
        MutationMode::View => "record".to_owned(),
        mode => format!("record ({})", mode.as_str()),
    };
    let form = Paragraph::new(form_lines(session, view_data))
        .block(Block::default().title(title).borders(Borders::ALL));
    frame.render_widget(form, area);
}

fn status_text(session: &FormSession, view_data: &ViewData) -> String {
    if let InputState::Filter { field, text } = &view_data.input {
        let label = session
            .schema()
            .field(field)
            .map_or(field.as_str(), |schema| schema.label.as_str());
        return format!("filter {label}: {text}{CURSOR_MARK}  (enter apply, esc keep)");
    }
    if let Some(status) = session.status_line() {
        return status.to_owned();
    }
    match session.mode() {
        MutationMode::View => {
            "a add  c copy  e/enter edit  d delete  / search  f filter  s sort  ? help".to_owned()
        }
        _ => "enter next  shift+tab back  ctrl+s save  esc cancel".to_owned(),
    }
}

fn dialog_text(session: &FormSession) -> Option<(&'static str, String)> {
    if let Some(confirmation) = session.pending_confirmation() {
        return Some(("confirm", format!("{}  (y/n)", confirmation.prompt())));
    }
    session
        .message()
        .map(|message| ("message", format!("{}\n\n(enter)", message.text)))
}

fn help_overlay_text() -> String {
    [
        "table",
        "  j/k, up/down      move",
        "  g/G, ctrl+home/end first/last row",
        "  h/l, left/right   column",
        "  [ ] pgup pgdn     previous/next page",
        "  < >               first/last page",
        "  s                 sort by column",
        "  f                 filter column",
        "  /                 search",
        "  x                 cycle key selector",
        "  v                 cycle active filter",
        "  r / R             reload / rebuild",
        "  a c e d           add copy edit delete",
        "  q                 quit",
        "",
        "form",
        "  enter, tab        next field (saves on the last)",
        "  shift+tab         previous field",
        "  left/right        cycle options",
        "  space             toggle checkbox",
        "  ctrl+s            save",
        "  esc               cancel",
    ]
    .join("\n")
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::{
        InputState, ViewData, column_label, dialog_text, handle_key_event, header_text, render,
        row_style, status_text, table_height_limit,
    };
    use anyhow::Result;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use dynaform_app::{
        ActiveFilter, Confirmation, Focus, FormCommand, FormSession, MutationMode, Record, Value,
    };
    use dynaform_testkit::{Call, FakeBackend, INVOICE_FORM};
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use ratatui::style::{Color, Modifier};

    fn open(count: usize, per_page: u32) -> Result<(FakeBackend, FormSession, ViewData)> {
        let mut backend = FakeBackend::invoices(count, per_page);
        let session = FormSession::open(&mut backend, INVOICE_FORM)?;
        backend.clear_calls();
        let mut view_data = ViewData::default();
        view_data.navigator.set_viewport_height(10, 1);
        Ok((backend, session, view_data))
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn press(
        session: &mut FormSession,
        backend: &mut FakeBackend,
        view_data: &mut ViewData,
        codes: &[KeyCode],
    ) {
        for code in codes {
            handle_key_event(session, backend, view_data, key(*code));
        }
    }

    fn type_text(
        session: &mut FormSession,
        backend: &mut FakeBackend,
        view_data: &mut ViewData,
        text: &str,
    ) {
        for ch in text.chars() {
            handle_key_event(session, backend, view_data, key(KeyCode::Char(ch)));
        }
    }

    #[test]
    fn quit_keys() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(3, 10)?;
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(handle_key_event(&mut session, &mut backend, &mut view_data, ctrl_c).quit);
        assert!(
            handle_key_event(&mut session, &mut backend, &mut view_data, key(KeyCode::Char('q')))
                .quit
        );
        Ok(())
    }

    #[test]
    fn typing_into_a_field_commits_on_enter() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(3, 10)?;
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char('e')]);
        assert_eq!(session.mode(), MutationMode::Edit);
        let customer = session.schema().position("customer");
        assert_eq!(Some(view_data.navigator.focus()), customer.map(Focus::Field));

        let original = session
            .draft()
            .map(|draft| draft.display("customer"))
            .unwrap_or_default();
        for _ in 0..original.chars().count() {
            press(&mut session, &mut backend, &mut view_data, &[KeyCode::Backspace]);
        }
        type_text(&mut session, &mut backend, &mut view_data, "Edited Ltd");
        assert_eq!(
            session.draft().map(|draft| draft.display("customer")),
            Some(original),
            "typing stays in the buffer until committed"
        );

        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Enter]);
        assert_eq!(
            session.draft().map(|draft| draft.display("customer")),
            Some("Edited Ltd".to_owned())
        );
        assert_eq!(
            Some(view_data.navigator.focus()),
            session.schema().position("currency").map(Focus::Field)
        );
        Ok(())
    }

    #[test]
    fn bad_number_marks_the_field_and_keeps_the_draft() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(3, 10)?;
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char('e')]);
        let amount = session.schema().position("amount");
        if let Some(position) = amount {
            view_data.navigator.set_focus(Focus::Field(position));
        }
        view_data.input = InputState::Field {
            field: "amount".to_owned(),
            buffer: "12,x".to_owned(),
        };
        let before = session.draft().and_then(|draft| draft.get("amount").cloned());
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Enter]);
        assert!(session.field_error("amount").is_some());
        assert_eq!(
            session.draft().and_then(|draft| draft.get("amount").cloned()),
            before
        );
        Ok(())
    }

    #[test]
    fn select_cycling_fires_the_change_action() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(3, 10)?;
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char('e')]);
        if let Some(position) = session.schema().position("city") {
            view_data.navigator.set_focus(Focus::Field(position));
        }
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Right]);

        let draft = session.draft().cloned().unwrap_or_default();
        let city = draft.display("city");
        let expected = dynaform_testkit::region_for_city(&city).map(str::to_owned);
        assert_eq!(Some(draft.display("region")), expected);
        assert!(
            backend
                .calls()
                .iter()
                .any(|call| matches!(call, Call::Change(_)))
        );
        Ok(())
    }

    #[test]
    fn space_toggles_a_checkbox() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(3, 10)?;
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char('e')]);
        if let Some(position) = session.schema().position("paid") {
            view_data.navigator.set_focus(Focus::Field(position));
        }
        let before = session
            .draft()
            .and_then(|draft| draft.get("paid"))
            .is_some_and(Value::is_truthy);
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char(' ')]);
        assert_eq!(
            session.draft().and_then(|draft| draft.get("paid")).cloned(),
            Some(Value::Bool(!before))
        );
        Ok(())
    }

    #[test]
    fn filter_input_narrows_live_and_fetches_on_enter() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(30, 50)?;
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char('f')]);
        assert!(matches!(view_data.input, InputState::Filter { .. }));

        type_text(&mut session, &mut backend, &mut view_data, "2");
        assert!(session.view_rows().len() < 30);
        assert!(backend.calls().is_empty());

        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Enter]);
        assert_eq!(view_data.input, InputState::Idle);
        let loads = backend.load_calls();
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].filters, vec![("id".to_owned(), "2".to_owned())]);
        Ok(())
    }

    #[test]
    fn search_typing_and_submit() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(10, 50)?;
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char('/')]);
        assert_eq!(view_data.navigator.focus(), Focus::Search);

        type_text(&mut session, &mut backend, &mut view_data, "acme");
        assert_eq!(session.query().search(), "acme");
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Enter]);
        let loads = backend.load_calls();
        assert_eq!(loads.last().and_then(|query| query.search.as_deref()), Some("acme"));

        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Esc]);
        assert_eq!(view_data.navigator.focus(), Focus::Table);
        Ok(())
    }

    #[test]
    fn delete_goes_through_the_dialog() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(5, 10)?;
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char('d')]);
        assert_eq!(session.pending_confirmation(), Some(Confirmation::Delete));
        assert!(dialog_text(&session).is_some());

        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char('j')]);
        assert_eq!(session.pending_confirmation(), Some(Confirmation::Delete));

        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char('n')]);
        assert_eq!(session.pending_confirmation(), None);
        assert_eq!(backend.rows().len(), 5);

        press(
            &mut session,
            &mut backend,
            &mut view_data,
            &[KeyCode::Char('d'), KeyCode::Char('y')],
        );
        assert_eq!(backend.rows().len(), 4);
        Ok(())
    }

    #[test]
    fn sort_uses_the_column_cursor() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(5, 10)?;
        press(
            &mut session,
            &mut backend,
            &mut view_data,
            &[KeyCode::Char('l'), KeyCode::Char('s')],
        );
        let sort = session.query().sort().cloned();
        assert_eq!(sort.map(|sort| sort.field), Some("customer".to_owned()));
        let label = session
            .schema()
            .field("customer")
            .map(|field| column_label(&session, field))
            .unwrap_or_default();
        assert!(label.ends_with(super::SORT_MARK_ASC));
        Ok(())
    }

    #[test]
    fn active_filter_cycles_and_is_saved() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(5, 10)?;
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char('v')]);
        assert_eq!(session.query().active_filter(), ActiveFilter::Active);
        assert_eq!(backend.saved_active_filter(), Some(ActiveFilter::Active));
        assert!(header_text(&session).contains("show active"));
        Ok(())
    }

    #[test]
    fn help_overlay_swallows_the_next_key() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(3, 10)?;
        press(&mut session, &mut backend, &mut view_data, &[KeyCode::Char('?')]);
        assert!(view_data.help_visible);
        let outcome =
            handle_key_event(&mut session, &mut backend, &mut view_data, key(KeyCode::Char('q')));
        assert!(!outcome.quit);
        assert!(!view_data.help_visible);
        Ok(())
    }

    #[test]
    fn status_line_prefers_filter_input_then_session_status() -> Result<()> {
        let (mut backend, mut session, mut view_data) = open(3, 10)?;
        assert_eq!(status_text(&session, &view_data), "3 of 3 records");

        session.dispatch(&mut backend, FormCommand::ClearStatus);
        assert!(status_text(&session, &view_data).contains("a add"));

        view_data.input = InputState::Filter {
            field: "customer".to_owned(),
            text: "ac".to_owned(),
        };
        assert!(status_text(&session, &view_data).starts_with("filter Customer: ac"));
        Ok(())
    }

    #[test]
    fn table_height_hints() {
        assert_eq!(table_height_limit(Some(&Value::text("50vh")), 40), Some(20));
        assert_eq!(table_height_limit(Some(&Value::Integer(12)), 40), Some(12));
        assert_eq!(table_height_limit(Some(&Value::text("12")), 40), Some(12));
        assert_eq!(table_height_limit(Some(&Value::text("auto")), 40), None);
        assert_eq!(table_height_limit(None, 40), None);
    }

    #[test]
    fn row_style_follows_server_hints() {
        let inactive = Record::new().with("active", false);
        assert_eq!(row_style(&inactive, false).fg, Some(Color::DarkGray));

        let tinted = Record::new().with("color", "red");
        assert_eq!(row_style(&tinted, false).fg, Some(Color::Red));

        let selected = row_style(&Record::new(), true);
        assert!(selected.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn renders_table_and_form_into_a_buffer() -> Result<()> {
        let (_backend, session, view_data) = open(3, 10)?;
        let mut terminal = Terminal::new(TestBackend::new(120, 40))?;
        terminal.draw(|frame| render(frame, &session, &view_data))?;
        let text: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(text.contains("invoice_form"));
        assert!(text.contains("Customer"));
        assert!(text.contains("page 1/1"));
        Ok(())
    }
}
