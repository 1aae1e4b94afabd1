// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{FormBackend, FormCommand, FormEvent, FormSession, MutationMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Enter,
    ShiftEnter,
    Up,
    Down,
    CtrlHome,
    CtrlEnd,
    Escape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Table,
    /// Schema position of the focused form field.
    Field(usize),
    Search,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavOutcome {
    Ignored,
    Handled,
    Dispatch(FormCommand),
}

/// Visible window over the table rows. `header_rows` are sticky and never
/// hold a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub offset: usize,
    pub height: usize,
    pub header_rows: usize,
}

impl Viewport {
    pub fn visible_rows(&self) -> usize {
        self.height.saturating_sub(self.header_rows).max(1)
    }

    pub fn is_visible(&self, row: usize) -> bool {
        row >= self.offset && row < self.offset + self.visible_rows()
    }

    /// Scrolls the minimum amount that shows `row`. Returns whether it moved.
    pub fn scroll_into_view(&mut self, row: usize) -> bool {
        if self.is_visible(row) {
            return false;
        }
        if row < self.offset {
            self.offset = row;
        } else {
            self.offset = row + 1 - self.visible_rows();
        }
        true
    }
}

/// Turns keys into workflow commands and tracks focus and scrolling. Owns no
/// record data; everything it reads comes from the session.
#[derive(Debug, Clone, Default)]
pub struct Navigator {
    focus: Focus,
    viewport: Viewport,
}

impl Navigator {
    pub fn focus(&self) -> Focus {
        self.focus
    }

    pub fn set_focus(&mut self, focus: Focus) {
        self.focus = focus;
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn set_viewport_height(&mut self, height: usize, header_rows: usize) {
        self.viewport.height = height;
        self.viewport.header_rows = header_rows;
    }

    pub fn handle_key(&mut self, session: &FormSession, key: NavKey) -> NavOutcome {
        if session.has_dialog() {
            return NavOutcome::Ignored;
        }
        match self.focus {
            Focus::Search => self.search_key(key),
            Focus::Field(position) => self.field_key(session, position, key),
            Focus::Table => self.table_key(session, key),
        }
    }

    /// Follows focus and scroll to what a dispatched command changed.
    pub fn after_dispatch(&mut self, session: &FormSession, events: &[FormEvent]) {
        for event in events {
            match event {
                FormEvent::ModeChanged(mode) if mode.is_editing() => {
                    self.focus_first_editable(session);
                }
                FormEvent::ModeChanged(_) => {
                    if matches!(self.focus, Focus::Field(_)) {
                        self.focus = Focus::Table;
                    }
                }
                FormEvent::SearchChanged => {
                    self.focus = if session.query().search_open() {
                        Focus::Search
                    } else if matches!(self.focus, Focus::Search) {
                        Focus::Table
                    } else {
                        self.focus
                    };
                }
                FormEvent::PageLoaded { .. } => {
                    self.viewport.offset = 0;
                }
                _ => {}
            }
        }
        self.reveal_active(session);
    }

    /// Handles a key, dispatches what it maps to and updates focus.
    pub fn drive<B: FormBackend + ?Sized>(
        &mut self,
        session: &mut FormSession,
        backend: &mut B,
        key: NavKey,
    ) -> Vec<FormEvent> {
        match self.handle_key(session, key) {
            NavOutcome::Dispatch(command) => {
                let events = session.dispatch(backend, command);
                self.after_dispatch(session, &events);
                events
            }
            NavOutcome::Handled | NavOutcome::Ignored => Vec::new(),
        }
    }

    pub fn focus_first_editable(&mut self, session: &FormSession) {
        self.focus = session
            .focusable_fields()
            .first()
            .map_or(Focus::Table, |position| Focus::Field(*position));
    }

    fn reveal_active(&mut self, session: &FormSession) {
        let rows = session.view_rows();
        let active = session.store().active_index();
        if let Some(row) = rows.iter().position(|index| Some(*index) == active) {
            self.viewport.scroll_into_view(row);
        }
    }

    fn search_key(&mut self, key: NavKey) -> NavOutcome {
        match key {
            NavKey::Enter => NavOutcome::Dispatch(FormCommand::SubmitSearch),
            NavKey::Escape => NavOutcome::Dispatch(FormCommand::CloseSearch),
            _ => NavOutcome::Ignored,
        }
    }

    fn field_key(&mut self, session: &FormSession, position: usize, key: NavKey) -> NavOutcome {
        let focusable = session.focusable_fields();
        match key {
            NavKey::Enter => match focusable.iter().find(|candidate| **candidate > position) {
                Some(next) => {
                    self.focus = Focus::Field(*next);
                    NavOutcome::Handled
                }
                None => NavOutcome::Dispatch(FormCommand::Save),
            },
            NavKey::ShiftEnter => {
                if let Some(previous) = focusable.iter().rev().find(|candidate| **candidate < position)
                {
                    self.focus = Focus::Field(*previous);
                }
                NavOutcome::Handled
            }
            NavKey::Escape if session.mode().is_editing() => {
                NavOutcome::Dispatch(FormCommand::Cancel)
            }
            _ => NavOutcome::Ignored,
        }
    }

    fn table_key(&mut self, session: &FormSession, key: NavKey) -> NavOutcome {
        if key == NavKey::Escape {
            if session.query().search_open() {
                return NavOutcome::Dispatch(FormCommand::CloseSearch);
            }
            if session.mode().is_editing() {
                return NavOutcome::Dispatch(FormCommand::Cancel);
            }
            return NavOutcome::Ignored;
        }
        if session.mode() != MutationMode::View {
            return NavOutcome::Ignored;
        }

        let rows = session.view_rows();
        let active = session.store().active_index();
        let current = rows.iter().position(|index| Some(*index) == active);
        let target = match key {
            NavKey::Enter => {
                return if active.is_some() {
                    NavOutcome::Dispatch(FormCommand::Edit)
                } else {
                    NavOutcome::Ignored
                };
            }
            NavKey::Down => match current {
                Some(row) => rows.get(row + 1),
                None => rows.first(),
            },
            NavKey::Up => match current {
                Some(row) => row.checked_sub(1).and_then(|row| rows.get(row)),
                None => rows.first(),
            },
            NavKey::CtrlHome => rows.first(),
            NavKey::CtrlEnd => rows.last(),
            NavKey::ShiftEnter | NavKey::Escape => None,
        };
        match target {
            Some(index) if Some(*index) != active => {
                NavOutcome::Dispatch(FormCommand::Select(*index))
            }
            Some(_) => NavOutcome::Handled,
            None => NavOutcome::Ignored,
        }
    }
}
