use crate::export::ExportRow;
use crate::models::Record;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use std::collections::HashSet;
use std::io;

/// Display text for one record row
pub fn record_display_text(record: &Record) -> String {
    let row = ExportRow::from_record(record);
    format!(
        "{} {} | {} | {} rai ({} polygons) | {} photos",
        row.date, row.time, row.crop_type, row.total_area_rai, row.polygon_count, row.photo_count
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectorMode {
    Selecting,
    Confirmed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    All,
    Drafts,
    Saved,
    Unsynced,
}

impl FilterMode {
    fn next(self) -> Self {
        match self {
            FilterMode::All => FilterMode::Drafts,
            FilterMode::Drafts => FilterMode::Saved,
            FilterMode::Saved => FilterMode::Unsynced,
            FilterMode::Unsynced => FilterMode::All,
        }
    }

    fn label(self) -> &'static str {
        match self {
            FilterMode::All => "All",
            FilterMode::Drafts => "Drafts",
            FilterMode::Saved => "Saved",
            FilterMode::Unsynced => "Unsynced",
        }
    }

    fn matches(self, record: &Record) -> bool {
        match self {
            FilterMode::All => true,
            FilterMode::Drafts => record.is_draft(),
            FilterMode::Saved => !record.is_draft(),
            FilterMode::Unsynced => !record.is_synced(),
        }
    }
}

/// Picks records for export. Selection survives filter changes.
pub struct RecordSelector {
    records: Vec<Record>,
    /// Indices into `records` visible under the current filter.
    visible: Vec<usize>,
    selected_ids: HashSet<String>,
    pub list_state: ListState,
    pub mode: SelectorMode,
    pub filter_mode: FilterMode,
}

impl RecordSelector {
    pub fn new(records: Vec<Record>) -> Self {
        let mut selector = Self {
            visible: (0..records.len()).collect(),
            records,
            selected_ids: HashSet::new(),
            list_state: ListState::default(),
            mode: SelectorMode::Selecting,
            filter_mode: FilterMode::All,
        };
        selector.reset_cursor();
        selector
    }

    pub fn visible_records(&self) -> impl Iterator<Item = &Record> {
        self.visible.iter().map(|&i| &self.records[i])
    }

    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }

    pub fn selected_count(&self) -> usize {
        self.selected_ids.len()
    }

    pub fn selected_ids(&self) -> &HashSet<String> {
        &self.selected_ids
    }

    pub fn is_selected(&self, record: &Record) -> bool {
        self.selected_ids.contains(&record.id)
    }

    pub fn toggle_filter(&mut self) {
        self.filter_mode = self.filter_mode.next();
        let filter = self.filter_mode;
        self.visible = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| filter.matches(r))
            .map(|(i, _)| i)
            .collect();
        self.reset_cursor();
    }

    fn reset_cursor(&mut self) {
        let cursor = if self.visible.is_empty() { None } else { Some(0) };
        self.list_state.select(cursor);
    }

    pub fn next(&mut self) {
        if self.visible.is_empty() {
            self.list_state.select(None);
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) if i + 1 < self.visible.len() => i + 1,
            _ => 0,
        };
        self.list_state.select(Some(i));
    }

    pub fn previous(&mut self) {
        if self.visible.is_empty() {
            self.list_state.select(None);
            return;
        }
        let i = match self.list_state.selected() {
            Some(0) | None => self.visible.len() - 1,
            Some(i) => i - 1,
        };
        self.list_state.select(Some(i));
    }

    pub fn toggle_selection(&mut self) {
        let Some(&index) = self.list_state.selected().and_then(|i| self.visible.get(i)) else {
            return;
        };
        let id = self.records[index].id.clone();
        if !self.selected_ids.remove(&id) {
            self.selected_ids.insert(id);
        }
    }

    /// Selects every visible record, or clears them if all are already selected.
    pub fn toggle_all_visible(&mut self) {
        let visible_ids: Vec<String> = self.visible_records().map(|r| r.id.clone()).collect();
        let all_selected = visible_ids.iter().all(|id| self.selected_ids.contains(id));
        for id in visible_ids {
            if all_selected {
                self.selected_ids.remove(&id);
            } else {
                self.selected_ids.insert(id);
            }
        }
    }

    /// Selected records in list order.
    pub fn into_selected(self) -> Vec<Record> {
        let selected_ids = self.selected_ids;
        self.records
            .into_iter()
            .filter(|r| selected_ids.contains(&r.id))
            .collect()
    }
}

pub fn render_ui(f: &mut Frame, state: &RecordSelector) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(3),
        ])
        .split(f.area());

    let header = Paragraph::new("Burn Records - Select records to export")
        .style(Style::default().fg(Color::LightRed).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Center);
    f.render_widget(header, chunks[0]);

    let items: Vec<ListItem> = state
        .visible_records()
        .enumerate()
        .map(|(i, record)| {
            let selected = state.is_selected(record);
            let prefix = if selected { "[✓] " } else { "[ ] " };
            let status_indicator = match (record.is_draft(), record.is_synced()) {
                (true, _) => Span::styled(" [Draft]", Style::default().fg(Color::Gray)),
                (false, true) => Span::styled(" [Synced]", Style::default().fg(Color::Cyan)),
                (false, false) => Span::styled(" [Pending]", Style::default().fg(Color::Yellow)),
            };
            let style = if state.list_state.selected() == Some(i) {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD | Modifier::REVERSED)
            } else if selected {
                Style::default().fg(Color::Green)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(vec![
                Span::styled(prefix, style),
                Span::styled(record_display_text(record), style),
                status_indicator,
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            "Records ({} selected, {} shown, Filter: {})",
            state.selected_count(),
            state.visible_count(),
            state.filter_mode.label()
        )))
        .highlight_style(Style::default().add_modifier(Modifier::BOLD | Modifier::REVERSED));

    f.render_stateful_widget(list, chunks[1], &mut state.list_state.clone());

    let instructions = match state.mode {
        SelectorMode::Selecting => {
            "↑↓: Navigate | Space: Select | Enter: Export | 'a': Select All | 'f': Filter | 'q': Quit"
                .to_string()
        }
        SelectorMode::Confirmed => format!("Exporting {} records...", state.selected_count()),
    };
    let footer = Paragraph::new(instructions)
        .style(Style::default().fg(Color::White))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Left);
    f.render_widget(footer, chunks[2]);
}

/// Runs the selector full-screen. Returns the chosen records, or none if the user quit.
pub fn run_record_selector(records: Vec<Record>) -> anyhow::Result<Vec<Record>> {
    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut state = RecordSelector::new(records);
    let result = selection_loop(&mut terminal, &mut state);

    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen
    )?;
    crossterm::terminal::disable_raw_mode()?;
    result?;

    if state.mode == SelectorMode::Confirmed {
        Ok(state.into_selected())
    } else {
        Ok(vec![])
    }
}

fn selection_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut RecordSelector,
) -> anyhow::Result<()> {
    loop {
        terminal.draw(|f| render_ui(f, state))?;

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Char(' ') => state.toggle_selection(),
            KeyCode::Up => state.previous(),
            KeyCode::Down => state.next(),
            KeyCode::PageUp => (0..10).for_each(|_| state.previous()),
            KeyCode::PageDown => (0..10).for_each(|_| state.next()),
            KeyCode::Char('a') => state.toggle_all_visible(),
            KeyCode::Char('f') => state.toggle_filter(),
            KeyCode::Enter if state.selected_count() > 0 => {
                state.mode = SelectorMode::Confirmed;
                terminal.draw(|f| render_ui(f, state))?;
                return Ok(());
            }
            _ => {}
        }
    }
}
