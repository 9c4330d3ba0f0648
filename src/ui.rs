use anyhow::Result;
use chrono::Local;
use coa_mapper::{
    Account, AccountSide, AnchorId, AnchorPositions, ConnectorDescriptor, ConnectorLayout,
    DashPattern, DragController, DragItem, DropOutcome, KeyCommand, LedgerSection,
    MappingRepository, NoticeLevel, Point, SectionFilter, Workspace,
};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Line as CanvasLine, Points},
        Block, Borders, List, ListItem, Paragraph,
    },
    Frame, Terminal,
};
use std::io;
use std::path::PathBuf;

/// Weight step for `+` / `-`
const WEIGHT_STEP: f64 = 0.05;

/// Segments per connector curve on the canvas
const CURVE_SEGMENTS: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    /// Typing a search for one column
    Search(AccountSide),
}

pub struct App<R: MappingRepository> {
    pub workspace: Workspace<R>,
    pub drag: DragController,
    pub column: AccountSide,
    pub mode: InputMode,
    pub export_dir: PathBuf,
    pub should_quit: bool,
    source_cursor: usize,
    target_cursor: usize,
    /// Rows visible per column at the last draw
    viewport_rows: usize,
}

impl<R: MappingRepository> App<R> {
    pub fn new(workspace: Workspace<R>, export_dir: PathBuf) -> Self {
        Self {
            workspace,
            drag: DragController::new(),
            column: AccountSide::Source,
            mode: InputMode::Normal,
            export_dir,
            should_quit: false,
            source_cursor: 0,
            target_cursor: 0,
            viewport_rows: 20,
        }
    }

    pub fn cursor(&self, side: AccountSide) -> usize {
        match side {
            AccountSide::Source => self.source_cursor,
            AccountSide::Target => self.target_cursor,
        }
    }

    fn cursor_mut(&mut self, side: AccountSide) -> &mut usize {
        match side {
            AccountSide::Source => &mut self.source_cursor,
            AccountSide::Target => &mut self.target_cursor,
        }
    }

    pub fn visible(&self, side: AccountSide) -> Vec<&Account> {
        self.workspace.state().visible_accounts(side)
    }

    /// Account under the cursor in a column
    pub fn highlighted(&self, side: AccountSide) -> Option<String> {
        self.visible(side)
            .get(self.cursor(side))
            .map(|a| a.account_number.clone())
    }

    /// First visible row of a column, keeping the cursor on screen
    fn scroll_offset(&self, side: AccountSide) -> usize {
        let rows = self.viewport_rows.max(1);
        self.cursor(side).saturating_sub(rows - 1)
    }

    pub fn move_cursor(&mut self, down: bool) {
        let len = self.visible(self.column).len();
        let cursor = self.cursor_mut(self.column);
        if len == 0 {
            *cursor = 0;
        } else if down {
            *cursor = (*cursor + 1).min(len - 1);
        } else {
            *cursor = cursor.saturating_sub(1);
        }
    }

    /// Keep both cursors inside their (possibly shrunk) columns
    fn clamp_cursors(&mut self) {
        for side in [AccountSide::Source, AccountSide::Target] {
            let len = self.visible(side).len();
            let cursor = self.cursor_mut(side);
            *cursor = (*cursor).min(len.saturating_sub(1));
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        match self.mode.clone() {
            InputMode::Search(side) => self.handle_search_key(side, key),
            InputMode::Normal => self.handle_normal_key(key),
        }
        self.clamp_cursors();
    }

    fn handle_search_key(&mut self, side: AccountSide, key: KeyEvent) {
        let mut text = self.workspace.state().filters.side(side).search.clone();
        match key.code {
            KeyCode::Enter | KeyCode::Esc => {
                self.mode = InputMode::Normal;
                return;
            }
            KeyCode::Backspace => {
                text.pop();
            }
            KeyCode::Char(c) => text.push(c),
            _ => return,
        }
        self.workspace.set_search(side, &text);
    }

    fn handle_normal_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('z') => self.workspace.handle_key(KeyCommand::Undo),
                KeyCode::Char('y') => self.workspace.handle_key(KeyCommand::Redo),
                KeyCode::Char('s') => self.workspace.handle_key(KeyCommand::SaveIfDirty),
                KeyCode::Char('c') => self.should_quit = true,
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Esc => {
                if self.drag.is_active() {
                    self.drag.cancel();
                } else {
                    self.workspace.handle_key(KeyCommand::Escape);
                }
            }
            KeyCode::Tab | KeyCode::BackTab => self.column = self.column.opposite(),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(true),
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(false),
            KeyCode::Home => *self.cursor_mut(self.column) = 0,
            KeyCode::Char(' ') => {
                if let Some(account) = self.highlighted(self.column) {
                    let multi = key.modifiers.contains(KeyModifiers::SHIFT);
                    self.workspace.toggle_account(self.column, &account, multi);
                }
            }
            KeyCode::Char('g') => {
                if let Some(account) = self.highlighted(self.column) {
                    self.drag.start(DragItem::new(self.column, &account));
                }
            }
            KeyCode::Enter => self.drop_or_focus(),
            KeyCode::Char('/') => self.mode = InputMode::Search(self.column),
            KeyCode::Char(c @ '0'..='5') => {
                let section = match c.to_digit(10) {
                    Some(n) if n > 0 => SectionFilter::Only(LedgerSection::ALL[n as usize - 1]),
                    _ => SectionFilter::All,
                };
                self.workspace.set_section(self.column, section);
            }
            KeyCode::Char('m') => self.workspace.cycle_mapped_filter(self.column),
            KeyCode::Char('n') => self.workspace.focus_step(true),
            KeyCode::Char('p') => self.workspace.focus_step(false),
            KeyCode::Char('x') | KeyCode::Delete => {
                // Rejections are surfaced as notices
                let _ = self.workspace.delete_focused();
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let _ = self.workspace.adjust_focused_weight(WEIGHT_STEP);
            }
            KeyCode::Char('-') => {
                let _ = self.workspace.adjust_focused_weight(-WEIGHT_STEP);
            }
            KeyCode::Char('v') => {
                let _ = self.workspace.validate();
            }
            KeyCode::Char('e') => {
                let dir = self.export_dir.clone();
                let _ = self.workspace.export(&dir, Local::now().date_naive());
            }
            _ => {}
        }
    }

    /// Enter: drop a grabbed account on the highlighted one, or focus the
    /// first mapping of the highlighted account.
    fn drop_or_focus(&mut self) {
        let Some(account) = self.highlighted(self.column) else {
            self.drag.cancel();
            return;
        };

        if self.drag.is_active() {
            self.drag.hover(DragItem::new(self.column, &account));
            match self.drag.end(&mut self.workspace) {
                DropOutcome::Connected(mapping) => {
                    self.workspace.focus_mapping(&mapping.mapping_id);
                }
                DropOutcome::Rejected(_) | DropOutcome::Ignored => {}
            }
            return;
        }

        let first = self
            .workspace
            .state()
            .mappings_for(self.column, &account)
            .first()
            .map(|m| m.mapping_id.clone());
        if let Some(id) = first {
            self.workspace.focus_mapping(&id);
        }
    }

    /// Anchor points for every on-screen row, in canvas coordinates:
    /// x spans [0, 100], y runs bottom-up over `rows` rows.
    pub fn anchors(&self, rows: usize) -> AnchorPositions {
        let mut anchors = AnchorPositions::new();
        let height = rows as f64;
        for (side, x) in [(AccountSide::Source, 0.0), (AccountSide::Target, 100.0)] {
            let offset = self.scroll_offset(side);
            for (row, account) in self.visible(side).iter().skip(offset).take(rows).enumerate() {
                let y = height - row as f64 - 0.5;
                anchors.set(AnchorId::new(side, &account.account_number), Point::new(x, y));
            }
        }
        anchors
    }
}

pub fn run_ui<R: MappingRepository>(app: &mut App<R>) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res.map_err(Into::into)
}

fn run_app<B: ratatui::backend::Backend, R: MappingRepository>(
    terminal: &mut Terminal<B>,
    app: &mut App<R>,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                app.handle_key(key);
            }
        }
        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui<R: MappingRepository>(f: &mut Frame, app: &mut App<R>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Columns + connectors
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(38),
            Constraint::Percentage(24),
            Constraint::Percentage(38),
        ])
        .split(chunks[1]);

    app.viewport_rows = columns[0].height.saturating_sub(2) as usize;

    render_header(f, chunks[0], app);
    render_column(f, columns[0], app, AccountSide::Source);
    render_connectors(f, columns[1], app);
    render_column(f, columns[2], app, AccountSide::Target);
    render_status_bar(f, chunks[2], app);
}

fn render_header<R: MappingRepository>(f: &mut Frame, area: Rect, app: &App<R>) {
    let state = app.workspace.state();

    let mut spans = vec![
        Span::styled(
            "GL Mapping",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("workspace {}", app.workspace.workspace_id()),
            Style::default().fg(Color::White),
        ),
    ];
    if let Some(provider) = app.workspace.provider() {
        spans.push(Span::raw("  |  "));
        spans.push(Span::styled(provider.to_string(), Style::default().fg(Color::Cyan)));
    }
    spans.push(Span::raw("  |  "));
    spans.push(Span::raw(format!("{} mappings", state.mappings.len())));
    spans.push(Span::raw("  |  "));
    let unmapped = state.unmapped_accounts(AccountSide::Source).len();
    spans.push(Span::styled(
        format!("{} unmapped", unmapped),
        Style::default().fg(if unmapped == 0 { Color::Green } else { Color::Red }),
    ));

    if app.workspace.is_dirty() {
        spans.push(Span::raw("  |  "));
        spans.push(Span::styled(
            format!("● {} unsaved", state.pending.len()),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ));
    }
    if let Some(item) = app.drag.dragged() {
        spans.push(Span::raw("  |  "));
        spans.push(Span::styled(
            format!("grabbed {} {}", item.side, item.account_number),
            Style::default().fg(Color::Magenta),
        ));
    }

    let header = Paragraph::new(vec![Line::from(spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));
    f.render_widget(header, area);
}

fn render_column<R: MappingRepository>(f: &mut Frame, area: Rect, app: &App<R>, side: AccountSide) {
    let state = app.workspace.state();
    let filter = state.filters.side(side);
    let mapped = state.mapped_accounts(side);
    let focused = state.focused_mapping();
    let cursor = app.cursor(side);
    let offset = app.scroll_offset(side);
    let rows = area.height.saturating_sub(2) as usize;
    let width = area.width.saturating_sub(4) as usize;

    let items: Vec<ListItem> = app
        .visible(side)
        .into_iter()
        .enumerate()
        .skip(offset)
        .take(rows)
        .map(|(index, account)| {
            let number = account.account_number.as_str();
            let selected = state.selection.is_selected(side, number);
            let grabbed = app
                .drag
                .dragged()
                .map_or(false, |d| d.side == side && d.account_number == number);
            let in_focus = focused.map_or(false, |m| match side {
                AccountSide::Source => m.source_account_number == number,
                AccountSide::Target => m.target_account_number == number,
            });
            let count = state.mappings_for(side, number).len();

            let marker = if selected { "[x]" } else { "[ ]" };
            let links = if count > 0 { format!(" ●{}", count) } else { String::new() };
            let text = truncate(
                &format!("{} {} {}{}", marker, account.label(), account.ledger_section.as_str(), links),
                width,
            );

            let mut style = if mapped.contains(number) {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            if in_focus {
                style = style.fg(Color::Yellow);
            }
            if grabbed {
                style = style.fg(Color::Magenta).add_modifier(Modifier::BOLD);
            }
            if index == cursor && app.column == side {
                style = style.bg(Color::DarkGray).add_modifier(Modifier::BOLD);
            }
            ListItem::new(Line::from(Span::styled(text, style)))
        })
        .collect();

    let mut title = format!(
        " {} [{}|{}] ",
        match side {
            AccountSide::Source => "Source GL",
            AccountSide::Target => "Target GL",
        },
        filter.section.label(),
        filter.mapped.label()
    );
    if !filter.search.is_empty() || app.mode == InputMode::Search(side) {
        title.push_str(&format!("/{} ", filter.search));
    }

    let border = if app.column == side { Color::Cyan } else { Color::White };
    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .title(title),
    );
    f.render_widget(list, area);
}

fn render_connectors<R: MappingRepository>(f: &mut Frame, area: Rect, app: &App<R>) {
    let rows = area.height.saturating_sub(2) as usize;
    let anchors = app.anchors(rows);
    let descriptors = ConnectorLayout::for_state(app.workspace.state(), &anchors);

    let canvas = Canvas::default()
        .block(Block::default().borders(Borders::TOP | Borders::BOTTOM))
        .marker(Marker::Braille)
        .x_bounds([0.0, 100.0])
        .y_bounds([0.0, rows.max(1) as f64])
        .paint(move |ctx| {
            for descriptor in &descriptors {
                draw_connector(ctx, descriptor);
            }
        });
    f.render_widget(canvas, area);
}

fn draw_connector(ctx: &mut ratatui::widgets::canvas::Context, descriptor: &ConnectorDescriptor) {
    let color = hex_color(descriptor.style.color);
    let points = descriptor.path.polyline(CURVE_SEGMENTS);

    match descriptor.style.dash {
        DashPattern::Dotted => {
            let coords: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();
            ctx.draw(&Points { coords: &coords, color });
        }
        DashPattern::Solid | DashPattern::Dashed => {
            for (i, pair) in points.windows(2).enumerate() {
                if descriptor.style.dash == DashPattern::Dashed && i % 2 == 1 {
                    continue;
                }
                ctx.draw(&CanvasLine::new(pair[0].x, pair[0].y, pair[1].x, pair[1].y, color));
            }
        }
    }

    // Focused connector: second pass offset by a hair for a heavier stroke
    if descriptor.selected {
        for pair in points.windows(2) {
            ctx.draw(&CanvasLine::new(pair[0].x, pair[0].y + 0.15, pair[1].x, pair[1].y + 0.15, color));
        }
    }

    if let Some(label) = &descriptor.label {
        ctx.print(
            label.position.x,
            label.position.y,
            Span::styled(label.text.clone(), Style::default().fg(color)),
        );
    }
}

fn render_status_bar<R: MappingRepository>(f: &mut Frame, area: Rect, app: &App<R>) {
    let mut spans = Vec::new();

    if let Some(banner) = app.workspace.banner() {
        spans.push(Span::styled(
            format!(" {} ", banner),
            Style::default().fg(Color::White).bg(Color::Red).add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::raw(" | "));
    } else if let Some(notice) = app.workspace.latest_notice() {
        let color = match notice.level {
            NoticeLevel::Info => Color::Green,
            NoticeLevel::Warning => Color::Yellow,
            NoticeLevel::Error => Color::Red,
        };
        spans.push(Span::styled(format!(" {} ", notice.message), Style::default().fg(color)));
        spans.push(Span::raw(" | "));
    }

    if let InputMode::Search(side) = app.mode {
        spans.push(Span::styled(
            format!("search {}: Enter/Esc done", side),
            Style::default().fg(Color::Cyan),
        ));
    } else {
        for (key, what) in [
            ("Tab", "column"),
            ("g/Enter", "connect"),
            ("n/p", "focus"),
            ("x", "delete"),
            ("+/-", "weight"),
            ("^Z/^Y", "undo/redo"),
            ("^S", "save"),
            ("v", "validate"),
            ("e", "export"),
        ] {
            spans.push(Span::styled(key, Style::default().fg(Color::Yellow)));
            spans.push(Span::raw(format!(" {} ", what)));
        }
        spans.push(Span::styled("q", Style::default().fg(Color::Red)));
        spans.push(Span::raw(" quit"));
    }

    let status_bar = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );
    f.render_widget(status_bar, area);
}

/// "#rrggbb" → terminal colour
fn hex_color(hex: &str) -> Color {
    let digits = hex.trim_start_matches('#');
    let channel = |range: std::ops::Range<usize>| {
        digits.get(range).and_then(|s| u8::from_str_radix(s, 16).ok())
    };
    match (channel(0..2), channel(2..4), channel(4..6)) {
        (Some(r), Some(g), Some(b)) if digits.len() == 6 => Color::Rgb(r, g, b),
        _ => Color::White,
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
