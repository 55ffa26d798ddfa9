use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use meal_ledger::{MealSummary, Money, SettlementReport, Transfer};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Meals,
    Balances,
    Transfers,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Meals => Page::Balances,
            Page::Balances => Page::Transfers,
            Page::Transfers => Page::Meals,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Meals => Page::Transfers,
            Page::Balances => Page::Meals,
            Page::Transfers => Page::Balances,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Meals => "Unsettled Meals",
            Page::Balances => "Balances",
            Page::Transfers => "Transfers",
        }
    }
}

pub struct App {
    pub report: SettlementReport,
    pub balances: Vec<(String, Money)>,
    pub current_page: Page,
    pub meals_state: TableState,
    pub balances_state: TableState,
    pub transfers_state: TableState,
}

impl App {
    pub fn new(report: SettlementReport) -> Self {
        // Largest creditor first, largest debtor last
        let mut balances: Vec<(String, Money)> = report
            .balances
            .iter()
            .map(|(name, amount)| (name.clone(), *amount))
            .collect();
        balances.sort_by(|a, b| b.1.cmp(&a.1));

        let mut app = Self {
            report,
            balances,
            current_page: Page::Meals,
            meals_state: TableState::default(),
            balances_state: TableState::default(),
            transfers_state: TableState::default(),
        };
        app.reset_selection();
        app
    }

    fn reset_selection(&mut self) {
        let len = self.row_count();
        self.state_mut().select(if len == 0 { None } else { Some(0) });
    }

    pub fn row_count(&self) -> usize {
        match self.current_page {
            Page::Meals => self.report.meal_summaries.len(),
            Page::Balances => self.balances.len(),
            Page::Transfers => self.report.transactions.len(),
        }
    }

    pub fn state_mut(&mut self) -> &mut TableState {
        match self.current_page {
            Page::Meals => &mut self.meals_state,
            Page::Balances => &mut self.balances_state,
            Page::Transfers => &mut self.transfers_state,
        }
    }

    pub fn selected(&self) -> Option<usize> {
        match self.current_page {
            Page::Meals => self.meals_state.selected(),
            Page::Balances => self.balances_state.selected(),
            Page::Transfers => self.transfers_state.selected(),
        }
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
        if self.selected().is_none() {
            self.reset_selection();
        }
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
        if self.selected().is_none() {
            self.reset_selection();
        }
    }

    pub fn next(&mut self) {
        let len = self.row_count();
        if len == 0 {
            return;
        }
        let i = match self.selected() {
            Some(i) if i + 1 >= len => 0,
            Some(i) => i + 1,
            None => 0,
        };
        self.state_mut().select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.row_count();
        if len == 0 {
            return;
        }
        let i = match self.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state_mut().select(Some(i));
    }

    pub fn first(&mut self) {
        if self.row_count() > 0 {
            self.state_mut().select(Some(0));
        }
    }

    pub fn last(&mut self) {
        let len = self.row_count();
        if len > 0 {
            self.state_mut().select(Some(len - 1));
        }
    }

    pub fn flagged_count(&self) -> usize {
        self.report.flagged_meals().count()
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::Home => app.first(),
                KeyCode::End => app.last(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Meals => render_meals(f, chunks[1], app),
        Page::Balances => render_balances(f, chunks[1], app),
        Page::Transfers => render_transfers(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Meals, Page::Balances, Page::Transfers];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }
        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("   "));
    tab_spans.push(Span::styled(
        format!("{} unsettled", app.report.unsettled_count),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw(" | "));
    tab_spans.push(Span::styled(
        format!("{} transfers", app.report.transactions.len()),
        Style::default().fg(Color::Green),
    ));
    if app.flagged_count() > 0 {
        tab_spans.push(Span::raw(" | "));
        tab_spans.push(Span::styled(
            format!("{} flagged", app.flagged_count()),
            Style::default().fg(Color::Red),
        ));
    }

    let header = Paragraph::new(Line::from(tab_spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" 🍱 Meal Ledger "),
    );

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });

    Row::new(cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1)
}

fn content_block(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White))
        .title(title)
}

fn highlight() -> Style {
    Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD)
}

fn flags(meal: &MealSummary) -> String {
    let mut notes = Vec::new();
    if meal.missing_payer {
        notes.push("no payer");
    }
    if meal.unattributed_shared {
        notes.push("shared, no diners");
    }
    notes.join(", ")
}

fn render_meals(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.report.meal_summaries.iter().map(|meal| {
        let paid_by = meal
            .payments
            .iter()
            .map(|p| format!("{} {}", p.person, format_money(p.amount)))
            .collect::<Vec<_>>()
            .join(", ");

        let flagged = meal.missing_payer || meal.unattributed_shared;
        let color = if flagged { Color::Red } else { Color::White };

        Row::new(vec![
            Cell::from(meal.date.to_string()),
            Cell::from(truncate(&meal.restaurant, 24)),
            Cell::from(format_money(meal.total_spent)),
            Cell::from(format_money(meal.total_paid)),
            Cell::from(truncate(&paid_by, 30)),
            Cell::from(flags(meal)).style(Style::default().fg(color)),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(26),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(32),
            Constraint::Min(10),
        ],
    )
    .header(header_row(&["Date", "Restaurant", "Spent", "Paid", "Paid by", "Flags"]))
    .block(content_block(" Unsettled Meals "))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.meals_state);
}

fn render_balances(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.balances.iter().map(|(name, amount)| {
        let (color, label) = if amount.is_zero() {
            (Color::DarkGray, "settled")
        } else if amount.is_sign_negative() {
            (Color::Red, "owes")
        } else {
            (Color::Green, "is owed")
        };

        Row::new(vec![
            Cell::from(truncate(name, 24)),
            Cell::from(format_money(*amount)).style(Style::default().fg(color)),
            Cell::from(label).style(Style::default().fg(color)),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(26),
            Constraint::Length(14),
            Constraint::Min(10),
        ],
    )
    .header(header_row(&["Person", "Balance", ""]))
    .block(content_block(" Balances "))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.balances_state);
}

fn render_transfers(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.report.transactions.iter().map(|t: &Transfer| {
        Row::new(vec![
            Cell::from(truncate(&t.from, 24)).style(Style::default().fg(Color::Red)),
            Cell::from("→"),
            Cell::from(truncate(&t.to, 24)).style(Style::default().fg(Color::Green)),
            Cell::from(format_money(t.amount)),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(26),
            Constraint::Length(3),
            Constraint::Length(26),
            Constraint::Min(10),
        ],
    )
    .header(header_row(&["From", "", "To", "Amount"]))
    .block(content_block(" Suggested Transfers "))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.transfers_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.selected().map(|i| i + 1).unwrap_or(0);
    let total = app.row_count();

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, total),
        Style::default().fg(Color::Cyan),
    )];

    if !app.report.rounding_residual.is_zero() {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(
            format!("Rounding: {}", app.report.rounding_residual),
            Style::default().fg(Color::Yellow),
        ));
    }

    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Page | "));
    status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Nav | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn format_money(amount: Money) -> String {
    format!("{:.2}", amount)
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
