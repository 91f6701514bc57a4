use std::collections::VecDeque;
use std::io::{self, Stdout};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Wrap};

use crate::app::{Progress, ProgressEvent, ProgressSink};
use crate::domain::Catalog;
use crate::error::PkgError;

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Recover,
    Resolve,
    Fetch,
    Merge,
    Done,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Recover => "Recover",
            Phase::Resolve => "Resolve",
            Phase::Fetch => "Fetch",
            Phase::Merge => "Merge",
            Phase::Done => "Done",
        }
    }
}

#[derive(Debug)]
struct AppState {
    status: String,
    phase: Phase,
    title: Option<String>,
    piece: Option<(usize, usize)>,
    bytes: Option<(u64, Option<u64>)>,
    merge: Option<(usize, usize)>,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    show_logs: bool,
    started: Instant,
    active: bool,
}

pub struct Tui {
    state: Arc<Mutex<AppState>>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match event.progress {
            Some(Progress::Bytes { written, total }) => {
                state.bytes = Some((written, total));
                return;
            }
            Some(Progress::Piece { position, total }) => {
                state.piece = Some((position, total));
                state.bytes = None;
            }
            Some(Progress::Merge { merged, total }) => state.merge = Some((merged, total)),
            None => {}
        }

        let message = event.message.trim().to_string();
        if let Some((phase, payload)) = parse_phase(&message) {
            state.phase = phase;
            state.status = payload.to_string();
        } else {
            state.status = message.clone();
        }
        push_event(&mut state.events, message.clone());
        push_log(&mut state.logs, format!("[{}] {message}", timestamp()));
    }
}

impl Default for Tui {
    fn default() -> Self {
        Self::new()
    }
}

impl Tui {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AppState {
                status: "ready".to_string(),
                phase: Phase::Recover,
                title: None,
                piece: None,
                bytes: None,
                merge: None,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                show_logs: false,
                started: Instant::now(),
                active: false,
            })),
            log_scroll: 0,
        }
    }

    pub fn set_title(&self, title: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.title = Some(title.to_string());
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. `q`, `Esc` or
    /// `Ctrl-C` abandon the run with [`PkgError::UserCancelled`].
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, PkgError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);
        let mut terminal = enter_terminal()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, tick))
                    .into_diagnostic()?;
            }

            if let Some(result) = take_result(&rx) {
                self.set_active(false);
                leave_terminal()?;
                handle.join().ok();
                return result;
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if self.handle_key(key) {
                        break;
                    }
                }
            }

            tick = tick.wrapping_add(1);
        }

        // The worker is left blocked on I/O; process exit tears it down and
        // the next startup recovery removes its staging file.
        self.set_active(false);
        leave_terminal()?;
        Err(miette::Report::new(PkgError::UserCancelled))
    }

    /// Lets the user pick one catalog entry. Returns its id.
    pub fn select_patch(&mut self, catalog: &Catalog) -> miette::Result<u32> {
        let ids: Vec<u32> = catalog.entries.keys().copied().collect();
        if ids.is_empty() {
            return Err(miette::Report::new(PkgError::LookupNotFound(
                catalog.title_id.to_string(),
            )));
        }
        let mut terminal = enter_terminal()?;
        let mut selected = 0usize;

        let choice = loop {
            terminal
                .draw(|frame| {
                    let mut lines = vec![
                        Line::from(Span::styled(
                            format!("--{}--", catalog.title),
                            Style::default()
                                .fg(Color::Cyan)
                                .add_modifier(Modifier::BOLD),
                        )),
                        Line::from(Span::styled(
                            format!(
                                "{:<4}{:<16}{:<20}{}",
                                "ID", "Update version", "Required firmware", "Size"
                            ),
                            Style::default().fg(Color::Gray),
                        )),
                    ];
                    for (row, id) in ids.iter().enumerate() {
                        let Some(entry) = catalog.entries.get(id) else {
                            continue;
                        };
                        let text = format!(
                            "{:<4}{:<16}{:<20}{}",
                            id, entry.update_version, entry.required_firmware, entry.size
                        );
                        let style = if row == selected {
                            Style::default().fg(Color::Black).bg(Color::Cyan)
                        } else {
                            Style::default()
                        };
                        lines.push(Line::from(Span::styled(text, style)));
                    }
                    lines.push(Line::from(""));
                    lines.push(Line::from(Span::styled(
                        "Up/Down to move, Enter to download, Esc to cancel.",
                        Style::default().fg(Color::Gray),
                    )));
                    let block = Block::default()
                        .borders(Borders::ALL)
                        .title(format!("Updates for {}", catalog.title_id));
                    let text = Paragraph::new(lines)
                        .alignment(Alignment::Left)
                        .block(block);
                    frame.render_widget(text, frame.area());
                })
                .into_diagnostic()?;

            if event::poll(Duration::from_millis(100)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if is_abort(&key) {
                        break None;
                    }
                    match key.code {
                        KeyCode::Up | KeyCode::Char('k') => selected = selected.saturating_sub(1),
                        KeyCode::Down | KeyCode::Char('j') => {
                            selected = (selected + 1).min(ids.len() - 1)
                        }
                        KeyCode::Enter => break Some(ids[selected]),
                        _ => {}
                    }
                }
            }
        };

        leave_terminal()?;
        choice.ok_or_else(|| miette::Report::new(PkgError::UserCancelled))
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        if is_abort(&key) {
            return true;
        }
        match key.code {
            KeyCode::F(4) | KeyCode::Char('l') => {
                if let Ok(mut state) = self.state.lock() {
                    state.show_logs = !state.show_logs;
                }
                self.log_scroll = 0;
            }
            KeyCode::PageUp => self.log_scroll = self.log_scroll.saturating_add(5),
            KeyCode::PageDown => self.log_scroll = self.log_scroll.saturating_sub(5),
            _ => {}
        }
        false
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            state.started = Instant::now();
        }
    }
}

/// `None` while the worker is still busy. A worker that went away without
/// sending, because it panicked, is reported as an error.
fn take_result<R>(rx: &Receiver<Result<R, PkgError>>) -> Option<miette::Result<R>> {
    match rx.try_recv() {
        Ok(result) => Some(result.map_err(miette::Report::new)),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => Some(Err(miette::Report::msg(
            "worker stopped without reporting a result",
        ))),
    }
}

fn is_abort(key: &KeyEvent) -> bool {
    matches!(key.code, KeyCode::Esc | KeyCode::Char('q'))
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
}

fn enter_terminal() -> miette::Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode().into_diagnostic()?;
    stdout.execute(EnterAlternateScreen).into_diagnostic()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout)).into_diagnostic()?;
    terminal.clear().into_diagnostic()?;
    Ok(terminal)
}

fn leave_terminal() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    io::stdout()
        .execute(LeaveAlternateScreen)
        .into_diagnostic()?;
    Ok(())
}

fn draw_ui(frame: &mut ratatui::Frame, tui: &Tui, state: &AppState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Length(3),
            Constraint::Min(4),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(state, tick), chunks[0]);
    frame.render_widget(draw_status_panel(state), chunks[1]);
    frame.render_widget(draw_bytes_gauge(state), chunks[2]);
    if state.show_logs {
        frame.render_widget(draw_logs_view(state, tui.log_scroll), chunks[3]);
    } else {
        frame.render_widget(draw_events_panel(state), chunks[3]);
    }
    frame.render_widget(
        Paragraph::new(Span::styled(
            "q/Esc abort   l logs   PgUp/PgDn scroll",
            Style::default().fg(Color::Gray),
        )),
        chunks[4],
    );
}

fn draw_header(state: &AppState, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let header_line = Line::from(vec![
        Span::styled(
            "PS4-PKG-FETCH",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    let title_line = Line::from(Span::styled(
        state.title.clone().unwrap_or_else(|| "-".to_string()),
        Style::default().fg(Color::Gray),
    ));
    Paragraph::new(vec![header_line, title_line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &AppState) -> Paragraph<'static> {
    let phase_color = if state.active {
        Color::Cyan
    } else {
        Color::Green
    };
    let pieces = state
        .piece
        .map(|(position, total)| format!("{position} of {total}"))
        .unwrap_or_else(|| "--".to_string());
    let merge = state
        .merge
        .map(|(merged, total)| {
            let percent = if total == 0 { 0 } else { merged * 100 / total };
            format!("{} {merged}/{total}", progress_bar(percent as u8))
        })
        .unwrap_or_else(|| "--".to_string());
    let elapsed = state.started.elapsed().as_secs();

    let lines = vec![
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:<8}", state.phase.label()),
                Style::default().fg(phase_color),
            ),
            Span::styled("Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}:{:02}", elapsed / 60, elapsed % 60)),
        ]),
        Line::from(vec![
            Span::styled("Piece: ", Style::default().fg(Color::Gray)),
            Span::raw(pieces),
        ]),
        Line::from(vec![
            Span::styled("Merge: ", Style::default().fg(Color::Gray)),
            Span::raw(merge),
        ]),
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
    ];
    Paragraph::new(lines)
        .block(
            Block::default().borders(Borders::BOTTOM).title(Span::styled(
                "STATUS / PROGRESS",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )),
        )
        .wrap(Wrap { trim: true })
}

fn draw_bytes_gauge(state: &AppState) -> Gauge<'static> {
    let (ratio, label) = match state.bytes {
        Some((written, Some(total))) if total > 0 => (
            (written as f64 / total as f64).clamp(0.0, 1.0),
            format!("{} / {}", bytes_to_human(written), bytes_to_human(total)),
        ),
        Some((written, _)) => (0.0, bytes_to_human(written)),
        None => (0.0, "--".to_string()),
    };
    Gauge::default()
        .block(Block::default().borders(Borders::BOTTOM))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio)
        .label(label)
}

fn draw_events_panel(state: &AppState) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "Recent events:",
        Style::default().fg(Color::Gray),
    ))];
    for event in state.events.iter().rev() {
        lines.push(Line::from(format!("- {event}")));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_logs_view(state: &AppState, scroll: u16) -> Paragraph<'static> {
    let lines: Vec<Line> = state
        .logs
        .iter()
        .rev()
        .map(|line| Line::from(line.clone()))
        .collect();
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::TOP).title("Logs"))
        .scroll((scroll, 0))
        .wrap(Wrap { trim: false })
}

fn progress_bar(percent: u8) -> String {
    let total = 10;
    let filled = (percent.min(100) as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (label, payload) = rest.split_once(';')?;
    let phase = match label {
        "Recover" => Phase::Recover,
        "Resolve" => Phase::Resolve,
        "Fetch" => Phase::Fetch,
        "Merge" => Phase::Merge,
        "Done" => Phase::Done,
        _ => return None,
    };
    Some((phase, payload.trim()))
}

fn push_event(buffer: &mut VecDeque<String>, item: String) {
    buffer.push_back(item);
    while buffer.len() > EVENTS_MAX {
        buffer.pop_front();
    }
}

fn push_log(buffer: &mut VecDeque<String>, item: String) {
    buffer.push_back(item);
    while buffer.len() > LOGS_MAX {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

pub fn bytes_to_human(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let value = bytes as f64;
    if value >= GB {
        format!("{:.1} GB", value / GB)
    } else if value >= MB {
        format!("{:.1} MB", value / MB)
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{bytes} B")
    }
}
