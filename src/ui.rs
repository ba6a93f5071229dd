use crate::accumulator::Phase;
use crate::config::ClientConfig;
use crate::markdown;
use crate::session::{Session, SessionController, SessionReport, SessionStatus};
use crate::transport::HttpTransport;
use crate::view::{Indicator, RegenerateAction, ViewHandle, ViewSink};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const INPUT_HEIGHT: u16 = 6;
const STAGE_HEIGHT: u16 = 14;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

/// A [`ViewSink`] call, shipped from a session task to the UI loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewCommand {
    Open {
        handle: ViewHandle,
        phase: Phase,
        agent: String,
    },
    Update {
        handle: ViewHandle,
        text: String,
    },
    Finalize {
        handle: ViewHandle,
        text: String,
    },
    Error {
        handle: ViewHandle,
        agent: String,
        message: String,
    },
    Notice {
        handle: ViewHandle,
        message: String,
    },
    Regenerate {
        handle: ViewHandle,
        action: RegenerateAction,
    },
    Remove(ViewHandle),
    Indicator(Option<Indicator>),
    Composer(bool),
}

#[derive(Debug)]
pub enum UiEvent {
    View(ViewCommand),
    SessionFinished(SessionReport),
}

/// View sink for sessions running off the UI thread. Handles are drawn from
/// a counter shared with the UI so user bubbles never collide with them.
#[derive(Clone)]
pub struct ChannelView {
    sender: mpsc::UnboundedSender<UiEvent>,
    handles: Arc<AtomicU64>,
}

impl ChannelView {
    pub fn new(sender: mpsc::UnboundedSender<UiEvent>, handles: Arc<AtomicU64>) -> Self {
        Self { sender, handles }
    }

    fn next_handle(&self) -> ViewHandle {
        ViewHandle::new(self.handles.fetch_add(1, Ordering::Relaxed))
    }

    fn send(&self, command: ViewCommand) {
        if self.sender.send(UiEvent::View(command)).is_err() {
            log::debug!("ui loop gone; dropping view command");
        }
    }
}

impl ViewSink for ChannelView {
    fn open_bubble(&mut self, phase: Phase, agent: &str) -> ViewHandle {
        let handle = self.next_handle();
        self.send(ViewCommand::Open {
            handle,
            phase,
            agent: agent.to_string(),
        });
        handle
    }

    fn update_bubble(&mut self, handle: ViewHandle, text: &str) {
        self.send(ViewCommand::Update {
            handle,
            text: text.to_string(),
        });
    }

    fn finalize_bubble(&mut self, handle: ViewHandle, text: &str) {
        self.send(ViewCommand::Finalize {
            handle,
            text: text.to_string(),
        });
    }

    fn show_error(&mut self, agent: &str, message: &str) -> ViewHandle {
        let handle = self.next_handle();
        self.send(ViewCommand::Error {
            handle,
            agent: agent.to_string(),
            message: message.to_string(),
        });
        handle
    }

    fn show_notice(&mut self, message: &str) -> ViewHandle {
        let handle = self.next_handle();
        self.send(ViewCommand::Notice {
            handle,
            message: message.to_string(),
        });
        handle
    }

    fn attach_regenerate(&mut self, handle: ViewHandle, action: RegenerateAction) {
        self.send(ViewCommand::Regenerate { handle, action });
    }

    fn remove(&mut self, handle: ViewHandle) {
        self.send(ViewCommand::Remove(handle));
    }

    fn set_indicator(&mut self, indicator: Option<Indicator>) {
        self.send(ViewCommand::Indicator(indicator));
    }

    fn set_composer_enabled(&mut self, enabled: bool) {
        self.send(ViewCommand::Composer(enabled));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BubbleKind {
    User,
    Phase(Phase),
    Error,
    Notice,
}

#[derive(Debug, Clone)]
struct Bubble {
    handle: ViewHandle,
    kind: BubbleKind,
    agent: String,
    text: String,
    streaming: bool,
    regenerate: Option<RegenerateAction>,
}

impl Bubble {
    fn new(handle: ViewHandle, kind: BubbleKind, agent: &str, text: &str) -> Self {
        Self {
            handle,
            kind,
            agent: agent.to_string(),
            text: text.to_string(),
            streaming: false,
            regenerate: None,
        }
    }

    fn lines(&self, hint_regenerate: bool) -> Vec<Line<'static>> {
        let (header, body_style) = match self.kind {
            BubbleKind::User => ("You:".to_string(), Style::default().fg(Color::Blue)),
            BubbleKind::Phase(phase) => {
                let color = match phase {
                    Phase::Suggestion => Color::Yellow,
                    Phase::Generation => Color::Green,
                };
                (
                    format!("{} · {}", self.agent, phase.label()),
                    Style::default().fg(color),
                )
            }
            BubbleKind::Error => (
                format!("✗ {}:", self.agent),
                Style::default().fg(Color::Red),
            ),
            BubbleKind::Notice => {
                return vec![Line::from(Span::styled(
                    format!("ℹ {}", self.text),
                    Style::default()
                        .fg(Color::Gray)
                        .add_modifier(Modifier::ITALIC),
                ))];
            }
        };

        let mut spans = vec![Span::styled(header, body_style.add_modifier(Modifier::BOLD))];
        if self.streaming {
            spans.push(Span::styled(" ▍", Style::default().fg(Color::DarkGray)));
        }
        if let Some(action) = self.regenerate.as_ref().filter(|_| hint_regenerate) {
            spans.push(Span::styled(
                format!("  [Ctrl+R {}]", action.mode.label()),
                Style::default().fg(Color::DarkGray),
            ));
        }

        let mut lines = vec![Line::from(spans)];
        match self.kind {
            BubbleKind::Phase(_) => lines.extend(markdown::render(&self.text, Style::default())),
            _ => lines.extend(
                self.text
                    .lines()
                    .map(|line| Line::from(Span::styled(format!("  {}", line), body_style))),
            ),
        }
        lines
    }
}

/// Bubbles of the exchange in progress, drawn inside the inline viewport
/// until they are committed to scrollback.
#[derive(Debug, Default)]
struct Stage {
    bubbles: Vec<Bubble>,
    latest_action: Option<ViewHandle>,
}

impl Stage {
    fn push(&mut self, bubble: Bubble) {
        self.bubbles.push(bubble);
    }

    fn get_mut(&mut self, handle: ViewHandle) -> Option<&mut Bubble> {
        self.bubbles.iter_mut().find(|b| b.handle == handle)
    }

    /// Commands for handles that are not on stage belong to committed or
    /// removed bubbles and are dropped.
    fn apply(&mut self, command: ViewCommand) {
        match command {
            ViewCommand::Open {
                handle,
                phase,
                agent,
            } => {
                let mut bubble = Bubble::new(handle, BubbleKind::Phase(phase), &agent, "");
                bubble.streaming = true;
                self.push(bubble);
            }
            ViewCommand::Update { handle, text } => {
                if let Some(bubble) = self.get_mut(handle) {
                    bubble.text = text;
                }
            }
            ViewCommand::Finalize { handle, text } => {
                if let Some(bubble) = self.get_mut(handle) {
                    bubble.text = text;
                    bubble.streaming = false;
                }
            }
            ViewCommand::Error {
                handle,
                agent,
                message,
            } => self.push(Bubble::new(handle, BubbleKind::Error, &agent, &message)),
            ViewCommand::Notice { handle, message } => {
                self.push(Bubble::new(handle, BubbleKind::Notice, "", &message))
            }
            ViewCommand::Regenerate { handle, action } => {
                if let Some(bubble) = self.get_mut(handle) {
                    bubble.regenerate = Some(action);
                    self.latest_action = Some(handle);
                }
            }
            ViewCommand::Remove(handle) => {
                self.bubbles.retain(|b| b.handle != handle);
            }
            ViewCommand::Indicator(_) | ViewCommand::Composer(_) => {}
        }
    }

    /// The action Ctrl+R fires: the one attached last, or the newest still
    /// on stage once that bubble is gone.
    fn latest_action(&self) -> Option<&Bubble> {
        let attached = self.latest_action.and_then(|handle| {
            self.bubbles
                .iter()
                .find(|b| b.handle == handle && b.regenerate.is_some())
        });
        attached.or_else(|| self.bubbles.iter().rev().find(|b| b.regenerate.is_some()))
    }

    fn lines(&self) -> Vec<Line<'static>> {
        let hinted = self.latest_action().map(|b| b.handle);
        let mut lines = Vec::new();
        for bubble in &self.bubbles {
            lines.extend(bubble.lines(hinted == Some(bubble.handle)));
            lines.push(Line::default());
        }
        lines
    }

    fn clear(&mut self) {
        self.bubbles.clear();
        self.latest_action = None;
    }

    fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }
}

fn rendered_height(lines: &[Line<'_>], width: u16) -> u16 {
    let width = width.max(1) as usize;
    let total: usize = lines
        .iter()
        .map(|line| line.width().max(1).div_ceil(width))
        .sum();
    total.min(u16::MAX as usize) as u16
}

struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    // Cursor positions count chars; `byte_offset` maps them into the line.
    fn byte_offset(&self) -> usize {
        let line = &self.lines[self.cursor_y];
        line.char_indices()
            .nth(self.cursor_x)
            .map_or(line.len(), |(i, _)| i)
    }

    fn line_len(&self) -> usize {
        self.lines[self.cursor_y].chars().count()
    }

    fn insert_char(&mut self, c: char) {
        let offset = self.byte_offset();
        self.lines[self.cursor_y].insert(offset, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
            let offset = self.byte_offset();
            self.lines[self.cursor_y].remove(offset);
        } else if self.cursor_y > 0 {
            let prev_line = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len();
            self.lines[self.cursor_y].push_str(&prev_line);
        }
    }

    fn new_line(&mut self) {
        let offset = self.byte_offset();
        let remaining = self.lines[self.cursor_y].split_off(offset);
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len();
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len() {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len());
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len());
        }
    }

    fn to_string(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Paste code or ask a question...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct App {
    stage: Stage,
    input: InputBuffer,
    indicator: Option<Indicator>,
    composer_enabled: bool,
    should_quit: bool,
    sender: mpsc::UnboundedSender<UiEvent>,
    receiver: mpsc::UnboundedReceiver<UiEvent>,
    handles: Arc<AtomicU64>,
    controller: SessionController,
    transport: Arc<HttpTransport>,
}

impl App {
    pub fn new(config: ClientConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let transport = Arc::new(HttpTransport::new(&config.server_url));
        log::info!("chatting with {}", transport.base_url());

        Self {
            stage: Stage::default(),
            input: InputBuffer::new(),
            indicator: None,
            composer_enabled: true,
            should_quit: false,
            sender,
            receiver,
            handles: Arc::new(AtomicU64::new(0)),
            controller: SessionController::new(config),
            transport,
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let [stage_area, input_area] =
            Layout::vertical([Constraint::Min(0), Constraint::Length(INPUT_HEIGHT)])
                .areas(f.area());

        let lines = self.stage.lines();
        let overflow = rendered_height(&lines, stage_area.width).saturating_sub(stage_area.height);
        let stage = Paragraph::new(Text::from(lines))
            .wrap(Wrap { trim: false })
            .scroll((overflow, 0));
        f.render_widget(stage, stage_area);

        let title = match self.indicator {
            Some(indicator) => format!(" Enter to send, Esc to quit [{}] ", indicator.label()),
            None if !self.composer_enabled => " Enter to send, Esc to quit [waiting] ".to_string(),
            None => " Enter to send, Ctrl+R to regenerate, Esc to quit ".to_string(),
        };
        let border = if self.composer_enabled {
            Color::DarkGray
        } else {
            Color::Black
        };

        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(border)),
            )
            .wrap(Wrap { trim: false });

        f.render_widget(input_paragraph, input_area);

        if self.composer_enabled {
            let area = input_area;
            let cursor_x = (self.input.cursor_x + 1) as u16;
            let cursor_y = self.input.cursor_y as u16;
            let x = (area.x + cursor_x).min(area.x + area.width - 2);
            let y = (area.y + 1 + cursor_y).min(area.y + area.height - 2);
            f.set_cursor_position((x, y));
        }
    }

    /// Moves the staged exchange into scrollback above the viewport.
    fn commit(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        if self.stage.is_empty() {
            return Ok(());
        }

        let lines = self.stage.lines();
        let width = terminal.size()?.width;
        let height = rendered_height(&lines, width);
        let text = Text::from(lines);
        terminal.insert_before(height, |buf| {
            let paragraph = Paragraph::new(text).wrap(Wrap { trim: false });
            paragraph.render(buf.area, buf);
        })?;
        self.stage.clear();
        Ok(())
    }

    fn apply(&mut self, command: ViewCommand) {
        match command {
            ViewCommand::Indicator(indicator) => self.indicator = indicator,
            ViewCommand::Composer(enabled) => self.composer_enabled = enabled,
            command => self.stage.apply(command),
        }
    }

    fn submit(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        let message = self.input.to_string();
        if message.trim().is_empty() {
            return Ok(());
        }

        self.commit(terminal)?;
        let handle = ViewHandle::new(self.handles.fetch_add(1, Ordering::Relaxed));
        self.stage
            .push(Bubble::new(handle, BubbleKind::User, "", &message));
        self.input.clear();

        let session = self.controller.send(message);
        self.spawn(session);
        Ok(())
    }

    fn regenerate(&mut self) {
        let Some(action) = self
            .stage
            .latest_action()
            .and_then(|b| b.regenerate.clone())
        else {
            return;
        };

        let session = self.controller.regenerate(&action);
        self.spawn(session);
    }

    fn spawn(&mut self, session: Session) {
        log::debug!("spawning session {}", session.id());
        // The session disables the composer too, but only once its first
        // command arrives.
        self.composer_enabled = false;

        let transport = Arc::clone(&self.transport);
        let sender = self.sender.clone();
        let mut view = ChannelView::new(self.sender.clone(), Arc::clone(&self.handles));
        tokio::spawn(async move {
            let report = session.run(transport.as_ref(), &mut view).await;
            let _ = sender.send(UiEvent::SessionFinished(report));
        });
    }

    fn handle_events(&mut self, terminal: &mut TuiTerminal) -> UiResult<bool> {
        while let Ok(event) = self.receiver.try_recv() {
            match event {
                UiEvent::View(command) => self.apply(command),
                UiEvent::SessionFinished(report) => {
                    if report.status == SessionStatus::Failed {
                        log::warn!(
                            "session {} failed: {}",
                            report.id,
                            report.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    self.controller.record(&report);
                    if let Some(suggestion) = self.controller.last_suggestion() {
                        log::debug!("cached suggestion from {}", suggestion.agent);
                    }
                }
            }
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                let control = key.modifiers.contains(KeyModifiers::CONTROL);
                if control && key.code == KeyCode::Char('c') {
                    self.should_quit = true;
                    return Ok(false);
                }
                if control && key.code == KeyCode::Char('r') {
                    self.regenerate();
                    return Ok(true);
                }

                match key.code {
                    KeyCode::Esc => {
                        self.should_quit = true;
                        return Ok(false);
                    }
                    KeyCode::Enter => {
                        if key.modifiers.contains(KeyModifiers::SHIFT) {
                            self.input.new_line();
                        } else if self.composer_enabled && !self.input.is_empty() {
                            self.submit(terminal)?;
                        }
                    }
                    KeyCode::Char(c) => {
                        self.input.insert_char(c);
                    }
                    KeyCode::Backspace => {
                        self.input.delete_char();
                    }
                    KeyCode::Left => {
                        self.input.move_left();
                    }
                    KeyCode::Right => {
                        self.input.move_right();
                    }
                    KeyCode::Up => {
                        self.input.move_up();
                    }
                    KeyCode::Down => {
                        self.input.move_down();
                    }
                    KeyCode::Home => {
                        self.input.cursor_x = 0;
                    }
                    KeyCode::End => {
                        self.input.cursor_x = self.input.line_len();
                    }
                    _ => {}
                }
            }
        }

        Ok(true)
    }
}

pub fn run_tui(config: ClientConfig) -> UiResult<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(STAGE_HEIGHT + INPUT_HEIGHT),
        },
    )?;

    let mut app = App::new(config);

    let _guard = TerminalGuard::new();

    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;

        std::thread::sleep(Duration::from_millis(10));
    }

    app.commit(&mut terminal)?;
    terminal.clear()?;
    disable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::RegenerateMode;

    fn plain(lines: &[Line<'_>]) -> Vec<String> {
        lines
            .iter()
            .map(|line| line.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    fn action(mode: RegenerateMode, target: u64) -> RegenerateAction {
        RegenerateAction {
            mode,
            message: "fix this loop".to_string(),
            suggestion: None,
            target: ViewHandle::new(target),
        }
    }

    #[test]
    fn input_buffer_shift_enter_inserts_new_line() {
        let mut buffer = InputBuffer::new();
        for ch in "hello".chars() {
            buffer.insert_char(ch);
        }
        buffer.new_line();
        for ch in "world".chars() {
            buffer.insert_char(ch);
        }

        assert_eq!(buffer.to_string(), "hello\nworld");
        assert_eq!(buffer.lines.len(), 2);
        assert_eq!(buffer.cursor_y, 1);
    }

    #[test]
    fn input_buffer_edits_multibyte_text() {
        let mut buffer = InputBuffer::new();
        for ch in "héllo".chars() {
            buffer.insert_char(ch);
        }
        buffer.move_left();
        buffer.move_left();
        buffer.delete_char();
        assert_eq!(buffer.to_string(), "hélo");
        buffer.new_line();
        assert_eq!(buffer.to_string(), "hé\nlo");
    }

    #[test]
    fn channel_view_forwards_commands_with_shared_handles() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let handles = Arc::new(AtomicU64::new(7));
        let mut view = ChannelView::new(sender, Arc::clone(&handles));

        let bubble = view.open_bubble(Phase::Suggestion, "Reviewer");
        view.update_bubble(bubble, "Use a");
        let error = view.show_error("client", "boom");

        assert_eq!(bubble, ViewHandle::new(7));
        assert_eq!(error, ViewHandle::new(8));
        assert_eq!(handles.load(Ordering::Relaxed), 9);

        let mut commands = Vec::new();
        while let Ok(UiEvent::View(command)) = receiver.try_recv() {
            commands.push(command);
        }
        assert_eq!(
            commands,
            vec![
                ViewCommand::Open {
                    handle: bubble,
                    phase: Phase::Suggestion,
                    agent: "Reviewer".to_string(),
                },
                ViewCommand::Update {
                    handle: bubble,
                    text: "Use a".to_string(),
                },
                ViewCommand::Error {
                    handle: error,
                    agent: "client".to_string(),
                    message: "boom".to_string(),
                },
            ]
        );
    }

    #[test]
    fn stage_renders_streaming_bubble_and_drops_stale_handles() {
        let mut stage = Stage::default();
        let handle = ViewHandle::new(1);
        stage.apply(ViewCommand::Open {
            handle,
            phase: Phase::Suggestion,
            agent: "Reviewer".to_string(),
        });
        stage.apply(ViewCommand::Update {
            handle,
            text: "- Use `for`".to_string(),
        });
        stage.apply(ViewCommand::Update {
            handle: ViewHandle::new(99),
            text: "ignored".to_string(),
        });

        assert_eq!(
            plain(&stage.lines()),
            vec!["Reviewer · suggestions ▍", "  • Use for", ""]
        );

        stage.apply(ViewCommand::Finalize {
            handle,
            text: "- Use `for`".to_string(),
        });
        assert_eq!(plain(&stage.lines())[0], "Reviewer · suggestions");
    }

    #[test]
    fn latest_action_falls_back_when_its_bubble_is_removed() {
        let mut stage = Stage::default();
        for (id, phase) in [(1, Phase::Suggestion), (2, Phase::Generation)] {
            stage.apply(ViewCommand::Open {
                handle: ViewHandle::new(id),
                phase,
                agent: "agent".to_string(),
            });
        }
        stage.apply(ViewCommand::Regenerate {
            handle: ViewHandle::new(1),
            action: action(RegenerateMode::Suggestions, 1),
        });
        stage.apply(ViewCommand::Regenerate {
            handle: ViewHandle::new(2),
            action: action(RegenerateMode::Implementation, 2),
        });
        assert_eq!(
            stage.latest_action().map(|b| b.handle),
            Some(ViewHandle::new(2))
        );

        stage.apply(ViewCommand::Remove(ViewHandle::new(2)));
        assert_eq!(
            stage.latest_action().map(|b| b.handle),
            Some(ViewHandle::new(1))
        );

        stage.clear();
        assert!(stage.latest_action().is_none());
    }

    #[test]
    fn regenerate_hint_marks_only_the_latest_action() {
        let mut stage = Stage::default();
        let handle = ViewHandle::new(3);
        stage.apply(ViewCommand::Error {
            handle,
            agent: "client".to_string(),
            message: "server returned HTTP 502: bad gateway".to_string(),
        });
        stage.apply(ViewCommand::Regenerate {
            handle,
            action: action(RegenerateMode::Suggestions, 3),
        });

        assert_eq!(
            plain(&stage.lines()),
            vec![
                "✗ client:  [Ctrl+R regenerate suggestions]",
                "  server returned HTTP 502: bad gateway",
                "",
            ]
        );
    }

    #[test]
    fn height_counts_wrapped_rows() {
        let lines = vec![Line::from("abcdef"), Line::default(), Line::from("ab")];
        assert_eq!(rendered_height(&lines, 4), 4);
    }
}
