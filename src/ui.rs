use crate::bridge::{EntryTag, GenerationBridge, SubmitError, TranscriptEntry, TurnOptions};
use crate::commands::{HELP, SlashCommand, parse_command};
use crate::config::PersistedState;
use crate::knowledge::{KbEvent, KbRequest, KnowledgeBridge};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
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
use std::path::PathBuf;
use std::time::Duration;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const INPUT_HEIGHT: u16 = 5;
const LIVE_HEIGHT: u16 = 8;
const VIEWPORT_HEIGHT: u16 = LIVE_HEIGHT + 1 + INPUT_HEIGHT;
const DRAIN_BATCH: usize = 64;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

fn entry_lines(entry: &TranscriptEntry) -> Vec<LineSpec> {
    let (header, color) = match entry.tag {
        EntryTag::User => (Some("You:"), Color::Blue),
        EntryTag::Assistant => (Some("Assistant:"), Color::Yellow),
        EntryTag::Error => (None, Color::Red),
        EntryTag::Info => (None, Color::Gray),
    };

    match header {
        Some(header) => {
            let body_style = Style::default().fg(color);
            let mut lines = vec![LineSpec::new(header, body_style.add_modifier(Modifier::BOLD))];
            for line in entry.text.lines() {
                lines.push(LineSpec::new(format!("  {}", line), body_style));
            }
            lines
        }
        None => {
            let style = if entry.tag == EntryTag::Error {
                Style::default().fg(color).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(color).add_modifier(Modifier::ITALIC)
            };
            let marker = if entry.tag == EntryTag::Error { "✗" } else { "ℹ" };
            entry
                .text
                .lines()
                .enumerate()
                .map(|(idx, line)| {
                    if idx == 0 {
                        LineSpec::new(format!("{} {}", marker, line), style)
                    } else {
                        LineSpec::new(format!("  {}", line), style)
                    }
                })
                .collect()
        }
    }
}

fn to_text(specs: Vec<LineSpec>) -> Text<'static> {
    Text::from(
        specs
            .into_iter()
            .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
            .collect::<Vec<_>>(),
    )
}

fn wrapped_height<'a>(lines: impl IntoIterator<Item = &'a str>, width: u16) -> u16 {
    let width = width.max(1) as usize;
    let total: usize = lines
        .into_iter()
        .map(|line| line.chars().count().max(1).div_ceil(width))
        .sum();
    total.min(u16::MAX as usize) as u16
}

struct InputBuffer {
    lines: Vec<String>,
    /// Cursor column in characters, not bytes.
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

    fn line_len(&self, y: usize) -> usize {
        self.lines[y].chars().count()
    }

    fn byte_index(line: &str, char_idx: usize) -> usize {
        line.char_indices()
            .nth(char_idx)
            .map(|(idx, _)| idx)
            .unwrap_or(line.len())
    }

    fn insert_char(&mut self, c: char) {
        let line = &mut self.lines[self.cursor_y];
        let at = Self::byte_index(line, self.cursor_x);
        line.insert(at, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            let line = &mut self.lines[self.cursor_y];
            let at = Self::byte_index(line, self.cursor_x - 1);
            line.remove(at);
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            let prev_line = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
            self.lines[self.cursor_y].push_str(&prev_line);
        }
    }

    fn new_line(&mut self) {
        let line = &self.lines[self.cursor_y];
        let remaining: String = line.chars().skip(self.cursor_x).collect();
        self.lines[self.cursor_y] = line.chars().take(self.cursor_x).collect();
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len(self.cursor_y) {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn home(&mut self) {
        self.cursor_x = 0;
    }

    fn end(&mut self) {
        self.cursor_x = self.line_len(self.cursor_y);
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
                "Type a message, or /help for commands...",
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

/// Turns a knowledge-base outcome into a transcript line.
pub fn describe_kb_event(event: &KbEvent, selected: Option<&str>) -> Option<(EntryTag, String)> {
    let text = match event {
        KbEvent::Stores(stores) if stores.is_empty() => "No vector stores.".to_string(),
        KbEvent::Stores(stores) => {
            let mut text = String::from("Vector stores:");
            for store in stores {
                let marker = if Some(store.id.as_str()) == selected { "*" } else { " " };
                text.push_str(&format!(
                    "\n{} {}  {}  files={}  {}",
                    marker,
                    store.id,
                    store.display_name(),
                    store.file_count,
                    store.status
                ));
            }
            text
        }
        KbEvent::StoreSaved(store) => {
            format!("Saved store {} ({})", store.id, store.display_name())
        }
        KbEvent::StoreDeleted { store_id } => format!("Deleted store {}", store_id),
        KbEvent::Files { store_id, files } if files.is_empty() => {
            format!("Store {} has no files.", store_id)
        }
        KbEvent::Files { store_id, files } => {
            let mut text = format!("Files in {}:", store_id);
            for file in files {
                text.push_str(&format!(
                    "\n  {}  {}  created={}",
                    file.id(),
                    file.filename(),
                    file.created_at()
                ));
            }
            text
        }
        KbEvent::DocumentAdded {
            store_id,
            file,
            status,
        } => format!(
            "Added {} ({}) to {}: indexing {}",
            file.filename,
            file.id,
            store_id,
            status.as_str()
        ),
        KbEvent::FileRemoved { store_id, file_id } => {
            format!("Removed {} from {}", file_id, store_id)
        }
        KbEvent::Progress(message) => message.clone(),
        KbEvent::Failed { operation, message } => {
            return Some((EntryTag::Error, format!("Could not {}: {}", operation, message)));
        }
        KbEvent::Done => return None,
    };
    Some((EntryTag::Info, text))
}

pub struct App {
    input: InputBuffer,
    should_quit: bool,
    chat: GenerationBridge,
    kb: KnowledgeBridge,
    options: TurnOptions,
    state: PersistedState,
    state_path: PathBuf,
    /// Transcript entries already written above the viewport.
    flushed: usize,
}

impl App {
    pub fn new(
        chat: GenerationBridge,
        kb: KnowledgeBridge,
        state: PersistedState,
        state_path: PathBuf,
    ) -> Self {
        Self {
            input: InputBuffer::new(),
            should_quit: false,
            options: state.turn_options(),
            chat,
            kb,
            state,
            state_path,
            flushed: 0,
        }
    }

    fn status_text(&self) -> String {
        let session = self.chat.session();
        let effort = self
            .options
            .reasoning
            .map(|e| e.as_str())
            .unwrap_or("default");
        format!(
            " {} | effort: {} | tools: {} | {}",
            session.model,
            effort,
            self.options.describe_tools(),
            session.status_line()
        )
    }

    fn draw(&mut self, f: &mut Frame) {
        let [live_area, status_area, input_area] = Layout::vertical([
            Constraint::Min(1),
            Constraint::Length(1),
            Constraint::Length(INPUT_HEIGHT),
        ])
        .areas(f.area());

        if let Some(text) = self.chat.session().streaming_text() {
            let body_style = Style::default().fg(Color::Yellow);
            let height = wrapped_height(text.lines(), live_area.width);
            let offset = height.saturating_sub(live_area.height);
            let paragraph = Paragraph::new(Text::styled(text.to_string(), body_style))
                .wrap(Wrap { trim: false })
                .scroll((offset, 0));
            f.render_widget(paragraph, live_area);
        }

        f.render_widget(
            Paragraph::new(Span::styled(
                self.status_text(),
                Style::default().fg(Color::DarkGray),
            )),
            status_area,
        );

        let title = if self.chat.session().cancel_requested() && self.chat.session().is_generating() {
            " Input [Stopping...] "
        } else if self.chat.session().is_generating() {
            " Input (Enter to send, Esc to stop) [Generating...] "
        } else if self.kb.is_busy() {
            " Input (Enter to send, Esc to quit) [Working...] "
        } else {
            " Input (Enter to send, Esc to quit) "
        };

        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });

        f.render_widget(input_paragraph, input_area);

        let cursor_x = (self.input.cursor_x + 1) as u16;
        let cursor_y = self.input.cursor_y as u16;
        let x = (input_area.x + cursor_x).min(input_area.x + input_area.width.saturating_sub(2));
        let y = (input_area.y + 1 + cursor_y).min(input_area.y + input_area.height.saturating_sub(2));
        f.set_cursor_position((x, y));
    }

    fn flush_transcript(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        let width = terminal.size()?.width;
        let pending: Vec<TranscriptEntry> = self.chat.session().transcript()[self.flushed..].to_vec();
        for entry in pending {
            let specs = entry_lines(&entry);
            let height = wrapped_height(specs.iter().map(|s| s.text.as_str()), width).saturating_add(1);
            let mut text = to_text(specs);
            text.extend(Text::raw("\n"));
            // Insert above the inline viewport so the log stays in scrollback.
            terminal.insert_before(height, |buf| {
                let paragraph = Paragraph::new(text).wrap(Wrap { trim: false });
                paragraph.render(buf.area, buf);
            })?;
            self.flushed += 1;
        }
        Ok(())
    }

    /// One UI tick: apply queued results, then handle at most one key.
    fn tick(&mut self, terminal: &mut TuiTerminal) -> UiResult<bool> {
        self.chat.drain_once(DRAIN_BATCH);
        for event in self.kb.drain_once(DRAIN_BATCH) {
            self.apply_kb_event(&event);
        }
        self.flush_transcript(terminal)?;

        if event::poll(Duration::from_millis(50))?
            && let Event::Key(key) = event::read()?
        {
            if key.kind != KeyEventKind::Press {
                return Ok(true);
            }

            if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                self.should_quit = true;
                return Ok(false);
            }

            match key.code {
                KeyCode::Esc => {
                    if self.chat.session().is_generating() {
                        self.chat.cancel();
                    } else {
                        self.should_quit = true;
                        return Ok(false);
                    }
                }
                KeyCode::Enter => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        self.input.new_line();
                    } else if !self.input.is_empty() {
                        let msg = self.input.to_string();
                        if !msg.trim().is_empty() {
                            self.input.clear();
                            self.handle_submit(&msg);
                        }
                    }
                }
                KeyCode::Char(c) => self.input.insert_char(c),
                KeyCode::Backspace => self.input.delete_char(),
                KeyCode::Left => self.input.move_left(),
                KeyCode::Right => self.input.move_right(),
                KeyCode::Up => self.input.move_up(),
                KeyCode::Down => self.input.move_down(),
                KeyCode::Home => self.input.home(),
                KeyCode::End => self.input.end(),
                _ => {}
            }
        }

        Ok(!self.should_quit)
    }

    fn handle_submit(&mut self, msg: &str) {
        match parse_command(msg) {
            Some(Ok(command)) => self.run_command(command),
            Some(Err(usage)) => self.chat.session_mut().push_error(usage),
            None => match self.chat.submit(msg, &self.options) {
                Ok(()) => {}
                Err(SubmitError::Busy) => self
                    .chat
                    .session_mut()
                    .push_info("Still generating; press Esc to stop first."),
                Err(err) => self.chat.session_mut().push_error(err.to_string()),
            },
        }
    }

    fn selected_store(&mut self) -> Option<String> {
        let selected = self.options.vector_store_id.clone();
        if selected.is_none() {
            self.chat
                .session_mut()
                .push_error("No vector store selected; use /stores and /use <id>.");
        }
        selected
    }

    fn run_command(&mut self, command: SlashCommand) {
        match command {
            SlashCommand::Reset => {
                if self.chat.reset_context() {
                    self.chat.session_mut().push_info("Context reset. Cost: $0.00000");
                    self.persist();
                } else {
                    self.chat
                        .session_mut()
                        .push_info("Cannot reset while a response is being generated.");
                }
            }
            SlashCommand::Stores => self.kb.request(KbRequest::ListStores),
            SlashCommand::CreateStore(name) => self.kb.request(KbRequest::CreateStore { name }),
            SlashCommand::RenameStore { store_id, name } => {
                self.kb.request(KbRequest::RenameStore { store_id, name })
            }
            SlashCommand::DeleteStore(store_id) => {
                self.kb.request(KbRequest::DeleteStore { store_id })
            }
            SlashCommand::Use(store_id) => {
                self.chat
                    .session_mut()
                    .push_info(format!("Using store {} for file search.", store_id));
                self.options.vector_store_id = Some(store_id);
                self.options.use_file_search = true;
                self.persist();
            }
            SlashCommand::Files => {
                if let Some(store_id) = self.selected_store() {
                    self.kb.request(KbRequest::ListFiles { store_id });
                }
            }
            SlashCommand::Add(path) => {
                if let Some(store_id) = self.selected_store() {
                    self.kb.request(KbRequest::AddDocument { store_id, path });
                }
            }
            SlashCommand::Remove(file_id) => {
                if let Some(store_id) = self.selected_store() {
                    self.kb.request(KbRequest::RemoveFile { store_id, file_id });
                }
            }
            SlashCommand::Model(model) => {
                let session = self.chat.session_mut();
                session.push_info(format!("Model set to {}.", model));
                session.model = model;
                self.persist();
            }
            SlashCommand::Effort(effort) => {
                self.options.reasoning = effort;
                self.chat.session_mut().push_info(format!(
                    "Reasoning effort: {}.",
                    effort.map(|e| e.as_str()).unwrap_or("default")
                ));
                self.persist();
            }
            SlashCommand::Web(on) => {
                self.options.web_search = on;
                self.chat
                    .session_mut()
                    .push_info(format!("Web search {}.", if on { "on" } else { "off" }));
                self.persist();
            }
            SlashCommand::Search(on) => {
                self.options.use_file_search = on;
                self.chat
                    .session_mut()
                    .push_info(format!("File search {}.", if on { "on" } else { "off" }));
                self.persist();
            }
            SlashCommand::Save(path) => {
                let outcome = self.chat.session().write_transcript(&path, &self.options);
                let session = self.chat.session_mut();
                match outcome {
                    Ok(()) => session.push_info(format!("Transcript saved to {}.", path.display())),
                    Err(err) => session.push_error(format!("Could not save transcript: {}", err)),
                }
            }
            SlashCommand::Help => {
                let text = HELP
                    .iter()
                    .map(|(usage, about)| format!("{:<26}{}", usage, about))
                    .collect::<Vec<_>>()
                    .join("\n");
                self.chat.session_mut().push_info(text);
            }
            SlashCommand::Quit => self.should_quit = true,
        }
    }

    fn apply_kb_event(&mut self, event: &KbEvent) {
        if let KbEvent::StoreDeleted { store_id } = event
            && self.options.vector_store_id.as_deref() == Some(store_id.as_str())
        {
            self.options.vector_store_id = None;
            self.options.use_file_search = false;
            self.persist();
        }

        let selected = self.options.vector_store_id.clone();
        if let Some((tag, text)) = describe_kb_event(event, selected.as_deref()) {
            let session = self.chat.session_mut();
            match tag {
                EntryTag::Error => session.push_error(text),
                _ => session.push_info(text),
            }
        }
    }

    fn persist(&mut self) {
        let session = self.chat.session();
        self.state.model = session.model.clone();
        self.state.last_response_id = session.last_response_id().map(str::to_string);
        self.state.apply_turn_options(&self.options);
        if let Err(err) = self.state.save(&self.state_path) {
            tracing::warn!(error = %err, "could not save state");
        }
    }
}

pub fn run_tui(mut app: App) -> UiResult<()> {
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
            viewport: Viewport::Inline(VIEWPORT_HEIGHT),
        },
    )?;

    let _guard = TerminalGuard;

    app.chat
        .session_mut()
        .push_info("scribe ready. Type /help for commands.");
    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.tick(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;

        std::thread::sleep(Duration::from_millis(10));
    }

    if app.chat.session().is_generating() {
        app.chat.cancel();
    }
    app.persist();
    tracing::info!("chat session closed");

    disable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_sdk::{BatchStatus, FileRecord, VectorStore};
    use crate::knowledge::FileEntry;

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
    fn input_buffer_edits_multibyte_text_by_character() {
        let mut buffer = InputBuffer::new();
        for ch in "héllo".chars() {
            buffer.insert_char(ch);
        }
        buffer.move_left();
        buffer.move_left();
        buffer.move_left();
        buffer.delete_char();
        buffer.insert_char('e');
        assert_eq!(buffer.to_string(), "hello");
        buffer.end();
        assert_eq!(buffer.cursor_x, 5);
    }

    #[test]
    fn wrapped_height_counts_wrapped_rows() {
        assert_eq!(wrapped_height(["abcdef", "", "ab"], 3), 4);
        assert_eq!(wrapped_height(["日本語"], 2), 2);
    }

    #[test]
    fn kb_events_render_as_transcript_lines() {
        let store = VectorStore {
            id: "vs_1".into(),
            name: None,
            status: "completed".into(),
            file_count: 2,
            usage_bytes: 0,
        };
        let (tag, text) = describe_kb_event(&KbEvent::Stores(vec![store]), Some("vs_1")).unwrap();
        assert_eq!(tag, EntryTag::Info);
        assert!(text.contains("* vs_1  (No Name)  files=2"));

        let files = vec![FileEntry::Unavailable {
            id: "file_1".into(),
            created_at: 3,
            reason: "boom".into(),
        }];
        let (_, text) = describe_kb_event(
            &KbEvent::Files {
                store_id: "vs_1".into(),
                files,
            },
            None,
        )
        .unwrap();
        assert!(text.contains("file_1  <Error>"));

        let added = KbEvent::DocumentAdded {
            store_id: "vs_1".into(),
            file: FileRecord {
                id: "file_2".into(),
                filename: "a.pdf".into(),
                created_at: 1,
                bytes: None,
            },
            status: BatchStatus::TimedOut,
        };
        assert!(describe_kb_event(&added, None).unwrap().1.ends_with("indexing timed_out"));

        let failed = KbEvent::Failed {
            operation: "delete store",
            message: "still holds 3 file(s)".into(),
        };
        assert_eq!(describe_kb_event(&failed, None).unwrap().0, EntryTag::Error);
        assert!(describe_kb_event(&KbEvent::Done, None).is_none());
    }

    #[test]
    fn error_entries_are_marked() {
        let lines = entry_lines(&TranscriptEntry {
            tag: EntryTag::Error,
            text: "Auth Error: bad key\nsecond".into(),
        });
        assert_eq!(lines[0].text, "✗ Auth Error: bad key");
        assert_eq!(lines[1].text, "  second");
    }
}
