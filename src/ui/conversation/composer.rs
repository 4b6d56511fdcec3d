use crate::events::ChatMode;
use crate::ui::conversation::commands::{
    command_entries, parse_slash_command, CommandEntry, ParsedCommand,
};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// Result returned when the user interacts with the conversation composer
#[derive(Debug, PartialEq)]
pub enum ConversationResult {
    Submitted(String),
    Command(ParsedCommand),
    None,
}

/// State for the text area within the composer
#[derive(Debug, Clone, Default)]
pub struct TextAreaState {
    pub content: String,
    /// Byte offset into `content`, always on a char boundary
    pub cursor_position: usize,
}

/// Conversation composer for user input
#[derive(Clone)]
pub struct ConversationComposer {
    state: TextAreaState,
    placeholder: String,
    has_focus: bool,
    current_mode: ChatMode,
    /// Set while a reply is in flight; Enter does not submit
    locked: bool,
    command_entries: Vec<CommandEntry>,
    filtered_commands: Vec<CommandEntry>,
    show_command_palette: bool,
    selected_command: Option<usize>,
}

impl ConversationComposer {
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            state: TextAreaState::default(),
            placeholder: placeholder.into(),
            has_focus: true,
            current_mode: ChatMode::Standard,
            locked: false,
            command_entries: command_entries(),
            filtered_commands: Vec::new(),
            show_command_palette: false,
            selected_command: None,
        }
    }

    /// Handle key input
    pub fn handle_key(&mut self, key: KeyEvent) -> ConversationResult {
        if key.kind != KeyEventKind::Press {
            return ConversationResult::None;
        }

        match key.code {
            KeyCode::Enter => {
                if key.modifiers.contains(KeyModifiers::SHIFT) {
                    self.insert_char('\n');
                } else if self.show_command_palette {
                    if self.apply_selected_command() {
                        return ConversationResult::None;
                    }
                } else if !self.state.content.trim().is_empty() {
                    let is_command = parse_slash_command(&self.state.content);
                    if self.locked && is_command.is_none() {
                        return ConversationResult::None;
                    }
                    let content = std::mem::take(&mut self.state.content);
                    self.state.cursor_position = 0;
                    self.close_command_palette();
                    return match is_command {
                        Some(command) => ConversationResult::Command(command),
                        None => ConversationResult::Submitted(content),
                    };
                }
            }
            KeyCode::Up => {
                if self.show_command_palette {
                    self.move_command_selection(-1);
                }
            }
            KeyCode::Down => {
                if self.show_command_palette {
                    self.move_command_selection(1);
                }
            }
            KeyCode::Esc => {
                if self.show_command_palette {
                    self.close_command_palette();
                }
            }
            KeyCode::Tab => {
                if self.show_command_palette {
                    self.apply_selected_command();
                }
            }
            KeyCode::Char(c) => {
                self.insert_char(c);
                if self.state.content.starts_with('/') && !self.state.content.contains(' ') {
                    if !self.show_command_palette {
                        self.open_command_palette();
                    } else {
                        self.refresh_command_palette();
                    }
                } else {
                    self.close_command_palette();
                }
            }
            KeyCode::Backspace => {
                if self.backspace() && self.show_command_palette {
                    self.sync_palette_after_delete();
                }
            }
            KeyCode::Delete => {
                if self.delete() && self.show_command_palette {
                    self.sync_palette_after_delete();
                }
            }
            KeyCode::Left => {
                if let Some(c) = self.state.content[..self.state.cursor_position].chars().next_back() {
                    self.state.cursor_position -= c.len_utf8();
                }
            }
            KeyCode::Right => {
                if let Some(c) = self.state.content[self.state.cursor_position..].chars().next() {
                    self.state.cursor_position += c.len_utf8();
                }
            }
            KeyCode::Home => {
                self.state.cursor_position = 0;
            }
            KeyCode::End => {
                self.state.cursor_position = self.state.content.len();
            }
            _ => {}
        }

        ConversationResult::None
    }

    /// Insert a character at the cursor position
    fn insert_char(&mut self, c: char) {
        self.state.content.insert(self.state.cursor_position, c);
        self.state.cursor_position += c.len_utf8();
    }

    /// Delete character before cursor
    fn backspace(&mut self) -> bool {
        let previous = self.state.content[..self.state.cursor_position].chars().next_back();
        match previous {
            Some(c) => {
                self.state.cursor_position -= c.len_utf8();
                self.state.content.remove(self.state.cursor_position);
                true
            }
            None => false,
        }
    }

    /// Delete character at cursor
    fn delete(&mut self) -> bool {
        if self.state.cursor_position < self.state.content.len() {
            self.state.content.remove(self.state.cursor_position);
            true
        } else {
            false
        }
    }

    fn sync_palette_after_delete(&mut self) {
        if self.state.content.starts_with('/') {
            self.refresh_command_palette();
        } else {
            self.close_command_palette();
        }
    }

    fn open_command_palette(&mut self) {
        self.show_command_palette = true;
        self.selected_command = Some(0);
        self.refresh_command_palette();
    }

    fn close_command_palette(&mut self) {
        self.show_command_palette = false;
        self.filtered_commands.clear();
        self.selected_command = None;
    }

    fn refresh_command_palette(&mut self) {
        let query = self.state.content.trim_start_matches('/').to_lowercase();
        self.filtered_commands = self
            .command_entries
            .iter()
            .filter(|entry| query.is_empty() || entry.keyword.starts_with(&query))
            .copied()
            .collect();

        if self.filtered_commands.is_empty() {
            self.selected_command = None;
        } else {
            let index = self.selected_command.unwrap_or(0);
            self.selected_command = Some(index.min(self.filtered_commands.len() - 1));
        }
    }

    fn move_command_selection(&mut self, delta: isize) {
        if self.filtered_commands.is_empty() {
            self.selected_command = None;
            return;
        }

        let current = self.selected_command.unwrap_or(0) as isize;
        let len = self.filtered_commands.len() as isize;
        let next = (current + delta).rem_euclid(len);
        self.selected_command = Some(next as usize);
    }

    fn apply_selected_command(&mut self) -> bool {
        let Some(entry) = self
            .selected_command
            .and_then(|index| self.filtered_commands.get(index).copied())
        else {
            return false;
        };

        self.state.content = format!("/{}", entry.keyword);
        self.state.cursor_position = self.state.content.len();
        self.close_command_palette();
        true
    }

    /// Set focus state
    pub fn set_focus(&mut self, has_focus: bool) {
        self.has_focus = has_focus;
    }

    pub fn update_mode(&mut self, mode: ChatMode) {
        self.current_mode = mode;
    }

    /// Lock or unlock plain submissions while a reply is in flight
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_empty(&self) -> bool {
        self.state.content.is_empty()
    }

    pub fn is_palette_open(&self) -> bool {
        self.show_command_palette
    }

    #[cfg(test)]
    pub fn content(&self) -> &str {
        &self.state.content
    }

    /// Get mode-specific title
    fn title(&self) -> String {
        let base = match self.current_mode {
            ChatMode::Standard => "💬 Ask about coffee",
            ChatMode::Session => "🧭 Guided session",
        };
        if self.locked {
            format!("{base} · replying… (Esc to stop)")
        } else {
            base.to_string()
        }
    }
}

impl Widget for &ConversationComposer {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let state = &self.state;

        // Create the input block
        let block = Block::default()
            .borders(Borders::ALL)
            .title(self.title())
            .style(if self.has_focus && !self.locked {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Gray)
            });

        let inner_area = block.inner(area);
        block.render(area, buf);

        // Render content or placeholder
        if state.content.is_empty() {
            let placeholder_line = Line::from(vec![Span::styled(
                self.placeholder.as_str(),
                Style::default().fg(Color::DarkGray),
            )]);
            buf.set_line(inner_area.x, inner_area.y, &placeholder_line, inner_area.width);
        } else {
            // Render content with cursor indicator
            let mut content = state.content.clone();
            if self.has_focus {
                content.insert(state.cursor_position.min(content.len()), '▌');
            }

            let lines: Vec<&str> = content.split('\n').collect();
            let skip = lines.len().saturating_sub(inner_area.height as usize);
            for (i, line_text) in lines.iter().skip(skip).enumerate() {
                let line = Line::from(vec![Span::raw(*line_text)]);
                buf.set_line(inner_area.x, inner_area.y + i as u16, &line, inner_area.width);
            }
        }

        // Render command palette if active
        if self.show_command_palette {
            let palette_height = (self.filtered_commands.len().min(7) + 2) as u16;
            let palette_area = Rect {
                x: area.x,
                y: area.y.saturating_sub(palette_height),
                width: area.width,
                height: palette_height.min(area.y),
            };
            if palette_area.height < 3 {
                return;
            }

            let block = Block::default()
                .borders(Borders::ALL)
                .title("Commands")
                .style(Style::default().fg(Color::Blue));
            let inner = block.inner(palette_area);
            block.render(palette_area, buf);

            for (index, entry) in self.filtered_commands.iter().enumerate() {
                if index >= inner.height as usize {
                    break;
                }

                let style = if self.selected_command == Some(index) {
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Cyan)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::White)
                };

                let line = Line::from(vec![
                    Span::styled(format!("/{}", entry.keyword), style),
                    Span::styled(" - ", Style::default().fg(Color::DarkGray)),
                    Span::styled(entry.description, Style::default().fg(Color::Gray)),
                ]);

                buf.set_line(inner.x, inner.y + index as u16, &line, inner.width);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::conversation::commands::SlashCommand;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(composer: &mut ConversationComposer, text: &str) {
        for c in text.chars() {
            composer.handle_key(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn enter_submits_and_clears() {
        let mut composer = ConversationComposer::new("ask");
        type_text(&mut composer, "¿qué café?");
        assert_eq!(
            composer.handle_key(key(KeyCode::Enter)),
            ConversationResult::Submitted("¿qué café?".to_string())
        );
        assert!(composer.is_empty());
    }

    #[test]
    fn cursor_moves_over_multibyte_chars() {
        let mut composer = ConversationComposer::new("ask");
        type_text(&mut composer, "añb");
        composer.handle_key(key(KeyCode::Left));
        composer.handle_key(key(KeyCode::Left));
        composer.handle_key(key(KeyCode::Backspace));
        type_text(&mut composer, "x");
        assert_eq!(composer.content(), "xñb");
    }

    #[test]
    fn blank_input_is_not_submitted() {
        let mut composer = ConversationComposer::new("ask");
        type_text(&mut composer, "   ");
        assert_eq!(composer.handle_key(key(KeyCode::Enter)), ConversationResult::None);
    }

    #[test]
    fn locked_composer_keeps_text_but_allows_commands() {
        let mut composer = ConversationComposer::new("ask");
        composer.set_locked(true);
        type_text(&mut composer, "next question");
        assert_eq!(composer.handle_key(key(KeyCode::Enter)), ConversationResult::None);
        assert_eq!(composer.content(), "next question");

        let mut composer = ConversationComposer::new("ask");
        composer.set_locked(true);
        type_text(&mut composer, "/stop");
        composer.handle_key(key(KeyCode::Esc));
        match composer.handle_key(key(KeyCode::Enter)) {
            ConversationResult::Command(parsed) => assert_eq!(parsed.command, SlashCommand::Stop),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn palette_completes_selected_command() {
        let mut composer = ConversationComposer::new("ask");
        type_text(&mut composer, "/er");
        assert!(composer.is_palette_open());
        composer.handle_key(key(KeyCode::Tab));
        assert_eq!(composer.content(), "/erase");
        match composer.handle_key(key(KeyCode::Enter)) {
            ConversationResult::Command(parsed) => assert_eq!(parsed.command, SlashCommand::Erase),
            other => panic!("unexpected {other:?}"),
        }
    }
}
