//! Conversation history display component

use crate::events::{ChatMode, Role};
use crate::ui::conversation::transcript::{Entry, EntryKind, Transcript};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// Draws a [`Transcript`]
pub struct HistoryView<'a> {
    transcript: &'a Transcript,
    /// Animation frame counter, advanced by the event loop
    frame: u64,
    /// Index into `Transcript::affordances`
    selected: Option<usize>,
    mode: ChatMode,
}

impl<'a> HistoryView<'a> {
    pub fn new(transcript: &'a Transcript, mode: ChatMode) -> Self {
        Self {
            transcript,
            frame: 0,
            selected: None,
            mode,
        }
    }

    pub fn frame(mut self, frame: u64) -> Self {
        self.frame = frame;
        self
    }

    pub fn selected(mut self, selected: Option<usize>) -> Self {
        self.selected = selected;
        self
    }

    /// All lines of the visible transcript, top to bottom
    pub fn lines(&self, width: u16) -> Vec<Line<'static>> {
        let width = width.saturating_sub(2) as usize;
        let mut all_lines = Vec::new();
        let mut affordance = 0usize;

        for entry in self.transcript.visible_entries() {
            match &entry.kind {
                EntryKind::Welcome => {
                    for text in wrap_text(&entry.content, width) {
                        all_lines.push(Line::from(vec![
                            Span::raw("  "),
                            Span::styled(text, Style::default().fg(Color::Green)),
                        ]));
                    }
                }
                EntryKind::Message(role) => {
                    all_lines.push(message_header(entry, *role));
                    let style = content_style(*role);
                    let body = match role {
                        Role::User => literal_lines(&entry.content, width, style),
                        Role::Assistant => rich_lines(entry.display_text(), width, style),
                    };
                    all_lines.extend(body);
                }
                EntryKind::SessionOpening => {
                    all_lines.push(message_header(entry, Role::Assistant));
                    let style = content_style(Role::Assistant);
                    all_lines.extend(rich_lines(entry.display_text(), width, style));
                }
                EntryKind::TypingIndicator => {
                    let dots = match self.frame % 4 {
                        0 => "●  ",
                        1 => "●● ",
                        2 => "●●●",
                        _ => "   ",
                    };
                    all_lines.push(Line::from(vec![
                        Span::styled("🤖 ", Style::default().fg(Color::Green)),
                        Span::styled(dots, Style::default().fg(Color::Yellow)),
                    ]));
                }
                EntryKind::Notice => {
                    let mut style = Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC);
                    if self.frame % 2 == 0 {
                        style = style.add_modifier(Modifier::DIM);
                    }
                    for text in wrap_text(&entry.content, width) {
                        all_lines.push(Line::from(vec![Span::raw("  "), Span::styled(text, style)]));
                    }
                }
                EntryKind::Info => {
                    let style = Style::default().fg(Color::Yellow);
                    all_lines.extend(literal_lines(&entry.content, width, style));
                }
                EntryKind::OptionPrompts(prompts) => {
                    for (n, prompt) in prompts.iter().enumerate() {
                        let style = self.affordance_style(affordance, Color::Cyan);
                        affordance += 1;
                        all_lines.push(Line::from(vec![
                            Span::raw("  "),
                            Span::styled(format!("[{}] {}", n + 1, prompt), style),
                        ]));
                    }
                }
                EntryKind::SessionSwitch => {
                    let style = self.affordance_style(affordance, Color::Magenta);
                    affordance += 1;
                    all_lines.push(Line::from(vec![
                        Span::raw("  "),
                        Span::styled(format!("▶ {}", entry.content), style),
                    ]));
                }
            }
            // spacing between entries
            all_lines.push(Line::from(vec![Span::raw("")]));
        }

        all_lines
    }

    fn affordance_style(&self, index: usize, color: Color) -> Style {
        if self.selected == Some(index) {
            Style::default()
                .fg(Color::Black)
                .bg(color)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(color)
        }
    }
}

impl Widget for HistoryView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = match self.mode {
            ChatMode::Standard => "☕ Conversation".to_string(),
            ChatMode::Session => format!("☕ Conversation · {}", self.mode.display_name()),
        };
        let block = Block::default().borders(Borders::ALL).title(title);

        let inner_area = block.inner(area);
        block.render(area, buf);

        let all_lines = self.lines(inner_area.width);

        // Determine the range of lines to display from the bottom
        let height = inner_area.height as usize;
        let total = all_lines.len();
        let offset = (self.transcript.scroll_offset() as usize).min(total.saturating_sub(height));
        let end = total - offset;
        let start = end.saturating_sub(height);

        for (i, line) in all_lines[start..end].iter().enumerate() {
            buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
        }
    }
}

fn message_header(entry: &Entry, role: Role) -> Line<'static> {
    let role_icon = match role {
        Role::User => "👤",
        Role::Assistant => "🤖",
    };
    let timestamp = entry.timestamp.format("%H:%M:%S").to_string();
    let header = format!("{} {} {}", role_icon, timestamp, "─".repeat(20));
    Line::from(vec![Span::styled(header, Style::default().fg(Color::DarkGray))])
}

/// Get content style based on role
fn content_style(role: Role) -> Style {
    match role {
        Role::User => Style::default().fg(Color::Blue),
        Role::Assistant => Style::default().fg(Color::Green),
    }
}

/// Wrap text to fit within the given width, keeping explicit line breaks
/// and the spacing inside each line
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    for source_line in text.split('\n') {
        let mut current_line = String::new();
        let mut current_len = 0usize;
        // whitespace where a line was broken is dropped
        let mut at_break = false;

        for token in whitespace_runs(source_line) {
            let is_space = token.starts_with(char::is_whitespace);
            if is_space && at_break {
                continue;
            }
            let token_len = token.chars().count();
            if current_len > 0 && current_len + token_len > width {
                lines.push(current_line.trim_end().to_string());
                current_line.clear();
                current_len = 0;
                if is_space {
                    at_break = true;
                    continue;
                }
            }
            at_break = false;
            current_line.push_str(token);
            current_len += token_len;
        }
        lines.push(current_line);
    }

    lines
}

/// Split a line into alternating runs of whitespace and non-whitespace
fn whitespace_runs(line: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut in_space = None;
    for (i, c) in line.char_indices() {
        let space = c.is_whitespace();
        if in_space.is_some_and(|prev| prev != space) {
            runs.push(&line[start..i]);
            start = i;
        }
        in_space = Some(space);
    }
    if start < line.len() {
        runs.push(&line[start..]);
    }
    runs
}

/// User text: drawn exactly as typed
fn literal_lines(text: &str, width: usize, style: Style) -> Vec<Line<'static>> {
    wrap_text(text, width)
        .into_iter()
        .map(|line| Line::from(vec![Span::raw("  "), Span::styled(line, style)]))
        .collect()
}

/// Assistant text: `**bold**` markup is interpreted
pub fn rich_lines(text: &str, width: usize, style: Style) -> Vec<Line<'static>> {
    let mut bold = false;
    wrap_text(text, width)
        .into_iter()
        .map(|line| {
            let mut spans = vec![Span::raw("  ")];
            for (i, segment) in line.split("**").enumerate() {
                if i > 0 {
                    bold = !bold;
                }
                if segment.is_empty() {
                    continue;
                }
                let segment_style = if bold {
                    style.add_modifier(Modifier::BOLD)
                } else {
                    style
                };
                spans.push(Span::styled(segment.to_string(), segment_style));
            }
            Line::from(spans)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::conversation::transcript::ChatView;

    fn line_text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn wrap_keeps_newlines_and_width() {
        assert_eq!(
            wrap_text("uno dos tres\ncuatro", 7),
            vec!["uno dos", "tres", "cuatro"]
        );
        assert_eq!(wrap_text("", 10), vec![""]);
    }

    #[test]
    fn wrap_keeps_indentation_and_inner_spacing() {
        assert_eq!(wrap_text("  a   b", 20), vec!["  a   b"]);
        assert_eq!(wrap_text("\tcode\n    indented", 20), vec!["\tcode", "    indented"]);
    }

    #[test]
    fn wrap_drops_spacing_at_a_break() {
        assert_eq!(wrap_text("ab   cdef", 4), vec!["ab", "cdef"]);
    }

    #[test]
    fn user_spacing_is_drawn_as_typed() {
        let mut transcript = Transcript::new();
        transcript.append_user_message("  two  spaces");
        let lines = HistoryView::new(&transcript, ChatMode::Standard).lines(40);
        assert!(lines.iter().any(|l| line_text(l) == "    two  spaces"));
    }

    #[test]
    fn wrap_counts_chars_not_bytes() {
        assert_eq!(wrap_text("café café", 9), vec!["café café"]);
    }

    #[test]
    fn assistant_bold_markup_is_interpreted() {
        let lines = rich_lines("see **Green Coffee** now", 80, Style::default());
        assert_eq!(line_text(&lines[0]), "  see Green Coffee now");
        let bold = lines[0]
            .spans
            .iter()
            .find(|s| s.content.contains("Green"))
            .unwrap();
        assert!(bold.style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn user_markup_is_drawn_literally() {
        let mut transcript = Transcript::new();
        transcript.append_user_message("**hi**");
        let lines = HistoryView::new(&transcript, ChatMode::Standard).lines(40);
        assert!(lines.iter().any(|l| line_text(l) == "  **hi**"));
    }

    #[test]
    fn hidden_entries_are_not_drawn() {
        let mut transcript = Transcript::new();
        transcript.show_welcome("hello there");
        transcript.hide_prompt_affordances();
        let lines = HistoryView::new(&transcript, ChatMode::Standard).lines(40);
        assert!(lines.is_empty());
    }

    #[test]
    fn selected_affordance_is_highlighted() {
        let mut transcript = Transcript::new();
        transcript.append_option_prompts(&["a".to_string(), "b".to_string()]);
        transcript.append_session_switch("switch");
        let lines = HistoryView::new(&transcript, ChatMode::Standard)
            .selected(Some(2))
            .lines(40);
        let switch = lines
            .iter()
            .find(|l| line_text(l).contains("switch"))
            .unwrap();
        assert_eq!(switch.spans[1].style.bg, Some(Color::Magenta));
    }

    #[test]
    fn renders_bottom_of_transcript() {
        let mut transcript = Transcript::new();
        for i in 0..20 {
            transcript.append_user_message(&format!("message {i}"));
        }
        let area = Rect::new(0, 0, 40, 6);
        let mut buf = Buffer::empty(area);
        HistoryView::new(&transcript, ChatMode::Standard).render(area, &mut buf);

        let rows: Vec<String> = (0..area.height)
            .map(|y| (0..area.width).map(|x| buf.get(x, y).symbol().to_string()).collect())
            .collect();
        assert!(rows.iter().any(|r| r.contains("message 19")));
        assert!(!rows.iter().any(|r| r.contains("message 0 ")));
    }
}
