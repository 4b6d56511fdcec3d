//! Transcript view model and the rendering port the stream controller drives.

use crate::events::Role;
use chrono::{DateTime, Utc};

/// Handle to a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(u64);

/// What an entry in the transcript represents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Greeting shown before the conversation starts
    Welcome,
    /// A chat message
    Message(Role),
    /// Assistant text opening a guided session; no user message precedes it
    /// and erase leaves it in place
    SessionOpening,
    /// Placeholder between sending a request and its first byte
    TypingIndicator,
    /// Transient status line such as the reference-search notice
    Notice,
    /// Local information such as command help; never sent anywhere
    Info,
    /// Block of selectable suggestion texts
    OptionPrompts(Vec<String>),
    /// Single-use switch into the alternate session
    SessionSwitch,
}

/// A single entry in the transcript
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: MessageId,
    pub kind: EntryKind,
    pub content: String,
    /// Typeset form of `content`, shown instead of it when present
    pub rendered: Option<String>,
    pub hidden: bool,
    pub timestamp: DateTime<Utc>,
}

impl Entry {
    pub fn role(&self) -> Option<Role> {
        match self.kind {
            EntryKind::Message(role) => Some(role),
            _ => None,
        }
    }

    /// Text to draw for this entry
    pub fn display_text(&self) -> &str {
        self.rendered.as_deref().unwrap_or(&self.content)
    }
}

/// Selectable affordance currently visible in the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Affordance {
    Option(String),
    SessionSwitch,
}

/// Rendering port used by the stream controller
///
/// All operations are synchronous and never fail; operations on entries that
/// no longer exist are no-ops.
pub trait ChatView {
    /// Insert the greeting at the start of the transcript
    fn show_welcome(&mut self, text: &str);

    /// Append literal user text; drops a stale session switch
    fn append_user_message(&mut self, text: &str) -> MessageId;

    /// Append rich assistant content and scroll to it
    fn append_assistant_message(&mut self, content: &str) -> MessageId;

    /// Append rich assistant content that opens a guided session
    fn append_session_opening(&mut self, content: &str) -> MessageId;

    fn append_to_message(&mut self, id: MessageId, text: &str);

    fn message_content(&self, id: MessageId) -> Option<String>;

    fn set_rendered(&mut self, id: MessageId, rendered: String);

    fn show_typing_indicator(&mut self);

    fn remove_typing_indicator(&mut self);

    fn show_notice(&mut self, text: &str);

    fn remove_notice(&mut self);

    /// Returns false when there was no user message
    fn remove_last_user_message(&mut self) -> bool;

    /// Returns false when there was no assistant message
    fn remove_last_assistant_message(&mut self) -> bool;

    /// Replace any prompt block with a fresh visible one
    fn append_option_prompts(&mut self, prompts: &[String]);

    fn append_session_switch(&mut self, label: &str);

    fn remove_session_switch(&mut self);

    /// Hide the welcome entry and suggestion blocks without removing them
    fn hide_prompt_affordances(&mut self);
}

/// In-memory transcript drawn by the history widget
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<Entry>,
    next_id: u64,
    /// Lines scrolled up from the bottom; zero follows new output
    scroll_offset: u16,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn visible_entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| !e.hidden)
    }

    pub fn entry(&self, id: MessageId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.entries.iter().filter(|e| e.role() == Some(role)).count()
    }

    pub fn count_kind(&self, kind: &EntryKind) -> usize {
        self.entries
            .iter()
            .filter(|e| std::mem::discriminant(&e.kind) == std::mem::discriminant(kind))
            .count()
    }

    pub fn has_typing_indicator(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.kind == EntryKind::TypingIndicator)
    }

    /// Visible affordances in display order
    pub fn affordances(&self) -> Vec<Affordance> {
        let mut out = Vec::new();
        for entry in self.visible_entries() {
            match &entry.kind {
                EntryKind::OptionPrompts(prompts) => {
                    out.extend(prompts.iter().cloned().map(Affordance::Option));
                }
                EntryKind::SessionSwitch => out.push(Affordance::SessionSwitch),
                _ => {}
            }
        }
        out
    }

    /// Append a local information entry
    pub fn push_info(&mut self, text: &str) {
        self.push(EntryKind::Info, text);
    }

    pub fn scroll_offset(&self) -> u16 {
        self.scroll_offset
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll_offset = self.scroll_offset.saturating_add(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    fn new_entry(&mut self, kind: EntryKind, content: &str) -> Entry {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        Entry {
            id,
            kind,
            content: content.to_string(),
            rendered: None,
            hidden: false,
            timestamp: Utc::now(),
        }
    }

    fn push(&mut self, kind: EntryKind, content: &str) -> MessageId {
        let entry = self.new_entry(kind, content);
        let id = entry.id;
        self.entries.push(entry);
        self.scroll_to_bottom();
        id
    }

    fn remove_where(&mut self, pred: impl Fn(&Entry) -> bool) {
        self.entries.retain(|e| !pred(e));
    }

    fn remove_last_role(&mut self, role: Role) -> bool {
        match self.entries.iter().rposition(|e| e.role() == Some(role)) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn entry_mut(&mut self, id: MessageId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }
}

impl ChatView for Transcript {
    fn show_welcome(&mut self, text: &str) {
        self.remove_where(|e| e.kind == EntryKind::Welcome);
        let entry = self.new_entry(EntryKind::Welcome, text);
        self.entries.insert(0, entry);
    }

    fn append_user_message(&mut self, text: &str) -> MessageId {
        self.remove_session_switch();
        self.push(EntryKind::Message(Role::User), text)
    }

    fn append_assistant_message(&mut self, content: &str) -> MessageId {
        self.push(EntryKind::Message(Role::Assistant), content)
    }

    fn append_session_opening(&mut self, content: &str) -> MessageId {
        self.push(EntryKind::SessionOpening, content)
    }

    fn append_to_message(&mut self, id: MessageId, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(entry) = self.entry_mut(id) {
            entry.content.push_str(text);
        }
    }

    fn message_content(&self, id: MessageId) -> Option<String> {
        self.entry(id).map(|e| e.content.clone())
    }

    fn set_rendered(&mut self, id: MessageId, rendered: String) {
        if let Some(entry) = self.entry_mut(id) {
            entry.rendered = Some(rendered);
        }
    }

    fn show_typing_indicator(&mut self) {
        if !self.has_typing_indicator() {
            self.push(EntryKind::TypingIndicator, "");
        }
    }

    fn remove_typing_indicator(&mut self) {
        self.remove_where(|e| e.kind == EntryKind::TypingIndicator);
    }

    fn show_notice(&mut self, text: &str) {
        self.remove_notice();
        self.push(EntryKind::Notice, text);
    }

    fn remove_notice(&mut self) {
        self.remove_where(|e| e.kind == EntryKind::Notice);
    }

    fn remove_last_user_message(&mut self) -> bool {
        self.remove_last_role(Role::User)
    }

    fn remove_last_assistant_message(&mut self) -> bool {
        self.remove_last_role(Role::Assistant)
    }

    fn append_option_prompts(&mut self, prompts: &[String]) {
        self.remove_where(|e| matches!(e.kind, EntryKind::OptionPrompts(_)));
        self.push(EntryKind::OptionPrompts(prompts.to_vec()), "");
    }

    fn append_session_switch(&mut self, label: &str) {
        self.remove_session_switch();
        self.push(EntryKind::SessionSwitch, label);
    }

    fn remove_session_switch(&mut self) {
        self.remove_where(|e| e.kind == EntryKind::SessionSwitch);
    }

    fn hide_prompt_affordances(&mut self) {
        for entry in &mut self.entries {
            if matches!(entry.kind, EntryKind::Welcome | EntryKind::OptionPrompts(_)) {
                entry.hidden = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompts() -> Vec<String> {
        vec!["one".to_string(), "two".to_string()]
    }

    #[test]
    fn session_opening_survives_assistant_removal() {
        let mut transcript = Transcript::new();
        let id = transcript.append_session_opening("");
        transcript.append_to_message(id, "Which service?");

        assert!(!transcript.remove_last_assistant_message());
        assert_eq!(transcript.entry(id).map(|e| e.content.as_str()), Some("Which service?"));
        assert_eq!(transcript.count_role(Role::Assistant), 0);
    }

    #[test]
    fn welcome_goes_first() {
        let mut transcript = Transcript::new();
        transcript.append_user_message("hi");
        transcript.show_welcome("hello");
        assert_eq!(transcript.entries()[0].kind, EntryKind::Welcome);
        assert_eq!(transcript.entries()[0].content, "hello");
    }

    #[test]
    fn user_text_is_stored_verbatim() {
        let mut transcript = Transcript::new();
        let id = transcript.append_user_message("<b>**not bold**</b>");
        assert_eq!(
            transcript.message_content(id).as_deref(),
            Some("<b>**not bold**</b>")
        );
    }

    #[test]
    fn user_message_drops_session_switch() {
        let mut transcript = Transcript::new();
        transcript.append_session_switch("switch");
        assert_eq!(transcript.affordances(), vec![Affordance::SessionSwitch]);
        transcript.append_user_message("hi");
        assert_eq!(transcript.count_kind(&EntryKind::SessionSwitch), 0);
    }

    #[test]
    fn assistant_message_is_mutable_through_its_id() {
        let mut transcript = Transcript::new();
        transcript.scroll_up(5);
        let id = transcript.append_assistant_message("");
        assert_eq!(transcript.scroll_offset(), 0);
        transcript.append_to_message(id, "Hola");
        transcript.append_to_message(id, ", mundo");
        assert_eq!(transcript.message_content(id).as_deref(), Some("Hola, mundo"));

        transcript.set_rendered(id, "rendered".to_string());
        assert_eq!(transcript.entry(id).map(Entry::display_text), Some("rendered"));
    }

    #[test]
    fn removing_last_messages_is_a_noop_when_empty() {
        let mut transcript = Transcript::new();
        transcript.show_welcome("hello");
        assert!(!transcript.remove_last_user_message());
        assert!(!transcript.remove_last_assistant_message());
        assert_eq!(transcript.entries().len(), 1);
    }

    #[test]
    fn removes_only_the_newest_of_a_role() {
        let mut transcript = Transcript::new();
        transcript.append_user_message("q1");
        let a1 = transcript.append_assistant_message("a1");
        transcript.append_user_message("q2");
        transcript.append_assistant_message("a2");

        assert!(transcript.remove_last_user_message());
        assert!(transcript.remove_last_assistant_message());
        assert_eq!(transcript.count_role(Role::User), 1);
        assert!(transcript.entry(a1).is_some());
    }

    #[test]
    fn option_prompts_replace_instead_of_accumulating() {
        let mut transcript = Transcript::new();
        transcript.append_option_prompts(&prompts());
        transcript.append_option_prompts(&prompts());
        assert_eq!(transcript.count_kind(&EntryKind::OptionPrompts(Vec::new())), 1);
        assert_eq!(transcript.affordances().len(), 2);
    }

    #[test]
    fn hiding_keeps_entries_in_place() {
        let mut transcript = Transcript::new();
        transcript.show_welcome("hello");
        transcript.append_option_prompts(&prompts());
        transcript.hide_prompt_affordances();

        assert_eq!(transcript.entries().len(), 2);
        assert_eq!(transcript.visible_entries().count(), 0);
        assert!(transcript.affordances().is_empty());

        transcript.append_option_prompts(&prompts());
        assert_eq!(transcript.affordances().len(), 2);
    }

    #[test]
    fn single_typing_indicator() {
        let mut transcript = Transcript::new();
        transcript.show_typing_indicator();
        transcript.show_typing_indicator();
        assert_eq!(transcript.count_kind(&EntryKind::TypingIndicator), 1);
        transcript.remove_typing_indicator();
        transcript.remove_typing_indicator();
        assert!(!transcript.has_typing_indicator());
    }
}
