use std::sync::Arc;
use std::time::Instant;

use crate::client::ChatTransport;
use crate::config::Config;
use crate::controller::StreamController;
use crate::events::{ChatMode, StreamEvent};
use crate::typeset::UnicodeMath;
use crate::ui::conversation::composer::ConversationResult;
use crate::ui::conversation::transcript::{Affordance, ChatView, Transcript};
use crate::ui::conversation::{
    ConversationComposer, HistoryView, ParsedCommand, SlashCommand, get_help_text,
};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
};
use tokio::sync::mpsc;

const SCROLL_STEP: u16 = 5;

/// Actions that can be requested by the conversation manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationAction {
    None,
    Exit,
}

/// Owns the transcript and routes keys and stream events to the controller
pub struct ConversationManager {
    transcript: Transcript,
    composer: ConversationComposer,
    controller: StreamController,
    option_prompts: Vec<String>,
    session_switch_label: String,
    /// Highlighted affordance while the composer is empty
    selected: Option<usize>,
    frame: u64,
}

impl ConversationManager {
    /// Build a manager and the receiver its stream events arrive on
    pub fn new(
        config: &Config,
        transport: Arc<dyn ChatTransport>,
    ) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut controller = StreamController::new(transport, events_tx, config.typing_delay())
            .with_searching_notice(config.searching_notice.clone());
        if config.math.enabled {
            controller = controller.with_typesetter(Box::new(UnicodeMath));
        }

        let mut manager = Self {
            transcript: Transcript::new(),
            composer: ConversationComposer::new("Type a question, or / for commands..."),
            controller,
            option_prompts: config.option_prompts.clone(),
            session_switch_label: config.session_switch_label.clone(),
            selected: None,
            frame: 0,
        };
        manager.transcript.show_welcome(&config.welcome_message);
        manager.transcript.append_option_prompts(&manager.option_prompts);
        manager.transcript.append_session_switch(&manager.session_switch_label);
        (manager, events_rx)
    }

    /// Handle key input
    pub fn handle_key(&mut self, key: KeyEvent, now: Instant) -> ConversationAction {
        if key.kind != KeyEventKind::Press {
            return ConversationAction::None;
        }

        let browsing = self.composer.is_empty() && !self.composer.is_palette_open();
        let action = match key.code {
            KeyCode::Esc if self.controller.is_busy() && !self.composer.is_palette_open() => {
                self.controller.abort(&mut self.transcript);
                ConversationAction::None
            }
            KeyCode::PageUp => {
                self.transcript.scroll_up(SCROLL_STEP);
                ConversationAction::None
            }
            KeyCode::PageDown => {
                self.transcript.scroll_down(SCROLL_STEP);
                ConversationAction::None
            }
            KeyCode::Up if browsing => {
                self.move_selection(-1);
                ConversationAction::None
            }
            KeyCode::Down if browsing => {
                self.move_selection(1);
                ConversationAction::None
            }
            KeyCode::Enter if browsing && self.selected.is_some() => {
                self.activate_selected();
                ConversationAction::None
            }
            _ => {
                self.selected = None;
                match self.composer.handle_key(key) {
                    ConversationResult::Submitted(input) => {
                        self.controller.submit(&mut self.transcript, &input);
                        ConversationAction::None
                    }
                    ConversationResult::Command(command) => self.handle_slash_command(command),
                    ConversationResult::None => ConversationAction::None,
                }
            }
        };

        // A fully buffered reply may already be due
        self.controller.tick(&mut self.transcript, now);
        self.sync_composer();
        action
    }

    pub fn handle_stream_event(&mut self, event: StreamEvent, now: Instant) {
        self.controller
            .handle_event(&mut self.transcript, event, now);
        self.sync_composer();
    }

    /// Reveal whatever the typewriter has due
    pub fn tick(&mut self, now: Instant) {
        self.controller.tick(&mut self.transcript, now);
        self.sync_composer();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.controller.next_deadline()
    }

    /// Advance the typing indicator animation
    pub fn tick_animation(&mut self) {
        self.frame = self.frame.wrapping_add(1);
    }

    pub fn is_busy(&self) -> bool {
        self.controller.is_busy()
    }

    /// Set focus state
    pub fn set_focus(&mut self, has_focus: bool) {
        self.composer.set_focus(has_focus);
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn mode(&self) -> ChatMode {
        self.controller.mode()
    }

    pub fn render(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),    // History
                Constraint::Length(5), // Composer
            ])
            .split(frame.size());

        let history = HistoryView::new(&self.transcript, self.controller.mode())
            .frame(self.frame)
            .selected(self.selected);
        frame.render_widget(history, chunks[0]);
        frame.render_widget(&self.composer, chunks[1]);
    }

    fn move_selection(&mut self, delta: isize) {
        let count = self.transcript.affordances().len();
        if count == 0 {
            self.selected = None;
            return;
        }
        let next = match self.selected {
            None if delta < 0 => count - 1,
            None => 0,
            Some(current) => (current as isize + delta).rem_euclid(count as isize) as usize,
        };
        self.selected = Some(next);
    }

    fn activate_selected(&mut self) {
        let affordances = self.transcript.affordances();
        let Some(affordance) = self.selected.take().and_then(|i| affordances.get(i).cloned())
        else {
            return;
        };
        match affordance {
            Affordance::Option(text) => {
                if self.controller.is_busy() {
                    tracing::debug!("suggestion ignored while a reply is in flight");
                    return;
                }
                self.controller.submit(&mut self.transcript, &text);
            }
            Affordance::SessionSwitch => {
                self.controller.activate_session_switch(&mut self.transcript);
            }
        }
    }

    /// Handle slash commands
    fn handle_slash_command(&mut self, command: ParsedCommand) -> ConversationAction {
        if self.controller.is_busy() && !command.command.available_during_streaming() {
            self.transcript.push_info(&format!(
                "/{} is not available while a reply is streaming",
                command.command.command()
            ));
            return ConversationAction::None;
        }

        match command.command {
            SlashCommand::Erase => {
                self.controller.erase_last_turn(&mut self.transcript);
            }
            SlashCommand::Stop => {
                if self.controller.is_busy() {
                    self.controller.abort(&mut self.transcript);
                }
            }
            SlashCommand::Options => {
                self.transcript.append_option_prompts(&self.option_prompts);
            }
            SlashCommand::Session => {
                self.transcript.append_session_switch(&self.session_switch_label);
            }
            SlashCommand::Chat => {
                self.controller.set_mode(ChatMode::Standard);
            }
            SlashCommand::Help => {
                self.transcript.push_info(&get_help_text());
            }
            SlashCommand::Bye => return ConversationAction::Exit,
        }
        ConversationAction::None
    }

    fn sync_composer(&mut self) {
        self.composer.set_locked(self.controller.is_busy());
        self.composer.update_mode(self.controller.mode());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Role, Route, StreamEventKind, StreamRequest};
    use crate::ui::conversation::transcript::EntryKind;
    use crossterm::event::KeyModifiers;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct FakeTransport {
        requests: Mutex<Vec<StreamRequest>>,
        erases: Mutex<usize>,
    }

    impl ChatTransport for FakeTransport {
        fn open_stream(
            &self,
            request: StreamRequest,
            _events: mpsc::UnboundedSender<StreamEvent>,
            _cancel: CancellationToken,
        ) {
            self.requests.lock().unwrap().push(request);
        }

        fn notify_erase(&self) {
            *self.erases.lock().unwrap() += 1;
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn setup() -> (ConversationManager, Arc<FakeTransport>, Instant) {
        let transport = Arc::new(FakeTransport::default());
        let config = Config::default();
        let (manager, _rx) = ConversationManager::new(&config, transport.clone());
        (manager, transport, Instant::now())
    }

    fn type_text(manager: &mut ConversationManager, text: &str, now: Instant) {
        for c in text.chars() {
            manager.handle_key(key(KeyCode::Char(c)), now);
        }
    }

    fn last_request(transport: &FakeTransport) -> StreamRequest {
        transport.requests.lock().unwrap().last().cloned().unwrap()
    }

    #[test]
    fn starts_with_welcome_and_affordances() {
        let (manager, _, _) = setup();
        let transcript = manager.transcript();
        assert_eq!(transcript.count_kind(&EntryKind::Welcome), 1);
        let affordances = transcript.affordances();
        assert_eq!(affordances.len(), Config::default().option_prompts.len() + 1);
        assert_eq!(affordances.last(), Some(&Affordance::SessionSwitch));
    }

    #[test]
    fn typing_and_enter_submits() {
        let (mut manager, transport, now) = setup();
        type_text(&mut manager, "best roast?", now);
        manager.handle_key(key(KeyCode::Enter), now);

        assert!(manager.is_busy());
        let request = last_request(&transport);
        assert_eq!(request.route, Route::Chat);
        assert_eq!(request.message.as_deref(), Some("best roast?"));
        assert!(manager.transcript().affordances().is_empty());
    }

    #[test]
    fn enter_is_ignored_while_busy() {
        let (mut manager, transport, now) = setup();
        type_text(&mut manager, "one", now);
        manager.handle_key(key(KeyCode::Enter), now);
        type_text(&mut manager, "two", now);
        manager.handle_key(key(KeyCode::Enter), now);

        assert_eq!(transport.requests.lock().unwrap().len(), 1);
        assert_eq!(manager.transcript().count_role(Role::User), 1);
    }

    #[test]
    fn arrow_keys_pick_a_suggestion() {
        let (mut manager, transport, now) = setup();
        manager.handle_key(key(KeyCode::Down), now);
        manager.handle_key(key(KeyCode::Down), now);
        manager.handle_key(key(KeyCode::Enter), now);

        let expected = Config::default().option_prompts[1].clone();
        assert_eq!(last_request(&transport).message, Some(expected));
    }

    #[test]
    fn session_switch_enters_session_mode() {
        let (mut manager, transport, now) = setup();
        manager.handle_key(key(KeyCode::Up), now);
        manager.handle_key(key(KeyCode::Enter), now);

        assert_eq!(manager.mode(), ChatMode::Session);
        let request = last_request(&transport);
        assert_eq!(request.route, Route::SessionStart);
        assert_eq!(request.message, None);
    }

    #[test]
    fn escape_aborts_and_unlocks() {
        let (mut manager, _, now) = setup();
        type_text(&mut manager, "hola", now);
        manager.handle_key(key(KeyCode::Enter), now);
        manager.handle_key(key(KeyCode::Esc), now);

        assert!(!manager.is_busy());
        assert!(!manager.transcript().has_typing_indicator());
    }

    #[test]
    fn stream_events_reach_the_transcript() {
        let (mut manager, transport, now) = setup();
        type_text(&mut manager, "hola", now);
        manager.handle_key(key(KeyCode::Enter), now);
        let id = last_request(&transport).id;

        manager.handle_stream_event(StreamEvent::new(id, StreamEventKind::Opened), now);
        manager.handle_stream_event(
            StreamEvent::new(id, StreamEventKind::Chunk(b"Hi".to_vec())),
            now,
        );
        manager.handle_stream_event(StreamEvent::new(id, StreamEventKind::Finished), now);
        manager.tick(now + Duration::from_secs(1));

        assert!(!manager.is_busy());
        let reply = manager
            .transcript()
            .entries()
            .iter()
            .find(|e| e.role() == Some(Role::Assistant))
            .unwrap();
        assert_eq!(reply.content, "Hi");
    }

    #[test]
    fn erase_command_removes_the_last_turn() {
        let (mut manager, transport, now) = setup();
        type_text(&mut manager, "hola", now);
        manager.handle_key(key(KeyCode::Enter), now);
        let id = last_request(&transport).id;
        manager.handle_stream_event(StreamEvent::new(id, StreamEventKind::Opened), now);
        manager.handle_stream_event(StreamEvent::new(id, StreamEventKind::Finished), now);

        let action = manager.handle_slash_command(ParsedCommand {
            command: SlashCommand::Erase,
            argument: None,
        });
        assert_eq!(action, ConversationAction::None);
        assert_eq!(manager.transcript().count_role(Role::User), 0);
        assert_eq!(manager.transcript().count_role(Role::Assistant), 0);
        assert_eq!(*transport.erases.lock().unwrap(), 1);
    }

    #[test]
    fn chat_command_leaves_session_mode() {
        let (mut manager, _, now) = setup();
        manager.handle_key(key(KeyCode::Up), now);
        manager.handle_key(key(KeyCode::Enter), now);
        manager.handle_key(key(KeyCode::Esc), now);

        manager.handle_slash_command(ParsedCommand {
            command: SlashCommand::Chat,
            argument: None,
        });
        assert_eq!(manager.mode(), ChatMode::Standard);
    }

    #[test]
    fn options_command_is_refused_while_streaming() {
        let (mut manager, _, now) = setup();
        type_text(&mut manager, "hola", now);
        manager.handle_key(key(KeyCode::Enter), now);

        manager.handle_slash_command(ParsedCommand {
            command: SlashCommand::Options,
            argument: None,
        });
        assert!(manager.transcript().affordances().is_empty());
        assert_eq!(manager.transcript().count_kind(&EntryKind::Info), 1);
    }

    #[test]
    fn bye_exits() {
        let (mut manager, _, now) = setup();
        type_text(&mut manager, "/bye", now);
        // first Enter completes from the palette, second one runs it
        manager.handle_key(key(KeyCode::Enter), now);
        let action = manager.handle_key(key(KeyCode::Enter), now);
        assert_eq!(action, ConversationAction::Exit);
    }
}
