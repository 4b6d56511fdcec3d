//! Lifecycle of the single in-flight stream request.
//!
//! `StreamController` issues a request through a [`ChatTransport`], consumes
//! the [`StreamEvent`]s its task reports, and feeds decoded text through the
//! [`Typewriter`] into one assistant message of a [`ChatView`]. Time is passed
//! in explicitly so the drain can be driven by any clock.

use crate::client::ChatTransport;
use crate::events::{ChatMode, RequestId, Route, StreamEvent, StreamEventKind, StreamRequest};
use crate::streaming::{DelimiterNormalizer, Typewriter, Utf8StreamDecoder};
use crate::typeset::Typesetter;
use crate::ui::conversation::transcript::{ChatView, MessageId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Where the current request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Request issued, waiting for response headers
    Sending,
    /// Reading the body into the assistant message
    Streaming,
    /// Body ended; flushing and typesetting
    Finalizing,
}

/// How the most recent request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Aborted,
    Errored,
}

/// Per-request state; exists only while a request is in flight
struct ActiveStream {
    id: RequestId,
    cancel: CancellationToken,
    /// Created when the response headers arrive
    container: Option<MessageId>,
    /// Session opening: no user message precedes the reply
    opening: bool,
    decoder: Utf8StreamDecoder,
    normalizer: DelimiterNormalizer,
}

/// Drives one stream request at a time against a [`ChatView`]
pub struct StreamController {
    transport: Arc<dyn ChatTransport>,
    events: mpsc::UnboundedSender<StreamEvent>,
    typesetter: Option<Box<dyn Typesetter>>,
    typewriter: Typewriter,
    active: Option<ActiveStream>,
    phase: Phase,
    last_outcome: Option<Outcome>,
    mode: ChatMode,
    next_request: u64,
    searching_notice: String,
}

impl StreamController {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        events: mpsc::UnboundedSender<StreamEvent>,
        typing_delay: Duration,
    ) -> Self {
        Self {
            transport,
            events,
            typesetter: None,
            typewriter: Typewriter::new(typing_delay),
            active: None,
            phase: Phase::Idle,
            last_outcome: None,
            mode: ChatMode::Standard,
            next_request: 1,
            searching_notice: "Searching the reference documents...".to_string(),
        }
    }

    pub fn with_typesetter(mut self, typesetter: Box<dyn Typesetter>) -> Self {
        self.typesetter = Some(typesetter);
        self
    }

    pub fn with_searching_notice(mut self, notice: impl Into<String>) -> Self {
        self.searching_notice = notice.into();
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.last_outcome
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ChatMode) {
        if self.mode != mode {
            tracing::info!(from = ?self.mode, to = ?mode, "chat mode changed");
        }
        self.mode = mode;
    }

    /// Whether a request is in flight
    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// When the next drain step is due, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        self.typewriter.next_deadline()
    }

    /// Send a user message. Blank input is ignored and touches nothing.
    pub fn submit(&mut self, view: &mut dyn ChatView, text: &str) -> bool {
        let message = text.trim();
        if message.is_empty() {
            return false;
        }

        view.hide_prompt_affordances();
        view.append_user_message(message);
        view.show_typing_indicator();
        self.start(Route::for_mode(self.mode), Some(message.to_string()));
        true
    }

    /// Activate the session switch: enter session mode and stream its opening
    pub fn activate_session_switch(&mut self, view: &mut dyn ChatView) {
        view.remove_session_switch();
        if self.is_busy() {
            self.abort(view);
        }
        self.set_mode(ChatMode::Session);
        view.hide_prompt_affordances();
        view.show_typing_indicator();
        self.start(Route::SessionStart, None);
    }

    fn start(&mut self, route: Route, message: Option<String>) {
        if let Some(stale) = self.active.take() {
            // single-flight is the caller's job; never leave a task orphaned
            tracing::warn!(request = %stale.id, "replacing in-flight request");
            stale.cancel.cancel();
            self.typewriter.clear();
        }

        let id = RequestId(self.next_request);
        self.next_request += 1;
        let cancel = CancellationToken::new();

        tracing::info!(request = %id, ?route, "sending");
        self.active = Some(ActiveStream {
            id,
            cancel: cancel.clone(),
            container: None,
            opening: message.is_none(),
            decoder: Utf8StreamDecoder::new(),
            normalizer: DelimiterNormalizer::new(),
        });
        self.phase = Phase::Sending;

        self.transport.open_stream(
            StreamRequest { id, route, message },
            self.events.clone(),
            cancel,
        );
    }

    /// Apply an event reported by a stream task
    pub fn handle_event(&mut self, view: &mut dyn ChatView, event: StreamEvent, now: Instant) {
        let Some(active) = self.active.as_mut() else {
            tracing::debug!(request = %event.request, "event without active stream ignored");
            return;
        };
        if active.id != event.request {
            tracing::debug!(request = %event.request, "stale stream event ignored");
            return;
        }

        match event.kind {
            StreamEventKind::Searching => {
                if self.phase == Phase::Sending {
                    view.show_notice(&self.searching_notice);
                }
            }
            StreamEventKind::Opened => {
                view.remove_typing_indicator();
                view.remove_notice();
                active.container = Some(append_reply(view, active.opening, ""));
                self.phase = Phase::Streaming;
            }
            StreamEventKind::Chunk(bytes) => {
                let Some(container) = active.container else {
                    tracing::warn!(request = %active.id, "body chunk before headers ignored");
                    return;
                };
                let text = active.decoder.decode(&bytes);
                let text = active.normalizer.push(&text);
                self.typewriter.push(&text, now);
                self.drain(view, container, now);
            }
            StreamEventKind::Finished => self.finish(view),
            StreamEventKind::Rejected { message } => {
                view.remove_typing_indicator();
                view.remove_notice();
                append_reply(view, active.opening, &format!("Error: {message}"));
                self.end(Outcome::Errored);
            }
            StreamEventKind::Failed(error) => {
                view.remove_typing_indicator();
                view.remove_notice();
                match active.container {
                    Some(container) => {
                        let mut rest = self.typewriter.flush();
                        rest.push_str(&active.decoder.finish());
                        rest.push_str(&active.normalizer.finish());
                        view.append_to_message(container, &rest);
                        view.append_to_message(container, "\n[stream interrupted]");
                    }
                    None => {
                        append_reply(view, active.opening, &format!("Request error: {error}"));
                    }
                }
                self.end(Outcome::Errored);
            }
        }
    }

    /// Reveal any characters that are due
    pub fn tick(&mut self, view: &mut dyn ChatView, now: Instant) {
        if let Some(container) = self.active.as_ref().and_then(|a| a.container) {
            self.drain(view, container, now);
        }
    }

    fn drain(&mut self, view: &mut dyn ChatView, container: MessageId, now: Instant) {
        let text = self.typewriter.drain_due(now);
        view.append_to_message(container, &text);
    }

    /// End of body: flush everything still buffered, then typeset
    fn finish(&mut self, view: &mut dyn ChatView) {
        self.phase = Phase::Finalizing;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(container) = active.container else {
            tracing::warn!(request = %active.id, "stream finished before headers");
            self.end(Outcome::Errored);
            return;
        };

        let mut rest = self.typewriter.flush();
        rest.push_str(&active.decoder.finish());
        rest.push_str(&active.normalizer.finish());
        view.append_to_message(container, &rest);

        match (&self.typesetter, view.message_content(container)) {
            (Some(typesetter), Some(content)) => match typesetter.typeset(&content) {
                Ok(rendered) => view.set_rendered(container, rendered),
                Err(e) => tracing::warn!(request = %active.id, "typeset failed: {}", e),
            },
            (None, _) => tracing::debug!("no typesetter configured, skipping finalization"),
            (_, None) => tracing::debug!("assistant message removed before finalization"),
        }

        self.end(Outcome::Completed);
    }

    fn end(&mut self, outcome: Outcome) {
        if let Some(active) = self.active.take() {
            tracing::info!(request = %active.id, ?outcome, "request ended");
        }
        self.phase = Phase::Idle;
        self.last_outcome = Some(outcome);
    }

    /// Cancel the in-flight request. Already revealed text stays; text still
    /// buffered is dropped.
    pub fn abort(&mut self, view: &mut dyn ChatView) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        let dropped = self.typewriter.clear();
        tracing::info!(request = %active.id, dropped, "request aborted");

        // placeholders are not content
        view.remove_typing_indicator();
        view.remove_notice();
        self.phase = Phase::Idle;
        self.last_outcome = Some(Outcome::Aborted);
    }

    /// Undo the last turn in the view and on the server
    pub fn erase_last_turn(&mut self, view: &mut dyn ChatView) {
        // a request still waiting for headers has no assistant message yet
        let (pending_reply, opening) = self
            .active
            .as_ref()
            .map_or((false, false), |a| (a.container.is_none(), a.opening));
        self.abort(view);

        if opening {
            // the opening has no user message to pair with; earlier turns stay
            tracing::info!("session opening cancelled, nothing erased");
            return;
        }

        let removed_user = view.remove_last_user_message();
        let removed_assistant = !pending_reply && view.remove_last_assistant_message();

        if removed_user || removed_assistant {
            tracing::info!(removed_user, removed_assistant, "erased last turn");
            self.transport.notify_erase();
        }
    }
}

/// Session openings get their own entry so erase never splits a turn
fn append_reply(view: &mut dyn ChatView, opening: bool, content: &str) -> MessageId {
    if opening {
        view.append_session_opening(content)
    } else {
        view.append_assistant_message(content)
    }
}
