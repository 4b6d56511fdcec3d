use std::fmt;

/// Role of a message in the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Which conversation the next submission is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatMode {
    /// Regular assistant chat
    #[default]
    Standard,
    /// Alternate guided session started from the session switch
    Session,
}

impl ChatMode {
    pub fn display_name(&self) -> &'static str {
        match self {
            ChatMode::Standard => "Chat",
            ChatMode::Session => "Session",
        }
    }
}

/// Server route a stream request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Regular chat stream, carries the user message
    Chat,
    /// Opens the alternate session, no body
    SessionStart,
    /// Alternate session turn, carries the user message
    SessionChat,
}

impl Route {
    pub fn for_mode(mode: ChatMode) -> Self {
        match mode {
            ChatMode::Standard => Route::Chat,
            ChatMode::Session => Route::SessionChat,
        }
    }
}

/// Identifies one outbound stream request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// What the stream task should send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub id: RequestId,
    pub route: Route,
    pub message: Option<String>,
}

/// Events emitted by a stream task, tagged with the request they belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub request: RequestId,
    pub kind: StreamEventKind,
}

impl StreamEvent {
    pub fn new(request: RequestId, kind: StreamEventKind) -> Self {
        Self { request, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventKind {
    /// The server will consult its reference documents
    Searching,
    /// Response headers arrived with a success status
    Opened,
    /// Response headers arrived with a failure status
    Rejected { message: String },
    /// Raw body bytes, possibly splitting a multi-byte character
    Chunk(Vec<u8>),
    /// Body ended normally
    Finished,
    /// Transport failure, before or after the headers
    Failed(String),
}
