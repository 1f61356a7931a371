use crate::diagnostics::{self, Kind};
use crate::message::{Message, Role};
use crate::transport::{ChatRequest, StreamEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatStatus {
    #[default]
    Ready,
    /// Request sent, nothing received yet.
    Submitted,
    Streaming,
    Error,
}

impl ChatStatus {
    pub fn in_flight(self) -> bool {
        matches!(self, ChatStatus::Submitted | ChatStatus::Streaming)
    }
}

/// Conversation state: the ordered message list and where the current
/// request stands.
#[derive(Debug, Clone)]
pub struct ChatSession {
    messages: Vec<Message>,
    status: ChatStatus,
    customer_id: u64,
    last_error: Option<String>,
}

impl ChatSession {
    pub fn new(customer_id: u64) -> Self {
        ChatSession {
            messages: Vec::new(),
            status: ChatStatus::Ready,
            customer_id,
            last_error: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn status(&self) -> ChatStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Append the user's message and build the request for the whole
    /// conversation. `None` when the input is blank or a reply is still
    /// coming in.
    pub fn submit(&mut self, input: &str) -> Option<ChatRequest> {
        let input = input.trim();
        if input.is_empty() || self.status.in_flight() {
            return None;
        }

        self.messages.push(Message::user(input));
        self.status = ChatStatus::Submitted;
        self.last_error = None;

        Some(ChatRequest {
            messages: self.messages.iter().map(Message::to_wire).collect(),
            customer_id: self.customer_id,
        })
    }

    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Chunk(text) => self.append_chunk(text),
            StreamEvent::Closed => {
                if self.status.in_flight() {
                    self.status = ChatStatus::Ready;
                }
            }
            StreamEvent::Failed(error) => {
                diagnostics::log_with(Kind::Transport, format!("Chat request failed: {error}"));
                self.status = ChatStatus::Error;
                self.last_error = Some(error.to_string());
            }
        }
    }

    fn append_chunk(&mut self, text: String) {
        match self.status {
            ChatStatus::Submitted => {
                self.messages.push(Message::assistant(text));
                self.status = ChatStatus::Streaming;
            }
            ChatStatus::Streaming => match self.messages.last_mut() {
                Some(reply) if reply.role == Role::Assistant => reply.content.push_str(&text),
                _ => self.messages.push(Message::assistant(text)),
            },
            ChatStatus::Ready | ChatStatus::Error => {
                tracing::debug!("Dropping chunk that arrived after the request ended");
            }
        }
    }
}
