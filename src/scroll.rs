use crate::message::{Message, MessageId, Role};

/// Distance from the bottom, in logical pixels, that still counts as pinned.
pub const PIN_THRESHOLD_PX: f32 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub offset_y: f32,
    pub viewport_height: f32,
    pub content_height: f32,
}

impl ScrollMetrics {
    pub fn distance_from_bottom(&self) -> f32 {
        (self.content_height - self.viewport_height - self.offset_y).max(0.0)
    }

    pub fn is_pinned(&self) -> bool {
        self.distance_from_bottom() <= PIN_THRESHOLD_PX
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    ToBottom,
    Preserve,
}

/// Auto-follow policy for the message list.
#[derive(Debug, Clone)]
pub struct ScrollState {
    pinned: bool,
    newest_seen: Option<MessageId>,
}

impl Default for ScrollState {
    fn default() -> Self {
        ScrollState {
            pinned: true,
            newest_seen: None,
        }
    }
}

impl ScrollState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn on_scroll(&mut self, metrics: ScrollMetrics) {
        self.pinned = metrics.is_pinned();
    }

    /// Decide what to do after a render pass: follow the bottom if the user
    /// was already there or just sent a message, otherwise stay put.
    pub fn after_render(&mut self, messages: &[Message]) -> ScrollAction {
        let newest = messages.last();
        let fresh_user_message = newest.is_some_and(|m| {
            m.role == Role::User && self.newest_seen.as_ref() != Some(&m.id)
        });
        self.newest_seen = newest.map(|m| m.id.clone());

        if self.pinned || fresh_user_message {
            if fresh_user_message {
                self.pinned = true;
            }
            ScrollAction::ToBottom
        } else {
            ScrollAction::Preserve
        }
    }
}
