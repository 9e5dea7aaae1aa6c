use shared::domain::ChatMessage;

/// Unread counter and transient "latest message" preview for a chat surface.
#[derive(Debug, Default)]
pub struct UnreadTracker {
    visible: bool,
    unread: u32,
    latest: Option<ChatMessage>,
    preview_generation: u64,
}

impl UnreadTracker {
    pub fn new(visible: bool) -> Self {
        Self {
            visible,
            ..Self::default()
        }
    }

    /// Returns the preview generation to expire later when the message was recorded as unread.
    pub fn on_message_admitted(&mut self, message: &ChatMessage) -> Option<u64> {
        if self.visible {
            return None;
        }
        self.unread = self.unread.saturating_add(1);
        self.latest = Some(message.clone());
        self.preview_generation += 1;
        Some(self.preview_generation)
    }

    /// Clears the preview unless a newer message replaced it since `generation` was issued.
    pub fn expire_preview(&mut self, generation: u64) -> bool {
        if generation != self.preview_generation || self.latest.is_none() {
            return false;
        }
        self.latest = None;
        true
    }

    pub fn set_visible(&mut self, visible: bool) -> bool {
        let changed =
            self.visible != visible || (visible && (self.unread > 0 || self.latest.is_some()));
        self.visible = visible;
        if visible {
            self.unread = 0;
            self.latest = None;
            self.preview_generation += 1;
        }
        changed
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn unread_count(&self) -> u32 {
        self.unread
    }

    pub fn latest_preview(&self) -> Option<&ChatMessage> {
        self.latest.as_ref()
    }
}

#[cfg(test)]
#[path = "tests/unread_tests.rs"]
mod tests;
