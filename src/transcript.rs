use chrono::Utc;

use crate::{Message, Role};

/// Where a transcript entry stands in its exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Shown optimistically; the proxy has not answered yet.
    Pending,
    Answered,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub message: Message,
    pub delivery: Delivery,
}

/// Handle to a provisional user entry. Consumed when the exchange settles.
#[derive(Debug)]
#[must_use = "a pending turn must be settled"]
pub struct PendingTurn {
    index: usize,
}

/// Ordered, append-only chat history for one session.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<Entry>,
    last_id: i64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    // Millisecond timestamps, bumped so ids never repeat within a session
    fn next_id(&mut self) -> String {
        let now = Utc::now().timestamp_millis();
        self.last_id = now.max(self.last_id + 1);
        self.last_id.to_string()
    }

    fn push(&mut self, role: Role, content: String, delivery: Delivery) -> usize {
        let id = self.next_id();
        self.entries.push(Entry {
            message: Message::new(id, role, content),
            delivery,
        });
        self.entries.len() - 1
    }

    /// First phase: record the user's message before the proxy confirms anything.
    pub fn push_pending(&mut self, content: impl Into<String>) -> PendingTurn {
        let index = self.push(Role::User, content.into(), Delivery::Pending);
        PendingTurn { index }
    }

    /// Second phase: close the user's turn and append the assistant's entry.
    pub fn settle(&mut self, turn: PendingTurn, delivery: Delivery, reply: impl Into<String>) {
        if let Some(entry) = self.entries.get_mut(turn.index) {
            entry.delivery = delivery;
        }
        self.push(Role::Assistant, reply.into(), delivery);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// The conversation as sent to the proxy.
    pub fn messages(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.entries.iter().any(|e| e.delivery == Delivery::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transcript_is_empty() {
        let transcript = Transcript::new();
        assert!(transcript.is_empty());
        assert_eq!(transcript.len(), 0);
        assert!(transcript.last().is_none());
        assert!(!transcript.has_pending());
    }

    #[test]
    fn test_pending_then_settled() {
        let mut transcript = Transcript::new();
        let turn = transcript.push_pending("Hello");

        assert_eq!(transcript.len(), 1);
        assert!(transcript.has_pending());
        assert_eq!(transcript.entries()[0].delivery, Delivery::Pending);

        transcript.settle(turn, Delivery::Answered, "Hi there!");

        let entries = transcript.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message.role, Role::User);
        assert_eq!(entries[0].delivery, Delivery::Answered);
        assert_eq!(entries[1].message.role, Role::Assistant);
        assert_eq!(entries[1].message.content, "Hi there!");
        assert!(!transcript.has_pending());
    }

    #[test]
    fn test_failed_settlement_marks_both_entries() {
        let mut transcript = Transcript::new();
        let turn = transcript.push_pending("Hello");
        transcript.settle(turn, Delivery::Failed, "Internal Server Error");

        assert!(transcript.entries().iter().all(|e| e.delivery == Delivery::Failed));
        assert_eq!(transcript.last().unwrap().message.content, "Internal Server Error");
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut transcript = Transcript::new();
        for i in 0..20 {
            let turn = transcript.push_pending(format!("msg {}", i));
            transcript.settle(turn, Delivery::Answered, "ok");
        }

        let ids: Vec<i64> = transcript
            .entries()
            .iter()
            .map(|e| e.message.id.parse().unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_messages_preserve_order() {
        let mut transcript = Transcript::new();
        let turn = transcript.push_pending("one");
        transcript.settle(turn, Delivery::Answered, "two");

        let contents: Vec<String> = transcript.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }
}
