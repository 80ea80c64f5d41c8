//! Client-side chat state: transcript, busy flag, scrolling and rendering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use tracing::{error, info};

use crate::constants::{
    EMPTY_REPLY_FALLBACK, EMPTY_TRANSCRIPT_PLACEHOLDER, ERROR_FALLBACK, STATUS_ONLINE,
    STATUS_THINKING,
};
use crate::error::Result;
use crate::proxy::ChatRequest;
use crate::transcript::{Delivery, PendingTurn, Transcript};
use crate::transport::ChatTransport;
use crate::Role;

const DEFAULT_VIEWPORT_HEIGHT: usize = 24;

/// Read-only view of a widget's busy flag.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Holds the busy flag for one exchange and clears it when dropped.
#[derive(Debug)]
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &BusyFlag) -> Option<Self> {
        flag.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BusyGuard(flag.0.clone()))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetState {
    Idle,
    AwaitingReply,
}

/// Why a submission did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skipped {
    EmptyInput,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Skipped(Skipped),
    Answered,
    Failed,
}

/// An exchange in flight. Dropping it without settling still releases the busy flag.
#[derive(Debug)]
pub struct Exchange {
    turn: PendingTurn,
    request: ChatRequest,
    busy: BusyGuard,
}

impl Exchange {
    pub fn request(&self) -> &ChatRequest {
        &self.request
    }
}

pub struct ChatWidget<T: ChatTransport> {
    transport: T,
    transcript: Transcript,
    busy: BusyFlag,
    system_prompt: Option<String>,
    scroll_offset: usize,
    viewport_height: usize,
}

impl<T: ChatTransport> ChatWidget<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            transcript: Transcript::new(),
            busy: BusyFlag::default(),
            system_prompt: None,
            scroll_offset: 0,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }

    /// Persona override sent along with every request.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_viewport_height(mut self, height: usize) -> Self {
        self.viewport_height = height.max(1);
        self.follow_latest();
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_set()
    }

    pub fn state(&self) -> WidgetState {
        if self.is_busy() {
            WidgetState::AwaitingReply
        } else {
            WidgetState::Idle
        }
    }

    pub fn status_label(&self) -> &'static str {
        if self.is_busy() {
            STATUS_THINKING
        } else {
            STATUS_ONLINE
        }
    }

    /// Starts an exchange: records the user's message and raises the busy flag.
    pub fn begin(&mut self, input: &str) -> std::result::Result<Exchange, Skipped> {
        let content = input.trim();
        if content.is_empty() {
            return Err(Skipped::EmptyInput);
        }
        let busy = BusyGuard::acquire(&self.busy).ok_or(Skipped::Busy)?;

        let turn = self.transcript.push_pending(content);
        let request = ChatRequest {
            messages: self.transcript.messages(),
            system_prompt: self.system_prompt.clone(),
        };
        self.follow_latest();

        Ok(Exchange {
            turn,
            request,
            busy,
        })
    }

    /// Finishes an exchange with whatever the transport produced.
    pub fn settle(&mut self, exchange: Exchange, result: Result<String>) -> SubmitOutcome {
        let Exchange { turn, busy, .. } = exchange;

        let outcome = match result {
            Ok(reply) => {
                let reply = if reply.trim().is_empty() {
                    EMPTY_REPLY_FALLBACK.to_string()
                } else {
                    reply
                };
                self.transcript.settle(turn, Delivery::Answered, reply);
                SubmitOutcome::Answered
            }
            Err(e) => {
                error!("Error sending message: {}", e);
                let text = e.to_string();
                let text = if text.trim().is_empty() {
                    ERROR_FALLBACK.to_string()
                } else {
                    text
                };
                self.transcript.settle(turn, Delivery::Failed, text);
                SubmitOutcome::Failed
            }
        };

        drop(busy);
        self.follow_latest();
        outcome
    }

    /// Runs one full exchange against the transport.
    pub async fn submit(&mut self, input: &str) -> SubmitOutcome {
        let exchange = match self.begin(input) {
            Ok(exchange) => exchange,
            Err(skipped) => return SubmitOutcome::Skipped(skipped),
        };
        info!(turns = exchange.request.messages.len(), "Submitting chat message");

        let result = self.transport.send(exchange.request.clone()).await;
        self.settle(exchange, result)
    }

    /// Display lines for the whole transcript, newest last.
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();

        if self.transcript.is_empty() && !self.is_busy() {
            lines.push(EMPTY_TRANSCRIPT_PLACEHOLDER.to_string());
            return lines;
        }

        for entry in self.transcript.entries() {
            let message = &entry.message;
            let header = match message.created_at {
                Some(created) => format!(
                    "{} [{}]",
                    message.role.label(),
                    created.with_timezone(&Local).format("%H:%M")
                ),
                None => message.role.label().to_string(),
            };
            lines.push(header);
            lines.extend(message.content.lines().map(|line| format!("  {}", line)));
            lines.push(String::new());
        }

        if self.is_busy() {
            lines.push(format!("{}: {}", Role::Assistant.label(), STATUS_THINKING));
        }
        lines
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// Scrolls so the newest line sits at the bottom of the viewport.
    fn follow_latest(&mut self) {
        self.scroll_offset = self.render().len().saturating_sub(self.viewport_height);
    }

    pub fn visible_lines(&self) -> Vec<String> {
        self.render()
            .into_iter()
            .skip(self.scroll_offset)
            .take(self.viewport_height)
            .collect()
    }
}
