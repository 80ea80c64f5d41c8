// Interactive terminal front end for the chat widget.

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::constants::EMPTY_TRANSCRIPT_PLACEHOLDER;
use crate::transport::{ChatTransport, ChunkObserver, HttpTransport};
use crate::widget::{ChatWidget, Skipped, SubmitOutcome};
use crate::Role;

const QUIT_COMMAND: &str = "/quit";

fn prompt() -> Result<()> {
    print!("> ");
    std::io::stdout().flush().context("Failed to flush stdout")
}

fn clear(streamed: &Mutex<String>) -> String {
    streamed
        .lock()
        .map(|mut text| std::mem::take(&mut *text))
        .unwrap_or_default()
}

/// Reads lines from stdin and relays each one through the proxy at `url`.
pub async fn run_chat_session(url: &str, system_prompt: Option<String>) -> Result<()> {
    info!("Starting chat session against {}", url);

    // Streamed chunks are echoed as they arrive
    let streamed = Arc::new(Mutex::new(String::new()));
    let observer: ChunkObserver = {
        let streamed = streamed.clone();
        Arc::new(move |chunk: &str| {
            if let Ok(mut text) = streamed.lock() {
                text.push_str(chunk);
            }
            print!("{}", chunk);
            let _ = std::io::stdout().flush();
        })
    };

    let transport = HttpTransport::new(url).with_chunk_observer(observer);
    let mut widget = ChatWidget::new(transport);
    if let Some(system_prompt) = system_prompt {
        widget = widget.with_system_prompt(system_prompt);
    }

    println!("AI Assistant ({})", widget.status_label());
    println!("{}. Type {} to leave.", EMPTY_TRANSCRIPT_PLACEHOLDER, QUIT_COMMAND);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await.context("Failed to read from stdin")? {
        if line.trim() == QUIT_COMMAND {
            break;
        }

        let exchange = match widget.begin(&line) {
            Ok(exchange) => exchange,
            Err(Skipped::EmptyInput) => {
                prompt()?;
                continue;
            }
            Err(Skipped::Busy) => {
                println!("Still waiting for the previous reply.");
                prompt()?;
                continue;
            }
        };

        println!("{}", widget.status_label());
        print!("{}: ", Role::Assistant.label());
        std::io::stdout().flush().context("Failed to flush stdout")?;

        clear(&streamed);
        let result = widget.transport().send(exchange.request().clone()).await;
        let outcome = widget.settle(exchange, result);
        let echoed = clear(&streamed);

        // Buffered replies, fallbacks and errors were not echoed, or not fully
        if let Some(entry) = widget.transcript().last() {
            let content = &entry.message.content;
            if echoed.is_empty() {
                print!("{}", content);
            } else if outcome == SubmitOutcome::Failed || *content != echoed {
                print!("\n{}: {}", Role::Assistant.label(), content);
            }
        }
        println!();
        prompt()?;
    }

    info!(
        turns = widget.transcript().len(),
        "Chat session finished"
    );
    Ok(())
}
