#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatrelay::constants::CHAT_ROUTE;
use chatrelay::proxy;
use chatrelay::{ChatError, Generation, GenerationRequest, Generator, ProxyConfig, ResponseMode};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};

/// Stand-in generation backend with scripted behavior.
#[derive(Default)]
pub struct FakeGenerator {
    pub chunks: Vec<String>,
    pub failure: Option<String>,
    pub delay: Option<Duration>,
    /// Emit the chunks, then never finish.
    pub hang_after_chunks: bool,
    /// Emit the chunks, then fail the stream with this message.
    pub fail_after_chunks: Option<String>,
    pub seen: Mutex<Vec<(GenerationRequest, ResponseMode)>>,
}

impl FakeGenerator {
    pub fn replying(chunks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(message.to_string()),
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            chunks: vec!["too late".to_string()],
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn hanging(chunks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            hang_after_chunks: true,
            ..Self::default()
        })
    }

    pub fn failing_midway(chunks: &[&str], message: &str) -> Arc<Self> {
        Arc::new(Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            fail_after_chunks: Some(message.to_string()),
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<(GenerationRequest, ResponseMode)> {
        self.seen.lock().unwrap().clone()
    }
}

impl Generator for FakeGenerator {
    fn generate(
        &self,
        request: GenerationRequest,
        mode: ResponseMode,
    ) -> BoxFuture<'_, Result<Generation, ChatError>> {
        async move {
            self.seen.lock().unwrap().push((request, mode));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = &self.failure {
                return Err(ChatError::Upstream(message.clone()));
            }
            if let (ResponseMode::Buffered, Some(message)) = (mode, &self.fail_after_chunks) {
                return Err(ChatError::Upstream(message.clone()));
            }

            let chunks = self.chunks.clone();
            match mode {
                ResponseMode::Buffered => Ok(Generation::Full(chunks.concat())),
                ResponseMode::Streaming => {
                    let emitted = stream::iter(chunks.into_iter().map(Ok));
                    let stream = if self.hang_after_chunks {
                        emitted.chain(stream::pending()).boxed()
                    } else if let Some(message) = self.fail_after_chunks.clone() {
                        // Give the emitted chunks time to reach the client first
                        let failure = async move {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            Err(ChatError::Upstream(message))
                        };
                        emitted.chain(stream::once(failure)).boxed()
                    } else {
                        emitted.boxed()
                    };
                    Ok(Generation::Stream(stream))
                }
            }
        }
        .boxed()
    }
}

/// Serves the real proxy router on an ephemeral port and returns its chat URL.
pub async fn spawn_proxy(config: ProxyConfig, generator: Arc<FakeGenerator>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = proxy::router(config, generator);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}{}", addr, CHAT_ROUTE)
}
