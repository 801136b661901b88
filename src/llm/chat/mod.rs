pub mod gemini;

use async_trait::async_trait;
use futures::{ Future, Stream, StreamExt };
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use log::{ debug, warn };
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use self::gemini::GeminiChatClient;
use super::{ CompletionFailure, CompletionRequest, DEFAULT_CHAT_MODEL, DEFAULT_TEMPERATURE };

/// Text fragments of one completion, in arrival order. An `Err` item is terminal.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, CompletionFailure>> + Send>>;

const STREAM_CHANNEL_CAPACITY: usize = 32;

/// The remote model boundary consumed by the turn pipeline.
///
/// The API key is passed per call so that each connection may use its own.
#[async_trait]
pub trait CompletionSource: Send + Sync {
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        api_key: &str
    ) -> Result<FragmentStream, CompletionFailure>;

    fn get_model(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_CHAT_MODEL.to_string(),
            base_url: None,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Spawns `producer` and hands back the receiving end as a stream.
pub fn create_streaming_response<T, F, Fut>(producer: F) -> Pin<Box<dyn Stream<Item = T> + Send>>
    where
        T: Send + 'static,
        F: FnOnce(mpsc::Sender<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        producer(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_client(
    config: &ChatConfig
) -> Result<Arc<dyn CompletionSource>, Box<dyn StdError + Send + Sync>> {
    let client = GeminiChatClient::new(config.model.clone(), config.base_url.clone())?;
    Ok(Arc::new(client))
}

/// Yields `None` for lines carrying nothing, a fragment, or an in-band failure.
pub type LineParser = fn(&str) -> Option<Result<String, CompletionFailure>>;

/// Posts `payload` and streams the response body line by line through `line_parser`.
///
/// Connection and status failures are returned directly; failures while reading the
/// body, and failures reported inside the body, arrive as the final item of the
/// stream. Lines split across network chunks are reassembled before parsing.
pub async fn http_stream_generate(
    http: &reqwest::Client,
    url: String,
    payload: impl serde::Serialize,
    line_parser: LineParser,
    headers: Vec<(String, String)>
) -> Result<FragmentStream, CompletionFailure> {
    let mut req = http.post(&url).json(&payload);
    for (name, value) in headers {
        req = req.header(name, value);
    }

    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(CompletionFailure::from_status(status.as_u16(), &body));
    }

    Ok(
        create_streaming_response(move |tx| async move {
            let mut bytes = resp.bytes_stream();
            let mut pending: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(buf) => {
                        pending.extend_from_slice(&buf);
                        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = pending.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line);
                            match line_parser(&line) {
                                Some(Ok(tok)) => {
                                    if tx.send(Ok(tok)).await.is_err() {
                                        debug!("Fragment receiver dropped; stopping body read");
                                        return;
                                    }
                                }
                                Some(Err(failure)) => {
                                    warn!("Completion stream reported an error: {}", failure);
                                    let _ = tx.send(Err(failure)).await;
                                    return;
                                }
                                None => {}
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Completion stream interrupted: {}", e);
                        let _ = tx.send(Err(CompletionFailure::from(e))).await;
                        return;
                    }
                }
            }

            if !pending.is_empty() {
                let line = String::from_utf8_lossy(&pending);
                if let Some(item) = line_parser(&line) {
                    let _ = tx.send(item).await;
                }
            }
        })
    )
}
