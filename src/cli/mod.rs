use clap::Parser;

use crate::analytics::store::DEFAULT_STORAGE_KEY;
use crate::llm::{ DEFAULT_CHAT_MODEL, DEFAULT_TEMPERATURE };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Chat LLM Provider Args ---
    /// API key for the Gemini API. May be left unset and selected later by a client.
    #[arg(long, env = "CHAT_API_KEY")]
    pub chat_api_key: Option<String>,

    /// Fallback Gemini API key, used when --chat-api-key / CHAT_API_KEY is unset.
    #[arg(long, env = "GEMINI_API_KEY")]
    pub gemini_api_key: Option<String>,

    /// Model name for chat completion (e.g., gemini-3-pro-preview, gemini-2.5-flash)
    #[arg(long, env = "CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    /// Base URL for the Gemini API (e.g., https://generativelanguage.googleapis.com/v1beta)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let the client handle it if None
    pub chat_base_url: Option<String>,

    /// Sampling temperature for chat completion.
    #[arg(long, env = "CHAT_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    pub chat_temperature: f32,

    /// Optional JSON file overriding the system instruction and message templates.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    // --- Analytics Args ---
    /// Directory holding the persisted analytics snapshot.
    #[arg(long, env = "ANALYTICS_DIR", default_value = "data")]
    pub analytics_dir: String,

    /// Storage key of the analytics snapshot (file name without extension).
    #[arg(long, env = "ANALYTICS_KEY", default_value = DEFAULT_STORAGE_KEY)]
    pub analytics_key: String,

    // --- Server Args ---
    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional port for the HTTP analytics API. Disabled when unset.
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Optional API Key required for clients to connect. If set, clients must provide this key.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Maximum new WebSocket connections accepted per second.
    #[arg(long, env = "CONNECTIONS_PER_SECOND", default_value = "10")]
    pub connections_per_second: u32,
}

impl Args {
    /// The configured Gemini key: `CHAT_API_KEY` first, then `GEMINI_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.chat_api_key.clone().or_else(|| self.gemini_api_key.clone())
    }
}
