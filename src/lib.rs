pub mod agent;
pub mod analytics;
pub mod cli;
pub mod config;
pub mod credential;
pub mod llm;
pub mod models;
pub mod server;
pub mod session;
pub mod turn;
pub mod upload;
pub mod websocket;

use agent::InsightAgent;
use cli::Args;
use log::info;
use server::{ AppState, Server };
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("HTTP Port: {}", args.http_port.map_or("disabled".to_string(), |p| p.to_string()));
    info!("Chat Model: {}", args.chat_model);
    info!("Chat Temperature: {}", args.chat_temperature);
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("built-in"));
    info!("Analytics Dir: {}", args.analytics_dir);
    info!("Analytics Key: {}", args.analytics_key);
    info!("Client API Key Required: {}", args.server_api_key.is_some());
    info!("-------------------------");

    let (agent, analytics) = InsightAgent::from_args(&args)?;
    if !agent.credentials().has_credential().await {
        info!("No chat API key configured; clients must select one before chatting");
    }

    let state = AppState {
        agent: Arc::new(agent),
        analytics,
        api_key: args.server_api_key.clone(),
    };
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, state, args);
    server.run().await?;

    Ok(())
}
