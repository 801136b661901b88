use async_trait::async_trait;
use log::{ info, warn, error };
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::analytics::store::{ FileSnapshotStore, SnapshotStore };
use crate::analytics::{ SharedAggregator, UsageAggregator };
use crate::cli::Args;
use crate::config::prompt::{ self, PromptConfig };
use crate::credential::{ CredentialGate, SessionCredential, SharedCredential };
use crate::llm::chat::{ create_streaming_response, new_client as new_chat_client, ChatConfig, CompletionSource };
use crate::llm::CompletionRequest;
use crate::session::{ ChatSession, SessionError };
use crate::turn::{ self, TurnError, TurnEvent };
use crate::upload::ContextDocument;
use futures::Stream;
use std::pin::Pin;

pub type TurnStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

/// Receives one submission event when a turn starts and one outcome event when it ends.
#[async_trait]
pub trait TurnObserver: Send + Sync {
    async fn on_submission(&self, query: &str);
    async fn on_outcome(&self, succeeded: bool);
}

/// Drives chat turns against the completion source.
///
/// Not reentrant per session: callers go through [`InsightAgent::submit`], which
/// refuses a new turn while the session is still streaming.
#[derive(Clone)]
pub struct InsightAgent {
    source: Arc<dyn CompletionSource>,
    credentials: Arc<dyn CredentialGate>,
    prompt_config: Arc<PromptConfig>,
    observer: Arc<dyn TurnObserver>,
    model: String,
    temperature: f32,
}

impl InsightAgent {
    pub fn new(
        source: Arc<dyn CompletionSource>,
        credentials: Arc<dyn CredentialGate>,
        prompt_config: Arc<PromptConfig>,
        observer: Arc<dyn TurnObserver>,
        temperature: f32
    ) -> Self {
        let model = source.get_model();
        Self { source, credentials, prompt_config, observer, model, temperature }
    }

    /// Wires the agent and its analytics aggregator from command-line configuration.
    pub fn from_args(
        args: &Args
    ) -> Result<(Self, SharedAggregator), Box<dyn Error + Send + Sync>> {
        let credentials: Arc<dyn CredentialGate> = Arc::new(SharedCredential::new(args.api_key()));

        let chat_config = ChatConfig {
            model: args.chat_model.clone(),
            base_url: args.chat_base_url.clone(),
            temperature: args.chat_temperature,
        };
        let source = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Model={}, BaseURL={}, Temperature={}",
            chat_config.model,
            chat_config.base_url.as_deref().unwrap_or("adapter default"),
            chat_config.temperature
        );

        let prompt_config = match &args.prompts_path {
            Some(path) => {
                info!("Loading prompts from: {}", path);
                prompt::load_prompts(path)?
            }
            None => Arc::new(PromptConfig::default()),
        };

        let store: Arc<dyn SnapshotStore> = Arc::new(
            FileSnapshotStore::new(&args.analytics_dir, &args.analytics_key)
        );
        let aggregator = UsageAggregator::new(store).shared();

        let agent = Self::new(
            source,
            credentials,
            prompt_config,
            aggregator.clone(),
            chat_config.temperature
        );
        Ok((agent, aggregator))
    }

    /// A copy of this agent whose credential selections stay local to one connection.
    pub fn for_connection(&self) -> Self {
        let mut agent = self.clone();
        agent.credentials = Arc::new(SessionCredential::new(Arc::clone(&self.credentials)));
        agent
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialGate> {
        &self.credentials
    }

    pub fn prompt_config(&self) -> &Arc<PromptConfig> {
        &self.prompt_config
    }

    pub fn new_session(&self) -> ChatSession {
        ChatSession::new(&self.prompt_config.greeting)
    }

    /// Starts a turn on `session` and returns its event stream. The caller feeds every
    /// event back through [`ChatSession::apply`].
    pub fn submit(
        &self,
        session: &mut ChatSession,
        prompt_text: &str
    ) -> Result<TurnStream, SessionError> {
        session.begin_turn(prompt_text)?;
        Ok(self.run_turn(prompt_text, session.document()))
    }

    /// Runs one turn: an `Update` per fragment, then exactly one terminal event.
    ///
    /// The submission event fires before anything else and the outcome event fires
    /// before the terminal event is delivered. There are no retries.
    pub fn run_turn(&self, prompt_text: &str, document: Option<&ContextDocument>) -> TurnStream {
        let request = CompletionRequest {
            model: self.model.clone(),
            system_instruction: self.prompt_config.system_instruction.clone(),
            temperature: self.temperature,
            prompt: prompt::build_effective_prompt(&self.prompt_config, prompt_text, document),
        };
        let query = prompt_text.to_string();
        let agent = self.clone();

        create_streaming_response(move |tx| async move {
            agent.observer.on_submission(&query).await;

            let terminal = agent.drive(&request, &tx).await;

            agent.observer.on_outcome(terminal.succeeded()).await;
            if tx.send(terminal).await.is_err() {
                warn!("Turn consumer went away before the final event");
            }
        })
    }

    async fn drive(&self, request: &CompletionRequest, tx: &mpsc::Sender<TurnEvent>) -> TurnEvent {
        let Some(api_key) = self.credentials.api_key().await else {
            info!("No credential available; completion not attempted");
            return TurnEvent::failed(TurnError::CredentialMissing);
        };

        match self.source.stream_completion(request, &api_key).await {
            Ok(fragments) => turn::accumulate(fragments, tx).await,
            Err(failure) => {
                let error = turn::classify(&failure);
                error!("Completion request failed as {:?}: {}", error, failure);
                TurnEvent::failed(error)
            }
        }
    }
}
