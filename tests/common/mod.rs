#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };

use insight_agent::agent::{ InsightAgent, TurnObserver };
use insight_agent::config::prompt::PromptConfig;
use insight_agent::credential::{ CredentialGate, SharedCredential };
use insight_agent::llm::chat::{ CompletionSource, FragmentStream };
use insight_agent::llm::{ CompletionFailure, CompletionRequest };

/// What the scripted source does on every call.
#[derive(Clone)]
pub enum Script {
    Fragments(Vec<Result<String, CompletionFailure>>),
    Reject(CompletionFailure),
}

impl Script {
    pub fn text(parts: &[&str]) -> Self {
        Script::Fragments(
            parts
                .iter()
                .map(|p| Ok(p.to_string()))
                .collect()
        )
    }
}

pub struct ScriptedSource {
    script: Script,
    calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
    last_api_key: Mutex<Option<String>>,
}

impl ScriptedSource {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            last_api_key: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().unwrap().clone()
    }

    pub fn last_api_key(&self) -> Option<String> {
        self.last_api_key.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionSource for ScriptedSource {
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        api_key: &str
    ) -> Result<FragmentStream, CompletionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        *self.last_api_key.lock().unwrap() = Some(api_key.to_string());
        match &self.script {
            Script::Fragments(items) => Ok(Box::pin(stream::iter(items.clone()))),
            Script::Reject(failure) => Err(failure.clone()),
        }
    }

    fn get_model(&self) -> String {
        "scripted-model".to_string()
    }
}

#[derive(Default)]
pub struct CountingObserver {
    pub submissions: Mutex<Vec<String>>,
    pub outcomes: Mutex<Vec<bool>>,
}

impl CountingObserver {
    pub fn submissions(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn outcomes(&self) -> Vec<bool> {
        self.outcomes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TurnObserver for CountingObserver {
    async fn on_submission(&self, query: &str) {
        self.submissions.lock().unwrap().push(query.to_string());
    }

    async fn on_outcome(&self, succeeded: bool) {
        self.outcomes.lock().unwrap().push(succeeded);
    }
}

pub fn credential(key: Option<&str>) -> Arc<dyn CredentialGate> {
    Arc::new(SharedCredential::new(key.map(str::to_string)))
}

pub fn agent_with(
    source: Arc<ScriptedSource>,
    credentials: Arc<dyn CredentialGate>,
    observer: Arc<dyn TurnObserver>
) -> InsightAgent {
    InsightAgent::new(source, credentials, Arc::new(PromptConfig::default()), observer, 0.7)
}
