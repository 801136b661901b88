use async_trait::async_trait;
use log::info;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Resolves whether a usable API key is available to the completion source.
#[async_trait]
pub trait CredentialGate: Send + Sync {
    async fn api_key(&self) -> Option<String>;

    async fn has_credential(&self) -> bool {
        self.api_key().await.is_some()
    }

    /// Records the user's selection. Completion is treated as success; the key is
    /// only validated by the next remote call.
    async fn request_credential(&self, selection: Option<String>);
}

/// In-process credential slot seeded from configuration and replaced on selection.
pub struct SharedCredential {
    key: RwLock<Option<String>>,
}

fn normalize(key: Option<String>) -> Option<String> {
    key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

impl SharedCredential {
    pub fn new(initial: Option<String>) -> Self {
        Self { key: RwLock::new(normalize(initial)) }
    }

    pub fn empty() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl CredentialGate for SharedCredential {
    async fn api_key(&self) -> Option<String> {
        self.key.read().await.clone()
    }

    async fn request_credential(&self, selection: Option<String>) {
        let selection = normalize(selection);
        if selection.is_some() {
            info!("API key selected");
        } else {
            info!("API key selection cleared");
        }
        *self.key.write().await = selection;
    }
}

/// Credential scoped to one client connection.
///
/// A selection only affects this connection. Without one, or after a blank
/// selection, the configured gate answers.
pub struct SessionCredential {
    selected: RwLock<Option<String>>,
    fallback: Arc<dyn CredentialGate>,
}

impl SessionCredential {
    pub fn new(fallback: Arc<dyn CredentialGate>) -> Self {
        Self { selected: RwLock::new(None), fallback }
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialGate for SessionCredential {
    async fn api_key(&self) -> Option<String> {
        if let Some(key) = self.selected.read().await.clone() {
            return Some(key);
        }
        self.fallback.api_key().await
    }

    async fn request_credential(&self, selection: Option<String>) {
        let selection = normalize(selection);
        if selection.is_some() {
            info!("API key selected for this connection");
        } else {
            info!("Connection API key cleared; using configured key");
        }
        *self.selected.write().await = selection;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blank_keys_are_not_credentials() {
        let gate = SharedCredential::new(Some("   ".to_string()));
        assert!(!gate.has_credential().await);
    }

    #[tokio::test]
    async fn selection_replaces_previous_key() {
        let gate = SharedCredential::new(Some("old".to_string()));
        gate.request_credential(Some(" new-key ".to_string())).await;
        assert_eq!(gate.api_key().await.as_deref(), Some("new-key"));

        gate.request_credential(None).await;
        assert!(!gate.has_credential().await);
    }

    #[tokio::test]
    async fn session_selection_stays_local() {
        let configured: Arc<dyn CredentialGate> = Arc::new(SharedCredential::new(Some("server".into())));
        let first = SessionCredential::new(configured.clone());
        let second = SessionCredential::new(configured.clone());

        first.request_credential(Some("mine".into())).await;
        assert_eq!(first.api_key().await.as_deref(), Some("mine"));
        assert_eq!(second.api_key().await.as_deref(), Some("server"));
        assert_eq!(configured.api_key().await.as_deref(), Some("server"));

        first.request_credential(Some("".into())).await;
        assert_eq!(first.api_key().await.as_deref(), Some("server"));
    }

    #[tokio::test]
    async fn session_without_configured_key_has_none() {
        let gate = SessionCredential::new(Arc::new(SharedCredential::empty()));
        assert!(!gate.has_credential().await);
        gate.request_credential(Some("picked".into())).await;
        assert!(gate.has_credential().await);
    }
}
