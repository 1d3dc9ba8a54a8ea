use crate::error::Result;
use crate::llm::LlmMessage;
use crate::mcp::{LarkMcpLauncher, McpClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const LOGIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Opens an MCP session, acting as the user when a token is given.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self, user_access_token: Option<&str>) -> Result<McpClient>;
}

#[async_trait]
impl McpConnector for LarkMcpLauncher {
    async fn connect(&self, user_access_token: Option<&str>) -> Result<McpClient> {
        match user_access_token {
            Some(token) => self.clone().with_user_access_token(token).spawn().await,
            None => self.spawn().await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Everything the bot remembers about one user.
#[derive(Default)]
pub struct UserContext {
    pub messages: Vec<LlmMessage>,
    pub auth_token: Option<AuthToken>,
    pub mcp_client: Option<Arc<McpClient>>,
}

/// Per-user contexts, keyed by open id. Contexts live for the life of the
/// process.
pub struct ContextStore {
    users: Mutex<HashMap<String, Arc<Mutex<UserContext>>>>,
    connector: Arc<dyn McpConnector>,
}

impl ContextStore {
    pub fn new(connector: Arc<dyn McpConnector>) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            connector,
        }
    }

    pub async fn get_or_create(&self, user_id: &str) -> Arc<Mutex<UserContext>> {
        let mut users = self.users.lock().await;
        users.entry(user_id.to_string()).or_default().clone()
    }

    pub async fn messages(&self, user_id: &str) -> Vec<LlmMessage> {
        self.get_or_create(user_id).await.lock().await.messages.clone()
    }

    pub async fn add_messages(&self, user_id: &str, messages: Vec<LlmMessage>) {
        self.get_or_create(user_id).await.lock().await.messages.extend(messages);
    }

    pub async fn clear_messages(&self, user_id: &str) {
        self.get_or_create(user_id).await.lock().await.messages.clear();
    }

    pub async fn is_logged_in(&self, user_id: &str) -> bool {
        self.get_or_create(user_id).await.lock().await.auth_token.is_some()
    }

    /// Store the user's token. The current MCP session is closed so the next
    /// run reconnects with the new token.
    pub async fn set_auth_token(&self, user_id: &str, token: AuthToken) {
        let context = self.get_or_create(user_id).await;
        let mut context = context.lock().await;
        context.auth_token = Some(token);
        if let Some(client) = context.mcp_client.take() {
            if let Err(e) = client.close().await {
                warn!(user_id, "Failed to close MCP client: {}", e);
            }
        }
        info!(user_id, "User logged in");
    }

    /// Poll until the user has a token. Returns false on timeout.
    pub async fn wait_login(&self, user_id: &str, timeout: Duration, poll: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_logged_in(user_id).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// The user's MCP session, opened on first use.
    ///
    /// The context is not locked while the server starts. A session opened
    /// with a token that was replaced in the meantime is closed and opened
    /// again.
    pub async fn mcp_client(&self, user_id: &str) -> Result<Arc<McpClient>> {
        let context = self.get_or_create(user_id).await;
        loop {
            let token = {
                let context = context.lock().await;
                if let Some(client) = &context.mcp_client {
                    return Ok(client.clone());
                }
                context.auth_token.as_ref().map(|t| t.access_token.clone())
            };

            let client = Arc::new(self.connector.connect(token.as_deref()).await?);

            let mut context = context.lock().await;
            let current = context.auth_token.as_ref().map(|t| t.access_token.clone());
            let stale = current != token;
            let existing = context.mcp_client.clone();
            if existing.is_none() && !stale {
                context.mcp_client = Some(client.clone());
                return Ok(client);
            }
            drop(context);

            if let Err(e) = client.close().await {
                warn!(user_id, "Failed to close MCP client: {}", e);
            }
            if let Some(existing) = existing.filter(|_| !stale) {
                return Ok(existing);
            }
            info!(user_id, "Token changed while connecting, reconnecting");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::LarkBotError;
    use crate::mcp::client::tests::{sample_tools, MockTransport};
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;

    /// Connects to an in-memory MCP server and records the tokens it was given.
    pub(crate) struct MockConnector {
        pub tokens: StdMutex<Vec<Option<String>>>,
        tools: Value,
        failure: Option<String>,
        delay: Duration,
    }

    impl MockConnector {
        pub(crate) fn with_tools(tools: Value) -> Self {
            Self {
                tokens: StdMutex::new(Vec::new()),
                tools,
                failure: None,
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                failure: Some(message.to_string()),
                ..Self::default()
            }
        }
    }

    impl Default for MockConnector {
        fn default() -> Self {
            Self::with_tools(sample_tools())
        }
    }

    #[async_trait]
    impl McpConnector for MockConnector {
        async fn connect(&self, user_access_token: Option<&str>) -> Result<McpClient> {
            self.tokens.lock().unwrap().push(user_access_token.map(String::from));
            tokio::time::sleep(self.delay).await;
            if let Some(message) = &self.failure {
                return Err(LarkBotError::TransportError(message.clone()));
            }
            McpClient::connect(Box::new(MockTransport::new(self.tools.clone()))).await
        }
    }

    pub(crate) fn token(value: &str) -> AuthToken {
        AuthToken {
            access_token: value.to_string(),
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::hours(2),
        }
    }

    fn store() -> (Arc<MockConnector>, ContextStore) {
        let connector = Arc::new(MockConnector::default());
        (connector.clone(), ContextStore::new(connector))
    }

    #[tokio::test]
    async fn test_messages_are_per_user() {
        let (_, store) = store();
        store.add_messages("ou_1", vec![LlmMessage::user("hi")]).await;
        store.add_messages("ou_2", vec![LlmMessage::user("yo")]).await;
        store.add_messages("ou_1", vec![LlmMessage::assistant("hello")]).await;

        assert_eq!(store.messages("ou_1").await.len(), 2);
        assert_eq!(store.messages("ou_2").await.len(), 1);

        store.clear_messages("ou_1").await;
        assert!(store.messages("ou_1").await.is_empty());
        assert_eq!(store.messages("ou_2").await.len(), 1);
    }

    #[tokio::test]
    async fn test_mcp_client_is_reused_until_login() {
        let (connector, store) = store();

        let first = store.mcp_client("ou_1").await.unwrap();
        let second = store.mcp_client("ou_1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        store.set_auth_token("ou_1", token("u-1")).await;
        store.mcp_client("ou_1").await.unwrap();

        assert_eq!(*connector.tokens.lock().unwrap(), vec![None, Some("u-1".to_string())]);
    }

    #[tokio::test]
    async fn test_wait_login_times_out() {
        let (_, store) = store();
        let logged_in = store
            .wait_login("ou_1", Duration::from_millis(30), Duration::from_millis(10))
            .await;
        assert!(!logged_in);
    }

    #[tokio::test]
    async fn test_wait_login_sees_token() {
        let (_, store) = store();
        let store = Arc::new(store);

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .wait_login("ou_1", Duration::from_secs(5), Duration::from_millis(10))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.set_auth_token("ou_1", token("u-1")).await;

        assert!(waiter.await.unwrap());
        assert!(store.is_logged_in("ou_1").await);
    }

    #[tokio::test]
    async fn test_slow_connect_does_not_block_user_context() {
        let store = Arc::new(ContextStore::new(Arc::new(MockConnector::slow(
            Duration::from_millis(300),
        ))));
        let connecting = {
            let store = store.clone();
            tokio::spawn(async move { store.mcp_client("ou_1").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cleared = tokio::time::timeout(Duration::from_millis(100), store.clear_messages("ou_1")).await;

        assert!(cleared.is_ok());
        connecting.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_login_during_connect_reconnects_with_new_token() {
        let connector = Arc::new(MockConnector::slow(Duration::from_millis(100)));
        let store = Arc::new(ContextStore::new(connector.clone()));
        let connecting = {
            let store = store.clone();
            tokio::spawn(async move { store.mcp_client("ou_1").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.set_auth_token("ou_1", token("u-1")).await;

        connecting.await.unwrap().unwrap();

        assert_eq!(*connector.tokens.lock().unwrap(), vec![None, Some("u-1".to_string())]);
        let first = store.mcp_client("ou_1").await.unwrap();
        let again = store.mcp_client("ou_1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }
}
