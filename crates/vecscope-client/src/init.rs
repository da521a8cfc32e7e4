//! Bounded client initialization.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};
use vecscope_common::{Result, ScopeError};

use crate::backend::NamespaceClient;

/// Builds a backend client for a connection.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, connection_id: &str) -> Result<Arc<dyn NamespaceClient>>;
}

/// Lazily creates the backend client, giving up after a fixed number of
/// failed attempts until [`reset`](ClientInitializer::reset) is called.
pub struct ClientInitializer {
    connection_id: String,
    factory: Arc<dyn ClientFactory>,
    max_attempts: u32,
    state: Mutex<InitState>,
}

#[derive(Default)]
struct InitState {
    client: Option<Arc<dyn NamespaceClient>>,
    attempts: u32,
    last_error: Option<ScopeError>,
}

impl ClientInitializer {
    pub fn new(connection_id: impl Into<String>, factory: Arc<dyn ClientFactory>, max_attempts: u32) -> Self {
        Self {
            connection_id: connection_id.into(),
            factory,
            max_attempts: max_attempts.max(1),
            state: Mutex::new(InitState::default()),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Return the client, making one connection attempt if there is none yet.
    pub async fn get_or_init(&self) -> Result<Arc<dyn NamespaceClient>> {
        let mut state = self.state.lock().await;
        if let Some(client) = &state.client {
            return Ok(client.clone());
        }

        if state.attempts >= self.max_attempts {
            let cause = state
                .last_error
                .as_ref()
                .map(|e| e.message())
                .unwrap_or_default();
            return Err(ScopeError::Initialization(format!(
                "gave up connecting to '{}' after {} attempts ({cause}); reset to try again",
                self.connection_id, state.attempts
            )));
        }

        state.attempts += 1;
        match self.factory.connect(&self.connection_id).await {
            Ok(client) => {
                info!(connection = %self.connection_id, attempt = state.attempts, "Client initialized");
                state.client = Some(client.clone());
                state.attempts = 0;
                state.last_error = None;
                Ok(client)
            }
            Err(e) => {
                warn!(
                    connection = %self.connection_id,
                    attempt = state.attempts,
                    max = self.max_attempts,
                    "Client initialization failed: {e}"
                );
                let message = format!(
                    "attempt {}/{} to connect to '{}' failed: {}",
                    state.attempts,
                    self.max_attempts,
                    self.connection_id,
                    e.message()
                );
                state.last_error = Some(e);
                Err(ScopeError::Initialization(message))
            }
        }
    }

    /// Forget the client and the failure count.
    pub async fn reset(&self) {
        *self.state.lock().await = InitState::default();
    }

    pub async fn attempts(&self) -> u32 {
        self.state.lock().await.attempts
    }

    pub async fn is_ready(&self) -> bool {
        self.state.lock().await.client.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` connects, then succeeds.
    struct FlakyFactory {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ClientFactory for FlakyFactory {
        async fn connect(&self, _connection_id: &str) -> Result<Arc<dyn NamespaceClient>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(ScopeError::Network("connection refused".into()))
            } else {
                Ok(Arc::new(MemoryBackend::new()))
            }
        }
    }

    fn initializer(failures: u32) -> (ClientInitializer, Arc<FlakyFactory>) {
        let factory = Arc::new(FlakyFactory {
            failures,
            calls: AtomicU32::new(0),
        });
        (ClientInitializer::new("local", factory.clone(), 3), factory)
    }

    #[tokio::test]
    async fn test_succeeds_within_limit() {
        let (init, factory) = initializer(2);
        assert!(init.get_or_init().await.is_err());
        assert!(init.get_or_init().await.is_err());
        assert!(init.get_or_init().await.is_ok());
        assert!(init.is_ready().await);

        // cached
        assert!(init.get_or_init().await.is_ok());
        assert_eq!(factory.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_refuses_after_limit_until_reset() {
        let (init, factory) = initializer(3);
        for _ in 0..3 {
            assert!(init.get_or_init().await.is_err());
        }

        let err = init.get_or_init().await.err().expect("refused");
        assert_eq!(err.kind(), "initialization_error");
        assert!(err.message().contains("connection refused"));
        assert_eq!(factory.calls.load(Ordering::SeqCst), 3);

        init.reset().await;
        assert_eq!(init.attempts().await, 0);
        assert!(init.get_or_init().await.is_ok());
        assert_eq!(factory.calls.load(Ordering::SeqCst), 4);
    }
}
