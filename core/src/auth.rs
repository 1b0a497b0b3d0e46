/// Bearer-credential seam.
///
/// The client never issues, refreshes, or validates tokens; it only reads
/// the current one at connect time and clears the store when the server
/// rejects it, so the owning side can route the user back through login.
use std::sync::RwLock;

pub trait TokenStore: Send + Sync {
    /// Current bearer token, if any.
    fn token(&self) -> Option<String>;

    /// Drop the stored token. Called when the server reports an
    /// authentication failure.
    fn clear(&self);
}

/// Process-local token holder for tests and the terminal client.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap() = Some(token.into());
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }

    fn clear(&self) {
        *self.token.write().unwrap() = None;
    }
}
