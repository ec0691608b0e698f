//! Session binding: keeping state machines alive across requests
//!
//! A redirect-based handshake spans several independent HTTP requests. The
//! state machine that started it is parked in a per-browser-session store
//! under a typed [`SessionBindingKey`] and picked up again when the browser
//! comes back.
//!
//! Values are held as `Arc<tokio::sync::Mutex<T>>`: every request of one
//! browser session locks its own state machine for the duration of the
//! request, so duplicate tabs cannot interleave their updates.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::consumer::ConsumerSession;
use crate::provider::ProviderSession;

/// Identifier of one browser session (typically the session cookie value)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionScope(String);

impl SessionScope {
    /// Wrap an existing browser session identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random scope
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// The identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type-erased value kept in a [`SessionStore`]
pub type SessionValue = Arc<dyn Any + Send + Sync>;

/// Per-browser-session storage provided by the host environment
#[async_trait]
pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Value bound under `key` for `scope`
    async fn get(&self, scope: &SessionScope, key: &'static str) -> Option<SessionValue>;

    /// Bind `value` under `key` for `scope`, replacing any previous value
    async fn set(&self, scope: &SessionScope, key: &'static str, value: SessionValue);

    /// Bind `value` unless something is already bound; returns the bound value
    async fn get_or_insert(
        &self,
        scope: &SessionScope,
        key: &'static str,
        value: SessionValue,
    ) -> SessionValue;

    /// Remove the value bound under `key` for `scope`
    async fn remove(&self, scope: &SessionScope, key: &'static str);
}

/// Typed key into a [`SessionStore`]
pub struct SessionBindingKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

/// Where a [`ConsumerSession`] waits for the provider's answer
pub const CONSUMER_SESSION: SessionBindingKey<ConsumerSession> =
    SessionBindingKey::new("openid2.consumer_session");

/// Where a [`ProviderSession`] lives between entry-point requests
pub const PROVIDER_SESSION: SessionBindingKey<ProviderSession> =
    SessionBindingKey::new("openid2.provider_session");

impl<T> SessionBindingKey<T> {
    /// Create a key with a unique name
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Key name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: Send + 'static> SessionBindingKey<T> {
    /// The value bound for `scope`, if any
    pub async fn get(
        &self,
        store: &dyn SessionStore,
        scope: &SessionScope,
    ) -> Option<Arc<Mutex<T>>> {
        store.get(scope, self.name).await.and_then(downcast)
    }

    /// Bind `value` for `scope`
    pub async fn bind(&self, store: &dyn SessionStore, scope: &SessionScope, value: Arc<Mutex<T>>) {
        debug!(key = self.name, %scope, "binding session");
        store.set(scope, self.name, value).await;
    }

    /// Unbind whatever is bound for `scope`
    pub async fn clear(&self, store: &dyn SessionStore, scope: &SessionScope) {
        debug!(key = self.name, %scope, "clearing session");
        store.remove(scope, self.name).await;
    }

    /// The bound value, or a new one created by `init` and bound
    ///
    /// If another request binds a value while `init` runs, that value wins
    /// and the freshly created one is dropped.
    ///
    /// # Errors
    ///
    /// Propagates the error of `init`; nothing is bound in that case.
    pub async fn get_or_try_insert<F, Fut, E>(
        &self,
        store: &dyn SessionStore,
        scope: &SessionScope,
        init: F,
    ) -> Result<Arc<Mutex<T>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(existing) = self.get(store, scope).await {
            return Ok(existing);
        }
        let created = Arc::new(Mutex::new(init().await?));
        let bound = store.get_or_insert(scope, self.name, created.clone()).await;
        // A value of the wrong type under our key is replaced
        match downcast(bound) {
            Some(value) => Ok(value),
            None => {
                store.set(scope, self.name, created.clone()).await;
                Ok(created)
            }
        }
    }
}

impl<T> Clone for SessionBindingKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SessionBindingKey<T> {}

impl<T> fmt::Debug for SessionBindingKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionBindingKey").field(&self.name).finish()
    }
}

fn downcast<T: Send + 'static>(value: SessionValue) -> Option<Arc<Mutex<T>>> {
    value.downcast::<Mutex<T>>().ok()
}

#[derive(Debug)]
struct ScopeEntry {
    values: DashMap<&'static str, SessionValue>,
    last_access: Mutex<Instant>,
}

impl ScopeEntry {
    fn new() -> Self {
        Self {
            values: DashMap::new(),
            last_access: Mutex::new(Instant::now()),
        }
    }
}

/// In-memory session store with idle expiry
///
/// A scope untouched for longer than the idle timeout is dropped by
/// [`MemorySessionStore::expire_idle`], the way a browser session times out.
#[derive(Debug)]
pub struct MemorySessionStore {
    scopes: DashMap<SessionScope, Arc<ScopeEntry>>,
    idle_timeout: Duration,
}

impl MemorySessionStore {
    /// Create a store expiring scopes idle for `idle_timeout`
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            scopes: DashMap::new(),
            idle_timeout,
        }
    }

    async fn touch(&self, scope: &SessionScope) -> Arc<ScopeEntry> {
        let entry = self
            .scopes
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(ScopeEntry::new()))
            .clone();
        *entry.last_access.lock().await = Instant::now();
        entry
    }

    /// Drop every value bound for `scope`
    pub fn invalidate(&self, scope: &SessionScope) {
        self.scopes.remove(scope);
    }

    /// Drop scopes idle for longer than the timeout, returning them
    pub async fn expire_idle(&self) -> Vec<SessionScope> {
        let entries: Vec<(SessionScope, Arc<ScopeEntry>)> = self
            .scopes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut expired = Vec::new();
        for (scope, entry) in entries {
            if entry.last_access.lock().await.elapsed() > self.idle_timeout {
                self.scopes.remove(&scope);
                expired.push(scope);
            }
        }
        if !expired.is_empty() {
            debug!(expired = expired.len(), "expired idle browser sessions");
        }
        expired
    }

    /// Number of live scopes
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Whether no scope is live
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(30 * 60))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, scope: &SessionScope, key: &'static str) -> Option<SessionValue> {
        let entry = self.scopes.get(scope)?.clone();
        *entry.last_access.lock().await = Instant::now();
        entry.values.get(key).map(|v| v.clone())
    }

    async fn set(&self, scope: &SessionScope, key: &'static str, value: SessionValue) {
        self.touch(scope).await.values.insert(key, value);
    }

    async fn get_or_insert(
        &self,
        scope: &SessionScope,
        key: &'static str,
        value: SessionValue,
    ) -> SessionValue {
        self.touch(scope).await.values.entry(key).or_insert(value).clone()
    }

    async fn remove(&self, scope: &SessionScope, key: &'static str) {
        if let Some(entry) = self.scopes.get(scope).map(|e| e.clone()) {
            entry.values.remove(key);
        }
    }
}
