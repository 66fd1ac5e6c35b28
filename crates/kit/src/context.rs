//! Per-call value carrier threaded through hooks, decoder, handler and encoder.
//!
//! A [`Context`] is immutable: adding a value returns a child context that points at its
//! parent, and lookups walk from the child up through its ancestors. Cloning is a pointer
//! copy, so hooks can freely take and return contexts by value.
//!
//! The transport may attach a [`CancellationToken`] or a deadline. The pipeline threads
//! them through unchanged; enforcing them is up to the transport and the user code.

use http::HeaderMap;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Response headers as seen by the writer when the call finished, set for finalizers.
pub const RESPONSE_HEADERS: ContextKey<HeaderMap> = ContextKey::new("response-headers");

/// Number of body bytes actually written to the transport, set for finalizers.
pub const RESPONSE_SIZE: ContextKey<u64> = ContextKey::new("response-size");

const CANCELLATION: ContextKey<CancellationToken> = ContextKey::new("cancellation");
const DEADLINE: ContextKey<Instant> = ContextKey::new("deadline");

/// A typed key into a [`Context`].
///
/// Two keys match when both the name and the value type are equal.
///
/// # Example
/// ```
/// use micro_kit::context::{Context, ContextKey};
///
/// const TENANT: ContextKey<String> = ContextKey::new("tenant");
///
/// let ctx = Context::new().with_value(&TENANT, "acme".to_string());
/// assert_eq!(ctx.value(&TENANT).map(String::as_str), Some("acme"));
/// ```
pub struct ContextKey<T> {
    name: &'static str,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self { name, _phantom: PhantomData }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

struct Node {
    parent: Option<Arc<Node>>,
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

/// Immutable key/value carrier with ancestor lookup.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Node>>,
}

impl Context {
    /// An empty context with no values and no transport signals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a child context holding `value` under `key`; `self` is left untouched.
    #[must_use]
    pub fn with_value<T>(&self, key: &ContextKey<T>, value: T) -> Context
    where
        T: Send + Sync + 'static,
    {
        let node = Node { parent: self.head.clone(), name: key.name, value: Arc::new(value) };
        Context { head: Some(Arc::new(node)) }
    }

    /// Looks `key` up in this context, then in its ancestors. The nearest match wins.
    pub fn value<T: 'static>(&self, key: &ContextKey<T>) -> Option<&T> {
        let mut current = self.head.as_deref();
        while let Some(node) = current {
            if node.name == key.name {
                if let Some(value) = node.value.downcast_ref::<T>() {
                    return Some(value);
                }
            }
            current = node.parent.as_deref();
        }
        None
    }

    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Context {
        self.with_value(&CANCELLATION, token)
    }

    pub fn cancellation_token(&self) -> Option<&CancellationToken> {
        self.value(&CANCELLATION)
    }

    /// `true` once the transport cancelled the call. A context without a token is never
    /// cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token().is_some_and(CancellationToken::is_cancelled)
    }

    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        self.with_value(&DEADLINE, deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.value(&DEADLINE).copied()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = vec![];
        let mut current = self.head.as_deref();
        while let Some(node) = current {
            keys.push(node.name);
            current = node.parent.as_deref();
        }
        f.debug_struct("Context").field("keys", &keys).finish()
    }
}
