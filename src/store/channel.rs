//! Publish/subscribe channel seam.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Listener, SubscriptionId};
use crate::error::StoreError;

/// Named broadcast topic; every subscriber on every node receives every message.
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    fn publish(&self, message: Bytes) -> Result<(), StoreError>;

    fn subscribe(&self, listener: Listener<Bytes>) -> Result<SubscriptionId, StoreError>;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// JSON codec over a [`Channel`].
///
/// Messages that fail to decode are logged and dropped.
pub struct TypedChannel<M> {
    inner: Arc<dyn Channel>,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for TypedChannel<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<M> TypedChannel<M>
where
    M: Serialize + DeserializeOwned + 'static,
{
    pub fn new(inner: Arc<dyn Channel>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn publish(&self, message: &M) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(message)?;
        self.inner.publish(Bytes::from(bytes))
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(M) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, StoreError> {
        let channel: Arc<str> = Arc::from(self.inner.name());
        self.inner.subscribe(Arc::new(move |bytes: &Bytes| {
            match serde_json::from_slice::<M>(bytes) {
                Ok(message) => listener(message),
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "dropping undecodable message")
                }
            }
        }))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id);
    }
}
