use crate::infrastructure::storage::KeyValueStorage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

type Subscriber<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Holds one state blob in memory and writes the whole of it back to a single
/// storage key after every mutation.
///
/// Loading falls back to `T::default()` when the key is missing or the stored
/// JSON does not parse; a malformed blob is discarded, never partially applied.
/// Write failures are logged and the in-memory state stays authoritative.
pub struct PersistentStore<T> {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    state: T,
    subscribers: Vec<Subscriber<T>>,
}

impl<T> PersistentStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn load(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        let key = key.into();
        let state = match storage.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(state) => state,
                Err(error) => {
                    tracing::warn!(key = %key, %error, "discarding malformed stored state");
                    T::default()
                }
            },
            Ok(None) => T::default(),
            Err(error) => {
                tracing::warn!(key = %key, %error, "failed reading stored state; using defaults");
                T::default()
            }
        };

        Self {
            storage,
            key,
            state,
            subscribers: Vec::new(),
        }
    }

    pub fn state(&self) -> &T {
        &self.state
    }

    /// Applies `change`, then persists and notifies subscribers.
    pub fn mutate<R>(&mut self, change: impl FnOnce(&mut T) -> R) -> R {
        let result = change(&mut self.state);
        self.persist();
        for subscriber in &self.subscribers {
            subscriber(&self.state);
        }
        result
    }

    pub fn subscribe(&mut self, subscriber: impl Fn(&T) + Send + Sync + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    fn persist(&self) {
        let payload = match serde_json::to_string(&self.state) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(key = %self.key, %error, "failed serializing state");
                return;
            }
        };
        if let Err(error) = self.storage.set(&self.key, &payload) {
            tracing::error!(key = %self.key, %error, "failed writing state; keeping in-memory copy");
        }
    }
}
