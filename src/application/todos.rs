use crate::application::clock::{advance_timestamp, next_id, system_clock, NowProvider};
use crate::domain::models::{Item, ItemPatch, NewItem};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistent_store::PersistentStore;
use crate::infrastructure::storage::KeyValueStorage;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

pub const TODOS_KEY: &str = "todos:v1";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoState {
    pub items: HashMap<String, Item>,
    pub order: Vec<String>,
}

impl TodoState {
    /// Restores `order` to a permutation of the item ids: drops unknown and
    /// repeated ids, then appends unlisted items by creation time.
    fn normalize(&mut self) {
        let mut seen = HashSet::new();
        let items = &self.items;
        self.order
            .retain(|id| items.contains_key(id) && seen.insert(id.clone()));

        let mut missing = self
            .items
            .values()
            .filter(|item| !seen.contains(&item.id))
            .collect::<Vec<_>>();
        missing.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        let missing_ids = missing.into_iter().map(|item| item.id.clone()).collect::<Vec<_>>();
        self.order.extend(missing_ids);
    }
}

pub struct TodoStore {
    store: Mutex<PersistentStore<TodoState>>,
    now_provider: NowProvider,
}

impl TodoStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        let mut store = PersistentStore::<TodoState>::load(storage, TODOS_KEY);
        let needs_repair = {
            let mut repaired = store.state().clone();
            repaired.normalize();
            repaired != *store.state()
        };
        if needs_repair {
            tracing::warn!("todo order did not match items; repairing");
            store.mutate(TodoState::normalize);
        }

        Self {
            store: Mutex::new(store),
            now_provider: system_clock(),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, PersistentStore<TodoState>>, InfraError> {
        self.store
            .lock()
            .map_err(|error| InfraError::StateUnavailable(format!("todo store lock poisoned: {error}")))
    }

    /// Registers an observer that receives the whole state after every change.
    /// Observers run under the store lock and must not call back into the store.
    pub fn subscribe(
        &self,
        subscriber: impl Fn(&TodoState) + Send + Sync + 'static,
    ) -> Result<(), InfraError> {
        self.lock()?.subscribe(subscriber);
        Ok(())
    }

    pub fn create(&self, new_item: NewItem) -> Result<Item, InfraError> {
        let now = (self.now_provider)();
        let item = Item {
            id: next_id("tsk"),
            title: new_item.title.trim().to_string(),
            notes: new_item
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            done: false,
            created_at: now,
            updated_at: now,
            priority: new_item.priority.unwrap_or_default(),
            due: new_item.due,
        };
        item.validate().map_err(InfraError::InvalidInput)?;

        self.lock()?.mutate(|state| {
            state.order.push(item.id.clone());
            state.items.insert(item.id.clone(), item.clone());
        });

        tracing::info!(task_id = %item.id, "created task");
        Ok(item)
    }

    pub fn get(&self, id: &str) -> Result<Option<Item>, InfraError> {
        Ok(self.lock()?.state().items.get(id).cloned())
    }

    pub fn list(&self) -> Result<Vec<Item>, InfraError> {
        let store = self.lock()?;
        let state = store.state();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.items.get(id).cloned())
            .collect())
    }

    pub fn order(&self) -> Result<Vec<String>, InfraError> {
        Ok(self.lock()?.state().order.clone())
    }

    /// Flips `done`; `None` when the id is unknown.
    pub fn toggle(&self, id: &str) -> Result<Option<Item>, InfraError> {
        let mut store = self.lock()?;
        if !store.state().items.contains_key(id) {
            return Ok(None);
        }

        let now = (self.now_provider)();
        let toggled = store.mutate(|state| {
            state.items.get_mut(id).map(|item| {
                item.done = !item.done;
                item.updated_at = advance_timestamp(item.updated_at, now);
                item.clone()
            })
        });
        if let Some(item) = toggled.as_ref() {
            tracing::debug!(task_id = %item.id, done = item.done, "toggled task");
        }
        Ok(toggled)
    }

    pub fn update(&self, id: &str, patch: ItemPatch) -> Result<Option<Item>, InfraError> {
        let mut store = self.lock()?;
        let Some(mut item) = store.state().items.get(id).cloned() else {
            return Ok(None);
        };

        if let Some(title) = patch.title {
            item.title = title.trim().to_string();
        }
        if let Some(notes) = patch.notes {
            item.notes = notes
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
        }
        if let Some(done) = patch.done {
            item.done = done;
        }
        if let Some(priority) = patch.priority {
            item.priority = priority;
        }
        if let Some(due) = patch.due {
            item.due = due;
        }
        item.updated_at = advance_timestamp(item.updated_at, (self.now_provider)());
        item.validate().map_err(InfraError::InvalidInput)?;

        store.mutate(|state| {
            state.items.insert(item.id.clone(), item.clone());
        });
        tracing::info!(task_id = id, "updated task");
        Ok(Some(item))
    }

    /// Deletes the item and its order entry together.
    pub fn remove(&self, id: &str) -> Result<bool, InfraError> {
        let mut store = self.lock()?;
        if !store.state().items.contains_key(id) {
            return Ok(false);
        }

        store.mutate(|state| {
            state.items.remove(id);
            state.order.retain(|candidate| candidate != id);
        });
        tracing::info!(task_id = id, "deleted task");
        Ok(true)
    }

    /// Moves the element at `from` to `to`. Out-of-range indices are ignored
    /// and reported as `false`.
    pub fn reorder(&self, from: usize, to: usize) -> Result<bool, InfraError> {
        let mut store = self.lock()?;
        let len = store.state().order.len();
        if from >= len || to >= len {
            return Ok(false);
        }
        if from == to {
            return Ok(true);
        }

        store.mutate(|state| {
            let moved = state.order.remove(from);
            state.order.insert(to, moved);
        });
        Ok(true)
    }

    pub fn clear_completed(&self) -> Result<usize, InfraError> {
        let mut store = self.lock()?;
        let completed = store
            .state()
            .items
            .values()
            .filter(|item| item.done)
            .map(|item| item.id.clone())
            .collect::<HashSet<_>>();
        if completed.is_empty() {
            return Ok(0);
        }

        store.mutate(|state| {
            state.items.retain(|id, _| !completed.contains(id));
            state.order.retain(|id| !completed.contains(id));
        });
        tracing::info!(removed = completed.len(), "cleared completed tasks");
        Ok(completed.len())
    }

    /// `(pending, completed)` counts.
    pub fn counts(&self) -> Result<(usize, usize), InfraError> {
        let store = self.lock()?;
        let completed = store.state().items.values().filter(|item| item.done).count();
        Ok((store.state().items.len() - completed, completed))
    }
}
