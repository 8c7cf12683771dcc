use crate::domain::models::PracticeProblem;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistent_store::PersistentStore;
use crate::infrastructure::storage::KeyValueStorage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

pub const PRACTICE_SHEET_KEY: &str = "practice-sheet:v1";
const BUILTIN_SHEET: &str = include_str!("../../data/practice_sheet.json");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PracticeSheetState {
    pub completed: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SheetProgress {
    pub total: usize,
    pub completed: usize,
    /// topic -> (completed, total)
    pub by_topic: BTreeMap<String, (usize, usize)>,
}

pub fn builtin_problems() -> Result<Vec<PracticeProblem>, InfraError> {
    Ok(serde_json::from_str(BUILTIN_SHEET)?)
}

pub struct PracticeSheet {
    problems: Vec<PracticeProblem>,
    store: Mutex<PersistentStore<PracticeSheetState>>,
}

impl PracticeSheet {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Result<Self, InfraError> {
        Ok(Self::with_problems(storage, builtin_problems()?))
    }

    pub fn with_problems(storage: Arc<dyn KeyValueStorage>, problems: Vec<PracticeProblem>) -> Self {
        Self {
            problems,
            store: Mutex::new(PersistentStore::load(storage, PRACTICE_SHEET_KEY)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PersistentStore<PracticeSheetState>>, InfraError> {
        self.store
            .lock()
            .map_err(|error| InfraError::StateUnavailable(format!("practice sheet lock poisoned: {error}")))
    }

    pub fn problems(&self) -> &[PracticeProblem] {
        &self.problems
    }

    pub fn is_completed(&self, problem_id: &str) -> Result<bool, InfraError> {
        Ok(self.lock()?.state().completed.contains(problem_id))
    }

    /// Flips completion; `None` for ids not on the sheet.
    pub fn toggle(&self, problem_id: &str) -> Result<Option<bool>, InfraError> {
        if !self.problems.iter().any(|problem| problem.id == problem_id) {
            return Ok(None);
        }
        let completed = self.lock()?.mutate(|state| {
            if state.completed.remove(problem_id) {
                false
            } else {
                state.completed.insert(problem_id.to_string());
                true
            }
        });
        Ok(Some(completed))
    }

    pub fn reset(&self) -> Result<(), InfraError> {
        self.lock()?.mutate(|state| state.completed.clear());
        tracing::info!("practice sheet reset");
        Ok(())
    }

    pub fn progress(&self) -> Result<SheetProgress, InfraError> {
        let store = self.lock()?;
        let completed_ids = &store.state().completed;
        let mut by_topic: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        let mut completed = 0;
        for problem in &self.problems {
            let entry = by_topic.entry(problem.topic.clone()).or_insert((0, 0));
            entry.1 += 1;
            if completed_ids.contains(&problem.id) {
                entry.0 += 1;
                completed += 1;
            }
        }
        Ok(SheetProgress {
            total: self.problems.len(),
            completed,
            by_topic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::InMemoryKeyValueStorage;
    use std::collections::HashSet;

    #[test]
    fn builtin_sheet_parses_with_unique_ids() {
        let problems = builtin_problems().expect("parse builtin sheet");
        assert!(!problems.is_empty());
        let ids = problems.iter().map(|problem| problem.id.as_str()).collect::<HashSet<_>>();
        assert_eq!(ids.len(), problems.len());
    }

    #[test]
    fn toggle_and_progress() {
        let sheet = PracticeSheet::new(Arc::new(InMemoryKeyValueStorage::default())).expect("sheet");
        assert_eq!(sheet.toggle("two-sum").expect("toggle"), Some(true));
        assert_eq!(sheet.toggle("3sum").expect("toggle"), Some(true));
        assert_eq!(sheet.toggle("3sum").expect("toggle"), Some(false));
        assert_eq!(sheet.toggle("not-on-sheet").expect("toggle"), None);

        let progress = sheet.progress().expect("progress");
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.total, sheet.problems().len());
        assert_eq!(progress.by_topic["arrays"].0, 1);
        assert_eq!(progress.by_topic["two-pointers"].0, 0);
    }

    #[test]
    fn completion_persists_and_reset_clears() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(InMemoryKeyValueStorage::default());
        let sheet = PracticeSheet::new(Arc::clone(&storage)).expect("sheet");
        sheet.toggle("binary-search").expect("toggle");

        let reloaded = PracticeSheet::new(Arc::clone(&storage)).expect("sheet");
        assert!(reloaded.is_completed("binary-search").expect("read"));

        reloaded.reset().expect("reset");
        assert_eq!(reloaded.progress().expect("progress").completed, 0);
    }
}
