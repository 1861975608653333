//! In-memory `FlagFetcher` for service and monitor tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::api::{FlagError, FlagFetcher};
use crate::models::FeatureFlag;

/// Replays queued `fetch_all` results (an empty list once the queue runs dry)
/// and counts calls. After `hold()`, every `fetch_all` waits for a `release`;
/// after `panic_next()`, the next one panics.
pub(crate) struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<Vec<FeatureFlag>, FlagError>>>,
    named: Mutex<HashMap<String, bool>>,
    per_user: Mutex<HashMap<(String, String), Result<bool, FlagError>>>,
    fetch_all_calls: AtomicUsize,
    held: AtomicBool,
    panic_next: AtomicBool,
    gate: Semaphore,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            named: Mutex::new(HashMap::new()),
            per_user: Mutex::new(HashMap::new()),
            fetch_all_calls: AtomicUsize::new(0),
            held: AtomicBool::new(false),
            panic_next: AtomicBool::new(false),
            gate: Semaphore::new(0),
        })
    }

    pub(crate) fn push_ok(&self, flags: Vec<FeatureFlag>) {
        self.responses.lock().push_back(Ok(flags));
    }

    pub(crate) fn push_err(&self, err: FlagError) {
        self.responses.lock().push_back(Err(err));
    }

    pub(crate) fn set_named(&self, pairs: &[(&str, bool)]) {
        let mut named = self.named.lock();
        for (name, enabled) in pairs {
            named.insert(name.to_string(), *enabled);
        }
    }

    pub(crate) fn set_user_result(&self, name: &str, user_id: &str, result: Result<bool, FlagError>) {
        self.per_user
            .lock()
            .insert((name.to_string(), user_id.to_string()), result);
    }

    pub(crate) fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// The next `fetch_all` panics instead of returning.
    pub(crate) fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release(&self, fetches: usize) {
        self.gate.add_permits(fetches);
    }

    pub(crate) fn fetch_all_calls(&self) -> usize {
        self.fetch_all_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlagFetcher for ScriptedFetcher {
    async fn fetch_all(&self) -> Result<Vec<FeatureFlag>, FlagError> {
        self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("scripted fetch_all panic");
        }
        if self.held.load(Ordering::SeqCst) {
            self.gate
                .acquire()
                .await
                .map_err(|e| FlagError::Network(e.to_string()))?
                .forget();
        }
        self.responses.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_named(&self, names: &[String]) -> Result<HashMap<String, bool>, FlagError> {
        let named = self.named.lock();
        Ok(names
            .iter()
            .filter_map(|name| named.get(name).map(|enabled| (name.clone(), *enabled)))
            .collect())
    }

    async fn fetch_one(&self, name: &str) -> Result<bool, FlagError> {
        self.named
            .lock()
            .get(name)
            .copied()
            .ok_or_else(|| FlagError::UnknownFlag(name.to_string()))
    }

    async fn fetch_for_user(&self, name: &str, user_id: &str) -> Result<bool, FlagError> {
        self.per_user
            .lock()
            .get(&(name.to_string(), user_id.to_string()))
            .cloned()
            .unwrap_or_else(|| Err(FlagError::UnknownFlag(name.to_string())))
    }
}
