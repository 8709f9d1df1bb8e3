use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use ferry_core::ProgressReporter;

use crate::errors::{Error, Result};

#[derive(Default)]
struct Sessions {
    active: HashMap<String, ProgressReporter>,
    /// Most recently started session, kept after it finishes so its final percentage stays
    /// visible.
    latest: Option<ProgressReporter>,
}

/// Uploads currently in flight, keyed by object name.
#[derive(Clone, Default)]
pub(crate) struct ActiveSessions {
    inner: Arc<Mutex<Sessions>>,
}

impl ActiveSessions {
    fn lock(&self) -> MutexGuard<'_, Sessions> {
        // a poisoned registry still holds consistent entries
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `object_name` until the returned guard is dropped.
    pub(crate) fn register(
        &self,
        object_name: &str,
        progress: ProgressReporter,
    ) -> Result<SessionGuard> {
        let mut sessions = self.lock();
        if sessions.active.contains_key(object_name) {
            return Err(Error::UploadInProgress(object_name.to_string()));
        }
        sessions
            .active
            .insert(object_name.to_string(), progress.clone());
        sessions.latest = Some(progress);
        Ok(SessionGuard {
            sessions: self.clone(),
            object_name: object_name.to_string(),
        })
    }

    pub(crate) fn get(&self, object_name: &str) -> Option<ProgressReporter> {
        self.lock().active.get(object_name).cloned()
    }

    pub(crate) fn latest(&self) -> Option<ProgressReporter> {
        self.lock().latest.clone()
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, f64> {
        self.lock()
            .active
            .iter()
            .map(|(name, progress)| (name.clone(), progress.percentage()))
            .collect()
    }
}

pub(crate) struct SessionGuard {
    sessions: ActiveSessions,
    object_name: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.lock().active.remove(&self.object_name);
    }
}
