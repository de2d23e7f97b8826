use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tunesmith_core::{GenerationParams, GenerationRequest, TuneError, TuneId, TuneSnapshot};

struct Records {
    next_id: TuneId,
    requests: BTreeMap<TuneId, GenerationRequest>,
}

/// In-memory request records. Ids are handed out in increasing order and
/// never reused.
///
/// Records are kept for the life of the process, finished ones included:
/// late viewers and `GET /tunes/:id` read them back. The artifacts on disk are
/// the durable copy.
pub struct RequestStore {
    inner: Mutex<Records>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first_id: TuneId) -> Self {
        Self {
            inner: Mutex::new(Records {
                next_id: first_id,
                requests: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Records>, TuneError> {
        self.inner
            .lock()
            .map_err(|_| TuneError::Concurrency("request store lock poisoned".into()))
    }

    pub fn create(&self, params: GenerationParams) -> Result<TuneSnapshot, TuneError> {
        let mut records = self.lock()?;
        let id = records.next_id;
        records.next_id += 1;
        let request = GenerationRequest::new(id, params);
        let snapshot = request.snapshot();
        records.requests.insert(id, request);
        Ok(snapshot)
    }

    pub fn snapshot(&self, id: TuneId) -> Result<TuneSnapshot, TuneError> {
        self.lock()?
            .requests
            .get(&id)
            .map(GenerationRequest::snapshot)
            .ok_or_else(|| TuneError::not_found("tune", id))
    }

    pub fn contains(&self, id: TuneId) -> bool {
        self.lock()
            .map(|records| records.requests.contains_key(&id))
            .unwrap_or(false)
    }

    /// Apply `change` to one record under the store lock.
    pub fn update<T>(
        &self,
        id: TuneId,
        change: impl FnOnce(&mut GenerationRequest) -> Result<T, TuneError>,
    ) -> Result<T, TuneError> {
        let mut records = self.lock()?;
        let request = records
            .requests
            .get_mut(&id)
            .ok_or_else(|| TuneError::not_found("tune", id))?;
        change(request)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|records| records.requests.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn ids_start_at_one_and_increase() {
        let store = RequestStore::new();
        let a = store.create(GenerationParams::default()).unwrap();
        let b = store.create(GenerationParams::default()).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn unknown_tune_is_not_found() {
        let store = RequestStore::starting_at(101);
        assert!(store.snapshot(101).unwrap_err().is_not_found());
        assert!(store.update(101, |_| Ok(())).unwrap_err().is_not_found());
    }

    #[test]
    fn updates_are_visible_in_later_snapshots() {
        let store = RequestStore::starting_at(101);
        let id = store.create(GenerationParams::default()).unwrap().id;
        store
            .update(id, |req| {
                req.mark_started(Utc::now())?;
                req.extend_text("M:none\n")
            })
            .unwrap();
        let snapshot = store.snapshot(id).unwrap();
        assert!(snapshot.is_started());
        assert_eq!(snapshot.text, "M:none\n");
    }

    #[test]
    fn finished_records_stay_readable() {
        let store = RequestStore::new();
        let id = store.create(GenerationParams::default()).unwrap().id;
        store
            .update(id, |req| {
                req.mark_started(Utc::now())?;
                req.finalize_text("X:1\n".to_string())?;
                req.mark_finished(Utc::now())
            })
            .unwrap();
        store.create(GenerationParams::default()).unwrap();

        let snapshot = store.snapshot(id).unwrap();
        assert!(snapshot.is_finished());
        assert_eq!(snapshot.text, "X:1\n");
        assert_eq!(store.len(), 2);
    }
}
