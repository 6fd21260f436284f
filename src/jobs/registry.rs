use std::sync::{Arc, RwLock};

use ahash::AHashMap;
use tokio::sync::broadcast::{self, Receiver, Sender};

use crate::models::{Job, JobId};

const UPDATES_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Entries {
    order: Vec<JobId>,
    jobs: AHashMap<JobId, Job>,
}

/// In-memory job table. Entries are never removed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    entries: Arc<RwLock<Entries>>,
    updates: Sender<Job>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        let (updates, _) = broadcast::channel(UPDATES_CAPACITY);
        Self {
            entries: Arc::default(),
            updates,
        }
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        let snapshot = job.clone();
        {
            let mut entries = self.entries.write().expect("RWLock should never be poisoned");
            if !entries.jobs.contains_key(&job.id) {
                entries.order.push(job.id);
            }
            entries.jobs.insert(job.id, job);
        }
        let _ = self.updates.send(snapshot);
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.entries
            .read()
            .expect("RWLock should never be poisoned")
            .jobs
            .get(id)
            .cloned()
    }

    /// Every job in insertion order.
    pub fn all(&self) -> Vec<Job> {
        let entries = self.entries.read().expect("RWLock should never be poisoned");
        entries
            .order
            .iter()
            .filter_map(|id| entries.jobs.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("RWLock should never be poisoned")
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutates a single job and publishes the new snapshot.
    pub fn update<F>(&self, id: &JobId, f: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let snapshot = {
            let mut entries = self.entries.write().expect("RWLock should never be poisoned");
            let job = entries.jobs.get_mut(id)?;
            f(job);
            job.clone()
        };
        let _ = self.updates.send(snapshot.clone());
        Some(snapshot)
    }

    pub fn subscribe(&self) -> Receiver<Job> {
        self.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::{JobKind, JobStatus};

    fn job(url: &str) -> Job {
        Job::new(Uuid::new_v4(), url, JobKind::Single, "/tmp".into())
    }

    #[test]
    fn test_all_keeps_insertion_order() {
        let registry = JobRegistry::new();
        let urls = ["https://a", "https://b", "https://c"];
        for url in urls {
            registry.insert(job(url));
        }
        let listed: Vec<_> = registry.all().into_iter().map(|j| j.url).collect();
        assert_eq!(listed, urls);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_update_unknown_id() {
        let registry = JobRegistry::new();
        assert!(registry.update(&Uuid::new_v4(), Job::start).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_publishes_snapshot() {
        let registry = JobRegistry::new();
        let mut updates = registry.subscribe();
        let job = job("https://a");
        let id = job.id;
        registry.insert(job);
        registry.update(&id, Job::start);

        assert_eq!(updates.try_recv().unwrap().status, JobStatus::Queued);
        assert_eq!(updates.try_recv().unwrap().status, JobStatus::Downloading);
        assert_eq!(registry.get(&id).unwrap().status, JobStatus::Downloading);
    }

    #[test]
    fn test_concurrent_inserts_do_not_clobber() {
        let registry = JobRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let job = job(&format!("https://{i}"));
                    let id = job.id;
                    registry.insert(job);
                    registry.update(&id, Job::start);
                    id
                })
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(registry.len(), 8);
        for id in ids {
            assert_eq!(registry.get(&id).unwrap().status, JobStatus::Downloading);
        }
    }
}
