//! Job → priority association submitted to the manager in one call.

use std::collections::HashMap;

use crate::job::{Job, JobId, JobPriority};

/// A set of jobs with their priorities.
///
/// Each job appears once; inserting a job again replaces its priority.
/// Iteration order is unspecified because dispatch order is decided by
/// priority, not by insertion.
#[derive(Debug, Default)]
pub struct JobCollection {
    entries: HashMap<JobId, (Job, JobPriority)>,
}

impl JobCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `job` at `priority`, returning the previous priority if the job
    /// was already present.
    pub fn insert(&mut self, job: Job, priority: JobPriority) -> Option<JobPriority> {
        self.entries
            .insert(job.id(), (job, priority))
            .map(|(_, previous)| previous)
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with(mut self, job: Job, priority: JobPriority) -> Self {
        self.insert(job, priority);
        self
    }

    pub fn priority_of(&self, id: JobId) -> Option<JobPriority> {
        self.entries.get(&id).map(|(_, priority)| *priority)
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.entries.values().map(|(job, _)| job)
    }
}

impl IntoIterator for JobCollection {
    type Item = (Job, JobPriority);
    type IntoIter = std::collections::hash_map::IntoValues<JobId, (Job, JobPriority)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_values()
    }
}

impl FromIterator<(Job, JobPriority)> for JobCollection {
    fn from_iter<I: IntoIterator<Item = (Job, JobPriority)>>(iter: I) -> Self {
        let mut collection = JobCollection::new();
        for (job, priority) in iter {
            collection.insert(job, priority);
        }
        collection
    }
}

impl Extend<(Job, JobPriority)> for JobCollection {
    fn extend<I: IntoIterator<Item = (Job, JobPriority)>>(&mut self, iter: I) {
        for (job, priority) in iter {
            self.insert(job, priority);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Job {
        Job::new(|_| Ok(()))
    }

    #[test]
    fn test_insert_and_lookup() {
        let job = noop();
        let mut collection = JobCollection::new();
        assert!(collection.is_empty());

        assert_eq!(collection.insert(job.clone(), 3), None);
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.priority_of(job.id()), Some(3));
        assert!(collection.contains(job.id()));
    }

    #[test]
    fn test_duplicate_insert_overwrites_priority() {
        let job = noop();
        let mut collection = JobCollection::new();
        collection.insert(job.clone(), 5);

        assert_eq!(collection.insert(job.clone(), 1), Some(5));
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.priority_of(job.id()), Some(1));
    }

    #[test]
    fn test_from_iterator_and_into_iter() {
        let jobs: Vec<Job> = (0..4).map(|_| noop()).collect();
        let collection: JobCollection = jobs
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, job)| (job, i as JobPriority))
            .collect();
        assert_eq!(collection.len(), 4);

        let mut priorities: Vec<JobPriority> =
            collection.into_iter().map(|(_, priority)| priority).collect();
        priorities.sort();
        assert_eq!(priorities, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_builder_with() {
        let a = noop();
        let b = noop();
        let collection = JobCollection::new().with(a.clone(), 0).with(b.clone(), 2);
        assert_eq!(collection.priority_of(a.id()), Some(0));
        assert_eq!(collection.priority_of(b.id()), Some(2));
        assert_eq!(collection.jobs().count(), 2);
    }
}
