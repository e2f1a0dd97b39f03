use std::{collections::BTreeMap, fmt};

use depot_events::JobKind;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::error::{JobError, Result};

/// Stable handle of a job inside its scheduler. Ids are never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Started,
    Completed,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

/// Identifies a job across both schedulers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobRef {
    pub kind: JobKind,
    pub id: JobId,
}

/// Jobs keyed by id. Iteration follows submission order.
pub(crate) struct JobArena<J> {
    next_id: u64,
    jobs: BTreeMap<JobId, J>,
}

impl<J> Default for JobArena<J> {
    fn default() -> Self {
        Self {
            next_id: 1,
            jobs: BTreeMap::new(),
        }
    }
}

impl<J> JobArena<J> {
    /// Allocates the next id and stores the job built for it, passing
    /// through whatever else the builder returns.
    pub fn insert_with<R>(&mut self, build: impl FnOnce(JobId) -> (J, R)) -> (JobId, R) {
        let id = JobId(self.next_id);
        self.next_id += 1;
        let (job, extra) = build(id);
        self.jobs.insert(id, job);
        (id, extra)
    }

    pub fn get(&self, id: JobId) -> Option<&J> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut J> {
        self.jobs.get_mut(&id)
    }

    pub fn remove(&mut self, id: JobId) -> Option<J> {
        self.jobs.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JobId, &J)> {
        self.jobs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&JobId, &mut J)> {
        self.jobs.iter_mut()
    }
}

/// Sending half of a [`JobFuture`]. Dropping it unresolved cancels the
/// future.
pub(crate) struct Resolver<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
}

impl<T> Resolver<T> {
    pub fn resolve(&mut self, result: Result<T>) {
        if let Some(tx) = self.tx.take() {
            // The receiver may already be gone; nobody is waiting then.
            let _ = tx.send(result);
        }
    }
}

/// Creates a linked resolver and future for a newly submitted job.
pub(crate) fn channel<T>(job: JobRef) -> (Resolver<T>, JobFuture<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Resolver {
            tx: Some(tx),
        },
        JobFuture {
            job,
            rx,
            outcome: None,
            taken: false,
        },
    )
}

/// Eventual result of a job.
///
/// The future never drives its job; the owning scheduler settles it while a
/// caller is polling (`count_active_jobs`, `Loop::wait` or a synchronous
/// helper).
pub struct JobFuture<T> {
    job: JobRef,
    rx: oneshot::Receiver<Result<T>>,
    outcome: Option<Result<T>>,
    taken: bool,
}

impl<T> JobFuture<T> {
    pub fn id(&self) -> JobId {
        self.job.id
    }

    pub fn job(&self) -> JobRef {
        self.job
    }

    /// Checks for a result without blocking. Returns true once settled.
    pub fn poll_settled(&mut self) -> bool {
        if self.outcome.is_some() || self.taken {
            return true;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.outcome = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                self.outcome = Some(Err(JobError::Cancelled {
                    id: self.job.id.as_u64(),
                }));
                true
            }
        }
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.is_some() || self.taken
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.outcome, Some(Err(_)))
    }

    /// Takes the result out of a settled future. Later calls return `None`.
    pub fn take(&mut self) -> Option<Result<T>> {
        self.poll_settled();
        let outcome = self.outcome.take();
        if outcome.is_some() {
            self.taken = true;
        }
        outcome
    }

    /// Consumes the future, yielding its result or `NotSettled`.
    pub fn into_result(mut self) -> Result<T> {
        let id = self.job.id.as_u64();
        self.take().unwrap_or(Err(JobError::NotSettled { id }))
    }
}

impl<T> fmt::Debug for JobFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFuture")
            .field("job", &self.job)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Type-erased view of a future used by `Loop::wait`.
pub trait Settle {
    fn job(&self) -> JobRef;
    fn poll_settled(&mut self) -> bool;
    fn is_rejected(&self) -> bool;
    /// Moves the rejection out of the future, leaving successes untouched.
    fn take_error(&mut self) -> Option<JobError>;
}

impl<T> Settle for JobFuture<T> {
    fn job(&self) -> JobRef {
        self.job
    }

    fn poll_settled(&mut self) -> bool {
        JobFuture::poll_settled(self)
    }

    fn is_rejected(&self) -> bool {
        JobFuture::is_rejected(self)
    }

    fn take_error(&mut self) -> Option<JobError> {
        if !self.is_rejected() {
            return None;
        }
        self.taken = true;
        self.outcome.take().and_then(|outcome| outcome.err())
    }
}

impl<S: Settle + ?Sized> Settle for &mut S {
    fn job(&self) -> JobRef {
        (**self).job()
    }

    fn poll_settled(&mut self) -> bool {
        (**self).poll_settled()
    }

    fn is_rejected(&self) -> bool {
        (**self).is_rejected()
    }

    fn take_error(&mut self) -> Option<JobError> {
        (**self).take_error()
    }
}

impl<S: Settle + ?Sized> Settle for Box<S> {
    fn job(&self) -> JobRef {
        (**self).job()
    }

    fn poll_settled(&mut self) -> bool {
        (**self).poll_settled()
    }

    fn is_rejected(&self) -> bool {
        (**self).is_rejected()
    }

    fn take_error(&mut self) -> Option<JobError> {
        (**self).take_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_ref(id: u64) -> JobRef {
        JobRef {
            kind: JobKind::Http,
            id: JobId(id),
        }
    }

    #[test]
    fn test_arena_preserves_submission_order() {
        let mut arena = JobArena::default();
        let (a, _) = arena.insert_with(|_| ("a", ()));
        let (b, _) = arena.insert_with(|_| ("b", ()));
        arena.remove(a);
        let (c, _) = arena.insert_with(|_| ("c", ()));

        assert!(a < b && b < c);
        let order: Vec<_> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(order, vec!["b", "c"]);
    }

    #[test]
    fn test_future_resolves() {
        let (mut resolver, mut future) = channel::<u32>(job_ref(1));
        assert!(!future.poll_settled());

        resolver.resolve(Ok(5));
        assert!(future.poll_settled());
        assert!(!future.is_rejected());
        assert_eq!(future.into_result().unwrap(), 5);
    }

    #[test]
    fn test_dropped_resolver_cancels() {
        let (resolver, mut future) = channel::<u32>(job_ref(3));
        drop(resolver);

        assert!(future.poll_settled());
        assert!(future.is_rejected());
        let err = future.take_error().unwrap();
        assert!(matches!(err, JobError::Cancelled { id: 3 }));
        assert!(future.take().is_none());
    }

    #[test]
    fn test_unsettled_into_result() {
        let (_resolver, future) = channel::<u32>(job_ref(9));
        assert!(matches!(
            future.into_result(),
            Err(JobError::NotSettled { id: 9 })
        ));
    }
}
