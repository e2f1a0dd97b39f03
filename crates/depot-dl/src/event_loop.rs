use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use depot_events::{DepotEvent, EventSinkHandle, JobKind};
use tracing::debug;

use crate::{
    downloader::HttpDownloader,
    error::Result,
    job::{JobRef, Settle},
    process::ProcessExecutor,
};

/// Thread-safe request to abort everything a [`Loop`] is waiting on. Checked
/// on every tick of [`Loop::wait`], so it can be raised from a signal
/// handler or another thread.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Waits on batches of job futures by polling the schedulers.
///
/// Creating a loop enables asynchronous submission on both schedulers.
pub struct Loop {
    http: Rc<HttpDownloader>,
    process: Option<Rc<ProcessExecutor>>,
    batches: RefCell<BTreeMap<u64, Vec<JobRef>>>,
    next_batch: Cell<u64>,
    abort: AbortHandle,
}

impl Loop {
    pub fn new(http: Rc<HttpDownloader>, process: Option<Rc<ProcessExecutor>>) -> Self {
        http.enable_async();
        if let Some(process) = &process {
            process.enable_async();
        }
        Self {
            http,
            process,
            batches: RefCell::new(BTreeMap::new()),
            next_batch: Cell::new(0),
            abort: AbortHandle::default(),
        }
    }

    pub fn http(&self) -> &Rc<HttpDownloader> {
        &self.http
    }

    pub fn process(&self) -> Option<&Rc<ProcessExecutor>> {
        self.process.as_ref()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Polls until every future in `futures` has settled.
    ///
    /// A rejection does not stop the wait; once all members are settled the
    /// first rejection observed is returned. Successful results stay in their
    /// futures. With a `progress` sink a `BatchProgress` event is emitted
    /// whenever the settled count changes.
    pub fn wait<F: Settle>(
        &self,
        futures: &mut [F],
        progress: Option<&EventSinkHandle>,
    ) -> Result<()> {
        if let Some(index) = self.wait_settled(futures, progress) {
            if let Some(err) = futures[index].take_error() {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Like [`wait`](Self::wait) but leaves every result, rejections
    /// included, inside its future. Returns the index of the first rejected
    /// member.
    pub fn wait_settled<F: Settle>(
        &self,
        futures: &mut [F],
        progress: Option<&EventSinkHandle>,
    ) -> Option<usize> {
        let batch = self.register(futures.iter().map(Settle::job).collect());
        let total = futures.len();
        let mut settled = vec![false; total];
        let mut settled_count = 0;
        let mut failed = 0;
        let mut first_rejection = None;
        let mut reported = None;

        loop {
            if self.abort.take() {
                debug!("abort requested, cancelling pending jobs");
                self.abort_jobs();
            }

            for (index, future) in futures.iter_mut().enumerate() {
                if settled[index] || !future.poll_settled() {
                    continue;
                }
                settled[index] = true;
                settled_count += 1;
                if future.is_rejected() {
                    failed += 1;
                    first_rejection.get_or_insert(index);
                }
            }

            if let Some(sink) = progress {
                if reported != Some(settled_count) {
                    reported = Some(settled_count);
                    sink.emit(DepotEvent::BatchProgress {
                        completed: settled_count as u32,
                        total: total as u32,
                        failed,
                    });
                }
            }

            if settled_count == total {
                break;
            }

            self.http.count_active_jobs(None);
            if let Some(process) = &self.process {
                process.count_active_jobs(None);
            }
        }

        self.batches.borrow_mut().remove(&batch);
        first_rejection
    }

    /// Aborts every job of every batch currently being waited on.
    pub fn abort_jobs(&self) {
        let jobs: Vec<JobRef> = self
            .batches
            .borrow()
            .values()
            .flatten()
            .copied()
            .collect();

        for job in jobs {
            match job.kind {
                JobKind::Http => self.http.abort(job.id),
                JobKind::Process => {
                    if let Some(process) = &self.process {
                        process.abort(job.id);
                    }
                }
            }
        }
    }

    fn register(&self, jobs: Vec<JobRef>) -> u64 {
        let id = self.next_batch.get();
        self.next_batch.set(id + 1);
        self.batches.borrow_mut().insert(id, jobs);
        id
    }
}
