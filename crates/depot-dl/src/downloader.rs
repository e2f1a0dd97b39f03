use std::{
    cell::{Cell, RefCell},
    path::Path,
    rc::Rc,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread,
    time::Duration,
};

use depot_config::config::Config;
use depot_events::{null_sink, DepotEvent, EventSinkHandle, JobKind, JobOutcome};
use tracing::{debug, trace, warn};

use crate::{
    auth::AuthProvider,
    error::{JobError, Result},
    http_client::{AbortSignal, ClientConfig, Transport, UreqTransport},
    job::{channel, JobArena, JobFuture, JobId, JobRef, JobStatus, Resolver},
    request::{FetchRequest, Response},
};

/// How long one pump waits for a worker to report back.
const PUMP_WAIT: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug)]
pub struct DownloaderOptions {
    pub max_jobs: usize,
    pub network_disabled: bool,
    pub timeout: Option<Duration>,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            max_jobs: depot_config::config::DEFAULT_MAX_PARALLEL_HTTP,
            network_disabled: false,
            timeout: None,
        }
    }
}

impl DownloaderOptions {
    /// Reads the ceiling, network flag and timeout once from `config` and
    /// the environment.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_jobs: config.http_parallelism(),
            network_disabled: config.network_disabled(),
            timeout: config.http_timeout(),
        }
    }
}

struct HttpJob {
    request: FetchRequest,
    status: JobStatus,
    /// Synchronous jobs stay in the arena until their caller collects them.
    sync: bool,
    resolver: Resolver<Response>,
    abort: AbortSignal,
    auth_retried: bool,
}

struct Completion {
    id: JobId,
    result: Result<Response>,
}

#[derive(Default)]
struct State {
    jobs: JobArena<HttpJob>,
    running: usize,
}

struct Dispatch {
    id: JobId,
    request: FetchRequest,
    abort: AbortSignal,
}

/// Scheduler for outbound fetches.
///
/// At most `max_jobs` requests run at once; the rest wait in submission
/// order. Requests go to worker threads over the shared [`Transport`] and
/// report back through a channel that is drained by
/// [`count_active_jobs`](Self::count_active_jobs). `file://` URLs and
/// requests that accept self-signed certificates run inline on the polling
/// thread instead.
pub struct HttpDownloader {
    transport: Arc<dyn Transport>,
    options: DownloaderOptions,
    async_enabled: Cell<bool>,
    auth: RefCell<Option<Rc<dyn AuthProvider>>>,
    events: EventSinkHandle,
    state: RefCell<State>,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
}

impl HttpDownloader {
    pub fn new(config: &Config, events: EventSinkHandle) -> Self {
        let client = ClientConfig {
            timeout: config.http_timeout(),
            ..ClientConfig::default()
        };
        Self::with_transport(
            Arc::new(UreqTransport::new(&client)),
            DownloaderOptions::from_config(config),
            events,
        )
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        options: DownloaderOptions,
        events: EventSinkHandle,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel();
        let options = DownloaderOptions {
            max_jobs: options.max_jobs.max(1),
            ..options
        };
        Self {
            transport,
            options,
            async_enabled: Cell::new(false),
            auth: RefCell::new(None),
            events,
            state: RefCell::new(State::default()),
            completions_tx,
            completions_rx,
        }
    }

    /// Scheduler over `transport` with default options and no event sink.
    pub fn for_transport(transport: Arc<dyn Transport>) -> Self {
        Self::with_transport(transport, DownloaderOptions::default(), null_sink())
    }

    pub fn set_auth_provider(&self, provider: Rc<dyn AuthProvider>) {
        *self.auth.borrow_mut() = Some(provider);
    }

    pub fn enable_async(&self) {
        self.async_enabled.set(true);
    }

    pub fn is_async_enabled(&self) -> bool {
        self.async_enabled.get()
    }

    pub fn max_jobs(&self) -> usize {
        self.options.max_jobs
    }

    pub fn is_network_disabled(&self) -> bool {
        self.options.network_disabled
    }

    /// Fetches `request` and blocks until it settles.
    pub fn get(&self, request: FetchRequest) -> Result<Response> {
        let request = self.apply_defaults(request);
        let mut future = self.submit(request, true);
        let id = future.id();

        while !future.poll_settled() {
            self.count_active_jobs(Some(id));
        }
        self.state.borrow_mut().jobs.remove(id);
        future.into_result()
    }

    /// Queues `request` and returns its future immediately.
    pub fn add(&self, request: FetchRequest) -> Result<JobFuture<Response>> {
        if !self.is_async_enabled() {
            return Err(JobError::AsyncDisabled);
        }
        let request = self.apply_defaults(request);
        Ok(self.submit(request, false))
    }

    /// Downloads `url` into `dest`, blocking until done.
    pub fn copy(&self, url: &str, dest: &Path) -> Result<Response> {
        self.get(FetchRequest::get(url).destination(dest))
    }

    pub fn add_copy(&self, url: &str, dest: &Path) -> Result<JobFuture<Response>> {
        self.add(FetchRequest::get(url).destination(dest))
    }

    /// Aborts a queued or running job. Its future rejects with `Cancelled`.
    /// Unknown or finished jobs are ignored.
    pub fn abort(&self, id: JobId) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(job) = state.jobs.get_mut(id) else {
            return;
        };
        let was_started = match job.status {
            JobStatus::Queued => false,
            JobStatus::Started => {
                job.abort.raise();
                true
            }
            _ => return,
        };

        job.status = JobStatus::Aborted;
        job.resolver.resolve(Err(JobError::Cancelled {
            id: id.as_u64(),
        }));
        let sync = job.sync;
        if was_started {
            state.running -= 1;
        }
        if !sync {
            state.jobs.remove(id);
        }
        drop(guard);

        debug!(job = %id, "aborted http job");
        self.events.emit(DepotEvent::JobFinished {
            kind: JobKind::Http,
            job_id: id.as_u64(),
            outcome: JobOutcome::Aborted,
        });
    }

    /// Drives the scheduler once and counts jobs that have not settled.
    ///
    /// Settles every job whose worker reported back, then starts queued
    /// jobs while slots are free. With `Some(id)` the count is 1 while that
    /// job is unsettled and 0 afterwards.
    pub fn count_active_jobs(&self, id: Option<JobId>) -> usize {
        self.pump();
        self.start_queued();

        let state = self.state.borrow();
        match id {
            Some(id) => {
                state
                    .jobs
                    .get(id)
                    .map(|job| usize::from(!job.status.is_terminal()))
                    .unwrap_or(0)
            }
            None => {
                state
                    .jobs
                    .iter()
                    .filter(|(_, job)| !job.status.is_terminal())
                    .count()
            }
        }
    }

    /// Number of jobs currently holding a slot.
    pub fn running_jobs(&self) -> usize {
        self.state.borrow().running
    }

    fn apply_defaults(&self, mut request: FetchRequest) -> FetchRequest {
        if request.options.timeout.is_none() {
            request.options.timeout = self.options.timeout;
        }
        request
    }

    fn submit(&self, request: FetchRequest, sync: bool) -> JobFuture<Response> {
        let (_, future) = self.state.borrow_mut().jobs.insert_with(|id| {
            let (resolver, future) = channel(JobRef {
                kind: JobKind::Http,
                id,
            });
            let job = HttpJob {
                request,
                status: JobStatus::Queued,
                sync,
                resolver,
                abort: AbortSignal::new(),
                auth_retried: false,
            };
            (job, future)
        });
        self.start_queued();
        future
    }

    /// Collects completions from workers. Blocks briefly only when jobs
    /// are running and nothing has arrived yet.
    fn pump(&self) {
        let mut received = false;
        while let Ok(completion) = self.completions_rx.try_recv() {
            received = true;
            self.complete(completion.id, completion.result);
        }

        if !received && self.running_jobs() > 0 {
            match self.completions_rx.recv_timeout(PUMP_WAIT) {
                Ok(completion) => self.complete(completion.id, completion.result),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
        }
    }

    fn start_queued(&self) {
        let dispatch = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let free = self.options.max_jobs.saturating_sub(state.running);
            let ids: Vec<JobId> = state
                .jobs
                .iter()
                .filter(|(_, job)| job.status == JobStatus::Queued)
                .map(|(id, _)| *id)
                .take(free)
                .collect();

            let mut dispatch = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(job) = state.jobs.get_mut(id) {
                    job.status = JobStatus::Started;
                    dispatch.push(Dispatch {
                        id,
                        request: job.request.clone(),
                        abort: job.abort.clone(),
                    });
                }
            }
            state.running += dispatch.len();
            dispatch
        };

        for job in dispatch {
            trace!(job = %job.id, url = %job.request.url, "starting http job");
            self.events.emit(DepotEvent::JobStarted {
                kind: JobKind::Http,
                job_id: job.id.as_u64(),
                label: job.request.url.clone(),
            });

            if self.options.network_disabled {
                let result = offline_response(&job.request);
                self.complete(job.id, result);
            } else if job.request.needs_inline_backend() {
                let result = self.transport.perform(&job.request, &job.abort);
                self.complete(job.id, result);
            } else {
                let transport = Arc::clone(&self.transport);
                let tx = self.completions_tx.clone();
                thread::spawn(move || {
                    let result = transport.perform(&job.request, &job.abort);
                    // The scheduler may have been dropped.
                    let _ = tx.send(Completion {
                        id: job.id,
                        result,
                    });
                });
            }
        }
    }

    /// Settles a started job with the raw transport result.
    fn complete(&self, id: JobId, result: Result<Response>) {
        let result = result.and_then(check_status);

        if let Err(err) = &result {
            if matches!(err.status(), Some(401) | Some(403)) && self.retry_with_auth(id) {
                return;
            }
        }

        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(job) = state.jobs.get_mut(id) else {
            return;
        };
        if job.status != JobStatus::Started {
            // aborted while the worker was still running
            return;
        }

        let result = result.map_err(|err| {
            match err {
                JobError::Cancelled { .. } => {
                    JobError::Cancelled {
                        id: id.as_u64(),
                    }
                }
                other => other,
            }
        });
        let outcome = match &result {
            Ok(_) => JobOutcome::Completed,
            Err(err) => JobOutcome::Failed(err.to_string()),
        };
        job.status = if result.is_ok() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        if let Err(err) = &result {
            debug!(job = %id, url = %job.request.url, "http job failed: {}", err);
        }
        job.resolver.resolve(result);
        let sync = job.sync;
        state.running -= 1;
        if !sync {
            state.jobs.remove(id);
        }
        drop(guard);

        self.events.emit(DepotEvent::JobFinished {
            kind: JobKind::Http,
            job_id: id.as_u64(),
            outcome,
        });
    }

    /// Requeues a job once with credentials after an auth failure.
    fn retry_with_auth(&self, id: JobId) -> bool {
        let provider = self.auth.borrow().clone();
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(job) = state.jobs.get_mut(id) else {
            return false;
        };
        if job.status != JobStatus::Started
            || job.auth_retried
            || !job.request.options.retry_auth_failure
        {
            return false;
        }

        let Some(authorization) = provider
            .as_ref()
            .and_then(|p| p.authorization(&job.request.url, 401))
        else {
            warn!(url = %job.request.url, "authentication required but no credentials are available");
            return false;
        };

        debug!(job = %id, url = %job.request.url, "retrying with credentials");
        job.request.set_header("Authorization", authorization);
        job.auth_retried = true;
        job.status = JobStatus::Queued;
        state.running -= 1;
        true
    }
}

/// Maps a transport response to success or an HTTP failure.
fn check_status(response: Response) -> Result<Response> {
    if response.is_success() || response.is_not_modified() {
        Ok(response)
    } else {
        Err(JobError::Http {
            status: response.status,
            url: response.url,
        })
    }
}

/// Result of a request while the network is disabled: conditional requests
/// are answered with 304 so callers keep their cached copy, everything else
/// fails with 499.
fn offline_response(request: &FetchRequest) -> Result<Response> {
    if request.is_conditional() {
        Ok(Response::new(request.url.clone(), 304, Vec::new()))
    } else {
        Err(JobError::NetworkDisabled {
            url: request.url.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use depot_events::CollectorSink;

    use super::*;

    /// Serves canned responses, tracking how many requests run at once.
    #[derive(Default)]
    struct FakeTransport {
        responses: Mutex<HashMap<String, (u16, Vec<u8>)>>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        seen_auth: Mutex<Vec<Option<String>>>,
    }

    impl FakeTransport {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn respond(&self, url: &str, status: u16, body: &[u8]) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), (status, body.to_vec()));
        }
    }

    impl Transport for FakeTransport {
        fn perform(&self, request: &FetchRequest, _abort: &AbortSignal) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.seen_auth
                .lock()
                .unwrap()
                .push(request.header_value("authorization").map(String::from));

            thread::sleep(self.delay);
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .get(&request.url)
                .cloned()
                .unwrap_or((200, b"ok".to_vec()));

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Response::new(request.url.clone(), status, body))
        }
    }

    fn downloader(transport: Arc<FakeTransport>, max_jobs: usize) -> HttpDownloader {
        let dl = HttpDownloader::with_transport(
            transport,
            DownloaderOptions {
                max_jobs,
                ..Default::default()
            },
            null_sink(),
        );
        dl.enable_async();
        dl
    }

    fn drain(dl: &HttpDownloader) {
        while dl.count_active_jobs(None) > 0 {}
    }

    #[test]
    fn test_get_returns_body() {
        let transport = Arc::new(FakeTransport::default());
        transport.respond("https://repo.test/packages.json", 200, b"{}");
        let dl = downloader(transport.clone(), 4);

        let response = dl.get(FetchRequest::get("https://repo.test/packages.json")).unwrap();
        assert_eq!(response.body, b"{}");
        assert_eq!(dl.count_active_jobs(None), 0);
    }

    #[test]
    fn test_http_error_status() {
        let transport = Arc::new(FakeTransport::default());
        transport.respond("https://repo.test/missing.json", 404, b"");
        let dl = downloader(transport, 4);

        let err = dl.get(FetchRequest::get("https://repo.test/missing.json")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_add_requires_async() {
        let dl = HttpDownloader::for_transport(Arc::new(FakeTransport::default()));
        let err = dl.add(FetchRequest::get("https://repo.test")).unwrap_err();
        assert!(matches!(err, JobError::AsyncDisabled));
    }

    #[test]
    fn test_ceiling_is_never_exceeded() {
        let transport = Arc::new(FakeTransport::with_delay(Duration::from_millis(20)));
        let dl = downloader(transport.clone(), 2);

        let mut futures: Vec<_> = (0..6)
            .map(|i| dl.add(FetchRequest::get(format!("https://repo.test/{i}"))).unwrap())
            .collect();
        assert!(dl.running_jobs() <= 2);

        while dl.count_active_jobs(None) > 0 {
            assert!(dl.running_jobs() <= 2);
        }

        assert!(futures.iter_mut().all(|f| f.poll_settled()));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 6);
        assert!(transport.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_aborted_queued_job_never_starts() {
        let transport = Arc::new(FakeTransport::with_delay(Duration::from_millis(20)));
        let dl = downloader(transport.clone(), 1);

        let first = dl.add(FetchRequest::get("https://repo.test/first")).unwrap();
        let mut second = dl.add(FetchRequest::get("https://repo.test/second")).unwrap();
        dl.abort(second.id());
        drain(&dl);

        assert!(second.poll_settled());
        assert!(matches!(second.take(), Some(Err(JobError::Cancelled { .. }))));
        assert!(first.into_result().is_ok());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queued_jobs_start_in_submission_order() {
        let transport = Arc::new(FakeTransport::default());
        let sink = Arc::new(CollectorSink::default());
        let dl = HttpDownloader::with_transport(
            transport,
            DownloaderOptions {
                max_jobs: 1,
                ..Default::default()
            },
            sink.clone(),
        );
        dl.enable_async();

        let futures: Vec<_> = (0..3)
            .map(|i| dl.add(FetchRequest::get(format!("https://repo.test/{i}"))).unwrap())
            .collect();
        drain(&dl);

        let started = sink.started_jobs(JobKind::Http);
        let ids: Vec<u64> = futures.iter().map(|f| f.id().as_u64()).collect();
        assert_eq!(started, ids);
    }

    #[test]
    fn test_network_disabled_short_circuits() {
        let transport = Arc::new(FakeTransport::default());
        let dl = HttpDownloader::with_transport(
            transport.clone(),
            DownloaderOptions {
                network_disabled: true,
                ..Default::default()
            },
            null_sink(),
        );

        let conditional = FetchRequest::get("https://repo.test/packages.json")
            .header("If-Modified-Since", "Mon, 01 Jan 2024 00:00:00 GMT");
        let response = dl.get(conditional).unwrap();
        assert_eq!(response.status, 304);

        let err = dl.get(FetchRequest::get("https://repo.test/packages.json")).unwrap_err();
        assert_eq!(err.status(), Some(499));
        assert!(err.is_retryable());

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    struct OneToken;

    impl AuthProvider for OneToken {
        fn authorization(&self, _url: &str, _status: u16) -> Option<String> {
            Some("Bearer secret".into())
        }
    }

    #[test]
    fn test_auth_failure_retried_once() {
        let transport = Arc::new(FakeTransport::default());
        transport.respond("https://private.test/packages.json", 401, b"");
        let dl = downloader(transport.clone(), 2);
        dl.set_auth_provider(Rc::new(OneToken));

        let mut request = FetchRequest::get("https://private.test/packages.json");
        request.options.retry_auth_failure = true;
        let err = dl.get(request).unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        let seen = transport.seen_auth.lock().unwrap().clone();
        assert_eq!(seen, vec![None, Some("Bearer secret".to_string())]);
    }

    #[test]
    fn test_auth_failure_without_flag_is_final() {
        let transport = Arc::new(FakeTransport::default());
        transport.respond("https://private.test/packages.json", 403, b"");
        let dl = downloader(transport.clone(), 2);
        dl.set_auth_provider(Rc::new(OneToken));

        let err = dl.get(FetchRequest::get("https://private.test/packages.json")).unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
