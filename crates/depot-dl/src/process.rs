use std::{
    cell::{Cell, RefCell},
    io::Read,
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use depot_config::config::{Config, DEFAULT_MAX_PARALLEL_PROCESSES};
use depot_events::{null_sink, DepotEvent, EventSinkHandle, JobKind, JobOutcome};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tracing::{debug, trace, warn};

use crate::{
    error::{JobError, Result},
    job::{channel, JobArena, JobFuture, JobId, JobRef, JobStatus, Resolver},
};

/// Time an interrupted process gets before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

const SYNC_POLL: Duration = Duration::from_millis(1);

#[derive(Clone, Debug, Default)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// Inherit the terminal instead of capturing output.
    pub tty: bool,
}

impl ProcessRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Command line for logs and errors.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));
        if self.tty {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
        cmd
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

struct RunningChild {
    child: Child,
    started: Instant,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl RunningChild {
    fn collect(&mut self, status: Option<i32>) -> ProcessOutput {
        let read = |handle: Option<JoinHandle<Vec<u8>>>| {
            handle
                .and_then(|h| h.join().ok())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        };
        ProcessOutput {
            status,
            stdout: read(self.stdout.take()),
            stderr: read(self.stderr.take()),
        }
    }
}

struct ProcessJob {
    request: ProcessRequest,
    status: JobStatus,
    sync: bool,
    resolver: Resolver<ProcessOutput>,
    running: Option<RunningChild>,
}

/// An interrupted child that has not exited yet.
struct Terminating {
    child: Child,
    kill_at: Instant,
}

#[derive(Default)]
struct State {
    jobs: JobArena<ProcessJob>,
    running: usize,
    terminating: Vec<Terminating>,
}

/// Scheduler for child processes with the same life-cycle as
/// [`HttpDownloader`](crate::HttpDownloader).
///
/// Output is drained by reader threads so a chatty child never blocks on a
/// full pipe. Aborting a running job sends SIGINT and kills the process if it
/// is still alive after a short grace period.
pub struct ProcessExecutor {
    max_jobs: usize,
    timeout: Option<Duration>,
    async_enabled: Cell<bool>,
    events: EventSinkHandle,
    state: RefCell<State>,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_PARALLEL_PROCESSES, None, null_sink())
    }
}

impl ProcessExecutor {
    pub fn new(config: &Config, events: EventSinkHandle) -> Self {
        Self::with_limits(config.process_parallelism(), config.process_timeout(), events)
    }

    pub fn with_limits(max_jobs: usize, timeout: Option<Duration>, events: EventSinkHandle) -> Self {
        Self {
            max_jobs: max_jobs.max(1),
            timeout,
            async_enabled: Cell::new(false),
            events,
            state: RefCell::new(State::default()),
        }
    }

    pub fn enable_async(&self) {
        self.async_enabled.set(true);
    }

    pub fn is_async_enabled(&self) -> bool {
        self.async_enabled.get()
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }

    /// Runs `request` and blocks until it exits.
    ///
    /// A non-zero exit is not an error; check [`ProcessOutput::success`].
    pub fn execute(&self, request: ProcessRequest) -> Result<ProcessOutput> {
        let mut future = self.submit(request, true);
        let id = future.id();

        while !future.poll_settled() {
            if self.count_active_jobs(Some(id)) > 0 {
                thread::sleep(SYNC_POLL);
            }
        }
        self.state.borrow_mut().jobs.remove(id);
        future.into_result()
    }

    /// Runs `request` attached to the current terminal.
    pub fn execute_tty(&self, request: ProcessRequest) -> Result<ProcessOutput> {
        self.execute(ProcessRequest {
            tty: true,
            ..request
        })
    }

    pub fn execute_async(&self, request: ProcessRequest) -> Result<JobFuture<ProcessOutput>> {
        if !self.is_async_enabled() {
            return Err(JobError::AsyncDisabled);
        }
        Ok(self.submit(request, false))
    }

    pub fn abort(&self, id: JobId) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(job) = state.jobs.get_mut(id) else {
            return;
        };
        match job.status {
            JobStatus::Queued => {}
            JobStatus::Started => {
                if let Some(running) = job.running.take() {
                    interrupt(&running.child);
                    state.terminating.push(Terminating {
                        child: running.child,
                        kill_at: Instant::now() + TERMINATE_GRACE,
                    });
                }
                state.running -= 1;
            }
            _ => return,
        }

        job.status = JobStatus::Aborted;
        job.resolver.resolve(Err(JobError::Cancelled {
            id: id.as_u64(),
        }));
        if !job.sync {
            state.jobs.remove(id);
        }
        drop(guard);

        debug!(job = %id, "aborted process job");
        self.events.emit(DepotEvent::JobFinished {
            kind: JobKind::Process,
            job_id: id.as_u64(),
            outcome: JobOutcome::Aborted,
        });
    }

    /// Reaps exited children, enforces timeouts and starts queued jobs.
    /// Returns the number of unsettled jobs, or 0/1 for a single `id`.
    pub fn count_active_jobs(&self, id: Option<JobId>) -> usize {
        self.reap();
        self.reap_terminating();
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

    pub fn running_jobs(&self) -> usize {
        self.state.borrow().running
    }

    fn submit(&self, request: ProcessRequest, sync: bool) -> JobFuture<ProcessOutput> {
        let request = ProcessRequest {
            timeout: request.timeout.or(self.timeout),
            ..request
        };
        let (_, future) = self.state.borrow_mut().jobs.insert_with(|id| {
            let (resolver, future) = channel(JobRef {
                kind: JobKind::Process,
                id,
            });
            let job = ProcessJob {
                request,
                status: JobStatus::Queued,
                sync,
                resolver,
                running: None,
            };
            (job, future)
        });
        self.start_queued();
        future
    }

    fn start_queued(&self) {
        loop {
            let next = {
                let state = self.state.borrow();
                if state.running >= self.max_jobs {
                    return;
                }
                let queued = state
                    .jobs
                    .iter()
                    .find(|(_, job)| job.status == JobStatus::Queued)
                    .map(|(id, job)| (*id, job.request.clone()));
                queued
            };
            let Some((id, request)) = next else {
                return;
            };

            trace!(job = %id, command = %request.display(), "starting process job");
            self.events.emit(DepotEvent::JobStarted {
                kind: JobKind::Process,
                job_id: id.as_u64(),
                label: request.display(),
            });

            let spawned = spawn(&request);
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(job) = state.jobs.get_mut(id) else {
                continue;
            };
            job.status = JobStatus::Started;
            state.running += 1;

            match spawned {
                Ok(running) => job.running = Some(running),
                Err(err) => {
                    drop(guard);
                    self.settle(id, Err(err));
                }
            }
        }
    }

    fn reap(&self) {
        let mut finished = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            for (id, job) in state.jobs.iter_mut() {
                let Some(running) = job.running.as_mut() else {
                    continue;
                };
                match running.child.try_wait() {
                    Ok(Some(status)) => {
                        let output = running.collect(status.code());
                        job.running = None;
                        finished.push((*id, Ok(output)));
                    }
                    Ok(None) => {
                        let timed_out = job
                            .request
                            .timeout
                            .is_some_and(|limit| running.started.elapsed() > limit);
                        if timed_out {
                            warn!(command = %job.request.display(), "process timed out, killing it");
                            let _ = running.child.kill();
                            let _ = running.child.wait();
                            // reader threads are detached; a grandchild may still hold the pipes
                            job.running = None;
                            finished.push((
                                *id,
                                Err(JobError::Timeout {
                                    target: job.request.display(),
                                }),
                            ));
                        }
                    }
                    Err(err) => {
                        job.running = None;
                        finished.push((
                            *id,
                            Err(JobError::Io {
                                action: format!("wait for '{}'", job.request.display()),
                                source: err,
                            }),
                        ));
                    }
                }
            }
        }

        for (id, result) in finished {
            self.settle(id, result);
        }
    }

    fn reap_terminating(&self) {
        let now = Instant::now();
        self.state
            .borrow_mut()
            .terminating
            .retain_mut(|term| {
                match term.child.try_wait() {
                    Ok(Some(_)) | Err(_) => false,
                    Ok(None) if now >= term.kill_at => {
                        let _ = term.child.kill();
                        let _ = term.child.wait();
                        false
                    }
                    Ok(None) => true,
                }
            });
    }

    fn settle(&self, id: JobId, result: Result<ProcessOutput>) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(job) = state.jobs.get_mut(id) else {
            return;
        };
        if job.status != JobStatus::Started {
            return;
        }

        let outcome = match &result {
            Ok(output) if output.success() => JobOutcome::Completed,
            Ok(output) => JobOutcome::Failed(format!("exit status {:?}", output.status)),
            Err(err) => JobOutcome::Failed(err.to_string()),
        };
        job.status = if result.is_ok() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        job.resolver.resolve(result);
        if !job.sync {
            state.jobs.remove(id);
        }
        state.running -= 1;
        drop(guard);

        self.events.emit(DepotEvent::JobFinished {
            kind: JobKind::Process,
            job_id: id.as_u64(),
            outcome,
        });
    }
}

impl Drop for ProcessExecutor {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for term in &mut state.terminating {
            let _ = term.child.kill();
            let _ = term.child.wait();
        }
    }
}

fn spawn(request: &ProcessRequest) -> Result<RunningChild> {
    let mut child = request.command().spawn().map_err(|source| {
        JobError::Spawn {
            command: request.display(),
            source,
        }
    })?;

    let stdout = child.stdout.take().map(drain_pipe);
    let stderr = child.stderr.take().map(drain_pipe);
    Ok(RunningChild {
        child,
        started: Instant::now(),
        stdout,
        stderr,
    })
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn interrupt(child: &Child) {
    let Ok(raw) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(err) = signal::kill(Pid::from_raw(raw), Signal::SIGINT) {
        debug!("failed to interrupt process {}: {}", raw, err);
    }
}
