use std::{
    collections::HashMap,
    sync::{mpsc::Receiver, LazyLock},
    thread::{self, JoinHandle},
    time::Duration,
};

use depot_events::{DepotEvent, JobKind, JobOutcome, LogLevel, MetadataStage};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use nu_ansi_term::Color::{Cyan, Yellow};
use tracing::{debug, error, info, warn};

use crate::utils::{progress_enabled, Colored};

static MULTI: LazyLock<MultiProgress> = LazyLock::new(MultiProgress::new);

/// Pause progress display, run the closure, then resume.
pub fn suspend<F: FnOnce()>(f: F) {
    MULTI.suspend(f);
}

/// Stop and clear all progress bars.
pub fn stop() {
    MULTI.clear().ok();
}

/// Owns the thread rendering events. Drop every sender before calling
/// [`finish`](ProgressGuard::finish) or it blocks forever.
pub struct ProgressGuard {
    handle: Option<JoinHandle<()>>,
}

impl ProgressGuard {
    pub fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
        stop();
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn batch_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}  {wide_bar:.cyan/dim}  {pos}/{len}")
        .map(|style| style.progress_chars("━━─"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn new_bar(bar: ProgressBar, style: ProgressStyle) -> ProgressBar {
    let bar = if progress_enabled() {
        MULTI.add(bar)
    } else {
        MULTI.add(ProgressBar::hidden())
    };
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn job_label(kind: JobKind, label: &str) -> String {
    match kind {
        JobKind::Http => format!("{} {label}", Colored(Cyan, "GET")),
        JobKind::Process => format!("{} {label}", Colored(Cyan, "RUN")),
    }
}

#[derive(Default)]
struct Renderer {
    jobs: HashMap<(JobKind, u64), ProgressBar>,
    batch: Option<ProgressBar>,
}

impl Renderer {
    fn handle(&mut self, event: DepotEvent) {
        match event {
            DepotEvent::JobStarted {
                kind,
                job_id,
                label,
            } => {
                let bar = new_bar(ProgressBar::new_spinner(), spinner_style());
                bar.set_message(job_label(kind, &label));
                self.jobs.insert((kind, job_id), bar);
            }
            DepotEvent::JobFinished {
                kind,
                job_id,
                outcome,
            } => {
                if let Some(bar) = self.jobs.remove(&(kind, job_id)) {
                    bar.finish_and_clear();
                }
                match outcome {
                    JobOutcome::Failed(reason) => debug!("job {job_id} failed: {reason}"),
                    JobOutcome::Aborted => debug!("job {job_id} aborted"),
                    JobOutcome::Completed => {}
                }
            }
            DepotEvent::BatchProgress {
                completed,
                total,
                failed,
            } => {
                let bar = self
                    .batch
                    .get_or_insert_with(|| new_bar(ProgressBar::new(total.into()), batch_style()));
                bar.set_length(total.into());
                bar.set_position(completed.into());
                if failed > 0 {
                    bar.set_message(format!("{}", Colored(Yellow, format!("{failed} failed"))));
                }
                if completed >= total {
                    if let Some(bar) = self.batch.take() {
                        bar.finish_and_clear();
                    }
                }
            }
            DepotEvent::Metadata {
                repo_name,
                key,
                stage,
            } => {
                match stage {
                    MetadataStage::StaleCache => {
                        debug!("[{repo_name}] {key}: using cached copy after network failure")
                    }
                    stage => debug!("[{repo_name}] {key}: {stage:?}"),
                }
            }
            DepotEvent::DegradedMode {
                repo_name,
                reason,
            } => {
                warn!("{repo_name} is offline, using cached metadata ({reason})");
            }
            DepotEvent::Log {
                level,
                message,
            } => {
                match level {
                    LogLevel::Debug => debug!("{message}"),
                    LogLevel::Info => info!("{message}"),
                    LogLevel::Warning => warn!("{message}"),
                    LogLevel::Error => error!("{message}"),
                }
            }
        }
    }

    fn clear(&mut self) {
        for (_, bar) in self.jobs.drain() {
            bar.finish_and_clear();
        }
        if let Some(bar) = self.batch.take() {
            bar.finish_and_clear();
        }
    }
}

/// Renders events from `receiver` until every sender is dropped.
pub fn spawn_event_handler(receiver: Receiver<DepotEvent>) -> ProgressGuard {
    let handle = thread::spawn(move || {
        let mut renderer = Renderer::default();
        for event in receiver {
            renderer.handle(event);
        }
        renderer.clear();
    });

    ProgressGuard {
        handle: Some(handle),
    }
}
