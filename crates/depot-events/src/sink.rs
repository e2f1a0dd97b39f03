use std::sync::{
    mpsc::{self, Receiver, Sender},
    Mutex, MutexGuard, PoisonError,
};

use crate::{DepotEvent, JobKind, MetadataStage};

/// Receives scheduler and repository events.
///
/// Sinks are shared across worker threads, so `emit` must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DepotEvent);
}

/// Forwards events to a receiver, typically the CLI's progress renderer
/// thread. Events emitted after the receiver is gone are dropped.
pub struct ChannelSink {
    sender: Sender<DepotEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<DepotEvent>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender,
            },
            receiver,
        )
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: DepotEvent) {
        let _ = self.sender.send(event);
    }
}

pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: DepotEvent) {}
}

/// Records every event, with queries for the sequences tests assert on.
#[derive(Default)]
pub struct CollectorSink {
    events: Mutex<Vec<DepotEvent>>,
}

impl CollectorSink {
    // a panicking emitter must not hide the events recorded before it
    fn lock(&self) -> MutexGuard<'_, Vec<DepotEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<DepotEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the jobs of `kind`, in the order they were started.
    pub fn started_jobs(&self, kind: JobKind) -> Vec<u64> {
        self.lock()
            .iter()
            .filter_map(|event| {
                match event {
                    DepotEvent::JobStarted {
                        kind: k,
                        job_id,
                        ..
                    } if *k == kind => Some(*job_id),
                    _ => None,
                }
            })
            .collect()
    }

    /// `(key, stage)` pairs reported by the repository `repo_name`.
    pub fn metadata_stages(&self, repo_name: &str) -> Vec<(String, MetadataStage)> {
        self.lock()
            .iter()
            .filter_map(|event| {
                match event {
                    DepotEvent::Metadata {
                        repo_name: repo,
                        key,
                        stage,
                    } if repo == repo_name => Some((key.clone(), stage.clone())),
                    _ => None,
                }
            })
            .collect()
    }

    /// Repositories that entered degraded mode.
    pub fn degraded_repositories(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|event| {
                match event {
                    DepotEvent::DegradedMode {
                        repo_name, ..
                    } => Some(repo_name.clone()),
                    _ => None,
                }
            })
            .collect()
    }

    /// The last `(completed, total, failed)` batch report.
    pub fn last_batch_progress(&self) -> Option<(u32, u32, u32)> {
        self.lock().iter().rev().find_map(|event| {
            match event {
                DepotEvent::BatchProgress {
                    completed,
                    total,
                    failed,
                } => Some((*completed, *total, *failed)),
                _ => None,
            }
        })
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: DepotEvent) {
        self.lock().push(event);
    }
}
