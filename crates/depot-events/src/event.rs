/// All event types emitted by depot operations.
#[derive(Debug, Clone)]
pub enum DepotEvent {
    /// A scheduler moved a job from its queue into a running slot.
    JobStarted {
        kind: JobKind,
        job_id: u64,
        label: String,
    },
    /// A job reached a terminal state.
    JobFinished {
        kind: JobKind,
        job_id: u64,
        outcome: JobOutcome,
    },
    /// Progress of a batch being awaited.
    BatchProgress {
        completed: u32,
        total: u32,
        failed: u32,
    },
    /// Metadata lookup progress for one cache key of a repository.
    Metadata {
        repo_name: String,
        key: String,
        stage: MetadataStage,
    },
    /// A repository switched to serving cached metadata after a network failure.
    DegradedMode { repo_name: String, reason: String },
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Scheduler that owns a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Http,
    Process,
}

/// Terminal state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    Aborted,
}

/// Metadata lookup stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataStage {
    /// Fetching from the remote.
    Fetching,
    /// Server confirmed the cached copy is current (304 Not Modified).
    NotModified,
    /// Served from the local cache without touching the network.
    CacheHit,
    /// Served from the local cache because the network failed.
    StaleCache,
    /// Package does not exist in the repository.
    Absent,
    /// Fresh metadata stored.
    Stored,
}

/// Log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}
