use std::{path::PathBuf, rc::Rc, sync::Arc};

use depot_config::config::{config_path, Config};
use depot_core::RepositorySet;
use depot_dl::{HttpDownloader, Loop, ProcessExecutor};
use depot_events::{ChannelSink, EventSinkHandle, NullSink};
use miette::Result;
use tracing::debug;

use crate::{
    cli::Args,
    progress::{spawn_event_handler, ProgressGuard},
    utils::progress_enabled,
};

/// The schedulers behind one wait loop and the configured repositories.
pub struct DepotContext {
    pub event_loop: Rc<Loop>,
    pub repositories: RepositorySet,
    pub events: EventSinkHandle,
}

impl DepotContext {
    pub fn new(config: &Config, events: EventSinkHandle) -> Result<Self> {
        let http = Rc::new(HttpDownloader::new(config, Arc::clone(&events)));
        let process = Rc::new(ProcessExecutor::new(config, Arc::clone(&events)));
        let event_loop = Rc::new(Loop::new(http, Some(process)));
        let repositories =
            RepositorySet::from_config(config, Rc::clone(&event_loop), Arc::clone(&events))?;
        debug!(
            "{} repositories configured, cache at {}",
            repositories.repositories().len(),
            config.cache_dir().display()
        );

        Ok(Self {
            event_loop,
            repositories,
            events,
        })
    }
}

pub fn resolve_config_path(args: &Args) -> PathBuf {
    args.config
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(config_path)
}

pub fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(resolve_config_path(args))?;
    if args.offline {
        config.disable_network = Some(true);
    }
    Ok(config)
}

/// Builds the context, with a progress renderer when progress is enabled.
pub fn create_context(config: &Config) -> Result<(DepotContext, Option<ProgressGuard>)> {
    if progress_enabled() {
        let (sink, receiver) = ChannelSink::new();
        let events: EventSinkHandle = Arc::new(sink);
        let ctx = DepotContext::new(config, events)?;
        Ok((ctx, Some(spawn_event_handler(receiver))))
    } else {
        let ctx = DepotContext::new(config, Arc::new(NullSink))?;
        Ok((ctx, None))
    }
}
