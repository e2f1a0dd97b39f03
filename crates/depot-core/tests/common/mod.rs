#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    path::Path,
    rc::Rc,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use depot_config::repository::RepositoryConfig;
use depot_dl::{
    AbortSignal, DownloaderOptions, FetchRequest, HttpDownloader, Loop, Response, Transport,
};
use depot_events::null_sink;
use depot_registry::{ComposerRepository, Package};
use serde_json::Value;

/// Canned responses by URL; unknown URLs answer 404.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<BTreeMap<String, (u16, Vec<u8>)>>,
    requests: Mutex<Vec<String>>,
    arrived: AtomicUsize,
    rendezvous: AtomicUsize,
    pub max_concurrent: AtomicUsize,
    current: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: &str, body: &Value) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (200, body.to_string().into_bytes()));
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Holds each further request until `count` requests have arrived, or
    /// a second has passed.
    pub fn arm_rendezvous(&self, count: usize) {
        self.arrived.store(0, Ordering::SeqCst);
        self.rendezvous.store(count, Ordering::SeqCst);
    }
}

impl Transport for FakeTransport {
    fn perform(&self, request: &FetchRequest, _abort: &AbortSignal) -> depot_dl::Result<Response> {
        self.requests.lock().unwrap().push(request.url.clone());

        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);
        self.arrived.fetch_add(1, Ordering::SeqCst);
        let needed = self.rendezvous.load(Ordering::SeqCst);
        let started = Instant::now();
        while needed > 0
            && self.arrived.load(Ordering::SeqCst) < needed
            && started.elapsed() < Duration::from_secs(1)
        {
            thread::sleep(Duration::from_millis(1));
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        let routes = self.routes.lock().unwrap();
        Ok(match routes.get(&request.url) {
            Some((status, body)) => Response::new(request.url.clone(), *status, body.clone()),
            None => Response::new(request.url.clone(), 404, Vec::new()),
        })
    }
}

pub fn event_loop(transport: Arc<FakeTransport>) -> Rc<Loop> {
    let http = HttpDownloader::with_transport(transport, DownloaderOptions::default(), null_sink());
    Rc::new(Loop::new(Rc::new(http), None))
}

pub fn composer(name: &str, url: &str, event_loop: &Rc<Loop>, cache: &Path) -> Rc<ComposerRepository> {
    Rc::new(
        ComposerRepository::new(
            RepositoryConfig::new(name, url),
            Rc::clone(event_loop),
            cache,
            null_sink(),
        )
        .unwrap(),
    )
}

pub fn package(name: &str, version: &str, repository: &str) -> Package {
    Package::from_json(
        &serde_json::json!({"name": name, "version": version}),
        repository,
    )
    .unwrap()
}
