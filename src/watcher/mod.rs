//! Filesystem watcher for the provider data directory.
//!
//! Editors produce bursts of events for a single save. Each settings
//! path carries a generation counter: every event bumps it and schedules
//! a settle task, and only the task that still holds the latest
//! generation after the debounce window acts. N rapid writes therefore
//! collapse into one reconciliation.

use crate::config::store::SETTINGS_FILE;
use crate::core::router::Router;
use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct ConfigWatcher {
    router: Arc<Router>,
    debounce: Duration,
    generations: Arc<DashMap<PathBuf, u64>>,
    // Dropping the watcher stops event delivery.
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `root` recursively. Returns once the watch is
    /// registered; reconciliation happens on background tasks.
    pub fn start(
        router: Arc<Router>,
        root: &Path,
        debounce: Duration,
    ) -> notify::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => {
                    error!("watch error: {}", e);
                }
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        info!(path = %root.display(), debounce_ms = debounce.as_millis() as u64, "configuration watcher started");

        let generations = Arc::new(DashMap::new());
        let this = Self {
            router,
            debounce,
            generations,
            _watcher: watcher,
        };
        this.spawn_dispatcher(rx);
        Ok(this)
    }

    fn spawn_dispatcher(&self, mut rx: mpsc::UnboundedReceiver<Event>) {
        let router = Arc::clone(&self.router);
        let generations = Arc::clone(&self.generations);
        let debounce = self.debounce;

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    continue;
                }

                for path in settings_paths(&router, &event) {
                    schedule(&router, &generations, debounce, path);
                }
            }
            debug!("watcher event channel closed");
        });
    }
}

/// Settings files touched by this event. A deleted provider directory is
/// mapped back to the settings file that used to live inside it.
fn settings_paths(router: &Router, event: &Event) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for path in &event.paths {
        if path.file_name().and_then(|n| n.to_str()) == Some(SETTINGS_FILE) {
            paths.push(path.clone());
            continue;
        }
        if matches!(event.kind, EventKind::Remove(_)) {
            let candidate = path.join(SETTINGS_FILE);
            if router.registry().name_for_path(&candidate).is_some() {
                paths.push(candidate);
            }
        }
    }
    paths
}

fn schedule(
    router: &Arc<Router>,
    generations: &Arc<DashMap<PathBuf, u64>>,
    debounce: Duration,
    path: PathBuf,
) {
    let generation = {
        let mut entry = generations.entry(path.clone()).or_insert(0);
        *entry += 1;
        *entry
    };
    debug!(path = %path.display(), generation, "change detected, debouncing");

    let router = Arc::clone(router);
    let generations = Arc::clone(generations);
    tokio::spawn(async move {
        tokio::time::sleep(debounce).await;

        // A newer event superseded this one during the window.
        if generations
            .remove_if(&path, |_, latest| *latest == generation)
            .is_none()
        {
            return;
        }

        if let Err(e) = router.reconcile_path(&path).await {
            warn!(path = %path.display(), "reconciliation failed: {}", e);
        }
    });
}
