//! Debounced filesystem watcher (A6): coalesces rapid writes within one window into a single
//! triggered incremental run, so a save-storm from a formatter or IDE doesn't fire the pipeline
//! once per write (P13).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};
use crate::orchestrator::{self, Mode, OrchestratorCtx};
use crate::parser_registry::ParserRegistry;
use crate::vector_store::VectorStore;

/// Runs until `should_stop` returns true (or forever, if it never does). Each debounce window
/// that saw at least one filesystem event triggers one `Mode::Incremental` orchestrator run
/// over `project_root`.
pub fn watch(
    project_root: &Path,
    target: &Path,
    config: &Config,
    registry: &ParserRegistry,
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
    mut should_stop: impl FnMut() -> bool,
) -> Result<()> {
    let (tx, rx) = channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|err| IndexError::Config { message: format!("failed to start watcher: {err}") })?;

    watcher
        .watch(target, RecursiveMode::Recursive)
        .map_err(|err| IndexError::Config { message: format!("failed to watch {}: {err}", target.display()) })?;

    info!(path = %target.display(), debounce_ms = config.watch.debounce_ms, "watching for changes");

    let debounce = Duration::from_millis(config.watch.debounce_ms);
    debounce_loop(&rx, debounce, should_stop, |changed| {
        info!(changed, "debounce window closed, running incremental index");
        let ctx = OrchestratorCtx { project_root, target, config, registry, embedder, store };
        if let Err(err) = orchestrator::run(Mode::Incremental, &ctx) {
            error!(error = %err, "incremental run triggered by watcher failed");
        }
    })
}

/// The coalescing logic itself, decoupled from `notify`'s OS watcher so it can be driven by a
/// synthetic event source in tests. Accumulates paths from every event that arrives before the
/// debounce window closes, then calls `on_fire` once with the distinct-path count and resets —
/// three writes inside one window become one call, not three (P13).
fn debounce_loop(
    rx: &std::sync::mpsc::Receiver<notify::Result<Event>>,
    debounce: Duration,
    mut should_stop: impl FnMut() -> bool,
    mut on_fire: impl FnMut(usize),
) -> Result<()> {
    let mut pending: HashSet<PathBuf> = HashSet::new();
    let mut window_deadline: Option<Instant> = None;

    loop {
        if should_stop() {
            return Ok(());
        }

        let wait = window_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(debounce);

        match rx.recv_timeout(wait) {
            Ok(Ok(event)) => {
                pending.extend(event.paths);
                window_deadline.get_or_insert_with(|| Instant::now() + debounce);
            }
            Ok(Err(err)) => warn!(error = %err, "watcher event error"),
            Err(RecvTimeoutError::Timeout) => {
                if window_deadline.is_some() && !pending.is_empty() {
                    on_fire(pending.len());
                    pending.clear();
                    window_deadline = None;
                } else {
                    window_deadline = None;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(IndexError::Config { message: "watcher channel disconnected".to_string() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingResult;
    use crate::vector_store::LocalVectorStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    struct FixedEmbedder;
    impl Embedder for FixedEmbedder {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<EmbeddingResult>>> {
            Ok(texts.iter().map(|_| Some(EmbeddingResult { vector: vec![0.1, 0.2], tokens: 1 })).collect())
        }
        fn vector_size(&self) -> usize {
            2
        }
    }

    /// Covers only prompt, graceful shutdown via `should_stop` — coalescing itself is covered by
    /// `rapid_events_within_one_window_coalesce_into_a_single_fire` below, against the real
    /// `notify` event watcher so this doesn't depend on filesystem timing.
    #[test]
    fn stops_promptly_when_should_stop_flips() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let registry = ParserRegistry::default_registry();
        let embedder = FixedEmbedder;
        let store = LocalVectorStore::open(&config.points_file_for(dir.path())).unwrap();

        let stopped = Arc::new(AtomicUsize::new(0));
        let stopped_writer = stopped.clone();
        let handle = thread::spawn({
            let root = dir.path().to_path_buf();
            move || {
                watch(&root, &root, &config, &registry, &embedder, &store, move || {
                    stopped_writer.load(Ordering::SeqCst) > 0
                })
            }
        });

        thread::sleep(Duration::from_millis(50));
        stopped.store(1, Ordering::SeqCst);
        let result = handle.join().unwrap();
        assert!(result.is_ok());
    }

    /// Three events sent back-to-back, all inside one debounce window, must fire `on_fire`
    /// exactly once with all three paths accounted for rather than once per event.
    #[test]
    fn rapid_events_within_one_window_coalesce_into_a_single_fire() {
        let (tx, rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
        let debounce = Duration::from_millis(40);

        for i in 0..3 {
            tx.send(Ok(Event::new(notify::EventKind::Any).add_path(PathBuf::from(format!("f{i}.py")))))
                .unwrap();
        }

        let fires = Arc::new(AtomicUsize::new(0));
        let fires_writer = fires.clone();
        let last_changed = Arc::new(AtomicUsize::new(0));
        let last_changed_writer = last_changed.clone();
        let stop_after = Instant::now() + Duration::from_millis(200);

        debounce_loop(
            &rx,
            debounce,
            || Instant::now() > stop_after,
            move |changed| {
                fires_writer.fetch_add(1, Ordering::SeqCst);
                last_changed_writer.store(changed, Ordering::SeqCst);
            },
        )
        .unwrap();

        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert_eq!(last_changed.load(Ordering::SeqCst), 3);
    }
}
