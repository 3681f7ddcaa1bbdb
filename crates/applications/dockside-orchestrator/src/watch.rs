//! Workspace file watching
//!
//! A recursive `notify` watcher whose callback forwards changed paths into
//! tokio channels. Paths under any dot-prefixed directory (`.git`, `.idea`,
//! ...) and dotfiles are dropped, as are access-only events.

use crate::error::{OrchestratorError, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Channels fed by a file watcher
pub struct Watch {
    /// Changed paths, one batch per filesystem event
    pub events: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    pub errors: mpsc::UnboundedReceiver<notify::Error>,
    // dropping the watcher stops it and closes both channels
    inner: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl Watch {
    /// Watch `root` recursively
    pub fn spawn(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);

        let (events_tx, events) = mpsc::unbounded_channel();
        let (errors_tx, errors) = mpsc::unbounded_channel();

        let callback_root = root.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let paths = accepted_paths(&callback_root, &event);
                    if !paths.is_empty() {
                        let _ = events_tx.send(paths);
                    }
                }
                Err(err) => {
                    let _ = errors_tx.send(err);
                }
            },
            Config::default(),
        )
        .map_err(|e| OrchestratorError::watch(e.to_string()))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| OrchestratorError::watch(format!("{}: {e}", root.display())))?;
        info!(root = %root.display(), "File watcher started");

        Ok(Self {
            events,
            errors,
            inner: Some(watcher),
        })
    }

    /// Build from existing channels, e.g. an external change feed
    pub fn from_channels(
        events: mpsc::UnboundedReceiver<Vec<PathBuf>>,
        errors: mpsc::UnboundedReceiver<notify::Error>,
    ) -> Self {
        Self {
            events,
            errors,
            inner: None,
        }
    }

    /// Stop watching. Events already queued can still be received.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("File watcher closed");
        }
        self.events.close();
        self.errors.close();
    }
}

/// Paths of `event` worth a rebuild
fn accepted_paths(root: &Path, event: &Event) -> Vec<PathBuf> {
    if matches!(event.kind, EventKind::Access(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| !is_hidden(root, p))
        .cloned()
        .collect()
}

/// Whether any segment of `path` below `root` starts with a dot
fn is_hidden(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::time::Duration;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut e = Event::new(kind);
        for p in paths {
            e = e.add_path(PathBuf::from(p));
        }
        e
    }

    #[test]
    fn test_hidden_segments_dropped() {
        let root = Path::new("/work/.config/app");
        let e = event(
            EventKind::Modify(ModifyKind::Any),
            &[
                "/work/.config/app/src/main.go",
                "/work/.config/app/.git/index",
                "/work/.config/app/web/.env",
                "/work/.config/app/web/node_modules/pkg/index.js",
            ],
        );
        assert_eq!(
            accepted_paths(root, &e),
            vec![
                PathBuf::from("/work/.config/app/src/main.go"),
                PathBuf::from("/work/.config/app/web/node_modules/pkg/index.js"),
            ]
        );
    }

    #[test]
    fn test_access_events_dropped() {
        let root = Path::new("/work");
        let e = event(EventKind::Access(AccessKind::Any), &["/work/main.rs"]);
        assert!(accepted_paths(root, &e).is_empty());

        let e = event(EventKind::Create(CreateKind::File), &["/work/main.rs"]);
        assert_eq!(accepted_paths(root, &e).len(), 1);
    }

    #[tokio::test]
    async fn test_watch_reports_visible_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut watch = Watch::spawn(dir.path()).unwrap();

        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git").join("HEAD"), "ref").unwrap();
        std::fs::write(dir.path().join("main.go"), "package main").unwrap();

        let paths = tokio::time::timeout(Duration::from_secs(10), watch.events.recv())
            .await
            .expect("no event within timeout")
            .unwrap();
        assert!(paths.iter().all(|p| p.ends_with("main.go")));

        watch.close();
        std::fs::write(dir.path().join("late.go"), "package main").unwrap();
        // drain whatever was queued before close; the channel then ends
        while let Ok(Some(_)) =
            tokio::time::timeout(Duration::from_secs(2), watch.events.recv()).await
        {}
    }
}
