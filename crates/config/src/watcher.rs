use crate::schema::Config;
use arc_swap::ArcSwap;
use promptgate_types::GatewayError;
use std::{
    path::PathBuf,
    sync::{Arc, mpsc},
    time::Duration,
};

/// Events closer together than this are treated as one save.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// Keeps the live configuration in sync with a YAML file.
///
/// Relays are built from a fresh snapshot per request, so a reload affects
/// new sessions only; sessions already running keep their settings.
pub struct ConfigWatcher {
    live: Arc<ArcSwap<Config>>,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Loads `path` and wraps the result for sharing.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the file cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn new(path: PathBuf) -> Result<Self, figment::Error> {
        let initial = Config::from_file(&path)?;
        Ok(Self {
            live: Arc::new(ArcSwap::from_pointee(initial)),
            path,
        })
    }

    #[must_use]
    pub fn load(&self) -> arc_swap::Guard<Arc<Config>> {
        self.live.load()
    }

    /// The shared handle handlers read snapshots from.
    #[must_use]
    pub fn arc(&self) -> Arc<ArcSwap<Config>> {
        Arc::clone(&self.live)
    }

    /// Re-reads the file and swaps it in if it parses and validates.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`]; the active configuration is left
    /// untouched.
    pub fn reload(&self) -> Result<Arc<Config>, GatewayError> {
        let candidate = Config::from_file(&self.path)
            .map_err(|e| GatewayError::Config(format!("{}: {e}", self.path.display())))?;
        candidate.validate()?;
        let candidate = Arc::new(candidate);
        self.live.store(Arc::clone(&candidate));
        tracing::info!(path = %self.path.display(), "configuration reloaded");
        Ok(candidate)
    }

    /// Watches the file on a blocking task and reloads after each burst of
    /// change events.
    ///
    /// If the OS watcher cannot be set up the failure is logged and the
    /// current configuration stays in effect.
    pub fn watch(self: Arc<Self>) {
        tokio::task::spawn_blocking(move || {
            if let Err(e) = self.watch_blocking() {
                tracing::warn!(path = %self.path.display(), error = %e, "config watching disabled");
            }
        });
    }

    fn watch_blocking(&self) -> notify::Result<()> {
        use notify::{RecursiveMode, Watcher as _};

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok_and(|event| !event.kind.is_access()) {
                let _ = tx.send(());
            }
        })?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        while rx.recv().is_ok() {
            drain_burst(&rx);
            if let Err(e) = self.reload() {
                tracing::warn!(error = %e, "config reload rejected");
            }
        }
        Ok(())
    }
}

fn drain_burst(rx: &mpsc::Receiver<()>) {
    while rx.recv_timeout(DEBOUNCE).is_ok() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "auth:\n  required: false\nopenai:\n  api_key: sk-test\n";

    fn config_file(dir: &tempfile::TempDir, port: u16) -> PathBuf {
        let path = dir.path().join("promptgate.yaml");
        std::fs::write(&path, format!("{VALID}port: {port}\n")).unwrap();
        path
    }

    #[test]
    fn test_initial_load_and_shared_handle() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = ConfigWatcher::new(config_file(&dir, 9999)).unwrap();
        assert_eq!(watcher.load().port, 9999);
        assert_eq!(watcher.arc().load().port, 9999);
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file(&dir, 8317);
        let watcher = ConfigWatcher::new(path).unwrap();
        let before = watcher.arc();

        config_file(&dir, 7777);
        let fresh = watcher.reload().unwrap();
        assert_eq!(fresh.port, 7777);
        // handles taken earlier see the new value
        assert_eq!(before.load().port, 7777);
    }

    #[test]
    fn test_reload_keeps_previous_on_validation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file(&dir, 8317);
        let watcher = ConfigWatcher::new(path.clone()).unwrap();

        // auth required without a key set URL
        std::fs::write(&path, "port: 1\nopenai:\n  api_key: sk-test\n").unwrap();
        assert!(matches!(watcher.reload(), Err(GatewayError::Config(_))));
        assert_eq!(watcher.load().port, 8317);
    }

    #[test]
    fn test_reload_keeps_previous_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file(&dir, 8317);
        let watcher = ConfigWatcher::new(path.clone()).unwrap();

        std::fs::write(&path, "port: [not a number\n").unwrap();
        let err = watcher.reload().unwrap_err();
        assert!(err.to_string().contains("promptgate.yaml"));
        assert_eq!(watcher.load().port, 8317);
    }

    #[test]
    fn test_drain_burst_consumes_pending_events() {
        let (tx, rx) = mpsc::channel();
        for _ in 0..5 {
            tx.send(()).unwrap();
        }
        drain_burst(&rx);
        assert!(rx.try_recv().is_err());
    }
}
