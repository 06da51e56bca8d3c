use std::{
    collections::HashSet,
    ffi::OsString,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    config::{loader::load_config, models::ControlPlaneConfig},
    ports::config_provider::ConfigProvider,
};

/// Configuration provider that loads from a local file and watches it, plus every document
/// the configuration references, for changes.
pub struct FileConfigProvider {
    path: PathBuf,
    config_name: OsString,
    /// File names whose changes are reported.
    tracked: Arc<RwLock<HashSet<OsString>>>,
    watched_dirs: Mutex<HashSet<PathBuf>>,
    watcher: Mutex<notify::RecommendedWatcher>,
    update_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config_name = path
            .file_name()
            .ok_or_else(|| eyre!("Invalid config path: {}", path.display()))?
            .to_owned();

        // One pending signal is enough: a reload reads every file anyway.
        let (tx, rx) = mpsc::channel(1);
        let tracked = Arc::new(RwLock::new(HashSet::from([config_name.clone()])));

        let names = tracked.clone();
        let watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if !(event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                        {
                            return;
                        }
                        let Ok(names) = names.read() else {
                            return;
                        };
                        if event
                            .paths
                            .iter()
                            .filter_map(|p| p.file_name())
                            .any(|name| names.contains(name))
                        {
                            tracing::debug!(kind = ?event.kind, paths = ?event.paths, "watched file changed");
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::error!("File watch error: {:?}", e),
                }
            })
            .wrap_err("Failed to create file watcher")?;

        let provider = Self {
            config_name,
            tracked,
            watched_dirs: Mutex::new(HashSet::new()),
            watcher: Mutex::new(watcher),
            update_rx: Mutex::new(Some(rx)),
            path,
        };
        provider.watch_directory(&watch_dir(&provider.path))?;
        Ok(provider)
    }

    fn watch_directory(&self, dir: &Path) -> Result<()> {
        let mut dirs = self
            .watched_dirs
            .lock()
            .map_err(|_| eyre!("watched directory set poisoned"))?;
        if dirs.contains(dir) {
            return Ok(());
        }

        let mut watcher = self
            .watcher
            .lock()
            .map_err(|_| eyre!("file watcher poisoned"))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .wrap_err_with(|| format!("Failed to watch directory {}", dir.display()))?;
        dirs.insert(dir.to_path_buf());
        Ok(())
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<ControlPlaneConfig> {
        let path_str = self
            .path
            .to_str()
            .ok_or_else(|| eyre!("Invalid path: {}", self.path.display()))?;
        load_config(path_str).await
    }

    fn track_documents(&self, config: &ControlPlaneConfig) -> Result<()> {
        let documents: Vec<PathBuf> = config
            .fleets
            .iter()
            .flat_map(|fleet| fleet.source_paths())
            .map(PathBuf::from)
            .collect();

        for document in &documents {
            self.watch_directory(&watch_dir(document))?;
        }

        let mut names: HashSet<OsString> = documents
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_owned()))
            .collect();
        names.insert(self.config_name.clone());

        *self
            .tracked
            .write()
            .map_err(|_| eyre!("tracked document set poisoned"))? = names;
        Ok(())
    }

    fn watch(&self) -> Result<mpsc::Receiver<()>> {
        self.update_rx
            .lock()
            .map_err(|_| eyre!("update channel poisoned"))?
            .take()
            .ok_or_else(|| eyre!("watch can only be called once"))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::tempdir;
    use tokio::time::{Duration, sleep};

    use super::*;

    fn write(path: &Path, content: &str) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    #[tokio::test]
    async fn test_file_config_provider() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("kusk.yaml");
        write(&file_path, "distribution_addr: \"127.0.0.1:18010\"\n")?;

        let provider = FileConfigProvider::new(&file_path)?;
        let config = provider.load_config().await?;
        assert_eq!(config.distribution_addr, "127.0.0.1:18010");

        let mut rx = provider.watch()?;
        assert!(provider.watch().is_err());

        sleep(Duration::from_millis(100)).await;
        write(&file_path, "distribution_addr: \"127.0.0.1:19010\"\n")?;

        let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(notification.is_ok(), "Timed out waiting for config update");
        assert!(notification.unwrap().is_some(), "Channel closed unexpectedly");

        let config = provider.load_config().await?;
        assert_eq!(config.distribution_addr, "127.0.0.1:19010");
        Ok(())
    }

    #[tokio::test]
    async fn test_document_change_is_reported() -> Result<()> {
        let config_dir = tempdir()?;
        let docs_dir = tempdir()?;
        let document = docs_dir.path().join("todos.yaml");
        write(&document, "openapi: 3.0.0\n")?;

        let file_path = config_dir.path().join("kusk.yaml");
        write(
            &file_path,
            &format!(
                "fleets:\n  - id: default\n    apis:\n      - name: todos\n        spec_path: {}\n",
                document.display()
            ),
        )?;

        let provider = FileConfigProvider::new(&file_path)?;
        let config = provider.load_config().await?;
        provider.track_documents(&config)?;
        let mut rx = provider.watch()?;

        sleep(Duration::from_millis(100)).await;
        write(&document, "openapi: 3.0.1\n")?;

        let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(notification.is_ok(), "Timed out waiting for document update");
        Ok(())
    }
}
