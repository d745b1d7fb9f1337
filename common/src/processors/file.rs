// File processor: OS-level filesystem notifications turned into trigger firings
//
// The notify backend calls back on its own thread. Events are pushed through
// an unbounded channel and filtered and fired from a tokio task.

use super::{
    execute_flow, fire_and_log, FirerHandle, ProcessContext, ProcessResult, Shutdown, TriggerProcessor,
};
use crate::errors::{ConfigError, TriggerError};
use crate::gateway::FlowGateway;
use crate::models::{Trigger, TriggerType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const TRIGGER_TYPE: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

fn all_event_kinds() -> Vec<FileEventKind> {
    vec![
        FileEventKind::Created,
        FileEventKind::Modified,
        FileEventKind::Deleted,
        FileEventKind::Moved,
    ]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFileConfig {
    path: String,
    #[serde(default)]
    recursive: bool,
    #[serde(default = "all_event_kinds")]
    events: Vec<FileEventKind>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    min_size: Option<u64>,
    #[serde(default)]
    max_size: Option<u64>,
    #[serde(default)]
    include_hash: bool,
}

/// Parsed file trigger configuration
#[derive(Debug, Clone)]
pub struct FileWatchConfig {
    pub path: PathBuf,
    pub recursive: bool,
    pub events: Vec<FileEventKind>,
    pub pattern: Option<glob::Pattern>,
    /// Lowercase, with a leading dot
    pub extensions: Vec<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub include_hash: bool,
}

impl FileWatchConfig {
    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConfigError> {
        let raw: RawFileConfig =
            serde_json::from_value(config.clone()).map_err(|e| ConfigError::InvalidShape {
                trigger_type: TRIGGER_TYPE.to_string(),
                reason: e.to_string(),
            })?;

        if raw.path.trim().is_empty() {
            return Err(ConfigError::MissingField("path".to_string()));
        }

        let pattern = raw
            .pattern
            .filter(|p| !p.is_empty())
            .map(|p| {
                glob::Pattern::new(&p).map_err(|e| ConfigError::InvalidFieldValue {
                    field: "pattern".to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        if let (Some(min), Some(max)) = (raw.min_size, raw.max_size) {
            if min > max {
                return Err(ConfigError::InvalidFieldValue {
                    field: "minSize".to_string(),
                    reason: format!("{} exceeds maxSize {}", min, max),
                });
            }
        }

        let extensions = raw
            .extensions
            .iter()
            .map(|ext| {
                let ext = ext.trim().to_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{}", ext)
                }
            })
            .collect();

        Ok(Self {
            path: PathBuf::from(raw.path),
            recursive: raw.recursive,
            events: raw.events,
            pattern,
            extensions,
            min_size: raw.min_size,
            max_size: raw.max_size,
            include_hash: raw.include_hash,
        })
    }

    /// Name-based checks: event class, glob and extension
    fn accepts_name(&self, kind: FileEventKind, path: &Path) -> bool {
        if !self.events.contains(&kind) {
            return false;
        }

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();

        if let Some(pattern) = &self.pattern {
            if !pattern.matches(&filename) {
                return false;
            }
        }

        if !self.extensions.is_empty() {
            let lower = filename.to_lowercase();
            if !self.extensions.iter().any(|ext| lower.ends_with(ext.as_str())) {
                return false;
            }
        }
        true
    }

    fn accepts_size(&self, size: u64) -> bool {
        self.min_size.map_or(true, |min| size >= min) && self.max_size.map_or(true, |max| size <= max)
    }
}

/// A filesystem event reduced to the classes triggers care about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
    pub src_path: Option<PathBuf>,
}

/// Map a notify event to at most one trigger event.
///
/// A rename reported with both ends becomes `moved`; a lone rename end is
/// treated as the file appearing (`created`) or leaving (`deleted`).
pub fn classify(event: &notify::Event) -> Option<FileEvent> {
    let first = event.paths.first()?.clone();
    let single = |kind| {
        Some(FileEvent {
            kind,
            path: first.clone(),
            src_path: None,
        })
    };

    match event.kind {
        EventKind::Create(CreateKind::Folder) => None,
        EventKind::Create(_) => single(FileEventKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Some(FileEvent {
            kind: FileEventKind::Moved,
            path: event.paths.get(1).cloned().unwrap_or_else(|| first.clone()),
            src_path: Some(first.clone()),
        }),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => single(FileEventKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => single(FileEventKind::Deleted),
        EventKind::Modify(ModifyKind::Name(_)) => single(FileEventKind::Moved),
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Other) => single(FileEventKind::Modified),
        EventKind::Remove(_) => single(FileEventKind::Deleted),
        _ => None,
    }
}

fn to_utc(time: std::io::Result<std::time::SystemTime>) -> Option<String> {
    time.ok().map(|t| DateTime::<Utc>::from(t).to_rfc3339())
}

#[cfg(unix)]
fn permission_bits(metadata: &std::fs::Metadata) -> (String, bool) {
    use std::os::unix::fs::PermissionsExt;
    let mode = metadata.permissions().mode() & 0o777;
    (format!("{:o}", mode), mode & 0o111 != 0)
}

#[cfg(not(unix))]
fn permission_bits(metadata: &std::fs::Metadata) -> (String, bool) {
    let mode = if metadata.permissions().readonly() { "444" } else { "644" };
    (mode.to_string(), false)
}

/// Build the firing payload, or `None` when the event is filtered out
async fn describe(
    config: &FileWatchConfig,
    event: &FileEvent,
    hash_max_bytes: u64,
) -> Option<serde_json::Value> {
    if !config.accepts_name(event.kind, &event.path) {
        return None;
    }

    let mut record = serde_json::json!({
        "event_type": event.kind,
        "path": event.path.to_string_lossy(),
        "filename": event.path.file_name().map(|n| n.to_string_lossy().into_owned()),
        "directory": event.path.parent().map(|p| p.to_string_lossy().into_owned()),
    });
    if let Some(src) = &event.src_path {
        record["src_path"] = src.to_string_lossy().into_owned().into();
    }

    if event.kind == FileEventKind::Deleted {
        return Some(record);
    }

    let metadata = match tokio::fs::metadata(&event.path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            // Gone again before we looked; nothing left to describe
            debug!(path = %event.path.display(), error = %e, "Skipping vanished file");
            return None;
        }
    };
    if metadata.is_dir() || !config.accepts_size(metadata.len()) {
        return None;
    }

    let (permissions, is_executable) = permission_bits(&metadata);
    record["size"] = metadata.len().into();
    record["created_at"] = to_utc(metadata.created()).into();
    record["modified_at"] = to_utc(metadata.modified()).into();
    record["permissions"] = permissions.into();
    record["is_executable"] = is_executable.into();

    if config.include_hash && metadata.len() <= hash_max_bytes {
        match tokio::fs::read(&event.path).await {
            Ok(contents) => record["hash"] = hex::encode(Sha256::digest(&contents)).into(),
            Err(e) => warn!(path = %event.path.display(), error = %e, "Failed to hash file"),
        }
    }

    Some(record)
}

/// How long one half of a rename waits for its partner
const RENAME_WINDOW: Duration = Duration::from_millis(250);

struct PendingRename {
    from: Option<PathBuf>,
    to: Option<PathBuf>,
    deadline: Instant,
}

impl PendingRename {
    fn resolve(self) -> Option<FileEvent> {
        let (kind, path, src_path) = match (self.from, self.to) {
            (Some(from), Some(to)) => (FileEventKind::Moved, to, Some(from)),
            (None, Some(to)) => (FileEventKind::Created, to, None),
            (Some(from), None) => (FileEventKind::Deleted, from, None),
            (None, None) => return None,
        };
        Some(FileEvent { kind, path, src_path })
    }
}

/// Collapses the halves of a rename into a single event.
///
/// Backends that know both ends report `From` and `To` sharing a tracker,
/// usually followed by a `Both` event. Halves are held for a short window;
/// a `Both` for the same tracker replaces them, and a lone half that
/// outlives the window is reported as a create or delete.
#[derive(Default)]
struct RenamePairer {
    pending: HashMap<usize, PendingRename>,
}

impl RenamePairer {
    fn accept(&mut self, event: &notify::Event, now: Instant) -> Vec<FileEvent> {
        if let (EventKind::Modify(ModifyKind::Name(mode)), Some(tracker)) =
            (&event.kind, event.attrs.tracker())
        {
            match mode {
                RenameMode::From | RenameMode::To => {
                    if let Some(path) = event.paths.first() {
                        let entry = self.pending.entry(tracker).or_insert_with(|| PendingRename {
                            from: None,
                            to: None,
                            deadline: now + RENAME_WINDOW,
                        });
                        if *mode == RenameMode::From {
                            entry.from = Some(path.clone());
                        } else {
                            entry.to = Some(path.clone());
                        }
                    }
                    return Vec::new();
                }
                RenameMode::Both => {
                    self.pending.remove(&tracker);
                }
                _ => {}
            }
        }
        classify(event).into_iter().collect()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    fn flush_expired(&mut self, now: Instant) -> Vec<FileEvent> {
        let mut expired: Vec<(Instant, usize)> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(tracker, pending)| (pending.deadline, *tracker))
            .collect();
        expired.sort();

        expired
            .into_iter()
            .filter_map(|(_, tracker)| self.pending.remove(&tracker))
            .filter_map(PendingRename::resolve)
            .collect()
    }
}

async fn run_watch(
    trigger_id: Uuid,
    config: FileWatchConfig,
    firer: FirerHandle,
    hash_max_bytes: u64,
    mut events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    mut shutdown: Shutdown,
) {
    let mut renames = RenamePairer::default();

    loop {
        let flush_at = renames.next_deadline();
        let ready = tokio::select! {
            biased;
            _ = shutdown.wait() => {
                debug!(%trigger_id, "File watch stopping");
                return;
            }
            received = events.recv() => match received {
                Some(Ok(event)) => renames.accept(&event, Instant::now()),
                Some(Err(e)) => {
                    warn!(%trigger_id, error = %e, "File watch error");
                    Vec::new()
                }
                None => return,
            },
            _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                renames.flush_expired(Instant::now())
            }
        };

        for file_event in ready {
            let Some(payload) = describe(&config, &file_event, hash_max_bytes).await else {
                continue;
            };
            if shutdown.requested() {
                debug!(%trigger_id, "File watch stopping");
                return;
            }
            if !fire_and_log(&firer, trigger_id, payload).await {
                return;
            }
        }
    }
}

struct ActiveWatch {
    // Dropping the watcher stops the notification thread
    _watcher: RecommendedWatcher,
    shutdown_tx: broadcast::Sender<()>,
}

pub struct FileProcessor {
    gateway: Arc<dyn FlowGateway>,
    firer: FirerHandle,
    hash_max_bytes: u64,
    watches: Mutex<HashMap<Uuid, ActiveWatch>>,
}

impl FileProcessor {
    pub fn new(gateway: Arc<dyn FlowGateway>, firer: FirerHandle, hash_max_bytes: u64) -> Self {
        Self {
            gateway,
            firer,
            hash_max_bytes,
            watches: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_watching(&self, trigger_id: Uuid) -> bool {
        self.watches
            .lock()
            .map(|watches| watches.contains_key(&trigger_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl TriggerProcessor for FileProcessor {
    fn trigger_type(&self) -> TriggerType {
        TriggerType::File
    }

    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    async fn setup(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        self.teardown(trigger).await?;

        let config = FileWatchConfig::from_config(&trigger.config)?;
        if !tokio::fs::try_exists(&config.path).await.unwrap_or(false) {
            return Err(ConfigError::PathNotFound(config.path.display().to_string()).into());
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            // Receiver gone means the watch is being torn down
            let _ = event_tx.send(result);
        })
        .map_err(|e| TriggerError::TransientIo(format!("failed to create watcher: {}", e)))?;

        let mode = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&config.path, mode).map_err(|e| {
            TriggerError::TransientIo(format!("failed to watch {}: {}", config.path.display(), e))
        })?;

        info!(path = %config.path.display(), recursive = config.recursive, "File watch armed");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(run_watch(
            trigger.id,
            config,
            self.firer.clone(),
            self.hash_max_bytes,
            event_rx,
            Shutdown::new(shutdown_rx),
        ));

        self.watches
            .lock()
            .map_err(|_| TriggerError::ServiceUnavailable)?
            .insert(
                trigger.id,
                ActiveWatch {
                    _watcher: watcher,
                    shutdown_tx,
                },
            );
        Ok(())
    }

    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    async fn teardown(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        let removed = self
            .watches
            .lock()
            .map_err(|_| TriggerError::ServiceUnavailable)?
            .remove(&trigger.id);

        if let Some(watch) = removed {
            let _ = watch.shutdown_tx.send(());
            info!("File watch disarmed");
        }
        Ok(())
    }

    async fn process(&self, context: ProcessContext<'_>) -> Result<ProcessResult, TriggerError> {
        execute_flow(&self.gateway, context).await
    }
}
