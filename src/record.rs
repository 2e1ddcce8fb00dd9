//! Background capture of stream traffic to durable storage.
//!
//! While a session is in the [`RecordState::Record`] state, every output
//! stream declared as a record source gets a dedicated thread that drains
//! the stream's queue, serializes each message through the session's codec
//! and appends the bytes to a per-stream file. Record failures degrade the
//! affected stream only; the rest of the session keeps running.
//!
//! Replay is a tracked extension point: selecting it is observable through
//! [`RecordState::Replay`], but no playback behavior exists yet.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::message::MessageCodec;
use crate::queue::OutputQueue;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Recording/replay state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordState {
    /// Neither recording nor replay is active.
    #[default]
    None,
    /// Record-source streams are being captured to files.
    Record,
    /// A replay source is selected (no playback behavior yet).
    Replay,
}

/// File extension for recorded streams.
pub const RECORD_FILE_EXTENSION: &str = "rec";

struct RecordStream {
    name: String,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Owns the record state and the per-stream capture threads of one session.
pub struct RecordController {
    state: RecordState,
    config_conflict: bool,
    streams: Vec<RecordStream>,
}

impl RecordController {
    /// Resolve the configuration and, when recording is enabled, start one
    /// capture thread per record-source queue in `sources`.
    ///
    /// Configuration problems (conflicting paths, missing or unwritable
    /// directories) disable the feature and are logged; they never fail the
    /// session.
    pub fn start(
        config: &SessionConfig,
        device_id: &str,
        sources: &[Arc<OutputQueue>],
        codec: Arc<dyn MessageCodec>,
    ) -> Self {
        let mut controller = Self {
            state: RecordState::None,
            config_conflict: false,
            streams: Vec::new(),
        };

        match (&config.record_path, &config.replay_path) {
            (Some(_), Some(_)) => {
                tracing::error!("{}", Error::ConfigConflict);
                controller.config_conflict = true;
            }
            (Some(record_path), None) => match validate_directory(record_path) {
                Ok(()) => {
                    controller.state = RecordState::Record;
                    for queue in sources {
                        match controller.start_stream(record_path, device_id, queue, &codec) {
                            Ok(()) => {}
                            Err(e) => {
                                tracing::error!(
                                    "record disabled for stream '{}': {}",
                                    queue.name(),
                                    e
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("record disabled: {}", e);
                }
            },
            (None, Some(replay_path)) => match validate_directory(replay_path) {
                Ok(()) => {
                    controller.state = RecordState::Replay;
                    tracing::info!("replay source selected: {}", replay_path.display());
                }
                Err(e) => {
                    tracing::error!("replay disabled: {}", e);
                }
            },
            (None, None) => {}
        }

        controller
    }

    /// Current record/replay state.
    pub fn state(&self) -> RecordState {
        self.state
    }

    /// Whether record and replay were configured together (both disabled).
    pub fn config_conflict(&self) -> bool {
        self.config_conflict
    }

    /// Names of the streams actually being captured.
    pub fn recorded_streams(&self) -> Vec<String> {
        self.streams.iter().map(|s| s.name.clone()).collect()
    }

    /// Clear every `running` flag and join every capture thread.
    ///
    /// The bound queues must already be closed so blocked pops return; each
    /// thread drains its queue's remaining buffered messages, then its file
    /// closes as the thread exits, before the join returns.
    pub fn stop(&mut self) {
        for stream in &self.streams {
            stream.running.store(false, Ordering::SeqCst);
        }
        for stream in &mut self.streams {
            if let Some(handle) = stream.thread.take() {
                if handle.join().is_err() {
                    tracing::error!("record thread for '{}' panicked", stream.name);
                }
            }
        }
        self.streams.clear();
    }

    fn start_stream(
        &mut self,
        directory: &Path,
        device_id: &str,
        queue: &Arc<OutputQueue>,
        codec: &Arc<dyn MessageCodec>,
    ) -> Result<()> {
        let path = record_file_path(directory, device_id, queue.name());
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        tracing::debug!("recording '{}' to {}", queue.name(), path.display());

        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let name = queue.name().to_string();
            let queue = Arc::clone(queue);
            let codec = Arc::clone(codec);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name(format!("fl-rec-{}", queue.name()))
                .spawn(move || record_loop(&name, file, queue, codec, running))?
        };

        self.streams.push(RecordStream {
            name: queue.name().to_string(),
            running,
            thread: Some(thread),
        });
        Ok(())
    }
}

impl Drop for RecordController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record_loop(
    name: &str,
    mut file: File,
    queue: Arc<OutputQueue>,
    codec: Arc<dyn MessageCodec>,
    running: Arc<AtomicBool>,
) {
    tracing::debug!("record thread for '{}' started", name);
    while running.load(Ordering::SeqCst) {
        let message = match queue.pop() {
            Ok(message) => message,
            // Queue closed and drained.
            Err(_) => break,
        };
        let bytes = match codec.serialize(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("error while recording '{}': {}", name, e);
                running.store(false, Ordering::SeqCst);
                break;
            }
        };
        if let Err(e) = file.write_all(&bytes) {
            tracing::error!("error while recording '{}': {}", name, e);
            running.store(false, Ordering::SeqCst);
            break;
        }
        metrics::counter!(crate::observability::RECORDED_BYTES, "queue" => name.to_string())
            .increment(bytes.len() as u64);
        std::thread::yield_now();
    }
    if let Err(e) = file.flush() {
        tracing::error!("error while flushing record file for '{}': {}", name, e);
    }
    tracing::debug!("record thread for '{}' finished", name);
}

/// Deterministic record file name: `{device_id}_{stream}.rec` inside the
/// target directory.
pub fn record_file_path(directory: &Path, device_id: &str, stream: &str) -> PathBuf {
    directory.join(format!("{}_{}.{}", device_id, stream, RECORD_FILE_EXTENSION))
}

/// Check that `path` is an existing directory we can write into, by
/// creating and removing a probe file.
fn validate_directory(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(Error::PathUnavailable(path.display().to_string()));
    }
    let probe = path.join(format!(".framelink-probe-{}", std::process::id()));
    match File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            Ok(())
        }
        Err(_) => Err(Error::PathUnavailable(path.display().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_file_path_layout() {
        let path = record_file_path(Path::new("/tmp/cap"), "14442C10D13EABCE00", "imu");
        assert_eq!(
            path,
            PathBuf::from("/tmp/cap/14442C10D13EABCE00_imu.rec")
        );
    }

    #[test]
    fn test_validate_missing_directory() {
        let result = validate_directory(Path::new("/definitely/not/a/directory"));
        assert!(matches!(result, Err(Error::PathUnavailable(_))));
    }

    #[test]
    fn test_default_state_is_none() {
        assert_eq!(RecordState::default(), RecordState::None);
    }
}
