use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::event::OutputRecord;
use crate::variation::Variation;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Could not write {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination of the records that survive a channel's cutflow.
pub trait Sink {
    fn write(
        &mut self,
        variation: &Variation,
        channel: &str,
        record: &OutputRecord,
    ) -> Result<(), SinkError>;

    /// Make the written output visible. Nothing written before a successful `finish` may be
    /// left behind if the job aborts.
    fn finish(&mut self) -> Result<(), SinkError>;
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    rows: Vec<(String, String, OutputRecord)>,
    finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn records(&self, variation: &str, channel: &str) -> Vec<&OutputRecord> {
        //! Records written for `channel` in the variation labelled `variation`.
        self.rows
            .iter()
            .filter(|(v, c, _)| v == variation && c == channel)
            .map(|(_, _, record)| record)
            .collect()
    }
}

impl Sink for MemorySink {
    fn write(
        &mut self,
        variation: &Variation,
        channel: &str,
        record: &OutputRecord,
    ) -> Result<(), SinkError> {
        self.rows
            .push((variation.label(), channel.to_string(), record.clone()));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.finished = true;
        Ok(())
    }
}

struct PendingFile {
    temporary: PathBuf,
    target: PathBuf,
    writer: BufWriter<File>,
}

/// Writes one JSON object per line, one file per channel and variation.
///
/// Lines go to hidden `.part` files that are renamed on [`Sink::finish`]; dropping the sink
/// before that removes them.
pub struct JsonLinesSink {
    directory: PathBuf,
    files: IndexMap<String, PendingFile>,
    finished: bool,
}

impl JsonLinesSink {
    pub fn new(directory: impl AsRef<Path>) -> Result<Self, SinkError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|source| SinkError::Io {
            path: directory.clone(),
            source,
        })?;
        Ok(Self {
            directory,
            files: IndexMap::new(),
            finished: false,
        })
    }

    pub fn file_name(variation: &Variation, channel: &str) -> String {
        if variation.is_nominal() {
            format!("{channel}.jsonl")
        } else {
            format!("{channel}_{variation}.jsonl")
        }
    }

    fn pending(&mut self, variation: &Variation, channel: &str) -> Result<&mut PendingFile, SinkError> {
        let name = Self::file_name(variation, channel);
        if !self.files.contains_key(&name) {
            let target = self.directory.join(&name);
            let temporary = self.directory.join(format!(".{name}.part"));
            let file = File::create(&temporary).map_err(|source| SinkError::Io {
                path: temporary.clone(),
                source,
            })?;
            debug!("Opened {:?}", temporary);
            self.files.insert(
                name.clone(),
                PendingFile {
                    temporary,
                    target,
                    writer: BufWriter::new(file),
                },
            );
        }
        self.files.get_mut(&name).ok_or_else(|| SinkError::Io {
            path: self.directory.join(&name),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "output file was not opened"),
        })
    }
}

impl Sink for JsonLinesSink {
    fn write(
        &mut self,
        variation: &Variation,
        channel: &str,
        record: &OutputRecord,
    ) -> Result<(), SinkError> {
        let pending = self.pending(variation, channel)?;
        serde_json::to_writer(&mut pending.writer, record)?;
        pending
            .writer
            .write_all(b"\n")
            .map_err(|source| SinkError::Io {
                path: pending.temporary.clone(),
                source,
            })
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        //! Flush every file, then publish them all. If any rename fails, the files already
        //! published and the remaining temporary files are removed.
        for pending in self.files.values_mut() {
            pending.writer.flush().map_err(|source| SinkError::Io {
                path: pending.temporary.clone(),
                source,
            })?;
        }
        let mut published: Vec<&Path> = Vec::new();
        for pending in self.files.values() {
            if let Err(source) = fs::rename(&pending.temporary, &pending.target) {
                warn!("Could not publish {:?}, removing {} written files", pending.target, published.len());
                for target in published {
                    let _ = fs::remove_file(target);
                }
                for pending in self.files.values() {
                    let _ = fs::remove_file(&pending.temporary);
                }
                return Err(SinkError::Io {
                    path: pending.target.clone(),
                    source,
                });
            }
            published.push(&pending.target);
        }
        for pending in self.files.values() {
            info!("Written {:?}", pending.target);
        }
        self.finished = true;
        Ok(())
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        for pending in self.files.values() {
            let _ = fs::remove_file(&pending.temporary);
        }
    }
}

/// A sink shared between the chunks of a parallel run.
pub struct SharedSink<K: Sink> {
    inner: Arc<Mutex<K>>,
}

impl<K: Sink> Clone for SharedSink<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Sink> SharedSink<K> {
    pub fn new(sink: K) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, K> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> Option<K> {
        //! The wrapped sink, if no other clone is alive.
        Arc::try_unwrap(self.inner).ok().map(Mutex::into_inner)
    }
}

impl<K: Sink> Sink for SharedSink<K> {
    fn write(
        &mut self,
        variation: &Variation,
        channel: &str,
        record: &OutputRecord,
    ) -> Result<(), SinkError> {
        self.inner.lock().write(variation, channel, record)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.inner.lock().finish()
    }
}
