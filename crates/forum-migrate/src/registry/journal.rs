//! Append-only JSON-lines journal of identifier mappings.
//!
//! Each mapping is one line, flushed and synced before `insert` returns. A
//! crash can only leave a partial final line. It is dropped on load and cut
//! off before the next append, so new mappings always start on a fresh line.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::backend::{IdentityMapping, InsertOutcome, RegistryBackend};
use crate::error::{MigrateError, Result};

const TAIL_CHUNK: usize = 8192;

pub struct JournalBackend {
    path: PathBuf,
    file: Arc<Mutex<Option<File>>>,
}

impl JournalBackend {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Run file I/O off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MigrateError::registry(format!("journal task failed: {}", e)))?
}

/// Open the journal for appending, repairing a torn final line first.
fn open_journal(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    repair_tail(&mut file, path)?;
    drop(file);

    Ok(OpenOptions::new().append(true).open(path)?)
}

/// Make the journal end with a newline. A final record that parses keeps
/// its place and gets the newline; anything else is truncated away.
fn repair_tail(file: &mut File, path: &Path) -> Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let line_start = last_newline(file, len)?.map_or(0, |pos| pos + 1);
    let mut fragment = Vec::new();
    file.seek(SeekFrom::Start(line_start))?;
    file.read_to_end(&mut fragment)?;

    if serde_json::from_slice::<IdentityMapping>(&fragment).is_ok() {
        file.seek(SeekFrom::End(0))?;
        file.write_all(b"\n")?;
        info!("{}: terminated final mapping line", path.display());
    } else {
        file.set_len(line_start)?;
        warn!(
            "{}: truncated {} bytes of an incomplete final line",
            path.display(),
            len - line_start
        );
    }
    file.sync_data()?;
    Ok(())
}

/// Offset of the last `\n` before `len`, scanning backwards.
fn last_newline(file: &mut File, len: u64) -> Result<Option<u64>> {
    let mut buf = [0u8; TAIL_CHUNK];
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(TAIL_CHUNK as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(i) = chunk.iter().rposition(|b| *b == b'\n') {
            return Ok(Some(start + i as u64));
        }
        end = start;
    }
    Ok(None)
}

fn read_mappings(path: &Path) -> Result<Vec<IdentityMapping>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines().enumerate().peekable();
    let mut mappings = Vec::new();

    while let Some((index, line)) = lines.next() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IdentityMapping>(&line) {
            Ok(mapping) => mappings.push(mapping),
            Err(e) if lines.peek().is_none() => {
                warn!(
                    "{}: ignoring incomplete final line {} ({})",
                    path.display(),
                    index + 1,
                    e
                );
            }
            Err(e) => {
                return Err(MigrateError::registry(format!(
                    "{}: line {} is corrupt: {}",
                    path.display(),
                    index + 1,
                    e
                )));
            }
        }
    }

    info!("Loaded {} mappings from {}", mappings.len(), path.display());
    Ok(mappings)
}

#[async_trait]
impl RegistryBackend for JournalBackend {
    async fn init(&self) -> Result<()> {
        let path = self.path.clone();
        let slot = Arc::clone(&self.file);
        blocking(move || {
            let file = open_journal(&path)?;
            let mut guard = slot
                .lock()
                .map_err(|_| MigrateError::registry("journal lock poisoned"))?;
            *guard = Some(file);
            Ok(())
        })
        .await
    }

    async fn load_all(&self) -> Result<Vec<IdentityMapping>> {
        let path = self.path.clone();
        blocking(move || read_mappings(&path)).await
    }

    async fn insert(&self, mapping: &IdentityMapping) -> Result<InsertOutcome> {
        let mut line = serde_json::to_string(mapping)?;
        line.push('\n');

        let path = self.path.clone();
        let slot = Arc::clone(&self.file);
        blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| MigrateError::registry("journal lock poisoned"))?;
            if guard.is_none() {
                *guard = Some(open_journal(&path)?);
            }
            let file = guard
                .as_mut()
                .ok_or_else(|| MigrateError::registry("journal file not open"))?;

            file.write_all(line.as_bytes())?;
            file.flush()?;
            file.sync_data()?;
            Ok(InsertOutcome::Inserted)
        })
        .await
    }

    fn backend_type(&self) -> &'static str {
        "journal"
    }
}
