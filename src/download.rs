//! Single file retrieval into the destination directory.

use crate::error::SyncError;
use crate::remote::RemoteRepository;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PARTIAL_SUFFIX: &str = ".part";

/// Output sink for one retrieval.
///
/// Bytes go to `<name>.part`, which only becomes `<name>` on [`commit`].
/// Dropping an uncommitted file removes the partial data, so a failed or
/// interrupted transfer never leaves a truncated tile behind.
///
/// [`commit`]: PartialFile::commit
pub(crate) struct PartialFile {
    partial: PathBuf,
    target: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl PartialFile {
    pub(crate) fn create(dir: &Path, name: &str) -> io::Result<Self> {
        let target = dir.join(name);
        let partial = dir.join(format!("{}{}", name, PARTIAL_SUFFIX));
        let writer = BufWriter::new(File::create(&partial)?);
        Ok(Self {
            partial,
            target,
            writer: Some(writer),
        })
    }

    pub(crate) fn writer(&mut self) -> &mut dyn Write {
        match self.writer.as_mut() {
            Some(writer) => writer,
            None => unreachable!("writer is only taken by commit"),
        }
    }

    /// Flushes the data and moves it to its final name.
    pub(crate) fn commit(mut self) -> io::Result<PathBuf> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        std::fs::rename(&self.partial, &self.target)?;
        Ok(self.target.clone())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.partial) {
                warn!("Cannot remove partial file {}: {}", self.partial.display(), e);
            }
        }
    }
}

/// Whether `name` is the in-progress file of a transfer.
pub(crate) fn is_partial_name(name: &str) -> bool {
    name.ends_with(PARTIAL_SUFFIX)
}

/// Write adapter keeping the first local failure.
///
/// Remote clients fold a failing sink into their own transfer error, where
/// a full disk reads like a dropped connection.
struct LocalSink<'a> {
    inner: &'a mut dyn Write,
    error: Option<io::Error>,
}

impl<'a> LocalSink<'a> {
    fn new(inner: &'a mut dyn Write) -> Self {
        Self { inner, error: None }
    }

    fn keep(&mut self, e: io::Error) -> io::Error {
        if e.kind() == io::ErrorKind::Interrupted {
            return e;
        }
        let copy = io::Error::new(e.kind(), e.to_string());
        self.error.get_or_insert(e);
        copy
    }
}

impl Write for LocalSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.keep(e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.keep(e)),
        }
    }
}

/// Streams `name` into `writer`.
///
/// A local write failure is returned as [`SyncError::IoError`], which is
/// never retried, whatever the remote client made of it.
fn retrieve_into<R: RemoteRepository + ?Sized>(
    remote: &mut R,
    name: &str,
    writer: &mut dyn Write,
) -> Result<u64, SyncError> {
    let mut sink = LocalSink::new(writer);
    let retrieved = remote.retrieve(name, &mut sink);
    if let Some(e) = sink.error.take() {
        return Err(e.into());
    }
    Ok(retrieved?)
}

/// Retrieves `name` from the current remote directory into `dir`.
///
/// The local file is created right before streaming starts and is closed on
/// every exit path; on failure nothing but the error remains.
pub(crate) fn fetch_file<R: RemoteRepository + ?Sized>(
    remote: &mut R,
    dir: &Path,
    name: &str,
) -> Result<u64, SyncError> {
    let mut output = PartialFile::create(dir, name)?;
    let bytes = retrieve_into(remote, name, output.writer())?;
    let path = output.commit()?;
    debug!("File {} downloaded ({} bytes)", path.display(), bytes);
    Ok(bytes)
}
