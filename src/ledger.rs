//! Record of the files retrieved during one session.

use crate::error::SyncError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only list of retrieved file names, one per line.
///
/// The file is `listfile<product>.txt` in the destination directory and is
/// recreated at every session start. Each record is flushed immediately so an
/// interrupted session still leaves an accurate ledger.
#[derive(Debug)]
pub struct DownloadLedger {
    path: PathBuf,
    writer: BufWriter<File>,
    entries: usize,
}

impl DownloadLedger {
    /// Ledger file name for a product.
    pub fn file_name(product: &str) -> String {
        format!("listfile{}.txt", product)
    }

    /// Creates (truncating) the ledger for `product` inside `dir`.
    pub fn create(dir: &Path, product: &str) -> Result<Self, SyncError> {
        let path = dir.join(Self::file_name(product));
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            writer,
            entries: 0,
        })
    }

    /// Appends one retrieved file name.
    pub fn record(&mut self, name: &str) -> Result<(), SyncError> {
        writeln!(self.writer, "{}", name)?;
        self.writer.flush()?;
        self.entries += 1;
        Ok(())
    }

    /// Number of names recorded so far.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and closes the ledger.
    pub fn close(mut self) -> Result<(), SyncError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}
