//! Retrieval session: window selection, per-day reconciliation and fetching.

use crate::download::fetch_file;
use crate::error::{RemoteError, SyncError};
use crate::filter::filter_files;
use crate::ledger::DownloadLedger;
use crate::reconcile::{local_inventory, orphans, reconcile, Decision};
use crate::remote::{Connector, RemoteRepository};
use crate::retry::retry;
use crate::types::DownloadConfig;
use crate::window::{day_labels, missing_days, resolve_window};
use chrono::NaiveDate;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of [`Session::download_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Day directories visited, newest first.
    pub days: Vec<String>,
    /// Files retrieved, in retrieval order.
    pub fetched: Vec<String>,
    /// Local files removed because a newer version was retrieved.
    pub replaced: Vec<String>,
    /// Candidates already satisfied locally.
    pub satisfied: usize,
    /// Candidates skipped because several local versions coexist.
    pub ambiguous: Vec<String>,
    /// Candidates the repository refused permanently.
    pub failed: Vec<String>,
    /// Bytes written.
    pub bytes: u64,
    /// Whether the session stopped early on request.
    pub cancelled: bool,
}

/// A retrieval session against one product directory.
///
/// The session walks `Disconnected -> Connected -> InDayDirectory -> Connected
/// -> ... -> Disconnected`. The remote cursor is stateful, so everything runs
/// sequentially: one day at a time, one file at a time. Transient failures
/// are retried according to the configured [`RetryPolicy`]; failures that
/// invalidate the connection (and every failed fetch) drop the session, and
/// the next attempt reconnects and re-enters the current day directory.
///
/// [`RetryPolicy`]: crate::types::RetryPolicy
pub struct Session<C: Connector> {
    connector: C,
    config: DownloadConfig,
    remote: Option<C::Remote>,
    day_labels: Option<Vec<String>>,
    current_day: Option<String>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<C: Connector> Session<C> {
    /// Creates a session, checking once that the destination is writable.
    pub fn new(connector: C, config: DownloadConfig) -> Result<Self, SyncError> {
        ensure_writable_dir(&config.destination)?;
        Ok(Self {
            connector,
            config,
            remote: None,
            day_labels: None,
            current_day: None,
            cancel: None,
        })
    }

    /// Stops the session once `flag` is set: between two files, or instead
    /// of waiting to repeat a failed step.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Day the window starts from.
    pub fn today(&self) -> NaiveDate {
        self.config
            .today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Returns the live connection, reconnecting if needed.
    fn session(&mut self) -> Result<&mut C::Remote, SyncError> {
        if self.remote.is_none() {
            let mut remote = self.connector.connect()?;
            if let Some(day) = &self.current_day {
                remote.change_dir(day)?;
            }
            debug!("Open connection {}", self.connector.endpoint());
            self.remote = Some(remote);
        }
        self.remote
            .as_mut()
            .ok_or_else(|| RemoteError::Connection("no session".to_string()).into())
    }

    /// Runs one remote operation under the retry policy.
    fn remote_step<T>(
        &mut self,
        operation: &str,
        reconnect_on_failure: bool,
        mut op: impl FnMut(&mut C::Remote) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let policy = self.config.retry;
        let cancel = self.cancel.clone();
        retry(&policy, operation, cancel.as_deref(), |_| {
            let result = self.session().and_then(&mut op);
            if let Err(SyncError::Remote(e)) = &result {
                if reconnect_on_failure || e.invalidates_session() {
                    self.remote = None;
                }
            }
            result
        })
    }

    /// Connects and reads the day directories of the product.
    pub fn connect(&mut self) -> Result<&[String], SyncError> {
        let operation = format!("connecting to {}", self.connector.endpoint());
        let entries = self.remote_step(&operation, false, |remote| Ok(remote.list_entries()?))?;
        let labels = day_labels(entries.into_iter().filter(|e| e.is_dir).map(|e| e.name));
        info!("Found {} day directories", labels.len());
        Ok(self.day_labels.insert(labels).as_slice())
    }

    /// Resolves the day directories of this session.
    pub fn resolve_days(&mut self) -> Result<Vec<String>, SyncError> {
        if self.day_labels.is_none() {
            self.connect()?;
        }
        let labels = self.day_labels.as_deref().unwrap_or_default();
        let days = resolve_window(labels, self.today(), self.config.delta, self.config.end_date)?;
        debug!("The number of days to download is: {}", days.len());
        Ok(days)
    }

    fn enter_day(&mut self, day: &str) -> Result<(), SyncError> {
        let operation = format!("entering in directory {}", day);
        self.remote_step(&operation, false, |remote| Ok(remote.change_dir(day)?))?;
        self.current_day = Some(day.to_string());
        Ok(())
    }

    fn leave_day(&mut self) -> Result<(), SyncError> {
        self.remote_step("coming back to the product directory", false, |remote| {
            Ok(remote.change_dir_up()?)
        })?;
        self.current_day = None;
        Ok(())
    }

    fn list_day(&mut self) -> Result<Vec<String>, SyncError> {
        self.remote_step("receiving the list of files", false, |remote| {
            Ok(remote.list_names()?)
        })
    }

    fn fetch(&mut self, name: &str) -> Result<u64, SyncError> {
        let destination = self.config.destination.clone();
        let operation = format!("downloading {}", name);
        self.remote_step(&operation, true, |remote| {
            fetch_file(remote, &destination, name)
        })
    }

    /// Enters `day`, lists it and applies the tile filter.
    fn filtered_day(&mut self, day: &str) -> Result<Vec<String>, SyncError> {
        self.enter_day(day)?;
        let names = self.list_day()?;
        let filtered = filter_files(&names, &self.config.filter);
        debug!(
            "{}: {} files listed, {} selected",
            day,
            names.len(),
            filtered.len()
        );
        Ok(filtered)
    }

    /// Ends the remote session.
    pub fn close(&mut self) {
        if let Some(mut remote) = self.remote.take() {
            if let Err(e) = remote.quit() {
                warn!("Error closing connection: {}", e);
            }
            debug!("Close connection {}", self.connector.endpoint());
        }
        self.current_day = None;
    }

    /// Retrieves every missing or outdated tile of the window.
    ///
    /// The ledger `listfile<product>.txt` is created when the session starts
    /// and receives one line per retrieved file. A file the repository refuses
    /// permanently is recorded in [`SessionReport::failed`] and the session
    /// moves on. An interruption ends the session with a report marked
    /// `cancelled`.
    pub fn download_all(mut self) -> Result<SessionReport, SyncError> {
        let destination = self.config.destination.clone();
        let mut ledger = DownloadLedger::create(&destination, self.config.product())?;
        let mut report = SessionReport::default();
        match self.download_window(&mut ledger, &mut report) {
            Ok(()) => {}
            Err(SyncError::Cancelled { operation }) => {
                warn!("Download interrupted while {}", operation);
                report.cancelled = true;
            }
            Err(e) => {
                self.close();
                return Err(e);
            }
        }

        self.close();
        ledger.close()?;
        info!(
            "Download terminated: {} files, {} bytes, {} already present, {} ambiguous, {} failed",
            report.fetched.len(),
            report.bytes,
            report.satisfied,
            report.ambiguous.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn download_window(
        &mut self,
        ledger: &mut DownloadLedger,
        report: &mut SessionReport,
    ) -> Result<(), SyncError> {
        let destination = self.config.destination.clone();
        let days = self.resolve_days()?;
        if days.is_empty() {
            return Err(SyncError::InvalidWindow(format!(
                "no day directory between {:?} and {}",
                self.config.end_date,
                self.today()
            )));
        }
        info!("Retrieving {} days from {}", days.len(), self.connector.endpoint());
        report.days = days.clone();

        for day in &days {
            let filtered = self.filtered_day(day)?;
            let plan = reconcile(&filtered, &local_inventory(&destination)?);
            report.satisfied += plan.satisfied().count();
            report
                .ambiguous
                .extend(plan.ambiguous().map(|c| c.name.clone()));

            let to_fetch: Vec<_> = plan.to_fetch().collect();
            debug!("The number of file to download is: {}", to_fetch.len());
            let pb = progress_bar(to_fetch.len() as u64, day);
            for candidate in to_fetch {
                if self.cancelled() {
                    warn!("Cancellation requested, stopping before {}", candidate.name);
                    pb.abandon_with_message(format!("| {} interrupted", day));
                    report.cancelled = true;
                    return self.leave_day();
                }
                pb.set_message(format!("| {}", candidate.name));
                let bytes = match self.fetch(&candidate.name) {
                    Ok(bytes) => bytes,
                    Err(SyncError::Remote(e)) => {
                        error!("Cannot download {}: {}", candidate.name, e);
                        report.failed.push(candidate.name.clone());
                        pb.inc(1);
                        continue;
                    }
                    Err(e) => {
                        pb.abandon_with_message(format!("| {} failed", day));
                        return Err(e);
                    }
                };
                ledger.record(&candidate.name)?;
                report.bytes += bytes;
                report.fetched.push(candidate.name.clone());

                if let Decision::Replace { stale } = &candidate.decision {
                    match std::fs::remove_file(destination.join(stale)) {
                        Ok(()) => {
                            info!("Replaced {} with {}", stale, candidate.name);
                            report.replaced.push(stale.clone());
                        }
                        Err(e) => error!("Cannot remove outdated {}: {}", stale, e),
                    }
                }
                pb.inc(1);
            }
            pb.finish_with_message(format!("| {} done", day));
            self.leave_day()?;
        }
        Ok(())
    }

    /// Moves local tiles with no counterpart in the window into `archive`.
    ///
    /// Returns the moved file names.
    pub fn relocate_stale(mut self, archive: &Path) -> Result<Vec<String>, SyncError> {
        ensure_writable_dir(archive)?;
        let destination = self.config.destination.clone();
        let days = self.resolve_days()?;
        let mut remote_names = Vec::new();
        for day in &days {
            remote_names.extend(self.filtered_day(day)?);
            self.leave_day()?;
        }
        self.close();

        let stale = orphans(&remote_names, &local_inventory(&destination)?);
        for name in &stale {
            std::fs::rename(destination.join(name), archive.join(name))?;
            info!("Moved {} to {}", name, archive.display());
        }
        Ok(stale)
    }

    /// Number of selected remote files for each day of the window.
    pub fn day_file_counts(mut self) -> Result<Vec<(String, usize)>, SyncError> {
        let days = self.resolve_days()?;
        let mut counts = Vec::with_capacity(days.len());
        for day in days {
            let count = self.filtered_day(&day)?.len();
            self.leave_day()?;
            debug!("{}: {}", day, count);
            counts.push((day, count));
        }
        self.close();
        Ok(counts)
    }

    /// Days of `[today - delta, today)` that the window lacks.
    pub fn missing_days(mut self) -> Result<Vec<String>, SyncError> {
        let days = self.resolve_days()?;
        self.close();
        let missing = missing_days(&days, self.today(), self.config.delta);
        for day in &missing {
            warn!("This day {} is not present on list", day);
        }
        Ok(missing)
    }
}

fn progress_bar(len: u64, day: &str) -> indicatif::ProgressBar {
    if !atty::is(atty::Stream::Stderr) {
        return indicatif::ProgressBar::hidden();
    }
    let pb = indicatif::ProgressBar::new(len);
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed, ETA {eta_precise}")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("█▓▒░ "),
    );
    pb.set_message(format!("| {}", day));
    pb
}

/// Fails unless `dir` is an existing directory this process can write into.
pub fn ensure_writable_dir(dir: &Path) -> Result<(), SyncError> {
    let not_writable = || SyncError::DestinationNotWritable(dir.to_path_buf());
    let metadata = std::fs::metadata(dir).map_err(|_| not_writable())?;
    if !metadata.is_dir() || metadata.permissions().readonly() {
        return Err(not_writable());
    }
    let marker = dir.join(format!(".modisync-write-test-{}", std::process::id()));
    std::fs::File::create(&marker).map_err(|_| not_writable())?;
    std::fs::remove_file(&marker)?;
    Ok(())
}
