//! modisync - Daily MODIS tile retrieval with version reconciliation
//!
//! This library downloads MODIS tiles from the NASA FTP repository, where
//! every product directory holds one `YYYY.MM.DD` directory per day, and
//! prepares them for the MODIS Reprojection Tool (MRT).
//!
//! # Features
//!
//! - **Day Window**: Pick the most recent days up to a delta, optionally bounded by an end date
//! - **Tile Filter**: Restrict downloads to a tile list and to data, imagery or descriptors
//! - **Version Reconciliation**: Fetch only new tiles and tiles superseded by a newer version
//! - **Automatic Retry**: Transient FTP failures are retried with exponential backoff
//! - **Download Ledger**: Every retrieved file is recorded in `listfile<product>.txt`
//! - **MRT Integration**: Resampling parameter files, conversion and mosaics
//!
//! # Example
//!
//! ```no_run
//! use modisync::{DownloadConfig, FtpConnector, Session};
//!
//! # fn example() -> Result<(), modisync::SyncError> {
//! let mut config = DownloadConfig {
//!     destination: "/data/modis".into(),
//!     delta: 5,
//!     ..DownloadConfig::default()
//! };
//! config.filter.tiles = "h18v04,h18v05".parse()?;
//!
//! let session = Session::new(FtpConnector::new(&config), config)?;
//! let report = session.download_all()?;
//! println!("{} files fetched", report.fetched.len());
//! # Ok(())
//! # }
//! ```

pub mod descriptor;
pub mod error;
pub mod filename;
pub mod filter;
pub mod ledger;
pub mod logging;
pub mod mosaic;
pub mod orchestrator;
pub mod reconcile;
pub mod remote;
pub mod resample;
pub mod tool;
pub mod types;
pub mod window;

mod download;
mod retry;

pub use descriptor::{Descriptor, DescriptorSummary, GeographicExtent};
pub use error::{RemoteError, SyncError};
pub use filename::RemoteFileName;
pub use filter::filter_files;
pub use ledger::DownloadLedger;
pub use mosaic::Mosaic;
pub use orchestrator::{ensure_writable_dir, Session, SessionReport};
pub use reconcile::{local_inventory, orphans, reconcile, Decision, ReconcilePlan};
pub use remote::{Connector, FtpConnector, RemoteEntry, RemoteRepository};
pub use resample::{Datum, ProjectionType, ResampleParams, ResamplingMethod};
pub use tool::{MrtInstall, MrtTool};
pub use types::{DownloadConfig, RetryPolicy, TileFilterConfig, TileSelection};
pub use window::{missing_days, resolve_window};
