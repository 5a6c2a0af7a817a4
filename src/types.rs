//! Configuration structures for retrieval sessions.

use crate::error::SyncError;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio_retry2::strategy::{jitter, ExponentialBackoff};

/// Default repository host.
pub const DEFAULT_HOST: &str = "e4ftl01u.ecs.nasa.gov";

/// Default product directory on the repository.
pub const DEFAULT_PATH: &str = "MOLT/MOD11A1.005";

/// Default number of day directories in a window.
pub const DEFAULT_DELTA: usize = 10;

/// Which tiles a session retrieves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TileSelection {
    /// Every tile the repository publishes.
    #[default]
    All,
    /// Only the listed tile ids (e.g. `h18v04`).
    Only(BTreeSet<String>),
}

impl TileSelection {
    /// Whether `tile` belongs to the selection.
    pub fn contains(&self, tile: &str) -> bool {
        match self {
            TileSelection::All => true,
            TileSelection::Only(tiles) => tiles.contains(tile),
        }
    }
}

impl FromStr for TileSelection {
    type Err = SyncError;

    /// Parses a comma separated tile list; empty or `all` selects every tile.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tiles: BTreeSet<String> = s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if tiles.is_empty() || (tiles.len() == 1 && tiles.contains("all")) {
            return Ok(TileSelection::All);
        }
        if tiles.contains("all") {
            return Err(SyncError::InvalidOption {
                option: "tiles",
                value: s.to_string(),
                allowed: "'all' or a list of tile ids".to_string(),
            });
        }
        Ok(TileSelection::Only(tiles))
    }
}

/// Content selection applied to each day's listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TileFilterConfig {
    /// Tile allow-list.
    pub tiles: TileSelection,
    /// Also retrieve browse imagery (jpg).
    pub include_imagery: bool,
    /// Retrieve only the xml descriptors, for low-bandwidth verification runs.
    pub descriptors_only: bool,
}

/// Backoff policy for transient remote failures.
///
/// The default never gives up, matching long unattended runs where the
/// repository eventually answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Total attempts before giving up; `None` retries forever.
    pub max_attempts: Option<usize>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(300),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately, used by tests and dry runs.
    pub fn immediate(max_attempts: Option<usize>) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_attempts,
        }
    }

    /// Delays to sleep between consecutive attempts.
    ///
    /// Doubles from `initial_delay`, capped at `max_delay`, jittered. The
    /// iterator yields `max_attempts - 1` items when bounded.
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let factor = (self.initial_delay.as_millis() / 2).min(u64::MAX as u128) as u64;
        let backoff = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(jitter);
        match self.max_attempts {
            Some(n) => Box::new(backoff.take(n.saturating_sub(1))),
            None => Box::new(backoff),
        }
    }
}

/// Configuration for one retrieval session.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Repository host, optionally with `:port`.
    pub host: String,
    /// Account name.
    pub user: String,
    /// Account password.
    pub password: String,
    /// Product directory holding the `YYYY.MM.DD` day directories.
    pub base_path: String,
    /// Local directory receiving the tiles, ledger and log.
    pub destination: PathBuf,
    /// Tile and content selection.
    pub filter: TileFilterConfig,
    /// First day of the window; `None` means the current local date.
    pub today: Option<NaiveDate>,
    /// Oldest day allowed in the window.
    pub end_date: Option<NaiveDate>,
    /// Maximum number of day directories in the window.
    pub delta: usize,
    /// Backoff for transient remote failures.
    pub retry: RetryPolicy,
    /// Timeout for establishing the control connection.
    pub connect_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            user: "anonymous".to_string(),
            password: String::new(),
            base_path: DEFAULT_PATH.to_string(),
            destination: PathBuf::from("."),
            filter: TileFilterConfig::default(),
            today: None,
            end_date: None,
            delta: DEFAULT_DELTA,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl DownloadConfig {
    /// Product identifier, the last component of the base path.
    pub fn product(&self) -> &str {
        product_name(&self.base_path)
    }
}

/// Returns the last non-empty component of a repository path
/// (`MOLT/MOD11A1.005` -> `MOD11A1.005`).
pub fn product_name(path: &str) -> &str {
    path.rsplit('/').find(|c| !c.is_empty()).unwrap_or(path)
}

/// Parses a `YYYY-MM-DD` date given on the command line.
pub fn parse_date(value: &str) -> Result<NaiveDate, SyncError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| SyncError::InvalidOption {
        option: "date",
        value: value.to_string(),
        allowed: "dates formatted as YYYY-MM-DD".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_selection_parsing() {
        assert_eq!("".parse::<TileSelection>().unwrap(), TileSelection::All);
        assert_eq!("all".parse::<TileSelection>().unwrap(), TileSelection::All);

        let only = "h18v04, h17v05,,h18v04".parse::<TileSelection>().unwrap();
        let expected: BTreeSet<String> = ["h17v05", "h18v04"].iter().map(|s| s.to_string()).collect();
        assert_eq!(only, TileSelection::Only(expected));
        assert!(only.contains("h17v05"));
        assert!(!only.contains("h19v04"));

        assert!("all,h18v04".parse::<TileSelection>().is_err());
    }

    #[test]
    fn test_product_name() {
        assert_eq!(product_name("MOLT/MOD11A1.005"), "MOD11A1.005");
        assert_eq!(product_name("/data/MOLT/MOD11A1.005/"), "MOD11A1.005");
        assert_eq!(product_name("MOD13Q1.006"), "MOD13Q1.006");
    }

    #[test]
    fn test_bounded_policy_yields_attempts_minus_one_delays() {
        let policy = RetryPolicy::immediate(Some(4));
        let delays: Vec<Duration> = policy.delays().collect();
        assert_eq!(delays.len(), 3);
        assert!(delays.iter().all(|d| d.is_zero()));

        let unbounded = RetryPolicy::immediate(None);
        assert_eq!(unbounded.delays().take(1000).count(), 1000);
    }

    #[test]
    fn test_delays_never_exceed_max_delay() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            max_attempts: Some(10),
        };
        assert!(policy.delays().all(|d| d <= Duration::from_millis(400)));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2020-01-05").unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 5).unwrap()
        );
        assert!(parse_date("2020.01.05").is_err());
    }
}
