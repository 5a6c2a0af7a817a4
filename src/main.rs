use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use modisync::descriptor::Descriptor;
use modisync::logging;
use modisync::resample::{self, PROJECTION_PARAMETER_COUNT};
use modisync::types::{parse_date, DEFAULT_DELTA, DEFAULT_HOST, DEFAULT_PATH};
use modisync::{
    ensure_writable_dir, Datum, DownloadConfig, FtpConnector, Mosaic, ProjectionType,
    ResampleParams, ResamplingMethod, RetryPolicy, Session, SyncError, TileFilterConfig,
    TileSelection,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "modisync")]
#[command(about = "Download MODIS tiles and convert them with the MODIS Reprojection Tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the tiles of the most recent days
    Download(RemoteArgs),

    /// Move local tiles that are no longer published into an archive directory
    Relocate {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Directory receiving the stale files
        #[arg(short, long)]
        archive: PathBuf,
    },

    /// List the days missing from the remote window
    CheckDays(RemoteArgs),

    /// Count the files to download for each day of the window
    CountFiles(RemoteArgs),

    /// Print the descriptor of a tile as JSON
    Info {
        /// Tile (`.hdf`) or descriptor (`.hdf.xml`) file
        file: PathBuf,
    },

    /// Convert a tile with the MRT resample tool
    Resample {
        /// Tile to convert
        input: PathBuf,

        /// MRT installation directory (containing bin/ and data/)
        #[arg(long, env = "MRT_HOME")]
        mrt: PathBuf,

        /// Directory for the parameter file (defaults to the tile's directory)
        #[arg(long)]
        conf_dir: Option<PathBuf>,

        /// Output file (defaults to the tile name with a .tif extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Resampling type
        #[arg(long, default_value = "NEAREST_NEIGHBOR")]
        resampling: ResamplingMethod,

        /// Output projection
        #[arg(long, default_value = "GEO")]
        projection: ProjectionType,

        /// Projection parameters, 15 comma separated numbers
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        projection_parameters: Vec<f64>,

        /// Output datum
        #[arg(long, default_value = "WGS84")]
        datum: Datum,

        /// UTM zone, for the UTM projection
        #[arg(long)]
        utm_zone: Option<u8>,

        /// Output pixel size
        #[arg(long)]
        pixel_size: Option<f64>,
    },

    /// Mosaic several tiles of one day with the MRT mrtmosaic tool
    Mosaic {
        /// Tiles to combine
        #[arg(required = true)]
        tiles: Vec<PathBuf>,

        /// MRT installation directory (containing bin/ and data/)
        #[arg(long, env = "MRT_HOME")]
        mrt: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Spectral subset passed to mrtmosaic (e.g. "1 0 1")
        #[arg(short, long)]
        subset: Option<String>,
    },
}

/// Repository and selection options shared by the remote commands.
#[derive(Args, Debug)]
struct RemoteArgs {
    /// Repository host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Account name
    #[arg(short, long, env = "MODIS_USER", default_value = "anonymous")]
    user: String,

    /// Account password
    #[arg(short, long, env = "MODIS_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Product directory on the repository
    #[arg(long, default_value = DEFAULT_PATH)]
    path: String,

    /// Local directory for tiles, ledger and log
    #[arg(short, long, default_value = ".")]
    destination: PathBuf,

    /// Tiles to download (comma separated, e.g. "h18v04,h18v05"), or "all"
    #[arg(short, long, default_value = "all")]
    tiles: TileSelection,

    /// First day of the window (YYYY-MM-DD), defaults to today
    #[arg(long, value_parser = parse_date)]
    today: Option<NaiveDate>,

    /// Oldest day to download (YYYY-MM-DD)
    #[arg(short, long, value_parser = parse_date)]
    end_date: Option<NaiveDate>,

    /// Number of days to consider
    #[arg(long, default_value_t = DEFAULT_DELTA)]
    delta: usize,

    /// Also download the browse images
    #[arg(long)]
    jpg: bool,

    /// Download only the xml descriptors
    #[arg(long)]
    descriptors_only: bool,

    /// Delay before the first retry of a failed transfer
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    retry_delay: Duration,

    /// Upper bound for the retry delay
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5m")]
    max_retry_delay: Duration,

    /// Give up after this many attempts (retries forever by default)
    #[arg(long)]
    max_attempts: Option<usize>,

    /// Connection timeout
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    timeout: Duration,
}

impl RemoteArgs {
    fn into_config(self) -> DownloadConfig {
        DownloadConfig {
            host: self.host,
            user: self.user,
            password: self.password,
            base_path: self.path,
            destination: self.destination,
            filter: TileFilterConfig {
                tiles: self.tiles,
                include_imagery: self.jpg,
                descriptors_only: self.descriptors_only,
            },
            today: self.today,
            end_date: self.end_date,
            delta: self.delta,
            retry: RetryPolicy {
                initial_delay: self.retry_delay,
                max_delay: self.max_retry_delay,
                max_attempts: self.max_attempts,
            },
            connect_timeout: self.timeout,
        }
    }
}

/// Raises `cancel` on the first Ctrl-C and exits on the second.
fn watch_interrupts(cancel: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, stopping after the current step (press Ctrl-C again to abort)");
        cancel.store(true, Ordering::SeqCst);
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Aborted");
            std::process::exit(130);
        }
    })
}

/// Runs `work` on a blocking thread with the session log installed.
async fn run_session<T, F>(config: DownloadConfig, verbose: bool, work: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(Session<FtpConnector>) -> Result<T, SyncError> + Send + 'static,
{
    ensure_writable_dir(&config.destination)?;
    let (subscriber, log_path) =
        logging::session_subscriber(&config.destination, config.product(), verbose)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let watcher = watch_interrupts(cancel.clone());
    let result = tokio::task::spawn_blocking(move || {
        let _guard = tracing::subscriber::set_default(subscriber);
        info!("Session log: {}", log_path.display());
        info!("Repository: ftp://{}/{}", config.host, config.base_path);
        info!("Destination: {}", config.destination.display());

        let session = Session::new(FtpConnector::new(&config), config)?.with_cancel(cancel);
        work(session).inspect_err(|e| error!("{}", e))
    })
    .await;
    watcher.abort();
    Ok(result.context("session task panicked")??)
}

fn projection_parameters(values: Vec<f64>) -> Result<Option<[f64; PROJECTION_PARAMETER_COUNT]>, SyncError> {
    if values.is_empty() {
        return Ok(None);
    }
    let count = values.len();
    values
        .try_into()
        .map(Some)
        .map_err(|_| SyncError::InvalidOption {
            option: "projection parameters",
            value: format!("{} values", count),
            allowed: format!("exactly {} values", PROJECTION_PARAMETER_COUNT),
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_console(cli.verbose);

    match cli.command {
        Command::Download(remote) => {
            let report =
                run_session(remote.into_config(), cli.verbose, Session::download_all).await?;
            info!(
                "✅ {} files downloaded ({} bytes) over {} days, {} up to date",
                report.fetched.len(),
                report.bytes,
                report.days.len(),
                report.satisfied
            );
            if !report.ambiguous.is_empty() {
                warn!("{} files skipped, see the session log", report.ambiguous.len());
            }
            for name in &report.failed {
                warn!("Not downloaded: {}", name);
            }
            if report.cancelled {
                bail!("download interrupted");
            }
            if !report.failed.is_empty() {
                bail!("{} files could not be downloaded", report.failed.len());
            }
        }
        Command::Relocate { remote, archive } => {
            let moved = run_session(remote.into_config(), cli.verbose, move |session| {
                session.relocate_stale(&archive)
            })
            .await?;
            for name in &moved {
                println!("{}", name);
            }
            info!("{} files relocated", moved.len());
        }
        Command::CheckDays(remote) => {
            let missing =
                run_session(remote.into_config(), cli.verbose, Session::missing_days).await?;
            if missing.is_empty() {
                info!("No missing days");
            }
            for day in missing {
                println!("{}", day);
            }
        }
        Command::CountFiles(remote) => {
            let counts =
                run_session(remote.into_config(), cli.verbose, Session::day_file_counts).await?;
            for (day, count) in counts {
                println!("{}\t{}", day, count);
            }
        }
        Command::Info { file } => {
            let descriptor = if file.extension().is_some_and(|ext| ext == "xml") {
                Descriptor::from_path(&file)?
            } else {
                Descriptor::for_tile(&file)?
            };
            println!("{}", serde_json::to_string_pretty(&descriptor.summary())?);
        }
        Command::Resample {
            input,
            mrt,
            conf_dir,
            output,
            resampling,
            projection,
            projection_parameters: parameters,
            datum,
            utm_zone,
            pixel_size,
        } => {
            let mut params = ResampleParams::for_tile(&input)?;
            params.output = output;
            params.resampling = resampling;
            params.projection = projection;
            params.datum = datum;
            if let Some(parameters) = projection_parameters(parameters)? {
                params.projection_parameters = parameters;
            }
            if let Some(zone) = utm_zone {
                params = params.with_utm_zone(zone)?;
            }
            if let Some(size) = pixel_size {
                params = params.with_pixel_size(size)?;
            }

            let conf_dir = match conf_dir {
                Some(dir) => dir,
                None => input
                    .parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(".")),
            };
            let conf = params.write_to(&conf_dir)?;
            info!("Parameter file: {}", conf.display());
            resample::convert(&mrt, &input, &conf).await?;
            info!("✅ Written {}", params.output_path().display());
        }
        Command::Mosaic {
            tiles,
            mrt,
            output,
            subset,
        } => {
            let mosaic = Mosaic::open(&tiles)?;
            let descriptor = mosaic.run(&mrt, &output, subset.as_deref()).await?;
            info!("✅ Written {} ({})", output.display(), descriptor.display());
        }
    }
    Ok(())
}
