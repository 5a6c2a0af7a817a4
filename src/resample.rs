//! Single tile conversion through the MRT `resample` tool.

use crate::descriptor::{Descriptor, GeographicExtent};
use crate::error::SyncError;
use crate::tool::{MrtInstall, MrtTool};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Declares a keyword enum whose variants are spelled exactly as the tool
/// expects them, with parsing restricted to that set.
macro_rules! keyword_enum {
    ($(#[$meta:meta])* $name:ident, $option:literal, { $($variant:ident => $keyword:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $keyword),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = SyncError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_uppercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| SyncError::InvalidOption {
                        option: $option,
                        value: s.to_string(),
                        allowed: Self::ALL
                            .iter()
                            .map(|v| v.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
            }
        }
    };
}

keyword_enum!(
    /// Pixel resampling kernel.
    ResamplingMethod, "resampling type", {
        NearestNeighbor => "NEAREST_NEIGHBOR",
        Bicubic => "BICUBIC",
        CubicConvolution => "CUBIC_CONVOLUTION",
        None => "NONE",
    }
);

keyword_enum!(
    /// Output map projection.
    ProjectionType, "projection type", {
        Aea => "AEA",
        Geo => "GEO",
        Ham => "HAM",
        Igh => "IGH",
        Isin => "ISIN",
        La => "LA",
        Lcc => "LCC",
        Mol => "MOL",
        Ps => "PS",
        Sin => "SIN",
        Tm => "TM",
        Utm => "UTM",
        Mercat => "MERCAT",
    }
);

keyword_enum!(
    /// Output geodetic datum.
    Datum, "datum", {
        NoDatum => "NODATUM",
        Nad27 => "NAD27",
        Nad83 => "NAD83",
        Wgs66 => "WGS66",
        Wgs72 => "WGS72",
        Wgs84 => "WGS84",
    }
);

pub const PROJECTION_PARAMETER_COUNT: usize = 15;

/// Contents of a `resample` parameter file.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampleParams {
    pub input: PathBuf,
    /// Defaults to the input with a `.tif` extension.
    pub output: Option<PathBuf>,
    pub spectral_subset: String,
    pub extent: GeographicExtent,
    pub resampling: ResamplingMethod,
    pub projection: ProjectionType,
    pub projection_parameters: [f64; PROJECTION_PARAMETER_COUNT],
    pub datum: Datum,
    pub utm_zone: Option<u8>,
    pub pixel_size: Option<f64>,
}

impl ResampleParams {
    pub fn new(input: impl Into<PathBuf>, extent: GeographicExtent) -> Self {
        Self {
            input: input.into(),
            output: None,
            spectral_subset: "( 1 1 )".to_string(),
            extent,
            resampling: ResamplingMethod::NearestNeighbor,
            projection: ProjectionType::Geo,
            projection_parameters: [0.0; PROJECTION_PARAMETER_COUNT],
            datum: Datum::Wgs84,
            utm_zone: None,
            pixel_size: None,
        }
    }

    /// Parameters covering the footprint recorded in the tile's descriptor.
    pub fn for_tile(input: &Path) -> Result<Self, SyncError> {
        let descriptor = Descriptor::for_tile(input)?;
        Ok(Self::new(input, descriptor.extent()?))
    }

    pub fn with_utm_zone(mut self, zone: u8) -> Result<Self, SyncError> {
        if !(1..=60).contains(&zone) {
            return Err(SyncError::InvalidOption {
                option: "UTM zone",
                value: zone.to_string(),
                allowed: "1-60".to_string(),
            });
        }
        self.utm_zone = Some(zone);
        Ok(self)
    }

    pub fn with_pixel_size(mut self, size: f64) -> Result<Self, SyncError> {
        if !(size.is_finite() && size > 0.0) {
            return Err(SyncError::InvalidOption {
                option: "pixel size",
                value: size.to_string(),
                allowed: "a positive number".to_string(),
            });
        }
        self.pixel_size = Some(size);
        Ok(self)
    }

    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.with_extension("tif"))
    }

    /// Product part of the input name, e.g. `MOD11A1`.
    pub fn product(&self) -> String {
        let name = self
            .input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.split('.').next().unwrap_or_default().to_string()
    }

    /// Parameter file name for a product.
    pub fn file_name(product: &str) -> String {
        format!("{}_mrt_resample.conf", product)
    }

    /// Renders the `KEY = VALUE` parameter file.
    pub fn render(&self) -> String {
        let (ul_lat, ul_lon) = self.extent.upper_left();
        let (lr_lat, lr_lon) = self.extent.lower_right();
        let parameters = self
            .projection_parameters
            .iter()
            .map(|p| format!("{:?}", p))
            .collect::<Vec<_>>()
            .join(" ");

        let mut lines = vec![
            format!("INPUT_FILENAME = {}", self.input.display()),
            format!("SPECTRAL_SUBSET = {}", self.spectral_subset),
            "SPATIAL_SUBSET_TYPE = INPUT_LAT_LONG".to_string(),
            format!("SPATIAL_SUBSET_UL_CORNER = ( {:.6} {:.6} )", ul_lat, ul_lon),
            format!("SPATIAL_SUBSET_LR_CORNER = ( {:.6} {:.6} )", lr_lat, lr_lon),
            format!("OUTPUT_FILENAME = {}", self.output_path().display()),
            format!("RESAMPLING_TYPE = {}", self.resampling),
            format!("OUTPUT_PROJECTION_TYPE = {}", self.projection),
            format!("OUTPUT_PROJECTION_PARAMETERS = ( {} )", parameters),
            format!("DATUM = {}", self.datum),
        ];
        if let Some(zone) = self.utm_zone {
            lines.push(format!("UTM_ZONE = {}", zone));
        }
        if let Some(size) = self.pixel_size {
            lines.push(format!("OUTPUT_PIXEL_SIZE = {}", size));
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    /// Writes `<product>_mrt_resample.conf` into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, SyncError> {
        let path = dir.join(Self::file_name(&self.product()));
        std::fs::write(&path, self.render())?;
        Ok(path)
    }
}

/// Converts `input` with the parameter file `conf`.
///
/// Every prerequisite is checked before the process is spawned.
pub async fn convert(install_root: &Path, input: &Path, conf: &Path) -> Result<(), SyncError> {
    if !input.exists() {
        return Err(SyncError::MissingInput(input.to_path_buf()));
    }
    if !conf.exists() {
        return Err(SyncError::MissingInput(conf.to_path_buf()));
    }
    let install = MrtInstall::locate(install_root)?;

    info!("Converting {} with {}", input.display(), conf.display());
    let args = [OsString::from("-p"), conf.as_os_str().to_os_string()];
    install.run(MrtTool::Resample, &args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::tests::fake_install;

    fn extent() -> GeographicExtent {
        GeographicExtent {
            min_lat: 40.0,
            max_lat: 50.0,
            min_lon: 0.0,
            max_lon: 15.5572,
        }
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("bicubic".parse::<ResamplingMethod>().unwrap(), ResamplingMethod::Bicubic);
        assert_eq!("MERCAT".parse::<ProjectionType>().unwrap(), ProjectionType::Mercat);
        assert_eq!("WGS84".parse::<Datum>().unwrap(), Datum::Wgs84);
        assert_eq!(ProjectionType::ALL.len(), 13);

        match "LINEAR".parse::<ResamplingMethod>() {
            Err(SyncError::InvalidOption { option, allowed, .. }) => {
                assert_eq!(option, "resampling type");
                assert!(allowed.contains("CUBIC_CONVOLUTION"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!("WGS85".parse::<Datum>().is_err());
    }

    #[test]
    fn test_render_default_parameters() {
        let params = ResampleParams::new("/data/MOD11A1.A2020001.h18v04.005.hdf", extent());
        let text = params.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "INPUT_FILENAME = /data/MOD11A1.A2020001.h18v04.005.hdf");
        assert_eq!(lines[1], "SPECTRAL_SUBSET = ( 1 1 )");
        assert_eq!(lines[2], "SPATIAL_SUBSET_TYPE = INPUT_LAT_LONG");
        assert_eq!(lines[3], "SPATIAL_SUBSET_UL_CORNER = ( 50.000000 0.000000 )");
        assert_eq!(lines[4], "SPATIAL_SUBSET_LR_CORNER = ( 40.000000 15.557200 )");
        assert_eq!(lines[5], "OUTPUT_FILENAME = /data/MOD11A1.A2020001.h18v04.005.tif");
        assert_eq!(lines[6], "RESAMPLING_TYPE = NEAREST_NEIGHBOR");
        assert_eq!(lines[7], "OUTPUT_PROJECTION_TYPE = GEO");
        assert_eq!(
            lines[8],
            "OUTPUT_PROJECTION_PARAMETERS = ( 0.0 0.0 0.0 0.0 0.0 0.0 0.0 0.0 0.0 0.0 0.0 0.0 0.0 0.0 0.0 )"
        );
        assert_eq!(lines[9], "DATUM = WGS84");
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn test_optional_keys() {
        let mut params = ResampleParams::new("tile.hdf", extent())
            .with_utm_zone(32)
            .unwrap()
            .with_pixel_size(1000.0)
            .unwrap();
        params.projection = ProjectionType::Utm;
        let text = params.render();
        assert!(text.contains("OUTPUT_PROJECTION_TYPE = UTM\n"));
        assert!(text.contains("UTM_ZONE = 32\n"));
        assert!(text.ends_with("OUTPUT_PIXEL_SIZE = 1000\n"));

        assert!(ResampleParams::new("tile.hdf", extent()).with_utm_zone(61).is_err());
        assert!(ResampleParams::new("tile.hdf", extent()).with_pixel_size(0.0).is_err());
    }

    #[test]
    fn test_write_to_names_file_by_product() {
        let dir = tempfile::tempdir().unwrap();
        let params = ResampleParams::new(dir.path().join("MOD11A1.A2020001.h18v04.005.hdf"), extent());
        let path = params.write_to(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "MOD11A1_mrt_resample.conf");
        assert_eq!(std::fs::read_to_string(path).unwrap(), params.render());
    }

    #[test]
    fn test_parameters_from_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let tile = dir.path().join("MOD11A1.A2020001.h18v04.005.hdf");
        std::fs::write(&tile, b"hdf").unwrap();
        assert!(matches!(ResampleParams::for_tile(&tile), Err(SyncError::MissingInput(_))));

        let xml = crate::descriptor::tests::sample_descriptor("tile", (40.0, 50.0), (0.0, 15.5572));
        std::fs::write(Descriptor::path_for(&tile), xml).unwrap();
        let params = ResampleParams::for_tile(&tile).unwrap();
        assert_eq!(params.extent, extent());
    }

    #[tokio::test]
    async fn test_convert_validates_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tile.hdf");
        let conf = dir.path().join("MOD11A1_mrt_resample.conf");
        let mrt = dir.path().join("mrt");

        match convert(&mrt, &input, &conf).await {
            Err(e @ SyncError::MissingInput(_)) => assert!(e.to_string().ends_with("tile.hdf not exist")),
            other => panic!("unexpected {other:?}"),
        }

        std::fs::write(&input, b"hdf").unwrap();
        assert!(matches!(convert(&mrt, &input, &conf).await, Err(SyncError::MissingInput(_))));

        std::fs::write(&conf, b"").unwrap();
        assert!(matches!(convert(&mrt, &input, &conf).await, Err(SyncError::ToolNotFound(_))));

        fake_install(&mrt, &[MrtTool::Mosaic]);
        match convert(&mrt, &input, &conf).await {
            Err(SyncError::ToolNotFound(path)) => {
                assert!(path.ends_with(MrtTool::Resample.file_name()))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
