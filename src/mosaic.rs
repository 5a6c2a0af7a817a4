//! Mosaicking several same-day tiles with the MRT `mrtmosaic` tool.
//!
//! Besides running the tool, a mosaic gets its own descriptor: the fields
//! shared by all constituents are taken from the first tile, the footprint is
//! the union of every constituent's extent and each input tile is listed as
//! an input granule.

use crate::descriptor::{Descriptor, Element, GeographicExtent};
use crate::error::SyncError;
use crate::tool::{MrtInstall, MrtTool};
use quick_xml::Writer;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const DOCTYPE: &str = r#"<!DOCTYPE GranuleMetaDataFile SYSTEM "http://ecsinfo.gsfc.nasa.gov/ECSInfo/ecsmetadata/dtds/DPL/ECS/ScienceGranuleMetadata.dtd">"#;

/// Granule sections copied verbatim from the first constituent.
const SHARED_SECTIONS: &[&str] = &["CollectionMetaData", "RangeDateTime", "Platform"];

/// Componentwise min/max over the extents; `None` when empty.
pub fn union_extent(extents: &[GeographicExtent]) -> Option<GeographicExtent> {
    GeographicExtent::union_all(extents)
}

/// Serialises a descriptor tree with the ECS document header.
pub fn render_document(root: &Element) -> Result<String, SyncError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    root.write_to(&mut writer)?;
    let body = String::from_utf8(writer.into_inner())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(format!("{}\n{}\n{}\n", XML_DECLARATION, DOCTYPE, body))
}

fn boundary(extent: &GeographicExtent) -> Element {
    let points = extent.corners().iter().fold(Element::new("Boundary"), |b, p| {
        b.with_child(
            Element::new("Point")
                .with_child(Element::leaf("PointLongitude", p.lon.to_string()))
                .with_child(Element::leaf("PointLatitude", p.lat.to_string())),
        )
    });
    Element::new("SpatialDomainContainer").with_child(
        Element::new("HorizontalSpatialDomainContainer")
            .with_child(Element::new("GPolygon").with_child(points)),
    )
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A set of tiles to combine, with their descriptors loaded.
#[derive(Debug)]
pub struct Mosaic {
    tiles: Vec<PathBuf>,
    descriptors: Vec<Descriptor>,
}

impl Mosaic {
    /// Loads the descriptor of every tile. Tiles and descriptors must exist.
    pub fn open(tiles: &[PathBuf]) -> Result<Self, SyncError> {
        if tiles.is_empty() {
            return Err(SyncError::InvalidOption {
                option: "mosaic inputs",
                value: String::new(),
                allowed: "one or more tile files".to_string(),
            });
        }
        let mut descriptors = Vec::with_capacity(tiles.len());
        for tile in tiles {
            if !tile.exists() {
                return Err(SyncError::MissingInput(tile.clone()));
            }
            descriptors.push(Descriptor::for_tile(tile)?);
        }
        Ok(Self {
            tiles: tiles.to_vec(),
            descriptors,
        })
    }

    pub fn tiles(&self) -> &[PathBuf] {
        &self.tiles
    }

    /// Union of the constituents' footprints.
    pub fn extent(&self) -> Result<GeographicExtent, SyncError> {
        let extents = self
            .descriptors
            .iter()
            .map(Descriptor::extent)
            .collect::<Result<Vec<_>, _>>()?;
        union_extent(&extents).ok_or_else(|| SyncError::Descriptor {
            document: "mosaic".to_string(),
            element: "Boundary".to_string(),
        })
    }

    /// Builds the combined descriptor tree.
    pub fn descriptor(&self) -> Result<Element, SyncError> {
        let first = &self.descriptors[0];
        let mut granule = Element::new("GranuleURMetaData");
        if let Ok(source) = first.granule() {
            for section in SHARED_SECTIONS {
                if let Some(el) = source.child(section) {
                    granule.children.push(el.clone());
                }
            }
        }
        granule.children.push(boundary(&self.extent()?));
        granule.children.push(self.tiles.iter().fold(
            Element::new("InputGranule"),
            |inputs, tile| inputs.with_child(Element::leaf("InputPointer", file_name(tile))),
        ));

        let mut root = Element::new("GranuleMetaDataFile");
        if let Ok(dtd) = first.dtd_version() {
            root.children.push(Element::leaf("DTDVersion", dtd));
        }
        if let Ok(center) = first.data_center() {
            root.children.push(Element::leaf("DataCenterId", center));
        }
        root.children.push(granule);
        Ok(root)
    }

    /// Writes the combined descriptor next to `output` as `<output>.xml`.
    pub fn write_descriptor(&self, output: &Path) -> Result<PathBuf, SyncError> {
        let path = Descriptor::path_for(output);
        std::fs::write(&path, render_document(&self.descriptor()?)?)?;
        Ok(path)
    }

    /// Writes the tool's input list, one tile path per line.
    pub fn write_input_list(&self, path: &Path) -> Result<(), SyncError> {
        let mut content = String::new();
        for tile in &self.tiles {
            content.push_str(&tile.display().to_string());
            content.push('\n');
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Input list path used for `output`.
    pub fn input_list_path(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_os_string();
        name.push(".list");
        PathBuf::from(name)
    }

    /// Runs `mrtmosaic` and writes the combined descriptor.
    ///
    /// `subset` is passed through as the tool's spectral subset (`-s`).
    pub async fn run(
        &self,
        install_root: &Path,
        output: &Path,
        subset: Option<&str>,
    ) -> Result<PathBuf, SyncError> {
        let install = MrtInstall::locate(install_root)?;
        install.executable(MrtTool::Mosaic)?;

        let list = Self::input_list_path(output);
        self.write_input_list(&list)?;

        let mut args = vec![
            OsString::from("-i"),
            list.into_os_string(),
            OsString::from("-o"),
            output.as_os_str().to_os_string(),
        ];
        if let Some(subset) = subset {
            args.push(OsString::from("-s"));
            args.push(OsString::from(subset));
        }
        info!("Mosaicking {} tiles into {}", self.tiles.len(), output.display());
        install.run(MrtTool::Mosaic, &args).await?;

        self.write_descriptor(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::sample_descriptor;

    fn tile(dir: &Path, name: &str, lat: (f64, f64), lon: (f64, f64)) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"hdf").unwrap();
        std::fs::write(Descriptor::path_for(&path), sample_descriptor(name, lat, lon)).unwrap();
        path
    }

    fn three_tiles(dir: &Path) -> Vec<PathBuf> {
        vec![
            tile(dir, "MOD11A1.A2020001.h18v04.005.hdf", (40.0, 50.0), (0.0, 15.0)),
            tile(dir, "MOD11A1.A2020001.h18v05.005.hdf", (30.0, 40.0), (0.0, 11.5)),
            tile(dir, "MOD11A1.A2020001.h19v04.005.hdf", (40.0, 50.0), (13.0, 31.0)),
        ]
    }

    #[test]
    fn test_union_extent_of_three_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = Mosaic::open(&three_tiles(dir.path())).unwrap();
        assert_eq!(
            mosaic.extent().unwrap(),
            GeographicExtent {
                min_lat: 30.0,
                max_lat: 50.0,
                min_lon: 0.0,
                max_lon: 31.0
            }
        );
    }

    #[test]
    fn test_synthesized_descriptor_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = Mosaic::open(&three_tiles(dir.path())).unwrap();
        let path = mosaic.write_descriptor(&dir.path().join("mosaic.hdf")).unwrap();
        assert!(path.ends_with("mosaic.hdf.xml"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(XML_DECLARATION));
        assert!(text.contains("<!DOCTYPE GranuleMetaDataFile"));

        let combined = Descriptor::from_path(&path).unwrap();
        assert_eq!(combined.dtd_version().unwrap(), "1.00");
        assert_eq!(combined.collection_metadata().unwrap()["ShortName"], "MOD11A1");
        assert_eq!(combined.platform().unwrap().platform, "Terra");
        assert_eq!(combined.extent().unwrap(), mosaic.extent().unwrap());
        assert_eq!(
            combined.input_granules().unwrap(),
            vec![
                "MOD11A1.A2020001.h18v04.005.hdf",
                "MOD11A1.A2020001.h18v05.005.hdf",
                "MOD11A1.A2020001.h19v04.005.hdf",
            ]
        );
    }

    #[test]
    fn test_input_list() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = three_tiles(dir.path());
        let mosaic = Mosaic::open(&tiles).unwrap();
        let list = Mosaic::input_list_path(&dir.path().join("out.hdf"));
        assert!(list.ends_with("out.hdf.list"));
        mosaic.write_input_list(&list).unwrap();
        let content = std::fs::read_to_string(list).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert_eq!(content.lines().next().unwrap(), tiles[0].display().to_string());
    }

    #[test]
    fn test_open_rejects_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(Mosaic::open(&[]), Err(SyncError::InvalidOption { .. })));

        let absent = dir.path().join("absent.hdf");
        assert!(matches!(Mosaic::open(&[absent]), Err(SyncError::MissingInput(_))));

        let bare = dir.path().join("bare.hdf");
        std::fs::write(&bare, b"hdf").unwrap();
        match Mosaic::open(&[bare]) {
            Err(SyncError::MissingInput(path)) => assert!(path.ends_with("bare.hdf.xml")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_requires_installation() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = Mosaic::open(&three_tiles(dir.path())).unwrap();
        let output = dir.path().join("mosaic.hdf");
        let result = mosaic.run(&dir.path().join("mrt"), &output, Some("1 0")).await;
        assert!(matches!(result, Err(SyncError::ToolNotFound(_))));
        assert!(!Mosaic::input_list_path(&output).exists());
    }
}
