//! Tile descriptor documents (`<tile>.hdf.xml`).
//!
//! A descriptor is an ECS granule metadata file: a `GranuleMetaDataFile`
//! root holding the DTD version, the data center and a `GranuleURMetaData`
//! section with collection, temporal, spatial, quality, platform and
//! lineage information. Documents are read into a small element tree and
//! fields are extracted by path.

use crate::error::SyncError;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One XML element with its text and children; attributes are not used by
/// descriptors and are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Leaf element holding `text`.
    pub fn leaf(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            children: Vec::new(),
        }
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// First child named `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Every child named `name`.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follows a `/` separated path of child names.
    pub fn path(&self, path: &str) -> Option<&Element> {
        path.split('/').try_fold(self, |el, name| el.child(name))
    }

    /// Tag to text map over this element and its descendants, skipping
    /// elements without text. Later duplicates overwrite earlier ones.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        self.collect_text(&mut map);
        map
    }

    fn collect_text(&self, map: &mut BTreeMap<String, String>) {
        if !self.text.trim().is_empty() {
            map.insert(self.name.clone(), self.text.trim().to_string());
        }
        for child in &self.children {
            child.collect_text(map);
        }
    }

    /// Serialises the element and its subtree.
    pub fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), quick_xml::Error> {
        if self.children.is_empty() && self.text.is_empty() {
            writer.write_event(Event::Empty(BytesStart::new(self.name.as_str())))?;
            return Ok(());
        }
        writer.write_event(Event::Start(BytesStart::new(self.name.as_str())))?;
        if !self.text.is_empty() {
            writer.write_event(Event::Text(BytesText::new(&self.text)))?;
        }
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }
}

/// Parses an XML document into its root element.
pub fn parse_document(document: &str, xml: &str) -> Result<Element, SyncError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                stack.push(Element::new(String::from_utf8_lossy(e.name().as_ref())));
            }
            Event::Empty(e) => {
                let element = Element::new(String::from_utf8_lossy(e.name().as_ref()));
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    root.ok_or_else(|| SyncError::Descriptor {
        document: document.to_string(),
        element: "root".to_string(),
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

/// A corner of a tile footprint, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Bounding box of one or more footprints, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeographicExtent {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeographicExtent {
    /// Bounding box of a polygon; `None` without points.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let start = Self {
            min_lat: first.lat,
            max_lat: first.lat,
            min_lon: first.lon,
            max_lon: first.lon,
        };
        Some(rest.iter().fold(start, |acc, p| Self {
            min_lat: acc.min_lat.min(p.lat),
            max_lat: acc.max_lat.max(p.lat),
            min_lon: acc.min_lon.min(p.lon),
            max_lon: acc.max_lon.max(p.lon),
        }))
    }

    /// Componentwise union of two extents.
    pub fn union(&self, other: &GeographicExtent) -> Self {
        Self {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }

    /// Union of every extent; `None` for an empty input.
    pub fn union_all<'a, I>(extents: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a GeographicExtent>,
    {
        extents
            .into_iter()
            .fold(None, |acc: Option<Self>, e| match acc {
                Some(acc) => Some(acc.union(e)),
                None => Some(*e),
            })
    }

    /// Upper-left corner as (latitude, longitude).
    pub fn upper_left(&self) -> (f64, f64) {
        (self.max_lat, self.min_lon)
    }

    /// Lower-right corner as (latitude, longitude).
    pub fn lower_right(&self) -> (f64, f64) {
        (self.min_lat, self.max_lon)
    }

    /// Footprint polygon, clockwise from the upper-left corner.
    pub fn corners(&self) -> [GeoPoint; 4] {
        [
            GeoPoint { lat: self.max_lat, lon: self.min_lon },
            GeoPoint { lat: self.max_lat, lon: self.max_lon },
            GeoPoint { lat: self.min_lat, lon: self.max_lon },
            GeoPoint { lat: self.min_lat, lon: self.min_lon },
        ]
    }
}

/// Quality information for one measured parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasuredParameter {
    pub name: String,
    pub qa_stats: BTreeMap<String, String>,
    pub qa_flags: BTreeMap<String, String>,
}

/// Acquisition platform identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Platform {
    pub platform: String,
    pub instrument: String,
    pub sensor: String,
}

/// Everything extractable from a descriptor, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DescriptorSummary {
    pub document: String,
    pub dtd_version: Option<String>,
    pub data_center: Option<String>,
    pub granule_ur: Option<String>,
    pub db_id: Option<String>,
    pub insert_time: Option<String>,
    pub last_update: Option<String>,
    pub collection: BTreeMap<String, String>,
    pub data_files: BTreeMap<String, String>,
    pub data_granule: BTreeMap<String, String>,
    pub pge_version: Option<String>,
    pub range_time: BTreeMap<String, String>,
    pub extent: Option<GeographicExtent>,
    pub measured: Vec<MeasuredParameter>,
    pub platform: Option<Platform>,
    pub psas: BTreeMap<String, String>,
    pub input_granules: Vec<String>,
    pub browse_granule: Option<String>,
}

const GRANULE: &str = "GranuleURMetaData";
const BOUNDARY: &str = "SpatialDomainContainer/HorizontalSpatialDomainContainer/GPolygon/Boundary";

/// A parsed tile descriptor.
#[derive(Debug, Clone)]
pub struct Descriptor {
    document: String,
    root: Element,
}

impl Descriptor {
    /// Parses descriptor text; `document` names it in errors.
    pub fn parse(document: &str, xml: &str) -> Result<Self, SyncError> {
        Ok(Self {
            document: document.to_string(),
            root: parse_document(document, xml)?,
        })
    }

    /// Reads a descriptor file.
    pub fn from_path(path: &Path) -> Result<Self, SyncError> {
        let xml = std::fs::read_to_string(path)?;
        Self::parse(&path.display().to_string(), &xml)
    }

    /// Path of the descriptor accompanying a tile (`<tile>.xml`).
    pub fn path_for(tile: &Path) -> PathBuf {
        let mut name = tile.as_os_str().to_os_string();
        name.push(".xml");
        PathBuf::from(name)
    }

    /// Reads the descriptor accompanying a tile.
    pub fn for_tile(tile: &Path) -> Result<Self, SyncError> {
        let path = Self::path_for(tile);
        if !path.exists() {
            return Err(SyncError::MissingInput(path));
        }
        Self::from_path(&path)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    fn missing(&self, element: &str) -> SyncError {
        SyncError::Descriptor {
            document: self.document.clone(),
            element: element.to_string(),
        }
    }

    fn at(&self, path: &str) -> Result<&Element, SyncError> {
        self.root.path(path).ok_or_else(|| self.missing(path))
    }

    fn granule_at(&self, path: &str) -> Result<&Element, SyncError> {
        self.at(&format!("{}/{}", GRANULE, path))
    }

    fn granule_text(&self, path: &str) -> Result<&str, SyncError> {
        Ok(self.granule_at(path)?.text.trim())
    }

    pub fn dtd_version(&self) -> Result<&str, SyncError> {
        Ok(self.at("DTDVersion")?.text.trim())
    }

    pub fn data_center(&self) -> Result<&str, SyncError> {
        Ok(self.at("DataCenterId")?.text.trim())
    }

    pub fn granule(&self) -> Result<&Element, SyncError> {
        self.at(GRANULE)
    }

    pub fn granule_ur(&self) -> Result<&str, SyncError> {
        self.granule_text("GranuleUR")
    }

    pub fn db_id(&self) -> Result<&str, SyncError> {
        self.granule_text("DbID")
    }

    pub fn insert_time(&self) -> Result<&str, SyncError> {
        self.granule_text("InsertTime")
    }

    pub fn last_update(&self) -> Result<&str, SyncError> {
        self.granule_text("LastUpdate")
    }

    pub fn collection_metadata(&self) -> Result<BTreeMap<String, String>, SyncError> {
        Ok(self.granule_at("CollectionMetaData")?.flatten())
    }

    pub fn data_files(&self) -> Result<BTreeMap<String, String>, SyncError> {
        Ok(self.granule_at("DataFiles/DataFileContainer")?.flatten())
    }

    pub fn data_granule(&self) -> Result<BTreeMap<String, String>, SyncError> {
        Ok(self.granule_at("ECSDataGranule")?.flatten())
    }

    pub fn pge_version(&self) -> Result<&str, SyncError> {
        self.granule_text("PGEVersionClass/PGEVersion")
    }

    pub fn range_time(&self) -> Result<BTreeMap<String, String>, SyncError> {
        Ok(self.granule_at("RangeDateTime")?.flatten())
    }

    /// Footprint polygon of the tile.
    pub fn boundary(&self) -> Result<Vec<GeoPoint>, SyncError> {
        let boundary = self.granule_at(BOUNDARY)?;
        boundary
            .children_named("Point")
            .map(|point| {
                Ok(GeoPoint {
                    lat: self.coordinate(point, "PointLatitude")?,
                    lon: self.coordinate(point, "PointLongitude")?,
                })
            })
            .collect()
    }

    fn coordinate(&self, point: &Element, name: &str) -> Result<f64, SyncError> {
        point
            .child(name)
            .and_then(|c| c.text.trim().parse().ok())
            .ok_or_else(|| self.missing(&format!("{}/Point/{}", BOUNDARY, name)))
    }

    /// Bounding box of the footprint polygon.
    pub fn extent(&self) -> Result<GeographicExtent, SyncError> {
        GeographicExtent::from_points(&self.boundary()?)
            .ok_or_else(|| self.missing(&format!("{}/Point", BOUNDARY)))
    }

    /// Quality statistics, one entry per measured parameter container.
    pub fn measured_parameters(&self) -> Result<Vec<MeasuredParameter>, SyncError> {
        let measured = self.granule_at("MeasuredParameter")?;
        let containers: Vec<&Element> = measured
            .children_named("MeasuredParameterContainer")
            .collect();
        let flat = |el: Option<&Element>| el.map(Element::flatten).unwrap_or_default();
        Ok(containers
            .into_iter()
            .map(|container| MeasuredParameter {
                name: container
                    .child("ParameterName")
                    .or_else(|| measured.child("ParameterName"))
                    .map(|n| n.text.trim().to_string())
                    .unwrap_or_default(),
                qa_stats: flat(container.child("QAStats")),
                qa_flags: flat(container.child("QAFlags")),
            })
            .collect())
    }

    pub fn platform(&self) -> Result<Platform, SyncError> {
        Ok(Platform {
            platform: self.granule_text("Platform/PlatformShortName")?.to_string(),
            instrument: self
                .granule_text("Platform/Instrument/InstrumentShortName")?
                .to_string(),
            sensor: self
                .granule_text("Platform/Instrument/Sensor/SensorShortName")?
                .to_string(),
        })
    }

    /// Product specific attributes, `PSAName -> PSAValue`.
    pub fn psas(&self) -> Result<BTreeMap<String, String>, SyncError> {
        Ok(self
            .granule_at("PSAs")?
            .children_named("PSA")
            .filter_map(|psa| {
                let name = psa.child("PSAName")?.text.trim().to_string();
                let value = psa.child("PSAValue")?.text.trim().to_string();
                Some((name, value))
            })
            .collect())
    }

    /// Granules this tile was produced from.
    pub fn input_granules(&self) -> Result<Vec<String>, SyncError> {
        Ok(self
            .granule_at("InputGranule")?
            .children
            .iter()
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect())
    }

    pub fn browse_granule(&self) -> Result<&str, SyncError> {
        self.granule_text("BrowseProduct/BrowseGranuleId")
    }

    /// Collects every available field; absent sections are left empty.
    pub fn summary(&self) -> DescriptorSummary {
        let owned = |r: Result<&str, SyncError>| r.ok().map(str::to_string);
        DescriptorSummary {
            document: self.document.clone(),
            dtd_version: owned(self.dtd_version()),
            data_center: owned(self.data_center()),
            granule_ur: owned(self.granule_ur()),
            db_id: owned(self.db_id()),
            insert_time: owned(self.insert_time()),
            last_update: owned(self.last_update()),
            collection: self.collection_metadata().unwrap_or_default(),
            data_files: self.data_files().unwrap_or_default(),
            data_granule: self.data_granule().unwrap_or_default(),
            pge_version: owned(self.pge_version()),
            range_time: self.range_time().unwrap_or_default(),
            extent: self.extent().ok(),
            measured: self.measured_parameters().unwrap_or_default(),
            platform: self.platform().ok(),
            psas: self.psas().unwrap_or_default(),
            input_granules: self.input_granules().unwrap_or_default(),
            browse_granule: owned(self.browse_granule()),
        }
    }
}
