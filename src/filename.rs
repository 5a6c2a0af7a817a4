//! Structured view of repository file names.
//!
//! Data files look like `MOD11A1.A2020001.h18v04.005.2020003123456.hdf`
//! (descriptors append `.xml`); browse imagery carries a leading `BROWSE`
//! marker and a `.jpg` extension, which shifts every field by one.

use crate::error::SyncError;
use std::cmp::Ordering;
use std::fmt;

/// Leading field marking browse imagery.
pub const BROWSE_MARKER: &str = "BROWSE";

/// Extension of browse imagery.
pub const IMAGERY_EXTENSION: &str = "jpg";

/// Last extension field of descriptor documents.
pub const DESCRIPTOR_EXTENSION: &str = "xml";

/// A parsed tile file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileName {
    /// The name as listed.
    pub raw: String,
    /// Whether the name is browse imagery (marker field or jpg extension).
    pub imagery: bool,
    /// Product short name, e.g. `MOD11A1`.
    pub product: String,
    /// Acquisition date field, e.g. `A2020001`.
    pub date: String,
    /// Tile id, e.g. `h18v04`.
    pub tile: String,
    /// Collection version, e.g. `005`.
    pub version: String,
    /// Production stamp fields between version and extension, if any.
    pub production: Option<String>,
    /// Everything after the numeric fields, e.g. `hdf` or `hdf.xml`.
    pub extension: String,
}

impl RemoteFileName {
    /// Parses a name, failing with a descriptive error on malformed input.
    pub fn parse(name: &str) -> Result<Self, SyncError> {
        let malformed = |reason: &str| SyncError::MalformedFileName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = name.split('.').collect();
        let marked = fields.first() == Some(&BROWSE_MARKER);
        let fields = if marked { &fields[1..] } else { &fields[..] };
        if fields.len() < 5 {
            return Err(malformed(
                "expected product.date.tile.version[.production].extension",
            ));
        }
        if fields.iter().any(|f| f.is_empty()) {
            return Err(malformed("empty field"));
        }

        let rest = &fields[4..];
        let numeric = rest
            .iter()
            .take_while(|f| f.bytes().all(|b| b.is_ascii_digit()))
            .count();
        if numeric == rest.len() {
            return Err(malformed("missing extension"));
        }
        let production = (numeric > 0).then(|| rest[..numeric].join("."));
        let extension = rest[numeric..].join(".");

        Ok(Self {
            raw: name.to_string(),
            imagery: marked || extension == IMAGERY_EXTENSION,
            product: fields[0].to_string(),
            date: fields[1].to_string(),
            tile: fields[2].to_string(),
            version: fields[3].to_string(),
            production,
            extension,
        })
    }

    /// `product.date.tile`, the key shared by every version of one tile-day.
    pub fn prefix(&self) -> String {
        format!("{}.{}.{}", self.product, self.date, self.tile)
    }

    /// Whether another name is a version of the same tile-day content.
    pub fn same_content(&self, other: &RemoteFileName) -> bool {
        self.imagery == other.imagery
            && self.product == other.product
            && self.date == other.date
            && self.tile == other.tile
            && self.extension == other.extension
    }

    /// Whether this is a descriptor document.
    pub fn is_descriptor(&self) -> bool {
        is_descriptor_name(&self.raw)
    }

    /// Compares revisions: version string first, then the production stamp.
    ///
    /// Both are fixed-width numeric strings, so plain string order is used.
    pub fn revision_cmp(&self, other: &RemoteFileName) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.production.cmp(&other.production))
    }

    /// Whether this name supersedes `other`.
    pub fn is_newer_than(&self, other: &RemoteFileName) -> bool {
        self.revision_cmp(other) == Ordering::Greater
    }
}

impl fmt::Display for RemoteFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Whether a raw name carries an imagery marker field.
pub fn has_imagery_marker(name: &str) -> bool {
    name.split('.')
        .any(|field| field == IMAGERY_EXTENSION || field == BROWSE_MARKER)
}

/// Whether a raw name is a descriptor document.
pub fn is_descriptor_name(name: &str) -> bool {
    name.rsplit('.').next() == Some(DESCRIPTOR_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_file() {
        let name = RemoteFileName::parse("MOD11A1.A2020001.h18v04.005.2020003123456.hdf").unwrap();
        assert!(!name.imagery);
        assert_eq!(name.product, "MOD11A1");
        assert_eq!(name.date, "A2020001");
        assert_eq!(name.tile, "h18v04");
        assert_eq!(name.version, "005");
        assert_eq!(name.production.as_deref(), Some("2020003123456"));
        assert_eq!(name.extension, "hdf");
        assert_eq!(name.prefix(), "MOD11A1.A2020001.h18v04");
        assert!(!name.is_descriptor());
    }

    #[test]
    fn test_parse_short_and_descriptor_names() {
        let short = RemoteFileName::parse("MOD11A1.A2020001.h18v04.005.hdf").unwrap();
        assert_eq!(short.production, None);
        assert_eq!(short.extension, "hdf");

        let xml = RemoteFileName::parse("MOD11A1.A2020001.h18v04.005.2020003123456.hdf.xml").unwrap();
        assert_eq!(xml.extension, "hdf.xml");
        assert!(xml.is_descriptor());
        assert!(!xml.same_content(&short));
    }

    #[test]
    fn test_parse_browse_imagery() {
        let jpg =
            RemoteFileName::parse("BROWSE.MOD11A1.A2020001.h18v04.005.2020003123456.1.jpg").unwrap();
        assert!(jpg.imagery);
        assert_eq!(jpg.tile, "h18v04");
        assert_eq!(jpg.production.as_deref(), Some("2020003123456.1"));
        assert_eq!(jpg.extension, "jpg");
        assert!(has_imagery_marker(&jpg.raw));

        let unmarked = RemoteFileName::parse("MOD11A1.A2020001.h18v04.005.jpg").unwrap();
        assert!(unmarked.imagery);
        assert_eq!(unmarked.tile, "h18v04");
    }

    #[test]
    fn test_malformed_names_are_reported() {
        for bad in ["listfileMOD11A1.005.txt", "MOD11A1.A2020001.h18v04.005", "a..b.c.d.hdf", "BROWSE.jpg"] {
            match RemoteFileName::parse(bad) {
                Err(SyncError::MalformedFileName { name, .. }) => assert_eq!(name, bad),
                other => panic!("expected malformed error for {bad}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_revision_order_is_lexicographic() {
        let v4 = RemoteFileName::parse("MOD11A1.A2020001.h18v04.004.hdf").unwrap();
        let v5 = RemoteFileName::parse("MOD11A1.A2020001.h18v04.005.hdf").unwrap();
        assert!(v5.is_newer_than(&v4));
        assert!(!v4.is_newer_than(&v5));
        assert!(!v5.is_newer_than(&v5));

        let early = RemoteFileName::parse("MOD11A1.A2020001.h18v04.005.2020003000000.hdf").unwrap();
        let late = RemoteFileName::parse("MOD11A1.A2020001.h18v04.005.2020009000000.hdf").unwrap();
        assert!(late.is_newer_than(&early));
        assert!(v5.revision_cmp(&early) == Ordering::Less);
    }
}
