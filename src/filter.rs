//! Selection of the files to consider from one day's listing.

use crate::filename::{has_imagery_marker, is_descriptor_name, RemoteFileName};
use crate::types::{TileFilterConfig, TileSelection};
use tracing::debug;

/// Reduces a day listing to the requested tiles and content types.
///
/// | tiles | imagery | kept |
/// |---|---|---|
/// | all | yes | every name |
/// | all | no | names without an imagery marker |
/// | set | yes | data and imagery names whose tile is in the set |
/// | set | no | data names whose tile is in the set |
///
/// `descriptors_only` then keeps only the xml descriptors. The input order is
/// preserved and the function is pure.
pub fn filter_files(names: &[String], config: &TileFilterConfig) -> Vec<String> {
    names
        .iter()
        .filter(|name| selected(name, config))
        .filter(|name| !config.descriptors_only || is_descriptor_name(name))
        .cloned()
        .collect()
}

fn selected(name: &str, config: &TileFilterConfig) -> bool {
    match (&config.tiles, config.include_imagery) {
        (TileSelection::All, true) => true,
        (TileSelection::All, false) => !has_imagery_marker(name),
        (tiles, include_imagery) => match RemoteFileName::parse(name) {
            Ok(parsed) => tiles.contains(&parsed.tile) && (include_imagery || !parsed.imagery),
            Err(e) => {
                debug!("Skipping {}: {}", name, e);
                false
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HDF: &str = "MOD11A1.A2020001.h18v04.005.2020003123456.hdf";
    const XML: &str = "MOD11A1.A2020001.h18v04.005.2020003123456.hdf.xml";
    const JPG: &str = "BROWSE.MOD11A1.A2020001.h18v04.005.2020003123456.1.jpg";
    const OTHER_HDF: &str = "MOD11A1.A2020001.h19v04.005.2020003123456.hdf";
    const OTHER_JPG: &str = "BROWSE.MOD11A1.A2020001.h19v04.005.2020003123456.1.jpg";

    fn listing() -> Vec<String> {
        [HDF, XML, JPG, OTHER_HDF, OTHER_JPG, "README.txt"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn config(tiles: &str, include_imagery: bool, descriptors_only: bool) -> TileFilterConfig {
        TileFilterConfig {
            tiles: tiles.parse().unwrap(),
            include_imagery,
            descriptors_only,
        }
    }

    #[test]
    fn test_all_tiles_with_imagery_keeps_everything() {
        assert_eq!(filter_files(&listing(), &config("", true, false)), listing());
    }

    #[test]
    fn test_all_tiles_without_imagery_drops_browse_files() {
        let kept = filter_files(&listing(), &config("", false, false));
        assert_eq!(kept, vec![HDF, XML, OTHER_HDF, "README.txt"]);
    }

    #[test]
    fn test_tile_set_with_imagery() {
        let kept = filter_files(&listing(), &config("h18v04", true, false));
        assert_eq!(kept, vec![HDF, XML, JPG]);
    }

    #[test]
    fn test_tile_set_without_imagery_keeps_only_hdf() {
        let names = vec![
            "MOD11A1.A2020001.h18v04.005.hdf".to_string(),
            "MOD11A1.A2020001.h18v04.005.jpg".to_string(),
        ];
        let kept = filter_files(&names, &config("h18v04", false, false));
        assert_eq!(kept, vec!["MOD11A1.A2020001.h18v04.005.hdf"]);

        let kept = filter_files(&listing(), &config("h18v04,h19v04", false, false));
        assert_eq!(kept, vec![HDF, XML, OTHER_HDF]);
    }

    #[test]
    fn test_descriptors_only_is_a_final_pass() {
        assert_eq!(filter_files(&listing(), &config("", true, true)), vec![XML]);
        assert_eq!(filter_files(&listing(), &config("h19v04", true, true)), Vec::<String>::new());
    }

    #[test]
    fn test_filter_is_idempotent() {
        for cfg in [
            config("", true, false),
            config("", false, false),
            config("h18v04", true, false),
            config("h18v04,h19v04", false, true),
        ] {
            let once = filter_files(&listing(), &cfg);
            assert_eq!(filter_files(&listing(), &cfg), once);
            assert_eq!(filter_files(&once, &cfg), once);
        }
    }
}
