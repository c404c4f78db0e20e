use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapingError};

/// A municipality the scraper can search, with the map viewport used to
/// deep-link straight into its results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Town {
    pub name: String,
    /// Province suffix shown by the site, e.g. "ON".
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_min: f64,
    pub latitude_max: f64,
    pub longitude_min: f64,
    pub longitude_max: f64,
    pub geo_id: String,
}

impl Town {
    pub fn geo_name(&self) -> String {
        format!("{}, {}", self.name, self.region)
    }

    /// Map URL showing this town's newest residential listings for sale.
    pub fn search_url(&self, base_url: &str, zoom_level: u8) -> String {
        let base = base_url.trim_end_matches('/');
        format!(
            "{base}/map#ZoomLevel={zoom}&Center={lat}%2C{lng}\
             &LatitudeMax={lat_max}&LongitudeMax={lng_max}\
             &LatitudeMin={lat_min}&LongitudeMin={lng_min}\
             &view=list&Sort=6-D&GeoIds={geo_id}&GeoName={geo_name}\
             &PropertyTypeGroupID=1&TransactionTypeId=2&PropertySearchTypeId=0&Currency=CAD",
            zoom = zoom_level,
            lat = self.latitude,
            lng = self.longitude,
            lat_max = self.latitude_max,
            lng_max = self.longitude_max,
            lat_min = self.latitude_min,
            lng_min = self.longitude_min,
            geo_id = self.geo_id,
            geo_name = urlencoding::encode(&self.geo_name()),
        )
    }
}

fn town(
    name: &str,
    latitude: f64,
    longitude: f64,
    lat_span: f64,
    lng_span: f64,
    geohash: &str,
) -> Town {
    Town {
        name: name.to_string(),
        region: "ON".to_string(),
        latitude,
        longitude,
        latitude_min: latitude - lat_span,
        latitude_max: latitude + lat_span,
        longitude_min: longitude - lng_span,
        longitude_max: longitude + lng_span,
        geo_id: format!("g30_{}", geohash),
    }
}

/// Built-in catalog, used unless the configuration supplies its own.
pub fn default_catalog() -> Vec<Town> {
    vec![
        town("Kitchener", 43.4516, -80.4925, 0.06, 0.11, "dpwz0q55"),
        town("Waterloo", 43.4643, -80.5204, 0.05, 0.09, "dpwxr8qv"),
        town("Cambridge", 43.3616, -80.3144, 0.06, 0.10, "dpwysmsz"),
        town("Guelph", 43.5448, -80.2482, 0.05, 0.09, "dpwztzj4"),
        town("Brantford", 43.1394, -80.2644, 0.05, 0.08, "dpwvmt31"),
        town("Woodstock", 43.1306, -80.7467, 0.04, 0.07, "dpwt6edj"),
        town("Stratford", 43.3700, -80.9822, 0.03, 0.06, "dpwqtpq8"),
    ]
}

/// Pick towns by name (case-insensitive), keeping the order requested.
/// An empty selection means the whole catalog.
pub fn select_towns(catalog: &[Town], names: &[String]) -> Result<Vec<Town>> {
    if names.is_empty() {
        return Ok(catalog.to_vec());
    }

    names
        .iter()
        .map(|name| {
            find_town(catalog, name).cloned().ok_or_else(|| {
                ScrapingError::ConfigError(format!("Town '{}' is not in the catalog", name))
            })
        })
        .collect()
}

pub fn find_town<'a>(catalog: &'a [Town], name: &str) -> Option<&'a Town> {
    let wanted = name.trim();
    catalog
        .iter()
        .find(|town| town.name.eq_ignore_ascii_case(wanted))
}
