//! The registry table and the transforms it exposes.

use crate::error::{CrsError, Result};
use crate::tmerc::{Ellipsoid, TransverseMercator, WebMercator};
use geocat_core::BBox;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// EPSG code of the global reference system (WGS 84 lon/lat)
pub const GLOBAL_EPSG: u32 = 4326;

const BUILTIN_TABLE: &str = include_str!("registry.toml");

/// Segments per bbox edge when transforming a query box
const DENSIFY_SEGMENTS: usize = 16;

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default = "default_global")]
    global: u32,
    #[serde(default)]
    ellipsoid: HashMap<String, EllipsoidEntry>,
    #[serde(default)]
    crs: Vec<CrsEntry>,
}

fn default_global() -> u32 {
    GLOBAL_EPSG
}

#[derive(Debug, Deserialize)]
struct EllipsoidEntry {
    a: f64,
    inv_f: f64,
}

#[derive(Debug, Deserialize)]
struct CrsEntry {
    epsg: u32,
    name: String,
    kind: CrsKind,
    domain: [f64; 4],
    #[serde(default)]
    ellipsoid: Option<String>,
    #[serde(default)]
    lat_0: Option<f64>,
    #[serde(default)]
    lon_0: Option<f64>,
    #[serde(default)]
    k_0: Option<f64>,
    #[serde(default)]
    false_easting: f64,
    #[serde(default)]
    false_northing: f64,
    #[serde(default)]
    radius: Option<f64>,
}

/// Family of coordinate system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrsKind {
    /// Longitude/latitude, treated as coincident with the global system
    Geographic,
    WebMercator,
    TransverseMercator,
}

#[derive(Debug, Clone)]
enum Projection {
    Identity,
    WebMercator(WebMercator),
    TransverseMercator(TransverseMercator),
}

// ---------------------------------------------------------------------------
// Registry entries
// ---------------------------------------------------------------------------

/// One supported coordinate reference system
#[derive(Debug, Clone)]
pub struct CrsDef {
    pub epsg: u32,
    pub name: String,
    pub kind: CrsKind,
    /// Lon/lat box inside which the transform is valid
    pub domain: BBox,
    projection: Projection,
}

impl CrsDef {
    /// OGC URI form, e.g. `http://www.opengis.net/def/crs/EPSG/0/6677`
    pub fn uri(&self) -> String {
        format!("http://www.opengis.net/def/crs/EPSG/0/{}", self.epsg)
    }

    /// Native (x, y) to global (lon, lat)
    pub fn to_global(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let out_of_domain = CrsError::OutOfDomain {
            epsg: self.epsg,
            x,
            y,
        };
        if !x.is_finite() || !y.is_finite() {
            return Err(out_of_domain);
        }
        let (lon, lat) = match &self.projection {
            Projection::Identity => {
                if !self.domain.contains_point(x, y) {
                    return Err(out_of_domain);
                }
                (x, y)
            }
            Projection::WebMercator(p) => p.inverse(x, y),
            Projection::TransverseMercator(p) => p.inverse(x, y),
        };
        if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
            return Err(out_of_domain);
        }
        Ok((lon, lat))
    }

    /// Global (lon, lat) to native (x, y); the point must lie in the domain.
    pub fn to_native(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        if !lon.is_finite() || !lat.is_finite() || !self.domain.contains_point(lon, lat) {
            return Err(CrsError::OutOfDomain {
                epsg: self.epsg,
                x: lon,
                y: lat,
            });
        }
        Ok(match &self.projection {
            Projection::Identity => (lon, lat),
            Projection::WebMercator(p) => p.forward(lon, lat),
            Projection::TransverseMercator(p) => p.forward(lon, lat),
        })
    }

    /// Transform a native bbox into the global system.
    ///
    /// Projected boxes are densified along every edge so the result encloses
    /// the curved image of the box, not just its four corners.
    pub fn bbox_to_global(&self, bbox: &BBox) -> Result<BBox> {
        if matches!(self.projection, Projection::Identity) {
            for (x, y) in bbox.corners() {
                self.to_global(x, y)?;
            }
            return Ok(*bbox);
        }

        let corners = bbox.corners();
        let mut points = Vec::with_capacity(4 * DENSIFY_SEGMENTS);
        for i in 0..4 {
            let (x0, y0) = corners[i];
            let (x1, y1) = corners[(i + 1) % 4];
            for s in 0..DENSIFY_SEGMENTS {
                let t = s as f64 / DENSIFY_SEGMENTS as f64;
                points.push(self.to_global(x0 + (x1 - x0) * t, y0 + (y1 - y0) * t)?);
            }
        }
        BBox::enclosing(points).map_err(|e| CrsError::registry(e.to_string()))
    }

    fn from_entry(entry: CrsEntry, ellipsoids: &HashMap<String, Ellipsoid>) -> Result<Self> {
        let epsg = entry.epsg;
        let invalid = |what: &str| CrsError::registry(format!("EPSG:{epsg}: {what}"));

        let [min_lon, min_lat, max_lon, max_lat] = entry.domain;
        let domain = BBox::new(min_lon, min_lat, max_lon, max_lat)
            .map_err(|e| invalid(&format!("domain: {e}")))?;
        if min_lon < -180.0 || max_lon > 180.0 || min_lat < -90.0 || max_lat > 90.0 {
            return Err(invalid("domain exceeds lon/lat range"));
        }

        let projection = match entry.kind {
            CrsKind::Geographic => Projection::Identity,
            CrsKind::WebMercator => Projection::WebMercator(WebMercator {
                radius: entry.radius.ok_or_else(|| invalid("web_mercator needs radius"))?,
            }),
            CrsKind::TransverseMercator => {
                let name = entry
                    .ellipsoid
                    .as_deref()
                    .ok_or_else(|| invalid("transverse_mercator needs ellipsoid"))?;
                let ellipsoid = *ellipsoids
                    .get(name)
                    .ok_or_else(|| invalid(&format!("unknown ellipsoid '{name}'")))?;
                let lat_0 = entry.lat_0.ok_or_else(|| invalid("missing lat_0"))?;
                let lon_0 = entry.lon_0.ok_or_else(|| invalid("missing lon_0"))?;
                let k_0 = entry.k_0.ok_or_else(|| invalid("missing k_0"))?;
                if k_0 <= 0.0 {
                    return Err(invalid("k_0 must be positive"));
                }
                Projection::TransverseMercator(TransverseMercator::new(
                    ellipsoid,
                    lat_0,
                    lon_0,
                    k_0,
                    entry.false_easting,
                    entry.false_northing,
                ))
            }
        };

        Ok(Self {
            epsg,
            name: entry.name,
            kind: entry.kind,
            domain,
            projection,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable table of supported coordinate systems
#[derive(Debug, Clone)]
pub struct CrsRegistry {
    global: u32,
    entries: BTreeMap<u32, CrsDef>,
}

impl CrsRegistry {
    /// The table shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_TABLE)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CrsError::registry(format!("{}: {e}", path.display())))?;
        let registry = Self::from_toml_str(&content)
            .map_err(|e| CrsError::registry(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), crs_count = registry.entries.len(), "Loaded CRS registry");
        Ok(registry)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RegistryFile =
            toml::from_str(content).map_err(|e| CrsError::registry(e.to_string()))?;

        let mut ellipsoids = HashMap::with_capacity(file.ellipsoid.len());
        for (name, e) in file.ellipsoid {
            if e.a <= 0.0 || e.inv_f <= 1.0 {
                return Err(CrsError::registry(format!("ellipsoid '{name}' is degenerate")));
            }
            ellipsoids.insert(name, Ellipsoid { a: e.a, inv_f: e.inv_f });
        }

        let mut entries = BTreeMap::new();
        for entry in file.crs {
            let def = CrsDef::from_entry(entry, &ellipsoids)?;
            if let Some(prev) = entries.insert(def.epsg, def) {
                return Err(CrsError::registry(format!("duplicate entry EPSG:{}", prev.epsg)));
            }
        }

        match entries.get(&file.global) {
            Some(def) if def.kind == CrsKind::Geographic => {}
            Some(_) => {
                return Err(CrsError::registry(format!(
                    "global EPSG:{} must be geographic",
                    file.global
                )))
            }
            None => {
                return Err(CrsError::registry(format!(
                    "global EPSG:{} has no entry",
                    file.global
                )))
            }
        }

        Ok(Self {
            global: file.global,
            entries,
        })
    }

    pub fn global_epsg(&self) -> u32 {
        self.global
    }

    pub fn get(&self, epsg: u32) -> Result<&CrsDef> {
        self.entries.get(&epsg).ok_or(CrsError::UnsupportedEpsg(epsg))
    }

    pub fn is_supported(&self, epsg: u32) -> bool {
        self.entries.contains_key(&epsg)
    }

    /// All entries in EPSG order
    pub fn supported(&self) -> impl Iterator<Item = &CrsDef> {
        self.entries.values()
    }

    pub fn to_global(&self, epsg: u32, x: f64, y: f64) -> Result<(f64, f64)> {
        self.get(epsg)?.to_global(x, y)
    }

    pub fn to_native(&self, epsg: u32, lon: f64, lat: f64) -> Result<(f64, f64)> {
        self.get(epsg)?.to_native(lon, lat)
    }

    pub fn bbox_to_global(&self, epsg: u32, bbox: &BBox) -> Result<BBox> {
        self.get(epsg)?.bbox_to_global(bbox)
    }

    /// Resolve a client-supplied CRS identifier to a supported EPSG code.
    ///
    /// Accepts `EPSG:<n>`, a bare `<n>`, `CRS84`/`OGC:CRS84`, OGC URIs
    /// (`.../def/crs/EPSG/0/<n>`, `.../def/crs/OGC/1.3/CRS84`) and URNs
    /// (`urn:ogc:def:crs:EPSG::<n>`).
    pub fn parse_crs(&self, ident: &str) -> Result<u32> {
        let trimmed = ident.trim();
        let upper = trimmed.to_ascii_uppercase();

        let code = if upper == "CRS84" || upper.ends_with(":CRS84") || upper.ends_with("/CRS84")
        {
            self.global
        } else if let Some(rest) = upper.strip_prefix("EPSG:") {
            parse_code(rest, trimmed)?
        } else if let Some((_, rest)) = upper.rsplit_once("/EPSG/") {
            // `.../EPSG/<version>/<code>`
            let code = rest.rsplit('/').next().unwrap_or_default();
            parse_code(code, trimmed)?
        } else if upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
            parse_code(upper.rsplit(':').next().unwrap_or_default(), trimmed)?
        } else {
            parse_code(&upper, trimmed)?
        };

        self.get(code).map(|def| def.epsg)
    }
}

fn parse_code(code: &str, original: &str) -> Result<u32> {
    code.parse::<u32>()
        .map_err(|_| CrsError::Unrecognised(original.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn registry() -> CrsRegistry {
        CrsRegistry::builtin().unwrap()
    }

    #[test]
    fn test_builtin_contents() {
        let reg = registry();
        assert_eq!(reg.global_epsg(), GLOBAL_EPSG);
        for epsg in [4326, 6668, 3857] {
            assert!(reg.is_supported(epsg));
        }
        // Japan Plane Rectangular zones I through XIX
        for epsg in 6669..=6687 {
            assert_eq!(reg.get(epsg).unwrap().kind, CrsKind::TransverseMercator);
        }
        assert!(reg.get(6677).unwrap().name.ends_with("CS IX"));
    }

    #[test]
    fn test_unsupported_epsg() {
        let reg = registry();
        assert_eq!(
            reg.to_global(2154, 0.0, 0.0).unwrap_err(),
            CrsError::UnsupportedEpsg(2154)
        );
        assert!(reg.to_global(2154, 0.0, 0.0).unwrap_err().is_client_error());
    }

    #[test]
    fn test_zone_origin() {
        let reg = registry();
        let (lon, lat) = reg.to_global(6677, 0.0, 0.0).unwrap();
        assert!((lon - (139.0 + 50.0 / 60.0)).abs() < 1e-12);
        assert!((lat - 36.0).abs() < 1e-12);
    }

    #[test]
    fn test_to_native_rejects_out_of_domain() {
        let reg = registry();
        let err = reg.to_native(6677, 0.0, 0.0).unwrap_err();
        assert!(matches!(err, CrsError::OutOfDomain { epsg: 6677, .. }));
        assert!(reg.to_native(4326, 200.0, 0.0).is_err());
        assert!(reg.to_global(4326, 0.0, 95.0).is_err());
    }

    #[test]
    fn test_parse_crs_forms() {
        let reg = registry();
        assert_eq!(reg.parse_crs("EPSG:4326").unwrap(), 4326);
        assert_eq!(reg.parse_crs("epsg:6677").unwrap(), 6677);
        assert_eq!(reg.parse_crs("6677").unwrap(), 6677);
        assert_eq!(reg.parse_crs("CRS84").unwrap(), 4326);
        assert_eq!(reg.parse_crs("OGC:CRS84").unwrap(), 4326);
        assert_eq!(
            reg.parse_crs("http://www.opengis.net/def/crs/OGC/1.3/CRS84").unwrap(),
            4326
        );
        assert_eq!(
            reg.parse_crs("http://www.opengis.net/def/crs/EPSG/0/3857").unwrap(),
            3857
        );
        assert_eq!(reg.parse_crs("urn:ogc:def:crs:EPSG::6669").unwrap(), 6669);
        assert_eq!(
            reg.parse_crs("EPSG:9999").unwrap_err(),
            CrsError::UnsupportedEpsg(9999)
        );
        assert!(matches!(
            reg.parse_crs("mercator").unwrap_err(),
            CrsError::Unrecognised(_)
        ));
    }

    #[test]
    fn test_bbox_to_global_encloses_native_box() {
        let reg = registry();
        let def = reg.get(6676).unwrap();
        let (x0, y0) = def.to_native(138.70, 35.35).unwrap();
        let (x1, y1) = def.to_native(138.75, 35.40).unwrap();
        let native = BBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)).unwrap();

        let global = def.bbox_to_global(&native).unwrap();
        let eps = 1e-9;
        assert!(global.min_x <= 138.70 + eps && global.min_y <= 35.35 + eps);
        assert!(global.max_x >= 138.75 - eps && global.max_y >= 35.40 - eps);
        assert!(global.max_x - global.min_x < 0.06);
    }

    #[test]
    fn test_bbox_to_global_identity() {
        let reg = registry();
        let b = BBox::new(138.71, 35.36, 138.72, 35.37).unwrap();
        assert_eq!(reg.bbox_to_global(4326, &b).unwrap(), b);
    }

    #[test]
    fn test_custom_table_is_data_driven() {
        let table = r#"
[ellipsoid.GRS80]
a = 6378137.0
inv_f = 298.257222101

[[crs]]
epsg = 4326
name = "WGS 84"
kind = "geographic"
domain = [-180.0, -90.0, 180.0, 90.0]

[[crs]]
epsg = 6690
name = "JGD2011 / UTM zone 53N"
kind = "transverse_mercator"
ellipsoid = "GRS80"
lat_0 = 0.0
lon_0 = 135.0
k_0 = 0.9996
false_easting = 500000.0
domain = [132.0, 20.0, 138.0, 46.0]
"#;
        let reg = CrsRegistry::from_toml_str(table).unwrap();
        let (x, _) = reg.to_native(6690, 135.0, 35.0).unwrap();
        assert!((x - 500_000.0).abs() < 1e-6);
        assert!(!reg.is_supported(6677));
    }

    #[test]
    fn test_invalid_tables() {
        let missing_global = r#"
[[crs]]
epsg = 3857
name = "merc"
kind = "web_mercator"
radius = 6378137.0
domain = [-180.0, -85.0, 180.0, 85.0]
"#;
        assert!(CrsRegistry::from_toml_str(missing_global).is_err());

        let unknown_ellipsoid = r#"
[[crs]]
epsg = 4326
name = "WGS 84"
kind = "geographic"
domain = [-180.0, -90.0, 180.0, 90.0]

[[crs]]
epsg = 6677
name = "zone"
kind = "transverse_mercator"
ellipsoid = "Bessel"
lat_0 = 36.0
lon_0 = 139.8
k_0 = 0.9999
domain = [137.0, 30.0, 143.0, 42.0]
"#;
        assert!(CrsRegistry::from_toml_str(unknown_ellipsoid).is_err());

        let duplicate = r#"
[[crs]]
epsg = 4326
name = "a"
kind = "geographic"
domain = [-180.0, -90.0, 180.0, 90.0]

[[crs]]
epsg = 4326
name = "b"
kind = "geographic"
domain = [-180.0, -90.0, 180.0, 90.0]
"#;
        assert!(CrsRegistry::from_toml_str(duplicate).is_err());
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crs.toml");
        std::fs::write(&path, BUILTIN_TABLE).unwrap();
        let reg = CrsRegistry::from_path(&path).unwrap();
        assert!(reg.is_supported(6687));
        assert!(CrsRegistry::from_path(&dir.path().join("missing.toml")).is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip_within_domain(fx in 0.0f64..=1.0, fy in 0.0f64..=1.0) {
            let reg = registry();
            for def in reg.supported() {
                let d = def.domain;
                let lon = d.min_x + (d.max_x - d.min_x) * fx;
                let lat = d.min_y + (d.max_y - d.min_y) * fy;
                let (x, y) = def.to_native(lon, lat).unwrap();
                let (lon2, lat2) = def.to_global(x, y).unwrap();
                prop_assert!((lon - lon2).abs() < 1e-9, "EPSG:{} lon {} -> {}", def.epsg, lon, lon2);
                prop_assert!((lat - lat2).abs() < 1e-9, "EPSG:{} lat {} -> {}", def.epsg, lat, lat2);
            }
        }
    }
}
