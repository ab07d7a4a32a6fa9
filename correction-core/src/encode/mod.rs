//! Encodeurs de sortie (GeoJSON, CSV, GeoPackage, Shapefile, KML)
//!
//! Tous les formats consomment la même liste de features canoniques. Les
//! formats typés (GeoPackage, Shapefile, KML) reçoivent en plus le schéma
//! inféré et écrivent en WGS84 (EPSG:4326), sans reprojection.

pub mod csv;
pub mod geojson;
pub mod gpkg;
pub mod kml;
pub mod scratch;
pub mod shp;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use geo::{Geometry, Rect};
use geozero::wkt::WktWriter;
use geozero::GeozeroGeometry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EncodeError;
use crate::model::{CanonicalFeature, Layer};
use crate::schema::{coerce, FieldValue, InferredSchema};

pub use self::csv::CsvEncoder;
pub use self::geojson::GeoJsonEncoder;
pub use self::gpkg::GeoPackageEncoder;
pub use self::kml::KmlEncoder;
pub use self::scratch::ScratchDir;
pub use self::shp::ShapefileEncoder;

/// Code EPSG unique des sorties
pub const WGS84_EPSG: u32 = 4326;

/// Définition OGC WKT de EPSG:4326
pub(crate) const WGS84_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]"#;

/// Longueur maximale par défaut d'un nom de fichier suggéré
pub const DEFAULT_FILENAME_MAX: usize = 50;

/// Format de sortie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    GeoJson,
    Gpkg,
    Csv,
    Shp,
    Kml,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 5] = [
        ExportFormat::GeoJson,
        ExportFormat::Gpkg,
        ExportFormat::Csv,
        ExportFormat::Shp,
        ExportFormat::Kml,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeoJson => "geojson",
            Self::Gpkg => "gpkg",
            Self::Csv => "csv",
            Self::Shp => "shp",
            Self::Kml => "kml",
        }
    }

    /// Extension du fichier livré (archive incluse pour le Shapefile)
    pub fn extension(&self) -> &'static str {
        match self {
            Self::GeoJson => "geojson",
            Self::Gpkg => "gpkg",
            Self::Csv => "csv",
            Self::Shp => "shp.zip",
            Self::Kml => "kml",
        }
    }

    /// Type MIME de la charge utile livrée
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::GeoJson => "application/geo+json",
            Self::Gpkg => "application/geopackage+sqlite3",
            Self::Csv => "text/csv",
            Self::Shp => "application/zip",
            Self::Kml => "application/vnd.google-earth.kml+xml",
        }
    }

    /// Vrai si le format exige un schéma inféré
    pub fn needs_schema(&self) -> bool {
        matches!(self, Self::Gpkg | Self::Shp | Self::Kml)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "geojson" | "json" => Ok(Self::GeoJson),
            "gpkg" | "geopackage" => Ok(Self::Gpkg),
            "csv" => Ok(Self::Csv),
            "shp" | "shapefile" => Ok(Self::Shp),
            "kml" => Ok(Self::Kml),
            _ => Err(format!(
                "Invalid format: {}. Use: geojson, gpkg, csv, shp, kml",
                s
            )),
        }
    }
}

/// Options communes aux encodeurs
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Racine des répertoires temporaires (défaut: répertoire temporaire système)
    pub scratch_root: Option<PathBuf>,
    /// Longueur maximale du nom de fichier suggéré
    pub max_filename_len: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            scratch_root: None,
            max_filename_len: DEFAULT_FILENAME_MAX,
        }
    }
}

/// Contrat commun des encodeurs
pub trait Encoder: Send + Sync {
    /// Format produit
    fn format(&self) -> ExportFormat;

    /// Encode les features d'une couche
    fn encode(
        &self,
        layer: &Layer,
        features: &[CanonicalFeature],
        schema: Option<&InferredSchema>,
    ) -> Result<Vec<u8>, EncodeError>;
}

/// Instancie l'encodeur d'un format
pub fn encoder_for(format: ExportFormat, options: &EncodeOptions) -> Box<dyn Encoder> {
    match format {
        ExportFormat::GeoJson => Box::new(GeoJsonEncoder),
        ExportFormat::Csv => Box::new(CsvEncoder),
        ExportFormat::Gpkg => Box::new(GeoPackageEncoder::new(options.clone())),
        ExportFormat::Shp => Box::new(ShapefileEncoder::new(options.clone())),
        ExportFormat::Kml => Box::new(KmlEncoder::new(options.clone())),
    }
}

/// Charge utile encodée et ses métadonnées de livraison
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub payload: Vec<u8>,
    pub filename: String,
    pub media_type: &'static str,
    pub format: ExportFormat,
}

impl EncodedPayload {
    /// En-tête `Content-Disposition` correspondant
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }
}

/// Encode une couche et prépare nom de fichier et type MIME
pub fn encode_layer(
    format: ExportFormat,
    layer: &Layer,
    features: &[CanonicalFeature],
    schema: Option<&InferredSchema>,
    options: &EncodeOptions,
) -> Result<EncodedPayload, EncodeError> {
    let encoder = encoder_for(format, options);
    let payload = encoder.encode(layer, features, schema)?;

    debug!(
        layer = %layer.id,
        format = %format,
        features = features.len(),
        bytes = payload.len(),
        "Layer encoded"
    );

    Ok(EncodedPayload {
        payload,
        filename: format!(
            "{}.{}",
            safe_filename(&layer.name, options.max_filename_len),
            format.extension()
        ),
        media_type: format.media_type(),
        format,
    })
}

/// Nom de fichier sûr dérivé du nom d'affichage
///
/// Les suites de caractères hors `[A-Za-z0-9]` deviennent un `_` unique (le
/// nom reste ASCII pour l'en-tête HTTP), la longueur est plafonnée à `max_len`.
pub fn safe_filename(name: &str, max_len: usize) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new(r"[^A-Za-z0-9]+").expect("valid regex"));

    let collapsed = re.replace_all(name, "_");
    let trimmed = collapsed.trim_matches('_');
    let capped: String = trimmed.chars().take(max_len.max(1)).collect();
    let capped = capped.trim_end_matches('_');

    if capped.is_empty() {
        "export".to_string()
    } else {
        capped.to_string()
    }
}

/// Échoue sur une liste vide: un export vide n'est jamais un fichier valide
pub(crate) fn ensure_not_empty(features: &[CanonicalFeature]) -> Result<(), EncodeError> {
    if features.is_empty() {
        return Err(EncodeError::EmptyResult);
    }
    Ok(())
}

pub(crate) fn require_schema(
    format: ExportFormat,
    schema: Option<&InferredSchema>,
) -> Result<&InferredSchema, EncodeError> {
    schema.ok_or(EncodeError::MissingSchema(format))
}

/// Vérifie la compatibilité d'une géométrie avec le type du schéma
pub(crate) fn check_geometry(
    schema: &InferredSchema,
    feature_id: &str,
    geom: &Geometry,
) -> Result<(), EncodeError> {
    if schema.geometry.accepts(geom) {
        return Ok(());
    }
    Err(EncodeError::GeometryMismatch {
        feature_id: feature_id.to_string(),
        expected: schema.geometry.to_string(),
        found: crate::schema::SchemaGeometry::of(geom).to_string(),
    })
}

/// Géométrie en WKT (via geozero)
pub(crate) fn geometry_to_wkt(feature_id: &str, geom: &Geometry) -> Result<String, EncodeError> {
    let mut wkt_buf = Vec::new();
    {
        let mut writer = WktWriter::new(&mut wkt_buf);
        geom.process_geom(&mut writer)
            .map_err(|e| EncodeError::invalid_geometry(feature_id, e.to_string()))?;
    }
    Ok(String::from_utf8_lossy(&wkt_buf).into_owned())
}

/// Étend une emprise cumulée
pub(crate) fn extend_extent(acc: Option<Rect>, rect: Option<Rect>) -> Option<Rect> {
    match (acc, rect) {
        (Some(a), Some(b)) => Some(Rect::new(
            (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
            (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
        )),
        (a, b) => a.or(b),
    }
}

/// Valeurs d'une feature converties aux types du schéma, dans l'ordre des colonnes
pub(crate) struct TypedRows<'a> {
    schema: &'a InferredSchema,
    lossy: usize,
}

impl<'a> TypedRows<'a> {
    pub(crate) fn new(schema: &'a InferredSchema) -> Self {
        Self { schema, lossy: 0 }
    }

    pub(crate) fn row(&mut self, feature: &CanonicalFeature) -> Vec<FieldValue> {
        self.schema
            .fields
            .iter()
            .map(|field| match feature.attributes.get(&field.name) {
                Some(value) => {
                    let coerced = coerce(value, field.field_type);
                    if coerced == FieldValue::Null && !value.is_null() {
                        self.lossy += 1;
                    }
                    coerced
                }
                None => FieldValue::Null,
            })
            .collect()
    }

    /// Journalise les valeurs perdues à la conversion
    pub(crate) fn finish(self, layer: &Layer, format: ExportFormat) {
        if self.lossy > 0 {
            warn!(
                layer = %layer.id,
                format = %format,
                values = self.lossy,
                "Values could not be coerced to their column type and were written as null"
            );
        }
    }
}
