//! # correction-core
//!
//! Fusion des corrections terrain sur les features d'une couche et export
//! multi-format (GeoJSON, CSV, GeoPackage, Shapefile, KML).
//!
//! ## Features
//!
//! - Fusion pure et déterministe: union de clés superficielle, géométrie
//!   remplacée en bloc, clés de provenance réservées (`_id`, `_status`, ...)
//! - Inférence de schéma pour les formats typés
//! - Encodeurs derrière un trait commun, sélectionnés par `ExportFormat`
//! - Types `geo` pour l'interopérabilité avec l'écosystème Rust géospatial
//!
//! ## Usage
//!
//! ```rust,ignore
//! use correction_core::{encode_layer, infer_from_features, merge_all, EncodeOptions, ExportFormat};
//!
//! let features = merge_all(&layer, &rows);
//! let schema = infer_from_features(&layer, &features);
//! let out = encode_layer(ExportFormat::Gpkg, &layer, &features, Some(&schema), &EncodeOptions::default())?;
//! std::fs::write(&out.filename, &out.payload)?;
//! ```

pub mod encode;
pub mod error;
pub mod ingest;
pub mod merge;
pub mod model;
pub mod schema;
pub mod value;

pub use encode::{
    encode_layer, encoder_for, safe_filename, EncodeOptions, EncodedPayload, Encoder,
    ExportFormat,
};
pub use error::{EncodeError, SubmissionError};
pub use ingest::{submission_to_correction, Submission};
pub use merge::{dedupe_corrections, is_duplicate, latest_correction, merge, merge_all};
pub use model::{
    BaseFeature, CanonicalFeature, CorrectionRecord, FeatureStatus, FieldDef, Layer,
    RawGeometry, StatusFilter, RESERVED_KEYS,
};
pub use schema::{infer, infer_from_features, InferredSchema, SchemaGeometry};
pub use value::{AttrValue, Attributes};
