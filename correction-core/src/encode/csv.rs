//! Encodage CSV (géométrie en WKT)
//!
//! Colonne `_wkt` en tête puis les clés de la première feature. Une feature
//! sans l'une de ces clés laisse la cellule vide; ses clés supplémentaires
//! sont ajoutées en fin de ligne, au-delà de l'en-tête.

use super::{ensure_not_empty, geometry_to_wkt, Encoder, ExportFormat};
use crate::error::EncodeError;
use crate::model::{CanonicalFeature, Layer};
use crate::schema::InferredSchema;

/// Nom de la colonne géométrie
pub const WKT_COLUMN: &str = "_wkt";

/// Encodeur CSV
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvEncoder;

impl Encoder for CsvEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn encode(
        &self,
        _layer: &Layer,
        features: &[CanonicalFeature],
        _schema: Option<&InferredSchema>,
    ) -> Result<Vec<u8>, EncodeError> {
        ensure_not_empty(features)?;

        let header: Vec<&str> = features[0].attributes.keys().map(String::as_str).collect();

        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::with_capacity(features.len() * 128));

        let mut record = Vec::with_capacity(header.len() + 1);
        record.push(WKT_COLUMN);
        record.extend(header.iter().copied());
        writer.write_record(&record)?;

        for feature in features {
            let geom = feature.decode_geometry()?;
            let mut row = Vec::with_capacity(header.len() + 1);
            row.push(geometry_to_wkt(&feature.id, &geom)?);
            for key in &header {
                row.push(
                    feature
                        .attributes
                        .get(*key)
                        .map(|v| v.to_text())
                        .unwrap_or_default(),
                );
            }
            // Clés absentes de l'en-tête
            for (key, value) in &feature.attributes {
                if !header.contains(&key.as_str()) {
                    row.push(value.to_text());
                }
            }
            writer.write_record(&row)?;
        }

        writer
            .into_inner()
            .map_err(|e| EncodeError::Io(e.into_error()))
    }
}
