//! Conversion des soumissions KoboToolbox en corrections
//!
//! Le point d'entrée webhook vit hors de ce crate; seule la traduction d'une
//! soumission vers un `CorrectionRecord` est définie ici, pour que le format
//! observé par l'export soit testé au même endroit que la fusion.

use chrono::{DateTime, Utc};
use geo::{Geometry, Point};
use serde_json::{Map, Value};

use crate::error::SubmissionError;
use crate::model::{CorrectionRecord, Layer, RawGeometry};
use crate::value::{AttrValue, Attributes};

/// Champs de soumission reliant une correction à sa feature
const FEATURE_LINK_FIELDS: [&str; 2] = ["feature_id", "id_feature"];

/// Soumission terrain reçue
#[derive(Debug, Clone)]
pub struct Submission {
    /// Identifiant du formulaire (`_xform_id_string`)
    pub form_id: String,
    /// Identifiant de la soumission (`_id`)
    pub submission_id: String,
    /// Charge utile complète
    pub payload: Map<String, Value>,
}

impl Submission {
    /// Extrait les identifiants obligatoires d'une charge utile
    pub fn from_payload(payload: Map<String, Value>) -> Result<Self, SubmissionError> {
        let form_id = payload
            .get("_xform_id_string")
            .and_then(scalar_to_string)
            .ok_or(SubmissionError::MissingField("_xform_id_string"))?;
        let submission_id = payload
            .get("_id")
            .and_then(scalar_to_string)
            .ok_or(SubmissionError::MissingField("_id"))?;

        Ok(Self {
            form_id,
            submission_id,
            payload,
        })
    }

    /// Identifiant de la feature corrigée
    pub fn feature_id(&self) -> Option<String> {
        FEATURE_LINK_FIELDS
            .iter()
            .find_map(|field| self.payload.get(*field).and_then(scalar_to_string))
    }

    /// Patch construit depuis le schéma de la couche, via l'alias Kobo de chaque champ
    pub fn patch_for(&self, layer: &Layer) -> Attributes {
        layer
            .fields
            .iter()
            .filter_map(|field| {
                self.payload
                    .get(field.kobo_name())
                    .map(|value| (field.name.clone(), AttrValue::from(value.clone())))
            })
            .collect()
    }

    /// Point GPS `_geolocation` ([lat, lon]) converti en POINT(lon lat)
    pub fn geolocation(&self) -> Result<Option<Geometry>, SubmissionError> {
        let Some(Value::Array(coords)) = self.payload.get("_geolocation") else {
            return Ok(None);
        };
        let (Some(lat), Some(lon)) = (coords.first(), coords.get(1)) else {
            return Ok(None);
        };
        if lat.is_null() || lon.is_null() {
            return Ok(None);
        }

        let lat = as_coordinate(lat)?;
        let lon = as_coordinate(lon)?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(SubmissionError::InvalidGeolocation(format!(
                "[{}, {}] out of WGS84 bounds",
                lat, lon
            )));
        }

        Ok(Some(Geometry::Point(Point::new(lon, lat))))
    }
}

/// Traduit une soumission en correction pour la couche donnée
pub fn submission_to_correction(
    layer: &Layer,
    submission: &Submission,
    received_at: DateTime<Utc>,
) -> Result<CorrectionRecord, SubmissionError> {
    let feature_id = submission
        .feature_id()
        .ok_or(SubmissionError::MissingFeatureLink)?;

    let geometry = submission
        .geolocation()?
        .map(|geom| RawGeometry::from_geometry(&geom))
        .transpose()
        .map_err(SubmissionError::InvalidGeolocation)?;

    Ok(CorrectionRecord {
        id: format!("{}:{}", submission.form_id, submission.submission_id),
        feature_id,
        patch: submission.patch_for(layer),
        geometry,
        created_at: received_at,
        submission_id: Some(submission.submission_id.clone()),
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_coordinate(value: &Value) -> Result<f64, SubmissionError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| SubmissionError::InvalidGeolocation(format!("not a number: {}", value)))
}
