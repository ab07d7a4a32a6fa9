//! Superposition d'une correction sur une feature de base
//!
//! La fusion est une union de clés superficielle: chaque clé du patch remplace
//! la valeur de base, les autres clés passent telles quelles. Les objets et
//! tableaux imbriqués sont remplacés en bloc. La géométrie corrigée remplace
//! entièrement la géométrie de base.

use chrono::{DateTime, SecondsFormat, Utc};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::model::{
    BaseFeature, CanonicalFeature, CorrectionRecord, Layer, KEY_CORRECTED_AT, KEY_ID,
    KEY_SOURCE_FILE, KEY_STATUS, KEY_VALIDATED_AT,
};
use crate::value::AttrValue;

/// Fusionne une feature de base avec (au plus) une correction
pub fn merge(
    _layer: &Layer,
    base: &BaseFeature,
    correction: Option<&CorrectionRecord>,
) -> CanonicalFeature {
    let mut attributes = base.attributes.clone();
    let mut geometry = &base.geometry;

    if let Some(correction) = correction {
        debug_assert_eq!(correction.feature_id, base.id);
        for (key, value) in &correction.patch {
            attributes.insert(key.clone(), value.clone());
        }
        if let Some(corrected) = &correction.geometry {
            geometry = corrected;
        }
    }

    // Les clés réservées écrasent toujours un attribut homonyme
    attributes.insert(KEY_ID.to_string(), AttrValue::String(base.id.clone()));
    attributes.insert(
        KEY_STATUS.to_string(),
        AttrValue::String(base.status.as_str().to_string()),
    );
    attributes.insert(
        KEY_SOURCE_FILE.to_string(),
        AttrValue::from(base.source_file.clone()),
    );
    attributes.insert(
        KEY_CORRECTED_AT.to_string(),
        AttrValue::from(base.corrected_at.as_ref().map(iso_timestamp)),
    );
    attributes.insert(
        KEY_VALIDATED_AT.to_string(),
        AttrValue::from(base.validated_at.as_ref().map(iso_timestamp)),
    );

    CanonicalFeature {
        id: base.id.clone(),
        status: base.status,
        attributes,
        geometry: geometry.clone(),
        corrected: correction.is_some(),
    }
}

/// Fusionne toutes les lignes d'une couche, en conservant leur ordre
pub fn merge_all(
    layer: &Layer,
    rows: &[(BaseFeature, Option<CorrectionRecord>)],
) -> Vec<CanonicalFeature> {
    let collisions = layer.reserved_collisions();
    if !collisions.is_empty() {
        warn!(
            layer = %layer.id,
            fields = ?collisions,
            "Layer declares fields named like reserved keys; reserved values take precedence"
        );
    }

    let features: Vec<CanonicalFeature> = rows
        .par_iter()
        .map(|(base, correction)| merge(layer, base, correction.as_ref()))
        .collect();

    debug!(
        layer = %layer.id,
        features = features.len(),
        corrected = features.iter().filter(|f| f.corrected).count(),
        "Merged corrections"
    );

    features
}

/// Sélectionne la correction faisant autorité: la plus récente.
///
/// À date de création égale, l'identifiant le plus grand l'emporte afin que
/// le choix ne dépende pas de l'ordre d'entrée.
pub fn latest_correction<'a, I>(corrections: I) -> Option<&'a CorrectionRecord>
where
    I: IntoIterator<Item = &'a CorrectionRecord>,
{
    corrections
        .into_iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

/// Horodatage ISO-8601 (UTC), microsecondes omises lorsqu'elles sont nulles
pub fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    let precision = if ts.timestamp_subsec_micros() == 0 {
        SecondsFormat::Secs
    } else {
        SecondsFormat::Micros
    };
    ts.to_rfc3339_opts(precision, false)
}
