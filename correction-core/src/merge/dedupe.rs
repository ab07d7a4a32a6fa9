//! Déduplication des corrections re-soumises
//!
//! Une même soumission terrain peut être livrée plusieurs fois (webhook
//! rejoué). On ne garde que le premier enregistrement de chaque soumission.
//! Sans identifiant de soumission, seule une répétition de la dernière
//! correction de la feature est écartée: un retour à une valeur antérieure
//! (A → B → A) reste une correction à part entière.

use std::collections::{HashMap, HashSet};

use blake3::Hasher;

use crate::merge::overlay::latest_correction;
use crate::model::CorrectionRecord;

/// Calcule une empreinte stable du contenu d'une correction
///
/// Couvre la feature visée, le patch (JSON canonique, clés triées) et la
/// géométrie WKB. La date de création n'en fait pas partie.
pub fn correction_fingerprint(correction: &CorrectionRecord) -> [u8; 32] {
    let mut hasher = Hasher::new();

    hasher.update(b"FEATURE");
    hasher.update(correction.feature_id.as_bytes());

    hasher.update(b"PATCH");
    for (key, value) in &correction.patch {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_json().to_string().as_bytes());
        hasher.update(b";");
    }

    match &correction.geometry {
        Some(geom) => {
            hasher.update(b"GEOM");
            hasher.update(geom.as_bytes());
        }
        None => {
            hasher.update(b"NOGEOM");
        }
    }

    *hasher.finalize().as_bytes()
}

/// Empreinte en hexadécimal, pour les logs
pub fn fingerprint_hex(correction: &CorrectionRecord) -> String {
    hex::encode(correction_fingerprint(correction))
}

/// Supprime les doublons en conservant la première occurrence.
///
/// Les corrections sont d'abord triées par date de création puis par
/// identifiant, de sorte que "première" signifie "la plus ancienne livraison".
pub fn dedupe_corrections(mut corrections: Vec<CorrectionRecord>) -> Vec<CorrectionRecord> {
    corrections.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut seen_submissions: HashSet<(String, String)> = HashSet::new();
    // empreinte de la dernière correction retenue, par feature
    let mut latest: HashMap<String, [u8; 32]> = HashMap::new();

    corrections
        .into_iter()
        .filter(|c| {
            let fingerprint = correction_fingerprint(c);
            let keep = match &c.submission_id {
                Some(submission) => {
                    seen_submissions.insert((c.feature_id.clone(), submission.clone()))
                }
                None => latest.get(&c.feature_id) != Some(&fingerprint),
            };
            if keep {
                latest.insert(c.feature_id.clone(), fingerprint);
            }
            keep
        })
        .collect()
}

/// Vrai si `candidate` duplique une correction déjà présente
///
/// Sans identifiant de soumission, `candidate` n'est un doublon que s'il
/// reprend à l'identique la dernière correction de sa feature.
pub fn is_duplicate(existing: &[CorrectionRecord], candidate: &CorrectionRecord) -> bool {
    match &candidate.submission_id {
        Some(submission) => existing.iter().any(|c| {
            c.feature_id == candidate.feature_id && c.submission_id.as_deref() == Some(submission)
        }),
        None => latest_correction(
            existing
                .iter()
                .filter(|c| c.feature_id == candidate.feature_id),
        )
        .is_some_and(|latest| correction_fingerprint(latest) == correction_fingerprint(candidate)),
    }
}
