//! Dépôt PostgreSQL/PostGIS
//!
//! Tables lues: `projects`, `layers`, `features`, `corrections` (schéma
//! `public`). La dernière correction de chaque feature est choisie en SQL
//! (`created_at DESC, id DESC`), les géométries sont lues en WKB.

use chrono::{DateTime, Utc};
use correction_core::value::attributes_from_json;
use correction_core::{BaseFeature, CorrectionRecord, FeatureStatus, FieldDef, Layer, RawGeometry};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::{debug, info};

use super::{FeatureRepository, LayerQuery, LayerRows, LayerSummary, RepositoryError};

const LAYER_SQL: &str = "
    SELECT l.id::text AS id, l.name, l.geometry_type, l.fields
    FROM public.layers l
    JOIN public.projects p ON p.id = l.project_id
    WHERE l.id::text = $1 AND p.slug = $2";

const FEATURES_SQL: &str = "
    SELECT
        f.id::text AS id,
        f.status::text AS status,
        f.props,
        ST_AsBinary(f.geom) AS geom_wkb,
        f.source_file,
        f.corrected_at,
        f.validated_at,
        f.created_at,
        f.updated_at
    FROM public.features f
    WHERE f.layer_id::text = $1
      AND ($2::text IS NULL OR f.status::text = $2)
    ORDER BY f.created_at, f.id";

const FEATURES_WITH_CORRECTIONS_SQL: &str = "
    SELECT
        f.id::text AS id,
        f.status::text AS status,
        f.props,
        ST_AsBinary(f.geom) AS geom_wkb,
        f.source_file,
        f.corrected_at,
        f.validated_at,
        f.created_at,
        f.updated_at,
        c.id::text AS correction_id,
        c.props_patch,
        ST_AsBinary(c.geom_corrected) AS correction_wkb,
        c.created_at AS correction_created_at,
        c.kobo_submission_id::text AS submission_id
    FROM public.features f
    LEFT JOIN LATERAL (
        SELECT id, props_patch, geom_corrected, created_at, kobo_submission_id
        FROM public.corrections
        WHERE feature_id = f.id
        ORDER BY created_at DESC, id DESC
        LIMIT 1
    ) c ON TRUE
    WHERE f.layer_id::text = $1
      AND ($2::text IS NULL OR f.status::text = $2)
    ORDER BY f.created_at, f.id";

const COUNT_SQL: &str = "
    SELECT count(*) FROM public.features f
    WHERE f.layer_id::text = $1
      AND ($2::text IS NULL OR f.status::text = $2)";

const LIST_LAYERS_SQL: &str = "
    SELECT
        l.id::text AS id,
        l.name,
        l.geometry_type,
        COALESCE(l.is_reference, false) AS is_reference,
        COALESCE(l.display_order, 0) AS display_order,
        l.group_name,
        (SELECT count(*) FROM public.features WHERE layer_id = l.id) AS feature_count
    FROM public.layers l
    JOIN public.projects p ON p.id = l.project_id
    WHERE p.slug = $1
    ORDER BY l.display_order";

/// Dépôt adossé à un pool deadpool-postgres
#[derive(Clone)]
pub struct PgRepository {
    pool: Pool,
}

impl PgRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn load_layer(&self, query: &LayerQuery) -> Result<Layer, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(LAYER_SQL, &[&query.layer_id, &query.project_slug])
            .await?
            .ok_or_else(|| RepositoryError::layer_not_found(&query.project_slug, &query.layer_id))?;
        row_to_layer(&row)
    }
}

impl FeatureRepository for PgRepository {
    async fn fetch_layer(&self, query: &LayerQuery) -> Result<LayerRows, RepositoryError> {
        let layer = self.load_layer(query).await?;
        let status = query.status.status().map(|s| s.as_str());

        let sql = if query.use_corrected {
            FEATURES_WITH_CORRECTIONS_SQL
        } else {
            FEATURES_SQL
        };

        let client = self.pool.get().await?;
        let result = client.query(sql, &[&query.layer_id, &status]).await?;

        let mut rows = Vec::with_capacity(result.len());
        for row in &result {
            let base = row_to_feature(row)?;
            let correction = if query.use_corrected {
                row_to_correction(row, &base.id)?
            } else {
                None
            };
            rows.push((base, correction));
        }

        info!(
            project = %query.project_slug,
            layer = %layer.id,
            status = %query.status,
            rows = rows.len(),
            corrected = rows.iter().filter(|(_, c)| c.is_some()).count(),
            "Fetched layer features"
        );
        Ok(LayerRows { layer, rows })
    }

    async fn count_features(&self, query: &LayerQuery) -> Result<usize, RepositoryError> {
        self.load_layer(query).await?;
        let status = query.status.status().map(|s| s.as_str());

        let client = self.pool.get().await?;
        let row = client
            .query_one(COUNT_SQL, &[&query.layer_id, &status])
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as usize)
    }

    async fn list_layers(&self, project_slug: &str) -> Result<Vec<LayerSummary>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client.query(LIST_LAYERS_SQL, &[&project_slug]).await?;

        let layers = rows
            .iter()
            .map(|row| {
                Ok(LayerSummary {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    geometry_type: row.try_get("geometry_type")?,
                    is_reference: row.try_get("is_reference")?,
                    display_order: row.try_get("display_order")?,
                    group_name: row.try_get("group_name")?,
                    feature_count: row.try_get("feature_count")?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        debug!(project = project_slug, layers = layers.len(), "Listed layers");
        Ok(layers)
    }
}

fn row_to_layer(row: &Row) -> Result<Layer, RepositoryError> {
    let id: String = row.try_get("id")?;
    let fields: Option<serde_json::Value> = row.try_get("fields")?;

    let fields = match fields {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value::<Vec<FieldDef>>(value)
            .map_err(|e| RepositoryError::decode("layer", &id, format!("fields: {}", e)))?,
    };

    Ok(Layer {
        id,
        name: row.try_get("name")?,
        geometry_type: row.try_get("geometry_type")?,
        fields,
    })
}

fn row_to_feature(row: &Row) -> Result<BaseFeature, RepositoryError> {
    let id: String = row.try_get("id")?;

    let status: String = row.try_get("status")?;
    let status: FeatureStatus = status
        .parse()
        .map_err(|e: String| RepositoryError::decode("feature", &id, e))?;

    let wkb: Option<Vec<u8>> = row.try_get("geom_wkb")?;
    let wkb = wkb.ok_or_else(|| RepositoryError::decode("feature", &id, "missing geometry"))?;

    let props: Option<serde_json::Value> = row.try_get("props")?;

    Ok(BaseFeature {
        attributes: attributes_from_json(props.unwrap_or(serde_json::Value::Null)),
        geometry: RawGeometry(wkb),
        source_file: row.try_get("source_file")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        corrected_at: row.try_get("corrected_at")?,
        validated_at: row.try_get("validated_at")?,
        status,
        id,
    })
}

fn row_to_correction(
    row: &Row,
    feature_id: &str,
) -> Result<Option<CorrectionRecord>, RepositoryError> {
    let Some(id) = row.try_get::<_, Option<String>>("correction_id")? else {
        return Ok(None);
    };

    let patch: Option<serde_json::Value> = row.try_get("props_patch")?;
    let wkb: Option<Vec<u8>> = row.try_get("correction_wkb")?;
    let created_at: DateTime<Utc> = row.try_get("correction_created_at")?;

    Ok(Some(CorrectionRecord {
        id,
        feature_id: feature_id.to_string(),
        patch: attributes_from_json(patch.unwrap_or(serde_json::Value::Null)),
        geometry: wkb.map(RawGeometry),
        created_at,
        submission_id: row.try_get("submission_id")?,
    }))
}
