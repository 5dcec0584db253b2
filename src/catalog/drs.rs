//! DRS entities: objects, access methods, contents links, and cohorts.

use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::{CatalogStore, MAX_TRIES};

/// A content-addressed checksum entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checksum {
    #[serde(rename = "type")]
    pub checksum_type: String,
    pub checksum: String,
}

/// Resolved URL (plus headers) of an access method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccessUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
}

/// How the bytes of a DRS object can be retrieved.
///
/// Exactly one of `access_id` (indirect, resolved through the access-url
/// endpoint) or `access_url` (direct) is populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccessMethod {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_url: Option<AccessUrl>,
}

/// A link from a bundling DRS object to a member object, resolved by `name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContentsObject {
    pub name: String,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub contents_id: Option<String>,
    #[serde(default)]
    pub drs_uri: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<String>,
}

/// A DRS object as exchanged on the wire and stored in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DrsObject {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_uri: Option<String>,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub checksums: Vec<Checksum>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<ContentsObject>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_methods: Option<Vec<AccessMethod>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort: Option<String>,
    /// Input-only: presence marks the object as a variant-bearing
    /// GenomicDrsObject and creates its variantfile row.  On output, echoed
    /// from the variantfile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_genome: Option<String>,
    /// Output-only: indexing state of the associated variantfile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed: Option<i64>,
}

impl DrsObject {
    /// Whether this object is a sample bundle.
    pub fn is_sample(&self) -> bool {
        self.description == "sample"
    }
}

/// A cohort: a grouping of DRS objects under one authorization scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Cohort {
    pub id: String,
    #[serde(default)]
    pub drsobjects: Vec<String>,
}

impl CatalogStore {
    /// Fetch a DRS object, retrying on transient store errors.
    pub async fn get_drs_object(&self, id: &str) -> Result<Option<DrsObject>, anyhow::Error> {
        let mut tries = 0;
        loop {
            tries += 1;
            match self.try_get_drs_object(id).await {
                Ok(result) => return Ok(result),
                Err(e) if tries < MAX_TRIES => {
                    tracing::info!("exception in get_drs_object {}: {}, trying again", id, e);
                    Self::backoff().await;
                }
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "exception in get_drs_object {}, too many tries: {}",
                        id,
                        e
                    ))
                }
            }
        }
    }

    async fn try_get_drs_object(&self, id: &str) -> Result<Option<DrsObject>, anyhow::Error> {
        let row = sqlx::query("SELECT * FROM drs_object WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(self.assemble_drs_object(&row).await?))
    }

    /// List DRS objects, optionally restricted to one cohort.
    pub async fn list_drs_objects(
        &self,
        cohort_id: Option<&str>,
    ) -> Result<Vec<DrsObject>, anyhow::Error> {
        let rows = if let Some(cohort_id) = cohort_id {
            sqlx::query("SELECT * FROM drs_object WHERE cohort_id = ?1 ORDER BY id")
                .bind(cohort_id)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM drs_object ORDER BY id")
                .fetch_all(&self.pool)
                .await?
        };
        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            result.push(self.assemble_drs_object(row).await?);
        }
        Ok(result)
    }

    /// Materialize a DRS object row along with its children.
    async fn assemble_drs_object(
        &self,
        row: &sqlx::sqlite::SqliteRow,
    ) -> Result<DrsObject, anyhow::Error> {
        let id: String = row.try_get("id")?;
        let checksums: String = row.try_get("checksums")?;
        let aliases: String = row.try_get("aliases")?;

        let mut obj = DrsObject {
            id: id.clone(),
            name: Some(row.try_get("name")?),
            self_uri: Some(row.try_get("self_uri")?),
            size: row.try_get("size")?,
            created_time: Some(row.try_get("created_time")?),
            updated_time: Some(row.try_get("updated_time")?),
            version: Some(row.try_get("version")?),
            mime_type: Some(row.try_get("mime_type")?),
            description: row.try_get("description")?,
            checksums: serde_json::from_str(&checksums).unwrap_or_default(),
            aliases: serde_json::from_str(&aliases).unwrap_or_default(),
            cohort: row.try_get("cohort_id")?,
            ..Default::default()
        };

        let method_rows =
            sqlx::query("SELECT * FROM access_method WHERE drs_object_id = ?1 ORDER BY id")
                .bind(&id)
                .fetch_all(&self.pool)
                .await?;
        if !method_rows.is_empty() {
            let mut methods = Vec::with_capacity(method_rows.len());
            for row in &method_rows {
                let access_id: String = row.try_get("access_id")?;
                let region: String = row.try_get("region")?;
                let url: String = row.try_get("url")?;
                let headers: String = row.try_get("headers")?;
                methods.push(AccessMethod {
                    kind: row.try_get("type")?,
                    region: (!region.is_empty()).then_some(region),
                    access_id: (!access_id.is_empty()).then_some(access_id),
                    access_url: (!url.is_empty()).then_some(AccessUrl {
                        url,
                        headers: serde_json::from_str(&headers).unwrap_or_default(),
                    }),
                });
            }
            obj.access_methods = Some(methods);
        }

        let contents_rows =
            sqlx::query("SELECT * FROM content_object WHERE drs_object_id = ?1 ORDER BY id")
                .bind(&id)
                .fetch_all(&self.pool)
                .await?;
        if !contents_rows.is_empty() {
            let mut contents = Vec::with_capacity(contents_rows.len());
            for row in &contents_rows {
                let contents_id: String = row.try_get("contents_id")?;
                let drs_uri: String = row.try_get("drs_uri")?;
                let nested: String = row.try_get("contents")?;
                contents.push(ContentsObject {
                    name: row.try_get("name")?,
                    contents_id: (!contents_id.is_empty()).then_some(contents_id),
                    drs_uri: serde_json::from_str(&drs_uri).unwrap_or_default(),
                    contents: serde_json::from_str(&nested).unwrap_or_default(),
                });
            }
            obj.contents = Some(contents);
        }

        let variantfile =
            sqlx::query("SELECT indexed, reference_genome FROM variantfile WHERE id = ?1")
                .bind(&id)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(row) = variantfile {
            obj.indexed = Some(row.try_get("indexed")?);
            obj.reference_genome = Some(row.try_get("reference_genome")?);
        }

        Ok(obj)
    }

    /// The `drs://` URI assigned to an object with the given name.
    pub fn self_uri_for(&self, name: &str) -> String {
        let base = self
            .htsget_url
            .replace("http://", "drs://")
            .replace("https://", "drs://");
        format!("{}/{}", base, name)
    }

    /// Idempotent create-or-update of a DRS object, retrying on conflict.
    ///
    /// Replaces all child access methods and contents objects, auto-creates
    /// the referenced cohort, and (re)assigns `self_uri`.  When the input
    /// carries `reference_genome`, the variantfile row is created as well.
    pub async fn create_drs_object(&self, obj: &DrsObject) -> Result<DrsObject, anyhow::Error> {
        let mut tries = 0;
        loop {
            tries += 1;
            match self.try_create_drs_object(obj).await {
                Ok(result) => return Ok(result),
                Err(e) if tries < MAX_TRIES => {
                    tracing::info!(
                        "exception in create_drs_object {}: {}, trying again",
                        obj.id,
                        e
                    );
                    Self::backoff().await;
                }
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "exception in create_drs_object {}, too many tries: {}",
                        obj.id,
                        e
                    ))
                }
            }
        }
    }

    async fn try_create_drs_object(&self, obj: &DrsObject) -> Result<DrsObject, anyhow::Error> {
        let name = obj.name.clone().unwrap_or_else(|| obj.id.clone());
        let self_uri = self.self_uri_for(&name);
        let now = chrono::Utc::now().to_rfc3339();

        if let Some(cohort) = &obj.cohort {
            sqlx::query("INSERT OR IGNORE INTO cohort (id) VALUES (?1)")
                .bind(cohort)
                .execute(&self.pool)
                .await?;
        }

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT id FROM drs_object WHERE id = ?1")
            .bind(&obj.id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            sqlx::query(
                "UPDATE drs_object SET name = ?2, self_uri = ?3, size = ?4, \
                 created_time = COALESCE(?5, created_time), \
                 updated_time = COALESCE(?6, updated_time), \
                 version = COALESCE(?7, version), \
                 mime_type = COALESCE(?8, mime_type), \
                 description = ?9, checksums = ?10, aliases = ?11, \
                 cohort_id = COALESCE(?12, cohort_id) \
                 WHERE id = ?1",
            )
            .bind(&obj.id)
            .bind(&name)
            .bind(&self_uri)
            .bind(obj.size)
            .bind(&obj.created_time)
            .bind(&obj.updated_time)
            .bind(&obj.version)
            .bind(&obj.mime_type)
            .bind(&obj.description)
            .bind(serde_json::to_string(&obj.checksums)?)
            .bind(serde_json::to_string(&obj.aliases)?)
            .bind(&obj.cohort)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO drs_object (id, name, self_uri, size, created_time, updated_time, \
                 version, mime_type, description, checksums, aliases, cohort_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )
            .bind(&obj.id)
            .bind(&name)
            .bind(&self_uri)
            .bind(obj.size)
            .bind(obj.created_time.as_deref().unwrap_or(&now))
            .bind(obj.updated_time.as_deref().unwrap_or(&now))
            .bind(obj.version.as_deref().unwrap_or(""))
            .bind(
                obj.mime_type
                    .as_deref()
                    .unwrap_or("application/octet-stream"),
            )
            .bind(&obj.description)
            .bind(serde_json::to_string(&obj.checksums)?)
            .bind(serde_json::to_string(&obj.aliases)?)
            .bind(&obj.cohort)
            .execute(&mut *tx)
            .await?;
        }

        // Children are replaced wholesale on every upsert.
        sqlx::query("DELETE FROM access_method WHERE drs_object_id = ?1")
            .bind(&obj.id)
            .execute(&mut *tx)
            .await?;
        for method in obj.access_methods.iter().flatten() {
            let (url, headers) = match &method.access_url {
                Some(access_url) => (
                    access_url.url.clone(),
                    serde_json::to_string(&access_url.headers)?,
                ),
                None => (String::new(), "[]".to_string()),
            };
            sqlx::query(
                "INSERT INTO access_method (drs_object_id, type, access_id, region, url, headers) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&obj.id)
            .bind(&method.kind)
            .bind(method.access_id.as_deref().unwrap_or(""))
            .bind(method.region.as_deref().unwrap_or(""))
            .bind(&url)
            .bind(&headers)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM content_object WHERE drs_object_id = ?1")
            .bind(&obj.id)
            .execute(&mut *tx)
            .await?;
        for contents in obj.contents.iter().flatten() {
            sqlx::query(
                "INSERT INTO content_object (drs_object_id, name, contents_id, drs_uri, contents) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&obj.id)
            .bind(&contents.name)
            .bind(contents.contents_id.as_deref().unwrap_or(""))
            .bind(serde_json::to_string(&contents.drs_uri)?)
            .bind(serde_json::to_string(&contents.contents)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        // A reference genome marks this as variant-bearing: ensure the
        // variantfile row exists.
        if let Some(reference_genome) = &obj.reference_genome {
            self.create_variantfile(&obj.id, reference_genome).await?;
        }

        self.try_get_drs_object(&obj.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("object {} vanished after upsert", obj.id))
    }

    /// Persist the size and checksums computed by the indexing worker.
    pub async fn update_drs_object_stats(
        &self,
        id: &str,
        size: i64,
        checksums: &[Checksum],
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            "UPDATE drs_object SET size = ?2, checksums = ?3, updated_time = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(size)
        .bind(serde_json::to_string(checksums)?)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a DRS object; children cascade at schema level.
    pub async fn delete_drs_object(&self, id: &str) -> Result<Option<DrsObject>, anyhow::Error> {
        let Some(obj) = self.try_get_drs_object(id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM drs_object WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(Some(obj))
    }

    /// Fetch a cohort with the `drs://` URIs of its members.
    pub async fn get_cohort(&self, cohort_id: &str) -> Result<Option<Cohort>, anyhow::Error> {
        let row = sqlx::query("SELECT id FROM cohort WHERE id = ?1")
            .bind(cohort_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id")?;
        let members =
            sqlx::query("SELECT self_uri FROM drs_object WHERE cohort_id = ?1 ORDER BY id")
                .bind(&id)
                .fetch_all(&self.pool)
                .await?;
        let drsobjects = members
            .iter()
            .map(|row| row.try_get("self_uri"))
            .collect::<Result<Vec<String>, _>>()?;
        Ok(Some(Cohort { id, drsobjects }))
    }

    /// List all cohort ids.
    pub async fn list_cohorts(&self) -> Result<Vec<String>, anyhow::Error> {
        let rows = sqlx::query("SELECT id FROM cohort ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("id").map_err(Into::into))
            .collect()
    }

    /// Create a cohort, attaching any listed member objects by `drs://` URI.
    pub async fn create_cohort(&self, cohort: &Cohort) -> Result<Cohort, anyhow::Error> {
        sqlx::query("INSERT OR IGNORE INTO cohort (id) VALUES (?1)")
            .bind(&cohort.id)
            .execute(&self.pool)
            .await?;
        for drs_uri in &cohort.drsobjects {
            sqlx::query("UPDATE drs_object SET cohort_id = ?1 WHERE self_uri = ?2")
                .bind(&cohort.id)
                .bind(drs_uri)
                .execute(&self.pool)
                .await?;
        }
        self.get_cohort(&cohort.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("cohort {} vanished after create", cohort.id))
    }

    /// Delete a cohort and, via cascade, all of its DRS objects.
    pub async fn delete_cohort(&self, cohort_id: &str) -> Result<Option<Cohort>, anyhow::Error> {
        let Some(cohort) = self.get_cohort(cohort_id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM drs_object WHERE cohort_id = ?1")
            .bind(cohort_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM cohort WHERE id = ?1")
            .bind(cohort_id)
            .execute(&self.pool)
            .await?;
        Ok(Some(cohort))
    }
}

#[cfg(test)]
pub(crate) mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::test_store;

    pub(crate) fn genomic_object(id: &str, cohort: &str) -> DrsObject {
        DrsObject {
            id: id.to_string(),
            description: "wgs".to_string(),
            cohort: Some(cohort.to_string()),
            reference_genome: Some("hg38".to_string()),
            contents: Some(vec![
                ContentsObject {
                    name: format!("{}.vcf.gz", id),
                    contents_id: Some("variant".to_string()),
                    drs_uri: vec![format!("drs://localhost/{}.vcf.gz", id)],
                    ..Default::default()
                },
                ContentsObject {
                    name: format!("{}.vcf.gz.tbi", id),
                    contents_id: Some("index".to_string()),
                    drs_uri: vec![format!("drs://localhost/{}.vcf.gz.tbi", id)],
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_get_roundtrip() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        let obj = DrsObject {
            id: "NA18537.vcf.gz".to_string(),
            description: "variant".to_string(),
            cohort: Some("test-htsget".to_string()),
            access_methods: Some(vec![AccessMethod {
                kind: "file".to_string(),
                access_url: Some(AccessUrl {
                    url: "file:///data/files/NA18537.vcf.gz".to_string(),
                    headers: vec![],
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let created = store.create_drs_object(&obj).await?;
        assert_eq!(
            created.self_uri.as_deref(),
            Some("drs://localhost:3000/NA18537.vcf.gz")
        );
        assert_eq!(created.cohort.as_deref(), Some("test-htsget"));

        let fetched = store.get_drs_object("NA18537.vcf.gz").await?.unwrap();
        assert_eq!(created, fetched);
        // The cohort was auto-created.
        assert_eq!(store.list_cohorts().await?, vec!["test-htsget".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn upsert_is_idempotent() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        let obj = genomic_object("NA18537", "test-htsget");

        let first = store.create_drs_object(&obj).await?;
        let second = store.create_drs_object(&obj).await?;
        assert_eq!(first.contents, second.contents);
        assert_eq!(second.contents.as_ref().map(Vec::len), Some(2));
        assert_eq!(second.indexed, Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn delete_cascades() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        store
            .create_drs_object(&genomic_object("NA18537", "test-htsget"))
            .await?;

        store.delete_drs_object("NA18537").await?;
        assert!(store.get_drs_object("NA18537").await?.is_none());
        assert!(store.get_variantfile("NA18537").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn delete_cohort_removes_objects() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        store
            .create_drs_object(&genomic_object("NA18537", "test-htsget"))
            .await?;
        store
            .create_drs_object(&genomic_object("NA20787", "test-htsget"))
            .await?;

        let deleted = store.delete_cohort("test-htsget").await?.unwrap();
        assert_eq!(deleted.drsobjects.len(), 2);
        assert!(store.get_drs_object("NA18537").await?.is_none());
        assert!(store.get_cohort("test-htsget").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn missing_object_is_none() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        assert!(store.get_drs_object("HG203245").await?.is_none());
        Ok(())
    }
}
