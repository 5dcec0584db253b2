//! Variant-file metadata and the position-bucket content index.

use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::{CatalogStore, MAX_TRIES};
use crate::buckets::{bucket_for_position, BucketRuns};

/// Per-file indexing metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VariantFile {
    pub id: String,
    #[serde(rename = "drsobject")]
    pub drs_object_id: String,
    pub indexed: i64,
    /// How this file spells chromosomes (e.g. `""` or `"chr"`).
    pub chr_prefix: String,
    pub reference_genome: String,
    pub samples: Vec<String>,
}

/// One `(bucket, count)` pair from a region count query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketCount {
    pub pos_bucket: i64,
    pub count: i64,
}

/// Region parameters for bucket queries; 0-based half-open with the
/// `start = 0 && end = -1` convention meaning "everything".
#[derive(Debug, Clone, Default)]
pub struct RegionQuery {
    pub reference_name: Option<String>,
    pub start: i64,
    pub end: i64,
}

/// Parameters of a cross-file search over the bucket index.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub region: Option<SearchRegion>,
    pub headers: Option<Vec<String>>,
}

/// Search region; `start`/`end` are bucketed before comparison.
#[derive(Debug, Clone, Default)]
pub struct SearchRegion {
    pub reference_name: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

/// Per-variantfile result of a bucket search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub drs_object_id: String,
    pub variantcount: i64,
    pub reference_genome: String,
}

impl CatalogStore {
    /// Fetch variant-file metadata, retrying on transient store errors.
    pub async fn get_variantfile(&self, id: &str) -> Result<Option<VariantFile>, anyhow::Error> {
        let mut tries = 0;
        loop {
            tries += 1;
            match self.try_get_variantfile(id).await {
                Ok(result) => return Ok(result),
                Err(e) if tries < MAX_TRIES => {
                    tracing::info!("exception in get_variantfile {}: {}, trying again", id, e);
                    Self::backoff().await;
                }
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "exception in get_variantfile {}, too many tries: {}",
                        id,
                        e
                    ))
                }
            }
        }
    }

    async fn try_get_variantfile(&self, id: &str) -> Result<Option<VariantFile>, anyhow::Error> {
        let row = sqlx::query("SELECT * FROM variantfile WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let samples = self.samples_for_variantfile(id).await?;
        Ok(Some(VariantFile {
            id: row.try_get("id")?,
            drs_object_id: row.try_get("drs_object_id")?,
            indexed: row.try_get("indexed")?,
            chr_prefix: row.try_get("chr_prefix")?,
            reference_genome: row.try_get("reference_genome")?,
            samples,
        }))
    }

    /// Create (or update the reference genome of) the variantfile row for a
    /// GenomicDrsObject.  The DRS object must exist.
    pub async fn create_variantfile(
        &self,
        id: &str,
        reference_genome: &str,
    ) -> Result<VariantFile, anyhow::Error> {
        let drs = sqlx::query("SELECT id FROM drs_object WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        if drs.is_none() {
            anyhow::bail!("cannot create variantfile {}: no corresponding DRS object", id);
        }
        sqlx::query(
            "INSERT INTO variantfile (id, drs_object_id, indexed, chr_prefix, reference_genome) \
             VALUES (?1, ?1, 0, '', ?2) \
             ON CONFLICT (id) DO UPDATE SET reference_genome = excluded.reference_genome",
        )
        .bind(id)
        .bind(reference_genome)
        .execute(&self.pool)
        .await?;
        self.try_get_variantfile(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("variantfile {} vanished after create", id))
    }

    /// Flip the indexed bit; `indexed = 1` happens exactly once per
    /// successful indexing run.
    pub async fn mark_variantfile_indexed(
        &self,
        id: &str,
        indexed: bool,
    ) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE variantfile SET indexed = ?2 WHERE id = ?1")
            .bind(id)
            .bind(if indexed { 1 } else { 0 })
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record how the file spells chromosomes.
    pub async fn set_variantfile_prefix(
        &self,
        id: &str,
        chr_prefix: &str,
    ) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE variantfile SET chr_prefix = ?2 WHERE id = ?1")
            .bind(id)
            .bind(chr_prefix)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// List variantfile ids with the given indexed state for one cohort.
    pub async fn list_variantfiles_by_state(
        &self,
        cohort_id: &str,
        indexed: bool,
    ) -> Result<Vec<String>, anyhow::Error> {
        let rows = sqlx::query(
            "SELECT vf.id FROM variantfile vf \
             JOIN drs_object o ON o.id = vf.drs_object_id \
             WHERE o.cohort_id = ?1 AND vf.indexed = ?2 ORDER BY vf.id",
        )
        .bind(cohort_id)
        .bind(if indexed { 1 } else { 0 })
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get("id").map_err(Into::into))
            .collect()
    }

    /// Resolve any contig spelling to its canonical name.
    pub async fn normalize_contig(&self, contig_id: &str) -> Result<Option<String>, anyhow::Error> {
        let row = sqlx::query("SELECT id FROM contig WHERE id = ?1")
            .bind(contig_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return Ok(Some(row.try_get("id")?));
        }
        let row = sqlx::query("SELECT contig_id FROM alias WHERE id = ?1")
            .bind(contig_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("contig_id")?)),
            None => Ok(None),
        }
    }

    /// The spelling prefix of a contig name relative to its canonical form,
    /// e.g. `""` for `"21"` and `"chr"` for `"chr21"`.
    pub async fn get_contig_prefix(&self, contig_id: &str) -> Result<Option<String>, anyhow::Error> {
        let Some(normalized) = self.normalize_contig(contig_id).await? else {
            return Ok(None);
        };
        let suffix = normalized.replace("chr", "");
        Ok(Some(contig_id.replace(&suffix, "")))
    }

    /// Translate a caller-normalized contig name into the file's native
    /// spelling: `chr_prefix + normalize_contig(refname)`.
    pub async fn get_contig_name_in_variantfile(
        &self,
        refname: &str,
        variantfile_id: &str,
    ) -> Result<Option<String>, anyhow::Error> {
        let Some(normalized) = self.normalize_contig(refname).await? else {
            return Ok(None);
        };
        let Some(varfile) = self.get_variantfile(variantfile_id).await? else {
            return Ok(None);
        };
        let suffix = normalized.replace("chr", "");
        Ok(Some(format!("{}{}", varfile.chr_prefix, suffix)))
    }

    /// Record a declared sample for a variantfile (idempotent).
    pub async fn create_sample(
        &self,
        sample_id: &str,
        variantfile_id: &str,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO sample (sample_id, variantfile_id) VALUES (?1, ?2)",
        )
        .bind(sample_id)
        .bind(variantfile_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ordered samples declared for one variantfile.
    pub async fn samples_for_variantfile(
        &self,
        variantfile_id: &str,
    ) -> Result<Vec<String>, anyhow::Error> {
        let rows = sqlx::query("SELECT sample_id FROM sample WHERE variantfile_id = ?1 ORDER BY id")
            .bind(variantfile_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("sample_id").map_err(Into::into))
            .collect()
    }

    /// Distinct samples declared across a set of variantfiles.
    pub async fn get_samples_in_drs_objects(
        &self,
        drs_object_ids: &[String],
    ) -> Result<Vec<String>, anyhow::Error> {
        if drs_object_ids.is_empty() {
            return Ok(vec![]);
        }
        let mut builder = sqlx::QueryBuilder::new(
            "SELECT DISTINCT sample_id FROM sample WHERE variantfile_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in drs_object_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY sample_id");
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get("sample_id").map_err(Into::into))
            .collect()
    }

    /// Persist header lines for a variantfile.  Header text is deduplicated
    /// across files; blank lines and the `#CHROM` column line are skipped.
    pub async fn add_headers_for_variantfile(
        &self,
        texts: &[String],
        variantfile_id: &str,
    ) -> Result<(), anyhow::Error> {
        for text in texts {
            let text = text.trim();
            if text.is_empty() || text.starts_with("#CHROM") {
                continue;
            }
            sqlx::query("INSERT OR IGNORE INTO header (text) VALUES (?1)")
                .bind(text)
                .execute(&self.pool)
                .await?;
            sqlx::query(
                "INSERT OR IGNORE INTO header_variantfile_association (header_id, variantfile_id) \
                 SELECT id, ?2 FROM header WHERE text = ?1",
            )
            .bind(text)
            .bind(variantfile_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// The header lines recorded for a variantfile, in insertion order.
    pub async fn get_headers(&self, variantfile_id: &str) -> Result<Vec<String>, anyhow::Error> {
        let rows = sqlx::query(
            "SELECT h.text FROM header h \
             JOIN header_variantfile_association a ON a.header_id = h.id \
             WHERE a.variantfile_id = ?1 ORDER BY h.id",
        )
        .bind(variantfile_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get("text").map_err(Into::into))
            .collect()
    }

    /// Bulk-upsert the bucket associations produced by the indexing scan.
    ///
    /// PositionBucket rows are created on demand; each contig is attached to
    /// the variantfile on first sight.  Rows are written with per-row commits
    /// so a concurrent reader never waits on one long transaction.
    pub async fn create_pos_bucket(
        &self,
        variantfile_id: &str,
        runs: &BucketRuns,
    ) -> Result<(), anyhow::Error> {
        if self.try_get_variantfile(variantfile_id).await?.is_none() {
            anyhow::bail!("no variantfile {} to index", variantfile_id);
        }
        let mut curr_contig: Option<&str> = None;
        for i in 0..runs.len() {
            let pos_bucket_id = runs.pos_bucket_ids[i];
            let contig_id = runs.normalized_contigs[i].as_str();
            let bucket_count = runs.bucket_counts[i];
            if bucket_count <= 0 {
                continue;
            }
            if curr_contig != Some(contig_id) {
                curr_contig = Some(contig_id);
                sqlx::query(
                    "INSERT OR IGNORE INTO contig_variantfile_association \
                     (contig_id, variantfile_id) VALUES (?1, ?2)",
                )
                .bind(contig_id)
                .bind(variantfile_id)
                .execute(&self.pool)
                .await?;
            }
            sqlx::query(
                "INSERT OR IGNORE INTO pos_bucket (pos_bucket_id, contig_id) VALUES (?1, ?2)",
            )
            .bind(pos_bucket_id)
            .bind(contig_id)
            .execute(&self.pool)
            .await?;
            sqlx::query(
                "INSERT INTO pos_bucket_variantfile_association \
                 (pos_bucket_id, variantfile_id, bucket_count) \
                 SELECT id, ?3, ?4 FROM pos_bucket WHERE pos_bucket_id = ?1 AND contig_id = ?2 \
                 ON CONFLICT (pos_bucket_id, variantfile_id) \
                 DO UPDATE SET bucket_count = excluded.bucket_count",
            )
            .bind(pos_bucket_id)
            .bind(contig_id)
            .bind(variantfile_id)
            .bind(bucket_count)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Ordered `(bucket, count)` list for all buckets of one variantfile
    /// intersecting the region; `start = 0 && end = -1` selects everything.
    pub async fn get_variant_count_for_variantfile(
        &self,
        variantfile_id: &str,
        region: &RegionQuery,
    ) -> Result<Vec<BucketCount>, anyhow::Error> {
        let mut builder = sqlx::QueryBuilder::new(
            "SELECT pb.pos_bucket_id, a.bucket_count \
             FROM pos_bucket pb \
             JOIN pos_bucket_variantfile_association a ON a.pos_bucket_id = pb.id \
             WHERE a.variantfile_id = ",
        );
        builder.push_bind(variantfile_id);
        if let Some(reference_name) = &region.reference_name {
            let Some(contig_id) = self.normalize_contig(reference_name).await? else {
                return Ok(vec![]);
            };
            builder.push(" AND pb.contig_id = ");
            builder.push_bind(contig_id);
        }
        if region.start > 0 {
            builder.push(" AND pb.pos_bucket_id >= ");
            builder.push_bind(bucket_for_position(region.start, self.bucket_size));
        }
        if region.end != -1 {
            builder.push(" AND pb.pos_bucket_id < ");
            builder.push_bind(bucket_for_position(region.end, self.bucket_size));
        }
        builder.push(" ORDER BY pb.pos_bucket_id");
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(BucketCount {
                    pos_bucket: row.try_get("pos_bucket_id")?,
                    count: row.try_get("bucket_count")?,
                })
            })
            .collect()
    }

    /// Per-variantfile total counts over a region, optionally filtered to
    /// files whose recorded headers match all of the given substrings.
    /// Retries on transient store errors.
    pub async fn search(&self, params: &SearchParams) -> Result<Vec<SearchResult>, anyhow::Error> {
        let mut tries = 0;
        loop {
            tries += 1;
            match self.try_search(params).await {
                Ok(result) => return Ok(result),
                Err(e) if tries < MAX_TRIES => {
                    tracing::info!("exception in search: {}, trying again", e);
                    Self::backoff().await;
                }
                Err(e) => {
                    return Err(anyhow::anyhow!("exception in search, too many tries: {}", e))
                }
            }
        }
    }

    async fn try_search(&self, params: &SearchParams) -> Result<Vec<SearchResult>, anyhow::Error> {
        let mut builder = sqlx::QueryBuilder::new(
            "SELECT vf.id AS drs_object_id, vf.reference_genome, \
             SUM(a.bucket_count) AS variantcount \
             FROM variantfile vf \
             JOIN pos_bucket_variantfile_association a ON a.variantfile_id = vf.id \
             JOIN pos_bucket pb ON pb.id = a.pos_bucket_id \
             WHERE 1 = 1",
        );
        if let Some(region) = &params.region {
            let Some(contig_id) = self.normalize_contig(&region.reference_name).await? else {
                return Ok(vec![]);
            };
            builder.push(" AND pb.contig_id = ");
            builder.push_bind(contig_id);
            if let Some(start) = region.start {
                builder.push(" AND pb.pos_bucket_id >= ");
                builder.push_bind(bucket_for_position(start, self.bucket_size));
            }
            if let Some(end) = region.end {
                builder.push(" AND pb.pos_bucket_id <= ");
                builder.push_bind(bucket_for_position(end, self.bucket_size));
            }
        }
        for header in params.headers.iter().flatten() {
            builder.push(
                " AND EXISTS (SELECT 1 FROM header_variantfile_association hva \
                 JOIN header h ON h.id = hva.header_id \
                 WHERE hva.variantfile_id = vf.id AND h.text LIKE ",
            );
            builder.push_bind(format!("%{}%", header));
            builder.push(")");
        }
        builder.push(" GROUP BY vf.id ORDER BY vf.id");
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(SearchResult {
                    drs_object_id: row.try_get("drs_object_id")?,
                    variantcount: row.try_get("variantcount")?,
                    reference_genome: row.try_get("reference_genome")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::buckets::compress_positions;
    use crate::catalog::drs::test::genomic_object;
    use crate::catalog::test_store;

    async fn indexed_store() -> CatalogStore {
        let store = test_store().await;
        store
            .create_drs_object(&genomic_object("NA18537", "test-htsget"))
            .await
            .unwrap();
        // 6 records in bucket 5_000_000, 2 in bucket 10_000_000 of chr21.
        let positions: Vec<(i64, String)> = [
            5_030_000_i64,
            5_030_100,
            5_030_200,
            5_030_300,
            5_030_847,
            5_040_000,
            10_002_800,
            10_050_000,
        ]
        .iter()
        .map(|pos| (*pos, "chr21".to_string()))
        .collect();
        let runs = compress_positions(&positions, store.bucket_size);
        store.create_pos_bucket("NA18537", &runs).await.unwrap();
        store
            .add_headers_for_variantfile(
                &["##fileformat=VCFv4.2".to_string()],
                "NA18537",
            )
            .await
            .unwrap();
        store.mark_variantfile_indexed("NA18537", true).await.unwrap();
        store
    }

    #[tokio::test]
    async fn normalize_contig_spellings() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        assert_eq!(
            store.normalize_contig("21").await?.as_deref(),
            Some("chr21")
        );
        assert_eq!(
            store.normalize_contig("chr21").await?.as_deref(),
            Some("chr21")
        );
        assert_eq!(
            store.normalize_contig("NC_000021.9").await?.as_deref(),
            Some("chr21")
        );
        assert_eq!(store.normalize_contig("banana").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn contig_prefixes() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        assert_eq!(store.get_contig_prefix("21").await?.as_deref(), Some(""));
        assert_eq!(
            store.get_contig_prefix("chr21").await?.as_deref(),
            Some("chr")
        );
        assert_eq!(store.get_contig_prefix("banana").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn contig_name_in_variantfile() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        store
            .create_drs_object(&genomic_object("NA18537", "test-htsget"))
            .await?;
        store.set_variantfile_prefix("NA18537", "chr").await?;

        assert_eq!(
            store
                .get_contig_name_in_variantfile("21", "NA18537")
                .await?
                .as_deref(),
            Some("chr21")
        );
        assert_eq!(
            store
                .get_contig_name_in_variantfile("banana", "NA18537")
                .await?,
            None
        );
        Ok(())
    }

    #[tokio::test]
    async fn region_counts() -> Result<(), anyhow::Error> {
        let store = indexed_store().await;

        // Whole file.
        let all = store
            .get_variant_count_for_variantfile(
                "NA18537",
                &RegionQuery {
                    reference_name: Some("21".to_string()),
                    start: 0,
                    end: -1,
                },
            )
            .await?;
        assert_eq!(
            all,
            vec![
                BucketCount {
                    pos_bucket: 5_000_000,
                    count: 6
                },
                BucketCount {
                    pos_bucket: 10_000_000,
                    count: 2
                },
            ]
        );
        assert_eq!(all.iter().map(|b| b.count).sum::<i64>(), 8);

        // Bounded region: only buckets in [bucket(start), bucket(end)).
        let bounded = store
            .get_variant_count_for_variantfile(
                "NA18537",
                &RegionQuery {
                    reference_name: Some("21".to_string()),
                    start: 5_000_000,
                    end: 9_999_999,
                },
            )
            .await?;
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].count, 6);

        // Unknown contig: empty.
        let unknown = store
            .get_variant_count_for_variantfile(
                "NA18537",
                &RegionQuery {
                    reference_name: Some("banana".to_string()),
                    start: 0,
                    end: -1,
                },
            )
            .await?;
        assert!(unknown.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn search_by_region_and_headers() -> Result<(), anyhow::Error> {
        let store = indexed_store().await;

        let results = store
            .search(&SearchParams {
                region: Some(SearchRegion {
                    reference_name: "21".to_string(),
                    start: Some(5_030_000),
                    end: Some(5_030_847),
                }),
                headers: None,
            })
            .await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].drs_object_id, "NA18537");
        assert_eq!(results[0].variantcount, 6);
        assert_eq!(results[0].reference_genome, "hg38");

        // A header predicate that matches nothing filters the file out.
        let results = store
            .search(&SearchParams {
                region: Some(SearchRegion {
                    reference_name: "21".to_string(),
                    start: Some(5_030_000),
                    end: Some(5_030_847),
                }),
                headers: Some(vec!["somatic_caller".to_string()]),
            })
            .await?;
        assert!(results.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn reindex_overwrites_counts() -> Result<(), anyhow::Error> {
        let store = indexed_store().await;
        let positions: Vec<(i64, String)> =
            vec![(5_030_000, "chr21".to_string()), (5_030_100, "chr21".to_string())];
        let runs = compress_positions(&positions, store.bucket_size);
        store.create_pos_bucket("NA18537", &runs).await?;

        let counts = store
            .get_variant_count_for_variantfile(
                "NA18537",
                &RegionQuery {
                    reference_name: Some("21".to_string()),
                    start: 0,
                    end: -1,
                },
            )
            .await?;
        assert_eq!(counts[0].count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn headers_deduplicate() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        store
            .create_drs_object(&genomic_object("NA18537", "test-htsget"))
            .await?;
        store
            .create_drs_object(&genomic_object("NA20787", "test-htsget"))
            .await?;
        let texts = vec![
            "##fileformat=VCFv4.2".to_string(),
            "#CHROM\tPOS\tID".to_string(),
            "".to_string(),
        ];
        store.add_headers_for_variantfile(&texts, "NA18537").await?;
        store.add_headers_for_variantfile(&texts, "NA20787").await?;

        assert_eq!(
            store.get_headers("NA18537").await?,
            vec!["##fileformat=VCFv4.2".to_string()]
        );
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM header")
            .fetch_one(&store.pool)
            .await?;
        assert_eq!(row.0, 1);
        Ok(())
    }

    #[tokio::test]
    async fn samples_unique_per_variantfile() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        store
            .create_drs_object(&genomic_object("NA18537", "test-htsget"))
            .await?;
        store.create_sample("NA18537", "NA18537").await?;
        store.create_sample("NA18537", "NA18537").await?;

        assert_eq!(
            store.samples_for_variantfile("NA18537").await?,
            vec!["NA18537".to_string()]
        );
        assert_eq!(
            store
                .get_samples_in_drs_objects(&["NA18537".to_string()])
                .await?,
            vec!["NA18537".to_string()]
        );
        Ok(())
    }
}
