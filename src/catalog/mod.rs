//! The catalog: a relational store of DRS objects, cohorts, variant-file
//! metadata, position buckets, and the static refseq gene table.

use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

pub mod drs;
pub mod init;
pub mod refseq;
pub mod variants;

/// Maximum number of attempts for store operations that may race with the
/// single-writer indexer.
pub const MAX_TRIES: u32 = 3;

/// Handle to the catalog database.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    pub(crate) pool: SqlitePool,
    /// Width of a position bucket in base pairs.
    pub bucket_size: i64,
    /// External base URL, used to derive `self_uri` values.
    pub htsget_url: String,
}

impl CatalogStore {
    /// Open (and migrate) the catalog database at `db_path`.
    pub async fn open(
        db_path: &str,
        bucket_size: i64,
        htsget_url: &str,
    ) -> Result<Self, anyhow::Error> {
        let options = SqliteConnectOptions::from_str(db_path)
            .or_else(|_| SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path)))
            .map_err(|e| anyhow::anyhow!("invalid database path {}: {}", db_path, e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| anyhow::anyhow!("could not open database {}: {}", db_path, e))?;
        let store = Self {
            pool,
            bucket_size,
            htsget_url: htsget_url.to_string(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory catalog, for tests.
    pub async fn open_in_memory(bucket_size: i64) -> Result<Self, anyhow::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            bucket_size,
            htsget_url: "http://localhost:3000".to_string(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the schema and seed the contig/alias tables.
    pub async fn migrate(&self) -> Result<(), anyhow::Error> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| anyhow::anyhow!("schema migration failed: {}", e))?;
        }
        self.seed_contigs().await?;
        Ok(())
    }

    /// Sleep for the randomized retry backoff (uniform 0.5-5 s).
    pub(crate) async fn backoff() {
        let millis = rand::thread_rng().gen_range(500..=5000);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    /// Seed the canonical contigs and their common aliases.
    ///
    /// Canonical names use the `chr` prefix; aliases cover the bare GRC names
    /// and RefSeq chromosome accessions for both supported builds.
    async fn seed_contigs(&self) -> Result<(), anyhow::Error> {
        for (canonical, aliases) in CONTIG_ALIASES {
            sqlx::query("INSERT OR IGNORE INTO contig (id) VALUES (?1)")
                .bind(canonical)
                .execute(&self.pool)
                .await?;
            for alias in aliases.iter() {
                sqlx::query("INSERT OR IGNORE INTO alias (id, contig_id) VALUES (?1, ?2)")
                    .bind(alias)
                    .bind(canonical)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

/// The catalog schema.  Cascading deletes are expressed at schema level so
/// that removing a cohort, DRS object, or variantfile removes all dependents.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cohort (
    id TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS drs_object (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    self_uri TEXT NOT NULL DEFAULT '',
    size INTEGER NOT NULL DEFAULT 0,
    created_time TEXT NOT NULL DEFAULT '',
    updated_time TEXT NOT NULL DEFAULT '',
    version TEXT NOT NULL DEFAULT '',
    mime_type TEXT NOT NULL DEFAULT 'application/octet-stream',
    description TEXT NOT NULL DEFAULT '',
    checksums TEXT NOT NULL DEFAULT '[]',
    aliases TEXT NOT NULL DEFAULT '[]',
    cohort_id TEXT REFERENCES cohort (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS access_method (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    drs_object_id TEXT NOT NULL REFERENCES drs_object (id) ON DELETE CASCADE,
    type TEXT NOT NULL DEFAULT '',
    access_id TEXT NOT NULL DEFAULT '',
    region TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL DEFAULT '',
    headers TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS content_object (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    drs_object_id TEXT NOT NULL REFERENCES drs_object (id) ON DELETE CASCADE,
    name TEXT NOT NULL DEFAULT '',
    contents_id TEXT NOT NULL DEFAULT '',
    drs_uri TEXT NOT NULL DEFAULT '[]',
    contents TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS variantfile (
    id TEXT PRIMARY KEY,
    drs_object_id TEXT NOT NULL REFERENCES drs_object (id) ON DELETE CASCADE,
    indexed INTEGER NOT NULL DEFAULT 0,
    chr_prefix TEXT NOT NULL DEFAULT '',
    reference_genome TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS contig (
    id TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS alias (
    id TEXT PRIMARY KEY,
    contig_id TEXT NOT NULL REFERENCES contig (id)
);

CREATE TABLE IF NOT EXISTS contig_variantfile_association (
    contig_id TEXT NOT NULL REFERENCES contig (id),
    variantfile_id TEXT NOT NULL REFERENCES variantfile (id) ON DELETE CASCADE,
    PRIMARY KEY (contig_id, variantfile_id)
);

CREATE TABLE IF NOT EXISTS pos_bucket (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pos_bucket_id INTEGER NOT NULL,
    contig_id TEXT NOT NULL REFERENCES contig (id),
    UNIQUE (pos_bucket_id, contig_id)
);

CREATE TABLE IF NOT EXISTS pos_bucket_variantfile_association (
    pos_bucket_id INTEGER NOT NULL REFERENCES pos_bucket (id),
    variantfile_id TEXT NOT NULL REFERENCES variantfile (id) ON DELETE CASCADE,
    bucket_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (pos_bucket_id, variantfile_id)
);

CREATE TABLE IF NOT EXISTS header (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS header_variantfile_association (
    header_id INTEGER NOT NULL REFERENCES header (id),
    variantfile_id TEXT NOT NULL REFERENCES variantfile (id) ON DELETE CASCADE,
    PRIMARY KEY (header_id, variantfile_id)
);

CREATE TABLE IF NOT EXISTS sample (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sample_id TEXT NOT NULL,
    variantfile_id TEXT NOT NULL REFERENCES variantfile (id) ON DELETE CASCADE,
    UNIQUE (sample_id, variantfile_id)
);

CREATE TABLE IF NOT EXISTS ncbirefseq (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    reference_genome TEXT NOT NULL,
    gene_name TEXT NOT NULL DEFAULT '',
    transcript_name TEXT NOT NULL DEFAULT '',
    contig TEXT NOT NULL DEFAULT '',
    start INTEGER NOT NULL DEFAULT 0,
    endpos INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_drs_object_cohort ON drs_object (cohort_id);
CREATE INDEX IF NOT EXISTS idx_pos_bucket_lookup ON pos_bucket (contig_id, pos_bucket_id);
CREATE INDEX IF NOT EXISTS idx_pbvfa_variantfile ON pos_bucket_variantfile_association (variantfile_id);
CREATE INDEX IF NOT EXISTS idx_ncbirefseq_gene ON ncbirefseq (gene_name);
CREATE INDEX IF NOT EXISTS idx_ncbirefseq_transcript ON ncbirefseq (transcript_name)
"#;

/// Canonical contigs and the spellings seen in the wild, including RefSeq
/// chromosome accessions for GRCh37 and GRCh38.
const CONTIG_ALIASES: &[(&str, &[&str])] = &[
    ("chr1", &["1", "NC_000001.10", "NC_000001.11"]),
    ("chr2", &["2", "NC_000002.11", "NC_000002.12"]),
    ("chr3", &["3", "NC_000003.11", "NC_000003.12"]),
    ("chr4", &["4", "NC_000004.11", "NC_000004.12"]),
    ("chr5", &["5", "NC_000005.9", "NC_000005.10"]),
    ("chr6", &["6", "NC_000006.11", "NC_000006.12"]),
    ("chr7", &["7", "NC_000007.13", "NC_000007.14"]),
    ("chr8", &["8", "NC_000008.10", "NC_000008.11"]),
    ("chr9", &["9", "NC_000009.11", "NC_000009.12"]),
    ("chr10", &["10", "NC_000010.10", "NC_000010.11"]),
    ("chr11", &["11", "NC_000011.9", "NC_000011.10"]),
    ("chr12", &["12", "NC_000012.11", "NC_000012.12"]),
    ("chr13", &["13", "NC_000013.10", "NC_000013.11"]),
    ("chr14", &["14", "NC_000014.8", "NC_000014.9"]),
    ("chr15", &["15", "NC_000015.9", "NC_000015.10"]),
    ("chr16", &["16", "NC_000016.9", "NC_000016.10"]),
    ("chr17", &["17", "NC_000017.10", "NC_000017.11"]),
    ("chr18", &["18", "NC_000018.9", "NC_000018.10"]),
    ("chr19", &["19", "NC_000019.9", "NC_000019.10"]),
    ("chr20", &["20", "NC_000020.10", "NC_000020.11"]),
    ("chr21", &["21", "NC_000021.8", "NC_000021.9"]),
    ("chr22", &["22", "NC_000022.10", "NC_000022.11"]),
    ("chrX", &["X", "NC_000023.10", "NC_000023.11"]),
    ("chrY", &["Y", "NC_000024.9", "NC_000024.10"]),
    ("chrM", &["M", "MT", "chrMT", "NC_012920.1"]),
];

#[cfg(test)]
pub(crate) async fn test_store() -> CatalogStore {
    CatalogStore::open_in_memory(1_000_000)
        .await
        .expect("could not open in-memory store")
}

#[cfg(test)]
mod test {
    #[tokio::test]
    async fn migrate_is_idempotent() -> Result<(), anyhow::Error> {
        let store = super::test_store().await;
        store.migrate().await?;
        store.migrate().await?;
        Ok(())
    }

    #[tokio::test]
    async fn every_canonical_chromosome_is_seeded() -> Result<(), anyhow::Error> {
        let store = super::test_store().await;
        for chrom in crate::common::CHROMS {
            assert_eq!(
                store.normalize_contig(chrom).await?.as_deref(),
                Some(*chrom)
            );
        }
        Ok(())
    }
}
