//! The static NCBI RefSeq lookup table used for gene-symbol and HGVS
//! resolution.

use clap::Parser;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::CatalogStore;
use crate::common;

/// One row of the refseq table: a gene/transcript region, or a chromosome
/// accession when `gene_name` is empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NcbiRefSeq {
    pub reference_genome: String,
    pub gene_name: String,
    pub transcript_name: String,
    pub contig: String,
    pub start: i64,
    #[serde(rename = "end")]
    pub endpos: i64,
}

/// Which column a refseq prefix search matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefseqField {
    GeneName,
    TranscriptName,
}

impl CatalogStore {
    /// Insert one refseq row (idempotent on exact duplicates).
    pub async fn create_refseq(&self, record: &NcbiRefSeq) -> Result<(), anyhow::Error> {
        sqlx::query(
            "INSERT INTO ncbirefseq (reference_genome, gene_name, transcript_name, contig, start, endpos) \
             SELECT ?1, ?2, ?3, ?4, ?5, ?6 \
             WHERE NOT EXISTS (SELECT 1 FROM ncbirefseq WHERE reference_genome = ?1 \
             AND gene_name = ?2 AND transcript_name = ?3 AND contig = ?4 AND start = ?5 AND endpos = ?6)",
        )
        .bind(&record.reference_genome)
        .bind(&record.gene_name)
        .bind(&record.transcript_name)
        .bind(&record.contig)
        .bind(record.start)
        .bind(record.endpos)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All named genes of one reference genome.
    pub async fn list_refseqs(
        &self,
        reference_genome: &str,
    ) -> Result<Vec<NcbiRefSeq>, anyhow::Error> {
        let rows = sqlx::query(
            "SELECT * FROM ncbirefseq WHERE reference_genome = ?1 AND gene_name != '' \
             ORDER BY gene_name, reference_genome",
        )
        .bind(reference_genome)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_refseq).collect()
    }

    /// Prefix search on gene or transcript name, ordered for deterministic
    /// tie-breaks (name then reference genome).
    pub async fn search_refseqs(
        &self,
        query: &str,
        field: RefseqField,
    ) -> Result<Vec<NcbiRefSeq>, anyhow::Error> {
        let sql = match field {
            RefseqField::TranscriptName => {
                "SELECT * FROM ncbirefseq WHERE transcript_name LIKE ?1 \
                 ORDER BY transcript_name, reference_genome"
            }
            RefseqField::GeneName => {
                "SELECT * FROM ncbirefseq WHERE gene_name LIKE ?1 \
                 ORDER BY gene_name, reference_genome"
            }
        };
        let rows = sqlx::query(sql)
            .bind(format!("{}%", query))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_refseq).collect()
    }

    /// The chromosome-level accession (e.g. `NC_000021.9`) for a canonical
    /// contig in the given build.
    pub async fn get_refseq_for_chromosome(
        &self,
        reference_genome: &str,
        contig: &str,
    ) -> Result<Option<String>, anyhow::Error> {
        let row = sqlx::query(
            "SELECT transcript_name FROM ncbirefseq \
             WHERE reference_genome = ?1 AND contig = ?2 AND gene_name = ''",
        )
        .bind(reference_genome)
        .bind(contig)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("transcript_name")?)),
            None => Ok(None),
        }
    }

    /// The contig a chromosome-level accession belongs to.
    pub async fn get_chromosome_for_refseq(
        &self,
        refseq: &str,
    ) -> Result<Option<String>, anyhow::Error> {
        let row = sqlx::query(
            "SELECT contig FROM ncbirefseq WHERE transcript_name = ?1 AND start = 0",
        )
        .bind(refseq)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("contig")?)),
            None => Ok(None),
        }
    }
}

fn row_to_refseq(row: &sqlx::sqlite::SqliteRow) -> Result<NcbiRefSeq, anyhow::Error> {
    Ok(NcbiRefSeq {
        reference_genome: row.try_get("reference_genome")?,
        gene_name: row.try_get("gene_name")?,
        transcript_name: row.try_get("transcript_name")?,
        contig: row.try_get("contig")?,
        start: row.try_get("start")?,
        endpos: row.try_get("endpos")?,
    })
}

/// Command line arguments for `db load-refseq` sub command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Load the NCBI RefSeq gene table", long_about = None)]
pub struct LoadArgs {
    /// Connection URI or path of the catalog database.
    #[arg(long, default_value = "htsget.sqlite")]
    pub db_path: String,
    /// Path to the (possibly gzipped) refseq TSV with columns
    /// reference_genome, gene_name, transcript_name, contig, start, end.
    #[arg(long, required = true)]
    pub path_in: String,
}

/// TSV record shape of the refseq download.
#[derive(Debug, Deserialize)]
struct TsvRecord {
    reference_genome: String,
    #[serde(default)]
    gene_name: String,
    #[serde(default)]
    transcript_name: String,
    contig: String,
    start: i64,
    end: i64,
}

/// Main entry point for `db load-refseq` sub command.
pub fn run_load(args_common: &common::Args, args: &LoadArgs) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let store = CatalogStore::open(&args.db_path, 1, "http://localhost").await?;

        tracing::info!("loading refseq records from {}", &args.path_in);
        let reader = crate::common::io::open_read_maybe_gz(&args.path_in)?;
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_reader(reader);
        let mut total = 0usize;
        for record in csv_reader.deserialize::<TsvRecord>() {
            let record = record?;
            store
                .create_refseq(&NcbiRefSeq {
                    reference_genome: record.reference_genome,
                    gene_name: record.gene_name,
                    transcript_name: record.transcript_name,
                    contig: record.contig,
                    start: record.start,
                    endpos: record.end,
                })
                .await?;
            total += 1;
        }
        tracing::info!("... done loading {} records", total);

        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::test_store;

    /// Seed the chromosome accessions and a couple of genes used in tests.
    pub(crate) async fn seed_refseqs(store: &CatalogStore) {
        let rows = vec![
            NcbiRefSeq {
                reference_genome: "hg38".into(),
                transcript_name: "NC_000021.9".into(),
                contig: "chr21".into(),
                start: 0,
                endpos: 46_709_983,
                ..Default::default()
            },
            NcbiRefSeq {
                reference_genome: "hg19".into(),
                transcript_name: "NC_000021.8".into(),
                contig: "chr21".into(),
                start: 0,
                endpos: 48_129_895,
                ..Default::default()
            },
            NcbiRefSeq {
                reference_genome: "hg38".into(),
                transcript_name: "NC_000019.10".into(),
                contig: "chr19".into(),
                start: 0,
                endpos: 58_617_616,
                ..Default::default()
            },
            NcbiRefSeq {
                reference_genome: "hg38".into(),
                gene_name: "NBPF1".into(),
                transcript_name: "NM_017940.4".into(),
                contig: "chr1".into(),
                start: 16_565_731,
                endpos: 16_622_087,
            },
            NcbiRefSeq {
                reference_genome: "hg38".into(),
                gene_name: "TP53".into(),
                transcript_name: "NM_000546.6".into(),
                contig: "chr17".into(),
                start: 7_668_401,
                endpos: 7_687_549,
            },
        ];
        for row in &rows {
            store.create_refseq(row).await.unwrap();
        }
    }

    #[tokio::test]
    async fn search_and_lookups() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        seed_refseqs(&store).await;

        let genes = store.search_refseqs("NBPF", RefseqField::GeneName).await?;
        assert_eq!(genes.len(), 1);
        assert_eq!(genes[0].gene_name, "NBPF1");

        let transcripts = store
            .search_refseqs("NC_000021", RefseqField::TranscriptName)
            .await?;
        assert_eq!(transcripts.len(), 2);
        // hg19 accession sorts before hg38 on transcript name.
        assert_eq!(transcripts[0].transcript_name, "NC_000021.8");

        assert_eq!(
            store
                .get_refseq_for_chromosome("hg38", "chr21")
                .await?
                .as_deref(),
            Some("NC_000021.9")
        );
        assert_eq!(
            store
                .get_chromosome_for_refseq("NC_000021.9")
                .await?
                .as_deref(),
            Some("chr21")
        );
        assert_eq!(store.get_refseq_for_chromosome("hg38", "chr2").await?, None);

        let listed = store.list_refseqs("hg38").await?;
        assert_eq!(listed.len(), 2);
        Ok(())
    }
}
