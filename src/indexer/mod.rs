//! The background indexing worker.
//!
//! A single-writer process that drains a touch-file queue, parses the linked
//! genomic files, populates the position-bucket index, and records per-object
//! checksum and size stats.  Not part of any request path.

use std::collections::HashMap;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt as _;
use sha2::{Digest, Sha256};

use crate::buckets::compress_positions;
use crate::catalog::drs::Checksum;
use crate::catalog::CatalogStore;
use crate::common;
use crate::config::{Config, ConfigArgs};
use crate::drs;

/// How often the worker re-lists the queue directory for new touch files.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Command line arguments for `indexer` sub command.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "Run the background indexing worker", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Index a single DRS object and exit instead of running the queue loop.
    #[arg(long)]
    pub object_id: Option<String>,
    /// Reference genome assumed when the variantfile row does not exist yet.
    #[arg(long, value_enum, default_value_t = common::ReferenceGenome::Hg38)]
    pub genome: common::ReferenceGenome,
}

/// Main entry point for `indexer` sub command.
pub fn run(args_common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let config = args.config.to_config();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let store = CatalogStore::open(
            &config.db_path,
            config.bucket_size,
            &config.htsget_url,
        )
        .await?;

        let genome = args.genome.to_string();
        if let Some(object_id) = &args.object_id {
            index_variants(&store, &config, object_id, &genome).await?;
            return Ok(());
        }

        run_queue_loop(&store, &config, &genome).await
    })
}

/// Drain the existing backlog, then poll the queue directory for new items.
async fn run_queue_loop(
    store: &CatalogStore,
    config: &Config,
    genome: &str,
) -> Result<(), anyhow::Error> {
    std::fs::create_dir_all(&config.indexing_path)?;
    tracing::info!("watching queue directory {:?}", &config.indexing_path);

    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;
        let items = list_queue(&config.indexing_path)?;
        for path in items {
            process_queue_item(store, config, genome, &path).await;
        }
    }
}

/// The queue files currently present, oldest first.
fn list_queue(indexing_path: &Path) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut items = Vec::new();
    for entry in std::fs::read_dir(indexing_path)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.contains('~') {
            continue;
        }
        // Items with recorded errors wait for an operator (or a fresh
        // enqueue) rather than being retried in a tight loop.
        if entry.metadata()?.len() > 0 {
            continue;
        }
        items.push((entry.metadata()?.modified()?, entry.path()));
    }
    items.sort();
    Ok(items.into_iter().map(|(_, path)| path).collect())
}

/// Handle one queue file: index on success delete it, on failure append a
/// timestamped error line and leave it for the cohort-status endpoint.
async fn process_queue_item(store: &CatalogStore, config: &Config, genome: &str, path: &Path) {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let Some((cohort, object_id)) = file_name.split_once('~') else {
        return;
    };
    tracing::info!("indexing {} (cohort {})", object_id, cohort);
    match index_variants(store, config, object_id, genome).await {
        Ok(()) => {
            tracing::info!("indexing complete for {}", object_id);
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("could not remove queue file {:?}: {}", path, e);
            }
        }
        Err(e) => {
            tracing::warn!("indexing failed for {}: {}", object_id, e);
            let line = format!("{} {}\n", chrono::Utc::now().to_rfc3339(), e);
            if let Err(e) = append_to_file(path, &line) {
                tracing::warn!("could not record error on {:?}: {}", path, e);
            }
        }
    }
}

fn append_to_file(path: &Path, line: &str) -> Result<(), anyhow::Error> {
    use std::io::Write as _;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Index one DRS object: stats, headers, samples, contig prefix, and the
/// position-bucket scan.  `indexed = 1` is set strictly after all other rows
/// are durable.
pub async fn index_variants(
    store: &CatalogStore,
    config: &Config,
    object_id: &str,
    genome: &str,
) -> Result<(), anyhow::Error> {
    if store.get_variantfile(object_id).await?.is_none() {
        store.create_variantfile(object_id, genome).await?;
    }

    tracing::info!("computing stats for {}", object_id);
    let cache_dir = crate::htsget::staging_dir(config);
    calculate_stats(store, &cache_dir, object_id).await?;

    let gen_obj = drs::get_genomic_object(store, &cache_dir, object_id)
        .await
        .map_err(|e| anyhow::anyhow!("could not open genomic object {}: {}", object_id, e))?;
    tracing::debug!(
        "opened {:?} (index {:?}) as {}",
        &gen_obj.main_path,
        &gen_obj.index_path,
        gen_obj.format
    );
    if !gen_obj.format.is_variant() {
        // Read files get stats only.
        return Ok(());
    }

    let headers: Vec<String> = gen_obj
        .file
        .header_text()
        .split('\n')
        .map(String::from)
        .collect();
    store
        .add_headers_for_variantfile(&headers, object_id)
        .await?;
    tracing::info!("indexed {} headers", headers.len());

    let samples = gen_obj.file.samples().to_vec();
    for sample in &samples {
        store.create_sample(sample, object_id).await?;
    }
    tracing::info!("indexed {} samples", samples.len());

    tracing::info!("normalizing contigs");
    let mut contig_map: HashMap<String, Option<String>> = HashMap::new();
    for contig in gen_obj.file.contigs() {
        let normalized = store.normalize_contig(contig).await?;
        contig_map.insert(contig.clone(), normalized);
    }
    for contig in gen_obj.file.contigs() {
        if contig_map.get(contig).map(|n| n.is_some()).unwrap_or(false) {
            if let Some(prefix) = store.get_contig_prefix(contig).await? {
                store.set_variantfile_prefix(object_id, &prefix).await?;
            }
            break;
        }
    }

    tracing::info!("collecting positions");
    let mut positions = Vec::new();
    for (pos, contig) in gen_obj.file.scan_positions()? {
        match contig_map.get(&contig).cloned().flatten() {
            Some(normalized) => positions.push((pos, normalized)),
            None => tracing::warn!(
                "referenceName {} in {} does not correspond to a known chromosome.",
                contig,
                object_id
            ),
        }
    }

    let runs = compress_positions(&positions, config.bucket_size);
    tracing::info!("writing {} bucket entries to db", runs.len());
    store.create_pos_bucket(object_id, &runs).await?;

    store.mark_variantfile_indexed(object_id, true).await?;
    Ok(())
}

/// Recursively compute the size and sha-256 of a DRS object and persist the
/// result.
///
/// Leaf objects hash their file bytes.  Container objects sum their
/// children's sizes and hash the sorted concatenation of the children's
/// checksums; sample objects record an empty checksum.
pub fn calculate_stats<'a>(
    store: &'a CatalogStore,
    cache_dir: &'a Path,
    object_id: &'a str,
) -> BoxFuture<'a, Result<(i64, String), anyhow::Error>> {
    async move {
        let obj = store
            .get_drs_object(object_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no DRS object {} to stat", object_id))?;

        let (size, checksum) = if let Some(methods) = &obj.access_methods {
            let method = methods
                .first()
                .ok_or_else(|| anyhow::anyhow!("object {} has no access methods", object_id))?;
            let resolved = drs::access::ResolvedAccess::from_access_method(method)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            let path = resolved
                .stage_to_local(cache_dir)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            hash_file(&path)?
        } else if obj.contents.is_some() {
            let mut total_size = 0;
            let mut child_checksums = Vec::new();
            for entry in obj.contents.iter().flatten() {
                // Sample-mapping entries do not resolve to catalog objects
                // and contribute nothing to the stats.
                if store.get_drs_object(&entry.name).await?.is_none() {
                    continue;
                }
                let (child_size, child_checksum) =
                    calculate_stats(store, cache_dir, &entry.name).await?;
                total_size += child_size;
                child_checksums.push(child_checksum);
            }
            if obj.is_sample() {
                (total_size, String::new())
            } else {
                child_checksums.sort();
                let mut hasher = Sha256::new();
                for checksum in &child_checksums {
                    hasher.update(checksum.as_bytes());
                }
                (
                    total_size,
                    base16ct::lower::encode_string(&hasher.finalize()),
                )
            }
        } else {
            (0, String::new())
        };

        store
            .update_drs_object_stats(
                object_id,
                size,
                &[Checksum {
                    checksum_type: "sha-256".to_string(),
                    checksum: checksum.clone(),
                }],
            )
            .await?;
        Ok((size, checksum))
    }
    .boxed()
}

/// Size and sha-256 of a file on disk.
fn hash_file(path: &Path) -> Result<(i64, String), anyhow::Error> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("could not open {:?} for hashing: {}", path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut size = 0i64;
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        size += n as i64;
        hasher.update(&buffer[..n]);
    }
    Ok((size, base16ct::lower::encode_string(&hasher.finalize())))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::drs::{AccessMethod, AccessUrl, ContentsObject, DrsObject};
    use crate::catalog::test_store;
    use crate::catalog::variants::RegionQuery;

    const SMALL_VCF: &str = "\
##fileformat=VCFv4.2\n\
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Combined depth across samples\">\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
##contig=<ID=chr21>\n\
##contig=<ID=scaffold_77>\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tNA18537\n\
chr21\t5030551\t.\tA\tC\t.\tPASS\tDP=100\tGT\t0/1\n\
chr21\t5030847\t.\tT\tA\t.\tPASS\tDP=95\tGT\t1/1\n\
chr21\t6031000\t.\tG\tA\t.\tPASS\tDP=90\tGT\t0/1\n\
scaffold_77\t1234\t.\tG\tC\t.\tPASS\tDP=7\tGT\t0/1\n";

    fn test_config(tmp_dir: &std::path::Path) -> Config {
        Config {
            db_path: "sqlite::memory:".into(),
            chunk_size: 10_000_000,
            bucket_size: 1_000_000,
            listen_host: "127.0.0.1".into(),
            listen_port: 3000,
            htsget_url: "http://localhost:3000".into(),
            indexing_path: tmp_dir.to_path_buf(),
            test_key: "testtesttest".into(),
            opa_url: None,
            opa_secret: String::new(),
            site_admin_key: "site_admin".into(),
            debug: false,
        }
    }

    async fn seed_genomic_object(
        store: &CatalogStore,
        tmp_dir: &std::path::Path,
    ) -> Result<(), anyhow::Error> {
        let vcf_path = tmp_dir.join("NA18537.vcf");
        std::fs::write(&vcf_path, SMALL_VCF)?;
        store
            .create_drs_object(&DrsObject {
                id: "NA18537.vcf".to_string(),
                description: "variant".to_string(),
                cohort: Some("test-htsget".to_string()),
                access_methods: Some(vec![AccessMethod {
                    kind: "file".to_string(),
                    access_url: Some(AccessUrl {
                        url: format!("file://{}", vcf_path.display()),
                        headers: vec![],
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            })
            .await?;
        store
            .create_drs_object(&DrsObject {
                id: "NA18537".to_string(),
                description: "wgs".to_string(),
                cohort: Some("test-htsget".to_string()),
                reference_genome: Some("hg38".to_string()),
                contents: Some(vec![ContentsObject {
                    name: "NA18537.vcf".to_string(),
                    contents_id: Some("variant".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn index_variants_populates_everything() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let store = test_store().await;
        let config = test_config(&tmp_dir);
        seed_genomic_object(&store, &tmp_dir).await?;

        index_variants(&store, &config, "NA18537", "hg38").await?;

        let varfile = store.get_variantfile("NA18537").await?.unwrap();
        assert_eq!(varfile.indexed, 1);
        assert_eq!(varfile.chr_prefix, "chr");
        assert_eq!(varfile.samples, vec!["NA18537".to_string()]);

        // The unknown scaffold contig is dropped from the index; the three
        // chr21 records land in two buckets.
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
        assert_eq!(counts.iter().map(|b| b.count).sum::<i64>(), 3);
        assert_eq!(counts.len(), 2);

        let headers = store.get_headers("NA18537").await?;
        assert!(headers.iter().any(|h| h.starts_with("##fileformat")));
        assert!(!headers.iter().any(|h| h.starts_with("#CHROM")));

        // Stats propagated to the bundling object.
        let obj = store.get_drs_object("NA18537").await?.unwrap();
        assert!(obj.size > 0);
        assert_eq!(obj.checksums.len(), 1);
        assert_eq!(obj.checksums[0].checksum_type, "sha-256");
        assert!(!obj.checksums[0].checksum.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn reindex_is_idempotent() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let store = test_store().await;
        let config = test_config(&tmp_dir);
        seed_genomic_object(&store, &tmp_dir).await?;

        index_variants(&store, &config, "NA18537", "hg38").await?;
        let first = store
            .get_variant_count_for_variantfile(
                "NA18537",
                &RegionQuery {
                    reference_name: Some("21".to_string()),
                    start: 0,
                    end: -1,
                },
            )
            .await?;
        index_variants(&store, &config, "NA18537", "hg38").await?;
        let second = store
            .get_variant_count_for_variantfile(
                "NA18537",
                &RegionQuery {
                    reference_name: Some("21".to_string()),
                    start: 0,
                    end: -1,
                },
            )
            .await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn stats_of_sample_object_have_empty_checksum() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let store = test_store().await;
        seed_genomic_object(&store, &tmp_dir).await?;
        store
            .create_drs_object(&DrsObject {
                id: "Patient_1".to_string(),
                description: "sample".to_string(),
                cohort: Some("test-htsget".to_string()),
                contents: Some(vec![ContentsObject {
                    name: "NA18537".to_string(),
                    contents_id: Some("NA18537".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            })
            .await?;

        let (size, checksum) = calculate_stats(&store, &tmp_dir, "Patient_1").await?;
        assert!(size > 0);
        assert_eq!(checksum, "");

        let leaf = store.get_drs_object("NA18537.vcf").await?.unwrap();
        assert_eq!(leaf.size, SMALL_VCF.len() as i64);
        Ok(())
    }

    #[test]
    fn hash_file_matches_known_digest() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = tmp_dir.join("hello.txt");
        std::fs::write(&path, b"hello\n")?;
        let (size, checksum) = hash_file(&path)?;
        assert_eq!(size, 6);
        assert_eq!(
            checksum,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
        Ok(())
    }

    #[tokio::test]
    async fn queue_item_failure_appends_error() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let store = test_store().await;
        let config = test_config(&tmp_dir);

        // No DRS object behind this queue item: indexing must fail and the
        // file must stay behind with an error line.
        let queue_file = tmp_dir.join("test-htsget~missing-object");
        std::fs::write(&queue_file, b"")?;
        process_queue_item(&store, &config, "hg38", &queue_file).await;

        assert!(queue_file.exists());
        let contents = std::fs::read_to_string(&queue_file)?;
        assert!(!contents.is_empty());

        // And it is no longer picked up by the queue listing.
        assert!(list_queue(&tmp_dir)?.is_empty());
        Ok(())
    }
}
