//! htsget ticket planning and data streaming.

use std::io::Write as _;

use itertools::Itertools as _;
use serde::Serialize;
use url::form_urlencoded;

use crate::authz::{AuthzGate, RequestContext};
use crate::catalog::refseq::RefseqField;
use crate::catalog::variants::RegionQuery;
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::drs;
use crate::err::OpError;

/// One URL of an htsget ticket.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HtsgetUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

/// The `htsget` envelope of a ticket response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HtsgetTicket {
    pub format: String,
    pub urls: Vec<HtsgetUrl>,
}

/// A ticket response: `{"htsget": {...}}`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TicketResponse {
    pub htsget: HtsgetTicket,
}

/// Whether an endpoint serves variants or reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FileType {
    #[strum(serialize = "variant")]
    Variant,
    #[strum(serialize = "read")]
    Read,
}

/// The service-info document for one htsget datatype.
pub fn service_info(file_type: FileType) -> serde_json::Value {
    let (datatype, formats) = match file_type {
        FileType::Read => ("reads", vec!["BAM", "CRAM", "SAM"]),
        FileType::Variant => ("variants", vec!["VCF", "BCF"]),
    };
    serde_json::json!({
        "id": "org.candig.htsget",
        "name": "CanDIG htsget service",
        "type": {
            "group": "org.ga4gh",
            "artifact": "htsget",
            "version": "v1.3.0"
        },
        "description": "An htsget-compliant server for CanDIG genomic data",
        "organization": {
            "name": "CanDIG",
            "url": "https://www.distributedgenomics.ca"
        },
        "version": crate::common::VERSION,
        "htsget": {
            "datatype": datatype,
            "formats": formats,
            "fieldsParameterEffective": false,
            "tagsParametersEffective": false
        }
    })
}

/// The base URL for ticket/data URLs; test-mode requests may redirect to a
/// local test deployment.
fn base_url(config: &Config, testing: bool, file_type: FileType, id: &str, data: bool) -> String {
    let url = if testing {
        std::env::var("TESTENV_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", config.listen_port))
    } else {
        config.htsget_url.clone()
    };
    if data {
        format!("{}/htsget/v1/{}s/data/{}", url, file_type, id)
    } else {
        format!("{}/htsget/v1/{}s/{}", url, file_type, id)
    }
}

/// Build one body-slice URL for a region of a file.
fn slice_url(
    config: &Config,
    testing: bool,
    file_type: FileType,
    id: &str,
    reference_name: Option<&str>,
    slice_start: Option<i64>,
    slice_end: Option<i64>,
) -> HtsgetUrl {
    let mut params = form_urlencoded::Serializer::new(String::new());
    params.append_pair("class", "body");
    if let Some(reference_name) = reference_name {
        params.append_pair("referenceName", reference_name);
        if let Some(slice_start) = slice_start {
            params.append_pair("start", &slice_start.to_string());
        }
        if let Some(slice_end) = slice_end {
            params.append_pair("end", &slice_end.to_string());
        }
    }
    let url = format!(
        "{}?{}",
        base_url(config, testing, file_type, id, true),
        params.finish()
    );
    HtsgetUrl {
        url,
        class: Some("body".to_string()),
    }
}

/// A contiguous span of buckets folded into one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chunk {
    count: i64,
    start: i64,
    end: i64,
}

/// Fold an ordered bucket list into chunks with a greedy record-count cap.
///
/// The cap decision is made on the pre-add count, so a chunk may overshoot
/// `chunk_size` by one bucket; this guarantees every bucket is covered.
fn fold_buckets(
    buckets: &[crate::catalog::variants::BucketCount],
    chunk_size: i64,
    start: i64,
    end: i64,
    bucket_size: i64,
) -> Vec<Chunk> {
    let mut chunks = vec![Chunk {
        count: 0,
        start,
        end: 0,
    }];
    for bucket in buckets {
        let current = chunks.last_mut().expect("chunks are non-empty");
        if current.count <= chunk_size {
            current.count += bucket.count;
            current.end = bucket.pos_bucket;
        } else {
            let boundary = current.end;
            chunks.push(Chunk {
                count: 0,
                start: boundary + 1,
                end: boundary + 1,
            });
        }
    }
    // The trailing chunk ends exactly at the requested end, or one bucket
    // width past its last bucket when the caller left the end open.
    let last = chunks.last_mut().expect("chunks are non-empty");
    if end != -1 {
        last.end = end;
    } else {
        last.end += bucket_size;
    }
    chunks
}

/// Produce the ordered body-slice URLs for a region of an indexed file.
async fn get_htsget_urls(
    store: &CatalogStore,
    config: &Config,
    testing: bool,
    id: &str,
    reference_name: Option<&str>,
    start: Option<i64>,
    end: Option<i64>,
    file_type: FileType,
) -> Result<Vec<HtsgetUrl>, OpError> {
    let start = start.unwrap_or(0);
    let end = end.unwrap_or(-1);

    let buckets = store
        .get_variant_count_for_variantfile(
            id,
            &RegionQuery {
                reference_name: reference_name.map(String::from),
                start,
                end,
            },
        )
        .await?;
    let chunks = fold_buckets(&buckets, config.chunk_size, start, end, config.bucket_size);

    Ok(chunks
        .iter()
        .map(|chunk| {
            slice_url(
                config,
                testing,
                file_type,
                id,
                reference_name,
                Some(chunk.start),
                Some(chunk.end),
            )
        })
        .collect())
}

/// `GET /htsget/v1/{variants|reads}/{id}`: construct a ticket.
#[allow(clippy::too_many_arguments)]
pub async fn get_urls(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    config: &Config,
    file_type: FileType,
    id: &str,
    reference_name: Option<&str>,
    start: Option<i64>,
    end: Option<i64>,
    class: Option<&str>,
) -> Result<TicketResponse, OpError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(OpError::BadRequest(
                "end cannot be less than start".to_string(),
            ));
        }
    }
    if start.map(|s| s < 0).unwrap_or(false) {
        return Err(OpError::BadRequest("start cannot be negative".to_string()));
    }
    let reference_name = reference_name.filter(|name| *name != "None");

    match gate.is_authed(id, ctx).await {
        200 => {}
        401 => return Err(OpError::Unauthorized),
        403 => return Err(OpError::Forbidden(format!("not authorized to view {}", id))),
        _ => {
            return Err(OpError::NotFound(format!(
                "No {} found for id: {}, try using the other endpoint",
                file_type, id
            )))
        }
    }

    // Resolving the object also proves the linked file is present and
    // readable.
    let cache_dir = staging_dir(config);
    let gen_obj = drs::get_genomic_object(store, &cache_dir, id)
        .await
        .map_err(|e| match e {
            OpError::NotFound(_) => OpError::NotFound(format!(
                "No {} found for id: {}, try using the other endpoint",
                file_type, id
            )),
            other => other,
        })?;

    let testing = gate.is_testing(ctx);
    let header_url = HtsgetUrl {
        url: format!(
            "{}?class=header",
            base_url(config, testing, file_type, id, true)
        ),
        class: Some("header".to_string()),
    };
    let mut ticket = TicketResponse {
        htsget: HtsgetTicket {
            format: gen_obj.format.to_string(),
            urls: vec![header_url],
        },
    };
    if class == Some("header") {
        return Ok(ticket);
    }

    ticket.htsget.urls.extend(
        get_htsget_urls(
            store,
            config,
            testing,
            id,
            reference_name,
            start,
            end,
            file_type,
        )
        .await?,
    );
    Ok(ticket)
}

/// The staged slice produced by the data endpoint: a temp file plus the
/// download name exposed via `x-filename`.
pub struct DataSlice {
    pub temp_file: tempfile::NamedTempFile,
    pub file_name: String,
}

/// `GET /htsget/v1/{variants|reads}/data/{id}`: stream the actual bytes.
///
/// Absent `class` means header and body in one response; `class=header` and
/// `class=body` select one part.
#[allow(clippy::too_many_arguments)]
pub async fn get_data(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    config: &Config,
    id: &str,
    reference_name: Option<&str>,
    start: Option<i64>,
    end: Option<i64>,
    class: Option<&str>,
    format: Option<&str>,
) -> Result<DataSlice, OpError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end != -1 && end < start {
            return Err(OpError::BadRequest(
                "end cannot be less than start".to_string(),
            ));
        }
    }
    match gate.is_authed(id, ctx).await {
        200 => {}
        401 => return Err(OpError::Unauthorized),
        403 => return Err(OpError::Forbidden(format!("not authorized to view {}", id))),
        _ => return Err(OpError::NotFound("no object matching id found".to_string())),
    }

    let reference_name = reference_name.filter(|name| *name != "None");
    let start = start.filter(|s| *s != 0);
    let end = end.filter(|e| *e != -1);

    let cache_dir = staging_dir(config);
    let gen_obj = drs::get_genomic_object(store, &cache_dir, id).await?;
    let format = format
        .map(|f| f.to_lowercase())
        .unwrap_or_else(|| gen_obj.format.to_string().to_lowercase());
    let file_name = format!("{}.{}", id, format);

    let mut temp_file = tempfile::Builder::new()
        .prefix("htsget")
        .suffix(&format)
        .tempfile()
        .map_err(|e| anyhow::anyhow!("could not create temp file: {}", e))?;

    if class.is_none() || class == Some("header") {
        temp_file
            .write_all(gen_obj.file.header_text().as_bytes())
            .map_err(|e| anyhow::anyhow!("could not write header: {}", e))?;
    }

    if class.is_none() || class == Some("body") {
        // Translate the caller-normalized contig back to the file's own
        // spelling; fall back to the caller's spelling for unindexed files.
        let ref_name = match reference_name {
            Some(name) => Some(
                store
                    .get_contig_name_in_variantfile(name, id)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| name.to_string()),
            ),
            None => None,
        };
        let records = gen_obj
            .file
            .fetch(ref_name.as_deref(), start, end)
            .map_err(|e| OpError::BadRequest(e.to_string()))?;
        for record in &records {
            temp_file
                .write_all(record.line.as_bytes())
                .map_err(|e| anyhow::anyhow!("could not write record: {}", e))?;
            temp_file
                .write_all(b"\n")
                .map_err(|e| anyhow::anyhow!("could not write record: {}", e))?;
        }
    }
    temp_file
        .flush()
        .map_err(|e| anyhow::anyhow!("could not flush slice: {}", e))?;

    Ok(DataSlice {
        temp_file,
        file_name,
    })
}

/// `GET /htsget/v1/variants/{id}/index`: enqueue an indexing request.
#[allow(clippy::too_many_arguments)]
pub async fn index_variants(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    config: &Config,
    id: &str,
    genome: &str,
    force: bool,
    do_not_index: bool,
) -> Result<Option<crate::catalog::variants::VariantFile>, OpError> {
    if !gate.is_site_admin(ctx).await {
        return Err(OpError::Forbidden(
            "User is not authorized to index variants".to_string(),
        ));
    }
    let obj = store
        .get_drs_object(id)
        .await?
        .ok_or_else(|| OpError::NotFound(format!("No DRS object exists with ID {}", id)))?;
    let cohort = obj.cohort.clone().unwrap_or_default();

    let varfile = store
        .create_variantfile(id, genome)
        .await
        .map_err(OpError::Internal)?;
    if !do_not_index {
        if varfile.indexed == 1 && !force {
            return Ok(Some(varfile));
        }
        store
            .mark_variantfile_indexed(id, false)
            .await
            .map_err(OpError::Internal)?;
        enqueue(config, &cohort, id)?;
    }
    Ok(None)
}

/// `GET /htsget/v1/reads/{id}/index`: stats-only indexing for read files.
pub async fn index_reads(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    config: &Config,
    id: &str,
) -> Result<(), OpError> {
    if !gate.is_site_admin(ctx).await {
        return Err(OpError::Forbidden(
            "User is not authorized to index reads".to_string(),
        ));
    }
    let obj = store
        .get_drs_object(id)
        .await?
        .ok_or_else(|| OpError::NotFound(format!("No DRS object exists with ID {}", id)))?;
    let cohort = obj.cohort.clone().unwrap_or_default();
    enqueue(config, &cohort, id)
}

/// Touch a queue file named `<cohort>~<id>` for the indexing worker.
fn enqueue(config: &Config, cohort: &str, id: &str) -> Result<(), OpError> {
    std::fs::create_dir_all(&config.indexing_path)
        .map_err(|e| anyhow::anyhow!("could not create queue dir: {}", e))?;
    let path = config.indexing_path.join(format!("{}~{}", cohort, id));
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| anyhow::anyhow!("could not touch queue file {:?}: {}", path, e))?;
    Ok(())
}

/// Directory where S3-held objects are staged for reading.
pub fn staging_dir(config: &Config) -> std::path::PathBuf {
    config.indexing_path.join(".staging")
}

/// A gene or transcript lookup hit with its normalizable regions.
#[derive(Debug, Clone, Serialize, Default)]
pub struct GeneMatch {
    pub gene_name: String,
    pub transcript_name: String,
    pub regions: Vec<serde_json::Value>,
}

/// `GET /genes` and `GET /transcripts`: distinct sorted names.
pub async fn list_genes(
    store: &CatalogStore,
    field: RefseqField,
) -> Result<Vec<String>, OpError> {
    let refseqs = store.list_refseqs("hg38").await?;
    Ok(refseqs
        .into_iter()
        .map(|refseq| match field {
            RefseqField::GeneName => refseq.gene_name,
            RefseqField::TranscriptName => refseq.transcript_name,
        })
        .sorted()
        .dedup()
        .collect())
}

/// `GET /genes/{id}`: prefix search returning up to five distinct names
/// with their regions (regions whose contig fails to normalize are dropped).
pub async fn get_matching_genes(
    store: &CatalogStore,
    query: &str,
    field: RefseqField,
) -> Result<Vec<GeneMatch>, OpError> {
    let refseqs = store.search_refseqs(&query.to_uppercase(), field).await?;
    let mut results: Vec<GeneMatch> = Vec::new();
    let mut current_name = String::new();
    for refseq in &refseqs {
        let name = match field {
            RefseqField::GeneName => &refseq.gene_name,
            RefseqField::TranscriptName => &refseq.transcript_name,
        };
        if *name != current_name {
            current_name = name.clone();
            if results.len() >= 5 {
                break;
            }
            results.push(GeneMatch {
                gene_name: refseq.gene_name.clone(),
                transcript_name: refseq.transcript_name.clone(),
                regions: vec![],
            });
        }
        if store.normalize_contig(&refseq.contig).await?.is_some() {
            if let Some(last) = results.last_mut() {
                last.regions.push(serde_json::json!({
                    "reference_genome": refseq.reference_genome,
                    "region": {
                        "referenceName": refseq.contig,
                        "start": refseq.start,
                        "end": refseq.endpos,
                    }
                }));
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::variants::BucketCount;

    fn counts(pairs: &[(i64, i64)]) -> Vec<BucketCount> {
        pairs
            .iter()
            .map(|(pos_bucket, count)| BucketCount {
                pos_bucket: *pos_bucket,
                count: *count,
            })
            .collect()
    }

    #[test]
    fn fold_empty_buckets_with_open_end() {
        let chunks = fold_buckets(&[], 1000, 0, -1, 1_000_000);
        assert_eq!(
            chunks,
            vec![Chunk {
                count: 0,
                start: 0,
                end: 1_000_000
            }]
        );
    }

    #[test]
    fn fold_empty_buckets_with_concrete_end() {
        let chunks = fold_buckets(&[], 1000, 10_002_800, 10_050_000, 1_000_000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 10_002_800);
        assert_eq!(chunks[0].end, 10_050_000);
    }

    #[test]
    fn fold_splits_on_cap() {
        // Cap of 10: the first chunk may overshoot by one bucket because the
        // decision is made on the pre-add count.
        let buckets = counts(&[(0, 8), (1_000_000, 8), (2_000_000, 8), (3_000_000, 8)]);
        let chunks = fold_buckets(&buckets, 10, 0, -1, 1_000_000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].count, 16);
        assert_eq!(chunks[0].end, 1_000_000);
        assert_eq!(chunks[1].start, 1_000_001);
        // Open end: widened by one bucket width past the last bucket.
        assert_eq!(chunks[1].end, 3_000_000 + 1_000_000);
    }

    #[test]
    fn fold_trailing_end_is_exact_when_requested() {
        let buckets = counts(&[(5_000_000, 6)]);
        let chunks = fold_buckets(&buckets, 1000, 5_030_000, 5_030_847, 1_000_000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end, 5_030_847);
        // The slice never starts before the caller's range.
        assert_eq!(chunks[0].start, 5_030_000);
    }

    #[test]
    fn slice_urls_carry_query_parameters() {
        let config = crate::config::Config {
            db_path: "x".into(),
            chunk_size: 10_000_000,
            bucket_size: 1_000_000,
            listen_host: "127.0.0.1".into(),
            listen_port: 3000,
            htsget_url: "http://htsget.example.org".into(),
            indexing_path: "/tmp/htsget-indexing".into(),
            test_key: "testtesttest".into(),
            opa_url: None,
            opa_secret: String::new(),
            site_admin_key: "site_admin".into(),
            debug: false,
        };
        let url = slice_url(
            &config,
            false,
            FileType::Variant,
            "NA18537",
            Some("21"),
            Some(0),
            Some(1_000_000),
        );
        assert_eq!(
            url.url,
            "http://htsget.example.org/htsget/v1/variants/data/NA18537?class=body&referenceName=21&start=0&end=1000000"
        );
        assert_eq!(url.class.as_deref(), Some("body"));

        // Without a reference name, only the class parameter is emitted.
        let url = slice_url(
            &config,
            false,
            FileType::Read,
            "NA02102",
            None,
            Some(0),
            Some(1_000_000),
        );
        assert_eq!(
            url.url,
            "http://htsget.example.org/htsget/v1/reads/data/NA02102?class=body"
        );
    }

    #[test]
    fn service_info_shape() {
        let info = service_info(FileType::Variant);
        assert_eq!(info["htsget"]["datatype"], "variants");
        assert_eq!(info["type"]["version"], "v1.3.0");
        let info = service_info(FileType::Read);
        assert_eq!(info["htsget"]["formats"][0], "BAM");
    }
}
