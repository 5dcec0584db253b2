//! DRS object-service operations: object and cohort CRUD, access-URL
//! resolution, and genomic-object materialization.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::authz::{AuthzGate, RequestContext};
use crate::catalog::drs::{Cohort, DrsObject};
use crate::catalog::CatalogStore;
use crate::err::OpError;
use crate::reader::{FileFormat, GenomicFile, GenomicObject};

pub mod access;

/// The role a contents entry plays inside a GenomicDrsObject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRole {
    Index,
    Read,
    Variant,
    Sample,
}

fn index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.(..*i)$").expect("invalid index regex"))
}

fn read_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.(.+?am)$").expect("invalid read regex"))
}

fn variant_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.(.cf)(\.gz)*$").expect("invalid variant regex"))
}

/// Classify a contents entry.  The stored role tag wins; the filename
/// heuristics cover legacy rows without one.
pub fn classify_contents(contents: &crate::catalog::drs::ContentsObject) -> ContentRole {
    match contents.contents_id.as_deref() {
        Some("index") => return ContentRole::Index,
        Some("read") => return ContentRole::Read,
        Some("variant") => return ContentRole::Variant,
        _ => {}
    }
    classify_content_name(&contents.name)
}

/// Filename-based role classification.
pub fn classify_content_name(name: &str) -> ContentRole {
    if index_re().is_match(name) {
        ContentRole::Index
    } else if read_re().is_match(name) {
        ContentRole::Read
    } else if variant_re().is_match(name) {
        ContentRole::Variant
    } else {
        ContentRole::Sample
    }
}

/// `GET /objects/{id}`.
pub async fn get_object(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    object_id: &str,
) -> Result<DrsObject, OpError> {
    match gate.is_authed(object_id, ctx).await {
        200 => {}
        401 => return Err(OpError::Unauthorized),
        403 => {
            return Err(OpError::Forbidden(format!(
                "not authorized to view {}",
                object_id
            )))
        }
        _ => return Err(OpError::no_such_object(object_id)),
    }
    store
        .get_drs_object(object_id)
        .await?
        .ok_or_else(|| OpError::no_such_object(object_id))
}

/// `GET /objects/{id}/access_url/{access_id}`.
pub async fn get_access_url(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    object_id: &str,
    access_id: &str,
) -> Result<access::ResolvedAccessUrl, OpError> {
    // Access resolution shares the object's authorization.
    get_object(store, gate, ctx, object_id).await?;
    access::resolve_access_id(access_id).await
}

/// `POST /objects`: idempotent create-or-update, cohort-admin only.
pub async fn post_object(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    obj: &DrsObject,
) -> Result<DrsObject, OpError> {
    let allowed = match &obj.cohort {
        Some(cohort) => gate.is_cohort_authorized(ctx, cohort).await,
        None => gate.is_site_admin(ctx).await,
    };
    if !allowed {
        return Err(OpError::Forbidden(format!(
            "not authorized to create objects in cohort {}",
            obj.cohort.as_deref().unwrap_or("<none>")
        )));
    }
    Ok(store.create_drs_object(obj).await?)
}

/// `DELETE /objects/{id}`: cohort-admin only, cascades.
pub async fn delete_object(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    object_id: &str,
) -> Result<DrsObject, OpError> {
    let obj = store
        .get_drs_object(object_id)
        .await?
        .ok_or_else(|| OpError::no_such_object(object_id))?;
    let allowed = match &obj.cohort {
        Some(cohort) => gate.is_cohort_authorized(ctx, cohort).await,
        None => gate.is_site_admin(ctx).await,
    };
    if !allowed {
        return Err(OpError::Forbidden(format!(
            "not authorized to delete {}",
            object_id
        )));
    }
    store
        .delete_drs_object(object_id)
        .await?
        .ok_or_else(|| OpError::no_such_object(object_id))
}

/// `GET /objects`: listing, filtered to authorized cohorts.
pub async fn list_objects(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    cohort_id: Option<&str>,
) -> Result<Vec<DrsObject>, OpError> {
    let authorized = gate.get_authorized_cohorts(ctx).await;
    let objects = store.list_drs_objects(cohort_id).await?;
    Ok(objects
        .into_iter()
        .filter(|obj| match &obj.cohort {
            Some(cohort) => authorized.contains(cohort),
            None => false,
        })
        .collect())
}

/// `GET /cohorts`: ids of the cohorts the requester may see.
pub async fn list_cohorts(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
) -> Result<Vec<String>, OpError> {
    let authorized = gate.get_authorized_cohorts(ctx).await;
    let mut cohorts: Vec<String> = store
        .list_cohorts()
        .await?
        .into_iter()
        .filter(|id| authorized.contains(id))
        .collect();
    cohorts.sort();
    Ok(cohorts)
}

/// `POST /cohorts`: site-admin only.
pub async fn post_cohort(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    cohort: &Cohort,
) -> Result<Cohort, OpError> {
    if !gate.is_site_admin(ctx).await {
        return Err(OpError::Forbidden(
            "only site admins may create cohorts".to_string(),
        ));
    }
    Ok(store.create_cohort(cohort).await?)
}

/// `GET /cohorts/{id}`.
pub async fn get_cohort(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    cohort_id: &str,
) -> Result<Cohort, OpError> {
    if !gate.is_cohort_authorized(ctx, cohort_id).await {
        return Err(OpError::Forbidden(format!(
            "not authorized to view cohort {}",
            cohort_id
        )));
    }
    store
        .get_cohort(cohort_id)
        .await?
        .ok_or_else(|| OpError::NotFound(format!("no cohort {}", cohort_id)))
}

/// `DELETE /cohorts/{id}`: cohort-admin only, cascades to all members.
pub async fn delete_cohort(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    cohort_id: &str,
) -> Result<Cohort, OpError> {
    if !gate.is_cohort_authorized(ctx, cohort_id).await {
        return Err(OpError::Forbidden(format!(
            "not authorized to delete cohort {}",
            cohort_id
        )));
    }
    store
        .delete_cohort(cohort_id)
        .await?
        .ok_or_else(|| OpError::NotFound(format!("no cohort {}", cohort_id)))
}

/// Indexing progress of a cohort's variantfiles, derived from the indexed
/// flag and the queue's error files.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct CohortStatus {
    pub index_complete: Vec<String>,
    pub index_in_progress: Vec<String>,
    pub index_errored: Vec<String>,
}

/// `GET /cohorts/{id}/status`.
pub async fn cohort_status(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    indexing_path: &Path,
    cohort_id: &str,
) -> Result<CohortStatus, OpError> {
    if !gate.is_cohort_authorized(ctx, cohort_id).await {
        return Err(OpError::Forbidden(format!(
            "not authorized to view cohort {}",
            cohort_id
        )));
    }
    let mut status = CohortStatus {
        index_complete: store.list_variantfiles_by_state(cohort_id, true).await?,
        ..Default::default()
    };
    let entries = match std::fs::read_dir(indexing_path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("could not read queue dir {:?}: {}", indexing_path, e);
            return Ok(status);
        }
    };
    for entry in entries {
        let entry = entry.map_err(|e| anyhow::anyhow!("problem listing queue dir: {}", e))?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some((cohort, object_id)) = file_name.split_once('~') else {
            continue;
        };
        if cohort != cohort_id {
            continue;
        }
        let errored = entry
            .metadata()
            .map(|metadata| metadata.len() > 0)
            .unwrap_or(false);
        if errored {
            status.index_errored.push(object_id.to_string());
        } else {
            status.index_in_progress.push(object_id.to_string());
        }
    }
    status.index_errored.sort();
    status.index_in_progress.sort();
    Ok(status)
}

/// Materialize the opened genomic file behind a GenomicDrsObject.
///
/// Resolves the index and data children through their access methods
/// (staging S3 objects to `cache_dir`) and opens the file with the matching
/// reader.
pub async fn get_genomic_object(
    store: &CatalogStore,
    cache_dir: &Path,
    object_id: &str,
) -> Result<GenomicObject, OpError> {
    let obj = store
        .get_drs_object(object_id)
        .await?
        .ok_or_else(|| OpError::no_such_object(object_id))?;
    let contents = obj.contents.as_ref().ok_or_else(|| {
        OpError::Integrity(format!("object {} has no contents to resolve", object_id))
    })?;

    let mut index_name = None;
    let mut main_name = None;
    let mut samples = indexmap::IndexMap::new();
    for entry in contents {
        match classify_contents(entry) {
            ContentRole::Index => index_name = Some(entry.name.clone()),
            ContentRole::Read | ContentRole::Variant => main_name = Some(entry.name.clone()),
            ContentRole::Sample => {
                // id is the sample name as spelled in the file, name is the
                // canonical sample id.
                if let Some(file_sample) = &entry.contents_id {
                    samples.insert(file_sample.clone(), entry.name.clone());
                }
            }
        }
    }
    let main_name = main_name.ok_or_else(|| {
        OpError::Integrity(format!(
            "object {} does not link to a variant or read file",
            object_id
        ))
    })?;
    let format = FileFormat::from_file_name(&main_name).ok_or_else(|| {
        OpError::Integrity(format!("could not infer format of {}", main_name))
    })?;

    let main_path = resolve_child_to_local(store, cache_dir, &main_name).await?;
    let index_path = match &index_name {
        Some(index_name) => Some(resolve_child_to_local(store, cache_dir, index_name).await?),
        None => None,
    };

    let file = GenomicFile::open(&main_path, index_path.as_deref(), format)
        .map_err(|e| OpError::Integrity(format!("could not open {}: {}", main_name, e)))?;

    Ok(GenomicObject {
        file,
        format,
        samples,
        main_path,
        index_path,
    })
}

/// Resolve a leaf DRS object (by name) to a local file path.
async fn resolve_child_to_local(
    store: &CatalogStore,
    cache_dir: &Path,
    name: &str,
) -> Result<std::path::PathBuf, OpError> {
    let child = store
        .get_drs_object(name)
        .await?
        .ok_or_else(|| OpError::Integrity(format!("no DRS object for contents {}", name)))?;
    let method = child
        .access_methods
        .as_ref()
        .and_then(|methods| methods.first())
        .ok_or_else(|| OpError::Integrity(format!("object {} has no access methods", name)))?;
    let resolved = access::ResolvedAccess::from_access_method(method)?;
    resolved.stage_to_local(cache_dir).await
}

/// Verify that a GenomicDrsObject's linked file is readable and consistent
/// with its declared contents.
pub async fn verify_genomic_drs_object(
    store: &CatalogStore,
    cache_dir: &Path,
    object_id: &str,
) -> Result<(), anyhow::Error> {
    let obj = store
        .get_drs_object(object_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Could not find object {}", object_id))?;
    let (Some(contents), Some(_)) = (&obj.contents, &obj.reference_genome) else {
        anyhow::bail!("Object {} is not a GenomicDrsObject", object_id);
    };

    let mut declared_samples = std::collections::HashSet::new();
    let mut file_role = None;
    for entry in contents {
        match classify_contents(entry) {
            ContentRole::Sample => {
                if let Some(file_sample) = &entry.contents_id {
                    declared_samples.insert(file_sample.clone());
                }
            }
            ContentRole::Variant => file_role = Some(ContentRole::Variant),
            ContentRole::Read => file_role = Some(ContentRole::Read),
            ContentRole::Index => {}
        }
    }
    let Some(file_role) = file_role else {
        anyhow::bail!(
            "Object {} should be a GenomicDrsObject, but does not link to a variant or read file",
            object_id
        );
    };

    let gen_obj = get_genomic_object(store, cache_dir, object_id)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    match file_role {
        ContentRole::Variant => {
            let file_samples: std::collections::HashSet<String> =
                gen_obj.file.samples().iter().cloned().collect();
            let missing: Vec<&String> = declared_samples.difference(&file_samples).collect();
            if !missing.is_empty() {
                anyhow::bail!(
                    "GenomicDrsObject {} lists samples {:?} that are not in the linked genomic file",
                    object_id,
                    missing
                );
            }
        }
        _ => {
            if gen_obj.file.contigs().is_empty() {
                anyhow::bail!(
                    "GenomicDrsObject {} links to a read file with no reference sequences",
                    object_id
                );
            }
            if declared_samples.len() > 1 {
                anyhow::bail!(
                    "GenomicDrsObject {} lists multiple samples, but only one can be in the read file",
                    object_id
                );
            }
        }
    }
    Ok(())
}

/// The per-sample view assembled from a SampleDrsObject.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct SampleInfo {
    pub sample_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohort: Option<String>,
    pub genomes: Vec<String>,
    pub transcriptomes: Vec<String>,
    pub variants: Vec<String>,
    pub reads: Vec<String>,
}

/// Materialize a SampleDrsObject into its genomic object listing.
pub async fn get_sample_info(
    store: &CatalogStore,
    sample_id: &str,
) -> Result<SampleInfo, OpError> {
    let obj = store
        .get_drs_object(sample_id)
        .await?
        .ok_or_else(|| OpError::NotFound(format!("Could not find sample {}", sample_id)))?;
    if !obj.is_sample() {
        return Err(OpError::NotFound(format!(
            "Could not find sample {}",
            sample_id
        )));
    }
    let mut info = SampleInfo {
        sample_id: sample_id.to_string(),
        cohort: obj.cohort.clone(),
        ..Default::default()
    };
    for entry in obj.contents.iter().flatten() {
        let Some(child_id) = &entry.contents_id else {
            continue;
        };
        let Some(child) = store.get_drs_object(child_id).await? else {
            continue;
        };
        match child.description.as_str() {
            "wgs" => info.genomes.push(child.id.clone()),
            "wts" => info.transcriptomes.push(child.id.clone()),
            _ => {}
        }
        for grandchild in child.contents.iter().flatten() {
            match grandchild.contents_id.as_deref() {
                Some("variant") => info.variants.push(child.id.clone()),
                Some("read") => info.reads.push(child.id.clone()),
                _ => {}
            }
        }
    }
    Ok(info)
}

/// Resolve several samples, grouped and filtered by cohort authorization.
pub async fn get_samples(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    sample_ids: &[String],
) -> Result<Vec<SampleInfo>, OpError> {
    let mut by_cohort: indexmap::IndexMap<String, Vec<SampleInfo>> = indexmap::IndexMap::new();
    for sample_id in sample_ids {
        match get_sample_info(store, sample_id).await {
            Ok(info) => {
                let cohort = info.cohort.clone().unwrap_or_default();
                by_cohort.entry(cohort).or_default().push(info);
            }
            Err(OpError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    let mut result = Vec::new();
    if gate.is_testing(ctx) || gate.is_trusted_service(ctx).await {
        for (_, infos) in by_cohort {
            result.extend(infos);
        }
    } else {
        let authorized = gate.get_authorized_cohorts(ctx).await;
        for (cohort, infos) in by_cohort {
            if authorized.contains(&cohort) {
                result.extend(infos);
            }
        }
    }
    Ok(result)
}

/// All samples of one cohort (or of every cohort), authorization-filtered.
pub async fn get_cohort_samples(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    cohort_id: Option<&str>,
) -> Result<Vec<SampleInfo>, OpError> {
    let objects = store.list_drs_objects(cohort_id).await?;
    let sample_ids: Vec<String> = objects
        .into_iter()
        .filter(|obj| obj.is_sample())
        .map(|obj| obj.id)
        .collect();
    get_samples(store, gate, ctx, &sample_ids).await
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::drs::test::genomic_object;
    use crate::catalog::drs::{AccessMethod, AccessUrl, ContentsObject};
    use crate::catalog::test_store;
    use crate::config::Config;

    fn open_config() -> Config {
        Config {
            db_path: "sqlite::memory:".into(),
            chunk_size: 10_000_000,
            bucket_size: 1_000_000,
            listen_host: "127.0.0.1".into(),
            listen_port: 3000,
            htsget_url: "http://localhost:3000".into(),
            indexing_path: "/tmp/htsget-indexing".into(),
            test_key: "testtesttest".into(),
            opa_url: None,
            opa_secret: String::new(),
            site_admin_key: "site_admin".into(),
            debug: false,
        }
    }

    #[rstest::rstest]
    #[case("NA18537.vcf.gz.tbi", ContentRole::Index)]
    #[case("NA02102.bam.bai", ContentRole::Index)]
    #[case("NA18537.vcf.gz", ContentRole::Variant)]
    #[case("NA18537.bcf", ContentRole::Variant)]
    #[case("NA02102.bam", ContentRole::Read)]
    #[case("NA02102.cram", ContentRole::Read)]
    #[case("NA18537", ContentRole::Sample)]
    fn classify_names(#[case] name: &str, #[case] expected: ContentRole) {
        assert_eq!(classify_content_name(name), expected);
    }

    #[test]
    fn tagged_role_wins_over_filename() {
        let entry = ContentsObject {
            name: "strange-name".to_string(),
            contents_id: Some("variant".to_string()),
            ..Default::default()
        };
        assert_eq!(classify_contents(&entry), ContentRole::Variant);
    }

    #[tokio::test]
    async fn genomic_object_end_to_end() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let vcf_path = tmp_dir.join("NA18537.vcf");
        std::fs::write(
            &vcf_path,
            "##fileformat=VCFv4.2\n##contig=<ID=chr21>\n\
             #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tNA18537\n\
             chr21\t5030551\t.\tA\tC\t.\tPASS\t.\tGT\t0/1\n",
        )?;

        let store = test_store().await;
        // Leaf object for the data file.
        store
            .create_drs_object(&crate::catalog::drs::DrsObject {
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
        // Bundling genomic object without an index child (plain VCF needs
        // none for whole-file reads).
        store
            .create_drs_object(&crate::catalog::drs::DrsObject {
                id: "NA18537".to_string(),
                description: "wgs".to_string(),
                cohort: Some("test-htsget".to_string()),
                reference_genome: Some("hg38".to_string()),
                contents: Some(vec![
                    ContentsObject {
                        name: "NA18537.vcf".to_string(),
                        contents_id: Some("variant".to_string()),
                        ..Default::default()
                    },
                    ContentsObject {
                        name: "Patient_1".to_string(),
                        contents_id: Some("NA18537".to_string()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            })
            .await?;

        let gen_obj = get_genomic_object(&store, &tmp_dir, "NA18537").await.unwrap();
        assert_eq!(gen_obj.format, crate::reader::FileFormat::Vcf);
        assert_eq!(
            gen_obj.samples.get("NA18537").map(String::as_str),
            Some("Patient_1")
        );
        assert_eq!(gen_obj.file.samples(), &["NA18537".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_integrity_error() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let store = test_store().await;
        store
            .create_drs_object(&crate::catalog::drs::DrsObject {
                id: "NA18537.vcf".to_string(),
                description: "variant".to_string(),
                access_methods: Some(vec![AccessMethod {
                    kind: "file".to_string(),
                    access_url: Some(AccessUrl {
                        url: "file:///nonexistent/NA18537.vcf".to_string(),
                        headers: vec![],
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            })
            .await?;
        store
            .create_drs_object(&crate::catalog::drs::DrsObject {
                id: "NA18537".to_string(),
                description: "wgs".to_string(),
                reference_genome: Some("hg38".to_string()),
                contents: Some(vec![ContentsObject {
                    name: "NA18537.vcf".to_string(),
                    contents_id: Some("variant".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            })
            .await?;

        let err = get_genomic_object(&store, &tmp_dir, "NA18537")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        Ok(())
    }

    #[tokio::test]
    async fn cohort_status_reads_queue_files() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let store = test_store().await;
        let config = open_config();
        let gate = AuthzGate::new(store.clone(), &config);
        let ctx = RequestContext::default();

        store
            .create_drs_object(&genomic_object("NA18537", "test-htsget"))
            .await?;
        store.mark_variantfile_indexed("NA18537", true).await?;
        std::fs::write(tmp_dir.join("test-htsget~NA20787"), b"")?;
        std::fs::write(
            tmp_dir.join("test-htsget~NA20788"),
            b"2023-10-04T01:02:03 indexing failed: boom\n",
        )?;
        std::fs::write(tmp_dir.join("other-cohort~NA99999"), b"")?;

        let status = cohort_status(&store, &gate, &ctx, &tmp_dir, "test-htsget").await?;
        assert_eq!(status.index_complete, vec!["NA18537".to_string()]);
        assert_eq!(status.index_in_progress, vec!["NA20787".to_string()]);
        assert_eq!(status.index_errored, vec!["NA20788".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn sample_info_materialization() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        let config = open_config();
        let gate = AuthzGate::new(store.clone(), &config);
        let ctx = RequestContext::default();

        store
            .create_drs_object(&genomic_object("NA18537-genome", "test-htsget"))
            .await?;
        store
            .create_drs_object(&crate::catalog::drs::DrsObject {
                id: "Patient_1".to_string(),
                description: "sample".to_string(),
                cohort: Some("test-htsget".to_string()),
                contents: Some(vec![ContentsObject {
                    name: "NA18537-genome".to_string(),
                    contents_id: Some("NA18537-genome".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            })
            .await?;

        let info = get_sample_info(&store, "Patient_1").await?;
        assert_eq!(info.genomes, vec!["NA18537-genome".to_string()]);
        assert_eq!(info.variants, vec!["NA18537-genome".to_string()]);
        assert!(info.reads.is_empty());

        // A genomic object is not a sample.
        assert!(get_sample_info(&store, "NA18537-genome").await.is_err());

        let samples = get_cohort_samples(&store, &gate, &ctx, Some("test-htsget")).await?;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].sample_id, "Patient_1");
        Ok(())
    }
}
