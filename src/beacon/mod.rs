//! Beacon v2 genomic-variant search over the indexed catalog.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::authz::{AuthzGate, RequestContext};
use crate::catalog::refseq::RefseqField;
use crate::catalog::variants::{SearchParams, SearchRegion};
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::drs;
use crate::err::OpError;
use crate::htsget::{self, FileType};
use self::records::{InfoDef, ParsedVariant};

pub mod hgvs;
pub mod records;

const API_VERSION: &str = "1.0.0";
const BEACON_ID: &str = "org.candig.htsget.beacon";

fn schema() -> Value {
    json!([
        {
            "entityType": "genomicVariant",
            "schema": "ga4gh-beacon-variant-v2.0.0"
        }
    ])
}

/// The Beacon service-info document.
pub fn service_info() -> Value {
    json!({
        "id": BEACON_ID,
        "name": "CanDIG Beacon v2 genomic variants service",
        "type": {
            "group": "org.ga4gh",
            "artifact": "beacon",
            "version": "v2.0.0"
        },
        "description": "A Beacon v2 server for CanDIG genomic data",
        "organization": {
            "name": "CanDIG",
            "url": "https://www.distributedgenomics.ca"
        },
        "version": API_VERSION
    })
}

/// Beacon v2 request parameters; both snake_case and the wire's camelCase
/// spellings are accepted.
#[derive(Debug, Clone, serde::Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RequestParameters {
    #[serde(default)]
    pub start: Option<Vec<i64>>,
    #[serde(default)]
    pub end: Option<Vec<i64>>,
    #[serde(default, alias = "assemblyId")]
    pub assembly_id: Option<String>,
    #[serde(default, alias = "referenceName")]
    pub reference_name: Option<String>,
    #[serde(default, alias = "referenceBases")]
    pub reference_bases: Option<String>,
    #[serde(default, alias = "alternateBases")]
    pub alternate_bases: Option<String>,
    #[serde(default, alias = "variantMinLength")]
    pub variant_min_length: Option<i64>,
    #[serde(default, alias = "variantMaxLength")]
    pub variant_max_length: Option<i64>,
    #[serde(default, alias = "genomicAlleleShortForm")]
    pub genomic_allele_short_form: Option<String>,
    #[serde(default, alias = "geneId")]
    pub gene_id: Option<String>,
}

/// The `query` member of a Beacon POST body.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct BeaconQuery {
    #[serde(default, alias = "requestParameters")]
    pub request_parameters: RequestParameters,
    #[serde(default)]
    pub filters: Option<Value>,
}

/// A Beacon v2 POST body.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct BeaconRequest {
    #[serde(default)]
    pub query: BeaconQuery,
    #[serde(default)]
    pub pagination: Option<Value>,
    #[serde(default, alias = "requestedGranularity")]
    pub requested_granularity: Option<String>,
    #[serde(default, alias = "includeResultsetResponses")]
    pub include_resultset_responses: Option<Value>,
}

/// Parsed variants of one file plus the INFO definitions used to type them.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FileVariants {
    #[serde(rename = "info")]
    pub info_defs: Vec<InfoDef>,
    pub variants: Vec<ParsedVariant>,
}

/// Parse the records of one variantfile within a region.
pub async fn parse_vcf_file(
    store: &CatalogStore,
    config: &Config,
    drs_object_id: &str,
    reference_name: Option<&str>,
    start: Option<i64>,
    end: Option<i64>,
) -> Result<FileVariants, OpError> {
    let cache_dir = htsget::staging_dir(config);
    let gen_obj = drs::get_genomic_object(store, &cache_dir, drs_object_id).await?;

    let records = match reference_name {
        Some(reference_name) => {
            let ref_name = store
                .get_contig_name_in_variantfile(reference_name, drs_object_id)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| reference_name.to_string());
            gen_obj.file.fetch(Some(&ref_name), start, end)
        }
        None => gen_obj.file.fetch(None, None, None),
    }
    .map_err(|e| {
        OpError::Integrity(format!(
            "error parsing vcf file for {}: {}",
            drs_object_id, e
        ))
    })?;

    let info_defs = records::parse_info_headers(&store.get_headers(drs_object_id).await?);

    let mut result = FileVariants {
        info_defs: info_defs.clone(),
        variants: vec![],
    };
    let file_samples = gen_obj.file.samples().to_vec();
    // Samples are reported under their canonical ids where the object maps
    // them.
    let canonical_samples: Vec<String> = file_samples
        .iter()
        .map(|name| {
            gen_obj
                .samples
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.clone())
        })
        .collect();
    for record in &records {
        if let Some(variant) =
            records::parse_variant_record(&record.line, &canonical_samples, &info_defs)
        {
            result.variants.push(variant);
        }
    }
    Ok(result)
}

/// Narrow to candidate variantfiles via the bucket index, then parse each
/// file's records in the region.  Files without matching records are
/// dropped.
pub async fn find_variants_in_region(
    store: &CatalogStore,
    config: &Config,
    reference_name: &str,
    start: Option<i64>,
    end: Option<i64>,
) -> Result<IndexMap<String, FileVariants>, OpError> {
    let normalized = store
        .normalize_contig(reference_name)
        .await
        .map_err(OpError::Internal)?;
    let Some(normalized) = normalized else {
        return Ok(IndexMap::new());
    };
    // Search for bases starting at the interbase half-a-base back.
    let search_start = start.map(|s| s - 1);
    let candidates = store
        .search(&SearchParams {
            region: Some(SearchRegion {
                reference_name: normalized.clone(),
                start: search_start,
                end,
            }),
            headers: None,
        })
        .await?;

    let mut result = IndexMap::new();
    for candidate in &candidates {
        let parsed = parse_vcf_file(
            store,
            config,
            &candidate.drs_object_id,
            Some(&normalized),
            search_start,
            end,
        )
        .await?;
        if !parsed.variants.is_empty() {
            result.insert(candidate.drs_object_id.clone(), parsed);
        }
    }
    Ok(result)
}

/// One VRS allele produced from a record, before resultset grouping.
#[derive(Debug, Clone, Default)]
struct VariationEntry {
    hgvsid: String,
    start: i64,
    end: i64,
    sequence: String,
    sequence_id: String,
    csq: Option<Vec<IndexMap<String, String>>>,
}

impl VariationEntry {
    fn to_variation_value(&self) -> Value {
        json!({
            "location": {
                "interval": {
                    "start": { "type": "Number", "value": self.start },
                    "end": { "type": "Number", "value": self.end },
                    "type": "SequenceInterval"
                },
                "type": "SequenceLocation",
                "sequence_id": self.sequence_id
            },
            "state": {
                "type": "LiteralSequenceExpression",
                "sequence": self.sequence
            },
            "type": "Allele"
        })
    }
}

/// Compile the ref and alt variations of one record, VRS-style.
async fn compile_variations_from_record(
    store: &CatalogStore,
    variant: &ParsedVariant,
    reference_genome: &str,
) -> Result<Vec<VariationEntry>, anyhow::Error> {
    let start = variant.pos;
    let normalized = store.normalize_contig(&variant.chrom).await?;
    let seqid = match normalized {
        Some(contig) => {
            store
                .get_refseq_for_chromosome(reference_genome, &contig)
                .await?
        }
        None => None,
    };
    let (sequence_id, hgvsid_base) = match &seqid {
        Some(seqid) => (format!("refseq:{}", seqid), format!("{}:g.{}", seqid, start)),
        None => (String::new(), String::new()),
    };

    let reference = VariationEntry {
        hgvsid: format!("{}=", hgvsid_base),
        // Interbase count, so start is from 0.
        start: start - 1,
        end: start,
        sequence: variant.ref_bases.clone(),
        sequence_id,
        csq: None,
    };
    let mut variations = vec![reference.clone()];

    static CN_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let cn_re =
        CN_RE.get_or_init(|| regex::Regex::new(r"<CN(\d+)>").expect("invalid CN regex"));
    for alt in &variant.alt {
        let mut variation = reference.clone();
        if variant.ref_bases.len() == 1 && alt.len() == 1 {
            variation.sequence = alt.clone();
            variation.hgvsid = format!("{}{}>{}", hgvsid_base, variant.ref_bases, alt);
        } else if let Some(captures) = cn_re.captures(alt) {
            let copynum: usize = captures[1].parse()?;
            variation.sequence = variant.ref_bases.repeat(copynum);
            variation.hgvsid = format!("{}{}[{}]", hgvsid_base, variant.ref_bases, copynum);
        } else {
            // TODO: notate other changes per https://varnomen.hgvs.org/recommendations/DNA/variant
            variation.sequence = alt.clone();
            variation.hgvsid = format!(
                "{}_{}delins{}",
                hgvsid_base,
                start + variant.ref_bases.len() as i64,
                alt
            );
        }
        variations.push(variation);
    }

    // Attach allele-wise CSQ annotations to their variations.
    if let Some(csq) = variant.info.get("CSQ") {
        if let Some(by_allele) = &csq.by_allele {
            let sequences: Vec<String> =
                variations.iter().map(|v| v.sequence.clone()).collect();
            for (allele, annotations) in by_allele {
                let index = if allele == "-" {
                    // VEP does not label alleles for deletions: it has to be
                    // the alt allele.
                    Some(1)
                } else if let Some(index) = sequences
                    .iter()
                    .position(|seq| *seq == format!("{}{}", sequences[0], allele))
                {
                    // VEP labels insertions as the allele without the ref.
                    Some(index)
                } else {
                    sequences.iter().position(|seq| seq == allele)
                };
                match index {
                    Some(index) => variations[index].csq = Some(annotations.clone()),
                    None => tracing::warn!(
                        "CSQ allele {} matches no variation of {}:{}",
                        allele,
                        variant.chrom,
                        variant.pos
                    ),
                }
            }
        }
    }

    Ok(variations)
}

/// A resultset entry under construction, keyed by its HGVS id.
#[derive(Debug, Clone, Default)]
struct ResultEntry {
    variation: Value,
    molecular_attributes: Option<Value>,
    case_level_data: Vec<Value>,
}

/// Table of VEP Consequence values from
/// https://grch37.ensembl.org/info/genome/variation/prediction/predicted_data.html
fn mol_effect_from_consequence(consequence: &str) -> Option<Value> {
    let id = match consequence {
        "transcript_ablation" => "SO:0001893",
        "splice_acceptor_variant" => "SO:0001574",
        "splice_donor_variant" => "SO:0001575",
        "stop_gained" => "SO:0001587",
        "frameshift_variant" => "SO:0001589",
        "stop_lost" => "SO:0001578",
        "start_lost" => "SO:0002012",
        "transcript_amplification" => "SO:0001889",
        "inframe_insertion" => "SO:0001821",
        "inframe_deletion" => "SO:0001822",
        "missense_variant" => "SO:0001583",
        "protein_altering_variant" => "SO:0001818",
        "splice_region_variant" => "SO:0001630",
        "incomplete_terminal_codon_variant" => "SO:0001626",
        "start_retained_variant" => "SO:0002019",
        "stop_retained_variant" => "SO:0001567",
        "synonymous_variant" => "SO:0001819",
        "coding_sequence_variant" => "SO:0001580",
        "mature_miRNA_variant" => "SO:0001620",
        "5_prime_UTR_variant" => "SO:0001623",
        "3_prime_UTR_variant" => "SO:0001624",
        "non_coding_transcript_exon_variant" => "SO:0001792",
        "intron_variant" => "SO:0001627",
        "NMD_transcript_variant" => "SO:0001621",
        "non_coding_transcript_variant" => "SO:0001619",
        "upstream_gene_variant" => "SO:0001631",
        "downstream_gene_variant" => "SO:0001632",
        "TFBS_ablation" => "SO:0001895",
        "TFBS_amplification" => "SO:0001892",
        "TF_binding_site_variant" => "SO:0001782",
        "regulatory_region_ablation" => "SO:0001894",
        "regulatory_region_amplification" => "SO:0001891",
        "feature_elongation" => "SO:0001907",
        "regulatory_region_variant" => "SO:0001566",
        "feature_truncation" => "SO:0001906",
        "intergenic_variant" => "SO:0001628",
        _ => return None,
    };
    Some(json!({ "id": id, "label": consequence }))
}

/// Derive gene ids and molecular effects from a variation's CSQ entries.
fn molecular_attributes_from_csq(annotations: &[IndexMap<String, String>]) -> Value {
    let mut gene_ids = std::collections::BTreeSet::new();
    let mut effects = std::collections::BTreeSet::new();
    for csq in annotations {
        for key in ["HGNC_ID", "SYMBOL", "Gene"] {
            if let Some(value) = csq.get(key) {
                gene_ids.insert(value.clone());
            }
        }
        if let Some(consequence) = csq.get("Consequence") {
            for effect in consequence.split('&') {
                effects.insert(effect.to_string());
            }
        }
    }
    let mut attributes = serde_json::Map::new();
    if !gene_ids.is_empty() {
        attributes.insert(
            "geneIds".to_string(),
            json!(gene_ids.into_iter().collect::<Vec<_>>()),
        );
    }
    let effects: Vec<Value> = effects
        .iter()
        .filter_map(|effect| mol_effect_from_consequence(effect))
        .collect();
    if !effects.is_empty() {
        attributes.insert("molecularEffects".to_string(), json!(effects));
    }
    Value::Object(attributes)
}

/// Assemble the VRS allele resultset from the per-file parsed variants.
///
/// Case-level data is derived from each sample's GT; sample and analysis
/// identifiers are attached only when the requester is authorized on the
/// file's cohort.
async fn compile_beacon_resultset(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    variants_by_file: &IndexMap<String, FileVariants>,
    reference_genome: &str,
) -> Result<Vec<Value>, anyhow::Error> {
    let mut resultset: IndexMap<String, ResultEntry> = IndexMap::new();
    let mut order: Vec<String> = Vec::new();

    for (drs_object_id, file_variants) in variants_by_file {
        let is_authed = gate.is_authed(drs_object_id, ctx).await == 200;
        let Some(varfile) = store.get_variantfile(drs_object_id).await? else {
            continue;
        };
        if varfile.reference_genome != reference_genome {
            continue;
        }

        for variant in &file_variants.variants {
            let variations =
                compile_variations_from_record(store, variant, reference_genome).await?;
            let allele_ids: Vec<String> =
                variations.iter().map(|v| v.hgvsid.clone()).collect();

            for variation in &variations {
                if !resultset.contains_key(&variation.hgvsid) {
                    order.push(variation.hgvsid.clone());
                    resultset.insert(
                        variation.hgvsid.clone(),
                        ResultEntry {
                            variation: variation.to_variation_value(),
                            molecular_attributes: None,
                            case_level_data: vec![],
                        },
                    );
                }
                if let Some(annotations) = &variation.csq {
                    let entry = resultset
                        .get_mut(&variation.hgvsid)
                        .expect("entry was just inserted");
                    if entry.molecular_attributes.is_none() {
                        entry.molecular_attributes =
                            Some(molecular_attributes_from_csq(annotations));
                    }
                }
            }

            for (sample_name, fields) in &variant.samples {
                let Some(gt) = fields.get("GT") else { continue };
                let mut alleles: Vec<&str> = gt.split('/').collect();
                if alleles.len() < 2 {
                    alleles = gt.split('|').collect();
                }
                if alleles.len() < 2 {
                    continue;
                }
                let parsed: Vec<Option<usize>> = alleles
                    .iter()
                    .map(|allele| allele.parse::<usize>().ok())
                    .collect();

                let mut genotype = serde_json::Map::new();
                genotype.insert("value".to_string(), json!(gt));
                if let (Some(a), Some(b)) = (parsed[0], parsed[1]) {
                    if a < allele_ids.len() && b < allele_ids.len() {
                        genotype.insert(
                            "secondaryAlleleIds".to_string(),
                            json!([allele_ids[a], allele_ids[b]]),
                        );
                    }
                }
                let mut cld = serde_json::Map::new();
                cld.insert("genotype".to_string(), Value::Object(genotype));
                if is_authed {
                    cld.insert("analysisId".to_string(), json!(drs_object_id));
                    cld.insert("biosampleId".to_string(), json!(sample_name));
                }

                if alleles[0] == alleles[1] {
                    let mut cld = cld.clone();
                    let genotype = cld
                        .get_mut("genotype")
                        .and_then(Value::as_object_mut)
                        .expect("genotype was just inserted");
                    genotype.insert(
                        "zygosity".to_string(),
                        json!({ "id": "GENO:0000136", "label": "homozygous" }),
                    );
                    genotype.remove("secondaryAlleleIds");
                    if let Some(index) = parsed[0] {
                        if let Some(hgvsid) = allele_ids.get(index) {
                            resultset
                                .get_mut(hgvsid)
                                .expect("alleles were inserted above")
                                .case_level_data
                                .push(Value::Object(cld));
                        }
                    }
                } else {
                    let zygosity = if alleles[0] == "0" || alleles[1] == "0" {
                        json!({ "id": "GENO:0000458", "label": "simple heterozygous" })
                    } else {
                        json!({ "id": "GENO:0000402", "label": "compound heterozygous" })
                    };
                    for allele in &parsed {
                        let Some(index) = allele else { continue };
                        let Some(hgvsid) = allele_ids.get(*index) else {
                            continue;
                        };
                        // This allele keeps only the other allele under
                        // secondaryAlleleIds.
                        let mut second_cld = cld.clone();
                        let genotype = second_cld
                            .get_mut("genotype")
                            .and_then(Value::as_object_mut)
                            .expect("genotype was just inserted");
                        genotype.insert("zygosity".to_string(), zygosity.clone());
                        if let Some(Value::Array(ids)) = genotype.get_mut("secondaryAlleleIds")
                        {
                            ids.retain(|id| id.as_str() != Some(hgvsid.as_str()));
                        }
                        resultset
                            .get_mut(hgvsid)
                            .expect("alleles were inserted above")
                            .case_level_data
                            .push(Value::Object(second_cld));
                    }
                }
            }
        }
    }

    // Only variations actually seen in samples survive; bare ref alleles
    // are pruned.
    let mut final_resultset = Vec::new();
    for hgvsid in &order {
        let entry = &resultset[hgvsid];
        if entry.case_level_data.is_empty() {
            continue;
        }
        let mut value = serde_json::Map::new();
        value.insert("variantInternalId".to_string(), json!(hgvsid));
        value.insert("variation".to_string(), entry.variation.clone());
        value.insert(
            "identifiers".to_string(),
            json!({ "genomicHGVSId": hgvsid }),
        );
        value.insert(
            "caseLevelData".to_string(),
            Value::Array(entry.case_level_data.clone()),
        );
        if let Some(attributes) = &entry.molecular_attributes {
            value.insert("molecularAttributes".to_string(), attributes.clone());
        }
        final_resultset.push(Value::Object(value));
    }
    Ok(final_resultset)
}

fn error_envelope(meta: Value, message: &str) -> Value {
    json!({
        "error": {
            "errorMessage": message,
            "errorCode": 404
        },
        "meta": meta
    })
}

/// `POST /beacon/v2/g_variants` (and the GET parameter form): run a Beacon
/// search and assemble the v2 response envelope.
pub async fn search(
    store: &CatalogStore,
    gate: &AuthzGate,
    ctx: &RequestContext,
    config: &Config,
    request: &BeaconRequest,
) -> Result<Value, OpError> {
    let params = &request.query.request_parameters;
    let granularity = request
        .requested_granularity
        .clone()
        .unwrap_or_else(|| "record".to_string());

    let mut received = serde_json::to_value(params).map_err(|e| anyhow::anyhow!("{}", e))?;
    let mut meta = json!({
        "apiVersion": API_VERSION,
        "beaconId": BEACON_ID,
        "receivedRequestSummary": {
            "apiVersion": API_VERSION,
            "requestedSchemas": schema(),
            "requestedGranularity": granularity,
        },
        "returnedSchemas": schema(),
        "returnedGranularity": granularity,
    });
    if let Some(pagination) = &request.pagination {
        meta["receivedRequestSummary"]["pagination"] = pagination.clone();
    }

    let mut reference_genome = params
        .assembly_id
        .clone()
        .unwrap_or_else(|| "hg38".to_string());
    let mut reference_name = params.reference_name.clone();
    // Multi-element start/end arrays are unspecified; only element 0 is
    // consulted.
    let mut start = params.start.as_ref().and_then(|s| s.first().copied());
    let mut end = params.end.as_ref().and_then(|e| e.first().copied());
    let mut ref_filter = params.reference_bases.clone();
    let mut alt_filter = params.alternate_bases.clone();

    if let Some(gene_id) = &params.gene_id {
        let genes = store
            .search_refseqs(&gene_id.to_uppercase(), RefseqField::GeneName)
            .await?;
        if genes.is_empty() {
            received["gene_id"] = json!(gene_id);
            meta["receivedRequestSummary"]["requestParameters"] = received;
            return Ok(error_envelope(
                meta,
                &format!("no region was found for geneId {}", gene_id),
            ));
        }
        for gene in &genes {
            if gene.reference_genome == reference_genome {
                reference_name = store
                    .normalize_contig(&gene.contig)
                    .await
                    .map_err(OpError::Internal)?;
                start = Some(gene.start);
                end = Some(gene.endpos);
                break;
            }
        }
    }

    if let Some(allele) = &params.genomic_allele_short_form {
        let location = hgvs::convert_hgvsid_to_location(store, allele, &reference_genome)
            .await
            .map_err(OpError::Internal)?;
        if let Some(location) = location {
            reference_name = Some(location.reference_name.clone());
            start = Some(location.start);
            end = Some(location.end);
            if let Some(genome) = &location.reference_genome {
                reference_genome = genome.clone();
            }
            if let Some(ref_bases) = &location.ref_bases {
                ref_filter = Some(ref_bases.clone());
            }
            if let Some(alt_bases) = &location.alt_bases {
                alt_filter = Some(alt_bases.clone());
            }
        }
    }

    received["reference_genome"] = json!(reference_genome);
    if let Some(reference_name) = &reference_name {
        received["reference_name"] = json!(reference_name);
    }
    meta["receivedRequestSummary"]["requestParameters"] = received;

    let Some(reference_name) = reference_name else {
        return Ok(error_envelope(meta, "no referenceName was provided"));
    };

    // With no end specified, assume the end is the same as the start.
    let end = end.or(start);

    let variants_by_file =
        find_variants_in_region(store, config, &reference_name, start, end).await?;
    let mut resultset = compile_beacon_resultset(
        store,
        gate,
        ctx,
        &variants_by_file,
        &reference_genome,
    )
    .await
    .map_err(OpError::Internal)?;

    // Exact-position queries keep only the allele at that interval.
    if let (Some(start), Some(end)) = (start, end) {
        if start == end {
            resultset.retain(|variant| {
                variant["variation"]["location"]["interval"]["start"]["value"]
                    == json!(start - 1)
                    && variant["variation"]["location"]["interval"]["end"]["value"]
                        == json!(end)
            });
        }
    }
    if let Some(alt) = &alt_filter {
        resultset.retain(|variant| {
            let internal_id = variant["variantInternalId"].as_str().unwrap_or_default();
            if internal_id.ends_with('=') {
                // Ref alleles are never filtered out by the alt filter.
                return true;
            }
            let sequence = variant["variation"]["state"]["sequence"]
                .as_str()
                .unwrap_or_default();
            hgvs::seq_match(sequence, alt)
        });
    }
    if let Some(ref_bases) = &ref_filter {
        resultset.retain(|variant| {
            let internal_id = variant["variantInternalId"].as_str().unwrap_or_default();
            if !internal_id.ends_with('=') {
                return true;
            }
            let sequence = variant["variation"]["state"]["sequence"]
                .as_str()
                .unwrap_or_default();
            hgvs::seq_match(sequence, ref_bases)
        });
    }
    if params.variant_min_length.is_some() || params.variant_max_length.is_some() {
        let min = params.variant_min_length.unwrap_or(0);
        let max = params.variant_max_length.unwrap_or(i64::MAX);
        resultset.retain(|variant| {
            let internal_id = variant["variantInternalId"].as_str().unwrap_or_default();
            if internal_id.ends_with('=') {
                return true;
            }
            let length = variant["variation"]["state"]["sequence"]
                .as_str()
                .map(|sequence| sequence.len() as i64)
                .unwrap_or(0);
            length >= min && length <= max
        });
    }

    let mut response = json!({
        "meta": meta,
        "responseSummary": {
            "exists": !resultset.is_empty(),
            "numTotalResults": resultset.len(),
        }
    });

    // One handover per variantfile the requester may actually stream.
    let mut handovers = Vec::new();
    for drs_object_id in variants_by_file.keys() {
        match htsget::get_urls(
            store,
            gate,
            ctx,
            config,
            FileType::Variant,
            drs_object_id,
            Some(&reference_name),
            start,
            end,
            None,
        )
        .await
        {
            Ok(ticket) => {
                let mut handover =
                    serde_json::to_value(&ticket).map_err(|e| anyhow::anyhow!("{}", e))?;
                handover["handoverType"] = json!({ "id": "CUSTOM", "label": "HTSGET" });
                handovers.push(handover);
            }
            Err(e) => {
                tracing::debug!("no handover for {}: {}", drs_object_id, e);
            }
        }
    }
    if handovers.is_empty() {
        response["meta"]["returnedGranularity"] = json!("count");
    } else {
        response["beaconHandovers"] = Value::Array(handovers);
        response["response"] = Value::Array(resultset);
    }

    Ok(response)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::refseq::test::seed_refseqs;
    use crate::catalog::test_store;

    fn variant(chrom: &str, pos: i64, ref_bases: &str, alt: &str, gts: &[&str]) -> ParsedVariant {
        let mut samples = IndexMap::new();
        for (i, gt) in gts.iter().enumerate() {
            let mut fields = IndexMap::new();
            fields.insert("GT".to_string(), gt.to_string());
            samples.insert(format!("sample{}", i), fields);
        }
        ParsedVariant {
            chrom: chrom.to_string(),
            pos,
            id: ".".to_string(),
            ref_bases: ref_bases.to_string(),
            alt: alt.split(',').map(String::from).collect(),
            qual: ".".to_string(),
            filter: "PASS".to_string(),
            samples,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn variations_for_snp() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        seed_refseqs(&store).await;

        let variations = compile_variations_from_record(
            &store,
            &variant("chr21", 5030847, "T", "A", &[]),
            "hg38",
        )
        .await?;
        assert_eq!(variations.len(), 2);
        assert_eq!(variations[0].hgvsid, "NC_000021.9:g.5030847=");
        assert_eq!(variations[1].hgvsid, "NC_000021.9:g.5030847T>A");
        assert_eq!(variations[0].start, 5030846);
        assert_eq!(variations[0].end, 5030847);
        assert_eq!(variations[1].sequence, "A");
        assert_eq!(variations[0].sequence_id, "refseq:NC_000021.9");
        Ok(())
    }

    #[tokio::test]
    async fn variations_for_cnv_and_delins() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        seed_refseqs(&store).await;

        let variations = compile_variations_from_record(
            &store,
            &variant("chr21", 5030900, "AT", "<CN3>,AGGG", &[]),
            "hg38",
        )
        .await?;
        assert_eq!(variations.len(), 3);
        assert_eq!(variations[1].hgvsid, "NC_000021.9:g.5030900AT[3]");
        assert_eq!(variations[1].sequence, "ATATAT");
        assert_eq!(
            variations[2].hgvsid,
            "NC_000021.9:g.5030900_5030902delinsAGGG"
        );
        Ok(())
    }

    #[tokio::test]
    async fn resultset_zygosity_and_pruning() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        seed_refseqs(&store).await;
        store
            .create_drs_object(&crate::catalog::drs::test::genomic_object(
                "NA18537",
                "test-htsget",
            ))
            .await?;

        let config = crate::config::Config {
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
        };
        let gate = AuthzGate::new(store.clone(), &config);
        let ctx = RequestContext::default();

        let mut variants_by_file = IndexMap::new();
        variants_by_file.insert(
            "NA18537".to_string(),
            FileVariants {
                info_defs: vec![],
                variants: vec![variant(
                    "chr21",
                    5030847,
                    "T",
                    "A",
                    &["0/1", "1/1", "./."],
                )],
            },
        );

        let resultset =
            compile_beacon_resultset(&store, &gate, &ctx, &variants_by_file, "hg38").await?;
        // Ref allele (from the het) and alt allele both carry case-level
        // data; the no-call sample contributes nothing.
        assert_eq!(resultset.len(), 2);

        let alt = resultset
            .iter()
            .find(|v| v["variantInternalId"] == json!("NC_000021.9:g.5030847T>A"))
            .unwrap();
        let cld = alt["caseLevelData"].as_array().unwrap();
        // One het contribution plus one hom-alt contribution.
        assert_eq!(cld.len(), 2);
        let het = cld
            .iter()
            .find(|c| c["genotype"]["value"] == json!("0/1"))
            .unwrap();
        assert_eq!(het["genotype"]["zygosity"]["id"], json!("GENO:0000458"));
        assert_eq!(
            het["genotype"]["secondaryAlleleIds"],
            json!(["NC_000021.9:g.5030847="])
        );
        let hom = cld
            .iter()
            .find(|c| c["genotype"]["value"] == json!("1/1"))
            .unwrap();
        assert_eq!(hom["genotype"]["zygosity"]["id"], json!("GENO:0000136"));
        assert!(hom["genotype"].get("secondaryAlleleIds").is_none());
        // Authorization is disabled in this test config, so sample ids are
        // included.
        assert_eq!(het["biosampleId"], json!("sample0"));
        Ok(())
    }

    #[tokio::test]
    async fn search_without_reference_name_is_an_error_envelope() -> Result<(), anyhow::Error> {
        let store = test_store().await;
        let config = crate::config::Config {
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
        };
        let gate = AuthzGate::new(store.clone(), &config);
        let ctx = RequestContext::default();

        let response = search(&store, &gate, &ctx, &config, &BeaconRequest::default()).await?;
        assert_eq!(
            response["error"]["errorMessage"],
            json!("no referenceName was provided")
        );
        assert_eq!(response["error"]["errorCode"], json!(404));
        assert!(response["meta"]["beaconId"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn beacon_request_accepts_camel_case() {
        let body = serde_json::json!({
            "query": {
                "requestParameters": {
                    "start": [5030000],
                    "end": [5030847],
                    "assemblyId": "hg38",
                    "referenceName": "21"
                }
            },
            "requestedGranularity": "record"
        });
        let request: BeaconRequest = serde_json::from_value(body).unwrap();
        assert_eq!(
            request.query.request_parameters.reference_name.as_deref(),
            Some("21")
        );
        assert_eq!(
            request.query.request_parameters.assembly_id.as_deref(),
            Some("hg38")
        );
        assert_eq!(request.query.request_parameters.start, Some(vec![5030000]));
    }
}
