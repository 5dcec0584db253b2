//! HGVS short-form parsing and IUPAC-aware sequence matching.

use std::sync::OnceLock;

use regex::Regex;

use crate::catalog::refseq::RefseqField;
use crate::catalog::CatalogStore;

/// The kind of sequence change described by an HGVS short form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HgvsKind {
    Sub,
    Del,
    Ins,
    Dup,
    Inv,
    Delins,
    Rep,
}

/// A genomic location resolved from an HGVS short form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HgvsLocation {
    pub reference_name: String,
    pub start: i64,
    pub end: i64,
    pub ref_bases: Option<String>,
    pub alt_bases: Option<String>,
    pub reference_genome: Option<String>,
    pub kind: HgvsKind,
}

fn hgvs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(.+):[gc].(\d+)(.+)").expect("invalid HGVS regex"))
}

/// Resolve an HGVS short form (e.g. `NC_000021.9:g.5030847T>A`) to a
/// location via the refseq table.  Returns `None` when the sequence id or
/// the change notation is unknown.
pub async fn convert_hgvsid_to_location(
    store: &CatalogStore,
    hgvsid: &str,
    reference_genome: &str,
) -> Result<Option<HgvsLocation>, anyhow::Error> {
    let Some(captures) = hgvs_re().captures(hgvsid) else {
        return Ok(None);
    };
    let seqid = &captures[1];
    let position: i64 = captures[2].parse()?;
    let change = captures[3].to_string();

    let genes = store
        .search_refseqs(seqid, RefseqField::TranscriptName)
        .await?;
    if genes.is_empty() {
        return Ok(None);
    }

    let (reference_name, start, resolved_genome) = if genes.len() > 1 {
        let mut resolved = None;
        for gene in &genes {
            if gene.reference_genome != reference_genome {
                continue;
            }
            let Some(contig) = store.normalize_contig(&gene.contig).await? else {
                continue;
            };
            // Transcript coordinates are offsets from the gene start.
            resolved = Some((contig, gene.start + position, None));
            break;
        }
        match resolved {
            Some(resolved) => resolved,
            None => return Ok(None),
        }
    } else {
        // A chromosome accession; these belong to only one reference genome.
        let gene = &genes[0];
        let Some(contig) = store.normalize_contig(&gene.contig).await? else {
            return Ok(None);
        };
        (contig, position, Some(gene.reference_genome.clone()))
    };

    let mut location = HgvsLocation {
        reference_name,
        start,
        end: start,
        ref_bases: None,
        alt_bases: None,
        reference_genome: resolved_genome,
        kind: HgvsKind::Sub,
    };

    static SUB_RE: OnceLock<Regex> = OnceLock::new();
    let sub_re = SUB_RE.get_or_init(|| Regex::new(r"([A-Z]+)[>=]([A-Z]*)").expect("regex"));
    if let Some(captures) = sub_re.captures(&change) {
        let ref_bases = captures[1].to_string();
        location.end = location.start + ref_bases.len() as i64;
        location.ref_bases = Some(ref_bases);
        let alt = captures[2].to_string();
        location.alt_bases = if alt.is_empty() { None } else { Some(alt) };
        location.kind = HgvsKind::Sub;
        return Ok(Some(location));
    }

    static DEL_RE: OnceLock<Regex> = OnceLock::new();
    let del_re = DEL_RE.get_or_init(|| Regex::new(r"_(\d+)del$").expect("regex"));
    if let Some(captures) = del_re.captures(&change) {
        // VCF notates deletions as starting the base before, with the ref as
        // the sequence including the deleted bases.
        location.start -= 1;
        location.end = captures[1].parse()?;
        location.ref_bases = Some("N".repeat((location.end - location.start).max(0) as usize));
        location.alt_bases = Some("N".to_string());
        location.kind = HgvsKind::Del;
        return Ok(Some(location));
    }

    static DELINS_RE: OnceLock<Regex> = OnceLock::new();
    let delins_re = DELINS_RE.get_or_init(|| Regex::new(r"_(\d+)delins([A-Z]+)").expect("regex"));
    if let Some(captures) = delins_re.captures(&change) {
        location.alt_bases = Some(captures[2].to_string());
        location.end = captures[1].parse()?;
        location.ref_bases = Some("N".repeat((location.end - location.start).max(0) as usize));
        location.kind = HgvsKind::Delins;
        return Ok(Some(location));
    }

    static INS_RE: OnceLock<Regex> = OnceLock::new();
    let ins_re = INS_RE.get_or_init(|| Regex::new(r"_(\d+)ins([A-Z]+)").expect("regex"));
    if let Some(captures) = ins_re.captures(&change) {
        // VCF notates insertions as starting the base before, with the alt
        // as the leading ref base plus the inserted sequence.
        let inserted = captures[2].to_string();
        location.start -= 1;
        location.ref_bases = Some(format!("N{}", &inserted[..1]));
        location.alt_bases = Some(format!("N{}", inserted));
        location.end = location.start + inserted.len() as i64 + 2;
        location.kind = HgvsKind::Ins;
        return Ok(Some(location));
    }

    static DUP_RE: OnceLock<Regex> = OnceLock::new();
    let dup_re = DUP_RE.get_or_init(|| Regex::new(r"_(\d+)dup").expect("regex"));
    if let Some(captures) = dup_re.captures(&change) {
        let dup_end: i64 = captures[1].parse()?;
        location.end = (dup_end * 2) - location.start;
        location.kind = HgvsKind::Dup;
        return Ok(Some(location));
    }

    static INV_RE: OnceLock<Regex> = OnceLock::new();
    let inv_re = INV_RE.get_or_init(|| Regex::new(r"_(\d+)inv").expect("regex"));
    if let Some(captures) = inv_re.captures(&change) {
        location.end = captures[1].parse()?;
        location.kind = HgvsKind::Inv;
        return Ok(Some(location));
    }

    static REP_RE: OnceLock<Regex> = OnceLock::new();
    let rep_re = REP_RE.get_or_init(|| Regex::new(r"([A-Z]+)\[(\d+)\]").expect("regex"));
    if let Some(captures) = rep_re.captures(&change) {
        let unit = captures[1].to_string();
        let count: usize = captures[2].parse()?;
        location.end = location.start + unit.len() as i64;
        location.alt_bases = Some(unit.repeat(count));
        location.ref_bases = Some(unit);
        location.kind = HgvsKind::Rep;
        return Ok(Some(location));
    }

    Ok(None)
}

/// Whether two base strings can denote the same sequence once IUPAC
/// ambiguity codes are expanded.
pub fn seq_match(a: &str, b: &str) -> bool {
    let lhs: std::collections::HashSet<String> = expand_iupac(a).into_iter().collect();
    let rhs: std::collections::HashSet<String> = expand_iupac(b).into_iter().collect();
    lhs.intersection(&rhs).next().is_some()
}

/// Expand IUPAC ambiguity codes into all denoted concrete sequences.
pub fn expand_iupac(base_str: &str) -> Vec<String> {
    let Some(index) = base_str
        .char_indices()
        .find(|(_, c)| "RYSWKMBDHVN".contains(*c))
        .map(|(index, _)| index)
    else {
        return vec![base_str.to_string()];
    };
    let prefix = &base_str[..index];
    let suffix = &base_str[index + 1..];
    let ambiguous = base_str[index..].chars().next().expect("index is valid");
    let expansions: &[char] = match ambiguous {
        'R' => &['A', 'G'],
        'Y' => &['C', 'T'],
        'S' => &['G', 'C'],
        'W' => &['A', 'T'],
        'K' => &['G', 'T'],
        'M' => &['A', 'C'],
        'B' => &['A', 'G', 'T'],
        'D' => &['C', 'G', 'T'],
        'H' => &['A', 'C', 'T'],
        'V' => &['A', 'C', 'G'],
        'N' => &['A', 'C', 'G', 'T'],
        _ => unreachable!("checked ambiguity char"),
    };
    let mut result = Vec::new();
    for base in expansions {
        result.extend(expand_iupac(&format!("{}{}{}", prefix, base, suffix)));
    }
    result
}
