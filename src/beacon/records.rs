//! Line-level parsing of VCF records and header metadata for Beacon
//! resultset assembly.
//!
//! Works on the textual record form so that INFO typing follows the file's
//! own declared headers (plus the reserved set from the VCF spec).

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;

/// An INFO field definition from the header (or the reserved table).
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct InfoDef {
    pub id: String,
    pub number: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub description: String,
}

/// A typed INFO value attached to a parsed record.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize)]
pub struct InfoField {
    pub number: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub description: String,
    #[serde(rename = "value")]
    pub values: Vec<String>,
    /// VEP annotations expanded allele-wise; set only for `CSQ`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_allele: Option<IndexMap<String, Vec<IndexMap<String, String>>>>,
}

/// A VCF record split into its columns, with typed INFO and per-sample
/// FORMAT fields.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize)]
pub struct ParsedVariant {
    pub chrom: String,
    pub pos: i64,
    pub id: String,
    #[serde(rename = "ref")]
    pub ref_bases: String,
    pub alt: Vec<String>,
    pub qual: String,
    pub filter: String,
    pub info: IndexMap<String, InfoField>,
    pub samples: IndexMap<String, IndexMap<String, String>>,
}

fn vcf_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(.+?)\t(.+?)\t(.+?)\t(.+?)\t(.+?)\t(.+?)\t(.+?)\t(.+?)\t(.+)")
            .expect("invalid VCF line regex")
    })
}

fn meta_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"##(.+?)=(.+)").expect("invalid meta line regex"))
}

/// Reserved INFO definitions from the VCF spec, always recognized.
const RESERVED_INFO: &[(&str, &str, &str, &str)] = &[
    ("AA", "1", "String", "Ancestral allele"),
    (
        "AC",
        "A",
        "Integer",
        "Allele count in genotypes, for each ALT allele, in the same order as listed",
    ),
    ("AD", "R", "Integer", "Total read depth for each allele"),
    (
        "ADF",
        "R",
        "Integer",
        "Read depth for each allele on the forward strand",
    ),
    (
        "ADR",
        "R",
        "Integer",
        "Read depth for each allele on the reverse strand",
    ),
    (
        "AF",
        "A",
        "Float",
        "Allele frequency for each ALT allele in the same order as listed (estimated from primary data, not called genotypes)",
    ),
    ("AN", "1", "Integer", "Total number of alleles in called genotypes"),
    ("BQ", "1", "Float", "RMS base quality"),
    (
        "CIGAR",
        "A",
        "String",
        "Cigar string describing how to align an alternate allele to the reference allele",
    ),
    ("DB", "0", "Flag", "dbSNP membership"),
    ("DP", "1", "Integer", "Combined depth across samples"),
    (
        "END",
        "1",
        "Integer",
        "End position on CHROM (used with symbolic alleles; see below)",
    ),
    ("H2", "0", "Flag", "HapMap2 membership"),
    ("H3", "0", "Flag", "HapMap3 membership"),
    ("MQ", "1", "Float", "RMS mapping quality"),
    ("MQ0", "1", "Integer", "Number of MAPQ == 0 reads"),
    ("NS", "1", "Integer", "Number of samples with data"),
    ("SB", "4", "Integer", "Strand bias"),
    ("SOMATIC", "0", "Flag", "Somatic mutation (for cancer genomics)"),
    ("VALIDATED", "0", "Flag", "Validated by follow-up experiment"),
    ("1000G", "0", "Flag", "1000 Genomes membership"),
];

/// Parse the `##INFO=<...>` definitions out of stored header lines.
pub fn parse_info_headers(headers: &[String]) -> Vec<InfoDef> {
    let mut defs = Vec::new();
    for line in headers {
        let Some(captures) = meta_line_re().captures(line.trim()) else {
            continue;
        };
        if &captures[1] != "INFO" {
            continue;
        }
        let fields = parse_structured_value(&captures[2]);
        let Some(fields) = fields else { continue };
        defs.push(InfoDef {
            id: fields.get("ID").cloned().unwrap_or_default(),
            number: fields.get("Number").cloned().unwrap_or_default(),
            type_: fields.get("Type").cloned().unwrap_or_default(),
            description: fields.get("Description").cloned().unwrap_or_default(),
        });
    }
    defs
}

/// Parse a structured header value `<K=V,K="quoted, value",...>`, honoring
/// quoted values with embedded commas and escaped quotes.
pub fn parse_structured_value(text: &str) -> Option<IndexMap<String, String>> {
    let text = text.strip_prefix('<')?;
    let text = text.strip_suffix('>').unwrap_or(text);
    let mut fields = IndexMap::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_key = true;
    let mut in_quotes = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_key {
            if c == '=' {
                in_key = false;
            } else {
                key.push(c);
            }
            continue;
        }
        if in_quotes {
            if escaped {
                value.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            } else {
                value.push(c);
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => {
                fields.insert(std::mem::take(&mut key), std::mem::take(&mut value));
                in_key = true;
            }
            _ => value.push(c),
        }
    }
    if !key.is_empty() {
        fields.insert(key, value);
    }
    Some(fields)
}

/// Type the raw INFO column against the declared and reserved definitions.
pub fn process_info_fields(text: &str, info_defs: &[InfoDef]) -> IndexMap<String, InfoField> {
    let mut defs: IndexMap<&str, InfoDef> = RESERVED_INFO
        .iter()
        .map(|(id, number, type_, description)| {
            (
                *id,
                InfoDef {
                    id: id.to_string(),
                    number: number.to_string(),
                    type_: type_.to_string(),
                    description: description.to_string(),
                },
            )
        })
        .collect();
    for def in info_defs {
        defs.insert(def.id.as_str(), def.clone());
    }

    let mut result = IndexMap::new();
    for piece in text.split(';') {
        let mut kv = piece.splitn(2, '=');
        let key = kv.next().unwrap_or_default();
        let Some(def) = defs.get(key) else { continue };
        let mut field = InfoField {
            number: def.number.clone(),
            type_: def.type_.clone(),
            description: def.description.clone(),
            values: vec![],
            by_allele: None,
        };
        if let Some(raw) = kv.next() {
            if field.number == "1" {
                field.values = vec![raw.to_string()];
            } else {
                field.values = raw.split(',').map(String::from).collect();
            }
        }
        result.insert(key.to_string(), field);
    }

    // CSQ (VEP annotation) is expanded allele-wise using the Format: list
    // declared in its own description.
    if let Some(csq) = result.get_mut("CSQ") {
        if let Some(csq_def) = defs.get("CSQ") {
            if let Some(by_allele) = parse_vep_annotation(&csq.values, &csq_def.description) {
                csq.by_allele = Some(by_allele);
                csq.number = "K".to_string();
                csq.description = "Consequence annotations from Ensembl VEP.".to_string();
            }
        }
    }

    result
}

/// Expand VEP CSQ entries into per-allele annotation maps, using the
/// `Format:` substring of the CSQ description.
pub fn parse_vep_annotation(
    values: &[String],
    csq_description: &str,
) -> Option<IndexMap<String, Vec<IndexMap<String, String>>>> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let format_re =
        RE.get_or_init(|| Regex::new(r".+Format: (.+)").expect("invalid CSQ format regex"));
    let captures = format_re.captures(csq_description)?;
    let csq_parts: Vec<&str> = captures.get(1)?.as_str().split('|').collect();

    let mut result: IndexMap<String, Vec<IndexMap<String, String>>> = IndexMap::new();
    for value in values {
        let mut annotation = IndexMap::new();
        let pieces: Vec<&str> = value.split('|').collect();
        if pieces.len() <= csq_parts.len() {
            for (part, piece) in csq_parts.iter().zip(pieces.iter()) {
                if !piece.is_empty() {
                    annotation.insert(part.to_string(), piece.to_string());
                }
            }
        }
        let allele = annotation
            .get("Allele")
            .cloned()
            .unwrap_or_default();
        result.entry(allele).or_default().push(annotation);
    }
    Some(result)
}

/// Parse one VCF record line.  `samples` carries the canonical sample ids in
/// column order; `info_defs` types the INFO column.
pub fn parse_variant_record(
    record: &str,
    samples: &[String],
    info_defs: &[InfoDef],
) -> Option<ParsedVariant> {
    let captures = vcf_line_re().captures(record)?;
    let mut variant = ParsedVariant {
        chrom: captures[1].to_string(),
        pos: captures[2].parse().ok()?,
        id: captures[3].to_string(),
        ref_bases: captures[4].to_string(),
        alt: captures[5].split(',').map(String::from).collect(),
        qual: captures[6].to_string(),
        filter: captures[7].to_string(),
        ..Default::default()
    };

    // Column 9 holds FORMAT plus one column per sample.
    let tail = captures[9].to_string();
    let mut columns = tail.split('\t');
    if let Some(format_column) = columns.next() {
        let format_keys: Vec<&str> = format_column.split(':').collect();
        for sample in samples {
            let Some(sample_column) = columns.next() else {
                break;
            };
            let mut fields = IndexMap::new();
            let mut parts = sample_column.split(':');
            for key in &format_keys {
                let Some(part) = parts.next() else { break };
                fields.insert(key.to_string(), part.to_string());
            }
            variant.samples.insert(sample.clone(), fields);
        }
    }

    variant.info = process_info_fields(&captures[8], info_defs);
    Some(variant)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    const RECORD: &str = "chr21\t5030551\t.\tA\tC\t.\tPASS\tDP=100;SOMATIC;AF=0.5\tGT:DP\t0/0:55\t0/1:90";

    #[test]
    fn parse_record_columns() {
        let samples = vec!["Patient_1".to_string(), "Patient_2".to_string()];
        let variant = parse_variant_record(RECORD, &samples, &[]).unwrap();

        assert_eq!(variant.chrom, "chr21");
        assert_eq!(variant.pos, 5030551);
        assert_eq!(variant.ref_bases, "A");
        assert_eq!(variant.alt, vec!["C".to_string()]);
        assert_eq!(variant.samples["Patient_1"]["GT"], "0/0");
        assert_eq!(variant.samples["Patient_2"]["DP"], "90");

        // Reserved INFO definitions type the untyped file.
        assert_eq!(variant.info["DP"].values, vec!["100".to_string()]);
        assert_eq!(variant.info["AF"].number, "A");
        assert!(variant.info["SOMATIC"].values.is_empty());
    }

    #[test]
    fn record_without_samples_is_rejected() {
        assert!(parse_variant_record("chr21\t1\t.\tA\tC\t.\tPASS\tDP=1", &[], &[]).is_none());
    }

    #[test]
    fn info_headers_with_quoted_description() {
        let headers = vec![
            "##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total Depth\">".to_string(),
            "##INFO=<ID=XY,Number=A,Type=String,Description=\"Has, commas, inside\">".to_string(),
            "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">".to_string(),
        ];
        let defs = parse_info_headers(&headers);
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].id, "DP");
        assert_eq!(defs[1].description, "Has, commas, inside");
    }

    #[test]
    fn multi_valued_info_splits_on_comma() {
        let defs = vec![InfoDef {
            id: "AC".to_string(),
            number: "A".to_string(),
            type_: "Integer".to_string(),
            description: String::new(),
        }];
        let info = process_info_fields("AC=3,5", &defs);
        assert_eq!(info["AC"].values, vec!["3".to_string(), "5".to_string()]);
    }

    #[test]
    fn csq_expands_by_allele() {
        let defs = vec![InfoDef {
            id: "CSQ".to_string(),
            number: ".".to_string(),
            type_: "String".to_string(),
            description: "Consequence annotations from Ensembl VEP. Format: Allele|Consequence|SYMBOL"
                .to_string(),
        }];
        let info = process_info_fields(
            "CSQ=C|missense_variant|NBPF1,G|intron_variant|NBPF1",
            &defs,
        );
        let by_allele = info["CSQ"].by_allele.as_ref().unwrap();
        assert_eq!(info["CSQ"].number, "K");
        assert_eq!(by_allele["C"][0]["Consequence"], "missense_variant");
        assert_eq!(by_allele["G"][0]["SYMBOL"], "NBPF1");
    }
}
