//! Read-only adapters over genomic files, translating between the catalog's
//! normalized view and the files' native record formats.

use std::path::{Path, PathBuf};

pub mod alignment;
pub mod variant;

/// File formats recognized by the content classifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, serde::Serialize,
)]
pub enum FileFormat {
    #[strum(serialize = "VCF")]
    #[serde(rename = "VCF")]
    Vcf,
    #[strum(serialize = "BCF")]
    #[serde(rename = "BCF")]
    Bcf,
    #[strum(serialize = "BAM")]
    #[serde(rename = "BAM")]
    Bam,
    #[strum(serialize = "CRAM")]
    #[serde(rename = "CRAM")]
    Cram,
    #[strum(serialize = "SAM")]
    #[serde(rename = "SAM")]
    Sam,
}

impl FileFormat {
    /// Classify a file name by its extension, ignoring trailing `.gz`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        let lower = lower.strip_suffix(".gz").unwrap_or(&lower);
        match Path::new(lower).extension().and_then(|e| e.to_str()) {
            Some("vcf") => Some(FileFormat::Vcf),
            Some("bcf") => Some(FileFormat::Bcf),
            Some("bam") => Some(FileFormat::Bam),
            Some("cram") => Some(FileFormat::Cram),
            Some("sam") => Some(FileFormat::Sam),
            _ => None,
        }
    }

    /// Whether this is a variant (VCF-like) format.
    pub fn is_variant(&self) -> bool {
        matches!(self, FileFormat::Vcf | FileFormat::Bcf)
    }
}

/// A record streamed out of a genomic file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomicRecord {
    /// Contig name as spelled in the file.
    pub contig: String,
    /// 1-based position.
    pub pos: i64,
    /// The record's native text form, without trailing newline.
    pub line: String,
}

/// A genomic file opened through one of the format adapters.
pub enum GenomicFile {
    Variant(variant::VariantReader),
    Alignment(alignment::AlignmentReader),
}

impl GenomicFile {
    /// Open `path` with the adapter matching `format`, attaching the
    /// resolved index file.
    pub fn open(
        path: &Path,
        index_path: Option<&Path>,
        format: FileFormat,
    ) -> Result<Self, anyhow::Error> {
        match format {
            FileFormat::Vcf => Ok(GenomicFile::Variant(variant::VariantReader::open(
                path,
                index_path,
            )?)),
            FileFormat::Bcf => anyhow::bail!(
                "cannot open {:?}: BCF decoding is not supported, convert to VCF first",
                path
            ),
            FileFormat::Bam | FileFormat::Sam => Ok(GenomicFile::Alignment(
                alignment::AlignmentReader::open(path, index_path, format)?,
            )),
            FileFormat::Cram => anyhow::bail!(
                "cannot open {:?}: CRAM decoding is not supported, convert to BAM first",
                path
            ),
        }
    }

    /// The file's full header text.
    pub fn header_text(&self) -> &str {
        match self {
            GenomicFile::Variant(reader) => reader.header_text(),
            GenomicFile::Alignment(reader) => reader.header_text(),
        }
    }

    /// Samples declared in the header, in declaration order.
    pub fn samples(&self) -> &[String] {
        match self {
            GenomicFile::Variant(reader) => reader.samples(),
            GenomicFile::Alignment(_) => &[],
        }
    }

    /// Contigs (variant files) or reference sequences (alignment files)
    /// declared in the header.
    pub fn contigs(&self) -> &[String] {
        match self {
            GenomicFile::Variant(reader) => reader.contigs(),
            GenomicFile::Alignment(reader) => reader.references(),
        }
    }

    /// Scan `(pos, contig-as-spelled)` pairs over the whole file, in file
    /// order; only meaningful for variant files.
    pub fn scan_positions(&self) -> Result<Vec<(i64, String)>, anyhow::Error> {
        match self {
            GenomicFile::Variant(reader) => reader.scan_positions(),
            GenomicFile::Alignment(_) => {
                anyhow::bail!("alignment files are not position-indexed")
            }
        }
    }

    /// Stream records, optionally restricted to a region.  `contig` uses the
    /// file's native spelling; `start`/`end` are 0-based half-open.
    pub fn fetch(
        &self,
        contig: Option<&str>,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<GenomicRecord>, anyhow::Error> {
        match self {
            GenomicFile::Variant(reader) => reader.fetch(contig, start, end),
            GenomicFile::Alignment(reader) => reader.fetch(contig, start, end),
        }
    }
}

/// A genomic file resolved from a DRS object: the opened reader plus the
/// object-level metadata the operations need.
pub struct GenomicObject {
    pub file: GenomicFile,
    pub format: FileFormat,
    /// Maps sample names as spelled in the file to canonical sample ids.
    pub samples: indexmap::IndexMap<String, String>,
    /// Local path of the main file (S3 objects are staged to disk).
    pub main_path: PathBuf,
    /// Local path of the index file.
    pub index_path: Option<PathBuf>,
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::FileFormat;

    #[rstest::rstest]
    #[case("NA18537.vcf.gz", Some(FileFormat::Vcf))]
    #[case("NA18537.vcf", Some(FileFormat::Vcf))]
    #[case("sample.bcf", Some(FileFormat::Bcf))]
    #[case("NA02102.bam", Some(FileFormat::Bam))]
    #[case("NA02102.sam", Some(FileFormat::Sam))]
    #[case("NA02102.cram", Some(FileFormat::Cram))]
    #[case("NA18537.vcf.gz.tbi", None)]
    #[case("README", None)]
    fn classify_file_names(#[case] name: &str, #[case] expected: Option<FileFormat>) {
        assert_eq!(FileFormat::from_file_name(name), expected);
    }

    #[test]
    fn format_strings() {
        assert_eq!(FileFormat::Vcf.to_string(), "VCF");
        assert_eq!("BAM".parse::<FileFormat>().unwrap(), FileFormat::Bam);
        assert!(FileFormat::Vcf.is_variant());
        assert!(!FileFormat::Bam.is_variant());
    }
}
