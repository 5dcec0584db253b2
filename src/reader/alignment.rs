//! BAM/SAM reading via noodles, with BAI-indexed region queries for BAM.

use std::path::{Path, PathBuf};

use noodles_bam as bam;
use noodles_core::{region::Interval, Position, Region};
use noodles_sam::{self as sam, alignment::Record as _};

use super::{FileFormat, GenomicRecord};

/// Read-only view of an alignment file.
pub struct AlignmentReader {
    path: PathBuf,
    index_path: Option<PathBuf>,
    format: FileFormat,
    header: sam::Header,
    header_text: String,
    references: Vec<String>,
}

impl AlignmentReader {
    /// Open the file at `path`, reading and retaining its header.
    pub fn open(
        path: &Path,
        index_path: Option<&Path>,
        format: FileFormat,
    ) -> Result<Self, anyhow::Error> {
        let header = match format {
            FileFormat::Bam => {
                let mut reader = bam::reader::Builder::default()
                    .build_from_path(path)
                    .map_err(|e| {
                        anyhow::anyhow!("could not open alignment file {:?}: {}", path, e)
                    })?;
                reader.read_header().map_err(|e| {
                    anyhow::anyhow!("problem reading BAM header of {:?}: {}", path, e)
                })?
            }
            FileFormat::Sam => {
                let mut reader = open_sam(path)?;
                reader.read_header().map_err(|e| {
                    anyhow::anyhow!("problem reading SAM header of {:?}: {}", path, e)
                })?
            }
            _ => anyhow::bail!("not an alignment format: {}", format),
        };

        let header_text = {
            let mut writer = sam::Writer::new(Vec::new());
            writer
                .write_header(&header)
                .map_err(|e| anyhow::anyhow!("problem rendering SAM header: {}", e))?;
            String::from_utf8(writer.into_inner())
                .map_err(|e| anyhow::anyhow!("SAM header is not UTF-8: {}", e))?
        };
        let references = header
            .reference_sequences()
            .keys()
            .map(|name| name.to_string())
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            index_path: index_path.map(|p| p.to_path_buf()),
            format,
            header,
            header_text,
            references,
        })
    }

    pub fn header_text(&self) -> &str {
        &self.header_text
    }

    /// Reference sequences declared in the header.
    pub fn references(&self) -> &[String] {
        &self.references
    }

    /// Stream records as SAM text lines, optionally restricted to a region.
    pub fn fetch(
        &self,
        contig: Option<&str>,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<GenomicRecord>, anyhow::Error> {
        match (self.format, contig) {
            (FileFormat::Bam, Some(contig)) => self.fetch_bam_region(contig, start, end),
            (FileFormat::Bam, None) => self.fetch_bam_all(),
            (FileFormat::Sam, _) => self.fetch_sam(contig, start, end),
            _ => anyhow::bail!("not an alignment format: {}", self.format),
        }
    }

    fn fetch_bam_all(&self) -> Result<Vec<GenomicRecord>, anyhow::Error> {
        let mut reader = bam::reader::Builder::default()
            .build_from_path(&self.path)
            .map_err(|e| anyhow::anyhow!("could not re-open {:?}: {}", &self.path, e))?;
        let header = reader
            .read_header()
            .map_err(|e| anyhow::anyhow!("problem reading BAM header: {}", e))?;
        let mut records = Vec::new();
        for result in reader.records() {
            let record =
                result.map_err(|e| anyhow::anyhow!("problem reading BAM record: {}", e))?;
            records.push(self.to_genomic_record(&header, &record)?);
        }
        Ok(records)
    }

    fn fetch_bam_region(
        &self,
        contig: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<GenomicRecord>, anyhow::Error> {
        let index_path = self
            .index_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.bai", self.path.display())));
        let index = bam::bai::read(&index_path)
            .map_err(|e| anyhow::anyhow!("could not read index {:?}: {}", &index_path, e))?;
        let mut reader = bam::indexed_reader::Builder::default()
            .set_index(index)
            .build_from_path(&self.path)
            .map_err(|e| anyhow::anyhow!("could not open {:?} for query: {}", &self.path, e))?;
        let header = reader
            .read_header()
            .map_err(|e| anyhow::anyhow!("problem reading BAM header: {}", e))?;

        let region = Region::new(contig, interval_from_half_open(start, end)?);
        let query = reader
            .query(&header, &region)
            .map_err(|e| anyhow::anyhow!("query for {:?} failed: {}", &region, e))?;
        let mut records = Vec::new();
        for result in query {
            let record =
                result.map_err(|e| anyhow::anyhow!("problem reading BAM record: {}", e))?;
            records.push(self.to_genomic_record(&header, &record)?);
        }
        Ok(records)
    }

    /// SAM files carry no index; scan and filter.
    fn fetch_sam(
        &self,
        contig: Option<&str>,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<GenomicRecord>, anyhow::Error> {
        let mut reader = open_sam(&self.path)?;
        let header = reader
            .read_header()
            .map_err(|e| anyhow::anyhow!("problem reading SAM header: {}", e))?;
        let mut records = Vec::new();
        for result in reader.records() {
            let record =
                result.map_err(|e| anyhow::anyhow!("problem reading SAM record: {}", e))?;
            let genomic = self.to_genomic_record(&header, &record)?;
            if let Some(contig) = contig {
                if genomic.contig != contig {
                    continue;
                }
                if let Some(start) = start {
                    if genomic.pos <= start {
                        continue;
                    }
                }
                if let Some(end) = end {
                    if genomic.pos > end {
                        continue;
                    }
                }
            }
            records.push(genomic);
        }
        Ok(records)
    }

    fn to_genomic_record(
        &self,
        header: &sam::Header,
        record: &impl sam::alignment::Record,
    ) -> Result<GenomicRecord, anyhow::Error> {
        let mut writer = sam::Writer::new(Vec::new());
        writer
            .write_alignment_record(header, record)
            .map_err(|e| anyhow::anyhow!("problem rendering SAM record: {}", e))?;
        let mut line = String::from_utf8(writer.into_inner())
            .map_err(|e| anyhow::anyhow!("SAM record is not UTF-8: {}", e))?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }

        let contig = match record.reference_sequence_id(header) {
            Some(id) => {
                let id = id.map_err(|e| anyhow::anyhow!("invalid reference id: {}", e))?;
                header
                    .reference_sequences()
                    .get_index(id)
                    .map(|(name, _)| name.to_string())
                    .unwrap_or_default()
            }
            None => String::new(),
        };
        let pos = match record.alignment_start() {
            Some(pos) => {
                usize::from(pos.map_err(|e| anyhow::anyhow!("invalid position: {}", e))?) as i64
            }
            None => 0,
        };

        Ok(GenomicRecord { contig, pos, line })
    }
}

fn open_sam(path: &Path) -> Result<sam::Reader<std::io::BufReader<std::fs::File>>, anyhow::Error> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("could not open alignment file {:?}: {}", path, e))?;
    Ok(sam::Reader::new(std::io::BufReader::new(file)))
}

/// Translate 0-based half-open `[start, end)` coordinates into the 1-based
/// closed interval noodles queries expect.
fn interval_from_half_open(
    start: Option<i64>,
    end: Option<i64>,
) -> Result<Interval, anyhow::Error> {
    let start = start
        .map(|s| Position::try_from((s.max(0) + 1) as usize))
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid start position: {}", e))?;
    let end = end
        .map(|e| Position::try_from(e.max(1) as usize))
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid end position: {}", e))?;
    Ok(match (start, end) {
        (Some(start), Some(end)) => Interval::from(start..=end),
        (Some(start), None) => Interval::from(start..),
        (None, Some(end)) => Interval::from(..=end),
        (None, None) => Interval::from(..),
    })
}
