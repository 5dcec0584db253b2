//! VCF reading via noodles, with tabix-indexed region queries.

use std::path::{Path, PathBuf};

use noodles_core::{region::Interval, Position, Region};
use noodles_tabix as tabix;
use noodles_vcf as vcf;

use super::GenomicRecord;

/// Read-only view of a VCF file (plain or bgzip-compressed).
pub struct VariantReader {
    path: PathBuf,
    index_path: Option<PathBuf>,
    header: vcf::Header,
    header_text: String,
    samples: Vec<String>,
    contigs: Vec<String>,
}

impl VariantReader {
    /// Open the file at `path`, reading and retaining its header.
    pub fn open(path: &Path, index_path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let mut reader = vcf::reader::Builder::default()
            .build_from_path(path)
            .map_err(|e| anyhow::anyhow!("could not open variant file {:?}: {}", path, e))?;
        let header = reader
            .read_header()
            .map_err(|e| anyhow::anyhow!("problem reading VCF header of {:?}: {}", path, e))?;

        let header_text = {
            let mut writer = vcf::Writer::new(Vec::new());
            writer
                .write_header(&header)
                .map_err(|e| anyhow::anyhow!("problem rendering VCF header: {}", e))?;
            String::from_utf8(writer.into_inner())
                .map_err(|e| anyhow::anyhow!("VCF header is not UTF-8: {}", e))?
        };
        let samples = header
            .sample_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let contigs = header
            .contigs()
            .keys()
            .map(|name| name.to_string())
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            index_path: index_path.map(|p| p.to_path_buf()),
            header,
            header_text,
            samples,
            contigs,
        })
    }

    pub fn header_text(&self) -> &str {
        &self.header_text
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn contigs(&self) -> &[String] {
        &self.contigs
    }

    /// Stream records; with a contig this uses the tabix index, without it
    /// the whole file is scanned in order.
    pub fn fetch(
        &self,
        contig: Option<&str>,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<GenomicRecord>, anyhow::Error> {
        match contig {
            Some(contig) => self.fetch_region(contig, start, end),
            None => self.fetch_all(),
        }
    }

    /// Scan positions only, for the indexing pass over the whole file.
    pub fn scan_positions(&self) -> Result<Vec<(i64, String)>, anyhow::Error> {
        let mut reader = vcf::reader::Builder::default()
            .build_from_path(&self.path)
            .map_err(|e| anyhow::anyhow!("could not re-open {:?}: {}", &self.path, e))?;
        let header = reader
            .read_header()
            .map_err(|e| anyhow::anyhow!("problem reading VCF header: {}", e))?;
        let mut positions = Vec::new();
        for result in reader.records(&header) {
            let record =
                result.map_err(|e| anyhow::anyhow!("problem reading VCF record: {}", e))?;
            positions.push((
                usize::from(record.position()) as i64,
                record.chromosome().to_string(),
            ));
        }
        Ok(positions)
    }

    fn fetch_all(&self) -> Result<Vec<GenomicRecord>, anyhow::Error> {
        let mut reader = vcf::reader::Builder::default()
            .build_from_path(&self.path)
            .map_err(|e| anyhow::anyhow!("could not re-open {:?}: {}", &self.path, e))?;
        let header = reader
            .read_header()
            .map_err(|e| anyhow::anyhow!("problem reading VCF header: {}", e))?;
        let mut records = Vec::new();
        for result in reader.records(&header) {
            let record =
                result.map_err(|e| anyhow::anyhow!("problem reading VCF record: {}", e))?;
            records.push(self.to_genomic_record(&record)?);
        }
        Ok(records)
    }

    fn fetch_region(
        &self,
        contig: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<GenomicRecord>, anyhow::Error> {
        let index_path = self
            .index_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.tbi", self.path.display())));
        let index = tabix::read(&index_path)
            .map_err(|e| anyhow::anyhow!("could not read index {:?}: {}", &index_path, e))?;
        let mut reader = vcf::indexed_reader::Builder::default()
            .set_index(index)
            .build_from_path(&self.path)
            .map_err(|e| anyhow::anyhow!("could not open {:?} for query: {}", &self.path, e))?;
        let header = reader
            .read_header()
            .map_err(|e| anyhow::anyhow!("problem reading VCF header: {}", e))?;

        let region = Region::new(contig, interval_from_half_open(start, end)?);
        let query = reader
            .query(&header, &region)
            .map_err(|e| anyhow::anyhow!("query for {:?} failed: {}", &region, e))?;
        let mut records = Vec::new();
        for result in query {
            let record =
                result.map_err(|e| anyhow::anyhow!("problem reading VCF record: {}", e))?;
            records.push(self.to_genomic_record(&record)?);
        }
        Ok(records)
    }

    fn to_genomic_record(&self, record: &vcf::Record) -> Result<GenomicRecord, anyhow::Error> {
        let mut writer = vcf::Writer::new(Vec::new());
        writer
            .write_record(&self.header, record)
            .map_err(|e| anyhow::anyhow!("problem rendering VCF record: {}", e))?;
        let mut line = String::from_utf8(writer.into_inner())
            .map_err(|e| anyhow::anyhow!("VCF record is not UTF-8: {}", e))?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(GenomicRecord {
            contig: record.chromosome().to_string(),
            pos: usize::from(record.position()) as i64,
            line,
        })
    }
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

#[cfg(test)]
mod test {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    const SMALL_VCF: &str = "\
##fileformat=VCFv4.2\n\
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Combined depth across samples\">\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
##contig=<ID=chr21>\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tNA18537\n\
chr21\t5030551\t.\tA\tC\t.\tPASS\tDP=100\tGT\t0/1\n\
chr21\t5030847\t.\tT\tA\t.\tPASS\tDP=95\tGT\t1/1\n";

    fn write_small_vcf(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("small.vcf");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SMALL_VCF.as_bytes()).unwrap();
        path
    }

    #[test]
    fn open_and_scan() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = write_small_vcf(&tmp_dir);

        let reader = super::VariantReader::open(&path, None)?;
        assert_eq!(reader.samples(), &["NA18537".to_string()]);
        assert_eq!(reader.contigs(), &["chr21".to_string()]);
        assert!(reader.header_text().starts_with("##fileformat=VCFv4.2"));

        let positions = reader.scan_positions()?;
        assert_eq!(
            positions,
            vec![
                (5030551, "chr21".to_string()),
                (5030847, "chr21".to_string())
            ]
        );
        Ok(())
    }

    #[test]
    fn fetch_whole_file() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = write_small_vcf(&tmp_dir);

        let reader = super::VariantReader::open(&path, None)?;
        let records = reader.fetch(None, None, None)?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].contig, "chr21");
        assert_eq!(records[0].pos, 5030551);
        assert!(records[0].line.starts_with("chr21\t5030551\t"));
        assert!(!records[0].line.ends_with('\n'));
        Ok(())
    }

    #[rstest::rstest]
    #[case(None, None)]
    #[case(Some(0), Some(10))]
    #[case(Some(5), None)]
    fn interval_bounds(#[case] start: Option<i64>, #[case] end: Option<i64>) {
        super::interval_from_half_open(start, end).expect("interval construction failed");
    }
}
