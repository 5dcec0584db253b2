//! Common functionality.

use byte_unit::Byte;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub mod io;
pub mod s3;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    let me = procfs::process::Process::myself().unwrap();
    let page_size = procfs::page_size();
    tracing::debug!(
        "RSS now: {}",
        Byte::from_u64(me.stat().unwrap().rss * page_size)
            .get_appropriate_unit(byte_unit::UnitType::Binary)
    );
}

/// Definition of canonical chromosome names.
pub const CHROMS: &[&str] = &[
    "chr1", "chr2", "chr3", "chr4", "chr5", "chr6", "chr7", "chr8", "chr9", "chr10", "chr11",
    "chr12", "chr13", "chr14", "chr15", "chr16", "chr17", "chr18", "chr19", "chr20", "chr21",
    "chr22", "chrX", "chrY", "chrM",
];

/// Select the reference genome a variant file was called against.
#[derive(
    clap::ValueEnum,
    Clone,
    Copy,
    Debug,
    strum::Display,
    strum::EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub enum ReferenceGenome {
    /// GRCh37 / hg19
    #[strum(serialize = "hg19")]
    Hg19,
    /// GRCh38 / hg38
    #[strum(serialize = "hg38")]
    Hg38,
}

/// The version of the `htsget-server` package.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;

    #[test]
    fn trace_rss_now_smoke() {
        super::trace_rss_now();
    }

    #[rstest::rstest]
    #[case(super::ReferenceGenome::Hg19, "hg19")]
    #[case(super::ReferenceGenome::Hg38, "hg38")]
    fn reference_genome_str(#[case] genome: super::ReferenceGenome, #[case] expected: &str) {
        assert_eq!(expected, genome.to_string());
        assert_eq!(
            genome,
            super::ReferenceGenome::from_str(expected).expect("parse failed")
        );
    }
}
