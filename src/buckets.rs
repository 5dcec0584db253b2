//! Position buckets: the coarse content index over variant records.
//!
//! Genomic positions are partitioned per contig into fixed-width buckets of
//! `bucket_size` base pairs.  The indexing worker compresses the stream of
//! record positions into runs of equal `(bucket, contig)` pairs; the catalog
//! stores one association row per run with its record count.

/// Return the bucket a position falls into (the floored position).
pub fn bucket_for_position(pos: i64, bucket_size: i64) -> i64 {
    (pos / bucket_size) * bucket_size
}

/// The three parallel arrays handed to the catalog's bulk bucket upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketRuns {
    pub pos_bucket_ids: Vec<i64>,
    pub normalized_contigs: Vec<String>,
    pub bucket_counts: Vec<i64>,
}

impl BucketRuns {
    pub fn len(&self) -> usize {
        self.pos_bucket_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos_bucket_ids.is_empty()
    }
}

/// Run-length compress `(pos, normalized_contig)` pairs in file order.
///
/// Consecutive records that fall into the same `(bucket, contig)` pair are
/// collapsed into one run.  Records whose contig failed to normalize must be
/// dropped by the caller before this point.
pub fn compress_positions(positions: &[(i64, String)], bucket_size: i64) -> BucketRuns {
    let mut runs = BucketRuns::default();
    let Some((first_pos, first_contig)) = positions.first() else {
        return runs;
    };
    runs.pos_bucket_ids
        .push(bucket_for_position(*first_pos, bucket_size));
    runs.normalized_contigs.push(first_contig.clone());
    runs.bucket_counts.push(0);

    for (pos, contig) in &positions[1..] {
        let bucket = bucket_for_position(*pos, bucket_size);
        *runs.bucket_counts.last_mut().expect("runs are non-empty") += 1;
        if contig != runs.normalized_contigs.last().expect("runs are non-empty")
            || bucket != *runs.pos_bucket_ids.last().expect("runs are non-empty")
        {
            runs.pos_bucket_ids.push(bucket);
            runs.normalized_contigs.push(contig.clone());
            runs.bucket_counts.push(0);
        }
    }
    // The final record still needs to be counted.
    *runs.bucket_counts.last_mut().expect("runs are non-empty") += 1;

    runs
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{bucket_for_position, compress_positions};

    #[rstest::rstest]
    #[case(0, 10, 0)]
    #[case(9, 10, 0)]
    #[case(10, 10, 10)]
    #[case(5_030_847, 1_000_000, 5_000_000)]
    #[case(999_999, 1_000_000, 0)]
    fn bucket_of(#[case] pos: i64, #[case] bucket_size: i64, #[case] expected: i64) {
        assert_eq!(bucket_for_position(pos, bucket_size), expected);
    }

    #[test]
    fn compress_empty() {
        let runs = compress_positions(&[], 10);
        assert!(runs.is_empty());
    }

    #[test]
    fn compress_single() {
        let runs = compress_positions(&[(12, "chr1".to_string())], 10);
        assert_eq!(runs.pos_bucket_ids, vec![10]);
        assert_eq!(runs.normalized_contigs, vec!["chr1".to_string()]);
        assert_eq!(runs.bucket_counts, vec![1]);
    }

    #[test]
    fn compress_runs_and_contig_changes() {
        let positions = vec![
            (1, "chr1".to_string()),
            (3, "chr1".to_string()),
            (9, "chr1".to_string()),
            (11, "chr1".to_string()),
            (12, "chr1".to_string()),
            // same bucket id, different contig: must start a new run
            (11, "chr2".to_string()),
            (31, "chr2".to_string()),
        ];
        let runs = compress_positions(&positions, 10);
        assert_eq!(runs.pos_bucket_ids, vec![0, 10, 10, 30]);
        assert_eq!(
            runs.normalized_contigs,
            vec!["chr1", "chr1", "chr2", "chr2"]
        );
        assert_eq!(runs.bucket_counts, vec![3, 2, 1, 1]);
    }

    #[test]
    fn counts_sum_to_record_count() {
        let positions: Vec<(i64, String)> =
            (0..137).map(|i| (i * 7, "chr21".to_string())).collect();
        let runs = compress_positions(&positions, 100);
        assert_eq!(runs.bucket_counts.iter().sum::<i64>(), 137);
    }
}
