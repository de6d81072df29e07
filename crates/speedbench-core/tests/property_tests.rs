use proptest::prelude::*;
use speedbench_core::correlate::{resample_counts, trim_boundaries, truncate_to_common_duration};
use speedbench_core::stats::marginal_efficiency;
use speedbench_core::stream::LineBuffer;
use speedbench_core::{ResampledBucket, SeriesKind};
use speedbench_test_utils::{at_ms, config};
use std::sync::Arc;
use std::time::Duration;

proptest! {
    #[test]
    fn prop_line_buffer_preserves_lines_across_chunking(
        lines in proptest::collection::vec("[a-z0-9,:.-]{0,12}", 0..30),
        cuts in proptest::collection::vec(1..16usize, 0..40),
    ) {
        let text = lines.iter().map(|l| format!("{l}\n")).collect::<String>();
        let bytes = text.as_bytes();

        let mut buf = LineBuffer::new();
        let mut out = Vec::new();
        let mut pos = 0;
        for cut in cuts {
            let end = (pos + cut).min(bytes.len());
            out.extend(buf.push(&bytes[pos..end]));
            pos = end;
        }
        out.extend(buf.push(&bytes[pos..]));
        out.extend(buf.finish());

        let expected: Vec<Vec<u8>> = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn prop_resampled_counts_account_for_every_record(
        offsets in proptest::collection::vec(0..20_000i64, 1..200),
        width_ms in 100..3_000u64,
    ) {
        let timestamps: Vec<_> = offsets.iter().map(|&ms| at_ms(ms)).collect();
        let width = Duration::from_millis(width_ms);
        let buckets = resample_counts(&timestamps, width);

        let total: f64 = buckets.iter().map(|&(_, c)| c).sum();
        prop_assert_eq!(total as usize, offsets.len());
        for (i, &(offset, _)) in buckets.iter().enumerate() {
            prop_assert!((offset - i as f64 * width.as_secs_f64()).abs() < 1e-9);
        }
    }

    #[test]
    fn prop_trim_drops_exactly_the_boundaries(values in proptest::collection::vec(any::<u16>(), 0..20)) {
        let trimmed = trim_boundaries(values.clone());
        if values.len() <= 2 {
            prop_assert!(trimmed.is_empty());
        } else {
            prop_assert_eq!(&trimmed[..], &values[1..values.len() - 1]);
        }
    }

    #[test]
    fn prop_truncation_leaves_a_common_duration(lengths in proptest::collection::vec(1..15usize, 1..5)) {
        let mut buckets = Vec::new();
        for (i, &len) in lengths.iter().enumerate() {
            let cfg = config("dbnet", (0..=i).collect());
            for b in 0..len {
                buckets.push(ResampledBucket {
                    config: Arc::clone(&cfg),
                    series: SeriesKind::Throughput,
                    time_offset_secs: b as f64,
                    value: 1.0,
                });
            }
        }

        truncate_to_common_duration(&mut buckets);

        let shortest = lengths.iter().copied().min().unwrap_or(0);
        prop_assert_eq!(buckets.len(), shortest * lengths.len());
        prop_assert!(buckets.iter().all(|b| b.time_offset_secs <= (shortest - 1) as f64));
    }

    #[test]
    fn prop_marginal_efficiency_telescopes(throughputs in proptest::collection::vec(1.0..1_000.0f64, 1..12)) {
        let eff = marginal_efficiency(&throughputs);
        prop_assert_eq!(eff.len(), throughputs.len());
        prop_assert!(eff[0].is_none());

        let sum: f64 = eff.iter().flatten().sum();
        let expected = (throughputs[throughputs.len() - 1] - throughputs[0]) / throughputs[0];
        prop_assert!((sum - expected).abs() < 1e-6);
    }
}
