use std::collections::HashSet;
use std::time::Instant;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use rnaseq_pipelines::config::defs::PendingLimit;
use rnaseq_pipelines::pipelines::merge_fastqs::{reconcile, MergeOptions};
use rnaseq_pipelines::utils::fastq::synthetic_pairs;


#[test]
fn test_reconcile_shuffled_stress() -> Result<()> {
    let sizes = vec![1_000, 20_000];

    for &num_pairs in &sizes {
        let pairs = synthetic_pairs(num_pairs, 150.0, 20.0, 42)?;
        let mut r2_order: Vec<usize> = (0..num_pairs).collect();
        r2_order.shuffle(&mut StdRng::seed_from_u64(7));

        // every tenth R1 record has no mate
        let r1: Vec<u8> = pairs.iter().flat_map(|p| p.r1.clone()).collect();
        let r2: Vec<u8> = r2_order
            .iter()
            .filter(|&&i| i % 10 != 0)
            .flat_map(|&i| pairs[i].r2.clone())
            .collect();

        let start = Instant::now();
        let mut out1 = Vec::new();
        let mut out2 = Vec::new();
        let stats = reconcile(vec![&r1[..]], vec![&r2[..]], &mut out1, &mut out2, &MergeOptions::default())?;
        eprintln!("{} pairs reconciled in {} ms", num_pairs, start.elapsed().as_millis());

        let expected = num_pairs - num_pairs.div_ceil(10);
        assert_eq!(stats.pairs_written() as usize, expected);
        assert_eq!(stats.r1_dropped() as usize, num_pairs - expected);
        assert_eq!(stats.r2_dropped(), 0);

        let heads = |out: &[u8]| -> Vec<String> {
            String::from_utf8_lossy(out)
                .lines()
                .step_by(4)
                .map(|l| l[1..].split_whitespace().next().unwrap_or("").to_string())
                .collect()
        };
        let n1 = heads(&out1);
        let n2 = heads(&out2);
        assert_eq!(n1, n2);
        assert_eq!(n1.iter().collect::<HashSet<_>>().len(), expected);

        let mut fails = MergeOptions::default();
        fails.pending_limit = PendingLimit::Records(10);
        assert!(reconcile(vec![&r1[..]], vec![&r2[..]], &mut Vec::new(), &mut Vec::new(), &fails).is_err());
    }
    Ok(())
}
