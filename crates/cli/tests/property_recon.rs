// Property-based tests for aggregation and reconciliation arithmetic.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::BTreeMap;

use proptest::prelude::*;
use ledgercheck_recon::aggregate::aggregate_records;
use ledgercheck_recon::classify::classify;
use ledgercheck_recon::config::{AggregateFn, AncestorRule, SystemConfig};
use ledgercheck_recon::model::{
    CellValue, MatchStatus, Metrics, NormalizedRow, Percentages, PRACTITIONER_COLUMN,
};
use ledgercheck_recon::reconcile::compare;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn columns() -> Vec<String> {
    [PRACTITIONER_COLUMN, "Month", "MTDcharges", "MTDpayments"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn system(funcs: Option<BTreeMap<String, AggregateFn>>) -> SystemConfig {
    SystemConfig {
        columns: BTreeMap::from([("Month".to_string(), "Month".to_string())]),
        output_filename: "out.xlsx".into(),
        staging_folder: "staging".into(),
        date_format: None,
        aggregate_functions: funcs,
        add_columns: BTreeMap::new(),
        ancestor_rule: AncestorRule::default(),
    }
}

fn row(practitioner: &str, month: &str, charges: f64, payments: f64) -> NormalizedRow {
    NormalizedRow {
        values: BTreeMap::from([
            (PRACTITIONER_COLUMN.to_string(), CellValue::Text(practitioner.into())),
            ("Month".to_string(), CellValue::Text(month.into())),
            ("MTDcharges".to_string(), CellValue::Number(charges)),
            ("MTDpayments".to_string(), CellValue::Number(payments)),
        ]),
    }
}

fn arb_rows(max: usize) -> impl Strategy<Value = Vec<NormalizedRow>> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["Dr A", "Dr B", "Dr C"]),
            prop::sample::select(vec!["April_2025", "May_2025"]),
            -1.0e6..1.0e6f64,
            -1.0e6..1.0e6f64,
        ),
        1..max,
    )
    .prop_map(|v| v.into_iter().map(|(p, m, c, pay)| row(p, m, c, pay)).collect())
}

fn arb_funcs() -> impl Strategy<Value = Option<BTreeMap<String, AggregateFn>>> {
    let func = prop::sample::select(vec![
        AggregateFn::Sum,
        AggregateFn::Mean,
        AggregateFn::Min,
        AggregateFn::Max,
        AggregateFn::Count,
        AggregateFn::Median,
    ]);
    prop::option::of((func.clone(), func).prop_map(|(c, p)| {
        BTreeMap::from([("MTDcharges".to_string(), c), ("MTDpayments".to_string(), p)])
    }))
}

fn arb_metrics() -> impl Strategy<Value = Metrics> {
    let value = prop::option::weighted(0.9, -1.0e7..1.0e7f64);
    (value.clone(), value.clone(), value).prop_map(|(charges, payments, adjustments)| Metrics {
        charges,
        payments,
        adjustments,
    })
}

// ===========================================================================
// Aggregation: row order never changes the summary
// ===========================================================================

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn aggregation_is_order_independent(
        rows in arb_rows(40),
        funcs in arb_funcs(),
        seed in any::<u64>(),
    ) {
        let sys = system(funcs);
        let baseline = aggregate_records(&columns(), &rows, &sys);

        // Deterministic shuffle from the seed
        let mut shuffled = rows.clone();
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            shuffled.swap(i, (state % (i as u64 + 1)) as usize);
        }
        let permuted = aggregate_records(&columns(), &shuffled, &sys);

        prop_assert_eq!(&baseline.summary, &permuted.summary);
        prop_assert_eq!(baseline.mode, permuted.mode);
    }

    #[test]
    fn one_summary_row_per_group(rows in arb_rows(40)) {
        let agg = aggregate_records(&columns(), &rows, &system(None));
        let mut keys: Vec<(String, String)> = rows
            .iter()
            .map(|r| {
                (
                    r.get(PRACTITIONER_COLUMN).unwrap().to_key_string(),
                    r.get("Month").unwrap().to_key_string(),
                )
            })
            .collect();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(agg.summary.rows.len(), keys.len());
        prop_assert_eq!(agg.rows_without_key, 0);
    }
}

// ===========================================================================
// Reconciliation: antisymmetric diffs
// ===========================================================================

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn diff_is_antisymmetric(
        a in arb_metrics(),
        b in arb_metrics(),
        threshold in 0.0..10.0f64,
    ) {
        let ab = compare(&a, &b, threshold);
        let ba = compare(&b, &a, threshold);

        for (x, y) in [
            (ab.diff.charges, ba.diff.charges),
            (ab.diff.payments, ba.diff.payments),
            (ab.diff.adjustments, ba.diff.adjustments),
        ] {
            match (x, y) {
                (Some(x), Some(y)) => prop_assert_eq!(x, -y),
                (None, None) => {}
                other => prop_assert!(false, "one-sided diff: {:?}", other),
            }
        }
    }

    #[test]
    fn percentages_are_never_nan(a in arb_metrics(), b in arb_metrics()) {
        let cmp = compare(&a, &b, 0.001);
        prop_assert!(cmp.diff_pct.charges.is_finite());
        prop_assert!(cmp.diff_pct.payments.is_finite());
        prop_assert!(cmp.diff_pct.adjustments.is_finite());
    }

    #[test]
    fn zero_own_value_never_mismatches_on_that_metric(reference in -1.0e7..1.0e7f64) {
        let own = Metrics { charges: Some(0.0), payments: Some(1.0), adjustments: Some(1.0) };
        let other = Metrics { charges: Some(reference), payments: Some(1.0), adjustments: Some(1.0) };
        let cmp = compare(&own, &other, 0.0);
        prop_assert_eq!(cmp.diff_pct.charges, 0.0);
        prop_assert_eq!(cmp.status, MatchStatus::Match);
    }
}

// ===========================================================================
// Classification: inclusive threshold
// ===========================================================================

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn threshold_is_inclusive(threshold in 0.0..100.0f64, which in 0usize..3) {
        let mut values = [0.0, 0.0, 0.0];
        values[which] = threshold;
        let at = Percentages { charges: values[0], payments: values[1], adjustments: values[2] };
        prop_assert_eq!(classify(&at, threshold), MatchStatus::Match);

        values[which] = threshold + threshold.max(1.0) * 1e-9;
        let above = Percentages { charges: values[0], payments: values[1], adjustments: values[2] };
        prop_assert_eq!(classify(&above, threshold), MatchStatus::Mismatch);
    }

    #[test]
    fn raising_threshold_never_breaks_a_match(
        a in arb_metrics(),
        b in arb_metrics(),
        t1 in 0.0..50.0f64,
        gap in 0.0..50.0f64,
    ) {
        if compare(&a, &b, t1).status == MatchStatus::Match {
            prop_assert_eq!(compare(&a, &b, t1 + gap).status, MatchStatus::Match);
        }
    }
}
