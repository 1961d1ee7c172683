#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use marketmesh::core::types::{compute_content_hash, DataType, RecordPayload};
use proptest::prelude::*;

fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000_000i64).prop_map(|ms| DateTime::<Utc>::from_timestamp_millis(ms).unwrap())
}

proptest! {
    #[test]
    fn prop_content_hash_is_a_pure_function_of_its_inputs(
        symbol in "[A-Z]{1,5}",
        source in "[a-z]{1,12}",
        open in -10_000.0f64..10_000.0,
        high in -10_000.0f64..10_000.0,
        low in -10_000.0f64..10_000.0,
        close in -10_000.0f64..10_000.0,
        volume in 0u64..1_000_000_000,
        ts in arb_timestamp(),
    ) {
        let payload = RecordPayload::Eod { open, high, low, close, volume };
        let h1 = compute_content_hash(&symbol, DataType::Eod, &payload, ts, &source);
        let h2 = compute_content_hash(&symbol, DataType::Eod, &payload, ts, &source);
        prop_assert_eq!(h1, h2);
    }

    #[test]
    fn prop_changing_the_source_changes_the_hash(
        symbol in "[A-Z]{1,5}",
        source_a in "[a-z]{1,12}",
        source_b in "[a-z]{1,12}",
        ts in arb_timestamp(),
    ) {
        prop_assume!(source_a != source_b);
        let payload = RecordPayload::Split { ratio_from: 1, ratio_to: 2 };
        let h1 = compute_content_hash(&symbol, DataType::Split, &payload, ts, &source_a);
        let h2 = compute_content_hash(&symbol, DataType::Split, &payload, ts, &source_b);
        prop_assert_ne!(h1, h2);
    }
}
