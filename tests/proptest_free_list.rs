use std::collections::BTreeSet;

use primitive_types::U256;
use proptest::prelude::*;

use dhcp6pool::{FreeList, Range};

#[derive(Debug, Clone)]
enum Op {
    Next,
    Used(u128),
    Free(u128),
}

fn ops(span: u128) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        Just(Op::Next),
        (0..span + 2).prop_map(Op::Used),
        (0..span + 2).prop_map(Op::Free),
    ];
    prop::collection::vec(op, 0..200)
}

/// Checks the free list against a plain set of used offsets.
fn run_against_model(base: u128, span: u128, ops: &[Op]) -> Result<(), TestCaseError> {
    let high = base + (span - 1);
    let mut list = FreeList::new(base, high).unwrap();
    let mut used: BTreeSet<u128> = BTreeSet::new();

    for op in ops {
        match op {
            Op::Next => {
                let expected = (base..=high).find(|value| !used.contains(value));
                let actual = list.next_free();
                prop_assert_eq!(actual, expected);
                if let Some(value) = actual {
                    used.insert(value);
                }
            }
            Op::Used(offset) => {
                let value = base.wrapping_add(*offset).wrapping_sub(1);
                let result = list.mark_used(value);
                if value < base || value > high {
                    prop_assert!(result.is_err());
                } else {
                    prop_assert_eq!(result.unwrap(), used.insert(value));
                }
            }
            Op::Free(offset) => {
                let value = base.wrapping_add(*offset).wrapping_sub(1);
                let result = list.mark_free(value);
                if value < base || value > high {
                    prop_assert!(result.is_err());
                } else {
                    prop_assert_eq!(result.unwrap(), used.remove(&value));
                }
            }
        }

        let free = U256::from(span - used.len() as u128);
        prop_assert_eq!(list.free_count(), free);

        let intervals: Vec<(u128, u128)> = list.intervals().collect();
        for window in intervals.windows(2) {
            // Sorted, disjoint and never adjacent (always coalesced).
            prop_assert!(window[0].1 + 1 < window[1].0);
        }
        for (start, end) in &intervals {
            prop_assert!(*start >= base && *end <= high && start <= end);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn free_list_matches_model(span in 1u128..64, ops in ops(64)) {
        run_against_model(1000, span, &ops)?;
    }

    #[test]
    fn free_list_matches_model_at_top_of_space(span in 1u128..64, ops in ops(64)) {
        run_against_model(u128::MAX - span + 1, span, &ops)?;
    }

    #[test]
    fn free_list_matches_model_at_bottom_of_space(span in 1u128..64, ops in ops(64)) {
        run_against_model(0, span, &ops)?;
    }

    #[test]
    fn next_free_never_repeats(span in 1u128..128) {
        let mut list = FreeList::new(0, span - 1).unwrap();
        let mut seen = BTreeSet::new();
        while let Some(value) = list.next_free() {
            prop_assert!(seen.insert(value));
        }
        prop_assert_eq!(seen.len() as u128, span);
    }

    #[test]
    fn range_contains_matches_numeric_order(
        a in any::<u128>(),
        b in any::<u128>(),
        probe in any::<u128>()
    ) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let range = Range::new(
            std::net::Ipv6Addr::from(low).into(),
            std::net::Ipv6Addr::from(high).into(),
        ).unwrap();
        let inside = probe >= low && probe <= high;
        prop_assert_eq!(range.contains(std::net::Ipv6Addr::from(probe).into()), inside);
    }

    #[test]
    fn range_rejects_inverted_bounds(a in any::<u128>(), b in any::<u128>()) {
        prop_assume!(a > b);
        let result = Range::new(
            std::net::Ipv6Addr::from(a).into(),
            std::net::Ipv6Addr::from(b).into(),
        );
        prop_assert!(result.is_err());
    }
}
