//! Property-based tests for the applications list operator.

use std::collections::BTreeSet;

use proptest::prelude::*;

use super::render_array;

const NAMES: [&str; 4] = ["a", "b", "c", "d"];

fn entry_strategy() -> impl Strategy<Value = String> {
    (prop::sample::select(NAMES.to_vec()), prop::bool::ANY).prop_map(|(name, removal)| {
        if removal {
            format!("~{}", name)
        } else {
            name.to_string()
        }
    })
}

proptest! {
    /// An entry survives exactly when its last occurrence is not
    /// `~`-prefixed.
    #[test]
    fn prop_render_array_matches_last_occurrence(
        entries in prop::collection::vec(entry_strategy(), 0..32)
    ) {
        let rendered = render_array(&entries);
        let rendered_set: BTreeSet<String> = rendered.iter().cloned().collect();

        let mut expected = BTreeSet::new();
        for name in NAMES {
            let last = entries
                .iter()
                .rev()
                .find(|e| e.trim_start_matches('~') == name);
            if let Some(e) = last {
                if !e.starts_with('~') {
                    expected.insert(name.to_string());
                }
            }
        }

        prop_assert_eq!(&rendered_set, &expected);
        // The rendered list never contains duplicates.
        prop_assert_eq!(rendered.len(), rendered_set.len());
    }

    /// Rendering is idempotent: re-rendering the output is a no-op.
    #[test]
    fn prop_render_array_idempotent(
        entries in prop::collection::vec(entry_strategy(), 0..32)
    ) {
        let once = render_array(&entries);
        let twice = render_array(&once);
        prop_assert_eq!(once, twice);
    }
}
