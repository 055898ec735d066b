//! Tests for the hasher selected by the `fxhash` and `ahash` feature flags.
//!
//! Whatever `DefaultHashBuilder` resolves to, the map must behave the same:
//! equal keys find each other, and a lineage keeps one hasher. The explicit
//! hasher tests only run when the corresponding crate is enabled.

use lambars_hamt::persistent::{DefaultHashBuilder, PersistentHashMap};
use rstest::rstest;
use std::hash::BuildHasher;

// =============================================================================
// Referential Transparency Tests
// =============================================================================

/// Tests that one hasher gives the same hash for the same key every time.
#[rstest]
fn test_same_key_produces_same_hash() {
    let map = PersistentHashMap::new().insert("key".to_string(), 1);
    let hasher = map.hasher();

    assert_eq!(hasher.hash_one("key"), hasher.hash_one("key"));
    assert_eq!(hasher.hash_one("key"), hasher.hash_one("key".to_string()));
}

/// Tests that maps built from the same entries behave identically.
#[rstest]
fn test_deterministic_hash_behavior() {
    let entries: Vec<(String, i32)> = vec![
        ("alpha".to_string(), 1),
        ("beta".to_string(), 2),
        ("gamma".to_string(), 3),
        ("delta".to_string(), 4),
    ];

    let map1: PersistentHashMap<String, i32> = entries.iter().cloned().collect();
    let map2: PersistentHashMap<String, i32> = entries.iter().cloned().collect();

    for (key, expected_value) in &entries {
        assert_eq!(map1.get(key), Some(expected_value));
        assert_eq!(map2.get(key), Some(expected_value));
    }
    assert_eq!(map1, map2);
}

// =============================================================================
// Large Scale Tests (hash function stress test)
// =============================================================================

#[rstest]
fn test_large_scale_insert_and_retrieve() {
    const COUNT: i32 = 10_000;

    let map: PersistentHashMap<i32, i32> = (0..COUNT).map(|x| (x, x * 2)).collect();

    for i in 0..COUNT {
        assert_eq!(map.get(&i), Some(&(i * 2)), "Failed to get key {}", i);
    }
    for i in COUNT..(COUNT + 100) {
        assert_eq!(map.get(&i), None, "Key {} should not exist", i);
    }
    assert_eq!(map.check_invariants(), Ok(()));
}

#[rstest]
fn test_string_keys_large_scale() {
    const COUNT: usize = 1_000;

    let map: PersistentHashMap<String, usize> =
        (0..COUNT).map(|i| (format!("key_{}", i), i)).collect();

    for i in 0..COUNT {
        let key = format!("key_{}", i);
        assert_eq!(map.get(&key), Some(&i), "Failed to get key {}", key);
    }
}

// =============================================================================
// Edge Case Tests
// =============================================================================

#[rstest]
#[case("")]
#[case("\0")]
#[case("\n")]
#[case(" ")]
#[case("aaaa")]
#[case("konnichiwa")]
fn test_unusual_string_keys(#[case] key: &str) {
    let map = PersistentHashMap::new()
        .insert("a".to_string(), 0)
        .insert(key.to_string(), 42);

    assert_eq!(map.get(key), Some(&42));
}

#[rstest]
fn test_boundary_integer_keys() {
    let map: PersistentHashMap<i64, i64> = PersistentHashMap::new()
        .insert(i64::MIN, 1)
        .insert(i64::MAX, 2)
        .insert(0, 3)
        .insert(-1, 4);

    assert_eq!(map.get(&i64::MIN), Some(&1));
    assert_eq!(map.get(&i64::MAX), Some(&2));
    assert_eq!(map.get(&0), Some(&3));
    assert_eq!(map.get(&-1), Some(&4));
}

// =============================================================================
// Explicit hasher selection
// =============================================================================

#[rstest]
fn test_default_hash_builder_is_used_by_new() {
    let map: PersistentHashMap<u8, u8, DefaultHashBuilder> = PersistentHashMap::new();
    assert!(map.insert(1, 1).contains_key(&1));
}

#[cfg(feature = "fxhash")]
#[rstest]
fn test_fx_hasher_map() {
    let map = PersistentHashMap::from_entries_with_hasher(
        (0..2_000_u64).map(|n| (n, n)),
        rustc_hash::FxBuildHasher,
    );
    assert_eq!(map.len(), 2_000);
    assert_eq!(map.get(&1_999), Some(&1_999));
    assert_eq!(map.check_invariants(), Ok(()));
}

#[cfg(feature = "ahash")]
#[rstest]
fn test_ahash_map_keeps_its_random_state() {
    let map = PersistentHashMap::with_hasher(ahash::RandomState::new()).insert("key", 1);
    let derived = map.insert("other", 2).remove("other");

    assert_eq!(map.hasher().hash_one("key"), derived.hasher().hash_one("key"));
    assert_eq!(derived.get("key"), Some(&1));
}

// =============================================================================
// Immutability Tests (hash function should not affect immutability)
// =============================================================================

#[rstest]
fn test_immutability_after_remove() {
    let map1 = PersistentHashMap::new()
        .insert("a".to_string(), 1)
        .insert("b".to_string(), 2)
        .insert("c".to_string(), 3);

    let map2 = map1.remove("b");

    assert_eq!(map1.len(), 3);
    assert_eq!(map1.get("b"), Some(&2));
    assert_eq!(map2.len(), 2);
    assert_eq!(map2.get("b"), None);
}
