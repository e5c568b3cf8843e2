use super::*;

// -------------------- Basic put / get --------------------

#[test]
fn put_and_get_single_key() {
    let mut m = MemorySegment::new();
    m.put(b"k1".to_vec(), b"v1".to_vec());
    assert_eq!(m.len(), 1);
    assert_eq!(m.get(b"k1"), Some(&b"v1"[..]));
}

#[test]
fn put_replaces_existing_value() {
    let mut m = MemorySegment::new();
    m.put(b"k1".to_vec(), b"v1".to_vec());
    m.put(b"k1".to_vec(), b"v2".to_vec());
    assert_eq!(m.len(), 1);
    assert_eq!(m.get(b"k1"), Some(&b"v2"[..]));
}

#[test]
fn get_missing_key_returns_none() {
    let m = MemorySegment::new();
    assert!(m.get(b"nonexistent").is_none());
}

#[test]
fn default_creates_empty() {
    let m = MemorySegment::default();
    assert!(m.is_empty());
    assert_eq!(m.approx_size(), 0);
}

// -------------------- Iterator ordering --------------------

#[test]
fn iter_yields_sorted_keys() {
    let mut m = MemorySegment::new();
    for k in [b"c", b"a", b"b"] {
        m.put(k.to_vec(), b"v".to_vec());
    }
    let keys: Vec<&[u8]> = m.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![&b"a"[..], b"b", b"c"]);
}

// -------------------- Range snapshots --------------------

fn sample() -> MemorySegment {
    let mut m = MemorySegment::new();
    for i in 0..10u32 {
        m.put(format!("k{}", i).into_bytes(), format!("v{}", i).into_bytes());
    }
    m
}

#[test]
fn range_unbounded_returns_everything() {
    let m = sample();
    assert_eq!(m.range(None, None).len(), 10);
}

#[test]
fn range_is_half_open() {
    let m = sample();
    let r = m.range(Some(b"k2"), Some(b"k5"));
    let keys: Vec<Vec<u8>> = r.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"k2".to_vec(), b"k3".to_vec(), b"k4".to_vec()]);
}

#[test]
fn range_with_only_start_or_end() {
    let m = sample();
    assert_eq!(m.range(Some(b"k7"), None).len(), 3);
    assert_eq!(m.range(None, Some(b"k3")).len(), 3);
}

#[test]
fn inverted_or_empty_range_is_empty() {
    let m = sample();
    assert!(m.range(Some(b"k5"), Some(b"k2")).is_empty());
    assert!(m.range(Some(b"k5"), Some(b"k5")).is_empty());
}

#[test]
fn range_is_a_snapshot() {
    let mut m = sample();
    let snap = m.range(None, None);
    m.put(b"k99".to_vec(), b"late".to_vec());
    assert_eq!(snap.len(), 10);
    assert_eq!(m.len(), 11);
}

// -------------------- approx_size tracking --------------------

#[test]
fn approx_size_includes_key_and_value() {
    let mut m = MemorySegment::new();
    m.put(b"abc".to_vec(), b"12345".to_vec());
    assert_eq!(m.approx_size(), 8);
}

#[test]
fn approx_size_adjusts_on_overwrite() {
    let mut m = MemorySegment::new();
    m.put(b"a".to_vec(), b"aaa".to_vec());
    assert_eq!(m.approx_size(), 4);
    m.put(b"a".to_vec(), b"bb".to_vec());
    assert_eq!(m.approx_size(), 3);
    m.put(b"a".to_vec(), b"cccccc".to_vec());
    assert_eq!(m.approx_size(), 7);
}

// -------------------- Edge cases --------------------

#[test]
fn empty_value_is_stored() {
    let mut m = MemorySegment::new();
    m.put(b"k".to_vec(), Vec::new());
    assert_eq!(m.get(b"k"), Some(&b""[..]));
}

#[test]
fn binary_key_and_value() {
    let mut m = MemorySegment::new();
    let key = vec![0u8, 255, 1, 254];
    let val = vec![0xFFu8; 32];
    m.put(key.clone(), val.clone());
    assert_eq!(m.get(&key), Some(val.as_slice()));
}

#[test]
fn many_distinct_keys() {
    let mut m = MemorySegment::new();
    for i in 0..10_000u32 {
        m.put(format!("key{:05}", i).into_bytes(), b"v".to_vec());
    }
    assert_eq!(m.len(), 10_000);
    let first = m.iter().next().map(|(k, _)| k.clone());
    assert_eq!(first, Some(b"key00000".to_vec()));
}
