use super::*;
use anyhow::Result;
use segment::Segment;
use tempfile::tempdir;

#[test]
fn put_then_get() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), manual_options())?;
    let table = db.create_table("t")?;

    table.put(b"a".to_vec(), b"1".to_vec())?;
    table.put(b"b".to_vec(), b"2".to_vec())?;
    table.put(b"a".to_vec(), b"3".to_vec())?;

    assert_eq!(table.get(b"a")?, Some(b"3".to_vec()));
    assert_eq!(table.get(b"b")?, Some(b"2".to_vec()));
    assert_eq!(table.get(b"c")?, None);
    Ok(())
}

#[test]
fn put_rejects_bad_sizes() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), manual_options())?;
    let table = db.create_table("t")?;

    assert!(table.put(Vec::new(), b"v".to_vec()).is_err());
    assert!(table.put(vec![b'k'; MAX_KEY_SIZE + 1], b"v".to_vec()).is_err());
    assert!(table.put(b"k".to_vec(), vec![0; MAX_VALUE_SIZE + 1]).is_err());
    assert!(table.put(vec![b'k'; MAX_KEY_SIZE], Vec::new()).is_ok());
    Ok(())
}

#[test]
fn flush_writes_disk_segment() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), manual_options())?;
    let table = db.create_table("t")?;

    table.put(b"a".to_vec(), b"1".to_vec())?;
    table.flush()?;

    let segments = table.segments();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].as_disk().map(|d| d.id()), Some(1));
    assert!(matches!(segments[1], Segment::Memory(_)));
    assert!(dir.path().join("t.keys.1").exists());
    assert!(dir.path().join("t.data.1").exists());
    assert_eq!(table.get(b"a")?, Some(b"1".to_vec()));
    Ok(())
}

#[test]
fn flush_of_empty_table_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), manual_options())?;
    let table = db.create_table("t")?;

    table.flush()?;

    assert_eq!(table.segment_count(), 1);
    assert_eq!(file_names(dir.path()), vec!["t.manifest".to_string()]);
    Ok(())
}

#[test]
fn newer_segment_shadows_older() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), manual_options())?;
    let table = db.create_table("t")?;

    table.put(b"k".to_vec(), b"old".to_vec())?;
    table.put(b"only-old".to_vec(), b"x".to_vec())?;
    table.flush()?;
    table.put(b"k".to_vec(), b"new".to_vec())?;

    assert_eq!(table.get(b"k")?, Some(b"new".to_vec()));
    assert_eq!(table.get(b"only-old")?, Some(b"x".to_vec()));
    Ok(())
}

#[test]
fn transaction_counts_and_releases() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), manual_options())?;
    let table = db.create_table("t")?;

    assert_eq!(table.transactions(), 0);
    let t1 = table.begin();
    let t2 = table.begin();
    assert_eq!(table.transactions(), 2);
    drop(t1);
    assert_eq!(table.transactions(), 1);
    drop(t2);
    assert_eq!(table.transactions(), 0);

    // `Table::get` opens and closes its own transaction.
    table.get(b"x")?;
    assert_eq!(table.transactions(), 0);
    Ok(())
}

#[test]
fn lookup_merges_all_segments() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), manual_options())?;
    let table = db.create_table("t")?;

    table.put(b"a".to_vec(), b"1".to_vec())?;
    table.put(b"c".to_vec(), b"1".to_vec())?;
    table.flush()?;
    table.put(b"b".to_vec(), b"2".to_vec())?;
    table.put(b"c".to_vec(), b"2".to_vec())?;
    table.flush()?;
    table.put(b"d".to_vec(), b"3".to_vec())?;

    let tx = table.begin();
    tx.put(b"a".to_vec(), b"3".to_vec())?;

    let all: Vec<_> = tx.lookup(None, None)?.collect::<Result<_>>()?;
    assert_eq!(
        all,
        vec![
            (b"a".to_vec(), b"3".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"2".to_vec()),
            (b"d".to_vec(), b"3".to_vec()),
        ]
    );

    let mut range = tx.lookup(Some(&b"b"[..]), Some(&b"d"[..]))?;
    assert_eq!(range.next_entry()?, Some((b"b".to_vec(), b"2".to_vec())));
    assert_eq!(range.next_entry()?, Some((b"c".to_vec(), b"2".to_vec())));
    assert_eq!(range.next_entry()?, None);
    Ok(())
}

#[test]
fn flush_ids_increase() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), manual_options())?;
    let table = db.create_table("t")?;
    fill(&table, 3, 2)?;

    let ids: Vec<u64> = table
        .segments()
        .iter()
        .filter_map(|s| s.as_disk().map(|d| d.id()))
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(table.disk_segment_count(), 3);
    Ok(())
}

#[test]
fn failed_flush_keeps_entries() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Database::open(dir.path(), manual_options())?;
        let table = db.create_table("t")?;
        table.put(b"a".to_vec(), b"1".to_vec())?;
        table.put(b"shared".to_vec(), b"old".to_vec())?;

        let blocker = dir.path().join("t.keys.1.tmp");
        fs::create_dir(&blocker)?;
        assert!(table.flush().is_err());

        // The frozen entries went back into the live segment.
        assert_eq!(table.segment_count(), 1);
        assert!(matches!(table.segments()[0], Segment::Memory(_)));
        assert_eq!(table.get(b"a")?, Some(b"1".to_vec()));

        fs::remove_dir(&blocker)?;
        table.put(b"b".to_vec(), b"2".to_vec())?;
        table.put(b"shared".to_vec(), b"new".to_vec())?;
        db.close()?;
    }

    let db = Database::open(dir.path(), manual_options())?;
    let table = db.table("t")?;
    assert_eq!(table.get(b"a")?, Some(b"1".to_vec()));
    assert_eq!(table.get(b"b")?, Some(b"2".to_vec()));
    assert_eq!(table.get(b"shared")?, Some(b"new".to_vec()));
    Ok(())
}

#[test]
fn unfreeze_keeps_newer_values() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), manual_options())?;
    let table = db.create_table("t")?;

    let mut frozen = memtable::MemorySegment::new();
    frozen.put(b"k".to_vec(), b"old".to_vec());
    frozen.put(b"only-frozen".to_vec(), b"1".to_vec());
    let frozen = Segment::memory(frozen);
    let Segment::Memory(handle) = frozen.clone() else { unreachable!() };
    table.mutate_segments(|s| s.insert(0, frozen));
    table.put(b"k".to_vec(), b"new".to_vec())?;

    table.unfreeze(&handle);

    assert_eq!(table.segment_count(), 1);
    assert_eq!(table.get(b"k")?, Some(b"new".to_vec()));
    assert_eq!(table.get(b"only-frozen")?, Some(b"1".to_vec()));
    Ok(())
}
