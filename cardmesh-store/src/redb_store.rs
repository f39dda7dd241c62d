// Durable State Store backend, built on `redb`, the embedded
// key-value engine the teacher repo already reaches for in its
// row-store crate. `redb` serializes all writers through a single
// `WriteTransaction`, so the compare-and-swap check below can never
// actually lose a race to a concurrent writer in this process - but
// the interface still enforces the watched-key semantic, and it's
// the same interface `MemStore` implements for tests, which is what
// lets the Coordination Service stay backend-agnostic.

use std::path::Path;

use cardmesh_base::Result;
use redb::{Database, ReadableTable, TableDefinition};

use crate::store::{store_unavailable, Bytes, Snapshot, Store, Write};

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cardmesh_kv");

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(|e| store_unavailable(e.to_string()))?;
        let txn = db.begin_write().map_err(|e| store_unavailable(e.to_string()))?;
        {
            let _ = txn
                .open_table(TABLE)
                .map_err(|e| store_unavailable(e.to_string()))?;
        }
        txn.commit().map_err(|e| store_unavailable(e.to_string()))?;
        Ok(RedbStore { db })
    }
}

impl Store for RedbStore {
    fn read(&self, keys: &[String]) -> Result<Snapshot> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| store_unavailable(e.to_string()))?;
        let table = txn
            .open_table(TABLE)
            .map_err(|e| store_unavailable(e.to_string()))?;
        let mut out: Vec<Option<Bytes>> = Vec::with_capacity(keys.len());
        for key in keys {
            let value = table
                .get(key.as_str())
                .map_err(|e| store_unavailable(e.to_string()))?
                .map(|g| g.value().to_vec());
            out.push(value);
        }
        Ok(Snapshot(out))
    }

    fn compare_and_swap(
        &self,
        keys: &[String],
        expected: &Snapshot,
        writes: &[Write],
    ) -> Result<bool> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| store_unavailable(e.to_string()))?;
        {
            let mut table = txn
                .open_table(TABLE)
                .map_err(|e| store_unavailable(e.to_string()))?;
            for (i, key) in keys.iter().enumerate() {
                let current = table
                    .get(key.as_str())
                    .map_err(|e| store_unavailable(e.to_string()))?
                    .map(|g| g.value().to_vec());
                if current.as_ref() != expected.0[i].as_ref() {
                    // Dropping `txn` here aborts it; nothing is written.
                    return Ok(false);
                }
            }
            for (key, w) in keys.iter().zip(writes.iter()) {
                match w {
                    Write::Put(bytes) => {
                        table
                            .insert(key.as_str(), bytes.as_slice())
                            .map_err(|e| store_unavailable(e.to_string()))?;
                    }
                    Write::Delete => {
                        table
                            .remove(key.as_str())
                            .map_err(|e| store_unavailable(e.to_string()))?;
                    }
                    Write::Keep => {}
                }
            }
        }
        txn.commit().map_err(|e| store_unavailable(e.to_string()))?;
        Ok(true)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Bytes)>> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| store_unavailable(e.to_string()))?;
        let table = txn
            .open_table(TABLE)
            .map_err(|e| store_unavailable(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| store_unavailable(e.to_string()))? {
            let (k, v) = entry.map_err(|e| store_unavailable(e.to_string()))?;
            let key = k.value().to_string();
            if key.starts_with(prefix) {
                out.push((key, v.value().to_vec()));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::cas_retry;
    use crate::store::CasStep;

    #[test]
    fn durable_put_and_cas() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();
        let keys = vec!["stock:packs".to_string()];

        store
            .compare_and_swap(&keys, &Snapshot(vec![None]), &[Write::Put(b"50".to_vec())])
            .unwrap();

        let result = cas_retry(&store, &keys, 5, |snap| {
            let remaining: i64 = snap
                .get(0)
                .map(|b| std::str::from_utf8(b).unwrap().parse().unwrap())
                .unwrap_or(0);
            Ok(CasStep::Write(
                vec![Write::Put((remaining - 1).to_string().into_bytes())],
                remaining,
            ))
        })
        .unwrap();
        assert_eq!(result, 50);

        let snap = store.read(&keys).unwrap();
        assert_eq!(snap.0[0], Some(b"49".to_vec()));
    }
}
