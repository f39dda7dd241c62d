// An in-process Store backend, used by the test harness and the
// property-test suite: a single shared `Mutex<HashMap<..>>` stands in
// for the external consistent key-value service. All reads and CAS
// attempts take the one lock, so conflicts only ever arise from
// genuine read-then-write races between callers, not from the
// backend itself.

use std::collections::HashMap;
use std::sync::Mutex;

use cardmesh_base::Result;

use crate::store::{Bytes, Snapshot, Store, Write};

#[derive(Default)]
pub struct MemStore {
    data: Mutex<HashMap<String, Bytes>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore {
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a key directly, bypassing CAS. Used at bootstrap (e.g. to
    /// set the initial `stock:packs` value) and in tests.
    pub fn seed(&self, key: impl Into<String>, value: Bytes) {
        self.data.lock().unwrap().insert(key.into(), value);
    }
}

impl Store for MemStore {
    fn read(&self, keys: &[String]) -> Result<Snapshot> {
        let data = self.data.lock().unwrap();
        Ok(Snapshot(
            keys.iter().map(|k| data.get(k).cloned()).collect(),
        ))
    }

    fn compare_and_swap(
        &self,
        keys: &[String],
        expected: &Snapshot,
        writes: &[Write],
    ) -> Result<bool> {
        let mut data = self.data.lock().unwrap();
        for (i, key) in keys.iter().enumerate() {
            if data.get(key) != expected.0.get(i).and_then(|o| o.as_ref()) {
                return Ok(false);
            }
        }
        for (key, w) in keys.iter().zip(writes.iter()) {
            match w {
                Write::Put(bytes) => {
                    data.insert(key.clone(), bytes.clone());
                }
                Write::Delete => {
                    data.remove(key);
                }
                Write::Keep => {}
            }
        }
        Ok(true)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Bytes)>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cas_conflict_on_concurrent_change() {
        let store = MemStore::new();
        store.seed("k", b"1".to_vec());
        let keys = vec!["k".to_string()];
        let snap = store.read(&keys).unwrap();

        // Someone else mutates the key between read and write.
        store.seed("k", b"2".to_vec());

        let ok = store
            .compare_and_swap(&keys, &snap, &[Write::Put(b"3".to_vec())])
            .unwrap();
        assert!(!ok);
        assert_eq!(store.read(&keys).unwrap().0[0], Some(b"2".to_vec()));
    }
}
