// The State Store seam: a consistent key-value service supporting
// atomic compare-and-swap on a watched key set (spec.md section 4.1).
// Everything the Coordination Service does reduces to: read a
// snapshot of some keys, decide what to write, then try to commit
// that write iff nothing watched changed underneath it.
//
// `Store` itself knows nothing about packs, inventories, or
// transactions — that's the Coordination Service's job. This keeps
// the CAS primitive reusable and the two concrete backends
// (`MemStore`, `RedbStore`) trivial to write and to swap for tests.

use cardmesh_base::{kind_err, Error, ErrorKind, Result};
use tracing::debug;

pub type Bytes = Vec<u8>;

/// A point-in-time read of a set of keys, in the same order they were
/// requested. `None` means the key is absent.
#[derive(Clone, Debug, Default)]
pub struct Snapshot(pub Vec<Option<Bytes>>);

impl Snapshot {
    pub fn get(&self, i: usize) -> Option<&Bytes> {
        self.0.get(i).and_then(|o| o.as_ref())
    }
}

#[derive(Clone, Debug)]
pub enum Write {
    Put(Bytes),
    Delete,
    /// Leave the key's current value untouched. Still part of the
    /// watched set: the CAS still fails if the key changed between
    /// read and write, it's just not being rewritten to the same
    /// bytes for no reason.
    Keep,
}

pub trait Store: Send + Sync {
    /// Read the current values of `keys`, in order. Must be a
    /// consistent read (no torn reads across keys) so it can be used
    /// as the basis of a compare-and-swap.
    fn read(&self, keys: &[String]) -> Result<Snapshot>;

    /// Apply `writes` (same length and order as `keys`) iff the
    /// current values of `keys` still equal `expected`. Returns
    /// `Ok(true)` if applied, `Ok(false)` on a CAS conflict.
    fn compare_and_swap(
        &self,
        keys: &[String],
        expected: &Snapshot,
        writes: &[Write],
    ) -> Result<bool>;

    /// List every key/value pair with the given prefix. Used only by
    /// the recovery sweeper to enumerate `tx_index:nonterminal:*`;
    /// never on a hot path, so backends are free to implement it with
    /// a full scan.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Bytes)>>;
}

/// The outcome of computing a desired mutation from a snapshot: either
/// nothing needs to change (the caller's operation was already a
/// no-op, most often because it's being retried idempotently), or a
/// set of writes should be attempted under CAS.
pub enum CasStep<T> {
    Done(T),
    Write(Vec<Write>, T),
}

/// Bounded-retry CAS loop shared by every Coordination Service
/// operation (spec.md section 4.1: "the caller MUST retry up to a
/// bounded number of attempts (default 5); after exhaustion, return
/// CONFLICT").
pub fn cas_retry<T>(
    store: &dyn Store,
    keys: &[String],
    max_retries: u32,
    mut f: impl FnMut(&Snapshot) -> Result<CasStep<T>>,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        let snapshot = store.read(keys)?;
        match f(&snapshot)? {
            CasStep::Done(t) => return Ok(t),
            CasStep::Write(writes, t) => {
                if store.compare_and_swap(keys, &snapshot, &writes)? {
                    return Ok(t);
                }
                attempt += 1;
                debug!(
                    attempt,
                    fingerprint = snapshot_fingerprint(&snapshot),
                    "cas attempt lost race, retrying"
                );
                if attempt >= max_retries {
                    return Err(kind_err(
                        ErrorKind::Conflict,
                        "exhausted compare-and-swap retries",
                    ));
                }
            }
        }
    }
}

pub fn store_unavailable(msg: impl Into<std::borrow::Cow<'static, str>>) -> Error {
    kind_err(ErrorKind::StoreUnavailable, msg)
}

/// Lets a `CoordinationService` be built over a shared, cheaply cloned
/// handle to one backend (`Arc<MemStore>`, `Arc<RedbStore>`), which is
/// how multiple local peers in a test harness all talk to the single
/// logical State Store the spec assumes.
impl<T: Store + ?Sized> Store for std::sync::Arc<T> {
    fn read(&self, keys: &[String]) -> Result<Snapshot> {
        (**self).read(keys)
    }

    fn compare_and_swap(&self, keys: &[String], expected: &Snapshot, writes: &[Write]) -> Result<bool> {
        (**self).compare_and_swap(keys, expected, writes)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Bytes)>> {
        (**self).scan_prefix(prefix)
    }
}

/// Cheap fingerprint of a snapshot for log lines; not used for
/// correctness, only so a retry-storm is diagnosable without dumping
/// full key contents into the trace log.
fn snapshot_fingerprint(snapshot: &Snapshot) -> u64 {
    let mut acc = 0u64;
    for slot in &snapshot.0 {
        let bytes = slot.as_deref().unwrap_or(&[]);
        acc ^= rapidhash::rapidhash(bytes);
    }
    acc
}
