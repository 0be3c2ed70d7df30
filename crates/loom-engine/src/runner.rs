use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loom_core::{AdapterError, Result};
use loom_store::Store;
use rand::Rng;

use crate::collection::DataSource;
use crate::context::Context;
use crate::transaction::{ReadOnlyTransaction, ReadWriteTransaction, Transaction};

/// Which transactional tier `TransactionRunner::run` should pick, decided
/// by the caller from the set of collections the operation touches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerOpts {
    pub read_only: bool,
    pub virtual_involved: bool,
    pub flat_involved: bool,
}

/// Opens the right transaction tier for one unit of work and retries on
/// store contention. Holds the single-slot write lock Flat collections
/// need: a Flat document is one shared row, so concurrent read-write
/// transactions touching it must be fully serialised rather than merely
/// isolated by the store.
pub struct TransactionRunner<S> {
    ctx: Arc<Context<S>>,
    flat_write_lock: Mutex<()>,
    data_sources: HashMap<String, Arc<dyn DataSource>>,
}

impl<S> TransactionRunner<S> {
    pub fn new(ctx: Arc<Context<S>>) -> Self {
        Self {
            ctx,
            flat_write_lock: Mutex::new(()),
            data_sources: HashMap::new(),
        }
    }

    /// `DataSource`s a Virtual write should be replayed against, keyed by
    /// collection name.
    pub fn with_data_sources(mut self, data_sources: HashMap<String, Arc<dyn DataSource>>) -> Self {
        self.data_sources = data_sources;
        self
    }
}

impl<S: Store + Send + Sync + 'static> TransactionRunner<S> {
    pub fn run<F, T>(&self, opts: RunnerOpts, f: F) -> Result<T>
    where
        F: Fn(&mut dyn Transaction) -> Result<T>,
    {
        if opts.virtual_involved || opts.read_only {
            let store = self.ctx.store.clone();
            let mut txn = ReadOnlyTransaction::with_fetch(self.ctx.logger.clone(), move |refs| {
                store.get_all(refs, None)
            })
            .with_data_sources(self.data_sources.clone());
            let result = f(&mut txn)?;
            txn.commit()?;
            return Ok(result);
        }

        // Flat writes are serialised through a single slot; read paths
        // never reach this branch with `flat_involved` forcing the lock,
        // since a pure read still opens a read-write transaction here
        // (there is no separate "flat read" tier) but does not contend
        // on correctness, only on throughput — acceptable for a single
        // in-process store binding.
        let _guard = opts.flat_involved.then(|| self.flat_write_lock.lock().unwrap());

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let logger = self.ctx.logger.clone();
            let emulator = self.ctx.config.emulator;
            let store_for_reads = self.ctx.store.clone();
            let result = self.ctx.store.run_transaction(false, |raw_txn| {
                if attempt > 1 && emulator {
                    let backoff_ms = rand::thread_rng().gen_range(0..=5000);
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                }
                let store_for_reads = store_for_reads.clone();
                let non_atomic_fetch: crate::transaction::NonAtomicFetch =
                    Arc::new(move |refs| store_for_reads.get_all(refs, None));
                let mut txn = ReadWriteTransaction::new(raw_txn, logger.clone(), attempt, non_atomic_fetch);
                let value = f(&mut txn)?;
                txn.commit()?;
                Ok(value)
            });
            match result {
                Err(AdapterError::TransactionContention) => continue,
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use loom_core::{CapturingLogger, Registry, RunnerConfig, Value};
    use loom_store::memory::MemoryStore;

    use super::*;

    fn runner() -> TransactionRunner<MemoryStore> {
        let ctx = Context::new(Registry::new(), MemoryStore::default())
            .with_logger(Arc::new(CapturingLogger::default()))
            .with_config(RunnerConfig::default());
        TransactionRunner::new(Arc::new(ctx))
    }

    #[test]
    fn read_only_path_never_touches_the_store_transaction() {
        let runner = runner();
        let result = runner
            .run(
                RunnerOpts {
                    read_only: true,
                    ..Default::default()
                },
                |txn| {
                    assert!(txn.is_read_only());
                    Ok(Value::Int(1))
                },
            )
            .unwrap();
        assert_eq!(result, Value::Int(1));
    }

    #[test]
    fn read_write_path_commits_pending_writes() {
        let runner = runner();
        let reference = loom_core::Ref::normal("articles", "1").unwrap();
        let registry = Registry::new();
        let result = runner.run(RunnerOpts::default(), |txn| {
            assert!(!txn.is_read_only());
            txn.merge_write_internal(&reference, &registry, Some(Default::default()), true, false)
        });
        assert!(result.is_ok());
    }
}
