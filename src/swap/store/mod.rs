pub mod memory;
pub mod sqlite;

use anyhow::Result;

use crate::error::SwapResult;
use crate::swap::SwapTransaction;

pub use memory::MemorySwapStore;
pub use sqlite::SqliteSwapStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same owner and idempotency key already exists.
    Existing(SwapTransaction),
}

pub type Mutation<'a> = &'a mut dyn FnMut(&mut SwapTransaction) -> SwapResult<()>;

/// Swap records keyed by id.
///
/// `update` is an atomic read-modify-write: the closure sees the latest
/// stored record, and if it returns an error nothing is written. Readers
/// never observe a partially applied mutation.
pub trait SwapStore: Send + Sync {
    fn insert(&self, record: &SwapTransaction) -> Result<InsertOutcome>;

    fn get(&self, swap_id: &str) -> Result<Option<SwapTransaction>>;

    /// Fails with `SwapError::NotFound` for unknown ids.
    fn update(&self, swap_id: &str, mutate: Mutation<'_>) -> SwapResult<SwapTransaction>;

    fn list_all(&self) -> Result<Vec<SwapTransaction>>;

    fn list_by_owner(&self, owner: &str) -> Result<Vec<SwapTransaction>>;

    /// Records not yet in a terminal state.
    fn list_active(&self) -> Result<Vec<SwapTransaction>>;

    fn find_by_idempotency_key(&self, owner: &str, key: &str) -> Result<Option<SwapTransaction>>;

    fn find_by_payment_hash(&self, payment_hash: &str) -> Result<Option<SwapTransaction>>;

    fn find_by_transaction_hash(&self, tx_hash: &str) -> Result<Option<SwapTransaction>>;
}
