use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{InsertOutcome, Mutation, SwapStore};
use crate::error::{SwapError, SwapResult};
use crate::lightning::invoice::normalize_payment_hash;
use crate::starknet::normalize_felt;
use crate::swap::SwapTransaction;

#[derive(Debug, Default, Clone)]
pub struct MemorySwapStore {
    swaps: Arc<DashMap<String, SwapTransaction>>,
    // (owner, idempotency key) -> swap id
    idempotency: Arc<DashMap<(String, String), String>>,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<F>(&self, mut keep: F) -> Vec<SwapTransaction>
    where
        F: FnMut(&SwapTransaction) -> bool,
    {
        let mut out: Vec<SwapTransaction> = self
            .swaps
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }
}

impl SwapStore for MemorySwapStore {
    fn insert(&self, record: &SwapTransaction) -> Result<InsertOutcome> {
        if let Some(key) = &record.idempotency_key {
            match self
                .idempotency
                .entry((record.owner.clone(), key.clone()))
            {
                Entry::Occupied(existing) => {
                    let existing_id = existing.get().clone();
                    drop(existing);
                    let swap = self
                        .get(&existing_id)?
                        .ok_or_else(|| anyhow::anyhow!("dangling idempotency key {key}"))?;
                    return Ok(InsertOutcome::Existing(swap));
                }
                Entry::Vacant(slot) => {
                    anyhow::ensure!(
                        !self.swaps.contains_key(&record.id),
                        "swap already exists: {}",
                        record.id
                    );
                    self.swaps.insert(record.id.clone(), record.clone());
                    slot.insert(record.id.clone());
                    return Ok(InsertOutcome::Inserted);
                }
            }
        }

        match self.swaps.entry(record.id.clone()) {
            Entry::Occupied(_) => anyhow::bail!("swap already exists: {}", record.id),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    fn get(&self, swap_id: &str) -> Result<Option<SwapTransaction>> {
        Ok(self.swaps.get(swap_id).map(|entry| entry.value().clone()))
    }

    fn update(&self, swap_id: &str, mutate: Mutation<'_>) -> SwapResult<SwapTransaction> {
        let mut entry = self
            .swaps
            .get_mut(swap_id)
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))?;
        let mut next = entry.value().clone();
        mutate(&mut next)?;
        *entry.value_mut() = next.clone();
        Ok(next)
    }

    fn list_all(&self) -> Result<Vec<SwapTransaction>> {
        Ok(self.collect(|_| true))
    }

    fn list_by_owner(&self, owner: &str) -> Result<Vec<SwapTransaction>> {
        Ok(self.collect(|s| s.owner == owner))
    }

    fn list_active(&self) -> Result<Vec<SwapTransaction>> {
        Ok(self.collect(|s| !s.status.is_terminal()))
    }

    fn find_by_idempotency_key(&self, owner: &str, key: &str) -> Result<Option<SwapTransaction>> {
        let id = self
            .idempotency
            .get(&(owner.to_string(), key.to_string()))
            .map(|entry| entry.value().clone());
        match id {
            Some(id) => self.get(&id),
            None => Ok(None),
        }
    }

    fn find_by_payment_hash(&self, payment_hash: &str) -> Result<Option<SwapTransaction>> {
        let wanted = normalize_payment_hash(payment_hash);
        Ok(self
            .swaps
            .iter()
            .find(|entry| {
                entry
                    .value()
                    .lightning_invoice
                    .as_ref()
                    .is_some_and(|inv| normalize_payment_hash(&inv.payment_hash) == wanted)
            })
            .map(|entry| entry.value().clone()))
    }

    fn find_by_transaction_hash(&self, tx_hash: &str) -> Result<Option<SwapTransaction>> {
        let wanted = normalize_felt(tx_hash);
        Ok(self
            .swaps
            .iter()
            .find(|entry| {
                entry
                    .value()
                    .transaction_hash
                    .as_deref()
                    .is_some_and(|h| normalize_felt(h) == wanted)
            })
            .map(|entry| entry.value().clone()))
    }
}
