//! Load-balancing strategy: picking a server address out of a role's
//! candidate list.
//!
//! The least-connected strategy is `min_by_key` over a per-address load
//! counter with a round-robin cursor as tie-break, adapted from picking
//! a physical connection slot to picking a server address.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::address::ServerAddress;

/// Counts currently checked-out connections per address — the only
/// input the least-connected strategy needs. [`crate::pool::Pool`]
/// satisfies this directly via `active_resource_count`.
pub trait LoadCounter: Send + Sync {
    fn active_count<'a>(
        &'a self,
        address: &'a ServerAddress,
    ) -> Pin<Box<dyn Future<Output = usize> + Send + 'a>>;
}

/// Picks one address out of a candidate list for a given role.
pub trait LoadBalancingStrategy: Send + Sync {
    fn select<'a>(
        &'a self,
        candidates: &'a [ServerAddress],
        counter: &'a dyn LoadCounter,
    ) -> Pin<Box<dyn Future<Output = Option<ServerAddress>> + Send + 'a>>;
}

/// Starts from a round-robin cursor and selects the address with the
/// smallest `activeResourceCount`; ties are broken by cursor order. One
/// cursor is shared across calls (not per-role — callers that need one
/// cursor per role hold one `LeastConnected` per role, same as they'd
/// hold one pool per role).
#[derive(Default)]
pub struct LeastConnected {
    cursor: AtomicUsize,
}

impl LeastConnected {
    pub fn new() -> Self {
        LeastConnected::default()
    }
}

impl LoadBalancingStrategy for LeastConnected {
    fn select<'a>(
        &'a self,
        candidates: &'a [ServerAddress],
        counter: &'a dyn LoadCounter,
    ) -> Pin<Box<dyn Future<Output = Option<ServerAddress>> + Send + 'a>> {
        Box::pin(async move {
            if candidates.is_empty() {
                return None;
            }
            let start = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();

            let mut best: Option<(usize, &ServerAddress)> = None;
            for offset in 0..candidates.len() {
                let idx = (start + offset) % candidates.len();
                let addr = &candidates[idx];
                let count = counter.active_count(addr).await;
                match best {
                    None => best = Some((count, addr)),
                    Some((best_count, _)) if count < best_count => best = Some((count, addr)),
                    _ => {}
                }
            }
            best.map(|(_, addr)| addr.clone())
        })
    }
}

/// A round-robin fallback strategy, interchangeable behind the same
/// interface.
#[derive(Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        RoundRobin::default()
    }
}

impl LoadBalancingStrategy for RoundRobin {
    fn select<'a>(
        &'a self,
        candidates: &'a [ServerAddress],
        _counter: &'a dyn LoadCounter,
    ) -> Pin<Box<dyn Future<Output = Option<ServerAddress>> + Send + 'a>> {
        Box::pin(async move {
            if candidates.is_empty() {
                return None;
            }
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
            Some(candidates[idx].clone())
        })
    }
}
