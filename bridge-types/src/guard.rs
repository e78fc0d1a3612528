//! Ancestor loop guard for reference items
//!
//! Every change to a reference starts a new check. Checks finish in any
//! order, so each one carries a generation and only the newest generation
//! seen for an item is allowed to touch its issue.

use crate::ancestry::AncestorLookup;
use crate::control::ItemControl;
use bridge_plugin_api::Item;
use bridge_plugin_host::BoxFuture;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Issue kind raised on a reference that targets one of its ancestors
pub const ANCESTOR_LOOP_ISSUE: &str = "types.rta";

pub const ANCESTOR_LOOP_DESCRIPTION: &str = "Reference is targeting an ancestor, loops may occur";

pub struct LoopGuard {
    lookup: Arc<dyn AncestorLookup>,
    items: ItemControl,
    next_generation: AtomicU64,
    /// Newest generation per item with a check in flight
    latest: Mutex<HashMap<String, u64>>,
}

impl LoopGuard {
    pub fn new(lookup: Arc<dyn AncestorLookup>, items: ItemControl) -> Self {
        Self {
            lookup,
            items,
            next_generation: AtomicU64::new(0),
            latest: Mutex::new(HashMap::new()),
        }
    }

    fn latest(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a check for `item`, superseding any check still in flight.
    ///
    /// The returned future performs the lookup and then raises or clears
    /// the issue, unless a newer check has started in the meantime.
    pub fn check(self: &Arc<Self>, item: &Item) -> BoxFuture<'static, ()> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.latest().insert(item.id.clone(), generation);

        let guard = Arc::clone(self);
        let id = item.id.clone();
        let target = item.target_id().map(str::to_string);

        Box::pin(async move {
            let verdict = match &target {
                Some(target) => guard.lookup.is_ancestor(target, &id).await,
                None => Ok(false),
            };

            if !guard.finish(&id, generation) {
                tracing::debug!(item = %id, generation, "Discarding superseded ancestor check");
                return;
            }

            match verdict {
                Ok(false) => guard.items.remove_issue(&id, ANCESTOR_LOOP_ISSUE),
                Ok(true) => {
                    tracing::info!(item = %id, target = ?target, "Reference targets an ancestor");
                    guard.items.apply_issue(
                        &id,
                        ANCESTOR_LOOP_ISSUE,
                        json!({ "description": ANCESTOR_LOOP_DESCRIPTION }),
                    );
                }
                Err(e) => {
                    tracing::warn!(item = %id, error = %e, "Ancestor lookup failed, leaving issue as is")
                }
            }
        })
    }

    /// Retire `generation` if it is still the newest for `id`
    fn finish(&self, id: &str, generation: u64) -> bool {
        let mut latest = self.latest();
        if latest.get(id) == Some(&generation) {
            latest.remove(id);
            true
        } else {
            false
        }
    }

    /// Number of items with a check in flight
    pub fn pending(&self) -> usize {
        self.latest().len()
    }
}
