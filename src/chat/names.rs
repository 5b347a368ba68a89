//! Sender id to display name resolution.
//!
//! [`DisplayNameCache`] asks the [`Directory`] at most once per unresolved
//! sender at a time.  Concurrent resolves for the same id share one lookup
//! future and all observe its result.  Successful names stay cached for the
//! life of the session; failures are handed to the callers that were
//! waiting and then forgotten, so the next message from that sender retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::backend::Directory;
use crate::error::{Error, Result};
use crate::observability::{
    NAMES_CACHE_HITS, NAMES_LOOKUP_DURATION, NAMES_LOOKUP_ERRORS, NAMES_LOOKUPS,
    NAMES_LOOKUPS_COALESCED,
};

type Lookup = Shared<BoxFuture<'static, Result<String>>>;

enum Entry {
    Resolved(String),
    Pending { ticket: u64, lookup: Lookup },
}

enum Claim {
    Cached(String),
    Wait { ticket: u64, lookup: Lookup },
}

/// Name shown for a sender whose lookup failed.
pub fn fallback_name(sender_id: &str) -> String {
    format!("unknown user ({sender_id})")
}

/// Single-flight cache of display names.
pub struct DisplayNameCache {
    directory: Arc<dyn Directory>,
    timeout: Duration,
    entries: Mutex<HashMap<String, Entry>>,
    next_ticket: AtomicU64,
}

impl DisplayNameCache {
    /// Creates an empty cache whose lookups expire after `timeout`.
    pub fn new(directory: Arc<dyn Directory>, timeout: Duration) -> Self {
        Self {
            directory,
            timeout,
            entries: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Returns the display name for `sender_id`.
    ///
    /// Never fails: a failed, missing, or expired lookup yields
    /// [`fallback_name`].
    pub async fn resolve(&self, sender_id: &str) -> String {
        let (ticket, lookup) = match self.claim(sender_id) {
            Claim::Cached(name) => return name,
            Claim::Wait { ticket, lookup } => (ticket, lookup),
        };
        let result = lookup.await;
        self.settle(sender_id, ticket, &result);
        match result {
            Ok(name) => name,
            Err(_) => fallback_name(sender_id),
        }
    }

    /// Returns the cached name without looking it up.
    pub fn cached(&self, sender_id: &str) -> Option<String> {
        match self.lock().get(sender_id) {
            Some(Entry::Resolved(name)) => Some(name.clone()),
            _ => None,
        }
    }

    /// Number of resolved names.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|entry| matches!(entry, Entry::Resolved(_)))
            .count()
    }

    /// True when no name has been resolved.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of lookups in flight.
    pub fn pending(&self) -> usize {
        self.lock()
            .values()
            .filter(|entry| matches!(entry, Entry::Pending { .. }))
            .count()
    }

    fn claim(&self, sender_id: &str) -> Claim {
        let mut entries = self.lock();
        match entries.get(sender_id) {
            Some(Entry::Resolved(name)) => {
                NAMES_CACHE_HITS.click();
                Claim::Cached(name.clone())
            }
            Some(Entry::Pending { ticket, lookup }) => {
                NAMES_LOOKUPS_COALESCED.click();
                Claim::Wait {
                    ticket: *ticket,
                    lookup: lookup.clone(),
                }
            }
            None => {
                NAMES_LOOKUPS.click();
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let lookup = self.lookup(sender_id);
                entries.insert(
                    sender_id.to_string(),
                    Entry::Pending {
                        ticket,
                        lookup: lookup.clone(),
                    },
                );
                Claim::Wait { ticket, lookup }
            }
        }
    }

    /// Records the outcome, unless a newer lookup already took the slot.
    fn settle(&self, sender_id: &str, ticket: u64, result: &Result<String>) {
        let mut entries = self.lock();
        let current = matches!(
            entries.get(sender_id),
            Some(Entry::Pending { ticket: t, .. }) if *t == ticket
        );
        if !current {
            return;
        }
        match result {
            Ok(name) => {
                entries.insert(sender_id.to_string(), Entry::Resolved(name.clone()));
            }
            Err(_) => {
                entries.remove(sender_id);
            }
        }
    }

    fn lookup(&self, sender_id: &str) -> Lookup {
        let directory = Arc::clone(&self.directory);
        let timeout = self.timeout;
        let sender_id = sender_id.to_string();
        async move {
            let start = Instant::now();
            let result = match tokio::time::timeout(timeout, directory.username(&sender_id)).await
            {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(
                    format!("name lookup for {sender_id} timed out"),
                    Some(timeout.as_secs_f64()),
                )),
            };
            NAMES_LOOKUP_DURATION.add(start.elapsed().as_secs_f64());
            match &result {
                Ok(name) => {
                    tracing::debug!(sender_id = %sender_id, name = %name, "resolved display name");
                }
                Err(err) => {
                    NAMES_LOOKUP_ERRORS.click();
                    tracing::warn!(
                        sender_id = %sender_id,
                        error = %err,
                        "display name lookup failed"
                    );
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
