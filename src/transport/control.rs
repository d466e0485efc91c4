//! Correlation of control requests with their responses.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use crate::protocol::ControlResponse;
use crate::{Error, Result};

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Allocate a new control request id.
///
/// Ids look like `req_<n>_<8 hex>`: `n` increases monotonically within the
/// process and the random suffix keeps ids unique across processes.
pub fn next_request_id() -> String {
    let n = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("req_{n}_{}", &suffix[..8])
}

#[derive(Debug, Default)]
struct Table {
    pending: HashSet<String>,
    responses: HashMap<String, ControlResponse>,
}

/// Pending control requests and their arrived responses.
///
/// The decoder task completes entries and callers wait on them; both sides
/// touch the table only under its lock.
#[derive(Debug, Default)]
pub(crate) struct ControlTable {
    table: Mutex<Table>,
    notify: Notify,
}

impl ControlTable {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start expecting a response for `request_id`.
    pub(crate) fn register(&self, request_id: &str) {
        self.lock().pending.insert(request_id.to_string());
    }

    /// Stop expecting a response and drop any stored one.
    pub(crate) fn forget(&self, request_id: &str) {
        let mut table = self.lock();
        table.pending.remove(request_id);
        table.responses.remove(request_id);
    }

    /// Store an arrived response and wake waiters.
    ///
    /// While the request is pending a later response replaces an earlier one.
    /// Responses nobody is waiting for are discarded. Returns whether the
    /// response was stored.
    pub(crate) fn complete(&self, response: ControlResponse) -> bool {
        {
            let mut table = self.lock();
            if !table.pending.contains(&response.request_id) {
                debug!(request_id = %response.request_id, "discarding unsolicited control response");
                return false;
            }
            let request_id = response.request_id.clone();
            if table.responses.insert(request_id, response).is_some() {
                debug!("control response replaced an earlier one");
            }
        }
        self.notify.notify_waiters();
        true
    }

    fn take(&self, request_id: &str) -> Option<ControlResponse> {
        let mut table = self.lock();
        let response = table.responses.remove(request_id)?;
        table.pending.remove(request_id);
        Some(response)
    }

    /// Wait up to `timeout` for the response to `request_id`.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if nothing arrived in time; the request is then
    /// forgotten and a late response is discarded.
    pub(crate) async fn wait(&self, request_id: &str, timeout: Duration) -> Result<ControlResponse> {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                // Register before checking so a completion in between is not missed.
                notified.as_mut().enable();
                if let Some(response) = self.take(request_id) {
                    return response;
                }
                notified.await;
            }
        })
        .await;

        match waited {
            Ok(response) => Ok(response),
            Err(_) => {
                self.forget(request_id);
                Err(Error::timeout("control request", timeout))
            }
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}
