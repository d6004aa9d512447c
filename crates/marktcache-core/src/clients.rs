//! Open pages controlled (or not yet controlled) by the engine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::control::ClientMessage;

/// Buffer size for each page's message channel.
/// Broadcasts are rare (one per resync), so a small buffer is plenty.
const PAGE_CHANNEL_BUFFER: usize = 16;

pub type PageId = u64;

struct Page {
    url: String,
    controller: Option<String>,
    tx: mpsc::Sender<ClientMessage>,
}

#[derive(Default)]
struct Inner {
    next_id: PageId,
    pages: BTreeMap<PageId, Page>,
}

/// Registry of open pages. Clone is cheap and shares the registry.
#[derive(Clone, Default)]
pub struct Clients {
    inner: Arc<Mutex<Inner>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Register a page. It starts out uncontrolled; the returned receiver
    /// gets every broadcast while the page stays open.
    pub fn open(&self, url: &str) -> (PageId, mpsc::Receiver<ClientMessage>) {
        let (tx, rx) = mpsc::channel(PAGE_CHANNEL_BUFFER);
        let id = self.with_inner(|inner| {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.pages.insert(
                id,
                Page {
                    url: url.to_string(),
                    controller: None,
                    tx,
                },
            );
            id
        });
        debug!(page = id, url, "Page opened");
        (id, rx)
    }

    pub fn close(&self, id: PageId) -> bool {
        self.with_inner(|inner| inner.pages.remove(&id).is_some())
    }

    pub fn len(&self) -> usize {
        self.with_inner(|inner| inner.pages.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The version controlling a page, if any.
    pub fn controller(&self, id: PageId) -> Option<String> {
        self.with_inner(|inner| inner.pages.get(&id).and_then(|p| p.controller.clone()))
    }

    /// Make `version` the controller of every open page. Returns how many
    /// pages changed controller.
    pub fn claim(&self, version: &str) -> usize {
        self.with_inner(|inner| {
            let mut claimed = 0;
            for (id, page) in inner.pages.iter_mut() {
                if page.controller.as_deref() != Some(version) {
                    debug!(page = id, url = %page.url, version, "Page claimed");
                    page.controller = Some(version.to_string());
                    claimed += 1;
                }
            }
            claimed
        })
    }

    /// Deliver `message` to every open page. Pages whose receiver is gone are
    /// dropped from the registry. Returns the number of pages reached.
    pub fn broadcast(&self, message: &ClientMessage) -> usize {
        self.with_inner(|inner| {
            let mut delivered = 0;
            inner.pages.retain(|id, page| match page.tx.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(page = id, "Page message buffer full, dropping message");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(page = id, "Page closed, removing");
                    false
                }
            });
            delivered
        })
    }
}
