//! Work enumeration: walk the corpus hierarchy into a flat work list.
//!
//! The corpus is organised two folder levels deep: the root holds period
//! folders (`2024-01`, …), each period holds batch folders (`001`, …), and
//! each batch holds the leaf documents. The walk is depth-first with every
//! level sorted by name, so the same corpus always yields the same list —
//! which is what makes run reports and test fixtures reproducible.
//!
//! A subtree whose listing fails is logged and skipped; partial enumeration
//! shrinks the work list but never aborts the run. Only an unlistable root
//! is fatal.

use crate::error::MillError;
use crate::store::{ContentKind, StoreAdapter};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One unit of input content, immutable once enumerated.
///
/// The list of work items is produced once per run and shared read-only
/// across workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identifier, unique across the corpus (the store's object id).
    pub id: String,
    /// Display name, e.g. `receipt-0042.pdf`.
    pub name: String,
    /// Ancestor folder names, outermost first: `[period, batch]`.
    pub parent_path: Vec<String>,
    pub kind: ContentKind,
    pub size: Option<u64>,
}

impl WorkItem {
    /// The item's name without its final extension, used to derive its
    /// destination folder name.
    pub fn stem(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.name)
    }
}

/// Walk the hierarchy under `root_id` and return every leaf item of the
/// requested kind, in deterministic order.
pub async fn enumerate(
    store: &StoreAdapter,
    root_id: &str,
    kind: ContentKind,
) -> Result<Vec<WorkItem>, MillError> {
    let mut periods = store
        .list_folders(root_id)
        .await
        .map_err(|e| MillError::RootNotFound {
            id: root_id.to_string(),
            detail: e.to_string(),
        })?;
    periods.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("enumerating {} period folders under '{root_id}'", periods.len());

    let mut items = Vec::new();
    for period in &periods {
        let mut batches = match store.list_folders(&period.id).await {
            Ok(b) => b,
            Err(e) => {
                warn!("skipping period '{}': listing failed: {e}", period.name);
                continue;
            }
        };
        batches.sort_by(|a, b| a.name.cmp(&b.name));

        for batch in &batches {
            let mut entries = match store.list_content(&batch.id, Some(kind)).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "skipping batch '{}/{}': listing failed: {e}",
                        period.name, batch.name
                    );
                    continue;
                }
            };
            entries.sort_by(|a, b| a.name.cmp(&b.name));

            items.extend(entries.into_iter().map(|entry| WorkItem {
                id: entry.id,
                name: entry.name,
                parent_path: vec![period.name.clone(), batch.name.clone()],
                kind,
                size: entry.size,
            }));
        }
    }

    debug!("enumerated {} work items", items.len());
    Ok(items)
}
