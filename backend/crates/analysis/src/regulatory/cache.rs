use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};

use labelcheck_db::regulatory::models::RegulatoryDocument;
use labelcheck_db::regulatory::repositories::RegulatoryRepository;

use super::context::{active_in_order, build_context, RegulatoryContext};
use crate::clock::Clock;

struct Snapshot {
    context: Arc<RegulatoryContext>,
    documents: Arc<Vec<RegulatoryDocument>>,
    /// `None` once invalidated.
    fetched_at: Option<DateTime<Utc>>,
}

/// Process-wide memo of the rendered regulatory context with a TTL.
///
/// Readers share one snapshot; a refresh builds a new one and swaps it in.
/// Repository failures degrade to the last good snapshot, or to an empty
/// context when there is none.
pub struct RegulatoryContextCache {
    repo: Arc<dyn RegulatoryRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_chars: usize,
    snapshot: RwLock<Option<Snapshot>>,
    refresh: Mutex<()>,
}

impl RegulatoryContextCache {
    pub fn new(
        repo: Arc<dyn RegulatoryRepository>,
        clock: Arc<dyn Clock>,
        ttl_secs: u64,
        max_chars: usize,
    ) -> Self {
        Self {
            repo,
            clock,
            ttl: Duration::seconds(ttl_secs as i64),
            max_chars,
            snapshot: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Current context, refreshing from the repository if expired.
    pub async fn get(&self) -> Arc<RegulatoryContext> {
        match self.fresh(|s| s.context.clone()).await {
            Some(context) => context,
            None => self.refresh().await.0,
        }
    }

    /// Active documents in render order.
    pub async fn get_active_documents(&self) -> Arc<Vec<RegulatoryDocument>> {
        match self.fresh(|s| s.documents.clone()).await {
            Some(documents) => documents,
            None => self.refresh().await.1,
        }
    }

    /// Force the next read to go to the repository. The generation only moves
    /// if the reloaded text differs.
    pub async fn invalidate(&self) {
        if let Some(snapshot) = self.snapshot.write().await.as_mut() {
            snapshot.fetched_at = None;
        }
        tracing::debug!("regulatory context invalidated");
    }

    async fn fresh<T>(&self, pick: impl FnOnce(&Snapshot) -> T) -> Option<T> {
        let guard = self.snapshot.read().await;
        let snapshot = guard.as_ref()?;
        let fetched_at = snapshot.fetched_at?;
        if self.clock.now() - fetched_at < self.ttl {
            Some(pick(snapshot))
        } else {
            None
        }
    }

    async fn refresh(&self) -> (Arc<RegulatoryContext>, Arc<Vec<RegulatoryDocument>>) {
        let _refreshing = self.refresh.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(hit) = self.fresh(|s| (s.context.clone(), s.documents.clone())).await {
            return hit;
        }

        let fetched = self.repo.list_active_documents().await;
        let mut guard = self.snapshot.write().await;

        let documents = match fetched {
            Ok(documents) => documents,
            Err(e) => {
                return match guard.as_ref() {
                    Some(stale) => {
                        tracing::warn!(
                            error = %e,
                            generation = stale.context.generation,
                            "regulatory documents unavailable, serving stale context"
                        );
                        (stale.context.clone(), stale.documents.clone())
                    }
                    None => {
                        tracing::warn!(
                            error = %e,
                            "regulatory documents unavailable, continuing without reference context"
                        );
                        (Arc::new(RegulatoryContext::empty(0)), Arc::new(Vec::new()))
                    }
                };
            }
        };

        let ordered: Vec<RegulatoryDocument> =
            active_in_order(&documents).into_iter().cloned().collect();
        let (text, included, omitted) = build_context(&ordered, self.max_chars);

        let generation = match guard.as_ref() {
            Some(previous) if previous.context.text.as_ref() == text => previous.context.generation,
            Some(previous) => previous.context.generation + 1,
            None => 1,
        };
        if omitted > 0 {
            tracing::warn!(
                included,
                omitted,
                max_chars = self.max_chars,
                "regulatory context truncated"
            );
        }
        tracing::info!(documents = included, generation, "regulatory context loaded");

        let context = Arc::new(RegulatoryContext {
            text: Arc::from(text),
            document_count: included,
            omitted_count: omitted,
            generation,
        });
        let documents = Arc::new(ordered);
        *guard = Some(Snapshot {
            context: context.clone(),
            documents: documents.clone(),
            fetched_at: Some(self.clock.now()),
        });
        (context, documents)
    }
}
