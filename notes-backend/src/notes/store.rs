//! NoteStore: cache-aside reads and write-invalidate mutations.
//!
//! Reads try the cache, fall through to the repository on a miss, and
//! repopulate. Writes hit the repository first and only then evict the
//! affected keys; a failed write evicts nothing.
//!
//! Repopulation goes through a fill ticket: a read that started before a
//! concurrent eviction does not put its older copy back into the cache.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::repository::{NoteRepository, NoteUpdate};
use crate::cache::CacheManager;
use crate::error::{NotesError, Result};
use crate::models::{NewNote, Note, NotePatch};

/// Cache key for the full listing
pub const ALL_NOTES_KEY: &str = "notes:all";

/// Cache key for a single note
pub fn note_key(id: &str) -> String {
    format!("notes:{}", id)
}

pub struct NoteStore {
    repo: Arc<dyn NoteRepository>,
    cache: Arc<CacheManager>,
}

impl NoteStore {
    pub fn new(repo: Arc<dyn NoteRepository>, cache: Arc<CacheManager>) -> Self {
        Self { repo, cache }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub async fn list(&self) -> Result<Vec<Note>> {
        if let Some(notes) = self.cache.get_json::<Vec<Note>>(ALL_NOTES_KEY).await {
            return Ok(notes);
        }
        let ticket = self.cache.fill_ticket();
        let notes = self.repo.list_all().await?;
        self.cache.fill_json(ALL_NOTES_KEY, &notes, ticket).await;
        Ok(notes)
    }

    /// NotFound is never cached.
    pub async fn get(&self, id: &str) -> Result<Note> {
        let key = note_key(id);
        if let Some(note) = self.cache.get_json::<Note>(&key).await {
            return Ok(note);
        }
        let ticket = self.cache.fill_ticket();
        match self.repo.get_by_id(id).await? {
            Some(note) => {
                self.cache.fill_json(&key, &note, ticket).await;
                Ok(note)
            }
            None => Err(NotesError::NotFound(id.to_string())),
        }
    }

    pub async fn create(&self, input: NewNote) -> Result<Note> {
        input.validate().map_err(NotesError::Validation)?;

        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4().to_string(),
            title: input.title,
            content: input.content,
            tags: input.tags,
            created_at: now,
            updated_at: now,
        };

        let repo = Arc::clone(&self.repo);
        let cache = Arc::clone(&self.cache);
        let created = detached(async move {
            let created = repo.create(note).await?;
            cache.evict(ALL_NOTES_KEY).await;
            Ok(created)
        })
        .await?;

        log::info!("[NOTES] Created note {}", created.id);
        Ok(created)
    }

    pub async fn update(&self, id: &str, patch: NotePatch) -> Result<Note> {
        patch.validate().map_err(NotesError::Validation)?;
        if patch.is_empty() {
            log::debug!("[NOTES] Empty patch for {}, only updated_at changes", id);
        }

        // Confirming read; may populate the cache, which the eviction below clears.
        let existing = self.get(id).await?;

        let min_next = existing.updated_at + Duration::microseconds(1);
        let fields = NoteUpdate {
            title: patch.title,
            content: patch.content,
            tags: patch.tags,
            updated_at: Utc::now().max(min_next),
        };

        let repo = Arc::clone(&self.repo);
        let cache = Arc::clone(&self.cache);
        let owned_id = id.to_string();
        let updated = detached(async move {
            let updated = repo.update_partial(&owned_id, fields).await?;
            cache.evict(&note_key(&owned_id)).await;
            cache.evict(ALL_NOTES_KEY).await;
            Ok(updated)
        })
        .await?;

        log::info!("[NOTES] Updated note {}", id);
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.get(id).await?;

        let repo = Arc::clone(&self.repo);
        let cache = Arc::clone(&self.cache);
        let owned_id = id.to_string();
        detached(async move {
            repo.delete(&owned_id).await?;
            cache.evict(&note_key(&owned_id)).await;
            cache.evict(ALL_NOTES_KEY).await;
            Ok(())
        })
        .await?;

        log::info!("[NOTES] Deleted note {}", id);
        Ok(true)
    }
}

/// Persist + evict run as their own task so a cancelled caller cannot leave
/// the durable write applied and the eviction skipped.
async fn detached<T, F>(fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| NotesError::StoreUnavailable(format!("write task aborted: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::FlakyLayer;
    use crate::cache::{CacheLayer, LruLayer, TtlLayer};
    use crate::db::Database;
    use crate::notes::repository::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Wraps the SQLite store, counting reads and optionally failing or
    /// slowing down writes.
    struct InstrumentedRepo {
        inner: Database,
        reads: AtomicUsize,
        fail_writes: AtomicBool,
        write_delay_ms: AtomicU64,
    }

    impl InstrumentedRepo {
        fn check_write(&self) -> std::result::Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(StoreError::Task("disk I/O error".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl NoteRepository for InstrumentedRepo {
        async fn create(&self, note: Note) -> std::result::Result<Note, StoreError> {
            self.check_write()?;
            self.inner.create(note).await
        }

        async fn get_by_id(&self, id: &str) -> std::result::Result<Option<Note>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_by_id(id).await
        }

        async fn list_all(&self) -> std::result::Result<Vec<Note>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.list_all().await
        }

        async fn update_partial(
            &self,
            id: &str,
            fields: NoteUpdate,
        ) -> std::result::Result<Note, StoreError> {
            let delay = self.write_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            self.check_write()?;
            self.inner.update_partial(id, fields).await
        }

        async fn delete(&self, id: &str) -> std::result::Result<(), StoreError> {
            self.check_write()?;
            self.inner.delete(id).await
        }
    }

    struct Fixture {
        _dir: TempDir,
        repo: Arc<InstrumentedRepo>,
        store: NoteStore,
    }

    fn fixture_with_layers(layers: Vec<Arc<dyn CacheLayer>>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("notes.db").to_str().unwrap()).unwrap();
        let repo = Arc::new(InstrumentedRepo {
            inner: db,
            reads: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            write_delay_ms: AtomicU64::new(0),
        });
        let cache = Arc::new(CacheManager::new(
            "notes:",
            std::time::Duration::from_secs(30),
            layers,
        ));
        let store = NoteStore::new(repo.clone(), cache);
        Fixture { _dir: dir, repo, store }
    }

    fn fixture() -> Fixture {
        fixture_with_layers(vec![
            Arc::new(LruLayer::new("lru", 1000)),
            Arc::new(TtlLayer::new("ttl")),
        ])
    }

    fn new_note(title: &str) -> NewNote {
        NewNote {
            title: title.to_string(),
            content: format!("{} body", title),
            tags: Some(vec!["a".to_string(), "b".to_string()]),
        }
    }

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let f = fixture();
        let created = f.store.create(new_note("Groceries")).await.unwrap();
        assert_eq!(created.created_at, created.updated_at);

        let fetched = f.store.get(&created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_reads_are_served_from_cache() {
        let f = fixture();
        let created = f.store.create(new_note("Cached")).await.unwrap();

        f.store.get(&created.id).await.unwrap();
        f.store.get(&created.id).await.unwrap();
        f.store.list().await.unwrap();
        f.store.list().await.unwrap();

        // one repository read per key, the rest were cache hits
        assert_eq!(f.repo.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_list_reflects_create_after_cached_listing() {
        let f = fixture();
        assert!(f.store.list().await.unwrap().is_empty());

        let created = f.store.create(new_note("Fresh")).await.unwrap();
        let listed = f.store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
    }

    #[tokio::test]
    async fn test_update_changes_only_supplied_fields() {
        let f = fixture();
        let created = f.store.create(new_note("Original")).await.unwrap();
        // warm both keys
        f.store.get(&created.id).await.unwrap();
        f.store.list().await.unwrap();

        let patch = NotePatch {
            title: Some("X".to_string()),
            ..Default::default()
        };
        let updated = f.store.update(&created.id, patch).await.unwrap();
        assert_eq!(updated.title, "X");

        let fetched = f.store.get(&created.id).await.unwrap();
        assert_eq!(fetched.title, "X");
        assert_eq!(fetched.content, created.content);
        assert_eq!(fetched.tags, created.tags);
        assert_eq!(fetched.created_at, created.created_at);
        assert!(fetched.updated_at > created.updated_at);

        let listed = f.store.list().await.unwrap();
        assert_eq!(listed[0].title, "X");
    }

    #[tokio::test]
    async fn test_empty_patch_still_refreshes_updated_at() {
        let f = fixture();
        let created = f.store.create(new_note("Touch")).await.unwrap();
        let updated = f.store.update(&created.id, NotePatch::default()).await.unwrap();
        assert!(updated.updated_at > created.updated_at);
        assert_eq!(updated.title, created.title);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let f = fixture();
        let created = f.store.create(new_note("Doomed")).await.unwrap();
        f.store.get(&created.id).await.unwrap();
        f.store.list().await.unwrap();

        assert!(f.store.delete(&created.id).await.unwrap());
        assert!(matches!(f.store.get(&created.id).await, Err(NotesError::NotFound(_))));
        assert!(f.store.list().await.unwrap().iter().all(|n| n.id != created.id));
    }

    #[tokio::test]
    async fn test_missing_note_errors_and_is_not_cached() {
        let f = fixture();
        assert!(matches!(f.store.get("ghost").await, Err(NotesError::NotFound(_))));
        assert!(matches!(f.store.get("ghost").await, Err(NotesError::NotFound(_))));
        assert_eq!(f.repo.reads.load(Ordering::SeqCst), 2);

        assert!(matches!(
            f.store.update("ghost", NotePatch::default()).await,
            Err(NotesError::NotFound(_))
        ));
        assert!(matches!(f.store.delete("ghost").await, Err(NotesError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_cached_entries() {
        let f = fixture();
        let created = f.store.create(new_note("Stable")).await.unwrap();
        f.store.get(&created.id).await.unwrap();
        f.store.list().await.unwrap();
        let reads_before = f.repo.reads.load(Ordering::SeqCst);

        f.repo.fail_writes.store(true, Ordering::SeqCst);
        let patch = NotePatch {
            title: Some("Never".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            f.store.update(&created.id, patch).await,
            Err(NotesError::StoreUnavailable(_))
        ));
        assert!(f.store.delete(&created.id).await.is_err());

        // nothing was evicted: both keys still hit the cache
        assert_eq!(f.store.get(&created.id).await.unwrap().title, "Stable");
        assert_eq!(f.store.list().await.unwrap().len(), 1);
        assert_eq!(f.repo.reads.load(Ordering::SeqCst), reads_before);
    }

    #[tokio::test]
    async fn test_failed_create_does_not_evict_listing() {
        let f = fixture();
        f.store.list().await.unwrap();
        f.repo.fail_writes.store(true, Ordering::SeqCst);
        assert!(f.store.create(new_note("Lost")).await.is_err());
        f.store.list().await.unwrap();
        assert_eq!(f.repo.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_blank_title() {
        let f = fixture();
        let err = f.store.create(new_note("  ")).await.unwrap_err();
        assert!(matches!(err, NotesError::Validation(_)));
    }

    #[tokio::test]
    async fn test_broken_cache_layer_does_not_fail_operations() {
        let f = fixture_with_layers(vec![Arc::new(FlakyLayer::new())]);
        let created = f.store.create(new_note("Resilient")).await.unwrap();
        assert_eq!(f.store.get(&created.id).await.unwrap().id, created.id);
        assert_eq!(f.store.list().await.unwrap().len(), 1);
        f.store
            .update(&created.id, NotePatch { content: Some("new".into()), ..Default::default() })
            .await
            .unwrap();
        assert!(f.store.delete(&created.id).await.unwrap());
        assert!(f.store.cache().stats().degraded > 0);
    }

    #[tokio::test]
    async fn test_get_after_completed_update_is_never_older() {
        let f = Arc::new(fixture());
        let created = f.store.create(new_note("Race")).await.unwrap();

        for round in 0..20 {
            let title = format!("v{}", round);
            let writer = {
                let f = Arc::clone(&f);
                let id = created.id.clone();
                let title = title.clone();
                tokio::spawn(async move {
                    let patch = NotePatch { title: Some(title), ..Default::default() };
                    f.store.update(&id, patch).await.unwrap()
                })
            };
            let reader = {
                let f = Arc::clone(&f);
                let id = created.id.clone();
                tokio::spawn(async move { f.store.get(&id).await.unwrap() })
            };
            let (written, _) = futures_util::future::join(writer, reader).await;
            let written = written.unwrap();

            // a read started after the write completed sees it
            let after = f.store.get(&created.id).await.unwrap();
            assert_eq!(after.title, title);
            assert!(after.updated_at >= written.updated_at);
        }
    }

    #[tokio::test]
    async fn test_cancelled_update_still_evicts() {
        let f = Arc::new(fixture());
        let created = f.store.create(new_note("Draft")).await.unwrap();
        f.store.get(&created.id).await.unwrap();
        f.store.list().await.unwrap();
        let cache = f.store.cache();
        assert!(cache.get(&note_key(&created.id)).await.is_some());
        assert!(cache.get(ALL_NOTES_KEY).await.is_some());

        f.repo.write_delay_ms.store(150, Ordering::SeqCst);
        let caller = {
            let f = Arc::clone(&f);
            let id = created.id.clone();
            tokio::spawn(async move {
                let patch = NotePatch { title: Some("Renamed".to_string()), ..Default::default() };
                f.store.update(&id, patch).await
            })
        };
        // abort while the durable write is still in progress
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert!(cache.get(&note_key(&created.id)).await.is_none());
        assert!(cache.get(ALL_NOTES_KEY).await.is_none());

        let reads = f.repo.reads.load(Ordering::SeqCst);
        assert_eq!(f.store.get(&created.id).await.unwrap().title, "Renamed");
        assert_eq!(f.store.list().await.unwrap()[0].title, "Renamed");
        assert_eq!(f.repo.reads.load(Ordering::SeqCst), reads + 2);
    }
}
