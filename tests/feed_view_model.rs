use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use notenest::{
    FeedError, FeedResult, FeedViewModel, Identity, NewNote, Note, NotesRepository,
    RefreshOutcome,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

/// One scripted `fetch_all` response: optionally wait on a gate, optionally
/// return a fixed list instead of the live collection.
#[derive(Default)]
struct FetchStep {
    gate: Option<Arc<Notify>>,
    notes: Option<Vec<Note>>,
}

#[derive(Default)]
struct ScriptedRepository {
    notes: Mutex<Vec<Note>>,
    fetch_script: Mutex<VecDeque<FetchStep>>,
    calls: Mutex<Vec<String>>,
    created: Mutex<Vec<NewNote>>,
    fail_store: AtomicBool,
    fail_create: AtomicBool,
    fail_fetch: AtomicBool,
    /// Likes other clients add alongside each of ours.
    concurrent_likes: AtomicU64,
    next_id: AtomicU64,
}

impl ScriptedRepository {
    fn with_notes(notes: Vec<Note>) -> Self {
        Self {
            notes: Mutex::new(notes),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl NotesRepository for ScriptedRepository {
    async fn fetch_all(&self) -> FeedResult<Vec<Note>> {
        self.record("fetch_all");
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(FeedError::Transport("connection reset".to_string()));
        }
        let step = self.fetch_script.lock().unwrap().pop_front().unwrap_or_default();
        let snapshot = self.notes.lock().unwrap().clone();
        if let Some(gate) = step.gate {
            gate.notified().await;
        }
        Ok(step.notes.unwrap_or(snapshot))
    }

    async fn increment_likes(&self, note_id: &str) -> FeedResult<()> {
        self.record(format!("increment_likes:{}", note_id));
        let extra = self.concurrent_likes.load(Ordering::SeqCst);
        let mut notes = self.notes.lock().unwrap();
        let note = notes
            .iter_mut()
            .find(|n| n.id == note_id)
            .ok_or_else(|| FeedError::NotFound(note_id.to_string()))?;
        note.likes += 1 + extra;
        Ok(())
    }

    async fn store_file(&self, _bytes: Vec<u8>, suggested_name: &str) -> FeedResult<String> {
        self.record(format!("store_file:{}", suggested_name));
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(FeedError::Transport("upload interrupted".to_string()));
        }
        Ok(format!("https://files.example/{}", suggested_name))
    }

    async fn create_note(&self, record: NewNote) -> FeedResult<Note> {
        self.record("create_note");
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(FeedError::Transport("record write timed out".to_string()));
        }
        self.created.lock().unwrap().push(record.clone());
        let mut note = Note::create(record);
        note.id = format!("new-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.notes.lock().unwrap().push(note.clone());
        Ok(note)
    }

    async fn ensure_identity(&self) -> FeedResult<Identity> {
        self.record("ensure_identity");
        Ok(Identity::registered("uid-alice".to_string(), "alice".to_string()))
    }

    fn set_identity(&self, _identity: Option<Identity>) {}
}

fn note(id: &str, subject: &str, likes: u64, downloads: u64, created: Option<i64>) -> Note {
    Note {
        id: id.to_string(),
        title: format!("Notes {}", id),
        subject: subject.to_string(),
        author: "tester".to_string(),
        file_url: format!("https://files.example/{}.pdf", id),
        created_at: created.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
        downloads,
        likes,
        owner_uid: None,
    }
}

fn two_note_cache() -> Vec<Note> {
    vec![
        note("n1", "Math", 5, 10, Some(1_000)),
        note("n2", "Physics", 9, 2, Some(2_000)),
    ]
}

fn ids(notes: &[Note]) -> Vec<String> {
    notes.iter().map(|n| n.id.clone()).collect()
}

async fn loaded_feed(notes: Vec<Note>) -> FeedViewModel<ScriptedRepository> {
    let feed = FeedViewModel::new(ScriptedRepository::with_notes(notes));
    feed.refresh().await.unwrap();
    feed
}

#[tokio::test]
async fn trending_orders_by_likes() {
    let feed = loaded_feed(two_note_cache()).await;
    feed.set_sort_key("trending").unwrap();
    assert_eq!(ids(&feed.derive_display_list().unwrap()), vec!["n2", "n1"]);
}

#[tokio::test]
async fn default_view_is_all_subjects_newest_first() {
    let feed = loaded_feed(two_note_cache()).await;
    assert_eq!(feed.subject_filter(), "all");
    assert_eq!(ids(&feed.derive_display_list().unwrap()), vec!["n2", "n1"]);

    feed.set_sort_key("downloads").unwrap();
    assert_eq!(ids(&feed.derive_display_list().unwrap()), vec!["n1", "n2"]);
}

#[tokio::test]
async fn subject_filter_maps_catalog_id_to_name() {
    let feed = loaded_feed(two_note_cache()).await;
    feed.set_subject_filter("math").unwrap();
    assert_eq!(ids(&feed.derive_display_list().unwrap()), vec!["n1"]);

    feed.set_subject_filter("all").unwrap();
    assert_eq!(feed.derive_display_list().unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_filter_or_sort_leaves_state_unchanged() {
    let feed = loaded_feed(two_note_cache()).await;
    feed.set_subject_filter("phy").unwrap();
    feed.set_sort_key("trending").unwrap();
    let before = feed.derive_display_list().unwrap();

    assert!(matches!(
        feed.set_subject_filter("astronomy"),
        Err(FeedError::Validation(_))
    ));
    assert!(matches!(
        feed.set_sort_key("oldest"),
        Err(FeedError::Validation(_))
    ));

    assert_eq!(feed.subject_filter(), "phy");
    assert_eq!(feed.sort_key().as_str(), "trending");
    assert_eq!(feed.derive_display_list().unwrap(), before);
}

#[tokio::test]
async fn sorted_views_are_monotonic_and_stable() {
    // Small deterministic generator; plenty of duplicate keys and missing timestamps.
    let mut seed: u64 = 0x5eed;
    let mut next = |modulo: u64| {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) % modulo
    };
    let subjects = ["Math", "Physics", "CS"];
    let cache: Vec<Note> = (0..60)
        .map(|i| {
            let created = match next(4) {
                0 => None,
                _ => Some(next(5) as i64 * 100),
            };
            note(
                &format!("g{}", i),
                subjects[next(3) as usize],
                next(4),
                next(4),
                created,
            )
        })
        .collect();
    let position = |id: &str| cache.iter().position(|n| n.id == id).unwrap();

    let feed = loaded_feed(cache.clone()).await;
    for key in ["newest", "trending", "downloads"] {
        feed.set_sort_key(key).unwrap();
        let display = feed.derive_display_list().unwrap();
        assert_eq!(display.len(), cache.len());

        for pair in display.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let (ka, kb) = match key {
                "newest" => (a.created_at.map(|t| t.timestamp()), b.created_at.map(|t| t.timestamp())),
                "trending" => (Some(a.likes as i64), Some(b.likes as i64)),
                _ => (Some(a.downloads as i64), Some(b.downloads as i64)),
            };
            assert!(ka >= kb, "{} not non-increasing: {:?} then {:?}", key, ka, kb);
            if ka == kb {
                assert!(position(&a.id) < position(&b.id), "{} lost cache order", key);
            }
        }
    }

    feed.set_subject_filter("cs").unwrap();
    assert!(feed
        .derive_display_list()
        .unwrap()
        .iter()
        .all(|n| n.subject == "CS"));
}

#[tokio::test]
async fn like_without_identity_requires_sign_in() {
    let feed = loaded_feed(two_note_cache()).await;
    let err = feed.like("n1").await.unwrap_err();
    assert!(matches!(err, FeedError::Auth(_)));
    assert!(!feed
        .repository()
        .calls()
        .iter()
        .any(|c| c.starts_with("increment_likes")));
}

#[tokio::test]
async fn like_of_uncached_note_is_not_found_without_repository_call() {
    let feed = loaded_feed(two_note_cache()).await;
    feed.set_identity(Some(Identity::anonymous()));
    let before = feed.derive_display_list().unwrap();

    let err = feed.like("missing-id").await.unwrap_err();
    assert_eq!(err, FeedError::NotFound("missing-id".to_string()));
    assert_eq!(feed.derive_display_list().unwrap(), before);
    assert!(!feed
        .repository()
        .calls()
        .iter()
        .any(|c| c.starts_with("increment_likes")));
}

#[tokio::test]
async fn repository_not_found_is_not_masked() {
    let feed = loaded_feed(two_note_cache()).await;
    feed.set_identity(Some(Identity::anonymous()));
    // Someone else deleted n1 after our last refresh.
    feed.repository().notes.lock().unwrap().retain(|n| n.id != "n1");

    let err = feed.like("n1").await.unwrap_err();
    assert_eq!(err, FeedError::NotFound("n1".to_string()));
}

#[tokio::test]
async fn like_shows_server_count_not_local_arithmetic() {
    let feed = loaded_feed(two_note_cache()).await;
    feed.set_identity(Some(Identity::anonymous()));
    feed.repository().concurrent_likes.store(3, Ordering::SeqCst);

    feed.like("n1").await.unwrap();

    let display = feed.derive_display_list().unwrap();
    let n1 = display.iter().find(|n| n.id == "n1").unwrap();
    assert_eq!(n1.likes, 5 + 1 + 3);
    assert_eq!(
        feed.repository().calls(),
        vec!["fetch_all", "increment_likes:n1", "fetch_all"]
    );
}

#[tokio::test]
async fn upload_creates_zeroed_record_and_caches_it_once() {
    let feed = loaded_feed(two_note_cache()).await;

    let created = feed
        .upload("Title", "Physics", "waves.pdf", b"%PDF-1.7".to_vec(), "alice")
        .await
        .unwrap();

    let records = feed.repository().created.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    assert_eq!((records[0].downloads, records[0].likes), (0, 0));
    assert_eq!(records[0].author, "alice");
    assert_eq!(records[0].subject, "Physics");
    assert_eq!(records[0].file_url, "https://files.example/waves.pdf");
    assert_eq!(records[0].owner_uid.as_deref(), Some("uid-alice"));

    let display = feed.derive_display_list().unwrap();
    assert_eq!(display.iter().filter(|n| n.id == created.id).count(), 1);
    assert_eq!(display.len(), 3);
}

#[tokio::test]
async fn upload_without_author_is_credited_to_guest() {
    let feed = loaded_feed(Vec::new()).await;
    feed.upload("Verbs", "Hindi", "verbs.txt", b"notes".to_vec(), "  ")
        .await
        .unwrap();
    let records = feed.repository().created.lock().unwrap().clone();
    assert_eq!(records[0].author, "Guest");
}

#[tokio::test]
async fn upload_validates_before_touching_the_repository() {
    let feed = loaded_feed(two_note_cache()).await;
    let cases = [
        ("   ", "Physics", b"data".to_vec()),
        ("Title", "All Notes", b"data".to_vec()),
        ("Title", "Astrology", b"data".to_vec()),
        ("Title", "Physics", Vec::new()),
    ];

    for (title, subject, bytes) in cases {
        let err = feed
            .upload(title, subject, "f.pdf", bytes, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Validation(_)), "{title:?}/{subject:?}");
    }
    assert_eq!(feed.repository().calls(), vec!["fetch_all"]);
}

#[tokio::test]
async fn upload_record_failure_surfaces_after_file_was_stored() {
    let feed = loaded_feed(two_note_cache()).await;
    feed.repository().fail_create.store(true, Ordering::SeqCst);
    let before = feed.derive_display_list().unwrap();

    let err = feed
        .upload("Title", "Math", "limits.pdf", b"data".to_vec(), "alice")
        .await
        .unwrap_err();

    assert!(matches!(err, FeedError::Transport(_)));
    let calls = feed.repository().calls();
    assert!(calls.contains(&"store_file:limits.pdf".to_string()));
    assert_eq!(calls.iter().filter(|c| *c == "create_note").count(), 1);
    assert_eq!(feed.derive_display_list().unwrap(), before);
}

#[tokio::test]
async fn upload_file_failure_never_creates_a_record() {
    let feed = loaded_feed(two_note_cache()).await;
    feed.repository().fail_store.store(true, Ordering::SeqCst);
    let before = feed.derive_display_list().unwrap();

    let err = feed
        .upload("Title", "Math", "limits.pdf", b"data".to_vec(), "alice")
        .await
        .unwrap_err();

    assert!(matches!(err, FeedError::Transport(_)));
    let calls = feed.repository().calls();
    assert!(calls.contains(&"store_file:limits.pdf".to_string()));
    assert!(!calls.iter().any(|c| c == "create_note"));
    assert!(feed.repository().created.lock().unwrap().is_empty());
    assert_eq!(feed.derive_display_list().unwrap(), before);
}

#[tokio::test]
async fn failed_refresh_propagates_and_keeps_previous_cache() {
    let feed = loaded_feed(two_note_cache()).await;
    feed.repository().fail_fetch.store(true, Ordering::SeqCst);

    assert!(matches!(feed.refresh().await, Err(FeedError::Transport(_))));
    assert_eq!(feed.derive_display_list().unwrap().len(), 2);

    feed.repository().fail_fetch.store(false, Ordering::SeqCst);
    assert_eq!(feed.refresh().await.unwrap(), RefreshOutcome::Applied);
}

#[tokio::test]
async fn slow_stale_refresh_does_not_overwrite_newer_cache() {
    let gate = Arc::new(Notify::new());
    let repo = ScriptedRepository::default();
    repo.fetch_script.lock().unwrap().extend([
        FetchStep {
            gate: Some(Arc::clone(&gate)),
            notes: Some(vec![note("old", "Math", 0, 0, Some(1))]),
        },
        FetchStep {
            gate: None,
            notes: Some(vec![note("fresh", "Math", 0, 0, Some(2))]),
        },
    ]);
    let feed = FeedViewModel::new(repo);

    let slow = feed.refresh();
    tokio::pin!(slow);
    // Park the first refresh on its gate so the second one overtakes it.
    assert!(timeout(Duration::from_millis(20), &mut slow).await.is_err());

    assert_eq!(feed.refresh().await.unwrap(), RefreshOutcome::Applied);
    assert_eq!(ids(&feed.derive_display_list().unwrap()), vec!["fresh"]);

    gate.notify_one();
    assert_eq!(slow.await.unwrap(), RefreshOutcome::Superseded);
    assert_eq!(ids(&feed.derive_display_list().unwrap()), vec!["fresh"]);
}

#[tokio::test]
async fn listeners_see_every_display_change() {
    let feed = FeedViewModel::new(ScriptedRepository::with_notes(two_note_cache()));
    let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let id = feed.on_display_list_changed(move |notes| {
        sink.lock().unwrap().push(ids(notes));
    });

    feed.refresh().await.unwrap();
    feed.set_sort_key("downloads").unwrap();
    feed.set_subject_filter("phy").unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            vec!["n2".to_string(), "n1".to_string()],
            vec!["n1".to_string(), "n2".to_string()],
            vec!["n2".to_string()],
        ]
    );

    assert!(feed.remove_listener(id));
    feed.set_subject_filter("all").unwrap();
    assert_eq!(seen.lock().unwrap().len(), 3);
    assert!(!feed.remove_listener(id));
}
