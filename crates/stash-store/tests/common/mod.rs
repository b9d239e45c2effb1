//! Record store contract shared by every backend's integration tests.
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use stash_store::{NewRecord, PageRequest, Record, RecordOrder, RecordPatch, RecordStore, StoreError};

pub fn named(name: &str) -> NewRecord {
    NewRecord::new(name, "author-1")
}

pub async fn seed(store: &dyn RecordStore, downloads: &[u64]) -> Vec<Record> {
    let mut out = Vec::new();
    for (i, count) in downloads.iter().enumerate() {
        let record = store
            .put(NewRecord {
                download_count: *count,
                ..named(&format!("file-{i}"))
            })
            .await
            .unwrap();
        out.push(record);
    }
    out
}

/// Walks every page of `order` and returns the ids page by page.
pub async fn collect_pages(store: &dyn RecordStore, order: RecordOrder, limit: u32) -> Vec<Vec<Record>> {
    let mut pages = Vec::new();
    let mut request = PageRequest::first(limit);
    loop {
        let page = store.list(order, &request).await.unwrap();
        pages.push(page.items);
        match page.next_page_token {
            Some(token) => request = PageRequest::with_token(limit, token),
            None => return pages,
        }
    }
}

pub async fn put_then_get_returns_input_plus_id(store: &dyn RecordStore) {
    let uploaded_at: DateTime<Utc> = DateTime::parse_from_rfc3339("2025-03-09T14:02:25.652420823Z")
        .unwrap()
        .with_timezone(&Utc);
    let input = NewRecord {
        download_count: 7,
        encrypted: true,
        additional_data: Some("blob-1".into()),
        uploaded_at,
        ..named("secret.txt")
    };

    let stored = store.put(input.clone()).await.unwrap();
    assert!(!stored.id.is_empty());
    assert_eq!(stored.name, input.name);
    assert_eq!(stored.author, input.author);
    assert_eq!(stored.download_count, input.download_count);
    assert_eq!(stored.encrypted, input.encrypted);
    assert_eq!(stored.additional_data, input.additional_data);
    assert_eq!(stored.uploaded_at, uploaded_at);

    assert_eq!(store.get(&stored.id).await.unwrap(), Some(stored));
}

pub async fn record_lifecycle(store: &dyn RecordStore) {
    let alice = store.put(named("Alice")).await.unwrap();
    assert_eq!(store.get(&alice.id).await.unwrap().as_ref(), Some(&alice));

    let updated = store
        .update(RecordPatch::new(&alice.id).download_count(5))
        .await
        .unwrap();
    assert_eq!(updated.download_count, 5);
    assert_eq!(store.get(&alice.id).await.unwrap().unwrap().download_count, 5);

    store.bump_download_count(&alice.id).await.unwrap();
    store.bump_download_count(&alice.id).await.unwrap();
    assert_eq!(store.get(&alice.id).await.unwrap().unwrap().download_count, 7);

    let err = store
        .update(RecordPatch::new(&alice.id).download_count(1))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidUpdate { .. }));

    store.delete(&alice.id).await.unwrap();
    assert_eq!(store.get(&alice.id).await.unwrap(), None);
}

pub async fn missing_ids_follow_the_contract(store: &dyn RecordStore) {
    assert_eq!(store.get("nope").await.unwrap(), None);
    store.bump_download_count("nope").await.unwrap();
    store.delete("nope").await.unwrap();

    let err = store.update(RecordPatch::new("nope").name("x")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
}

/// Ids carrying URL delimiters must never resolve to a different record.
pub async fn delimiter_ids_never_alias_other_records(store: &dyn RecordStore) {
    let known = store.put(named("known.txt")).await.unwrap();

    for suffix in ["?x", "#tail", "/other"] {
        let alias = format!("{}{suffix}", known.id);
        assert_eq!(store.get(&alias).await.unwrap(), None, "{alias}");
        let err = store
            .update(RecordPatch::new(&alias).name("hijack"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)), "{alias}");
        store.bump_download_count(&alias).await.unwrap();
        store.delete(&alias).await.unwrap();
    }

    assert_eq!(store.get(&known.id).await.unwrap(), Some(known));
}

pub async fn name_search_is_case_insensitive_substring(store: &dyn RecordStore) {
    for name in ["bob", "Bobby", "alice", "JIMBOB", "carol"] {
        store.put(named(name)).await.unwrap();
    }

    let page = store.query_by_name("BOB", &PageRequest::first(10)).await.unwrap();
    let mut names: Vec<_> = page.items.iter().map(|r| r.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Bobby", "JIMBOB", "bob"]);
    assert_eq!(page.total_count, 3);
    assert_eq!(page.next_page_token, None);

    let first = store.query_by_name("bob", &PageRequest::first(2)).await.unwrap();
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.total_count, 3);
    let token = first.next_page_token.expect("second page");
    let second = store
        .query_by_name("bob", &PageRequest::with_token(2, token))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.total_count, 3);
    assert!(first.items.iter().all(|r| r.id != second.items[0].id));

    let none = store.query_by_name("zed", &PageRequest::first(5)).await.unwrap();
    assert!(none.items.is_empty());
    assert_eq!(none.total_count, 0);
}

pub async fn pages_partition_the_ordering(store: &dyn RecordStore) {
    let seeded = seed(store, &[3, 9, 1, 9, 5, 0, 4]).await;

    let everything = store
        .list(RecordOrder::DownloadsFirst, &PageRequest::first(100))
        .await
        .unwrap();
    assert_eq!(everything.total_count, seeded.len() as u64);
    let counts: Vec<u64> = everything.items.iter().map(|r| r.download_count).collect();
    assert_eq!(counts, vec![9, 9, 5, 4, 3, 1, 0]);

    let pages = collect_pages(store, RecordOrder::DownloadsFirst, 3).await;
    assert_eq!(pages.len(), 3);
    assert!(pages.iter().all(|page| page.len() <= 3));
    assert_eq!(pages.concat(), everything.items);

    let unordered = collect_pages(store, RecordOrder::Unordered, 2).await.concat();
    let mut ids: Vec<_> = unordered.iter().map(|r| r.id.clone()).collect();
    let mut expected: Vec<_> = seeded.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    expected.sort();
    assert_eq!(ids, expected);
}

pub async fn newest_first_sorts_by_upload_time(store: &dyn RecordStore) {
    let base = Utc::now();
    for (name, age_secs) in [("old", 300), ("newest", 0), ("middle", 60)] {
        store
            .put(NewRecord {
                uploaded_at: base - chrono::Duration::seconds(age_secs),
                ..named(name)
            })
            .await
            .unwrap();
    }

    let page = store.list(RecordOrder::NewestFirst, &PageRequest::first(10)).await.unwrap();
    let names: Vec<_> = page.items.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["newest", "middle", "old"]);
    assert_eq!(page.next_page_token, None);
}

pub async fn invalid_page_requests_are_rejected(store: &dyn RecordStore) {
    let err = store.list(RecordOrder::Unordered, &PageRequest::first(0)).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidPageRequest(_)));

    let err = store
        .query_by_name("a", &PageRequest::with_token(5, "abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidPageToken(_)));
}
