//! Integration tests for the delta cache
//!
//! These tests drive `DeltaCache` end to end over the in-memory stores:
//! - Full fetch, unchanged knowledge and delta merge cycles
//! - Knowledge gap fallback and its warning
//! - TTL precondition on both fetch paths
//! - Invalidation and forced refresh scoping
//! - Feature flag toggling and failure atomicity
//! - Single-flight behaviour under concurrent callers

use budget_delta_cache::{
    merge_flat_entities, merge_grouped_entities, CacheConfig, CacheStore, DeltaCache,
    DeltaCacheConfig, DeltaCacheEntry, DeltaCacheError, DeltaEntity, DeltaFeatureFlag,
    DeltaFetchOptions, DeltaResponse, GroupedEntity, MergeOptions, ResourceType,
};
use futures::future::{join_all, ready, Ready};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    id: String,
    #[serde(default)]
    deleted: bool,
}

impl DeltaEntity for Item {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

fn item(id: &str) -> Item {
    Item {
        id: id.to_string(),
        deleted: false,
    }
}

fn tombstone(id: &str) -> Item {
    Item {
        id: id.to_string(),
        deleted: true,
    }
}

type Response = anyhow::Result<DeltaResponse<Item>>;

/// Records every knowledge value the cache asks the upstream for
#[derive(Clone, Default)]
struct Upstream {
    calls: Arc<Mutex<Vec<Option<i64>>>>,
}

impl Upstream {
    fn fetcher<R>(&self, respond: R) -> impl FnMut(Option<i64>) -> Ready<Response>
    where
        R: Fn(Option<i64>) -> Response,
    {
        let calls = self.calls.clone();
        move |known| {
            calls.lock().push(known);
            ready(respond(known))
        }
    }

    fn calls(&self) -> Vec<Option<i64>> {
        self.calls.lock().clone()
    }
}

type MergeCall = (Vec<Item>, Vec<Item>, bool);

fn recording_merger(
    log: Arc<Mutex<Vec<MergeCall>>>,
) -> impl FnOnce(Vec<Item>, Vec<Item>, &MergeOptions<Item>) -> anyhow::Result<Vec<Item>> {
    move |snapshot: Vec<Item>, delta: Vec<Item>, options: &MergeOptions<Item>| {
        log.lock()
            .push((snapshot.clone(), delta.clone(), options.preserve_deleted));
        Ok(merge_flat_entities(snapshot, delta, options))
    }
}

fn flat(
    snapshot: Vec<Item>,
    delta: Vec<Item>,
    options: &MergeOptions<Item>,
) -> anyhow::Result<Vec<Item>> {
    Ok(merge_flat_entities(snapshot, delta, options))
}

fn options() -> DeltaFetchOptions<Item> {
    DeltaFetchOptions::with_ttl(Duration::from_secs(60))
}

fn new_cache() -> DeltaCache {
    DeltaCache::in_memory(CacheConfig::default(), DeltaCacheConfig::default())
}

async fn seed(cache: &DeltaCache, key: &str, budget_id: &str, data: Vec<Item>, knowledge: i64) {
    let upstream = Upstream::default();
    cache
        .fetch_with_delta(
            key,
            budget_id,
            upstream.fetcher(move |_| Ok(DeltaResponse::new(data.clone(), knowledge))),
            flat,
            options(),
        )
        .await
        .unwrap();
}

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: Level,
    fields: HashMap<String, String>,
}

/// Layer that keeps every event's fields for assertions
#[derive(Clone, Default)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CaptureLayer {
    fn warnings(&self) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.level == Level::WARN)
            .cloned()
            .collect()
    }
}

struct FieldRecorder<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldRecorder<'_> {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut FieldRecorder(&mut fields));
        self.events.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            fields,
        });
    }
}

#[tokio::test]
async fn test_round_trip_reports_cached_second_time() {
    let cache = new_cache();
    let key = ResourceType::Accounts.list_prefix("b1");
    let upstream = Upstream::default();

    let first = cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|known| match known {
                None => Ok(DeltaResponse::new(vec![item("a"), item("b")], 1000)),
                Some(_) => Ok(DeltaResponse::new(vec![], 1000)),
            }),
            flat,
            options(),
        )
        .await
        .unwrap();

    let second = cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![], 1000))),
            flat,
            options(),
        )
        .await
        .unwrap();

    assert_eq!(first.data, second.data);
    assert!(!first.was_cached);
    assert!(second.was_cached);
    assert!(!second.used_delta);
    assert_eq!(second.server_knowledge, 1000);
    assert_eq!(upstream.calls(), vec![None, Some(1000)]);
}

#[tokio::test]
async fn test_unchanged_knowledge_never_merges() {
    let cache = new_cache();
    let key = ResourceType::Payees.list_prefix("b1");
    seed(&cache, &key, "b1", vec![item("a")], 1000).await;

    let merges = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..5 {
        let upstream = Upstream::default();
        let result = cache
            .fetch_with_delta(
                &key,
                "b1",
                upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("ignored")], 1000))),
                recording_merger(merges.clone()),
                options(),
            )
            .await
            .unwrap();

        assert_eq!(result.data, vec![item("a")]);
        assert!(result.was_cached);
        assert!(!result.used_delta);
        assert_eq!(upstream.calls(), vec![Some(1000)]);
    }

    assert!(merges.lock().is_empty());
    let stats = cache.stats();
    assert_eq!(stats.merge_operations, 0);
    assert_eq!(stats.delta_hits, 5);
    assert_eq!(stats.delta_misses, 1);
}

#[tokio::test]
async fn test_delta_is_merged_once() {
    let cache = new_cache();
    let key = ResourceType::Payees.list_prefix("b1");
    seed(&cache, &key, "b1", vec![item("a")], 1000).await;

    let merges = Arc::new(Mutex::new(Vec::new()));
    let upstream = Upstream::default();
    let merge_options = MergeOptions {
        preserve_deleted: true,
        equality: None,
    };

    let result = cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("b")], 1005))),
            recording_merger(merges.clone()),
            options().merge_options(merge_options),
        )
        .await
        .unwrap();

    assert_eq!(result.data, vec![item("a"), item("b")]);
    assert!(result.used_delta);
    assert!(result.was_cached);
    assert_eq!(result.server_knowledge, 1005);
    assert_eq!(upstream.calls(), vec![Some(1000)]);

    let merges = merges.lock();
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0], (vec![item("a")], vec![item("b")], true));

    let stats = cache.stats();
    assert_eq!(stats.merge_operations, 1);
    assert_eq!(stats.delta_hits, 1);
    assert_eq!(cache.knowledge_store().get(&key), Some(1005));
}

#[tokio::test]
async fn test_delta_tombstone_removes_entity() {
    let cache = new_cache();
    let key = ResourceType::Accounts.list_prefix("b1");
    seed(&cache, &key, "b1", vec![item("a"), item("b")], 10).await;

    let upstream = Upstream::default();
    let result = cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![tombstone("a"), item("c")], 12))),
            flat,
            options(),
        )
        .await
        .unwrap();

    assert_eq!(result.data, vec![item("b"), item("c")]);
    assert!(result.used_delta);
}

#[tokio::test]
async fn test_knowledge_gap_forces_full_refresh() {
    let capture = CaptureLayer::default();
    let _subscriber =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

    let cache = new_cache();
    let key = ResourceType::Transactions.list_prefix("b1");
    seed(&cache, &key, "b1", vec![item("a")], 1000).await;

    let merges = Arc::new(Mutex::new(Vec::new()));
    let upstream = Upstream::default();
    let result = cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|known| match known {
                Some(_) => Ok(DeltaResponse::new(vec![item("b")], 1205)),
                None => Ok(DeltaResponse::new(
                    vec![item("a"), item("b"), tombstone("c")],
                    1205,
                )),
            }),
            recording_merger(merges.clone()),
            options(),
        )
        .await
        .unwrap();

    assert_eq!(upstream.calls(), vec![Some(1000), None]);
    assert_eq!(result.data, vec![item("a"), item("b")]);
    assert!(result.was_cached);
    assert!(!result.used_delta);
    assert_eq!(result.server_knowledge, 1205);
    assert!(merges.lock().is_empty());

    let stats = cache.stats();
    assert_eq!(stats.knowledge_gap_events, 1);
    assert_eq!(stats.delta_hits, 1);
    assert_eq!(stats.delta_misses, 1);
    assert_eq!(stats.merge_operations, 0);
    assert_eq!(cache.knowledge_store().get(&key), Some(1205));

    let warnings = capture.warnings();
    assert_eq!(warnings.len(), 1);
    let fields = &warnings[0].fields;
    assert_eq!(fields.get("gap").map(String::as_str), Some("205"));
    assert_eq!(fields.get("action").map(String::as_str), Some("full-refresh"));
    assert_eq!(fields.get("budget_id").map(String::as_str), Some("b1"));
    assert_eq!(fields.get("cache_key"), Some(&key));
}

#[tokio::test]
async fn test_gap_at_threshold_is_merged() {
    let cache = new_cache();
    let key = ResourceType::Transactions.list_prefix("b1");
    seed(&cache, &key, "b1", vec![item("a")], 1000).await;

    let upstream = Upstream::default();
    let result = cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("b")], 1100))),
            flat,
            options(),
        )
        .await
        .unwrap();

    assert!(result.used_delta);
    assert_eq!(upstream.calls(), vec![Some(1000)]);
    assert_eq!(cache.stats().knowledge_gap_events, 0);
}

#[tokio::test]
async fn test_missing_ttl_fails_before_fetch() {
    let cache = new_cache();
    let upstream = Upstream::default();

    let err = cache
        .fetch_with_delta(
            "accounts:list:b1",
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("a")], 1))),
            flat,
            DeltaFetchOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DeltaCacheError::Config(_)));
    assert!(err.to_string().contains("finite ttl"));
    assert!(err.to_string().contains("accounts:list:b1"));

    let err = assert_err!(
        cache
            .fetch_without_delta(
                "accounts:list:b1",
                upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("a")], 1))),
                DeltaFetchOptions::default(),
            )
            .await
    );
    assert!(err.to_string().contains("finite ttl"));
    assert!(err.to_string().contains("fetch_without_delta"));

    cache.config().delta_enabled.set(false);
    let err = cache
        .fetch_with_delta(
            "accounts:list:b1",
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("a")], 1))),
            flat,
            DeltaFetchOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("finite ttl"));

    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn test_invalidate_keeps_knowledge() {
    let cache = new_cache();
    let accounts = ResourceType::Accounts.list_prefix("b1");
    let payees = ResourceType::Payees.list_prefix("b1");
    seed(&cache, &accounts, "b1", vec![item("a")], 7).await;
    seed(&cache, &payees, "b1", vec![item("p")], 9).await;

    let removed = cache.invalidate("b1", None).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(cache.knowledge_store().get(&accounts), Some(7));
    assert_eq!(cache.knowledge_store().get(&payees), Some(9));
    assert!(cache.cache_store().get(&accounts).await.unwrap().is_none());

    // Without a snapshot to merge into, the next cycle is a full fetch
    let upstream = Upstream::default();
    let result = cache
        .fetch_with_delta(
            &accounts,
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("a"), item("b")], 8))),
            flat,
            options(),
        )
        .await
        .unwrap();
    assert_eq!(upstream.calls(), vec![None]);
    assert!(!result.was_cached);
    assert_eq!(result.data.len(), 2);
}

#[tokio::test]
async fn test_invalidate_single_resource() {
    let cache = new_cache();
    let accounts = ResourceType::Accounts.list_prefix("b1");
    let payees = ResourceType::Payees.list_prefix("b1");
    seed(&cache, &accounts, "b1", vec![item("a")], 7).await;
    seed(&cache, &payees, "b1", vec![item("p")], 9).await;

    let removed = assert_ok!(cache.invalidate("b1", Some(ResourceType::Payees)).await);

    assert_eq!(removed, 1);
    assert!(cache.cache_store().get(&payees).await.unwrap().is_none());
    assert!(cache.cache_store().get(&accounts).await.unwrap().is_some());
}

#[tokio::test]
async fn test_force_full_refresh_is_budget_scoped() {
    let cache = new_cache();
    let b1 = ResourceType::Accounts.list_prefix("b1");
    let b2 = ResourceType::Accounts.list_prefix("b2");
    seed(&cache, &b1, "b1", vec![item("a")], 3).await;
    seed(&cache, &b2, "b2", vec![item("a")], 4).await;

    cache.force_full_refresh(Some("b1"), None).await.unwrap();

    assert_eq!(cache.knowledge_store().get(&b1), None);
    assert!(cache.cache_store().get(&b1).await.unwrap().is_none());
    assert_eq!(cache.knowledge_store().get(&b2), Some(4));
    assert!(cache.cache_store().get(&b2).await.unwrap().is_some());
}

#[tokio::test]
async fn test_force_full_refresh_resource_and_global() {
    let cache = new_cache();
    let accounts = ResourceType::Accounts.list_prefix("b1");
    let payees = ResourceType::Payees.list_prefix("b1");
    seed(&cache, &accounts, "b1", vec![item("a")], 3).await;
    seed(&cache, &payees, "b1", vec![item("p")], 5).await;

    cache
        .force_full_refresh(Some("b1"), Some(ResourceType::Payees))
        .await
        .unwrap();
    assert_eq!(cache.knowledge_store().get(&payees), None);
    assert!(cache.cache_store().get(&payees).await.unwrap().is_none());
    assert_eq!(cache.knowledge_store().get(&accounts), Some(3));

    cache.force_full_refresh(None, None).await.unwrap();
    assert_eq!(cache.knowledge_store().stats().entry_count, 0);
    assert!(cache.cache_store().get(&accounts).await.unwrap().is_none());
}

#[tokio::test]
async fn test_forced_option_served_by_fresh_entry() {
    let cache = new_cache();
    let key = ResourceType::Months.list_prefix("b1");
    seed(&cache, &key, "b1", vec![item("m1")], 50).await;

    let upstream = Upstream::default();
    let result = cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("m2")], 60))),
            flat,
            options().force_full_refresh(true),
        )
        .await
        .unwrap();

    assert!(upstream.calls().is_empty());
    assert!(result.was_cached);
    assert!(!result.used_delta);
    assert_eq!(result.data, vec![item("m1")]);
    assert_eq!(cache.stats().delta_misses, 1);
}

#[tokio::test]
async fn test_forced_option_refetches_stale_entry() {
    let cache = new_cache();
    let key = ResourceType::Months.list_prefix("b1");
    let short = DeltaFetchOptions::with_ttl(Duration::from_millis(50))
        .stale_while_revalidate(Duration::from_secs(30));

    let upstream = Upstream::default();
    cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("m1")], 50))),
            flat,
            short,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("m1"), item("m2")], 60))),
            flat,
            options().force_full_refresh(true),
        )
        .await
        .unwrap();

    assert_eq!(upstream.calls(), vec![None, None]);
    assert!(result.was_cached);
    assert!(!result.used_delta);
    assert_eq!(result.data.len(), 2);
    assert_eq!(cache.stats().delta_misses, 2);
}

#[tokio::test]
async fn test_feature_flag_toggles_between_calls() {
    let flag = DeltaFeatureFlag::new(false);
    let config = DeltaCacheConfig::builder()
        .feature_flag(flag.clone())
        .build();
    let cache = DeltaCache::in_memory(CacheConfig::default(), config);
    let key = ResourceType::Categories.list_prefix("b1");
    let upstream = Upstream::default();

    for _ in 0..2 {
        cache
            .fetch_with_delta(
                &key,
                "b1",
                upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("c1")], 20))),
                flat,
                options(),
            )
            .await
            .unwrap();
    }
    // Second call is a plain cache hit
    assert_eq!(upstream.calls(), vec![None]);
    assert_eq!(cache.stats().delta_hits + cache.stats().delta_misses, 0);

    flag.set(true);
    let result = cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("c2")], 21))),
            flat,
            options(),
        )
        .await
        .unwrap();

    assert_eq!(upstream.calls(), vec![None, Some(20)]);
    assert!(result.used_delta);
    assert_eq!(result.data, vec![item("c1"), item("c2")]);
}

#[tokio::test]
async fn test_failed_fetch_writes_nothing() {
    let cache = new_cache();
    let key = ResourceType::Accounts.list_prefix("b1");
    let upstream = Upstream::default();

    let err = cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|_| Err(anyhow::anyhow!("upstream unavailable"))),
            flat,
            options(),
        )
        .await
        .unwrap_err();

    assert!(err.is_upstream());
    match &err {
        DeltaCacheError::Upstream { source, .. } => {
            assert_eq!(source.to_string(), "upstream unavailable")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(cache.cache_store().get(&key).await.unwrap().is_none());
    assert_eq!(cache.knowledge_store().get(&key), None);
    assert_eq!(cache.stats().delta_misses, 0);
}

#[tokio::test]
async fn test_failed_merge_writes_nothing() {
    let cache = new_cache();
    let key = ResourceType::Accounts.list_prefix("b1");
    seed(&cache, &key, "b1", vec![item("a")], 1000).await;

    let upstream = Upstream::default();
    let err = cache
        .fetch_with_delta(
            &key,
            "b1",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("b")], 1001))),
            |_: Vec<Item>, _: Vec<Item>, _: &MergeOptions<Item>| {
                Err(anyhow::anyhow!("conflicting ids"))
            },
            options(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DeltaCacheError::Merge { .. }));
    assert_eq!(cache.knowledge_store().get(&key), Some(1000));

    let stored = cache.cache_store().get(&key).await.unwrap().unwrap();
    let entry: DeltaCacheEntry<Item> = serde_json::from_value(stored).unwrap();
    assert_eq!(entry.server_knowledge, 1000);
    assert_eq!(entry.snapshot, vec![item("a")]);
    assert_eq!(cache.stats().merge_operations, 0);
}

#[tokio::test]
async fn test_concurrent_same_key_fetches_once() {
    let cache = Arc::new(new_cache());
    let key = ResourceType::Payees.list_prefix("b1");
    let calls = Arc::new(Mutex::new(Vec::new()));

    let fetches = (0..5).map(|_| {
        let cache = cache.clone();
        let key = key.clone();
        let calls = calls.clone();
        async move {
            cache
                .fetch_with_delta(
                    &key,
                    "b1",
                    move |known| {
                        calls.lock().push(known);
                        async move {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(DeltaResponse::new(vec![item("a")], 7))
                        }
                    },
                    flat,
                    options(),
                )
                .await
        }
    });

    let results = join_all(fetches).await;

    let calls = calls.lock();
    assert_eq!(calls.iter().filter(|known| known.is_none()).count(), 1);
    assert_eq!(calls.len(), 5);

    let fresh = results
        .iter()
        .filter(|result| !result.as_ref().unwrap().was_cached)
        .count();
    assert_eq!(fresh, 1);
    assert!(results
        .iter()
        .all(|result| result.as_ref().unwrap().data == vec![item("a")]));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CategoryGroup {
    id: String,
    name: String,
    #[serde(default)]
    deleted: bool,
    categories: Vec<Item>,
}

impl DeltaEntity for CategoryGroup {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl GroupedEntity for CategoryGroup {
    type Child = Item;

    fn children_mut(&mut self) -> &mut Vec<Item> {
        &mut self.categories
    }
}

#[tokio::test]
async fn test_grouped_categories_through_cache() {
    let cache = new_cache();
    let key = ResourceType::Categories.list_prefix("b1");
    let group = |name: &str, categories: Vec<Item>| CategoryGroup {
        id: "g1".to_string(),
        name: name.to_string(),
        deleted: false,
        categories,
    };

    let full = vec![group("Bills", vec![item("rent"), item("power")])];
    cache
        .fetch_with_delta(
            &key,
            "b1",
            move |_| ready(Ok(DeltaResponse::new(full.clone(), 30))),
            |s, d, o: &MergeOptions<CategoryGroup>| Ok(merge_grouped_entities(s, d, o)),
            DeltaFetchOptions::with_ttl(Duration::from_secs(60)),
        )
        .await
        .unwrap();

    let delta = vec![group("Monthly Bills", vec![tombstone("power"), item("water")])];
    let result = cache
        .fetch_with_delta(
            &key,
            "b1",
            move |_| ready(Ok(DeltaResponse::new(delta.clone(), 31))),
            |s, d, o: &MergeOptions<CategoryGroup>| Ok(merge_grouped_entities(s, d, o)),
            DeltaFetchOptions::with_ttl(Duration::from_secs(60)),
        )
        .await
        .unwrap();

    assert!(result.used_delta);
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].name, "Monthly Bills");
    assert_eq!(
        result.data[0].categories,
        vec![item("rent"), item("water")]
    );
}

#[tokio::test]
async fn test_without_delta_serves_cached_entry() {
    let cache = new_cache();
    let key = ResourceType::Accounts.list_prefix("b1");
    let upstream = Upstream::default();

    let first = assert_ok!(
        cache
            .fetch_without_delta(
                &key,
                upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("a"), tombstone("b")], 5))),
                options(),
            )
            .await
    );
    assert_eq!(first.data, vec![item("a")]);
    assert!(!first.was_cached);
    assert_eq!(cache.knowledge_store().get(&key), Some(5));

    let second = assert_ok!(
        cache
            .fetch_without_delta(
                &key,
                upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("z")], 9))),
                options(),
            )
            .await
    );
    assert_eq!(second.data, vec![item("a")]);
    assert!(second.was_cached);
    assert!(!second.used_delta);
    assert_eq!(second.server_knowledge, 5);

    assert_eq!(upstream.calls(), vec![None]);
    assert_eq!(cache.stats().delta_hits + cache.stats().delta_misses, 0);
}

#[tokio::test]
async fn test_without_delta_forced_returns_fresh_entry() {
    let cache = new_cache();
    let key = ResourceType::Accounts.list_prefix("b1");
    let upstream = Upstream::default();

    cache
        .fetch_without_delta(
            &key,
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("a")], 5))),
            options(),
        )
        .await
        .unwrap();

    let result = cache
        .fetch_without_delta(
            &key,
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("b")], 6))),
            options().force_full_refresh(true),
        )
        .await
        .unwrap();

    assert_eq!(upstream.calls(), vec![None]);
    assert!(result.was_cached);
    assert_eq!(result.data, vec![item("a")]);
    assert_eq!(result.server_knowledge, 5);
}

#[tokio::test]
async fn test_without_delta_forced_refetches_stale_entry() {
    let cache = new_cache();
    let key = ResourceType::Accounts.list_prefix("b1");
    let upstream = Upstream::default();
    let short = DeltaFetchOptions::with_ttl(Duration::from_millis(50))
        .stale_while_revalidate(Duration::from_secs(30));

    cache
        .fetch_without_delta(
            &key,
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("old")], 5))),
            short,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = cache
        .fetch_without_delta(
            &key,
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("a"), tombstone("old")], 6))),
            options().force_full_refresh(true),
        )
        .await
        .unwrap();

    assert_eq!(upstream.calls(), vec![None, None]);
    assert!(!result.was_cached);
    assert!(!result.used_delta);
    assert_eq!(result.data, vec![item("a")]);
    assert_eq!(result.server_knowledge, 6);
    assert_eq!(cache.knowledge_store().get(&key), Some(6));
}

#[tokio::test]
async fn test_budget_refresh_resets_knowledge_of_prefixed_budget_ids() {
    let cache = new_cache();
    let b1 = ResourceType::Accounts.list_prefix("b1");
    let b10 = ResourceType::Accounts.list_prefix("b10");
    seed(&cache, &b1, "b1", vec![item("a")], 3).await;
    seed(&cache, &b10, "b10", vec![item("x")], 4).await;

    cache.force_full_refresh(Some("b1"), None).await.unwrap();

    // Snapshots go by whole budget segment, knowledge by the ":b1" substring
    assert!(cache.cache_store().get(&b10).await.unwrap().is_some());
    assert_eq!(cache.knowledge_store().get(&b10), None);

    let upstream = Upstream::default();
    let result = cache
        .fetch_with_delta(
            &b10,
            "b10",
            upstream.fetcher(|_| Ok(DeltaResponse::new(vec![item("x"), item("y")], 5))),
            flat,
            options(),
        )
        .await
        .unwrap();

    assert_eq!(upstream.calls(), vec![None]);
    assert!(result.was_cached);
    assert!(!result.used_delta);
    assert_eq!(result.data, vec![item("x"), item("y")]);
}
