use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use blockcache::cache::{
    ApprovalEvent, Author, BlockCache, BlockCacheConfig, BlockOptions, CacheStore,
    GenerationStamps, KEY_DIGEST_LEN, KeyBuilder, MemoryConfigStore, MemoryStore,
    PendingApprovalKeyBuilder, PendingApprovals, PendingContentPolicy, PendingSource,
    PolicyRegistry, QueryContextKeyBuilder, StoreError, ViewerIdentityKeyBuilder, effective_key,
};
use blockcache::context::{ItemId, RequestContext, Viewer};
use bytes::Bytes;

struct Fixture {
    cache: BlockCache,
    store: Arc<MemoryStore>,
    renders: AtomicUsize,
}

impl Fixture {
    async fn new(policies: PolicyRegistry) -> Self {
        Self::with_config(BlockCacheConfig::default(), policies).await
    }

    async fn with_config(config: BlockCacheConfig, policies: PolicyRegistry) -> Self {
        let store = Arc::new(MemoryStore::new(&config));
        let stamps = GenerationStamps::load(Arc::new(MemoryConfigStore::new()))
            .await
            .expect("stamps load");
        let cache = BlockCache::new(config, store.clone(), Arc::new(stamps), policies);
        Self {
            cache,
            store,
            renders: AtomicUsize::new(0),
        }
    }

    /// Render one block, counting how often its body actually runs.
    async fn render(&self, ctx: RequestContext, name: &str, options: BlockOptions) -> String {
        let mut engine = self.cache.engine(ctx);
        if engine.begin(name, options).await {
            let n = self.renders.fetch_add(1, Ordering::SeqCst) + 1;
            engine.emit(format!("{name}#{n}"));
        }
        assert!(engine.end().await);
        String::from_utf8(engine.into_output().to_vec()).expect("utf8 output")
    }

    fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

fn anonymous() -> RequestContext {
    RequestContext::new(Viewer::Anonymous)
}

struct Fragment(&'static str);

#[async_trait]
impl KeyBuilder for Fragment {
    async fn key_fragment(&self, _ctx: &RequestContext) -> String {
        self.0.to_string()
    }
}

#[tokio::test]
async fn second_render_replays_stored_output() {
    let fixture = Fixture::new(PolicyRegistry::new()).await;

    let first = fixture.render(anonymous(), "sidebar", BlockOptions::new()).await;
    let second = fixture.render(anonymous(), "sidebar", BlockOptions::new()).await;

    assert_eq!(first, "sidebar#1");
    assert_eq!(second, "sidebar#1");
    assert_eq!(fixture.renders(), 1);
    assert_eq!(fixture.store.len(), 1);
}

#[tokio::test]
async fn stored_entry_lives_under_stamped_digest_key() {
    let fixture = Fixture::new(PolicyRegistry::new()).await;
    fixture.render(anonymous(), "footer", BlockOptions::new()).await;

    let stamp = fixture.cache.stamps().current();
    let key = effective_key(&stamp, "footer");
    assert_eq!(key.len(), stamp.len() + KEY_DIGEST_LEN);

    let stored = fixture.store.get(&key).await.expect("get");
    assert_eq!(stored, Some(Bytes::from_static(b"footer#1")));
}

#[tokio::test]
async fn unique_key_suffixes_the_block_name() {
    let fixture = Fixture::new(PolicyRegistry::new()).await;
    fixture
        .render(anonymous(), "post", BlockOptions::new().unique_key("42"))
        .await;

    let key = effective_key(&fixture.cache.stamps().current(), "post_42");
    assert!(fixture.store.get(&key).await.expect("get").is_some());

    fixture
        .render(anonymous(), "post", BlockOptions::new().unique_key("43"))
        .await;
    assert_eq!(fixture.renders(), 2);
}

#[tokio::test]
async fn builder_order_is_part_of_the_key() {
    let fixture = Fixture::new(PolicyRegistry::new()).await;

    let ab = BlockOptions::new()
        .key_builder(Arc::new(Fragment("a")))
        .key_builder(Arc::new(Fragment("b")));
    let ba = BlockOptions::new()
        .key_builder(Arc::new(Fragment("b")))
        .key_builder(Arc::new(Fragment("a")));

    fixture.render(anonymous(), "list", ab).await;
    fixture.render(anonymous(), "list", ba).await;

    assert_eq!(fixture.renders(), 2);
    assert_eq!(fixture.store.len(), 2);
}

#[tokio::test]
async fn empty_fragments_leave_identity_unchanged() {
    let fixture = Fixture::new(PolicyRegistry::new()).await;

    fixture.render(anonymous(), "menu", BlockOptions::new()).await;
    let with_empty = BlockOptions::new()
        .key_builder(Arc::new(Fragment("")))
        .key_builder(Arc::new(QueryContextKeyBuilder::new(["page"])));
    let replayed = fixture.render(anonymous(), "menu", with_empty).await;

    assert_eq!(replayed, "menu#1");
    assert_eq!(fixture.renders(), 1);
}

#[tokio::test]
async fn query_context_builder_separates_pages() {
    let fixture = Fixture::new(PolicyRegistry::new()).await;
    let options = || {
        BlockOptions::new().key_builder(Arc::new(QueryContextKeyBuilder::new(["page"])))
    };

    let page_two = anonymous().with_query_var("page", "2");
    let page_three = anonymous().with_query_var("page", "3");
    let unrelated = anonymous().with_query_var("tag", "2");

    fixture.render(page_two.clone(), "archive", options()).await;
    fixture.render(page_three, "archive", options()).await;
    assert_eq!(fixture.renders(), 2);

    assert_eq!(
        fixture.render(page_two, "archive", options()).await,
        "archive#1"
    );

    // no `page` variable behaves like the plain block
    fixture.render(unrelated, "archive", options()).await;
    assert_eq!(
        fixture.render(anonymous(), "archive", BlockOptions::new()).await,
        "archive#3"
    );
}

#[tokio::test]
async fn viewer_builder_splits_signed_in_viewers() {
    let fixture = Fixture::new(PolicyRegistry::new()).await;
    let options = || BlockOptions::new().key_builder(Arc::new(ViewerIdentityKeyBuilder));

    let alice = RequestContext::new(Viewer::Authenticated { account_id: 1 });
    let bob = RequestContext::new(Viewer::Authenticated { account_id: 2 });

    assert_eq!(
        fixture.render(alice.clone(), "greeting", options()).await,
        "greeting#1"
    );
    assert_eq!(
        fixture.render(bob, "greeting", options()).await,
        "greeting#2"
    );
    assert_eq!(
        fixture.render(alice, "greeting", options()).await,
        "greeting#1"
    );
}

#[tokio::test]
async fn flush_orphans_every_block() {
    let fixture = Fixture::new(PolicyRegistry::new()).await;

    fixture.render(anonymous(), "a", BlockOptions::new()).await;
    fixture.render(anonymous(), "b", BlockOptions::new()).await;
    let before = fixture.cache.stamps().current();

    let after = fixture.cache.clear_cache().await.expect("rotate");
    assert_ne!(before, after);

    assert_eq!(
        fixture.render(anonymous(), "a", BlockOptions::new()).await,
        "a#3"
    );
    assert_eq!(
        fixture.render(anonymous(), "b", BlockOptions::new()).await,
        "b#4"
    );
}

#[tokio::test]
async fn nested_blocks_cache_independently() {
    let fixture = Fixture::new(PolicyRegistry::new()).await;
    let inner_renders = AtomicUsize::new(0);

    for outer_unique in ["x", "y"] {
        let mut engine = fixture.cache.engine(anonymous());
        engine.emit("<body>");
        if engine
            .begin("outer", BlockOptions::new().unique_key(outer_unique))
            .await
        {
            engine.emit("[outer ");
            if engine.begin("inner", BlockOptions::new()).await {
                let n = inner_renders.fetch_add(1, Ordering::SeqCst) + 1;
                engine.emit(format!("inner#{n}"));
            }
            assert!(engine.end().await);
            engine.emit("]");
        }
        assert!(engine.end().await);
        engine.emit("</body>");

        let page = String::from_utf8(engine.into_output().to_vec()).expect("utf8");
        assert_eq!(page, "<body>[outer inner#1]</body>");
    }

    // the second outer block missed but its inner block was replayed
    assert_eq!(inner_renders.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.store.len(), 3);
}

#[tokio::test]
async fn unmatched_end_is_a_noop() {
    let fixture = Fixture::new(PolicyRegistry::new()).await;
    let mut engine = fixture.cache.engine(anonymous());

    engine.emit("before");
    assert!(!engine.end().await);
    assert_eq!(engine.depth(), 0);
    assert_eq!(engine.output(), b"before");
    assert!(fixture.store.is_empty());
}

#[tokio::test]
async fn vetoing_policy_bypasses_the_store() {
    let mut policies = PolicyRegistry::new();
    policies.register(
        "cart",
        Arc::new(|wants: bool, ctx: &RequestContext| {
            wants && ctx.query_var("nocache").is_none()
        }),
    );
    let fixture = Fixture::new(policies).await;

    let busted = anonymous().with_query_var("nocache", "1");
    assert_eq!(
        fixture.render(busted.clone(), "cart", BlockOptions::new()).await,
        "cart#1"
    );
    assert_eq!(
        fixture.render(busted, "cart", BlockOptions::new()).await,
        "cart#2"
    );
    assert!(fixture.store.is_empty());

    fixture.render(anonymous(), "cart", BlockOptions::new()).await;
    assert_eq!(fixture.store.len(), 1);
}

#[tokio::test]
async fn disabled_cache_always_renders() {
    let config = BlockCacheConfig {
        enabled: false,
        ..BlockCacheConfig::default()
    };
    let fixture = Fixture::with_config(config, PolicyRegistry::new()).await;

    fixture.render(anonymous(), "hero", BlockOptions::new()).await;
    fixture.render(anonymous(), "hero", BlockOptions::new()).await;

    assert_eq!(fixture.renders(), 2);
    assert!(fixture.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn entries_expire_after_their_ttl() {
    let fixture = Fixture::new(PolicyRegistry::new()).await;
    let options = || BlockOptions::new().ttl_seconds(30);

    fixture.render(anonymous(), "ticker", options()).await;
    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(
        fixture.render(anonymous(), "ticker", options()).await,
        "ticker#1"
    );

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(
        fixture.render(anonymous(), "ticker", options()).await,
        "ticker#2"
    );
}

struct Moderation {
    pending: AtomicUsize,
    queries: AtomicUsize,
}

#[async_trait]
impl PendingSource for Moderation {
    async fn count_pending(&self, _author: &Author, _item: ItemId) -> Result<u64, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.pending.load(Ordering::SeqCst) as u64)
    }
}

#[tokio::test]
async fn pending_submissions_bypass_until_invalidated() {
    let moderation = Arc::new(Moderation {
        pending: AtomicUsize::new(1),
        queries: AtomicUsize::new(0),
    });
    let approvals = PendingApprovals::new(Arc::new(MemoryStore::default()), moderation.clone());

    let mut policies = PolicyRegistry::new();
    policies.register("comments", Arc::new(PendingContentPolicy::new(approvals.clone())));
    let fixture = Fixture::new(policies).await;

    let options = || {
        BlockOptions::new().key_builder(Arc::new(PendingApprovalKeyBuilder::new(
            approvals.clone(),
        )))
    };
    let author_ctx = || {
        RequestContext::new(Viewer::Authenticated { account_id: 9 }).with_item(5)
    };

    fixture.render(author_ctx(), "comments", options()).await;
    fixture.render(author_ctx(), "comments", options()).await;
    assert_eq!(fixture.renders(), 2);
    assert!(fixture.store.is_empty());
    assert_eq!(moderation.queries.load(Ordering::SeqCst), 1);

    moderation.pending.store(0, Ordering::SeqCst);
    approvals
        .handle(ApprovalEvent::StatusChanged {
            author: Author::Account(9),
            item: 5,
        })
        .await;

    fixture.render(author_ctx(), "comments", options()).await;
    assert_eq!(
        fixture.render(author_ctx(), "comments", options()).await,
        "comments#3"
    );
    assert_eq!(fixture.store.len(), 1);
}
