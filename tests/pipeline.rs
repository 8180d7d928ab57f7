//! End-to-end scenarios exercising `Ops` with the in-memory fakes from
//! `loomrag::testing`, matching the "concrete end-to-end scenarios" from the
//! spec's testable-properties section.

use std::sync::Arc;
use std::time::Duration;

use loomrag::capabilities::{BrowserEngine, Embedder};
use loomrag::config::Config;
use loomrag::ops::Ops;
use loomrag::orchestrator::{CancelHandle, Orchestrator};
use loomrag::query::AskParams;
use loomrag::session::events::SessionEventHub;
use loomrag::session::{SessionRequest, SessionStore};
use loomrag::sitemap::Discoverer;
use loomrag::stores::{Backend, VectorStore};
use loomrag::testing::{FakeBrowserEngine, FakeEmbedder, FakeLLM, FakeReranker, InMemoryBackend};
use loomrag::types::{ConversationTurn, Mode, Session, SessionStatus};

fn test_config(storage: &std::path::Path) -> Config {
    Config {
        storage_base_path: storage.to_path_buf(),
        ..Config::default()
    }
}

async fn wait_for_terminal(ops: &Ops, session_id: &str) -> loomrag::types::Session {
    for _ in 0..500 {
        let session = ops.get_session(session_id).await.unwrap();
        if session.status.is_terminal() {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {session_id} never reached a terminal state");
}

fn about_page_html() -> &'static str {
    "<html><body><h1>About Us</h1><p>We sell high quality widgets to customers \
     worldwide, with fast shipping and friendly service.</p></body></html>"
}

#[tokio::test]
async fn single_page_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://example.com/about";
    let browser = Arc::new(FakeBrowserEngine::new().with_page(url, about_page_html()));
    let backend: Arc<dyn Backend> = InMemoryBackend::new();

    let ops = Ops::from_parts(
        test_config(dir.path()),
        browser,
        Arc::new(FakeEmbedder::default()),
        Arc::new(FakeLLM::new()),
        None,
        backend,
        reqwest::Client::new(),
    );

    let started = ops.start_session(url, Mode::SinglePage, None).await.unwrap();
    let session = wait_for_terminal(&ops, &started.session_id).await;

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.total_pages, 1);
    assert_eq!(session.pages_scraped, 1);

    let search = ops.search("widgets", 10, None, None).await.unwrap();
    assert_eq!(search.results.len(), 1);
    assert_eq!(search.results[0].domain, "example.com");
    assert!(search.results[0].chunk_text.contains("widgets"));

    let ask = ops.ask("what do they sell?", AskParams::default()).await.unwrap();
    assert!(ask.answer.contains("widgets"));
    assert!(ask.sources.iter().any(|s| s.page_url == url));
}

/// `sitemap`'s own tests already cover robots.txt/sitemap.xml resolution
/// over a real mocked HTTP server; `Fetcher` independently refuses to fetch
/// loopback targets (see `fetcher::tests::rejects_private_ip`), which a local
/// mock server always is. So this scenario drives `Orchestrator::run_with_urls`
/// directly with an already-resolved URL set, exercising the per-page
/// concurrency/failure-isolation machinery without needing either a real
/// public site or a loopback one.
#[tokio::test]
async fn whole_site_with_one_failing_page() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let page_a = "https://example.com/a".to_string();
    let page_b = "https://example.com/b".to_string();
    let page_c = "https://example.com/c".to_string();

    let browser: Arc<dyn BrowserEngine> = Arc::new(
        FakeBrowserEngine::new()
            .with_page(
                &page_a,
                "<html><body><h1>A</h1><p>Widgets are sold here in bulk for wholesale buyers.</p></body></html>",
            )
            .with_failure(&page_b, "simulated transient failure")
            .with_page(
                &page_c,
                "<html><body><h1>C</h1><p>Gadgets are sold here in bulk for wholesale buyers.</p></body></html>",
            ),
    );
    let backend: Arc<dyn Backend> = InMemoryBackend::new();
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::default());

    let session_store = Arc::new(SessionStore::new(config.storage_base_path.clone()));
    let vector_store = Arc::new(VectorStore::new(Arc::clone(&backend), Arc::clone(&embedder)));
    let discoverer = Arc::new(Discoverer::new(reqwest::Client::new(), &config));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&browser),
        discoverer,
        Arc::clone(&vector_store),
        Arc::clone(&session_store),
        &config,
    ));

    let session_id = "whole-site-one-failing".to_string();
    let request = SessionRequest {
        url: "https://example.com".to_string(),
        mode: Mode::WholeSite,
        purpose: None,
    };
    session_store
        .create(&Session::new(&session_id, &request.url, request.mode), &request)
        .await
        .unwrap();

    orchestrator
        .run_with_urls(
            session_id.clone(),
            request,
            vec![page_a.clone(), page_b.clone(), page_c.clone()],
            SessionEventHub::new(),
            CancelHandle::new(),
            4,
        )
        .await;

    let session = session_store.load_metadata(&session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.total_pages, 3);
    assert_eq!(session.pages_scraped, 2);
    assert_eq!(session.failures, 1);

    let ops = Ops::from_parts(
        config,
        browser,
        embedder,
        Arc::new(FakeLLM::new()),
        None,
        backend,
        reqwest::Client::new(),
    );
    let search = ops.search("widgets gadgets", 10, None, None).await.unwrap();
    assert!(search.results.iter().all(|h| h.page_url != page_b));
    assert!(search.results.iter().any(|h| h.page_url == page_a));
    assert!(search.results.iter().any(|h| h.page_url == page_c));
}

#[tokio::test]
async fn reembedding_a_page_does_not_duplicate_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://example.com/about";
    let browser = Arc::new(FakeBrowserEngine::new().with_page(url, about_page_html()));
    let backend: Arc<dyn Backend> = InMemoryBackend::new();

    let ops = Ops::from_parts(
        test_config(dir.path()),
        browser,
        Arc::new(FakeEmbedder::default()),
        Arc::new(FakeLLM::new()),
        None,
        backend,
        reqwest::Client::new(),
    );

    let first = ops.start_session(url, Mode::SinglePage, None).await.unwrap();
    wait_for_terminal(&ops, &first.session_id).await;
    let after_first = ops.search("widgets", 50, None, None).await.unwrap().total_results;

    let second = ops.start_session(url, Mode::SinglePage, None).await.unwrap();
    wait_for_terminal(&ops, &second.session_id).await;
    let after_second = ops.search("widgets", 50, None, None).await.unwrap().total_results;

    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn domain_isolation_in_filtered_search() {
    let dir = tempfile::tempdir().unwrap();
    let url_a = "https://a.test/about";
    let url_b = "https://b.test/about";
    let browser = Arc::new(
        FakeBrowserEngine::new()
            .with_page(
                url_a,
                "<html><body><h1>A</h1><p>Widgets are our specialty, sold worldwide every day.</p></body></html>",
            )
            .with_page(
                url_b,
                "<html><body><h1>B</h1><p>Widgets are our specialty too, sold worldwide every day.</p></body></html>",
            ),
    );
    let backend: Arc<dyn Backend> = InMemoryBackend::new();

    let ops = Ops::from_parts(
        test_config(dir.path()),
        browser,
        Arc::new(FakeEmbedder::default()),
        Arc::new(FakeLLM::new()),
        None,
        backend,
        reqwest::Client::new(),
    );

    let a = ops.start_session(url_a, Mode::SinglePage, None).await.unwrap();
    wait_for_terminal(&ops, &a.session_id).await;
    let b = ops.start_session(url_b, Mode::SinglePage, None).await.unwrap();
    wait_for_terminal(&ops, &b.session_id).await;

    let filtered = ops
        .search("widgets", 10, Some("a.test"), None)
        .await
        .unwrap();
    assert!(!filtered.results.is_empty());
    assert!(filtered.results.iter().all(|h| h.domain == "a.test"));
}

#[tokio::test]
async fn conversation_history_informs_query_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://example.com/pricing";
    let browser = Arc::new(FakeBrowserEngine::new().with_page(
        url,
        "<html><body><h1>Pricing</h1><p>Our pricing starts at ten dollars per month \
         for the basic membership plan.</p></body></html>",
    ));
    let backend: Arc<dyn Backend> = InMemoryBackend::new();

    let ops = Ops::from_parts(
        test_config(dir.path()),
        browser,
        Arc::new(FakeEmbedder::default()),
        Arc::new(FakeLLM::new()),
        None,
        backend,
        reqwest::Client::new(),
    );

    let started = ops.start_session(url, Mode::SinglePage, None).await.unwrap();
    wait_for_terminal(&ops, &started.session_id).await;

    let params = AskParams {
        conversation_history: vec![
            ConversationTurn {
                role: "user".to_string(),
                content: "what classes do they offer?".to_string(),
            },
            ConversationTurn {
                role: "assistant".to_string(),
                content: "yoga, HIIT, spin".to_string(),
            },
        ],
        ..AskParams::default()
    };

    let ask = ops.ask("what about pricing?", params).await.unwrap();
    assert!(ask.optimized_query.contains("pricing"));
    assert!(ask.answer.contains("pricing") || ask.answer.contains("dollars"));
}

#[tokio::test]
async fn ask_with_no_indexed_sources_reports_insufficient_information() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn Backend> = InMemoryBackend::new();
    let ops = Ops::from_parts(
        test_config(dir.path()),
        Arc::new(FakeBrowserEngine::new()),
        Arc::new(FakeEmbedder::default()),
        Arc::new(FakeLLM::new()),
        None,
        backend,
        reqwest::Client::new(),
    );

    let ask = ops.ask("anything at all?", AskParams::default()).await.unwrap();
    assert_eq!(ask.sources_used, 0);
    assert!(ask.sources.is_empty());
}

/// Drives `Orchestrator::run_with_urls` directly (see the comment on
/// `whole_site_with_one_failing_page`) with an artificial per-page delay so
/// the session is reliably still in flight when `cancel()` is called.
#[tokio::test]
async fn cancelling_a_whole_site_session_preserves_completed_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let page_urls: Vec<String> = (0..20).map(|i| format!("https://example.com/page-{i}")).collect();

    let mut fake_browser = FakeBrowserEngine::new().with_delay(Duration::from_millis(40));
    for (i, u) in page_urls.iter().enumerate() {
        fake_browser = fake_browser.with_page(
            u,
            format!("<html><body><h1>Page {i}</h1><p>Widgets, widgets, widgets, content here.</p></body></html>"),
        );
    }
    let browser: Arc<dyn BrowserEngine> = Arc::new(fake_browser);
    let backend: Arc<dyn Backend> = InMemoryBackend::new();
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::default());

    let mut config = test_config(dir.path());
    config.max_concurrent_extractions = 4;
    config.max_concurrent_browsers = 4;

    let session_store = Arc::new(SessionStore::new(config.storage_base_path.clone()));
    let vector_store = Arc::new(VectorStore::new(Arc::clone(&backend), Arc::clone(&embedder)));
    let discoverer = Arc::new(Discoverer::new(reqwest::Client::new(), &config));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&browser),
        discoverer,
        Arc::clone(&vector_store),
        Arc::clone(&session_store),
        &config,
    ));

    let session_id = "whole-site-cancelled".to_string();
    let request = SessionRequest {
        url: "https://example.com".to_string(),
        mode: Mode::WholeSite,
        purpose: None,
    };
    session_store
        .create(&Session::new(&session_id, &request.url, request.mode), &request)
        .await
        .unwrap();

    let cancel = CancelHandle::new();
    let run_cancel = cancel.clone();
    let run_session_id = session_id.clone();
    let run_orchestrator = Arc::clone(&orchestrator);
    let handle = tokio::spawn(async move {
        run_orchestrator
            .run_with_urls(run_session_id, request, page_urls, SessionEventHub::new(), run_cancel, 4)
            .await;
    });

    tokio::time::sleep(Duration::from_millis(120)).await;
    cancel.cancel();
    handle.await.unwrap();

    let session = session_store.load_metadata(&session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.pages_scraped > 0);
    assert!(session.pages_scraped < 20);

    let ops = Ops::from_parts(
        config,
        browser,
        embedder,
        Arc::new(FakeLLM::new()),
        None,
        backend,
        reqwest::Client::new(),
    );
    let search = ops.search("widgets", 50, None, None).await.unwrap();
    assert_eq!(search.total_results, session.pages_scraped);
}

#[tokio::test]
async fn ask_with_reranker_still_truncates_to_top_k() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://example.com/about";
    let browser = Arc::new(FakeBrowserEngine::new().with_page(url, about_page_html()));
    let backend: Arc<dyn Backend> = InMemoryBackend::new();

    let ops = Ops::from_parts(
        test_config(dir.path()),
        browser,
        Arc::new(FakeEmbedder::default()),
        Arc::new(FakeLLM::new()),
        Some(Arc::new(FakeReranker)),
        backend,
        reqwest::Client::new(),
    );

    let started = ops.start_session(url, Mode::SinglePage, None).await.unwrap();
    wait_for_terminal(&ops, &started.session_id).await;

    let params = AskParams {
        top_k: Some(1),
        ..AskParams::default()
    };
    let ask = ops.ask("what do they sell?", params).await.unwrap();
    assert!(ask.sources_used <= 1);
}
