//! End-to-end scenarios driven against a local mock server, exercising the
//! public `Engine` API the way a caller assembling subscribers would.

use std::sync::Arc;

use crawlway::{
    AcceptAllSubscriber, BaseUriCollection, Engine, EngineConfig, InMemoryQueue, LinkDiscoverySubscriber, Queue,
    RobotsSubscriber, TagDenySubscriber,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).insert_header("content-type", "text/html").set_body_string(body)
}

#[tokio::test]
async fn robots_disallow_blocks_private_paths() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private/\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/public">pub</a><a href="/private/x">priv</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(html("ok"))
        .mount(&server)
        .await;

    let base_uris: BaseUriCollection = vec![server.uri() + "/"].into_iter().collect();
    let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
    let mut engine = Engine::create(base_uris, queue.clone(), None).await.unwrap();
    engine.add_subscriber(Arc::new(RobotsSubscriber::new("crawlway"))).await;
    engine.add_subscriber(Arc::new(TagDenySubscriber::new(["disallowed-robots-txt"]))).await;
    engine.add_subscriber(Arc::new(LinkDiscoverySubscriber::new())).await;
    engine.crawl().await.unwrap();

    let private = queue.get(engine.job_id(), &(server.uri() + "/private/x")).await.unwrap();
    assert!(private.has_tag("disallowed-robots-txt"));
    // Marked processed when the dispatch loop pops it off the queue, before
    // `shouldRequest` rejects it (spec.md §4.1 step 2) — it is never GETed.
    assert!(private.processed());

    let public = queue.get(engine.job_id(), &(server.uri() + "/public")).await.unwrap();
    assert!(public.processed());
}

#[tokio::test]
async fn sitemap_urls_are_enqueued_at_level_two() {
    let server = MockServer::start().await;
    let sitemap_url = format!("{}/sm.xml", server.uri());
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!("Sitemap: {sitemap_url}\n")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sm.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<urlset><url><loc>{0}/p1</loc></url><url><loc>{0}/p2</loc></url></urlset>",
            server.uri()
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<body>no links</body>"))
        .mount(&server)
        .await;

    let base_uris: BaseUriCollection = vec![server.uri() + "/"].into_iter().collect();
    let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
    let mut engine = Engine::create(base_uris, queue.clone(), None).await.unwrap();
    engine.add_subscriber(Arc::new(AcceptAllSubscriber)).await;
    engine.add_subscriber(Arc::new(RobotsSubscriber::new("crawlway"))).await;
    engine.crawl().await.unwrap();

    let p1 = queue.get(engine.job_id(), &(server.uri() + "/p1")).await.unwrap();
    assert_eq!(p1.level(), 2);
    let p2 = queue.get(engine.job_id(), &(server.uri() + "/p2")).await.unwrap();
    assert_eq!(p2.level(), 2);
}

#[tokio::test]
async fn nofollow_meta_tag_is_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<head><meta name="robots" content="nofollow"></head><body></body>"#))
        .mount(&server)
        .await;

    let base_uris: BaseUriCollection = vec![server.uri() + "/"].into_iter().collect();
    let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
    let config = EngineConfig::default().with_respect_robots_txt(false);
    let mut engine = Engine::create(base_uris, queue.clone(), None).await.unwrap().with_config(config);
    engine.add_subscriber(Arc::new(AcceptAllSubscriber)).await;
    engine.add_subscriber(Arc::new(RobotsSubscriber::new("crawlway"))).await;
    engine.crawl().await.unwrap();

    let root = queue.get(engine.job_id(), &(server.uri() + "/")).await.unwrap();
    assert!(root.has_tag("nofollow"));
}

#[tokio::test]
async fn transport_failure_on_one_seed_does_not_stop_the_other() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .mount(&server)
        .await;

    let base_uris: BaseUriCollection = vec![
        "http://this-host-does-not-resolve.invalid/".to_string(),
        format!("{}/ok", server.uri()),
    ]
    .into_iter()
    .collect();
    let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
    let mut engine = Engine::create(base_uris, queue.clone(), None).await.unwrap();
    engine.add_subscriber(Arc::new(AcceptAllSubscriber)).await;
    engine.crawl().await.unwrap();

    assert_eq!(engine.requests_sent(), 2);
    let ok = queue.get(engine.job_id(), &(server.uri() + "/ok")).await.unwrap();
    assert!(ok.processed());
}
