//! HTTP surface tests against a running in-memory agent.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio::time::{sleep, timeout};
use tower::ServiceExt;

// Layer 3: Internal module imports
use loam_grit::{ref_step_head, ActorId, MemoryObjectStore, MemoryReferences, Object, References};
use loam_rt::Runtime;
use loam_wit::{Core, OutboxMessage, QueryResult, QueryRouter, SharedStore, Wit};

const WAIT: Duration = Duration::from_secs(5);

struct WebHarness {
    app: Router,
    runtime: Runtime,
    store: SharedStore,
    refs: Arc<dyn References>,
    task: tokio::task::JoinHandle<Result<(), loam_rt::RuntimeError>>,
}

async fn start_harness() -> WebHarness {
    let store: SharedStore = Arc::new(MemoryObjectStore::new());
    let refs: Arc<dyn References> = Arc::new(MemoryReferences::new());
    let runtime = Runtime::new(SharedStore::clone(&store), Arc::clone(&refs), 0);

    let registry = runtime.registry();
    registry.register_wit("noop", Wit::new().into_wit_fn());
    registry.register_query(
        "greeter",
        QueryRouter::new()
            .on_query("greeting", |frame| {
                Box::pin(async move {
                    let mut tree = loam_grit::Tree::new();
                    let blob = frame
                        .loader
                        .store(&Object::Blob(loam_grit::Blob::with_headers(
                            {
                                let mut h = loam_grit::Headers::new();
                                h.insert("ct".to_string(), "s".to_string());
                                h
                            },
                            "hello",
                        )))
                        .await?;
                    tree.insert("a".to_string(), blob);
                    Ok(QueryResult::Tree(tree))
                })
            })
            .into_query_fn(),
    );

    let task = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.start().await })
    };
    runtime.wait_until_running().await;

    WebHarness {
        app: loam_web::router(runtime.clone()),
        runtime,
        store,
        refs,
        task,
    }
}

impl WebHarness {
    async fn create_actor(&self, wit_name: &str, query_name: Option<&str>) -> ActorId {
        let mut core = Core::from_external_wit_ref(wit_name, query_name)
            .await
            .unwrap();
        let genesis = OutboxMessage::from_genesis(&self.store, &mut core)
            .await
            .unwrap();
        let actor_id = genesis.recipient_id;
        let update = genesis
            .persist_to_mailbox_update(&self.store, self.runtime.agent_id())
            .await
            .unwrap();
        self.runtime.inject_mailbox_update(update).await.unwrap();
        timeout(WAIT, async {
            loop {
                if self
                    .refs
                    .get(&ref_step_head(actor_id))
                    .await
                    .unwrap()
                    .is_some()
                {
                    return;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("actor never got a head step");
        actor_id
    }

    async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = self
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn stop(self) {
        self.runtime.stop();
        let _ = self.task.await.unwrap();
    }
}

#[tokio::test]
async fn test_refs_lists_root_agent() {
    let harness = start_harness().await;

    let (status, body) = harness.get("/refs").await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        value["runtime/agent"],
        serde_json::json!(harness.runtime.agent_id().to_hex())
    );

    let (status, _) = harness.get("/refs/runtime/agent").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = harness.get("/refs/no/such/ref").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    harness.stop().await;
}

#[tokio::test]
async fn test_objects_render_by_variant() {
    let harness = start_harness().await;
    let agent_hex = harness.runtime.agent_id().to_hex();

    // the agent's core is a tree: rendered as JSON
    let (status, body) = harness.get(&format!("/objects/{agent_hex}")).await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["kind"], "tree");
    assert!(value["entries"]["point"].is_string());

    // bad and unknown ids map to 400/404
    let (status, _) = harness.get("/objects/not-hex").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let missing = loam_grit::ObjectId::digest(b"missing").to_hex();
    let (status, _) = harness.get(&format!("/objects/{missing}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    harness.stop().await;
}

#[tokio::test]
async fn test_inbox_post_advances_actor() {
    let harness = start_harness().await;
    let actor_id = harness.create_actor("noop", None).await;
    let head_before = harness
        .refs
        .get(&ref_step_head(actor_id))
        .await
        .unwrap()
        .unwrap();

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/actors/{actor_id}/inbox?mt=poke"))
                .body(Body::from("payload"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    timeout(WAIT, async {
        loop {
            let head = harness
                .refs
                .get(&ref_step_head(actor_id))
                .await
                .unwrap()
                .unwrap();
            if head != head_before {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("inbox post never advanced the actor");

    harness.stop().await;
}

#[tokio::test]
async fn test_query_and_path_descent() {
    let harness = start_harness().await;
    let actor_id = harness.create_actor("noop", Some("greeter")).await;

    // the bare query renders the tree as JSON
    let (status, body) = harness
        .get(&format!("/actors/{actor_id}/query/greeting"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(value["a"].is_string());

    // descending the tree returns the blob with its content type
    let (status, body) = harness
        .get(&format!("/actors/{actor_id}/query/greeting/a"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hello");

    // unknown query names and paths are 404
    let (status, _) = harness.get(&format!("/actors/{actor_id}/query/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = harness
        .get(&format!("/actors/{actor_id}/query/greeting/zz"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    harness.stop().await;
}

#[tokio::test]
async fn test_actors_listing_includes_head() {
    let harness = start_harness().await;
    let actor_id = harness.create_actor("noop", None).await;

    let (status, body) = harness.get("/actors").await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let listed: Vec<&str> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["actor"].as_str().unwrap())
        .collect();
    assert!(listed.contains(&actor_id.to_hex().as_str()));

    harness.stop().await;
}
