//! End-to-end invocation: repository -> cache -> mapping -> transport -> mock
//! remote system.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use generic_interface::errors::{GiError, RepositoryError};
use generic_interface::models::{
    Payload, WebserviceConfig, WebserviceConfigData, WebserviceConfigHistory,
};
use generic_interface::store::{memory, MemoryStore, WebserviceRepository};
use generic_interface::transport::HttpSettings;
use generic_interface::InvocationService;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Counts lookups that reach the backing store.
struct CountingRepo {
    inner: MemoryStore,
    lookups: AtomicUsize,
}

impl CountingRepo {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebserviceRepository for CountingRepo {
    async fn get_by_name(&self, name: &str) -> Result<WebserviceConfig, RepositoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_name(name).await
    }

    async fn get_by_id(&self, id: i32) -> Result<WebserviceConfig, RepositoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_id(id).await
    }

    async fn list(&self) -> Result<Vec<WebserviceConfig>, RepositoryError> {
        self.inner.list().await
    }

    async fn list_valid(&self) -> Result<Vec<WebserviceConfig>, RepositoryError> {
        self.inner.list_valid().await
    }

    async fn create(&self, ws: &WebserviceConfig, user_id: i32) -> Result<i32, RepositoryError> {
        self.inner.create(ws, user_id).await
    }

    async fn update(&self, ws: &WebserviceConfig, user_id: i32) -> Result<(), RepositoryError> {
        self.inner.update(ws, user_id).await
    }

    async fn delete(&self, id: i32) -> Result<(), RepositoryError> {
        self.inner.delete(id).await
    }

    async fn exists(&self, name: &str) -> Result<bool, RepositoryError> {
        self.inner.exists(name).await
    }

    async fn exists_excluding(&self, name: &str, exclude_id: i32) -> Result<bool, RepositoryError> {
        self.inner.exists_excluding(name, exclude_id).await
    }

    async fn history(&self, config_id: i32) -> Result<Vec<WebserviceConfigHistory>, RepositoryError> {
        self.inner.history(config_id).await
    }

    async fn history_entry(&self, history_id: i64) -> Result<WebserviceConfigHistory, RepositoryError> {
        self.inner.history_entry(history_id).await
    }

    async fn restore_from_history(&self, history_id: i64, user_id: i32) -> Result<(), RepositoryError> {
        self.inner.restore_from_history(history_id, user_id).await
    }
}

fn definitions(host: &str) -> String {
    format!(
        r#"
- name: CRM
  config:
    Debugger:
      DebugThreshold: debug
    Requester:
      Transport:
        Type: HTTP::REST
        Config:
          Host: {host}
          DefaultCommand: GET
          InvokerControllerMapping:
            CustomerCreate:
              Controller: /customers
              Command: POST
            CustomerGet:
              Controller: /customers/:id
      Invoker:
        CustomerCreate:
          Type: Generic::Transport
          MappingOutbound:
            Type: Simple
            Config:
              KeyMap:
                CustomerName: name
          MappingInbound:
            Type: Simple
            Config:
              KeyMapDefault:
                MapTo: "1"
              KeyMap:
                id: CustomerID
        CustomerGet:
          Type: Generic::Transport
- name: Retired
  valid_id: 2
  config:
    Requester:
      Transport:
        Type: HTTP::REST
        Config:
          Host: {host}
      Invoker:
        Ping:
          Type: Generic::Transport
- name: Exotic
  config:
    Requester:
      Transport:
        Type: HTTP::GRAPHQL
        Config:
          Host: {host}
      Invoker:
        Query:
          Type: Generic::Transport
"#
    )
}

async fn setup(server: &MockServer, cache_ttl: Duration) -> (Arc<InvocationService>, Arc<CountingRepo>) {
    let store = MemoryStore::new();
    store
        .seed(memory::parse_definitions(&definitions(&server.uri())).unwrap(), 1)
        .await
        .unwrap();
    let repo = Arc::new(CountingRepo::new(store));
    let service = InvocationService::with_defaults(repo.clone(), HttpSettings::default(), cache_ttl).unwrap();
    (Arc::new(service), repo)
}

fn payload(v: Value) -> Payload {
    v.as_object().cloned().unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// Full pipeline
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_invoke_maps_out_and_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/customers"))
        .and(body_json(json!({"name": "ACME"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "999", "status": "new"})))
        .expect(1)
        .mount(&server)
        .await;

    let (service, _) = setup(&server, Duration::from_secs(300)).await;
    let resp = service
        .invoke("CRM", "CustomerCreate", payload(json!({"CustomerName": "ACME", "internal": 1})))
        .await
        .unwrap();

    assert!(resp.success);
    assert_eq!(resp.status_code, 201);
    assert_eq!(
        resp.data.unwrap(),
        payload(json!({"id": "999", "status": "new", "CustomerID": "999"}))
    );
}

#[tokio::test]
async fn test_remote_failure_is_ok_with_success_false() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/customers/7"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let (service, _) = setup(&server, Duration::from_secs(300)).await;
    let resp = service
        .invoke("CRM", "CustomerGet", payload(json!({"id": 7})))
        .await
        .unwrap();
    assert!(!resp.success);
    assert_eq!(resp.error.as_deref(), Some("HTTP 500: boom"));
}

#[tokio::test]
async fn test_invoke_with_controller_overrides_route() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/v2/customers/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let (service, _) = setup(&server, Duration::from_secs(300)).await;
    let resp = service
        .invoke_with_controller("CRM", "CustomerGet", "/v2/customers/:id", "PATCH", payload(json!({"id": 7})))
        .await
        .unwrap();
    assert!(resp.success);
}

#[tokio::test]
async fn test_transport_failure_is_err_naming_the_call() {
    let server = MockServer::start().await;
    let (service, _) = setup(&server, Duration::from_secs(300)).await;
    drop(server);

    let err = service
        .invoke("CRM", "CustomerGet", payload(json!({"id": 1})))
        .await
        .unwrap_err();
    match err {
        GiError::Transport { webservice, invoker, .. } => {
            assert_eq!(webservice, "CRM");
            assert_eq!(invoker, "CustomerGet");
        }
        other => panic!("expected transport error, got {other}"),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Resolution failures
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_resolution_failures_never_reach_the_wire() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (service, _) = setup(&server, Duration::from_secs(300)).await;

    let err = service.invoke("Retired", "Ping", Payload::new()).await.unwrap_err();
    assert!(matches!(err, GiError::WebserviceInactive { .. }));
    assert!(err.to_string().contains("Retired"));

    let err = service.invoke("CRM", "CustomerDelete", Payload::new()).await.unwrap_err();
    assert!(err.to_string().contains("CustomerDelete"));
    assert!(err.to_string().contains("CRM"));

    let err = service.invoke("Exotic", "Query", Payload::new()).await.unwrap_err();
    assert!(matches!(err, GiError::TransportNotRegistered(ref kind) if kind == "HTTP::GRAPHQL"));

    let err = service.invoke("Nowhere", "Ping", Payload::new()).await.unwrap_err();
    assert!(matches!(err, GiError::WebserviceNotFound(_)));
}

// ═══════════════════════════════════════════════════════════════════════════
// Config cache
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_cache_hits_skip_the_repository_within_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (service, repo) = setup(&server, Duration::from_millis(300)).await;

    for _ in 0..3 {
        service
            .invoke("CRM", "CustomerGet", payload(json!({"id": 1})))
            .await
            .unwrap();
    }
    assert_eq!(repo.lookups(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    service
        .invoke("CRM", "CustomerGet", payload(json!({"id": 1})))
        .await
        .unwrap();
    assert_eq!(repo.lookups(), 2, "expired entry must be reloaded");
}

#[tokio::test]
async fn test_writes_force_a_reload() {
    let server = MockServer::start().await;
    let (service, repo) = setup(&server, Duration::from_secs(300)).await;

    let ws = service.get_webservice("CRM").await.unwrap();
    service.get_webservice("CRM").await.unwrap();
    assert_eq!(repo.lookups(), 1);

    let mut renamed = (*ws).clone();
    renamed.config.description = "touched".into();
    service.update_webservice(&renamed, 9).await.unwrap();

    let reloaded = service.get_webservice("CRM").await.unwrap();
    assert_eq!(repo.lookups(), 2);
    assert_eq!(reloaded.config.description, "touched");
    assert_eq!(reloaded.change_by, 9);
}

#[tokio::test]
async fn test_concurrent_invocations_share_one_service() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(8)
        .mount(&server)
        .await;

    let (service, _) = setup(&server, Duration::from_secs(300)).await;
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .invoke("CRM", "CustomerGet", payload(json!({"id": i})))
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().unwrap().success);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Config management
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_history_and_restore_through_service() {
    let server = MockServer::start().await;
    let (service, _) = setup(&server, Duration::from_secs(300)).await;

    let ws = service.get_webservice("CRM").await.unwrap();
    let original_host = ws.requester_host().to_string();

    let mut moved = (*ws).clone();
    moved.config.requester.transport.config.host = "http://elsewhere.invalid".into();
    service.update_webservice(&moved, 2).await.unwrap();
    assert_eq!(
        service.get_webservice("CRM").await.unwrap().requester_host(),
        "http://elsewhere.invalid"
    );

    let history = service.history(ws.id).await.unwrap();
    assert_eq!(history.len(), 2);
    service.restore_from_history(history[1].id, 3).await.unwrap();

    assert_eq!(
        service.get_webservice("CRM").await.unwrap().requester_host(),
        original_host
    );
}

#[tokio::test]
async fn test_create_exists_and_delete() {
    let server = MockServer::start().await;
    let (service, _) = setup(&server, Duration::from_secs(300)).await;

    let id = service
        .create_webservice(&WebserviceConfig::new("ERP", WebserviceConfigData::default()), 1)
        .await
        .unwrap();
    assert!(service.webservice_exists("ERP").await.unwrap());
    assert!(!service.webservice_exists_excluding("ERP", id).await.unwrap());

    let dup = service
        .create_webservice(&WebserviceConfig::new("ERP", WebserviceConfigData::default()), 1)
        .await
        .unwrap_err();
    assert!(matches!(dup, GiError::Repository(RepositoryError::NameTaken(_))));

    service.delete_webservice(id).await.unwrap();
    assert!(!service.webservice_exists("ERP").await.unwrap());
    assert!(matches!(
        service.get_webservice_by_id(id).await,
        Err(GiError::WebserviceNotFound(_))
    ));
}

#[tokio::test]
async fn test_listing() {
    let server = MockServer::start().await;
    let (service, _) = setup(&server, Duration::from_secs(300)).await;

    let names = |list: Vec<WebserviceConfig>| list.into_iter().map(|w| w.name).collect::<Vec<_>>();
    assert_eq!(names(service.list_webservices().await.unwrap()), vec!["CRM", "Exotic", "Retired"]);
    assert_eq!(names(service.list_valid_webservices().await.unwrap()), vec!["CRM", "Exotic"]);
    assert_eq!(names(service.webservices_for_field().await.unwrap()), vec!["CRM", "Exotic"]);
}

#[tokio::test]
async fn test_connection_check() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (service, _) = setup(&server, Duration::from_secs(300)).await;
    service.test_connection("CRM").await.unwrap();
}

#[tokio::test]
async fn test_connection_check_reaches_inactive_webservice() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (service, _) = setup(&server, Duration::from_secs(300)).await;
    service.test_connection("Retired").await.unwrap();

    // Now cached, but still refused for invocation.
    assert!(matches!(
        service.invoke("Retired", "Ping", Payload::new()).await,
        Err(GiError::WebserviceInactive { .. })
    ));
}
