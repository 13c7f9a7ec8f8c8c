use std::sync::Arc;

use reqwest::StatusCode;
use tether_reqwest::{CallError, CallExecutor, Discard, ExecutorConfig, Params, ProxyCredentials};
use tether_tokens::{AuthenticationProxy, CredentialMaterial, IdentityName, ProxyConfig};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const SESSION_AUTH: &str = "/sessionauth/v1/authenticate";
const KEY_MANAGER_AUTH: &str = "/keyauth/v1/authenticate";

fn token(value: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "name": "token",
        "token": value,
    }))
}

/// Issues `T1` for the first session handshake and `T2` for every later one
async fn mount_authenticators(server: &MockServer, expected_sessions: u64) {
    Mock::given(method("POST"))
        .and(path(SESSION_AUTH))
        .respond_with(token("T1"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(SESSION_AUTH))
        .respond_with(token("T2"))
        .expect(expected_sessions - 1)
        .with_priority(2)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(KEY_MANAGER_AUTH))
        .respond_with(token("KM"))
        .mount(server)
        .await;
}

async fn mount_info(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/info"))
        .and(header("sessionToken", "T1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/info"))
        .and(header("sessionToken", "T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": "20.14.1",
        })))
        .mount(server)
        .await;
}

fn proxy_for(server: &MockServer) -> Arc<AuthenticationProxy> {
    let proxy =
        AuthenticationProxy::from_config(&ProxyConfig::new(server.uri(), server.uri())).unwrap();
    proxy
        .register_identity(IdentityName::from_static("bot1"), &CredentialMaterial::none())
        .unwrap();
    Arc::new(proxy)
}

fn executor_for(
    server: &MockServer,
    proxy: &Arc<AuthenticationProxy>,
) -> CallExecutor<ProxyCredentials> {
    CallExecutor::from_config(
        &ExecutorConfig::new(server.uri()),
        ProxyCredentials::new(proxy.clone(), IdentityName::from_static("bot1")),
    )
    .unwrap()
}

#[tokio::test]
async fn expired_session_is_renewed_and_the_call_succeeds() {
    let server = MockServer::start().await;
    mount_authenticators(&server, 2).await;
    mount_info(&server).await;

    let bot = IdentityName::from_static("bot1");
    let proxy = proxy_for(&server);
    let t1 = proxy.authenticate(&bot).await.unwrap();
    assert_eq!(t1.session_token().unwrap().as_str(), "T1");

    let info: Option<serde_json::Value> = executor_for(&server, &proxy)
        .get("/v1/info", &Params::new(), &Params::new())
        .await
        .unwrap();

    assert_eq!(info, Some(serde_json::json!({"version": "20.14.1"})));
    let t2 = proxy.token(&bot).unwrap();
    assert_eq!(t2.session_token().unwrap().as_str(), "T2");
    assert!(proxy.is_authenticated(&bot).unwrap());
}

#[tokio::test]
async fn session_token_supplied_by_the_caller_is_renewed() {
    let server = MockServer::start().await;
    mount_authenticators(&server, 2).await;
    mount_info(&server).await;

    let bot = IdentityName::from_static("bot1");
    let proxy = proxy_for(&server);
    proxy.authenticate(&bot).await.unwrap();

    let headers = Params::new().with("sessionToken", "T1");
    let info: Option<serde_json::Value> = executor_for(&server, &proxy)
        .get("/v1/info", &Params::new(), &headers)
        .await
        .unwrap();

    assert_eq!(info, Some(serde_json::json!({"version": "20.14.1"})));
    assert_eq!(proxy.token(&bot).unwrap().session_token().unwrap().as_str(), "T2");
}

#[tokio::test]
async fn first_call_of_a_new_identity_authenticates_it() {
    let server = MockServer::start().await;
    mount_authenticators(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/v1/info"))
        .and(header("sessionToken", "T1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/info"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .with_priority(10)
        .mount(&server)
        .await;

    let proxy = proxy_for(&server);
    let info = executor_for(&server, &proxy)
        .get::<Discard>("/v1/info", &Params::new(), &Params::new())
        .await
        .unwrap();

    assert!(info.is_none());
    assert!(proxy
        .is_authenticated(&IdentityName::from_static("bot1"))
        .unwrap());
}

#[tokio::test]
async fn concurrent_expirations_share_one_handshake() {
    let server = MockServer::start().await;
    mount_authenticators(&server, 2).await;
    mount_info(&server).await;

    let bot = IdentityName::from_static("bot1");
    let proxy = proxy_for(&server);
    proxy.authenticate(&bot).await.unwrap();

    let executor = executor_for(&server, &proxy);
    let (query, headers) = (Params::new(), Params::new());
    let call = || executor.get::<serde_json::Value>("/v1/info", &query, &headers);
    let (a, b, c) = tokio::join!(call(), call(), call());

    assert!(a.unwrap().is_some());
    assert!(b.unwrap().is_some());
    assert!(c.unwrap().is_some());
    // the T2 mock verifies that exactly one more session was issued on drop
}

#[tokio::test]
async fn forbidden_invalidates_the_identity() {
    let server = MockServer::start().await;
    mount_authenticators(&server, 1).await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(403).set_body_string("entitlement revoked"))
        .expect(1)
        .mount(&server)
        .await;

    let bot = IdentityName::from_static("bot1");
    let proxy = proxy_for(&server);
    let t1 = proxy.authenticate(&bot).await.unwrap();

    let err = executor_for(&server, &proxy)
        .delete::<Discard>("/v1/room/abc/member", &Params::new(), &Params::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::Forbidden(_)));
    assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    assert!(!proxy.is_authenticated(&bot).unwrap());
    assert_eq!(proxy.token(&bot).unwrap(), t1);
}
