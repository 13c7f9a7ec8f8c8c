//! Execution of one logical call with at most one re-authentication

use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode,
};
use reqwest_middleware::ClientBuilder;
use serde::{de::DeserializeOwned, Serialize};
use tether_tokens::{no_longer_entitled, ConfigError, SessionToken, Transport};

use crate::{
    json, ApiError, CallContext, CallError, CallHooks, CredentialSource, ExecutorConfig,
    NoopHooks, Params, SessionTokenMiddleware, SESSION_TOKEN,
};

/// The number of times a call is renewed after its session expired
const MAX_RENEWALS: u8 = 1;

/// Performs calls against an API on behalf of a [`CredentialSource`]
///
/// Each call sends its request with the source's current credentials. If the
/// response is `401 Unauthorized`, the source is asked to renew the
/// credentials and the request is sent once more; a second `401` fails the
/// call. A `403 Forbidden` is reported to the source, which may invalidate the
/// identity, and fails the call without a retry.
///
/// A `sessionToken` header supplied by the caller is sent on the first
/// attempt in place of the source's session token. After a renewal, the
/// retry carries the renewed token instead.
///
/// The executor keeps no state between calls and can be shared freely.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use tether_reqwest::{CallExecutor, Discard, ExecutorConfig, Params, ProxyCredentials, TracingHooks};
/// # use tether_tokens::{AuthenticationProxy, IdentityName};
/// # async fn example(proxy: Arc<AuthenticationProxy>) -> Result<(), Box<dyn std::error::Error>> {
/// let executor = CallExecutor::from_config(
///     &ExecutorConfig::new("https://pod.example.com/pod"),
///     ProxyCredentials::new(proxy, IdentityName::from_static("jirawebhook")),
/// )?
/// .with_hooks(TracingHooks);
///
/// let info: Option<serde_json::Value> = executor
///     .get("/v1/sessioninfo", &Params::new(), &Params::new())
///     .await?;
///
/// executor
///     .delete::<Discard>("/v1/room/abc/member", &Params::new(), &Params::new())
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct CallExecutor<S, H = NoopHooks> {
    base_url: reqwest::Url,
    source: S,
    hooks: H,
    key_manager_token: bool,
}

impl<S> CallExecutor<S> {
    /// Constructs an executor sending calls to paths under `base_url`
    pub fn new(base_url: reqwest::Url, source: S) -> Self {
        Self {
            base_url,
            source,
            hooks: NoopHooks,
            key_manager_token: false,
        }
    }

    /// Constructs an executor from configuration
    pub fn from_config(config: &ExecutorConfig, source: S) -> Result<Self, ConfigError> {
        Ok(Self::new(config.validate()?, source))
    }
}

impl<S, H> CallExecutor<S, H> {
    /// Replaces the hooks invoked around each call
    pub fn with_hooks<H2>(self, hooks: H2) -> CallExecutor<S, H2> {
        CallExecutor {
            base_url: self.base_url,
            source: self.source,
            hooks,
            key_manager_token: self.key_manager_token,
        }
    }

    /// Also sends the key manager token with every call
    #[must_use]
    pub fn with_key_manager_token(self) -> Self {
        Self {
            key_manager_token: true,
            ..self
        }
    }

    /// The base URL calls are sent to
    #[inline]
    pub fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }

    /// The source of credentials for calls
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }
}

/// The outcome of sending a request once
enum Attempt<T> {
    Done(Option<T>),
    Expired(ApiError),
    Forbidden(ApiError),
}

struct PreparedRequest {
    method: Method,
    url: reqwest::Url,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    session_token: Option<SessionToken>,
    body: Option<Vec<u8>>,
}

/// Invokes `after_call` when dropped, however the call ended
struct AfterCall<'a, H: CallHooks> {
    hooks: &'a H,
    context: CallContext,
    path: &'a str,
    query: &'a Params,
    headers: Params,
}

impl<H: CallHooks> Drop for AfterCall<'_, H> {
    fn drop(&mut self) {
        self.hooks
            .after_call(&mut self.context, self.path, self.query, &self.headers);
    }
}

impl<S, H> CallExecutor<S, H>
where
    S: CredentialSource,
    H: CallHooks,
{
    /// Sends a `GET` request
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &Params,
        headers: &Params,
    ) -> Result<Option<T>, CallError> {
        self.call(Method::GET, path, None, query, headers).await
    }

    /// Sends a `POST` request with a JSON body
    pub async fn post<T, B>(
        &self,
        path: &str,
        body: &B,
        query: &Params,
        headers: &Params,
    ) -> Result<Option<T>, CallError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.call(Method::POST, path, Some(json::encode(body)), query, headers)
            .await
    }

    /// Sends a `PUT` request with a JSON body
    pub async fn put<T, B>(
        &self,
        path: &str,
        body: &B,
        query: &Params,
        headers: &Params,
    ) -> Result<Option<T>, CallError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.call(Method::PUT, path, Some(json::encode(body)), query, headers)
            .await
    }

    /// Sends a `DELETE` request
    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &Params,
        headers: &Params,
    ) -> Result<Option<T>, CallError> {
        self.call(Method::DELETE, path, None, query, headers).await
    }

    #[tracing::instrument(
        skip_all,
        fields(method = %method, path = %path),
    )]
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Result<Vec<u8>, CallError>>,
        query: &Params,
        headers: &Params,
    ) -> Result<Option<T>, CallError> {
        let mut guard = AfterCall {
            hooks: &self.hooks,
            context: CallContext::default(),
            path,
            query,
            headers: headers.clone(),
        };

        self.hooks
            .before_call(&mut guard.context, path, query, &mut guard.headers);

        let request = self.prepare(method, path, body.transpose()?, query, &guard.headers)?;
        self.execute(&request, &mut guard.context).await
    }

    fn prepare(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        query: &Params,
        headers: &Params,
    ) -> Result<PreparedRequest, CallError> {
        if path.trim().is_empty() {
            return Err(CallError::InvalidRequest("path must not be empty".to_owned()));
        }

        let url = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
        .parse::<reqwest::Url>()
        .map_err(|err| CallError::InvalidRequest(format!("invalid path {path}: {err}")))?;

        let mut header_map = HeaderMap::new();
        let mut session_token = None;
        for (name, value) in headers.present() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| CallError::InvalidRequest(format!("invalid header name {name}")))?;
            if name == SESSION_TOKEN {
                session_token = Some(SessionToken::from(value.to_owned()));
                continue;
            }
            let value = HeaderValue::from_str(value)
                .map_err(|_| CallError::InvalidRequest(format!("invalid value for header {name}")))?;
            header_map.append(name, value);
        }

        header_map
            .entry(header::ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));
        if body.is_some() {
            header_map
                .entry(header::CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
        }

        Ok(PreparedRequest {
            method,
            url,
            query: query
                .present()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
            headers: header_map,
            session_token,
            body,
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: &PreparedRequest,
        context: &mut CallContext,
    ) -> Result<Option<T>, CallError> {
        let mut transport = self.source.transport()?;
        if let Some(session_token) = &request.session_token {
            transport.token = transport.token.with_session_token(session_token.clone());
        }
        let mut renewals_left = MAX_RENEWALS;

        loop {
            match self.attempt(&transport, request, context).await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Forbidden(error) => {
                    if let Err(reason) = self.source.renew(&transport.token, &error).await {
                        tracing::warn!(%reason, "identity lost its entitlement");
                    }
                    return Err(CallError::Forbidden(error));
                }
                Attempt::Expired(error) if renewals_left > 0 => {
                    renewals_left -= 1;
                    tracing::debug!("session expired, renewing credentials");
                    transport = self.source.renew(&transport.token, &error).await?;
                }
                Attempt::Expired(error) => return Err(CallError::Unauthorized(error)),
            }
        }
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        transport: &Transport,
        request: &PreparedRequest,
        context: &mut CallContext,
    ) -> Result<Attempt<T>, CallError> {
        let mut middleware = SessionTokenMiddleware::new(transport.token.clone());
        if self.key_manager_token {
            middleware = middleware.with_key_manager_token();
        }

        let client = ClientBuilder::new(transport.client.clone())
            .with(middleware)
            .build();

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        context.record_attempt();
        let response = builder.send().await.map_err(|err| self.send_failed(err))?;

        let status = response.status();
        let headers = response.headers().clone();
        context.record_response(status, headers.clone());
        tracing::debug!(response.status = status.as_u16(), "received response");

        if status == StatusCode::NO_CONTENT {
            return Ok(Attempt::Done(None));
        }

        let body = response
            .text()
            .await
            .map_err(|source| self.unreachable(source))?;

        if status.is_success() {
            return json::decode(body).map(Attempt::Done);
        }

        let error = ApiError::new(status, headers, body);
        if status == StatusCode::UNAUTHORIZED {
            Ok(Attempt::Expired(error))
        } else if no_longer_entitled(status) {
            Ok(Attempt::Forbidden(error))
        } else {
            Err(CallError::Api(error))
        }
    }

    fn send_failed(&self, err: reqwest_middleware::Error) -> CallError {
        match err {
            reqwest_middleware::Error::Reqwest(source) => self.unreachable(source),
            err => CallError::InvalidRequest(err.to_string()),
        }
    }

    fn unreachable(&self, source: reqwest::Error) -> CallError {
        CallError::Connectivity {
            base_url: self.base_url.to_string(),
            source,
        }
    }
}
