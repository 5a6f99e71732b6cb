use futures::StreamExt;
use secrecy::ExposeSecret;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::types::{AddBookmark, BookmarkEntry, SyncBatch};
use crate::session::Session;

/// Hard ceiling on response body size (4 MB). A sync batch of a few
/// hundred posts fits well under this.
const MAX_RESPONSE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Malformed JSON body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid API base URL: {0}")]
    BaseUrl(String),
}

impl ApiError {
    /// Returns true if the failure is worth retrying at the next
    /// reconciliation. Permanent rejections (4xx, undecodable bodies,
    /// bad configuration) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Timeout(_) | ApiError::Network(_) => true,
            ApiError::HttpStatus(status) => *status >= 500,
            ApiError::ResponseTooLarge(_) | ApiError::Decode(_) | ApiError::BaseUrl(_) => false,
        }
    }
}

/// Thin client over the remote news API.
///
/// Carries no auth state of its own: every call takes the [`Session`]
/// and attaches a bearer header only when a token is present, so the
/// same client serves authenticated and anonymous requests.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::BaseUrl(e.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// `GET /bookmarks` — the server's full bookmark list as post IDs.
    pub async fn fetch_bookmarks(&self, session: &Session) -> Result<Vec<i64>, ApiError> {
        let url = self.endpoint(&["bookmarks"])?;
        let request = self.authorize(self.http.get(url), session);
        let response = self.send(request).await?;
        let body = read_limited(response, MAX_RESPONSE_SIZE).await?;

        let entries: Vec<BookmarkEntry> = serde_json::from_slice(&body)?;
        Ok(entries.into_iter().map(|entry| entry.post.id).collect())
    }

    /// `POST /bookmarks` — tell the server one post is bookmarked.
    pub async fn add_bookmark(&self, session: &Session, post_id: i64) -> Result<(), ApiError> {
        let url = self.endpoint(&["bookmarks"])?;
        let body = serde_json::to_string(&AddBookmark { post_id })?;
        let request = self
            .authorize(self.http.post(url), session)
            .header("Content-Type", "application/json")
            .body(body);
        self.send(request).await?;
        Ok(())
    }

    /// `DELETE /bookmarks/{id}` — tell the server one bookmark is gone.
    pub async fn remove_bookmark(&self, session: &Session, post_id: i64) -> Result<(), ApiError> {
        let url = self.endpoint(&["bookmarks", &post_id.to_string()])?;
        let request = self.authorize(self.http.delete(url), session);
        self.send(request).await?;
        Ok(())
    }

    /// `GET /posts/sync?last_id=N` — posts newer than the given ID.
    ///
    /// Returns the raw post documents; the cache layer validates and
    /// stores them item by item.
    pub async fn fetch_posts_since(
        &self,
        session: &Session,
        last_id: i64,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        let mut url = self.endpoint(&["posts", "sync"])?;
        url.query_pairs_mut()
            .append_pair("last_id", &last_id.to_string());

        let request = self.authorize(self.http.get(url), session);
        let response = self.send(request).await?;
        let body = read_limited(response, MAX_RESPONSE_SIZE).await?;

        let batch: SyncBatch = serde_json::from_slice(&body)?;
        Ok(batch.posts)
    }

    /// Build an endpoint URL by appending path segments to the base.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ApiError::BaseUrl("base URL cannot carry a path".to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    /// Attach the bearer header when the session holds a token. The
    /// token is exposed only here, at the request-building site.
    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        session: &Session,
    ) -> reqwest::RequestBuilder {
        match session.bearer_token() {
            Some(token) => request.header(
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    /// Send with the configured timeout and map non-2xx to an error.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ApiError::Timeout(self.timeout.as_secs()))?
            .map_err(ApiError::Network)?;

        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status().as_u16()));
        }

        Ok(response)
    }
}

/// Read a response body chunk by chunk, bailing out once `limit` is hit.
async fn read_limited(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, ApiError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ApiError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SecretString, Session};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn anon() -> Session {
        Session::fixed(None, true)
    }

    fn authed() -> Session {
        Session::fixed(Some(SecretString::from("sekrit")), true)
    }

    async fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(&server.uri(), 5).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_bookmarks_decodes_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bookmarks"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"post":{"id":3,"title":"A"}},{"post":{"id":11,"title":"B"}}]"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let ids = client.fetch_bookmarks(&anon()).await.unwrap();
        assert_eq!(ids, vec![3, 11]);
    }

    #[tokio::test]
    async fn test_bearer_header_sent_when_authenticated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bookmarks"))
            .and(header("Authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let ids = client.fetch_bookmarks(&authed()).await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_add_bookmark_posts_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bookmarks"))
            .and(body_json(serde_json::json!({ "post_id": 7 })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.add_bookmark(&authed(), 7).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_bookmark_targets_id_path() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/bookmarks/42"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.remove_bookmark(&authed(), 42).await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_posts_since_sends_last_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts/sync"))
            .and(query_param("last_id", "42"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"posts":[{"id":43,"title":"new"}]}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let posts = client.fetch_posts_since(&anon(), 42).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["id"], 43);
    }

    #[tokio::test]
    async fn test_base_url_with_path_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/bookmarks"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let base = format!("{}/api/v1", server.uri());
        let client = ApiClient::new(&base, 5).unwrap();
        client.fetch_bookmarks(&anon()).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_404_maps_to_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.remove_bookmark(&authed(), 1).await.unwrap_err();
        assert!(matches!(err, ApiError::HttpStatus(404)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_http_500_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.fetch_bookmarks(&anon()).await.unwrap_err();
        assert!(matches!(err, ApiError::HttpStatus(500)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.fetch_bookmarks(&anon()).await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(60)))
            .mount(&server)
            .await;

        // Paused clock: the 2s timeout fires as soon as the runtime
        // auto-advances, well before the mock's 60s delay.
        let client = ApiClient::new(&server.uri(), 2).unwrap();
        let err = client.fetch_bookmarks(&anon()).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout(2)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_invalid_base_url_rejected() {
        let err = ApiClient::new("not a url", 5).unwrap_err();
        assert!(matches!(err, ApiError::BaseUrl(_)));
    }
}
