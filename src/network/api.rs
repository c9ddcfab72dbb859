use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;

use crate::common::{HistoryPage, LocalUser, PeerSummary, UserId};
use crate::error::{FetchError, FetchErrorKind};

/// The forum's request/response API as far as chat needs it.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn current_user(&self) -> Result<LocalUser, FetchError>;

    async fn fetch_peers(&self) -> Result<Vec<PeerSummary>, FetchError>;

    /// One page of history with `peer`, newest first, skipping `offset` messages.
    async fn fetch_history(&self, peer: UserId, offset: usize) -> Result<HistoryPage, FetchError>;
}

#[derive(Clone)]
pub struct HttpChatApi {
    http: Client,
    origin: Url,
    session_cookie: Option<String>,
}

impl HttpChatApi {
    pub fn new(origin: &str, session_cookie: Option<String>) -> Result<Self, FetchError> {
        let origin = Url::parse(origin).map_err(|err| {
            FetchError::new(FetchErrorKind::BadRequest, format!("{origin}: {err}"))
        })?;
        Ok(Self {
            http: Client::new(),
            origin,
            session_cookie,
        })
    }

    fn url(&self, path: &str) -> Result<Url, FetchError> {
        self.origin
            .join(path)
            .map_err(|err| FetchError::new(FetchErrorKind::BadRequest, err.to_string()))
    }

    fn get(&self, url: Url) -> RequestBuilder {
        let request = self.http.get(url);
        match &self.session_cookie {
            Some(cookie) => request.header(COOKIE, cookie.as_str()),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        log::debug!("GET {url}");
        let res = self
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::transient(err.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body.trim().to_string()
            };
            return Err(FetchError::from_status(status.as_u16(), message));
        }

        let body = res
            .text()
            .await
            .map_err(|err| FetchError::transient(err.to_string()))?;
        serde_json::from_str(&body)
            .map_err(|err| FetchError::new(FetchErrorKind::Decode, err.to_string()))
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn current_user(&self) -> Result<LocalUser, FetchError> {
        self.get_json(self.url("/api/me")?).await
    }

    async fn fetch_peers(&self) -> Result<Vec<PeerSummary>, FetchError> {
        // The server encodes an empty list as `null`.
        let peers: Option<Vec<PeerSummary>> = self.get_json(self.url("/api/users")?).await?;
        Ok(peers.unwrap_or_default())
    }

    async fn fetch_history(&self, peer: UserId, offset: usize) -> Result<HistoryPage, FetchError> {
        let mut url = self.url("/api/messages")?;
        url.query_pairs_mut()
            .append_pair("user_id", &peer.to_string())
            .append_pair("offset", &offset.to_string());
        self.get_json(url).await
    }
}
