use chrono::NaiveDate;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use url::Url;

/// Client for the registry gateway that fronts the government registry.
///
/// Every domain operation runs inside an authenticated session obtained
/// from [`RegistryClient::login`]; sessions are pooled by
/// [`crate::pool::SessionPool`].
#[derive(Clone)]
pub struct RegistryClient {
    http: Client,
    base_url: Url,
    client_id: String,
    client_secret: String,
}

impl RegistryClient {
    /// Creates a new gateway client with the provided configuration.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        base_url: Url,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Opens a new authenticated gateway session.
    pub async fn login(&self) -> Result<RegistrySession, RegistryError> {
        let url = self.base_url.join("sessions")?;
        let body = serde_json::json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
        });
        let response = self.http.post(url).json(&body).send().await?;

        parse_json::<LoginResponse>(response)
            .await
            .map(|login| RegistrySession {
                token: login.session,
            })
    }

    /// Closes a gateway session.
    pub async fn logout(&self, session: &RegistrySession) -> Result<(), RegistryError> {
        let url = self.base_url.join("sessions/current")?;
        let response = self
            .session_request(Method::DELETE, url, session)
            .send()
            .await?;
        ensure_success(response).await
    }

    /// Sends the keep-alive greeting, validating that the session is
    /// still accepted by the gateway.
    pub async fn hello(&self, session: &RegistrySession) -> Result<(), RegistryError> {
        let url = self.base_url.join("sessions/current/hello")?;
        let response = self
            .session_request(Method::POST, url, session)
            .send()
            .await?;
        ensure_success(response).await
    }

    /// Registers a domain with the registry.
    pub async fn create_domain(
        &self,
        session: &RegistrySession,
        name: &str,
    ) -> Result<RegistryDomain, RegistryError> {
        let url = self.base_url.join("domains")?;
        let body = serde_json::json!({ "name": name });
        let response = self
            .session_request(Method::POST, url, session)
            .json(&body)
            .send()
            .await?;
        parse_json(response).await
    }

    /// Fetches registry-side information about a domain.
    pub async fn domain_info(
        &self,
        session: &RegistrySession,
        name: &str,
    ) -> Result<RegistryDomain, RegistryError> {
        let url = self.domain_url(name, None)?;
        let response = self
            .session_request(Method::GET, url, session)
            .send()
            .await?;
        parse_json(response).await
    }

    /// Removes a domain from the registry.
    pub async fn delete_domain(
        &self,
        session: &RegistrySession,
        name: &str,
    ) -> Result<(), RegistryError> {
        let url = self.domain_url(name, None)?;
        let response = self
            .session_request(Method::DELETE, url, session)
            .send()
            .await?;
        ensure_success(response).await
    }

    /// Replaces the nameserver set for a domain.
    pub async fn update_nameservers(
        &self,
        session: &RegistrySession,
        name: &str,
        hosts: &[String],
    ) -> Result<(), RegistryError> {
        let url = self.domain_url(name, Some("nameservers"))?;
        let body = serde_json::json!({ "hosts": hosts });
        let response = self
            .session_request(Method::PUT, url, session)
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await
    }

    /// Places a client hold, pausing the domain in DNS.
    pub async fn place_client_hold(
        &self,
        session: &RegistrySession,
        name: &str,
    ) -> Result<(), RegistryError> {
        let url = self.domain_url(name, Some("holds"))?;
        let response = self
            .session_request(Method::POST, url, session)
            .send()
            .await?;
        ensure_success(response).await
    }

    /// Releases a client hold.
    pub async fn remove_client_hold(
        &self,
        session: &RegistrySession,
        name: &str,
    ) -> Result<(), RegistryError> {
        let url = self.domain_url(name, Some("holds"))?;
        let response = self
            .session_request(Method::DELETE, url, session)
            .send()
            .await?;
        ensure_success(response).await
    }

    fn domain_url(&self, name: &str, suffix: Option<&str>) -> Result<Url, RegistryError> {
        let mut path = format!("domains/{name}");
        if let Some(suffix) = suffix {
            path.push('/');
            path.push_str(suffix);
        }
        Ok(self.base_url.join(&path)?)
    }

    fn session_request(
        &self,
        method: Method,
        url: Url,
        session: &RegistrySession,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("X-Registry-Session", &session.token)
    }
}

/// Opaque token for one authenticated gateway session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySession {
    token: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    session: String,
}

/// Registry-side view of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryDomain {
    pub name: String,
    #[serde(default)]
    pub statuses: Vec<String>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Errors produced by the gateway client.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn ensure_success(response: Response) -> Result<(), RegistryError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(RegistryError::Status { status, body });
    }
    Ok(())
}

async fn parse_json<T>(response: Response) -> Result<T, RegistryError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(RegistryError::Status { status, body });
    }

    Ok(response.json().await?)
}
