use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Method, Response, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use crate::backend::{Directory, RoomRef};
use crate::chat::AppCredentials;
use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS};

const API_VERSION_PATH: &str = "1.1/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error code the backend returns for an unknown user.
const USER_NOT_FOUND_CODE: i64 = 211;

/// A user account as returned by the backend.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Backend identifier; also the realtime client id.
    pub object_id: String,
    /// Login name shown in the chatroom.
    #[serde(default)]
    pub username: String,
    /// Bound e-mail address, if any.
    #[serde(default)]
    pub email: Option<String>,
    /// Session token; present after logging in or signing up.
    #[serde(default)]
    pub session_token: Option<String>,
}

impl User {
    fn session(&self) -> Result<&str> {
        self.session_token
            .as_deref()
            .ok_or_else(|| Error::authentication("user is not logged in"))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    object_id: String,
    session_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Conversation {
    object_id: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct QueryResults<T> {
    results: Vec<T>,
}

/// Returns true when `identity` should log in by e-mail rather than username.
pub fn looks_like_email(identity: &str) -> bool {
    let Some((local, domain)) = identity.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !identity.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}

/// Maps a failed response onto the crate error type.
///
/// The backend reports failures as `{"code": <n>, "error": "<message>"}`;
/// bodies that are not in that shape are used verbatim as the message.
pub fn error_from_body(status_code: u16, body: &str, retry_after: Option<u64>) -> Error {
    #[derive(Deserialize)]
    struct ErrorResponse {
        code: Option<i64>,
        error: Option<String>,
    }

    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    let code = parsed.as_ref().and_then(|e| e.code);
    let message = parsed
        .and_then(|e| e.error)
        .unwrap_or_else(|| body.to_string());

    match status_code {
        400 if code == Some(USER_NOT_FOUND_CODE) => {
            Error::not_found(message, Some("user".to_string()), None)
        }
        401 => Error::authentication(message),
        404 => Error::not_found(message, None, None),
        408 => Error::timeout(message, None),
        _ => Error::backend(status_code, code, message, retry_after),
    }
}

/// Client for the hosted backend's REST storage API.
#[derive(Debug, Clone)]
pub struct LeanCloud {
    app_id: String,
    app_key: String,
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
}

impl LeanCloud {
    /// Create a new client.
    pub fn new(credentials: AppCredentials) -> Result<Self> {
        Self::with_timeout(credentials, DEFAULT_TIMEOUT)
    }

    /// Create a new client with a custom request timeout.
    pub fn with_timeout(credentials: AppCredentials, timeout: Duration) -> Result<Self> {
        let base_url = api_base_url(&credentials.server_url)?;
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            app_id: credentials.app_id,
            app_key: credentials.app_key,
            client,
            base_url,
            timeout,
        })
    }

    /// Logs in by e-mail when `identity` looks like an address, otherwise by
    /// username.  Wrong credentials are reported as an authentication error.
    pub async fn log_in(&self, identity: &str, password: &str) -> Result<User> {
        let body = if looks_like_email(identity) {
            json!({ "email": identity, "password": password })
        } else {
            json!({ "username": identity, "password": password })
        };
        self.request::<User>(Method::POST, "login", &[], None, Some(&body))
            .await
            .map_err(|err| match err {
                Error::Backend {
                    status: 400,
                    message,
                    ..
                }
                | Error::NotFound { message, .. } => Error::authentication(message),
                other => other,
            })
    }

    /// Creates an account.  With an e-mail address the backend sends a
    /// verification mail.
    pub async fn sign_up(&self, username: &str, password: &str, email: Option<&str>) -> Result<User> {
        let mut body = json!({ "username": username, "password": password });
        if let Some(email) = email {
            body["email"] = Value::String(email.to_string());
        }
        let created: SignUpResponse = self
            .request(Method::POST, "users", &[], None, Some(&body))
            .await?;
        Ok(User {
            object_id: created.object_id,
            username: username.to_string(),
            email: email.map(str::to_string),
            session_token: created.session_token,
        })
    }

    /// Fetches a user by object id.
    pub async fn user(&self, object_id: &str) -> Result<User> {
        self.request(Method::GET, &format!("users/{object_id}"), &[], None, None)
            .await
    }

    /// Binds `email` to a logged-in user; the backend sends a verification
    /// mail.
    pub async fn set_email(&self, user: &User, email: &str) -> Result<()> {
        let body = json!({ "email": email });
        self.request::<Value>(
            Method::PUT,
            &format!("users/{}", user.object_id),
            &[],
            Some(user.session()?),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    /// Changes the password of a logged-in user.
    pub async fn change_password(&self, user: &User, old: &str, new: &str) -> Result<()> {
        let body = json!({ "old_password": old, "new_password": new });
        self.request::<Value>(
            Method::PUT,
            &format!("users/{}/updatePassword", user.object_id),
            &[],
            Some(user.session()?),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    /// Asks the backend to mail a password reset link.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let body = json!({ "email": email });
        self.request::<Value>(Method::POST, "requestPasswordReset", &[], None, Some(&body))
            .await?;
        Ok(())
    }

    /// Finds the transient conversation (chatroom) named `name`.
    pub async fn find_chatroom(&self, name: &str) -> Result<RoomRef> {
        let filter = json!({ "name": name, "tr": true }).to_string();
        let results: QueryResults<Conversation> = self
            .request(
                Method::GET,
                "classes/_Conversation",
                &[("where", filter), ("limit", "1".to_string())],
                None,
                None,
            )
            .await?;
        let conversation = results.results.into_iter().next().ok_or_else(|| {
            Error::not_found(
                format!("no chatroom named {name}"),
                Some("conversation".to_string()),
                None,
            )
        })?;
        let room_name = if conversation.name.is_empty() {
            name.to_string()
        } else {
            conversation.name
        };
        Ok(RoomRef::new(conversation.object_id, room_name))
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self, session: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("X-LC-Id", header_value("app_id", &self.app_id)?);
        headers.insert("X-LC-Key", header_value("app_key", &self.app_key)?);
        if let Some(session) = session {
            headers.insert("X-LC-Session", header_value("session_token", session)?);
        }
        Ok(headers)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        session: Option<&str>,
        body: Option<&Value>,
    ) -> Result<T> {
        let url = self.base_url.join(path)?;
        let start = Instant::now();
        CLIENT_REQUESTS.click();
        tracing::debug!(%method, path, "sending request");

        let result = self.execute(method, url, query, session, body).await;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            CLIENT_REQUEST_ERRORS.click();
            tracing::warn!(path, error = %err, "request failed");
        }
        result
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        session: Option<&str>,
        body: Option<&Value>,
    ) -> Result<T> {
        let mut request = self
            .client
            .request(method, url)
            .headers(self.default_headers(session)?);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(
                    format!("Request timed out: {e}"),
                    Some(self.timeout.as_secs_f64()),
                )
            } else if e.is_connect() {
                Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
            } else {
                Error::http(format!("Request failed: {e}"), Some(Box::new(e)))
            }
        })?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        response.json::<T>().await.map_err(|e| {
            Error::serialization(format!("Failed to parse response: {e}"), Some(Box::new(e)))
        })
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        match response.text().await {
            Ok(body) => error_from_body(status_code, &body, retry_after),
            Err(e) => Error::http(
                format!("Failed to read error response: {e}"),
                Some(Box::new(e)),
            ),
        }
    }
}

#[async_trait::async_trait]
impl Directory for LeanCloud {
    async fn username(&self, sender_id: &str) -> Result<String> {
        let user = self
            .user(sender_id)
            .await
            .map_err(|err| Error::lookup(err.to_string(), sender_id))?;
        if user.username.is_empty() {
            return Err(Error::lookup("user has no username", sender_id));
        }
        Ok(user.username)
    }
}

fn api_base_url(server_url: &str) -> Result<Url> {
    let mut server = Url::parse(server_url)
        .map_err(|e| Error::url(format!("invalid server URL {server_url:?}"), Some(e)))?;
    if !server.path().ends_with('/') {
        let path = format!("{}/", server.path());
        server.set_path(&path);
    }
    Ok(server.join(API_VERSION_PATH)?)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| {
        Error::validation(
            "value is not a valid HTTP header",
            Some(name.to_string()),
        )
    })
}
