//! HTTP-бэкенд поверх Supabase-совместимой платформы:
//! GoTrue (`/auth/v1`), PostgREST (`/rest/v1`) и Storage (`/storage/v1`).

mod auth;
mod rest;
mod storage;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::error::{BackendError, BackendResult};
use crate::models::{AuthEvent, AuthEventKind, Session};

#[derive(Debug, Clone)]
/// Параметры подключения к платформе.
pub struct SupabaseConfig {
    /// Базовый URL проекта, например `https://xyz.supabase.co`.
    pub url: String,
    /// Публичный (anon) ключ проекта.
    pub anon_key: String,
    /// Таблица постов.
    pub posts_table: String,
    /// Бакет изображений.
    pub image_bucket: String,
    /// Таймаут установки соединения.
    pub connect_timeout: Duration,
    /// Таймаут всего запроса.
    pub request_timeout: Duration,
}

impl SupabaseConfig {
    /// Таблица постов по умолчанию.
    pub const DEFAULT_POSTS_TABLE: &'static str = "posts";
    /// Бакет изображений по умолчанию.
    pub const DEFAULT_IMAGE_BUCKET: &'static str = "post-images";

    /// Конфигурация с таблицей, бакетом и таймаутами по умолчанию.
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            posts_table: Self::DEFAULT_POSTS_TABLE.to_string(),
            image_bucket: Self::DEFAULT_IMAGE_BUCKET.to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponseDto {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ErrorResponseDto {
    fn into_message(self) -> Option<String> {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .or(self.error)
    }
}

#[derive(Debug, Clone)]
/// Клиент платформы; реализует `SessionGateway`, `PostRepository` и `ImageStore`.
///
/// Клоны разделяют одну сессию и одну подписку на события.
pub struct SupabaseClient {
    config: Arc<SupabaseConfig>,
    http: Client,
    session: Arc<RwLock<Option<Session>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseClient {
    /// Создаёт клиент без сессии.
    pub fn new(config: SupabaseConfig) -> BackendResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(BackendError::Http)?;
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            config: Arc::new(config),
            http,
            session: Arc::new(RwLock::new(None)),
            events,
        })
    }

    /// Восстанавливает ранее сохранённую сессию.
    pub fn restore_session(&self, session: Session) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    /// Текущая сессия.
    pub fn session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session(&self, session: Option<Session>) {
        let kind = if session.is_some() {
            AuthEventKind::SignedIn
        } else {
            AuthEventKind::SignedOut
        };
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session.clone();
        // Ошибка означает лишь отсутствие подписчиков.
        let _ = self.events.send(AuthEvent { kind, session });
    }

    fn access_token(&self) -> Option<String> {
        self.session().map(|session| session.access_token)
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Запрос с ключом проекта и токеном сессии (или anon-ключом без сессии).
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let token = self
            .access_token()
            .unwrap_or_else(|| self.config.anon_key.clone());

        self.http
            .request(method, self.endpoint(path))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(token)
    }

    async fn send(request: RequestBuilder) -> BackendResult<Response> {
        let response = request.send().await.map_err(BackendError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(Self::decode_error(response).await);
        }
        Ok(response)
    }

    async fn decode_error(response: Response) -> BackendError {
        let status = response.status();

        let message = match response.json::<ErrorResponseDto>().await {
            Ok(body) => body
                .into_message()
                .unwrap_or_else(|| format!("http status {status}")),
            Err(_) => format!("http status {status}"),
        };
        BackendError::from_http_status(status, Some(message))
    }
}

#[cfg(test)]
fn client_for(url: &str) -> SupabaseClient {
    SupabaseClient::new(SupabaseConfig::new(url, "anon")).expect("client must build")
}

#[cfg(test)]
fn test_session() -> Session {
    Session {
        access_token: "jwt".to_string(),
        refresh_token: None,
        expires_at: None,
        identity: crate::models::Identity {
            id: "u-1".to_string(),
            email: "u@example.com".to_string(),
        },
    }
}
