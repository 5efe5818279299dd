use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::SupabaseClient;
use crate::backend::SessionGateway;
use crate::error::{BackendError, BackendResult};
use crate::models::{AuthEvent, Identity, Session};

#[derive(Debug, Serialize)]
struct CredentialsDto<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct UserDto {
    id: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionDto {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: UserDto,
}

impl From<UserDto> for Identity {
    fn from(value: UserDto) -> Self {
        Self {
            id: value.id,
            email: value.email.unwrap_or_default(),
        }
    }
}

impl SessionDto {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .or_else(|| {
                self.expires_in
                    .map(|seconds| now + Duration::seconds(seconds))
            });

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            identity: self.user.into(),
        }
    }
}

/// Ответ `/signup`: сессия при автоподтверждении, иначе только пользователь.
fn parse_sign_up(body: serde_json::Value, now: DateTime<Utc>) -> BackendResult<Option<Session>> {
    if body.get("access_token").is_none() {
        return Ok(None);
    }
    serde_json::from_value::<SessionDto>(body)
        .map(|dto| Some(dto.into_session(now)))
        .map_err(|err| BackendError::Decode(err.to_string()))
}

impl SupabaseClient {
    async fn fetch_user(&self) -> BackendResult<UserDto> {
        Self::send(self.request(Method::GET, "/auth/v1/user"))
            .await?
            .json::<UserDto>()
            .await
            .map_err(BackendError::from_reqwest)
    }
}

#[async_trait]
impl SessionGateway for SupabaseClient {
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Option<Session>> {
        let request = self
            .request(Method::POST, "/auth/v1/signup")
            .json(&CredentialsDto { email, password });
        let body = Self::send(request)
            .await?
            .json::<serde_json::Value>()
            .await
            .map_err(BackendError::from_reqwest)?;

        let session = parse_sign_up(body, Utc::now())?;
        if let Some(session) = &session {
            self.set_session(Some(session.clone()));
        }
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let request = self
            .request(Method::POST, "/auth/v1/token")
            .query(&[("grant_type", "password")])
            .json(&CredentialsDto { email, password });
        let dto = Self::send(request)
            .await?
            .json::<SessionDto>()
            .await
            .map_err(BackendError::from_reqwest)?;

        let session = dto.into_session(Utc::now());
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if self.access_token().is_none() {
            self.set_session(None);
            return Ok(());
        }

        match Self::send(self.request(Method::POST, "/auth/v1/logout")).await {
            // Просроченная или уже отозванная сессия всё равно завершается локально.
            Ok(_) | Err(BackendError::Unauthorized) | Err(BackendError::NotFound) => {
                self.set_session(None);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn current_identity(&self) -> Option<Identity> {
        if self.access_token().is_none() {
            return None;
        }

        match self.fetch_user().await {
            Ok(user) => Some(user.into()),
            Err(err) => {
                debug!(error = %err, "current identity lookup failed");
                None
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::models::AuthEventKind;
    use crate::supabase::{client_for, test_session};

    async fn logout_answering(status: u16) -> (MockServer, SupabaseClient) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("Authorization", "Bearer jwt"))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        client.restore_session(test_session());
        (server, client)
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid ts")
    }

    #[test]
    fn sign_up_without_session_means_confirmation_pending() {
        let body = json!({ "id": "u-1", "email": "a@example.com", "confirmation_sent_at": "2026-01-01T00:00:00Z" });
        let session = parse_sign_up(body, now()).expect("must parse");
        assert!(session.is_none());
    }

    #[test]
    fn sign_up_with_session_is_mapped() {
        let body = json!({
            "access_token": "jwt",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": { "id": "u-1", "email": "a@example.com" }
        });
        let session = parse_sign_up(body, now())
            .expect("must parse")
            .expect("session must be present");
        assert_eq!(session.access_token, "jwt");
        assert_eq!(session.identity.id, "u-1");
        assert_eq!(session.expires_at, Some(now() + Duration::seconds(3600)));
    }

    #[test]
    fn absolute_expiry_wins_over_relative() {
        let dto: SessionDto = serde_json::from_value(json!({
            "access_token": "jwt",
            "expires_in": 10,
            "expires_at": 1_800_000_000,
            "user": { "id": "u-1" }
        }))
        .expect("valid dto");
        let session = dto.into_session(now());
        assert_eq!(session.expires_at.map(|ts| ts.timestamp()), Some(1_800_000_000));
        assert_eq!(session.identity.email, "");
    }

    #[tokio::test]
    async fn sign_in_uses_password_grant_and_publishes_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon"))
            .and(body_json(json!({ "email": "a@example.com", "password": "secret1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "jwt",
                "refresh_token": "r",
                "expires_in": 3600,
                "user": { "id": "u-1", "email": "a@example.com" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let mut events = client.subscribe();
        let session = client
            .sign_in("a@example.com", "secret1")
            .await
            .expect("sign in must succeed");

        assert_eq!(session.identity.id, "u-1");
        assert_eq!(client.access_token().as_deref(), Some("jwt"));
        let event = events.try_recv().expect("sign in must be published");
        assert_eq!(event.kind, AuthEventKind::SignedIn);
    }

    #[tokio::test]
    async fn rejected_credentials_keep_client_signed_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let err = client
            .sign_in("a@example.com", "wrong")
            .await
            .expect_err("bad credentials must fail");
        assert!(matches!(err, BackendError::Status { status: 400, .. }));
        assert!(client.session().is_none());
    }

    #[tokio::test]
    async fn revoked_or_missing_session_signs_out_locally() {
        for status in [401, 404] {
            let (_server, client) = logout_answering(status).await;
            let mut events = client.subscribe();

            client.sign_out().await.expect("sign out must succeed");

            assert!(client.session().is_none());
            let event = events.try_recv().expect("sign out must be published");
            assert_eq!(event.kind, AuthEventKind::SignedOut);
        }
    }

    #[tokio::test]
    async fn server_error_on_sign_out_keeps_session() {
        let (_server, client) = logout_answering(500).await;

        let err = client.sign_out().await.expect_err("server error must surface");
        assert!(matches!(err, BackendError::Status { status: 500, .. }));
        assert!(client.session().is_some());
    }

    #[tokio::test]
    async fn current_identity_reads_user_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("Authorization", "Bearer jwt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": "u-1", "email": "u@example.com" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        assert!(client.current_identity().await.is_none());
        client.restore_session(test_session());
        let identity = client.current_identity().await.expect("identity");
        assert_eq!(identity.email, "u@example.com");
    }
}
