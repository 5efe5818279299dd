use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;
use validator::ValidateEmail;

use crate::backend::SessionGateway;
use crate::error::{BoardError, BoardResult};
use crate::models::{AuthEvent, Identity, Session};
use crate::options::{BoardOptions, bounded};

const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Debug, Clone)]
/// Форма регистрации.
pub struct SignUpRequest {
    /// Email.
    pub email: String,
    /// Пароль.
    pub password: String,
    /// Повтор пароля.
    pub confirm_password: String,
}

impl SignUpRequest {
    /// Нормализует email и проверяет пароль.
    pub fn validate(self) -> BoardResult<Self> {
        let email = normalize_email(&self.email)?;
        if self.password != self.confirm_password {
            return Err(BoardError::Validation {
                field: "confirm_password",
                message: "passwords do not match",
            });
        }
        if self.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(BoardError::Validation {
                field: "password",
                message: "must be at least 6 chars",
            });
        }
        Ok(Self {
            email,
            password: self.password,
            confirm_password: self.confirm_password,
        })
    }
}

#[derive(Debug, Clone)]
/// Форма входа.
pub struct SignInRequest {
    /// Email.
    pub email: String,
    /// Пароль.
    pub password: String,
}

impl SignInRequest {
    /// Проверяет, что оба поля заполнены.
    pub fn validate(self) -> BoardResult<Self> {
        let email = self.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(BoardError::Validation {
                field: "email",
                message: "must not be empty",
            });
        }
        if self.password.is_empty() {
            return Err(BoardError::Validation {
                field: "password",
                message: "must not be empty",
            });
        }
        Ok(Self {
            email,
            password: self.password,
        })
    }
}

fn normalize_email(email: &str) -> BoardResult<String> {
    let email = email.trim().to_lowercase();
    if !email.validate_email() {
        return Err(BoardError::Validation {
            field: "email",
            message: "must be a valid email",
        });
    }
    Ok(email)
}

/// Вход, регистрация и выход поверх `SessionGateway`.
pub struct AuthService<S: SessionGateway> {
    gateway: Arc<S>,
    options: BoardOptions,
}

impl<S: SessionGateway> AuthService<S> {
    /// Создаёт сервис.
    pub fn new(gateway: Arc<S>, options: BoardOptions) -> Self {
        Self { gateway, options }
    }

    /// Регистрирует пользователя. `None`, если нужно подтвердить email.
    pub async fn sign_up(&self, req: SignUpRequest) -> BoardResult<Option<Session>> {
        let req = req.validate()?;
        let session = bounded(
            self.options.request_timeout,
            self.gateway.sign_up(&req.email, &req.password),
        )
        .await
        .map_err(BoardError::auth_failed)?;

        info!(email = %req.email, confirmed = session.is_some(), "signed up");
        Ok(session)
    }

    /// Выполняет вход.
    pub async fn sign_in(&self, req: SignInRequest) -> BoardResult<Session> {
        let req = req.validate()?;
        let session = bounded(
            self.options.request_timeout,
            self.gateway.sign_in(&req.email, &req.password),
        )
        .await
        .map_err(BoardError::auth_failed)?;

        info!(user_id = %session.identity.id, "signed in");
        Ok(session)
    }

    /// Выполняет выход.
    pub async fn sign_out(&self) -> BoardResult<()> {
        bounded(self.options.request_timeout, self.gateway.sign_out())
            .await
            .map_err(BoardError::auth_failed)
    }

    /// Текущий пользователь или `None`.
    pub async fn current_identity(&self) -> Option<Identity> {
        tokio::time::timeout(
            self.options.request_timeout,
            self.gateway.current_identity(),
        )
        .await
        .ok()
        .flatten()
    }

    /// Подписка на изменения состояния аутентификации.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.gateway.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_up(email: &str, password: &str, confirm: &str) -> SignUpRequest {
        SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            confirm_password: confirm.to_string(),
        }
    }

    #[test]
    fn sign_up_normalizes_email() {
        let req = sign_up("  User@Example.COM ", "secret1", "secret1")
            .validate()
            .expect("must be valid");
        assert_eq!(req.email, "user@example.com");
    }

    #[test]
    fn sign_up_rejects_mismatched_confirmation() {
        let err = sign_up("user@example.com", "secret1", "secret2")
            .validate()
            .expect_err("must be rejected");
        assert!(matches!(
            err,
            BoardError::Validation {
                field: "confirm_password",
                ..
            }
        ));
    }

    #[test]
    fn sign_up_rejects_short_password() {
        let err = sign_up("user@example.com", "12345", "12345")
            .validate()
            .expect_err("must be rejected");
        assert!(matches!(err, BoardError::Validation { field: "password", .. }));
    }

    #[test]
    fn sign_up_rejects_invalid_email() {
        let err = sign_up("not-an-email", "secret1", "secret1")
            .validate()
            .expect_err("must be rejected");
        assert!(matches!(err, BoardError::Validation { field: "email", .. }));
    }

    #[test]
    fn sign_in_requires_both_fields() {
        let empty_email = SignInRequest {
            email: "  ".to_string(),
            password: "x".to_string(),
        };
        assert!(empty_email.validate().is_err());

        let empty_password = SignInRequest {
            email: "user@example.com".to_string(),
            password: String::new(),
        };
        assert!(empty_password.validate().is_err());
    }
}
