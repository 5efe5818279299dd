use thiserror::Error;

#[derive(Debug, Error)]
/// Ошибки коллабораторов: сервиса аутентификации, хранилища строк и
/// объектного хранилища.
pub enum BackendError {
    /// Ошибка HTTP-транспорта (`reqwest`).
    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),

    /// Платформа вернула неуспешный HTTP-статус.
    #[error("http status {status}: {message}")]
    Status {
        /// Код HTTP-ответа.
        status: u16,
        /// Сообщение из тела ответа или описание статуса.
        message: String,
    },

    /// Ответ не удалось разобрать.
    #[error("decode error: {0}")]
    Decode(String),

    /// Нет сессии или платформа отклонила токен.
    #[error("unauthorized")]
    Unauthorized,

    /// Запрошенная строка или объект отсутствует.
    #[error("not found")]
    NotFound,

    /// Запрос не завершился за отведённое время.
    #[error("request timed out")]
    TimedOut,

    /// Коллаборатор недоступен.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Результат вызовов коллабораторов.
pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    pub(crate) fn from_http_status(status: reqwest::StatusCode, message: Option<String>) -> Self {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Self::Unauthorized
            }
            reqwest::StatusCode::NOT_FOUND => Self::NotFound,
            _ => {
                let message = message.unwrap_or_else(|| format!("http status {status}"));
                Self::Status {
                    status: status.as_u16(),
                    message,
                }
            }
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::TimedOut;
        }
        if let Some(status) = err.status() {
            return Self::from_http_status(status, None);
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        Self::Http(err)
    }
}

#[derive(Debug, Error)]
/// Ошибки контроллеров доски, которые видит пользователь.
pub enum BoardError {
    /// Обязательное поле пустое или некорректное.
    #[error("validation failed for '{field}': {message}")]
    Validation {
        /// Имя поля формы.
        field: &'static str,
        /// Что именно не так.
        message: &'static str,
    },

    /// Изображение больше допустимого размера.
    #[error("image is too large: {size} bytes (limit {limit})")]
    ImageTooLarge {
        /// Размер выбранного файла.
        size: u64,
        /// Максимально допустимый размер.
        limit: u64,
    },

    /// Выбранный файл не является изображением.
    #[error("not an image: '{media_type}'")]
    ImageWrongType {
        /// Media type выбранного файла.
        media_type: String,
    },

    /// Пост не найден.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Нет сессии или текущий пользователь не автор поста.
    #[error("unauthorized")]
    Unauthorized,

    /// Запрошенная страница за пределами `[1, total_pages]`.
    #[error("page {page} is out of range 1..={total_pages}")]
    PageOutOfRange {
        /// Запрошенная страница.
        page: u32,
        /// Текущее число страниц.
        total_pages: u32,
    },

    /// Не удалось загрузить данные.
    #[error("load failed: {0}")]
    LoadFailed(#[source] BackendError),

    /// Не удалось сохранить или удалить пост.
    #[error("submit failed: {0}")]
    SubmitFailed(#[source] BackendError),

    /// Удалённый вызов не уложился в таймаут.
    #[error("request timed out")]
    RequestTimedOut,

    /// Вход, регистрация или выход отклонены платформой.
    #[error("authentication failed: {0}")]
    AuthFailed(#[source] BackendError),

    /// Вспомогательная очистка не удалась. Только логируется.
    #[error("best-effort cleanup failed: {0}")]
    BestEffortCleanupFailed(#[source] BackendError),
}

/// Результат операций контроллеров.
pub type BoardResult<T> = Result<T, BoardError>;

impl BoardError {
    pub(crate) fn load_failed(err: BackendError) -> Self {
        match err {
            BackendError::TimedOut => Self::RequestTimedOut,
            other => Self::LoadFailed(other),
        }
    }

    pub(crate) fn submit_failed(err: BackendError) -> Self {
        match err {
            BackendError::TimedOut => Self::RequestTimedOut,
            other => Self::SubmitFailed(other),
        }
    }

    pub(crate) fn auth_failed(err: BackendError) -> Self {
        match err {
            BackendError::TimedOut => Self::RequestTimedOut,
            other => Self::AuthFailed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_maps_auth_and_not_found() {
        assert!(matches!(
            BackendError::from_http_status(reqwest::StatusCode::FORBIDDEN, None),
            BackendError::Unauthorized
        ));
        assert!(matches!(
            BackendError::from_http_status(reqwest::StatusCode::NOT_FOUND, None),
            BackendError::NotFound
        ));
    }

    #[test]
    fn http_status_keeps_message_for_other_codes() {
        let err = BackendError::from_http_status(
            reqwest::StatusCode::CONFLICT,
            Some("duplicate key".to_string()),
        );
        match err {
            BackendError::Status { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "duplicate key");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn timeouts_become_request_timed_out() {
        assert!(matches!(
            BoardError::load_failed(BackendError::TimedOut),
            BoardError::RequestTimedOut
        ));
        assert!(matches!(
            BoardError::submit_failed(BackendError::TimedOut),
            BoardError::RequestTimedOut
        ));
        assert!(matches!(
            BoardError::submit_failed(BackendError::NotFound),
            BoardError::SubmitFailed(BackendError::NotFound)
        ));
    }
}
