use std::future::Future;
use std::time::Duration;

use crate::error::{BackendError, BackendResult};

#[derive(Debug, Clone, Copy)]
/// Параметры контроллеров доски.
pub struct BoardOptions {
    /// Размер страницы списка постов.
    pub page_size: u32,
    /// Предельное время одного удалённого вызова.
    pub request_timeout: Duration,
}

impl BoardOptions {
    /// Размер страницы по умолчанию.
    pub const DEFAULT_PAGE_SIZE: u32 = 10;
    /// Таймаут запроса по умолчанию.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

    /// Создаёт параметры; нулевой размер страницы заменяется значением по умолчанию.
    pub fn new(page_size: u32, request_timeout: Duration) -> Self {
        let page_size = if page_size > 0 {
            page_size
        } else {
            Self::DEFAULT_PAGE_SIZE
        };

        Self {
            page_size,
            request_timeout,
        }
    }
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PAGE_SIZE, Self::DEFAULT_REQUEST_TIMEOUT)
    }
}

/// Ограничивает удалённый вызов таймаутом.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> BackendResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::TimedOut),
    }
}
