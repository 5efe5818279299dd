use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Аутентифицированный пользователь, выданный сервисом аутентификации.
pub struct Identity {
    /// Стабильный идентификатор пользователя.
    pub id: String,
    /// Email.
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Сессия пользователя.
pub struct Session {
    /// Access token для запросов к платформе.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: Option<String>,
    /// Момент истечения access token (UTC).
    pub expires_at: Option<DateTime<Utc>>,
    /// Владелец сессии.
    pub identity: Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Вид изменения состояния аутентификации.
pub enum AuthEventKind {
    /// Пользователь вошёл (или сессия выдана при регистрации).
    SignedIn,
    /// Пользователь вышел.
    SignedOut,
}

#[derive(Debug, Clone)]
/// Уведомление об изменении состояния аутентификации.
pub struct AuthEvent {
    /// Что произошло.
    pub kind: AuthEventKind,
    /// Сессия после изменения.
    pub session: Option<Session>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Пост доски.
pub struct Post {
    /// Идентификатор, назначенный платформой.
    pub id: String,
    /// Заголовок.
    pub title: String,
    /// Содержимое.
    pub content: String,
    /// Идентификатор автора.
    pub owner_id: String,
    /// Публичный адрес прикреплённого изображения.
    pub image_address: Option<String>,
    /// Счётчик просмотров.
    pub views: u64,
    /// Дата и время создания (UTC).
    pub created_at: DateTime<Utc>,
    /// Дата и время последнего изменения (UTC).
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Поля новой строки поста.
pub struct NewPost {
    /// Заголовок.
    pub title: String,
    /// Содержимое.
    pub content: String,
    /// Адрес изображения, если оно загружено.
    pub image_address: Option<String>,
    /// Автор.
    pub owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Изменяемые поля поста.
pub struct PostPatch {
    /// Заголовок.
    pub title: String,
    /// Содержимое.
    pub content: String,
    /// Адрес изображения; `None` очищает его.
    pub image_address: Option<String>,
    /// Новое значение времени изменения.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Фильтр выборки постов.
pub struct PostFilter {
    /// Подстрока заголовка, без учёта регистра.
    pub title_contains: Option<String>,
}

impl PostFilter {
    /// Фильтр по ключевому слову; пустое слово означает отсутствие фильтра.
    pub fn keyword(keyword: &str) -> Self {
        let keyword = keyword.trim();
        Self {
            title_contains: (!keyword.is_empty()).then(|| keyword.to_string()),
        }
    }

    /// Проверяет заголовок на соответствие фильтру.
    pub fn matches(&self, title: &str) -> bool {
        match &self.title_contains {
            Some(needle) => title.to_lowercase().contains(&needle.to_lowercase()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Окно выборки `[offset, offset + limit - 1]`.
pub struct RangeWindow {
    /// Смещение от начала выборки.
    pub offset: u64,
    /// Размер окна.
    pub limit: u64,
}

impl RangeWindow {
    /// Последний индекс окна включительно.
    pub fn last(&self) -> u64 {
        (self.offset + self.limit).saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_filter_is_case_insensitive_substring() {
        let filter = PostFilter::keyword("abc");
        assert!(filter.matches("abcd"));
        assert!(filter.matches("xabcdx"));
        assert!(filter.matches("ABCD"));
        assert!(!filter.matches("xyz"));
    }

    #[test]
    fn blank_keyword_means_no_filter() {
        let filter = PostFilter::keyword("   ");
        assert_eq!(filter, PostFilter::default());
        assert!(filter.matches("anything"));
    }

    #[test]
    fn range_window_last_is_inclusive() {
        let window = RangeWindow {
            offset: 20,
            limit: 10,
        };
        assert_eq!(window.last(), 29);
    }
}
