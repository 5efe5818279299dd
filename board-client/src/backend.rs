use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::BackendResult;
use crate::image::ImageBlob;
use crate::models::{
    AuthEvent, Identity, NewPost, Post, PostFilter, PostPatch, RangeWindow, Session,
};

#[async_trait]
/// Сервис аутентификации платформы.
pub trait SessionGateway: Send + Sync {
    /// Регистрирует пользователя. `None`, если платформа ждёт подтверждения email.
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Option<Session>>;
    /// Выполняет вход по email и паролю.
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session>;
    /// Завершает текущую сессию.
    async fn sign_out(&self) -> BackendResult<()>;
    /// Текущий пользователь; любая ошибка читается как «не вошёл».
    async fn current_identity(&self) -> Option<Identity>;
    /// Подписка на изменения состояния аутентификации.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

#[async_trait]
/// Удалённая коллекция постов.
pub trait PostRepository: Send + Sync {
    /// Количество постов, подходящих под фильтр.
    async fn count(&self, filter: &PostFilter) -> BackendResult<u64>;
    /// Окно постов под фильтром, новые первыми.
    async fn list(&self, filter: &PostFilter, window: RangeWindow) -> BackendResult<Vec<Post>>;
    /// Пост по идентификатору.
    async fn get_by_id(&self, id: &str) -> BackendResult<Option<Post>>;
    /// Вставляет пост и возвращает сохранённую строку.
    async fn insert(&self, input: NewPost) -> BackendResult<Post>;
    /// Обновляет пост; отсутствие строки даёт `BackendError::NotFound`.
    async fn update(&self, id: &str, patch: PostPatch) -> BackendResult<Post>;
    /// Удаляет пост.
    async fn delete(&self, id: &str) -> BackendResult<()>;
    /// Атомарно увеличивает счётчик просмотров на платформе.
    async fn increment_views(&self, id: &str) -> BackendResult<()>;
}

#[async_trait]
/// Объектное хранилище изображений.
pub trait ImageStore: Send + Sync {
    /// Загружает blob под ключом.
    async fn upload(&self, key: &str, blob: &ImageBlob) -> BackendResult<()>;
    /// Публичный адрес объекта. Вычисляется локально.
    fn public_address(&self, key: &str) -> String;
    /// Удаляет объект.
    async fn remove(&self, key: &str) -> BackendResult<()>;
}

/// Полный набор коллабораторов доски в одном типе.
pub trait Backend: SessionGateway + PostRepository + ImageStore + 'static {}

impl<T> Backend for T where T: SessionGateway + PostRepository + ImageStore + 'static {}
