//! Клиентская библиотека доски объявлений поверх Supabase-совместимой платформы.
//!
//! Логика экранов (список, просмотр, форма поста, вход) живёт в контроллерах и
//! работает через три трейта-коллаборатора:
//! - [`SessionGateway`]: аутентификация;
//! - [`PostRepository`]: таблица постов;
//! - [`ImageStore`]: хранилище изображений.
//!
//! [`SupabaseClient`] реализует их по HTTP (`reqwest`), [`InMemoryBackend`]
//! держит всё в памяти процесса. [`Board`] собирает контроллеры для одного
//! бэкенда.
#![warn(missing_docs)]

mod auth;
mod backend;
mod composer;
mod detail;
mod error;
mod image;
mod listing;
mod memory;
mod models;
mod options;
mod supabase;

use std::sync::Arc;

pub use auth::{AuthService, SignInRequest, SignUpRequest};
pub use backend::{Backend, ImageStore, PostRepository, SessionGateway};
pub use composer::{ComposerController, ComposerMode, ImagePreview, PendingImage, PostForm};
pub use detail::{PostDetailController, PostView};
pub use error::{BackendError, BackendResult, BoardError, BoardResult};
pub use image::{
    ImageBlob, MAX_IMAGE_BYTES, generate_key, key_from_address, media_type_for_file_name,
};
pub use listing::{
    ListingController, ListingPage, ListingRow, ListingState, row_rank, total_pages,
};
pub use memory::{InMemoryBackend, MemoryOp};
pub use models::{
    AuthEvent, AuthEventKind, Identity, NewPost, Post, PostFilter, PostPatch, RangeWindow, Session,
};
pub use options::BoardOptions;
pub use supabase::{SupabaseClient, SupabaseConfig};

/// Контроллеры доски, собранные над одним бэкендом.
pub struct Board<B: Backend> {
    backend: Arc<B>,
    options: BoardOptions,
}

impl<B: Backend> Clone for Board<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            options: self.options,
        }
    }
}

impl<B: Backend> Board<B> {
    /// Создаёт доску над бэкендом.
    pub fn new(backend: B, options: BoardOptions) -> Self {
        Self {
            backend: Arc::new(backend),
            options,
        }
    }

    /// Бэкенд доски.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Настройки доски.
    pub fn options(&self) -> &BoardOptions {
        &self.options
    }

    /// Сервис аутентификации.
    pub fn auth(&self) -> AuthService<B> {
        AuthService::new(Arc::clone(&self.backend), self.options)
    }

    /// Контроллер списка постов.
    pub fn listing(&self) -> ListingController<B> {
        ListingController::new(Arc::clone(&self.backend), self.options)
    }

    /// Контроллер просмотра поста.
    pub fn detail(&self) -> PostDetailController<B, B, B> {
        PostDetailController::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.backend),
            Arc::clone(&self.backend),
            self.options,
        )
    }

    /// Форма нового поста.
    pub fn composer_for_create(&self) -> ComposerController<B, B, B> {
        ComposerController::for_create(
            Arc::clone(&self.backend),
            Arc::clone(&self.backend),
            Arc::clone(&self.backend),
            self.options,
        )
    }

    /// Форма редактирования поста автора.
    pub async fn composer_for_edit(&self, post_id: &str) -> BoardResult<ComposerController<B, B, B>> {
        ComposerController::for_edit(
            Arc::clone(&self.backend),
            Arc::clone(&self.backend),
            Arc::clone(&self.backend),
            self.options,
            post_id,
        )
        .await
    }
}
