use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{ImageStore, PostRepository, SessionGateway};
use crate::error::{BoardError, BoardResult};
use crate::image::discard_image;
use crate::models::{Identity, Post};
use crate::options::{BoardOptions, bounded};

#[derive(Debug, Clone)]
/// Пост, подготовленный к показу.
pub struct PostView {
    /// Пост в том виде, в каком он был получен.
    pub post: Post,
    /// Счётчик просмотров с учётом текущего просмотра.
    pub displayed_views: u64,
    /// Показывать ли действия редактирования и удаления.
    pub can_modify: bool,
}

pub(crate) fn is_owner(viewer: Option<&Identity>, post: &Post) -> bool {
    viewer.is_some_and(|identity| identity.id == post.owner_id)
}

/// Просмотр и удаление одного поста.
pub struct PostDetailController<S, R, I>
where
    S: SessionGateway,
    R: PostRepository + 'static,
    I: ImageStore,
{
    session: Arc<S>,
    repo: Arc<R>,
    images: Arc<I>,
    options: BoardOptions,
    current: Option<Post>,
    increments: Vec<JoinHandle<()>>,
}

impl<S, R, I> PostDetailController<S, R, I>
where
    S: SessionGateway,
    R: PostRepository + 'static,
    I: ImageStore,
{
    /// Создаёт контроллер.
    pub fn new(session: Arc<S>, repo: Arc<R>, images: Arc<I>, options: BoardOptions) -> Self {
        Self {
            session,
            repo,
            images,
            options,
            current: None,
            increments: Vec::new(),
        }
    }

    /// Последний открытый пост.
    pub fn current(&self) -> Option<&Post> {
        self.current.as_ref()
    }

    /// Открывает пост и в фоне увеличивает счётчик просмотров.
    pub async fn open(&mut self, post_id: &str) -> BoardResult<PostView> {
        let post = bounded(self.options.request_timeout, self.repo.get_by_id(post_id))
            .await
            .map_err(BoardError::load_failed)?
            .ok_or_else(|| BoardError::NotFound(format!("post id: {post_id}")))?;

        self.spawn_view_increment(&post.id);

        let viewer = self.viewer().await;
        let can_modify = is_owner(viewer.as_ref(), &post);
        let displayed_views = post.views.saturating_add(1);

        self.current = Some(post.clone());
        Ok(PostView {
            post,
            displayed_views,
            can_modify,
        })
    }

    /// Удаляет пост автора вместе с изображением.
    ///
    /// Изображение удаляется первым и по возможности: его сбой не мешает
    /// удалению строки.
    pub async fn remove(&mut self, post_id: &str) -> BoardResult<()> {
        let viewer = self.viewer().await.ok_or(BoardError::Unauthorized)?;

        let post = match self.current.as_ref().filter(|post| post.id == post_id) {
            Some(post) => post.clone(),
            None => bounded(self.options.request_timeout, self.repo.get_by_id(post_id))
                .await
                .map_err(BoardError::load_failed)?
                .ok_or_else(|| BoardError::NotFound(format!("post id: {post_id}")))?,
        };

        if !is_owner(Some(&viewer), &post) {
            return Err(BoardError::Unauthorized);
        }

        if let Some(address) = &post.image_address {
            discard_image(self.images.as_ref(), address, self.options.request_timeout).await;
        }

        bounded(self.options.request_timeout, self.repo.delete(&post.id))
            .await
            .map_err(BoardError::submit_failed)?;

        self.current = None;
        info!(post_id = %post.id, "post deleted");
        Ok(())
    }

    /// Дожидается фоновых увеличений счётчика, не дольше таймаута запроса.
    ///
    /// Нужен короткоживущим процессам: runtime, завершившийся раньше задачи,
    /// отменяет её вместе с запросом.
    pub async fn settle(&mut self) {
        let pending = std::mem::take(&mut self.increments);
        let waited = tokio::time::timeout(self.options.request_timeout, async {
            for handle in pending {
                if let Err(err) = handle.await {
                    debug!(error = %err, "view increment task did not complete");
                }
            }
        })
        .await;

        if waited.is_err() {
            warn!("view increments still pending after timeout");
        }
    }

    async fn viewer(&self) -> Option<Identity> {
        tokio::time::timeout(self.options.request_timeout, self.session.current_identity())
            .await
            .ok()
            .flatten()
    }

    fn spawn_view_increment(&mut self, post_id: &str) {
        let repo = Arc::clone(&self.repo);
        let post_id = post_id.to_string();
        let timeout = self.options.request_timeout;

        // Показ поста не ждёт задачу; ожидание возможно только через `settle`.
        self.increments.retain(|handle| !handle.is_finished());
        self.increments.push(tokio::spawn(async move {
            if let Err(err) = bounded(timeout, repo.increment_views(&post_id)).await {
                warn!(post_id = %post_id, error = %err, "view increment failed");
            }
        }));
    }
}
