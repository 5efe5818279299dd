use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::backend::{ImageStore, PostRepository, SessionGateway};
use crate::detail::is_owner;
use crate::error::{BoardError, BoardResult};
use crate::image::{ImageBlob, discard_image, generate_key};
use crate::models::{Identity, NewPost, Post, PostPatch};
use crate::options::{BoardOptions, bounded};

#[derive(Debug, Clone)]
/// Текстовые поля формы поста.
pub struct PostForm {
    /// Заголовок.
    pub title: String,
    /// Содержимое.
    pub content: String,
}

impl PostForm {
    /// Обрезает пробелы и проверяет, что оба поля не пустые.
    pub fn validate(self) -> BoardResult<Self> {
        Ok(Self {
            title: normalize_required("title", &self.title)?,
            content: normalize_required("content", &self.content)?,
        })
    }
}

fn normalize_required(field: &'static str, value: &str) -> BoardResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BoardError::Validation {
            field,
            message: "must not be empty",
        });
    }
    Ok(value.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Что показывать в превью изображения формы.
pub enum ImagePreview {
    /// Изображения нет.
    None,
    /// Уже сохранённое изображение поста.
    Committed(String),
    /// Выбранный, ещё не загруженный файл.
    Pending {
        /// Имя файла.
        file_name: String,
        /// Media type.
        media_type: String,
        /// Размер в байтах.
        size: u64,
    },
}

enum ImageChange<'a> {
    Keep,
    Replace(&'a ImageBlob),
    Remove,
}

#[derive(Debug, Clone, Default)]
/// Выбор изображения между показом формы и её отправкой.
pub struct PendingImage {
    committed: Option<String>,
    selected: Option<ImageBlob>,
    changed: bool,
}

impl PendingImage {
    fn with_committed(address: Option<String>) -> Self {
        Self {
            committed: address,
            selected: None,
            changed: false,
        }
    }

    /// Адрес изображения, сохранённого в посте.
    pub fn committed(&self) -> Option<&str> {
        self.committed.as_deref()
    }

    /// Отличается ли выбор пользователя от сохранённого состояния.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    fn select(&mut self, blob: ImageBlob) -> BoardResult<()> {
        if let Err(err) = blob.validate() {
            self.revert();
            return Err(err);
        }
        self.selected = Some(blob);
        self.changed = true;
        Ok(())
    }

    fn remove(&mut self) {
        self.selected = None;
        self.changed = self.committed.is_some();
    }

    fn revert(&mut self) {
        self.selected = None;
        self.changed = false;
    }

    fn commit(&mut self, address: Option<String>) {
        *self = Self::with_committed(address);
    }

    fn change(&self) -> ImageChange<'_> {
        match (self.changed, &self.selected) {
            (false, _) => ImageChange::Keep,
            (true, Some(blob)) => ImageChange::Replace(blob),
            (true, None) => ImageChange::Remove,
        }
    }

    fn preview(&self) -> ImagePreview {
        match self.change() {
            ImageChange::Replace(blob) => ImagePreview::Pending {
                file_name: blob.file_name.clone(),
                media_type: blob.media_type.clone(),
                size: blob.size(),
            },
            ImageChange::Remove => ImagePreview::None,
            ImageChange::Keep => self
                .committed
                .clone()
                .map_or(ImagePreview::None, ImagePreview::Committed),
        }
    }
}

#[derive(Debug, Clone)]
/// Режим формы.
pub enum ComposerMode {
    /// Новый пост.
    Create,
    /// Редактирование существующего поста.
    Edit {
        /// Пост на момент загрузки формы или последнего сохранения.
        original: Post,
    },
}

/// Форма создания и редактирования поста.
///
/// За одну отправку выполняется не больше одной загрузки и одного удаления
/// изображения, чтобы адрес в посте и объект в хранилище менялись вместе.
pub struct ComposerController<S, R, I>
where
    S: SessionGateway,
    R: PostRepository,
    I: ImageStore,
{
    session: Arc<S>,
    repo: Arc<R>,
    images: Arc<I>,
    options: BoardOptions,
    mode: ComposerMode,
    image: PendingImage,
}

impl<S, R, I> ComposerController<S, R, I>
where
    S: SessionGateway,
    R: PostRepository,
    I: ImageStore,
{
    /// Форма нового поста.
    pub fn for_create(session: Arc<S>, repo: Arc<R>, images: Arc<I>, options: BoardOptions) -> Self {
        Self {
            session,
            repo,
            images,
            options,
            mode: ComposerMode::Create,
            image: PendingImage::default(),
        }
    }

    /// Форма редактирования: загружает пост и проверяет, что текущий
    /// пользователь его автор.
    pub async fn for_edit(
        session: Arc<S>,
        repo: Arc<R>,
        images: Arc<I>,
        options: BoardOptions,
        post_id: &str,
    ) -> BoardResult<Self> {
        let viewer = current_identity(session.as_ref(), &options)
            .await
            .ok_or(BoardError::Unauthorized)?;

        let original = bounded(options.request_timeout, repo.get_by_id(post_id))
            .await
            .map_err(BoardError::load_failed)?
            .ok_or_else(|| BoardError::NotFound(format!("post id: {post_id}")))?;

        if !is_owner(Some(&viewer), &original) {
            return Err(BoardError::Unauthorized);
        }

        Ok(Self {
            session,
            repo,
            images,
            options,
            image: PendingImage::with_committed(original.image_address.clone()),
            mode: ComposerMode::Edit { original },
        })
    }

    /// Режим формы.
    pub fn mode(&self) -> &ComposerMode {
        &self.mode
    }

    /// Текущее состояние выбора изображения.
    pub fn pending_image(&self) -> &PendingImage {
        &self.image
    }

    /// Превью изображения.
    pub fn preview(&self) -> ImagePreview {
        self.image.preview()
    }

    /// Выбирает файл изображения. Отклонённый файл сбрасывает выбор.
    pub fn select_image(&mut self, blob: ImageBlob) -> BoardResult<()> {
        self.image.select(blob)
    }

    /// Убирает изображение из формы.
    pub fn remove_image(&mut self) {
        self.image.remove();
    }

    /// Отправляет форму.
    ///
    /// При ошибке выбор изображения сохраняется, и отправку можно повторить.
    pub async fn submit(&mut self, form: PostForm) -> BoardResult<Post> {
        let form = form.validate()?;
        let identity = current_identity(self.session.as_ref(), &self.options)
            .await
            .ok_or(BoardError::Unauthorized)?;

        let post = match &self.mode {
            ComposerMode::Create => self.submit_create(&identity, form).await?,
            ComposerMode::Edit { original } => {
                if !is_owner(Some(&identity), original) {
                    return Err(BoardError::Unauthorized);
                }
                self.submit_edit(&identity, original, form).await?
            }
        };

        self.image.commit(post.image_address.clone());
        if let ComposerMode::Edit { original } = &mut self.mode {
            *original = post.clone();
        }
        Ok(post)
    }

    async fn submit_create(&self, identity: &Identity, form: PostForm) -> BoardResult<Post> {
        let image_address = match self.image.change() {
            ImageChange::Replace(blob) => Some(self.upload(identity, blob).await?),
            ImageChange::Keep | ImageChange::Remove => None,
        };

        let new_post = NewPost {
            title: form.title,
            content: form.content,
            image_address: image_address.clone(),
            owner_id: identity.id.clone(),
        };

        match bounded(self.options.request_timeout, self.repo.insert(new_post)).await {
            Ok(post) => {
                info!(post_id = %post.id, "post created");
                Ok(post)
            }
            Err(err) => {
                if let Some(address) = &image_address {
                    report_orphan(address, "insert");
                }
                Err(BoardError::submit_failed(err))
            }
        }
    }

    async fn submit_edit(
        &self,
        identity: &Identity,
        original: &Post,
        form: PostForm,
    ) -> BoardResult<Post> {
        let timeout = self.options.request_timeout;
        let prior = self.image.committed();

        let mut uploaded = None;
        let image_address = match self.image.change() {
            ImageChange::Keep => prior.map(str::to_string),
            ImageChange::Replace(blob) => {
                if let Some(prior) = prior {
                    discard_image(self.images.as_ref(), prior, timeout).await;
                }
                let address = self.upload(identity, blob).await?;
                uploaded = Some(address.clone());
                Some(address)
            }
            ImageChange::Remove => {
                if let Some(prior) = prior {
                    discard_image(self.images.as_ref(), prior, timeout).await;
                }
                None
            }
        };

        let patch = PostPatch {
            title: form.title,
            content: form.content,
            image_address,
            updated_at: Utc::now(),
        };

        let post = match bounded(timeout, self.repo.update(&original.id, patch)).await {
            Ok(post) => post,
            Err(err) => {
                if let Some(address) = &uploaded {
                    report_orphan(address, "update");
                }
                return Err(BoardError::submit_failed(err));
            }
        };

        info!(post_id = %post.id, "post updated");
        Ok(post)
    }

    async fn upload(&self, identity: &Identity, blob: &ImageBlob) -> BoardResult<String> {
        let key = generate_key(&identity.id, blob);
        bounded(self.options.request_timeout, self.images.upload(&key, blob))
            .await
            .map_err(BoardError::submit_failed)?;
        Ok(self.images.public_address(&key))
    }
}

fn report_orphan(address: &str, operation: &'static str) {
    warn!(address = %address, operation, "post write failed, uploaded image is orphaned");
}

async fn current_identity<S: SessionGateway + ?Sized>(
    session: &S,
    options: &BoardOptions,
) -> Option<Identity> {
    tokio::time::timeout(options.request_timeout, session.current_identity())
        .await
        .ok()
        .flatten()
}
