use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distr::{Alphanumeric, SampleString};
use reqwest::Url;
use tracing::warn;

use crate::backend::ImageStore;
use crate::error::BoardError;
use crate::options::bounded;

/// Максимальный размер изображения: 5 MiB.
pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

const RANDOM_SUFFIX_LEN: usize = 6;

#[derive(Clone, PartialEq, Eq)]
/// Файл изображения, выбранный пользователем.
pub struct ImageBlob {
    /// Исходное имя файла (нужно для расширения ключа).
    pub file_name: String,
    /// Media type, например `image/png`.
    pub media_type: String,
    /// Содержимое файла.
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBlob")
            .field("file_name", &self.file_name)
            .field("media_type", &self.media_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl ImageBlob {
    /// Создаёт blob из имени файла, media type и содержимого.
    pub fn new(
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Размер в байтах.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Проверяет ограничения на размер и тип до любой загрузки.
    pub fn validate(&self) -> Result<(), BoardError> {
        if self.size() > MAX_IMAGE_BYTES {
            return Err(BoardError::ImageTooLarge {
                size: self.size(),
                limit: MAX_IMAGE_BYTES,
            });
        }
        if !self.media_type.trim().to_ascii_lowercase().starts_with("image/") {
            return Err(BoardError::ImageWrongType {
                media_type: self.media_type.clone(),
            });
        }
        Ok(())
    }

    /// Расширение для ключа: из имени файла, иначе из подтипа media type.
    fn extension(&self) -> String {
        let from_name = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| sanitize_extension(ext))
            .filter(|ext| !ext.is_empty());

        from_name.unwrap_or_else(|| {
            let subtype = self
                .media_type
                .split_once('/')
                .map(|(_, subtype)| subtype)
                .unwrap_or_default();
            let subtype = subtype.split(['+', ';']).next().unwrap_or_default();
            let ext = sanitize_extension(subtype);
            if ext.is_empty() { "bin".to_string() } else { ext }
        })
    }
}

fn sanitize_extension(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Генерирует ключ хранилища `{owner}_{millis}_{random}.{ext}`.
pub fn generate_key(owner_id: &str, blob: &ImageBlob) -> String {
    let suffix = Alphanumeric
        .sample_string(&mut rand::rng(), RANDOM_SUFFIX_LEN)
        .to_ascii_lowercase();
    derive_key(owner_id, Utc::now(), &suffix, blob)
}

pub(crate) fn derive_key(
    owner_id: &str,
    now: DateTime<Utc>,
    suffix: &str,
    blob: &ImageBlob,
) -> String {
    format!(
        "{owner_id}_{}_{suffix}.{}",
        now.timestamp_millis(),
        blob.extension()
    )
}

/// Восстанавливает ключ из публичного адреса: последний сегмент пути.
pub fn key_from_address(address: &str) -> Option<String> {
    if let Ok(url) = Url::parse(address) {
        return url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
            .map(str::to_string);
    }

    address
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').find(|segment| !segment.is_empty()))
        .map(str::to_string)
}

/// Удаляет объект по ранее выданному адресу. Сбой только логируется.
pub(crate) async fn discard_image<I: ImageStore + ?Sized>(
    images: &I,
    address: &str,
    timeout: Duration,
) {
    let Some(key) = key_from_address(address) else {
        warn!(address = %address, "cannot derive image key from address, skipping removal");
        return;
    };

    if let Err(err) = bounded(timeout, images.remove(&key)).await {
        let err = BoardError::BestEffortCleanupFailed(err);
        warn!(key = %key, error = %err, "image removal failed");
    }
}

/// Угадывает media type по расширению файла.
pub fn media_type_for_file_name(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
