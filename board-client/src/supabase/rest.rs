use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use reqwest::header::{CONTENT_RANGE, HeaderMap};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::SupabaseClient;
use crate::backend::PostRepository;
use crate::error::{BackendError, BackendResult};
use crate::models::{NewPost, Post, PostFilter, PostPatch, RangeWindow};

#[derive(Debug, Deserialize)]
struct PostDto {
    #[serde(deserialize_with = "opaque_id")]
    id: String,
    title: String,
    content: String,
    #[serde(deserialize_with = "opaque_id")]
    user_id: String,
    image_url: Option<String>,
    views: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct InsertPostDto<'a> {
    title: &'a str,
    content: &'a str,
    image_url: Option<&'a str>,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdatePostDto<'a> {
    title: &'a str,
    content: &'a str,
    image_url: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct IncrementViewsDto<'a> {
    post_id: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(i64),
}

/// Идентификаторы платформы бывают и строками (uuid), и числами (bigint).
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Text(value) => value,
        IdRepr::Number(value) => value.to_string(),
    })
}

impl From<PostDto> for Post {
    fn from(value: PostDto) -> Self {
        Self {
            id: value.id,
            title: value.title,
            content: value.content,
            owner_id: value.user_id,
            image_address: value.image_url,
            views: value.views.unwrap_or(0).max(0) as u64,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

/// Регулярное выражение PostgREST `imatch` (`~*`) для поиска подстроки.
///
/// В `ilike` PostgREST превращает любой `*` в `%`, поэтому буквальную
/// звёздочку там не выразить. В регулярном выражении экранируется всё,
/// кроме букв, цифр и пробелов.
fn title_pattern(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len() * 2);
    for ch in keyword.chars() {
        if !ch.is_alphanumeric() && !ch.is_whitespace() {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    format!("imatch.{escaped}")
}

fn filter_params(filter: &PostFilter) -> Vec<(&'static str, String)> {
    filter
        .title_contains
        .as_deref()
        .map(|keyword| ("title", title_pattern(keyword)))
        .into_iter()
        .collect()
}

/// Итог из `Content-Range: 0-9/42` или `*/0`.
fn parse_total(headers: &HeaderMap) -> BackendResult<u64> {
    let raw = headers
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| BackendError::Decode("missing content-range header".to_string()))?;

    raw.rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse::<u64>().ok())
        .ok_or_else(|| BackendError::Decode(format!("invalid content-range: {raw}")))
}

fn eq(id: &str) -> String {
    format!("eq.{id}")
}

impl SupabaseClient {
    fn table_path(&self) -> String {
        format!("/rest/v1/{}", self.config.posts_table)
    }

    async fn fetch_rows(&self, request: reqwest::RequestBuilder) -> BackendResult<Vec<Post>> {
        let rows = Self::send(request)
            .await?
            .json::<Vec<PostDto>>()
            .await
            .map_err(BackendError::from_reqwest)?;
        Ok(rows.into_iter().map(Post::from).collect())
    }
}

#[async_trait]
impl PostRepository for SupabaseClient {
    async fn count(&self, filter: &PostFilter) -> BackendResult<u64> {
        let request = self
            .request(Method::HEAD, &self.table_path())
            .header("Prefer", "count=exact")
            .query(&[("select", "id")])
            .query(&filter_params(filter));

        let response = Self::send(request).await?;
        let total = parse_total(response.headers())?;
        debug!(total, "posts counted");
        Ok(total)
    }

    async fn list(&self, filter: &PostFilter, window: RangeWindow) -> BackendResult<Vec<Post>> {
        let request = self
            .request(Method::GET, &self.table_path())
            .query(&[("select", "*"), ("order", "created_at.desc,id.desc")])
            .query(&filter_params(filter))
            .query(&[("offset", window.offset), ("limit", window.limit)]);

        self.fetch_rows(request).await
    }

    async fn get_by_id(&self, id: &str) -> BackendResult<Option<Post>> {
        let request = self
            .request(Method::GET, &self.table_path())
            .query(&[("select", "*".to_string()), ("id", eq(id))]);

        Ok(self.fetch_rows(request).await?.into_iter().next())
    }

    async fn insert(&self, input: NewPost) -> BackendResult<Post> {
        let payload = InsertPostDto {
            title: &input.title,
            content: &input.content,
            image_url: input.image_address.as_deref(),
            user_id: &input.owner_id,
        };
        let request = self
            .request(Method::POST, &self.table_path())
            .header("Prefer", "return=representation")
            .json(&payload);

        self.fetch_rows(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("insert returned no rows".to_string()))
    }

    async fn update(&self, id: &str, patch: PostPatch) -> BackendResult<Post> {
        let payload = UpdatePostDto {
            title: &patch.title,
            content: &patch.content,
            image_url: patch.image_address.as_deref(),
            updated_at: patch.updated_at,
        };
        let request = self
            .request(Method::PATCH, &self.table_path())
            .header("Prefer", "return=representation")
            .query(&[("id", eq(id))])
            .json(&payload);

        // Строки, скрытые политиками доступа, выглядят как отсутствующие.
        self.fetch_rows(request)
            .await?
            .into_iter()
            .next()
            .ok_or(BackendError::NotFound)
    }

    async fn delete(&self, id: &str) -> BackendResult<()> {
        let request = self
            .request(Method::DELETE, &self.table_path())
            .query(&[("id", eq(id))]);

        Self::send(request).await?;
        Ok(())
    }

    async fn increment_views(&self, id: &str) -> BackendResult<()> {
        let request = self
            .request(Method::POST, "/rest/v1/rpc/increment_views")
            .json(&IncrementViewsDto { post_id: id });

        Self::send(request).await?;
        Ok(())
    }
}
