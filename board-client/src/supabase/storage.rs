use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::debug;

use super::SupabaseClient;
use crate::backend::ImageStore;
use crate::error::BackendResult;
use crate::image::ImageBlob;

#[derive(Debug, Serialize)]
struct RemoveObjectsDto<'a> {
    prefixes: [&'a str; 1],
}

impl SupabaseClient {
    fn object_path(&self, key: &str) -> String {
        format!("/storage/v1/object/{}/{key}", self.config.image_bucket)
    }

    fn public_object_address(&self, key: &str) -> String {
        self.endpoint(&format!(
            "/storage/v1/object/public/{}/{key}",
            self.config.image_bucket
        ))
    }
}

#[async_trait]
impl ImageStore for SupabaseClient {
    async fn upload(&self, key: &str, blob: &ImageBlob) -> BackendResult<()> {
        let request = self
            .request(Method::POST, &self.object_path(key))
            .header(CONTENT_TYPE, &blob.media_type)
            .header("x-upsert", "false")
            .body(blob.bytes.clone());

        Self::send(request).await?;
        debug!(key, size = blob.size(), "image uploaded");
        Ok(())
    }

    fn public_address(&self, key: &str) -> String {
        self.public_object_address(key)
    }

    async fn remove(&self, key: &str) -> BackendResult<()> {
        let request = self
            .request(
                Method::DELETE,
                &format!("/storage/v1/object/{}", self.config.image_bucket),
            )
            .json(&RemoveObjectsDto { prefixes: [key] });

        Self::send(request).await?;
        debug!(key, "image removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_bytes, body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::BackendError;
    use crate::image::key_from_address;
    use crate::supabase::{SupabaseConfig, client_for};

    fn client() -> SupabaseClient {
        SupabaseClient::new(SupabaseConfig::new("https://xyz.supabase.co/", "anon"))
            .expect("client must build")
    }

    #[test]
    fn public_address_points_at_public_bucket() {
        let address = client().public_address("u1_1700000000000_abc123.png");
        assert_eq!(
            address,
            "https://xyz.supabase.co/storage/v1/object/public/post-images/u1_1700000000000_abc123.png"
        );
        assert_eq!(
            key_from_address(&address).as_deref(),
            Some("u1_1700000000000_abc123.png")
        );
    }

    #[test]
    fn object_path_uses_configured_bucket() {
        let mut config = SupabaseConfig::new("https://xyz.supabase.co", "anon");
        config.image_bucket = "covers".to_string();
        let client = SupabaseClient::new(config).expect("client must build");
        assert_eq!(client.object_path("k.jpg"), "/storage/v1/object/covers/k.jpg");
    }

    #[test]
    fn remove_payload_lists_single_prefix() {
        let value = serde_json::to_value(RemoveObjectsDto { prefixes: ["k.png"] })
            .expect("serializable");
        assert_eq!(value, serde_json::json!({ "prefixes": ["k.png"] }));
    }

    #[tokio::test]
    async fn upload_posts_raw_bytes_without_upsert() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/post-images/k.png"))
            .and(header("Content-Type", "image/png"))
            .and(header("x-upsert", "false"))
            .and(body_bytes(vec![1u8, 2, 3]))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Key": "post-images/k.png" })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server.uri())
            .upload("k.png", &ImageBlob::new("k.png", "image/png", vec![1, 2, 3]))
            .await
            .expect("upload must succeed");
    }

    #[tokio::test]
    async fn upload_conflict_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/post-images/k.png"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({ "message": "The resource already exists" })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server.uri())
            .upload("k.png", &ImageBlob::new("k.png", "image/png", vec![1]))
            .await
            .expect_err("duplicate key must fail");
        match err {
            BackendError::Status { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "The resource already exists");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn remove_deletes_by_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/object/post-images"))
            .and(body_json(json!({ "prefixes": ["k.png"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server.uri())
            .remove("k.png")
            .await
            .expect("remove must succeed");
    }
}
