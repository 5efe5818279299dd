use std::time::{Duration, SystemTime, UNIX_EPOCH};

use board_client::{
    Board, BoardError, BoardOptions, ImageBlob, ImagePreview, InMemoryBackend, MemoryOp, PostForm,
    SignInRequest, SignUpRequest, SupabaseClient, SupabaseConfig, key_from_address,
};

fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock must be after unix epoch")
        .as_nanos();
    format!("{nanos}")
}

fn form(title: &str, content: &str) -> PostForm {
    PostForm {
        title: title.to_string(),
        content: content.to_string(),
    }
}

fn png(name: &str) -> ImageBlob {
    ImageBlob::new(name, "image/png", vec![0x89, b'P', b'N', b'G'])
}

#[tokio::test]
async fn in_memory_board_flow() {
    let board = Board::new(
        InMemoryBackend::new(),
        BoardOptions::new(2, Duration::from_millis(500)),
    );
    let auth = board.auth();
    let mut events = auth.subscribe();

    let session = auth
        .sign_up(SignUpRequest {
            email: " Author@Example.com ".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
        })
        .await
        .expect("sign up must succeed")
        .expect("in-memory sign up signs in immediately");
    assert_eq!(session.identity.email, "author@example.com");
    assert!(events.try_recv().is_ok());

    let mut composer = board.composer_for_create();
    composer.select_image(png("cover.png")).expect("valid image");
    let first = composer
        .submit(form("first notice", "body"))
        .await
        .expect("create must succeed");
    let key = first
        .image_address
        .as_deref()
        .and_then(key_from_address)
        .expect("image key");
    assert!(board.backend().has_blob(&key));

    for title in ["second notice", "third notice"] {
        board
            .composer_for_create()
            .submit(form(title, "body"))
            .await
            .expect("create must succeed");
    }

    let mut listing = board.listing();
    let page = listing.load_page("").await.expect("first page");
    assert_eq!(page.total_count, 3);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.rows[0].post.title, "third notice");
    assert_eq!(page.rows[0].rank, 3);
    let page = listing.next_page().await.expect("second page");
    assert_eq!(page.rows.len(), 1);
    assert_eq!(page.rows[0].rank, 1);

    let mut detail = board.detail();
    let view = detail.open(&first.id).await.expect("open");
    assert!(view.can_modify);
    assert_eq!(view.displayed_views, 1);

    let mut editor = board
        .composer_for_edit(&first.id)
        .await
        .expect("owner may edit");
    editor.remove_image();
    assert_eq!(editor.preview(), ImagePreview::None);
    let edited = editor
        .submit(form("first notice, edited", "body"))
        .await
        .expect("edit must succeed");
    assert!(edited.image_address.is_none());
    assert!(!board.backend().has_blob(&key));

    auth.sign_out().await.expect("sign out");
    assert!(auth.current_identity().await.is_none());
    let err = detail.remove(&first.id).await.expect_err("anonymous delete");
    assert!(matches!(err, BoardError::Unauthorized));

    auth.sign_in(SignInRequest {
        email: "author@example.com".to_string(),
        password: "secret1".to_string(),
    })
    .await
    .expect("sign in");
    detail.remove(&first.id).await.expect("owner delete");

    let page = listing.reload().await.expect("reload");
    assert_eq!(page.total_count, 2);
}

#[tokio::test]
async fn stalled_backend_surfaces_timeout() {
    let backend = InMemoryBackend::new();
    backend.stall(MemoryOp::Count);
    let board = Board::new(backend, BoardOptions::new(10, Duration::from_millis(50)));

    let err = board
        .listing()
        .load_page("")
        .await
        .expect_err("must time out");
    assert!(matches!(err, BoardError::RequestTimedOut));
}

#[tokio::test]
#[ignore = "requires Supabase project (SUPABASE_URL, SUPABASE_ANON_KEY) with auto-confirmed sign up"]
async fn supabase_smoke_flow() {
    let url = std::env::var("SUPABASE_URL").expect("SUPABASE_URL must be set");
    let anon_key = std::env::var("SUPABASE_ANON_KEY").expect("SUPABASE_ANON_KEY must be set");
    let client =
        SupabaseClient::new(SupabaseConfig::new(url, anon_key)).expect("client must build");
    let board = Board::new(client, BoardOptions::default());

    let suffix = unique_suffix();
    let email = format!("board_{suffix}@example.com");
    let password = "password123";

    board
        .auth()
        .sign_up(SignUpRequest {
            email: email.clone(),
            password: password.to_string(),
            confirm_password: password.to_string(),
        })
        .await
        .expect("sign up must succeed");
    board
        .auth()
        .sign_in(SignInRequest {
            email,
            password: password.to_string(),
        })
        .await
        .expect("sign in must succeed");

    let title = format!("smoke {suffix}");
    let mut composer = board.composer_for_create();
    composer.select_image(png("smoke.png")).expect("valid image");
    let created = composer
        .submit(form(&title, "smoke content"))
        .await
        .expect("create must succeed");

    let mut listing = board.listing();
    let page = listing.load_page(&suffix).await.expect("search must succeed");
    assert!(page.rows.iter().any(|row| row.post.id == created.id));

    let mut detail = board.detail();
    let view = detail.open(&created.id).await.expect("open must succeed");
    assert!(view.can_modify);

    let mut editor = board
        .composer_for_edit(&created.id)
        .await
        .expect("owner may edit");
    editor.remove_image();
    let edited = editor
        .submit(form(&format!("{title} edited"), "smoke content"))
        .await
        .expect("edit must succeed");
    assert!(edited.image_address.is_none());

    detail.remove(&created.id).await.expect("delete must succeed");
    let err = detail.open(&created.id).await.expect_err("post must be gone");
    assert!(matches!(err, BoardError::NotFound(_)));

    board.auth().sign_out().await.expect("sign out must succeed");
}
