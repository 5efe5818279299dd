use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use board_client::{
    AuthEvent, AuthEventKind, BackendError, Board, BoardError, ComposerMode, Identity, ImageBlob,
    ListingPage, Post, PostForm, PostView, Session, SignInRequest, SignUpRequest, SupabaseClient,
    media_type_for_file_name,
};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::debug;

mod logging;
mod settings;

use logging::init_logging;
use settings::Settings;

const SESSION_FILE: &str = ".board_session";

#[derive(Debug, Parser)]
#[command(name = "board-cli", version, about = "CLI клиент доски объявлений")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Регистрация пользователя.
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Повтор пароля.
        #[arg(long)]
        confirm: String,
    },
    /// Вход пользователя.
    Signin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Выход.
    Signout,
    /// Текущий пользователь.
    Whoami,
    /// Список постов, новые первыми.
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Поиск по подстроке заголовка без учёта регистра.
        #[arg(long)]
        search: Option<String>,
    },
    /// Просмотр поста (увеличивает счётчик просмотров).
    Show {
        #[arg(long)]
        id: String,
    },
    /// Создание поста (требует вход).
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        /// Путь к файлу изображения.
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Редактирование своего поста.
    ///
    /// Не указанные `--title` и `--content` остаются прежними.
    Edit {
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        /// Заменить изображение файлом.
        #[arg(long, conflicts_with = "remove_image")]
        image: Option<PathBuf>,
        /// Убрать изображение из поста.
        #[arg(long)]
        remove_image: bool,
    },
    /// Удаление своего поста вместе с изображением.
    Delete {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Ошибка: {err}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let settings = Settings::from_env()?;
    init_logging(&settings.log_level)?;

    let client = SupabaseClient::new(settings.supabase_config())
        .context("не удалось создать HTTP-клиент")?;
    if let Some(session) = load_session().context("не удалось прочитать .board_session")? {
        client.restore_session(session);
    }

    let board = Board::new(client, settings.board_options());
    let mut events = board.auth().subscribe();

    let outcome = execute(&board, cli.command).await;

    // Сессия сохраняется и при ошибке команды: выход мог завершиться локально.
    persist_session_events(&mut events).context("не удалось сохранить сессию")?;
    outcome
}

async fn execute(board: &Board<SupabaseClient>, command: Command) -> Result<()> {
    match command {
        Command::Signup {
            email,
            password,
            confirm,
        } => {
            let session = board
                .auth()
                .sign_up(SignUpRequest {
                    email,
                    password,
                    confirm_password: confirm,
                })
                .await
                .map_err(map_board_error)?;
            match session {
                Some(session) => print_identity("Регистрация успешна", &session.identity),
                None => println!("Регистрация принята: подтвердите email по ссылке из письма"),
            }
        }
        Command::Signin { email, password } => {
            let session = board
                .auth()
                .sign_in(SignInRequest { email, password })
                .await
                .map_err(map_board_error)?;
            print_identity("Вход выполнен", &session.identity);
        }
        Command::Signout => {
            board.auth().sign_out().await.map_err(map_board_error)?;
            println!("Выход выполнен");
        }
        Command::Whoami => match board.auth().current_identity().await {
            Some(identity) => print_identity("Текущий пользователь", &identity),
            None => println!("Вход не выполнен"),
        },
        Command::List { page, search } => {
            let mut listing = board.listing();
            let mut result = listing
                .load_page(search.as_deref().unwrap_or_default())
                .await
                .map_err(map_board_error)?;
            if page != result.page {
                result = listing.go_to_page(page).await.map_err(map_board_error)?;
            }
            print_page(&result);
        }
        Command::Show { id } => {
            let mut detail = board.detail();
            let view = detail.open(&id).await.map_err(map_board_error)?;
            print_view(&view);
            // Иначе завершение runtime отменит увеличение счётчика.
            detail.settle().await;
        }
        Command::Create {
            title,
            content,
            image,
        } => {
            let mut composer = board.composer_for_create();
            if let Some(path) = image {
                composer
                    .select_image(read_image(&path)?)
                    .map_err(map_board_error)?;
            }
            let post = composer
                .submit(PostForm { title, content })
                .await
                .map_err(map_board_error)?;
            print_post("Пост создан", &post);
        }
        Command::Edit {
            id,
            title,
            content,
            image,
            remove_image,
        } => {
            let mut composer = board
                .composer_for_edit(&id)
                .await
                .map_err(map_board_error)?;
            let original = match composer.mode() {
                ComposerMode::Edit { original } => Some(original),
                ComposerMode::Create => None,
            };
            let form = merge_form(original, title, content);

            if let Some(path) = image {
                composer
                    .select_image(read_image(&path)?)
                    .map_err(map_board_error)?;
            } else if remove_image {
                composer.remove_image();
            }

            let post = composer.submit(form).await.map_err(map_board_error)?;
            print_post("Пост обновлён", &post);
        }
        Command::Delete { id } => {
            board.detail().remove(&id).await.map_err(map_board_error)?;
            println!("Пост удалён: id={id}");
        }
    }

    Ok(())
}

/// Незаданные поля берутся из текущей версии поста.
fn merge_form(original: Option<&Post>, title: Option<String>, content: Option<String>) -> PostForm {
    PostForm {
        title: title
            .or_else(|| original.map(|post| post.title.clone()))
            .unwrap_or_default(),
        content: content
            .or_else(|| original.map(|post| post.content.clone()))
            .unwrap_or_default(),
    }
}

fn read_image(path: &Path) -> Result<ImageBlob> {
    let bytes =
        fs::read(path).with_context(|| format!("не удалось прочитать {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let media_type = media_type_for_file_name(&file_name);

    Ok(ImageBlob::new(file_name, media_type, bytes))
}

fn parse_session_content(raw: &str) -> Option<Session> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(session) => Some(session),
        Err(err) => {
            debug!(error = %err, "ignoring unreadable session file");
            None
        }
    }
}

fn load_session() -> io::Result<Option<Session>> {
    if !Path::new(SESSION_FILE).exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(SESSION_FILE)?;
    Ok(parse_session_content(&raw))
}

/// Применяет к файлу сессии все события, накопленные за команду.
fn persist_session_events(events: &mut broadcast::Receiver<AuthEvent>) -> io::Result<()> {
    loop {
        match events.try_recv() {
            Ok(event) => apply_session_event(Path::new(SESSION_FILE), &event)?,
            Err(TryRecvError::Lagged(skipped)) => {
                debug!(skipped, "auth events lagged");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(()),
        }
    }
}

fn apply_session_event(path: &Path, event: &AuthEvent) -> io::Result<()> {
    match (event.kind, &event.session) {
        (AuthEventKind::SignedIn, Some(session)) => {
            let raw = serde_json::to_string_pretty(session).map_err(io::Error::other)?;
            fs::write(path, raw)
        }
        _ => match fs::remove_file(path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        },
    }
}

fn map_board_error(err: BoardError) -> anyhow::Error {
    let message = match err {
        BoardError::Validation { field, message } => {
            format!("некорректное поле '{field}': {message}")
        }
        BoardError::ImageTooLarge { size, limit } => {
            format!("изображение слишком большое: {size} байт (максимум {limit})")
        }
        BoardError::ImageWrongType { media_type } => {
            format!("файл не является изображением: {media_type}")
        }
        BoardError::NotFound(what) => format!("не найдено: {what}"),
        BoardError::Unauthorized => {
            "нет доступа: выполните `board-cli signin ...` или работайте со своими постами"
                .to_string()
        }
        BoardError::PageOutOfRange { page, total_pages } => {
            format!("страницы {page} нет, всего страниц: {total_pages}")
        }
        BoardError::RequestTimedOut => "сервер не ответил вовремя".to_string(),
        BoardError::AuthFailed(err) => format!("ошибка аутентификации: {}", describe_backend(&err)),
        BoardError::LoadFailed(err) => format!("не удалось загрузить: {}", describe_backend(&err)),
        BoardError::SubmitFailed(err) => {
            format!("не удалось сохранить: {}", describe_backend(&err))
        }
        BoardError::BestEffortCleanupFailed(err) => {
            format!("не удалось удалить изображение: {}", describe_backend(&err))
        }
    };
    anyhow::anyhow!(message)
}

fn describe_backend(err: &BackendError) -> String {
    match err {
        BackendError::Http(err) => format!("ошибка HTTP: {err}"),
        BackendError::Status { status, message } => format!("{message} (status={status})"),
        BackendError::Decode(message) => format!("некорректный ответ сервера: {message}"),
        BackendError::Unauthorized => "доступ запрещён".to_string(),
        BackendError::NotFound => "ресурс не найден".to_string(),
        BackendError::TimedOut => "таймаут".to_string(),
        BackendError::Unavailable(message) => format!("сервис недоступен: {message}"),
    }
}

fn print_identity(title: &str, identity: &Identity) {
    println!("{title}");
    println!("id: {}", identity.id);
    println!("email: {}", identity.email);
}

fn print_post(title: &str, post: &Post) {
    println!("{title}");
    println!("id: {}", post.id);
    println!("title: {}", post.title);
    println!("content: {}", post.content);
    println!("owner_id: {}", post.owner_id);
    if let Some(address) = &post.image_address {
        println!("image: {address}");
    }
    println!("views: {}", post.views);
    println!("created_at: {}", post.created_at);
    if let Some(updated_at) = post.updated_at {
        println!("updated_at: {updated_at}");
    }
}

fn print_view(view: &PostView) {
    print_post("Пост", &view.post);
    println!("просмотров: {}", view.displayed_views);
    if view.can_modify {
        println!("доступно: edit, delete");
    }
}

fn print_page(page: &ListingPage) {
    let filter = if page.keyword.is_empty() {
        String::new()
    } else {
        format!(", поиск \"{}\"", page.keyword)
    };
    println!(
        "Страница {}/{} (постов: {}{filter})",
        page.page, page.total_pages, page.total_count
    );

    for line in page_lines(page) {
        println!("{line}");
    }
}

fn page_lines(page: &ListingPage) -> Vec<String> {
    if page.rows.is_empty() {
        return vec!["Постов нет".to_string()];
    }

    page.rows
        .iter()
        .map(|row| {
            format!(
                "{:>4}. [{}] {} (просмотров: {})",
                row.rank, row.post.id, row.post.title, row.post.views
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn post() -> Post {
        Post {
            id: "7".to_string(),
            title: "old title".to_string(),
            content: "old content".to_string(),
            owner_id: "u".to_string(),
            image_address: None,
            views: 0,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn session() -> Session {
        Session {
            access_token: "jwt".to_string(),
            refresh_token: Some("r".to_string()),
            expires_at: None,
            identity: Identity {
                id: "u".to_string(),
                email: "u@example.com".to_string(),
            },
        }
    }

    #[test]
    fn merge_form_keeps_unspecified_fields() {
        let form = merge_form(Some(&post()), Some("new title".to_string()), None);
        assert_eq!(form.title, "new title");
        assert_eq!(form.content, "old content");
    }

    #[test]
    fn parse_session_content_rejects_blank_and_garbage() {
        assert!(parse_session_content("   ").is_none());
        assert!(parse_session_content("not json").is_none());
    }

    #[test]
    fn session_file_round_trip_through_events() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(SESSION_FILE);
        let signed_in = AuthEvent {
            kind: AuthEventKind::SignedIn,
            session: Some(session()),
        };
        apply_session_event(&path, &signed_in).expect("write session");

        let raw = fs::read_to_string(&path).expect("session file exists");
        let restored = parse_session_content(&raw).expect("session parses");
        assert_eq!(restored.access_token, "jwt");
        assert_eq!(restored.identity, session().identity);

        let signed_out = AuthEvent {
            kind: AuthEventKind::SignedOut,
            session: None,
        };
        apply_session_event(&path, &signed_out).expect("remove session");
        assert!(!path.exists());
        apply_session_event(&path, &signed_out).expect("missing file is fine");
    }

    #[test]
    fn read_image_infers_media_type() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("image.png");
        fs::write(&path, [1u8, 2, 3]).expect("write image");

        let blob = read_image(&path).expect("read image");
        assert_eq!(blob.file_name, "image.png");
        assert_eq!(blob.media_type, "image/png");
        assert_eq!(blob.size(), 3);
    }

    #[test]
    fn cli_rejects_image_with_remove_image() {
        let parsed = Cli::try_parse_from([
            "board-cli",
            "edit",
            "--id",
            "1",
            "--image",
            "a.png",
            "--remove-image",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn empty_page_says_no_posts() {
        let page = ListingPage {
            rows: Vec::new(),
            page: 1,
            total_pages: 1,
            total_count: 0,
            keyword: "abc".to_string(),
            has_prev: false,
            has_next: false,
        };
        assert_eq!(page_lines(&page), vec!["Постов нет".to_string()]);
    }

    #[test]
    fn page_lines_show_rank_and_views() {
        let page = ListingPage {
            rows: vec![board_client::ListingRow {
                rank: 12,
                post: post(),
            }],
            page: 1,
            total_pages: 2,
            total_count: 12,
            keyword: String::new(),
            has_prev: false,
            has_next: true,
        };
        assert_eq!(page_lines(&page), vec!["  12. [7] old title (просмотров: 0)".to_string()]);
    }

    #[test]
    fn map_board_error_mentions_page_range() {
        let err = map_board_error(BoardError::PageOutOfRange {
            page: 9,
            total_pages: 2,
        });
        assert_eq!(err.to_string(), "страницы 9 нет, всего страниц: 2");
    }
}
