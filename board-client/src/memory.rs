//! Бэкенд в памяти процесса: все три коллаборатора в одном типе.
//!
//! Используется в тестах и для локального прогона без платформы. Любую
//! операцию можно заставить упасть (`fail`), зависнуть (`stall`) или замедлиться (`slow`).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::backend::{ImageStore, PostRepository, SessionGateway};
use crate::error::{BackendError, BackendResult};
use crate::image::ImageBlob;
use crate::models::{
    AuthEvent, AuthEventKind, Identity, NewPost, Post, PostFilter, PostPatch, RangeWindow, Session,
};

const ADDRESS_BASE: &str = "https://memory.invalid/storage/v1/object/public";
const BUCKET: &str = "post-images";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Операции бэкенда, для которых можно внедрить сбой.
pub enum MemoryOp {
    /// `SessionGateway::sign_up`.
    SignUp,
    /// `SessionGateway::sign_in`.
    SignIn,
    /// `SessionGateway::sign_out`.
    SignOut,
    /// `PostRepository::count`.
    Count,
    /// `PostRepository::list`.
    List,
    /// `PostRepository::get_by_id`.
    Get,
    /// `PostRepository::insert`.
    Insert,
    /// `PostRepository::update`.
    Update,
    /// `PostRepository::delete`.
    Delete,
    /// `PostRepository::increment_views`.
    IncrementViews,
    /// `ImageStore::upload`.
    Upload,
    /// `ImageStore::remove`.
    Remove,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Fail,
    Stall,
    Delay(Duration),
}

struct StoredPost {
    seq: u64,
    post: Post,
}

struct Account {
    password: String,
    identity: Identity,
}

#[derive(Default)]
struct MemoryState {
    posts: Vec<StoredPost>,
    next_seq: u64,
    blobs: HashMap<String, ImageBlob>,
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    faults: HashMap<MemoryOp, Fault>,
    calls: Vec<MemoryOp>,
}

#[derive(Clone)]
/// Бэкенд доски в памяти.
pub struct InMemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Пустой бэкенд без пользователей и постов.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Все последующие вызовы `op` завершаются ошибкой.
    pub fn fail(&self, op: MemoryOp) {
        self.state().faults.insert(op, Fault::Fail);
    }

    /// Все последующие вызовы `op` никогда не завершаются.
    pub fn stall(&self, op: MemoryOp) {
        self.state().faults.insert(op, Fault::Stall);
    }

    /// Все последующие вызовы `op` выполняются с задержкой `latency`.
    pub fn slow(&self, op: MemoryOp, latency: Duration) {
        self.state().faults.insert(op, Fault::Delay(latency));
    }

    /// Снимает внедрённый сбой с `op`.
    pub fn recover(&self, op: MemoryOp) {
        self.state().faults.remove(&op);
    }

    /// Сколько раз была вызвана операция.
    pub fn calls_of(&self, op: MemoryOp) -> usize {
        self.state().calls.iter().filter(|call| **call == op).count()
    }

    /// Ключи всех хранимых изображений.
    pub fn blob_keys(&self) -> HashSet<String> {
        self.state().blobs.keys().cloned().collect()
    }

    /// Есть ли объект под ключом.
    pub fn has_blob(&self, key: &str) -> bool {
        self.state().blobs.contains_key(key)
    }

    /// Текущее сохранённое значение счётчика просмотров.
    pub fn stored_views(&self, id: &str) -> Option<u64> {
        self.state()
            .posts
            .iter()
            .find(|stored| stored.post.id == id)
            .map(|stored| stored.post.views)
    }

    /// Регистрирует (при необходимости) пользователя и делает его текущим.
    pub fn sign_in_as(&self, email: &str) -> Identity {
        let session = {
            let mut state = self.state();
            let identity = register_account(&mut state, email, "password");
            let session = issue_session(identity);
            state.session = Some(session.clone());
            session
        };
        let identity = session.identity.clone();
        self.notify(AuthEventKind::SignedIn, Some(session));
        identity
    }

    /// Добавляет пост в обход журнала вызовов и внедрённых сбоев.
    pub fn seed_post(&self, owner_id: &str, title: &str) -> Post {
        let mut state = self.state();
        insert_post(
            &mut state,
            NewPost {
                title: title.to_string(),
                content: format!("{title} content"),
                image_address: None,
                owner_id: owner_id.to_string(),
            },
        )
    }

    fn notify(&self, kind: AuthEventKind, session: Option<Session>) {
        // Ошибка означает лишь отсутствие подписчиков.
        let _ = self.events.send(AuthEvent { kind, session });
    }

    async fn enter(&self, op: MemoryOp) -> BackendResult<()> {
        let fault = {
            let mut state = self.state();
            state.calls.push(op);
            state.faults.get(&op).copied()
        };

        match fault {
            None => Ok(()),
            Some(Fault::Fail) => Err(BackendError::Unavailable(format!("{op:?} failed"))),
            Some(Fault::Stall) => std::future::pending().await,
            Some(Fault::Delay(latency)) => {
                tokio::time::sleep(latency).await;
                Ok(())
            }
        }
    }
}

fn register_account(state: &mut MemoryState, email: &str, password: &str) -> Identity {
    let next_id = state.accounts.len() + 1;
    state
        .accounts
        .entry(email.to_string())
        .or_insert_with(|| Account {
            password: password.to_string(),
            identity: Identity {
                id: format!("user-{next_id}"),
                email: email.to_string(),
            },
        })
        .identity
        .clone()
}

fn issue_session(identity: Identity) -> Session {
    Session {
        access_token: format!("token-{}", identity.id),
        refresh_token: None,
        expires_at: None,
        identity,
    }
}

fn insert_post(state: &mut MemoryState, input: NewPost) -> Post {
    state.next_seq += 1;
    let seq = state.next_seq;
    let post = Post {
        id: seq.to_string(),
        title: input.title,
        content: input.content,
        owner_id: input.owner_id,
        image_address: input.image_address,
        views: 0,
        created_at: Utc::now(),
        updated_at: None,
    };
    state.posts.push(StoredPost {
        seq,
        post: post.clone(),
    });
    post
}

fn newest_first<'a>(state: &'a MemoryState, filter: &PostFilter) -> Vec<&'a StoredPost> {
    let mut rows: Vec<&StoredPost> = state
        .posts
        .iter()
        .filter(|stored| filter.matches(&stored.post.title))
        .collect();
    // Порядок вставки совпадает с порядком created_at и не зависит от точности часов.
    rows.sort_by(|a, b| b.seq.cmp(&a.seq));
    rows
}

#[async_trait]
impl SessionGateway for InMemoryBackend {
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Option<Session>> {
        self.enter(MemoryOp::SignUp).await?;
        let session = {
            let mut state = self.state();
            if state.accounts.contains_key(email) {
                return Err(BackendError::Status {
                    status: 422,
                    message: "user already registered".to_string(),
                });
            }
            let identity = register_account(&mut state, email, password);
            let session = issue_session(identity);
            state.session = Some(session.clone());
            session
        };
        self.notify(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        self.enter(MemoryOp::SignIn).await?;
        let session = {
            let mut state = self.state();
            let identity = match state.accounts.get(email) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => {
                    return Err(BackendError::Status {
                        status: 400,
                        message: "invalid login credentials".to_string(),
                    });
                }
            };
            let session = issue_session(identity);
            state.session = Some(session.clone());
            session
        };
        self.notify(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.enter(MemoryOp::SignOut).await?;
        self.state().session = None;
        self.notify(AuthEventKind::SignedOut, None);
        Ok(())
    }

    async fn current_identity(&self) -> Option<Identity> {
        self.state()
            .session
            .as_ref()
            .map(|session| session.identity.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl PostRepository for InMemoryBackend {
    async fn count(&self, filter: &PostFilter) -> BackendResult<u64> {
        self.enter(MemoryOp::Count).await?;
        let state = self.state();
        Ok(newest_first(&state, filter).len() as u64)
    }

    async fn list(&self, filter: &PostFilter, window: RangeWindow) -> BackendResult<Vec<Post>> {
        self.enter(MemoryOp::List).await?;
        let state = self.state();
        Ok(newest_first(&state, filter)
            .into_iter()
            .skip(window.offset as usize)
            .take(window.limit as usize)
            .map(|stored| stored.post.clone())
            .collect())
    }

    async fn get_by_id(&self, id: &str) -> BackendResult<Option<Post>> {
        self.enter(MemoryOp::Get).await?;
        Ok(self
            .state()
            .posts
            .iter()
            .find(|stored| stored.post.id == id)
            .map(|stored| stored.post.clone()))
    }

    async fn insert(&self, input: NewPost) -> BackendResult<Post> {
        self.enter(MemoryOp::Insert).await?;
        Ok(insert_post(&mut self.state(), input))
    }

    async fn update(&self, id: &str, patch: PostPatch) -> BackendResult<Post> {
        self.enter(MemoryOp::Update).await?;
        let mut state = self.state();
        let stored = state
            .posts
            .iter_mut()
            .find(|stored| stored.post.id == id)
            .ok_or(BackendError::NotFound)?;

        stored.post.title = patch.title;
        stored.post.content = patch.content;
        stored.post.image_address = patch.image_address;
        stored.post.updated_at = Some(patch.updated_at);
        Ok(stored.post.clone())
    }

    async fn delete(&self, id: &str) -> BackendResult<()> {
        self.enter(MemoryOp::Delete).await?;
        self.state().posts.retain(|stored| stored.post.id != id);
        Ok(())
    }

    async fn increment_views(&self, id: &str) -> BackendResult<()> {
        self.enter(MemoryOp::IncrementViews).await?;
        if let Some(stored) = self
            .state()
            .posts
            .iter_mut()
            .find(|stored| stored.post.id == id)
        {
            stored.post.views += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl ImageStore for InMemoryBackend {
    async fn upload(&self, key: &str, blob: &ImageBlob) -> BackendResult<()> {
        self.enter(MemoryOp::Upload).await?;
        let mut state = self.state();
        if state.blobs.contains_key(key) {
            return Err(BackendError::Status {
                status: 409,
                message: "the resource already exists".to_string(),
            });
        }
        state.blobs.insert(key.to_string(), blob.clone());
        Ok(())
    }

    fn public_address(&self, key: &str) -> String {
        format!("{ADDRESS_BASE}/{BUCKET}/{key}")
    }

    async fn remove(&self, key: &str) -> BackendResult<()> {
        self.enter(MemoryOp::Remove).await?;
        self.state().blobs.remove(key);
        Ok(())
    }
}
