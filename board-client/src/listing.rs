use std::sync::Arc;

use tracing::debug;

use crate::backend::PostRepository;
use crate::error::{BoardError, BoardResult};
use crate::models::{Post, PostFilter, RangeWindow};
use crate::options::{BoardOptions, bounded};

/// Число страниц: `max(1, ceil(total_count / page_size))`.
pub fn total_pages(total_count: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    let pages = total_count.div_ceil(page_size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Отображаемый номер строки: самый новый пост получает наибольший номер.
pub fn row_rank(total_count: u64, offset: u64, index: usize) -> i64 {
    total_count as i64 - offset as i64 - index as i64
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Состояние пагинации одного списка.
pub struct ListingState {
    /// Текущая страница, начиная с 1.
    pub page: u32,
    /// Размер страницы.
    pub page_size: u32,
    /// Сколько постов подходит под фильтр.
    pub total_count: u64,
    /// Активное ключевое слово; пустое означает отсутствие фильтра.
    pub keyword: String,
}

impl ListingState {
    fn new(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size,
            total_count: 0,
            keyword: String::new(),
        }
    }

    /// Число страниц для текущего `total_count`.
    pub fn total_pages(&self) -> u32 {
        total_pages(self.total_count, self.page_size)
    }
}

#[derive(Debug, Clone)]
/// Строка списка с отображаемым номером.
pub struct ListingRow {
    /// Номер строки.
    pub rank: i64,
    /// Пост.
    pub post: Post,
}

#[derive(Debug, Clone)]
/// Одна загруженная страница.
pub struct ListingPage {
    /// Строки страницы, новые первыми.
    pub rows: Vec<ListingRow>,
    /// Номер страницы.
    pub page: u32,
    /// Всего страниц.
    pub total_pages: u32,
    /// Всего постов под фильтром.
    pub total_count: u64,
    /// Активное ключевое слово.
    pub keyword: String,
    /// Доступна ли предыдущая страница.
    pub has_prev: bool,
    /// Доступна ли следующая страница.
    pub has_next: bool,
}

/// Постраничный список постов с поиском по заголовку.
pub struct ListingController<R: PostRepository> {
    repo: Arc<R>,
    options: BoardOptions,
    state: ListingState,
}

impl<R: PostRepository> ListingController<R> {
    /// Создаёт контроллер на первой странице без фильтра.
    pub fn new(repo: Arc<R>, options: BoardOptions) -> Self {
        Self {
            repo,
            options,
            state: ListingState::new(options.page_size),
        }
    }

    /// Текущее состояние пагинации.
    pub fn state(&self) -> &ListingState {
        &self.state
    }

    /// Загружает страницу для ключевого слова.
    ///
    /// Новое ключевое слово сбрасывает пагинацию на первую страницу.
    pub async fn load_page(&mut self, keyword: &str) -> BoardResult<ListingPage> {
        let keyword = keyword.trim();
        let page = if keyword == self.state.keyword {
            self.state.page
        } else {
            1
        };
        self.fetch(keyword.to_string(), page).await
    }

    /// Переходит на страницу `page`; вне `[1, total_pages]` запрос отклоняется.
    pub async fn go_to_page(&mut self, page: u32) -> BoardResult<ListingPage> {
        let total_pages = self.state.total_pages();
        if page < 1 || page > total_pages {
            return Err(BoardError::PageOutOfRange { page, total_pages });
        }
        self.fetch(self.state.keyword.clone(), page).await
    }

    /// Следующая страница.
    pub async fn next_page(&mut self) -> BoardResult<ListingPage> {
        self.go_to_page(self.state.page.saturating_add(1)).await
    }

    /// Предыдущая страница.
    pub async fn prev_page(&mut self) -> BoardResult<ListingPage> {
        self.go_to_page(self.state.page.saturating_sub(1)).await
    }

    /// Перезагружает текущую страницу.
    pub async fn reload(&mut self) -> BoardResult<ListingPage> {
        self.fetch(self.state.keyword.clone(), self.state.page).await
    }

    async fn fetch(&mut self, keyword: String, page: u32) -> BoardResult<ListingPage> {
        let filter = PostFilter::keyword(&keyword);
        let page_size = self.state.page_size;
        let window = RangeWindow {
            offset: u64::from(page.saturating_sub(1)) * u64::from(page_size),
            limit: u64::from(page_size),
        };
        let timeout = self.options.request_timeout;

        debug!(page, keyword = %keyword, offset = window.offset, "loading posts page");

        // Количество и окно независимы, поэтому идут параллельно.
        let (total_count, posts) = tokio::try_join!(
            bounded(timeout, self.repo.count(&filter)),
            bounded(timeout, self.repo.list(&filter, window)),
        )
        .map_err(BoardError::load_failed)?;

        self.state.page = page;
        self.state.total_count = total_count;
        self.state.keyword = keyword;

        let rows = posts
            .into_iter()
            .enumerate()
            .map(|(index, post)| ListingRow {
                rank: row_rank(total_count, window.offset, index),
                post,
            })
            .collect();

        let total_pages = self.state.total_pages();
        Ok(ListingPage {
            rows,
            page,
            total_pages,
            total_count,
            keyword: self.state.keyword.clone(),
            has_prev: page > 1,
            has_next: page < total_pages,
        })
    }
}
