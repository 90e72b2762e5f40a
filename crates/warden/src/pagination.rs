//! Generic traversal of paginated list endpoints.
//!
//! A [`Paginator`] drives any page-fetching function of the shape
//! `Fn(options) -> Future<Output = Result<(page, PageMeta), E>>` until a
//! [`PageStrategy`] reports the last page. Each native page is passed through
//! a mapper into the caller's item type; the identity mapping is the default.
//!
//! Two drive modes are offered:
//!
//! - [`Paginator::sync`] waits for every page and returns what was gathered,
//!   plus the first error if one stopped the walk.
//! - [`Paginator::stream`] pushes each mapped page onto a channel as soon as it
//!   is fetched, so consumers can start before pagination completes.

use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::http::HttpResponse;

/// Largest `per_page` GitHub accepts.
pub const MAX_PER_PAGE: u32 = 100;

/// Channel capacity for [`Paginator::stream`].
pub const STREAM_BUFFER: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaginationError {
    /// The strategy and options can never produce a valid walk.
    #[error("paginator misconfigured: {0}")]
    Misconfigured(String),
}

/// Page selection sent with every list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    /// 1-based page number; 0 lets the provider pick the first page.
    pub page: u32,
    pub per_page: u32,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: MAX_PER_PAGE,
        }
    }
}

impl ListOptions {
    /// Query string fragment, without the leading `?`/`&`.
    #[must_use]
    pub fn query(&self) -> String {
        format!("per_page={}&page={}", self.per_page, self.page)
    }
}

/// Options types that embed a [`ListOptions`].
///
/// Endpoint-specific options (a role filter, say) implement this so the
/// built-in strategies can move them from page to page.
pub trait PageOptions: Clone {
    fn list_options(&self) -> &ListOptions;
    fn list_options_mut(&mut self) -> &mut ListOptions;
}

impl PageOptions for ListOptions {
    fn list_options(&self) -> &ListOptions {
        self
    }

    fn list_options_mut(&mut self) -> &mut ListOptions {
        self
    }
}

/// Pagination state reported by one response.
///
/// Page numbers that the response doesn't report are `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub status: u16,
    pub next_page: u32,
    pub current_page: u32,
    pub total_pages: u32,
}

impl PageMeta {
    /// Read pagination state from a response.
    ///
    /// GitHub reports it through the `Link` header; some self-hosted
    /// providers use `X-Page`/`X-Total-Pages` instead. Both are understood.
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Self {
        let links = response
            .header("link")
            .map(parse_link_header)
            .unwrap_or_default();
        let header_num = |name: &str| {
            response
                .header(name)
                .and_then(|v| v.trim().parse::<u32>().ok())
        };

        let next_page = header_num("x-next-page").or(links.next).unwrap_or(0);
        let current_page = header_num("x-page")
            .or(links.prev.map(|p| p + 1))
            .or(links.next.map(|n| n.saturating_sub(1)))
            .unwrap_or(1);
        let total_pages = header_num("x-total-pages")
            .or(links.last)
            .unwrap_or(if next_page == 0 { current_page } else { 0 });

        Self {
            status: response.status,
            next_page,
            current_page,
            total_pages,
        }
    }
}

/// Page numbers found in a `Link` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkPages {
    pub next: Option<u32>,
    pub prev: Option<u32>,
    pub last: Option<u32>,
}

/// Parse a `Link` header.
///
/// GitHub Link headers look like:
/// `<https://api.github.com/organizations/123/repos?per_page=100&page=2>; rel="next", <...&page=3>; rel="last"`
#[must_use]
pub fn parse_link_header(link_header: &str) -> LinkPages {
    let mut pages = LinkPages::default();

    for part in link_header.split(',') {
        let mut url = None;
        let mut rel = None;

        for segment in part.split(';') {
            let segment = segment.trim();
            if let Some(inner) = segment.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
                url = Some(inner);
            } else if let Some(value) = segment.strip_prefix("rel=") {
                rel = Some(value.trim_matches('"'));
            }
        }

        let (Some(url), Some(rel)) = (url, rel) else {
            continue;
        };
        let Some(page) = page_from_url(url) else {
            continue;
        };
        match rel {
            "next" => pages.next = Some(page),
            "prev" => pages.prev = Some(page),
            "last" => pages.last = Some(page),
            _ => {}
        }
    }

    pages
}

fn page_from_url(url: &str) -> Option<u32> {
    let url = Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "page")
        .and_then(|(_, v)| v.parse().ok())
}

/// Advancement policy for one provider's pagination scheme.
pub trait PageStrategy<O, M = PageMeta>: Send + Sync {
    /// Reject options the walk can't start from. Called once at construction.
    fn validate(&self, _options: &O) -> Result<(), PaginationError> {
        Ok(())
    }

    /// Whether `meta` describes the last page.
    fn done(&self, meta: &M) -> bool;

    /// Point `options` at the page after the one `meta` describes.
    fn advance(&self, options: &mut O, meta: &M);
}

fn validate_per_page(options: &ListOptions) -> Result<(), PaginationError> {
    match options.per_page {
        0 => Err(PaginationError::Misconfigured(
            "per_page must be at least 1".to_string(),
        )),
        n if n > MAX_PER_PAGE => Err(PaginationError::Misconfigured(format!(
            "per_page {n} exceeds the provider maximum of {MAX_PER_PAGE}"
        ))),
        _ => Ok(()),
    }
}

/// Follow the provider's "next page" pointer; `0` means there is none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextPageStrategy;

impl<O: PageOptions> PageStrategy<O> for NextPageStrategy {
    fn validate(&self, options: &O) -> Result<(), PaginationError> {
        validate_per_page(options.list_options())
    }

    fn done(&self, meta: &PageMeta) -> bool {
        meta.next_page == 0
    }

    fn advance(&self, options: &mut O, meta: &PageMeta) {
        options.list_options_mut().page = meta.next_page;
    }
}

/// Count pages until the current one is the last one reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct TotalPagesStrategy;

impl<O: PageOptions> PageStrategy<O> for TotalPagesStrategy {
    fn validate(&self, options: &O) -> Result<(), PaginationError> {
        validate_per_page(options.list_options())
    }

    fn done(&self, meta: &PageMeta) -> bool {
        meta.current_page >= meta.total_pages
    }

    fn advance(&self, options: &mut O, meta: &PageMeta) {
        options.list_options_mut().page = meta.current_page + 1;
    }
}

/// Items gathered by [`Paginator::sync`], with the error that stopped the walk.
#[derive(Debug)]
pub struct Collected<U, E> {
    pub collected: Vec<U>,
    pub error: Option<E>,
}

impl<U, E> Collected<U, E> {
    /// Drop partial results when the walk failed.
    pub fn into_result(self) -> Result<Vec<U>, E> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.collected),
        }
    }
}

/// Identity mapping used by [`Paginator::new`].
pub type Identity<T> = fn(Vec<T>) -> Vec<T>;

fn identity<T>(page: Vec<T>) -> Vec<T> {
    page
}

/// Drives a page-fetching function to exhaustion.
pub struct Paginator<F, S, O, M> {
    fetch: F,
    strategy: S,
    options: O,
    mapper: M,
}

impl<F, Fut, S, O, T, E> Paginator<F, S, O, Identity<T>>
where
    F: Fn(O) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, PageMeta), E>>,
    S: PageStrategy<O>,
    O: Clone + Default,
{
    /// Paginator that returns each page's items unchanged.
    ///
    /// # Arguments
    ///
    /// * `fetch` - Fetches one page for the given options
    /// * `strategy` - Decides when the walk is done and how to advance
    /// * `options` - Starting options; `O::default()` when `None`
    ///
    /// # Errors
    ///
    /// Returns [`PaginationError::Misconfigured`] when `strategy` rejects
    /// `options`, for example a zero or oversized `per_page`.
    pub fn new(fetch: F, strategy: S, options: Option<O>) -> Result<Self, PaginationError> {
        Paginator::with_mapper(fetch, strategy, options, identity::<T> as Identity<T>)
    }
}

impl<F, Fut, S, O, M, T, U, E> Paginator<F, S, O, M>
where
    F: Fn(O) -> Fut,
    Fut: Future<Output = Result<(T, PageMeta), E>>,
    S: PageStrategy<O>,
    O: Clone + Default,
    M: Fn(T) -> Vec<U>,
{
    /// Paginator that maps each native page through `mapper`.
    pub fn with_mapper(
        fetch: F,
        strategy: S,
        options: Option<O>,
        mapper: M,
    ) -> Result<Self, PaginationError> {
        let options = options.unwrap_or_default();
        strategy.validate(&options)?;
        Ok(Self {
            fetch,
            strategy,
            options,
            mapper,
        })
    }

    /// Fetch every page, stopping at the first error.
    ///
    /// Pages fetched before the failure are kept in
    /// [`Collected::collected`]; use [`Collected::into_result`] when partial
    /// results are worthless to the caller.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let orgs = Paginator::new(
    ///     |opts: ListOptions| client.list_org_repos("acme", opts),
    ///     NextPageStrategy,
    ///     None,
    /// )?
    /// .sync()
    /// .await
    /// .into_result()?;
    /// ```
    pub async fn sync(self) -> Collected<U, E> {
        let mut collected = Vec::new();
        let mut options = self.options;

        loop {
            match (self.fetch)(options.clone()).await {
                Ok((page, meta)) => {
                    collected.extend((self.mapper)(page));
                    if self.strategy.done(&meta) {
                        break;
                    }
                    self.strategy.advance(&mut options, &meta);
                }
                Err(error) => {
                    return Collected {
                        collected,
                        error: Some(error),
                    };
                }
            }
        }

        Collected {
            collected,
            error: None,
        }
    }
}

impl<F, Fut, S, O, M, T, U, E> Paginator<F, S, O, M>
where
    F: Fn(O) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(T, PageMeta), E>> + Send,
    S: PageStrategy<O> + 'static,
    O: Clone + Send + 'static,
    M: Fn(T) -> Vec<U> + Send + Sync + 'static,
    T: Send,
    U: Send + 'static,
    E: Send + 'static,
{
    /// Fetch pages in a background task, sending each mapped page as it lands.
    ///
    /// An error is sent as the final item. The channel closes when the walk
    /// ends or the receiver is dropped. The channel holds up to
    /// [`STREAM_BUFFER`] pages, so a slow consumer only stalls the producer
    /// once that many are waiting.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut pages = paginator.stream();
    /// while let Some(page) = pages.recv().await {
    ///     for repo in page? {
    ///         group.spawn(enrich(repo));
    ///     }
    /// }
    /// ```
    pub fn stream(self) -> mpsc::Receiver<Result<Vec<U>, E>> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut options = self.options;
            loop {
                match (self.fetch)(options.clone()).await {
                    Ok((page, meta)) => {
                        if tx.send(Ok((self.mapper)(page))).await.is_err() {
                            return;
                        }
                        if self.strategy.done(&meta) {
                            return;
                        }
                        self.strategy.advance(&mut options, &meta);
                    }
                    Err(error) => {
                        let _ = tx.send(Err(error)).await;
                        return;
                    }
                }
            }
        });

        rx
    }
}
