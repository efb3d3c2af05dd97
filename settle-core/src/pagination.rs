//! Pagination - Aggregating cursor-paginated list endpoints

use std::future::Future;

use log::debug;
use serde_json::Value;
use thiserror::Error;

use crate::path;

/// One page of a list response
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items in the order the remote returned them
    pub items: Vec<T>,
    /// Continuation cursor; empty once the listing is exhausted
    pub next_cursor: String,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: impl Into<String>) -> Self {
        Self {
            items,
            next_cursor: next_cursor.into(),
        }
    }

    /// No further page should be requested after this one
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_empty() || self.items.is_empty()
    }
}

impl Page<Value> {
    /// Read a page from a list response such as
    /// `{"items": [...], "page_info": {"next_marker": "..."}}`.
    ///
    /// A missing or non-array item list reads as empty; a missing cursor as
    /// exhausted. Any advertised total count is ignored.
    pub fn from_json(body: &Value, items_path: &str, cursor_path: &str) -> Self {
        let items = path::search(body, items_path)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next_cursor = path::search_str(body, cursor_path).unwrap_or_default();
        Self { items, next_cursor }
    }
}

#[derive(Debug, Error)]
pub enum PaginationError<E> {
    #[error("{0}")]
    Fetch(E),

    #[error("listing did not finish within {max} pages")]
    TooManyPages { max: usize },
}

/// Lazy, one-shot page iterator.
///
/// `fetch(cursor, limit)` is called with an empty cursor first and then with
/// each returned continuation cursor. Once the listing is exhausted or a
/// fetch fails, [`Paginator::next_page`] keeps returning `None`.
pub struct Paginator<F> {
    fetch: F,
    limit: usize,
    cursor: String,
    pages: usize,
    max_pages: Option<usize>,
    done: bool,
}

impl<F> Paginator<F> {
    pub fn new(fetch: F, limit: usize) -> Self {
        Self {
            fetch,
            limit,
            cursor: String::new(),
            pages: 0,
            max_pages: None,
            done: false,
        }
    }

    /// Fail with [`PaginationError::TooManyPages`] instead of requesting
    /// more than `max` pages
    pub fn max_pages(mut self, max: usize) -> Self {
        self.max_pages = Some(max);
        self
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    pub async fn next_page<T, E, Fut>(&mut self) -> Option<Result<Vec<T>, PaginationError<E>>>
    where
        F: FnMut(String, usize) -> Fut,
        Fut: Future<Output = Result<Page<T>, E>>,
    {
        if self.done {
            return None;
        }
        if let Some(max) = self.max_pages
            && self.pages >= max
        {
            self.done = true;
            return Some(Err(PaginationError::TooManyPages { max }));
        }

        let cursor = std::mem::take(&mut self.cursor);
        debug!("Fetching page {} (marker {:?})", self.pages + 1, cursor);
        match (self.fetch)(cursor, self.limit).await {
            Ok(page) => {
                self.pages += 1;
                if page.is_last() {
                    self.done = true;
                } else {
                    self.cursor = page.next_cursor;
                }
                Some(Ok(page.items))
            }
            Err(e) => {
                self.done = true;
                Some(Err(PaginationError::Fetch(e)))
            }
        }
    }

    /// Drain every remaining page. The first error discards what was
    /// collected so far.
    pub async fn try_collect<T, E, Fut>(mut self) -> Result<Vec<T>, PaginationError<E>>
    where
        F: FnMut(String, usize) -> Fut,
        Fut: Future<Output = Result<Page<T>, E>>,
    {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await {
            items.extend(page?);
        }
        debug!("Collected {} items from {} pages", items.len(), self.pages);
        Ok(items)
    }
}

/// Fetch every page and concatenate the items in order
pub async fn collect_all<T, E, F, Fut>(fetch: F, limit: usize) -> Result<Vec<T>, PaginationError<E>>
where
    F: FnMut(String, usize) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    Paginator::new(fetch, limit).try_collect().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::future::{Ready, ready};
    use std::sync::{Arc, Mutex};

    type Fetched = Result<Page<u32>, String>;

    /// Serves `pages` pages of `per_page` numbered items, recording each
    /// requested cursor
    fn numbered(
        pages: u32,
        per_page: u32,
    ) -> (impl FnMut(String, usize) -> Ready<Fetched>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let fetch = move |cursor: String, _limit: usize| {
            seen.lock().unwrap().push(cursor.clone());
            let index: u32 = if cursor.is_empty() {
                0
            } else {
                cursor.trim_start_matches("m").parse().unwrap()
            };
            let items = (0..per_page).map(|i| index * per_page + i).collect();
            let next = if index + 1 < pages {
                format!("m{}", index + 1)
            } else {
                String::new()
            };
            ready(Ok(Page::new(items, next)))
        };
        (fetch, calls)
    }

    #[tokio::test]
    async fn test_collect_all_concatenates_in_order() {
        let (fetch, calls) = numbered(3, 4);
        let items = collect_all(fetch, 4).await.unwrap();
        assert_eq!(items, (0..12).collect::<Vec<_>>());
        assert_eq!(*calls.lock().unwrap(), vec!["", "m1", "m2"]);
    }

    #[tokio::test]
    async fn test_single_page() {
        let (fetch, calls) = numbered(1, 5);
        let items = collect_all(fetch, 10).await.unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stops_on_empty_page() {
        let mut served = 0;
        let fetch = move |_cursor: String, _limit: usize| {
            served += 1;
            let page: Fetched = if served == 1 {
                Ok(Page::new(vec![1, 2], "more"))
            } else {
                Ok(Page::new(vec![], "still-more"))
            };
            ready(page)
        };
        let mut pager = Paginator::new(fetch, 2);
        assert_eq!(pager.next_page().await.unwrap().unwrap(), vec![1, 2]);
        assert!(pager.next_page().await.unwrap().unwrap().is_empty());
        assert!(pager.next_page().await.is_none());
        assert_eq!(pager.pages_fetched(), 2);
    }

    #[tokio::test]
    async fn test_error_discards_partial_results() {
        let fetch = |cursor: String, _limit: usize| {
            let page: Fetched = if cursor.is_empty() {
                Ok(Page::new(vec![1, 2, 3], "next"))
            } else {
                Err("HTTP 500".to_string())
            };
            ready(page)
        };
        let err = collect_all(fetch, 3).await.unwrap_err();
        assert!(matches!(err, PaginationError::Fetch(ref e) if e == "HTTP 500"));
        assert_eq!(err.to_string(), "HTTP 500");
    }

    #[tokio::test]
    async fn test_paginator_is_one_shot_after_error() {
        let mut calls = 0;
        let fetch = move |_cursor: String, _limit: usize| {
            calls += 1;
            let page: Fetched = if calls == 1 {
                Err("boom".to_string())
            } else {
                Ok(Page::new(vec![1], ""))
            };
            ready(page)
        };
        let mut pager = Paginator::new(fetch, 1);
        assert!(pager.next_page().await.unwrap().is_err());
        assert!(pager.next_page().await.is_none());
        assert_eq!(pager.pages_fetched(), 0);
    }

    #[tokio::test]
    async fn test_max_pages() {
        let (fetch, calls) = numbered(10, 1);
        let err = Paginator::new(fetch, 1)
            .max_pages(3)
            .try_collect()
            .await
            .unwrap_err();
        assert!(matches!(err, PaginationError::TooManyPages { max: 3 }));
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_max_pages_not_hit_when_listing_ends() {
        let (fetch, _) = numbered(3, 2);
        let items = Paginator::new(fetch, 2)
            .max_pages(3)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items.len(), 6);
    }

    #[test]
    fn test_page_from_json_ignores_total() {
        let body = json!({
            "items": [{"id": "a"}, {"id": "b"}],
            "page_info": {"next_marker": "b", "current_count": 2},
            "total_count": 1000
        });
        let page = Page::from_json(&body, "items", "page_info.next_marker");
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_cursor, "b");
        assert!(!page.is_last());

        let page = Page::from_json(&json!({"gateways": []}), "items", "page_info.next_marker");
        assert!(page.items.is_empty());
        assert!(page.is_last());
    }
}
