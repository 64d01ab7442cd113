//! Offset/limit pagination as a lazily produced stream of pages.
//!
//! The paginator owns its cursor; nothing outside it is mutated while pages
//! are fetched. Pages are requested strictly one after another so that the
//! offset and the reported total stay consistent.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, Stream, TryStreamExt};
use hostel_core::error::{HostelError, Result};

use crate::postgrest::Page;

/// Window requested for a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u64,
}

struct Cursor<F> {
    fetch_page: F,
    offset: u64,
    done: bool,
}

/// Stream the pages produced by `fetch_page`, in server order.
///
/// Completion: when the server reports a total, the stream ends once the
/// offset reaches it; otherwise a short page (fewer than `page_size` rows)
/// ends it. An empty page always ends it. Each page has its own
/// `page_timeout`; a timeout or any other error ends the stream with that
/// error. The stream cannot be restarted.
pub fn page_stream<T, F, Fut>(
    page_size: u64,
    page_timeout: Duration,
    fetch_page: F,
) -> impl Stream<Item = Result<Vec<T>>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let page_size = page_size.max(1);
    let cursor = Cursor {
        fetch_page,
        offset: 0,
        done: false,
    };

    stream::try_unfold(cursor, move |mut cursor| async move {
        if cursor.done {
            return Ok(None);
        }

        let request = PageRequest {
            offset: cursor.offset,
            limit: page_size,
        };
        let page = tokio::time::timeout(page_timeout, (cursor.fetch_page)(request))
            .await
            .map_err(|_| HostelError::Timeout {
                secs: page_timeout.as_secs(),
            })??;

        let received = page.items.len() as u64;
        cursor.offset += received;
        cursor.done = received == 0
            || match page.total {
                Some(total) => cursor.offset >= total,
                None => received < page_size,
            };

        tracing::debug!(
            offset = request.offset,
            received,
            total = ?page.total,
            "page fetched"
        );
        Ok(Some((page.items, cursor)))
    })
}

/// Fetch every page and concatenate them in server order.
///
/// All-or-nothing: if any page fails, no rows are returned.
pub async fn fetch_all_pages<T, F, Fut>(
    page_size: u64,
    page_timeout: Duration,
    fetch_page: F,
) -> Result<Vec<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    page_stream(page_size, page_timeout, fetch_page)
        .try_concat()
        .await
}
