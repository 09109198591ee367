//! Paginated, forward-only iteration over catalog tables.
//!
//! [`stream_all`] turns [`Database::list`] pages into one lazy stream. Pages
//! are fetched only when the consumer asks for more items, so a consumer that
//! stops early never loads the remaining pages, and dropping the stream
//! releases everything it holds. A stream cannot be rewound; iterate again
//! by calling [`stream_all`] again.
//!
//! Each page resumes after the last key of the previous page, so records
//! removed by the consumer mid-walk never shift unvisited records out of
//! the window.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use fleetsync_core::{Error, Result};

use crate::model::CatalogEntity;
use crate::store::{Database, Query};

/// Default number of records fetched per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Streams every record matching `query`, `page_size` records per fetch.
///
/// A failed page fetch is yielded as an error item and ends the stream.
pub fn stream_all<'a, D, E>(db: &'a D, query: Query, page_size: usize) -> BoxStream<'a, Result<E>>
where
    D: Database,
    E: CatalogEntity,
{
    let page_size = page_size.max(1);
    let start = Query {
        offset: 0,
        limit: Some(page_size),
        ..query
    };

    stream::try_unfold(Some(start), move |next| async move {
        let Some(query) = next else {
            return Ok::<_, Error>(None);
        };
        let page = db.list::<E>(&query).await?;
        let following = page
            .next_offset
            .and(page.items.last())
            .map(|last| query.clone().after(last.network_id(), last.id()));
        Ok(Some((page.items, following)))
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}
