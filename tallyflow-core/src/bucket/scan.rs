use std::future::Future;

use futures::{Stream, StreamExt, stream::BoxStream};

use super::BucketCount;
use crate::error::Result;

/// Lazy cursor over the rows of a single bucket.
pub type BucketCursor<'a, T> = BoxStream<'a, Result<T>>;

/// Cursor over an already fetched page.
pub fn page_cursor<'a, T: Send + 'a>(rows: Vec<T>) -> BucketCursor<'a, T> {
    futures::stream::iter(rows.into_iter().map(Ok)).boxed()
}

/// Chains one cursor per bucket into a single forward-only stream.
///
/// Buckets are visited in order `0..count`. A bucket is queried only once the
/// cursor of the previous bucket is exhausted, and every bucket is queried
/// exactly once, empty or not. The first failing query or row ends the
/// stream with that error.
pub fn scan_buckets<'a, T, F, Fut>(
    count: BucketCount,
    mut query: F,
) -> impl Stream<Item = Result<T>> + Send + 'a
where
    T: Send + 'a,
    F: FnMut(i32) -> Fut + Send + 'a,
    Fut: Future<Output = Result<BucketCursor<'a, T>>> + Send + 'a,
{
    async_stream::try_stream! {
        for bucket in count.indices() {
            let mut cursor = query(bucket).await?;
            while let Some(row) = cursor.next().await {
                yield row?;
            }
        }
    }
}

/// Sums per-bucket counts from bucket 0 up to the first empty bucket.
///
/// Only meaningful for tables whose buckets fill up in order, such as
/// notifications bucketed by sequence number.
pub async fn count_contiguous<F, Fut>(mut count_bucket: F) -> Result<i64>
where
    F: FnMut(i32) -> Fut,
    Fut: Future<Output = Result<i64>>,
{
    let mut total = 0;
    let mut bucket = 0;
    loop {
        let rows = count_bucket(bucket).await?;
        if rows == 0 {
            return Ok(total);
        }
        total += rows;
        bucket += 1;
    }
}
