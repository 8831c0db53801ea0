use std::{fmt::Display, future::Future, rc::Rc, sync::Arc};

use async_trait::async_trait;

use crate::{
    api::{PageRequest, Remote, RemoteError},
    cache::{CacheKey, CacheValue, Fetcher},
    error::classify,
    PostPages,
};

/// Runs `f` until it succeeds, retrying server and transport failures at most `retries` times
pub(crate) async fn with_retries<T, F, Fut>(
    retries: u32,
    what: &dyn Display,
    mut f: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < retries && classify(&err).is_retryable() => {
                attempt += 1;
                tracing::debug!(%what, %err, attempt, "retrying fetch");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Fetches cache entries from a [`Remote`]
pub struct RemoteFetcher {
    remote: Rc<dyn Remote>,
    page_size: usize,
}

impl RemoteFetcher {
    pub fn new(remote: Rc<dyn Remote>, page_size: usize) -> RemoteFetcher {
        RemoteFetcher { remote, page_size }
    }
}

#[async_trait(?Send)]
impl Fetcher for RemoteFetcher {
    async fn fetch(
        &self,
        key: &CacheKey,
        current: Option<CacheValue>,
    ) -> Result<CacheValue, RemoteError> {
        match key {
            CacheKey::Posts => {
                // Re-read as many pages as were loaded, so the list does not shrink under the user
                let (limit, loaded) = current
                    .as_ref()
                    .and_then(|v| v.as_posts())
                    .map(|p| (p.limit(), p.num_pages()))
                    .unwrap_or((self.page_size, 1));
                let mut pages = PostPages::new(limit);
                while let Some(page) = pages.next_cursor() {
                    if pages.num_pages() >= loaded.max(1) {
                        break;
                    }
                    let posts = self.remote.list_posts(PageRequest { page, limit }).await?;
                    pages
                        .push_page(page, posts)
                        .map_err(|e| RemoteError::Other(e.into()))?;
                }
                Ok(CacheValue::Posts(Arc::new(pages)))
            }
            CacheKey::Post(id) => Ok(CacheValue::Post(Arc::new(self.remote.get_post(id).await?))),
            CacheKey::Comments(post) => Ok(CacheValue::Comments(Arc::new(
                self.remote.list_comments(post).await?,
            ))),
        }
    }
}
