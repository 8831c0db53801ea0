mod cache;
pub use cache::{CacheKey, CacheValue, EntryStatus, FetchTicket, Fetcher, ResourceCache};

mod client;
pub use client::{Author, Client, ClientConfig};

mod comment;
pub use comment::{build_comment_tree, prune_comment_thread, CommentNode};

mod comment_item;
pub use comment_item::CommentItem;

mod error;
pub use error::{classify, normalize, ErrorKind, NormalizedError};

mod fetch;
pub use fetch::RemoteFetcher;

mod http;
pub use http::HttpRemote;

pub mod mutation;

mod pages;
pub use pages::{PaginationError, PostPages};

mod temp_id;
pub use temp_id::{SequentialIds, SystemIds, TempIdSource, TimeRandomIds};

mod fuzz;

pub mod api {
    pub use murmur_api::*;
}
