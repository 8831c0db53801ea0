use crate::api::{Post, PostId};

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum PaginationError {
    #[error("page {got} does not follow the accumulated pages (expected {expected:?})")]
    NotContiguous { expected: Option<u32>, got: u32 },
}

/// The accumulated pages of the posts collection
///
/// Pages are always a gap-free prefix of the collection: page `n + 1` can only
/// be added once page `n` is there.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PostPages {
    limit: usize,
    pages: Vec<Vec<Post>>,
    /// 1-based page number each page was fetched with
    params: Vec<u32>,
}

impl PostPages {
    pub fn new(limit: usize) -> PostPages {
        PostPages {
            limit,
            pages: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn pages(&self) -> &[Vec<Post>] {
        &self.pages
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// Page number to fetch next, or `None` once the collection is exhausted
    pub fn next_cursor(&self) -> Option<u32> {
        match (self.pages.last(), self.params.last()) {
            (None, _) | (_, None) => Some(1),
            (Some(last), _) if last.len() < self.limit => None,
            (Some(_), Some(param)) => Some(param + 1),
        }
    }

    pub fn has_more(&self) -> bool {
        self.next_cursor().is_some()
    }

    pub fn push_page(&mut self, param: u32, posts: Vec<Post>) -> Result<(), PaginationError> {
        let expected = self.next_cursor();
        if expected != Some(param) {
            return Err(PaginationError::NotContiguous {
                expected,
                got: param,
            });
        }
        self.pages.push(posts);
        self.params.push(param);
        Ok(())
    }

    /// All accumulated posts, in fetch order
    pub fn iter(&self) -> impl Iterator<Item = &Post> {
        self.pages.iter().flat_map(|p| p.iter())
    }

    pub fn get(&self, id: &PostId) -> Option<&Post> {
        self.iter().find(|p| p.id == *id)
    }

    /// Puts `post` at the very top of the first page, keeping the page within the limit
    pub fn prepend(&mut self, post: Post) {
        match self.pages.first_mut() {
            None => {
                self.pages.push(vec![post]);
                self.params.push(1);
            }
            Some(first) => {
                first.insert(0, post);
                first.truncate(self.limit);
            }
        }
    }

    pub fn update(&mut self, id: &PostId, f: impl Fn(&mut Post)) {
        for p in self.pages.iter_mut().flat_map(|p| p.iter_mut()) {
            if p.id == *id {
                f(p);
            }
        }
    }

    /// Swaps the post `id` for `post`, dropping any other copy of `post` so it is only listed once
    pub fn replace(&mut self, id: &PostId, post: &Post) {
        let mut seen = false;
        for page in self.pages.iter_mut() {
            page.retain_mut(|p| {
                if p.id == *id || p.id == post.id {
                    if seen {
                        return false;
                    }
                    seen = true;
                    *p = post.clone();
                }
                true
            });
        }
    }

    pub fn remove(&mut self, id: &PostId) {
        for page in self.pages.iter_mut() {
            page.retain(|p| p.id != *id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn post(id: &str) -> Post {
        Post {
            id: PostId(String::from(id)),
            title: format!("title {id}"),
            content: String::new(),
            author_name: String::from("ana"),
            author_avatar: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn posts(ids: &[&str]) -> Vec<Post> {
        ids.iter().map(|id| post(id)).collect()
    }

    #[test]
    fn cursor_walks_until_a_short_page() {
        let mut p = PostPages::new(2);
        assert_eq!(p.next_cursor(), Some(1));
        p.push_page(1, posts(&["a", "b"])).unwrap();
        assert_eq!(p.next_cursor(), Some(2));
        p.push_page(2, posts(&["c"])).unwrap();
        assert_eq!(p.next_cursor(), None);
        assert!(!p.has_more());
        assert_eq!(
            p.iter().map(|p| p.id.0.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn pages_stay_contiguous() {
        let mut p = PostPages::new(2);
        assert_eq!(
            p.push_page(2, posts(&["a"])),
            Err(PaginationError::NotContiguous {
                expected: Some(1),
                got: 2
            })
        );
        p.push_page(1, posts(&["a", "b"])).unwrap();
        assert!(p.push_page(1, posts(&["a", "b"])).is_err());
        assert_eq!(p.num_pages(), 1);
    }

    #[test]
    fn prepend_targets_the_first_page() {
        let mut p = PostPages::new(2);
        p.prepend(post("x"));
        assert_eq!(p.pages(), &[posts(&["x"])]);

        let mut p = PostPages::new(2);
        p.push_page(1, posts(&["a", "b"])).unwrap();
        p.push_page(2, posts(&["c", "d"])).unwrap();
        p.prepend(post("x"));
        assert_eq!(p.pages(), &[posts(&["x", "a"]), posts(&["c", "d"])]);
    }

    #[test]
    fn replace_is_idempotent() {
        let mut p = PostPages::new(3);
        p.push_page(1, posts(&["tmp", "a"])).unwrap();
        let confirmed = post("9");
        p.replace(&PostId(String::from("tmp")), &confirmed);
        let once = p.clone();
        p.replace(&PostId(String::from("tmp")), &confirmed);
        assert_eq!(p, once);
        assert_eq!(p.pages(), &[posts(&["9", "a"])]);
    }

    #[test]
    fn replace_drops_a_copy_that_arrived_first() {
        let mut p = PostPages::new(3);
        p.push_page(1, posts(&["tmp", "9", "a"])).unwrap();
        p.replace(&PostId(String::from("tmp")), &post("9"));
        assert_eq!(p.pages(), &[posts(&["9", "a"])]);
    }
}
