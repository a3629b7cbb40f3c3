//! Bookmarked media.

use crate::context::{ServiceContext, UserRecord};
use crate::error::UserDataResult;
use userdata_core::ListFilter;
use userdata_model::payloads::Bookmark;
use userdata_model::EntityId;

const PREFIX: &str = "bookmark:";

/// The set of bookmarked media URNs.
#[derive(Clone)]
pub struct Bookmarks {
    ctx: ServiceContext,
}

impl Bookmarks {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn id(urn: &str) -> EntityId {
        EntityId::new(format!("{PREFIX}{urn}"))
    }

    /// Bookmarks `urn`. Adding an existing bookmark leaves it untouched.
    pub fn add(&self, urn: &str) -> UserDataResult<UserRecord<Bookmark>> {
        let id = Self::id(urn);
        if let Some(existing) = self.ctx.get(&id)? {
            return Ok(existing);
        }
        self.ctx.put(
            id,
            Bookmark {
                urn: urn.to_string(),
            },
        )
    }

    /// Removes the bookmark for `urn`. Returns false if there was none.
    pub fn remove(&self, urn: &str) -> UserDataResult<bool> {
        self.ctx.delete(&Self::id(urn))
    }

    /// Returns true if `urn` is bookmarked.
    pub fn contains(&self, urn: &str) -> bool {
        self.ctx.contains::<Bookmark>(&Self::id(urn))
    }

    /// All bookmarks, most recent first.
    pub fn list(&self) -> Vec<UserRecord<Bookmark>> {
        self.ctx.list(PREFIX, &ListFilter::new().newest_first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use userdata_core::LocalStore;

    fn bookmarks() -> (Bookmarks, Arc<LocalStore>) {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        (
            Bookmarks::new(ServiceContext::new(store.clone(), None)),
            store,
        )
    }

    #[test]
    fn add_is_idempotent() {
        let (bookmarks, store) = bookmarks();
        let first = bookmarks.add("urn:a").unwrap();
        let second = bookmarks.add("urn:a").unwrap();

        assert_eq!(first, second);
        assert_eq!(store.pending_changes().len(), 1);
        assert!(bookmarks.contains("urn:a"));
    }

    #[test]
    fn remove_and_list() {
        let (bookmarks, _) = bookmarks();
        bookmarks.add("urn:a").unwrap();
        bookmarks.add("urn:b").unwrap();

        assert!(bookmarks.remove("urn:a").unwrap());
        assert!(!bookmarks.remove("urn:a").unwrap());
        assert!(!bookmarks.contains("urn:a"));

        let urns: Vec<_> = bookmarks.list().into_iter().map(|r| r.value.urn).collect();
        assert_eq!(urns, vec!["urn:b"]);
    }
}
