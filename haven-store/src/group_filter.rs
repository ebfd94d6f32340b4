//! Group Filter Service
//!
//! Bulk-membership search used to build a FHIR `Group` of every resource
//! matching a search (e.g. "every Patient matching family=Smith&birthdate=ge1990"),
//! plus one-hop `_has` reverse chaining dispatch (already resolved by
//! [`crate::SearchExecutor`] before this layer runs — see its `search_has`).
//!
//! Two modes, per spec 4.7:
//! - [`GroupFilterService::preview`]: a small sample plus an accurate total count.
//! - [`GroupFilterService::all_keys`]: up to a configurable cap, paginated
//!   internally at 1000 keys/page, stopping as soon as a page returns fewer
//!   results than requested.

use crate::{SearchExecutor, SearchIndex, SqliteStore};
use haven_core::SearchQuery;

/// Internal page size used while walking an "all keys" request.
const PAGE_SIZE: usize = 1_000;

/// Default hard cap on the number of keys returned by an "all keys" request.
pub const DEFAULT_CAP: usize = 10_000;

/// A small sample of matching ids plus the true total match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPreview {
    pub sample: Vec<String>,
    pub total: usize,
}

/// Bulk key enumeration over a search, for Group-membership style queries.
pub struct GroupFilterService<'a> {
    executor: SearchExecutor<'a>,
}

impl<'a> GroupFilterService<'a> {
    pub fn new(store: &'a SqliteStore, index: &'a SearchIndex) -> Self {
        Self {
            executor: SearchExecutor::new(store, index),
        }
    }

    /// Preview mode: return up to `sample_size` matching ids plus the
    /// accurate total, ignoring any pagination already set on `query`.
    pub fn preview(
        &self,
        resource_type: &str,
        query: &SearchQuery,
        sample_size: usize,
    ) -> Result<GroupPreview, String> {
        let mut sample_query = query.clone();
        sample_query.offset = Some(0);
        sample_query.count = Some(sample_size);

        let (sample, total) = self.executor.search_with_total(resource_type, &sample_query)?;
        Ok(GroupPreview { sample, total })
    }

    /// All-keys mode: enumerate every matching id up to `DEFAULT_CAP`.
    /// Returns `(ids, truncated)` — `truncated` is true iff the cap was hit
    /// before the underlying search was exhausted.
    pub fn all_keys(
        &self,
        resource_type: &str,
        query: &SearchQuery,
    ) -> Result<(Vec<String>, bool), String> {
        self.all_keys_with_cap(resource_type, query, DEFAULT_CAP)
    }

    /// Same as [`Self::all_keys`] with an explicit cap.
    pub fn all_keys_with_cap(
        &self,
        resource_type: &str,
        query: &SearchQuery,
        cap: usize,
    ) -> Result<(Vec<String>, bool), String> {
        let mut ids = Vec::new();
        let mut offset = query.offset.unwrap_or(0);

        loop {
            if ids.len() >= cap {
                ids.truncate(cap);
                return Ok((ids, true));
            }

            let page_size = PAGE_SIZE.min(cap - ids.len());
            let mut page_query = query.clone();
            page_query.offset = Some(offset);
            page_query.count = Some(page_size);

            let page_ids = self.executor.search(resource_type, &page_query)?;
            let page_len = page_ids.len();
            ids.extend(page_ids);

            if page_len < page_size {
                return Ok((ids, false));
            }

            offset += page_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexBuilder;

    fn seed(store: &SqliteStore, index: &SearchIndex, count: usize) {
        for i in 0..count {
            let id = format!("p{i}");
            let resource = serde_json::json!({
                "resourceType": "Patient",
                "id": id,
                "name": [{"family": "Smith"}],
            });
            store
                .put("Patient", &id, serde_json::to_vec(&resource).unwrap().as_slice())
                .unwrap();
            for (name, ptype, val, system) in IndexBuilder::extract_indices("Patient", &resource) {
                index.add_index("Patient", &id, &name, &ptype, Some(&val), system.as_deref()).unwrap();
            }
        }
    }

    #[test]
    fn test_preview_returns_sample_and_accurate_total() {
        let store = SqliteStore::open(":memory:").unwrap();
        let index = SearchIndex::open(":memory:").unwrap();
        seed(&store, &index, 25);

        let service = GroupFilterService::new(&store, &index);
        let query = SearchQuery::parse("family=Smith").unwrap();
        let preview = service.preview("Patient", &query, 5).unwrap();

        assert_eq!(preview.sample.len(), 5);
        assert_eq!(preview.total, 25);
    }

    #[test]
    fn test_all_keys_under_cap_returns_everything() {
        let store = SqliteStore::open(":memory:").unwrap();
        let index = SearchIndex::open(":memory:").unwrap();
        seed(&store, &index, 150);

        let service = GroupFilterService::new(&store, &index);
        let query = SearchQuery::parse("family=Smith").unwrap();
        let (ids, truncated) = service.all_keys_with_cap("Patient", &query, 10_000).unwrap();

        assert_eq!(ids.len(), 150);
        assert!(!truncated);
    }

    #[test]
    fn test_all_keys_stops_at_cap() {
        let store = SqliteStore::open(":memory:").unwrap();
        let index = SearchIndex::open(":memory:").unwrap();
        seed(&store, &index, 50);

        let service = GroupFilterService::new(&store, &index);
        let query = SearchQuery::parse("family=Smith").unwrap();
        let (ids, truncated) = service.all_keys_with_cap("Patient", &query, 10).unwrap();

        assert_eq!(ids.len(), 10);
        assert!(truncated);
    }

    #[test]
    fn test_all_keys_paginates_across_page_boundary() {
        let store = SqliteStore::open(":memory:").unwrap();
        let index = SearchIndex::open(":memory:").unwrap();
        // Exercise the page-size-crossing path with a small page override via cap.
        seed(&store, &index, 7);

        let service = GroupFilterService::new(&store, &index);
        let query = SearchQuery::parse("family=Smith").unwrap();
        let (ids, truncated) = service.all_keys_with_cap("Patient", &query, 3).unwrap();

        assert_eq!(ids.len(), 3);
        assert!(truncated);
    }
}
