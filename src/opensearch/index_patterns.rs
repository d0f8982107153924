//! Dashboards index patterns as stored in the `.kibana*` indices.
//!
//! Dashboards keeps one saved object index per tenant and creates a new
//! generation of it on every migration, so the same pattern can show up in
//! several indices of one tenant. Only the newest generation is live.

use crate::{
    constants::{GLOBAL_TENANT, INDEX_PATTERN_ID_PREFIX, SERVICE_OPENSEARCH},
    error::SyncError,
    models::IndexPatterns,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    query: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_after: Option<Vec<Value>>,
    size: usize,
    sort: Value,
}

impl SearchRequest {
    pub fn index_patterns(size: usize, search_after: Option<Vec<Value>>) -> Self {
        Self {
            query: json!({"term": {"type": {"value": "index-pattern"}}}),
            search_after,
            size,
            sort: json!({"updated_at": {"order": "asc"}}),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: SearchHits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHits {
    #[serde(default)]
    pub hits: Vec<IndexPatternHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPatternHit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_source")]
    pub source: IndexPatternSource,
    #[serde(default)]
    pub sort: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPatternSource {
    #[serde(rename = "index-pattern")]
    pub index_pattern: IndexPatternAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPatternAttributes {
    pub title: String,
}

/// Splits `.kibana[_<tenant>]_<migration>` into the tenant index prefix and
/// the migration number. A missing tenant is the global tenant.
pub fn parse_index_name(name: &str) -> Result<(String, u64), SyncError> {
    let invalid = || SyncError::InvalidIndexName(name.to_string());
    let rest = name.strip_prefix(".kibana").ok_or_else(invalid)?;
    let (head, migration) = rest.rsplit_once('_').ok_or_else(invalid)?;
    if migration.is_empty() || !migration.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let migration = migration.parse::<u64>().map_err(|_| invalid())?;
    if migration < 1 {
        return Err(invalid());
    }
    let tenant = match head {
        "" => GLOBAL_TENANT.to_string(),
        _ => match head.strip_prefix('_') {
            Some(tenant) if !tenant.is_empty() => tenant.to_string(),
            _ => return Err(invalid()),
        },
    };
    Ok((tenant, migration))
}

/// Builds the index pattern map from search hits, keeping only hits from the
/// highest migration of each tenant. Ids keep hit order per title.
pub fn collect_index_patterns(hits: &[IndexPatternHit]) -> Result<IndexPatterns, SyncError> {
    let parsed = hits
        .iter()
        .map(|hit| parse_index_name(&hit.index).map(|parsed| (parsed, hit)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut latest = BTreeMap::<&str, u64>::new();
    for ((tenant, migration), _) in &parsed {
        let entry = latest.entry(tenant.as_str()).or_default();
        *entry = (*entry).max(*migration);
    }

    let mut patterns = IndexPatterns::new();
    for ((tenant, migration), hit) in &parsed {
        if latest.get(tenant.as_str()) != Some(migration) {
            continue;
        }
        let id = hit
            .id
            .strip_prefix(INDEX_PATTERN_ID_PREFIX)
            .unwrap_or(&hit.id);
        patterns
            .entry(tenant.clone())
            .or_default()
            .entry(hit.source.index_pattern.title.clone())
            .or_default()
            .push(id.to_string());
    }
    Ok(patterns)
}

/// Accumulates hits across search pages.
#[derive(Debug, Default)]
pub struct HitCollector {
    hits: Vec<IndexPatternHit>,
    seen: HashSet<(String, String)>,
}

impl HitCollector {
    /// Adds a page and returns the cursor for the next request, or `None`
    /// once the page was short and paging is complete.
    pub fn push_page(
        &mut self,
        page: Vec<IndexPatternHit>,
        size: usize,
        previous: Option<&[Value]>,
    ) -> Result<Option<Vec<Value>>, SyncError> {
        let full = page.len() >= size;
        let cursor = page.last().map(|hit| hit.sort.clone());
        for hit in page {
            if self.seen.insert((hit.index.clone(), hit.id.clone())) {
                self.hits.push(hit);
            }
        }
        if !full {
            return Ok(None);
        }
        match cursor {
            Some(cursor) if cursor.is_empty() => Err(SyncError::decode(
                SERVICE_OPENSEARCH,
                "search hit without sort value",
            )),
            Some(cursor) if previous == Some(cursor.as_slice()) => Err(SyncError::decode(
                SERVICE_OPENSEARCH,
                "search cursor did not advance",
            )),
            cursor => Ok(cursor),
        }
    }

    pub fn finish(self) -> Result<IndexPatterns, SyncError> {
        collect_index_patterns(&self.hits)
    }
}
