//! Chunk reconstruction and inspection views.
//!
//! Pure transformations over the text fragments the extraction pipeline
//! produces for a paper: deterministic reading-order reassembly, plus the
//! filter/sort pipeline behind the chunk inspector. Nothing here talks to
//! the network or holds state.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Chunk ──────────────────────────────────────────────────────────────────

/// One fragment of text extracted from a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Unique within the owning job.
    pub id: String,
    /// Position assigned by the extractor, unique within the job.
    pub idx: u32,
    /// Source page. Fragments without a page order after all paged ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Separator between fragments in reconstructed text (one blank line).
const CHUNK_SEPARATOR: &str = "\n\n";

/// Rank used for page comparison; missing pages rank after every real page.
fn page_rank(page: Option<u32>) -> u64 {
    match page {
        Some(p) => u64::from(p),
        None => u64::MAX,
    }
}

/// Total reading order: page (missing last), then extractor index, then id.
fn reading_order(a: &Chunk, b: &Chunk) -> Ordering {
    page_rank(a.page)
        .cmp(&page_rank(b.page))
        .then_with(|| a.idx.cmp(&b.idx))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sorts fragments into reading order in place.
pub fn sort_reading_order(chunks: &mut [Chunk]) {
    chunks.sort_by(reading_order);
}

/// Reassembles the continuous text of a document from its fragments.
///
/// Deterministic: any permutation of the same fragments yields the same
/// string. Fragments are ordered by page (unpaged last), then extractor
/// index, with id as the final tie-break; contents are joined by a blank
/// line.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by(|a, b| reading_order(a, b));
    ordered
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

// ─── Filtering ──────────────────────────────────────────────────────────────

/// Case-insensitive substring filter on fragment content.
///
/// An empty query keeps every fragment; a query matching nothing yields an
/// empty vec, which the inspector renders as a zero-result state.
pub fn filter_by_text(chunks: &[Chunk], query: &str) -> Vec<Chunk> {
    if query.is_empty() {
        return chunks.to_vec();
    }
    let needle = query.to_lowercase();
    chunks
        .iter()
        .filter(|c| c.content.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Keeps fragments on exactly `page`.
///
/// `None` means no filter. Fragments without a page never match a concrete
/// page.
pub fn filter_by_page(chunks: &[Chunk], page: Option<u32>) -> Vec<Chunk> {
    match page {
        None => chunks.to_vec(),
        Some(p) => chunks.iter().filter(|c| c.page == Some(p)).cloned().collect(),
    }
}

// ─── Sorting ────────────────────────────────────────────────────────────────

/// Key a chunk view can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    Idx,
    Page,
    TokenCount,
    CreatedAt,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Idx => write!(f, "idx"),
            SortKey::Page => write!(f, "page"),
            SortKey::TokenCount => write!(f, "tokenCount"),
            SortKey::CreatedAt => write!(f, "createdAt"),
        }
    }
}

/// Sort direction. Fragments missing the key's value sort last either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

/// Present values order by `direction`; missing values always come last.
fn directed_optional(a: Option<u32>, b: Option<u32>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => directed(x.cmp(&y), direction),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_by(a: &Chunk, b: &Chunk, key: SortKey, direction: SortDirection) -> Ordering {
    match key {
        SortKey::Idx => directed(a.idx.cmp(&b.idx), direction),
        SortKey::Page => directed_optional(a.page, b.page, direction),
        SortKey::TokenCount => directed_optional(a.token_count, b.token_count, direction),
        SortKey::CreatedAt => directed(a.created_at.cmp(&b.created_at), direction),
    }
}

/// Stable sort of a chunk view by one key.
///
/// Fragments missing the key's value (page, token count) are placed after
/// all fragments that have it, in both directions.
pub fn sort_by(chunks: &[Chunk], key: SortKey, direction: SortDirection) -> Vec<Chunk> {
    let mut sorted = chunks.to_vec();
    sorted.sort_by(|a, b| compare_by(a, b, key, direction));
    sorted
}

// ─── Composed queries ───────────────────────────────────────────────────────

/// A composed filter/sort request from the chunk inspector.
///
/// Applies the text filter, then the page filter, then the sort. Pure over
/// one chunk snapshot: the same query on the same fragments always produces
/// the same view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<SortKey>,
    #[serde(default)]
    pub direction: SortDirection,
}

impl ChunkQuery {
    /// Runs the query against one fragment snapshot.
    pub fn apply(&self, chunks: &[Chunk]) -> Vec<Chunk> {
        let mut view = match self.text.as_deref() {
            Some(query) if !query.is_empty() => filter_by_text(chunks, query),
            _ => chunks.to_vec(),
        };
        if self.page.is_some() {
            view = filter_by_page(&view, self.page);
        }
        if let Some(key) = self.sort_key {
            view = sort_by(&view, key, self.direction);
        }
        view
    }
}
