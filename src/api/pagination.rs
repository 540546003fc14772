//! Pagination utilities for list endpoints

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Pagination query parameters
///
/// Extracted as its own `Query<PaginationParams>` next to the endpoint's
/// filter struct; both read the same query string.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PaginationParams {
    /// Page number (1-indexed)
    pub page: Option<u32>,

    /// Items per page
    pub per_page: Option<u32>,
}

impl PaginationParams {
    /// Maximum allowed items per page
    pub const MAX_PER_PAGE: u32 = 100;

    /// Returns the clamped per_page value
    pub fn per_page(&self) -> u32 {
        self.per_page.unwrap_or(20).clamp(1, Self::MAX_PER_PAGE)
    }

    /// Returns the page (1-indexed, minimum 1)
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Calculate SQL OFFSET
    pub fn offset(&self) -> i64 {
        (i64::from(self.page()) - 1) * i64::from(self.per_page())
    }

    /// Calculate SQL LIMIT
    pub fn limit(&self) -> i64 {
        i64::from(self.per_page())
    }
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationMeta {
    pub fn new(params: &PaginationParams, total_items: u64) -> Self {
        let per_page = params.per_page();
        let page = params.page();
        let total_pages = total_items.div_ceil(u64::from(per_page)) as u32;

        Self {
            page,
            per_page,
            total_items,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

/// Paginated response wrapper
#[derive(Debug, Serialize)]
pub struct Paginated<T: Serialize> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T: Serialize> Paginated<T> {
    /// `total_items` comes straight from a `COUNT(*)` column
    pub fn new(data: Vec<T>, params: &PaginationParams, total_items: i64) -> Self {
        Self {
            data,
            pagination: PaginationMeta::new(params, total_items.max(0) as u64),
        }
    }
}

impl<T: Serialize> IntoResponse for Paginated<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_clamping() {
        let p = PaginationParams::default();
        assert_eq!((p.page(), p.per_page(), p.offset()), (1, 20, 0));

        let p = PaginationParams {
            page: Some(0),
            per_page: Some(1000),
        };
        assert_eq!(p.page(), 1);
        assert_eq!(p.limit(), 100);
    }

    #[test]
    fn meta_counts_partial_last_page() {
        let p = PaginationParams {
            page: Some(3),
            per_page: Some(10),
        };
        assert_eq!(p.offset(), 20);

        let meta = PaginationMeta::new(&p, 21);
        assert_eq!(meta.total_pages, 3);
        assert!(!meta.has_next);
        assert!(meta.has_prev);
    }
}
