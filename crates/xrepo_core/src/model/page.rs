//! Pagination value types.
//!
//! # Invariants
//! - `total_page == ceil(total_row / page_size)` whenever `total_row` is known.
//! - `PageRequest` can only be built with `page >= 1` and `page_size >= 1`.
//! - `page_size` and the derived offset both fit a SQLite integer.

use crate::repo::error::{RepoError, RepoResult};
use serde::Serialize;

/// Largest value SQLite accepts for `LIMIT`/`OFFSET`.
pub(crate) const MAX_SQL_INTEGER: u64 = i64::MAX as u64;

/// Validated 1-based page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u64,
    page_size: u64,
}

impl PageRequest {
    pub fn new(page: u64, page_size: u64) -> RepoResult<Self> {
        if page < 1 {
            return Err(RepoError::Argument(format!(
                "page must be >= 1, got {page}"
            )));
        }
        if page_size < 1 {
            return Err(RepoError::Argument(format!(
                "page_size must be >= 1, got {page_size}"
            )));
        }
        if page_size > MAX_SQL_INTEGER {
            return Err(RepoError::Argument(format!(
                "page_size must be <= {MAX_SQL_INTEGER}, got {page_size}"
            )));
        }
        let offset = (page - 1).checked_mul(page_size);
        if offset.map_or(true, |offset| offset > MAX_SQL_INTEGER) {
            return Err(RepoError::Argument(format!(
                "page {page} of size {page_size} starts beyond row {MAX_SQL_INTEGER}"
            )));
        }
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Rows skipped before this page starts.
    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.page_size
    }
}

/// A slice of a larger result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<E> {
    page: u64,
    page_size: u64,
    total_row: Option<u64>,
    total_page: Option<u64>,
    list: Vec<E>,
}

impl<E> Page<E> {
    /// Page with unknown totals.
    pub fn new(request: PageRequest, list: Vec<E>) -> Self {
        Self {
            page: request.page,
            page_size: request.page_size,
            total_row: None,
            total_page: None,
            list,
        }
    }

    /// Page with a known total row count.
    pub fn of(request: PageRequest, list: Vec<E>, total_row: u64) -> Self {
        let mut page = Self::new(request, list);
        page.set_total_row(total_row);
        page
    }

    /// `page=1, page_size=1, total_row=0, total_page=0` and no elements.
    pub fn empty() -> Self {
        Self {
            page: 1,
            page_size: 1,
            total_row: Some(0),
            total_page: Some(0),
            list: Vec::new(),
        }
    }

    pub fn set_total_row(&mut self, total_row: u64) {
        self.total_row = Some(total_row);
        self.total_page = Some(total_pages(total_row, self.page_size));
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn total_row(&self) -> Option<u64> {
        self.total_row
    }

    pub fn total_page(&self) -> Option<u64> {
        self.total_page
    }

    pub fn list(&self) -> &[E] {
        &self.list
    }

    pub fn into_list(self) -> Vec<E> {
        self.list
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Converts every element, keeping the page coordinates and totals.
    pub fn map<T, F>(self, f: F) -> Page<T>
    where
        F: FnMut(E) -> T,
    {
        Page {
            page: self.page,
            page_size: self.page_size,
            total_row: self.total_row,
            total_page: self.total_page,
            list: self.list.into_iter().map(f).collect(),
        }
    }
}

fn total_pages(total_row: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        0
    } else {
        total_row.div_ceil(page_size)
    }
}
