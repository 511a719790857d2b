//! Offset pagination types for the query layer

use serde::{Deserialize, Serialize};

/// Pagination request parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Rows to skip from the start of the sorted, filtered result
    pub skip: usize,
    /// Maximum rows to return
    pub limit: usize,
}

impl PageRequest {
    /// Create a new page request
    ///
    /// # Examples
    ///
    /// ```
    /// use core_sync::PageRequest;
    ///
    /// let request = PageRequest::new(40, 20);
    /// assert_eq!(request.skip, 40);
    /// assert_eq!(request.limit, 20);
    /// ```
    pub fn new(skip: usize, limit: usize) -> Self {
        Self { skip, limit }
    }

    /// Request for the page following this one
    pub fn next(&self) -> Self {
        Self {
            skip: self.skip.saturating_add(self.limit),
            limit: self.limit,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { skip: 0, limit: 50 }
    }
}

/// One page of rows plus the total row count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Rows in the current page
    pub items: Vec<T>,
    /// Rows matching the filter across all pages
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    /// Cut the page described by `request` out of the complete, already
    /// sorted row set
    ///
    /// # Examples
    ///
    /// ```
    /// use core_sync::{Page, PageRequest};
    ///
    /// let page = Page::slice((0..25).collect(), PageRequest::new(20, 10));
    /// assert_eq!(page.items, vec![20, 21, 22, 23, 24]);
    /// assert_eq!(page.total, 25);
    /// assert!(!page.has_next());
    /// ```
    pub fn slice(rows: Vec<T>, request: PageRequest) -> Self {
        let total = rows.len();
        let items = rows
            .into_iter()
            .skip(request.skip)
            .take(request.limit)
            .collect();

        Self {
            items,
            total,
            skip: request.skip,
            limit: request.limit,
        }
    }

    /// Check if there are rows after this page
    pub fn has_next(&self) -> bool {
        self.skip.saturating_add(self.items.len()) < self.total
    }

    /// Check if there are rows before this page
    pub fn has_previous(&self) -> bool {
        self.skip > 0
    }

    /// Map the items to a different type
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            skip: self.skip,
            limit: self.limit,
        }
    }
}
