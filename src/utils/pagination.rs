use serde::Serialize;

use crate::error::{AppError, AppResult};

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Page-number pagination used by the back-office listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PagePagination {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub pages: i64,
}

impl PagePagination {
    pub fn new(total: i64, page: i64, limit: i64) -> Self {
        let limit = limit.max(1);
        Self {
            total,
            page,
            limit,
            pages: (total + limit - 1) / limit,
        }
    }
}

/// Resolves optional `page` / `limit` query values into `(page, limit, offset)`.
/// A page whose offset does not fit an `i64` is rejected as a `page` error.
pub fn resolve(page: Option<i64>, limit: Option<i64>) -> AppResult<(i64, i64, i64)> {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let offset = (page - 1)
        .checked_mul(limit)
        .ok_or_else(|| AppError::invalid_field("page", "Seite ist zu groß"))?;
    Ok((page, limit, offset))
}
