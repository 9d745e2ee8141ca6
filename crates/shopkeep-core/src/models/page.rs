use serde::{Deserialize, Serialize};

/// Default page size used by the list endpoints
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// List envelope returned by every paginated endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub total: u64,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> Page<T> {
    /// Number of pages at `limit` items per page.
    pub fn page_count(&self, limit: u32) -> u64 {
        if limit == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(limit))
    }
}

/// Pagination plus free-form filters (`name`, `status`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub filters: Vec<(String, String)>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            filters: Vec::new(),
        }
    }
}

impl ListQuery {
    pub fn page(page: u32) -> Self {
        Self {
            page: page.max(1),
            ..Self::default()
        }
    }

    pub fn filter(mut self, key: &str, value: &str) -> Self {
        self.filters.push((key.to_string(), value.to_string()));
        self
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        pairs.extend(self.filters.iter().cloned());
        pairs
    }
}
