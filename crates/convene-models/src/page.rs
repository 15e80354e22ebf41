use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Clamp the limit into `1..=max_limit`.
    pub fn clamped(self, max_limit: usize) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit.clamp(1, max_limit.max(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub next_offset: Option<usize>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            next_offset: None,
        }
    }

    /// Slice an already ordered result set.
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let items: Vec<T> = all
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect();
        let end = request.offset.saturating_add(items.len());
        let next_offset = if end < total { Some(end) } else { None };
        Self {
            items,
            total,
            next_offset,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            next_offset: self.next_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_through_results() {
        let first = Page::from_sorted((0..5).collect::<Vec<_>>(), PageRequest::new(0, 2));
        assert_eq!(first.items, vec![0, 1]);
        assert_eq!(first.total, 5);
        assert_eq!(first.next_offset, Some(2));

        let last = Page::from_sorted((0..5).collect::<Vec<_>>(), PageRequest::new(4, 2));
        assert_eq!(last.items, vec![4]);
        assert_eq!(last.next_offset, None);
    }

    #[test]
    fn offset_past_end_is_empty() {
        let page = Page::from_sorted(vec![1, 2], PageRequest::new(10, 5));
        assert!(page.items.is_empty());
        assert_eq!(page.total, 2);
        assert_eq!(page.next_offset, None);
    }

    #[test]
    fn clamp_limits_zero_and_oversized_requests() {
        assert_eq!(PageRequest::new(0, 0).clamped(100).limit, 1);
        assert_eq!(PageRequest::new(0, 1_000).clamped(100).limit, 100);
    }
}
