//! Keyset pagination
//!
//! Pages are addressed by id boundaries instead of offsets. Moving forward
//! uses the id of the last row on the current page as an exclusive lower
//! bound; moving backward reads the boundary recorded when that page was
//! first reached.
//!
//! Where no boundary is known (a jump to an unvisited page, or a sort on
//! something other than `id`) the controller falls back to over-fetching
//! `page * page_size` rows and keeping the tail.

use serde::{Deserialize, Serialize};
use vecscope_common::{Document, Result, ScopeError, Value};

/// How a page is fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum PageStrategy {
    /// Rank by id starting after `cursor` (from the start when `None`).
    Cursor(Option<Value>),
    /// Fetch `top_k` rows from the start and drop the first `skip`.
    Overfetch { top_k: usize, skip: usize },
}

/// Result of planning a page transition.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePlan {
    pub page: usize,
    pub strategy: PageStrategy,
    /// Whether rows are ordered by id, so boundaries can be recorded.
    pub keyset: bool,
}

impl PagePlan {
    /// Number of rows to request from the backend.
    pub fn top_k(&self, page_size: usize) -> usize {
        match self.strategy {
            PageStrategy::Cursor(_) => page_size,
            PageStrategy::Overfetch { top_k, .. } => top_k,
        }
    }

    pub fn cursor(&self) -> Option<&Value> {
        match &self.strategy {
            PageStrategy::Cursor(cursor) => cursor.as_ref(),
            PageStrategy::Overfetch { .. } => None,
        }
    }
}

/// Pagination state carried in the query state.
///
/// `previous_cursors[i]` is the boundary between page `i + 1` and page
/// `i + 2`. `next_cursor` is the id of the last row of the current page, or
/// `None` once a short page signalled the end of the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: usize,
    pub page_size: usize,
    pub next_cursor: Option<Value>,
    pub previous_cursors: Vec<Value>,
}

impl Pagination {
    pub fn new(page_size: usize) -> Self {
        Self {
            current_page: 1,
            page_size: page_size.max(1),
            next_cursor: None,
            previous_cursors: Vec::new(),
        }
    }

    /// Back to page 1 with no cursors.
    pub fn reset(&mut self) {
        self.current_page = 1;
        self.next_cursor = None;
        self.previous_cursors.clear();
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }

    pub fn has_next(&self, total_pages: Option<usize>) -> bool {
        self.next_cursor.is_some() && total_pages.is_none_or(|total| self.current_page < total)
    }

    /// Decide how to fetch `requested`.
    ///
    /// `keyset` is true when rows are ranked by id. `max_overfetch` bounds
    /// the fallback.
    pub fn plan(
        &self,
        requested: usize,
        keyset: bool,
        total_pages: Option<usize>,
        max_overfetch: usize,
    ) -> Result<PagePlan> {
        if requested == 0 {
            return Err(ScopeError::InvalidOperation("pages are numbered from 1".into()));
        }
        if let Some(total) = total_pages
            && requested > total.max(1)
        {
            return Err(ScopeError::InvalidOperation(format!(
                "page {requested} is past the last page ({total})"
            )));
        }

        if keyset {
            if requested == 1 {
                return Ok(self.cursor_plan(requested, None));
            }
            if let Some(boundary) = self.previous_cursors.get(requested - 2) {
                return Ok(self.cursor_plan(requested, Some(boundary.clone())));
            }
            if requested == self.current_page + 1 {
                return match &self.next_cursor {
                    Some(cursor) => Ok(self.cursor_plan(requested, Some(cursor.clone()))),
                    None => Err(ScopeError::InvalidOperation(
                        "no more documents after this page".into(),
                    )),
                };
            }
        }

        let top_k = requested.saturating_mul(self.page_size);
        if top_k > max_overfetch {
            return Err(ScopeError::InvalidOperation(format!(
                "page {requested} needs {top_k} rows, more than the {max_overfetch} row limit; \
                 navigate page by page instead"
            )));
        }
        Ok(PagePlan {
            page: requested,
            strategy: PageStrategy::Overfetch {
                top_k,
                skip: (requested - 1) * self.page_size,
            },
            keyset,
        })
    }

    fn cursor_plan(&self, page: usize, cursor: Option<Value>) -> PagePlan {
        PagePlan {
            page,
            strategy: PageStrategy::Cursor(cursor),
            keyset: true,
        }
    }

    /// Record the outcome of a fetch and return the rows of the page.
    ///
    /// `fetched` is everything the backend returned for `plan`.
    pub fn commit(&mut self, plan: &PagePlan, fetched: Vec<Document>) -> Vec<Document> {
        self.current_page = plan.page;

        let rows = match &plan.strategy {
            PageStrategy::Cursor(cursor) => {
                if let Some(cursor) = cursor {
                    self.record_boundary(plan.page - 1, cursor.clone());
                }
                fetched
            }
            PageStrategy::Overfetch { skip, .. } => {
                if plan.keyset {
                    for page in 1..plan.page {
                        let last = page * self.page_size - 1;
                        match fetched.get(last) {
                            Some(doc) => self.record_boundary(page, doc.id.clone()),
                            None => break,
                        }
                    }
                }
                fetched.into_iter().skip(*skip).collect()
            }
        };

        self.next_cursor = if rows.len() < self.page_size {
            None
        } else {
            rows.last().map(|doc| doc.id.clone())
        };
        rows
    }

    /// Move onto a page whose rows were served from the cache.
    pub fn restore(&mut self, plan: &PagePlan, next_cursor: Option<Value>) {
        self.current_page = plan.page;
        if let PageStrategy::Cursor(Some(cursor)) = &plan.strategy {
            self.record_boundary(plan.page - 1, cursor.clone());
        }
        self.next_cursor = next_cursor;
    }

    /// Store the boundary between `page` and `page + 1`.
    fn record_boundary(&mut self, page: usize, boundary: Value) {
        let idx = page - 1;
        if idx < self.previous_cursors.len() {
            self.previous_cursors[idx] = boundary;
        } else if idx == self.previous_cursors.len() {
            self.previous_cursors.push(boundary);
        }
    }
}

/// `ceil(total_count / page_size)`, never less than one page.
pub fn total_pages(total_count: u64, page_size: usize) -> usize {
    let page_size = page_size.max(1) as u64;
    total_count.div_ceil(page_size).max(1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn docs(ids: std::ops::Range<i64>) -> Vec<Document> {
        ids.map(Document::new).collect()
    }

    #[test]
    fn test_forward_records_boundaries() {
        let mut p = Pagination::new(3);
        let plan = p.plan(1, true, None, 100).expect("page 1");
        assert_eq!(plan.strategy, PageStrategy::Cursor(None));
        p.commit(&plan, docs(1..4));
        assert_eq!(p.next_cursor, Some(Value::Int(3)));

        let plan = p.plan(2, true, None, 100).expect("page 2");
        assert_eq!(plan.cursor(), Some(&Value::Int(3)));
        p.commit(&plan, docs(4..7));
        assert_eq!(p.previous_cursors, vec![Value::Int(3)]);

        let plan = p.plan(3, true, None, 100).expect("page 3");
        p.commit(&plan, docs(7..10));
        assert_eq!(p.previous_cursors, vec![Value::Int(3), Value::Int(6)]);
        assert_eq!(p.current_page, 3);
    }

    #[test]
    fn test_backward_uses_stack() {
        let mut p = Pagination::new(2);
        for (page, ids) in [(1, 1..3), (2, 3..5), (3, 5..7)] {
            let plan = p.plan(page, true, None, 100).expect("forward");
            p.commit(&plan, docs(ids));
        }

        let back = p.plan(2, true, None, 100).expect("back to 2");
        assert_eq!(back.cursor(), Some(&Value::Int(2)));

        let first = p.plan(1, true, None, 100).expect("back to 1");
        assert_eq!(first.strategy, PageStrategy::Cursor(None));
    }

    #[test]
    fn test_short_page_ends_data() {
        let mut p = Pagination::new(5);
        let plan = p.plan(1, true, None, 100).expect("page 1");
        p.commit(&plan, docs(1..3));
        assert_eq!(p.next_cursor, None);
        assert!(!p.has_next(None));
        assert!(p.plan(2, true, None, 100).is_err());
    }

    #[test]
    fn test_total_pages_bound() {
        let mut p = Pagination::new(2);
        let plan = p.plan(1, true, Some(1), 100).expect("page 1");
        p.commit(&plan, docs(1..3));
        assert!(!p.has_next(Some(1)));
        assert!(p.plan(2, true, Some(1), 100).is_err());
        assert!(p.plan(0, true, None, 100).is_err());
    }

    #[test]
    fn test_jump_falls_back_to_overfetch() {
        let mut p = Pagination::new(2);
        let plan = p.plan(3, true, None, 100).expect("jump");
        assert_eq!(plan.strategy, PageStrategy::Overfetch { top_k: 6, skip: 4 });

        let rows = p.commit(&plan, docs(1..7));
        assert_eq!(rows, docs(5..7));
        assert_eq!(p.previous_cursors, vec![Value::Int(2), Value::Int(4)]);
        assert_eq!(p.next_cursor, Some(Value::Int(6)));

        let back = p.plan(2, true, None, 100).expect("back");
        assert_eq!(back.cursor(), Some(&Value::Int(2)));
    }

    #[test]
    fn test_overfetch_limit() {
        let p = Pagination::new(50);
        assert!(p.plan(30, false, None, 1200).is_err());
        let plan = p.plan(2, false, None, 1200).expect("non-id sort");
        assert!(!plan.keyset);
        assert_eq!(plan.top_k(50), 100);
    }

    #[test]
    fn test_restore_from_cache() {
        let mut p = Pagination::new(2);
        let plan = p.plan(1, true, None, 100).expect("page 1");
        p.commit(&plan, docs(1..3));

        let plan = p.plan(2, true, None, 100).expect("page 2");
        p.restore(&plan, Some(Value::Int(4)));
        assert_eq!(p.current_page, 2);
        assert_eq!(p.previous_cursors, vec![Value::Int(2)]);
        assert_eq!(p.next_cursor, Some(Value::Int(4)));
    }

    #[test]
    fn test_reset() {
        let mut p = Pagination::new(2);
        let plan = p.plan(1, true, None, 100).expect("page 1");
        p.commit(&plan, docs(1..3));
        let plan = p.plan(2, true, None, 100).expect("page 2");
        p.commit(&plan, docs(3..5));
        p.reset();
        assert_eq!(p, Pagination::new(2));
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }
}
