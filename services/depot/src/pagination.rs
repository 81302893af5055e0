//! Marker + limit pagination for listing endpoints.
//!
//! Turning a request into SQL is a pure function: [`build_page_query`] maps an
//! [`Ordering`], an optional [`Marker`] and a limit to a `WHERE` fragment, its
//! bind values, an `ORDER BY` clause and the number of rows to fetch. The
//! caller splices these into its own statement, fetches `limit + 1` rows and
//! hands them to [`Page::from_probe`], which drops the probe row and records
//! whether the listing was truncated.
//!
//! The last column of every [`Ordering`] must be unique within the listed
//! scope, which makes the order total: a client resuming from a marker never
//! sees a row twice and never skips one, even while rows that sort after the
//! marker are being inserted.

use std::collections::HashMap;

use crate::error::{DepotError, DepotResult};

/// Default (and maximum) number of items in a page.
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 1000;

/// Columns which define the order of a listing, most significant first.
///
/// Column names are spliced into SQL, so they are only accepted as `'static`
/// strings written in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ordering {
    columns: &'static [&'static str],
}

impl Ordering {
    /// An ordering over `columns`; the last column must be a unique key.
    pub const fn new(columns: &'static [&'static str]) -> Self {
        Self { columns }
    }

    /// The ordering columns.
    pub fn columns(&self) -> &'static [&'static str] {
        self.columns
    }
}

/// The key of the last item a client has seen, one value per ordering column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker(Vec<String>);

impl Marker {
    /// A marker for a single-column ordering.
    pub fn single(value: impl Into<String>) -> Self {
        Marker(vec![value.into()])
    }

    /// A marker for a composite ordering.
    pub fn composite<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Marker(values.into_iter().map(Into::into).collect())
    }

    /// The marker values in ordering-column order.
    pub fn values(&self) -> &[String] {
        &self.0
    }
}

/// `limit` and `marker` as sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of items to return.
    pub limit: u32,
    /// Resume strictly after this key.
    pub marker: Option<String>,
}

impl PageRequest {
    /// Parse the `limit` and `marker` query parameters.
    ///
    /// A missing `limit`, or one above `max_page_size`, becomes
    /// `max_page_size`. Anything that is not a non-negative integer is a
    /// [`DepotError::BadRequest`]. An empty `marker` is the same as none.
    pub fn from_query(params: &HashMap<String, String>, max_page_size: u32) -> DepotResult<Self> {
        let limit = match params.get("limit") {
            None => max_page_size,
            Some(raw) => {
                let limit: u64 = raw.trim().parse().map_err(|_| {
                    DepotError::BadRequest(format!(
                        "invalid value for \"limit\": {raw:?} is not a non-negative integer"
                    ))
                })?;
                u32::try_from(limit)
                    .unwrap_or(max_page_size)
                    .min(max_page_size)
            }
        };

        let marker = params
            .get("marker")
            .filter(|marker| !marker.is_empty())
            .cloned();

        Ok(Self { limit, marker })
    }

    /// Build the query for a listing ordered by a single unique column.
    pub fn query(&self, ordering: &Ordering) -> DepotResult<PageQuery> {
        let marker = self.marker.as_deref().map(Marker::single);
        build_page_query(ordering, marker.as_ref(), self.limit)
    }
}

/// The SQL fragments for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// Condition selecting rows strictly after the marker, or `None` for the first page.
    pub where_clause: Option<String>,
    /// Values for the `?` placeholders of `where_clause`, in order.
    pub binds: Vec<String>,
    /// `ORDER BY` body, e.g. `name ASC, digest ASC`.
    pub order_by: String,
    /// Rows to fetch: the page size plus one probe row.
    pub fetch_limit: i64,
    /// Rows to return.
    pub limit: usize,
}

impl PageQuery {
    /// `where_clause` prefixed with `AND`, for appending to an existing condition.
    pub fn and_where(&self) -> String {
        match &self.where_clause {
            Some(clause) => format!(" AND ({clause})"),
            None => String::new(),
        }
    }
}

/// Build the page query for `ordering`, resuming after `marker`.
///
/// For columns `a, b` and marker `(x, y)` the condition is
/// `(a > ?) OR (a = ? AND b > ?)` with binds `x, x, y`.
pub fn build_page_query(
    ordering: &Ordering,
    marker: Option<&Marker>,
    limit: u32,
) -> DepotResult<PageQuery> {
    let columns = ordering.columns();
    if columns.is_empty() {
        return Err(DepotError::BadRequest(
            "listing has no ordering columns".into(),
        ));
    }

    let order_by = columns
        .iter()
        .map(|column| format!("{column} ASC"))
        .collect::<Vec<_>>()
        .join(", ");

    let (where_clause, binds) = match marker {
        None => (None, Vec::new()),
        Some(marker) => {
            let values = marker.values();
            if values.len() != columns.len() {
                return Err(DepotError::BadRequest(format!(
                    "marker has {} components, expected {}",
                    values.len(),
                    columns.len()
                )));
            }

            let mut disjuncts = Vec::with_capacity(columns.len());
            let mut binds = Vec::new();
            for (depth, column) in columns.iter().enumerate() {
                let mut terms: Vec<String> = columns[..depth]
                    .iter()
                    .map(|prefix| format!("{prefix} = ?"))
                    .collect();
                terms.push(format!("{column} > ?"));
                binds.extend(values[..=depth].iter().cloned());
                disjuncts.push(format!("({})", terms.join(" AND ")));
            }
            (Some(disjuncts.join(" OR ")), binds)
        }
    };

    Ok(PageQuery {
        where_clause,
        binds,
        order_by,
        fetch_limit: i64::from(limit) + 1,
        limit: limit as usize,
    })
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// The items on this page, in listing order.
    pub items: Vec<T>,
    /// Whether more items follow this page.
    pub truncated: bool,
}

impl<T> Page<T> {
    /// Build a page from rows fetched with [`PageQuery::fetch_limit`].
    pub fn from_probe(mut rows: Vec<T>, limit: usize) -> Self {
        let truncated = rows.len() > limit;
        rows.truncate(limit);
        Self {
            items: rows,
            truncated,
        }
    }

    /// Transform the items, keeping the truncation flag.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            truncated: self.truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BY_DIGEST: Ordering = Ordering::new(&["digest"]);
    const BY_REPO_AND_NAME: Ordering = Ordering::new(&["repo_name", "name"]);

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn limit_defaults_to_max_page_size() {
        let request = PageRequest::from_query(&params(&[]), 1000).unwrap();
        assert_eq!(request.limit, 1000);
        assert_eq!(request.marker, None);
    }

    #[test]
    fn limit_is_capped() {
        let request = PageRequest::from_query(&params(&[("limit", "5000")]), 1000).unwrap();
        assert_eq!(request.limit, 1000);

        let request =
            PageRequest::from_query(&params(&[("limit", "99999999999999")]), 1000).unwrap();
        assert_eq!(request.limit, 1000);
    }

    #[test]
    fn invalid_limit_is_bad_request() {
        for raw in ["-1", "ten", "1.5", ""] {
            let err = PageRequest::from_query(&params(&[("limit", raw)]), 1000).unwrap_err();
            assert!(matches!(err, DepotError::BadRequest(_)), "limit={raw:?}");
        }
    }

    #[test]
    fn zero_limit_is_allowed() {
        let request = PageRequest::from_query(&params(&[("limit", "0")]), 1000).unwrap();
        let query = request.query(&BY_DIGEST).unwrap();
        assert_eq!(query.limit, 0);
        assert_eq!(query.fetch_limit, 1);
    }

    #[test]
    fn first_page_has_no_condition() {
        let query = build_page_query(&BY_DIGEST, None, 5).unwrap();
        assert_eq!(query.where_clause, None);
        assert!(query.binds.is_empty());
        assert_eq!(query.order_by, "digest ASC");
        assert_eq!(query.fetch_limit, 6);
        assert_eq!(query.and_where(), "");
    }

    #[test]
    fn single_column_marker() {
        let query = build_page_query(&BY_DIGEST, Some(&Marker::single("sha256:05")), 5).unwrap();
        assert_eq!(query.where_clause.as_deref(), Some("(digest > ?)"));
        assert_eq!(query.binds, vec!["sha256:05".to_string()]);
        assert_eq!(query.and_where(), " AND ((digest > ?))");
    }

    #[test]
    fn composite_marker_breaks_ties_on_the_unique_column() {
        let marker = Marker::composite(["library/alpine", "latest"]);
        let query = build_page_query(&BY_REPO_AND_NAME, Some(&marker), 10).unwrap();
        assert_eq!(
            query.where_clause.as_deref(),
            Some("(repo_name > ?) OR (repo_name = ? AND name > ?)")
        );
        assert_eq!(
            query.binds,
            vec!["library/alpine", "library/alpine", "latest"]
        );
        assert_eq!(query.order_by, "repo_name ASC, name ASC");
    }

    #[test]
    fn marker_arity_must_match_ordering() {
        let err = build_page_query(&BY_REPO_AND_NAME, Some(&Marker::single("x")), 10).unwrap_err();
        assert!(matches!(err, DepotError::BadRequest(_)));
    }

    #[test]
    fn probe_row_sets_truncated() {
        let page = Page::from_probe((1..=6).collect::<Vec<_>>(), 5);
        assert_eq!(page.items, vec![1, 2, 3, 4, 5]);
        assert!(page.truncated);

        let page = Page::from_probe((6..=10).collect::<Vec<_>>(), 5);
        assert_eq!(page.items.len(), 5);
        assert!(!page.truncated);
    }

    /// Applies a page query to an in-memory sorted list the way SQLite would.
    fn run(items: &[&str], query: &PageQuery) -> Page<String> {
        let rows: Vec<String> = items
            .iter()
            .filter(|item| query.binds.first().is_none_or(|marker| **item > marker.as_str()))
            .take(query.fetch_limit as usize)
            .map(|item| item.to_string())
            .collect();
        Page::from_probe(rows, query.limit)
    }

    #[test]
    fn walking_with_limit_one_visits_every_item_once() {
        let items: Vec<String> = (0..10).map(|i| format!("sha256:{i:02}")).collect();
        let items: Vec<&str> = items.iter().map(String::as_str).collect();

        let mut seen = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let request = PageRequest { limit: 1, marker };
            let page = run(&items, &request.query(&BY_DIGEST).unwrap());
            seen.extend(page.items.iter().cloned());
            if !page.truncated {
                break;
            }
            marker = page.items.last().cloned();
        }

        assert_eq!(seen, items);
    }
}
