//! Query strings for the hosted REST data API and the headers it speaks.

use hostel_core::error::{HostelError, Result};
use reqwest::Url;

/// Prefix under which tables are exposed.
pub const REST_PREFIX: &str = "rest/v1";

/// Header carrying the publishable project key.
pub const API_KEY_HEADER: &str = "apikey";

/// Ask the server to report the total row count in `Content-Range`.
pub const PREFER_COUNT_EXACT: (&str, &str) = ("Prefer", "count=exact");

/// Ask the server to echo written rows back.
pub const PREFER_RETURN_REPRESENTATION: (&str, &str) = ("Prefer", "return=representation");

/// One page of rows plus the total the server reported, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
}

/// A read or write against one table.
///
/// ```
/// use hostel_data::postgrest::Query;
///
/// let q = Query::table("entry_logs").order_desc("timestamp").limit(100);
/// assert_eq!(
///     q.path_and_query(),
///     "rest/v1/entry_logs?select=*&order=timestamp.desc&limit=100"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    params: Vec<(String, String)>,
}

impl Query {
    /// Select every column of `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            params: vec![("select".to_string(), "*".to_string())],
        }
    }

    /// Table without the `select` parameter (for writes and deletes).
    pub fn write(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            params: Vec::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn filter(mut self, column: &str, op: &str, value: impl std::fmt::Display) -> Self {
        self.params.push((column.to_string(), format!("{op}.{value}")));
        self
    }

    pub fn eq(self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filter(column, "eq", value)
    }

    pub fn gte(self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filter(column, "gte", value)
    }

    pub fn lte(self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filter(column, "lte", value)
    }

    pub fn lt(self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filter(column, "lt", value)
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.params.push(("order".to_string(), format!("{column}.desc")));
        self
    }

    /// Replace any previous limit.
    pub fn limit(mut self, n: u64) -> Self {
        self.params.retain(|(k, _)| k != "limit");
        self.params.push(("limit".to_string(), n.to_string()));
        self
    }

    /// Replace any previous offset.
    pub fn offset(mut self, n: u64) -> Self {
        self.params.retain(|(k, _)| k != "offset");
        self.params.push(("offset".to_string(), n.to_string()));
        self
    }

    /// Unencoded relative path, for logs and tests.
    pub fn path_and_query(&self) -> String {
        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        if query.is_empty() {
            format!("{REST_PREFIX}/{}", self.table)
        } else {
            format!("{REST_PREFIX}/{}?{query}", self.table)
        }
    }

    /// Absolute, percent-encoded URL under `base`.
    pub fn url(&self, base: &str) -> Result<String> {
        let mut url = parse_base(base)?
            .join(&format!("{REST_PREFIX}/{}", self.table))
            .map_err(|e| HostelError::Config(format!("invalid table path: {e}")))?;
        if !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url.to_string())
    }
}

/// Parse a base URL, making sure relative joins keep its path.
pub fn parse_base(base: &str) -> Result<Url> {
    let with_slash = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    Url::parse(&with_slash).map_err(|e| HostelError::Config(format!("invalid base URL {base:?}: {e}")))
}

/// Extract the total from a `Content-Range` header such as `0-24/573`.
///
/// Returns `None` for an unknown total (`0-24/*`) or a malformed value.
pub fn parse_content_range(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}
