//! Pagination parameters and paginated results shared by every listing.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  #[default]
  Asc,
  Desc,
}

impl SortOrder {
  pub fn as_sql(self) -> &'static str {
    match self {
      SortOrder::Asc => "ASC",
      SortOrder::Desc => "DESC",
    }
  }
}

/// Page request. Out-of-range values are clamped by [`Page::normalized`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Page {
  pub page:      u32,
  pub page_size: u32,
  pub sort:      Option<String>,
  pub order:     SortOrder,
  pub search:    Option<String>,
}

impl Default for Page {
  fn default() -> Self {
    Self {
      page:      1,
      page_size: DEFAULT_PAGE_SIZE,
      sort:      None,
      order:     SortOrder::Asc,
      search:    None,
    }
  }
}

impl Page {
  /// Clamp `page` to at least 1 and `page_size` into `1..=200`. A zero page
  /// size falls back to the default; blank search strings are dropped.
  pub fn normalized(mut self) -> Self {
    if self.page < 1 {
      self.page = 1;
    }
    if self.page_size < 1 {
      self.page_size = DEFAULT_PAGE_SIZE;
    }
    if self.page_size > MAX_PAGE_SIZE {
      self.page_size = MAX_PAGE_SIZE;
    }
    self.search = self
      .search
      .map(|s| s.trim().to_owned())
      .filter(|s| !s.is_empty());
    self
  }

  pub fn offset(&self) -> usize {
    (self.page.max(1) as usize - 1) * self.limit()
  }

  pub fn limit(&self) -> usize { self.page_size.clamp(1, MAX_PAGE_SIZE) as usize }

  /// The requested sort column if it is one of `allowed`, else `default`.
  pub fn sort_or<'a>(&'a self, allowed: &[&'a str], default: &'a str) -> &'a str {
    match self.sort.as_deref() {
      Some(s) if allowed.contains(&s) => s,
      _ => default,
    }
  }
}

/// One page of results plus totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
  pub data:        Vec<T>,
  pub total:       u64,
  pub page:        u32,
  pub page_size:   u32,
  pub total_pages: u32,
}

impl<T> Paginated<T> {
  pub fn new(data: Vec<T>, total: u64, page: &Page) -> Self {
    let size = page.limit() as u64;
    Self {
      data,
      total,
      page: page.page.max(1),
      page_size: size as u32,
      total_pages: total.div_ceil(size) as u32,
    }
  }

  /// Slice an already filtered and sorted in-memory collection.
  pub fn from_vec(items: Vec<T>, page: &Page) -> Self {
    let total = items.len() as u64;
    let data = items
      .into_iter()
      .skip(page.offset())
      .take(page.limit())
      .collect();
    Self::new(data, total, page)
  }
}
