use serde_json::Value;
use std::collections::HashSet;

/// Page size used by every management page in the console.
pub const PAGE_SIZE: usize = 10;

/// A conjunction of equality filters plus one optional substring search.
/// Records are JSON objects; a missing or non-text field never matches.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    equals: Vec<(String, String)>,
    search: Option<SearchFilter>,
}

#[derive(Debug, Clone)]
struct SearchFilter {
    query: String,
    fields: Vec<String>,
}

/// Filter values meaning "no constraint": empty string or the sentinel "all".
pub fn is_no_constraint(value: &str) -> bool {
    let t = value.trim();
    t.is_empty() || t.eq_ignore_ascii_case("all")
}

fn field_text(record: &Value, field: &str) -> Option<String> {
    match record.get(field) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: &str, value: Option<&str>) -> Self {
        if let Some(v) = value {
            if !is_no_constraint(v) {
                self.equals.push((field.to_string(), v.trim().to_string()));
            }
        }
        self
    }

    pub fn search(mut self, query: Option<&str>, fields: &[&str]) -> Self {
        if let Some(q) = query {
            let t = q.trim();
            if !t.is_empty() {
                self.search = Some(SearchFilter {
                    query: t.to_lowercase(),
                    fields: fields.iter().map(|f| f.to_string()).collect(),
                });
            }
        }
        self
    }

    pub fn matches(&self, record: &Value) -> bool {
        for (field, expected) in &self.equals {
            match field_text(record, field) {
                Some(actual) if actual == *expected => {}
                _ => return false,
            }
        }
        if let Some(search) = &self.search {
            let hit = search.fields.iter().any(|f| {
                field_text(record, f)
                    .map(|text| text.to_lowercase().contains(&search.query))
                    .unwrap_or(false)
            });
            if !hit {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, records: &[Value]) -> Vec<Value> {
        records.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: usize,
    pub total_pages: usize,
    pub total_count: usize,
    pub start: usize,
    pub end: usize,
}

/// Compute the effective page window. The requested page is clamped
/// unconditionally into [1, max(total_pages, 1)], so a filter change can
/// never leave the view on an out-of-range empty page.
pub fn page_window(total_count: usize, page_size: usize, requested_page: usize) -> PageWindow {
    let size = page_size.max(1);
    let total_pages = total_count.div_ceil(size);
    let page = requested_page.max(1).min(total_pages.max(1));
    let start = ((page - 1) * size).min(total_count);
    let end = (start + size).min(total_count);
    PageWindow {
        page,
        total_pages,
        total_count,
        start,
        end,
    }
}

pub fn page_slice(records: &[Value], window: &PageWindow) -> Vec<Value> {
    records[window.start..window.end].to_vec()
}

#[derive(Debug)]
pub struct PagedList {
    pub items: Vec<Value>,
    pub page: usize,
    pub total_pages: usize,
    pub total_count: usize,
}

/// One-shot filter-then-paginate used by the stateless list endpoints.
pub fn paginate(filtered: Vec<Value>, requested_page: usize) -> PagedList {
    let window = page_window(filtered.len(), PAGE_SIZE, requested_page);
    let items = page_slice(&filtered, &window);
    PagedList {
        items,
        page: window.page,
        total_pages: window.total_pages,
        total_count: window.total_count,
    }
}

/// Identifier set backing the bulk-action checkboxes.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    ids: HashSet<String>,
}

impl SelectionSet {
    pub fn toggle(&mut self, id: &str) {
        if !self.ids.remove(id) {
            self.ids.insert(id.to_string());
        }
    }

    /// Select-all adds exactly the identifiers on the visible page, never
    /// the whole filtered set.
    pub fn select_visible<'a, I>(&mut self, visible: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for id in visible {
            self.ids.insert(id.to_string());
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The select-all checkbox state is derived, not stored: checked iff
    /// the visible page is non-empty and fully selected.
    pub fn all_selected(&self, visible: &[String]) -> bool {
        !visible.is_empty() && visible.iter().all(|id| self.ids.contains(id))
    }

    pub fn ids_sorted(&self) -> Vec<String> {
        let mut out: Vec<String> = self.ids.iter().cloned().collect();
        out.sort();
        out
    }

    fn retain_known(&mut self, known: &HashSet<String>) {
        self.ids.retain(|id| known.contains(id));
    }
}

/// State of one management page: the fetched record list, the active
/// filters, the current page, and the bulk selection.
#[derive(Debug)]
pub struct ListController {
    records: Vec<Value>,
    equals: Vec<(String, String)>,
    search_fields: Vec<String>,
    search: String,
    page: usize,
    page_size: usize,
    selection: SelectionSet,
}

impl ListController {
    pub fn new(search_fields: &[&str]) -> Self {
        Self {
            records: Vec::new(),
            equals: Vec::new(),
            search_fields: search_fields.iter().map(|f| f.to_string()).collect(),
            search: String::new(),
            page: 1,
            page_size: PAGE_SIZE,
            selection: SelectionSet::default(),
        }
    }

    /// Replace the data store wholesale (initial fetch or refresh).
    /// Filters and page survive a refresh; the page is re-clamped and the
    /// selection is pruned to identifiers that still exist.
    pub fn set_records(&mut self, records: Vec<Value>) {
        self.records = records;
        let known: HashSet<String> = self
            .records
            .iter()
            .filter_map(|r| r.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()))
            .collect();
        self.selection.retain_known(&known);
        self.page = self.window().page;
    }

    pub fn set_filter(&mut self, field: &str, value: &str) {
        self.equals.retain(|(f, _)| f != field);
        if !is_no_constraint(value) {
            self.equals.push((field.to_string(), value.trim().to_string()));
        }
        self.page = 1;
    }

    pub fn set_search(&mut self, query: &str) {
        self.search = query.trim().to_string();
        self.page = 1;
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page;
        self.page = self.window().page;
    }

    pub fn filter_value(&self, field: &str) -> Option<&str> {
        self.equals
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn search_query(&self) -> &str {
        &self.search
    }

    fn filter_set(&self) -> FilterSet {
        let mut fs = FilterSet::new();
        for (field, value) in &self.equals {
            fs = fs.equals(field, Some(value));
        }
        let fields: Vec<&str> = self.search_fields.iter().map(|f| f.as_str()).collect();
        fs.search(Some(&self.search), &fields)
    }

    pub fn filtered(&self) -> Vec<Value> {
        self.filter_set().apply(&self.records)
    }

    pub fn window(&self) -> PageWindow {
        let fs = self.filter_set();
        let count = self.records.iter().filter(|r| fs.matches(r)).count();
        page_window(count, self.page_size, self.page)
    }

    pub fn visible(&self) -> Vec<Value> {
        let filtered = self.filtered();
        let window = page_window(filtered.len(), self.page_size, self.page);
        page_slice(&filtered, &window)
    }

    pub fn visible_ids(&self) -> Vec<String> {
        self.visible()
            .iter()
            .filter_map(|r| r.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()))
            .collect()
    }

    pub fn toggle_select(&mut self, id: &str) {
        self.selection.toggle(id);
    }

    pub fn select_visible(&mut self) {
        let ids = self.visible_ids();
        self.selection.select_visible(ids.iter().map(|s| s.as_str()));
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selected_ids(&self) -> Vec<String> {
        self.selection.ids_sorted()
    }

    pub fn selection_len(&self) -> usize {
        self.selection.len()
    }

    pub fn all_visible_selected(&self) -> bool {
        self.selection.all_selected(&self.visible_ids())
    }
}
