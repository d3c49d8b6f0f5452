use crate::models::{CourseRecord, QualityLabel};

pub const PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LabelFilter {
    #[default]
    All,
    NeedsImprovement,
    Acceptable,
    Excellent,
}

impl LabelFilter {
    pub fn label(self) -> Option<QualityLabel> {
        match self {
            LabelFilter::All => None,
            LabelFilter::NeedsImprovement => Some(QualityLabel::NeedsImprovement),
            LabelFilter::Acceptable => Some(QualityLabel::Acceptable),
            LabelFilter::Excellent => Some(QualityLabel::Excellent),
        }
    }

    pub fn matches(self, record: &CourseRecord) -> bool {
        self.label()
            .map_or(true, |label| record.quality_label == label)
    }
}

pub fn filter_by_label(records: &[CourseRecord], filter: LabelFilter) -> Vec<&CourseRecord> {
    records
        .iter()
        .filter(|record| filter.matches(record))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<'a, T> {
    pub items: &'a [T],
    /// 1-based, always within `1..=total_pages`.
    pub number: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

/// Slices out the requested page, clamping the page number into range.
/// An empty input is one empty page.
pub fn paginate<T>(items: &[T], page_size: usize, requested: usize) -> Page<'_, T> {
    let page_size = page_size.max(1);
    let total_pages = items.len().div_ceil(page_size).max(1);
    let number = requested.clamp(1, total_pages);
    let start = (number - 1) * page_size;
    let end = (start + page_size).min(items.len());

    Page {
        items: &items[start.min(end)..end],
        number,
        total_pages,
        total_items: items.len(),
    }
}

/// Filter and page selection for the historical course table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableState {
    filter: LabelFilter,
    page: usize,
}

impl Default for TableState {
    fn default() -> Self {
        Self {
            filter: LabelFilter::All,
            page: 1,
        }
    }
}

impl TableState {
    pub fn filter(&self) -> LabelFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: LabelFilter) {
        if self.filter != filter {
            self.filter = filter;
            self.page = 1;
        }
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page;
    }

    pub fn view<'a>(&self, records: &'a [CourseRecord]) -> TableView<'a> {
        let filtered = filter_by_label(records, self.filter);
        let page = paginate(&filtered, PAGE_SIZE, self.page);

        TableView {
            rows: page.items.to_vec(),
            number: page.number,
            total_pages: page.total_pages,
            total_items: page.total_items,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableView<'a> {
    pub rows: Vec<&'a CourseRecord>,
    pub number: usize,
    pub total_pages: usize,
    pub total_items: usize,
}
