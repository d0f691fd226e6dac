//! Search filters and pagination.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use archive_core::{CategoryId, IdentityId};

use crate::access::{Clause, Predicate};
use crate::record::{Confidentiality, DocumentRecord, DocumentStatus};

/// User-supplied search criteria. Always ANDed with the caller's access scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentFilter {
    pub document_type: Option<String>,
    pub status: Option<DocumentStatus>,
    pub financial_year: Option<i32>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub amount_from: Option<i64>,
    pub amount_to: Option<i64>,
    pub prepared_by: Option<IdentityId>,
    pub confidentiality: Option<Confidentiality>,
    pub tag: Option<String>,
    pub text: Option<String>,
    pub category_id: Option<CategoryId>,
    /// Widen `category_id` to documents filed under it as a subcategory.
    pub include_subcategories: bool,
}

impl DocumentFilter {
    pub fn to_predicate(&self) -> Predicate {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let clauses = [
            non_blank(&self.document_type).map(Clause::DocumentTypeIs),
            self.status.map(Clause::StatusIs),
            self.financial_year.map(Clause::FinancialYearIs),
            self.date_from.map(Clause::DateFrom),
            self.date_to.map(Clause::DateTo),
            self.amount_from.map(Clause::AmountFrom),
            self.amount_to.map(Clause::AmountTo),
            self.prepared_by.map(Clause::PreparedBy),
            self.confidentiality.map(Clause::ConfidentialityIs),
            non_blank(&self.tag).map(Clause::TagIs),
            non_blank(&self.text).map(Clause::TextContains),
        ];
        let category = self
            .category_id
            .map(|id| in_category(id, self.include_subcategories));
        Predicate::all(
            clauses
                .into_iter()
                .flatten()
                .map(Predicate::from)
                .chain(category),
        )
    }
}

/// Documents filed under `category`; with `include_subcategories` also those whose
/// subcategory is `category`.
pub fn in_category(category: CategoryId, include_subcategories: bool) -> Predicate {
    let direct = Predicate::from(Clause::CategoryIs(category));
    if include_subcategories {
        direct.or(Clause::SubcategoryIs(category).into())
    } else {
        direct
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn new(number: usize, size: usize) -> Self {
        Self {
            number: number.max(1),
            size: size.max(1),
        }
    }

    pub fn offset(&self) -> usize {
        (self.number - 1).saturating_mul(self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

/// Listing order: newest document date first, then number descending.
pub fn listing_order(a: &DocumentRecord, b: &DocumentRecord) -> Ordering {
    b.fields()
        .document_date
        .cmp(&a.fields().document_date)
        .then_with(|| b.number().cmp(a.number()))
}

/// Sort and cut one page out of the already-scoped matches.
pub fn paginate(mut records: Vec<DocumentRecord>, page: Page) -> SearchPage<DocumentRecord> {
    records.sort_by(listing_order);
    let total = records.len();
    let items = records
        .into_iter()
        .skip(page.offset())
        .take(page.size)
        .collect();
    SearchPage {
        items,
        total,
        page: page.number,
        per_page: page.size,
        total_pages: total.div_ceil(page.size),
    }
}
