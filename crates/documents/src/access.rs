//! Access Predicate Engine.
//!
//! Row visibility is a typed AND/OR/NOT tree over document attributes. The same
//! tree is evaluated in memory and rendered to a parameterized SQL `WHERE`
//! fragment, so stores of either kind apply identical rules.
//!
//! Stores only hand out rows through an [`AccessScope`]. The one unrestricted
//! scope is [`AccessScope::privileged`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use archive_core::{CategoryId, DepartmentId, IdentityId};

use crate::record::{AccessLevel, Confidentiality, DocumentRecord, DocumentStatus};

/// A single attribute test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "clause", content = "value", rename_all = "snake_case")]
pub enum Clause {
    PreparedBy(IdentityId),
    CreatedBy(IdentityId),
    DepartmentIs(DepartmentId),
    AccessLevelIs(AccessLevel),
    ConfidentialityIs(Confidentiality),
    ConfidentialityIsNot(Confidentiality),
    AllowedUsersContains(IdentityId),
    StatusIs(DocumentStatus),
    StatusIsNot(DocumentStatus),
    /// Case-insensitive.
    DocumentTypeIs(String),
    CategoryIs(CategoryId),
    SubcategoryIs(CategoryId),
    FinancialYearIs(i32),
    DateFrom(NaiveDate),
    DateTo(NaiveDate),
    AmountFrom(i64),
    AmountTo(i64),
    /// Documents without an expiry date never match the expiry bounds.
    ExpiresFrom(NaiveDate),
    ExpiresTo(NaiveDate),
    TagIs(String),
    /// Case-insensitive substring of number, title, description or keywords.
    TextContains(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    True,
    False,
    Clause(Clause),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

/// Bound parameter for a rendered fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Uuid(Uuid),
    Date(NaiveDate),
}

/// `sql` with `?` placeholders, bound positionally by `params`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl From<Clause> for Predicate {
    fn from(clause: Clause) -> Self {
        Predicate::Clause(clause)
    }
}

impl Predicate {
    pub fn all(parts: impl IntoIterator<Item = Predicate>) -> Self {
        parts.into_iter().fold(Predicate::True, Predicate::and)
    }

    pub fn any(parts: impl IntoIterator<Item = Predicate>) -> Self {
        parts.into_iter().fold(Predicate::False, Predicate::or)
    }

    /// Conjunction; absorbs `True`, short-circuits on `False`, flattens.
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::False, _) | (_, Predicate::False) => Predicate::False,
            (Predicate::True, p) | (p, Predicate::True) => p,
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), p) => {
                left.push(p);
                Predicate::And(left)
            }
            (p, Predicate::And(mut right)) => {
                right.insert(0, p);
                Predicate::And(right)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    /// Disjunction; absorbs `False`, short-circuits on `True`, flattens.
    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::True, _) | (_, Predicate::True) => Predicate::True,
            (Predicate::False, p) | (p, Predicate::False) => p,
            (Predicate::Or(mut left), Predicate::Or(right)) => {
                left.extend(right);
                Predicate::Or(left)
            }
            (Predicate::Or(mut left), p) => {
                left.push(p);
                Predicate::Or(left)
            }
            (p, Predicate::Or(mut right)) => {
                right.insert(0, p);
                Predicate::Or(right)
            }
            (a, b) => Predicate::Or(vec![a, b]),
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Not(inner) => *inner,
            p => Predicate::Not(Box::new(p)),
        }
    }

    pub fn matches(&self, record: &DocumentRecord) -> bool {
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::Clause(clause) => clause.matches(record),
            Predicate::Not(inner) => !inner.matches(record),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(record)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(record)),
        }
    }

    pub fn to_sql(&self) -> SqlFragment {
        let mut params = Vec::new();
        let sql = self.render(&mut params);
        SqlFragment { sql, params }
    }

    fn render(&self, params: &mut Vec<SqlParam>) -> String {
        match self {
            Predicate::True => "1=1".to_string(),
            Predicate::False => "1=0".to_string(),
            Predicate::Clause(clause) => clause.render(params),
            Predicate::Not(inner) => format!("NOT ({})", inner.render(params)),
            Predicate::And(parts) if parts.is_empty() => "1=1".to_string(),
            Predicate::Or(parts) if parts.is_empty() => "1=0".to_string(),
            Predicate::And(parts) => join(parts, " AND ", params),
            Predicate::Or(parts) => join(parts, " OR ", params),
        }
    }
}

fn join(parts: &[Predicate], separator: &str, params: &mut Vec<SqlParam>) -> String {
    let rendered: Vec<String> = parts.iter().map(|p| p.render(params)).collect();
    format!("({})", rendered.join(separator))
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

/// `%term%` with LIKE metacharacters escaped.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl Clause {
    pub fn matches(&self, record: &DocumentRecord) -> bool {
        let fields = record.fields();
        match self {
            Clause::PreparedBy(id) => record.prepared_by() == *id,
            Clause::CreatedBy(id) => record.created_by() == *id,
            Clause::DepartmentIs(id) => record.department_id() == Some(*id),
            Clause::AccessLevelIs(level) => fields.access_level == *level,
            Clause::ConfidentialityIs(c) => fields.confidentiality == *c,
            Clause::ConfidentialityIsNot(c) => fields.confidentiality != *c,
            Clause::AllowedUsersContains(id) => fields.allowed_users.contains(id),
            Clause::StatusIs(status) => record.status() == *status,
            Clause::StatusIsNot(status) => record.status() != *status,
            Clause::DocumentTypeIs(kind) => record.document_type().to_lowercase() == kind.to_lowercase(),
            Clause::CategoryIs(id) => fields.category_id == Some(*id),
            Clause::SubcategoryIs(id) => fields.subcategory_id == Some(*id),
            Clause::FinancialYearIs(year) => record.financial_year() == *year,
            Clause::DateFrom(date) => fields.document_date >= *date,
            Clause::DateTo(date) => fields.document_date <= *date,
            Clause::AmountFrom(min) => fields.amount.is_some_and(|a| a >= *min),
            Clause::AmountTo(max) => fields.amount.is_some_and(|a| a <= *max),
            Clause::ExpiresFrom(date) => fields.expiry_date.is_some_and(|d| d >= *date),
            Clause::ExpiresTo(date) => fields.expiry_date.is_some_and(|d| d <= *date),
            Clause::TagIs(tag) => record.tags().contains(&tag.trim().to_lowercase()),
            Clause::TextContains(term) => {
                let needle = term.to_lowercase();
                contains_ci(record.number(), &needle)
                    || contains_ci(&fields.title, &needle)
                    || fields.description.as_deref().is_some_and(|d| contains_ci(d, &needle))
                    || fields.keywords.as_deref().is_some_and(|k| contains_ci(k, &needle))
            }
        }
    }

    fn render(&self, params: &mut Vec<SqlParam>) -> String {
        match self {
            Clause::PreparedBy(id) => bind(params, "fd.prepared_by", "=", SqlParam::Uuid(*id.as_uuid())),
            Clause::CreatedBy(id) => bind(params, "fd.created_by", "=", SqlParam::Uuid(*id.as_uuid())),
            Clause::DepartmentIs(id) => {
                bind(params, "fd.department_id", "=", SqlParam::Uuid(*id.as_uuid()))
            }
            Clause::AccessLevelIs(level) => {
                bind(params, "fd.access_level", "=", SqlParam::Text(level.as_str().into()))
            }
            Clause::ConfidentialityIs(c) => {
                bind(params, "fd.confidentiality", "=", SqlParam::Text(c.as_str().into()))
            }
            Clause::ConfidentialityIsNot(c) => {
                bind(params, "fd.confidentiality", "<>", SqlParam::Text(c.as_str().into()))
            }
            Clause::AllowedUsersContains(id) => {
                params.push(SqlParam::Text(id.to_string()));
                "JSON_CONTAINS(fd.allowed_users, JSON_QUOTE(?))".to_string()
            }
            Clause::StatusIs(status) => {
                bind(params, "fd.status", "=", SqlParam::Text(status.as_str().into()))
            }
            Clause::StatusIsNot(status) => {
                bind(params, "fd.status", "<>", SqlParam::Text(status.as_str().into()))
            }
            Clause::DocumentTypeIs(kind) => {
                bind(params, "LOWER(fd.document_type)", "=", SqlParam::Text(kind.to_lowercase()))
            }
            Clause::CategoryIs(id) => bind(params, "fd.category_id", "=", SqlParam::Uuid(*id.as_uuid())),
            Clause::SubcategoryIs(id) => {
                bind(params, "fd.subcategory_id", "=", SqlParam::Uuid(*id.as_uuid()))
            }
            Clause::FinancialYearIs(year) => {
                bind(params, "fd.financial_year", "=", SqlParam::Int(i64::from(*year)))
            }
            Clause::DateFrom(date) => bind(params, "fd.document_date", ">=", SqlParam::Date(*date)),
            Clause::DateTo(date) => bind(params, "fd.document_date", "<=", SqlParam::Date(*date)),
            Clause::AmountFrom(min) => bind(params, "fd.amount", ">=", SqlParam::Int(*min)),
            Clause::AmountTo(max) => bind(params, "fd.amount", "<=", SqlParam::Int(*max)),
            Clause::ExpiresFrom(date) => bind(params, "fd.expiry_date", ">=", SqlParam::Date(*date)),
            Clause::ExpiresTo(date) => bind(params, "fd.expiry_date", "<=", SqlParam::Date(*date)),
            Clause::TagIs(tag) => {
                params.push(SqlParam::Text(tag.trim().to_lowercase()));
                "EXISTS (SELECT 1 FROM document_tags dt WHERE dt.document_id = fd.id AND dt.tag = ?)"
                    .to_string()
            }
            Clause::TextContains(term) => {
                let pattern = like_pattern(term);
                let columns = ["fd.document_number", "fd.title", "fd.description", "fd.keywords"];
                let parts: Vec<String> = columns
                    .iter()
                    .map(|column| {
                        params.push(SqlParam::Text(pattern.clone()));
                        format!("LOWER({column}) LIKE ? ESCAPE '\\'")
                    })
                    .collect();
                format!("({})", parts.join(" OR "))
            }
        }
    }
}

fn bind(params: &mut Vec<SqlParam>, column: &str, op: &str, param: SqlParam) -> String {
    params.push(param);
    format!("{column} {op} ?")
}

// ─────────────────────────────────────────────────────────────────────────────
// Viewer visibility
// ─────────────────────────────────────────────────────────────────────────────

/// Who is looking, reduced to what visibility depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub identity_id: IdentityId,
    pub department_id: Option<DepartmentId>,
    /// super_admin or `view_all_documents`.
    pub bypass: bool,
}

/// Row-visibility disjunction for `viewer`.
pub fn access_conditions(viewer: &Viewer) -> Predicate {
    if viewer.bypass {
        return Predicate::True;
    }

    let mut conditions: Vec<Predicate> = vec![
        Clause::PreparedBy(viewer.identity_id).into(),
        Clause::CreatedBy(viewer.identity_id).into(),
    ];
    if let Some(department) = viewer.department_id {
        conditions.push(Predicate::all([
            Predicate::from(Clause::DepartmentIs(department)),
            Predicate::from(Clause::AccessLevelIs(AccessLevel::Department)),
        ]));
    }
    conditions.push(Predicate::all([
        Predicate::from(Clause::AccessLevelIs(AccessLevel::Organization)),
        Predicate::from(Clause::ConfidentialityIsNot(Confidentiality::Confidential)),
    ]));
    conditions.push(Clause::AllowedUsersContains(viewer.identity_id).into());

    Predicate::any(conditions)
}

/// The only handle through which stores return document rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessScope {
    visibility: Predicate,
    include_deleted: bool,
}

impl AccessScope {
    pub fn for_viewer(viewer: &Viewer) -> Self {
        Self {
            visibility: access_conditions(viewer),
            include_deleted: false,
        }
    }

    /// Unrestricted scope for administrative and system paths.
    pub fn privileged() -> Self {
        Self {
            visibility: Predicate::True,
            include_deleted: false,
        }
    }

    /// Also surface soft-deleted rows (restore, purge).
    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    /// Visibility combined with soft-delete exclusion.
    pub fn filter(&self) -> Predicate {
        let live = if self.include_deleted {
            Predicate::True
        } else {
            Clause::StatusIsNot(DocumentStatus::Deleted).into()
        };
        self.visibility.clone().and(live)
    }

    /// `filter()` AND `extra`.
    pub fn narrowed(&self, extra: Predicate) -> Predicate {
        self.filter().and(extra)
    }

    pub fn permits(&self, record: &DocumentRecord) -> bool {
        self.filter().matches(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::{at, department, person, record};
    use crate::record::DocumentCommand;
    use archive_core::Aggregate;
    use proptest::prelude::*;

    fn viewer(n: u128, dept: Option<u128>) -> Viewer {
        Viewer {
            identity_id: person(n),
            department_id: dept.map(department),
            bypass: false,
        }
    }

    #[test]
    fn preparer_always_sees_own_private_document() {
        let doc = record(person(1), Some(department(1)), |f| {
            f.access_level = AccessLevel::Private;
            f.confidentiality = Confidentiality::Confidential;
        });
        assert!(access_conditions(&viewer(1, None)).matches(&doc));
        assert!(!access_conditions(&viewer(2, Some(1))).matches(&doc));
    }

    #[test]
    fn department_level_is_shared_within_the_department_only() {
        let doc = record(person(1), Some(department(1)), |f| f.access_level = AccessLevel::Department);
        assert!(access_conditions(&viewer(2, Some(1))).matches(&doc));
        assert!(!access_conditions(&viewer(3, Some(2))).matches(&doc));
        assert!(!access_conditions(&viewer(4, None)).matches(&doc));
    }

    #[test]
    fn organization_level_hides_confidential() {
        let open = record(person(1), None, |f| f.access_level = AccessLevel::Organization);
        let secret = record(person(1), None, |f| {
            f.access_level = AccessLevel::Organization;
            f.confidentiality = Confidentiality::Confidential;
        });
        assert!(access_conditions(&viewer(5, None)).matches(&open));
        assert!(!access_conditions(&viewer(5, None)).matches(&secret));
    }

    #[test]
    fn allowed_users_override_level() {
        let doc = record(person(1), None, |f| {
            f.access_level = AccessLevel::Private;
            f.allowed_users.insert(person(6));
        });
        assert!(access_conditions(&viewer(6, None)).matches(&doc));
        assert!(!access_conditions(&viewer(7, None)).matches(&doc));
    }

    #[test]
    fn bypass_sees_everything_but_scope_still_hides_deleted() {
        let mut doc = record(person(1), None, |f| f.access_level = AccessLevel::Private);
        let admin = Viewer { bypass: true, ..viewer(9, None) };
        assert_eq!(access_conditions(&admin), Predicate::True);

        doc.execute(&DocumentCommand::Delete { actor: person(1), occurred_at: at() })
            .unwrap();
        assert!(!AccessScope::for_viewer(&admin).permits(&doc));
        assert!(!AccessScope::privileged().permits(&doc));
        assert!(AccessScope::privileged().including_deleted().permits(&doc));
    }

    #[test]
    fn renders_parameterized_sql() {
        let fragment = AccessScope::for_viewer(&viewer(2, Some(1))).filter().to_sql();
        assert_eq!(
            fragment.sql,
            "((fd.prepared_by = ? OR fd.created_by = ? \
             OR (fd.department_id = ? AND fd.access_level = ?) \
             OR (fd.access_level = ? AND fd.confidentiality <> ?) \
             OR JSON_CONTAINS(fd.allowed_users, JSON_QUOTE(?))) AND fd.status <> ?)"
        );
        assert_eq!(fragment.params.len(), 8);
        assert_eq!(fragment.params[0], SqlParam::Uuid(*person(2).as_uuid()));
        assert_eq!(fragment.params[7], SqlParam::Text("deleted".into()));
        assert!(!fragment.sql.contains(&person(2).to_string()));
    }

    #[test]
    fn text_search_escapes_like_metacharacters() {
        let fragment = Predicate::from(Clause::TextContains("50%_Off".into())).to_sql();
        assert_eq!(fragment.params.len(), 4);
        assert_eq!(fragment.params[0], SqlParam::Text("%50\\%\\_off%".into()));
    }

    #[test]
    fn document_type_matches_case_insensitively_in_memory_and_sql() {
        let doc = record(person(1), None, |_| {});
        let clause = Clause::DocumentTypeIs("INVOICE".into());
        assert!(clause.matches(&doc));

        let fragment = Predicate::from(clause).to_sql();
        assert_eq!(fragment.sql, "LOWER(fd.document_type) = ?");
        assert_eq!(fragment.params, [SqlParam::Text("invoice".into())]);
    }

    #[test]
    fn expiry_bounds_skip_documents_that_never_expire() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 6, d).unwrap();
        let open_ended = record(person(1), None, |_| {});
        let expiring = record(person(1), None, |f| f.expiry_date = Some(day(10)));
        let window = Predicate::from(Clause::ExpiresFrom(day(1))).and(Clause::ExpiresTo(day(15)).into());

        assert!(window.matches(&expiring));
        assert!(!window.matches(&open_ended));
        assert!(!Predicate::from(Clause::ExpiresTo(day(9))).matches(&expiring));
    }

    #[test]
    fn algebra_absorbs_constants() {
        let clause: Predicate = Clause::FinancialYearIs(2024).into();
        assert_eq!(Predicate::True.and(clause.clone()), clause);
        assert_eq!(Predicate::False.or(clause.clone()), clause);
        assert_eq!(clause.clone().and(Predicate::False), Predicate::False);
        assert_eq!(clause.clone().negate().negate(), clause);
        assert_eq!(Predicate::all(Vec::<Predicate>::new()), Predicate::True);
        assert_eq!(Predicate::any(Vec::<Predicate>::new()), Predicate::False);
    }

    fn any_shape() -> impl Strategy<Value = (AccessLevel, Confidentiality, u128, Option<u128>, bool)> {
        (
            prop_oneof![
                Just(AccessLevel::Private),
                Just(AccessLevel::Department),
                Just(AccessLevel::Organization)
            ],
            prop_oneof![
                Just(Confidentiality::Public),
                Just(Confidentiality::Internal),
                Just(Confidentiality::Confidential)
            ],
            1u128..4,
            prop::option::of(1u128..3),
            any::<bool>(),
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn visibility_matches_the_written_rules(
            (level, confidentiality, preparer, doc_dept, listed) in any_shape(),
            viewer_id in 1u128..4,
            viewer_dept in prop::option::of(1u128..3),
        ) {
            let doc = record(person(preparer), doc_dept.map(department), |f| {
                f.access_level = level;
                f.confidentiality = confidentiality;
                if listed {
                    f.allowed_users.insert(person(viewer_id));
                }
            });
            let v = viewer(viewer_id, viewer_dept);

            let expected = preparer == viewer_id
                || (viewer_dept.is_some() && viewer_dept == doc_dept && level == AccessLevel::Department)
                || (level == AccessLevel::Organization && confidentiality != Confidentiality::Confidential)
                || listed;
            prop_assert_eq!(access_conditions(&v).matches(&doc), expected);
            let bypassing = Viewer { bypass: true, ..v };
            prop_assert!(access_conditions(&bypassing).matches(&doc));
        }
    }
}
