//! Human-readable document numbers: `PREFIX/YEAR/NNNNNN`.

use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use archive_core::ArchiveError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentNumber {
    prefix: String,
    year: i32,
    sequence: u32,
}

impl DocumentNumber {
    pub fn new(prefix: impl Into<String>, year: i32, sequence: u32) -> Self {
        Self {
            prefix: prefix.into(),
            year,
            sequence,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Next number in the `(prefix, year)` series.
    ///
    /// `high_water` is the largest sequence ever issued, so numbers freed by a
    /// purge are never handed out again.
    pub fn next<'a, I>(prefix: &str, year: i32, existing: I, high_water: u32) -> Self
    where
        I: IntoIterator<Item = &'a DocumentNumber>,
    {
        let last = existing
            .into_iter()
            .filter(|n| n.prefix == prefix && n.year == year)
            .map(|n| n.sequence)
            .max()
            .unwrap_or(0);
        Self::new(prefix, year, last.max(high_water).saturating_add(1))
    }
}

impl core::fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}/{:06}", self.prefix, self.year, self.sequence)
    }
}

impl FromStr for DocumentNumber {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ArchiveError::validation(format!("malformed document number '{s}'"));
        let mut parts = s.split('/');
        let (Some(prefix), Some(year), Some(sequence), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if prefix.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            prefix: prefix.to_string(),
            year: year.parse().map_err(|_| invalid())?,
            sequence: sequence.parse().map_err(|_| invalid())?,
        })
    }
}

/// Configured prefix for a document type, else its first four alphanumerics uppercased.
pub fn prefix_for(document_type: &str, overrides: &BTreeMap<String, String>) -> String {
    let configured = overrides
        .iter()
        .find(|(kind, _)| kind.eq_ignore_ascii_case(document_type.trim()))
        .map(|(_, prefix)| prefix.clone());
    if let Some(prefix) = configured {
        return prefix;
    }

    let derived: String = document_type
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(4)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if derived.is_empty() { "DOC".to_string() } else { derived }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn formats_with_six_digit_sequence() {
        assert_eq!(DocumentNumber::new("INV", 2024, 42).to_string(), "INV/2024/000042");
    }

    #[test]
    fn parses_its_own_output() {
        let parsed: DocumentNumber = "PAY/2023/000917".parse().unwrap();
        assert_eq!(parsed, DocumentNumber::new("PAY", 2023, 917));
        assert!("PAY/2023".parse::<DocumentNumber>().is_err());
        assert!("PAY/20x3/000001".parse::<DocumentNumber>().is_err());
        assert!("/2023/000001".parse::<DocumentNumber>().is_err());
    }

    #[test]
    fn next_only_considers_the_same_series() {
        let existing = [
            DocumentNumber::new("INV", 2024, 3),
            DocumentNumber::new("INV", 2023, 99),
            DocumentNumber::new("PAY", 2024, 50),
        ];
        assert_eq!(DocumentNumber::next("INV", 2024, &existing, 0).sequence(), 4);
        assert_eq!(DocumentNumber::next("CON", 2024, &existing, 0).sequence(), 1);
    }

    #[test]
    fn high_water_survives_purged_rows() {
        let existing = [DocumentNumber::new("INV", 2024, 2)];
        assert_eq!(DocumentNumber::next("INV", 2024, &existing, 5).sequence(), 6);
    }

    #[test]
    fn prefix_prefers_configuration() {
        let mut overrides = BTreeMap::new();
        overrides.insert("invoice".to_string(), "INV".to_string());
        assert_eq!(prefix_for("Invoice", &overrides), "INV");
        assert_eq!(prefix_for("payment voucher", &overrides), "PAYM");
        assert_eq!(prefix_for("--", &overrides), "DOC");
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn next_exceeds_everything_issued(
            sequences in prop::collection::vec(0u32..10_000, 0..20),
            high_water in 0u32..10_000,
        ) {
            let existing: Vec<DocumentNumber> =
                sequences.iter().map(|s| DocumentNumber::new("INV", 2024, *s)).collect();
            let next = DocumentNumber::next("INV", 2024, &existing, high_water);
            prop_assert!(next.sequence() > high_water);
            prop_assert!(existing.iter().all(|n| n.sequence() < next.sequence()));
        }
    }
}
