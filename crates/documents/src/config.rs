use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Document-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Document type → number prefix (e.g. `invoice = "INV"`).
    pub number_prefixes: BTreeMap<String, String>,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Upload limit in bytes.
    pub max_file_size: u64,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        let number_prefixes = [
            ("invoice", "INV"),
            ("receipt", "REC"),
            ("payment", "PAY"),
            ("contract", "CON"),
            ("purchase_order", "PO"),
        ]
        .into_iter()
        .map(|(kind, prefix)| (kind.to_string(), prefix.to_string()))
        .collect();

        Self {
            number_prefixes,
            default_page_size: 20,
            max_page_size: 100,
            max_file_size: 100 * 1024 * 1024,
        }
    }
}

impl DocumentConfig {
    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        let config = DocumentConfig::default();
        assert_eq!(config.page_size(None), 20);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(500)), 100);
    }
}
