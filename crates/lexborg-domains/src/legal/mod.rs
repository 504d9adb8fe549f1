pub mod lexml;
pub mod lexml_page;

use unicode_normalization::UnicodeNormalization;

/// Canonical form of a table label: accents stripped via NFD, only ASCII
/// letters kept, lower-cased. `"Título:"` and `"TITULO"` both become `"titulo"`.
pub fn normalize_label(label: &str) -> String {
    label
        .nfd()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
