use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

pub const RESOLVER_BASE: &str = "https://resolver.kb.nl/resolve?urn=";
pub const RESOLVER_PDF_SUFFIX: &str = ":mpeg21:pdf";

static ARCHIVE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<prefix>[A-Za-z0-9]+)_(?P<number>[0-9]+)(?:_.*)?$")
        .expect("archive id pattern compiles")
});

// e.g. Arnhemsche_courant_05-12-1852_(IA_MMKB08_000088804_mpeg21).pdf
static TITLE_ARCHIVE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(IA_(?P<prefix>[A-Za-z0-9]+)_(?P<number>[0-9]+)(?:_[^)]+)?\)")
        .expect("title archive id pattern compiles")
});

/// Delpher URN derived from an Internet Archive identifier. Leading zeros in the
/// number are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Urn {
    prefix: String,
    number: String,
}

impl Urn {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn resolver_url(&self) -> String {
        format!("{RESOLVER_BASE}{self}")
    }

    pub fn resolver_pdf_url(&self) -> String {
        format!("{RESOLVER_BASE}{self}{RESOLVER_PDF_SUFFIX}")
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix, self.number)
    }
}

/// Derive the URN from an identifier shaped `PREFIX_NUMBER[_suffix]`.
///
/// `ddd_010124175_mpeg21` becomes `ddd:010124175`. Anything else is rejected; a wrong
/// derivation would end up in a published citation link.
pub fn derive_urn(archive_id: &str) -> Result<Urn, ValidationError> {
    let trimmed = archive_id.trim();
    let captures = ARCHIVE_ID_RE
        .captures(trimmed)
        .ok_or_else(|| ValidationError::MalformedIdentifier(archive_id.to_string()))?;
    Ok(Urn {
        prefix: captures["prefix"].to_string(),
        number: captures["number"].to_string(),
    })
}

/// Best-effort resolver URL from a Commons file title such as
/// `Hoornsche_courant_26-03-1861_(IA_MMWFA01_000191129_mpeg21).pdf`.
pub fn resolver_url_from_title(title: &str) -> Option<String> {
    if title.trim().is_empty() {
        return None;
    }
    let captures = TITLE_ARCHIVE_ID_RE.captures(title)?;
    Some(format!(
        "{RESOLVER_BASE}{}:{}",
        &captures["prefix"], &captures["number"]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_urn_keeps_leading_zeros() {
        let urn = derive_urn("ddd_010124175_mpeg21").expect("urn");
        assert_eq!(urn.to_string(), "ddd:010124175");
        assert_eq!(urn.prefix(), "ddd");
        assert_eq!(urn.number(), "010124175");

        assert_eq!(
            derive_urn("MMKB08_000088804_mpeg21").expect("urn").to_string(),
            "MMKB08:000088804"
        );
        assert_eq!(
            derive_urn("KBDDD02_000201168_mpeg21").expect("urn").to_string(),
            "KBDDD02:000201168"
        );
    }

    #[test]
    fn derive_urn_is_deterministic() {
        let first = derive_urn("MMWFA01_000191129_mpeg21").expect("urn");
        let second = derive_urn("MMWFA01_000191129_mpeg21").expect("urn");
        assert_eq!(first, second);
    }

    #[test]
    fn derive_urn_accepts_missing_or_multi_segment_suffix() {
        assert_eq!(derive_urn("ddd_42").expect("urn").to_string(), "ddd:42");
        assert_eq!(
            derive_urn("ddd_0042_mpeg21_extra").expect("urn").to_string(),
            "ddd:0042"
        );
        assert_eq!(
            derive_urn("  ddd_0042_mpeg21 ").expect("urn").to_string(),
            "ddd:0042"
        );
    }

    #[test]
    fn derive_urn_rejects_malformed_identifiers() {
        for bad in ["nodigits", "123_abc", "", "ddd_", "_0042", "dd-d_0042", "ddd_12a"] {
            assert_eq!(
                derive_urn(bad),
                Err(ValidationError::MalformedIdentifier(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn resolver_urls_use_the_kb_resolver() {
        let urn = derive_urn("ddd_010124175_mpeg21").expect("urn");
        assert_eq!(
            urn.resolver_url(),
            "https://resolver.kb.nl/resolve?urn=ddd:010124175"
        );
        assert_eq!(
            urn.resolver_pdf_url(),
            "https://resolver.kb.nl/resolve?urn=ddd:010124175:mpeg21:pdf"
        );
    }

    #[test]
    fn resolver_url_from_title_extracts_parenthesized_id() {
        assert_eq!(
            resolver_url_from_title("Hoornsche_courant_26-03-1861_(IA_MMWFA01_000191129_mpeg21).pdf")
                .as_deref(),
            Some("https://resolver.kb.nl/resolve?urn=MMWFA01:000191129")
        );
        assert_eq!(
            resolver_url_from_title("File:Krant (IA_ddd_000000001).pdf").as_deref(),
            Some("https://resolver.kb.nl/resolve?urn=ddd:000000001")
        );
    }

    #[test]
    fn resolver_url_from_title_is_none_without_fragment() {
        assert_eq!(resolver_url_from_title(""), None);
        assert_eq!(resolver_url_from_title("   "), None);
        assert_eq!(resolver_url_from_title("Plain_title.pdf"), None);
        assert_eq!(resolver_url_from_title("Krant_(ddd_000000001).pdf"), None);
    }
}
