use std::borrow::Cow;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::error::ValidationError;
use crate::urn::derive_urn;

// |source =
// :{{Internet Archive link|KBDDD02_000201168_mpeg21}}
// :https://archive.org/download/KBDDD02_000201168_mpeg21/KBDDD02_000201168_mpeg21.pdf
static OLD_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)(?P<header>\|\s*source\s*=\s*\n)",
        r"\s*:\s*\{\{\s*Internet\s+Archive\s+link\s*\|\s*(?P<archive_id>[^}\n\r]+?)\s*\}\}\s*\n",
        r"\s*:\s*(?P<pdf>https?://archive\.org/download/[\w\-./]+?\.pdf)[ \t]*(?:\r?\n)?",
    ))
    .expect("old source block pattern compiles")
});

static PDF_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://archive\.org/download/[\w\-./]+?\.pdf$")
        .expect("pdf url pattern compiles")
});

/// One occurrence of the old Internet Archive `|source =` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBlock {
    /// Byte range of the whole match within the page body.
    pub span: Range<usize>,
    /// The `|source =` line exactly as found, line break included.
    pub header: String,
    pub archive_id: String,
    pub pdf_url: String,
}

pub fn find_old_blocks(body: &str) -> Vec<SourceBlock> {
    OLD_BLOCK_RE
        .captures_iter(body)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            Some(SourceBlock {
                span: whole.range(),
                header: captures["header"].to_string(),
                archive_id: captures["archive_id"].trim().to_string(),
                pdf_url: captures["pdf"].trim().to_string(),
            })
        })
        .collect()
}

/// Build the six-line replacement block: Internet Archive links followed by the Delpher
/// resolver links derived from the identifier.
pub fn build_replacement_block(archive_id: &str, pdf_url: &str) -> Result<String, ValidationError> {
    let pdf_url = pdf_url.trim();
    if !PDF_URL_RE.is_match(pdf_url) {
        return Err(ValidationError::MalformedUrl(pdf_url.to_string()));
    }
    let archive_id = archive_id.trim();
    let urn = derive_urn(archive_id)?;

    Ok([
        "Internet Archive".to_string(),
        format!("* Website: {{{{Internet Archive link|{archive_id}}}}}"),
        format!("* Direct download: {pdf_url}"),
        "Delpher".to_string(),
        format!("* Website: {}", urn.resolver_url()),
        format!("* Direct download: {}", urn.resolver_pdf_url()),
    ]
    .join("\n"))
}

/// Replace the single old source block in `body`.
///
/// Returns the input borrowed when there is nothing to replace. More than one old block
/// is an error and leaves the body alone.
pub fn transform(body: &str) -> Result<Cow<'_, str>, ValidationError> {
    let mut blocks = find_old_blocks(body);
    if blocks.len() > 1 {
        return Err(ValidationError::AmbiguousEditTarget {
            matches: blocks.len(),
        });
    }
    let Some(block) = blocks.pop() else {
        return Ok(Cow::Borrowed(body));
    };

    let urn = derive_urn(&block.archive_id)?;
    info!(urn = %urn, archive_id = %block.archive_id, "derived Delpher URN");
    let replacement = build_replacement_block(&block.archive_id, &block.pdf_url)?;

    let mut output = String::with_capacity(body.len() + replacement.len());
    output.push_str(&body[..block.span.start]);
    output.push_str(&block.header);
    output.push_str(&replacement);
    output.push('\n');
    output.push_str(&body[block.span.end..]);
    Ok(Cow::Owned(output))
}
