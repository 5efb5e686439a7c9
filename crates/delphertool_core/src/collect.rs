use tracing::info;

use crate::error::RemoteError;
use crate::mediawiki::WikiSite;
use crate::table::Table;
use crate::urn::resolver_url_from_title;

pub const ENTITY_BASE: &str = "https://commons.wikimedia.org/entity/";
pub const COLLECT_COLUMNS: [&str; 4] = ["Title", "PageID", "URL", "ResolverURL"];

/// Search the File namespace and shape the hits into a worklist table.
pub fn collect_worklist<S: WikiSite>(
    site: &mut S,
    query: &str,
    limit: usize,
) -> Result<Table, RemoteError> {
    let hits = site.search_files(query, limit)?;
    let mut table = Table::new(COLLECT_COLUMNS.iter().map(ToString::to_string).collect());
    for hit in &hits {
        table.push_row(vec![
            hit.title.clone(),
            hit.page_id.to_string(),
            format!("{ENTITY_BASE}M{}", hit.page_id),
            resolver_url_from_title(&hit.title).unwrap_or_default(),
        ]);
    }
    info!(query, hits = hits.len(), limit, "collected worklist");
    Ok(table)
}
