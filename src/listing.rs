use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::{catalog::ListingRow, text_util::clean_text};

static ROWS: LazyLock<Selector> = LazyLock::new(|| sel("table tr"));
static CELLS: LazyLock<Selector> = LazyLock::new(|| sel("td"));
static LINK: LazyLock<Selector> = LazyLock::new(|| sel("a[href]"));
static YES_MARKER: LazyLock<Selector> = LazyLock::new(|| sel(".-yes"));
static CATEGORY_KEY: LazyLock<Selector> =
    LazyLock::new(|| sel(".product-catalogue__key"));
static NEXT_LINK: LazyLock<Selector> =
    LazyLock::new(|| sel(".pagination .next a[href]"));

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// Everything the crawler needs from one listing page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub rows: Vec<ListingRow>,
    /// Absolute URL of the following page, if the page links one.
    pub next: Option<Url>,
}

/// Parse a listing page fetched from `page_url`.
///
/// Relative links (rows and pagination) are resolved against `page_url`.
pub fn parse_listing(html: &str, page_url: &Url) -> ListingPage {
    let document = Html::parse_document(html);

    let rows: Vec<ListingRow> = document
        .select(&ROWS)
        .filter_map(|tr| parse_row(tr, page_url))
        .collect();

    let next = document
        .select(&NEXT_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| page_url.join(href).ok());

    debug!(
        page = %page_url,
        rows = rows.len(),
        has_next = next.is_some(),
        "parsed listing page"
    );

    ListingPage { rows, next }
}

/// Parse one `<tr>`. Header rows and rows without a link are skipped.
fn parse_row(tr: ElementRef<'_>, page_url: &Url) -> Option<ListingRow> {
    let cells: Vec<ElementRef<'_>> = tr.select(&CELLS).collect();
    if cells.len() < 4 {
        return None;
    }

    let link = cells[0].select(&LINK).next()?;
    let url = page_url.join(link.value().attr("href")?).ok()?;
    let name = clean_text(&link.text().collect::<String>());
    if name.is_empty() {
        return None;
    }

    let test_type = cells[3]
        .select(&CATEGORY_KEY)
        .map(|key| key.text().collect::<String>().trim().to_string())
        .filter(|code| !code.is_empty())
        .collect();

    Some(ListingRow {
        name,
        url,
        remote_support: has_marker(cells[1]),
        adaptive_support: has_marker(cells[2]),
        test_type,
    })
}

fn has_marker(cell: ElementRef<'_>) -> bool {
    cell.select(&YES_MARKER).next().is_some()
}
