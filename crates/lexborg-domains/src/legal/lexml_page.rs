use anyhow::{anyhow, Result};
use lexborg_core::{FieldKey, RetrievedDocument};
use scraper::{ElementRef, Html, Selector};

use super::normalize_label;

/// What one LexML result page yielded.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// `false` when the page has no `div.results` container at all.
    pub results_found: bool,
    /// `div.docHit` blocks seen, titled or not.
    pub blocks: usize,
    pub documents: Vec<RetrievedDocument>,
    /// A "Próxima" anchor is present.
    pub has_next: bool,
}

/// Compiled selectors for the LexML search result markup.
pub struct PageParser {
    site_base: String,
    results: Selector,
    doc_hit: Selector,
    table: Selector,
    row: Selector,
    bold: Selector,
    anchor: Selector,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {css:?}: {e}"))
}

impl PageParser {
    /// `site_base` is what relative document links are resolved against.
    pub fn new(site_base: &str) -> Result<Self> {
        Ok(Self {
            site_base: site_base.trim_end_matches('/').to_string(),
            results: selector("div.results")?,
            doc_hit: selector("div.docHit")?,
            table: selector("table")?,
            row: selector("tr")?,
            bold: selector("b")?,
            anchor: selector("a")?,
        })
    }

    pub fn parse(&self, html: &str) -> ParsedPage {
        let doc = Html::parse_document(html);
        let Some(results) = doc.select(&self.results).next() else {
            return ParsedPage::default();
        };

        let (page_autoridade, page_localidade) = self.page_defaults(&doc);
        let has_next = doc.select(&self.anchor).any(|a| cell_text(a) == "Próxima");

        let mut blocks = 0;
        let mut documents = Vec::new();
        for hit in results.select(&self.doc_hit) {
            blocks += 1;
            let Some(mut record) = self.parse_block(hit) else {
                continue;
            };
            if !record.has_title() {
                continue;
            }
            if record.autoridade.is_none() {
                record.autoridade = page_autoridade.clone();
            }
            if record.localidade.is_none() {
                record.localidade = page_localidade.clone();
            }
            documents.push(record);
        }

        ParsedPage {
            results_found: true,
            blocks,
            documents,
            has_next,
        }
    }

    /// First autoridade and localidade anywhere on the page. Here the label
    /// must sit in the second cell.
    fn page_defaults(&self, doc: &Html) -> (Option<String>, Option<String>) {
        let mut autoridade = None;
        let mut localidade = None;
        for table in doc.select(&self.table) {
            for row in table.select(&self.row) {
                let cells = cells(row);
                if cells.len() < 3 {
                    continue;
                }
                let Some(label) = cells[1].select(&self.bold).next() else {
                    continue;
                };
                let value = cell_text(cells[2]);
                match normalize_label(&cell_text(label)).as_str() {
                    "autoridade" if autoridade.is_none() => autoridade = Some(value),
                    "localidade" if localidade.is_none() => localidade = Some(value),
                    _ => {},
                }
                if autoridade.is_some() && localidade.is_some() {
                    return (autoridade, localidade);
                }
            }
        }
        (autoridade, localidade)
    }

    fn parse_block(&self, hit: ElementRef<'_>) -> Option<RetrievedDocument> {
        let table = hit.select(&self.table).next()?;
        let mut record = RetrievedDocument::default();
        let mut subtitle: Vec<String> = Vec::new();
        // Field of the previous row, for attaching unlabelled continuation lines.
        let mut last: Option<FieldKey> = None;

        for row in table.select(&self.row) {
            let cells = cells(row);
            if cells.len() < 3 {
                continue;
            }
            let value_cell = cells[2];
            let value = cell_text(value_cell);

            let Some(label) = row.select(&self.bold).next() else {
                if matches!(last, Some(FieldKey::Titulo | FieldKey::Subtitulo)) && !value.is_empty() {
                    subtitle.push(value);
                    last = Some(FieldKey::Subtitulo);
                }
                continue;
            };

            last = FieldKey::from_label(&normalize_label(&cell_text(label)));
            let Some(key) = last else {
                continue;
            };
            if key == FieldKey::Titulo {
                if let Some(href) = value_cell
                    .select(&self.anchor)
                    .find_map(|a| a.value().attr("href"))
                    .filter(|h| !h.trim().is_empty())
                {
                    record.set(FieldKey::Link, self.absolute(href));
                }
            }
            record.set(key, value);
        }

        if !subtitle.is_empty() {
            let joined = match record.subtitulo.take().filter(|s| !s.is_empty()) {
                Some(labelled) => std::iter::once(labelled).chain(subtitle).collect::<Vec<_>>().join(" "),
                None => subtitle.join(" "),
            };
            record.set(FieldKey::Subtitulo, joined);
        }
        Some(record)
    }

    fn absolute(&self, href: &str) -> String {
        let href = href.trim();
        if href.starts_with("http://") || href.starts_with("https://") {
            return href.to_string();
        }
        format!("{}/{}", self.site_base, href.trim_start_matches('/'))
    }
}

/// Direct `td` children of a row.
fn cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "td")
        .collect()
}

/// Text content with runs of whitespace collapsed.
fn cell_text(el: ElementRef<'_>) -> String {
    el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}
