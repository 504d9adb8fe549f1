// LexML pagination against canned pages.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lexborg_core::{source::DocumentSource, Authority};
use lexborg_domains::{LexmlClient, PageFetcher};

const BASE: &str = "https://www.lexml.gov.br";

/// Serves pages by URL; unknown URLs fail like an HTTP error would.
#[derive(Default)]
struct CannedPages {
    pages: HashMap<String, String>,
    fetched: Mutex<Vec<String>>,
}

impl CannedPages {
    fn with(mut self, url: String, html: String) -> Self {
        self.pages.insert(url, html);
        self
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for CannedPages {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 Not Found for {url}"))
    }
}

fn hit(title: &str) -> String {
    format!(
        "<div class=\"docHit\"><table>\
         <tr><td>1.</td><td><b>Título</b></td><td><a href=\"/urn/{title}\">{title}</a></td></tr>\
         <tr><td></td><td><b>Ementa</b></td><td>Ementa de {title}</td></tr>\
         <tr><td></td><td><b>Autoridade</b></td><td>Federal</td></tr>\
         </table></div>"
    )
}

fn untitled() -> String {
    "<div class=\"docHit\"><table><tr><td></td><td><b>Ementa</b></td><td>órfã</td></tr></table></div>".to_string()
}

fn page(hits: &[String], next: bool) -> String {
    let nav = if next { "<a href=\"#\">Próxima</a>" } else { "" };
    format!(
        "<html><body><div class=\"results\">{}</div>{nav}</body></html>",
        hits.concat()
    )
}

fn titles(prefix: &str, range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| hit(&format!("{prefix}-{i}"))).collect()
}

fn client(pages: Arc<CannedPages>) -> LexmlClient {
    LexmlClient::new(BASE, pages).unwrap()
}

fn url(term: &str, start_doc: usize) -> String {
    format!("{BASE}/busca/search?keyword={term};startDoc={start_doc}")
}

// ── URL construction ─────────────────────────────────────────────────────────

#[test]
fn search_url_layout() {
    let c = client(Arc::new(CannedPages::default()));
    assert_eq!(c.search_url("LGPD", 1, None), format!("{BASE}/busca/search?keyword=LGPD;startDoc=1"));
    assert_eq!(
        c.search_url("proteção de dados", 3, Some(Authority::Federal)),
        format!("{BASE}/busca/search?keyword=prote%C3%A7%C3%A3o%20de%20dados;f1-autoridade=Federal;startDoc=21")
    );
    let c = client(Arc::new(CannedPages::default())).with_page_size(20);
    assert!(c.search_url("x", 2, None).ends_with(";startDoc=21"));
}

// ── pagination ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_pages_fill_the_quota() {
    let pages = Arc::new(
        CannedPages::default()
            .with(url("LGPD", 1), page(&titles("p1", 0..3), true))
            .with(url("LGPD", 11), page(&titles("p2", 0..2), false)),
    );
    let docs = client(pages.clone()).search("LGPD", 5, None).await;
    assert_eq!(docs.len(), 5);
    assert_eq!(pages.fetched(), vec![url("LGPD", 1), url("LGPD", 11)]);
    assert_eq!(docs[0].titulo.as_deref(), Some("p1-0"));
    assert_eq!(docs[4].titulo.as_deref(), Some("p2-1"));
    assert_eq!(docs[0].link.as_deref(), Some("https://www.lexml.gov.br/urn/p1-0"));
    assert!(docs.iter().all(|d| d.has_title()));
}

#[tokio::test]
async fn quota_stops_mid_page() {
    let pages = Arc::new(CannedPages::default().with(url("CDC", 1), page(&titles("a", 0..10), true)));
    let docs = client(pages.clone()).search("CDC", 4, None).await;
    assert_eq!(docs.len(), 4);
    assert_eq!(pages.fetched().len(), 1);
}

#[tokio::test]
async fn missing_next_link_stops_short() {
    let pages = Arc::new(CannedPages::default().with(url("CDC", 1), page(&titles("a", 0..2), false)));
    let docs = client(pages.clone()).search("CDC", 10, None).await;
    assert_eq!(docs.len(), 2);
    assert_eq!(pages.fetched().len(), 1);
}

#[tokio::test]
async fn untitled_blocks_do_not_count() {
    let mut first = titles("a", 0..2);
    first.insert(1, untitled());
    let pages = Arc::new(
        CannedPages::default()
            .with(url("LGPD", 1), page(&first, true))
            .with(url("LGPD", 11), page(&[untitled(), hit("b-0")], false)),
    );
    let docs = client(pages).search("LGPD", 3, None).await;
    let got: Vec<_> = docs.iter().filter_map(|d| d.titulo.as_deref()).collect();
    assert_eq!(got, vec!["a-0", "a-1", "b-0"]);
}

#[tokio::test]
async fn empty_page_and_missing_container_stop() {
    let pages = Arc::new(
        CannedPages::default()
            .with(url("a", 1), page(&[], true))
            .with(url("b", 1), "<html><body>Manutenção</body></html>".to_string()),
    );
    let c = client(pages.clone());
    assert!(c.search("a", 5, None).await.is_empty());
    assert!(c.search("b", 5, None).await.is_empty());
    assert_eq!(pages.fetched().len(), 2);
}

#[tokio::test]
async fn fetch_error_returns_partial_results() {
    // Page 2 is not served: the fetcher fails, page 1 results survive.
    let pages = Arc::new(CannedPages::default().with(url("LGPD", 1), page(&titles("a", 0..3), true)));
    let docs = client(pages.clone()).search("LGPD", 10, None).await;
    assert_eq!(docs.len(), 3);
    assert_eq!(pages.fetched().len(), 2);
}

#[tokio::test]
async fn page_limit_bounds_the_walk() {
    let mut canned = CannedPages::default();
    for p in 0..5 {
        canned = canned.with(url("x", p * 10 + 1), page(&titles(&format!("p{p}"), 0..1), true));
    }
    let pages = Arc::new(canned);
    let docs = client(pages.clone()).with_max_pages(3).search("x", 10, None).await;
    assert_eq!(docs.len(), 3);
    assert_eq!(pages.fetched().len(), 3);
}

#[tokio::test]
async fn authority_filter_reaches_the_url() {
    let u = format!("{BASE}/busca/search?keyword=ICMS;f1-autoridade=Estadual;startDoc=1");
    let pages = Arc::new(CannedPages::default().with(u.clone(), page(&titles("e", 0..1), false)));
    let docs = client(pages.clone()).search("ICMS", 5, Some(Authority::Estadual)).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(pages.fetched(), vec![u]);
}

#[tokio::test]
async fn zero_quota_fetches_nothing() {
    let pages = Arc::new(CannedPages::default());
    assert!(client(pages.clone()).search("LGPD", 0, None).await.is_empty());
    assert!(pages.fetched().is_empty());
}

#[tokio::test]
async fn repeated_searches_are_identical() {
    let pages = Arc::new(
        CannedPages::default()
            .with(url("LGPD", 1), page(&titles("p1", 0..3), true))
            .with(url("LGPD", 11), page(&titles("p2", 0..2), false)),
    );
    let c = client(pages);
    let first = c.search("LGPD", 5, None).await;
    let second = c.search("LGPD", 5, None).await;
    assert_eq!(first, second);
}
