//! Portal page extraction - service layer
//!
//! The only place that knows what mercadopublico.cl pages look like. When
//! the portal layout changes, this is the file that changes.
//!
//! ## Pages
//! - `DetailsPurchaseOrder.aspx?codigoOC=...` carries the PDF report link and
//!   the attachments page link, usually inside `onclick` handlers. Unknown
//!   codes still answer 200, with an empty page or a "no existe" notice
//! - `ViewAttachmentPurchaseOrder.aspx` lists attachments as table rows:
//!   `name | type | date | link` (the date is not kept)

use crate::error::FetchError;
use crate::models::{AttachmentLink, DetailLinks};
use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

const PO_MODULE_DIR: &str = "PurchaseOrder/Modules/PO/";
const ADVANCED_SEARCH_DIR: &str = "Portal/Modules/Site/AdvancedSearch/";

/// URL builder and HTML extractor for the portal
pub struct PortalPages {
    po_dir: Url,
    search_dir: Url,
    detail_page: Url,
    pdf_onclick: Regex,
    attachments_onclick: Regex,
    missing_order: Regex,
    onclick_selector: Selector,
    link_selector: Selector,
    row_selector: Selector,
}

impl PortalPages {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        let po_dir = base.join(PO_MODULE_DIR)?;
        let search_dir = base.join(ADVANCED_SEARCH_DIR)?;
        let detail_page = po_dir.join("DetailsPurchaseOrder.aspx")?;

        Ok(Self {
            po_dir,
            search_dir,
            detail_page,
            pdf_onclick: Regex::new(r#"['"]([^'"]*PDFReport\.aspx\?qs=[^'"]+)['"]"#)?,
            attachments_onclick: Regex::new(r#"['"]([^'"]*ViewAttachmentPurchaseOrder[^'"]+)['"]"#)?,
            missing_order: Regex::new(
                r"(?i)no\s+(existe|se\s+encontr|fue\s+encontrad|hay\s+(datos|resultados))|orden\s+de\s+compra\s+(inexistente|no\s+v[aá]lida)",
            )?,
            onclick_selector: selector("[onclick]")?,
            link_selector: selector("a[href]")?,
            row_selector: selector("tr")?,
        })
    }

    /// Detail page of a purchase order
    pub fn detail_url(&self, code: &str) -> String {
        let mut url = self.detail_page.clone();
        url.query_pairs_mut().append_pair("codigoOC", code);
        url.to_string()
    }

    /// Finds the PDF report link (required) and the attachments page link.
    ///
    /// Without a PDF link, a blank page or a "no such order" notice is
    /// [`FetchError::NotFound`]; anything else is a layout mismatch.
    pub fn parse_detail_page(&self, html: &str, page_url: &str) -> Result<DetailLinks, FetchError> {
        let doc = Html::parse_document(html);
        let page = Url::parse(page_url).unwrap_or_else(|_| self.po_dir.clone());

        let mut pdf_report_url = None;
        let mut attachments_url = None;

        for element in doc.select(&self.onclick_selector) {
            let onclick = element.value().attr("onclick").unwrap_or_default();
            if pdf_report_url.is_none() {
                pdf_report_url = self
                    .pdf_onclick
                    .captures(onclick)
                    .and_then(|c| resolve(&self.po_dir, &c[1]));
            }
            if attachments_url.is_none() {
                attachments_url = self
                    .attachments_onclick
                    .captures(onclick)
                    .and_then(|c| resolve(&self.search_dir, &c[1]));
            }
        }

        // Plain links are the fallback
        for link in doc.select(&self.link_selector) {
            let href = link.value().attr("href").unwrap_or_default();
            if pdf_report_url.is_none() && href.contains("PDFReport") {
                pdf_report_url = resolve(&page, href);
            }
            if attachments_url.is_none() && href.contains("ViewAttachmentPurchaseOrder") {
                attachments_url = resolve(&page, href);
            }
        }

        debug!(
            "detail page parsed - PDF: {}, attachments: {}",
            pdf_report_url.is_some(),
            attachments_url.is_some()
        );

        let Some(pdf_report_url) = pdf_report_url else {
            let text = visible_text(&doc);
            if text.is_empty() || self.missing_order.is_match(&text) {
                return Err(FetchError::NotFound {
                    url: page_url.to_string(),
                    status: 200,
                });
            }
            return Err(FetchError::parse(page_url, "no PDFReport link on the detail page"));
        };

        Ok(DetailLinks {
            pdf_report_url,
            attachments_url,
        })
    }

    /// Lists the attachments of the attachments page, in table order.
    ///
    /// A page without rows simply has no attachments.
    pub fn parse_attachments_page(&self, html: &str, page_url: &str) -> Vec<AttachmentLink> {
        let doc = Html::parse_document(html);
        let page = Url::parse(page_url).unwrap_or_else(|_| self.search_dir.clone());
        let mut attachments = Vec::new();

        for row in doc.select(&self.row_selector) {
            let cells: Vec<ElementRef> = row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| cell.value().name() == "td")
                .collect();
            if cells.len() < 4 {
                continue;
            }

            let filename = cell_text(&cells[0]);
            if is_header(&filename) {
                continue;
            }

            let link = cells[3]
                .select(&self.link_selector)
                .next()
                .or_else(|| cells.last().and_then(|c| c.select(&self.link_selector).next()));
            let Some(href) = link.and_then(|a| a.value().attr("href")) else {
                debug!("attachment '{}' has no download link", filename);
                continue;
            };
            if href.trim().is_empty() || href.trim().to_ascii_lowercase().starts_with("javascript:") {
                debug!("attachment '{}' has no downloadable href", filename);
                continue;
            }
            let Some(url) = resolve(&page, href) else {
                continue;
            };

            attachments.push(AttachmentLink {
                filename,
                file_type: non_empty(cell_text(&cells[1])),
                url,
            });
        }

        attachments
    }
}

// ========== Helpers ==========

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector '{}': {:?}", css, e))
}

fn resolve(base: &Url, raw: &str) -> Option<String> {
    base.join(raw.trim()).ok().map(|u| u.to_string())
}

/// Page text outside `<head>`, scripts and styles, whitespace collapsed
fn visible_text(doc: &Html) -> String {
    doc.root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()));
            (!matches!(parent, Some("script" | "style" | "title" | "noscript"))).then(|| &**text)
        })
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_header(filename: &str) -> bool {
    matches!(
        filename.to_lowercase().as_str(),
        "" | "nombre" | "nombre del anexo"
    )
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
