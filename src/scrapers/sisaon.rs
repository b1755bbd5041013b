//! Sisaon news section listing parser.
//!
//! Sisaon runs a stock newsroom CMS. The section listing in `view_type=sm`
//! mode prints, per article, a headline link, a lead paragraph and a byline
//! with the author and the publication time, which is everything the
//! pipeline needs without opening the article pages.
//!
//! # URL Pattern
//!
//! ```text
//! http://www.sisaon.co.kr/news/articleList.html?sc_sub_section_code=S2N29&view_type=sm&page=3
//! http://www.sisaon.co.kr/news/articleView.html?idxno=152233
//! ```
//!
//! Article identity is the `idxno` parameter; everything else in the query is
//! navigation noise.

use chrono::FixedOffset;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::PageParser;
use crate::error::{ConfigError, ParseError};
use crate::models::RawArticle;
use crate::utils::clean_text;

pub const SOURCE_ID: &str = "sisaon";

const BASE_URL: &str = "http://www.sisaon.co.kr/";

/// News section categories as `(name, section code)`, in crawl order.
const CATEGORIES: &[(&str, &str)] = &[
    ("정치", "S2N29"),
    ("경제", "S2N30"),
    ("산업", "S2N31"),
    ("건설·부동산", "S2N32"),
    ("IT", "S2N33"),
    ("유통·바이오", "S2N34"),
    ("사회", "S2N35"),
    ("자동차", "S2N55"),
];

static LIST_CONTAINER: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#section-list, .article-list").unwrap());
static LIST_ITEM: Lazy<Selector> = Lazy::new(|| Selector::parse("li").unwrap());
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse(".titles a[href]").unwrap());
static LEAD: Lazy<Selector> = Lazy::new(|| Selector::parse(".lead").unwrap());
static BYLINE_PART: Lazy<Selector> = Lazy::new(|| Selector::parse(".byline em").unwrap());
static PAGE_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href*='page=']").unwrap());

static PAGE_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]page=(\d+)").unwrap());
static DATE_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}[.\-/]\d{1,2}[.\-/]\d{1,2}").unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap());

#[derive(Debug, Clone)]
pub struct SisaonParser {
    base: Url,
}

impl SisaonParser {
    pub fn new() -> Self {
        Self {
            base: Url::parse(BASE_URL).unwrap_or_else(|_| unreachable!("BASE_URL is a valid URL")),
        }
    }

    fn category_code(&self, category: &str) -> Option<&'static str> {
        CATEGORIES
            .iter()
            .find(|(name, code)| *name == category || *code == category)
            .map(|(_, code)| *code)
    }
}

impl Default for SisaonParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip e-mail addresses and the trailing "기자" title from a byline name.
fn clean_author(raw: &str) -> String {
    let without_email = EMAIL.replace_all(raw, " ");
    let name = clean_text(&without_email);
    let name = name.trim_end_matches("기자").trim();
    name.to_string()
}

fn element_text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn parse_item(item: ElementRef<'_>) -> Option<RawArticle> {
    let link = item.select(&TITLE_LINK).next()?;
    let url = link.value().attr("href").unwrap_or_default().to_string();
    let title = element_text(link);
    let body = item.select(&LEAD).next().map(element_text).unwrap_or_default();

    let parts: Vec<String> = item.select(&BYLINE_PART).map(element_text).collect();
    let date_idx = parts.iter().rposition(|p| DATE_LIKE.is_match(p));
    let published = date_idx.map(|i| parts[i].clone()).unwrap_or_default();
    let author = match date_idx {
        Some(i) if i > 0 => clean_author(&parts[i - 1]),
        None => parts.last().map(|p| clean_author(p)).unwrap_or_default(),
        _ => String::new(),
    };

    Some(RawArticle {
        title,
        author,
        body,
        url,
        published,
    })
}

impl PageParser for SisaonParser {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn categories(&self) -> Vec<(String, String)> {
        CATEGORIES
            .iter()
            .map(|(name, code)| (name.to_string(), code.to_string()))
            .collect()
    }

    fn listing_url(&self, category: &str, page: u32) -> Result<Url, ConfigError> {
        let code = self
            .category_code(category)
            .ok_or_else(|| ConfigError::UnknownCategory {
                source_id: SOURCE_ID.to_string(),
                category: category.to_string(),
            })?;
        let mut url = self
            .base
            .join("news/articleList.html")
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("sc_sub_section_code", code)
            .append_pair("view_type", "sm")
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    fn parse_listing(&self, body: &str) -> Result<Vec<RawArticle>, ParseError> {
        let document = Html::parse_document(body);
        let container = document
            .select(&LIST_CONTAINER)
            .next()
            .ok_or_else(|| ParseError("listing container not found".to_string()))?;

        // Items without a headline link are layout filler (ads, separators).
        let records: Vec<RawArticle> = container.select(&LIST_ITEM).filter_map(parse_item).collect();
        debug!(count = records.len(), "Parsed Sisaon listing");
        Ok(records)
    }

    fn estimate_page_count(&self, body: &str) -> Option<u32> {
        let document = Html::parse_document(body);
        document
            .select(&PAGE_LINK)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| PAGE_PARAM.captures(href))
            .filter_map(|c| c[1].parse::<u32>().ok())
            .max()
    }

    fn base_url(&self) -> &Url {
        &self.base
    }

    fn identity_params(&self) -> &[&'static str] {
        &["idxno"]
    }

    fn utc_offset(&self) -> FixedOffset {
        // KST
        FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| unreachable!("+09:00 is a valid offset"))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// A listing page in the shape Sisaon serves, with `items` list entries.
    pub fn listing(items: &[(u32, &str, &str, &str)], last_page: u32) -> String {
        let mut html = String::from(
            r#"<html><body><section id="section-list"><ul class="type2">"#,
        );
        for (idx, title, author, date) in items {
            html.push_str(&format!(
                r#"<li>
                  <h4 class="titles"><a href="/news/articleView.html?idxno={idx}&amp;page=1">{title}</a></h4>
                  <p class="lead"><a href="/news/articleView.html?idxno={idx}">요약 {idx}</a></p>
                  <span class="byline"><em>정치</em><em>{author}</em><em>{date}</em></span>
                </li>"#
            ));
        }
        html.push_str(r#"</ul></section><div id="sections"><ul class="pagination">"#);
        for p in 1..=last_page {
            html.push_str(&format!(
                r#"<li><a href="/news/articleList.html?sc_sub_section_code=S2N29&amp;view_type=sm&amp;page={p}">{p}</a></li>"#
            ));
        }
        html.push_str("</ul></div></body></html>");
        html
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CrawlTask;

    #[test]
    fn test_listing_url_for_category_name() {
        let parser = SisaonParser::new();
        let url = parser.listing_url("경제", 3).unwrap();
        assert_eq!(
            url.as_str(),
            "http://www.sisaon.co.kr/news/articleList.html?sc_sub_section_code=S2N30&view_type=sm&page=3"
        );
        assert!(parser.listing_url("스포츠", 1).is_err());
    }

    #[test]
    fn test_parse_listing_extracts_records() {
        let html = fixtures::listing(
            &[
                (101, "첫 번째 기사", "김철수 기자", "2025.05.06 14:30"),
                (102, "두 번째 기사", "이영희 기자 yh@sisaon.co.kr", "2025.05.06 11:00"),
            ],
            1,
        );
        let parser = SisaonParser::new();
        let records = parser.parse_listing(&html).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "첫 번째 기사");
        assert_eq!(records[0].author, "김철수");
        assert_eq!(records[0].published, "2025.05.06 14:30");
        assert_eq!(records[0].body, "요약 101");
        assert_eq!(records[1].author, "이영희");

        let task = CrawlTask::new(SOURCE_ID, "정치", 1);
        let article = records[0]
            .clone()
            .into_article(&task, &parser.normalize_rules())
            .unwrap();
        assert_eq!(
            article.canonical_url,
            "http://www.sisaon.co.kr/news/articleView.html?idxno=101"
        );
    }

    #[test]
    fn test_parse_listing_without_container_fails() {
        let parser = SisaonParser::new();
        let err = parser
            .parse_listing("<html><body><p>점검 중입니다</p></body></html>")
            .unwrap_err();
        assert!(err.to_string().contains("container"));
    }

    #[test]
    fn test_empty_listing_is_not_an_error() {
        let parser = SisaonParser::new();
        let records = parser.parse_listing(&fixtures::listing(&[], 0)).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_estimate_page_count() {
        let parser = SisaonParser::new();
        assert_eq!(
            parser.estimate_page_count(&fixtures::listing(&[], 12)),
            Some(12)
        );
        assert_eq!(parser.estimate_page_count("<html></html>"), None);
    }

    #[test]
    fn test_clean_author() {
        assert_eq!(clean_author("박민수 기자"), "박민수");
        assert_eq!(clean_author(" 정하나 기자  hana@sisaon.co.kr "), "정하나");
        assert_eq!(clean_author("기자"), "");
    }
}
