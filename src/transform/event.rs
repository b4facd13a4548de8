//! HTML extraction for search result and event detail pages.
//!
//! Every field is looked up through an ordered list of selector candidates: a structural
//! selector first, then the styled-component class path the site currently renders. The
//! first candidate that yields non-empty text wins.

use std::collections::HashSet;
use std::sync::OnceLock;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::entities::event::{
    EventRecord, NO_EVENT, NO_HOSPITAL, NO_LOCATION, NO_PRICE, NOT_AVAILABLE,
};

const LOGGED_IN_MARKERS: &[&str] = &[
    "#ct-view > div > div > div.sc-d64fbdbd-0.IeGIQ > a",
    "#ct-view > div > div > div:nth-of-type(1) > a",
    ".user-info",
    ".mypage-user",
];
const LOGIN_LINK: &[&str] = &["a[href*='login']"];

const RESULT_LIST: &[&str] = &[
    "#ct-view > div > main > article > section:nth-of-type(2) > section",
    "#ct-view > div > main > article > section:nth-child(2) > section",
];
const RESULT_ARTICLE: &[&str] = &["article"];
const ANY_LINK: &[&str] = &["a[href]"];
const EVENT_LINK: &[&str] = &["a[href*='/events/']"];

const EVENT_NAME: &[&str] = &[
    "#ct-view > div > div > div:nth-of-type(1) > div:nth-of-type(2) > article > h1 > span",
    "#ct-view > div > div > div.relative.flex-col > div.sc-68757109-1.kfwxBJ > article > h1 > span",
];
const RATING: &[&str] = &[
    "#ct-view > div > div > div:nth-of-type(1) > div:nth-of-type(2) > article > section:nth-of-type(1) > div:nth-of-type(2) > div > div > span",
    "#ct-view > div > div > div.relative.flex-col > div.sc-68757109-1.kfwxBJ > article > section.flex.flex-col.justify-center.w-full > div.flex.items-end.justify-between.w-full > div > div > span",
];
const REVIEW_COUNT: &[&str] = &[
    "#ct-view > div > div > div:nth-of-type(1) > div:nth-of-type(2) > article > section:nth-of-type(1) > div:nth-of-type(2) > div > span",
    "#ct-view > div > div > div.relative.flex-col > div.sc-68757109-1.kfwxBJ > article > section.flex.flex-col.justify-center.w-full > div.flex.items-end.justify-between.w-full > div > span",
];
const HOSPITAL_NAME: &[&str] = &[
    "#ct-view > div > div > div:nth-of-type(1) > div:nth-of-type(2) > div:nth-of-type(1) > article > div > div > p",
    "#ct-view > div > div > div.relative.flex-col > div.sc-68757109-1.kfwxBJ > div.jlAXoU > article > div > div > p",
];
const LOCATION: &[&str] = &[
    "#ct-view > div > div > div:nth-of-type(1) > div:nth-of-type(2) > div:nth-of-type(1) > article > section:nth-of-type(2) > div > div > span:nth-of-type(1)",
    "#ct-view > div > div > div.relative.flex-col > div.sc-68757109-1.kfwxBJ > div.jlAXoU > article > section:nth-child(3) > div > div > span:nth-child(2)",
];
const INQUIRY_COUNT: &[&str] = &[
    "#ct-view > div > div > div:nth-of-type(1) > div:nth-of-type(2) > div:nth-of-type(4) > div:nth-of-type(1) > div > p:nth-of-type(2)",
    "#ct-view > div > div > div.relative.flex-col > div.sc-68757109-1.kfwxBJ > div.bpXUeM > div.iHBozd > div > p.ePvHjs",
];
const SCRAP_COUNT: &[&str] = &[
    "#ct-view > div > div > section > div:nth-of-type(1) > div > p",
    "#ct-view > div > div > section > div.dtvKsa > div > p",
];
/// Bottom bar holding the purchase button that mounts the option modal.
pub(crate) const PURCHASE_SECTION: &str = "#ct-view > div > div > section";
pub(crate) const OPTION_LIST: &[&str] = &[
    "#ct-view > div > div > div:nth-of-type(2) > div > div > div > div:nth-of-type(2) > div:nth-of-type(2)",
];
const OPTION_NAME: &[&str] = &["div > p"];
const OPTION_TEXT: &[&str] = &["p"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    LoggedIn,
    LoggedOut,
    Unknown,
}

struct Selectors {
    logged_in: Vec<Selector>,
    login_link: Vec<Selector>,
    result_list: Vec<Selector>,
    result_article: Vec<Selector>,
    any_link: Vec<Selector>,
    event_link: Vec<Selector>,
    event_name: Vec<Selector>,
    rating: Vec<Selector>,
    review_count: Vec<Selector>,
    hospital_name: Vec<Selector>,
    location: Vec<Selector>,
    inquiry_count: Vec<Selector>,
    scrap_count: Vec<Selector>,
    option_list: Vec<Selector>,
    option_name: Vec<Selector>,
    option_text: Vec<Selector>,
}

fn compile(candidates: &[&str]) -> Vec<Selector> {
    candidates
        .iter()
        .map(|css| Selector::parse(css).expect("valid selector"))
        .collect()
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        logged_in: compile(LOGGED_IN_MARKERS),
        login_link: compile(LOGIN_LINK),
        result_list: compile(RESULT_LIST),
        result_article: compile(RESULT_ARTICLE),
        any_link: compile(ANY_LINK),
        event_link: compile(EVENT_LINK),
        event_name: compile(EVENT_NAME),
        rating: compile(RATING),
        review_count: compile(REVIEW_COUNT),
        hospital_name: compile(HOSPITAL_NAME),
        location: compile(LOCATION),
        inquiry_count: compile(INQUIRY_COUNT),
        scrap_count: compile(SCRAP_COUNT),
        option_list: compile(OPTION_LIST),
        option_name: compile(OPTION_NAME),
        option_text: compile(OPTION_TEXT),
    })
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_element<'a>(doc: &'a Html, candidates: &[Selector]) -> Option<ElementRef<'a>> {
    candidates.iter().find_map(|sel| doc.select(sel).next())
}

fn first_text(doc: &Html, candidates: &[Selector]) -> Option<String> {
    candidates.iter().find_map(|sel| {
        doc.select(sel)
            .map(element_text)
            .find(|text| !text.is_empty())
    })
}

fn field_or(doc: &Html, candidates: &[Selector], default: &str) -> String {
    first_text(doc, candidates).unwrap_or_else(|| default.to_string())
}

fn is_login_href(el: ElementRef<'_>) -> bool {
    el.value()
        .attr("href")
        .is_some_and(|href| href.to_ascii_lowercase().contains("login"))
}

pub fn login_state(html: &str) -> LoginState {
    let doc = Html::parse_document(html);
    let sel = selectors();

    let logged_in = sel
        .logged_in
        .iter()
        .flat_map(|s| doc.select(s))
        .any(|el| !is_login_href(el));
    if logged_in {
        return LoginState::LoggedIn;
    }
    if first_element(&doc, &sel.login_link).is_some() {
        return LoginState::LoggedOut;
    }
    LoginState::Unknown
}

fn article_link(article: ElementRef<'_>, sel: &Selectors) -> Option<String> {
    let href = |el: ElementRef<'_>| {
        el.value()
            .attr("href")
            .map(str::trim)
            .filter(|h| !h.is_empty() && !h.starts_with('#') && !h.starts_with("javascript:"))
            .map(str::to_string)
    };

    let inner = |list: &[Selector]| {
        list.iter()
            .flat_map(|s| article.select(s))
            .find_map(href)
    };
    if let Some(link) = inner(&sel.event_link) {
        return Some(link);
    }
    if let Some(link) = inner(&sel.any_link) {
        return Some(link);
    }
    article
        .ancestors()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "a")
        .find_map(href)
}

/// Detail links of the search results in display order, de-duplicated.
///
/// Returns `None` when the result list container is not on the page at all.
pub fn event_links(html: &str) -> Option<Vec<String>> {
    let doc = Html::parse_document(html);
    let sel = selectors();
    let container = first_element(&doc, &sel.result_list)?;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in container
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "div")
    {
        let Some(article) = sel.result_article.iter().find_map(|s| item.select(s).next()) else {
            continue;
        };
        let Some(link) = article_link(article, sel) else {
            continue;
        };
        if seen.insert(link.clone()) {
            out.push(link);
        }
    }
    Some(out)
}

fn has_digit(value: &str) -> bool {
    value.chars().any(|c| c.is_ascii_digit())
}

/// `(option_name, price)` pairs from the purchase option list, in display order.
fn options(doc: &Html, sel: &Selectors) -> Vec<(String, String)> {
    let Some(container) = first_element(doc, &sel.option_list) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for option in container
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "div")
    {
        let Some(name_el) = sel.option_name.iter().find_map(|s| option.select(s).next()) else {
            continue;
        };
        let name = element_text(name_el);
        if name.is_empty() {
            continue;
        }
        let price = sel
            .option_text
            .iter()
            .flat_map(|s| option.select(s))
            .filter(|el| el.id() != name_el.id())
            .map(element_text)
            .find(|text| has_digit(text))
            .unwrap_or_else(|| NO_PRICE.to_string());
        out.push((name, price));
    }
    out
}

/// One row per purchasable option; a single placeholder-option row when none are listed.
pub fn event_rows(html: &str, detail_link: &str, exposure_order: usize) -> Vec<EventRecord> {
    let doc = Html::parse_document(html);
    let sel = selectors();

    let mut base = EventRecord::placeholder(exposure_order, detail_link);
    base.event_name = field_or(&doc, &sel.event_name, NO_EVENT);
    base.rating = field_or(&doc, &sel.rating, NOT_AVAILABLE);
    base.review_count = field_or(&doc, &sel.review_count, NOT_AVAILABLE);
    base.hospital_name = field_or(&doc, &sel.hospital_name, NO_HOSPITAL);
    base.location = field_or(&doc, &sel.location, NO_LOCATION);
    base.inquiry_count = field_or(&doc, &sel.inquiry_count, NOT_AVAILABLE);
    base.scrap_count = field_or(&doc, &sel.scrap_count, NOT_AVAILABLE);

    let rows: Vec<EventRecord> = options(&doc, sel)
        .into_iter()
        .map(|(name, price)| base.with_option(name, price))
        .collect();
    if rows.is_empty() { vec![base] } else { rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::event::NO_OPTION;

    const DETAIL: &str = r#"<html><body><div id="ct-view"><div><div>
        <div class="relative flex-col">
            <div class="gallery"></div>
            <div class="sc-68757109-1 kfwxBJ">
                <article>
                    <h1><span> 울쎄라   300샷 </span></h1>
                    <section class="flex flex-col justify-center w-full">
                        <div class="title"></div>
                        <div class="flex items-end justify-between w-full">
                            <div><div><span>4.9</span></div><span>(1,234)</span></div>
                        </div>
                    </section>
                </article>
                <div class="jlAXoU">
                    <article>
                        <div><div><p>강남 리프팅의원</p></div></div>
                        <section class="first"></section>
                        <section><div><div><span>서울 강남구</span><span>역삼역 3번 출구</span></div></div></section>
                    </article>
                </div>
                <div class="spacer"></div>
                <div class="spacer"></div>
                <div class="bpXUeM">
                    <div class="iHBozd"><div><p>문의</p><p>87</p></div></div>
                </div>
            </div>
        </div>
        <div><div><div><div>
            <div><p>옵션 선택</p></div>
            <div>
                <div class="header"></div>
                <div>
                    <div><div><p>울쎄라 300샷</p></div><p>990,000원</p></div>
                    <div><div><p>울쎄라 600샷 + 리쥬란</p></div><span>인기</span><p>1,690,000원</p></div>
                    <div><div><p>   </p></div><p>0원</p></div>
                </div>
            </div>
        </div></div></div></div>
        <section><div class="dtvKsa"><div><p>2,345</p></div></div><button>구매하기</button></section>
    </div></div></div></body></html>"#;

    #[test]
    fn event_rows_extracts_event_fields_and_one_row_per_option() {
        let rows = event_rows(DETAIL, "https://www.yeoshin.co.kr/events/77", 5);
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.exposure_order, 5);
        assert_eq!(first.event_name, "울쎄라 300샷");
        assert_eq!(first.rating, "4.9");
        assert_eq!(first.review_count, "(1,234)");
        assert_eq!(first.hospital_name, "강남 리프팅의원");
        assert_eq!(first.location, "서울 강남구");
        assert_eq!(first.inquiry_count, "87");
        assert_eq!(first.scrap_count, "2,345");
        assert_eq!(first.option_name, "울쎄라 300샷");
        assert_eq!(first.price, "990,000원");
        assert_eq!(first.detail_link, "https://www.yeoshin.co.kr/events/77");

        assert_eq!(rows[1].option_name, "울쎄라 600샷 + 리쥬란");
        assert_eq!(rows[1].price, "1,690,000원");
        assert_eq!(rows[1].hospital_name, first.hospital_name);
    }

    #[test]
    fn event_rows_before_modal_opens_keeps_event_fields_with_default_option() {
        let start = DETAIL.find("<div><div><div><div>").unwrap();
        let end = DETAIL.find("<section><div class=\"dtvKsa\">").unwrap();
        let closed = format!("{}{}", &DETAIL[..start], &DETAIL[end..]);

        let rows = event_rows(&closed, "https://www.yeoshin.co.kr/events/77", 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_name, "울쎄라 300샷");
        assert_eq!(rows[0].hospital_name, "강남 리프팅의원");
        assert_eq!(rows[0].option_name, NO_OPTION);
        assert_eq!(rows[0].price, NO_PRICE);
    }

    #[test]
    fn event_rows_falls_back_to_defaults_when_nothing_matches() {
        let rows = event_rows("<html><body><p>점검 중</p></body></html>", "", 1);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.event_name, NO_EVENT);
        assert_eq!(row.hospital_name, NO_HOSPITAL);
        assert_eq!(row.location, NO_LOCATION);
        assert_eq!(row.option_name, NO_OPTION);
        assert_eq!(row.price, NO_PRICE);
        assert_eq!(row.rating, NOT_AVAILABLE);
        assert_eq!(row.detail_link, NOT_AVAILABLE);
    }

    #[test]
    fn event_rows_uses_class_path_when_structure_shifts() {
        let html = r#"<html><body><div id="ct-view"><div><div>
            <div class="relative flex-col">
                <div class="sc-68757109-1 kfwxBJ">
                    <article><h1><span>슈링크 유니버스</span></h1></article>
                </div>
            </div>
        </div></div></div></body></html>"#;
        let rows = event_rows(html, "/events/9", 2);
        assert_eq!(rows[0].event_name, "슈링크 유니버스");
    }

    #[test]
    fn event_links_reads_result_list_in_order_without_duplicates() {
        let html = r#"<html><body><div id="ct-view"><div><main><article>
            <section><a href="/login">로그인</a></section>
            <section><section>
                <div><article><a href="/events/3">c</a></article></div>
                <div><article><a href="/hospitals/1">병원</a><a href="/events/1">a</a></article></div>
                <div><a href="/events/2"><article>b</article></a></div>
                <div><article><a href="/events/3">dup</a></article></div>
                <div><article><span>no link</span></article></div>
            </section></section>
        </article></main></div></div></body></html>"#;

        let links = event_links(html).expect("result list");
        assert_eq!(links, vec!["/events/3", "/events/1", "/events/2"]);
    }

    #[test]
    fn event_links_is_none_without_result_list() {
        assert_eq!(event_links("<html><body></body></html>"), None);
    }

    #[test]
    fn login_state_detects_profile_link_login_link_and_unknown() {
        let logged_in = r#"<div id="ct-view"><div><div><div><a href="/myPage/edit">내 정보</a></div></div></div></div>"#;
        assert_eq!(login_state(logged_in), LoginState::LoggedIn);

        let user_info = r#"<div class="user-info">홍길동</div>"#;
        assert_eq!(login_state(user_info), LoginState::LoggedIn);

        let logged_out = r#"<div id="ct-view"><div><div><div><a href="/login?redirect=/myPage">로그인</a></div></div></div></div>"#;
        assert_eq!(login_state(logged_out), LoginState::LoggedOut);

        assert_eq!(login_state("<html><body>maintenance</body></html>"), LoginState::Unknown);
    }
}
