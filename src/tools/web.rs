//! Web explorer tools backed by a per-session HTTP page.
//!
//! [`HttpBrowser`] is a [`SessionResource`]: each open session id owns one
//! current page. Tools receive the session id from the registry and act on
//! that page only.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use url::Url;

use super::descriptor::{ParamSpec, ToolArgs, ToolDescriptor, ToolHandler, ValueType};
use crate::session::{SessionError, SessionResource};

const MAX_CONTENT_LEN: usize = 20000;

/// A loaded page.
#[derive(Debug, Clone)]
struct Page {
    url: Url,
    status: u16,
    title: String,
    html: String,
}

/// Link found in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Link {
    href: String,
    text: String,
}

/// HTTP-backed browser with one page slot per session.
pub struct HttpBrowser {
    client: reqwest::Client,
    sessions: Mutex<HashMap<String, Option<Page>>>,
}

impl HttpBrowser {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; ToolAgent/1.0)")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    async fn ensure_open(&self, session_id: &str) -> anyhow::Result<()> {
        if self.sessions.lock().await.contains_key(session_id) {
            Ok(())
        } else {
            Err(SessionError::NotOpen(session_id.to_string()).into())
        }
    }

    async fn current_page(&self, session_id: &str) -> anyhow::Result<Page> {
        match self.sessions.lock().await.get(session_id) {
            None => Err(SessionError::NotOpen(session_id.to_string()).into()),
            Some(None) => Err(anyhow::anyhow!("No page loaded; call goto_url first")),
            Some(Some(page)) => Ok(page.clone()),
        }
    }

    /// Fetch `url` and make it the session's current page.
    async fn navigate(&self, session_id: &str, url: Url) -> anyhow::Result<Page> {
        self.ensure_open(session_id).await?;
        tracing::debug!(session_id, %url, "Navigating");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to navigate to {}: {}", url, e))?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let html = response.text().await?;

        let page = Page {
            title: extract_title(&html).unwrap_or_default(),
            url: final_url,
            status,
            html,
        };

        // The lock is not held across the request; the session may have closed meanwhile.
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(session_id) {
            Some(slot) => {
                *slot = Some(page.clone());
                Ok(page)
            }
            None => Err(SessionError::NotOpen(session_id.to_string()).into()),
        }
    }

    async fn clear_page(&self, session_id: &str) -> anyhow::Result<()> {
        match self.sessions.lock().await.get_mut(session_id) {
            Some(slot) => {
                *slot = None;
                Ok(())
            }
            None => Err(SessionError::NotOpen(session_id.to_string()).into()),
        }
    }
}

#[async_trait]
impl SessionResource for HttpBrowser {
    fn name(&self) -> &str {
        "browser"
    }

    async fn open(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(session_id) {
            return Err(SessionError::AlreadyOpen(session_id.to_string()));
        }
        sessions.insert(session_id.to_string(), None);
        tracing::debug!(session_id, "Browser session opened");
        Ok(())
    }

    async fn close(&self, session_id: &str) -> Result<(), SessionError> {
        match self.sessions.lock().await.remove(session_id) {
            Some(_) => {
                tracing::debug!(session_id, "Browser session closed");
                Ok(())
            }
            None => Err(SessionError::NotOpen(session_id.to_string())),
        }
    }
}

/// Navigate to a URL.
pub struct GotoUrl {
    browser: Arc<HttpBrowser>,
}

#[async_trait]
impl ToolHandler for GotoUrl {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let session_id = args.session_id()?;
        let raw = args.str("url")?;
        let url = Url::parse(raw).map_err(|e| anyhow::anyhow!("Invalid URL '{}': {}", raw, e))?;

        let page = self.browser.navigate(session_id, url).await?;
        Ok(json!(format!(
            "Navigated to: {}\nURL: {}\nHTTP Status: {}",
            page.title, page.url, page.status
        )))
    }
}

/// Return the current page as text or HTML.
pub struct GetPageContent {
    browser: Arc<HttpBrowser>,
}

#[async_trait]
impl ToolHandler for GetPageContent {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let session_id = args.session_id()?;
        let mode = args.str_or("mode", "text");
        let page = self.browser.current_page(session_id).await?;

        let content = match mode {
            "text" => extract_text_from_html(&page.html),
            "html" => page.html,
            other => return Err(anyhow::anyhow!("Invalid mode '{}': expected text or html", other)),
        };
        Ok(json!(truncate(content)))
    }
}

/// Follow a link on the current page.
pub struct ClickElement {
    browser: Arc<HttpBrowser>,
}

#[async_trait]
impl ToolHandler for ClickElement {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let session_id = args.session_id()?;
        let selector = args.str("selector")?;
        let page = self.browser.current_page(session_id).await?;

        let href = resolve_click(&page.html, selector)?
            .ok_or_else(|| anyhow::anyhow!("Failed to click '{}': no matching link", selector))?;
        let target = page
            .url
            .join(&href)
            .map_err(|e| anyhow::anyhow!("Failed to click '{}': bad href {}: {}", selector, href, e))?;

        let page = self.browser.navigate(session_id, target).await?;
        Ok(json!(format!("Clicked: {} -> New URL: {}", selector, page.url)))
    }
}

/// Drop the current page while keeping the session open.
pub struct EndBrowsingPage {
    browser: Arc<HttpBrowser>,
}

#[async_trait]
impl ToolHandler for EndBrowsingPage {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let session_id = args.session_id()?;
        self.browser.clear_page(session_id).await?;
        Ok(json!("Page closed."))
    }
}

/// Descriptors for the web explorer tools. All of them take the injected session id.
pub fn descriptors(browser: Arc<HttpBrowser>) -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "goto_url",
            "Go to a URL and return page title + status.",
            Arc::new(GotoUrl {
                browser: browser.clone(),
            }),
        )
        .param(ParamSpec::required("url", ValueType::Str))
        .param(ParamSpec::session()),
        ToolDescriptor::new(
            "get_page_content",
            "Get the current page content. mode is \"text\" (clean readable text) or \"html\" (full source).",
            Arc::new(GetPageContent {
                browser: browser.clone(),
            }),
        )
        .param(ParamSpec::optional("mode", ValueType::Str, json!("text")))
        .param(ParamSpec::session()),
        ToolDescriptor::new(
            "click_element",
            "Follow a link on the current page. The selector is \"text=<link text>\", \
             \"role=link name=<link text>\", a CSS selector such as \"a.next\", or any part of the link's href.",
            Arc::new(ClickElement {
                browser: browser.clone(),
            }),
        )
        .param(ParamSpec::required("selector", ValueType::Str))
        .param(ParamSpec::session()),
        ToolDescriptor::new(
            "end_browsing_page",
            "Close the page (use only when done browsing).",
            Arc::new(EndBrowsingPage { browser }),
        )
        .param(ParamSpec::session()),
    ]
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"))
}

fn extract_title(html: &str) -> Option<String> {
    title_re()
        .captures(html)
        .map(|c| html_decode(c[1].trim()))
}

fn element_text(el: ElementRef) -> String {
    let raw = el.text().collect::<Vec<_>>().join(" ");
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn links_in(document: &Html) -> Vec<Link> {
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&anchors)
        .filter_map(|a| {
            Some(Link {
                href: a.value().attr("href")?.to_string(),
                text: element_text(a),
            })
        })
        .collect()
}

/// Href of `el`, its enclosing link, or the first link inside it.
fn href_of(el: ElementRef) -> Option<String> {
    if let Some(href) = el.value().attr("href") {
        return Some(href.to_string());
    }
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "a" && a.value().attr("href").is_some())
        .or_else(|| {
            let anchors = Selector::parse("a[href]").ok()?;
            el.select(&anchors).next()
        })
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

/// Resolve a click target on `html` to the href to follow.
///
/// - `text=Foo` matches link text, case-insensitive substring.
/// - `role=link name=Foo` matches a link by its name; other roles cannot be
///   followed over HTTP.
/// - Anything else is tried as a CSS selector and the first match is used.
///   When it matches nothing, the exact link text is tried, then any href
///   containing the selector.
fn resolve_click(html: &str, selector: &str) -> anyhow::Result<Option<String>> {
    let document = Html::parse_document(html);
    let links = links_in(&document);

    if let Some(text) = selector.strip_prefix("text=") {
        let needle = text.trim().to_lowercase();
        return Ok(links
            .into_iter()
            .find(|l| l.text.to_lowercase().contains(&needle))
            .map(|l| l.href));
    }

    if let Some(role) = selector.strip_prefix("role=") {
        let (role, name) = match role.split_once(" name=") {
            Some((role, name)) => (role.trim(), Some(name.trim())),
            None => (role.trim(), None),
        };
        if role != "link" {
            anyhow::bail!("Cannot click role '{}': only links can be followed", role);
        }
        let link = match name {
            Some(name) => links.into_iter().find(|l| l.text.eq_ignore_ascii_case(name)),
            None => links.into_iter().next(),
        };
        return Ok(link.map(|l| l.href));
    }

    if let Ok(css) = Selector::parse(selector) {
        if let Some(el) = document.select(&css).next() {
            return href_of(el)
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("Element '{}' is not a link", selector));
        }
    }

    Ok(links
        .iter()
        .find(|l| l.text == selector)
        .or_else(|| links.iter().find(|l| l.href.contains(selector)))
        .map(|l| l.href.clone()))
}

fn truncate(content: String) -> String {
    if content.len() <= MAX_CONTENT_LEN {
        return content;
    }
    let mut cut = MAX_CONTENT_LEN;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}... [content truncated, showing first {} chars]",
        &content[..cut],
        MAX_CONTENT_LEN
    )
}

/// Extract readable text from HTML (simple approach).
fn extract_text_from_html(html: &str) -> String {
    let mut text = html.to_string();

    for (open, close) in [("<script", "</script>"), ("<style", "</style>")] {
        while let Some(start) = text.find(open) {
            match text[start..].find(close) {
                Some(end) => text.replace_range(start..start + end + close.len(), ""),
                None => break,
            }
        }
    }

    let mut result = String::new();
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }

    let result = result.split_whitespace().collect::<Vec<_>>().join(" ");
    html_decode(&result)
}

/// Basic HTML entity decoding.
fn html_decode(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
