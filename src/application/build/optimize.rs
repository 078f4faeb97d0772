//! Optional HTML post-processing applied before the build metadata is stamped in.
//!
//! Minification collapses whitespace in ordinary text and drops comments. Text inside
//! `pre`, `code` and `textarea` is left alone, as are script and style bodies. Resource
//! hints add `preload` links for same-site render-blocking stylesheets and `dns-prefetch`
//! links for the third-party hosts of render-blocking assets.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;

use lol_html::html_content::{ContentType, TextType};
use lol_html::{RewriteStrSettings, doc_comments, doc_text, element, end_tag, rewrite_str};
use tracing::{debug, warn};
use url::Url;

use super::inject::{escape_attribute, find_closing_head, insert_before_head_end};

const PRESERVED_TAGS: [&str; 3] = ["pre", "code", "textarea"];

/// Script sources treated as render-critical even when loaded `async` or `defer`.
const CRITICAL_SCRIPT_PATTERNS: [&str; 7] = [
    "jquery",
    "polyfill",
    "critical",
    "above-fold",
    "cart",
    "checkout",
    "woocommerce",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeOptions {
    pub minify_html: bool,
    pub resource_hints: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            minify_html: true,
            resource_hints: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    pub bytes_before: usize,
    pub bytes_after: usize,
    pub critical_styles: usize,
    pub critical_scripts: usize,
    pub hints: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Optimized {
    pub html: String,
    pub report: OptimizeReport,
}

#[derive(Debug)]
struct Stylesheet {
    href: String,
    media: Option<String>,
}

#[derive(Debug)]
struct Script {
    src: String,
    deferred: bool,
}

/// Minify `html` and add resource hints according to `options`.
///
/// A rewrite failure leaves the document untouched.
pub fn optimize_html(html: &str, page: &Url, options: &OptimizeOptions) -> Optimized {
    let untouched = || Optimized {
        html: html.to_string(),
        report: OptimizeReport {
            bytes_before: html.len(),
            bytes_after: html.len(),
            ..OptimizeReport::default()
        },
    };

    let mut stylesheets = Vec::new();
    let mut scripts = Vec::new();
    let scanned = match scan_and_minify(html, options.minify_html, &mut stylesheets, &mut scripts) {
        Ok(scanned) => scanned,
        Err(err) => {
            warn!(
                target = "restatic::build",
                op = "optimize",
                url = %page,
                error = %err,
                "HTML optimization failed; keeping original markup"
            );
            return untouched();
        }
    };

    let critical_styles: Vec<&Stylesheet> = stylesheets
        .iter()
        .filter(|sheet| {
            sheet
                .media
                .as_deref()
                .is_none_or(|media| !media.trim().eq_ignore_ascii_case("print"))
        })
        .collect();
    let critical_scripts: Vec<&Script> = scripts
        .iter()
        .filter(|script| !script.deferred || matches_critical_pattern(&script.src))
        .collect();

    let mut hints = Vec::new();
    if options.resource_hints && find_closing_head(&scanned).is_some() {
        hints = resource_hints(page, &critical_styles, &critical_scripts);
    }
    let html_out = if hints.is_empty() {
        scanned
    } else {
        insert_before_head_end(&scanned, &format!("{}\n", hints.join("\n")))
    };

    let report = OptimizeReport {
        bytes_before: html.len(),
        bytes_after: html_out.len(),
        critical_styles: critical_styles.len(),
        critical_scripts: critical_scripts.len(),
        hints: hints.len(),
    };
    debug!(
        target = "restatic::build",
        op = "optimize",
        url = %page,
        bytes_before = report.bytes_before,
        bytes_after = report.bytes_after,
        critical_styles = report.critical_styles,
        critical_scripts = report.critical_scripts,
        hints = report.hints,
        "HTML optimized"
    );

    Optimized {
        html: html_out,
        report,
    }
}

fn scan_and_minify(
    html: &str,
    minify: bool,
    stylesheets: &mut Vec<Stylesheet>,
    scripts: &mut Vec<Script>,
) -> Result<String, lol_html::errors::RewritingError> {
    let preserved = Rc::new(Cell::new(0usize));
    let mut pending = String::new();

    let mut element_handlers = vec![
        element!("link[href]", |el| {
            let is_stylesheet = el.get_attribute("rel").is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("stylesheet"))
            });
            if is_stylesheet && let Some(href) = el.get_attribute("href") {
                stylesheets.push(Stylesheet {
                    href,
                    media: el.get_attribute("media"),
                });
            }
            Ok(())
        }),
        element!("script[src]", |el| {
            if let Some(src) = el.get_attribute("src") {
                scripts.push(Script {
                    src,
                    deferred: el.has_attribute("async") || el.has_attribute("defer"),
                });
            }
            Ok(())
        }),
    ];

    let mut document_handlers = Vec::new();
    if minify {
        for tag in PRESERVED_TAGS {
            let depth = Rc::clone(&preserved);
            element_handlers.push(element!(tag, move |el| {
                depth.set(depth.get() + 1);
                let closing = Rc::clone(&depth);
                el.on_end_tag(end_tag!(move |_end| {
                    closing.set(closing.get().saturating_sub(1));
                    Ok(())
                }))
            }));
        }

        document_handlers.push(doc_comments!(|comment| {
            comment.remove();
            Ok(())
        }));
        let depth = Rc::clone(&preserved);
        document_handlers.push(doc_text!(move |chunk| {
            if depth.get() > 0 || chunk.text_type() != TextType::Data {
                return Ok(());
            }
            // Buffer the whole text node so whitespace runs split across chunks collapse.
            pending.push_str(chunk.as_str());
            if chunk.last_in_text_node() {
                let collapsed = collapse_whitespace(&pending);
                pending.clear();
                chunk.replace(&collapsed, ContentType::Html);
            } else {
                chunk.remove();
            }
            Ok(())
        }));
    }

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: element_handlers,
            document_content_handlers: document_handlers,
            ..RewriteStrSettings::default()
        },
    )
}

/// Whitespace-only text disappears; other runs of whitespace become one space.
fn collapse_whitespace(text: &str) -> String {
    if text.chars().all(char::is_whitespace) {
        return String::new();
    }
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

fn matches_critical_pattern(src: &str) -> bool {
    let src = src.to_ascii_lowercase();
    CRITICAL_SCRIPT_PATTERNS
        .iter()
        .any(|pattern| src.contains(pattern))
}

fn resource_hints(page: &Url, styles: &[&Stylesheet], scripts: &[&Script]) -> Vec<String> {
    let mut hints = Vec::new();
    let mut external_hosts = BTreeSet::new();

    for sheet in styles {
        let Ok(resolved) = page.join(&sheet.href) else {
            continue;
        };
        if is_same_site(page, &resolved) {
            hints.push(format!(
                "<link rel=\"preload\" href=\"{}\" as=\"style\">",
                escape_attribute(resolved.as_str())
            ));
        } else if let Some(host) = resolved.host_str() {
            external_hosts.insert(host.to_string());
        }
    }

    for script in scripts {
        if let Ok(resolved) = page.join(&script.src)
            && !is_same_site(page, &resolved)
            && let Some(host) = resolved.host_str()
        {
            external_hosts.insert(host.to_string());
        }
    }

    hints.extend(
        external_hosts
            .into_iter()
            .map(|host| format!("<link rel=\"dns-prefetch\" href=\"//{}\">", escape_attribute(&host))),
    );
    hints
}

fn is_same_site(page: &Url, asset: &Url) -> bool {
    asset.host_str() == page.host_str()
}
