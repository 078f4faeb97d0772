use lol_html::html_content::ContentType;
use lol_html::{RewriteStrSettings, element, rewrite_str};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;
use url::Url;

/// Leading text of the HTML comment stamped into every cached page.
pub const BUILD_MARKER_PREFIX: &str = "<!-- Built by restatic";

/// Insert a canonical link and a build marker before `</head>`, or append them when the
/// document has no closing head tag.
pub fn inject_build_metadata(html: &str, canonical: &Url, built_at: OffsetDateTime) -> String {
    insert_before_head_end(html, &metadata_snippet(canonical, built_at))
}

/// Place `snippet` as the last child of the document head. Documents with no `</head>` get
/// it appended at the end.
pub(super) fn insert_before_head_end(html: &str, snippet: &str) -> String {
    let Some(head_end) = find_closing_head(html) else {
        return format!("{html}{snippet}");
    };

    let mut injected = false;
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("head", |el| {
                if !injected {
                    el.append(snippet, ContentType::Html);
                    injected = true;
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    );

    match rewritten {
        Ok(out) if injected => out,
        // `</head>` without a `<head>` start tag: no element to hook.
        Ok(_) => splice_at(html, head_end, snippet),
        Err(err) => {
            warn!(
                target = "restatic::build",
                op = "inject",
                error = %err,
                "HTML rewrite failed; splicing into head"
            );
            splice_at(html, head_end, snippet)
        }
    }
}

fn metadata_snippet(canonical: &Url, built_at: OffsetDateTime) -> String {
    let stamp = built_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| built_at.unix_timestamp().to_string());
    format!(
        "\n<link rel=\"canonical\" href=\"{}\" />\n{BUILD_MARKER_PREFIX} {stamp} -->\n",
        escape_attribute(canonical.as_str())
    )
}

/// Byte offset of the first `</head>` end tag, ignoring ASCII case. `</header>` does not count.
pub(super) fn find_closing_head(html: &str) -> Option<usize> {
    const TAG: &[u8] = b"</head";
    let bytes = html.as_bytes();
    bytes
        .windows(TAG.len())
        .enumerate()
        .find(|(offset, window)| {
            window.eq_ignore_ascii_case(TAG)
                && bytes
                    .get(offset + TAG.len())
                    .is_none_or(|next| *next == b'>' || *next == b'/' || next.is_ascii_whitespace())
        })
        .map(|(offset, _)| offset)
}

fn splice_at(html: &str, offset: usize, snippet: &str) -> String {
    let mut out = String::with_capacity(html.len() + snippet.len());
    out.push_str(&html[..offset]);
    out.push_str(snippet);
    out.push_str(&html[offset..]);
    out
}

pub(super) fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}
