//! HTML directory pages.

use std::fmt::Write;

use super::browser::DirectoryEntry;

/// Message shown above (or instead of) a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    NotFound,
    AccessDenied,
}

impl Notice {
    fn text(self) -> &'static str {
        match self {
            Notice::NotFound => "Folder or file not found.",
            Notice::AccessDenied => "Access denied.",
        }
    }
}

/// Builds the link to a root-relative path, percent-encoding each segment.
pub fn href_for(rel_path: &str, token: Option<&str>) -> String {
    let mut href = String::from("/");
    let encoded: Vec<String> = rel_path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect();
    href.push_str(&encoded.join("/"));

    if let Some(token) = token {
        href.push_str("?token=");
        href.push_str(&urlencoding::encode(token));
    }
    href
}

/// Parent of a root-relative path; the root is its own parent.
pub fn parent_of(rel_path: &str) -> &str {
    rel_path
        .trim_end_matches('/')
        .rsplit_once('/')
        .map(|(parent, _)| parent)
        .unwrap_or("")
}

/// Escapes text for use in HTML content and single- or double-quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Renders the page for the directory at `rel_path` (`""` is the root).
///
/// Every link carries `token` when one is given.
pub fn render_listing(
    rel_path: &str,
    entries: &[DirectoryEntry],
    notice: Option<Notice>,
    token: Option<&str>,
) -> String {
    let title = if rel_path.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", rel_path)
    };

    let mut html = String::with_capacity(512 + entries.len() * 96);
    html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width\">");
    let _ = write!(html, "<title>Files {}</title>", escape_html(&title));
    html.push_str(
        "<style>a.entry{display:block;padding:10px;border-bottom:1px solid #ccc;\
         text-decoration:none;color:black;font-size:18px}</style>",
    );
    html.push_str("</head><body>\n");
    let _ = writeln!(html, "<h2>Files {}</h2>", escape_html(&title));

    if !rel_path.is_empty() {
        let _ = writeln!(
            html,
            "<a class=\"up\" href=\"{}\">Up</a>",
            escape_html(&href_for(parent_of(rel_path), token))
        );
    }

    if let Some(notice) = notice {
        let _ = writeln!(html, "<p class=\"notice\"><i>{}</i></p>", escape_html(notice.text()));
    }

    for entry in entries {
        let (class, icon) = if entry.is_dir() {
            ("dir", "\u{1F4C1}")
        } else {
            ("file", "\u{1F4C4}")
        };
        let _ = writeln!(
            html,
            "<a class=\"entry {}\" href=\"{}\">{} {}</a>",
            class,
            escape_html(&href_for(&entry.rel_path, token)),
            icon,
            escape_html(&entry.name)
        );
    }

    html.push_str("</body></html>\n");
    html
}

/// Minimal page for rejected tokens.
pub fn render_unauthorized() -> String {
    "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Unauthorized</title></head>\
     <body><p>A valid access token is required.</p></body></html>\n"
        .to_string()
}
