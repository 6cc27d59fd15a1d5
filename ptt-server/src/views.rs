//! Minimal HTML chrome shared by host pages and wrapped module output.

use std::fmt::Write;

use axum::http::StatusCode;

/// Escapes text for HTML element and attribute contexts.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Who is looking at the page, for the navigation bar.
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub username: Option<String>,
    pub project: Option<String>,
}

/// Page content. `body` is trusted HTML.
#[derive(Debug, Default)]
pub struct Page<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub stylesheets: &'a [String],
    pub viewer: Viewer,
}

pub fn render(page: Page<'_>) -> String {
    let mut html = String::with_capacity(page.body.len() + 1024);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    let _ = writeln!(html, "<title>{} | PTT</title>", escape(page.title));
    for href in page.stylesheets {
        let _ = writeln!(
            html,
            "<link rel=\"stylesheet\" href=\"{}\">",
            escape(href)
        );
    }
    html.push_str("</head>\n<body>\n<nav>\n<a href=\"/\">PTT</a>\n");
    if let Some(username) = &page.viewer.username {
        let project = page.viewer.project.as_deref().unwrap_or("no project");
        let _ = writeln!(
            html,
            "<span class=\"viewer\">{} &middot; {}</span>\n<a href=\"/sign-out\">Sign out</a>",
            escape(username),
            escape(project)
        );
    }
    html.push_str("</nav>\n<main>\n");
    html.push_str(page.body);
    html.push_str("\n</main>\n</body>\n</html>\n");
    html
}

pub fn error_page(status: StatusCode, message: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("Error");
    let mut body = format!(
        "<h1>{} {}</h1>\n",
        status.as_u16(),
        escape(reason)
    );
    if !message.is_empty() {
        let _ = writeln!(body, "<p>{}</p>", escape(message));
    }
    if status == StatusCode::UNAUTHORIZED {
        body.push_str("<p><a href=\"/login\">Sign in</a></p>\n");
    }
    render(Page {
        title: reason,
        body: &body,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_covers_markup_characters() {
        assert_eq!(
            escape(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn unauthorized_page_links_to_login() {
        let page = error_page(StatusCode::UNAUTHORIZED, "");
        assert!(page.contains("401 Unauthorized"));
        assert!(page.contains("href=\"/login\""));
    }

    #[test]
    fn stylesheets_are_linked_in_head() {
        let sheets = vec!["/plugin/x/style.css".to_string()];
        let html = render(Page {
            title: "x",
            body: "<p>hi</p>",
            stylesheets: &sheets,
            viewer: Viewer::default(),
        });
        let head_end = html.find("</head>").unwrap();
        let link = html.find("/plugin/x/style.css").unwrap();
        assert!(link < head_end);
        assert!(html.contains("<p>hi</p>"));
    }
}
