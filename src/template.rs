//! Email markup for newsletter issues: a fixed-width, inline-styled layout
//! that renders acceptably in email clients, plus a plain-text alternative.
//! Rendering is deterministic and performs no I/O; the body is sanitized so
//! no script-capable markup survives into the outgoing campaign.

use htmlescape::encode_minimal;

pub struct IssueTemplate<'a> {
    pub title: &'a str,
    pub preheader: &'a str,
    pub content: &'a str,
    pub view_url: &'a str,
    pub unsubscribe_url: &'a str,
}

impl IssueTemplate<'_> {
    pub fn render(&self) -> String {
        let title = encode_minimal(self.title);
        let preheader = if self.preheader.is_empty() {
            "Weekly newsletter".to_string()
        } else {
            encode_minimal(self.preheader)
        };
        let content = sanitize_body(self.content);
        // URLs are built server-side, never from user input
        let view_url = encode_minimal(self.view_url);
        let unsubscribe_url = encode_minimal(self.unsubscribe_url);

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
  <div style="background: #f8f9fa; padding: 20px; border-radius: 8px; margin-bottom: 20px;">
    <h1 style="color: #2c3e50; margin: 0;">Markets &amp; Finance</h1>
    <p style="color: #7f8c8d; margin: 10px 0 0 0;">{preheader}</p>
  </div>
  <div style="background: white; padding: 20px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1);">
    <h2 style="color: #2c3e50;">{title}</h2>
    {content}
  </div>
  <div style="text-align: center; margin-top: 30px; padding: 20px; color: #7f8c8d; font-size: 14px; border-top: 1px solid #e5e7eb;">
    <p style="margin: 0 0 10px 0;"><a href="{view_url}" style="color: #3b82f6;">View in browser</a></p>
    <a href="{unsubscribe_url}" style="display: inline-block; background: #f3f4f6; color: #6b7280; text-decoration: none; padding: 8px 16px; border-radius: 6px; font-size: 13px; border: 1px solid #d1d5db;">Unsubscribe</a>
    <p style="margin: 10px 0 0 0; font-size: 12px;">Markets &amp; Finance Newsletter</p>
  </div>
</body>
</html>"#
        )
    }

    pub fn render_plain(&self) -> String {
        format!(
            "{}\n{}\n\n{}\n\nView in browser: {}\nUnsubscribe: {}\n",
            self.title,
            self.preheader,
            strip_html_tags(self.content),
            self.view_url,
            self.unsubscribe_url,
        )
    }
}

/// Strip script-capable markup from untrusted issue content before it is
/// embedded in the campaign HTML. Removes `<script>`, `<style>` and
/// `<iframe>` elements with their contents, drops `on*=` event handler
/// attributes, and neutralizes `javascript:` URLs.
pub fn sanitize_body(html: &str) -> String {
    let mut out = html.to_string();
    for tag in ["script", "style", "iframe"] {
        out = strip_element(&out, tag);
    }
    out = strip_event_handlers(&out);
    neutralize_javascript_urls(&out)
}

fn strip_element(html: &str, tag: &str) -> String {
    // ASCII-only lowering keeps byte indices aligned with `html`; the
    // needles are pure ASCII, so nothing is lost
    let lower = html.to_ascii_lowercase();
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    while let Some(start) = lower[cursor..].find(&open) {
        let start = cursor + start;
        out.push_str(&html[cursor..start]);
        match lower[start..].find(&close) {
            Some(end) => cursor = start + end + close.len(),
            // unterminated element swallows the rest of the input
            None => return out,
        }
    }
    out.push_str(&html[cursor..]);
    out
}

/// Drop `on<name>=value` attributes inside tags. The value may be quoted or
/// a bare word; everything up to the closing quote (or the next whitespace /
/// `>`) goes with it.
fn strip_event_handlers(html: &str) -> String {
    let bytes = html.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let mut in_tag = false;
    while i < bytes.len() {
        let b = bytes[i];
        if !in_tag {
            if b == b'<' {
                in_tag = true;
            }
            out.push(b);
            i += 1;
            continue;
        }
        if b == b'>' {
            in_tag = false;
            out.push(b);
            i += 1;
            continue;
        }
        if b.is_ascii_whitespace() && is_event_handler_at(bytes, i + 1) {
            i = skip_attribute(bytes, i + 1);
            continue;
        }
        out.push(b);
        i += 1;
    }
    // removed spans start at ASCII whitespace and end at an ASCII quote,
    // whitespace or '>', none of which occur inside a multi-byte sequence,
    // so the remainder is still valid UTF-8
    String::from_utf8_lossy(&out).into_owned()
}

fn is_event_handler_at(bytes: &[u8], start: usize) -> bool {
    let rest = &bytes[start.min(bytes.len())..];
    if rest.len() < 3 || !rest[..2].eq_ignore_ascii_case(b"on") {
        return false;
    }
    let mut j = 2;
    while j < rest.len() && rest[j].is_ascii_alphanumeric() {
        j += 1;
    }
    j > 2 && j < rest.len() && rest[j] == b'='
}

fn skip_attribute(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'=' {
        i += 1;
    }
    i += 1; // past '='
    if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
        let quote = bytes[i];
        i += 1;
        while i < bytes.len() && bytes[i] != quote {
            i += 1;
        }
        i + 1
    } else {
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
            i += 1;
        }
        i
    }
}

fn neutralize_javascript_urls(html: &str) -> String {
    // ASCII-only lowering, see strip_element
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    while let Some(pos) = lower[cursor..].find("javascript:") {
        let pos = cursor + pos;
        out.push_str(&html[cursor..pos]);
        cursor = pos + "javascript:".len();
    }
    out.push_str(&html[cursor..]);
    out
}

/// Crude tag removal for deriving plain-text bodies.
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
