//! Auto-reload client injection. HTML responses leaving the worker get a
//! small script that subscribes to the SSE channel and reloads the page
//! when the server announces new code.

use cinder_core::ResponseEnvelope;

const MARKER: &str = "__cinder_reload";

const CLIENT: &str = "(function(){function connect(){var es=new EventSource('/__cinder_events');\
es.addEventListener('reload',function(){location.reload();});\
es.onerror=function(){es.close();setTimeout(connect,1000);};}connect();})();";

/// Inject the reload client into an HTML envelope in place. Non-HTML and
/// non-UTF-8 bodies are left alone, as are documents that already carry the
/// client. A `nonce-…` in the response CSP is stamped onto the script tag
/// so strict pages still execute it.
pub(crate) fn apply_reload_client(res: &mut ResponseEnvelope) {
    if !res.is_html() {
        return;
    }
    let nonce = res
        .header("content-security-policy")
        .and_then(parse_nonce)
        .map(str::to_string);
    let Ok(html) = std::str::from_utf8(&res.body) else {
        return;
    };
    let injected = inject_reload_client(html, nonce.as_deref());
    if injected.len() == res.body.len() {
        return;
    }
    let update_length = res.header("content-length").is_some();
    res.body = injected.into_bytes();
    if update_length {
        res.set_header("content-length", res.body.len().to_string());
    }
}

pub(crate) fn inject_reload_client(html: &str, nonce: Option<&str>) -> String {
    if html.contains(MARKER) {
        return html.to_string();
    }
    let script = match nonce {
        Some(nonce) => format!(
            "<script id=\"{}\" nonce=\"{}\">{}</script>",
            MARKER, nonce, CLIENT
        ),
        None => format!("<script id=\"{}\">{}</script>", MARKER, CLIENT),
    };
    if let Some(idx) = html.rfind("</body>") {
        let mut out = String::with_capacity(html.len() + script.len());
        out.push_str(&html[..idx]);
        out.push_str(&script);
        out.push_str(&html[idx..]);
        return out;
    }
    let mut out = String::with_capacity(html.len() + script.len());
    out.push_str(html);
    out.push_str(&script);
    out
}

/// Extract the value of a `'nonce-…'` source from a CSP header.
fn parse_nonce(csp: &str) -> Option<&str> {
    let start = csp.find("'nonce-")? + "'nonce-".len();
    let rest = &csp[start..];
    let end = rest.find('\'')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injects_before_body_close() {
        let html = "<html><body><h1>hi</h1></body></html>";
        let out = inject_reload_client(html, None);
        assert!(out.contains(MARKER));
        assert!(out.find(MARKER).unwrap() < out.find("</body>").unwrap());
    }

    #[test]
    fn test_appends_without_body_tag() {
        let out = inject_reload_client("<p>fragment</p>", None);
        assert!(out.ends_with("</script>"));
        assert!(out.starts_with("<p>fragment</p>"));
    }

    #[test]
    fn test_avoids_duplicate_injection() {
        let html = "<html><body><script id=\"__cinder_reload\"></script></body></html>";
        let out = inject_reload_client(html, None);
        assert_eq!(out.matches(MARKER).count(), 1);
    }

    #[test]
    fn test_nonce_stamped_on_tag() {
        let out = inject_reload_client("<body></body>", Some("abc123"));
        assert!(out.contains("nonce=\"abc123\""));
    }

    #[test]
    fn test_parse_nonce() {
        assert_eq!(
            parse_nonce("script-src 'self' 'nonce-xYz9'; object-src 'none'"),
            Some("xYz9")
        );
        assert_eq!(parse_nonce("script-src 'self'"), None);
    }

    #[test]
    fn test_apply_updates_content_length() {
        let mut res = ResponseEnvelope::html(200, "<body></body>");
        let original = res.body.len();
        res.set_header("content-length", original.to_string());
        res.set_header(
            "content-security-policy",
            "script-src 'nonce-devnonce'",
        );
        apply_reload_client(&mut res);
        assert!(res.body.len() > original);
        assert_eq!(
            res.header("content-length"),
            Some(res.body.len().to_string().as_str())
        );
        assert!(String::from_utf8_lossy(&res.body).contains("nonce=\"devnonce\""));
    }

    #[test]
    fn test_apply_skips_non_html() {
        let mut res = ResponseEnvelope::text(200, "plain");
        apply_reload_client(&mut res);
        assert_eq!(res.body, b"plain");
    }
}
