use serde::{Deserialize, Serialize};

/// Request crossing the isolate boundary. Headers keep insertion order and
/// allow repeats; bodies are raw bytes so binary uploads survive untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RequestEnvelope {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// First header value matching `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }
}

/// Response crossing the isolate boundary back toward the front door.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ResponseEnvelope {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: body.into().into_bytes(),
        }
    }

    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![(
                "content-type".to_string(),
                "text/html; charset=utf-8".to_string(),
            )],
            body: body.into().into_bytes(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace every value of `name` with a single new value, or append
    /// when the header is absent.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn is_html(&self) -> bool {
        self.header("content-type")
            .map(|v| v.starts_with("text/html"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut req = RequestEnvelope::get("http://localhost/");
        req.headers
            .push(("X-Custom".to_string(), "yes".to_string()));
        assert_eq!(req.header("x-custom"), Some("yes"));
        assert!(req.has_header("X-CUSTOM"));
        assert!(!req.has_header("x-other"));
    }

    #[test]
    fn test_set_header_replaces_all_values() {
        let mut res = ResponseEnvelope::new(200);
        res.headers
            .push(("Content-Length".to_string(), "10".to_string()));
        res.headers
            .push(("content-length".to_string(), "11".to_string()));
        res.set_header("content-length", "42");
        let values: Vec<_> = res
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].1, "42");
    }

    #[test]
    fn test_is_html() {
        assert!(ResponseEnvelope::html(200, "<p>hi</p>").is_html());
        assert!(!ResponseEnvelope::text(200, "hi").is_html());
    }
}
