//! Synthetic request headers the dev proxy injects so worker code sees the
//! same shape it would see at the edge. Defaults only fill gaps; a header
//! the client already sent always wins.

use uuid::Uuid;

use crate::envelope::RequestEnvelope;

pub const REQUEST_ID: &str = "request-id";
pub const PROXY_LOOPBACK: &str = "cinder-proxy-loopback";

/// Header name / default value pairs applied to every dispatched request.
pub const SYNTHETIC_DEFAULTS: &[(&str, &str)] = &[
    ("cinder-client-ip", "127.0.0.1"),
    ("cinder-buyer-latitude", "37.7749"),
    ("cinder-buyer-longitude", "-122.4194"),
    ("cinder-buyer-city", "San Francisco"),
    ("cinder-buyer-region", "California"),
    ("cinder-buyer-country", "US"),
    ("cinder-buyer-timezone", "America/Los_Angeles"),
    ("cinder-storefront-id", "dev-storefront"),
];

/// Inject synthetic defaults and a `request-id` into `req`. Returns the
/// request id in effect (client-supplied or freshly generated).
pub fn inject_synthetic_headers(req: &mut RequestEnvelope) -> String {
    for (name, value) in SYNTHETIC_DEFAULTS {
        if !req.has_header(name) {
            req.headers.push((name.to_string(), value.to_string()));
        }
    }
    match req.header(REQUEST_ID) {
        Some(id) => id.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            req.headers.push((REQUEST_ID.to_string(), id.clone()));
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_headers() {
        let mut req = RequestEnvelope::get("http://localhost/");
        let id = inject_synthetic_headers(&mut req);
        assert_eq!(req.header("cinder-client-ip"), Some("127.0.0.1"));
        assert_eq!(req.header("cinder-storefront-id"), Some("dev-storefront"));
        assert_eq!(req.header(REQUEST_ID), Some(id.as_str()));
    }

    #[test]
    fn test_client_headers_not_clobbered() {
        let mut req = RequestEnvelope::get("http://localhost/");
        req.headers
            .push(("cinder-client-ip".to_string(), "10.0.0.9".to_string()));
        req.headers
            .push((REQUEST_ID.to_string(), "fixed-id".to_string()));
        let id = inject_synthetic_headers(&mut req);
        assert_eq!(req.header("cinder-client-ip"), Some("10.0.0.9"));
        assert_eq!(id, "fixed-id");
        let count = req
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("cinder-client-ip"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_generated_request_id_is_uuid() {
        let mut req = RequestEnvelope::get("http://localhost/");
        let id = inject_synthetic_headers(&mut req);
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
