use std::net::IpAddr;
use url::Url;

use crate::load_controller::LoadTarget;

fn same_origin(left: &Url, right: &Url) -> bool {
    left.scheme() == right.scheme()
        && left.host_str() == right.host_str()
        && left.port_or_known_default() == right.port_or_known_default()
}

fn is_loopback_host(host: Option<&str>) -> bool {
    match host {
        Some("localhost") => true,
        Some(raw) => raw
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}

/// True when `page_url` is served by the backend at `backend_url`. Loopback
/// aliases (`localhost`, `127.0.0.1`, `::1`) on the same port count as the
/// backend.
pub fn is_backend_page(backend_url: &Url, page_url: &Url) -> bool {
    if same_origin(backend_url, page_url) {
        return true;
    }
    if !matches!(backend_url.scheme(), "http" | "https")
        || !matches!(page_url.scheme(), "http" | "https")
    {
        return false;
    }

    let loopback_http =
        is_loopback_host(backend_url.host_str()) && is_loopback_host(page_url.host_str());
    loopback_http && backend_url.port_or_known_default() == page_url.port_or_known_default()
}

/// Bundled placeholder pages are served from the webview's own asset origin.
pub fn is_placeholder_page(page_url: &Url) -> bool {
    match page_url.scheme() {
        "tauri" | "asset" | "about" | "data" => true,
        "http" | "https" => page_url.host_str() == Some("tauri.localhost"),
        _ => false,
    }
}

pub fn classify_page(backend_url: &Url, page_url: &Url) -> Option<LoadTarget> {
    if is_backend_page(backend_url, page_url) {
        Some(LoadTarget::Backend)
    } else if is_placeholder_page(page_url) {
        Some(LoadTarget::Placeholder)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Url {
        Url::parse("http://127.0.0.1:8001/").expect("parse backend url")
    }

    #[test]
    fn same_origin_page_is_backend() {
        let page = Url::parse("http://127.0.0.1:8001/admin/").expect("parse page url");
        assert!(is_backend_page(&backend(), &page));
    }

    #[test]
    fn loopback_alias_with_same_port_is_backend() {
        let page = Url::parse("http://localhost:8001/index").expect("parse page url");
        assert!(is_backend_page(&backend(), &page));
        let page = Url::parse("http://[::1]:8001/").expect("parse page url");
        assert!(is_backend_page(&backend(), &page));
    }

    #[test]
    fn different_port_or_scheme_is_not_backend() {
        let page = Url::parse("http://localhost:3000").expect("parse page url");
        assert!(!is_backend_page(&backend(), &page));
        let ws = Url::parse("ws://127.0.0.1:8001").expect("parse ws url");
        assert!(!is_backend_page(&ws, &backend()));
    }

    #[test]
    fn classify_recognizes_placeholder_and_external_pages() {
        let placeholder = Url::parse("tauri://localhost/index.html").expect("parse asset url");
        let windows_placeholder =
            Url::parse("http://tauri.localhost/index.html").expect("parse asset url");
        let external = Url::parse("https://example.com/").expect("parse external url");

        assert_eq!(
            classify_page(&backend(), &placeholder),
            Some(LoadTarget::Placeholder)
        );
        assert_eq!(
            classify_page(&backend(), &windows_placeholder),
            Some(LoadTarget::Placeholder)
        );
        assert_eq!(classify_page(&backend(), &external), None);
    }
}
