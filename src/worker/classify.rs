//! Request classification for the worker's dispatch policy.

use reqwest::Method;

use crate::http::Request;

/// File extensions served cache-first from the static partition.
const STATIC_ASSET_EXTENSIONS: &[&str] = &[
  "css", "js", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2",
];

/// How the worker treats a request. Decided once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  /// Not a GET; the worker does not intervene
  Passthrough,
  /// HTML documents, cache-first
  Document,
  /// Styles, scripts, images, fonts, icons, cache-first
  StaticAsset,
  /// Everything else including API calls, network-first
  Dynamic,
}

impl ResourceClass {
  pub fn of(request: &Request) -> Self {
    if request.method != Method::GET {
      return ResourceClass::Passthrough;
    }

    let path = request.url.path();
    if path == "/" || path.ends_with(".html") {
      return ResourceClass::Document;
    }

    let extension = path
      .rsplit('/')
      .next()
      .and_then(|segment| segment.rsplit_once('.'))
      .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension {
      Some(ext) if STATIC_ASSET_EXTENSIONS.contains(&ext.as_str()) => ResourceClass::StaticAsset,
      _ => ResourceClass::Dynamic,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn get(path: &str) -> Request {
    Request::get(Url::parse("http://localhost:3000").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_non_get_passes_through() {
    let request = Request::post_json(
      Url::parse("http://localhost:3000/index.html").unwrap(),
      b"{}".to_vec(),
    );
    assert_eq!(ResourceClass::of(&request), ResourceClass::Passthrough);
  }

  #[test]
  fn test_documents() {
    assert_eq!(ResourceClass::of(&get("/")), ResourceClass::Document);
    assert_eq!(ResourceClass::of(&get("/index.html")), ResourceClass::Document);
    assert_eq!(
      ResourceClass::of(&get("/pages/about.html?lang=el")),
      ResourceClass::Document
    );
  }

  #[test]
  fn test_static_assets() {
    for path in [
      "/styles/main.css",
      "/js/app.js",
      "/icons/icon-192x192.png",
      "/img/Photo.JPG",
      "/fonts/inter.woff2",
      "/favicon.ico",
    ] {
      assert_eq!(ResourceClass::of(&get(path)), ResourceClass::StaticAsset, "{}", path);
    }
  }

  #[test]
  fn test_everything_else_is_dynamic() {
    for path in ["/api/contact", "/manifest.json", "/restaurants", "/v1.2/data"] {
      assert_eq!(ResourceClass::of(&get(path)), ResourceClass::Dynamic, "{}", path);
    }
  }

  #[test]
  fn test_navigation_to_extensionless_path_is_dynamic() {
    let request = Request::navigate(Url::parse("http://localhost:3000/activities").unwrap());
    assert_eq!(ResourceClass::of(&request), ResourceClass::Dynamic);
  }
}
