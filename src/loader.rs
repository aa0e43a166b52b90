//! Page loading: fetch a document and everything it renders with, so that a
//! capture can run without touching the network.
//!
//! `http(s)` goes through a blocking `reqwest` client (feature `http`, on by
//! default); `file:` and `data:` URLs are always available. Images are decoded
//! as they arrive. Cross-origin images and stylesheets are loaded the way a
//! browser would: drawable but unreadable unless the server opts in with
//! `Access-Control-Allow-Origin`. Text bodies are decoded with their declared
//! charset.

use base64::Engine as _;
use encoding_rs::{Encoding, UTF_8};
#[cfg(feature = "http")]
use reqwest::blocking::Client;
#[cfg(feature = "http")]
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashSet;
#[cfg(feature = "http")]
use std::time::Duration;
use url::Url;

use crate::page::{LivePage, LoadedImage, LoadedStyleSheet};
use crate::{ArchiveConfig, Error, Result};

/// Raw bytes of one fetched resource
struct Fetched {
    bytes: Vec<u8>,
    content_type: Option<String>,
    allow_origin: Option<String>,
}

impl Fetched {
    /// Body as text: BOM, then the `Content-Type` charset, then (for
    /// documents) a `<meta>` charset near the top, then UTF-8.
    fn text(&self, sniff_meta: bool) -> String {
        decode_text(&self.bytes, self.content_type.as_deref(), sniff_meta)
    }

    fn cors_allows(&self, page: &Url) -> bool {
        match self.allow_origin.as_deref() {
            Some("*") => true,
            Some(origin) => origin == page.origin().ascii_serialization(),
            None => false,
        }
    }
}

/// Builds `LivePage`s from URLs, files or markup.
pub struct PageLoader {
    #[cfg(feature = "http")]
    client: Client,
    config: ArchiveConfig,
}

impl PageLoader {
    pub fn new(config: ArchiveConfig) -> Result<Self> {
        #[cfg(feature = "http")]
        let client = {
            let mut headers = HeaderMap::new();
            for (name, value) in &config.headers {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| Error::ConfigError(format!("bad header name {:?}: {}", name, e)))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| Error::ConfigError(format!("bad header value for {}: {}", name, e)))?;
                headers.insert(name, value);
            }

            Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .user_agent(config.user_agent.clone())
                .default_headers(headers)
                .build()
                .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?
        };

        Ok(Self {
            #[cfg(feature = "http")]
            client,
            config,
        })
    }

    /// Load `target`, which is either an `http(s)`/`file` URL or a path.
    pub fn load(&self, target: &str) -> Result<LivePage> {
        let url = match Url::parse(target) {
            Ok(url) if matches!(url.scheme(), "http" | "https" | "file") => url,
            _ => {
                let path = std::fs::canonicalize(target)
                    .map_err(|e| Error::LoadError(format!("{}: {}", target, e)))?;
                Url::from_file_path(&path)
                    .map_err(|()| Error::LoadError(format!("not a usable path: {}", path.display())))?
            }
        };
        self.load_url(&url)
    }

    /// Fetch the document at `url` and everything it references.
    pub fn load_url(&self, url: &Url) -> Result<LivePage> {
        let fetched = self
            .fetch(url)
            .map_err(|e| Error::LoadError(format!("Failed to fetch {}: {}", url, e)))?;
        self.load_html(url.clone(), &fetched.text(true))
    }

    /// Treat `html` as the document at `url` and load its subresources.
    pub fn load_html(&self, url: Url, html: &str) -> Result<LivePage> {
        let mut page = LivePage::parse(url, html);
        self.load_stylesheets(&mut page);
        if self.config.enable_images {
            self.load_images(&mut page);
        }
        Ok(page)
    }

    fn load_stylesheets(&self, page: &mut LivePage) {
        let page_url = page.url().clone();
        for href in page.stylesheet_links() {
            let Ok(url) = Url::parse(&href) else {
                log::debug!("Skipping unresolvable stylesheet {}", href);
                continue;
            };

            match self.fetch(&url) {
                Ok(fetched) => {
                    let sheet = if same_origin(&page_url, &url) || fetched.cors_allows(&page_url) {
                        LoadedStyleSheet::parse(href, &fetched.text(false))
                    } else {
                        LoadedStyleSheet::opaque(href)
                    };
                    page.add_stylesheet(sheet);
                }
                Err(e) => log::warn!("Failed to load stylesheet {}: {}", href, e),
            }
        }
    }

    fn load_images(&self, page: &mut LivePage) {
        let page_url = page.url().clone();
        let requests: Vec<(String, bool)> = page
            .images()
            .iter()
            .map(|(_, img)| (page.image_src(img), img.value().attr("crossorigin").is_some()))
            .filter(|(src, _)| !src.is_empty())
            .collect();

        let mut seen = HashSet::new();
        for (src, cors_mode) in requests {
            if !seen.insert(src.clone()) {
                continue;
            }
            let image = self.load_image(&page_url, &src, cors_mode);
            page.insert_image(src, image);
        }
    }

    fn load_image(&self, page_url: &Url, src: &str, cors_mode: bool) -> LoadedImage {
        let Ok(url) = Url::parse(src) else {
            return LoadedImage::broken();
        };

        let fetched = match self.fetch(&url) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("Image {} failed to load: {}", src, e);
                return LoadedImage::broken();
            }
        };

        let readable = url.scheme() == "data" || same_origin(page_url, &url);
        let cors_ok = fetched.cors_allows(page_url);
        if cors_mode && !readable && !cors_ok {
            log::debug!("Image {} blocked by CORS", src);
            return LoadedImage::broken();
        }

        match LoadedImage::from_bytes(&fetched.bytes) {
            Ok(image) => image.with_tainted(!(readable || (cors_mode && cors_ok))),
            Err(e) => {
                log::debug!("Image {} could not be decoded: {}", src, e);
                LoadedImage::broken()
            }
        }
    }

    fn fetch(&self, url: &Url) -> Result<Fetched> {
        match url.scheme() {
            "data" => decode_data_url(url.as_str()),
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|()| Error::LoadError(format!("not a local path: {}", url)))?;
                Ok(Fetched {
                    bytes: std::fs::read(path)?,
                    content_type: None,
                    allow_origin: None,
                })
            }
            "http" | "https" => self.fetch_http(url),
            other => Err(Error::NetworkError(format!("unsupported scheme {:?}", other))),
        }
    }

    #[cfg(feature = "http")]
    fn fetch_http(&self, url: &Url) -> Result<Fetched> {
        let resp = self
            .client
            .get(url.as_str())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::NetworkError(format!("GET {} failed: {}", url, e)))?;

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let allow_origin = resp
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string());

        let bytes = resp
            .bytes()
            .map_err(|e| Error::NetworkError(format!("Failed to read response body: {}", e)))?;

        Ok(Fetched {
            bytes: bytes.to_vec(),
            content_type,
            allow_origin,
        })
    }

    #[cfg(not(feature = "http"))]
    fn fetch_http(&self, url: &Url) -> Result<Fetched> {
        Err(Error::NetworkError(format!(
            "HTTP support is disabled; cannot fetch {}",
            url
        )))
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    (a.scheme() == "file" && b.scheme() == "file") || a.origin() == b.origin()
}

fn decode_data_url(url: &str) -> Result<Fetched> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| Error::LoadError("not a data URL".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::LoadError("data URL without payload".into()))?;

    let bytes = if meta.ends_with(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| Error::LoadError(format!("bad base64 in data URL: {}", e)))?
    } else {
        payload.as_bytes().to_vec()
    };

    Ok(Fetched {
        bytes,
        content_type: Some(meta.to_string()),
        allow_origin: None,
    })
}

fn decode_text(bytes: &[u8], content_type: Option<&str>, sniff_meta: bool) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }

    let encoding = content_type
        .and_then(charset_from_content_type)
        .or_else(|| if sniff_meta { meta_charset(bytes) } else { None })
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// `<meta charset=...>` or `<meta http-equiv content="...; charset=...">` in
/// the first 1024 bytes.
fn meta_charset(bytes: &[u8]) -> Option<String> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]).to_ascii_lowercase();
    let mut rest = head.as_str();
    while let Some(pos) = rest.find("<meta") {
        rest = &rest[pos + 5..];
        let tag = &rest[..rest.find('>').unwrap_or(rest.len())];
        if let Some(at) = tag.find("charset=") {
            let label: String = tag[at + 8..]
                .trim_start_matches(|c: char| c == '"' || c == '\'')
                .chars()
                .take_while(|c| !matches!(c, '"' | '\'' | ';' | '/') && !c.is_whitespace())
                .collect();
            if !label.is_empty() {
                return Some(label);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([0, 128, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn same_origin_rules() {
        let page = Url::parse("https://example.com/a/").unwrap();
        assert!(same_origin(&page, &Url::parse("https://example.com/img.png").unwrap()));
        assert!(!same_origin(&page, &Url::parse("https://cdn.example.com/img.png").unwrap()));
        assert!(!same_origin(&page, &Url::parse("http://example.com/img.png").unwrap()));
        let file_page = Url::parse("file:///tmp/p.html").unwrap();
        assert!(same_origin(&file_page, &Url::parse("file:///var/x.png").unwrap()));
    }

    #[test]
    fn cors_header_matching() {
        let page = Url::parse("https://example.com/a/").unwrap();
        let with = |v: Option<&str>| Fetched {
            bytes: vec![],
            content_type: None,
            allow_origin: v.map(String::from),
        };
        assert!(with(Some("*")).cors_allows(&page));
        assert!(with(Some("https://example.com")).cors_allows(&page));
        assert!(!with(Some("https://other.org")).cors_allows(&page));
        assert!(!with(None).cors_allows(&page));
    }

    #[test]
    fn data_urls_decode() {
        let f = decode_data_url("data:text/plain;base64,aGk=").unwrap();
        assert_eq!(f.bytes, b"hi");
        let f = decode_data_url("data:text/plain,plain").unwrap();
        assert_eq!(f.bytes, b"plain");
        assert!(decode_data_url("data:nocomma").is_err());
    }

    #[test]
    fn text_honors_declared_charset() {
        // "café" in windows-1252
        let latin = b"caf\xe9";
        assert_eq!(decode_text(latin, Some("text/html; charset=ISO-8859-1"), false), "café");
        assert_eq!(decode_text(latin, Some("text/css; charset=\"windows-1252\""), false), "café");
        assert_eq!(decode_text("café".as_bytes(), None, true), "café");
        assert_eq!(decode_text(b"\xef\xbb\xbfhi", Some("text/html; charset=windows-1252"), true), "hi");

        let doc = b"<html><head><meta charset=\"windows-1252\"><title>caf\xe9</title>";
        assert!(decode_text(doc, None, true).contains("<title>café</title>"));
        let doc = b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=iso-8859-1\">caf\xe9";
        assert!(decode_text(doc, None, true).ends_with("café"));
        // Stylesheets never look for a meta tag.
        assert!(decode_text(doc, None, false).ends_with('\u{FFFD}'));
    }

    #[test]
    fn charset_parameter_parsing() {
        assert_eq!(charset_from_content_type("text/html;charset=utf-8;base64"), Some("utf-8".into()));
        assert_eq!(charset_from_content_type("text/html"), None);
        assert_eq!(charset_from_content_type("text/html; boundary=x"), None);
    }

    #[test]
    fn legacy_encoded_local_page_keeps_its_title() {
        let dir = std::env::temp_dir().join(format!("rfarchive-charset-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("legacy.html"),
            b"<html><head><meta charset=\"windows-1252\"><title>Caf\xe9 \x96 Men\xfc</title></head><body></body></html>".to_vec(),
        )
        .unwrap();

        let loader = PageLoader::new(ArchiveConfig::default()).unwrap();
        let page = loader.load(dir.join("legacy.html").to_str().unwrap()).unwrap();
        assert_eq!(page.title(), "Café – Menü");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn loads_local_page_with_subresources() {
        let dir = std::env::temp_dir().join(format!("rfarchive-loader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cover.png"), png_bytes(5, 4)).unwrap();
        std::fs::write(dir.join("site.css"), "body{margin:0}\nh1{color:#333}").unwrap();
        std::fs::write(
            dir.join("index.html"),
            r#"<html><head><title>Local</title><link rel="stylesheet" href="site.css"></head>
               <body><img src="cover.png" alt="Cover"><img src="missing.png"></body></html>"#,
        )
        .unwrap();

        let loader = PageLoader::new(ArchiveConfig::default()).unwrap();
        let page = loader.load(dir.join("index.html").to_str().unwrap()).unwrap();

        assert_eq!(page.title(), "Local");
        let srcs: Vec<String> = page.images().iter().map(|(_, i)| page.image_src(i)).collect();

        let cover = page.loaded_image(&srcs[0]).expect("cover loaded");
        assert!(cover.is_complete());
        assert!(!cover.is_tainted());
        assert_eq!(cover.natural_size(), (5, 4));

        let missing = page.loaded_image(&srcs[1]).expect("attempted");
        assert_eq!(missing.natural_size(), (0, 0));

        assert_eq!(page.stylesheets().len(), 1);
        assert_eq!(
            page.stylesheets()[0].rules().unwrap(),
            &["body{margin:0}".to_string(), "h1{color:#333}".to_string()]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn images_are_skipped_when_disabled() {
        let loader = PageLoader::new(ArchiveConfig {
            enable_images: false,
            ..Default::default()
        })
        .unwrap();
        let page = loader
            .load_html(
                Url::parse("https://example.com/").unwrap(),
                r#"<img src="data:image/png;base64,AAAA">"#,
            )
            .unwrap();
        assert!(page.loaded_image("data:image/png;base64,AAAA").is_none());
    }
}
