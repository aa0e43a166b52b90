//! Archive packaging: zip the captured document and its manifest, then hand
//! the container to a sink.

use chrono::{Local, NaiveDateTime};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::{Error, Result};

/// Name of the manifest entry inside every archive
pub const MANIFEST_ENTRY: &str = "images.json";

/// Deflate level used for both entries
pub const MAX_COMPRESSION: i64 = 9;

const FORBIDDEN_FILENAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// A finished archive ready for delivery.
#[derive(Debug, Clone)]
pub struct ArchiveBundle {
    /// `<title>_<YYYY-MM-DD_HH-mm>.zip`
    pub file_name: String,
    /// `<title>.html`
    pub document_entry: String,
    pub bytes: Vec<u8>,
}

/// Make a page title usable as a file name: each of `\ / : * ? " < > |`
/// becomes `_` and surrounding whitespace is trimmed. A title with nothing
/// but forbidden characters and whitespace becomes `untitled`.
pub fn sanitize_filename(name: &str) -> String {
    if name
        .chars()
        .all(|c| c.is_whitespace() || FORBIDDEN_FILENAME_CHARS.contains(&c))
    {
        return "untitled".to_string();
    }
    let replaced: String = name
        .chars()
        .map(|c| if FORBIDDEN_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    replaced.trim().to_string()
}

/// `YYYY-MM-DD_HH-mm`
pub fn format_timestamp(at: &NaiveDateTime) -> String {
    at.format("%Y-%m-%d_%H-%M").to_string()
}

/// Package using the current local time for the file name.
pub fn package(html: &str, manifest_json: &str, base_name: &str) -> Result<ArchiveBundle> {
    package_at(html, manifest_json, base_name, Local::now().naive_local())
}

/// Package with an explicit timestamp. Both entries are deflated at maximum
/// compression; any failure aborts packaging.
pub fn package_at(
    html: &str,
    manifest_json: &str,
    base_name: &str,
    at: NaiveDateTime,
) -> Result<ArchiveBundle> {
    let document_entry = format!("{}.html", base_name);

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(MAX_COMPRESSION));

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(document_entry.as_str(), options)?;
    zip.write_all(html.as_bytes()).map_err(packaging)?;
    zip.start_file(MANIFEST_ENTRY, options)?;
    zip.write_all(manifest_json.as_bytes()).map_err(packaging)?;
    let bytes = zip.finish()?.into_inner();

    let file_name = format!("{}_{}.zip", base_name, format_timestamp(&at));
    log::debug!("Packaged {} ({} bytes)", file_name, bytes.len());

    Ok(ArchiveBundle {
        file_name,
        document_entry,
        bytes,
    })
}

fn packaging(err: std::io::Error) -> Error {
    Error::PackagingError(err.to_string())
}

/// Delivers a finished archive to the user.
pub trait ArchiveSink {
    /// Returns where the archive ended up.
    fn deliver(&self, bundle: &ArchiveBundle) -> Result<PathBuf>;
}

/// Writes archives into a directory, creating it when missing.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArchiveSink for DirectorySink {
    fn deliver(&self, bundle: &ArchiveBundle) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(&bundle.file_name);
        if let Err(e) = std::fs::write(&path, &bundle.bytes) {
            // Never leave a truncated archive behind.
            let _ = std::fs::remove_file(&path);
            return Err(Error::Io(e));
        }
        log::info!("Wrote {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Read;
    use zip::ZipArchive;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 59)
            .unwrap()
    }

    #[test]
    fn sanitize_replaces_each_forbidden_char() {
        assert_eq!(sanitize_filename("My/Show: Review"), "My_Show_ Review");
        assert_eq!(sanitize_filename(r#"a\b/c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("  Spaced  "), "Spaced");
    }

    #[test]
    fn sanitize_empty_becomes_untitled() {
        assert_eq!(sanitize_filename(""), "untitled");
        assert_eq!(sanitize_filename("   "), "untitled");
        assert_eq!(sanitize_filename("/:*"), "untitled");
        assert_eq!(sanitize_filename(" <?> | "), "untitled");
        assert_eq!(sanitize_filename("?a?"), "_a_");
    }

    #[test]
    fn timestamp_is_zero_padded_to_minutes() {
        assert_eq!(format_timestamp(&at()), "2024-03-07_09-05");
    }

    #[test]
    fn archive_holds_exactly_two_entries() {
        let html = "<!DOCTYPE html>\n<html><body>Ünïcode ✓</body></html>";
        let manifest = "[\n  {\n    \"id\": \"archive-id-0\"\n  }\n]";
        let bundle = package_at(html, manifest, "My_Show_ Review", at()).unwrap();

        assert_eq!(bundle.file_name, "My_Show_ Review_2024-03-07_09-05.zip");
        assert_eq!(bundle.document_entry, "My_Show_ Review.html");

        let mut archive = ZipArchive::new(Cursor::new(bundle.bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["My_Show_ Review.html", "images.json"]);

        let mut doc = String::new();
        {
            let mut entry = archive.by_name("My_Show_ Review.html").unwrap();
            assert_eq!(entry.compression(), CompressionMethod::Deflated);
            entry.read_to_string(&mut doc).unwrap();
        }
        assert_eq!(doc, html);

        let mut json = String::new();
        archive.by_name(MANIFEST_ENTRY).unwrap().read_to_string(&mut json).unwrap();
        assert_eq!(json, manifest);
    }

    #[test]
    fn directory_sink_writes_bundle() {
        let dir = std::env::temp_dir().join(format!("rfarchive-sink-{}", std::process::id()));
        let bundle = package_at("<html></html>", "[]", "page", at()).unwrap();

        let path = DirectorySink::new(&dir).deliver(&bundle).unwrap();
        assert_eq!(path, dir.join("page_2024-03-07_09-05.zip"));
        assert_eq!(std::fs::read(&path).unwrap(), bundle.bytes);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
