use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use thiserror::Error;

/// Known SCORM 2004 schemaversion prefixes. Anything else is treated as 1.2.
const SCORM_2004_VERSIONS: &[&str] = &["2004 3rd Edition", "2004 4th Edition", "CAM 1.3", "2004"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScormManifest {
    /// href of the first webcontent resource; the relative launch URL.
    pub launch_url: String,
    pub title: String,
    /// "1.2" or "2004".
    pub version: String,
}

#[derive(Debug, Clone, Default)]
pub struct H5pMeta {
    pub main_library: String,
    pub title: String,
    pub raw: serde_json::Value,
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to parse imsmanifest.xml")]
    Xml,
    #[error("failed to parse h5p.json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse an imsmanifest.xml document.
///
/// Namespace-agnostic: tags are matched on their local name so both
/// namespaced and plain manifests work. The launch URL is the href of the
/// first `resource` with `type="webcontent"`, the title is the first `title`
/// element's text, and the version is detected by scanning every element for
/// a `schemaversion` tag whose text starts with a known SCORM 2004 edition
/// string, defaulting to "1.2".
pub fn parse_scorm_manifest(xml: &str) -> Result<ScormManifest, ManifestError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut manifest = ScormManifest {
        version: "1.2".to_string(),
        ..Default::default()
    };
    let mut current_tag: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if name == "resource" {
                    capture_webcontent_href(&e, &mut manifest);
                }
                current_tag = Some(name);
            }
            Ok(Event::Empty(e)) => {
                // Self-closing <resource .../> carries its attributes too.
                if local_name(&e) == "resource" {
                    capture_webcontent_href(&e, &mut manifest);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|_| ManifestError::Xml)?;
                let text = text.trim();
                match current_tag.as_deref() {
                    Some("title") if manifest.title.is_empty() => {
                        manifest.title = text.to_string();
                    }
                    Some("schemaversion") => {
                        if SCORM_2004_VERSIONS.iter().any(|v| text.starts_with(v)) {
                            manifest.version = "2004".to_string();
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                current_tag = None;
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(ManifestError::Xml),
            _ => {}
        }
        buf.clear();
    }

    Ok(manifest)
}

fn capture_webcontent_href(e: &BytesStart<'_>, manifest: &mut ScormManifest) {
    if manifest.launch_url.is_empty()
        && get_attr(e, "type").as_deref() == Some("webcontent")
    {
        if let Some(href) = get_attr(e, "href") {
            manifest.launch_url = href;
        }
    }
}

/// Parse h5p.json, extracting the main library and title.
pub fn parse_h5p_json(content: &[u8]) -> Result<H5pMeta, ManifestError> {
    let raw: serde_json::Value = serde_json::from_slice(content)?;
    let main_library = raw
        .get("mainLibrary")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let title = raw
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(H5pMeta {
        main_library,
        title,
        raw,
    })
}

// ------------- helpers -------------

fn local_name(tag: &BytesStart<'_>) -> String {
    let full = String::from_utf8_lossy(tag.name().as_ref()).to_string();
    full.split(':').last().unwrap_or(&full).to_string()
}

fn get_attr(e: &BytesStart<'_>, key_local: &str) -> Option<String> {
    for a in e.attributes().flatten() {
        let key = std::str::from_utf8(a.key.as_ref()).unwrap_or_default();
        let key = key.split(':').last().unwrap_or(key);
        if key == key_local {
            return Some(a.unescape_value().ok()?.into_owned());
        }
    }
    None
}
