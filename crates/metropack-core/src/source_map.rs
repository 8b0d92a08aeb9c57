//! Version-3 source maps: the per-module flat map and the sectioned index
//! map the serializer stitches bundles together with.
//!
//! The index ("sectioned") format exists specifically for concatenation in
//! post-processing steps: each section carries a generated-line/column
//! offset and applies from there until the next section starts. That lets
//! the bundle map reuse every module's own map untouched.

use serde::{Deserialize, Serialize};

/// A flat v3 map for a single module (or synthetic segment).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMapJson {
    pub version: u32,
    pub sources: Vec<String>,
    #[serde(
        rename = "sourcesContent",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub sources_content: Option<Vec<Option<String>>>,
    pub names: Vec<String>,
    pub mappings: String,
    #[serde(
        rename = "x_google_ignoreList",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub x_google_ignore_list: Option<Vec<u32>>,
}

impl SourceMapJson {
    pub fn new(source: String, content: Option<String>, mappings: String) -> Self {
        Self {
            version: 3,
            sources: vec![source],
            sources_content: content.map(|c| vec![Some(c)]),
            names: Vec::new(),
            mappings,
            x_google_ignore_list: None,
        }
    }

    /// A map with one source and no mappings, used for segments whose
    /// transformer did not produce one. `sourcesContent` is only populated
    /// from real file contents, never fabricated.
    pub fn empty(source: String) -> Self {
        Self::new(source, None, String::new())
    }

    pub fn mark_ignored(&mut self) {
        self.x_google_ignore_list = Some((0..self.sources.len() as u32).collect());
    }
}

/// Generated-position offset of one section of an index map.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionOffset {
    pub line: u32,
    pub column: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Section {
    pub offset: SectionOffset,
    pub map: SourceMapJson,
}

/// The bundle-level sectioned map.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexSourceMap {
    pub version: u32,
    pub sections: Vec<Section>,
}

impl IndexSourceMap {
    pub fn new(sections: Vec<Section>) -> Self {
        Self {
            version: 3,
            sections,
        }
    }

    /// All sources across sections, in order. Test/introspection helper.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .flat_map(|s| s.map.sources.iter().map(|s| s.as_str()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("source map serialization is infallible")
    }
}

const BASE64_CHARS: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Base64 VLQ as used by the `mappings` field.
pub fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 {
        ((-value as u64) << 1) | 1
    } else {
        (value as u64) << 1
    };
    loop {
        let mut digit = (vlq & 0x1f) as usize;
        vlq >>= 5;
        if vlq != 0 {
            digit |= 0x20;
        }
        out.push(BASE64_CHARS[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

/// Line-identity mappings: each of `line_count` generated lines maps to the
/// same line of source 0, column 0. This is exact for transforms that only
/// substitute tokens within lines.
pub fn identity_mappings(line_count: usize) -> String {
    let mut out = String::with_capacity(line_count * 5);
    for line in 0..line_count {
        if line > 0 {
            out.push(';');
        }
        if line == 0 {
            // generated column 0, source 0, source line 0, source column 0
            out.push_str("AAAA");
        } else {
            // each following line advances the source line by one
            out.push_str("AACA");
        }
    }
    out
}
