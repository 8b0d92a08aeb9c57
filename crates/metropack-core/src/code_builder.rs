//! Combined output code plus the source maps of the pieces it was
//! concatenated from.
//!
//! `CodeBuilder` records, for every pushed piece, the byte offset it starts
//! at and (optionally) its map. `Code::generate_source_map` later converts
//! those byte offsets into generated line/column offsets and emits the
//! sectioned index map.

use std::fmt::Write as _;

use crate::source_map::{IndexSourceMap, Section, SectionOffset, SourceMapJson};

/// A byte offset in the output paired with the map of the piece starting
/// there. `None` marks synthetic code.
pub type Mapping = (usize, Option<SourceMapJson>);

#[derive(Clone, Debug, Default)]
pub struct Code {
    code: String,
    mappings: Vec<Mapping>,
}

impl Code {
    pub fn source_code(&self) -> &str {
        &self.code
    }

    pub fn into_source_code(self) -> String {
        self.code
    }

    pub fn has_source_map(&self) -> bool {
        self.mappings.iter().any(|(_, map)| map.is_some())
    }

    /// Convert the recorded byte offsets into line/column section offsets.
    /// Synthetic stretches produce no section; a section's map applies until
    /// the next section begins, so a gap simply has no mappings.
    pub fn generate_source_map(&self) -> IndexSourceMap {
        let bytes = self.code.as_bytes();
        let mut sections = Vec::with_capacity(self.mappings.len());
        let mut pos = SectionOffset::default();
        let mut last_byte = 0usize;
        for (byte_pos, map) in &self.mappings {
            for &b in &bytes[last_byte..*byte_pos] {
                if b == b'\n' {
                    pos.line += 1;
                    pos.column = 0;
                } else {
                    pos.column += 1;
                }
            }
            last_byte = *byte_pos;
            if let Some(map) = map {
                sections.push(Section {
                    offset: pos,
                    map: map.clone(),
                });
            } else if pos.column != 0 {
                // end the previous section mid-line with an empty map so its
                // mappings don't bleed into synthetic code
                sections.push(Section {
                    offset: pos,
                    map: SourceMapJson::default(),
                });
            }
        }
        IndexSourceMap::new(sections)
    }
}

#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: String,
    mappings: Vec<Mapping>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Current generated line (0-based) the next push lands on.
    pub fn current_line(&self) -> u32 {
        self.code.bytes().filter(|&b| b == b'\n').count() as u32
    }

    /// Push synthetic code without an associated map.
    pub fn push_static(&mut self, code: &str) {
        self.push_map(None);
        self.code.push_str(code);
    }

    pub fn push_line(&mut self, code: &str) {
        self.push_static(code);
        self.code.push('\n');
    }

    /// Push original code with its map, if one exists. Without a map this is
    /// no different from synthetic code.
    pub fn push_source(&mut self, code: &str, map: Option<SourceMapJson>) {
        self.push_map(map);
        self.code.push_str(code);
    }

    pub fn write_fmt(&mut self, args: std::fmt::Arguments<'_>) {
        self.push_map(None);
        self.code
            .write_fmt(args)
            .expect("writing to a String is infallible");
    }

    /// Copy an already-built `Code` into this builder, re-anchoring its
    /// mappings at the current position.
    pub fn push_code(&mut self, prebuilt: &Code) {
        match prebuilt.mappings.first() {
            Some((index, _)) if *index > 0 => {
                // the piece starts with a synthetic stretch; terminate the
                // current section first
                self.push_map(None);
            }
            Some(_) => {}
            None => self.push_map(None),
        }
        let base = self.code.len();
        self.mappings.extend(
            prebuilt
                .mappings
                .iter()
                .map(|(index, map)| (index + base, map.clone())),
        );
        self.code.push_str(&prebuilt.code);
    }

    fn push_map(&mut self, map: Option<SourceMapJson>) {
        if map.is_none() && matches!(self.mappings.last(), None | Some((_, None))) {
            // no reason to record an empty map directly after an empty map
            return;
        }
        self.mappings.push((self.code.len(), map));
    }

    pub fn build(self) -> Code {
        Code {
            code: self.code,
            mappings: self.mappings,
        }
    }
}
