//! Document model
//!
//! A [`Document`] is the JSON notebook format: an ordered list of blocks
//! (code, markup or raw), each owning its source and, for code blocks, the
//! outputs produced by the last execution.
//!
//! Reading distinguishes files that are not UTF-8 from files that are not a
//! valid document, see [`DocumentError`]. Writing emits one-space indented
//! JSON with sources split into line lists, which is what notebook tooling
//! produces and keeps diffs small.

use crate::error::{DocumentError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Kind of a block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Executable source
    Code,
    /// Markup (markdown) text
    Markdown,
    /// Raw text passed through untouched
    Raw,
}

/// One output produced by executing a code block
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    /// Text written to a stream
    Stream {
        /// Stream name ("stdout" or "stderr")
        name: String,
        /// Text written
        #[serde(with = "multiline")]
        text: String,
    },
    /// Exception raised by the block
    Error {
        /// Exception name
        ename: String,
        /// Exception value
        evalue: String,
        /// Traceback lines
        #[serde(default)]
        traceback: Vec<String>,
    },
    /// Rich payload keyed by mime type
    DisplayData {
        /// Mime type to payload
        #[serde(default)]
        data: Map<String, Value>,
        /// Display metadata
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    /// Value of the block's last expression
    ExecuteResult {
        /// Execution counter of the block
        #[serde(default)]
        execution_count: Option<u32>,
        /// Mime type to payload
        #[serde(default)]
        data: Map<String, Value>,
        /// Display metadata
        #[serde(default)]
        metadata: Map<String, Value>,
    },
}

impl Output {
    /// Plain-text view of the output, if it has one
    pub fn text(&self) -> Option<String> {
        match self {
            Output::Stream { text, .. } => Some(text.clone()),
            Output::Error { ename, evalue, .. } => Some(format!("{}: {}", ename, evalue)),
            Output::DisplayData { data, .. } | Output::ExecuteResult { data, .. } => {
                data.get("text/plain").map(multiline::value_to_string)
            }
        }
    }

    /// Whether this output is an exception
    pub fn is_error(&self) -> bool {
        matches!(self, Output::Error { .. })
    }
}

/// One unit of source plus its outputs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBlock", into = "RawBlock")]
pub struct Block {
    /// Block kind
    pub kind: BlockKind,
    /// Cell identifier (nbformat 4.5+)
    pub id: Option<String>,
    /// Source text
    pub source: String,
    /// Free-form metadata
    pub metadata: Map<String, Value>,
    /// Outputs of the last execution (code blocks only)
    pub outputs: Vec<Output>,
    /// Execution counter of the last execution (code blocks only)
    pub execution_count: Option<u32>,
    /// Attachments of markup blocks
    pub attachments: Option<Value>,
}

impl Block {
    /// A code block with no outputs
    pub fn code(source: impl Into<String>) -> Self {
        Self::new(BlockKind::Code, source)
    }

    /// A markup block
    pub fn markdown(source: impl Into<String>) -> Self {
        Self::new(BlockKind::Markdown, source)
    }

    fn new(kind: BlockKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            id: None,
            source: source.into(),
            metadata: Map::new(),
            outputs: Vec::new(),
            execution_count: None,
            attachments: None,
        }
    }

    /// Whether the block is executable
    pub fn is_code(&self) -> bool {
        self.kind == BlockKind::Code
    }

    /// Concatenated plain text of every output
    pub fn output_text(&self) -> String {
        self.outputs.iter().filter_map(Output::text).collect()
    }
}

// On-disk shape: code-only fields are present exactly on code cells.
#[derive(Serialize, Deserialize)]
struct RawBlock {
    cell_type: BlockKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(with = "multiline")]
    source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attachments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outputs: Option<Vec<Output>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    execution_count: Option<Value>,
}

impl From<RawBlock> for Block {
    fn from(raw: RawBlock) -> Self {
        Self {
            kind: raw.cell_type,
            id: raw.id,
            source: raw.source,
            metadata: raw.metadata,
            outputs: raw.outputs.unwrap_or_default(),
            execution_count: raw
                .execution_count
                .and_then(|v| v.as_u64())
                .and_then(|n| u32::try_from(n).ok()),
            attachments: raw.attachments,
        }
    }
}

impl From<Block> for RawBlock {
    fn from(block: Block) -> Self {
        let is_code = block.is_code();
        Self {
            cell_type: block.kind,
            id: block.id,
            metadata: block.metadata,
            source: block.source,
            attachments: block.attachments,
            outputs: is_code.then_some(block.outputs),
            execution_count: is_code
                .then(|| block.execution_count.map(Value::from).unwrap_or(Value::Null)),
        }
    }
}

/// An ordered collection of blocks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Blocks in source order
    pub cells: Vec<Block>,
    /// Document metadata (kernel spec, language info, ...)
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Major format version
    #[serde(default = "default_nbformat")]
    pub nbformat: u32,
    /// Minor format version
    #[serde(default = "default_nbformat_minor")]
    pub nbformat_minor: u32,
}

fn default_nbformat() -> u32 {
    4
}

fn default_nbformat_minor() -> u32 {
    4
}

impl Document {
    /// A document made of the given blocks
    pub fn new(cells: Vec<Block>) -> Self {
        Self {
            cells,
            metadata: Map::new(),
            nbformat: default_nbformat(),
            nbformat_minor: default_nbformat_minor(),
        }
    }

    /// Parse a document from raw bytes
    ///
    /// `path` is only used to label errors.
    pub fn parse(bytes: &[u8], path: &Path) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|_| DocumentError::Encoding {
            path: path.to_path_buf(),
        })?;
        let document = serde_json::from_str(text).map_err(|e| DocumentError::Structure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(document)
    }

    /// Read and parse a document file
    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Self::parse(&bytes, path)
    }

    /// Serialize the document
    pub fn to_json(&self) -> Result<String> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.serialize(&mut serializer)?;
        buffer.push(b'\n');
        String::from_utf8(buffer).map_err(|e| crate::Error::Other(e.to_string()))
    }

    /// Serialize the document to a file
    pub async fn write(&self, path: &Path) -> Result<()> {
        let text = self.to_json()?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    /// Number of code blocks
    pub fn code_block_count(&self) -> usize {
        self.cells.iter().filter(|b| b.is_code()).count()
    }
}

/// Strings stored either as one string or as a list of lines
mod multiline {
    use serde::{Deserialize, Deserializer, Serializer, ser::SerializeSeq};
    use serde_json::Value;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrLines {
        One(String),
        Lines(Vec<String>),
    }

    pub fn serialize<S>(text: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let mut seq = serializer.serialize_seq(Some(lines.len()))?;
        for line in lines {
            seq.serialize_element(line)?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match StringOrLines::deserialize(deserializer)? {
            StringOrLines::One(s) => s,
            StringOrLines::Lines(lines) => lines.concat(),
        })
    }

    pub fn value_to_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            other => other.to_string(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"{
 "cells": [
  {
   "cell_type": "markdown",
   "metadata": {},
   "source": ["# Title\n", "Some text"]
  },
  {
   "cell_type": "code",
   "execution_count": 3,
   "metadata": {"collapsed": false},
   "outputs": [
    {"output_type": "stream", "name": "stdout", "text": ["2\n"]},
    {"output_type": "execute_result", "execution_count": 3,
     "data": {"text/plain": ["'abc'"]}, "metadata": {}}
   ],
   "source": "x = 1\nprint(x + 1)"
  }
 ],
 "metadata": {"kernelspec": {"name": "python3"}},
 "nbformat": 4,
 "nbformat_minor": 2
}"##;

    #[test]
    fn parses_string_and_list_sources() {
        let doc = Document::parse(SAMPLE.as_bytes(), Path::new("sample.ipynb")).unwrap();

        assert_eq!(doc.cells.len(), 2);
        assert_eq!(doc.cells[0].kind, BlockKind::Markdown);
        assert_eq!(doc.cells[0].source, "# Title\nSome text");
        assert_eq!(doc.cells[1].source, "x = 1\nprint(x + 1)");
        assert_eq!(doc.cells[1].execution_count, Some(3));
        assert_eq!(doc.cells[1].output_text(), "2\n'abc'");
        assert_eq!(doc.nbformat_minor, 2);
        assert_eq!(doc.code_block_count(), 1);
    }

    #[test]
    fn serializes_code_fields_only_on_code_cells() {
        let doc = Document::parse(SAMPLE.as_bytes(), Path::new("sample.ipynb")).unwrap();
        let json: Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();

        let markdown = &json["cells"][0];
        assert!(markdown.get("outputs").is_none());
        assert!(markdown.get("execution_count").is_none());
        assert_eq!(markdown["source"], serde_json::json!(["# Title\n", "Some text"]));

        let code = &json["cells"][1];
        assert_eq!(code["execution_count"], 3);
        assert_eq!(code["outputs"][0]["output_type"], "stream");
        assert_eq!(json["metadata"]["kernelspec"]["name"], "python3");
    }

    #[test]
    fn unexecuted_code_cell_has_null_execution_count() {
        let doc = Document::new(vec![Block::code("pass")]);
        let json: Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();

        assert!(json["cells"][0]["execution_count"].is_null());
        assert_eq!(json["cells"][0]["outputs"], serde_json::json!([]));
    }

    #[test]
    fn one_space_indentation() {
        let text = Document::new(vec![]).to_json().unwrap();
        assert!(text.starts_with("{\n \"cells\""));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn invalid_utf8_is_an_encoding_error() {
        let err = Document::parse(&[0xff, 0xfe, 0x00], Path::new("bad.ipynb")).unwrap_err();
        assert_eq!(err.error_code(), "document_encoding");
    }

    #[test]
    fn invalid_json_is_a_structure_error() {
        let err = Document::parse(b"{\"cells\": 12}", Path::new("bad.ipynb")).unwrap_err();
        assert_eq!(err.error_code(), "document_structure");
        assert!(err.to_string().contains("bad.ipynb"));
    }

    #[test]
    fn error_output_text() {
        let output = Output::Error {
            ename: "ValueError".into(),
            evalue: "boom".into(),
            traceback: vec![],
        };
        assert!(output.is_error());
        assert_eq!(output.text().as_deref(), Some("ValueError: boom"));
    }

    #[tokio::test]
    async fn write_then_read_preserves_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("doc.ipynb");
        let doc = Document::parse(SAMPLE.as_bytes(), Path::new("sample.ipynb")).unwrap();

        doc.write(&path).await.unwrap();
        let reread = Document::read(&path).await.unwrap();
        assert_eq!(reread, doc);
    }
}
