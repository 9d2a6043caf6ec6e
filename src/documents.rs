//! File extraction: a registry mapping file extensions to extractors.
//!
//! Every extractor turns one file into a JSON payload. Text-like formats
//! produce `{"data": ...}`, tabular formats produce an array of records keyed
//! by column name, and JSON files are passed through as parsed.

use std::collections::HashMap;
use std::io::{BufReader, Read as _};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use serde_json::{Map, Value, json};

use crate::cli::ExtractArgs;
use crate::config::Config;
use crate::dataset::{DatasetAssembler, UploadedFile};
use crate::error::{Error, Result};

pub async fn run(args: ExtractArgs) -> anyhow::Result<()> {
    let mut config = Config::from_env().context("load config")?;
    if let Some(out_dir) = args.out_dir {
        config.output_dir = out_dir.into();
    }
    if let Some(max_token_size) = args.max_token_size {
        config.max_token_size = max_token_size;
    }

    let mut files = Vec::with_capacity(args.files.len());
    for path in args.files {
        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("stat input file: {}", path.display()))?;
        let original_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        if metadata.len() > config.max_file_size {
            return Err(Error::FileSize {
                file_name: original_name,
            })
            .context("check input file size");
        }
        files.push(UploadedFile {
            original_name,
            path,
        });
    }

    let assembler =
        DatasetAssembler::from_config(Arc::new(config)).context("build dataset assembler")?;
    let out = if args.inline {
        let dataset = assembler
            .extract_files_inline(&files)
            .await
            .context("extract files")?;
        serde_json::to_string_pretty(&dataset).context("serialize dataset")?
    } else {
        let summary = assembler.extract_files(&files).await.context("extract files")?;
        serde_json::to_string_pretty(&summary).context("serialize summary")?
    };
    println!("{out}");
    Ok(())
}

pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Value>;
}

/// Extension -> extractor table. Keys are lowercase and carry no dot.
#[derive(Clone, Default)]
pub struct FormatRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
}

impl FormatRegistry {
    /// Registry covering pdf, docx/doc, csv, xls/xlsx, txt/md and json.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register("pdf", PdfText);
        registry.register("docx", WordParagraphs);
        registry.register("doc", WordParagraphs);
        registry.register("csv", CsvRecords);
        registry.register("xls", SpreadsheetRecords);
        registry.register("xlsx", SpreadsheetRecords);
        registry.register("txt", PlainText);
        registry.register("md", PlainText);
        registry.register("json", JsonDocument);
        registry
    }

    pub fn register(&mut self, extension: &str, extractor: impl Extractor + 'static) {
        self.extractors
            .insert(normalize_extension(extension), Arc::new(extractor));
    }

    /// `Ok(None)` for extensions nobody registered.
    pub fn extract(&self, path: &Path, extension: &str) -> Result<Option<Value>> {
        let Some(extractor) = self.extractors.get(&normalize_extension(extension)) else {
            tracing::debug!(path = %path.display(), extension, "no extractor for extension; skipping");
            return Ok(None);
        };
        extractor.extract(path).map(Some)
    }

    /// Dispatches on the file's own extension.
    pub fn extract_path(&self, path: &Path) -> Result<Option<Value>> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        self.extract(path, extension)
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut extensions = self.extractors.keys().collect::<Vec<_>>();
        extensions.sort();
        f.debug_struct("FormatRegistry")
            .field("extensions", &extensions)
            .finish()
    }
}

fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn source(path: &Path) -> String {
    path.display().to_string()
}

pub struct PdfText;

impl Extractor for PdfText {
    fn extract(&self, path: &Path) -> Result<Value> {
        let text = pdf_extract::extract_text(path).map_err(|err| Error::parse(source(path), err))?;
        Ok(json!({ "data": text }))
    }
}

/// Non-blank paragraphs of an OOXML word document.
///
/// Registered for `.doc` too, but only OOXML content is read. A legacy binary
/// (OLE compound file) `.doc` fails with a parse error saying so.
pub struct WordParagraphs;

/// Leading bytes of an OLE compound file, the container of binary `.doc`.
const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

impl Extractor for WordParagraphs {
    fn extract(&self, path: &Path) -> Result<Value> {
        let file = std::fs::File::open(path).map_err(|err| Error::io("open document", path, err))?;
        let mut archive = match zip::ZipArchive::new(file) {
            Ok(archive) => archive,
            Err(_) if is_ole_compound(path)? => {
                return Err(Error::parse(
                    source(path),
                    "legacy binary .doc is not supported; save it as .docx",
                ));
            }
            Err(err) => return Err(Error::parse(source(path), err)),
        };
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .map_err(|err| Error::parse(source(path), err))?
            .read_to_string(&mut xml)
            .map_err(|err| Error::io("read word/document.xml", path, err))?;

        let paragraphs = word_paragraphs(&xml).map_err(|err| Error::parse(source(path), err))?;
        Ok(json!({ "data": paragraphs }))
    }
}

fn is_ole_compound(path: &Path) -> Result<bool> {
    let mut file =
        std::fs::File::open(path).map_err(|err| Error::io("open document", path, err))?;
    let mut head = [0u8; 8];
    match file.read_exact(&mut head) {
        Ok(()) => Ok(head == OLE_MAGIC),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(Error::io("read document header", path, err)),
    }
}

fn word_paragraphs(xml: &str) -> std::result::Result<Vec<String>, quick_xml::Error> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }

    paragraphs.retain(|p| !p.trim().is_empty());
    Ok(paragraphs)
}

pub struct CsvRecords;

impl Extractor for CsvRecords {
    fn extract(&self, path: &Path) -> Result<Value> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|err| Error::parse(source(path), err))?;
        let headers = reader
            .headers()
            .map_err(|err| Error::parse(source(path), err))?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| Error::parse(source(path), err))?;
            let row = headers
                .iter()
                .enumerate()
                .map(|(idx, header)| {
                    let value = record.get(idx).map(infer_scalar).unwrap_or(Value::Null);
                    (header.clone(), value)
                })
                .collect::<Map<_, _>>();
            records.push(Value::Object(row));
        }
        Ok(Value::Array(records))
    }
}

/// Empty -> null, then integer, float and boolean before falling back to text.
fn infer_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = raw.trim().parse::<i64>() {
        return json!(int);
    }
    if let Ok(float) = raw.trim().parse::<f64>()
        && let Some(number) = serde_json::Number::from_f64(float)
    {
        return Value::Number(number);
    }
    match raw.trim() {
        "True" | "true" | "TRUE" => Value::Bool(true),
        "False" | "false" | "FALSE" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// First worksheet; the first row holds the column names.
pub struct SpreadsheetRecords;

impl Extractor for SpreadsheetRecords {
    fn extract(&self, path: &Path) -> Result<Value> {
        use calamine::Reader as _;

        let mut workbook =
            calamine::open_workbook_auto(path).map_err(|err| Error::parse(source(path), err))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| Error::parse(source(path), "workbook has no worksheets"))?
            .map_err(|err| Error::parse(source(path), err))?;

        let mut rows = range.rows();
        let headers = rows
            .next()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>())
            .unwrap_or_default();

        let records = rows
            .map(|row| {
                let record = headers
                    .iter()
                    .enumerate()
                    .map(|(idx, header)| {
                        let value = row.get(idx).map(cell_value).unwrap_or(Value::Null);
                        (header.clone(), value)
                    })
                    .collect::<Map<_, _>>();
                Value::Object(record)
            })
            .collect();
        Ok(Value::Array(records))
    }
}

fn cell_value(cell: &calamine::Data) -> Value {
    use calamine::Data;

    match cell {
        Data::Empty => Value::Null,
        Data::Int(int) => json!(int),
        Data::Float(float) if float.fract() == 0.0 && float.abs() < 9_007_199_254_740_992.0 => {
            json!(*float as i64)
        }
        Data::Float(float) => serde_json::Number::from_f64(*float)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Data::Bool(flag) => Value::Bool(*flag),
        Data::String(text) => Value::String(text.clone()),
        other => Value::String(other.to_string()),
    }
}

/// UTF-8 text with tab characters removed.
pub struct PlainText;

impl Extractor for PlainText {
    fn extract(&self, path: &Path) -> Result<Value> {
        let text =
            std::fs::read_to_string(path).map_err(|err| Error::io("read text file", path, err))?;
        Ok(json!({ "data": text.replace('\t', "") }))
    }
}

pub struct JsonDocument;

impl Extractor for JsonDocument {
    fn extract(&self, path: &Path) -> Result<Value> {
        let file = std::fs::File::open(path).map_err(|err| Error::io("open json file", path, err))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|err| Error::parse(source(path), err))
    }
}
