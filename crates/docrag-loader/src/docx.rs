use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use docrag_core::error::Result;

use crate::load_error;

const BODY_PART: &str = "word/document.xml";

/// Plain text of a `.docx` body: one line per paragraph, tabs and breaks kept.
pub(crate) fn extract_text(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| load_error(path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| load_error(path, e))?;
    let mut xml = String::new();
    archive
        .by_name(BODY_PART)
        .map_err(|e| load_error(path, format!("{BODY_PART}: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| load_error(path, e))?;

    body_text(&xml).map_err(|e| load_error(path, e))
}

pub(crate) fn body_text(xml: &str) -> std::result::Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => out.push('\t'),
                b"w:br" | b"w:cr" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => out.push_str(&t.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}
