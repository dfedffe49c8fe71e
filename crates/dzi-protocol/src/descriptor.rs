//! Deep Zoom image descriptor.
//!
//! The descriptor is a small XML document sitting next to the tile tree:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <Image TileSize="256" Overlap="1" Format="png" xmlns="http://schemas.microsoft.com/deepzoom/2008">
//!   <Size Width="600" Height="400"/>
//! </Image>
//! ```
//!
//! Viewers depend on the element names and on `Size` being nested inside
//! `Image`, so both are kept exactly.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use dzi_common::{DziError, DziResult, PyramidGeometry, PyramidSpec, TileFormat};

/// XML namespace of Deep Zoom descriptors.
pub const DEEPZOOM_NAMESPACE: &str = "http://schemas.microsoft.com/deepzoom/2008";

/// The descriptor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub tile_size: u32,
    pub overlap: u32,
    pub format: TileFormat,
    pub width: u32,
    pub height: u32,
}

impl Descriptor {
    pub fn from_spec(spec: &PyramidSpec) -> Self {
        Self {
            tile_size: spec.geometry.tile_size,
            overlap: spec.geometry.overlap,
            format: spec.format,
            width: spec.geometry.width,
            height: spec.geometry.height,
        }
    }

    /// Rebuild the pyramid specification. The level count is not recorded in
    /// the descriptor and is derived from the image size, as viewers do.
    pub fn to_spec(&self) -> DziResult<PyramidSpec> {
        let geometry = PyramidGeometry::new(self.width, self.height, self.tile_size, self.overlap)?;
        Ok(PyramidSpec::new(geometry, self.format))
    }

    /// Serialize to the XML document.
    pub fn to_xml(&self) -> DziResult<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

        let tile_size = self.tile_size.to_string();
        let overlap = self.overlap.to_string();
        let width = self.width.to_string();
        let height = self.height.to_string();

        let mut image = BytesStart::new("Image");
        image.push_attribute(("TileSize", tile_size.as_str()));
        image.push_attribute(("Overlap", overlap.as_str()));
        image.push_attribute(("Format", self.format.extension()));
        image.push_attribute(("xmlns", DEEPZOOM_NAMESPACE));

        let mut size = BytesStart::new("Size");
        size.push_attribute(("Width", width.as_str()));
        size.push_attribute(("Height", height.as_str()));

        let events = [
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
            Event::Start(image),
            Event::Empty(size),
            Event::End(BytesEnd::new("Image")),
        ];
        for event in events {
            writer
                .write_event(event)
                .map_err(|e| DziError::Descriptor(format!("failed to write XML: {}", e)))?;
        }

        let mut xml = String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| DziError::Descriptor(e.to_string()))?;
        xml.push('\n');
        Ok(xml)
    }

    /// Parse the XML document.
    pub fn from_xml(xml: &str) -> DziResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut tile_size = None;
        let mut overlap = None;
        let mut format = None;
        let mut width = None;
        let mut height = None;
        let mut in_image = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"Image" => {
                        in_image = true;
                        for (key, value) in attributes(&e)? {
                            match key.as_str() {
                                "TileSize" => tile_size = Some(parse_number("TileSize", &value)?),
                                "Overlap" => overlap = Some(parse_number("Overlap", &value)?),
                                "Format" => format = Some(value.parse::<TileFormat>()?),
                                _ => {}
                            }
                        }
                    }
                    b"Size" if in_image => {
                        for (key, value) in attributes(&e)? {
                            match key.as_str() {
                                "Width" => width = Some(parse_number("Width", &value)?),
                                "Height" => height = Some(parse_number("Height", &value)?),
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                },
                Ok(Event::End(e)) if e.local_name().as_ref() == b"Image" => in_image = false,
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(DziError::Descriptor(format!(
                        "XML parsing error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
            buf.clear();
        }

        Ok(Self {
            tile_size: tile_size.ok_or_else(|| missing("Image@TileSize"))?,
            overlap: overlap.ok_or_else(|| missing("Image@Overlap"))?,
            format: format.ok_or_else(|| missing("Image@Format"))?,
            width: width.ok_or_else(|| missing("Size@Width"))?,
            height: height.ok_or_else(|| missing("Size@Height"))?,
        })
    }

    /// Write the descriptor file.
    pub fn write_to(&self, path: impl AsRef<Path>) -> DziResult<()> {
        let path = path.as_ref();
        fs::write(path, self.to_xml()?).map_err(|e| DziError::io(path, e))?;
        debug!(path = %path.display(), "Wrote descriptor");
        Ok(())
    }

    /// Read a descriptor file.
    pub fn read_from(path: impl AsRef<Path>) -> DziResult<Self> {
        let path = path.as_ref();
        let xml = fs::read_to_string(path).map_err(|e| DziError::io(path, e))?;
        Self::from_xml(&xml)
    }
}

/// Collect the attributes of an element as owned, unescaped strings.
fn attributes(element: &BytesStart<'_>) -> DziResult<Vec<(String, String)>> {
    element
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| DziError::Descriptor(format!("bad attribute: {}", e)))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| DziError::Descriptor(format!("bad attribute value: {}", e)))?
                .into_owned();
            Ok((key, value))
        })
        .collect()
}

fn parse_number(name: &str, value: &str) -> DziResult<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| DziError::Descriptor(format!("{} is not a non-negative integer: '{}'", name, value)))
}

fn missing(what: &str) -> DziError {
    DziError::Descriptor(format!("missing {}", what))
}
