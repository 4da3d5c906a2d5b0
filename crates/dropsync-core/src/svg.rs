//! SVG device layout parsing
//!
//! Chip layouts follow the Inkscape convention used by DMF layout
//! editors: electrode shapes are `path` or `polygon` elements inside
//! the layer group whose `inkscape:label` is `Device`. Each electrode
//! carries a `data-channels` attribute naming its actuation channel;
//! shapes without one (guides, labels) are skipped. Geometry handling
//! is intentionally minimal: straight segments are honored and curve
//! commands contribute their endpoints only.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use tracing::debug;

use crate::device::{BoundingBox, DeviceModel, Electrode, ModelError};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("device file is not valid UTF-8")]
    NotUtf8,
    #[error("invalid XML: {0}")]
    Xml(String),
    #[error("no layer labeled \"Device\" in {0}")]
    MissingDeviceLayer(String),
    #[error("electrode {id}: bad channel value {value:?}")]
    BadChannel { id: String, value: String },
    #[error("electrode {id}: {detail}")]
    BadGeometry { id: String, detail: String },
    #[error("invalid layout: {0}")]
    Layout(#[from] ModelError),
}

/// Capability of turning a raw device file into a [`DeviceModel`].
///
/// The sync reactor depends on this seam rather than a concrete
/// parser.
pub trait DeviceParser: Send + Sync {
    fn parse(&self, bytes: &[u8], name: &str) -> Result<DeviceModel, ParseError>;
}

/// Parser for Inkscape-style SVG chip layouts
#[derive(Debug, Default, Clone, Copy)]
pub struct SvgDeviceParser;

impl DeviceParser for SvgDeviceParser {
    fn parse(&self, bytes: &[u8], name: &str) -> Result<DeviceModel, ParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
        let mut reader = Reader::from_str(text);

        let mut depth = 0i32;
        let mut device_layer: Option<i32> = None;
        let mut layer_seen = false;
        let mut electrodes: Vec<Electrode> = Vec::new();
        let mut anonymous = 0usize;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    depth += 1;
                    if device_layer.is_none()
                        && attr_value(&e, b"label")?.as_deref() == Some("Device")
                    {
                        device_layer = Some(depth);
                        layer_seen = true;
                    } else if device_layer.is_some() {
                        if let Some(electrode) = shape_to_electrode(&e, &mut anonymous)? {
                            electrodes.push(electrode);
                        }
                    }
                }
                Ok(Event::Empty(e)) => {
                    if device_layer.is_some() {
                        if let Some(electrode) = shape_to_electrode(&e, &mut anonymous)? {
                            electrodes.push(electrode);
                        }
                    }
                }
                Ok(Event::End(_)) => {
                    if device_layer == Some(depth) {
                        device_layer = None;
                    }
                    depth -= 1;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(ParseError::Xml(e.to_string())),
            }
        }

        if !layer_seen {
            return Err(ParseError::MissingDeviceLayer(name.to_string()));
        }

        Ok(DeviceModel::from_electrodes(name, name, electrodes)?)
    }
}

/// Convert a shape element into an electrode, or `None` when the
/// element is not an electrode shape.
fn shape_to_electrode(
    e: &BytesStart<'_>,
    anonymous: &mut usize,
) -> Result<Option<Electrode>, ParseError> {
    let local = e.name();
    let local = local.local_name();
    let is_path = local.as_ref() == b"path";
    let is_polygon = local.as_ref() == b"polygon";
    if !is_path && !is_polygon {
        return Ok(None);
    }

    let id = match attr_value(e, b"id")? {
        Some(id) => id,
        None => {
            let id = format!("electrode{:03}", *anonymous);
            *anonymous += 1;
            id
        }
    };

    let Some(channels) = attr_value(e, b"data-channels")? else {
        debug!(id = %id, "shape without data-channels skipped");
        return Ok(None);
    };
    let channel: u32 = channels.trim().parse().map_err(|_| ParseError::BadChannel {
        id: id.clone(),
        value: channels.clone(),
    })?;

    let default_channel = match attr_value(e, b"data-default-channels")? {
        Some(value) => Some(value.trim().parse().map_err(|_| ParseError::BadChannel {
            id: id.clone(),
            value,
        })?),
        None => None,
    };

    let vertices = if is_path {
        let d = attr_value(e, b"d")?.unwrap_or_default();
        path_vertices(&d).map_err(|detail| ParseError::BadGeometry {
            id: id.clone(),
            detail,
        })?
    } else {
        let points = attr_value(e, b"points")?.unwrap_or_default();
        point_list_vertices(&points).map_err(|detail| ParseError::BadGeometry {
            id: id.clone(),
            detail,
        })?
    };
    if vertices.len() < 3 {
        return Err(ParseError::BadGeometry {
            id,
            detail: format!("only {} vertices", vertices.len()),
        });
    }

    let mut bounds = BoundingBox::point(vertices[0].0, vertices[0].1);
    for &(x, y) in &vertices[1..] {
        bounds = bounds.union(&BoundingBox::point(x, y));
    }

    Ok(Some(Electrode {
        id,
        channel,
        default_channel,
        area: shoelace_area(&vertices),
        bounds,
    }))
}

/// Fetch an attribute by local name (namespace prefixes ignored, so
/// `inkscape:label` matches `label`)
fn attr_value(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, ParseError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ParseError::Xml(err.to_string()))?;
        if attr.key.local_name().as_ref() == name {
            let value = attr
                .unescape_value()
                .map_err(|err| ParseError::Xml(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Polygon area by the shoelace formula
fn shoelace_area(vertices: &[(f64, f64)]) -> f64 {
    let mut sum = 0.0;
    for i in 0..vertices.len() {
        let (x0, y0) = vertices[i];
        let (x1, y1) = vertices[(i + 1) % vertices.len()];
        sum += x0 * y1 - x1 * y0;
    }
    sum.abs() / 2.0
}

#[derive(Debug, Clone, Copy)]
enum Tok {
    Cmd(u8),
    Num(f64),
}

fn tokenize(data: &str) -> Result<Vec<Tok>, String> {
    let bytes = data.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\n' | b'\r' | b',' => i += 1,
            c @ (b'A'..=b'Z' | b'a'..=b'z') => {
                toks.push(Tok::Cmd(c));
                i += 1;
            }
            _ => {
                let start = i;
                if bytes[i] == b'+' || bytes[i] == b'-' {
                    i += 1;
                }
                let mut seen_dot = false;
                while i < bytes.len() {
                    match bytes[i] {
                        b'0'..=b'9' => i += 1,
                        b'.' if !seen_dot => {
                            seen_dot = true;
                            i += 1;
                        }
                        b'e' | b'E' => {
                            i += 1;
                            if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
                                i += 1;
                            }
                        }
                        _ => break,
                    }
                }
                let tok = &data[start..i];
                let n: f64 = tok.parse().map_err(|_| format!("bad number {tok:?}"))?;
                toks.push(Tok::Num(n));
            }
        }
    }
    Ok(toks)
}

fn take_num(toks: &[Tok], i: &mut usize) -> Result<f64, String> {
    match toks.get(*i) {
        Some(Tok::Num(n)) => {
            *i += 1;
            Ok(*n)
        }
        _ => Err("expected coordinate".to_string()),
    }
}

fn take_pair(toks: &[Tok], i: &mut usize) -> Result<(f64, f64), String> {
    let x = take_num(toks, i)?;
    let y = take_num(toks, i)?;
    Ok((x, y))
}

/// Extract the vertex list of a path `d` attribute. Straight segments
/// (`M`/`L`/`H`/`V`, absolute or relative) are honored exactly; curve
/// commands contribute their endpoints only.
fn path_vertices(d: &str) -> Result<Vec<(f64, f64)>, String> {
    let toks = tokenize(d)?;
    let mut vertices: Vec<(f64, f64)> = Vec::new();
    let mut cur = (0.0, 0.0);
    let mut cmd: Option<u8> = None;
    let mut i = 0;

    while i < toks.len() {
        if let Tok::Cmd(c) = toks[i] {
            cmd = Some(c);
            i += 1;
            continue;
        }
        let c = cmd.ok_or_else(|| "coordinate before any command".to_string())?;
        // A relative moveto at the very start of path data is absolute
        let rel = c.is_ascii_lowercase() && !vertices.is_empty();
        match c.to_ascii_uppercase() {
            b'M' | b'L' | b'T' => {
                let (x, y) = take_pair(&toks, &mut i)?;
                cur = endpoint(cur, x, y, rel);
                vertices.push(cur);
            }
            b'H' => {
                let x = take_num(&toks, &mut i)?;
                cur.0 = if rel { cur.0 + x } else { x };
                vertices.push(cur);
            }
            b'V' => {
                let y = take_num(&toks, &mut i)?;
                cur.1 = if rel { cur.1 + y } else { y };
                vertices.push(cur);
            }
            b'C' => {
                take_pair(&toks, &mut i)?;
                take_pair(&toks, &mut i)?;
                let (x, y) = take_pair(&toks, &mut i)?;
                cur = endpoint(cur, x, y, rel);
                vertices.push(cur);
            }
            b'S' | b'Q' => {
                take_pair(&toks, &mut i)?;
                let (x, y) = take_pair(&toks, &mut i)?;
                cur = endpoint(cur, x, y, rel);
                vertices.push(cur);
            }
            b'A' => {
                for _ in 0..5 {
                    take_num(&toks, &mut i)?;
                }
                let (x, y) = take_pair(&toks, &mut i)?;
                cur = endpoint(cur, x, y, rel);
                vertices.push(cur);
            }
            b'Z' => return Err("unexpected coordinates after Z".to_string()),
            other => return Err(format!("unsupported path command {}", other as char)),
        }
    }
    Ok(vertices)
}

fn endpoint(cur: (f64, f64), x: f64, y: f64, rel: bool) -> (f64, f64) {
    if rel {
        (cur.0 + x, cur.1 + y)
    } else {
        (x, y)
    }
}

/// Extract vertices from a polygon `points` attribute
fn point_list_vertices(points: &str) -> Result<Vec<(f64, f64)>, String> {
    let toks = tokenize(points)?;
    if toks.iter().any(|t| matches!(t, Tok::Cmd(_))) {
        return Err("unexpected letter in points list".to_string());
    }
    if toks.len() % 2 != 0 {
        return Err("odd number of coordinates".to_string());
    }
    let mut vertices = Vec::with_capacity(toks.len() / 2);
    let mut i = 0;
    while i < toks.len() {
        vertices.push(take_pair(&toks, &mut i)?);
    }
    Ok(vertices)
}
