//! Reading and writing the camera model file format.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use lenscal_lensmodels::LensModel;
use lenscal_poses::Rt;
use serde::Deserialize;
use tracing::debug;

use crate::{CameraModel, CameraModelIoError};

#[derive(Debug, Deserialize)]
struct CameraModelRecord {
    lensmodel: String,
    intrinsics: Vec<f64>,
    #[serde(default)]
    extrinsics: Option<Vec<f64>>,
    imagersize: Vec<u32>,
}

/// Parses a camera model from the contents of a file.
pub fn read_cameramodel_string(text: &str) -> Result<CameraModel, CameraModelIoError> {
    let json = strip_trailing_commas(&python_literal_to_json(text)?);
    let record: CameraModelRecord = serde_json::from_str(&json)?;

    let lensmodel = LensModel::from_name(&record.lensmodel)?;
    let rt_cam_ref = match record.extrinsics {
        Some(rt) if rt.len() == 6 => Rt::from_slice(&rt),
        Some(rt) => {
            return Err(CameraModelIoError::InvalidValue {
                key: "extrinsics",
                message: format!("expected 6 values, got {}", rt.len()),
            });
        }
        None => Rt::identity(),
    };
    let imagersize = match record.imagersize.as_slice() {
        [w, h] => [*w, *h],
        other => {
            return Err(CameraModelIoError::InvalidValue {
                key: "imagersize",
                message: format!("expected 2 values, got {}", other.len()),
            });
        }
    };
    CameraModel::new(lensmodel, record.intrinsics, rt_cam_ref, imagersize)
}

/// Reads a camera model file.
pub fn read_cameramodel_file<P: AsRef<Path>>(path: P) -> Result<CameraModel, CameraModelIoError> {
    let path = path.as_ref();
    debug!("reading camera model from {}", path.display());
    read_cameramodel_string(&fs::read_to_string(path)?)
}

/// Formats a camera model. Floats are written in their shortest exact form,
/// so reading the result back gives an identical model.
pub fn write_cameramodel_string(model: &CameraModel) -> Result<String, CameraModelIoError> {
    let name = model.lensmodel().name()?;
    let list = |values: &[f64]| -> Result<String, std::fmt::Error> {
        let mut s = String::new();
        for v in values {
            write!(s, " {v:?},")?;
        }
        Ok(s)
    };
    let [w, h] = model.imagersize();

    let mut out = String::new();
    out.push_str("# generated by lenscal\n{\n");
    writeln!(out, "    'lensmodel':  '{name}',")?;
    out.push_str("    # intrinsics are fx,fy,cx,cy,distortion0,distortion1,....\n");
    writeln!(out, "    'intrinsics': [{} ],", list(model.intrinsics())?)?;
    out.push_str("    # extrinsics are rt_fromref\n");
    writeln!(out, "    'extrinsics': [{} ],", list(&model.extrinsics_rt_fromref().to_array())?)?;
    writeln!(out, "    'imagersize': [ {w}, {h}, ],")?;
    out.push_str("}\n");
    Ok(out)
}

/// Writes a camera model file.
pub fn write_cameramodel_file<P: AsRef<Path>>(
    model: &CameraModel,
    path: P,
) -> Result<(), CameraModelIoError> {
    let path = path.as_ref();
    debug!("writing camera model to {}", path.display());
    fs::write(path, write_cameramodel_string(model)?)?;
    Ok(())
}

/// Drops `#` comments and rewrites single-quoted strings with double quotes.
fn python_literal_to_json(text: &str) -> Result<String, CameraModelIoError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    let mut line = 1;

    while let Some(c) = chars.next() {
        match c {
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        line += 1;
                        break;
                    }
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start_line = line;
                out.push('"');
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            out.push('\\');
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                        }
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        '"' => out.push_str("\\\""),
                        '\n' => break,
                        c => out.push(c),
                    }
                }
                if !closed {
                    return Err(CameraModelIoError::Parse {
                        line: start_line,
                        message: "unterminated string".to_string(),
                    });
                }
                out.push('"');
            }
            '\n' => {
                out.push('\n');
                line += 1;
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Removes commas directly followed (up to whitespace) by `]` or `}`.
/// The input is JSON apart from those commas, so strings are double-quoted.
fn strip_trailing_commas(json: &str) -> String {
    let bytes = json.as_bytes();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in json.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = bytes[i + 1..]
                    .iter()
                    .find(|b| !b.is_ascii_whitespace())
                    .copied();
                if !matches!(next, Some(b']') | Some(b'}')) {
                    out.push(c);
                }
            }
            c => out.push(c),
        }
    }
    out
}
