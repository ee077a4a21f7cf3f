//! Helpers shared by the MicMac and Stereopolis XML readers

use quick_xml::de::from_str;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(String),
    #[error("no tag \"{0}\" in XML")]
    MissingTag(&'static str),
    #[error("{tag} should hold {expected} numbers, got \"{text}\"")]
    Floats {
        tag: &'static str,
        expected: usize,
        text: String,
    },
    #[error("{tag} should hold numbers, got \"{text}\"")]
    NotNumbers { tag: &'static str, text: String },
    #[error("{tag} should be \"{expected}\", got \"{found}\"")]
    Unexpected {
        tag: &'static str,
        expected: &'static str,
        found: String,
    },
    #[error("invalid {tag}: {reason}")]
    Invalid { tag: &'static str, reason: String },
}

pub fn parse<T: DeserializeOwned>(xml: &str) -> Result<T, XmlError> {
    from_str(xml).map_err(|e| XmlError::Parse(e.to_string()))
}

/// Whitespace-separated numbers of any count
pub fn float_list(tag: &'static str, text: &str) -> Result<Vec<f64>, XmlError> {
    text.split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| XmlError::NotNumbers {
            tag,
            text: text.to_string(),
        })
}

/// Exactly `N` whitespace-separated numbers
pub fn floats<const N: usize>(tag: &'static str, text: &str) -> Result<[f64; N], XmlError> {
    let invalid = || XmlError::Floats {
        tag,
        expected: N,
        text: text.to_string(),
    };
    let values = float_list(tag, text).map_err(|_| invalid())?;
    <[f64; N]>::try_from(values).map_err(|_| invalid())
}

pub fn required<'a, T>(value: &'a Option<T>, tag: &'static str) -> Result<&'a T, XmlError> {
    value.as_ref().ok_or(XmlError::MissingTag(tag))
}

/// Fail unless the trimmed text of `tag` is `expected`
pub fn check(tag: &'static str, found: &str, expected: &'static str) -> Result<(), XmlError> {
    if found.trim() == expected {
        Ok(())
    } else {
        Err(XmlError::Unexpected {
            tag,
            expected,
            found: found.trim().to_string(),
        })
    }
}

/// Three 3-vectors and an offset as a row-major 3x4 matrix
pub fn mat4x3(rows: [[f64; 3]; 3], offset: [f64; 3]) -> Vec<f64> {
    let mut matrix = Vec::with_capacity(12);
    for (row, t) in rows.into_iter().zip(offset) {
        matrix.extend(row);
        matrix.push(t);
    }
    matrix
}

/// MicMac affinity (`I00`, `V10`, `V01`) as a row-major 2x3 matrix
pub fn mat3x2(origin: [f64; 2], u: [f64; 2], v: [f64; 2]) -> Vec<f64> {
    vec![u[0], v[0], origin[0], u[1], v[1], origin[1]]
}
