//! Best-effort decoding of patient identity strings.
//!
//! DICOM text may arrive in a character set the reader does not know. Each
//! field is decoded by trying several interpretations and keeping the first
//! that is non-empty and free of replacement or control characters. A field
//! that cannot be decoded degrades to [`UNKNOWN`] on its own; it never fails
//! the load.

use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use std::borrow::Cow;
use tracing::debug;

pub const UNKNOWN: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientIdentity {
    pub name: String,
    pub id: String,
}

impl Default for PatientIdentity {
    fn default() -> Self {
        Self {
            name: UNKNOWN.to_string(),
            id: UNKNOWN.to_string(),
        }
    }
}

impl PatientIdentity {
    pub fn new(name: Option<&str>, id: Option<&str>) -> Self {
        let field = |value: Option<&str>| {
            value
                .and_then(|v| accept(Cow::Borrowed(v)))
                .unwrap_or_else(|| UNKNOWN.to_string())
        };
        Self {
            name: field(name.map(person_name).as_deref()),
            id: field(id),
        }
    }

    pub fn from_dicom(dicom_object: &InMemDicomObject) -> Self {
        let name = decode_element(dicom_object, tags::PATIENT_NAME).map(|n| person_name(&n));
        let id = decode_element(dicom_object, tags::PATIENT_ID);
        if name.is_none() || id.is_none() {
            debug!(name = name.is_some(), id = id.is_some(), "Patient identity partly undecodable");
        }
        Self {
            name: name.unwrap_or_else(|| UNKNOWN.to_string()),
            id: id.unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }
}

fn decode_element(dicom_object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<String> {
    let element = dicom_object.element(tag).ok()?;
    let mut candidates: Vec<Cow<'_, str>> = Vec::new();
    if let Ok(text) = element.to_str() {
        candidates.push(text);
    }
    if let Ok(raw) = element.to_bytes() {
        candidates.extend(raw_decodings(&raw).into_iter().map(Cow::Owned));
    }
    decode_field(candidates)
}

/// Returns the first acceptable candidate, trimmed of DICOM padding.
pub fn decode_field<'a, I>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Cow<'a, str>>,
{
    candidates.into_iter().find_map(accept)
}

/// Interpretations of raw bytes in order of preference: UTF-8, then Latin-1.
pub fn raw_decodings(raw: &[u8]) -> Vec<String> {
    let mut decodings = Vec::with_capacity(2);
    if let Ok(text) = std::str::from_utf8(raw) {
        decodings.push(text.to_string());
    }
    decodings.push(raw.iter().map(|&b| b as char).collect());
    decodings
}

fn accept(candidate: Cow<'_, str>) -> Option<String> {
    let trimmed = candidate.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    let clean = !trimmed.is_empty()
        && !trimmed
            .chars()
            .any(|c| c == char::REPLACEMENT_CHARACTER || c.is_control());
    clean.then(|| trimmed.to_string())
}

/// Person names separate components with `^`.
fn person_name(raw: &str) -> String {
    raw.split('^')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_degrade_independently() {
        let identity = PatientIdentity::new(Some("DOE^JANE"), None);
        assert_eq!(identity.name, "DOE JANE");
        assert_eq!(identity.id, UNKNOWN);
        assert_eq!(PatientIdentity::new(None, Some("  ")).id, UNKNOWN);
    }

    #[test]
    fn replacement_characters_fall_through_to_next_candidate() {
        let decoded = decode_field([
            Cow::Borrowed("M\u{FFFD}ller"),
            Cow::Owned("Müller".to_string()),
        ]);
        assert_eq!(decoded.as_deref(), Some("Müller"));
    }

    #[test]
    fn nothing_decodable_yields_none() {
        assert_eq!(decode_field([Cow::Borrowed("\u{FFFD}"), Cow::Borrowed("")]), None);
    }

    #[test]
    fn latin1_bytes_decode_when_utf8_fails() {
        let raw = b"M\xfcller ";
        let decodings = raw_decodings(raw);
        assert_eq!(decodings.len(), 1);
        assert_eq!(decode_field(decodings.into_iter().map(Cow::Owned)).as_deref(), Some("Müller"));
    }

    #[test]
    fn padding_is_trimmed() {
        assert_eq!(decode_field([Cow::Borrowed("12345\0")]).as_deref(), Some("12345"));
    }
}
