//! Reference tables for headerless SAM input.

use noodles::sam;

use super::AlignmentReadError;

/// Ordered `(name, length)` pairs; the order defines reference ids.
pub type ReferenceLengths = Vec<(String, u64)>;

const MAX_REFERENCE_NAME_LEN: usize = 1024;

/// True when `name` ends in `:<digits>` or `:<digits>-<digits>`, which
/// region parsers would read as a position.
fn has_position_suffix(name: &str) -> bool {
    let Some((_, tail)) = name.rsplit_once(':') else {
        return false;
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match tail.split_once('-') {
        Some((start, end)) => all_digits(start) && all_digits(end),
        None => all_digits(tail),
    }
}

/// Check one reference name against the SAM `@SQ SN` rules.
pub fn validate_reference_name(name: &str) -> Result<(), AlignmentReadError> {
    let reason = if name.is_empty() {
        "name cannot be empty"
    } else if name.starts_with('*') || name.starts_with('=') {
        "name cannot start with '*' or '='"
    } else if name.contains(['\t', '\n']) {
        "name cannot contain tabs or newlines"
    } else if name.len() > MAX_REFERENCE_NAME_LEN {
        "name is longer than 1024 characters"
    } else if has_position_suffix(name) {
        "name cannot end with a ':<pos>' or ':<start>-<end>' suffix"
    } else {
        return Ok(());
    };
    Err(AlignmentReadError::InvalidReference {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// Build a header holding one `@SQ` line per reference.
pub fn synthesize_header(references: &[(String, u64)]) -> Result<sam::Header, AlignmentReadError> {
    if references.is_empty() {
        return Err(AlignmentReadError::InvalidReference {
            name: String::new(),
            reason: "reference table is empty".to_string(),
        });
    }
    let mut text = String::new();
    for (name, length) in references {
        validate_reference_name(name)?;
        if *length == 0 {
            return Err(AlignmentReadError::InvalidReference {
                name: name.clone(),
                reason: "length must be positive".to_string(),
            });
        }
        text.push_str(&format!("@SQ\tSN:{name}\tLN:{length}\n"));
    }
    text.parse::<sam::Header>()
        .map_err(|e| AlignmentReadError::InvalidReference {
            name: String::new(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_position_suffix() {
        assert!(has_position_suffix("chr1:100"));
        assert!(has_position_suffix("chr1:100-200"));
        assert!(!has_position_suffix("chr1:"));
        assert!(!has_position_suffix("chr1:10-"));
        assert!(!has_position_suffix("HLA-A*01:01"));
        assert!(!has_position_suffix("chr1"));
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_reference_name("chr1").is_ok());
        for bad in ["", "*x", "=x", "a\tb", "chr1:5"] {
            let err = validate_reference_name(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ParameterError, "{bad:?}");
        }
        assert!(validate_reference_name(&"a".repeat(1025)).is_err());
        assert!(validate_reference_name(&"a".repeat(1024)).is_ok());
    }

    #[test]
    fn test_synthesize_header() {
        let header =
            synthesize_header(&[("chr1".to_string(), 100), ("chr2".to_string(), 50)]).unwrap();
        let refs = header.reference_sequences();
        assert_eq!(refs.len(), 2);
        let (name, _) = refs.get_index(1).unwrap();
        assert_eq!(name.to_string(), "chr2");
    }

    #[test]
    fn test_synthesize_rejects_zero_length_and_empty_table() {
        assert!(synthesize_header(&[("chr1".to_string(), 0)]).is_err());
        assert!(synthesize_header(&[]).is_err());
    }
}
