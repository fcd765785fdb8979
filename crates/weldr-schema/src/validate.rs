use crate::BlueprintError;

/// True when `name` is non-empty and only contains `[A-Za-z0-9 _.-]`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b' ' | b'_' | b'-' | b'.'))
}

pub fn validate_name(field: &'static str, name: &str) -> Result<(), BlueprintError> {
    if name.is_empty() {
        return Err(BlueprintError::EmptyName);
    }
    if !is_valid_name(name) {
        return Err(BlueprintError::InvalidChars {
            field,
            value: name.to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_portable_names() {
        for name in ["demo", "my blueprint", "http-server_1.2", "A.B-C_D 9"] {
            assert!(is_valid_name(name), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_unicode_and_punctuation() {
        for name in ["", "I ｗ𝒊ll", "a/b", "semi;colon", "tab\there", "quote'"] {
            assert!(!is_valid_name(name), "{name:?} should be invalid");
        }
    }

    #[test]
    fn validate_name_reports_field() {
        let err = validate_name("name", "bad/name").unwrap_err();
        assert!(err.to_string().contains("name"));
        assert!(matches!(
            validate_name("name", ""),
            Err(BlueprintError::EmptyName)
        ));
    }
}
