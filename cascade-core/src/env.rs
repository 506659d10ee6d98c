//! Environment variable validation

use std::collections::HashMap;

/// Whether the name is a valid environment variable identifier:
/// a letter or underscore followed by letters, digits or underscores.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether every entry of the map is a valid environment variable definition.
pub fn are_environment_variables_valid(env: &HashMap<String, String>) -> bool {
    env.keys().all(|name| is_valid_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("PATH"));
        assert!(is_valid_name("_private"));
        assert!(is_valid_name("VAR_2"));
    }

    #[test]
    fn test_invalid_names() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("2VAR"));
        assert!(!is_valid_name("MY-VAR"));
        assert!(!is_valid_name("MY VAR"));
    }

    #[test]
    fn test_map_validation() {
        let valid = HashMap::from([("A".to_string(), "1".to_string())]);
        assert!(are_environment_variables_valid(&valid));

        let invalid = HashMap::from([("A B".to_string(), "1".to_string())]);
        assert!(!are_environment_variables_valid(&invalid));
    }
}
