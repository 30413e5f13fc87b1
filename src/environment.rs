use std::env;
use std::str::FromStr;

/// Retrieves an environment variable and splits it into a vector of strings based on a delimiter.
///
/// Empty segments are dropped, so an unset variable yields an empty vector.
pub fn get_env_var_as_vec(var: &str, delimiter: char) -> Vec<String> {
    env::var(var)
        .unwrap_or_default()
        .split(delimiter)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Reads and parses an environment variable, falling back to `default` when
/// it is unset or does not parse.
pub fn get_env_var_or<T: FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Reads an environment variable as an optional non-empty string.
pub fn get_env_var_opt(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable name; the process environment is shared.

    #[test]
    fn test_vec_drops_empty_segments() {
        env::set_var("MEDLIT_TEST_VEC", " a ; b;;c ");
        assert_eq!(get_env_var_as_vec("MEDLIT_TEST_VEC", ';'), vec!["a", "b", "c"]);
        assert!(get_env_var_as_vec("MEDLIT_TEST_VEC_UNSET", ';').is_empty());
    }

    #[test]
    fn test_parse_with_default() {
        env::set_var("MEDLIT_TEST_PORT", "8080");
        env::set_var("MEDLIT_TEST_BAD_PORT", "eighty");
        assert_eq!(get_env_var_or("MEDLIT_TEST_PORT", 11434u16), 8080);
        assert_eq!(get_env_var_or("MEDLIT_TEST_BAD_PORT", 11434u16), 11434);
        assert_eq!(get_env_var_or("MEDLIT_TEST_PORT_UNSET", 0.3f32), 0.3);
    }

    #[test]
    fn test_optional_blank_is_none() {
        env::set_var("MEDLIT_TEST_BLANK", "   ");
        assert_eq!(get_env_var_opt("MEDLIT_TEST_BLANK"), None);
    }
}
