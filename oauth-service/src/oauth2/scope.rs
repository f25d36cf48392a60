//! Scope strings are hierarchical by prefix: a grant of `users` covers
//! `users.read` and `users.write`, while `users.read` does not cover `users`.

/// Shortest and longest scope a token can carry.
pub const LENGTH: (usize, usize) = (3, 120);
/// Most scopes a single token can carry.
pub const MAX_COUNT: usize = 50;

/// True when some granted scope is a prefix of `required`.
pub fn grants(granted: &[String], required: &str) -> bool {
    granted
        .iter()
        .any(|scope| !scope.is_empty() && required.starts_with(scope.as_str()))
}

/// Splits a space- or comma-separated scope parameter, dropping duplicates.
pub fn parse(raw: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for scope in raw.split([' ', ',']).filter(|s| !s.is_empty()) {
        if !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    scopes
}

/// The first scope outside [`LENGTH`], if any.
pub fn out_of_bounds(scopes: &[String]) -> Option<&str> {
    let (min, max) = LENGTH;
    scopes
        .iter()
        .map(String::as_str)
        .find(|s| s.chars().count() < min || s.chars().count() > max)
}

pub fn join(scopes: &[String]) -> String {
    scopes.join(" ")
}
