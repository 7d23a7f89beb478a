//! Human-recognizable record identifiers derived from semantic attributes.

/// Source of the random token suffix. Injected so identifier generation is
/// deterministic under test.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> String;
}

/// Production source: a v4 UUID in simple (hyphen-less) form.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidTokenSource;

impl TokenSource for UuidTokenSource {
    fn token(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Stand-in for records with no known location.
const LOCATION_PLACEHOLDER: &str = "xxx";
const LOCATION_LEN: usize = 3;
const TOKEN_LEN: usize = 5;

fn location_part(location: Option<&str>) -> String {
    let trimmed = location.unwrap_or("").trim();
    if trimmed.is_empty() {
        return LOCATION_PLACEHOLDER.to_string();
    }
    let mut part: String = trimmed
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphabetic())
        .take(LOCATION_LEN)
        .collect();
    while part.len() < LOCATION_LEN {
        part.push('x');
    }
    part
}

/// `user_name` + first three letters of the location (or `xxx`) + first five
/// characters of a random token. Generated once at creation; the result is
/// immutable even if the location field later changes.
pub fn create_unique_id(
    user_name: &str,
    last_known_location: Option<&str>,
    tokens: &dyn TokenSource,
) -> String {
    let token: String = tokens.token().chars().take(TOKEN_LEN).collect();
    format!("{}{}{}", user_name, location_part(last_known_location), token)
}
