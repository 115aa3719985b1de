use crate::error::DelMatchError;

pub const DELMATCH_DOMAIN_SUFFIX: &str = ".delmatchcardapio.com";

/// Reduces user input such as `https://loja.delmatchcardapio.com/` to the bare
/// host `loja.delmatchcardapio.com`.
///
/// Only a single `[A-Za-z0-9-]+` label in front of the Del Match domain is
/// accepted.
pub fn normalize_base_url(raw: &str) -> Result<String, DelMatchError> {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme.strip_suffix('/').unwrap_or(without_scheme);

    let label = host
        .strip_suffix(DELMATCH_DOMAIN_SUFFIX)
        .ok_or_else(|| DelMatchError::InvalidDomain(raw.to_string()))?;
    let label_is_valid = !label.is_empty()
        && label.chars().all(|character| character.is_ascii_alphanumeric() || character == '-');
    if !label_is_valid {
        return Err(DelMatchError::InvalidDomain(raw.to_string()));
    }

    Ok(host.to_string())
}
