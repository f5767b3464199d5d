//! Destination address validation.

const SEPARATORS: [char; 5] = [' ', '-', '(', ')', '.'];

/// Whether `address` looks like something an SMS can be sent to: a dialable
/// number (optionally `+`-prefixed, with common separators) or an email
/// address routed through a carrier gateway.
#[must_use]
pub fn is_valid_sms_or_email(address: &str) -> bool {
    let address = address.trim();
    if address.is_empty() {
        return false;
    }

    if address.contains('@') {
        is_valid_email(address)
    } else {
        is_valid_number(address)
    }
}

fn is_valid_email(address: &str) -> bool {
    if address.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn is_valid_number(address: &str) -> bool {
    let stripped: String = address.chars().filter(|c| !SEPARATORS.contains(c)).collect();
    let digits = stripped.strip_prefix('+').unwrap_or(&stripped);

    !digits.is_empty()
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || c == '*' || c == '#')
        && digits.chars().any(|c| c.is_ascii_digit())
}
