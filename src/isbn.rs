//! ISBN-10/13 validation and normalization.
//!
//! Every accepted identifier comes out as a 13-digit ISBN. A 10-digit
//! input is re-prefixed with `978` and gets a fresh check digit.

/// Weighted contribution of the `978` prefix under the 1,3,1 weights.
const PREFIX_978_BIAS: u32 = 9 + 7 * 3 + 8;

/// Validate `input` and return its 13-digit form.
///
/// Returns `None` for any length other than 10 or 13, for a bad checksum,
/// or for a non-digit character. The tenth character of a 10-character
/// input may be `X` (value 10).
pub fn normalize(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    match bytes.len() {
        10 => normalize_isbn10(bytes),
        13 => is_valid_isbn13(bytes).then(|| input.to_string()),
        _ => None,
    }
}

/// Remove hyphens and whitespace, as users tend to type them.
pub fn strip_separators(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .collect()
}

/// `normalize` after stripping separators.
pub fn parse(raw: &str) -> Option<String> {
    normalize(&strip_separators(raw))
}

fn digit(b: u8) -> Option<u32> {
    b.is_ascii_digit().then(|| u32::from(b - b'0'))
}

fn normalize_isbn10(bytes: &[u8]) -> Option<String> {
    let mut sum = 0u32;
    for (i, &b) in bytes.iter().enumerate() {
        let value = match b {
            b'X' | b'x' if i == 9 => 10,
            _ => digit(b)?,
        };
        sum += (i as u32 + 1) * value;
    }
    if sum % 11 != 0 {
        return None;
    }

    // Prefix already contributed 9·1 + 7·3 + 8·1; body starts at weight 3.
    let mut acc = PREFIX_978_BIAS;
    for (i, &b) in bytes[..9].iter().enumerate() {
        let weight = if i % 2 == 0 { 3 } else { 1 };
        acc += weight * digit(b)?;
    }
    let check = (10 - acc % 10) % 10;

    let mut out = String::with_capacity(13);
    out.push_str("978");
    out.extend(bytes[..9].iter().map(|&b| char::from(b)));
    out.push(char::from(b'0' + check as u8));
    Some(out)
}

fn is_valid_isbn13(bytes: &[u8]) -> bool {
    let mut acc = 0u32;
    for (i, &b) in bytes[..12].iter().enumerate() {
        let Some(d) = digit(b) else {
            return false;
        };
        let weight = if i % 2 == 0 { 1 } else { 3 };
        acc += weight * d;
    }
    let check = (10 - acc % 10) % 10;
    digit(bytes[12]) == Some(check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_isbn10_converts_to_isbn13() {
        assert_eq!(normalize("9876543210").as_deref(), Some("9789876543217"));
    }

    #[test]
    fn test_isbn10_accepts_x_check_digit() {
        assert_eq!(normalize("987654330X").as_deref(), Some("9789876543309"));
        assert_eq!(normalize("987654330x").as_deref(), Some("9789876543309"));
    }

    #[test]
    fn test_x_only_allowed_in_last_position() {
        assert_eq!(normalize("X876543210"), None);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert_eq!(normalize("123567890"), None);
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("97898765432170"), None);
    }

    #[test]
    fn test_bad_isbn10_checksum_rejected() {
        assert_eq!(normalize("1235678901"), None);
    }

    #[test]
    fn test_isbn13_checked_and_returned_unchanged() {
        assert_eq!(normalize("9789876543217").as_deref(), Some("9789876543217"));
        assert_eq!(normalize("9789876543218"), None);
        assert_eq!(normalize("978987654321X"), None);
    }

    #[test]
    fn test_non_ascii_input_rejected() {
        // Ten bytes, not ten digits.
        assert_eq!(normalize("ééééé"), None);
    }

    #[test]
    fn test_parse_strips_separators() {
        assert_eq!(parse("978-9876-54321-7").as_deref(), Some("9789876543217"));
        assert_eq!(parse(" 98765 43210 ").as_deref(), Some("9789876543217"));
    }

    fn isbn13_from(body: &[u32]) -> String {
        let acc: u32 = body
            .iter()
            .enumerate()
            .map(|(i, d)| if i % 2 == 0 { *d } else { d * 3 })
            .sum();
        let check = (10 - acc % 10) % 10;
        body.iter()
            .chain(std::iter::once(&check))
            .map(|d| char::from_digit(*d, 10).unwrap())
            .collect()
    }

    proptest! {
        #[test]
        fn prop_isbn13_normalize_idempotent(body in proptest::collection::vec(0u32..10, 12)) {
            let isbn = isbn13_from(&body);
            let once = normalize(&isbn);
            prop_assert_eq!(once.as_deref(), Some(isbn.as_str()));
            prop_assert_eq!(normalize(once.as_deref().unwrap()), once.clone());
        }

        #[test]
        fn prop_isbn10_output_is_valid_isbn13(body in proptest::collection::vec(0u32..10, 9)) {
            let sum: u32 = body.iter().enumerate().map(|(i, d)| (i as u32 + 1) * d).sum();
            // Pick the tenth value that makes the weighted sum divisible by 11.
            let check = (0..=10u32).find(|c| (sum + 10 * c) % 11 == 0).unwrap();
            let mut isbn10: String = body.iter().map(|d| char::from_digit(*d, 10).unwrap()).collect();
            isbn10.push(if check == 10 { 'X' } else { char::from_digit(check, 10).unwrap() });

            let isbn13 = normalize(&isbn10).unwrap();
            prop_assert!(isbn13.starts_with("978"));
            prop_assert_eq!(&isbn13[3..12], &isbn10[..9]);
            prop_assert_eq!(normalize(&isbn13), Some(isbn13.clone()));
        }
    }
}
