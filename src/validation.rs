//! Input-shape validators shared by request models

use once_cell::sync::Lazy;
use regex::Regex;
use validator::ValidationError;

static ISBN13: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(978|979)\d{10}$").expect("ISBN-13 pattern is valid")
});

/// Strips the separators allowed in printed ISBNs.
pub fn clean_isbn(isbn: &str) -> String {
    isbn.chars().filter(|c| *c != '-' && !c.is_whitespace()).collect()
}

/// ISBN-13 with a 978/979 prefix and a valid check digit.
pub fn is_valid_isbn13(isbn: &str) -> bool {
    let clean = clean_isbn(isbn);
    if !ISBN13.is_match(&clean) {
        return false;
    }

    let digits: Vec<u32> = clean.chars().filter_map(|c| c.to_digit(10)).collect();
    let sum: u32 = digits
        .iter()
        .take(12)
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { *d } else { d * 3 })
        .sum();
    let check = (10 - sum % 10) % 10;

    digits.get(12) == Some(&check)
}

pub fn validate_isbn(isbn: &str) -> Result<(), ValidationError> {
    if is_valid_isbn13(isbn) {
        Ok(())
    } else {
        Err(ValidationError::new("isbn").with_message("Invalid ISBN-13 format".into()))
    }
}
