//! Field splitting and number parsing shared by the decoders.
//!
//! Tokenizing borrows from the message: [`tokens`] yields trimmed `&str`
//! slices lazily and the iterator is `Clone`, so a decoder can look ahead and
//! restart without allocating.

use std::str::Split;

/// Field separator of a response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// `,`
    Comma,
    /// `;`
    Semicolon,
}

/// Window in which an identification string must show a comma to be taken
/// as comma separated.
pub const ID_COMMA_WINDOW: usize = 15;

impl Delimiter {
    /// The separator character.
    pub fn as_char(self) -> char {
        match self {
            Delimiter::Comma => ',',
            Delimiter::Semicolon => ';',
        }
    }

    /// Picks whichever separator occurs first in a data message.
    ///
    /// Defaults to comma when neither is present.
    pub fn detect(message: &str) -> Self {
        match message.find(|c: char| c == ',' || c == ';') {
            Some(i) if message.as_bytes()[i] == b';' => Delimiter::Semicolon,
            _ => Delimiter::Comma,
        }
    }

    /// Separator of an `ID` reply.
    ///
    /// Older firmware answers `FLUKE 189, V2.02, 0082870`, the ScopeMeters use
    /// semicolons and may carry commas deep inside the version field.
    pub fn detect_id(line: &str) -> Self {
        match line.find(',') {
            Some(i) if i < ID_COMMA_WINDOW => Delimiter::Comma,
            _ => Delimiter::Semicolon,
        }
    }
}

/// Lazy iterator over the trimmed fields of a message.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    inner: Split<'a, char>,
}

impl<'a> Iterator for Tokens<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(str::trim)
    }
}

/// Splits `message` on `delimiter`.
pub fn tokens(message: &str, delimiter: Delimiter) -> Tokens<'_> {
    Tokens {
        inner: message.split(delimiter.as_char()),
    }
}

/// Largest decimal exponent accepted by [`parse_number`].
///
/// Covers every finite `f64`, including subnormals.
pub const MAX_EXPONENT: i32 = 400;

/// Parses an ASCII decimal number, returning the value and its digit count.
///
/// The digit count is the number of decimals after the point, corrected by
/// the exponent: `1.234` gives 3, `1.5E+3` gives -2. Anything that is not
/// plain `[+-]digits[.digits][E[+-]digits]` (including `inf` and `NaN`)
/// is rejected, as are exponents beyond [`MAX_EXPONENT`] and values that
/// overflow `f64`.
pub fn parse_number(text: &str) -> Option<(f64, i32)> {
    let text = text.trim();
    if text.is_empty()
        || !text
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
    {
        return None;
    }

    let value: f64 = text.parse().ok().filter(|v: &f64| v.is_finite())?;

    let (mantissa, exponent) = match text.find(|c: char| c == 'e' || c == 'E') {
        Some(i) => (&text[..i], text[i + 1..].parse::<i32>().ok()?),
        None => (text, 0),
    };
    if exponent.unsigned_abs() > MAX_EXPONENT.unsigned_abs() {
        return None;
    }
    let decimals = mantissa
        .split_once('.')
        .map_or(Some(0), |(_, frac)| i32::try_from(frac.len()).ok())?;

    Some((value, decimals.checked_sub(exponent)?))
}
