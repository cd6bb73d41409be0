use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

// Longer symbols first so "US$" wins over "$".
const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("USD", "USD"),
    ("EUR", "EUR"),
    ("GBP", "GBP"),
    ("CHF", "CHF"),
    ("US$", "USD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("$", "USD"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPrice {
    pub amount: Decimal,
    pub currency: String,
}

impl ParsedPrice {
    pub fn as_f64(&self) -> Option<f64> {
        self.amount.to_f64()
    }
}

/// Reads prices written in either European (`1.299,99 €`) or US
/// (`$1,299.99`) notation.
#[derive(Debug, Clone)]
pub struct PriceParser {
    number_regex: Regex,
    default_currency: String,
}

impl PriceParser {
    pub fn new(default_currency: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            number_regex: Regex::new(r"\d(?:[\d.,'\u{00a0}\u{202f}]*\d)?")?,
            default_currency: default_currency.to_string(),
        })
    }

    pub fn parse(&self, text: &str) -> Option<ParsedPrice> {
        let raw = self.number_regex.find(text)?.as_str();
        let amount = Decimal::from_str(&normalize_number(raw)).ok()?;
        let currency = self
            .extract_currency(text)
            .unwrap_or_else(|| self.default_currency.clone());

        Some(ParsedPrice { amount, currency })
    }

    fn extract_currency(&self, text: &str) -> Option<String> {
        CURRENCY_SYMBOLS
            .iter()
            .find(|(symbol, _)| text.contains(symbol))
            .map(|(_, code)| code.to_string())
    }
}

/// Decides whether the last `.` or `,` is the decimal separator. It is when
/// one or two digits follow it, when it is the only separator and is not
/// followed by a group of exactly three digits, or when it differs from the
/// separators before it (`1,299.5`). Every other separator groups thousands.
fn normalize_number(raw: &str) -> String {
    let digits_only = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();

    let Some(pos) = raw.rfind(['.', ',']) else {
        return digits_only(raw);
    };
    let fraction = &raw[pos + 1..];
    if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return digits_only(raw);
    }

    let separator = char::from(raw.as_bytes()[pos]);
    let earlier: Vec<char> = raw[..pos].chars().filter(|c| matches!(c, '.' | ',')).collect();
    let differs_from_earlier = earlier.iter().all(|c| *c != separator);
    let is_decimal = match fraction.len() {
        1 | 2 => true,
        3 => !earlier.is_empty() && differs_from_earlier,
        _ => differs_from_earlier,
    };

    if is_decimal {
        format!("{}.{}", digits_only(&raw[..pos]), fraction)
    } else {
        digits_only(raw)
    }
}
