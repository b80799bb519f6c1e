//! Exact fixed-point currency arithmetic.
//!
//! A [`Currency`] is a signed count of hundredths of a base unit backed by an
//! arbitrary-precision integer, so addition and subtraction are always exact
//! and balances never round. The JSON form is a bare number literal equal to
//! the canonical string with a single trailing zero stripped (`1.00` emits as
//! `1.0`), which keeps lenient consumers from coercing whole amounts to
//! integers.

use crate::error::{Error, Result};
use crate::util::SYMBOL;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Currency(BigInt);

impl Currency {
    /// `n` whole base units.
    pub fn from_units(n: i64) -> Self {
        Currency(BigInt::from(n) * 100)
    }

    /// A currency value from a raw count of hundredths.
    pub fn from_raw(raw: BigInt) -> Self {
        Currency(raw)
    }

    /// The raw count of hundredths.
    pub fn raw(&self) -> &BigInt {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn lt_zero(&self) -> bool {
        self.0.is_negative()
    }

    pub fn gt_zero(&self) -> bool {
        self.0.is_positive()
    }

    /// The exact rational value in base units.
    pub fn to_ratio(&self) -> BigRational {
        BigRational::new(self.0.clone(), BigInt::from(100))
    }

    /// Truncates a rational amount of base units toward zero at the
    /// hundredths place.
    pub fn from_ratio(ratio: &BigRational) -> Self {
        let scaled = ratio.clone() * BigRational::from_integer(BigInt::from(100));
        Currency(scaled.to_integer())
    }

    /// Canonical decimal form: exactly two fractional digits, no symbol, no
    /// separators, leading `-` for negatives.
    pub fn raw_string(&self) -> String {
        let abs = self.0.abs();
        let whole = &abs / 100;
        let frac = (&abs % 100u32).to_u64().unwrap_or(0);
        let sign = if self.0.is_negative() { "-" } else { "" };
        format!("{}{}.{:02}", sign, whole, frac)
    }

    /// Human-readable form: currency symbol after any sign, commas every
    /// three digits of the integer part.
    pub fn display_string(&self) -> String {
        let raw = self.raw_string();
        let (sign, rest) = match raw.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", raw.as_str()),
        };
        let (int_part, frac_part) = rest.split_once('.').unwrap_or((rest, "00"));
        let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
        for (i, c) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(c);
        }
        format!("{}{}{}.{}", sign, SYMBOL, grouped, frac_part)
    }

    /// [`Currency::display_string`] with a `+` prefix for strictly positive
    /// values.
    pub fn delta_string(&self) -> String {
        if self.gt_zero() {
            format!("+{}", self.display_string())
        } else {
            self.display_string()
        }
    }
}

impl FromStr for Currency {
    type Err = Error;

    /// Parses a decimal amount: optional leading currency symbol, optional
    /// sign, digits with optional `_` separators, and an optional fraction
    /// truncated toward zero at the hundredths place.
    fn from_str(s: &str) -> Result<Self> {
        let cleaned: String = s.chars().filter(|c| *c != '_').collect();
        let mut rest = cleaned.as_str();
        rest = rest.strip_prefix(SYMBOL).unwrap_or(rest);
        let negative = match rest.strip_prefix('-') {
            Some(r) => {
                rest = r;
                true
            }
            None => {
                rest = rest.strip_prefix('+').unwrap_or(rest);
                false
            }
        };

        let (int_part, frac_part) = match rest.split_once('.') {
            Some((i, f)) => (i, f),
            None => (rest, ""),
        };
        if int_part.is_empty() || !int_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidAmount);
        }
        if rest.contains('.')
            && (frac_part.is_empty() || !frac_part.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(Error::InvalidAmount);
        }

        let whole = BigInt::from_str(int_part).map_err(|_| Error::InvalidAmount)?;
        // Fraction beyond two digits truncates toward zero.
        let mut hundredths: u32 = 0;
        for (i, c) in frac_part.chars().take(2).enumerate() {
            let digit = c.to_digit(10).unwrap_or(0);
            hundredths += digit * if i == 0 { 10 } else { 1 };
        }
        let mut raw: BigInt = whole * BigInt::from(100) + BigInt::from(hundredths);
        if negative {
            raw = -raw;
        }
        Ok(Currency(raw))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

impl Add for &Currency {
    type Output = Currency;

    fn add(self, rhs: &Currency) -> Currency {
        Currency(&self.0 + &rhs.0)
    }
}

impl Sub for &Currency {
    type Output = Currency;

    fn sub(self, rhs: &Currency) -> Currency {
        Currency(&self.0 - &rhs.0)
    }
}

impl Neg for &Currency {
    type Output = Currency;

    fn neg(self) -> Currency {
        Currency(-&self.0)
    }
}

/// Parses the textual form of a JSON number, routing exponent notation
/// through `f64` the way lenient clients produce it.
fn parse_number_text(text: &str) -> std::result::Result<Currency, Error> {
    if text.contains(['e', 'E']) {
        let value: f64 = text.parse().map_err(|_| Error::InvalidAmount)?;
        if !value.is_finite() {
            return Err(Error::InvalidAmount);
        }
        format!("{}", value).parse()
    } else {
        text.parse()
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut literal = self.raw_string();
        // Strip a single trailing zero. Stripping both would make consumers
        // with weak JSON parsers read the value as an integer.
        if literal.ends_with('0') {
            literal.pop();
        }
        match serde_json::Number::from_str(&literal) {
            Ok(number) => number.serialize(serializer),
            Err(_) => Err(serde::ser::Error::custom("unrepresentable currency value")),
        }
    }
}

struct CurrencyVisitor;

impl<'de> Visitor<'de> for CurrencyVisitor {
    type Value = Currency;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a currency amount as a number or string")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Currency, E> {
        v.parse().map_err(|_| E::custom("invalid currency value"))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<Currency, E> {
        Ok(Currency::from_units(v))
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<Currency, E> {
        Ok(Currency(BigInt::from(v) * 100))
    }

    fn visit_f64<E: serde::de::Error>(self, v: f64) -> std::result::Result<Currency, E> {
        if !v.is_finite() {
            return Err(E::custom("invalid currency value"));
        }
        format!("{}", v)
            .parse()
            .map_err(|_| E::custom("invalid currency value"))
    }

    // With serde_json's arbitrary_precision feature, numbers arrive as an
    // internal single-entry map that deserializes back into a Number.
    fn visit_map<A: MapAccess<'de>>(self, map: A) -> std::result::Result<Currency, A::Error> {
        let number =
            serde_json::Number::deserialize(serde::de::value::MapAccessDeserializer::new(map))?;
        parse_number_text(&number.to_string())
            .map_err(|_| serde::de::Error::custom("invalid currency value"))
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(CurrencyVisitor)
    }
}

/// Serde codec for the snapshot form: the raw hundredths count as a bare
/// integer literal, so backups never re-parse decimal text.
pub mod scaled {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Currency,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match serde_json::Number::from_str(&value.raw().to_string()) {
            Ok(number) => number.serialize(serializer),
            Err(_) => Err(serde::ser::Error::custom("unrepresentable currency value")),
        }
    }

    struct ScaledVisitor;

    impl<'de> Visitor<'de> for ScaledVisitor {
        type Value = Currency;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer count of hundredths")
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<Currency, E> {
            Ok(Currency::from_raw(BigInt::from(v)))
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<Currency, E> {
            Ok(Currency::from_raw(BigInt::from(v)))
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Currency, E> {
            BigInt::from_str(v)
                .map(Currency::from_raw)
                .map_err(|_| E::custom("invalid scaled currency value"))
        }

        fn visit_map<A: MapAccess<'de>>(self, map: A) -> std::result::Result<Currency, A::Error> {
            let number =
                serde_json::Number::deserialize(serde::de::value::MapAccessDeserializer::new(map))?;
            BigInt::from_str(&number.to_string())
                .map(Currency::from_raw)
                .map_err(|_| serde::de::Error::custom("invalid scaled currency value"))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Currency, D::Error> {
        deserializer.deserialize_any(ScaledVisitor)
    }
}
