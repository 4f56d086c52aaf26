//! Exact rational quantities.
//!
//! Every flow quantity in the engine is a [`Ratio`]: a reduced fraction with
//! a strictly positive denominator. Binary floats never enter the graph;
//! quantities are displayed as exact decimals or `p/q`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while parsing a quantity string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RatioError {
    #[error("empty quantity")]
    Empty,
    #[error("malformed quantity: {0:?}")]
    Malformed(String),
    #[error("zero denominator in {0:?}")]
    ZeroDenominator(String),
}

// ---------------------------------------------------------------------------
// Integer helpers
// ---------------------------------------------------------------------------

/// Greatest common divisor (Euclid). Always non-negative; `gcd(0, 0) == 0`.
///
/// Neither argument may be `i128::MIN`; no [`Ratio`] ever holds it.
pub fn gcd(a: i128, b: i128) -> i128 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Least common multiple, or `None` if it does not fit an `i128`. Zero if
/// either argument is zero.
pub fn lcm(a: i128, b: i128) -> Option<i128> {
    if a == 0 || b == 0 {
        return Some(0);
    }
    (a / gcd(a, b)).checked_mul(b).and_then(i128::checked_abs)
}

// ---------------------------------------------------------------------------
// Ratio
// ---------------------------------------------------------------------------

/// A reduced fraction `num / den` with `den > 0`.
///
/// Neither part is ever `i128::MIN`, so negation and `abs` cannot overflow.
/// The `checked_*` methods return `None` when a result does not fit; the
/// operators panic instead, and are only used on quantities already screened
/// by the planner's input validation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ratio {
    num: i128,
    den: i128,
}

impl Ratio {
    pub const ZERO: Ratio = Ratio { num: 0, den: 1 };
    pub const ONE: Ratio = Ratio { num: 1, den: 1 };

    /// Build a reduced ratio. Panics on a zero denominator or an
    /// unrepresentable part.
    pub fn new(num: i128, den: i128) -> Self {
        assert!(den != 0, "ratio with zero denominator");
        Self::checked_new(num, den).unwrap_or_else(|| panic!("ratio {num}/{den} out of range"))
    }

    /// Build a reduced ratio, or `None` for a zero denominator or a part
    /// equal to `i128::MIN`.
    pub fn checked_new(num: i128, den: i128) -> Option<Self> {
        if den == 0 || num == i128::MIN || den == i128::MIN {
            return None;
        }
        let g = gcd(num, den);
        let sign = if den < 0 { -1 } else { 1 };
        Some(Ratio {
            num: sign * (num / g),
            den: sign * (den / g),
        })
    }

    /// A whole number as a ratio.
    pub const fn from_integer(n: i128) -> Self {
        Ratio { num: n, den: 1 }
    }

    /// Numerator in lowest terms; carries the sign.
    pub fn numer(&self) -> i128 {
        self.num
    }

    /// Denominator in lowest terms; always positive.
    pub fn denom(&self) -> i128 {
        self.den
    }

    /// Whether the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    /// Whether the value is strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.num > 0
    }

    /// Whether the denominator is one.
    pub fn is_integer(&self) -> bool {
        self.den == 1
    }

    /// The integer value, if this ratio has no fractional part.
    pub fn to_integer(&self) -> Option<i128> {
        self.is_integer().then_some(self.num)
    }

    // -----------------------------------------------------------------------
    // Checked arithmetic
    // -----------------------------------------------------------------------

    /// `self + rhs`, or `None` on overflow.
    pub fn checked_add(self, rhs: Ratio) -> Option<Ratio> {
        let g = gcd(self.den, rhs.den);
        let (left, right) = (self.den / g, rhs.den / g);
        let num = self
            .num
            .checked_mul(right)?
            .checked_add(rhs.num.checked_mul(left)?)?;
        Ratio::checked_new(num, left.checked_mul(rhs.den)?)
    }

    /// `self - rhs`, or `None` on overflow.
    pub fn checked_sub(self, rhs: Ratio) -> Option<Ratio> {
        self.checked_add(-rhs)
    }

    /// `self * rhs`, or `None` on overflow. Cross-reduces first so products
    /// only overflow when the result itself does not fit.
    pub fn checked_mul(self, rhs: Ratio) -> Option<Ratio> {
        let g1 = gcd(self.num, rhs.den);
        let g2 = gcd(rhs.num, self.den);
        let num = (self.num / g1).checked_mul(rhs.num / g2)?;
        let den = (self.den / g2).checked_mul(rhs.den / g1)?;
        Ratio::checked_new(num, den)
    }

    /// `self / rhs`, or `None` on overflow or division by zero.
    pub fn checked_div(self, rhs: Ratio) -> Option<Ratio> {
        if rhs.is_zero() {
            return None;
        }
        let sign = rhs.num.signum();
        self.checked_mul(Ratio {
            num: sign * rhs.den,
            den: rhs.num.abs(),
        })
    }

    /// Sum of `values`, or `None` if any partial sum overflows.
    pub fn checked_sum<'a>(values: impl IntoIterator<Item = &'a Ratio>) -> Option<Ratio> {
        values
            .into_iter()
            .try_fold(Ratio::ZERO, |acc, &v| acc.checked_add(v))
    }

    // -----------------------------------------------------------------------
    // Decimal form
    // -----------------------------------------------------------------------

    /// Whether the decimal expansion terminates (denominator is `2^a * 5^b`).
    pub fn is_terminating(&self) -> bool {
        let mut d = self.den;
        while d % 2 == 0 {
            d /= 2;
        }
        while d % 5 == 0 {
            d /= 5;
        }
        d == 1
    }

    /// Exact decimal string, if the expansion terminates and its digits fit
    /// an `i128`.
    pub fn to_decimal_string(&self) -> Option<String> {
        if self.is_integer() {
            return Some(self.num.to_string());
        }
        if !self.is_terminating() {
            return None;
        }
        let (mut twos, mut fives, mut d) = (0u32, 0u32, self.den);
        while d % 2 == 0 {
            d /= 2;
            twos += 1;
        }
        while d % 5 == 0 {
            d /= 5;
            fives += 1;
        }
        let scale = twos.max(fives);
        let scaled = self.num.abs().checked_mul(10i128.checked_pow(scale)?)? / self.den;
        let digits = format!("{:0>width$}", scaled, width = scale as usize + 1);
        let (int_part, frac_part) = digits.split_at(digits.len() - scale as usize);
        let sign = if self.num < 0 { "-" } else { "" };
        Some(format!("{sign}{int_part}.{frac_part}"))
    }
}

impl Default for Ratio {
    fn default() -> Self {
        Ratio::ZERO
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_decimal_string() {
            Some(s) => f.write_str(&s),
            None => write!(f, "{}/{}", self.num, self.den),
        }
    }
}

impl fmt::Debug for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ratio({self})")
    }
}

impl FromStr for Ratio {
    type Err = RatioError;

    /// Accepts integers (`"60"`), decimals (`"-0.25"`) and fractions (`"1/3"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RatioError::Empty);
        }
        if let Some((n, d)) = s.split_once('/') {
            let num: i128 = n
                .trim()
                .parse()
                .map_err(|_| RatioError::Malformed(s.to_string()))?;
            let den: i128 = d
                .trim()
                .parse()
                .map_err(|_| RatioError::Malformed(s.to_string()))?;
            if den == 0 {
                return Err(RatioError::ZeroDenominator(s.to_string()));
            }
            return Ratio::checked_new(num, den).ok_or_else(|| RatioError::Malformed(s.to_string()));
        }

        let (negative, body) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        let well_formed = !(int_part.is_empty() && frac_part.is_empty())
            && int_part.bytes().all(|b| b.is_ascii_digit())
            && frac_part.bytes().all(|b| b.is_ascii_digit());
        if !well_formed {
            return Err(RatioError::Malformed(s.to_string()));
        }
        let digits = format!("{int_part}{frac_part}");
        let mantissa: i128 = digits
            .parse()
            .map_err(|_| RatioError::Malformed(s.to_string()))?;
        let scale = 10i128
            .checked_pow(frac_part.len() as u32)
            .ok_or_else(|| RatioError::Malformed(s.to_string()))?;
        let value = Ratio::new(mantissa, scale);
        Ok(if negative { -value } else { value })
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Ratio {
                fn from(n: $t) -> Self {
                    Ratio::from_integer(n as i128)
                }
            }
        )*
    };
}

impl_from_int!(i32, i64, u32, u64, usize);

// ---------------------------------------------------------------------------
// Ordering and arithmetic
// ---------------------------------------------------------------------------

impl Ord for Ratio {
    fn cmp(&self, other: &Self) -> Ordering {
        match (
            self.num.checked_mul(other.den),
            other.num.checked_mul(self.den),
        ) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => cmp_fractions(self.num, self.den, other.num, other.den),
        }
    }
}

impl PartialOrd for Ratio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare `an/ad` with `bn/bd` (positive denominators) without forming
/// cross products. Equal floors reduce to comparing the remainders, which
/// is the same as comparing their reciprocals with the sides swapped.
fn cmp_fractions(mut an: i128, mut ad: i128, mut bn: i128, mut bd: i128) -> Ordering {
    loop {
        let (aq, ar) = (an.div_euclid(ad), an.rem_euclid(ad));
        let (bq, br) = (bn.div_euclid(bd), bn.rem_euclid(bd));
        return match (aq.cmp(&bq), ar == 0, br == 0) {
            (Ordering::Equal, true, true) => Ordering::Equal,
            (Ordering::Equal, true, false) => Ordering::Less,
            (Ordering::Equal, false, true) => Ordering::Greater,
            (Ordering::Equal, false, false) => {
                (an, ad, bn, bd) = (bd, br, ad, ar);
                continue;
            }
            (order, _, _) => order,
        };
    }
}

impl Add for Ratio {
    type Output = Ratio;
    fn add(self, rhs: Ratio) -> Ratio {
        self.checked_add(rhs)
            .unwrap_or_else(|| panic!("quantity overflow in {self} + {rhs}"))
    }
}

impl Sub for Ratio {
    type Output = Ratio;
    fn sub(self, rhs: Ratio) -> Ratio {
        self + (-rhs)
    }
}

impl Mul for Ratio {
    type Output = Ratio;
    fn mul(self, rhs: Ratio) -> Ratio {
        self.checked_mul(rhs)
            .unwrap_or_else(|| panic!("quantity overflow in {self} * {rhs}"))
    }
}

impl Div for Ratio {
    type Output = Ratio;
    fn div(self, rhs: Ratio) -> Ratio {
        assert!(!rhs.is_zero(), "division of {self} by zero");
        self.checked_div(rhs)
            .unwrap_or_else(|| panic!("quantity overflow in {self} / {rhs}"))
    }
}

impl Neg for Ratio {
    type Output = Ratio;
    fn neg(self) -> Ratio {
        Ratio {
            num: -self.num,
            den: self.den,
        }
    }
}

impl AddAssign for Ratio {
    fn add_assign(&mut self, rhs: Ratio) {
        *self = *self + rhs;
    }
}

impl SubAssign for Ratio {
    fn sub_assign(&mut self, rhs: Ratio) {
        *self = *self - rhs;
    }
}

impl Sum for Ratio {
    fn sum<I: Iterator<Item = Ratio>>(iter: I) -> Ratio {
        iter.fold(Ratio::ZERO, |acc, r| acc + r)
    }
}

impl<'a> Sum<&'a Ratio> for Ratio {
    fn sum<I: Iterator<Item = &'a Ratio>>(iter: I) -> Ratio {
        iter.fold(Ratio::ZERO, |acc, r| acc + *r)
    }
}

// ---------------------------------------------------------------------------
// Serde: quantities travel as exact strings
// ---------------------------------------------------------------------------

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct RatioVisitor;

impl Visitor<'_> for RatioVisitor {
    type Value = Ratio;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer, a decimal string or a \"p/q\" fraction")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Ratio, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Ratio, E> {
        Ok(Ratio::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Ratio, E> {
        Ok(Ratio::from(v))
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Ratio, D::Error> {
        // Binary formats cannot self-describe; they only ever see our strings.
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(RatioVisitor)
        } else {
            deserializer.deserialize_str(RatioVisitor)
        }
    }
}
