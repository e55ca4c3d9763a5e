//! Exact rational arithmetic for constraint ranges.
//!
//! Symbol ranges must stay exact under floor division and modulo predicates,
//! so bounds are rationals over arbitrary-precision integers rather than
//! floats. Values are always normalized: positive denominator, numerator and
//! denominator reduced by their GCD, zero stored as 0/1.

use std::{
    cmp::Ordering,
    fmt,
    ops::{Add, Div, Mul, Neg, Sub},
};

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rational {
    numerator: BigInt,
    denominator: BigInt,
}

impl Rational {
    /// Creates a rational, normalizing sign and common factors.
    ///
    /// Returns `None` when the denominator is zero.
    #[must_use]
    pub fn new(numerator: BigInt, denominator: BigInt) -> Option<Self> {
        if denominator.is_zero() {
            return None;
        }
        let (n, d) = Self::normalize(numerator, denominator);
        Some(Self {
            numerator: n,
            denominator: d,
        })
    }

    fn normalize(numerator: BigInt, denominator: BigInt) -> (BigInt, BigInt) {
        if numerator.is_zero() {
            return (BigInt::zero(), BigInt::one());
        }
        let gcd = numerator.gcd(&denominator);
        let mut n = numerator / &gcd;
        let mut d = denominator / gcd;
        if d.is_negative() {
            n = -n;
            d = -d;
        }
        (n, d)
    }

    #[must_use]
    pub fn from_int(value: i64) -> Self {
        Self {
            numerator: BigInt::from(value),
            denominator: BigInt::one(),
        }
    }

    /// Exact conversion from a finite float via its bit representation.
    ///
    /// Returns `None` for NaN and infinities.
    #[must_use]
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        if value == 0.0 {
            return Some(Self::zero());
        }
        let bits = value.to_bits();
        let negative = bits >> 63 == 1;
        let mut exponent = ((bits >> 52) & 0x7ff) as i64;
        let mantissa = if exponent == 0 {
            (bits & 0xf_ffff_ffff_ffff) << 1
        } else {
            (bits & 0xf_ffff_ffff_ffff) | 0x10_0000_0000_0000
        };
        exponent -= 1023 + 52;

        let mut n = BigInt::from(mantissa);
        let mut d = BigInt::one();
        if exponent > 0 {
            n <<= exponent as u64;
        } else if exponent < 0 {
            d <<= (-exponent) as u64;
        }
        if negative {
            n = -n;
        }
        Self::new(n, d)
    }

    #[must_use]
    pub fn zero() -> Self {
        Self {
            numerator: BigInt::zero(),
            denominator: BigInt::one(),
        }
    }

    #[must_use]
    pub fn one() -> Self {
        Self {
            numerator: BigInt::one(),
            denominator: BigInt::one(),
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.numerator.is_zero()
    }

    #[must_use]
    pub fn is_integer(&self) -> bool {
        self.denominator.is_one()
    }

    /// Integer payload when the value is an integer that fits `i64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        if self.is_integer() { self.numerator.to_i64() } else { None }
    }

    #[must_use]
    pub fn to_f64(&self) -> f64 {
        let n = self.numerator.to_f64().unwrap_or(f64::NAN);
        let d = self.denominator.to_f64().unwrap_or(f64::NAN);
        n / d
    }

    /// Largest integer not above the value.
    #[must_use]
    pub fn floor(&self) -> Self {
        let q = self.numerator.div_floor(&self.denominator);
        Self {
            numerator: q,
            denominator: BigInt::one(),
        }
    }

    /// Smallest integer not below the value.
    #[must_use]
    pub fn ceil(&self) -> Self {
        let q = -(-&self.numerator).div_floor(&self.denominator);
        Self {
            numerator: q,
            denominator: BigInt::one(),
        }
    }

    #[must_use]
    pub fn abs(&self) -> Self {
        Self {
            numerator: self.numerator.abs(),
            denominator: self.denominator.clone(),
        }
    }

    /// Python-style modulo: result takes the sign of the divisor.
    #[must_use]
    pub fn mod_floor(&self, rhs: &Self) -> Option<Self> {
        if rhs.is_zero() {
            return None;
        }
        let quotient = (self.clone() / rhs.clone())?.floor();
        Some(self.clone() - (quotient * rhs.clone()))
    }

    #[must_use]
    pub fn min(self, other: Self) -> Self {
        if self <= other { self } else { other }
    }

    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if self >= other { self } else { other }
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        // Denominators are positive, so cross-multiplication preserves order.
        let left = &self.numerator * &other.denominator;
        let right = &other.numerator * &self.denominator;
        left.cmp(&right)
    }
}

impl Add for Rational {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let n = &self.numerator * &rhs.denominator + &rhs.numerator * &self.denominator;
        let d = self.denominator * rhs.denominator;
        let (n, d) = Self::normalize(n, d);
        Self {
            numerator: n,
            denominator: d,
        }
    }
}

impl Sub for Rational {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl Mul for Rational {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let (n, d) = Self::normalize(self.numerator * rhs.numerator, self.denominator * rhs.denominator);
        Self {
            numerator: n,
            denominator: d,
        }
    }
}

impl Div for Rational {
    type Output = Option<Self>;

    fn div(self, rhs: Self) -> Option<Self> {
        if rhs.is_zero() {
            return None;
        }
        let (n, d) = Self::normalize(self.numerator * rhs.denominator, self.denominator * rhs.numerator);
        Some(Self {
            numerator: n,
            denominator: d,
        })
    }
}

impl Neg for Rational {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            numerator: -self.numerator,
            denominator: self.denominator,
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_integer() {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rat(n: i64, d: i64) -> Rational {
        Rational::new(BigInt::from(n), BigInt::from(d)).unwrap()
    }

    #[test]
    fn normalization() {
        assert_eq!(rat(2, 4), rat(1, 2));
        assert_eq!(rat(1, -2), rat(-1, 2));
        assert_eq!(rat(0, 7), Rational::zero());
    }

    #[test]
    fn zero_denominator_rejected() {
        assert!(Rational::new(BigInt::from(1), BigInt::zero()).is_none());
    }

    #[test]
    fn ordering_via_cross_multiplication() {
        assert!(rat(1, 3) < rat(1, 2));
        assert!(rat(-1, 2) < rat(1, 3));
        assert_eq!(rat(2, 6).cmp(&rat(1, 3)), Ordering::Equal);
    }

    #[test]
    fn floor_and_ceil_of_negatives() {
        assert_eq!(rat(-7, 2).floor(), Rational::from_int(-4));
        assert_eq!(rat(-7, 2).ceil(), Rational::from_int(-3));
        assert_eq!(rat(7, 2).floor(), Rational::from_int(3));
        assert_eq!(rat(7, 2).ceil(), Rational::from_int(4));
    }

    #[test]
    fn python_style_modulo() {
        assert_eq!(rat(7, 1).mod_floor(&rat(3, 1)).unwrap(), Rational::from_int(1));
        assert_eq!(rat(-7, 1).mod_floor(&rat(3, 1)).unwrap(), Rational::from_int(2));
        assert_eq!(rat(7, 1).mod_floor(&rat(-3, 1)).unwrap(), Rational::from_int(-2));
        assert!(rat(1, 1).mod_floor(&Rational::zero()).is_none());
    }

    #[test]
    fn exact_float_conversion() {
        assert_eq!(Rational::from_f64(0.5).unwrap(), rat(1, 2));
        assert_eq!(Rational::from_f64(-0.25).unwrap(), rat(-1, 4));
        assert_eq!(Rational::from_f64(3.0).unwrap(), Rational::from_int(3));
        assert!(Rational::from_f64(f64::NAN).is_none());
        assert!(Rational::from_f64(f64::INFINITY).is_none());
    }

    #[test]
    fn arithmetic() {
        assert_eq!(rat(1, 2) + rat(1, 3), rat(5, 6));
        assert_eq!(rat(1, 2) - rat(1, 3), rat(1, 6));
        assert_eq!(rat(2, 3) * rat(3, 4), rat(1, 2));
        assert_eq!((rat(1, 2) / rat(1, 4)).unwrap(), Rational::from_int(2));
        assert!((rat(1, 2) / Rational::zero()).is_none());
    }
}
