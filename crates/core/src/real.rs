//! Decimal Reals
//!
//! Thin newtypes over the `dec` crate's IEEE-754-2008 decimal types. The
//! interpreter treats decimal arithmetic as an external backend; this module
//! is the entire surface it consumes: construction from text and integers,
//! the basic arithmetic operations, comparison, and classification.
//!
//! Width rules follow the standard: Real64 and Real128 compute directly at
//! their own precision with round-to-nearest-even. Real32 has no arithmetic
//! module in libdecnumber (decSingle is storage-only), so operations widen
//! to 64-bit, compute, and narrow back with correct rounding.
//!
//! Width changes and integer conversions go through exact decimal strings,
//! which keeps the backend surface minimal and is lossless in the widening
//! direction and correctly rounded in the narrowing direction.

use dec::{Context, Decimal32, Decimal64, Decimal128};
use std::cmp::Ordering;
use std::fmt;

/// 32-bit decimal float (7 digits). Storage format; arithmetic widens to 64.
#[derive(Debug, Clone, Copy)]
pub struct Real32(Decimal32);

/// 64-bit decimal float (16 digits).
#[derive(Debug, Clone, Copy)]
pub struct Real64(Decimal64);

/// 128-bit decimal float (34 digits).
#[derive(Debug, Clone, Copy)]
pub struct Real128(Decimal128);

macro_rules! real_impl {
    ($name:ident, $backing:ty) => {
        impl $name {
            pub fn zero() -> Self {
                $name(<$backing>::default())
            }

            /// Parse decimal text. Accepts the usual IEEE forms, including
            /// `Inf`, `NaN`, and exponents with `E` or `e`.
            pub fn parse(text: &str) -> Option<Self> {
                let mut cx = Context::<$backing>::default();
                cx.parse(text).ok().map($name)
            }

            pub fn from_i64(n: i64) -> Self {
                // Exact decimal text; the parse rounds if the coefficient
                // exceeds this width's precision, which is the IEEE behavior
                // for integer conversion.
                Self::parse(&n.to_string()).unwrap_or_else(Self::zero)
            }

            pub fn add(self, rhs: Self) -> Self {
                let mut cx = Context::<$backing>::default();
                $name(cx.add(self.0, rhs.0))
            }

            pub fn sub(self, rhs: Self) -> Self {
                let mut cx = Context::<$backing>::default();
                $name(cx.sub(self.0, rhs.0))
            }

            pub fn mul(self, rhs: Self) -> Self {
                let mut cx = Context::<$backing>::default();
                $name(cx.mul(self.0, rhs.0))
            }

            /// IEEE division: x/0 is ±Inf for nonzero x, NaN for 0/0.
            pub fn div(self, rhs: Self) -> Self {
                let mut cx = Context::<$backing>::default();
                $name(cx.div(self.0, rhs.0))
            }

            /// Truncating remainder.
            pub fn rem(self, rhs: Self) -> Self {
                let mut cx = Context::<$backing>::default();
                $name(cx.rem(self.0, rhs.0))
            }

            pub fn neg(self) -> Self {
                let mut cx = Context::<$backing>::default();
                $name(cx.minus(self.0))
            }

            pub fn abs(self) -> Self {
                let mut cx = Context::<$backing>::default();
                $name(cx.abs(self.0))
            }

            pub fn is_nan(self) -> bool {
                self.0.is_nan()
            }

            pub fn is_infinite(self) -> bool {
                self.0.is_infinite()
            }

            pub fn is_zero(self) -> bool {
                self.0.is_zero()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0 == other.0
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                self.0.partial_cmp(&other.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

real_impl!(Real64, Decimal64);
real_impl!(Real128, Decimal128);

impl Real32 {
    pub fn zero() -> Self {
        Real32(Decimal32::default())
    }

    pub fn parse(text: &str) -> Option<Self> {
        let mut cx = Context::<Decimal32>::default();
        cx.parse(text).ok().map(Real32)
    }

    pub fn from_i64(n: i64) -> Self {
        Self::parse(&n.to_string()).unwrap_or_else(Self::zero)
    }

    /// Widen losslessly to 64-bit for arithmetic.
    pub fn widen(self) -> Real64 {
        Real64::parse(&self.0.to_string()).unwrap_or_else(Real64::zero)
    }

    /// Narrow a 64-bit result back, rounding to nearest-even.
    pub fn narrow(wide: Real64) -> Self {
        Real32::parse(&wide.to_string()).unwrap_or_else(Real32::zero)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::narrow(self.widen().add(rhs.widen()))
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::narrow(self.widen().sub(rhs.widen()))
    }

    pub fn mul(self, rhs: Self) -> Self {
        Self::narrow(self.widen().mul(rhs.widen()))
    }

    pub fn div(self, rhs: Self) -> Self {
        Self::narrow(self.widen().div(rhs.widen()))
    }

    pub fn rem(self, rhs: Self) -> Self {
        Self::narrow(self.widen().rem(rhs.widen()))
    }

    pub fn neg(self) -> Self {
        Self::narrow(self.widen().neg())
    }

    pub fn abs(self) -> Self {
        Self::narrow(self.widen().abs())
    }

    pub fn is_nan(self) -> bool {
        self.widen().is_nan()
    }

    pub fn is_infinite(self) -> bool {
        self.widen().is_infinite()
    }

    pub fn is_zero(self) -> bool {
        self.widen().is_zero()
    }
}

impl PartialEq for Real32 {
    fn eq(&self, other: &Self) -> bool {
        self.widen() == other.widen()
    }
}

impl PartialOrd for Real32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.widen().partial_cmp(&other.widen())
    }
}

impl fmt::Display for Real32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Real64 {
    /// Widen losslessly to 128-bit.
    pub fn widen(self) -> Real128 {
        Real128::parse(&self.to_string()).unwrap_or_else(Real128::zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let d = Real64::parse("1.5").unwrap();
        assert_eq!(d.to_string(), "1.5");
        assert!(Real64::parse("not a number").is_none());
    }

    #[test]
    fn test_basic_arithmetic() {
        let a = Real64::parse("1.5").unwrap();
        let b = Real64::parse("1.25").unwrap();
        assert_eq!(a.add(b).to_string(), "2.75");
        assert_eq!(a.sub(b).to_string(), "0.25");
        assert_eq!(a.mul(b).to_string(), "1.875");
    }

    #[test]
    fn test_division_by_zero_is_infinite() {
        let one = Real64::from_i64(1);
        let zero = Real64::zero();
        assert!(one.div(zero).is_infinite());
        assert!(zero.div(zero).is_nan());
    }

    #[test]
    fn test_comparison() {
        let a = Real64::parse("2").unwrap();
        let b = Real64::parse("10").unwrap();
        assert!(a < b);
        assert_eq!(a, Real64::from_i64(2));
        let nan = Real64::zero().div(Real64::zero());
        assert!(nan.partial_cmp(&a).is_none());
    }

    #[test]
    fn test_real32_round_trips_through_64() {
        let a = Real32::parse("1.5").unwrap();
        let b = Real32::parse("2.25").unwrap();
        assert_eq!(a.add(b).to_string(), "3.75");
    }

    #[test]
    fn test_from_i64_is_exact_in_range() {
        assert_eq!(Real128::from_i64(12345678).to_string(), "12345678");
        assert_eq!(Real64::from_i64(-7).to_string(), "-7");
    }
}
