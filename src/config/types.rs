//! Core value types shared across detection, reference and calibration.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Sub};

/// A behavioral contract for anything that behaves like a price.
pub trait PriceLike {
    fn value(&self) -> f64;

    const MIN_EPSILON: f64 = 1e-12;

    fn is_positive(&self) -> bool {
        self.value() > Self::MIN_EPSILON
    }

    /// Formats a price with adaptive decimals.
    fn format_price(&self) -> String {
        let price = self.value();
        if price == 0.0 {
            return "0.00".to_string();
        }

        let abs_price = price.abs();

        if abs_price >= 1000.0 {
            format!("{:.2}", price)
        } else if abs_price >= 1.0 {
            format!("{:.4}", price)
        } else {
            format!("{:.8}", price)
        }
    }
}

macro_rules! impl_into_price {
    ($from:ident) => {
        impl From<$from> for Price {
            fn from(p: $from) -> Self {
                Price::new(p.value())
            }
        }
    };
}

macro_rules! define_price_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Default)]
        #[serde(transparent)]
        pub struct $name(f64);

        impl From<f64> for $name {
            fn from(v: f64) -> Self {
                $name::new(v)
            }
        }

        impl $name {
            pub const fn new(val: f64) -> Self {
                // Absolute prices should not be negative
                let v = if val < 0.0 { 0.0 } else { val };
                Self(v)
            }
        }

        impl Add for $name {
            type Output = f64;

            fn add(self, rhs: Self) -> Self::Output {
                self.value() + rhs.value()
            }
        }

        impl Sub for $name {
            type Output = f64;

            fn sub(self, rhs: Self) -> Self::Output {
                self.value() - rhs.value()
            }
        }

        impl Div for $name {
            type Output = f64;

            fn div(self, rhs: Self) -> Self::Output {
                self.value() / rhs.value()
            }
        }

        impl Mul<f64> for $name {
            type Output = $name;

            fn mul(self, rhs: f64) -> Self::Output {
                $name::new(self.value() * rhs)
            }
        }

        impl PriceLike for $name {
            fn value(&self) -> f64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.format_price())
            }
        }
    };
}

macro_rules! impl_price_compare {
    ($a:ty, $b:ty) => {
        impl PartialEq<$b> for $a {
            fn eq(&self, other: &$b) -> bool {
                self.value() == other.value()
            }
        }

        impl PartialOrd<$b> for $a {
            fn partial_cmp(&self, other: &$b) -> Option<std::cmp::Ordering> {
                self.value().partial_cmp(&other.value())
            }
        }
    };
}

// The price hierarchy
define_price_type!(Price);
define_price_type!(OpenPrice);
define_price_type!(HighPrice);
define_price_type!(LowPrice);
define_price_type!(ClosePrice);

impl_into_price!(OpenPrice);
impl_into_price!(HighPrice);
impl_into_price!(LowPrice);
impl_into_price!(ClosePrice);

impl_price_compare!(LowPrice, HighPrice);
impl_price_compare!(HighPrice, LowPrice);
impl_price_compare!(LowPrice, Price);
impl_price_compare!(HighPrice, Price);
impl_price_compare!(Price, LowPrice);
impl_price_compare!(Price, HighPrice);
impl_price_compare!(OpenPrice, Price);
impl_price_compare!(ClosePrice, Price);
impl_price_compare!(OpenPrice, ClosePrice);
impl_price_compare!(ClosePrice, OpenPrice);

/// A signed coordinate in a swing's Fibonacci frame.
/// 0 is the defended pivot, 2 the completion target, negative values are
/// stop-run territory. Deliberately unclamped.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct FibRatio(f64);

impl FibRatio {
    pub const fn new(val: f64) -> Self {
        Self(val)
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for FibRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// A fraction of a leg's range or bar-span, clamped to 0..=1.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RangeFraction(f64);

impl RangeFraction {
    pub const fn new(val: f64) -> Self {
        let v = if val < 0.0 {
            0.0
        } else if val > 1.0 {
            1.0
        } else {
            val
        };
        Self(v)
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for RangeFraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}%", self.0 * 100.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_clamp_negative_to_zero() {
        assert_eq!(Price::new(-1.0).value(), 0.0);
        assert_eq!(LowPrice::new(3.5).value(), 3.5);
    }

    #[test]
    fn cross_type_compare() {
        let low = LowPrice::new(99.0);
        let high = HighPrice::new(101.0);
        assert!(low < high);
        assert!(high > Price::new(100.0));
    }

    #[test]
    fn range_fraction_clamps() {
        assert_eq!(RangeFraction::new(1.5).value(), 1.0);
        assert_eq!(RangeFraction::new(-0.1).value(), 0.0);
        assert_eq!(RangeFraction::new(0.25).value(), 0.25);
    }
}
