//! Accuracy model used to compare and rank location providers.
//!
//! An [`Accuracy`] is a `(level, horizontal_error, vertical_error)` triple.
//! Providers declare the accuracy range they can produce; sessions declare
//! the minimum accuracy they require. The selector compares the two with the
//! total order defined here.
//!
//! # Ordering
//!
//! Two accuracies compare first by [`AccuracyLevel`]. At equal levels, a
//! smaller known horizontal error is better; an unknown horizontal error
//! sorts as the worst within its level. Vertical error is informational and
//! does not participate in the ordering.

use std::cmp::Ordering;
use std::fmt;

/// Geographic accuracy level, coarsest to finest.
///
/// The derived `Ord` follows declaration order: `None` is the coarsest
/// (no usable fix), `Detailed` the finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AccuracyLevel {
    /// No usable accuracy (unknown or no fix).
    #[default]
    None,
    /// Country-level accuracy.
    Country,
    /// Region/state-level accuracy.
    Region,
    /// City or locality-level accuracy.
    Locality,
    /// Postal-code-level accuracy.
    PostalCode,
    /// Street-level accuracy.
    Street,
    /// Detailed (exact position) accuracy.
    Detailed,
}

impl fmt::Display for AccuracyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Country => "country",
            Self::Region => "region",
            Self::Locality => "locality",
            Self::PostalCode => "postalcode",
            Self::Street => "street",
            Self::Detailed => "detailed",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for AccuracyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "country" => Ok(Self::Country),
            "region" => Ok(Self::Region),
            "locality" => Ok(Self::Locality),
            "postalcode" | "postal_code" => Ok(Self::PostalCode),
            "street" => Ok(Self::Street),
            "detailed" => Ok(Self::Detailed),
            other => Err(format!("unknown accuracy level '{}'", other)),
        }
    }
}

/// Accuracy triple: level plus horizontal/vertical error in meters.
///
/// Immutable value type, copied freely. Error values are non-negative
/// meters; NaN is the "unknown" sentinel. The constructor normalizes
/// malformed input (negative or NaN) to the unknown sentinel rather than
/// failing, so all operations here are total.
#[derive(Debug, Clone, Copy)]
pub struct Accuracy {
    level: AccuracyLevel,
    horizontal_error: f64,
    vertical_error: f64,
}

impl Accuracy {
    /// Create an accuracy, normalizing malformed error values to unknown.
    pub fn new(level: AccuracyLevel, horizontal_error: f64, vertical_error: f64) -> Self {
        Self {
            level,
            horizontal_error: normalize_error(horizontal_error),
            vertical_error: normalize_error(vertical_error),
        }
    }

    /// Accuracy with the given level and unknown error values.
    pub fn level_only(level: AccuracyLevel) -> Self {
        Self::new(level, f64::NAN, f64::NAN)
    }

    /// The worst possible accuracy: no level, unknown errors.
    pub fn none() -> Self {
        Self::level_only(AccuracyLevel::None)
    }

    /// The accuracy level.
    pub fn level(&self) -> AccuracyLevel {
        self.level
    }

    /// Horizontal error in meters, `None` if unknown.
    pub fn horizontal_error(&self) -> Option<f64> {
        if self.horizontal_error.is_nan() {
            None
        } else {
            Some(self.horizontal_error)
        }
    }

    /// Vertical error in meters, `None` if unknown.
    pub fn vertical_error(&self) -> Option<f64> {
        if self.vertical_error.is_nan() {
            None
        } else {
            Some(self.vertical_error)
        }
    }

    /// True if this accuracy is not worse than `minimum`.
    pub fn satisfies(&self, minimum: &Accuracy) -> bool {
        self.cmp(minimum) != Ordering::Less
    }

    /// Pointwise-worse combination of two accuracies.
    ///
    /// Used when a provider reports accuracy over more than one error axis:
    /// the combined value takes the coarser level and the worse error on
    /// each axis, where unknown dominates a known value.
    pub fn combine(&self, other: &Accuracy) -> Accuracy {
        Accuracy {
            level: self.level.min(other.level),
            horizontal_error: worse_error(self.horizontal_error, other.horizontal_error),
            vertical_error: worse_error(self.vertical_error, other.vertical_error),
        }
    }
}

impl Default for Accuracy {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.horizontal_error() {
            Some(h) => write!(f, "{} (±{:.0}m)", self.level, h),
            None => write!(f, "{}", self.level),
        }
    }
}

impl PartialEq for Accuracy {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Accuracy {}

impl PartialOrd for Accuracy {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Accuracy {
    /// Total order: level first, then smaller known horizontal error.
    ///
    /// Unknown horizontal error sorts as worst within its level. This is
    /// deterministic for NaN inputs, so the derived float pitfalls do not
    /// apply here.
    fn cmp(&self, other: &Self) -> Ordering {
        self.level.cmp(&other.level).then_with(|| {
            match (self.horizontal_error(), other.horizontal_error()) {
                (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            }
        })
    }
}

/// Range of accuracy a provider declares it can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccuracyRange {
    /// Best-case accuracy the provider can produce.
    pub best: Accuracy,
    /// Worst-case accuracy the provider may fall back to.
    pub worst: Accuracy,
}

impl AccuracyRange {
    /// Create a range from best and worst accuracy.
    pub fn new(best: Accuracy, worst: Accuracy) -> Self {
        Self { best, worst }
    }

    /// Range where best and worst are the same level.
    pub fn exact(accuracy: Accuracy) -> Self {
        Self {
            best: accuracy,
            worst: accuracy,
        }
    }
}

fn normalize_error(meters: f64) -> f64 {
    if meters.is_nan() || meters < 0.0 {
        f64::NAN
    } else {
        meters
    }
}

fn worse_error(a: f64, b: f64) -> f64 {
    // Unknown dominates: a combined accuracy with one unknown axis is unknown.
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc(level: AccuracyLevel, h: f64) -> Accuracy {
        Accuracy::new(level, h, f64::NAN)
    }

    #[test]
    fn test_level_ordering() {
        assert!(AccuracyLevel::None < AccuracyLevel::Country);
        assert!(AccuracyLevel::Country < AccuracyLevel::Region);
        assert!(AccuracyLevel::Region < AccuracyLevel::Locality);
        assert!(AccuracyLevel::Locality < AccuracyLevel::PostalCode);
        assert!(AccuracyLevel::PostalCode < AccuracyLevel::Street);
        assert!(AccuracyLevel::Street < AccuracyLevel::Detailed);
    }

    #[test]
    fn test_level_governs_comparison() {
        let street = acc(AccuracyLevel::Street, 500.0);
        let region = acc(AccuracyLevel::Region, 1.0);
        assert!(street > region, "level dominates horizontal error");
    }

    #[test]
    fn test_smaller_error_is_better_within_level() {
        let tight = acc(AccuracyLevel::Street, 5.0);
        let loose = acc(AccuracyLevel::Street, 50.0);
        assert!(tight > loose);
    }

    #[test]
    fn test_unknown_error_sorts_worst_within_level() {
        let known = acc(AccuracyLevel::Street, 10_000.0);
        let unknown = Accuracy::level_only(AccuracyLevel::Street);
        assert!(known > unknown);
        assert!(unknown > acc(AccuracyLevel::Locality, 1.0));
    }

    #[test]
    fn test_negative_error_normalized_to_unknown() {
        let a = Accuracy::new(AccuracyLevel::Street, -3.0, -1.0);
        assert_eq!(a.horizontal_error(), None);
        assert_eq!(a.vertical_error(), None);
        assert_eq!(a, Accuracy::level_only(AccuracyLevel::Street));
    }

    #[test]
    fn test_satisfies_is_reflexive() {
        let values = [
            Accuracy::none(),
            acc(AccuracyLevel::Region, 1000.0),
            Accuracy::level_only(AccuracyLevel::Street),
            acc(AccuracyLevel::Detailed, 0.5),
        ];
        for v in values {
            assert!(v.satisfies(&v), "satisfies({v}, {v}) must hold");
        }
    }

    #[test]
    fn test_satisfies_minimum() {
        let minimum = Accuracy::level_only(AccuracyLevel::Region);
        assert!(acc(AccuracyLevel::Street, 10.0).satisfies(&minimum));
        assert!(Accuracy::level_only(AccuracyLevel::Region).satisfies(&minimum));
        assert!(!Accuracy::level_only(AccuracyLevel::Country).satisfies(&minimum));
    }

    #[test]
    fn test_total_order_is_antisymmetric_and_transitive() {
        let a = acc(AccuracyLevel::Region, 100.0);
        let b = acc(AccuracyLevel::Locality, 100.0);
        let c = acc(AccuracyLevel::Street, 100.0);
        assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        assert!(a < b && b < c && a < c);
    }

    #[test]
    fn test_combine_takes_pointwise_worse() {
        let a = Accuracy::new(AccuracyLevel::Street, 5.0, 20.0);
        let b = Accuracy::new(AccuracyLevel::Locality, 50.0, 2.0);
        let combined = a.combine(&b);
        assert_eq!(combined.level(), AccuracyLevel::Locality);
        assert_eq!(combined.horizontal_error(), Some(50.0));
        assert_eq!(combined.vertical_error(), Some(20.0));
    }

    #[test]
    fn test_combine_unknown_dominates() {
        let a = Accuracy::new(AccuracyLevel::Street, 5.0, 20.0);
        let b = Accuracy::level_only(AccuracyLevel::Street);
        let combined = a.combine(&b);
        assert_eq!(combined.horizontal_error(), None);
        assert_eq!(combined.vertical_error(), None);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("street".parse(), Ok(AccuracyLevel::Street));
        assert_eq!("PostalCode".parse(), Ok(AccuracyLevel::PostalCode));
        assert!("block".parse::<AccuracyLevel>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", acc(AccuracyLevel::Street, 12.0)), "street (±12m)");
        assert_eq!(
            format!("{}", Accuracy::level_only(AccuracyLevel::Region)),
            "region"
        );
    }
}
