//! Geographic primitives used for proximity checks.

use std::{cmp::Ordering, fmt};

/// Mean radius of the Earth used by great-circle calculations.
pub const EARTH_RADIUS: Distance = Distance(6_371_000.0);

/// Point on the Earth surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    /// Latitude in degrees.
    lat: f64,

    /// Longitude in degrees.
    lng: f64,
}

impl Coordinates {
    /// Creates new [`Coordinates`] if the provided `lat` and `lng` are finite
    /// and lie within their valid ranges.
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Self { lat, lng })
    }

    /// Returns the latitude of these [`Coordinates`] in degrees.
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Returns the longitude of these [`Coordinates`] in degrees.
    #[must_use]
    pub fn lng(&self) -> f64 {
        self.lng
    }

    /// Computes the great-circle [`Distance`] to the `other` point using the
    /// haversine formula.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> Distance {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        // Rounding may push `a` slightly out of `[0, 1]`.
        let a = a.clamp(0.0, 1.0);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        Distance(EARTH_RADIUS.0 * c)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lng)
    }
}

/// Non-negative distance in meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Distance(f64);

impl Distance {
    /// Zero [`Distance`].
    pub const ZERO: Self = Self(0.0);

    /// Creates a new [`Distance`] out of the provided `meters`, if they're
    /// finite and non-negative.
    #[must_use]
    pub fn from_meters(meters: f64) -> Option<Self> {
        (meters.is_finite() && meters >= 0.0).then_some(Self(meters))
    }

    /// Returns this [`Distance`] in meters.
    #[must_use]
    pub fn meters(self) -> f64 {
        self.0
    }
}

impl Eq for Distance {}

impl PartialOrd for Distance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Distance {
    fn cmp(&self, other: &Self) -> Ordering {
        // Both are finite, so the total order matches the numeric one.
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}m", self.0)
    }
}

/// Circular area around a known point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geofence {
    /// Center of this [`Geofence`].
    pub center: Coordinates,

    /// Radius of this [`Geofence`].
    pub radius: Distance,
}

impl Geofence {
    /// Measures the provided `point` against this [`Geofence`].
    ///
    /// The boundary is inclusive: a point exactly at the [`radius`] is
    /// [`Proximity::Inside`].
    ///
    /// [`radius`]: Geofence::radius
    #[must_use]
    pub fn measure(&self, point: &Coordinates) -> Proximity {
        let distance = self.center.distance_to(point);
        if distance <= self.radius {
            Proximity::Inside(distance)
        } else {
            Proximity::Outside(distance)
        }
    }
}

/// Result of measuring a point against a [`Geofence`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Proximity {
    /// Point is within the [`Geofence`].
    Inside(Distance),

    /// Point is beyond the [`Geofence`].
    Outside(Distance),
}

impl Proximity {
    /// Returns the measured [`Distance`].
    #[must_use]
    pub fn distance(self) -> Distance {
        match self {
            Self::Inside(d) | Self::Outside(d) => d,
        }
    }
}

/// Named location resolved by a directory.
#[derive(Clone, Debug, PartialEq)]
pub struct Place {
    /// Human-readable name of this [`Place`].
    pub name: String,

    /// [`Coordinates`] of this [`Place`].
    pub location: Coordinates,
}

#[cfg(test)]
mod spec {
    use super::{Coordinates, Distance, Geofence, Proximity};

    fn point(lat: f64, lng: f64) -> Coordinates {
        Coordinates::new(lat, lng).unwrap()
    }

    #[test]
    fn validates_ranges() {
        assert!(Coordinates::new(90.0, 180.0).is_some());
        assert!(Coordinates::new(-90.0, -180.0).is_some());
        assert!(Coordinates::new(90.1, 0.0).is_none());
        assert!(Coordinates::new(0.0, -180.5).is_none());
        assert!(Coordinates::new(f64::NAN, 0.0).is_none());
        assert!(Coordinates::new(0.0, f64::INFINITY).is_none());
    }

    #[test]
    fn distance_to_itself_is_zero() {
        let p = point(30.2672, -97.7431);

        assert_eq!(p.distance_to(&p), Distance::ZERO);
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = point(0.0, 0.0).distance_to(&point(1.0, 0.0));

        assert!((d.meters() - 111_194.93).abs() < 1.0, "got {d}");
    }

    #[test]
    fn distance_is_symmetric() {
        let (a, b) = (point(30.2672, -97.7431), point(30.2700, -97.7400));

        assert_eq!(a.distance_to(&b), b.distance_to(&a));
    }

    #[test]
    fn boundary_is_inclusive() {
        let center = point(30.2672, -97.7431);
        let edge = point(30.2694, -97.7431);
        let radius = center.distance_to(&edge);

        let fence = Geofence { center, radius };
        assert_eq!(fence.measure(&edge), Proximity::Inside(radius));

        let shrunk = Geofence {
            center,
            radius: Distance::from_meters(radius.meters() - 0.001).unwrap(),
        };
        assert_eq!(shrunk.measure(&edge), Proximity::Outside(radius));
    }

    #[test]
    fn rejects_invalid_distance() {
        assert!(Distance::from_meters(-1.0).is_none());
        assert!(Distance::from_meters(f64::NAN).is_none());
        assert!(Distance::from_meters(0.0).is_some());
    }
}
