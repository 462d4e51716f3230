use crate::model::{Listing, SearchCriteria};

/// True when every bounded attribute is present and within `criteria`.
/// Missing or non-finite values fail the check.
pub fn matches(listing: &Listing, criteria: &SearchCriteria) -> bool {
    let (Some(rent), Some(rooms), Some(area)) = (listing.cold_rent, listing.rooms, listing.area)
    else {
        return false;
    };
    if !(rent.is_finite() && rooms.is_finite() && area.is_finite()) {
        return false;
    }
    rent <= criteria.max_cold_rent
        && rooms >= criteria.min_rooms
        && rooms <= criteria.max_rooms
        && area <= criteria.max_area
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria() -> SearchCriteria {
        SearchCriteria {
            max_cold_rent: 440.0,
            min_rooms: 1.0,
            max_rooms: 2.0,
            max_area: 50.0,
        }
    }

    fn listing(rent: Option<f64>, rooms: Option<f64>, area: Option<f64>) -> Listing {
        let mut l = Listing::new("x", "x");
        l.cold_rent = rent;
        l.rooms = rooms;
        l.area = area;
        l
    }

    #[test]
    fn scenario_a_passes_b_fails() {
        let c = criteria();
        assert!(matches(&listing(Some(400.0), Some(1.0), Some(40.0)), &c));
        assert!(!matches(&listing(Some(500.0), Some(1.0), Some(30.0)), &c));
    }

    #[test]
    fn bounds_are_inclusive() {
        let c = criteria();
        assert!(matches(&listing(Some(440.0), Some(1.0), Some(50.0)), &c));
        assert!(matches(&listing(Some(0.0), Some(2.0), Some(0.0)), &c));
        assert!(matches(&listing(Some(300.0), Some(1.5), Some(35.0)), &c));
    }

    #[test]
    fn each_violated_bound_fails() {
        let c = criteria();
        assert!(!matches(&listing(Some(440.01), Some(1.0), Some(40.0)), &c));
        assert!(!matches(&listing(Some(400.0), Some(0.5), Some(40.0)), &c));
        assert!(!matches(&listing(Some(400.0), Some(2.5), Some(40.0)), &c));
        assert!(!matches(&listing(Some(400.0), Some(1.0), Some(50.5)), &c));
    }

    #[test]
    fn incomplete_listing_fails_closed() {
        let c = criteria();
        assert!(!matches(&listing(None, Some(1.0), Some(40.0)), &c));
        assert!(!matches(&listing(Some(400.0), None, Some(40.0)), &c));
        assert!(!matches(&listing(Some(400.0), Some(1.0), None), &c));
        assert!(!matches(&listing(Some(f64::NAN), Some(1.0), Some(40.0)), &c));
    }
}
