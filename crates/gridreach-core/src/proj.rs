//! ETRS-TM35FIN (EPSG:3067) to WGS84 conversion.
//!
//! One fixed projection pair is all the grid data needs, so the inverse
//! transverse Mercator series is carried here directly instead of binding
//! a full projection library.

// GRS80 ellipsoid and TM35FIN projection parameters.
const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_222_101;
const K0: f64 = 0.9996;
const LON0_DEG: f64 = 27.0;
const FALSE_EASTING: f64 = 500_000.0;

/// Convert a projected (easting, northing) pair in meters to (lon, lat)
/// degrees on WGS84. ETRS89 and WGS84 differ by well under a grid cell,
/// so no datum shift is applied.
#[must_use]
pub fn tm35fin_to_wgs84(easting: f64, northing: f64) -> (f64, f64) {
    let e2 = F * (2.0 - F);
    let ep2 = e2 / (1.0 - e2);
    let sqrt_1_e2 = (1.0 - e2).sqrt();
    let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);

    // Footpoint latitude from the meridional arc.
    let m = northing / K0;
    let mu = m / (A * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2 * e2 * e2 / 256.0));
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let c1 = ep2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let n1 = A / (1.0 - e2 * sin_phi1 * sin_phi1).sqrt();
    let r1 = A * (1.0 - e2) / (1.0 - e2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = (easting - FALSE_EASTING) / (n1 * K0);

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * ep2
                    - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let lon = LON0_DEG.to_radians()
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / cos_phi1;

    (lon.to_degrees(), lat.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn central_meridian_maps_to_lon0() {
        let (lon, _lat) = tm35fin_to_wgs84(FALSE_EASTING, 6_672_000.0);
        assert!((lon - LON0_DEG).abs() < 1e-6, "lon on central meridian was {lon}");
    }

    #[test]
    fn helsinki_region_lands_in_expected_bounds() {
        // Roughly central Helsinki in TM35FIN.
        let (lon, lat) = tm35fin_to_wgs84(385_000.0, 6_672_000.0);
        assert!((59.0..62.0).contains(&lat), "lat out of range: {lat}");
        assert!((23.0..27.0).contains(&lon), "lon out of range: {lon}");
    }

    #[test]
    fn northing_is_monotone_in_latitude() {
        let (_, lat_south) = tm35fin_to_wgs84(385_000.0, 6_600_000.0);
        let (_, lat_north) = tm35fin_to_wgs84(385_000.0, 6_700_000.0);
        assert!(lat_north > lat_south);
    }

    #[test]
    fn easting_is_monotone_in_longitude() {
        let (lon_west, _) = tm35fin_to_wgs84(350_000.0, 6_672_000.0);
        let (lon_east, _) = tm35fin_to_wgs84(420_000.0, 6_672_000.0);
        assert!(lon_east > lon_west);
    }
}
