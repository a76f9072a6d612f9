//! Address-to-cell resolution. The geocoding backend sits behind a
//! trait so the lookup path can be exercised without network access.

use geo::Point;
use gridreach_core::{CellId, GridStore};

pub const DEFAULT_NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    /// The backend returned no candidate for the address.
    #[error("address not found: {0}")]
    AddressNotFound(String),
    /// The address resolved to a point outside the grid's coverage.
    #[error("address is outside the covered area: {0}")]
    OutsideCoverage(String),
    /// The backend itself failed (network, malformed response).
    #[error("geocoding service error: {0}")]
    Service(String),
}

/// A forward geocoder: free-text address to a lon/lat candidate.
pub trait Geocoder {
    /// Best candidate for `address` as `(lon, lat)` degrees, or `None`
    /// when the backend knows no match.
    ///
    /// # Errors
    /// Returns [`GeocodeError::Service`] when the backend fails.
    fn geocode(&self, address: &str) -> Result<Option<(f64, f64)>, GeocodeError>;
}

/// Nominatim-backed geocoder. One request per lookup, first result wins.
pub struct NominatimClient {
    endpoint: String,
    user_agent: String,
}

impl NominatimClient {
    #[must_use]
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_NOMINATIM_ENDPOINT.to_string(),
            user_agent: user_agent.into(),
        }
    }

    /// Point the client at a different endpoint (tests, self-hosted
    /// instances).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Geocoder for NominatimClient {
    fn geocode(&self, address: &str) -> Result<Option<(f64, f64)>, GeocodeError> {
        let response = ureq::get(&self.endpoint)
            .set("User-Agent", &self.user_agent)
            .query("q", address)
            .query("format", "json")
            .query("limit", "1")
            .call()
            .map_err(|err| GeocodeError::Service(err.to_string()))?;

        let body: serde_json::Value = response
            .into_json()
            .map_err(|err| GeocodeError::Service(err.to_string()))?;

        let Some(first) = body.as_array().and_then(|results| results.first()) else {
            return Ok(None);
        };

        // Nominatim returns coordinates as strings.
        let lon = first
            .get("lon")
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| raw.parse::<f64>().ok());
        let lat = first
            .get("lat")
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| raw.parse::<f64>().ok());

        match (lon, lat) {
            (Some(lon), Some(lat)) => Ok(Some((lon, lat))),
            _ => Err(GeocodeError::Service(
                "response result lacks lon/lat fields".to_string(),
            )),
        }
    }
}

/// Resolve a free-text address to the grid cell containing it.
///
/// # Errors
/// Returns [`GeocodeError::AddressNotFound`] when the backend has no
/// candidate, [`GeocodeError::OutsideCoverage`] when the candidate falls
/// outside the grid, and [`GeocodeError::Service`] on backend failure.
pub fn resolve_address(
    geocoder: &dyn Geocoder,
    grid: &GridStore,
    address: &str,
) -> Result<CellId, GeocodeError> {
    let Some((lon, lat)) = geocoder.geocode(address)? else {
        return Err(GeocodeError::AddressNotFound(address.to_string()));
    };

    tracing::debug!(address, lon, lat, "geocoded address");
    grid.locate(Point::new(lon, lat))
        .ok_or_else(|| GeocodeError::OutsideCoverage(address.to_string()))
}

#[cfg(test)]
mod tests {
    use gridreach_core::GridCell;

    use super::*;

    struct StubGeocoder {
        result: Option<(f64, f64)>,
    }

    impl Geocoder for StubGeocoder {
        fn geocode(&self, _address: &str) -> Result<Option<(f64, f64)>, GeocodeError> {
            Ok(self.result)
        }
    }

    struct FailingGeocoder;

    impl Geocoder for FailingGeocoder {
        fn geocode(&self, _address: &str) -> Result<Option<(f64, f64)>, GeocodeError> {
            Err(GeocodeError::Service("backend unreachable".to_string()))
        }
    }

    fn fixture_grid() -> GridStore {
        let polygon = geo::Polygon::new(
            vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)].into(),
            vec![],
        );
        let cell = match GridCell::new(CellId(42), polygon) {
            Some(cell) => cell,
            None => panic!("fixture cell should have a centroid"),
        };
        match GridStore::from_cells(vec![cell]) {
            Ok(store) => store,
            Err(err) => panic!("fixture grid should build: {err}"),
        }
    }

    #[test]
    fn resolves_to_the_containing_cell() {
        let grid = fixture_grid();
        let geocoder = StubGeocoder {
            result: Some((0.5, 0.5)),
        };
        match resolve_address(&geocoder, &grid, "Some Street 1") {
            Ok(id) => assert_eq!(id, CellId(42)),
            Err(err) => panic!("address should resolve: {err}"),
        }
    }

    #[test]
    fn unknown_address_is_reported_as_not_found() {
        let grid = fixture_grid();
        let geocoder = StubGeocoder { result: None };
        match resolve_address(&geocoder, &grid, "Nowhere 99") {
            Err(GeocodeError::AddressNotFound(address)) => assert_eq!(address, "Nowhere 99"),
            other => panic!("expected AddressNotFound, got {other:?}"),
        }
    }

    #[test]
    fn point_outside_the_grid_is_outside_coverage() {
        let grid = fixture_grid();
        let geocoder = StubGeocoder {
            result: Some((50.0, 50.0)),
        };
        match resolve_address(&geocoder, &grid, "Far Away 1") {
            Err(GeocodeError::OutsideCoverage(address)) => assert_eq!(address, "Far Away 1"),
            other => panic!("expected OutsideCoverage, got {other:?}"),
        }
    }

    #[test]
    fn with_endpoint_redirects_requests_to_the_given_url() {
        // Port 1 refuses the connection, so a client pointed there must
        // fail as a service error without touching the default endpoint.
        let client = NominatimClient::new("gridreach-tests")
            .with_endpoint("http://127.0.0.1:1/search");
        match client.geocode("Some Street 1") {
            Err(GeocodeError::Service(_)) => {}
            other => panic!("expected Service error from unreachable endpoint, got {other:?}"),
        }
    }

    #[test]
    fn backend_failures_pass_through_as_service_errors() {
        let grid = fixture_grid();
        match resolve_address(&FailingGeocoder, &grid, "Any Street") {
            Err(GeocodeError::Service(_)) => {}
            other => panic!("expected Service error, got {other:?}"),
        }
    }
}
