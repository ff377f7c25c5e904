use std::collections::HashMap;
use tracing::{debug, warn};

use crate::adjacency::{AdjacencyList, AdjacencyStatus};
use crate::lsa::CoordinateLsa;
use crate::name_map::NameMap;
use crate::routing_table::{NextHop, NexthopSet, RoutingTable};
use crate::RouterName;

/// Cosine of the angle between two points on the unit n-sphere given in
/// spherical coordinates: nested product-of-sines expansion. For a single
/// angle this degenerates to cos(θ1 - θ2).
fn angular_cosine(a: &[f64], b: &[f64]) -> f64 {
    if a.len() == 1 {
        return (a[0] - b[0]).cos();
    }
    let mut total = 0.0;
    let mut sine_product = 1.0;
    for k in 0..a.len() {
        total += sine_product * a[k].cos() * b[k].cos();
        sine_product *= a[k].sin() * b[k].sin();
    }
    total + sine_product
}

/// Distance between two routers in the hyperboloid model. `None` when the
/// coordinates are incomparable (dimension mismatch) or the formula
/// degenerates to a non-finite value.
pub fn hyperbolic_distance(a: &CoordinateLsa, b: &CoordinateLsa) -> Option<f64> {
    if a.angles.is_empty() || a.angles.len() != b.angles.len() {
        return None;
    }
    let cosine = angular_cosine(&a.angles, &b.angles);
    let argument = a.radius.cosh() * b.radius.cosh() - a.radius.sinh() * b.radius.sinh() * cosine;
    let distance = argument.acosh();
    if distance.is_finite() {
        Some(distance)
    } else {
        None
    }
}

/// Greedy-embedding pass: reach every known router through direct
/// neighbors, ranked by the neighbor's hyperbolic distance to the
/// destination (zero when the neighbor *is* the destination, so physical
/// one-hop links always win). With `dry` set the results land in the
/// shadow table and never reach the forwarding plane.
pub fn calculate(
    map: &NameMap,
    coordinates: &HashMap<RouterName, &CoordinateLsa>,
    own_router: &RouterName,
    adjacencies: &AdjacencyList,
    table: &mut RoutingTable,
    dry: bool,
) {
    let neighbors: Vec<&crate::adjacency::Adjacent> = adjacencies
        .iter()
        .filter(|a| a.status == AdjacencyStatus::Active)
        .collect();

    for dest in 0..map.len() {
        let Some(dest_name) = map.name_of(dest) else {
            continue;
        };
        if dest_name == own_router {
            continue;
        }
        let Some(dest_coord) = coordinates.get(dest_name) else {
            continue;
        };

        let mut nexthops = NexthopSet::default();
        for neighbor in &neighbors {
            let cost = if &neighbor.name == dest_name {
                0.0
            } else {
                let Some(coord) = coordinates.get(&neighbor.name) else {
                    debug!(
                        "no coordinate LSA for neighbor {}, skipping it for {}",
                        neighbor.name, dest_name
                    );
                    continue;
                };
                match hyperbolic_distance(coord, dest_coord) {
                    Some(d) => d,
                    None => {
                        warn!(
                            "hyperbolic distance between {} and {} is undefined",
                            neighbor.name, dest_name
                        );
                        continue;
                    }
                }
            };
            nexthops.insert(NextHop::new(neighbor.face_uri.clone(), cost));
        }

        if !nexthops.is_empty() {
            table.insert_entry(dry, dest_name.clone(), nexthops);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::Adjacent;
    use crate::lsa::LsaHeader;
    use chrono::Utc;
    use std::time::Duration;

    fn coordinate(origin: &str, radius: f64, angles: &[f64]) -> CoordinateLsa {
        CoordinateLsa {
            header: LsaHeader {
                origin_router: origin.to_string(),
                seq_no: 1,
                expiration: Utc::now() + chrono::Duration::seconds(1800),
            },
            radius,
            angles: angles.to_vec(),
        }
    }

    fn face(name: &str) -> String {
        format!("udp4://{}:6363", name.trim_start_matches('/'))
    }

    fn active(name: &str) -> Adjacent {
        let mut a = Adjacent::new(name.to_string(), face(name), 10.0);
        a.status = AdjacencyStatus::Active;
        a
    }

    fn run(
        coords: &[CoordinateLsa],
        own: &str,
        adjacencies: &AdjacencyList,
        dry: bool,
    ) -> RoutingTable {
        let map = NameMap::from_coordinate_lsas(coords.iter());
        let by_name: HashMap<RouterName, &CoordinateLsa> = coords
            .iter()
            .map(|c| (c.header.origin_router.clone(), c))
            .collect();
        let mut table = RoutingTable::new(Duration::from_secs(15));
        calculate(&map, &by_name, &own.to_string(), adjacencies, &mut table, dry);
        table
    }

    #[test]
    fn distance_matches_the_hyperboloid_formula() {
        let a = coordinate("/a", 1.0, &[0.0]);
        let b = coordinate("/b", 1.0, &[std::f64::consts::PI]);
        // Antipodal points: acosh(cosh²r + sinh²r).
        let expected = (1.0f64.cosh().powi(2) + 1.0f64.sinh().powi(2)).acosh();
        let got = hyperbolic_distance(&a, &b).unwrap();
        assert!((got - expected).abs() < 1e-12);

        // Identical coordinates are at distance zero.
        assert!(hyperbolic_distance(&a, &a).unwrap().abs() < 1e-9);
    }

    #[test]
    fn distance_rejects_dimension_mismatch() {
        let a = coordinate("/a", 1.0, &[0.4]);
        let b = coordinate("/b", 1.0, &[0.4, 0.9]);
        assert!(hyperbolic_distance(&a, &b).is_none());
    }

    #[test]
    fn multi_dimensional_angles_agree_with_the_planar_case_at_fixed_latitude() {
        // With the first angle pinned at π/2 the second behaves planar.
        let a = coordinate("/a", 2.0, &[std::f64::consts::FRAC_PI_2, 0.3]);
        let b = coordinate("/b", 2.0, &[std::f64::consts::FRAC_PI_2, 1.1]);
        let planar_a = coordinate("/a", 2.0, &[0.3]);
        let planar_b = coordinate("/b", 2.0, &[1.1]);
        let got = hyperbolic_distance(&a, &b).unwrap();
        let expected = hyperbolic_distance(&planar_a, &planar_b).unwrap();
        assert!((got - expected).abs() < 1e-9);
    }

    #[test]
    fn direct_neighbor_ranks_first_via_zero_cost() {
        let coords = vec![
            coordinate("/a", 1.0, &[0.0]),
            coordinate("/b", 1.0, &[1.0]),
            coordinate("/c", 1.0, &[2.0]),
        ];
        let mut adjacencies = AdjacencyList::new();
        adjacencies.insert(active("/b")).unwrap();
        adjacencies.insert(active("/c")).unwrap();
        let table = run(&coords, "/a", &adjacencies, false);

        let to_b = table.lookup("/b").unwrap();
        let first = to_b.nexthops.iter().next().unwrap();
        assert_eq!(first.face_uri, face("/b"));
        assert_eq!(first.cost, 0.0);
        // The other neighbor stays as a fallback hop at its own distance.
        assert_eq!(to_b.nexthops.len(), 2);
    }

    #[test]
    fn remote_destination_goes_through_the_closest_neighbor() {
        let coords = vec![
            coordinate("/a", 1.0, &[0.0]),
            coordinate("/b", 1.0, &[0.5]),
            coordinate("/c", 1.0, &[2.5]),
            coordinate("/d", 1.0, &[2.6]),
        ];
        let mut adjacencies = AdjacencyList::new();
        adjacencies.insert(active("/b")).unwrap();
        adjacencies.insert(active("/c")).unwrap();
        let table = run(&coords, "/a", &adjacencies, false);

        // /d sits next to /c in the embedding.
        let to_d = table.lookup("/d").unwrap();
        assert_eq!(to_d.nexthops.iter().next().unwrap().face_uri, face("/c"));
    }

    #[test]
    fn dry_run_fills_only_the_shadow_table() {
        let coords = vec![coordinate("/a", 1.0, &[0.0]), coordinate("/b", 1.0, &[1.0])];
        let mut adjacencies = AdjacencyList::new();
        adjacencies.insert(active("/b")).unwrap();
        let table = run(&coords, "/a", &adjacencies, true);

        assert!(table.is_empty());
        assert_eq!(table.dry_entries().count(), 1);
    }

    #[test]
    fn destination_without_coordinates_is_skipped() {
        let coords = vec![coordinate("/a", 1.0, &[0.0]), coordinate("/b", 1.0, &[1.0])];
        let mut adjacencies = AdjacencyList::new();
        adjacencies.insert(active("/b")).unwrap();
        adjacencies.insert(active("/ghost")).unwrap();
        let table = run(&coords, "/a", &adjacencies, false);

        assert!(table.lookup("/ghost").is_none());
        // /ghost still cannot serve as a hop toward /b: no coordinates.
        assert_eq!(table.lookup("/b").unwrap().nexthops.len(), 1);
    }
}
