use tracing::debug;

use super::CostMatrix;
use crate::adjacency::{AdjacencyList, AdjacencyStatus};
use crate::name_map::NameMap;
use crate::routing_table::{NextHop, NexthopSet, RoutingTable};
use crate::RouterName;

/// Tolerance when comparing accumulated path costs for next-hop ties.
const TIE_TOLERANCE: f64 = 1e-9;

/// Single-source shortest distances over the cost matrix. Plain O(n²)
/// scan selection; ties on the minimum break toward the lowest index.
fn single_source_distances(matrix: &CostMatrix, source: usize) -> Vec<Option<f64>> {
    let n = matrix.len();
    let mut distance: Vec<Option<f64>> = vec![None; n];
    let mut visited = vec![false; n];
    distance[source] = Some(0.0);

    loop {
        let mut current: Option<(usize, f64)> = None;
        for i in 0..n {
            if visited[i] {
                continue;
            }
            if let Some(d) = distance[i] {
                if current.map_or(true, |(_, best)| d < best) {
                    current = Some((i, d));
                }
            }
        }
        let Some((u, base)) = current else {
            break;
        };
        visited[u] = true;

        for (v, cell) in matrix[u].iter().enumerate() {
            let Some(cost) = cell else { continue };
            let candidate = base + cost;
            if distance[v].map_or(true, |d| candidate < d) {
                distance[v] = Some(candidate);
                parent[v] = Some(u);
            }
        }
    }

    distance
}

/// Link-state pass: Dijkstra from this router, then for every reachable
/// destination collect *all* equally-shortest first hops: every active
/// direct neighbor whose direct-link cost plus its own shortest distance
/// to the destination matches the destination's shortest distance.
pub fn calculate(
    map: &NameMap,
    matrix: &CostMatrix,
    own_router: &RouterName,
    adjacencies: &AdjacencyList,
    table: &mut RoutingTable,
) {
    let Some(source) = map.index_of(own_router) else {
        debug!("own adjacency LSA not installed, skipping link-state pass");
        return;
    };

    let from_source = single_source_distances(matrix, source);

    // One Dijkstra per active neighbor; each yields the distance of every
    // destination as seen from that first hop.
    let neighbors: Vec<(usize, &str, f64)> = adjacencies
        .iter()
        .filter(|a| a.status == AdjacencyStatus::Active)
        .filter_map(|a| {
            let index = map.index_of(&a.name)?;
            let link_cost = matrix[source][index]?;
            Some((index, a.face_uri.as_str(), link_cost))
        })
        .collect();
    let via_neighbor: Vec<Vec<Option<f64>>> = neighbors
        .iter()
        .map(|(index, _, _)| single_source_distances(matrix, *index))
        .collect();

    for dest in 0..map.len() {
        if dest == source {
            continue;
        }
        let Some(total) = from_source[dest] else {
            // No adjacency information reaches this router: skip, not error.
            continue;
        };

        let mut nexthops = NexthopSet::default();
        for ((_, face_uri, link_cost), distances) in neighbors.iter().zip(&via_neighbor) {
            // distances[dest] is 0 when the neighbor is the destination,
            // so the direct link falls out of the same formula.
            if let Some(via) = distances[dest].map(|d| link_cost + d) {
                if (via - total).abs() < TIE_TOLERANCE {
                    nexthops.insert(NextHop::new(face_uri.to_string(), total));
                }
            }
        }

        if !nexthops.is_empty() {
            if let Some(name) = map.name_of(dest) {
                table.insert_entry(false, name.clone(), nexthops);
            }
        }
    }
}
