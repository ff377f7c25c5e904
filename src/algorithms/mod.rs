pub mod dijkstra;
pub mod hyperbolic;

use crate::lsa::AdjLsa;
use crate::name_map::NameMap;

/// Cost matrix cell: `None` is "no edge", distinct from a genuine
/// zero-cost link.
pub type CostMatrix = Vec<Vec<Option<f64>>>;

/// Build the dense adjacency matrix by scanning every adjacency LSA.
/// Directed on purpose: cell (i, j) holds the cost as reported by router
/// i's own LSA, and the two sides of one physical link may disagree while
/// the network converges.
pub fn build_cost_matrix<'a>(
    map: &NameMap,
    lsas: impl Iterator<Item = &'a AdjLsa>,
) -> CostMatrix {
    let n = map.len();
    let mut matrix = vec![vec![None; n]; n];
    for lsa in lsas {
        let Some(i) = map.index_of(&lsa.header.origin_router) else {
            continue;
        };
        for edge in &lsa.adjacencies {
            if let Some(j) = map.index_of(&edge.name) {
                matrix[i][j] = Some(edge.cost);
            }
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsa::{AdjacencyEdge, LsaHeader};
    use chrono::Utc;

    fn adj_lsa(origin: &str, edges: &[(&str, f64)]) -> AdjLsa {
        AdjLsa {
            header: LsaHeader {
                origin_router: origin.to_string(),
                seq_no: 1,
                expiration: Utc::now() + chrono::Duration::seconds(1800),
            },
            adjacencies: edges
                .iter()
                .map(|(name, cost)| AdjacencyEdge {
                    name: name.to_string(),
                    face_uri: format!("udp4://{}:6363", name.trim_start_matches('/')),
                    cost: *cost,
                })
                .collect(),
        }
    }

    #[test]
    fn matrix_keeps_asymmetric_reports() {
        let lsas = vec![
            adj_lsa("/a", &[("/b", 5.0)]),
            adj_lsa("/b", &[("/a", 7.0)]),
        ];
        let map = NameMap::from_adjacency_lsas(lsas.iter());
        let matrix = build_cost_matrix(&map, lsas.iter());

        let a = map.index_of("/a").unwrap();
        let b = map.index_of("/b").unwrap();
        assert_eq!(matrix[a][b], Some(5.0));
        assert_eq!(matrix[b][a], Some(7.0));
        assert_eq!(matrix[a][a], None);
    }

    #[test]
    fn zero_cost_link_is_not_a_missing_edge() {
        let lsas = vec![adj_lsa("/a", &[("/b", 0.0)])];
        let map = NameMap::from_adjacency_lsas(lsas.iter());
        let matrix = build_cost_matrix(&map, lsas.iter());

        let a = map.index_of("/a").unwrap();
        let b = map.index_of("/b").unwrap();
        assert_eq!(matrix[a][b], Some(0.0));
        assert_eq!(matrix[b][a], None);
    }
}
