use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::RouterName;

/// Tolerance for comparing advertised costs and coordinates.
pub const FLOAT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LsaType {
    Name,
    Adjacency,
    Coordinate,
}

impl LsaType {
    pub const ALL: [LsaType; 3] = [LsaType::Name, LsaType::Adjacency, LsaType::Coordinate];

    pub fn tag(self) -> &'static str {
        match self {
            LsaType::Name => "name",
            LsaType::Adjacency => "adjacency",
            LsaType::Coordinate => "coordinate",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "name" => Some(LsaType::Name),
            "adjacency" => Some(LsaType::Adjacency),
            "coordinate" => Some(LsaType::Coordinate),
            _ => None,
        }
    }
}

impl fmt::Display for LsaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Fields common to every LSA variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsaHeader {
    pub origin_router: RouterName,
    pub seq_no: u64,
    pub expiration: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameLsa {
    pub header: LsaHeader,
    pub prefixes: BTreeSet<String>,
}

/// One link of an adjacency snapshot: (neighbor, face, cost) as seen by
/// the origin at origination time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjacencyEdge {
    pub name: RouterName,
    pub face_uri: String,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjLsa {
    pub header: LsaHeader,
    /// Sorted by neighbor name at construction time.
    pub adjacencies: Vec<AdjacencyEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateLsa {
    pub header: LsaHeader,
    pub radius: f64,
    pub angles: Vec<f64>,
}

impl NameLsa {
    pub fn is_equal_content(&self, other: &NameLsa) -> bool {
        self.prefixes == other.prefixes
    }
}

impl AdjLsa {
    pub fn is_equal_content(&self, other: &AdjLsa) -> bool {
        self.adjacencies.len() == other.adjacencies.len()
            && self
                .adjacencies
                .iter()
                .zip(other.adjacencies.iter())
                .all(|(a, b)| {
                    a.name == b.name
                        && a.face_uri == b.face_uri
                        && (a.cost - b.cost).abs() < FLOAT_TOLERANCE
                })
    }
}

impl CoordinateLsa {
    pub fn is_equal_content(&self, other: &CoordinateLsa) -> bool {
        (self.radius - other.radius).abs() < FLOAT_TOLERANCE
            && self.angles.len() == other.angles.len()
            && self
                .angles
                .iter()
                .zip(other.angles.iter())
                .all(|(a, b)| (a - b).abs() < FLOAT_TOLERANCE)
    }
}

#[derive(Debug, Error)]
#[error("malformed LSA content: {0}")]
pub struct LsaDecodeError(#[from] serde_json::Error);

/// The wire-level sum of the three variants. The serde tag doubles as the
/// versioned type tag: decoding bytes with an unrecognized tag is a
/// `LsaDecodeError`, never a silent default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "lsa", rename_all = "kebab-case")]
pub enum Lsa {
    Name(NameLsa),
    Adjacency(AdjLsa),
    Coordinate(CoordinateLsa),
}

impl Lsa {
    pub fn lsa_type(&self) -> LsaType {
        match self {
            Lsa::Name(_) => LsaType::Name,
            Lsa::Adjacency(_) => LsaType::Adjacency,
            Lsa::Coordinate(_) => LsaType::Coordinate,
        }
    }

    pub fn header(&self) -> &LsaHeader {
        match self {
            Lsa::Name(lsa) => &lsa.header,
            Lsa::Adjacency(lsa) => &lsa.header,
            Lsa::Coordinate(lsa) => &lsa.header,
        }
    }

    /// Composite identity: at most one live LSA per key in the LSDB.
    pub fn key(&self) -> (RouterName, LsaType) {
        (self.header().origin_router.clone(), self.lsa_type())
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, LsaDecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn is_equal_content(&self, other: &Lsa) -> bool {
        match (self, other) {
            (Lsa::Name(a), Lsa::Name(b)) => a.is_equal_content(b),
            (Lsa::Adjacency(a), Lsa::Adjacency(b)) => a.is_equal_content(b),
            (Lsa::Coordinate(a), Lsa::Coordinate(b)) => a.is_equal_content(b),
            _ => false,
        }
    }

    pub fn update_name(&self) -> String {
        lsa_update_name(&self.header().origin_router, self.lsa_type())
    }
}

/// The resource name a router publishes updates under for one of its LSAs.
pub fn lsa_update_name(origin: &str, lsa_type: LsaType) -> String {
    format!("{}/lsa/{}", origin, lsa_type.tag())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpdateNameError {
    #[error("update name `{0}` has no lsa component")]
    MissingComponent(String),
    #[error("update name `{0}` carries an unknown LSA type tag")]
    UnknownType(String),
}

/// Inverse of [`lsa_update_name`]: recover (origin, type) from a flooded
/// resource name. Router names are themselves hierarchical, so parsing
/// works from the right.
pub fn parse_update_name(name: &str) -> Result<(RouterName, LsaType), UpdateNameError> {
    let (rest, tag) = name
        .rsplit_once('/')
        .ok_or_else(|| UpdateNameError::MissingComponent(name.to_string()))?;
    let origin = rest
        .strip_suffix("/lsa")
        .ok_or_else(|| UpdateNameError::MissingComponent(name.to_string()))?;
    if origin.is_empty() {
        return Err(UpdateNameError::MissingComponent(name.to_string()));
    }
    let lsa_type =
        LsaType::from_tag(tag).ok_or_else(|| UpdateNameError::UnknownType(name.to_string()))?;
    Ok((origin.to_string(), lsa_type))
}
