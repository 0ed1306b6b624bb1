//! Builds the De Bruijn (central-overlap) graph of a conformation: one node per proper
//! dihedral, with an edge wherever two dihedrals share three consecutive atoms. This, and the
//! node feature layout, is shared by training and by reloading a checkpoint for inference.

mod geometry;

use std::{fs, io::ErrorKind, path::Path};

use bincode::{Decode, Encode};
use lin_alg::f64::Vec3;
use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

pub use geometry::{dihedral_angle, valence_angle};

use crate::error::{Error, Result};

// Scales atomic numbers to ~O(1).
const Z_SCALE: f32 = 0.1;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AtomRecord {
    pub element: String,
    /// Å
    pub position: [f64; 3],
}

/// One conformation, as stored in `{i}.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StructuralRecord {
    pub atoms: Vec<AtomRecord>,
    /// Undirected pairs of atom indices.
    pub bonds: Vec<[usize; 2]>,
}

impl StructuralRecord {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::json(path, e))
    }
}

/// Atoms with their bonded topology and internal coordinates.
#[derive(Clone, Debug)]
pub struct RichGraph {
    pub atomic_numbers: Vec<u8>,
    pub positions: Vec<Vec3>,
    pub adjacency: Vec<Vec<usize>>,
    /// (i, j, k), with j central, and i < k.
    pub angles: Vec<[usize; 3]>,
    /// (a, b, c, d), around the b-c bond, with b < c.
    pub dihedrals: Vec<[usize; 4]>,
}

impl RichGraph {
    pub fn new(record: &StructuralRecord) -> Result<Self> {
        let n = record.atoms.len();
        if n == 0 {
            return Err(Error::Graph("Structure has 0 atoms".to_owned()));
        }

        let mut atomic_numbers = Vec::with_capacity(n);
        let mut positions = Vec::with_capacity(n);
        for atom in &record.atoms {
            atomic_numbers.push(atomic_number(&atom.element)?);
            let [x, y, z] = atom.position;
            positions.push(Vec3::new(x, y, z));
        }

        let mut adjacency = vec![Vec::new(); n];
        for &[i, j] in &record.bonds {
            if i >= n || j >= n || i == j {
                return Err(Error::Graph(format!(
                    "Invalid bond {i}-{j} for a structure with {n} atoms"
                )));
            }
            if !adjacency[i].contains(&j) {
                adjacency[i].push(j);
                adjacency[j].push(i);
            }
        }
        for nbrs in &mut adjacency {
            nbrs.sort_unstable();
        }

        let mut angles = Vec::new();
        for (j, nbrs) in adjacency.iter().enumerate() {
            for (ii, &i) in nbrs.iter().enumerate() {
                for &k in &nbrs[ii + 1..] {
                    angles.push([i, j, k]);
                }
            }
        }

        // Central bonds b-c are visited with b < c, so neither the order nor the direction in
        // which the record lists its bonds affects which dihedrals we get, or how they're oriented.
        let mut dihedrals = Vec::new();
        for (b, nbrs_b) in adjacency.iter().enumerate() {
            for &c in nbrs_b.iter().filter(|&&c| c > b) {
                for &a in nbrs_b {
                    if a == c {
                        continue;
                    }
                    for &d in &adjacency[c] {
                        if d == b || d == a {
                            continue;
                        }
                        dihedrals.push([a, b, c, d]);
                    }
                }
            }
        }

        Ok(Self {
            atomic_numbers,
            positions,
            adjacency,
            angles,
            dihedrals,
        })
    }

    pub fn dihedral_value(&self, d: [usize; 4]) -> f64 {
        let p = &self.positions;
        dihedral_angle(p[d[0]], p[d[1]], p[d[2]], p[d[3]])
    }

    pub fn angle_value(&self, i: usize, j: usize, k: usize) -> f64 {
        let p = &self.positions;
        valence_angle(p[i], p[j], p[k])
    }
}

/// The graph fed to the network. Node features are row-major `[num_nodes, num_feats]`.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct DihedralGraph {
    pub node_feats: Vec<f32>,
    pub num_nodes: usize,
    pub num_feats: usize,
    /// Directed (source, target) pairs. Symmetric.
    pub edges: Vec<(usize, usize)>,
}

impl DihedralGraph {
    /// Build the central-overlap graph. `shuffle` permutes node order, remapping edges to match.
    pub fn central_overlap<R: Rng + ?Sized>(
        rich: &RichGraph,
        shuffle: bool,
        sin_cos: bool,
        rng: &mut R,
    ) -> Result<Self> {
        let dihedrals = &rich.dihedrals;
        let num_nodes = dihedrals.len();
        if num_nodes == 0 {
            return Err(Error::Graph("Structure has no proper dihedrals".to_owned()));
        }

        let num_feats = if sin_cos { 2 } else { 1 } + 2 + 4;

        let mut order: Vec<usize> = (0..num_nodes).collect();
        if shuffle {
            order.shuffle(rng);
        }
        // old node index -> new node index
        let mut new_pos = vec![0; num_nodes];
        for (new_i, &old_i) in order.iter().enumerate() {
            new_pos[old_i] = new_i;
        }

        let mut node_feats = Vec::with_capacity(num_nodes * num_feats);
        for &old_i in &order {
            let d = dihedrals[old_i];
            let phi = rich.dihedral_value(d);

            if sin_cos {
                node_feats.push(phi.sin() as f32);
                node_feats.push(phi.cos() as f32);
            } else {
                node_feats.push(phi as f32);
            }

            node_feats.push(rich.angle_value(d[0], d[1], d[2]).cos() as f32);
            node_feats.push(rich.angle_value(d[1], d[2], d[3]).cos() as f32);

            for atom in d {
                node_feats.push(rich.atomic_numbers[atom] as f32 * Z_SCALE);
            }
        }

        let mut edges = Vec::new();
        for (u, du) in dihedrals.iter().enumerate() {
            for (v, dv) in dihedrals.iter().enumerate() {
                if u != v && overlaps(du, dv) {
                    for e in [(new_pos[u], new_pos[v]), (new_pos[v], new_pos[u])] {
                        if !edges.contains(&e) {
                            edges.push(e);
                        }
                    }
                }
            }
        }
        edges.sort_unstable();

        Ok(Self {
            node_feats,
            num_nodes,
            num_feats,
            edges,
        })
    }

    pub fn node(&self, i: usize) -> &[f32] {
        &self.node_feats[i * self.num_feats..(i + 1) * self.num_feats]
    }

    /// Flat `[num_nodes, num_nodes]` adjacency; 1 where there's an edge. No self loops.
    pub fn dense_adj(&self) -> Vec<f32> {
        let n = self.num_nodes;
        let mut adj = vec![0.; n * n];
        for &(s, t) in &self.edges {
            adj[s * n + t] = 1.;
        }
        adj
    }

    /// Returns `None` if there's no cache file at this path.
    pub fn load_cache(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (graph, _) = bincode::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|source| Error::CacheDecode {
                path: path.to_owned(),
                source,
            })?;

        Ok(Some(graph))
    }

    pub fn save_cache(&self, path: &Path) -> Result<()> {
        let bytes = bincode::encode_to_vec(self, bincode::config::standard())?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

/// Whether some reading of `u` ends with the three atoms that some reading of `v` starts with,
/// i.e. the two dihedrals are consecutive along a 5-atom path.
fn overlaps(u: &[usize; 4], v: &[usize; 4]) -> bool {
    let tails = [[u[1], u[2], u[3]], [u[2], u[1], u[0]]];
    let heads = [[v[0], v[1], v[2]], [v[3], v[2], v[1]]];
    tails.iter().any(|t| heads.contains(t))
}

/// Maps element symbols to atomic numbers.
fn atomic_number(symbol: &str) -> Result<u8> {
    let z = match symbol.trim() {
        "H" => 1,
        "C" => 6,
        "N" => 7,
        "O" => 8,
        "F" => 9,
        "P" => 15,
        "S" => 16,
        "Cl" | "CL" => 17,
        "Br" | "BR" => 35,
        "I" => 53,
        other => return Err(Error::Graph(format!("Unsupported element {other:?}"))),
    };
    Ok(z)
}
