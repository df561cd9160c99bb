//! RFC 6962 Merkle hashing and the collapsed ("compact") tree representation
//! a log monitor needs to track a verified position in O(log N) space.

use std::fmt;

use openssl::sha::sha256;
use serde::{Deserialize, Serialize};

/// `SHA-256(0x00 ‖ leaf_bytes)` — the identity of a log entry.
pub fn leaf_hash(leaf_bytes: &[u8]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(leaf_bytes.len() + 1);
    buf.push(0u8);
    buf.extend_from_slice(leaf_bytes);
    sha256(&buf)
}

/// `SHA-256(0x01 ‖ left ‖ right)`.
pub fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 65];
    buf[0] = 1;
    buf[1..33].copy_from_slice(left);
    buf[33..65].copy_from_slice(right);
    sha256(&buf)
}

/// `SHA-256("")` — the root of a tree with no leaves.
pub fn empty_hash() -> [u8; 32] {
    sha256(&[])
}

fn is_pow2(n: u64) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Largest power of two strictly less than `n`. Requires `n >= 2`.
fn largest_pow2_lt(n: u64) -> u64 {
    debug_assert!(n >= 2);
    1u64 << (63 - (n - 1).leading_zeros())
}

/// A single entry on the right spine of a collapsed tree: the hash of a
/// complete subtree covering `2^height` leaves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Subtree {
    height: u32,
    hash: [u8; 32],
}

/// A compact representation of a Merkle tree of size N that stores only the
/// `O(log N)` hashes on its right spine, sufficient to extend the tree with
/// new leaves and recompute its root.
///
/// A `CollapsedTree` of size N always computes the identical root hash that
/// a full Merkle tree built from the same N leaves would (see the
/// `collapsed_matches_full_tree` property test).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapsedTree {
    size: u64,
    nodes: Vec<Subtree>,
}

impl CollapsedTree {
    /// A tree with no leaves. `root()` is `SHA-256("")`.
    pub fn empty() -> Self {
        CollapsedTree {
            size: 0,
            nodes: Vec::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Folds the spine right-to-left, promoting the rightmost (possibly
    /// smaller) subtree, per RFC 6962's recursive `MTH` definition.
    pub fn root(&self) -> [u8; 32] {
        match self.nodes.split_last() {
            None => empty_hash(),
            Some((rightmost, rest)) => {
                let mut acc = rightmost.hash;
                for node in rest.iter().rev() {
                    acc = node_hash(&node.hash, &acc);
                }
                acc
            }
        }
    }

    /// Extends the tree by one leaf in amortized O(1): push a height-0 node,
    /// then repeatedly merge the two rightmost nodes while they're the same
    /// height (a binary-counter carry).
    pub fn append(&mut self, leaf_hash: [u8; 32]) {
        let mut incoming = Subtree {
            height: 0,
            hash: leaf_hash,
        };
        while let Some(last) = self.nodes.last() {
            if last.height != incoming.height {
                break;
            }
            let left = self.nodes.pop().unwrap();
            incoming = Subtree {
                height: incoming.height + 1,
                hash: node_hash(&left.hash, &incoming.hash),
            };
        }
        self.nodes.push(incoming);
        self.size += 1;
    }

    pub fn append_all<I: IntoIterator<Item = [u8; 32]>>(&mut self, leaves: I) {
        for l in leaves {
            self.append(l);
        }
    }

    /// Seeds a collapsed tree directly from a trusted `(size, root)` pair,
    /// without knowing any of its leaves.
    ///
    /// This only produces a tree that can soundly be `append`-ed to when
    /// `size` is a power of two (or zero): in that case the whole tree is a
    /// single complete subtree, and the compact representation the log
    /// itself would have computed is exactly one node — `root` at height
    /// `log2(size)` — so no information is lost. For any other size, the
    /// real compact representation has more than one right-spine node, none
    /// of which can be recovered from the root hash alone; returns `None`
    /// rather than build a `CollapsedTree` that would quietly corrupt every
    /// future `append`.
    pub fn from_pow2_root(size: u64, root: [u8; 32]) -> Option<Self> {
        if size == 0 {
            return if root == empty_hash() {
                Some(CollapsedTree::empty())
            } else {
                None
            };
        }
        if !is_pow2(size) {
            return None;
        }
        Some(CollapsedTree {
            size,
            nodes: vec![Subtree {
                height: size.trailing_zeros(),
                hash: root,
            }],
        })
    }
}

/// Why a consistency proof failed to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    /// `old_size > new_size`: a log cannot shrink.
    ShrunkTree { old_size: u64, new_size: u64 },
    /// Proof had nodes when none were expected (equal sizes, or old_size == 0).
    UnexpectedProofNodes,
    /// Proof was empty but nodes were required.
    EmptyProof,
    /// Proof ran out of nodes before the reconstruction finished.
    ProofTooShort,
    /// `old_size == new_size` but the given roots differ — a split view.
    RootMismatch,
    /// The reconstructed old root does not match the provided one.
    OldRootMismatch,
    /// The reconstructed new root does not match the provided one.
    NewRootMismatch,
}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyError::ShrunkTree { old_size, new_size } => {
                write!(f, "tree shrank from {} to {}", old_size, new_size)
            }
            ConsistencyError::UnexpectedProofNodes => {
                write!(f, "proof had nodes where none were expected")
            }
            ConsistencyError::EmptyProof => write!(f, "proof was empty but nodes were required"),
            ConsistencyError::ProofTooShort => {
                write!(f, "proof ran out of nodes before reconstruction finished")
            }
            ConsistencyError::RootMismatch => {
                write!(f, "equal tree sizes reported different roots (split view)")
            }
            ConsistencyError::OldRootMismatch => {
                write!(f, "reconstructed old root does not match the trusted one")
            }
            ConsistencyError::NewRootMismatch => {
                write!(f, "reconstructed new root does not match the claimed one")
            }
        }
    }
}

impl std::error::Error for ConsistencyError {}

/// Recursive reconstruction of RFC 6962 `PROOF(m, D[n])`. Returns the
/// `(old_root, new_root)` implied by this subtree window, consuming proof
/// nodes from `proof[*idx..]` as needed.
///
/// `seed` carries the externally-known old root down through the recursion,
/// but only while every split so far has kept the old tree's boundary inside
/// the left half (i.e. `old_size` is a power of two) — once a split puts the
/// boundary in the right half, the old root can no longer be taken for
/// granted and must be reconstructed purely from proof nodes instead.
fn subproof(
    m: u64,
    n: u64,
    proof: &[[u8; 32]],
    idx: &mut usize,
    seed: Option<[u8; 32]>,
) -> Result<([u8; 32], [u8; 32]), ConsistencyError> {
    if m == n {
        let hash = match seed {
            Some(root) => root,
            None => {
                let hash = *proof.get(*idx).ok_or(ConsistencyError::ProofTooShort)?;
                *idx += 1;
                hash
            }
        };
        return Ok((hash, hash));
    }
    let k = largest_pow2_lt(n);
    if m <= k {
        let (old_root, new_left) = subproof(m, k, proof, idx, seed)?;
        let right = *proof.get(*idx).ok_or(ConsistencyError::ProofTooShort)?;
        *idx += 1;
        Ok((old_root, node_hash(&new_left, &right)))
    } else {
        let left = *proof.get(*idx).ok_or(ConsistencyError::ProofTooShort)?;
        *idx += 1;
        let (old_right, new_right) = subproof(m - k, n - k, proof, idx, None)?;
        Ok((node_hash(&left, &old_right), node_hash(&left, &new_right)))
    }
}

/// Verifies a consistency proof between a tree of `old_size` (root
/// `old_root`) and a tree of `new_size` (root `new_root`), per RFC 6962
/// §2.1.2. When `old_size == 0` or `old_size == new_size` the proof must be
/// empty and only root equality (in the latter case) is checked.
pub fn verify_consistency(
    old_size: u64,
    new_size: u64,
    old_root: &[u8; 32],
    new_root: &[u8; 32],
    proof: &[[u8; 32]],
) -> Result<(), ConsistencyError> {
    if old_size > new_size {
        return Err(ConsistencyError::ShrunkTree { old_size, new_size });
    }
    if old_size == new_size {
        if !proof.is_empty() {
            return Err(ConsistencyError::UnexpectedProofNodes);
        }
        return if old_root == new_root {
            Ok(())
        } else {
            Err(ConsistencyError::RootMismatch)
        };
    }
    if old_size == 0 {
        if !proof.is_empty() {
            return Err(ConsistencyError::UnexpectedProofNodes);
        }
        return Ok(());
    }
    if proof.is_empty() {
        return Err(ConsistencyError::EmptyProof);
    }
    let seed = if is_pow2(old_size) {
        Some(*old_root)
    } else {
        None
    };
    let mut idx = 0;
    let (computed_old, computed_new) = subproof(old_size, new_size, proof, &mut idx, seed)?;
    if idx != proof.len() {
        return Err(ConsistencyError::UnexpectedProofNodes);
    }
    if &computed_old != old_root {
        return Err(ConsistencyError::OldRootMismatch);
    }
    if &computed_new != new_root {
        return Err(ConsistencyError::NewRootMismatch);
    }
    Ok(())
}

/// Builds the RFC 6962 `PROOF(m, D[n])` for a full set of known leaves.
/// Not something a monitor ever does (a monitor only *verifies* proofs a
/// log serves it) — this exists for property tests and mock wire clients
/// that need to hand a monitor a proof without running a real log.
pub fn generate_consistency_proof(leaves: &[[u8; 32]], old_size: u64, new_size: u64) -> Vec<[u8; 32]> {
    fn mth(leaves: &[[u8; 32]]) -> [u8; 32] {
        match leaves.len() {
            0 => empty_hash(),
            1 => leaves[0],
            n => {
                let k = largest_pow2_lt(n as u64) as usize;
                node_hash(&mth(&leaves[..k]), &mth(&leaves[k..]))
            }
        }
    }
    fn go(leaves: &[[u8; 32]], m: usize, proof: &mut Vec<[u8; 32]>) {
        let n = leaves.len();
        if m == n {
            if m != leaves.len() {
                proof.push(mth(leaves));
            }
            return;
        }
        let k = largest_pow2_lt(n as u64) as usize;
        if m <= k {
            go(&leaves[..k], m, proof);
            proof.push(mth(&leaves[k..]));
        } else {
            proof.push(mth(&leaves[..k]));
            go(&leaves[k..], m - k, proof);
        }
    }
    let (m, n) = (old_size as usize, new_size as usize);
    let mut proof = Vec::new();
    if m == 0 || m == n {
        return proof;
    }
    go(&leaves[..n], m, &mut proof);
    proof
}
