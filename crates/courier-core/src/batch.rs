use blake3::Hasher;

const LEAF_CONTEXT: &[u8] = b"courier:batch:leaf:v1";
const NODE_CONTEXT: &[u8] = b"courier:batch:node:v1";
const BATCH_ID_CONTEXT: &[u8] = b"courier:batch:id:v1";

pub type NodeHash = [u8; 32];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipProof {
    pub siblings: Vec<NodeHash>,
    pub sides: Vec<Side>,
}

/// Merkle tree over a batch of content identifiers. The root depends on
/// member order; the batch id only on the member set.
#[derive(Clone, Debug)]
pub struct MerkleBatch {
    members: Vec<String>,
    levels: Vec<Vec<NodeHash>>,
    root: NodeHash,
    batch_id: NodeHash,
}

impl MerkleBatch {
    /// Canonical construction: members are sorted lexicographically first.
    pub fn new(mut members: Vec<String>) -> Option<Self> {
        members.sort();
        Self::from_ordered(members)
    }

    pub fn from_ordered(members: Vec<String>) -> Option<Self> {
        if members.is_empty() {
            return None;
        }
        let leaves: Vec<NodeHash> = members.iter().map(|id| leaf_hash(id)).collect();
        let mut levels = vec![leaves];
        while levels.last().map(|l| l.len()).unwrap_or(0) > 1 {
            let current = levels.last().cloned().unwrap_or_default();
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                // An odd trailing node is paired with itself.
                let left = pair[0];
                let right = if pair.len() == 2 { pair[1] } else { pair[0] };
                next.push(node_hash(&left, &right));
            }
            levels.push(next);
        }
        let root = levels.last().and_then(|l| l.first()).copied()?;
        let batch_id = batch_id(&members);
        Some(Self {
            members,
            levels,
            root,
            batch_id,
        })
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn root(&self) -> NodeHash {
        self.root
    }

    pub fn batch_id(&self) -> NodeHash {
        self.batch_id
    }

    pub fn prove_membership(&self, target: &str) -> Option<MembershipProof> {
        let mut index = self.members.iter().position(|m| m == target)?;
        let mut siblings = Vec::new();
        let mut sides = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
            let sibling = level.get(sibling_index).copied().unwrap_or(level[index]);
            siblings.push(sibling);
            sides.push(if index % 2 == 0 {
                Side::Right
            } else {
                Side::Left
            });
            index /= 2;
        }
        Some(MembershipProof { siblings, sides })
    }
}

pub fn verify_membership(leaf_id: &str, proof: &MembershipProof, root: &NodeHash) -> bool {
    if proof.siblings.len() != proof.sides.len() {
        return false;
    }
    let mut current = leaf_hash(leaf_id);
    for (sibling, side) in proof.siblings.iter().zip(proof.sides.iter()) {
        current = match side {
            Side::Right => node_hash(&current, sibling),
            Side::Left => node_hash(sibling, &current),
        };
    }
    current == *root
}

/// Order-independent hash of the sorted member set.
pub fn batch_id(members: &[String]) -> NodeHash {
    let mut sorted: Vec<&String> = members.iter().collect();
    sorted.sort();
    let mut hasher = Hasher::new();
    hasher.update(BATCH_ID_CONTEXT);
    for member in sorted {
        hasher.update(member.as_bytes());
        hasher.update(&[0]);
    }
    *hasher.finalize().as_bytes()
}

fn leaf_hash(id: &str) -> NodeHash {
    let mut hasher = Hasher::new();
    hasher.update(LEAF_CONTEXT);
    hasher.update(id.as_bytes());
    *hasher.finalize().as_bytes()
}

fn node_hash(left: &NodeHash, right: &NodeHash) -> NodeHash {
    let mut hasher = Hasher::new();
    hasher.update(NODE_CONTEXT);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}
