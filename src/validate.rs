//! Read-only integrity audit of a chain.

use serde::Serialize;

use crate::chain::Chain;
use crate::model::GENESIS_PREVIOUS_HASH;

/// What was wrong with the first offending block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The chain has no genesis block at all.
    MissingGenesis,
    /// Stored `index` differs from the block's position.
    IndexMismatch,
    /// Stored `hash` differs from the hash recomputed from the block's fields.
    HashMismatch,
    /// `previous_hash` differs from the stored hash of the preceding block.
    BrokenLink,
    /// Genesis `previous_hash` is not the `"0"` sentinel.
    GenesisLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Position of the offending block.
    pub index: u64,
    pub kind: ViolationKind,
}

impl Chain {
    pub fn is_valid(&self) -> bool {
        self.first_violation().is_none()
    }

    /// The first block failing the audit, scanning from genesis.
    pub fn first_violation(&self) -> Option<Violation> {
        let blocks = self.blocks();
        if blocks.is_empty() {
            return Some(Violation {
                index: 0,
                kind: ViolationKind::MissingGenesis,
            });
        }

        for (position, block) in blocks.iter().enumerate() {
            let index = position as u64;
            let fail = |kind| Some(Violation { index, kind });

            if block.index() != index {
                return fail(ViolationKind::IndexMismatch);
            }
            if block.recompute_hash() != block.hash() {
                return fail(ViolationKind::HashMismatch);
            }
            match position.checked_sub(1).map(|p| &blocks[p]) {
                None if block.previous_hash() != GENESIS_PREVIOUS_HASH => {
                    return fail(ViolationKind::GenesisLink)
                }
                Some(previous) if block.previous_hash() != previous.hash() => {
                    return fail(ViolationKind::BrokenLink)
                }
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn chain_with_blocks(n: usize) -> Chain {
        let mut chain = Chain::new(0);
        for i in 0..n {
            chain
                .submit(json!({"patient_id": format!("P{i}"), "diagnosis": "flu"}))
                .unwrap();
            chain.commit(&CancellationToken::new());
        }
        chain
    }

    #[test]
    fn untouched_chain_is_valid() {
        let chain = chain_with_blocks(3);
        assert!(chain.is_valid());
        assert_eq!(chain.first_violation(), None);
    }

    #[test]
    fn record_tampering_is_located() {
        let mut chain = chain_with_blocks(3);
        chain.blocks_mut()[2].records[0]
            .entry
            .insert("diagnosis".into(), json!("fine"));

        assert!(!chain.is_valid());
        assert_eq!(
            chain.first_violation(),
            Some(Violation {
                index: 2,
                kind: ViolationKind::HashMismatch
            })
        );
    }

    #[test]
    fn rehashed_tampering_breaks_the_next_link() {
        let mut chain = chain_with_blocks(3);
        let block = &mut chain.blocks_mut()[1];
        block.nonce += 1;
        block.hash = block.recompute_hash();

        assert_eq!(
            chain.first_violation(),
            Some(Violation {
                index: 2,
                kind: ViolationKind::BrokenLink
            })
        );
    }

    #[test]
    fn genesis_is_hash_checked() {
        let mut chain = chain_with_blocks(1);
        chain.blocks_mut()[0].timestamp += 1;
        assert_eq!(
            chain.first_violation().map(|v| (v.index, v.kind)),
            Some((0, ViolationKind::HashMismatch))
        );
    }

    #[test]
    fn reordering_is_detected() {
        let mut chain = chain_with_blocks(3);
        chain.blocks_mut().swap(1, 2);
        assert_eq!(
            chain.first_violation().map(|v| (v.index, v.kind)),
            Some((1, ViolationKind::IndexMismatch))
        );
    }

    #[test]
    fn empty_chain_is_invalid() {
        let mut chain = Chain::new(0);
        chain.blocks_mut().clear();
        assert_eq!(
            chain.first_violation().map(|v| v.kind),
            Some(ViolationKind::MissingGenesis)
        );
    }
}
