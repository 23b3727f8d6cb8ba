//! Patient and doctor lookups across committed blocks, in commit order.

use serde::Serialize;

use crate::chain::Chain;
use crate::model::{Block, Record};

/// A committed record together with the block that holds it.
#[derive(Debug, Clone, Serialize)]
pub struct RecordMatch<'a> {
    pub record: &'a Record,
    pub block_index: u64,
    pub block_hash: &'a str,
    pub block_timestamp: i64,
}

impl<'a> RecordMatch<'a> {
    fn new(block: &'a Block, record: &'a Record) -> Self {
        Self {
            record,
            block_index: block.index(),
            block_hash: block.hash(),
            block_timestamp: block.timestamp(),
        }
    }
}

impl Chain {
    pub fn records_for_patient<'a>(
        &'a self,
        patient_id: &'a str,
    ) -> impl Iterator<Item = RecordMatch<'a>> + Clone + 'a {
        self.records_where(move |r| r.patient_id() == Some(patient_id))
    }

    pub fn records_for_doctor<'a>(
        &'a self,
        doctor_id: &'a str,
    ) -> impl Iterator<Item = RecordMatch<'a>> + Clone + 'a {
        self.records_where(move |r| r.doctor_id() == Some(doctor_id))
    }

    /// Lazy linear scan. The genesis sentinel has no identity fields, so it
    /// never matches an identity predicate.
    fn records_where<'a, F>(
        &'a self,
        matches: F,
    ) -> impl Iterator<Item = RecordMatch<'a>> + Clone + 'a
    where
        F: Fn(&Record) -> bool + Clone + 'a,
    {
        self.blocks().iter().flat_map(move |block| {
            let matches = matches.clone();
            block
                .records()
                .iter()
                .filter(move |r| matches(*r))
                .map(move |r| RecordMatch::new(block, r))
        })
    }
}
