use ethers::types::{Address, Log, H256, U256};

use super::abi_codec::{u256_to_u64, WORD_SIZE};
use crate::models::PurchaseEvent;

/// Purchase Parser - turns sale contract logs into purchase events
pub struct PurchaseParser {
    purchase_topic: H256,
}

impl PurchaseParser {
    pub fn new(purchase_topic: H256) -> Self {
        Self { purchase_topic }
    }

    /// Parse a log shaped as `(address indexed buyer, uint256 clubId,
    /// uint256 numPacks, uint256 unitPrice)`. Returns `None` for logs of any
    /// other shape, removed logs, or logs missing their chain position.
    pub fn parse_log(&self, log: &Log) -> Option<PurchaseEvent> {
        if log.removed == Some(true) {
            return None;
        }
        if log.topics.first() != Some(&self.purchase_topic) {
            return None;
        }
        let buyer = topic_to_address(log.topics.get(1)?);

        let data: &[u8] = log.data.as_ref();
        let primary_beneficiary_id = data_word(data, 0)?;
        let pack_count = data_word(data, 1)?;
        let unit_price_micros = data_word(data, 2)?;

        Some(PurchaseEvent {
            tx_hash: log.transaction_hash?,
            block_number: log.block_number?.as_u64(),
            log_index: log.log_index.and_then(|i| u256_to_u64(i).ok())?,
            buyer,
            sale_contract: log.address,
            primary_beneficiary_id,
            pack_count,
            unit_price_micros,
        })
    }

    pub fn purchase_topic(&self) -> H256 {
        self.purchase_topic
    }
}

/// Indexed address topics are left-padded to 32 bytes.
pub fn topic_to_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

pub fn address_to_topic(address: Address) -> H256 {
    H256::from(address)
}

fn data_word(data: &[u8], index: usize) -> Option<u64> {
    let start = index * WORD_SIZE;
    let word = data.get(start..start + WORD_SIZE)?;
    u256_to_u64(U256::from_big_endian(word)).ok()
}

#[cfg(test)]
pub(crate) fn purchase_log(
    topic: H256,
    sale_contract: Address,
    buyer: Address,
    block_number: u64,
    log_index: u64,
    fields: [u64; 3],
) -> Log {
    Log {
        address: sale_contract,
        topics: vec![topic, address_to_topic(buyer)],
        data: super::abi_codec::encode_words(&fields).into(),
        block_number: Some(block_number.into()),
        transaction_hash: Some(H256::from_low_u64_be(block_number * 1_000 + log_index)),
        log_index: Some(log_index.into()),
        ..Default::default()
    }
}
