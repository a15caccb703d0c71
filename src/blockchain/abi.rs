//! Token call payloads and `Transfer` event decoding.
//!
//! Payloads are built word by word: a 4-byte selector followed by 32-byte
//! left-padded arguments. The visible recipient of a token transaction is
//! the contract, so the logical counter-party always comes from here.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

use crate::blockchain::types::{ChainError, ChainResult, Coin, FeeParams, LogEvent, Transaction, TxStatus};

sol! {
    /// ERC-20 `Transfer(from, to, value)` and ERC-721 `Transfer(from, to, tokenId)`
    /// share this signature; ERC-721 indexes the third field.
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);

    function transfer(address to, uint256 amount) external returns (bool);
    function transferFrom(address from, address to, uint256 amount) external returns (bool);
    function safeTransferFrom(address from, address to, uint256 tokenId) external;
    function balanceOf(address account) external view returns (uint256);
}

const WORD: usize = 32;

/// Logical movement carried by a token call payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTransfer {
    pub from: Option<Address>,
    pub to: Address,
    /// Amount for fungible tokens, token id for NFTs.
    pub value: U256,
}

fn push_address(data: &mut Vec<u8>, address: Address) {
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(address.as_slice());
}

fn push_uint(data: &mut Vec<u8>, value: U256) {
    data.extend_from_slice(&value.to_be_bytes::<WORD>());
}

fn word(args: &[u8], index: usize) -> Option<&[u8]> {
    args.get(index * WORD..(index + 1) * WORD)
}

fn address_word(args: &[u8], index: usize) -> Option<Address> {
    let w = word(args, index)?;
    // Upper 12 bytes of an address word are zero
    if w[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(Address::from_slice(&w[12..]))
}

fn uint_word(args: &[u8], index: usize) -> Option<U256> {
    word(args, index).map(U256::from_be_slice)
}

/// `transfer(address,uint256)` payload.
pub fn encode_transfer(to: Address, amount: U256) -> Bytes {
    let mut data = Vec::with_capacity(4 + 2 * WORD);
    data.extend_from_slice(&transferCall::SELECTOR);
    push_address(&mut data, to);
    push_uint(&mut data, amount);
    data.into()
}

/// `transferFrom(address,address,uint256)` payload, used for NFT moves.
pub fn encode_transfer_from(from: Address, to: Address, token_id: U256) -> Bytes {
    let mut data = Vec::with_capacity(4 + 3 * WORD);
    data.extend_from_slice(&transferFromCall::SELECTOR);
    push_address(&mut data, from);
    push_address(&mut data, to);
    push_uint(&mut data, token_id);
    data.into()
}

/// `balanceOf(address)` payload.
pub fn encode_balance_of(account: Address) -> Bytes {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&balanceOfCall::SELECTOR);
    push_address(&mut data, account);
    data.into()
}

/// Decode the first return word of an `eth_call` as an unsigned integer.
pub fn decode_uint_word(output: &[u8]) -> ChainResult<U256> {
    uint_word(output, 0).ok_or_else(|| {
        ChainError::Payload(format!("expected a 32-byte word, got {} bytes", output.len()))
    })
}

/// Recover the logical transfer from a token call payload.
///
/// Recognises `transfer`, `transferFrom` and `safeTransferFrom`; anything
/// else yields `None`.
pub fn decode_transfer_payload(input: &[u8]) -> Option<TokenTransfer> {
    let selector: [u8; 4] = input.get(..4)?.try_into().ok()?;
    let args = &input[4..];

    if selector == transferCall::SELECTOR {
        return Some(TokenTransfer {
            from: None,
            to: address_word(args, 0)?,
            value: uint_word(args, 1)?,
        });
    }
    if selector == transferFromCall::SELECTOR || selector == safeTransferFromCall::SELECTOR {
        return Some(TokenTransfer {
            from: Some(address_word(args, 0)?),
            to: address_word(args, 1)?,
            value: uint_word(args, 2)?,
        });
    }
    None
}

/// Build a transaction record from a token `Transfer` log.
///
/// ERC-20 logs carry the amount in `data`; ERC-721 logs carry the token id
/// as a fourth topic.
pub fn transaction_from_log(log: &LogEvent, coin: &Coin) -> Option<Transaction> {
    if log.topics.first() != Some(&Transfer::SIGNATURE_HASH) {
        return None;
    }
    let from = Address::from_word(*log.topics.get(1)?);
    let to = Address::from_word(*log.topics.get(2)?);
    let value = match log.topics.get(3) {
        Some(token_id) => U256::from_be_bytes(token_id.0),
        None => uint_word(&log.data, 0)?,
    };

    Some(Transaction {
        hash: log.tx_hash,
        block_number: Some(log.block_number),
        block_hash: log.block_hash,
        from,
        to,
        value,
        input: Bytes::new(),
        nonce: 0,
        gas_limit: 0,
        fee: FeeParams::default(),
        contract: Some(log.address),
        coin: coin.name.clone(),
        log_index: log.log_index,
        status: TxStatus::Pending,
        has_check: false,
        dirty: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, B256};

    #[test]
    fn test_selectors() {
        assert_eq!(transferCall::SELECTOR, [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(transferFromCall::SELECTOR, [0x23, 0xb8, 0x72, 0xdd]);
        assert_eq!(safeTransferFromCall::SELECTOR, [0x42, 0x84, 0x2e, 0x0e]);
        assert_eq!(balanceOfCall::SELECTOR, [0x70, 0xa0, 0x82, 0x31]);
    }

    #[test]
    fn test_transfer_payload_layout() {
        let to = address!("00000000000000000000000000000000000000bb");
        let data = encode_transfer(to, U256::from(1000));
        assert_eq!(data.len(), 68);
        assert_eq!(&data[..4], &transferCall::SELECTOR);
        assert!(data[4..16].iter().all(|b| *b == 0));
        assert_eq!(&data[16..36], to.as_slice());
        assert_eq!(U256::from_be_slice(&data[36..68]), U256::from(1000));

        let decoded = decode_transfer_payload(&data).unwrap();
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.value, U256::from(1000));
        assert_eq!(decoded.from, None);
    }

    #[test]
    fn test_transfer_from_payload() {
        let from = address!("00000000000000000000000000000000000000aa");
        let to = address!("00000000000000000000000000000000000000bb");
        let data = encode_transfer_from(from, to, U256::from(7));
        let decoded = decode_transfer_payload(&data).unwrap();
        assert_eq!(decoded.from, Some(from));
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.value, U256::from(7));
    }

    #[test]
    fn test_unknown_or_short_payload() {
        assert!(decode_transfer_payload(&[]).is_none());
        assert!(decode_transfer_payload(&[0xde, 0xad, 0xbe, 0xef, 0x00]).is_none());
        // Truncated transfer
        let data = encode_transfer(Address::ZERO, U256::from(1));
        assert!(decode_transfer_payload(&data[..40]).is_none());
    }

    #[test]
    fn test_erc20_log_decoding() {
        let token = address!("000000000000000000000000000000000000000c");
        let from = address!("000000000000000000000000000000000000000a");
        let to = address!("000000000000000000000000000000000000000b");
        let log = LogEvent {
            address: token,
            topics: vec![Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()],
            data: U256::from(1000).to_be_bytes::<32>().to_vec().into(),
            tx_hash: B256::repeat_byte(9),
            block_number: 12,
            block_hash: None,
            log_index: Some(3),
        };
        let coin = Coin::token("USDX", token, false);

        let tx = transaction_from_log(&log, &coin).unwrap();
        assert_eq!(tx.from, from);
        assert_eq!(tx.to, to);
        assert_eq!(tx.value, U256::from(1000));
        assert_eq!(tx.coin, "USDX");
        assert_eq!(tx.contract, Some(token));
        assert_eq!(tx.log_index, Some(3));
    }

    #[test]
    fn test_erc721_log_decoding() {
        let token = address!("000000000000000000000000000000000000000c");
        let log = LogEvent {
            address: token,
            topics: vec![
                Transfer::SIGNATURE_HASH,
                Address::ZERO.into_word(),
                address!("000000000000000000000000000000000000000b").into_word(),
                B256::from(U256::from(42).to_be_bytes::<32>()),
            ],
            data: Bytes::new(),
            tx_hash: B256::repeat_byte(1),
            block_number: 5,
            block_hash: None,
            log_index: None,
        };
        let tx = transaction_from_log(&log, &Coin::token("PUNK", token, true)).unwrap();
        assert_eq!(tx.value, U256::from(42));
    }

    #[test]
    fn test_foreign_event_ignored() {
        let log = LogEvent {
            address: Address::ZERO,
            topics: vec![B256::repeat_byte(5)],
            data: Bytes::new(),
            tx_hash: B256::ZERO,
            block_number: 1,
            block_hash: None,
            log_index: None,
        };
        assert!(transaction_from_log(&log, &Coin::native("ETH")).is_none());
    }
}
