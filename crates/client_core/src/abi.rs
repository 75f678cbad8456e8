//! Minimal contract ABI codec: selectors, static 32-byte words, revert strings, event fields.

use std::collections::HashMap;

use alloy_primitives::{keccak256, B256, U256};
use shared::{
    domain::Address,
    protocol::{AbiEntry, AbiEntryKind, AbiParam, LogEntry},
};
use thiserror::Error;

pub const WORD_LEN: usize = 32;
/// Selector of the standard `Error(string)` revert payload.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

pub type Word = [u8; WORD_LEN];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("return data length {0} is not a multiple of 32")]
    InvalidLength(usize),
    #[error("expected at least {expected} return words, got {actual}")]
    MissingWords { expected: usize, actual: usize },
    #[error("integer does not fit in 64 bits")]
    ValueOverflow,
    #[error("invalid boolean word")]
    InvalidBool,
    #[error("invalid address word")]
    InvalidAddress,
    #[error("event `{event}` has no field `{field}`")]
    UnknownField { event: String, field: String },
    #[error("`{signature}` takes {expected} arguments, got {actual}")]
    ArgumentCount {
        signature: String,
        expected: usize,
        actual: usize,
    },
    #[error("log is missing topic {0}")]
    MissingTopic(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(U256),
    Address(Address),
    Bool(bool),
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Canonical `name(type,type)` form used for selectors and event topics.
pub fn canonical_signature(name: &str, inputs: &[AbiParam]) -> String {
    let types = inputs
        .iter()
        .map(|param| canonical_type(&param.kind))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}({types})")
}

fn canonical_type(kind: &str) -> &str {
    match kind {
        "uint" => "uint256",
        "int" => "int256",
        other => other,
    }
}

pub fn encode_word(token: &Token) -> Word {
    match token {
        Token::Uint(value) => value.to_be_bytes::<WORD_LEN>(),
        Token::Address(address) => address.into_word().0,
        Token::Bool(value) => U256::from(u8::from(*value)).to_be_bytes::<WORD_LEN>(),
    }
}

pub fn encode_call(selector: [u8; 4], tokens: &[Token]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + tokens.len() * WORD_LEN);
    data.extend_from_slice(&selector);
    for token in tokens {
        data.extend_from_slice(&encode_word(token));
    }
    data
}

pub fn words(data: &[u8]) -> Result<Vec<Word>, AbiError> {
    if data.len() % WORD_LEN != 0 {
        return Err(AbiError::InvalidLength(data.len()));
    }
    Ok(data
        .chunks_exact(WORD_LEN)
        .map(|chunk| B256::from_slice(chunk).0)
        .collect())
}

pub fn expect_words(data: &[u8], expected: usize) -> Result<Vec<Word>, AbiError> {
    let words = words(data)?;
    if words.len() < expected {
        return Err(AbiError::MissingWords {
            expected,
            actual: words.len(),
        });
    }
    Ok(words)
}

pub fn decode_uint(word: &Word) -> U256 {
    U256::from_be_bytes(*word)
}

/// Integer word narrowed to a count or identifier.
pub fn decode_u64(word: &Word) -> Result<u64, AbiError> {
    u64::try_from(decode_uint(word)).map_err(|_| AbiError::ValueOverflow)
}

pub fn decode_address(word: &Word) -> Result<Address, AbiError> {
    if word[..12].iter().any(|byte| *byte != 0) {
        return Err(AbiError::InvalidAddress);
    }
    Ok(Address::from_word(B256::from(*word)))
}

pub fn decode_bool(word: &Word) -> Result<bool, AbiError> {
    let value = decode_uint(word);
    if value == U256::ZERO {
        Ok(false)
    } else if value == U256::from(1u8) {
        Ok(true)
    } else {
        Err(AbiError::InvalidBool)
    }
}

/// Extracts the message of an `Error(string)` revert payload.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&ERROR_STRING_SELECTOR[..])?;
    let offset = usize::try_from(decode_u64(&word_at(body, 0)?).ok()?).ok()?;
    let len = usize::try_from(decode_u64(&word_at(body, offset)?).ok()?).ok()?;
    let start = offset.checked_add(WORD_LEN)?;
    let end = start.checked_add(len)?;
    let bytes = body.get(start..end)?;
    String::from_utf8(bytes.to_vec()).ok()
}

fn word_at(data: &[u8], offset: usize) -> Option<Word> {
    let slice = data.get(offset..offset.checked_add(WORD_LEN)?)?;
    Some(B256::from_slice(slice).0)
}

#[derive(Debug, Clone)]
pub struct AbiFunction {
    pub signature: String,
    pub selector: [u8; 4],
    pub inputs: Vec<AbiParam>,
}

impl AbiFunction {
    pub fn encode(&self, tokens: &[Token]) -> Result<Vec<u8>, AbiError> {
        if tokens.len() != self.inputs.len() {
            return Err(AbiError::ArgumentCount {
                signature: self.signature.clone(),
                expected: self.inputs.len(),
                actual: tokens.len(),
            });
        }
        Ok(encode_call(self.selector, tokens))
    }
}

#[derive(Debug, Clone)]
pub struct AbiEvent {
    pub name: String,
    pub topic: B256,
    pub inputs: Vec<AbiParam>,
}

impl AbiEvent {
    pub fn matches(&self, log: &LogEntry) -> bool {
        log.topics.first() == Some(&self.topic)
    }

    /// Reads an integer field from a log; indexed fields come from topics, the rest from data.
    pub fn decode_uint_field(&self, log: &LogEntry, field: &str) -> Result<U256, AbiError> {
        let position = self
            .inputs
            .iter()
            .position(|param| param.name.eq_ignore_ascii_case(field))
            .ok_or_else(|| AbiError::UnknownField {
                event: self.name.clone(),
                field: field.to_string(),
            })?;
        let param = &self.inputs[position];
        let preceding = &self.inputs[..position];

        if param.indexed {
            let topic_index = 1 + preceding.iter().filter(|p| p.indexed).count();
            let topic = log
                .topics
                .get(topic_index)
                .ok_or(AbiError::MissingTopic(topic_index))?;
            Ok(decode_uint(&topic.0))
        } else {
            let word_index = preceding.iter().filter(|p| !p.indexed).count();
            let words = expect_words(&log.data, word_index + 1)?;
            Ok(decode_uint(&words[word_index]))
        }
    }
}

/// Function and event lookup built from a descriptor's ABI entries.
#[derive(Debug, Clone, Default)]
pub struct ContractAbi {
    functions: HashMap<String, AbiFunction>,
    events: HashMap<String, AbiEvent>,
}

impl ContractAbi {
    pub fn from_entries(entries: &[AbiEntry]) -> Self {
        let mut abi = Self::default();
        for entry in entries {
            match entry.kind {
                AbiEntryKind::Function => {
                    let signature = canonical_signature(&entry.name, &entry.inputs);
                    abi.functions.insert(
                        entry.name.clone(),
                        AbiFunction {
                            selector: selector(&signature),
                            signature,
                            inputs: entry.inputs.clone(),
                        },
                    );
                }
                AbiEntryKind::Event if !entry.anonymous => {
                    let signature = canonical_signature(&entry.name, &entry.inputs);
                    abi.events.insert(
                        entry.name.clone(),
                        AbiEvent {
                            name: entry.name.clone(),
                            topic: keccak256(signature.as_bytes()),
                            inputs: entry.inputs.clone(),
                        },
                    );
                }
                _ => {}
            }
        }
        abi
    }

    pub fn function(&self, name: &str) -> Option<&AbiFunction> {
        self.functions.get(name)
    }

    pub fn event(&self, name: &str) -> Option<&AbiEvent> {
        self.events.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, kind: &str, indexed: bool) -> AbiParam {
        AbiParam {
            name: name.to_string(),
            kind: kind.to_string(),
            indexed,
        }
    }

    fn encode_revert(reason: &str) -> Vec<u8> {
        let mut data = ERROR_STRING_SELECTOR.to_vec();
        data.extend_from_slice(&encode_word(&Token::Uint(U256::from(32))));
        data.extend_from_slice(&encode_word(&Token::Uint(U256::from(reason.len()))));
        let mut padded = reason.as_bytes().to_vec();
        padded.resize(reason.len().div_ceil(WORD_LEN) * WORD_LEN, 0);
        data.extend_from_slice(&padded);
        data
    }

    #[test]
    fn computes_well_known_selectors() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(selector("Error(string)"), ERROR_STRING_SELECTOR);
    }

    #[test]
    fn canonicalizes_short_integer_aliases() {
        let inputs = vec![param("_payout", "uint", false)];
        assert_eq!(canonical_signature("buyPolicy", &inputs), "buyPolicy(uint256)");
    }

    #[test]
    fn encodes_uint_argument_after_selector() {
        let data = encode_call([1, 2, 3, 4], &[Token::Uint(U256::from(0x0de0b6b3a7640000u64))]);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &[1, 2, 3, 4]);
        assert_eq!(
            alloy_primitives::hex::encode(&data[4..]),
            "0000000000000000000000000000000000000000000000000de0b6b3a7640000"
        );
    }

    #[test]
    fn decodes_words_and_rejects_malformed_values() {
        let address: Address = "0x5b38da6a701c568545dcfcb03fcb875f56beddc4"
            .parse()
            .expect("address");
        let mut data = Vec::new();
        data.extend_from_slice(&encode_word(&Token::Address(address)));
        data.extend_from_slice(&encode_word(&Token::Uint(U256::from(42))));
        data.extend_from_slice(&encode_word(&Token::Bool(true)));

        let decoded = expect_words(&data, 3).expect("words");
        assert_eq!(decode_address(&decoded[0]), Ok(address));
        assert_eq!(decode_uint(&decoded[1]), U256::from(42));
        assert_eq!(decode_u64(&decoded[1]), Ok(42));
        assert_eq!(decode_bool(&decoded[2]), Ok(true));

        assert_eq!(decode_uint(&[0xff; 32]), U256::MAX);
        assert_eq!(decode_u64(&[0xff; 32]), Err(AbiError::ValueOverflow));
        assert_eq!(decode_bool(&decoded[1]), Err(AbiError::InvalidBool));
        assert_eq!(decode_address(&[0xff; 32]), Err(AbiError::InvalidAddress));
        assert_eq!(
            expect_words(&data, 5).map(|w| w.len()),
            Err(AbiError::MissingWords {
                expected: 5,
                actual: 3
            })
        );
        assert_eq!(words(&data[..40]), Err(AbiError::InvalidLength(40)));
    }

    #[test]
    fn function_encoding_checks_argument_count() {
        let abi = ContractAbi::from_entries(&[AbiEntry {
            kind: AbiEntryKind::Function,
            name: "claimPolicy".into(),
            inputs: vec![param("_policyId", "uint256", false)],
            outputs: Vec::new(),
            state_mutability: Some("nonpayable".into()),
            anonymous: false,
        }]);
        let function = abi.function("claimPolicy").expect("function");
        assert_eq!(function.signature, "claimPolicy(uint256)");

        let data = function.encode(&[Token::Uint(U256::from(3))]).expect("encode");
        assert_eq!(&data[..4], &selector("claimPolicy(uint256)"));
        assert_eq!(data.len(), 36);
        assert!(matches!(
            function.encode(&[]),
            Err(AbiError::ArgumentCount { expected: 1, actual: 0, .. })
        ));
    }

    #[test]
    fn decodes_error_string_revert_payload() {
        let data = encode_revert("Policy has already been claimed");
        assert_eq!(
            decode_revert_reason(&data).as_deref(),
            Some("Policy has already been claimed")
        );
        assert_eq!(decode_revert_reason(&data[..40]), None);
        assert_eq!(decode_revert_reason(b"\x00\x00\x00\x00"), None);
    }

    #[test]
    fn reads_indexed_and_data_event_fields() {
        let event = AbiEvent {
            name: "PolicyPurchased".into(),
            topic: keccak256(b"PolicyPurchased(uint256,address,uint256)"),
            inputs: vec![
                param("policyId", "uint256", true),
                param("holder", "address", true),
                param("premium", "uint256", false),
            ],
        };
        let holder: Address = "0x5b38da6a701c568545dcfcb03fcb875f56beddc4"
            .parse()
            .expect("address");
        let log = LogEntry {
            address: holder,
            topics: vec![
                event.topic,
                B256::from(encode_word(&Token::Uint(U256::from(7)))),
                B256::from(encode_word(&Token::Address(holder))),
            ],
            data: encode_word(&Token::Uint(U256::from(1000))).to_vec(),
        };

        assert!(event.matches(&log));
        assert_eq!(event.decode_uint_field(&log, "policyId"), Ok(U256::from(7)));
        assert_eq!(event.decode_uint_field(&log, "premium"), Ok(U256::from(1000)));
        assert!(matches!(
            event.decode_uint_field(&log, "payout"),
            Err(AbiError::UnknownField { .. })
        ));
    }
}
