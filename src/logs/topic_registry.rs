//! Topic registry - event topic0 -> decoder lookup table
//!
//! Built once at startup from the configured deployments. Entries are kept
//! sorted by topic and looked up by binary search; a topic shared by several
//! protocols (forks emitting the same signature) is a single entry listing all
//! of them in configuration order.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{Address, B256, I256, U256};
use smallvec::SmallVec;

use super::unpacker::{AbiValue, LogUnpacker};
use super::utils::{event_topic, topic_address};
use super::{uniswap_v2, uniswap_v3, xlaunch, DecodeError};
use crate::config::Deployments;
use crate::core::events::{DexEvent, EventMetadata};
use crate::core::types::{BaseTokens, ProtocolId};
use crate::rpc::Log;

/// Decoder signature: unpacked values plus the matched entry in, event out.
pub type ParserFn = fn(&DecodeInput<'_>) -> Result<DexEvent, DecodeError>;

/// Factory events are only accepted from whitelisted factory addresses; pool
/// events come from any contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRole {
    Factory,
    Pool,
}

/// Static description of one event a protocol emits.
#[derive(Debug, Clone, Copy)]
pub struct EventSpec {
    pub name: &'static str,
    pub signature: &'static str,
    pub role: EventRole,
    pub unpacker: LogUnpacker,
    pub parser: ParserFn,
}

/// `event_spec!(name, signature, role, topic_len, [data kinds..], parser)`
macro_rules! event_spec {
    ($name:expr, $sig:expr, $role:ident, $topics:expr, [$($kind:ident),* $(,)?], $parser:path) => {
        $crate::logs::topic_registry::EventSpec {
            name: $name,
            signature: $sig,
            role: $crate::logs::topic_registry::EventRole::$role,
            unpacker: $crate::logs::unpacker::LogUnpacker::new($topics, &[$($crate::logs::unpacker::AbiKind::$kind),*]),
            parser: $parser,
        }
    };
}
pub(crate) use event_spec;

#[derive(Debug, Clone)]
pub struct TopicInfo {
    pub topic: B256,
    pub name: &'static str,
    pub signature: &'static str,
    pub role: EventRole,
    pub unpacker: LogUnpacker,
    pub parser: ParserFn,
    pub protocols: SmallVec<[ProtocolId; 2]>,
    /// Whitelisted emitters for factory events.
    pub factories: Vec<(Address, ProtocolId)>,
}

impl TopicInfo {
    fn new(topic: B256, spec: &EventSpec) -> Self {
        Self {
            topic,
            name: spec.name,
            signature: spec.signature,
            role: spec.role,
            unpacker: spec.unpacker,
            parser: spec.parser,
            protocols: SmallVec::new(),
            factories: Vec::new(),
        }
    }

    pub fn factory_protocol(&self, address: &Address) -> Option<ProtocolId> {
        self.factories.iter().find(|(f, _)| f == address).map(|(_, p)| *p)
    }
}

/// Everything a decoder gets for one log.
pub struct DecodeInput<'a> {
    pub log: &'a Log,
    pub values: &'a [AbiValue],
    pub info: &'a TopicInfo,
    pub bases: &'a BaseTokens,
}

impl DecodeInput<'_> {
    fn value(&self, i: usize) -> Result<&AbiValue, DecodeError> {
        self.values.get(i).ok_or(DecodeError::MissingValue(i))
    }

    pub fn u256(&self, i: usize) -> Result<U256, DecodeError> {
        self.value(i)?.as_u256().ok_or(DecodeError::MissingValue(i))
    }

    pub fn i256(&self, i: usize) -> Result<I256, DecodeError> {
        self.value(i)?.as_i256().ok_or(DecodeError::MissingValue(i))
    }

    pub fn address(&self, i: usize) -> Result<Address, DecodeError> {
        self.value(i)?.as_address().ok_or(DecodeError::MissingValue(i))
    }

    pub fn boolean(&self, i: usize) -> Result<bool, DecodeError> {
        self.value(i)?.as_bool().ok_or(DecodeError::MissingValue(i))
    }

    pub fn string(&self, i: usize) -> Result<String, DecodeError> {
        self.value(i)?.as_str().map(str::to_string).ok_or(DecodeError::MissingValue(i))
    }

    /// Indexed address at topic position `i` (1-based, signature is 0).
    pub fn topic_address(&self, i: usize) -> Result<Address, DecodeError> {
        self.log.topics.get(i).map(topic_address).ok_or(DecodeError::MissingValue(i))
    }

    pub fn topic_u256(&self, i: usize) -> Result<U256, DecodeError> {
        self.log.topics.get(i).map(|t| U256::from_be_bytes(t.0)).ok_or(DecodeError::MissingValue(i))
    }

    pub fn metadata(&self) -> EventMetadata {
        EventMetadata::from_log(self.log, &self.info.protocols)
    }

    /// Metadata for a factory event, tagged with the emitting factory's protocol.
    pub fn factory_metadata(&self) -> Result<(EventMetadata, ProtocolId), DecodeError> {
        let protocol = self
            .info
            .factory_protocol(&self.log.address)
            .ok_or(DecodeError::WrongFactoryAddress(self.log.address))?;
        Ok((EventMetadata::from_log(self.log, &[protocol]), protocol))
    }
}

fn events_of(protocol: ProtocolId) -> &'static [EventSpec] {
    match protocol {
        ProtocolId::UniswapV2 => uniswap_v2::EVENTS,
        ProtocolId::UniswapV3 => uniswap_v3::EVENTS,
        ProtocolId::XLaunch => xlaunch::EVENTS,
    }
}

pub struct TopicRegistry {
    entries: Vec<TopicInfo>,
    factories: HashMap<Address, ProtocolId>,
    bases: BaseTokens,
}

impl TopicRegistry {
    /// Registers the events of every protocol that has at least one factory deployed.
    pub fn new(deployments: &Deployments, bases: BaseTokens) -> Self {
        let mut by_topic: BTreeMap<B256, TopicInfo> = BTreeMap::new();
        let mut factories = HashMap::new();

        for protocol in ProtocolId::ALL {
            let deployed = deployments.factories(protocol);
            if deployed.is_empty() {
                continue;
            }
            for f in deployed {
                factories.entry(*f).or_insert(protocol);
            }
            for spec in events_of(protocol) {
                let topic = event_topic(spec.signature);
                let entry = by_topic.entry(topic).or_insert_with(|| TopicInfo::new(topic, spec));
                if !entry.protocols.contains(&protocol) {
                    entry.protocols.push(protocol);
                }
                if spec.role == EventRole::Factory {
                    entry.factories.extend(deployed.iter().map(|f| (*f, protocol)));
                }
            }
        }

        let entries: Vec<TopicInfo> = by_topic.into_values().collect();
        log::info!(
            "topic registry: {} topics, {} factories",
            entries.len(),
            factories.len()
        );
        Self { entries, factories, bases }
    }

    #[inline]
    pub fn lookup(&self, topic: &B256) -> Option<&TopicInfo> {
        self.entries
            .binary_search_by_key(topic, |e| e.topic)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TopicInfo] {
        &self.entries
    }

    pub fn bases(&self) -> &BaseTokens {
        &self.bases
    }

    pub fn protocol_of_factory(&self, factory: &Address) -> Option<ProtocolId> {
        self.factories.get(factory).copied()
    }

    /// Factories of `protocol`, sorted for deterministic verification order.
    pub fn protocol_factories(&self, protocol: ProtocolId) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .factories
            .iter()
            .filter(|(_, p)| **p == protocol)
            .map(|(a, _)| *a)
            .collect();
        out.sort();
        out
    }

    /// Routes a log to its decoder. Unknown topics yield `NoParser`; factory
    /// events from unknown emitters are rejected before unpacking.
    pub fn parse(&self, log: &Log) -> Result<DexEvent, DecodeError> {
        let topic = log.topics.first().ok_or(DecodeError::NoTopics)?;
        let info = self.lookup(topic).ok_or(DecodeError::NoParser(*topic))?;
        if info.role == EventRole::Factory && info.factory_protocol(&log.address).is_none() {
            return Err(DecodeError::WrongFactoryAddress(log.address));
        }
        let values = info.unpacker.unpack(log)?;
        (info.parser)(&DecodeInput { log, values: &values, info, bases: &self.bases })
    }
}
