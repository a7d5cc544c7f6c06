use bytes::BufMut;
use neorex_io::{
    decode::decode_var_array, encode::write_var_int, DecodeError, NeoDecode, NeoEncode,
};

use crate::constants::{MAX_CONDITION_NESTING, MAX_SUBITEMS};

use super::UInt160;

/// Scope bits restricting where a signer's witness is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WitnessScopes(u8);

impl WitnessScopes {
    pub const NONE: u8 = 0x00;
    pub const CALLED_BY_ENTRY: u8 = 0x01;
    pub const CUSTOM_CONTRACTS: u8 = 0x10;
    pub const CUSTOM_GROUPS: u8 = 0x20;
    pub const WITNESS_RULES: u8 = 0x40;
    pub const GLOBAL: u8 = 0x80;

    const ALL: u8 = Self::CALLED_BY_ENTRY
        | Self::CUSTOM_CONTRACTS
        | Self::CUSTOM_GROUPS
        | Self::WITNESS_RULES
        | Self::GLOBAL;

    /// Validates the bit pattern: no undefined bits, and `Global` stands
    /// alone.
    pub fn from_bits(bits: u8) -> Result<Self, DecodeError> {
        if bits & !Self::ALL != 0 {
            return Err(DecodeError::UnknownDiscriminant {
                kind: "witness scope",
                value: bits,
            });
        }
        if bits & Self::GLOBAL != 0 && bits != Self::GLOBAL {
            return Err(DecodeError::Custom(
                "Global witness scope is exclusive".into(),
            ));
        }
        Ok(Self(bits))
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn called_by_entry() -> Self {
        Self(Self::CALLED_BY_ENTRY)
    }

    pub const fn global() -> Self {
        Self(Self::GLOBAL)
    }

    pub const fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WitnessRuleAction {
    Deny = 0x00,
    Allow = 0x01,
}

/// A single allow/deny rule evaluated against the calling context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessRule {
    pub action: WitnessRuleAction,
    pub condition: WitnessCondition,
}

/// Condition tree for witness rules. Nesting is bounded at decode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WitnessCondition {
    Boolean(bool),
    Not(Box<WitnessCondition>),
    And(Vec<WitnessCondition>),
    Or(Vec<WitnessCondition>),
    ScriptHash(UInt160),
    Group([u8; 33]),
    CalledByEntry,
}

impl WitnessCondition {
    const BOOLEAN: u8 = 0x00;
    const NOT: u8 = 0x01;
    const AND: u8 = 0x02;
    const OR: u8 = 0x03;
    const SCRIPT_HASH: u8 = 0x18;
    const GROUP: u8 = 0x19;
    const CALLED_BY_ENTRY: u8 = 0x20;

    fn discriminant(&self) -> u8 {
        match self {
            Self::Boolean(_) => Self::BOOLEAN,
            Self::Not(_) => Self::NOT,
            Self::And(_) => Self::AND,
            Self::Or(_) => Self::OR,
            Self::ScriptHash(_) => Self::SCRIPT_HASH,
            Self::Group(_) => Self::GROUP,
            Self::CalledByEntry => Self::CALLED_BY_ENTRY,
        }
    }

    fn decode_at_depth(buf: &[u8], depth: usize) -> Result<(Self, &[u8]), DecodeError> {
        let (discriminant, rest) = u8::decode_unfinished(buf)?;
        let compound = matches!(discriminant, Self::NOT | Self::AND | Self::OR);
        if compound && depth == 0 {
            return Err(DecodeError::Custom(
                "witness condition nested too deeply".into(),
            ));
        }
        match discriminant {
            Self::BOOLEAN => {
                let (value, rest) = bool::decode_unfinished(rest)?;
                Ok((Self::Boolean(value), rest))
            }
            Self::NOT => {
                let (inner, rest) = Self::decode_at_depth(rest, depth - 1)?;
                Ok((Self::Not(Box::new(inner)), rest))
            }
            Self::AND | Self::OR => {
                let (count, mut rest) = neorex_io::decode::read_var_int(rest)?;
                if count == 0 || count > MAX_SUBITEMS as u64 {
                    return Err(DecodeError::LengthCap {
                        declared: count,
                        cap: MAX_SUBITEMS,
                    });
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (item, r) = Self::decode_at_depth(rest, depth - 1)?;
                    items.push(item);
                    rest = r;
                }
                if discriminant == Self::AND {
                    Ok((Self::And(items), rest))
                } else {
                    Ok((Self::Or(items), rest))
                }
            }
            Self::SCRIPT_HASH => {
                let (hash, rest) = UInt160::decode_unfinished(rest)?;
                Ok((Self::ScriptHash(hash), rest))
            }
            Self::GROUP => {
                let (key, rest) = <[u8; 33]>::decode_unfinished(rest)?;
                Ok((Self::Group(key), rest))
            }
            Self::CALLED_BY_ENTRY => Ok((Self::CalledByEntry, rest)),
            other => Err(DecodeError::UnknownDiscriminant {
                kind: "witness condition",
                value: other,
            }),
        }
    }
}

impl NeoEncode for WitnessCondition {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(self.discriminant());
        match self {
            Self::Boolean(value) => value.encode(buf),
            Self::Not(inner) => inner.encode(buf),
            Self::And(items) | Self::Or(items) => {
                write_var_int(items.len() as u64, buf);
                for item in items {
                    item.encode(buf);
                }
            }
            Self::ScriptHash(hash) => hash.encode(buf),
            Self::Group(key) => key.encode(buf),
            Self::CalledByEntry => {}
        }
    }
}

impl NeoDecode for WitnessCondition {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        Self::decode_at_depth(buf, MAX_CONDITION_NESTING)
    }
}

impl NeoEncode for WitnessRule {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(self.action as u8);
        self.condition.encode(buf);
    }
}

impl NeoDecode for WitnessRule {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (action, rest) = u8::decode_unfinished(buf)?;
        let action = match action {
            0x00 => WitnessRuleAction::Deny,
            0x01 => WitnessRuleAction::Allow,
            other => {
                return Err(DecodeError::UnknownDiscriminant {
                    kind: "witness rule action",
                    value: other,
                })
            }
        };
        let (condition, rest) = WitnessCondition::decode_unfinished(rest)?;
        Ok((Self { action, condition }, rest))
    }
}

/// A transaction signer: the account, its witness scope, and the scope's
/// payload lists. The first signer of a transaction pays its fees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    pub account: UInt160,
    pub scopes: WitnessScopes,
    pub allowed_contracts: Vec<UInt160>,
    pub allowed_groups: Vec<[u8; 33]>,
    pub rules: Vec<WitnessRule>,
}

impl Signer {
    pub fn with_scope(account: UInt160, scopes: WitnessScopes) -> Self {
        Self {
            account,
            scopes,
            allowed_contracts: Vec::new(),
            allowed_groups: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn global(account: UInt160) -> Self {
        Self::with_scope(account, WitnessScopes::global())
    }

    pub fn called_by_entry(account: UInt160) -> Self {
        Self::with_scope(account, WitnessScopes::called_by_entry())
    }
}

impl NeoEncode for Signer {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.account.encode(buf);
        buf.put_u8(self.scopes.bits());
        if self.scopes.has(WitnessScopes::CUSTOM_CONTRACTS) {
            self.allowed_contracts.encode(buf);
        }
        if self.scopes.has(WitnessScopes::CUSTOM_GROUPS) {
            self.allowed_groups.encode(buf);
        }
        if self.scopes.has(WitnessScopes::WITNESS_RULES) {
            self.rules.encode(buf);
        }
    }
}

impl NeoDecode for Signer {
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (account, rest) = UInt160::decode_unfinished(buf)?;
        let (bits, mut rest) = u8::decode_unfinished(rest)?;
        let scopes = WitnessScopes::from_bits(bits)?;

        let mut allowed_contracts = Vec::new();
        let mut allowed_groups = Vec::new();
        let mut rules = Vec::new();
        if scopes.has(WitnessScopes::CUSTOM_CONTRACTS) {
            (allowed_contracts, rest) = decode_var_array(rest, MAX_SUBITEMS)?;
        }
        if scopes.has(WitnessScopes::CUSTOM_GROUPS) {
            (allowed_groups, rest) = decode_var_array(rest, MAX_SUBITEMS)?;
        }
        if scopes.has(WitnessScopes::WITNESS_RULES) {
            (rules, rest) = decode_var_array(rest, MAX_SUBITEMS)?;
        }

        Ok((
            Self {
                account,
                scopes,
                allowed_contracts,
                allowed_groups,
                rules,
            },
            rest,
        ))
    }
}
