use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// One of the three independent ledgers whose agreement is required.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum LedgerId {
    Ethereum = 1,
    Solana = 2,
    Ton = 3,
}

impl LedgerId {
    /// All ledgers in canonical order.
    pub const ALL: [LedgerId; 3] = [LedgerId::Ethereum, LedgerId::Solana, LedgerId::Ton];

    /// Wire byte for this ledger.
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(LedgerId::Ethereum),
            2 => Some(LedgerId::Solana),
            3 => Some(LedgerId::Ton),
            _ => None,
        }
    }

    /// Short lowercase identifier (for CLI/config/log fields).
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerId::Ethereum => "ethereum",
            LedgerId::Solana => "solana",
            LedgerId::Ton => "ton",
        }
    }

    /// Parse from a string identifier.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ethereum" => Some(LedgerId::Ethereum),
            "solana" => Some(LedgerId::Solana),
            "ton" => Some(LedgerId::Ton),
            _ => None,
        }
    }

    /// The two ledgers other than `self`, in canonical order.
    pub fn others(&self) -> [LedgerId; 2] {
        match self {
            LedgerId::Ethereum => [LedgerId::Solana, LedgerId::Ton],
            LedgerId::Solana => [LedgerId::Ethereum, LedgerId::Ton],
            LedgerId::Ton => [LedgerId::Ethereum, LedgerId::Solana],
        }
    }
}

impl std::fmt::Display for LedgerId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
