//! Tokens attached to the generalizations of one column.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::derivation::{derive, derive_batch, SALT_SIZE};
use super::Token;
use crate::error::{CryptoError, Result};

/// Tokens of one generalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TokenEntry {
    /// Explicit tokens, stored in the mapping.
    Static(Vec<Token>),
    /// `count` tokens derived on demand from `seed`.
    Runtime { seed: u64, count: u32 },
}

/// The token entries of a column, indexed by generalization slot, together
/// with what is needed to expand runtime entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenTable {
    pub entries: Vec<TokenEntry>,
    pub salt: [u8; SALT_SIZE],
    pub key: Option<Vec<u8>>,
}

impl TokenTable {
    pub fn new(entries: Vec<TokenEntry>, salt: [u8; SALT_SIZE], key: Option<Vec<u8>>) -> Self {
        Self { entries, salt, key }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_runtime(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, TokenEntry::Runtime { .. }))
    }

    fn key(&self) -> std::result::Result<&[u8], CryptoError> {
        self.key
            .as_deref()
            .ok_or(CryptoError::InvalidKeyLength(0))
    }

    /// Tokens of the generalization stored in `slot`.
    pub fn resolve(&self, slot: usize) -> Result<Vec<Token>> {
        match &self.entries[slot] {
            TokenEntry::Static(tokens) => Ok(tokens.clone()),
            TokenEntry::Runtime { seed, count } => Ok(derive(*seed, *count, self.key()?, &self.salt)?
                .into_iter()
                .map(Token::Int)
                .collect()),
        }
    }

    /// Adds the tokens of `slot` to `out`.
    pub fn extend_into(&self, slot: usize, out: &mut BTreeSet<Token>) -> Result<()> {
        match &self.entries[slot] {
            TokenEntry::Static(tokens) => out.extend(tokens.iter().cloned()),
            TokenEntry::Runtime { .. } => out.extend(self.resolve(slot)?),
        }
        Ok(())
    }

    /// Union of the tokens of every slot yielded by `slots`.
    pub fn union<I>(&self, slots: I) -> Result<BTreeSet<Token>>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut out = BTreeSet::new();
        for slot in slots {
            self.extend_into(slot, &mut out)?;
        }
        Ok(out)
    }

    /// Tokens of every slot, in slot order. Runtime entries are expanded in
    /// parallel.
    pub fn all(&self) -> Result<Vec<Vec<Token>>> {
        if !self.is_runtime() {
            return (0..self.len()).map(|slot| self.resolve(slot)).collect();
        }
        let key = self.key()?;
        let seeds: Vec<(u64, u32)> = self
            .entries
            .iter()
            .map(|e| match e {
                TokenEntry::Runtime { seed, count } => (*seed, *count),
                TokenEntry::Static(_) => (0, 0),
            })
            .collect();
        let derived = derive_batch(&seeds, key, &self.salt)?;
        Ok(self
            .entries
            .par_iter()
            .zip(derived)
            .map(|(entry, derived)| match entry {
                TokenEntry::Static(tokens) => tokens.clone(),
                TokenEntry::Runtime { .. } => derived.into_iter().map(Token::Int).collect(),
            })
            .collect())
    }

    /// Tokens shared by more than one generalization slot (or repeated inside
    /// one), with their multiplicity.
    pub fn collisions(&self) -> Result<BTreeMap<Token, usize>> {
        let mut seen: BTreeMap<Token, usize> = BTreeMap::new();
        for tokens in self.all()? {
            for token in tokens {
                *seen.entry(token).or_default() += 1;
            }
        }
        seen.retain(|_, n| *n > 1);
        Ok(seen)
    }
}
