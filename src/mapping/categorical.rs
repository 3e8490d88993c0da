//! Nominal mappings over sets of categories.
//!
//! Every atomic category of a column gets one incidence set recording the
//! generalization slots it appears in: category `c` belongs to the
//! generalization in slot `s` iff `indexes[c]` contains `s`. The three flavours
//! only differ in how an incidence set is stored.

use bitvec::prelude::*;
use rayon::prelude::*;
use roaring::RoaringBitmap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use super::tokens::TokenTable;
use super::{Token, Value};
use crate::error::{MappingError, Result};

/// The slots a category appears in.
pub trait Incidence: Clone + Debug + Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;

    fn with_len(len: usize) -> Self;
    fn insert(&mut self, slot: usize);
    fn contains(&self, slot: usize) -> bool;
    fn slots(&self) -> Vec<usize>;
}

/// Dense bitmap, one bit per generalization.
impl Incidence for BitVec<u64, Lsb0> {
    const KIND: &'static str = "bitmap";

    fn with_len(len: usize) -> Self {
        BitVec::repeat(false, len)
    }

    fn insert(&mut self, slot: usize) {
        if slot >= self.len() {
            self.resize(slot + 1, false);
        }
        self.set(slot, true);
    }

    fn contains(&self, slot: usize) -> bool {
        self.get(slot).map_or(false, |bit| *bit)
    }

    fn slots(&self) -> Vec<usize> {
        self.iter_ones().collect()
    }
}

impl Incidence for RoaringBitmap {
    const KIND: &'static str = "roaring";

    fn with_len(_: usize) -> Self {
        RoaringBitmap::new()
    }

    fn insert(&mut self, slot: usize) {
        RoaringBitmap::insert(self, slot as u32);
    }

    fn contains(&self, slot: usize) -> bool {
        RoaringBitmap::contains(self, slot as u32)
    }

    fn slots(&self) -> Vec<usize> {
        self.iter().map(|slot| slot as usize).collect()
    }
}

impl Incidence for BTreeSet<u32> {
    const KIND: &'static str = "set";

    fn with_len(_: usize) -> Self {
        BTreeSet::new()
    }

    fn insert(&mut self, slot: usize) {
        BTreeSet::insert(self, slot as u32);
    }

    fn contains(&self, slot: usize) -> bool {
        BTreeSet::contains(self, &(slot as u32))
    }

    fn slots(&self) -> Vec<usize> {
        self.iter().map(|&slot| slot as usize).collect()
    }
}

pub type BitmapMapping = CategoricalMapping<BitVec<u64, Lsb0>>;
pub type RoaringMapping = CategoricalMapping<RoaringBitmap>;
pub type SetMapping = CategoricalMapping<BTreeSet<u32>>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoricalMapping<I> {
    column: String,
    /// Category to the position of its incidence set, in category order.
    categories: BTreeMap<String, usize>,
    indexes: Vec<I>,
    tokens: TokenTable,
}

impl<I: Incidence> CategoricalMapping<I> {
    /// `members[s]` lists the categories of the generalization in slot `s`,
    /// whose tokens are `tokens.entries[s]`.
    pub fn new(column: &str, members: &[Vec<String>], tokens: TokenTable) -> Self {
        let categories: BTreeMap<String, usize> = members
            .iter()
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .enumerate()
            .map(|(i, category)| (category.clone(), i))
            .collect();

        let mut indexes = vec![I::with_len(members.len()); categories.len()];
        for (slot, items) in members.iter().enumerate() {
            for item in items {
                indexes[categories[item]].insert(slot);
            }
        }

        Self {
            column: column.to_string(),
            categories,
            indexes,
            tokens,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn token_table(&self) -> &TokenTable {
        &self.tokens
    }

    pub fn categories(&self) -> impl Iterator<Item = &String> {
        self.categories.keys()
    }

    fn unsupported(&self, operation: &str) -> crate::error::Error {
        MappingError::Unsupported {
            column: self.column.clone(),
            kind: I::KIND.to_string(),
            operation: operation.to_string(),
        }
        .into()
    }

    /// Tokens of every generalization containing the category `value`.
    pub fn eq(&self, value: &Value) -> Result<BTreeSet<Token>> {
        match self.categories.get(&value.as_label()) {
            Some(&category) => self.tokens.union(self.indexes[category].slots()),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Everything but the generalization made of `value` alone, if there is
    /// one. Generalizations mixing `value` with other categories are kept.
    pub fn neq(&self, value: &Value) -> Result<BTreeSet<Token>> {
        let excluded = self.categories.get(&value.as_label()).and_then(|&target| {
            self.indexes[target].slots().into_iter().find(|&slot| {
                self.indexes
                    .iter()
                    .enumerate()
                    .all(|(other, index)| other == target || !index.contains(slot))
            })
        });
        self.tokens
            .union((0..self.tokens.len()).filter(|&slot| Some(slot) != excluded))
    }

    pub fn lt(&self, _: &Value) -> Result<BTreeSet<Token>> {
        Err(self.unsupported("lt"))
    }

    pub fn le(&self, _: &Value) -> Result<BTreeSet<Token>> {
        Err(self.unsupported("le"))
    }

    pub fn gt(&self, _: &Value) -> Result<BTreeSet<Token>> {
        Err(self.unsupported("gt"))
    }

    pub fn ge(&self, _: &Value) -> Result<BTreeSet<Token>> {
        Err(self.unsupported("ge"))
    }

    pub fn between(&self, _: &Value, _: &Value) -> Result<BTreeSet<Token>> {
        Err(self.unsupported("between"))
    }

    /// Generalization strings in slot order: `{a,b}` for several categories
    /// (sorted), the bare category otherwise.
    pub fn generalizations(&self) -> Vec<String> {
        let names: Vec<&String> = self.categories.keys().collect();
        (0..self.tokens.len())
            .into_par_iter()
            .map(|slot| {
                let items: Vec<&str> = self
                    .indexes
                    .iter()
                    .enumerate()
                    .filter(|(_, index)| index.contains(slot))
                    .map(|(category, _)| names[category].as_str())
                    .collect();
                match items.as_slice() {
                    [single] => single.to_string(),
                    _ => format!("{{{}}}", items.join(",")),
                }
            })
            .collect()
    }

    pub fn tokens(&self) -> Result<Vec<Vec<Token>>> {
        self.tokens.all()
    }
}
