// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_derive;

pub mod cli;
pub mod counting;
pub mod errors;
pub mod filter;
pub mod histogram;
pub mod mutation;
pub mod parse;
pub mod scan;
pub mod serialize;
pub mod shape;

pub use crate::errors::Error;
pub use crate::mutation::{classify, Mutation, MutationClass, MutationType, ReadRecord, TaggedMutation};
