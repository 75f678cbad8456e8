use std::fmt;

use serde::{Deserialize, Serialize};

pub use alloy_primitives::{Address, U256};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(PolicyId);
id_newtype!(NetworkId);

/// Amount in the contract's base unit (wei), as wide as the contract's `uint256`.
pub type Wei = U256;
