//! Wire types shared between the paywatch server and the merchants it notifies.

pub mod objects;
pub mod signature;
