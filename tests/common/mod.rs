#![allow(dead_code, unused_imports)]

pub mod providers;
pub mod sources;
pub mod stages;

pub use providers::*;
pub use sources::*;
pub use stages::*;

use delver::state::{Complexity, Topic};

pub fn topic() -> Topic {
    Topic::new("Renewable Energy Storage", "energy", Complexity::Intermediate)
        .expect("valid topic")
}
