mod group;
mod price;

pub use group::Group;
pub use price::{PriceEntry, PriceSnapshot};
