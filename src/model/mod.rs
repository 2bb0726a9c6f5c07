#[macro_use]
mod macros;

pub mod game_state;
pub mod report;
pub mod series;
pub mod town;
pub mod travel;

pub use game_state::{GameState, Population, Resources};
pub use report::Report;
pub use series::{Aggregation, DataPoint};
pub use town::Town;
pub use travel::Travel;
