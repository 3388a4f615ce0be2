pub mod achievements;
pub mod reducer;
pub mod streak;

pub use reducer::{reduce, Action, AppState};
