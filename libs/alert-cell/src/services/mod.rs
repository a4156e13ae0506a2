pub mod clock;
pub mod dispatcher;
pub mod ledger;

pub use clock::DispatchClock;
pub use dispatcher::AlertDispatcher;
pub use ledger::{AlertLedger, Recorded, TaskUpdate};
