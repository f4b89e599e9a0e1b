pub mod amount;
pub mod configuration;
pub mod csv;
pub mod engine;
pub mod gate;
pub mod model;
pub mod notice;
pub mod schedule;
pub mod store;
pub mod telemetry;

pub use amount::Amount;
pub use engine::Engine;
pub use gate::Gate;
pub use model::{BetId, BetRequest, Command, ResultId, Round, StakeNumber, UserId};
pub use schedule::Schedule;
