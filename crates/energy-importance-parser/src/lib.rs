pub mod errors;
pub mod frame;
pub mod loader;
pub mod model;
pub mod schema;

pub use errors::ParserError;
pub use frame::observations_from_frame;
pub use loader::{parse_energy_csv, read_energy_csv};
pub use model::{RawObservation, CHANNELS};
