pub mod beacon;
pub mod check;
pub mod run;

pub use beacon::handle_beacon;
pub use check::handle_check;
pub use run::handle_run;
