mod run;

pub use run::{RunMode, run};
