pub mod members;
pub mod node;
pub mod run;
