pub mod agent;
pub mod brain;
pub mod dom;
pub mod hands;
pub mod tools;
pub mod types;
