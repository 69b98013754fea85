pub mod balance;
pub mod observer;
pub mod preferences;
pub mod processing;
pub mod scanner;
