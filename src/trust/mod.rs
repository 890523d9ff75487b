pub mod credentials;
pub mod error;
pub mod evaluator;
pub mod pattern;
pub mod role;
pub mod store;
pub mod token;

#[cfg(test)]
pub(crate) mod testutil;
