pub mod core;
pub mod services;
pub mod utils;

#[cfg(test)]
mod test_support;
