pub mod controller_impl;
pub mod handlers;
pub mod wrapping;
